//! Basic usage example for the tollgate crate.
//!
//! Run with `RUST_LOG=tollgate=debug cargo run --example basic` to see the
//! limiter's own log lines.

use std::time::{Duration, Instant};
use tollgate::{
    ApiError, Priority, RateLimiter, RateLimiterConfig, RateLimiterManager, RequestOptions,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tollgate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Basic Tollgate Example ===\n");

    // Example 1: Calls spaced by the request budget
    spacing_example().await?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Priorities
    priority_example().await?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Upstream pushback
    rate_limit_detection_example().await;

    Ok(())
}

/// Stand-in for an HTTP call to an LLM provider.
async fn fake_completion(prompt: &'static str) -> Result<String, ApiError> {
    tokio::time::sleep(Duration::from_millis(150)).await;
    Ok(format!("completion for {:?}", prompt))
}

async fn spacing_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("1. Request Spacing:");

    // 60 requests per minute with no burst: one call per second
    let config = RateLimiterConfig::new(60, 10_000, 1, 2);
    let limiter = RateLimiter::start("demo", config)?;
    println!("   Created limiter: 60 req/min, burst 1, 2 in flight");

    let started = Instant::now();
    let mut tickets = Vec::new();
    for prompt in ["first", "second", "third"] {
        tickets.push(limiter.submit(move || fake_completion(prompt), RequestOptions::new())?);
    }

    for ticket in tickets {
        let text = ticket.await?;
        println!("   +{:>5}ms  {}", started.elapsed().as_millis(), text);
    }

    println!("\n{}", limiter.stats());
    limiter.stop();
    Ok(())
}

async fn priority_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("2. Priorities:");

    let manager = RateLimiterManager::new();
    manager.get_limiter("gemini", Some(RateLimiterConfig::new(15, 32_000, 1, 1)))?;

    let mut tickets = Vec::new();
    for (prompt, priority) in [
        ("background summary", Priority::Low),
        ("chat reply", Priority::High),
        ("nightly report", Priority::Normal),
    ] {
        let options = RequestOptions::new()
            .with_priority(priority)
            .with_estimated_cost(1_200.0)
            .with_metadata(prompt);
        let ticket = manager.submit("gemini", move || fake_completion(prompt), options)?;
        tickets.push((prompt, priority, ticket));
    }

    println!("   Queued three calls; high priority is admitted first");
    for (prompt, priority, ticket) in tickets {
        ticket.await?;
        println!("   {:<8} {}", priority, prompt);
    }

    if let Some(status) = manager.get_status("gemini") {
        println!(
            "   Request budget left: {:.1}/{} ({:.0}%)",
            status.request_capacity.current,
            status.request_capacity.max,
            status.request_capacity.percent
        );
    }

    manager.stop_all();
    Ok(())
}

async fn rate_limit_detection_example() {
    println!("3. Upstream Rate Limit Detection:");

    let manager = RateLimiterManager::new();

    for status in [200u16, 429, 500, 429] {
        let result = manager
            .execute(
                "groq",
                move || async move {
                    if status == 200 {
                        Ok("ok")
                    } else {
                        Err(ApiError::from_status(status, "upstream error"))
                    }
                },
                RequestOptions::new(),
            )
            .await;

        match result {
            Ok(body) => println!("   HTTP {} - ✅ {}", status, body),
            Err(err) => println!("   HTTP {} - ❌ {}", status, err),
        }
    }

    if let Some(stats) = manager.get_stats("groq") {
        let health = stats.health_status();
        println!("\n   Health: {} ({})", health, health.suggested_action());
        println!("{}", stats.summary());
    }

    manager.stop_all();
}
