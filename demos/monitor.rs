//! Live monitoring example: several providers under load, watched through
//! the manager's event stream.
//!
//! Run with `cargo run --example monitor`.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tollgate::{ApiError, EventKind, Priority, RateLimiterManager, RequestOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tollgate=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let manager = RateLimiterManager::new();
    let mut events = manager.subscribe();

    // Print a line per API roughly every second
    let monitor = tokio::spawn(async move {
        let mut last_printed: HashMap<String, u64> = HashMap::new();
        loop {
            match events.recv().await {
                Ok(event) if event.kind == EventKind::Tick => {
                    let last = last_printed.entry(event.api.clone()).or_insert(0);
                    if event.emitted_at_ms.saturating_sub(*last) < 1_000 {
                        continue;
                    }
                    *last = event.emitted_at_ms;
                    println!(
                        "[{:<10}] queued {:>2} | active {} | requests {:>5.1}% | cost {:>5.1}% | done {}/{}",
                        event.api,
                        event.status.queue_length,
                        event.status.active_requests,
                        event.status.request_capacity.percent,
                        event.status.cost_capacity.percent,
                        event.stats.completed_requests(),
                        event.stats.total_requests,
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    println!("(monitor fell behind, skipped {} events)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Fire a burst of work at three providers
    let mut tickets = Vec::new();
    for i in 0..8u64 {
        for api in ["groq", "anthropic", "gemini"] {
            let priority = if i % 4 == 0 { Priority::High } else { Priority::Normal };
            let options = RequestOptions::new()
                .with_priority(priority)
                .with_estimated_cost(500.0 + (i as f64) * 250.0)
                .with_metadata(format!("{}-job-{}", api, i));

            let ticket = manager.submit(
                api,
                move || async move {
                    tokio::time::sleep(Duration::from_millis(200 + i * 40)).await;
                    if api == "groq" && i == 5 {
                        Err(ApiError::from_status(429, "rate limit exceeded"))
                    } else {
                        Ok(i)
                    }
                },
                options,
            )?;
            tickets.push(ticket);
        }
    }

    for ticket in tickets {
        if let Err(err) = ticket.await {
            println!("call failed: {}", err);
        }
    }

    println!();
    let mut all_stats: Vec<_> = manager.get_all_stats().into_iter().collect();
    all_stats.sort_by(|a, b| a.0.cmp(&b.0));
    for (api, stats) in all_stats {
        println!("{} ({})", api, stats.health_status());
        println!("{}\n", stats.summary());
    }
    println!("{}", manager.stats());

    manager.stop_all();
    monitor.abort();
    Ok(())
}
