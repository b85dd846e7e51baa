use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tollgate::{
    AdmissionPolicy, ApiError, EventKind, LimiterError, Priority, RateLimiter, RateLimiterConfig,
    RateLimiterManager, RequestOptions, TokenBucket,
};

fn millis_between(earlier: Instant, later: Instant) -> u128 {
    later.duration_since(earlier).as_millis()
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_one_spaces_calls_a_second_apart() {
    let manager = RateLimiterManager::new();
    let config = RateLimiterConfig::new(60, 1_000, 1, 3);
    manager.get_limiter("spaced", Some(config)).unwrap();

    let origin = Instant::now();
    let started = Arc::new(Mutex::new(Vec::new()));

    let mut tickets = Vec::new();
    for i in 0..3 {
        let started = Arc::clone(&started);
        let ticket = manager
            .submit(
                "spaced",
                move || async move {
                    started.lock().push(Instant::now());
                    Ok::<_, ApiError>(i)
                },
                RequestOptions::new(),
            )
            .unwrap();
        tickets.push(ticket);
    }

    for (i, ticket) in tickets.into_iter().enumerate() {
        assert_eq!(ticket.await.unwrap(), i);
    }

    let started = started.lock().clone();
    assert_eq!(started.len(), 3);
    assert!(millis_between(origin, started[0]) < 100);

    for pair in started.windows(2) {
        let gap = millis_between(pair[0], pair[1]);
        assert_eq!(gap, 1_000, "gap was {}ms", gap);
    }

    let stats = manager.get_stats("spaced").unwrap();
    assert_eq!(stats.successful_requests, 3);
    assert!(stats.average_wait_time_ms > 0.0);
    manager.stop_all();
}

#[tokio::test(start_paused = true)]
async fn test_upstream_429_is_counted_and_forwarded() {
    let manager = RateLimiterManager::new();

    let err = manager
        .execute(
            "groq",
            || async { Err::<(), _>("HTTP 429 Too Many Requests".to_string()) },
            RequestOptions::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.into_work().as_deref(), Some("HTTP 429 Too Many Requests"));

    let stats = manager.get_stats("groq").unwrap();
    assert_eq!(stats.rate_limited_requests, 1);
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.successful_requests, 0);
    assert!(stats.health_status().is_unhealthy());

    // A plain failure is not a rate limit
    manager
        .execute(
            "groq",
            || async { Err::<(), _>("connection reset".to_string()) },
            RequestOptions::new(),
        )
        .await
        .unwrap_err();

    let stats = manager.get_stats("groq").unwrap();
    assert_eq!(stats.rate_limited_requests, 1);
    assert_eq!(stats.failed_requests, 2);
    manager.stop_all();
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_never_exceeds_cap() {
    let manager = RateLimiterManager::new();
    let config = RateLimiterConfig::new(600, 100_000, 10, 2);
    manager.get_limiter("capped", Some(config)).unwrap();

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tickets = Vec::new();
    for _ in 0..5 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        tickets.push(
            manager
                .submit(
                    "capped",
                    move || async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, ApiError>(())
                    },
                    RequestOptions::new(),
                )
                .unwrap(),
        );
    }

    for ticket in tickets {
        ticket.await.unwrap();
        let status = manager.get_status("capped").unwrap();
        assert!(status.active_requests <= 2);
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(manager.get_stats("capped").unwrap().successful_requests, 5);
    manager.stop_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_in_flight_cap_holds_across_worker_threads() {
    let manager = RateLimiterManager::new();
    let config = RateLimiterConfig::new(60_000, 10_000_000, 1_000, 3).with_tick_interval_ms(1);
    manager.get_limiter("threaded", Some(config)).unwrap();

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut submitters = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        submitters.push(tokio::spawn(async move {
            for _ in 0..50 {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                manager
                    .execute(
                        "threaded",
                        move || async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_micros(200)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, ApiError>(())
                        },
                        RequestOptions::new().with_estimated_cost(1.0),
                    )
                    .await
                    .unwrap();
            }
        }));
    }

    for submitter in submitters {
        submitter.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    let stats = manager.get_stats("threaded").unwrap();
    assert_eq!(stats.successful_requests, 400);
    assert_eq!(stats.active_requests, 0);
    manager.stop_all();
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_submitted_later_runs_first() {
    let limiter = RateLimiter::start("ordered", RateLimiterConfig::new(600, 10_000, 10, 1)).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let record = |label: &'static str| {
        let order = Arc::clone(&order);
        move || async move {
            order.lock().push(label);
            Ok::<_, ApiError>(())
        }
    };

    let normal = limiter.submit(record("B"), RequestOptions::new()).unwrap();
    let high = limiter
        .submit(record("A"), RequestOptions::new().with_priority(Priority::High))
        .unwrap();

    high.await.unwrap();
    normal.await.unwrap();

    assert_eq!(*order.lock(), vec!["A", "B"]);
    limiter.stop();
}

#[tokio::test(start_paused = true)]
async fn test_equal_priority_is_first_in_first_out() {
    let limiter = RateLimiter::start("fifo", RateLimiterConfig::new(600, 10_000, 10, 1)).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut tickets = Vec::new();
    for i in 0..4 {
        let order = Arc::clone(&order);
        tickets.push(
            limiter
                .submit(
                    move || async move {
                        order.lock().push(i);
                        Ok::<_, ApiError>(())
                    },
                    RequestOptions::low(),
                )
                .unwrap(),
        );
    }

    for ticket in tickets {
        ticket.await.unwrap();
    }

    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    limiter.stop();
}

#[tokio::test(start_paused = true)]
async fn test_estimated_wait_tracks_admissibility() {
    let limiter = RateLimiter::start("wait", RateLimiterConfig::new(60, 600, 2, 2)).unwrap();

    assert!(limiter.can_admit(100.0));
    assert_eq!(limiter.estimated_wait_ms(100.0), 0);

    for _ in 0..2 {
        limiter
            .execute(|| async { Ok::<_, ApiError>(()) }, RequestOptions::new())
            .await
            .unwrap();
    }

    assert!(!limiter.can_admit(0.0));
    assert!(limiter.estimated_wait_ms(0.0) > 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(limiter.can_admit(0.0));
    assert_eq!(limiter.estimated_wait_ms(0.0), 0);
    limiter.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_resolves_queued_requests() {
    let manager = RateLimiterManager::new();
    manager
        .get_limiter("slow", Some(RateLimiterConfig::new(60, 1_000, 1, 1)))
        .unwrap();

    manager
        .execute("slow", || async { Ok::<_, ApiError>(()) }, RequestOptions::new())
        .await
        .unwrap();

    let queued: Vec<_> = (0..3)
        .map(|_| {
            manager
                .submit("slow", || async { Ok::<_, ApiError>(()) }, RequestOptions::new())
                .unwrap()
        })
        .collect();
    assert_eq!(manager.get_status("slow").unwrap().queue_length, 3);

    manager.stop_all();

    for ticket in queued {
        let err = ticket.await.unwrap_err();
        assert_eq!(
            err.as_limiter(),
            Some(&LimiterError::Stopped {
                api: "slow".to_string()
            })
        );
    }

    assert!(manager
        .submit("slow", || async { Ok::<_, ApiError>(()) }, RequestOptions::new())
        .unwrap_err()
        .is_stopped());
    assert_eq!(manager.get_stats("slow").unwrap().queue_length, 0);
}

#[tokio::test(start_paused = true)]
async fn test_skip_blocked_overtakes_but_strict_does_not() {
    for policy in [AdmissionPolicy::Strict, AdmissionPolicy::SkipBlocked] {
        // 600 cost units per minute = 10 per second
        let config = RateLimiterConfig::new(600, 600, 10, 4).with_admission_policy(policy);
        let limiter = RateLimiter::start("policy", config).unwrap();

        limiter
            .execute(
                || async { Ok::<_, ApiError>(()) },
                RequestOptions::new().with_estimated_cost(600.0),
            )
            .await
            .unwrap();

        let _blocked = limiter
            .submit(
                || async { Ok::<_, ApiError>(()) },
                RequestOptions::high().with_estimated_cost(400.0),
            )
            .unwrap();
        let cheap = limiter
            .submit(|| async { Ok::<_, ApiError>(()) }, RequestOptions::low())
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), cheap).await;
        match policy {
            AdmissionPolicy::Strict => assert!(outcome.is_err()),
            AdmissionPolicy::SkipBlocked => assert!(outcome.unwrap().is_ok()),
        }
        limiter.stop();
    }
}

#[tokio::test(start_paused = true)]
async fn test_get_limiter_twice_returns_same_limiter() {
    let manager = RateLimiterManager::new();

    let first = manager.get_limiter("Anthropic", None).unwrap();
    let second = manager
        .get_limiter("anthropic", Some(RateLimiterConfig::new(1, 1, 1, 1)))
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.config().requests_per_minute, 50);
    assert_eq!(second.config().cost_units_per_minute, 40_000);
    manager.stop_all();
}

#[tokio::test(start_paused = true)]
async fn test_tick_events_report_live_state() {
    let manager = RateLimiterManager::new();
    let mut events = manager.subscribe();

    manager
        .execute(
            "openai",
            || async { Ok::<_, ApiError>(()) },
            RequestOptions::new().with_estimated_cost(9_000.0),
        )
        .await
        .unwrap();

    let mut saw_enqueue = false;
    let tick = loop {
        let event = events.recv().await.unwrap();
        match event.kind {
            EventKind::Enqueued => saw_enqueue = true,
            EventKind::Tick => break event,
        }
    };

    assert!(saw_enqueue);
    assert_eq!(tick.api, "openai");
    assert_eq!(tick.status.cost_capacity.max, 90_000.0);
    assert_eq!(tick.stats.total_cost_units_used, 9_000.0);
    manager.stop_all();
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_serialize_with_camel_case() {
    let manager = RateLimiterManager::new();
    manager
        .execute("gemini", || async { Ok::<_, ApiError>(()) }, RequestOptions::new())
        .await
        .unwrap();

    let stats = serde_json::to_value(manager.get_stats("gemini").unwrap()).unwrap();
    assert_eq!(stats["totalRequests"], 1);
    assert_eq!(stats["successfulRequests"], 1);
    assert!(stats.get("averageWaitTimeMs").is_some());
    assert!(stats.get("totalCostUnitsUsed").is_some());

    let status = serde_json::to_value(manager.get_status("gemini").unwrap()).unwrap();
    assert_eq!(status["api"], "gemini");
    assert_eq!(status["requestCapacity"]["max"], 3.0);
    assert!(status.get("costCapacity").is_some());
    manager.stop_all();
}

#[tokio::test(start_paused = true)]
async fn test_overrides_loaded_from_json() {
    let raw = r#"{
        "groq": { "requests_per_minute": 120, "burst_size": 12 },
        "internal": { "admission": "skip_blocked" }
    }"#;
    let overrides: HashMap<String, RateLimiterConfig> = serde_json::from_str(raw).unwrap();
    let manager = RateLimiterManager::with_overrides(overrides);

    let groq = manager.get_limiter("groq", None).unwrap();
    assert_eq!(groq.config().requests_per_minute, 120);
    assert_eq!(groq.config().burst_size, 12);

    let internal = manager.get_limiter("internal", None).unwrap();
    assert_eq!(internal.config().admission, AdmissionPolicy::SkipBlocked);
    assert_eq!(internal.config().requests_per_minute, 20);
    manager.stop_all();
}

#[test]
fn test_bucket_refills_to_capacity_after_idle() {
    let start = Instant::now();
    let mut bucket = TokenBucket::with_tokens(5.0, 30.0 / 60.0, 0.0, start);

    bucket.refill(start + Duration::from_secs(10));
    assert_eq!(bucket.tokens(), 5.0);
}
