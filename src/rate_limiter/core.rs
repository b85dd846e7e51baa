//! # Core Rate Limiter Implementation
//!
//! One [`RateLimiter`] guards one upstream API. It owns two token buckets, a
//! priority queue of pending work, an in-flight counter and the running
//! statistics, plus a scheduler task that turns queued work into running work.
//!
//! ## Request Lifecycle
//!
//! ```text
//!     submit()                 scheduler tick (every 100ms)            tokio task
//!        │                              │                                  │
//!        ▼                              ▼                                  │
//!     ┌───────┐   refill buckets   ┌─────────┐   spawn    ┌──────────────┐ │
//!     │ queue │ ─────────────────► │  admit  │ ─────────► │  work().await│◄┘
//!     └───────┘  while head fits   └─────────┘            └──────┬───────┘
//!         ▲      and in-flight < max                             │
//!         │                                                      ▼
//!         │                                        settle stats, free slot,
//!         └──────────── drain again immediately ◄── deliver result to ticket
//! ```
//!
//! ## Admission Rule
//!
//! A request fits when the request bucket holds at least one token and, for a
//! non-zero estimated cost, the cost bucket holds at least that cost. With
//! [`AdmissionPolicy::Strict`] a head that does not fit ends the tick, even
//! if something cheaper waits behind it.
//!
//! ## Synchronization
//!
//! All mutable state sits behind one `parking_lot::Mutex`, held only for
//! short synchronous sections and never across an `.await`. Limiters never
//! touch each other's state.

use super::{
    bucket::TokenBucket,
    config::{AdmissionPolicy, RateLimiterConfig},
    error::{ExecuteError, LimiterError, RateLimitSignal},
    metrics::{CapacitySnapshot, Counters, EventKind, LimiterEvent, LimiterStats, LimiterStatus},
    queue::{Completion, Job, Outcome, QueueKey, QueuedRequest, RequestOptions, RequestQueue},
    utils::{ceil_millis, current_time_ms, floor_millis},
};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Capacity of a standalone limiter's event channel.
///
/// Slow subscribers skip events rather than hold the scheduler back.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything guarded by the limiter's lock.
struct LimiterState {
    request_bucket: TokenBucket,
    cost_bucket: TokenBucket,
    queue: RequestQueue,
    in_flight: usize,
    counters: Counters,
}

impl LimiterState {
    fn new(config: &RateLimiterConfig, now: Instant) -> Self {
        let burst = config.burst_size as f64;
        let cost_capacity = config.cost_units_per_minute as f64;
        Self {
            request_bucket: TokenBucket::with_tokens(burst, config.requests_per_second(), burst, now),
            cost_bucket: TokenBucket::with_tokens(
                cost_capacity,
                config.cost_units_per_second(),
                cost_capacity,
                now,
            ),
            queue: RequestQueue::new(),
            in_flight: 0,
            counters: Counters::default(),
        }
    }

    fn refill(&mut self, now: Instant) {
        self.request_bucket.refill(now);
        self.cost_bucket.refill(now);
    }

    /// Cost actually drawn from the cost bucket; never more than it can hold.
    fn effective_cost(&self, cost: f64) -> f64 {
        cost.min(self.cost_bucket.max_tokens())
    }

    fn fits(&self, cost: f64) -> bool {
        self.request_bucket.has(1.0)
            && (cost <= 0.0 || self.cost_bucket.has(self.effective_cost(cost)))
    }

    fn wait_for(&self, cost: f64) -> Duration {
        let request_wait = self.request_bucket.time_until(1.0);
        let cost_wait = if cost <= 0.0 {
            Duration::ZERO
        } else {
            self.cost_bucket.time_until(self.effective_cost(cost))
        };
        request_wait.max(cost_wait)
    }

    fn next_admissible(&self, policy: AdmissionPolicy) -> Option<QueueKey> {
        match policy {
            AdmissionPolicy::Strict => {
                let (key, head) = self.queue.peek()?;
                self.fits(head.estimated_cost).then_some(key)
            }
            AdmissionPolicy::SkipBlocked => {
                if !self.request_bucket.has(1.0) {
                    return None;
                }
                self.queue.find(|request| self.fits(request.estimated_cost))
            }
        }
    }

    fn status(&self, api: &str) -> LimiterStatus {
        LimiterStatus {
            api: api.to_string(),
            queue_length: self.queue.len(),
            active_requests: self.in_flight,
            request_capacity: CapacitySnapshot::new(
                self.request_bucket.tokens(),
                self.request_bucket.max_tokens(),
            ),
            cost_capacity: CapacitySnapshot::new(
                self.cost_bucket.tokens(),
                self.cost_bucket.max_tokens(),
            ),
        }
    }

    fn stats(&self) -> LimiterStats {
        self.counters.snapshot(self.queue.len(), self.in_flight)
    }
}

/// Admission controller for a single upstream API.
///
/// Created through [`RateLimiter::start`] (or by a
/// [`RateLimiterManager`](crate::RateLimiterManager)), always behind an
/// `Arc`. Starting a limiter spawns its scheduler on the current tokio
/// runtime; the scheduler stops on [`RateLimiter::stop`] or when the last
/// `Arc` is dropped.
///
/// ## Example
///
/// ```rust
/// use tollgate::{ApiError, RateLimiter, RateLimiterConfig, RequestOptions};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = RateLimiter::start("openai", RateLimiterConfig::for_api("openai"))?;
///
/// let answer = limiter
///     .execute(
///         || async { Ok::<_, ApiError>("42") },
///         RequestOptions::high().with_estimated_cost(1_200.0),
///     )
///     .await?;
///
/// assert_eq!(answer, "42");
/// limiter.stop();
/// # Ok(())
/// # }
/// ```
pub struct RateLimiter {
    api: String,
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
    stopped: Arc<AtomicBool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
    events: broadcast::Sender<LimiterEvent>,
}

impl RateLimiter {
    /// Validates `config` and starts a limiter with its own event channel.
    ///
    /// # Errors
    ///
    /// - [`LimiterError::InvalidConfig`] if the configuration is invalid
    /// - [`LimiterError::NoRuntime`] if called outside a tokio runtime
    pub fn start(
        api: impl Into<String>,
        config: RateLimiterConfig,
    ) -> Result<Arc<Self>, LimiterError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self::start_with_events(api.into(), config, events)
    }

    /// Starts a limiter that publishes into an existing channel.
    pub(crate) fn start_with_events(
        api: String,
        config: RateLimiterConfig,
        events: broadcast::Sender<LimiterEvent>,
    ) -> Result<Arc<Self>, LimiterError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| LimiterError::NoRuntime)?;

        let limiter = Arc::new(Self {
            state: Mutex::new(LimiterState::new(&config, Instant::now())),
            api,
            config,
            stopped: Arc::new(AtomicBool::new(false)),
            scheduler: Mutex::new(None),
            runtime,
            events,
        });

        let handle = limiter.runtime.spawn(scheduler_loop(
            Arc::downgrade(&limiter),
            limiter.config.tick_interval(),
        ));
        *limiter.scheduler.lock() = Some(handle);

        debug!(
            "Created rate limiter for API: {} ({} req/min, {} cost/min, burst {}, max concurrent {})",
            limiter.api,
            limiter.config.requests_per_minute,
            limiter.config.cost_units_per_minute,
            limiter.config.burst_size,
            limiter.config.max_concurrent
        );

        Ok(limiter)
    }

    /// Queues `work` and waits for its result.
    ///
    /// Suspends until the request is admitted and the work completes. The
    /// work's own error comes back unchanged as [`ExecuteError::Work`].
    ///
    /// # Errors
    ///
    /// - [`ExecuteError::Work`] when the work fails
    /// - [`ExecuteError::Limiter`] with [`LimiterError::Stopped`] when the
    ///   limiter is, or gets, stopped before the work runs
    /// - [`ExecuteError::Limiter`] with [`LimiterError::Abandoned`] when the
    ///   work panics
    pub async fn execute<F, Fut, T, E>(
        &self,
        work: F,
        options: RequestOptions,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: RateLimitSignal + Send + 'static,
    {
        self.submit(work, options)?.await
    }

    /// Queues `work` and returns a [`Ticket`] that resolves with its result.
    ///
    /// The request is in the queue by the time this returns, so relative
    /// ordering between submissions is exactly the call order.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::Stopped`] immediately if the limiter has been
    /// stopped.
    pub fn submit<F, Fut, T, E>(
        &self,
        work: F,
        options: RequestOptions,
    ) -> Result<Ticket<T, E>, LimiterError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: RateLimitSignal + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let admitted = Arc::new(AtomicBool::new(false));
        let started = Arc::clone(&admitted);

        let job: Job = Box::new(move || {
            started.store(true, Ordering::SeqCst);
            Box::pin(async move {
                let result = work().await;
                let outcome = match &result {
                    Ok(_) => Outcome::Succeeded,
                    Err(err) => Outcome::Failed {
                        rate_limited: err.is_rate_limited(),
                        message: err.to_string(),
                    },
                };
                Completion {
                    outcome,
                    deliver: Box::new(move || {
                        // The caller may have dropped its ticket
                        let _ = tx.send(result);
                    }),
                }
            })
        });

        self.enqueue(QueuedRequest::new(job, options, Instant::now()))?;

        Ok(Ticket {
            api: self.api.clone(),
            admitted,
            stopped: Arc::clone(&self.stopped),
            rx,
        })
    }

    fn enqueue(&self, request: QueuedRequest) -> Result<(), LimiterError> {
        {
            let mut state = self.state.lock();
            if self.is_stopped() {
                return Err(self.stopped_error());
            }

            state.refill(Instant::now());
            let cost = request.estimated_cost;

            if cost > state.cost_bucket.max_tokens() {
                warn!(
                    "Estimated cost {} for API: {} exceeds the cost budget of {}; it will wait for a full bucket",
                    cost,
                    self.api,
                    state.cost_bucket.max_tokens()
                );
            }

            if state.fits(cost) {
                debug!(
                    "Queued request for API: {} [{}] (priority: {}, cost: {})",
                    self.api,
                    request.label(),
                    request.priority,
                    cost
                );
            } else {
                debug!(
                    "Queued request for API: {} [{}] (priority: {}, cost: {}, estimated wait: {}ms)",
                    self.api,
                    request.label(),
                    request.priority,
                    cost,
                    ceil_millis(state.wait_for(cost))
                );
            }

            state.counters.record_submitted();
            state.queue.push(request);
        }

        self.publish(EventKind::Enqueued);
        Ok(())
    }

    /// One scheduler tick: refill, admit, publish.
    fn tick(self: &Arc<Self>) {
        self.drain();
        self.publish(EventKind::Tick);
    }

    /// Admits as much queued work as the budgets and the in-flight cap allow.
    ///
    /// Returns the number of requests admitted.
    fn drain(self: &Arc<Self>) -> usize {
        if self.is_stopped() {
            return 0;
        }

        let admitted = {
            let mut state = self.state.lock();
            let now = Instant::now();
            state.refill(now);

            let mut admitted = Vec::new();
            while !state.queue.is_empty() && state.in_flight < self.config.max_concurrent {
                let Some(key) = state.next_admissible(self.config.admission) else {
                    break;
                };
                let Some(request) = state.queue.remove(key) else {
                    break;
                };

                let cost = state.effective_cost(request.estimated_cost);
                state.request_bucket.consume(1.0);
                state.cost_bucket.consume(cost);
                state.in_flight += 1;

                let waited = now.saturating_duration_since(request.enqueued_at);
                state.counters.record_admitted(floor_millis(waited), cost);

                debug!(
                    "Admitted request #{} for API: {} [{}] after {}ms (in flight: {}/{})",
                    key.sequence(),
                    self.api,
                    request.label(),
                    floor_millis(waited),
                    state.in_flight,
                    self.config.max_concurrent
                );
                admitted.push(request);
            }
            admitted
        };

        let count = admitted.len();
        for request in admitted {
            self.runtime.spawn(Arc::clone(self).run(request));
        }
        count
    }

    /// Runs one admitted request to completion.
    async fn run(self: Arc<Self>, request: QueuedRequest) {
        let QueuedRequest { job, metadata, .. } = request;
        let mut slot = InFlightSlot::new(&self);

        let completion = job().await;
        slot.settle(&completion.outcome, metadata.as_deref().unwrap_or("-"));
        (completion.deliver)();
        // Dropping the slot triggers the next drain
    }

    /// Releases an in-flight slot and records how the work ended.
    fn finish(&self, outcome: &Outcome, label: &str) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            match outcome {
                Outcome::Succeeded => state.counters.record_success(),
                Outcome::Failed { rate_limited, .. } => {
                    state.counters.record_failure(*rate_limited)
                }
            }
        }

        if let Outcome::Failed {
            rate_limited,
            message,
        } = outcome
        {
            if *rate_limited {
                warn!(
                    "Upstream rate limit hit for API: {} [{}]: {}",
                    self.api, label, message
                );
            } else {
                debug!("Request failed for API: {} [{}]: {}", self.api, label, message);
            }
        }
    }

    fn publish(&self, kind: EventKind) {
        if self.events.receiver_count() == 0 {
            return;
        }

        let (status, stats) = {
            let mut state = self.state.lock();
            state.refill(Instant::now());
            (state.status(&self.api), state.stats())
        };

        // No receivers left is not an error
        let _ = self.events.send(LimiterEvent {
            api: self.api.clone(),
            kind,
            emitted_at_ms: current_time_ms(),
            status,
            stats,
        });
    }

    /// Stops the scheduler and discards queued requests.
    ///
    /// Discarded requests never run; their tickets resolve with
    /// [`LimiterError::Stopped`]. Work already in flight finishes and
    /// delivers normally. Calling `stop` again does nothing.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
        }

        let abandoned = self.state.lock().queue.drain_all();
        info!(
            "Stopped rate limiter for API: {} ({} queued requests discarded)",
            self.api,
            abandoned.len()
        );
        // Dropping the jobs closes their result channels
        drop(abandoned);
    }

    /// Returns `true` once [`RateLimiter::stop`] has been called.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stopped_error(&self) -> LimiterError {
        LimiterError::Stopped {
            api: self.api.clone(),
        }
    }

    /// Whether a request of `estimated_cost` would be admitted right now,
    /// ignoring the queue and the in-flight cap.
    pub fn can_admit(&self, estimated_cost: f64) -> bool {
        let cost = RequestOptions::new()
            .with_estimated_cost(estimated_cost)
            .sanitized_cost();
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.fits(cost)
    }

    /// Time until a request of `estimated_cost` would fit both budgets.
    ///
    /// Diagnostics only; the scheduler never sleeps on this value.
    pub fn estimated_wait(&self, estimated_cost: f64) -> Duration {
        let cost = RequestOptions::new()
            .with_estimated_cost(estimated_cost)
            .sanitized_cost();
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.wait_for(cost)
    }

    /// [`RateLimiter::estimated_wait`] in milliseconds, rounded up.
    ///
    /// 0 exactly when [`RateLimiter::can_admit`] is true.
    pub fn estimated_wait_ms(&self, estimated_cost: f64) -> u64 {
        ceil_millis(self.estimated_wait(estimated_cost))
    }

    /// Current budgets and load.
    pub fn status(&self) -> LimiterStatus {
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.status(&self.api)
    }

    /// Current counters.
    pub fn stats(&self) -> LimiterStats {
        self.state.lock().stats()
    }

    /// Zeroes the counters. Queue, buckets and in-flight work are untouched.
    pub fn reset_stats(&self) {
        self.state.lock().counters = Counters::default();
        debug!("Reset statistics for API: {}", self.api);
    }

    /// Requests waiting for admission.
    pub fn queue_length(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Requests currently executing.
    pub fn active_requests(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Receives a [`LimiterEvent`] on every tick and every enqueue.
    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.events.subscribe()
    }

    /// API identity.
    pub fn api(&self) -> &str {
        &self.api
    }

    /// Configuration the limiter was started with.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("api", &self.api)
            .field("config", &self.config)
            .field("queue_length", &self.queue_length())
            .field("active_requests", &self.active_requests())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler.get_mut().take() {
            handle.abort();
        }
    }
}

/// Periodic refill-and-drain loop. Holds only a weak reference so it never
/// keeps a limiter alive.
async fn scheduler_loop(limiter: Weak<RateLimiter>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(limiter) = limiter.upgrade() else {
            break;
        };
        if limiter.is_stopped() {
            break;
        }
        limiter.tick();
    }
}

/// RAII guard for one in-flight slot.
///
/// Guarantees the slot is released and the queue drained again even if the
/// work panics.
struct InFlightSlot<'a> {
    limiter: &'a Arc<RateLimiter>,
    settled: bool,
}

impl<'a> InFlightSlot<'a> {
    fn new(limiter: &'a Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            settled: false,
        }
    }

    fn settle(&mut self, outcome: &Outcome, label: &str) {
        self.limiter.finish(outcome, label);
        self.settled = true;
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                "Work for API: {} ended without producing a result",
                self.limiter.api
            );
            self.limiter.finish(
                &Outcome::Failed {
                    rate_limited: false,
                    message: "work abandoned".to_string(),
                },
                "-",
            );
        }
        self.limiter.drain();
    }
}

/// Pending result of a submitted request.
///
/// Resolves once the request has been admitted and its work has finished.
/// Dropping a ticket does not remove the request from the queue; the work
/// still runs and its result is discarded.
#[must_use = "a ticket does nothing unless awaited"]
pub struct Ticket<T, E> {
    api: String,
    /// Set once the work has been handed to a task
    admitted: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Unpin for Ticket<T, E> {}

impl<T, E> Future for Ticket<T, E> {
    type Output = Result<T, ExecuteError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result.map_err(ExecuteError::Work)),
            Poll::Ready(Err(_)) => {
                let api = self.api.clone();
                // Admitted work that lost its sender panicked, even after a stop
                let err = if !self.admitted.load(Ordering::SeqCst)
                    && self.stopped.load(Ordering::SeqCst)
                {
                    LimiterError::Stopped { api }
                } else {
                    LimiterError::Abandoned { api }
                };
                Poll::Ready(Err(err.into()))
            }
        }
    }
}

impl<T, E> fmt::Debug for Ticket<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket").field("api", &self.api).finish_non_exhaustive()
    }
}
