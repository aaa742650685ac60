//! Lane drainers and background persistence tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::TtlClass;
use crate::error::ResolverError;
use crate::types::AuthoritativeResponse;

use super::{PendingRequest, Resolved, Shared};

enum SlowStep {
    Idle,
    Wait(Duration),
    Work(PendingRequest),
}

#[derive(Debug, Clone, Copy)]
enum Lane {
    Fast,
    Slow,
}

/// Owned by a running drainer.
///
/// If the drainer is dropped before it finishes (a panicking backend, an
/// aborted task), the lane's drainer flag is cleared and the subjects it was
/// holding leave `in_flight`, so the next `resolve` can start over.
struct DrainGuard {
    shared: Arc<Shared>,
    lane: Lane,
    held: Vec<String>,
    finished: bool,
}

impl DrainGuard {
    fn new(shared: &Arc<Shared>, lane: Lane) -> Self {
        Self {
            shared: Arc::clone(shared),
            lane,
            held: Vec::new(),
            finished: false,
        }
    }

    fn hold(&mut self, subjects: impl IntoIterator<Item = String>) {
        self.held.clear();
        self.held.extend(subjects);
    }

    fn release(&mut self) {
        self.held.clear();
    }

    /// Mark a clean exit. Call with the state lock held, after clearing the flag.
    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let mut state = self.shared.state();
        match self.lane {
            Lane::Fast => state.fast_draining = false,
            Lane::Slow => state.slow_draining = false,
        }
        for subject in self.held.drain(..) {
            state.in_flight.remove(&subject);
        }
        warn!(lane = ?self.lane, "drainer stopped before finishing");
    }
}

/// Drain the fast lane in bulk batches.
///
/// Misses move to the slow lane in arrival order.
pub(super) async fn drain_fast(shared: Arc<Shared>) {
    let mut guard = DrainGuard::new(&shared, Lane::Fast);
    tokio::time::sleep(shared.queue.fast_lane_delay()).await;

    loop {
        let batch: Vec<PendingRequest> = {
            let mut state = shared.state();
            if state.closed || state.fast_lane.is_empty() {
                state.fast_draining = false;
                guard.finish();
                return;
            }
            let take = shared.queue.batch_size().min(state.fast_lane.len());
            state.fast_lane.drain(..take).collect()
        };

        // Sent as typed; results come back keyed by lower-cased subject.
        let subjects: Vec<String> = batch
            .iter()
            .map(|request| request.subject.clone())
            .collect();
        guard.hold(subjects.iter().cloned());

        let found = match shared.backends.bulk.lookup(&subjects).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, count = subjects.len(), "bulk lookup failed, deferring to authoritative lane");
                HashMap::new()
            }
        };

        let now = shared.clock.now();
        let (hits, misses, start_slow) = {
            let mut state = shared.state();
            let mut hits = 0usize;
            let mut misses = 0usize;

            for request in batch {
                let attribute = found
                    .get(&request.subject.to_lowercase())
                    .map(|value| value.trim())
                    .filter(|value| !value.is_empty())
                    .map(String::from);

                match attribute {
                    Some(attribute) => {
                        hits += 1;
                        state.cache.put(
                            &request.subject,
                            Some(attribute.clone()),
                            TtlClass::Found,
                            now,
                        );
                        state.in_flight.remove(&request.subject);
                        request.settle(Ok(Some(attribute)));
                    }
                    None if state.closed => {
                        state.in_flight.remove(&request.subject);
                        request.settle(Ok(None));
                    }
                    None => {
                        misses += 1;
                        state.slow_lane.push_back(request);
                    }
                }
            }

            let start_slow = misses > 0 && state.claim_slow_drainer();
            (hits, misses, start_slow)
        };
        guard.release();

        debug!(hits, misses, "fast lane batch done");
        if hits > 0 {
            shared.schedule_save();
        }
        if start_slow {
            tokio::spawn(drain_slow(Arc::clone(&shared)));
        }

        {
            let mut state = shared.state();
            if state.closed || state.fast_lane.is_empty() {
                state.fast_draining = false;
                guard.finish();
                return;
            }
        }
        tokio::time::sleep(shared.queue.fast_lane_yield()).await;
    }
}

/// Drain the slow lane one subject at a time.
///
/// While the rate-limit window is open nothing is dequeued; the drainer
/// sleeps until the reset, capped so a far-off reset is re-checked.
pub(super) async fn drain_slow(shared: Arc<Shared>) {
    let mut guard = DrainGuard::new(&shared, Lane::Slow);

    loop {
        let step = {
            let mut state = shared.state();
            let remaining = shared.rate_limit.remaining(shared.clock.now());

            if state.closed || state.slow_lane.is_empty() {
                state.slow_draining = false;
                guard.finish();
                SlowStep::Idle
            } else if let Some(remaining) = remaining {
                SlowStep::Wait(remaining.min(shared.queue.rate_limit_poll_cap()))
            } else {
                match state.slow_lane.pop_front() {
                    Some(request) => SlowStep::Work(request),
                    None => {
                        state.slow_draining = false;
                        guard.finish();
                        SlowStep::Idle
                    }
                }
            }
        };

        let request = match step {
            SlowStep::Idle => return,
            SlowStep::Wait(wait) => {
                debug!(?wait, "slow lane waiting for rate limit reset");
                tokio::time::sleep(wait).await;
                continue;
            }
            SlowStep::Work(request) => request,
        };

        guard.hold([request.subject.clone()]);
        let pause = shared.resolve_authoritative(request).await;
        guard.release();

        if pause {
            tokio::time::sleep(shared.queue.slow_lane_interval()).await;
        }
    }
}

/// Flush the cache on a fixed period for as long as the coordinator lives.
pub(super) fn spawn_periodic_flush(shared: &Arc<Shared>) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    let period = shared.queue.flush_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            shared.save_if_dirty().await;
        }
    })
}

impl Shared {
    /// Look up one subject at the authoritative source and settle its caller.
    ///
    /// Returns whether the lane should pause before the next item.
    async fn resolve_authoritative(self: &Arc<Self>, request: PendingRequest) -> bool {
        let outcome = match tokio::time::timeout(
            self.queue.lookup_timeout(),
            self.backends.authoritative.lookup(&request.subject),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ResolverError::Timeout {
                subject: request.subject.clone(),
            }),
        };

        match outcome {
            Ok(response) if response.rate_limited => {
                self.record_rate_limit(&request.subject, response.reset_at);
                // Rate-limited answers are never cached.
                self.finish(request, Ok(response.attribute));
                true
            }
            Ok(response) => {
                self.store_authoritative(request, response);
                true
            }
            Err(ResolverError::RateLimited { reset_at }) => {
                self.record_rate_limit(&request.subject, reset_at);
                self.finish(request, Ok(None));
                true
            }
            Err(e) if e.is_transient() => {
                debug!(subject = %request.subject, error = %e, "authoritative lookup failed");
                self.finish(request, Ok(None));
                true
            }
            Err(e) => {
                warn!(subject = %request.subject, error = %e, "authoritative lookup rejected");
                self.finish(request, Err(e));
                false
            }
        }
    }

    fn record_rate_limit(&self, subject: &str, reset_at: Option<chrono::DateTime<chrono::Utc>>) {
        match reset_at {
            Some(reset_at) => {
                info!(subject, reset_at = %reset_at, "authoritative source rate limited");
                self.rate_limit.note(reset_at);
            }
            None => warn!(subject, "authoritative source rate limited without a reset time"),
        }
    }

    fn store_authoritative(self: &Arc<Self>, request: PendingRequest, response: AuthoritativeResponse) {
        let attribute = response.attribute;
        let now = self.clock.now();
        {
            let mut state = self.state();
            state.cache.put(
                &request.subject,
                attribute.clone(),
                TtlClass::of(&attribute),
                now,
            );
            state.in_flight.remove(&request.subject);
        }

        self.schedule_save();
        if let Some(attribute) = &attribute {
            self.submit(&request.subject, attribute);
        }
        request.settle(Ok(attribute));
    }

    fn finish(&self, request: PendingRequest, result: Resolved) {
        self.state().in_flight.remove(&request.subject);
        request.settle(result);
    }

    /// Feed a found attribute back to the shared cache, once per subject.
    fn submit(&self, subject: &str, attribute: &str) {
        if !self.state().submitted.insert(subject.to_string()) {
            return;
        }

        let sink = Arc::clone(&self.backends.sink);
        let subject = subject.to_string();
        let attribute = attribute.to_string();
        tokio::spawn(async move {
            if let Err(e) = sink.submit(&subject, &attribute).await {
                debug!(subject = %subject, error = %e, "submission failed");
            }
        });
    }

    /// Save once the debounce elapses, coalescing writes in between.
    pub(super) fn schedule_save(self: &Arc<Self>) {
        {
            let mut state = self.state();
            if state.closed || state.save_scheduled || !state.cache.is_dirty() {
                return;
            }
            state.save_scheduled = true;
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.queue.save_debounce()).await;
            shared.state().save_scheduled = false;
            shared.save_if_dirty().await;
        });
    }

    pub(super) async fn save_if_dirty(&self) -> bool {
        let _guard = self.save_lock.lock().await;

        let snapshot = {
            let state = self.state();
            if !state.cache.is_dirty() {
                return false;
            }
            state.cache.serialize_live(self.clock.now())
        };

        match self.backends.store.save(&snapshot.entries).await {
            Ok(()) => {
                self.state().cache.mark_persisted(snapshot.revision);
                debug!(entries = snapshot.entries.len(), "cache persisted");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to persist cache");
                false
            }
        }
    }
}
