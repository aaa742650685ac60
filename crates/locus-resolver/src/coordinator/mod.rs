//! Dual-lane queue coordinator.
//!
//! Serves subjects from the local cache, otherwise queues them on two lanes:
//!
//! ```text
//! resolve(subject)
//!    │ cache hit ─────────────────────────────► ready
//!    │ already in flight ─────────────────────► ready(None)
//!    ▼
//! fast lane ── batch of 20 ──► BulkResolver ── hit ──► cache + settle
//!                                  │ miss
//!                                  ▼
//! slow lane ── one at a time ──► AuthoritativeResolver ──► cache + settle
//!    ▲   (paused while rate limited, 1.5s between items)      └► SubmissionSink
//!    └──────────────────────────────────────────────────────────
//! ```
//!
//! All mutable state sits behind one mutex that is only held for short
//! synchronous sections, never across an `.await`. Each lane has at most one
//! drainer task, guarded by a flag.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{AuthoritativeResolver, BulkResolver, SubmissionSink};
use crate::cache::{CacheLimits, CacheLookup, ExpiringCache};
use crate::client::{CloudClient, ProfileClient};
use crate::clock::{Clock, SystemClock};
use crate::error::ResolverResult;
use crate::persistence::{CacheStore, JsonFileStore, PersistedCache};
use crate::rate_limit::RateLimitWindow;
use crate::types::{Attribute, QueueConfig, QueueStatus, ResolverConfig};

mod lanes;


/// External collaborators of the coordinator.
#[derive(Clone)]
pub struct Backends {
    pub bulk: Arc<dyn BulkResolver>,
    pub authoritative: Arc<dyn AuthoritativeResolver>,
    pub sink: Arc<dyn SubmissionSink>,
    pub store: Arc<dyn CacheStore>,
}

/// Result delivered to a caller of [`Coordinator::resolve`].
pub type Resolved = ResolverResult<Option<Attribute>>;

/// A queued caller waiting for its subject.
struct PendingRequest {
    subject: String,
    responder: oneshot::Sender<Resolved>,
}

impl PendingRequest {
    fn settle(self, result: Resolved) {
        // The caller may have stopped waiting.
        let _ = self.responder.send(result);
    }
}

/// Future returned by [`Coordinator::resolve`].
///
/// Always settles: a dropped request (e.g. after shutdown) resolves to
/// `Ok(None)`.
#[must_use = "a resolution does nothing unless awaited"]
pub struct Resolution {
    inner: ResolutionState,
}

enum ResolutionState {
    Ready(Option<Resolved>),
    Waiting(oneshot::Receiver<Resolved>),
}

impl Resolution {
    fn ready(result: Resolved) -> Self {
        Self {
            inner: ResolutionState::Ready(Some(result)),
        }
    }

    fn waiting(receiver: oneshot::Receiver<Resolved>) -> Self {
        Self {
            inner: ResolutionState::Waiting(receiver),
        }
    }

    /// Whether the result was available without queueing.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, ResolutionState::Ready(_))
    }
}

impl Future for Resolution {
    type Output = Resolved;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            ResolutionState::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(None))),
            ResolutionState::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|result| result.unwrap_or(Ok(None))),
        }
    }
}

struct State {
    cache: ExpiringCache,
    fast_lane: VecDeque<PendingRequest>,
    slow_lane: VecDeque<PendingRequest>,
    in_flight: HashSet<String>,
    /// Subjects already fed back to the shared cache this process.
    submitted: HashSet<String>,
    fast_draining: bool,
    slow_draining: bool,
    save_scheduled: bool,
    started: bool,
    closed: bool,
    flush_task: Option<JoinHandle<()>>,
}

impl State {
    fn claim_fast_drainer(&mut self) -> bool {
        !std::mem::replace(&mut self.fast_draining, true)
    }

    fn claim_slow_drainer(&mut self) -> bool {
        !std::mem::replace(&mut self.slow_draining, true)
    }
}

struct Shared {
    queue: QueueConfig,
    clock: Arc<dyn Clock>,
    backends: Backends,
    rate_limit: RateLimitWindow,
    state: Mutex<State>,
    /// Serializes writes to the store so an older snapshot never lands last.
    save_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    backends: Backends,
    queue: QueueConfig,
    limits: CacheLimits,
    clock: Arc<dyn Clock>,
}

impl CoordinatorBuilder {
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn cache_limits(mut self, limits: CacheLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Coordinator {
        let state = State {
            cache: ExpiringCache::new(self.limits),
            fast_lane: VecDeque::new(),
            slow_lane: VecDeque::new(),
            in_flight: HashSet::new(),
            submitted: HashSet::new(),
            fast_draining: false,
            slow_draining: false,
            save_scheduled: false,
            started: false,
            closed: false,
            flush_task: None,
        };

        Coordinator {
            shared: Arc::new(Shared {
                queue: self.queue,
                clock: self.clock,
                backends: self.backends,
                rate_limit: RateLimitWindow::new(),
                state: Mutex::new(state),
                save_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

/// Resolves subjects to attributes through the cache and both lanes.
///
/// Cheap to clone; clones share state. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    pub fn builder(backends: Backends) -> CoordinatorBuilder {
        CoordinatorBuilder {
            backends,
            queue: QueueConfig::default(),
            limits: CacheLimits::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Wire the HTTP collaborators and the JSON file store from config.
    pub fn from_config(config: &ResolverConfig) -> ResolverResult<Self> {
        let cloud = Arc::new(CloudClient::new(config)?);
        let profile = Arc::new(ProfileClient::new(config)?);
        let store = match &config.cache_file {
            Some(path) => JsonFileStore::new(path),
            None => JsonFileStore::in_default_dir()?,
        };

        let backends = Backends {
            bulk: cloud.clone(),
            authoritative: profile,
            sink: cloud,
            store: Arc::new(store),
        };

        Ok(Self::builder(backends)
            .queue(config.queue.clone())
            .cache_limits(config.cache.clone())
            .build())
    }

    /// Resolve a subject.
    ///
    /// The subject is registered immediately, before the returned future is
    /// polled. A subject that is already in flight resolves to `Ok(None)`
    /// right away instead of waiting on the first request.
    pub fn resolve(&self, subject: &str) -> Resolution {
        let subject = subject.trim();
        if subject.is_empty() {
            return Resolution::ready(Ok(None));
        }

        let now = self.shared.clock.now();
        let (receiver, start_drainer) = {
            let mut state = self.shared.state();

            if let CacheLookup::Hit(value) = state.cache.get(subject, now) {
                debug!(subject, "cache hit");
                return Resolution::ready(Ok(value));
            }

            if state.closed {
                return Resolution::ready(Ok(None));
            }

            if state.in_flight.contains(subject) {
                debug!(subject, "already in flight");
                return Resolution::ready(Ok(None));
            }

            let (responder, receiver) = oneshot::channel();
            state.in_flight.insert(subject.to_string());
            state.fast_lane.push_back(PendingRequest {
                subject: subject.to_string(),
                responder,
            });
            (receiver, state.claim_fast_drainer())
        };

        if start_drainer {
            tokio::spawn(lanes::drain_fast(Arc::clone(&self.shared)));
        }

        Resolution::waiting(receiver)
    }

    /// Cached result for a subject, without queueing or evicting.
    pub fn cached(&self, subject: &str) -> CacheLookup {
        let now = self.shared.clock.now();
        self.shared.state().cache.peek(subject.trim(), now)
    }

    /// Snapshot for monitoring.
    pub fn status(&self) -> QueueStatus {
        let now = self.shared.clock.now();
        let queue_depth = {
            let state = self.shared.state();
            state.fast_lane.len() + state.slow_lane.len()
        };

        QueueStatus {
            rate_limited: self.shared.rate_limit.is_limited(now),
            reset_at: self.shared.rate_limit.reset_at(),
            queue_depth,
        }
    }

    /// Record a rate-limit reset reported outside a lookup.
    pub fn note_rate_limit(&self, reset_at: DateTime<Utc>) {
        self.shared.rate_limit.note(reset_at);
    }

    /// Number of cached subjects, expired ones included until evicted.
    pub fn cache_len(&self) -> usize {
        self.shared.state().cache.len()
    }

    /// Load the persisted cache and start the periodic flush.
    ///
    /// Runs once; later calls return the current cache size. A store that
    /// fails to load leaves the cache empty.
    pub async fn start(&self) -> usize {
        {
            let mut state = self.shared.state();
            if state.started {
                return state.cache.len();
            }
            state.started = true;
        }

        let persisted = match self.shared.backends.store.load().await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(error = %e, "failed to load persisted cache, starting empty");
                PersistedCache::new()
            }
        };

        let now = self.shared.clock.now();
        let flush_task = lanes::spawn_periodic_flush(&self.shared);
        let kept = {
            let mut state = self.shared.state();
            state.flush_task = Some(flush_task);
            state.cache.restore(persisted, now)
        };

        info!(entries = kept, "resolver started");
        kept
    }

    /// Persist the cache if it changed since the last save.
    ///
    /// Failures are logged and reported as `false`; the next call retries.
    pub async fn save_if_dirty(&self) -> bool {
        self.shared.save_if_dirty().await
    }

    /// Stop taking work and flush the cache.
    ///
    /// Queued callers settle with `Ok(None)`. A lookup already running
    /// completes normally.
    pub async fn shutdown(&self) {
        let (pending, flush_task) = {
            let mut guard = self.shared.state();
            let state = &mut *guard;
            state.closed = true;

            let pending: Vec<PendingRequest> = state
                .fast_lane
                .drain(..)
                .chain(state.slow_lane.drain(..))
                .collect();
            for request in &pending {
                state.in_flight.remove(&request.subject);
            }
            (pending, state.flush_task.take())
        };

        let dropped = pending.len();
        for request in pending {
            request.settle(Ok(None));
        }
        if let Some(task) = flush_task {
            task.abort();
        }

        self.shared.save_if_dirty().await;
        info!(dropped, "resolver shut down");
    }
}
