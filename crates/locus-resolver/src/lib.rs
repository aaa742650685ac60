//! Subject location resolver.
//!
//! Maps a subject (e.g. a handle) to its declared location through two tiers:
//!
//! - a shared remote cache, queried in batches (fast lane)
//! - an authoritative, rate-limited source, queried one subject at a time
//!   (slow lane)
//!
//! Results are kept in a local expiring cache (30 days for found locations,
//! 3 days for confirmed absences), persisted to disk, and found locations are
//! fed back to the shared cache.
//!
//! # Quick Start
//!
//! ```no_run
//! use locus_resolver::{Coordinator, ResolverConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let coordinator = Coordinator::from_config(&ResolverConfig::from_env())?;
//! coordinator.start().await;
//!
//! if let Some(location) = coordinator.resolve("alice").await? {
//!     println!("alice is based in {}", location);
//! }
//!
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `LOCUS_CLOUD_URL` | Shared cache base URL |
//! | `LOCUS_PROFILE_URL` | Authoritative profile endpoint |
//! | `LOCUS_PROFILE_TOKEN` | Bearer token for the profile endpoint |
//! | `LOCUS_CACHE_FILE` | Persisted cache path (default: `<cache dir>/locus/locations.json`) |
//! | `LOCUS_HTTP_TIMEOUT` | HTTP timeout in seconds (default: 10) |
//! | `LOCUS_MAX_RETRIES` | Retries for shared cache requests (default: 1) |

pub mod auth;
pub mod backend;
pub mod cache;
pub mod client;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod persistence;
pub mod rate_limit;
pub mod settings;
pub mod types;

// Re-export main types
pub use auth::TokenProvider;
pub use backend::{AuthoritativeResolver, BulkResolver, NoopSink, SubmissionSink};
pub use cache::{CacheEntry, CacheLimits, CacheLookup, ExpiringCache, TtlClass};
pub use client::{CloudClient, ProfileClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Backends, Coordinator, CoordinatorBuilder, Resolution, Resolved};
pub use error::{ResolverError, ResolverResult};
pub use persistence::{
    default_cache_file, CacheStore, JsonFileStore, MemoryStore, PersistedCache, PersistedEntry,
};
pub use rate_limit::RateLimitWindow;
pub use settings::{parse_blocked, Settings};
pub use types::{AuthoritativeResponse, Attribute, QueueConfig, QueueStatus, ResolverConfig};
