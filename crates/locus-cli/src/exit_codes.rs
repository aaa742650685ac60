//! Exit codes for the `locus` binary.
//!
//! Resolver failures use [`locus_resolver::ResolverError::exit_code`]
//! (2 unauthorized, 5 network/rate limit/timeout, 6 invalid response,
//! 7 persistence).

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_CONFIG_ERROR: i32 = 1; // Bad flags, settings or cache path
pub const EXIT_BLOCKED: i32 = 3; // --fail-on-blocked and a blocked location resolved
