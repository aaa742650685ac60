use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use locus_resolver::ResolverConfig;


#[derive(Parser)]
#[command(
    name = "locus",
    version,
    about = "Resolve handles to their declared location through a shared cache and the profile source"
)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve one or more subjects
    Resolve(ResolveArgs),
    /// Inspect or maintain the local cache file
    Cache(CacheArgs),
    /// Show or edit settings (master switch, blocked locations)
    Settings(SettingsArgs),
    Version,
}

#[derive(Args, Clone, Debug)]
pub struct BackendArgs {
    /// Shared location cache base URL
    #[arg(long, global = true, env = "LOCUS_CLOUD_URL")]
    pub cloud_url: Option<String>,

    /// Authoritative profile endpoint
    #[arg(long, global = true, env = "LOCUS_PROFILE_URL")]
    pub profile_url: Option<String>,

    /// Bearer token for the profile endpoint
    #[arg(long, global = true, env = "LOCUS_PROFILE_TOKEN", hide_env_values = true)]
    pub profile_token: Option<String>,

    /// Persisted cache file (default: <cache dir>/locus/locations.json)
    #[arg(long, global = true, env = "LOCUS_CACHE_FILE")]
    pub cache_file: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, global = true, default_value_t = 10, env = "LOCUS_HTTP_TIMEOUT")]
    pub http_timeout: u64,

    /// Retries for transient shared cache failures
    #[arg(long, global = true, default_value_t = 1, env = "LOCUS_MAX_RETRIES")]
    pub max_retries: u32,
}

impl BackendArgs {
    pub fn to_config(&self) -> ResolverConfig {
        let mut config = ResolverConfig::default();
        if let Some(url) = &self.cloud_url {
            config = config.with_cloud_url(url);
        }
        if let Some(url) = &self.profile_url {
            config = config.with_profile_url(url);
        }
        if let Some(token) = self.profile_token.as_ref().filter(|t| !t.is_empty()) {
            config = config.with_profile_token(token);
        }
        if let Some(path) = &self.cache_file {
            config = config.with_cache_file(path);
        }
        config.http_timeout_secs = self.http_timeout;
        config.max_retries = self.max_retries;
        config
    }
}

#[derive(Parser, Clone, Debug)]
pub struct ResolveArgs {
    /// Subjects (handles) to resolve; a leading '@' is ignored
    #[arg(required = true)]
    pub subjects: Vec<String>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Settings file (default: <config dir>/locus/settings.json)
    #[arg(long, env = "LOCUS_SETTINGS_FILE")]
    pub settings_file: Option<PathBuf>,

    /// Extra blocked locations for this run (comma-separated)
    #[arg(long, value_name = "LIST")]
    pub block: Option<String>,

    /// Exit with code 3 if any resolved location is blocked
    #[arg(long)]
    pub fail_on_blocked: bool,
}

#[derive(Parser, Clone, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub cmd: CacheSub,
}

#[derive(Subcommand, Clone, Debug)]
pub enum CacheSub {
    /// List cached subjects
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
        /// Include expired and legacy entries
        #[arg(long)]
        all: bool,
    },
    /// Drop expired and legacy entries from the file
    Prune,
    /// Delete the cache file
    Clear,
    /// Print the cache file path
    Path,
}

#[derive(Parser, Clone, Debug)]
pub struct SettingsArgs {
    /// Settings file (default: <config dir>/locus/settings.json)
    #[arg(long, global = true, env = "LOCUS_SETTINGS_FILE")]
    pub settings_file: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: SettingsSub,
}

#[derive(Subcommand, Clone, Debug)]
pub enum SettingsSub {
    /// Print current settings
    Show,
    /// Block a location (substring, case-insensitive)
    Block { location: String },
    /// Remove a blocked location
    Unblock { location: String },
    /// Turn resolution on
    Enable,
    /// Turn resolution off
    Disable,
}
