//! User settings: master switch and blocked locations.
//!
//! Stored as JSON. Both the current keys and the browser-storage keys are
//! accepted on read:
//!
//! ```text
//! {"enabled": true, "blocked_locations": ["france", "chile"]}
//! {"extension_enabled": false, "blocked_countries": "France, Chile"}
//! ```

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::fs;

use crate::error::{ResolverError, ResolverResult};
use crate::persistence::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_enabled", alias = "extension_enabled")]
    pub enabled: bool,

    #[serde(
        default,
        alias = "blocked_countries",
        deserialize_with = "deserialize_blocked"
    )]
    pub blocked_locations: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            blocked_locations: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BlockedInput {
    List(Vec<String>),
    Csv(String),
    Missing(Option<()>),
}

fn deserialize_blocked<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match BlockedInput::deserialize(deserializer)? {
        BlockedInput::List(items) => normalize(items.iter().map(String::as_str)),
        BlockedInput::Csv(raw) => parse_blocked(&raw),
        BlockedInput::Missing(_) => Vec::new(),
    })
}

/// Parse a comma-separated blocked list.
pub fn parse_blocked(raw: &str) -> Vec<String> {
    normalize(raw.split(','))
}

fn normalize<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().to_lowercase();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

impl Settings {
    /// Whether a location matches any blocked entry.
    ///
    /// Case-insensitive substring match, so `"france"` blocks
    /// `"Paris, France"`.
    pub fn is_blocked(&self, location: &str) -> bool {
        if self.blocked_locations.is_empty() {
            return false;
        }
        let location = location.to_lowercase();
        self.blocked_locations
            .iter()
            .any(|entry| location.contains(entry.as_str()))
    }

    /// Add a blocked entry. Returns false if it was empty or already present.
    pub fn block(&mut self, location: &str) -> bool {
        let entry = location.trim().to_lowercase();
        if entry.is_empty() || self.blocked_locations.contains(&entry) {
            return false;
        }
        self.blocked_locations.push(entry);
        true
    }

    /// Remove a blocked entry. Returns whether anything was removed.
    pub fn unblock(&mut self, location: &str) -> bool {
        let entry = location.trim().to_lowercase();
        let before = self.blocked_locations.len();
        self.blocked_locations.retain(|existing| *existing != entry);
        self.blocked_locations.len() != before
    }

    /// Load settings; a missing file yields the defaults.
    pub async fn load(path: &Path) -> ResolverResult<Self> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ResolverError::Config {
                    message: format!("failed to read settings {}: {}", path.display(), e),
                })
            }
        };

        serde_json::from_str(&content).map_err(|e| ResolverError::Config {
            message: format!("failed to parse settings {}: {}", path.display(), e),
        })
    }

    pub async fn save(&self, path: &Path) -> ResolverResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ResolverError::Config {
                    message: format!("failed to create settings directory: {}", e),
                })?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| ResolverError::Config {
            message: format!("failed to serialize settings: {}", e),
        })?;
        write_atomic(path, &json).await
    }
}
