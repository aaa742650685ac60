use chrono::{DateTime, Utc};
use locus_resolver::{CacheLimits, CacheStore, ExpiringCache, PersistedCache, PersistedEntry};
use serde::Serialize;

use super::super::args::{BackendArgs, CacheArgs, CacheSub};
use crate::exit_codes::EXIT_SUCCESS;

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum EntryState {
    Live,
    Expired,
    Legacy,
    Invalid,
}

#[derive(Debug, Serialize)]
struct CacheRow {
    subject: String,
    location: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    state: EntryState,
}

fn rows(persisted: PersistedCache, now: DateTime<Utc>) -> Vec<CacheRow> {
    persisted
        .into_iter()
        .map(|(subject, stored)| match stored {
            PersistedEntry::Legacy(location) => CacheRow {
                subject,
                location,
                expires_at: None,
                state: EntryState::Legacy,
            },
            PersistedEntry::Invalid(_) => CacheRow {
                subject,
                location: None,
                expires_at: None,
                state: EntryState::Invalid,
            },
            timed => match timed.into_entry() {
                Some(entry) => CacheRow {
                    subject,
                    state: if entry.is_live(now) {
                        EntryState::Live
                    } else {
                        EntryState::Expired
                    },
                    location: entry.value,
                    expires_at: Some(entry.expires_at),
                },
                None => CacheRow {
                    subject,
                    location: None,
                    expires_at: None,
                    state: EntryState::Expired,
                },
            },
        })
        .collect()
}

pub(crate) async fn run(backend: &BackendArgs, args: CacheArgs) -> anyhow::Result<i32> {
    let store = super::open_store(backend)?;

    match args.cmd {
        CacheSub::Path => {
            println!("{}", store.path().display());
        }
        CacheSub::List { json, all } => {
            let listed: Vec<CacheRow> = rows(store.load().await?, Utc::now())
                .into_iter()
                .filter(|row| all || row.state == EntryState::Live)
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&listed)?);
            } else {
                for row in &listed {
                    let location = row.location.as_deref().unwrap_or("-");
                    let expires = row
                        .expires_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string());
                    match row.state {
                        EntryState::Live => println!("{}\t{}\t{}", row.subject, location, expires),
                        EntryState::Expired => {
                            println!("{}\t{}\t{}\t[expired]", row.subject, location, expires)
                        }
                        EntryState::Legacy => {
                            println!("{}\t{}\t{}\t[legacy]", row.subject, location, expires)
                        }
                        EntryState::Invalid => {
                            println!("{}\t{}\t{}\t[invalid]", row.subject, location, expires)
                        }
                    }
                }
                eprintln!("{} entries", listed.len());
            }
        }
        CacheSub::Prune => {
            let persisted = store.load().await?;
            let total = persisted.len();
            let now = Utc::now();

            let mut cache = ExpiringCache::new(CacheLimits::default());
            let kept = cache.restore(persisted, now);
            store.save(&cache.serialize_live(now).entries).await?;

            eprintln!(
                "pruned {} of {} entries ({})",
                total - kept,
                total,
                store.path().display()
            );
        }
        CacheSub::Clear => {
            store.remove().await?;
            eprintln!("cache cleared ({})", store.path().display());
        }
    }

    Ok(EXIT_SUCCESS)
}
