use locus_resolver::{parse_blocked, Coordinator, Settings};
use serde::Serialize;

use super::super::args::{BackendArgs, ResolveArgs};
use crate::exit_codes::{EXIT_BLOCKED, EXIT_SUCCESS};

#[derive(Debug, Serialize)]
struct ResolveRow {
    subject: String,
    location: Option<String>,
    blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Normalize CLI subjects: strip a leading '@', drop blanks and repeats.
fn normalize_subjects(raw: &[String]) -> Vec<String> {
    let mut subjects: Vec<String> = Vec::new();
    for subject in raw {
        let subject = subject.trim().trim_start_matches('@');
        if !subject.is_empty() && !subjects.iter().any(|s| s == subject) {
            subjects.push(subject.to_string());
        }
    }
    subjects
}

pub(crate) async fn run(backend: &BackendArgs, args: ResolveArgs) -> anyhow::Result<i32> {
    let settings_path = super::settings_path(args.settings_file.as_deref())?;
    let mut settings = Settings::load(&settings_path).await?;
    if let Some(list) = &args.block {
        for entry in parse_blocked(list) {
            settings.block(&entry);
        }
    }

    if !settings.enabled {
        eprintln!("locus is disabled (run `locus settings enable`)");
        return Ok(EXIT_SUCCESS);
    }

    let subjects = normalize_subjects(&args.subjects);
    let coordinator = Coordinator::from_config(&backend.to_config())?;
    let loaded = coordinator.start().await;
    tracing::debug!(entries = loaded, subjects = subjects.len(), "resolving");

    let pending: Vec<_> = subjects.iter().map(|s| coordinator.resolve(s)).collect();
    let results = futures::future::join_all(pending).await;
    let status = coordinator.status();
    coordinator.shutdown().await;

    if status.rate_limited {
        if let Some(reset_at) = status.reset_at {
            eprintln!("warning: profile source rate limited until {}", reset_at.to_rfc3339());
        }
    }

    let mut code = EXIT_SUCCESS;
    let mut any_blocked = false;
    let mut rows = Vec::with_capacity(subjects.len());

    for (subject, result) in subjects.into_iter().zip(results) {
        let row = match result {
            Ok(location) => {
                let blocked = location
                    .as_deref()
                    .is_some_and(|location| settings.is_blocked(location));
                any_blocked |= blocked;
                ResolveRow {
                    subject,
                    location,
                    blocked,
                    error: None,
                }
            }
            Err(e) => {
                if code == EXIT_SUCCESS {
                    code = e.exit_code();
                }
                ResolveRow {
                    subject,
                    location: None,
                    blocked: false,
                    error: Some(e.to_string()),
                }
            }
        };
        rows.push(row);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            match (&row.location, &row.error) {
                (_, Some(error)) => println!("{}\terror: {}", row.subject, error),
                (Some(location), None) if row.blocked => {
                    println!("{}\t{}\t[blocked]", row.subject, location)
                }
                (Some(location), None) => println!("{}\t{}", row.subject, location),
                (None, None) => println!("{}\t-", row.subject),
            }
        }
    }

    if code == EXIT_SUCCESS && args.fail_on_blocked && any_blocked {
        code = EXIT_BLOCKED;
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_subjects() {
        let raw = vec![
            "@alice".to_string(),
            " bob ".to_string(),
            "alice".to_string(),
            "@".to_string(),
            "".to_string(),
        ];
        assert_eq!(normalize_subjects(&raw), vec!["alice", "bob"]);
    }

    #[test]
    fn test_row_json_omits_missing_error() {
        let row = ResolveRow {
            subject: "alice".to_string(),
            location: Some("France".to_string()),
            blocked: true,
            error: None,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"subject": "alice", "location": "France", "blocked": true})
        );
    }
}
