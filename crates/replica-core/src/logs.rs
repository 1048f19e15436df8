//! Sync log access
//!
//! Sync procedures write `<prefix>-<timestamp>.log` files into one
//! directory. Timestamps sort lexicographically in chronological order, so
//! the newest logs are the ones with the greatest file names.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::FailureKind;
use crate::{Error, Result};

/// Reads recent sync logs from a directory
#[derive(Debug, Clone)]
pub struct LogReader {
    dir: PathBuf,
    prefix: String,
}

/// One log file, loaded or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogArtifact {
    pub file: PathBuf,
    #[serde(flatten)]
    pub body: LogBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LogBody {
    Loaded {
        timestamp: String,
        size_bytes: u64,
        content: String,
    },
    Failed {
        error: String,
        kind: FailureKind,
    },
}

impl LogReader {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The `count` newest logs, newest first.
    ///
    /// A missing directory yields no logs. A file that cannot be read is
    /// returned with an error body and does not affect the others.
    pub fn recent(&self, count: usize) -> Result<Vec<LogArtifact>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "Log directory does not exist");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(Error::LogDirRead {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            // Follows symlinks; a dangling one is kept and fails on read
            .filter(|entry| !std::fs::metadata(entry.path()).is_ok_and(|m| m.is_dir()))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| self.timestamp_of(name).is_some())
            .collect();

        names.sort_unstable_by(|a, b| b.cmp(a));
        names.truncate(count);

        Ok(names.iter().map(|name| self.load(name)).collect())
    }

    /// `<prefix>-<timestamp>.log` -> `<timestamp>`
    fn timestamp_of<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.prefix.as_str())?
            .strip_prefix('-')?
            .strip_suffix(".log")
    }

    fn load(&self, name: &str) -> LogArtifact {
        let file = self.dir.join(name);
        let timestamp = self.timestamp_of(name).unwrap_or_default().to_string();

        let body = match std::fs::read(&file) {
            Ok(bytes) => LogBody::Loaded {
                timestamp,
                size_bytes: bytes.len() as u64,
                content: String::from_utf8_lossy(&bytes).into_owned(),
            },
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "Failed to read sync log");
                LogBody::Failed {
                    error: e.to_string(),
                    kind: FailureKind::LogReadFailure,
                }
            }
        };

        LogArtifact { file, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use replica_test_utils::write_log;
    use tempfile::TempDir;

    fn timestamps(artifacts: &[LogArtifact]) -> Vec<String> {
        artifacts
            .iter()
            .map(|a| match &a.body {
                LogBody::Loaded { timestamp, .. } => timestamp.clone(),
                LogBody::Failed { error, .. } => format!("failed: {}", error),
            })
            .collect()
    }

    #[test]
    fn test_recent_returns_newest_first() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "replica-sync", "2025-11-20", "first");
        write_log(dir.path(), "replica-sync", "2025-11-22", "second");
        write_log(dir.path(), "replica-sync", "2025-11-23", "third");

        let reader = LogReader::new(dir.path(), "replica-sync");
        let logs = reader.recent(2).unwrap();

        assert_eq!(timestamps(&logs), vec!["2025-11-23", "2025-11-22"]);
        assert_eq!(
            logs[0].body,
            LogBody::Loaded {
                timestamp: "2025-11-23".to_string(),
                size_bytes: 5,
                content: "third".to_string(),
            }
        );
        assert_eq!(logs[0].file, dir.path().join("replica-sync-2025-11-23.log"));
    }

    #[test]
    fn test_recent_more_than_available() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "replica-sync", "2025-11-20_0900", "a");

        let logs = LogReader::new(dir.path(), "replica-sync").recent(10).unwrap();
        assert_eq!(timestamps(&logs), vec!["2025-11-20_0900"]);
    }

    #[test]
    fn test_recent_ignores_unrelated_entries() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "replica-sync", "2025-11-20", "a");
        write_log(dir.path(), "other", "2025-11-24", "b");
        std::fs::write(dir.path().join("replica-sync-2025-11-25.txt"), "c").unwrap();
        std::fs::write(dir.path().join("replica-sync.log"), "d").unwrap();
        std::fs::create_dir(dir.path().join("replica-sync-2025-11-26.log")).unwrap();

        let logs = LogReader::new(dir.path(), "replica-sync").recent(10).unwrap();
        assert_eq!(timestamps(&logs), vec!["2025-11-20"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let reader = LogReader::new(dir.path().join("nope"), "replica-sync");
        assert!(reader.recent(3).unwrap().is_empty());
    }

    #[test]
    fn test_content_is_read_lossily() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("replica-sync-2025-11-20.log"),
            b"ok \xff done",
        )
        .unwrap();

        let logs = LogReader::new(dir.path(), "replica-sync").recent(1).unwrap();
        match &logs[0].body {
            LogBody::Loaded {
                content,
                size_bytes,
                ..
            } => {
                assert_eq!(*size_bytes, 9);
                assert!(content.starts_with("ok "));
                assert!(content.ends_with(" done"));
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_log_does_not_block_others() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "replica-sync", "2025-11-20", "older");
        write_log(dir.path(), "replica-sync", "2025-11-22", "newer");
        std::os::unix::fs::symlink(
            dir.path().join("gone"),
            dir.path().join("replica-sync-2025-11-21.log"),
        )
        .unwrap();

        let logs = LogReader::new(dir.path(), "replica-sync").recent(3).unwrap();

        assert_eq!(logs.len(), 3);
        assert!(matches!(logs[0].body, LogBody::Loaded { .. }));
        assert!(matches!(
            logs[1].body,
            LogBody::Failed {
                kind: FailureKind::LogReadFailure,
                ..
            }
        ));
        assert!(matches!(logs[2].body, LogBody::Loaded { .. }));

        let value = serde_json::to_value(&logs[1]).unwrap();
        assert_eq!(value["kind"], "log_read_failure");
        assert!(value["error"].is_string());
        assert!(value.get("content").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_to_directory_is_skipped() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "replica-sync", "2025-11-20", "real");
        std::fs::create_dir(dir.path().join("archive")).unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("archive"),
            dir.path().join("replica-sync-2025-11-23.log"),
        )
        .unwrap();

        let logs = LogReader::new(dir.path(), "replica-sync").recent(5).unwrap();
        assert_eq!(timestamps(&logs), vec!["2025-11-20"]);
    }

    #[test]
    fn test_loaded_artifact_wire_shape() {
        let artifact = LogArtifact {
            file: PathBuf::from("/logs/replica-sync-2025-11-23.log"),
            body: LogBody::Loaded {
                timestamp: "2025-11-23".to_string(),
                size_bytes: 4,
                content: "done".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&artifact).unwrap(),
            serde_json::json!({
                "file": "/logs/replica-sync-2025-11-23.log",
                "timestamp": "2025-11-23",
                "size_bytes": 4,
                "content": "done",
            })
        );
    }
}
