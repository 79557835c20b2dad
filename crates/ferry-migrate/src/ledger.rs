//! Append-only success ledger used to resume interrupted runs.
//!
//! Each line is `YYYY-MM-DD HH:MM:SS <repo path>`. A repository counts as
//! migrated when its path appears as a whole whitespace-delimited token, so
//! `team/proj/repo` never matches `team/proj/repo2`. Deleting the file forces
//! a full re-migration.

use crate::error::Result;
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Persistent record of successfully migrated repositories.
#[derive(Debug)]
pub struct SuccessLedger {
    path: PathBuf,
    contents: RwLock<String>,
    writer: Mutex<File>,
}

impl SuccessLedger {
    /// Open (or create) the ledger and load existing entries.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let writer = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), bytes = contents.len(), "Loaded success ledger");

        Ok(Self {
            path,
            contents: RwLock::new(contents),
            writer: Mutex::new(writer),
        })
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `repo_path` was recorded by this or an earlier run.
    pub fn is_migrated(&self, repo_path: &str) -> bool {
        contains_entry(&self.contents.read(), repo_path)
    }

    /// Append a timestamped entry and flush it to disk.
    ///
    /// The writer lock keeps concurrent appends from interleaving.
    pub fn record_success(&self, repo_path: &str) -> Result<()> {
        let line = format!("{} {repo_path}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
        {
            let mut writer = self.writer.lock();
            writer.write_all(line.as_bytes())?;
            writer.sync_data()?;
        }
        self.contents.write().push_str(&line);
        Ok(())
    }

    /// [`record_success`](Self::record_success) on the blocking pool, so the
    /// sync to disk never stalls a runtime worker.
    pub async fn record_success_blocking(self: &Arc<Self>, repo_path: &str) -> Result<()> {
        let ledger = Arc::clone(self);
        let repo_path = repo_path.to_string();
        tokio::task::spawn_blocking(move || ledger.record_success(&repo_path))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?
    }
}

/// Whole-token membership test against ledger text.
pub fn contains_entry(contents: &str, repo_path: &str) -> bool {
    let repo_path = repo_path.trim();
    if repo_path.is_empty() {
        return false;
    }
    let pattern = format!(r"(?:^|\s){}(?:$|\s)", regex::escape(repo_path));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(contents),
        Err(_) => contents
            .split_whitespace()
            .any(|token| token == repo_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boundary_safe_matching() {
        let contents = "2024-01-01 10:00:00 a/b/c\n";
        assert!(contains_entry(contents, "a/b/c"));
        assert!(!contains_entry(contents, "a/b/c2"));
        assert!(!contains_entry(contents, "x/a/b/c"));
        assert!(!contains_entry(contents, "a/b"));
        assert!(!contains_entry(contents, ""));
    }

    #[test]
    fn test_matching_ignores_surrounding_whitespace() {
        assert!(contains_entry("a/b/c", "a/b/c"));
        assert!(contains_entry("\n\n  a/b/c  \n", "a/b/c"));
        assert!(contains_entry("x/y\r\na/b/c\r\n", "a/b/c"));
        assert!(contains_entry("2024-01-01 10:00:00 x/y\n2024-01-01 10:00:01 a/b/c", "a/b/c"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let contents = "group/repo.name\n";
        assert!(contains_entry(contents, "group/repo.name"));
        assert!(!contains_entry(contents, "group/repo_name"));
        assert!(contains_entry("g/c++\n", "g/c++"));
        assert!(!contains_entry("g/cxx\n", "g/c++"));
    }

    #[test]
    fn test_record_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("successful.log");

        let ledger = SuccessLedger::open(&path).unwrap();
        assert!(!ledger.is_migrated("team/proj/repo"));
        ledger.record_success("team/proj/repo").unwrap();
        assert!(ledger.is_migrated("team/proj/repo"));
        assert!(!ledger.is_migrated("team/proj/repo2"));
        drop(ledger);

        let reopened = SuccessLedger::open(&path).unwrap();
        assert!(reopened.is_migrated("team/proj/repo"));

        let text = std::fs::read_to_string(&path).unwrap();
        let line = text.lines().next().unwrap();
        assert_eq!(line.len(), "2024-01-01 10:00:00 team/proj/repo".len());
        assert!(line.ends_with(" team/proj/repo"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_records_from_many_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("successful.log");
        let ledger = Arc::new(SuccessLedger::open(&path).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            tasks.spawn(async move { ledger.record_success_blocking(&format!("g/p/repo{i}")).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        assert!(ledger.is_migrated("g/p/repo15"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 16);
    }

    #[test]
    fn test_preseeded_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("successful.log");
        std::fs::write(&path, "a/b/c\n").unwrap();

        let ledger = SuccessLedger::open(&path).unwrap();
        assert!(ledger.is_migrated("a/b/c"));
        assert!(!ledger.is_migrated("a/b/c2"));
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("successful.log");
        let ledger = Arc::new(SuccessLedger::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        ledger.record_success(&format!("group/t{t}/repo{i}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 200);
        for line in lines {
            assert_eq!(line.split(' ').count(), 3, "malformed line {line:?}");
        }
        assert!(ledger.is_migrated("group/t7/repo24"));
    }

    proptest! {
        #[test]
        fn prop_suffix_never_matches(
            base in "[a-z]{1,6}(/[a-z0-9_.-]{1,6}){0,3}",
            suffix in "[a-z0-9]{1,4}",
        ) {
            let contents = format!("2024-01-01 10:00:00 {base}\n");
            prop_assert!(contains_entry(&contents, &base));
            let longer = format!("{base}{suffix}");
            prop_assert!(!contains_entry(&contents, &longer));
            let prefixed = format!("x/{base}");
            prop_assert!(!contains_entry(&contents, &prefixed));
        }
    }
}
