//! The version-controlled repository contract (`spec.md` §6).
//!
//! The spec treats this as an opaque external collaborator; the compiler
//! and deployer only ever see it through the [`Repository`] trait. Two
//! implementations ship here: [`GitRepository`], a concrete backend that
//! shells out to `git` (grounded on the original's `_git()` subprocess
//! helper), and [`InMemoryRepository`], a test double grounded on the
//! original's `DemoGitFireSet`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;

use crate::error::FwError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Clean,
    Dirty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub author: String,
    pub date: String,
    pub message: String,
    pub commit_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineKind {
    Title,
    Add,
    Del,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub line: String,
    pub kind: DiffLineKind,
}

pub trait Repository: Send + Sync {
    fn read_file(&self, table: &str) -> Result<String, FwError>;
    fn write_file(&self, table: &str, content: &str) -> Result<(), FwError>;

    fn status(&self) -> Result<Status, FwError>;
    fn save(&self, message: &str) -> Result<(), FwError>;
    fn reset_to_head(&self) -> Result<(), FwError>;
    fn rollback(&self, n: u32) -> Result<(), FwError>;
    fn history(&self) -> Result<Vec<HistoryEntry>, FwError>;
    fn diff(&self, commit_id: &str) -> Result<Vec<DiffLine>, FwError>;

    /// Convenience built on top of [`Repository::status`], used by the
    /// deployer's save-gate (`spec.md` §4.6 step 1).
    fn save_needed(&self) -> Result<bool, FwError> {
        Ok(self.status()? == Status::Dirty)
    }
}

pub struct GitRepository {
    root: PathBuf,
}

impl GitRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        GitRepository { root: root.into() }
    }

    fn git(&self, args: &[&str]) -> Result<String, FwError> {
        tracing::debug!(args = args.join(" "), "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| FwError::bad_data("repository", format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            tracing::warn!(args = args.join(" "), status = %output.status, %stderr, "git exited non-zero");
            return Err(FwError::bad_data(
                "repository",
                format!("git {} exited with {}: {stderr}", args.join(" "), output.status),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Every model table is a `.csv` file except the user store, which is
    /// JSON (`spec.md` §6).
    fn path_for(&self, table: &str) -> PathBuf {
        let ext = if table == "users" { "json" } else { "csv" };
        self.root.join(format!("{table}.{ext}"))
    }
}

impl Repository for GitRepository {
    fn read_file(&self, table: &str) -> Result<String, FwError> {
        let path = self.path_for(table);
        std::fs::read_to_string(&path).map_err(|e| FwError::bad_data(table, format!("failed to read {}: {e}", path.display())))
    }

    fn write_file(&self, table: &str, content: &str) -> Result<(), FwError> {
        let path = self.path_for(table);
        std::fs::write(&path, content).map_err(|e| FwError::bad_data(table, format!("failed to write {}: {e}", path.display())))
    }

    fn status(&self) -> Result<Status, FwError> {
        let out = self.git(&["status", "--porcelain"])?;
        Ok(if out.trim().is_empty() { Status::Clean } else { Status::Dirty })
    }

    fn save(&self, message: &str) -> Result<(), FwError> {
        self.git(&["add", "-A"])?;
        let message = if message.is_empty() { "(no message)" } else { message };
        // Nothing to commit is not an error: the caller may call `save`
        // defensively after an edit that turned out to be a no-op.
        match self.git(&["commit", "-m", message]) {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("nothing to commit") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn reset_to_head(&self) -> Result<(), FwError> {
        self.git(&["reset", "--hard"])?;
        Ok(())
    }

    fn rollback(&self, n: u32) -> Result<(), FwError> {
        self.reset_to_head()?;
        self.git(&["reset", "--hard", &format!("HEAD~{n}")])?;
        Ok(())
    }

    fn history(&self) -> Result<Vec<HistoryEntry>, FwError> {
        const SEP: &str = "\x1f";
        let format = format!("%H{SEP}%an{SEP}%ad{SEP}%s");
        let out = self.git(&["log", "--date=iso", &format!("--pretty=format:{format}")])?;
        out.lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                let mut parts = line.splitn(4, SEP);
                let commit_id = parts.next().unwrap_or_default().to_string();
                let author = parts.next().unwrap_or_default().to_string();
                let date = parts.next().unwrap_or_default().to_string();
                let message = parts.next().unwrap_or_default().to_string();
                Ok(HistoryEntry { author, date, message, commit_id })
            })
            .collect()
    }

    fn diff(&self, commit_id: &str) -> Result<Vec<DiffLine>, FwError> {
        let out = self.git(&["diff", commit_id])?;
        Ok(parse_unified_diff(&out))
    }
}

/// Parses a unified diff into `(line, kind)` pairs, matching the original's
/// `version_diff`: file headers become `Title`, `+`/`-` lines become
/// `Add`/`Del`, everything else is `Context`.
fn parse_unified_diff(text: &str) -> Vec<DiffLine> {
    let mut lines = Vec::new();
    for raw in text.lines() {
        if raw.starts_with("+++") {
            lines.push(DiffLine {
                line: raw.trim_start_matches("+++ ").to_string(),
                kind: DiffLineKind::Title,
            });
        } else if raw.starts_with("---") || raw.starts_with("@@") || raw.starts_with("diff ") || raw.starts_with("index ") {
            // file/hunk headers other than the `+++` title are not surfaced
        } else if let Some(rest) = raw.strip_prefix('-') {
            lines.push(DiffLine { line: rest.to_string(), kind: DiffLineKind::Del });
        } else if let Some(rest) = raw.strip_prefix('+') {
            lines.push(DiffLine { line: rest.to_string(), kind: DiffLineKind::Add });
        } else {
            lines.push(DiffLine { line: raw.to_string(), kind: DiffLineKind::Context });
        }
    }
    lines
}

/// An in-memory repository for tests, grounded on the original's
/// `DemoGitFireSet`: no git process is spawned, `save_needed` tracks a
/// simple dirty flag that `save` clears.
pub struct InMemoryRepository {
    files: Mutex<HashMap<String, String>>,
    dirty: Mutex<bool>,
    history: Mutex<Vec<(HashMap<String, String>, String)>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        InMemoryRepository {
            files: Mutex::new(HashMap::new()),
            dirty: Mutex::new(false),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn seed(&self, table: &str, content: impl Into<String>) {
        self.files.lock().unwrap().insert(table.to_string(), content.into());
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository for InMemoryRepository {
    fn read_file(&self, table: &str) -> Result<String, FwError> {
        Ok(self.files.lock().unwrap().get(table).cloned().unwrap_or_default())
    }

    fn write_file(&self, table: &str, content: &str) -> Result<(), FwError> {
        self.files.lock().unwrap().insert(table.to_string(), content.to_string());
        *self.dirty.lock().unwrap() = true;
        Ok(())
    }

    fn status(&self) -> Result<Status, FwError> {
        Ok(if *self.dirty.lock().unwrap() { Status::Dirty } else { Status::Clean })
    }

    fn save(&self, message: &str) -> Result<(), FwError> {
        let snapshot = self.files.lock().unwrap().clone();
        self.history.lock().unwrap().push((snapshot, message.to_string()));
        *self.dirty.lock().unwrap() = false;
        Ok(())
    }

    fn reset_to_head(&self) -> Result<(), FwError> {
        if let Some((snapshot, _)) = self.history.lock().unwrap().last() {
            *self.files.lock().unwrap() = snapshot.clone();
        }
        *self.dirty.lock().unwrap() = false;
        Ok(())
    }

    fn rollback(&self, n: u32) -> Result<(), FwError> {
        let mut history = self.history.lock().unwrap();
        let target = history.len().checked_sub(1 + n as usize).ok_or_else(|| {
            FwError::bad_data("repository", format!("cannot rollback {n} commits: only {} saved", history.len()))
        })?;
        let snapshot = history[target].0.clone();
        history.truncate(target + 1);
        drop(history);
        *self.files.lock().unwrap() = snapshot;
        *self.dirty.lock().unwrap() = false;
        Ok(())
    }

    fn history(&self) -> Result<Vec<HistoryEntry>, FwError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, (_, message))| HistoryEntry {
                author: "demo".to_string(),
                date: String::new(),
                message: message.clone(),
                commit_id: i.to_string(),
            })
            .collect())
    }

    fn diff(&self, _commit_id: &str) -> Result<Vec<DiffLine>, FwError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_repository_tracks_dirty_state() {
        let repo = InMemoryRepository::new();
        assert_eq!(repo.status().unwrap(), Status::Clean);
        repo.write_file("rules", "1 r * * * * ACCEPT 0 x\n").unwrap();
        assert_eq!(repo.status().unwrap(), Status::Dirty);
        repo.save("m1").unwrap();
        assert_eq!(repo.status().unwrap(), Status::Clean);
    }

    #[test]
    fn in_memory_repository_rollback_restores_snapshot() {
        let repo = InMemoryRepository::new();
        repo.write_file("rules", "v1").unwrap();
        repo.save("m1").unwrap();
        repo.write_file("rules", "v2").unwrap();
        repo.save("m2").unwrap();

        repo.rollback(1).unwrap();
        assert_eq!(repo.read_file("rules").unwrap(), "v1");
        assert!(!repo.save_needed().unwrap());
    }

    #[test]
    fn parses_unified_diff_kinds() {
        let diff = "diff --git a/rules.csv b/rules.csv\n--- a/rules.csv\n+++ b/rules.csv\n@@ -1 +1 @@\n-old\n+new\n context\n";
        let lines = parse_unified_diff(diff);
        assert!(lines.iter().any(|l| l.kind == DiffLineKind::Title && l.line == "b/rules.csv"));
        assert!(lines.iter().any(|l| l.kind == DiffLineKind::Del && l.line == "old"));
        assert!(lines.iter().any(|l| l.kind == DiffLineKind::Add && l.line == "new"));
    }

    /// Exercises `GitRepository` against a real `git` working tree, not just
    /// the `InMemoryRepository` double.
    #[test]
    fn git_repository_round_trips_through_save_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            let status = Command::new("git").args(args).current_dir(dir.path()).status().unwrap();
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);

        let repo = GitRepository::new(dir.path());
        assert_eq!(repo.status().unwrap(), Status::Clean);

        repo.write_file("rules", "1 r * * * * ACCEPT 0 x\n").unwrap();
        assert_eq!(repo.status().unwrap(), Status::Dirty);
        repo.save("initial rules").unwrap();
        assert_eq!(repo.status().unwrap(), Status::Clean);

        let history = repo.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "initial rules");

        repo.write_file("rules", "1 r * * * * DROP 0 x\n").unwrap();
        repo.save("flip to drop").unwrap();
        assert_eq!(repo.history().unwrap().len(), 2);

        repo.rollback(1).unwrap();
        assert_eq!(repo.read_file("rules").unwrap(), "1 r * * * * ACCEPT 0 x\n");
    }
}
