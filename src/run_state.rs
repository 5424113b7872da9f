//! Per-run, per-file progress tracking with crash-safe persistence.
//!
//! A run state is created when a sync run starts, persisted after every
//! status transition, and archived once the run completes and the checkpoint
//! advances. A process restart re-reads the last persisted state and
//! re-attempts exactly the files that never reached a terminal status.

use std::{
   collections::BTreeMap,
   fs,
   io::Write,
   path::{Path, PathBuf},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
   config,
   error::{Error, Result},
   registry::store_id,
   types::ProgressSnapshot,
};

/// Status of a single file within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
   /// Not yet attempted.
   Pending,
   /// Currently being fetched/parsed/embedded.
   InProgress,
   /// Successfully upserted.
   Completed,
   /// Attempted and errored; eligible for retry up to the limit.
   Failed,
   /// Content hash matched the registry; no work needed.
   Skipped,
}

impl FileStatus {
   /// Terminal statuses for run-completion purposes. `Failed` is not
   /// terminal: it blocks checkpoint advancement until resolved.
   pub const fn is_terminal(self) -> bool {
      matches!(self, Self::Completed | Self::Skipped)
   }

   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Pending => "pending",
         Self::InProgress => "in_progress",
         Self::Completed => "completed",
         Self::Failed => "failed",
         Self::Skipped => "skipped",
      }
   }

   /// Legal transitions. `Pending -> Skipped` is the classifier's fast
   /// path; everything else funnels through `InProgress`.
   const fn allows(self, next: Self) -> bool {
      matches!(
         (self, next),
         (Self::Pending, Self::InProgress)
            | (Self::Pending, Self::Skipped)
            | (Self::InProgress, Self::Completed)
            | (Self::InProgress, Self::Failed)
            | (Self::InProgress, Self::Skipped)
            | (Self::Failed, Self::Pending)
      )
   }
}

/// Tracked state for one file in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
   pub status:      FileStatus,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub error:       Option<String>,
   #[serde(default)]
   pub retry_count: u32,
}

impl Default for FileState {
   fn default() -> Self {
      Self { status: FileStatus::Pending, error: None, retry_count: 0 }
   }
}

/// Persistent state of one sync run for `(repo, revision)`
#[derive(Serialize, Deserialize)]
pub struct RunState {
   repo:       String,
   revision:   String,
   files:      BTreeMap<String, FileState>,
   started_at: String,
   updated_at: String,
   #[serde(skip)]
   path:       PathBuf,
}

fn run_file_name(repo: &str, revision: &str) -> String {
   let digest: [u8; 32] = Sha256::digest(revision.as_bytes()).into();
   format!("{}-{}.json", store_id(repo), &hex::encode(digest)[..12])
}

impl RunState {
   /// Loads the persisted run for `(repo, revision)` if one exists,
   /// otherwise creates a fresh one with every file `pending`.
   ///
   /// Resuming reuses the persisted per-file statuses; files that appear in
   /// `paths` but not in the stored run (the file list should be identical
   /// for the same revision, but be defensive) start `pending`.
   pub fn load_or_create(repo: &str, revision: &str, paths: &[String]) -> Result<(Self, bool)> {
      Self::load_or_create_in(config::run_state_dir(), repo, revision, paths)
   }

   /// Same as [`Self::load_or_create`] but rooted at an explicit directory.
   pub fn load_or_create_in(
      dir: &Path,
      repo: &str,
      revision: &str,
      paths: &[String],
   ) -> Result<(Self, bool)> {
      let path = dir.join(run_file_name(repo, revision));

      if path.exists() {
         let content = fs::read_to_string(&path)?;
         let mut state: Self = serde_json::from_str(&content)?;
         state.path = path;

         let mut added = false;
         for p in paths {
            added |= !state.files.contains_key(p);
            state.files.entry(p.clone()).or_default();
         }
         if added {
            state.persist()?;
         }
         return Ok((state, true));
      }

      let now = now_rfc3339();
      let mut state = Self {
         repo: repo.to_string(),
         revision: revision.to_string(),
         files: paths
            .iter()
            .map(|p| (p.clone(), FileState::default()))
            .collect(),
         started_at: now.clone(),
         updated_at: now,
         path,
      };
      state.persist()?;
      Ok((state, false))
   }

   pub fn repo(&self) -> &str {
      &self.repo
   }

   pub fn revision(&self) -> &str {
      &self.revision
   }

   pub fn status_of(&self, path: &str) -> Option<FileStatus> {
      self.files.get(path).map(|f| f.status)
   }

   pub fn error_of(&self, path: &str) -> Option<&str> {
      self.files.get(path).and_then(|f| f.error.as_deref())
   }

   /// Files still needing an attempt in this pass: `pending`, plus
   /// `in_progress` leftovers from a crashed process (their pipelines never
   /// finished, so they are safe to re-attempt thanks to idempotent upsert
   /// keys).
   pub fn runnable_paths(&self) -> Vec<String> {
      self
         .files
         .iter()
         .filter(|(_, f)| matches!(f.status, FileStatus::Pending | FileStatus::InProgress))
         .map(|(p, _)| p.clone())
         .collect()
   }

   /// Moves `failed` files with remaining retry budget back to `pending`.
   /// Returns the paths that became runnable again.
   pub fn reset_failed_for_retry(&mut self, max_retries: u32) -> Result<Vec<String>> {
      let mut reset = Vec::new();
      for (path, file) in &mut self.files {
         if file.status == FileStatus::Failed && file.retry_count < max_retries {
            file.status = FileStatus::Pending;
            file.retry_count += 1;
            reset.push(path.clone());
         }
      }
      if !reset.is_empty() {
         self.persist()?;
      }
      Ok(reset)
   }

   /// Moves every `failed` file back to `pending` with a fresh retry
   /// budget. Called when an operator starts a new run over an interrupted
   /// one; the per-pass budget of [`Self::reset_failed_for_retry`] only
   /// bounds retries within a single invocation.
   pub fn reset_failed_for_resume(&mut self) -> Result<Vec<String>> {
      let mut reset = Vec::new();
      for (path, file) in &mut self.files {
         if file.status == FileStatus::Failed {
            file.status = FileStatus::Pending;
            file.retry_count = 0;
            reset.push(path.clone());
         }
      }
      if !reset.is_empty() {
         self.persist()?;
      }
      Ok(reset)
   }

   /// Applies a status transition and persists it durably.
   ///
   /// Invalid transitions are rejected rather than recorded; a bug that
   /// tried to resurrect a `completed` file must not be able to corrupt the
   /// checkpoint-gating invariant on disk.
   pub fn transition(
      &mut self,
      path: &str,
      next: FileStatus,
      error: Option<String>,
   ) -> Result<()> {
      let file = self
         .files
         .get_mut(path)
         .ok_or_else(|| Error::InvalidTransition {
            path: path.to_string(),
            from: "untracked",
            to:   next.as_str(),
         })?;

      if !file.status.allows(next) {
         return Err(Error::InvalidTransition {
            path: path.to_string(),
            from: file.status.as_str(),
            to:   next.as_str(),
         });
      }

      file.status = next;
      file.error = error;
      self.persist()
   }

   /// Computes the aggregate progress snapshot.
   pub fn snapshot(&self) -> ProgressSnapshot {
      let mut snap = ProgressSnapshot { total: self.files.len(), ..Default::default() };

      for file in self.files.values() {
         match file.status {
            FileStatus::Pending => snap.pending += 1,
            FileStatus::InProgress => snap.in_progress += 1,
            FileStatus::Completed => snap.completed += 1,
            FileStatus::Failed => snap.failed += 1,
            FileStatus::Skipped => snap.skipped += 1,
         }
      }

      let done = snap.completed + snap.skipped;
      snap.percent_complete = if snap.total == 0 {
         100.0
      } else {
         (done as f64 / snap.total as f64) * 100.0
      };
      snap.is_complete = done == snap.total;
      snap
   }

   /// Paths currently `failed`, with their recorded errors.
   pub fn failures(&self) -> Vec<(String, String)> {
      self
         .files
         .iter()
         .filter(|(_, f)| f.status == FileStatus::Failed)
         .map(|(p, f)| {
            (
               p.clone(),
               f.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            )
         })
         .collect()
   }

   /// Archives the run record after a fully complete run. The active state
   /// file is renamed aside so a later run at the same revision starts
   /// clean, while the record remains on disk for diagnosis.
   pub fn archive(mut self) -> Result<()> {
      self.persist()?;
      let archived = self.path.with_extension("done.json");
      fs::rename(&self.path, archived)?;
      Ok(())
   }

   /// Deletes the persisted run record entirely (force resync).
   pub fn discard(self) -> Result<()> {
      if self.path.exists() {
         fs::remove_file(&self.path)?;
      }
      Ok(())
   }

   fn persist(&mut self) -> Result<()> {
      self.updated_at = now_rfc3339();

      if let Some(parent) = self.path.parent() {
         fs::create_dir_all(parent)?;
      }

      let content = serde_json::to_string(&self)?;
      let tmp = self.path.with_extension("json.tmp");
      {
         let mut file = fs::File::create(&tmp)?;
         file.write_all(content.as_bytes())?;
         file.sync_all()?;
      }
      fs::rename(&tmp, &self.path)?;
      Ok(())
   }
}

/// Finds the active (non-archived) run for a repository, if any.
///
/// Used by the status command; at most one run per repository is active at
/// a time in practice, so the first match wins.
pub fn find_active_in(dir: &Path, repo: &str) -> Result<Option<RunState>> {
   let prefix = store_id(repo);
   if !dir.exists() {
      return Ok(None);
   }
   for entry in fs::read_dir(dir)? {
      let entry = entry?;
      let name = entry.file_name();
      let Some(name) = name.to_str() else { continue };
      if !name.starts_with(&prefix)
         || !name.ends_with(".json")
         || name.ends_with(".done.json")
         || name.ends_with(".json.tmp")
      {
         continue;
      }
      let content = fs::read_to_string(entry.path())?;
      let mut state: RunState = serde_json::from_str(&content)?;
      state.path = entry.path();
      return Ok(Some(state));
   }
   Ok(None)
}

/// Removes any persisted run state for a repository, regardless of revision.
pub fn discard_all_for_repo(dir: &Path, repo: &str) -> Result<()> {
   let prefix = store_id(repo);
   if !dir.exists() {
      return Ok(());
   }
   for entry in fs::read_dir(dir)? {
      let entry = entry?;
      let name = entry.file_name();
      let Some(name) = name.to_str() else { continue };
      if name.starts_with(&prefix) && name.ends_with(".json") {
         fs::remove_file(entry.path())?;
      }
   }
   Ok(())
}

fn now_rfc3339() -> String {
   Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
