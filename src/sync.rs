//! Sync orchestration: discovery, worker pool, aggregation, checkpointing.
//!
//! [`SyncEngine`] drives one repository through a run: it resolves the
//! target revision, diffs the tree against the registry, fans file work out
//! to a bounded worker pool, and funnels every result through a single
//! aggregator loop that owns all run-state and registry writes. The
//! checkpoint advances in exactly one place, after the aggregator has seen
//! every file reach `completed` or `skipped`.

use std::{
   collections::HashSet,
   path::{Path, PathBuf},
   sync::Arc,
};

use indicatif::ProgressBar;
use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::{
   Result, classify,
   config::{self, Config},
   embed::Embedder,
   error::Error,
   governor::{Governor, RetryPolicy},
   hash::content_hash,
   host::RepoHost,
   index::{VectorIndex, VectorRecord},
   parse::Parser,
   registry::{Registry, SymbolEntry},
   run_state::{self, FileStatus, RunState},
   types::{FilePlan, ProgressSnapshot, SymbolChange, SyncOutcome, SyncStats, TreeEntry},
};

/// Progress update delivered to a [`SyncProgressCallback`]
#[derive(Debug, Clone)]
pub struct SyncProgress {
   pub snapshot:     ProgressSnapshot,
   pub current_file: Option<String>,
}

/// Trait for receiving sync progress updates
pub trait SyncProgressCallback: Send {
   fn progress(&mut self, progress: SyncProgress);
}

impl<F: FnMut(SyncProgress) + Send> SyncProgressCallback for F {
   fn progress(&mut self, progress: SyncProgress) {
      self(progress);
   }
}

impl SyncProgressCallback for () {
   fn progress(&mut self, _progress: SyncProgress) {}
}

impl SyncProgressCallback for ProgressBar {
   fn progress(&mut self, progress: SyncProgress) {
      let snap = progress.snapshot;
      self.update(|state| {
         state.set_len(snap.total as u64);
         state.set_pos((snap.completed + snap.skipped + snap.failed) as u64);
      });
      if let Some(file) = &progress.current_file {
         let short = file.rsplit('/').next().unwrap_or(file);
         self.set_message(short.to_string());
      }
   }
}

/// Discovery result: the revision to sync and the candidate files
#[derive(Debug, Clone)]
pub struct SyncPlan {
   pub revision: String,
   pub files:    Vec<TreeEntry>,
}

/// Point-in-time status of a repository's registry and any active run
#[derive(Debug, Clone)]
pub struct RepoStatus {
   pub repo:            String,
   pub checkpoint:      Option<String>,
   pub tracked_files:   usize,
   pub tracked_symbols: usize,
   /// `(revision, progress)` of an interrupted run that would be resumed.
   pub active_run:      Option<(String, ProgressSnapshot)>,
}

/// One unit of work for the pool
enum WorkItem {
   /// A file present in the tree at the target revision.
   File(TreeEntry),
   /// A file the registry tracks that disappeared from the tree.
   Removal(String),
}

impl WorkItem {
   fn path(&self) -> &str {
      match self {
         Self::File(entry) => &entry.path,
         Self::Removal(path) => path,
      }
   }
}

enum WorkerEvent {
   Started {
      path: String,
   },
   Finished {
      path:    String,
      outcome: FileOutcome,
   },
}

enum FileOutcome {
   Skipped,
   Completed {
      plan:          FilePlan,
      removal:       bool,
      embed_batches: usize,
   },
   Failed {
      error: String,
   },
   /// Error that invalidates the whole run, not just this file.
   Fatal {
      error: Error,
   },
}

/// Shared, immutable context handed to every worker task
struct WorkerCtx<H, P, E, V> {
   host:          Arc<H>,
   parser:        Arc<P>,
   embedder:      Arc<E>,
   index:         Arc<V>,
   governor:      Arc<Governor>,
   registry:      Arc<Mutex<Registry>>,
   repo:          String,
   revision:      String,
   max_file_size: u64,
   embed_batch:   usize,
}

/// Engine for synchronizing a repository into the vector index
pub struct SyncEngine<H, P, E, V> {
   host:         Arc<H>,
   parser:       Arc<P>,
   embedder:     Arc<E>,
   index:        Arc<V>,
   config:       Config,
   governor:     Arc<Governor>,
   registry_dir: PathBuf,
   run_dir:      PathBuf,
}

impl<H, P, E, V> SyncEngine<H, P, E, V>
where
   H: RepoHost + 'static,
   P: Parser + 'static,
   E: Embedder + 'static,
   V: VectorIndex + 'static,
{
   pub fn new(host: H, parser: P, embedder: E, index: V, config: Config) -> Self {
      let governor = Arc::new(Governor::new(RetryPolicy::from_config(&config)));
      Self {
         host: Arc::new(host),
         parser: Arc::new(parser),
         embedder: Arc::new(embedder),
         index: Arc::new(index),
         config,
         governor,
         registry_dir: config::registry_dir().clone(),
         run_dir: config::run_state_dir().clone(),
      }
   }

   /// Roots registry and run-state storage at explicit directories instead
   /// of the global data dir.
   pub fn with_state_dirs(mut self, registry_dir: &Path, run_dir: &Path) -> Self {
      self.registry_dir = registry_dir.to_path_buf();
      self.run_dir = run_dir.to_path_buf();
      self
   }

   pub fn repo(&self) -> &str {
      self.host.repo()
   }

   pub fn host(&self) -> &H {
      &self.host
   }

   pub fn embedder(&self) -> &E {
      &self.embedder
   }

   pub fn index(&self) -> &V {
      &self.index
   }

   /// Resolves the branch head and lists the candidate files for a run.
   ///
   /// Returns `None` when the head already equals the committed checkpoint:
   /// nothing to do, and in particular no tree listing or fetches.
   pub async fn plan_sync(&self, branch: &str) -> Result<Option<SyncPlan>> {
      let host = Arc::clone(&self.host);
      let branch_owned = branch.to_string();
      let revision = self
         .governor
         .execute("latest_revision", move || {
            let host = Arc::clone(&host);
            let branch = branch_owned.clone();
            async move { host.latest_revision(&branch).await }
         })
         .await
         .map_err(Error::Host)?;

      let registry = Registry::open_in(&self.registry_dir, self.host.repo())?;
      if registry.checkpoint() == Some(revision.as_str()) {
         tracing::info!(repo = self.host.repo(), revision, "already at checkpoint");
         return Ok(None);
      }

      let host = Arc::clone(&self.host);
      let rev_owned = revision.clone();
      let tree = self
         .governor
         .execute("list_files", move || {
            let host = Arc::clone(&host);
            let revision = rev_owned.clone();
            async move { host.list_files(&revision).await }
         })
         .await
         .map_err(Error::Host)?;

      let excludes = compile_excludes(&self.config.exclude_patterns);
      let files: Vec<TreeEntry> = tree
         .into_iter()
         .filter(|entry| is_candidate(&self.config, &excludes, &entry.path))
         .collect();

      tracing::info!(
         repo = self.host.repo(),
         revision,
         candidates = files.len(),
         "planned sync"
      );
      Ok(Some(SyncPlan { revision, files }))
   }

   /// Runs (or resumes) a sync of the given files at `revision`.
   ///
   /// The checkpoint advances iff every file ends `completed` or `skipped`.
   /// Cancellation lets in-flight files finish to a terminal status, then
   /// returns with the run state persisted for a later resume.
   pub async fn run_sync(
      &self,
      revision: &str,
      tree: Vec<TreeEntry>,
      cancel: CancellationToken,
      callback: &mut dyn SyncProgressCallback,
   ) -> Result<SyncOutcome> {
      let repo = self.host.repo().to_string();
      let registry = Registry::open_in(&self.registry_dir, &repo)?;

      let tree_paths: HashSet<&str> = tree.iter().map(|e| e.path.as_str()).collect();
      let removed: Vec<String> = registry
         .all_file_paths()
         .filter(|p| !tree_paths.contains(p.as_str()))
         .cloned()
         .collect();

      let mut all_paths: Vec<String> = tree.iter().map(|e| e.path.clone()).collect();
      all_paths.extend(removed.iter().cloned());

      let (mut run_state, resumed) =
         RunState::load_or_create_in(&self.run_dir, &repo, revision, &all_paths)?;
      if resumed {
         let snap = run_state.snapshot();
         tracing::info!(
            repo,
            revision,
            completed = snap.completed,
            remaining = snap.total - snap.completed - snap.skipped,
            "resuming interrupted run"
         );
         run_state.reset_failed_for_resume()?;
      }

      let registry = Arc::new(Mutex::new(registry));
      let ctx = Arc::new(WorkerCtx {
         host:          Arc::clone(&self.host),
         parser:        Arc::clone(&self.parser),
         embedder:      Arc::clone(&self.embedder),
         index:         Arc::clone(&self.index),
         governor:      Arc::clone(&self.governor),
         registry:      Arc::clone(&registry),
         repo:          repo.clone(),
         revision:      revision.to_string(),
         max_file_size: self.config.effective_max_file_size_bytes(),
         embed_batch:   self.config.effective_embed_batch_size(),
      });

      let retries_base = self.governor.retries_observed();
      let waits_base = self.governor.rate_limit_waits();
      let mut stats = SyncStats::default();
      let mut fatal: Option<Error> = None;

      loop {
         let runnable: HashSet<String> = run_state.runnable_paths().into_iter().collect();
         if runnable.is_empty() {
            // Between passes, spend retry budget on failures.
            if cancel.is_cancelled()
               || run_state
                  .reset_failed_for_retry(self.config.effective_max_retries())?
                  .is_empty()
            {
               break;
            }
            continue;
         }

         let items: Vec<WorkItem> = tree
            .iter()
            .filter(|e| runnable.contains(&e.path))
            .map(|e| WorkItem::File(e.clone()))
            .chain(
               removed
                  .iter()
                  .filter(|p| runnable.contains(*p))
                  .map(|p| WorkItem::Removal(p.clone())),
            )
            .collect();

         // A resumed run can track paths that are in neither the current
         // tree nor the registry: the caller's file list changed, or a
         // removal's registry commit landed but the process died before the
         // status transition. No work references them any more; close them
         // out so the pass loop cannot spin on an empty item set.
         let covered: HashSet<&str> = items.iter().map(WorkItem::path).collect();
         for path in &runnable {
            if !covered.contains(path.as_str()) {
               tracing::warn!(path, "tracked path absent from tree and registry; skipping");
               run_state.transition(path, FileStatus::Skipped, None)?;
            }
         }

         self
            .run_pass(
               &ctx,
               &registry,
               &mut run_state,
               revision,
               items,
               &cancel,
               callback,
               &mut stats,
               &mut fatal,
            )
            .await?;

         if fatal.is_some() || cancel.is_cancelled() {
            break;
         }
      }

      if let Some(error) = fatal {
         return Err(error);
      }

      let snapshot = run_state.snapshot();
      stats.files_changed = snapshot.completed;
      stats.files_skipped = snapshot.skipped;
      stats.files_failed = snapshot.failed;
      stats.retries = self.governor.retries_observed() - retries_base;
      stats.rate_limit_waits = self.governor.rate_limit_waits() - waits_base;

      let success = snapshot.is_complete;
      if snapshot.is_complete {
         registry.lock().set_checkpoint(revision)?;
         run_state.archive()?;
         tracing::info!(repo, revision, "sync complete, checkpoint advanced");
      } else {
         for (path, error) in run_state.failures() {
            tracing::warn!(repo, path, error, "file failed; checkpoint held back");
         }
         registry.lock().save()?;
      }

      Ok(SyncOutcome {
         success,
         revision: revision.to_string(),
         progress: snapshot,
         stats,
      })
   }

   #[allow(clippy::too_many_arguments)]
   async fn run_pass(
      &self,
      ctx: &Arc<WorkerCtx<H, P, E, V>>,
      registry: &Arc<Mutex<Registry>>,
      run_state: &mut RunState,
      revision: &str,
      items: Vec<WorkItem>,
      cancel: &CancellationToken,
      callback: &mut dyn SyncProgressCallback,
      stats: &mut SyncStats,
      fatal: &mut Option<Error>,
   ) -> Result<()> {
      let (work_tx, work_rx) = flume::unbounded::<WorkItem>();
      for item in items {
         let _ = work_tx.send(item);
      }
      drop(work_tx);

      let (results_tx, results_rx) = flume::unbounded::<WorkerEvent>();

      let workers = self.config.effective_max_workers();
      let mut handles = Vec::with_capacity(workers);
      for _ in 0..workers {
         let ctx = Arc::clone(ctx);
         let work_rx = work_rx.clone();
         let results_tx = results_tx.clone();
         let cancel = cancel.clone();
         handles.push(tokio::spawn(async move {
            while let Ok(item) = work_rx.recv_async().await {
               if cancel.is_cancelled() {
                  break;
               }
               let path = item.path().to_string();
               if results_tx
                  .send_async(WorkerEvent::Started { path: path.clone() })
                  .await
                  .is_err()
               {
                  break;
               }
               let outcome = process_item(&ctx, &item).await;
               if results_tx
                  .send_async(WorkerEvent::Finished { path, outcome })
                  .await
                  .is_err()
               {
                  break;
               }
            }
         }));
      }
      drop(work_rx);
      drop(results_tx);

      // Single aggregator: the only place run-state and registry writes
      // happen during a pass.
      while let Ok(event) = results_rx.recv_async().await {
         match event {
            WorkerEvent::Started { path } => {
               // Crash-leftover `in_progress` files are already there.
               if run_state.status_of(&path) == Some(FileStatus::Pending) {
                  run_state.transition(&path, FileStatus::InProgress, None)?;
               }
            },
            WorkerEvent::Finished { path, outcome } => {
               match outcome {
                  FileOutcome::Skipped => {
                     run_state.transition(&path, FileStatus::Skipped, None)?;
                  },
                  FileOutcome::Failed { error } => {
                     tracing::warn!(path, error, "file failed");
                     run_state.transition(&path, FileStatus::Failed, Some(error))?;
                  },
                  FileOutcome::Fatal { error } => {
                     tracing::error!(path, %error, "run-fatal error, cancelling");
                     run_state.transition(&path, FileStatus::Failed, Some(error.to_string()))?;
                     if fatal.is_none() {
                        *fatal = Some(error);
                     }
                     cancel.cancel();
                  },
                  FileOutcome::Completed { plan, removal, embed_batches } => {
                     self.commit_plan(registry, revision, &plan, removal, stats)?;
                     stats.embed_calls += embed_batches;
                     run_state.transition(&path, FileStatus::Completed, None)?;
                  },
               }
               callback.progress(SyncProgress {
                  snapshot:     run_state.snapshot(),
                  current_file: Some(path),
               });
            },
         }
      }

      for handle in handles {
         let _ = handle.await;
      }
      Ok(())
   }

   /// Applies one file's plan to the registry and persists it.
   fn commit_plan(
      &self,
      registry: &Arc<Mutex<Registry>>,
      revision: &str,
      plan: &FilePlan,
      removal: bool,
      stats: &mut SyncStats,
   ) -> Result<()> {
      let mut registry = registry.lock();

      for upsert in &plan.upserts {
         registry.upsert_symbol(upsert.key, SymbolEntry {
            chunk_hash:     upsert.chunk_hash,
            vector_id:      upsert.key.to_hex(),
            file_path:      plan.path.clone(),
            qualified_name: upsert.qualified_name.clone(),
            kind:           upsert.kind,
            last_revision:  revision.to_string(),
         });
         match upsert.change {
            SymbolChange::New => stats.symbols_new += 1,
            SymbolChange::Modified => stats.symbols_modified += 1,
            SymbolChange::Reused => {},
         }
      }

      for key in &plan.reused {
         if let Some(mut entry) = registry.get_symbol(key).cloned() {
            entry.last_revision = revision.to_string();
            registry.upsert_symbol(*key, entry);
            stats.symbols_reused += 1;
         }
      }

      for key in &plan.deleted {
         if registry.delete_symbol(key) {
            stats.symbols_deleted += 1;
         }
      }

      if removal {
         registry.remove_file(&plan.path);
      } else {
         registry.set_file(&plan.path, plan.content_hash, revision);
      }

      registry.save()?;
      Ok(())
   }

   /// Wipes everything tracked for this repository so the next run
   /// re-embeds from scratch. Vectors for files deleted before the wipe may
   /// linger in the index until their symbols reappear under the same ids.
   pub fn force_full_resync(&self) -> Result<()> {
      let repo = self.host.repo();
      let mut registry = Registry::open_in(&self.registry_dir, repo)?;
      registry.clear_all();
      registry.save()?;
      run_state::discard_all_for_repo(&self.run_dir, repo)?;
      tracing::info!(repo, "registry cleared for full resync");
      Ok(())
   }

   /// Progress of the active run, if any.
   pub fn progress(&self) -> Result<Option<ProgressSnapshot>> {
      Ok(
         run_state::find_active_in(&self.run_dir, self.host.repo())?
            .map(|run| run.snapshot()),
      )
   }

   /// Reports the registry and any interrupted run for this repository.
   pub fn status(&self) -> Result<RepoStatus> {
      let repo = self.host.repo().to_string();
      let registry = Registry::open_in(&self.registry_dir, &repo)?;
      let active_run = run_state::find_active_in(&self.run_dir, &repo)?
         .map(|run| (run.revision().to_string(), run.snapshot()));

      Ok(RepoStatus {
         checkpoint: registry.checkpoint().map(str::to_string),
         tracked_files: registry.all_file_paths().count(),
         tracked_symbols: registry.symbol_count(),
         active_run,
         repo,
      })
   }
}

fn compile_excludes(patterns: &[String]) -> Vec<Regex> {
   patterns
      .iter()
      .filter_map(|p| match Regex::new(p) {
         Ok(re) => Some(re),
         Err(e) => {
            tracing::warn!(pattern = p, error = %e, "ignoring invalid exclude pattern");
            None
         },
      })
      .collect()
}

fn is_candidate(config: &Config, excludes: &[Regex], path: &str) -> bool {
   let supported = path
      .rsplit('.')
      .next()
      .is_some_and(|ext| config.supported_extensions.iter().any(|s| s == ext));
   supported && !excludes.iter().any(|re| re.is_match(path))
}

/// Runs one file's full pipeline: fetch, skip check, parse, classify,
/// embed, index. Registry writes are left to the aggregator.
async fn process_item<H, P, E, V>(ctx: &WorkerCtx<H, P, E, V>, item: &WorkItem) -> FileOutcome
where
   H: RepoHost,
   P: Parser,
   E: Embedder,
   V: VectorIndex,
{
   match item {
      WorkItem::Removal(path) => {
         let plan = classify::plan_file_removal(&ctx.registry.lock(), path);
         let ids: Vec<String> = plan.deleted.iter().map(|k| k.to_hex()).collect();
         if !ids.is_empty()
            && let Err(e) = ctx.index.delete(&ids).await
         {
            return FileOutcome::Failed { error: e.to_string() };
         }
         FileOutcome::Completed { plan, removal: true, embed_batches: 0 }
      },
      WorkItem::File(entry) => process_file(ctx, entry).await,
   }
}

async fn process_file<H, P, E, V>(ctx: &WorkerCtx<H, P, E, V>, entry: &TreeEntry) -> FileOutcome
where
   H: RepoHost,
   P: Parser,
   E: Embedder,
   V: VectorIndex,
{
   if entry.size.is_some_and(|size| size > ctx.max_file_size) {
      tracing::debug!(path = entry.path, size = entry.size, "skipping oversized file");
      return FileOutcome::Skipped;
   }

   let entry_clone = entry.clone();
   let host = Arc::clone(&ctx.host);
   let bytes = match ctx
      .governor
      .execute("fetch", move || {
         let host = Arc::clone(&host);
         let entry = entry_clone.clone();
         async move { host.fetch(&entry).await }
      })
      .await
   {
      Ok(bytes) => bytes,
      Err(e) if e.is_run_fatal() => {
         return FileOutcome::Fatal { error: Error::Host(e) };
      },
      Err(e) => return FileOutcome::Failed { error: e.to_string() },
   };

   if bytes.len() as u64 > ctx.max_file_size {
      tracing::debug!(path = entry.path, bytes = bytes.len(), "skipping oversized file");
      return FileOutcome::Skipped;
   }

   let hash = content_hash(&bytes);
   if classify::should_skip(&ctx.registry.lock(), &entry.path, hash) {
      return FileOutcome::Skipped;
   }

   let source = String::from_utf8_lossy(&bytes);
   let symbols = match ctx.parser.parse(&entry.path, &source) {
      Ok(symbols) => symbols,
      Err(e) => return FileOutcome::Failed { error: e.to_string() },
   };

   let plan = {
      let registry = ctx.registry.lock();
      match classify::classify_file(&registry, &ctx.repo, &entry.path, hash, &symbols) {
         Ok(plan) => plan,
         Err(e) => return FileOutcome::Failed { error: e.to_string() },
      }
   };

   let mut embed_batches = 0;
   for batch in plan.upserts.chunks(ctx.embed_batch.max(1)) {
      let texts: Vec<String> = batch.iter().map(|u| u.source.clone()).collect();
      let vectors = match ctx.embedder.embed(&texts).await {
         Ok(vectors) => vectors,
         Err(e) => return FileOutcome::Failed { error: e.to_string() },
      };
      embed_batches += 1;

      let records: Vec<VectorRecord> = batch
         .iter()
         .zip(vectors)
         .map(|(upsert, vector)| VectorRecord {
            vector_id: upsert.key.to_hex(),
            vector,
            file_path: entry.path.clone(),
            qualified_name: upsert.qualified_name.clone(),
            kind: upsert.kind,
            revision: ctx.revision.clone(),
         })
         .collect();

      if let Err(e) = ctx.index.upsert(records).await {
         return FileOutcome::Failed { error: e.to_string() };
      }
   }

   let deleted_ids: Vec<String> = plan.deleted.iter().map(|k| k.to_hex()).collect();
   if !deleted_ids.is_empty()
      && let Err(e) = ctx.index.delete(&deleted_ids).await
   {
      return FileOutcome::Failed { error: e.to_string() };
   }

   FileOutcome::Completed { plan, removal: false, embed_batches }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn cfg() -> Config {
      Config {
         exclude_patterns: vec!["^vendor/".to_string(), "_test\\.py$".to_string()],
         ..Config::default()
      }
   }

   #[test]
   fn candidate_filter_honors_extensions_and_excludes() {
      let config = cfg();
      let excludes = compile_excludes(&config.exclude_patterns);

      assert!(is_candidate(&config, &excludes, "src/app.py"));
      assert!(is_candidate(&config, &excludes, "lib/util.rs"));
      assert!(!is_candidate(&config, &excludes, "README.md"));
      assert!(!is_candidate(&config, &excludes, "vendor/dep.py"));
      assert!(!is_candidate(&config, &excludes, "src/app_test.py"));
      assert!(!is_candidate(&config, &excludes, "Makefile"));
   }

   #[test]
   fn invalid_exclude_patterns_are_dropped() {
      let excludes = compile_excludes(&["(unclosed".to_string(), "ok".to_string()]);
      assert_eq!(excludes.len(), 1);
   }
}
