//! Shared test harness: an in-memory repository host with failure
//! injection, plus engine construction rooted in a temp directory.

#![allow(dead_code)]

use std::{
   collections::{BTreeMap, HashMap},
   sync::atomic::{AtomicUsize, Ordering},
   time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use semsync::{
   config::Config,
   embed::DummyEmbedder,
   error::HostError,
   index::MemoryIndex,
   parse::MarkerParser,
   sync::SyncEngine,
   types::TreeEntry,
};
use tempfile::TempDir;

pub const REPO: &str = "github.com/acme/widget";

/// In-memory [`RepoHost`](semsync::host::RepoHost) with scripted revisions
/// and failure injection.
#[derive(Default)]
pub struct MockHost {
   repo:            String,
   head:            Mutex<String>,
   trees:           Mutex<HashMap<String, BTreeMap<String, String>>>,
   fetches:         AtomicUsize,
   /// path -> remaining transient failures before fetches succeed.
   transient_fails: Mutex<HashMap<String, usize>>,
   /// 1-based fetch ordinal that returns one rate-limit error.
   rate_limit_at:   Mutex<Option<usize>>,
   /// Artificial latency per fetch; keeps runs in flight long enough for
   /// mid-run events (cancellation) to land deterministically.
   fetch_delay:     Mutex<Option<Duration>>,
}

impl MockHost {
   pub fn new(repo: &str) -> Self {
      Self { repo: repo.to_string(), ..Self::default() }
   }

   /// Installs the file tree for a revision and moves the head to it.
   pub fn set_tree(&self, revision: &str, files: &[(&str, &str)]) {
      let tree = files
         .iter()
         .map(|(path, content)| ((*path).to_string(), (*content).to_string()))
         .collect();
      self.trees.lock().insert(revision.to_string(), tree);
      *self.head.lock() = revision.to_string();
   }

   /// Makes the next `times` fetches of `path` fail with a transient error.
   pub fn fail_fetches(&self, path: &str, times: usize) {
      self.transient_fails.lock().insert(path.to_string(), times);
   }

   /// Makes the `ordinal`-th fetch (1-based, across all paths) return a
   /// single rate-limit error.
   pub fn rate_limit_on_fetch(&self, ordinal: usize) {
      *self.rate_limit_at.lock() = Some(ordinal);
   }

   /// Makes every fetch sleep for `delay` before returning.
   pub fn delay_fetches(&self, delay: Duration) {
      *self.fetch_delay.lock() = Some(delay);
   }

   pub fn fetch_count(&self) -> usize {
      self.fetches.load(Ordering::SeqCst)
   }
}

#[async_trait]
impl semsync::host::RepoHost for MockHost {
   fn repo(&self) -> &str {
      &self.repo
   }

   async fn latest_revision(&self, _branch: &str) -> Result<String, HostError> {
      Ok(self.head.lock().clone())
   }

   async fn list_files(&self, revision: &str) -> Result<Vec<TreeEntry>, HostError> {
      let trees = self.trees.lock();
      let tree = trees
         .get(revision)
         .ok_or_else(|| HostError::NotFound(format!("revision {revision}")))?;
      Ok(tree
         .iter()
         .map(|(path, content)| TreeEntry {
            path:        path.clone(),
            content_ref: format!("{revision}:{path}"),
            size:        Some(content.len() as u64),
         })
         .collect())
   }

   async fn fetch(&self, entry: &TreeEntry) -> Result<Vec<u8>, HostError> {
      let delay = *self.fetch_delay.lock();
      if let Some(delay) = delay {
         tokio::time::sleep(delay).await;
      }

      let ordinal = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;

      {
         let mut at = self.rate_limit_at.lock();
         if *at == Some(ordinal) {
            *at = None;
            return Err(HostError::RateLimited { retry_after_secs: None });
         }
      }

      let (revision, path) = entry
         .content_ref
         .split_once(':')
         .ok_or_else(|| HostError::NotFound(entry.content_ref.clone()))?;

      {
         let mut fails = self.transient_fails.lock();
         if let Some(remaining) = fails.get_mut(path) {
            if *remaining > 0 {
               *remaining -= 1;
               return Err(HostError::Transient(format!("injected failure for {path}")));
            }
         }
      }

      self
         .trees
         .lock()
         .get(revision)
         .and_then(|tree| tree.get(path))
         .map(|content| content.as_bytes().to_vec())
         .ok_or_else(|| HostError::NotFound(entry.content_ref.clone()))
   }
}

pub fn test_config() -> Config {
   Config {
      max_workers: 4,
      max_retries: 2,
      retry_base_delay_ms: 1,
      retry_max_delay_ms: 10,
      rate_limit_wait_ms: 50,
      fetch_timeout_ms: 5_000,
      ..Config::default()
   }
}

pub type TestEngine = SyncEngine<MockHost, MarkerParser, DummyEmbedder, MemoryIndex>;

/// Builds an engine whose registry and run state live under a temp dir.
pub fn engine_in(tmp: &TempDir, host: MockHost, config: Config) -> TestEngine {
   SyncEngine::new(
      host,
      MarkerParser,
      DummyEmbedder::default(),
      MemoryIndex::new(),
      config,
   )
   .with_state_dirs(&tmp.path().join("registry"), &tmp.path().join("runs"))
}

/// Plans and runs a full sync of the host's current head, no cancellation.
pub async fn sync_head(engine: &TestEngine) -> semsync::types::SyncOutcome {
   let plan = engine
      .plan_sync("main")
      .await
      .expect("plan_sync failed")
      .expect("nothing to sync");
   engine
      .run_sync(
         &plan.revision,
         plan.files,
         tokio_util::sync::CancellationToken::new(),
         &mut (),
      )
      .await
      .expect("run_sync failed")
}
