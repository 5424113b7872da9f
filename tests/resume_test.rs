//! Resumability: an interrupted run picks up exactly where it stopped,
//! without repeating completed work.

mod common;

use std::time::Duration;

use common::{MockHost, REPO, engine_in, sync_head, test_config};
use semsync::{
   registry::Registry,
   run_state::{FileStatus, RunState},
   sync::SyncProgress,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn body(name: &str, value: u32) -> String {
   format!("#: function {name}\ndef {name}():\n    return {value}\n")
}

#[tokio::test(flavor = "multi_thread")]
async fn resumed_run_finishes_only_the_remaining_files() {
   let tmp = TempDir::new().unwrap();
   let host = MockHost::new(REPO);
   let files: Vec<(String, String)> = (0..6)
      .map(|i| (format!("src/f{i}.py"), body(&format!("fn{i}"), i)))
      .collect();
   let tree: Vec<(&str, &str)> = files
      .iter()
      .map(|(p, c)| (p.as_str(), c.as_str()))
      .collect();
   host.set_tree("r1", &tree);
   // One file fails past the retry budget: first run ends incomplete.
   host.fail_fetches("src/f3.py", 100);
   let engine = engine_in(&tmp, host, test_config());

   let outcome = sync_head(&engine).await;
   assert!(!outcome.success);
   assert_eq!(outcome.progress.completed, 5);
   assert_eq!(outcome.progress.failed, 1);
   assert!(engine.status().unwrap().checkpoint.is_none());

   let embedded_before = engine.embedder().texts_embedded();
   let status = engine.status().unwrap();
   let (revision, snap) = status.active_run.expect("interrupted run is visible");
   assert_eq!(revision, "r1");
   assert_eq!(snap.completed, 5);

   // "Restart": the injected failure is gone, same head.
   engine.host().fail_fetches("src/f3.py", 0);
   let plan = engine.plan_sync("main").await.unwrap().unwrap();
   let outcome = engine
      .run_sync(
         &plan.revision,
         plan.files,
         tokio_util::sync::CancellationToken::new(),
         &mut (),
      )
      .await
      .unwrap();

   assert!(outcome.success);
   assert_eq!(engine.status().unwrap().checkpoint.as_deref(), Some("r1"));
   // Exactly the failed file's symbol was embedded on resume.
   assert_eq!(engine.embedder().texts_embedded(), embedded_before + 1);
   assert_eq!(engine.index().len(), 6);
   assert!(engine.status().unwrap().active_run.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_run_persists_state_and_resumes() {
   let tmp = TempDir::new().unwrap();
   let host = MockHost::new(REPO);
   let files: Vec<(String, String)> = (0..40)
      .map(|i| (format!("src/f{i}.py"), body(&format!("fn{i}"), i)))
      .collect();
   let tree: Vec<(&str, &str)> = files
      .iter()
      .map(|(p, c)| (p.as_str(), c.as_str()))
      .collect();
   host.set_tree("r1", &tree);
   // Keep fetches slow enough that the run is still mid-flight when the
   // first result comes back.
   host.delay_fetches(Duration::from_millis(10));
   let engine = engine_in(&tmp, host, test_config());

   let plan = engine.plan_sync("main").await.unwrap().unwrap();
   let cancel = CancellationToken::new();
   let trigger = cancel.clone();
   let mut on_first_result = move |_p: SyncProgress| trigger.cancel();
   let outcome = engine
      .run_sync(&plan.revision, plan.files, cancel, &mut on_first_result)
      .await
      .unwrap();

   // In-flight files finished to a terminal status; untouched files stay
   // pending; the checkpoint did not move.
   assert!(!outcome.success);
   assert!(outcome.progress.completed >= 1);
   assert!(outcome.progress.pending > 0);
   assert_eq!(outcome.progress.in_progress, 0);
   assert_eq!(outcome.progress.failed, 0);

   let status = engine.status().unwrap();
   assert!(status.checkpoint.is_none());
   let (revision, snap) = status.active_run.expect("cancelled run is persisted");
   assert_eq!(revision, "r1");
   assert_eq!(snap.completed, outcome.progress.completed);
   assert_eq!(snap.pending, outcome.progress.pending);

   // A fresh invocation finishes the remainder; nothing is embedded twice.
   let outcome = sync_head(&engine).await;
   assert!(outcome.success);
   assert_eq!(engine.status().unwrap().checkpoint.as_deref(), Some("r1"));
   assert_eq!(engine.index().len(), 40);
   assert_eq!(engine.embedder().texts_embedded(), 40);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_tracked_paths_do_not_stall_the_run() {
   let tmp = TempDir::new().unwrap();
   let run_dir = tmp.path().join("runs");

   let host = MockHost::new(REPO);
   let a = body("fa", 1);
   host.set_tree("r1", &[("src/a.py", &a)]);

   // A persisted run tracking paths that are in neither the tree nor the
   // registry: one never attempted, one stuck mid-flight (a removal whose
   // registry commit landed before the process died).
   {
      let paths = vec![
         "src/a.py".to_string(),
         "src/ghost.py".to_string(),
         "src/gone.py".to_string(),
      ];
      let (mut run, _) = RunState::load_or_create_in(&run_dir, REPO, "r1", &paths).unwrap();
      run.transition("src/gone.py", FileStatus::InProgress, None).unwrap();
   }

   let engine = engine_in(&tmp, host, test_config());
   let outcome = tokio::time::timeout(Duration::from_secs(5), sync_head(&engine))
      .await
      .expect("run stalled on paths with no work item");

   assert!(outcome.success);
   assert_eq!(outcome.progress.completed, 1);
   assert_eq!(outcome.progress.skipped, 2);
   assert_eq!(engine.status().unwrap().checkpoint.as_deref(), Some("r1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn crashed_in_progress_file_is_reattempted() {
   let tmp = TempDir::new().unwrap();
   let registry_dir = tmp.path().join("registry");
   let run_dir = tmp.path().join("runs");

   let host = MockHost::new(REPO);
   let a = body("fa", 1);
   let b = body("fb", 2);
   host.set_tree("r1", &[("src/a.py", &a), ("src/b.py", &b)]);

   // Simulate a process that died mid-file: a persisted run with a.py
   // completed and b.py stuck in_progress.
   {
      let mut registry = Registry::open_in(&registry_dir, REPO).unwrap();
      registry.set_file("src/a.py", semsync::hash::content_hash(a.as_bytes()), "r1");
      registry.save().unwrap();

      let paths = vec!["src/a.py".to_string(), "src/b.py".to_string()];
      let (mut run, _) = RunState::load_or_create_in(&run_dir, REPO, "r1", &paths).unwrap();
      run.transition("src/a.py", FileStatus::InProgress, None).unwrap();
      run.transition("src/a.py", FileStatus::Completed, None).unwrap();
      run.transition("src/b.py", FileStatus::InProgress, None).unwrap();
   }

   let engine = engine_in(&tmp, host, test_config());
   let outcome = sync_head(&engine).await;

   assert!(outcome.success);
   // a.py was already completed in the resumed run and is not touched
   // again; b.py went through the full pipeline.
   assert_eq!(engine.host().fetch_count(), 1);
   assert_eq!(engine.embedder().texts_embedded(), 1);
   assert_eq!(engine.status().unwrap().checkpoint.as_deref(), Some("r1"));
}
