//! Durability of the registry across process boundaries: state written by
//! one engine is fully visible to a fresh one, corruption is loud, and a
//! forced resync starts from a clean slate.

mod common;

use common::{MockHost, REPO, engine_in, sync_head, test_config};
use semsync::{
   error::RegistryError,
   hash::symbol_key,
   registry::{Registry, store_id},
};
use tempfile::TempDir;

const A: &str = "#: function f\ndef f():\n    return 1\n";
const B: &str = "#: function g\ndef g():\n    return 2\n";

#[tokio::test(flavor = "multi_thread")]
async fn fresh_process_sees_committed_state() {
   let tmp = TempDir::new().unwrap();
   let host = MockHost::new(REPO);
   host.set_tree("r1", &[("src/a.py", A), ("src/b.py", B)]);
   let engine = engine_in(&tmp, host, test_config());
   sync_head(&engine).await;
   drop(engine);

   // Reload from disk the way a new process would.
   let registry = Registry::open_in(&tmp.path().join("registry"), REPO).unwrap();
   assert_eq!(registry.checkpoint(), Some("r1"));
   assert_eq!(registry.symbol_count(), 2);
   let entry = registry
      .get_symbol(&symbol_key(REPO, "src/a.py", "f"))
      .unwrap();
   assert_eq!(entry.qualified_name, "f");
   assert_eq!(entry.last_revision, "r1");

   // A second engine over the same state dir plans nothing.
   let host = MockHost::new(REPO);
   host.set_tree("r1", &[("src/a.py", A), ("src/b.py", B)]);
   let engine = engine_in(&tmp, host, test_config());
   assert!(engine.plan_sync("main").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_run_persists_completed_files_without_checkpoint() {
   let tmp = TempDir::new().unwrap();
   let host = MockHost::new(REPO);
   host.set_tree("r1", &[("src/a.py", A), ("src/b.py", B)]);
   host.fail_fetches("src/b.py", 100);
   let engine = engine_in(&tmp, host, test_config());

   let outcome = sync_head(&engine).await;
   assert!(!outcome.success);
   drop(engine);

   let registry = Registry::open_in(&tmp.path().join("registry"), REPO).unwrap();
   assert!(registry.checkpoint().is_none());
   assert_eq!(registry.symbol_count(), 1);
   assert!(registry
      .get_symbol(&symbol_key(REPO, "src/a.py", "f"))
      .is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn atomic_writes_leave_no_temp_files() {
   let tmp = TempDir::new().unwrap();
   let host = MockHost::new(REPO);
   host.set_tree("r1", &[("src/a.py", A)]);
   let engine = engine_in(&tmp, host, test_config());
   sync_head(&engine).await;

   for dir in ["registry", "runs"] {
      let dir = tmp.path().join(dir);
      for entry in std::fs::read_dir(&dir).unwrap() {
         let name = entry.unwrap().file_name();
         assert!(
            !name.to_string_lossy().ends_with(".tmp"),
            "stray temp file {name:?} in {dir:?}"
         );
      }
   }
}

#[test]
fn corrupt_registry_is_loud_not_silent() {
   let tmp = TempDir::new().unwrap();
   let dir = tmp.path().join("registry");
   std::fs::create_dir_all(&dir).unwrap();
   std::fs::write(dir.join(format!("{}.json", store_id(REPO))), "{truncated").unwrap();

   let err = Registry::open_in(&dir, REPO)
      .err()
      .expect("corrupt registry must not open as empty");
   assert!(matches!(err, RegistryError::Corrupt(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn force_full_resync_reembeds_everything() {
   let tmp = TempDir::new().unwrap();
   let host = MockHost::new(REPO);
   host.set_tree("r1", &[("src/a.py", A), ("src/b.py", B)]);
   let engine = engine_in(&tmp, host, test_config());
   sync_head(&engine).await;
   let embedded = engine.embedder().texts_embedded();

   engine.force_full_resync().unwrap();
   let status = engine.status().unwrap();
   assert!(status.checkpoint.is_none());
   assert_eq!(status.tracked_symbols, 0);

   // Same head, but with the registry cleared the whole tree re-embeds.
   let outcome = sync_head(&engine).await;
   assert!(outcome.success);
   assert_eq!(outcome.stats.symbols_new, 2);
   assert_eq!(engine.embedder().texts_embedded(), embedded + 2);
   assert_eq!(engine.status().unwrap().checkpoint.as_deref(), Some("r1"));
}
