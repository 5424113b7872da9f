//! Rate-limit handling: a throttled response pauses the whole pool, the
//! run still completes, and the checkpoint advances.

mod common;

use std::time::{Duration, Instant};

use common::{MockHost, REPO, engine_in, sync_head, test_config};
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_mid_run_pauses_then_completes() {
   let tmp = TempDir::new().unwrap();
   let host = MockHost::new(REPO);
   let files: Vec<(String, String)> = (0..10)
      .map(|i| {
         (
            format!("src/f{i}.py"),
            format!("#: function fn{i}\ndef fn{i}():\n    return {i}\n"),
         )
      })
      .collect();
   let tree: Vec<(&str, &str)> = files
      .iter()
      .map(|(p, c)| (p.as_str(), c.as_str()))
      .collect();
   host.set_tree("r1", &tree);
   host.rate_limit_on_fetch(3);

   let config = test_config();
   let wait = Duration::from_millis(config.rate_limit_wait_ms);
   let engine = engine_in(&tmp, host, config);

   let start = Instant::now();
   let outcome = sync_head(&engine).await;

   assert!(outcome.success);
   assert_eq!(outcome.progress.completed, 10);
   assert_eq!(outcome.progress.failed, 0);
   assert_eq!(outcome.stats.rate_limit_waits, 1);
   assert_eq!(engine.index().len(), 10);
   assert_eq!(engine.status().unwrap().checkpoint.as_deref(), Some("r1"));

   // The pool actually waited out the configured pause.
   assert!(start.elapsed() >= wait);
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_disabled_still_retries_the_call() {
   let tmp = TempDir::new().unwrap();
   let host = MockHost::new(REPO);
   host.set_tree("r1", &[("src/a.py", "#: function f\ndef f():\n    return 1\n")]);
   host.rate_limit_on_fetch(1);

   let config = semsync::config::Config {
      pause_on_rate_limit: false,
      ..test_config()
   };
   let engine = engine_in(&tmp, host, config);

   let outcome = sync_head(&engine).await;

   assert!(outcome.success);
   assert_eq!(outcome.stats.rate_limit_waits, 0);
   assert!(engine.host().fetch_count() >= 2);
}
