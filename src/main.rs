use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use semsync::{
   Result,
   config::{self, validate_config},
   embed::DummyEmbedder,
   host::GitHubHost,
   index::MemoryIndex,
   parse::MarkerParser,
   sync::SyncEngine,
};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the semsync application
#[derive(Parser)]
#[command(name = "semsync")]
#[command(about = "Incrementally sync a repository's symbols into a vector index")]
#[command(version)]
struct Cli {
   /// Repository to operate on (owner/name or github.com URL).
   #[arg(long, env = "SEMSYNC_REPO")]
   repo: String,

   #[command(subcommand)]
   command: Cmd,
}

/// Available subcommands for semsync
#[derive(Subcommand)]
enum Cmd {
   #[command(about = "Sync the repository to the latest revision of a branch")]
   Sync {
      #[arg(long, help = "Branch to sync (default from config)")]
      branch: Option<String>,
   },

   #[command(about = "Show checkpoint, registry counts, and any interrupted run")]
   Status,

   #[command(about = "Discard all local state and re-sync from scratch")]
   Resync {
      #[arg(long, help = "Branch to sync (default from config)")]
      branch: Option<String>,
   },
}

#[tokio::main]
async fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
      .init();

   let cli = Cli::parse();
   if let Err(err) = run(cli).await {
      eprintln!("{err}");
      std::process::exit(1);
   }
}

async fn run(cli: Cli) -> Result<()> {
   let config = config::get().clone();
   validate_config(&config)?;

   let host = GitHubHost::new(&cli.repo, config.host_token().as_deref())?;
   let engine = SyncEngine::new(
      host,
      MarkerParser,
      DummyEmbedder::default(),
      MemoryIndex::new(),
      config.clone(),
   );

   match cli.command {
      Cmd::Sync { branch } => {
         let branch = branch.unwrap_or_else(|| config.default_branch.clone());
         run_sync(&engine, &branch).await
      },
      Cmd::Status => {
         let status = engine.status()?;
         println!("repository:  {}", status.repo);
         println!(
            "checkpoint:  {}",
            status.checkpoint.as_deref().unwrap_or("(none)")
         );
         println!("files:       {}", status.tracked_files);
         println!("symbols:     {}", status.tracked_symbols);
         match status.active_run {
            Some((revision, snap)) => {
               println!(
                  "active run:  {revision} ({}/{} done, {} failed)",
                  snap.completed + snap.skipped,
                  snap.total,
                  snap.failed
               );
            },
            None => println!("active run:  (none)"),
         }
         Ok(())
      },
      Cmd::Resync { branch } => {
         let branch = branch.unwrap_or_else(|| config.default_branch.clone());
         engine.force_full_resync()?;
         run_sync(&engine, &branch).await
      },
   }
}

async fn run_sync<H, P, E, V>(engine: &SyncEngine<H, P, E, V>, branch: &str) -> Result<()>
where
   H: semsync::host::RepoHost + 'static,
   P: semsync::parse::Parser + 'static,
   E: semsync::embed::Embedder + 'static,
   V: semsync::index::VectorIndex + 'static,
{
   let Some(plan) = engine.plan_sync(branch).await? else {
      println!("Already up to date.");
      return Ok(());
   };

   let cancel = CancellationToken::new();
   tokio::spawn({
      let cancel = cancel.clone();
      async move {
         if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight files");
            cancel.cancel();
         }
      }
   });

   let mut bar = ProgressBar::new(plan.files.len() as u64);
   bar.set_style(
      ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
         .unwrap_or_else(|_| ProgressStyle::default_bar()),
   );

   let outcome = engine
      .run_sync(&plan.revision, plan.files, cancel, &mut bar)
      .await?;
   bar.finish_and_clear();

   let stats = outcome.stats;
   if outcome.success {
      println!("Synced to {}.", outcome.revision);
   } else {
      println!(
         "Sync incomplete ({} failed, {} pending); checkpoint unchanged. Re-run to resume.",
         outcome.progress.failed,
         outcome.progress.pending + outcome.progress.in_progress
      );
   }
   println!(
      "  files: {} changed, {} skipped, {} failed",
      stats.files_changed, stats.files_skipped, stats.files_failed
   );
   println!(
      "  symbols: {} new, {} modified, {} reused, {} deleted",
      stats.symbols_new, stats.symbols_modified, stats.symbols_reused, stats.symbols_deleted
   );
   if stats.retries > 0 || stats.rate_limit_waits > 0 {
      println!(
         "  host: {} retries, {} rate-limit pauses",
         stats.retries, stats.rate_limit_waits
      );
   }
   Ok(())
}
