//! Configuration management for sync policy, worker limits, and paths.

use std::{
   fs,
   path::{Path, PathBuf},
   sync::OnceLock,
};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub const MAX_WORKERS_CAP: usize = 64;
pub const MAX_RETRIES_CAP: u32 = 10;
pub const MAX_FILE_SIZE_BYTES_CAP: u64 = 10_485_760;
pub const EMBED_BATCH_SIZE_CAP: usize = 512;

/// Application configuration loaded from config file and environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   /// Worker pool size. An explicit value, never auto-detected: it doubles
   /// as a courtesy limit against the remote repository host.
   pub max_workers: usize,

   pub max_retries:          u32,
   pub retry_base_delay_ms:  u64,
   pub retry_max_delay_ms:   u64,
   pub rate_limit_wait_ms:   u64,
   pub pause_on_rate_limit:  bool,
   pub fetch_timeout_ms:     u64,
   pub max_file_size_bytes:  u64,
   pub embed_batch_size:     usize,
   pub supported_extensions: Vec<String>,
   pub exclude_patterns:     Vec<String>,

   pub host_token:    Option<String>,
   pub default_branch: String,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         max_workers:          4,
         max_retries:          3,
         retry_base_delay_ms:  1_000,
         retry_max_delay_ms:   60_000,
         rate_limit_wait_ms:   60_000,
         pause_on_rate_limit:  true,
         fetch_timeout_ms:     30_000,
         max_file_size_bytes:  512_000,
         embed_batch_size:     50,
         supported_extensions: vec![
            "py".into(),
            "js".into(),
            "mjs".into(),
            "cjs".into(),
            "ts".into(),
            "tsx".into(),
            "go".into(),
            "rs".into(),
            "java".into(),
            "rb".into(),
         ],
         exclude_patterns:     Vec::new(),
         host_token:           None,
         default_branch:       "main".into(),
      }
   }
}

impl Config {
   pub fn load() -> Self {
      let config_path = ensure_global_config();

      Figment::from(Serialized::defaults(Self::default()))
         .merge(Toml::file(config_path))
         .merge(Env::prefixed("SEMSYNC_").lowercase(true))
         .extract()
         .inspect_err(|e| tracing::warn!("failed to parse config: {e}"))
         .unwrap_or_default()
   }

   fn create_default_config(path: &Path) {
      if let Some(parent) = path.parent() {
         let _ = fs::create_dir_all(parent);
      }
      let default_config = Self::default();
      if let Ok(toml) = toml::to_string_pretty(&default_config) {
         let _ = fs::write(path, toml);
      }
   }

   pub fn effective_max_workers(&self) -> usize {
      self.max_workers.clamp(1, MAX_WORKERS_CAP)
   }

   pub fn effective_max_retries(&self) -> u32 {
      self.max_retries.min(MAX_RETRIES_CAP)
   }

   pub fn effective_max_file_size_bytes(&self) -> u64 {
      self.max_file_size_bytes.min(MAX_FILE_SIZE_BYTES_CAP)
   }

   pub fn effective_embed_batch_size(&self) -> usize {
      self.embed_batch_size.clamp(1, EMBED_BATCH_SIZE_CAP)
   }

   /// Token for authenticated host access, falling back to the conventional
   /// environment variable.
   pub fn host_token(&self) -> Option<String> {
      self
         .host_token
         .clone()
         .or_else(|| std::env::var("GITHUB_TOKEN").ok())
   }
}

/// Returns the global configuration instance
pub fn get() -> &'static Config {
   CONFIG.get_or_init(Config::load)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
   if cfg.max_workers == 0 {
      return Err(ConfigError::Invalid("max_workers must be at least 1".into()).into());
   }
   if cfg.max_workers > MAX_WORKERS_CAP {
      return Err(
         ConfigError::Invalid(format!(
            "max_workers {} exceeds hard cap {MAX_WORKERS_CAP}",
            cfg.max_workers
         ))
         .into(),
      );
   }
   if cfg.max_retries > MAX_RETRIES_CAP {
      return Err(
         ConfigError::Invalid(format!(
            "max_retries {} exceeds hard cap {MAX_RETRIES_CAP}",
            cfg.max_retries
         ))
         .into(),
      );
   }
   if cfg.max_file_size_bytes > MAX_FILE_SIZE_BYTES_CAP {
      return Err(
         ConfigError::Invalid(format!(
            "max_file_size_bytes {} exceeds hard cap {MAX_FILE_SIZE_BYTES_CAP}",
            cfg.max_file_size_bytes
         ))
         .into(),
      );
   }
   if cfg.retry_base_delay_ms > cfg.retry_max_delay_ms {
      return Err(
         ConfigError::Invalid("retry_base_delay_ms exceeds retry_max_delay_ms".into()).into(),
      );
   }
   Ok(())
}

/// Returns the base directory for semsync data and configuration
pub fn base_dir() -> &'static PathBuf {
   static ONCE: OnceLock<PathBuf> = OnceLock::new();
   ONCE.get_or_init(|| resolve_base_dir(".semsync"))
}

fn ensure_global_config() -> PathBuf {
   let config_path = config_file_path();
   if !config_path.exists() {
      Config::create_default_config(config_path);
   }
   config_path.to_path_buf()
}

fn resolve_base_dir(dir_name: &str) -> PathBuf {
   BaseDirs::new()
      .map(|d| d.home_dir().join(dir_name))
      .or_else(|| {
         std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(dir_name))
      })
      .unwrap_or_else(|| {
         std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(dir_name)
      })
}

macro_rules! define_paths {
   ($($fn_name:ident: $path:literal),* $(,)?) => {
      $(
         pub fn $fn_name() -> &'static PathBuf {
            static ONCE: OnceLock<PathBuf> = OnceLock::new();
            ONCE.get_or_init(|| base_dir().join($path))
         }
      )*
   };
}

define_paths! {
   config_file_path: "config.toml",
   registry_dir: "registry",
   run_state_dir: "runs",
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn default_config_is_valid() {
      validate_config(&Config::default()).unwrap();
   }

   #[test]
   fn rejects_zero_workers() {
      let cfg = Config { max_workers: 0, ..Config::default() };
      assert!(validate_config(&cfg).is_err());
   }

   #[test]
   fn rejects_inverted_backoff_window() {
      let cfg = Config {
         retry_base_delay_ms: 5_000,
         retry_max_delay_ms: 1_000,
         ..Config::default()
      };
      assert!(validate_config(&cfg).is_err());
   }

   #[test]
   fn caps_apply() {
      let cfg = Config { max_workers: 1000, ..Config::default() };
      assert_eq!(cfg.effective_max_workers(), MAX_WORKERS_CAP);
   }
}
