use std::io;

use thiserror::Error;

/// Main error type for the semsync application.
///
/// Run-fatal conditions (registry unavailable, authentication failure)
/// surface through this enum; per-file failures are recorded in the run
/// state instead and never abort a sync run.
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error occurred during file or network operations.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// Durable registry could not be read or written. Fatal to the current
   /// run: reuse decisions cannot be made safely without it.
   #[error("registry error: {0}")]
   Registry(#[from] RegistryError),

   /// Remote host error that escaped per-file handling (authentication).
   #[error("host error: {0}")]
   Host(#[from] HostError),

   /// Configuration-related error occurred.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// JSON serialization or deserialization error occurred.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// TOML serialization or deserialization error occurred.
   #[error("toml error: {0}")]
   Toml(#[from] toml::de::Error),

   /// Two distinct symbols produced the same stable symbol key. Silently
   /// overwriting would corrupt reuse decisions, so the file is rejected.
   #[error(
      "symbol key collision for {key}: registry holds '{existing}', fresh parse produced \
       '{incoming}'"
   )]
   KeyCollision {
      key:      String,
      existing: String,
      incoming: String,
   },

   /// A file status transition violated the state machine (e.g.
   /// `completed -> pending` without passing through `failed`). Allowing it
   /// would corrupt the checkpoint-gating invariant.
   #[error("invalid status transition for {path}: {from} -> {to}")]
   InvalidTransition {
      path: String,
      from: &'static str,
      to:   &'static str,
   },
}

/// Errors from the durable registry's storage layer.
#[derive(Debug, Error)]
pub enum RegistryError {
   /// Backing file could not be read.
   #[error("failed to read registry: {0}")]
   Read(#[source] io::Error),

   /// Backing file could not be written durably.
   #[error("failed to write registry: {0}")]
   Write(#[source] io::Error),

   /// Persisted registry content is not valid JSON.
   #[error("corrupt registry data: {0}")]
   Corrupt(#[source] serde_json::Error),
}

/// Errors surfaced by a repository host implementation.
///
/// The governor keys its retry behavior off these variants: `RateLimited`
/// pauses the whole worker pool, `Auth` fails the run immediately, and
/// `Timeout`/`Transient` are retried with backoff.
#[derive(Debug, Error)]
pub enum HostError {
   /// Remote throttling signal; the pool must pause before further calls.
   #[error("rate limited by host")]
   RateLimited { retry_after_secs: Option<u64> },

   /// Credentials expired or invalid. Never retried.
   #[error("authentication failed: {0}")]
   Auth(String),

   /// Requested object does not exist at the given revision.
   #[error("not found: {0}")]
   NotFound(String),

   /// Remote call exceeded the configured timeout. Treated as transient.
   #[error("request timed out after {0}ms")]
   Timeout(u64),

   /// Network failure or 5xx response; retryable.
   #[error("transient host error: {0}")]
   Transient(String),

   /// Underlying HTTP client error.
   #[error("http error: {0}")]
   Http(#[from] reqwest::Error),
}

impl HostError {
   /// Whether the governor may retry this error with backoff.
   pub const fn is_retryable(&self) -> bool {
      matches!(
         self,
         Self::RateLimited { .. } | Self::Timeout(_) | Self::Transient(_) | Self::Http(_)
      )
   }

   /// Whether this error is fatal to the whole run rather than one file.
   pub const fn is_run_fatal(&self) -> bool {
      matches!(self, Self::Auth(_))
   }
}

/// Errors from the parser collaborator.
///
/// Parse failures mark the affected file `failed` but never abort the run.
#[derive(Debug, Error)]
pub enum ParseError {
   /// Source could not be parsed into symbols.
   #[error("failed to parse {path}: {reason}")]
   Malformed { path: String, reason: String },

   /// File language is not supported by the parser.
   #[error("unsupported language for {path}")]
   Unsupported { path: String },
}

/// Errors from the embedding collaborator.
#[derive(Debug, Error)]
pub enum EmbedError {
   /// Embedding backend rejected or failed the batch.
   #[error("embedding failed: {0}")]
   Backend(String),
}

/// Errors from the vector index collaborator.
#[derive(Debug, Error)]
pub enum IndexError {
   /// Upsert was rejected by the index.
   #[error("index upsert failed: {0}")]
   Upsert(String),

   /// Delete was rejected by the index.
   #[error("index delete failed: {0}")]
   Delete(String),
}

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// Failed to retrieve user directories (e.g., home directory).
   #[error("failed to get user directories")]
   GetUserDirectories,

   /// Config value is invalid or exceeds a safety cap.
   #[error("invalid config: {0}")]
   Invalid(String),
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
