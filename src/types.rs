use serde::{Deserialize, Serialize};

use crate::hash::{ChunkHash, ContentHash, SymbolKey};

/// Kind of symbol extracted from source files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
   Function,
   Class,
   Method,
   Module,
   Other,
}

/// A symbol freshly extracted from a file by the parser collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
   /// Complete symbol path within the file, e.g. `MyClass.my_method`.
   pub qualified_name: String,
   /// Raw source text of the symbol.
   pub source:         String,
   pub kind:           SymbolKind,
}

/// An entry in the repository's file tree at a target revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
   pub path:        String,
   /// Opaque handle the host resolves to file content (e.g. a blob SHA).
   pub content_ref: String,
   pub size:        Option<u64>,
}

/// Per-symbol classification against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolChange {
   /// Not previously tracked; embed and upsert.
   New,
   /// Tracked but chunk hash changed; re-embed, overwrite prior vector.
   Modified,
   /// Chunk hash unchanged; carry the existing vector forward untouched.
   Reused,
}

/// A symbol the classifier decided needs embedding and an index upsert
#[derive(Debug, Clone)]
pub struct PendingUpsert {
   pub key:            SymbolKey,
   pub chunk_hash:     ChunkHash,
   pub qualified_name: String,
   pub kind:           SymbolKind,
   pub source:         String,
   pub change:         SymbolChange,
}

/// Classifier output for one changed file: everything the orchestrator
/// needs to drive embed/upsert/delete and the registry commit.
#[derive(Debug, Clone)]
pub struct FilePlan {
   pub path:         String,
   pub content_hash: ContentHash,
   pub upserts:      Vec<PendingUpsert>,
   /// Symbols confirmed unchanged; registry metadata refresh only.
   pub reused:       Vec<SymbolKey>,
   /// Symbols present in the registry but absent from the fresh parse.
   pub deleted:      Vec<SymbolKey>,
}

/// Aggregate statistics for one sync run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SyncStats {
   pub files_changed:    usize,
   pub files_skipped:    usize,
   pub files_failed:     usize,
   pub symbols_new:      usize,
   pub symbols_modified: usize,
   pub symbols_reused:   usize,
   pub symbols_deleted:  usize,
   pub embed_calls:      usize,
   pub retries:          usize,
   pub rate_limit_waits: usize,
}

/// Point-in-time view of a run's per-file progress
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
   pub total:            usize,
   pub completed:        usize,
   pub skipped:          usize,
   pub failed:           usize,
   pub pending:          usize,
   pub in_progress:      usize,
   pub percent_complete: f64,
   /// True iff every file is `completed` or `skipped`.
   pub is_complete:      bool,
}

/// Result of one `run_sync` invocation
#[derive(Debug, Clone)]
pub struct SyncOutcome {
   /// True iff the run reached full completion and the checkpoint advanced.
   pub success:  bool,
   pub revision: String,
   pub progress: ProgressSnapshot,
   pub stats:    SyncStats,
}
