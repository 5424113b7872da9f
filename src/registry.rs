//! Durable registry of file hashes, symbol entries, and checkpoints.
//!
//! One JSON-backed store per repository, keyed by a store id derived from
//! the repository identifier. The registry is the local source of truth for
//! reuse decisions; if it cannot be read or written the current run is
//! aborted, since classifying symbols without it would silently re-embed or
//! (worse) wrongly skip work.

use std::{
   collections::HashMap,
   fs,
   io::Write,
   path::{Path, PathBuf},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
   config,
   error::RegistryError,
   hash::{ChunkHash, ContentHash, SymbolKey},
   types::SymbolKind,
};

const STORE_ID_HASH_LEN: usize = 12;

/// Metadata for a single tracked file
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FileEntry {
   pub content_hash:  ContentHash,
   pub last_revision: String,
   pub last_synced:   String,
}

/// Registry entry for a single symbol, keyed by its stable symbol key
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SymbolEntry {
   pub chunk_hash:     ChunkHash,
   /// Identifier of the symbol's vector in the external index.
   pub vector_id:      String,
   pub file_path:      String,
   pub qualified_name: String,
   pub kind:           SymbolKind,
   pub last_revision:  String,
}

/// Last revision for which a run fully completed
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Checkpoint {
   pub revision:  String,
   pub synced_at: String,
}

/// Persistent hash registry for one repository
#[derive(Serialize, Deserialize, Default)]
pub struct Registry {
   repo:       String,
   #[serde(default)]
   files:      HashMap<String, FileEntry>,
   #[serde(default)]
   symbols:    HashMap<SymbolKey, SymbolEntry>,
   #[serde(default)]
   checkpoint: Option<Checkpoint>,
   #[serde(skip)]
   path:       PathBuf,
   #[serde(skip)]
   dirty:      bool,
}

/// Derives the on-disk store id for a repository identifier.
pub fn store_id(repo: &str) -> String {
   let slug = repo
      .trim_end_matches('/')
      .rsplit('/')
      .next()
      .unwrap_or("repo")
      .to_lowercase();
   let digest: [u8; 32] = Sha256::digest(repo.trim_end_matches('/').to_lowercase()).into();
   let hash = &hex::encode(digest)[..STORE_ID_HASH_LEN];
   format!("{slug}-{hash}")
}

impl Registry {
   /// Opens the registry for a repository, creating an empty one if none
   /// exists yet.
   pub fn open(repo: &str) -> Result<Self, RegistryError> {
      Self::open_in(config::registry_dir(), repo)
   }

   /// Opens a registry rooted at an explicit directory.
   pub fn open_in(dir: &Path, repo: &str) -> Result<Self, RegistryError> {
      let path = dir.join(format!("{}.json", store_id(repo)));

      let mut registry = if path.exists() {
         let content = fs::read_to_string(&path).map_err(RegistryError::Read)?;
         let registry: Self = serde_json::from_str(&content).map_err(RegistryError::Corrupt)?;
         registry
      } else {
         Self { repo: repo.to_string(), ..Self::default() }
      };

      registry.path = path;
      Ok(registry)
   }

   pub fn repo(&self) -> &str {
      &self.repo
   }

   /// Gets the stored content hash for a file path
   pub fn get_file_hash(&self, path: &str) -> Option<ContentHash> {
      self.files.get(path).map(|f| f.content_hash)
   }

   /// Records the content hash of a file observed at a revision
   pub fn set_file(&mut self, path: &str, content_hash: ContentHash, revision: &str) {
      self.files.insert(path.to_string(), FileEntry {
         content_hash,
         last_revision: revision.to_string(),
         last_synced: now_rfc3339(),
      });
      self.dirty = true;
   }

   /// Drops a file and is the caller's cue to also delete its symbols
   pub fn remove_file(&mut self, path: &str) {
      if self.files.remove(path).is_some() {
         self.dirty = true;
      }
   }

   pub fn all_file_paths(&self) -> impl Iterator<Item = &String> {
      self.files.keys()
   }

   pub fn get_symbol(&self, key: &SymbolKey) -> Option<&SymbolEntry> {
      self.symbols.get(key)
   }

   pub fn upsert_symbol(&mut self, key: SymbolKey, entry: SymbolEntry) {
      self.symbols.insert(key, entry);
      self.dirty = true;
   }

   pub fn delete_symbol(&mut self, key: &SymbolKey) -> bool {
      let removed = self.symbols.remove(key).is_some();
      self.dirty |= removed;
      removed
   }

   /// Returns the previously known symbol keys for a file path.
   ///
   /// The deletion-detection diff compares this set against a file's fresh
   /// parse output.
   pub fn symbols_for_file(&self, path: &str) -> Vec<SymbolKey> {
      self
         .symbols
         .iter()
         .filter(|(_, entry)| entry.file_path == path)
         .map(|(key, _)| *key)
         .collect()
   }

   pub fn symbol_count(&self) -> usize {
      self.symbols.len()
   }

   pub fn checkpoint(&self) -> Option<&str> {
      self.checkpoint.as_ref().map(|c| c.revision.as_str())
   }

   /// Advances the committed checkpoint.
   ///
   /// This is deliberately a distinct operation rather than a side effect of
   /// any per-file write: the orchestrator calls it exactly once, after every
   /// file in a run has reached a terminal state. It persists immediately.
   pub fn set_checkpoint(&mut self, revision: &str) -> Result<(), RegistryError> {
      self.checkpoint = Some(Checkpoint {
         revision:  revision.to_string(),
         synced_at: now_rfc3339(),
      });
      self.dirty = true;
      self.save()
   }

   /// Clears everything tracked for this repository.
   ///
   /// Used by `force_full_resync` to recover from corruption; the next run
   /// starts from an empty registry and re-embeds the world.
   pub fn clear_all(&mut self) {
      self.files.clear();
      self.symbols.clear();
      self.checkpoint = None;
      self.dirty = true;
   }

   /// Persists the registry if dirty. The write is atomic (temp file +
   /// rename) and flushed before returning, so a crash never leaves a
   /// half-written registry or a lost update.
   pub fn save(&mut self) -> Result<(), RegistryError> {
      if !self.dirty {
         return Ok(());
      }

      if let Some(parent) = self.path.parent() {
         fs::create_dir_all(parent).map_err(RegistryError::Write)?;
      }

      let content = serde_json::to_string(&self).map_err(RegistryError::Corrupt)?;

      let tmp = self.path.with_extension("json.tmp");
      {
         let mut file = fs::File::create(&tmp).map_err(RegistryError::Write)?;
         file
            .write_all(content.as_bytes())
            .map_err(RegistryError::Write)?;
         file.sync_all().map_err(RegistryError::Write)?;
      }
      fs::rename(&tmp, &self.path).map_err(RegistryError::Write)?;

      self.dirty = false;
      Ok(())
   }
}

fn now_rfc3339() -> String {
   Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
