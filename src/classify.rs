//! Change classification against the durable registry.
//!
//! Given the complete fresh symbol list for a file, decides per symbol
//! whether it is new, modified, or reused, and computes the deletion set by
//! diffing against what the registry previously tracked for that path. The
//! whole-file skip check sits upstream of parsing: an unchanged content
//! hash means the file is never fetched into symbols at all.

use std::collections::{HashMap, HashSet};

use crate::{
   error::{Error, Result},
   hash::{ContentHash, chunk_hash, symbol_key},
   registry::Registry,
   types::{FilePlan, PendingUpsert, Symbol, SymbolChange},
};

/// Whether a file can be skipped without fetching or parsing it.
pub fn should_skip(registry: &Registry, path: &str, fresh: ContentHash) -> bool {
   registry.get_file_hash(path) == Some(fresh)
}

/// Classifies every fresh symbol of one changed file and diffs for
/// deletions.
///
/// The symbol list must be complete for the file; a partial list would be
/// indistinguishable from deletions. Key collisions (two distinct symbols
/// mapping to one stable key) reject the whole file rather than silently
/// overwriting an entry.
pub fn classify_file(
   registry: &Registry,
   repo: &str,
   path: &str,
   content_hash: ContentHash,
   symbols: &[Symbol],
) -> Result<FilePlan> {
   let mut plan = FilePlan {
      path: path.to_string(),
      content_hash,
      upserts: Vec::new(),
      reused: Vec::new(),
      deleted: Vec::new(),
   };

   let mut seen = HashMap::new();

   for symbol in symbols {
      let key = symbol_key(repo, path, &symbol.qualified_name);

      if let Some(prior) = seen.insert(key, symbol.qualified_name.clone()) {
         return Err(Error::KeyCollision {
            key:      key.to_hex(),
            existing: prior,
            incoming: symbol.qualified_name.clone(),
         });
      }

      if let Some(entry) = registry.get_symbol(&key) {
         // A stored entry under this key must describe this same symbol.
         if entry.file_path != path || entry.qualified_name != symbol.qualified_name.trim() {
            return Err(Error::KeyCollision {
               key:      key.to_hex(),
               existing: entry.qualified_name.clone(),
               incoming: symbol.qualified_name.clone(),
            });
         }
      }

      let chunk = chunk_hash(&symbol.source);
      match registry.get_symbol(&key) {
         Some(entry) if entry.chunk_hash == chunk => plan.reused.push(key),
         Some(_) => plan.upserts.push(pending(key, chunk, symbol, SymbolChange::Modified)),
         None => plan.upserts.push(pending(key, chunk, symbol, SymbolChange::New)),
      }
   }

   let fresh_keys: HashSet<_> = seen.keys().copied().collect();
   plan.deleted = registry
      .symbols_for_file(path)
      .into_iter()
      .filter(|key| !fresh_keys.contains(key))
      .collect();
   plan.deleted.sort_by_key(|k| k.to_hex());

   Ok(plan)
}

/// Plan for a file that disappeared from the tree: delete everything the
/// registry still tracks for it.
pub fn plan_file_removal(registry: &Registry, path: &str) -> FilePlan {
   let mut deleted = registry.symbols_for_file(path);
   deleted.sort_by_key(|k| k.to_hex());
   FilePlan {
      path: path.to_string(),
      content_hash: ContentHash::new([0; 32]),
      upserts: Vec::new(),
      reused: Vec::new(),
      deleted,
   }
}

fn pending(
   key: crate::hash::SymbolKey,
   chunk: crate::hash::ChunkHash,
   symbol: &Symbol,
   change: SymbolChange,
) -> PendingUpsert {
   PendingUpsert {
      key,
      chunk_hash: chunk,
      // Trimmed, matching the canonical form the key was derived from;
      // the registry comparison above relies on it.
      qualified_name: symbol.qualified_name.trim().to_string(),
      kind: symbol.kind,
      source: symbol.source.clone(),
      change,
   }
}
