//! Vector index seam.
//!
//! The engine delivers at-least-once: a retried file may upsert the same
//! records twice, so [`VectorIndex`] implementations must treat the vector
//! id as the unit of idempotence. Ids are derived from the stable symbol
//! key and never contain revisions. [`MemoryIndex`] is the reference
//! implementation used by tests and local runs.

use std::{
   collections::HashMap,
   sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::{error::IndexError, types::SymbolKind};

/// One vector plus the metadata the index stores alongside it
#[derive(Debug, Clone)]
pub struct VectorRecord {
   /// Stable id derived from the symbol key. Upserting the same id
   /// replaces the prior vector.
   pub vector_id:      String,
   pub vector:         Vec<f32>,
   pub file_path:      String,
   pub qualified_name: String,
   pub kind:           SymbolKind,
   pub revision:       String,
}

/// Write interface to the external vector index
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
   /// Inserts or replaces records by vector id.
   async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), IndexError>;

   /// Removes records by vector id. Unknown ids are ignored.
   async fn delete(&self, vector_ids: &[String]) -> Result<(), IndexError>;
}

/// In-memory [`VectorIndex`] for tests and local runs
#[derive(Default)]
pub struct MemoryIndex {
   records:      Mutex<HashMap<String, VectorRecord>>,
   upsert_calls: AtomicUsize,
   delete_calls: AtomicUsize,
}

impl MemoryIndex {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn len(&self) -> usize {
      self.records.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.records.lock().is_empty()
   }

   pub fn contains(&self, vector_id: &str) -> bool {
      self.records.lock().contains_key(vector_id)
   }

   pub fn get(&self, vector_id: &str) -> Option<VectorRecord> {
      self.records.lock().get(vector_id).cloned()
   }

   /// Number of `upsert` batches received.
   pub fn upsert_calls(&self) -> usize {
      self.upsert_calls.load(Ordering::Relaxed)
   }

   /// Number of `delete` batches received.
   pub fn delete_calls(&self) -> usize {
      self.delete_calls.load(Ordering::Relaxed)
   }
}

#[async_trait::async_trait]
impl VectorIndex for MemoryIndex {
   async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), IndexError> {
      self.upsert_calls.fetch_add(1, Ordering::Relaxed);
      let mut map = self.records.lock();
      for record in records {
         map.insert(record.vector_id.clone(), record);
      }
      Ok(())
   }

   async fn delete(&self, vector_ids: &[String]) -> Result<(), IndexError> {
      self.delete_calls.fetch_add(1, Ordering::Relaxed);
      let mut map = self.records.lock();
      for id in vector_ids {
         map.remove(id);
      }
      Ok(())
   }
}
