//! Embedding seam.
//!
//! The engine batches symbol sources and hands them to an [`Embedder`];
//! which model produces the vectors is outside this crate. The
//! [`DummyEmbedder`] is a lightweight deterministic implementation for
//! tests and tooling, and counts its calls so tests can assert how much
//! embedding work a run actually performed.

use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};

use crate::error::EmbedError;

/// Turns a batch of symbol sources into dense vectors
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
   async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

   fn dimension(&self) -> usize;
}

/// Deterministic embedder for tests and tooling.
///
/// Vectors are derived from a SHA-256 digest of the text, so equal sources
/// always embed identically and distinct sources almost never collide.
#[derive(Debug)]
pub struct DummyEmbedder {
   dim:            usize,
   batches:        AtomicUsize,
   texts_embedded: AtomicUsize,
}

impl DummyEmbedder {
   pub fn new(dim: usize) -> Self {
      Self {
         dim,
         batches: AtomicUsize::new(0),
         texts_embedded: AtomicUsize::new(0),
      }
   }

   /// Number of `embed` calls made so far.
   pub fn batches(&self) -> usize {
      self.batches.load(Ordering::Relaxed)
   }

   /// Total texts embedded across all calls.
   pub fn texts_embedded(&self) -> usize {
      self.texts_embedded.load(Ordering::Relaxed)
   }

   fn vector_for(&self, text: &str) -> Vec<f32> {
      let digest: [u8; 32] = Sha256::digest(text.as_bytes()).into();
      (0..self.dim)
         .map(|i| {
            let byte = digest[i % digest.len()];
            (f32::from(byte) - 127.5) / 127.5
         })
         .collect()
   }
}

impl Default for DummyEmbedder {
   fn default() -> Self {
      Self::new(16)
   }
}

#[async_trait::async_trait]
impl Embedder for DummyEmbedder {
   async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
      self.batches.fetch_add(1, Ordering::Relaxed);
      self.texts_embedded.fetch_add(texts.len(), Ordering::Relaxed);
      Ok(texts.iter().map(|t| self.vector_for(t)).collect())
   }

   fn dimension(&self) -> usize {
      self.dim
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[tokio::test]
   async fn embedding_is_deterministic() {
      let embedder = DummyEmbedder::new(8);
      let a = embedder.embed(&["def f(): pass".to_string()]).await.unwrap();
      let b = embedder.embed(&["def f(): pass".to_string()]).await.unwrap();
      assert_eq!(a, b);
      assert_eq!(a[0].len(), 8);
   }

   #[tokio::test]
   async fn distinct_texts_get_distinct_vectors() {
      let embedder = DummyEmbedder::default();
      let out = embedder
         .embed(&["def f(): pass".to_string(), "def g(): pass".to_string()])
         .await
         .unwrap();
      assert_ne!(out[0], out[1]);
   }

   #[tokio::test]
   async fn counts_batches_and_texts() {
      let embedder = DummyEmbedder::default();
      embedder
         .embed(&["a".to_string(), "b".to_string()])
         .await
         .unwrap();
      embedder.embed(&["c".to_string()]).await.unwrap();
      assert_eq!(embedder.batches(), 2);
      assert_eq!(embedder.texts_embedded(), 3);
   }
}
