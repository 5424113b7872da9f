//! Hash-based identity for files and symbols.
//!
//! Three deterministic, content-derived hashes drive every reuse decision:
//!
//! - [`ContentHash`]: SHA-256 of a whole file's bytes (line endings
//!   normalized). Any byte-level change to the file changes it; a match
//!   short-circuits all further work on the file.
//! - [`SymbolKey`]: SHA-256 of `(repo, path, qualified name)`. The symbol's
//!   identity across time. Never incorporates line numbers or revisions, so
//!   it survives edits elsewhere in the file and revision changes.
//! - [`ChunkHash`]: SHA-256 of a symbol's normalized source. Changes iff the
//!   symbol's meaningful content changed; decides re-embedding.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

macro_rules! define_hash {
   ($(#[$doc:meta])* $name:ident) => {
      $(#[$doc])*
      #[derive(Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
      #[repr(transparent)]
      pub struct $name([u8; 32]);

      impl $name {
         pub const fn new(hash: [u8; 32]) -> Self {
            Self(hash)
         }

         /// Parses a hash from its hex representation.
         pub fn from_hex(s: &str) -> Option<Self> {
            let bytes = hex::decode(s).ok()?;
            let (this, rem) = bytes.split_first_chunk()?;
            rem.is_empty().then_some(Self(*this))
         }

         pub fn to_hex(&self) -> String {
            hex::encode(self.0)
         }
      }

      impl AsRef<[u8]> for $name {
         fn as_ref(&self) -> &[u8] {
            &self.0
         }
      }

      impl fmt::Display for $name {
         fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", hex::encode(self.0))
         }
      }

      impl fmt::Debug for $name {
         fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
         }
      }

      // Hex strings keep the persisted registry JSON readable and let the
      // key types serve as JSON map keys.
      impl Serialize for $name {
         fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&self.to_hex())
         }
      }

      impl<'de> Deserialize<'de> for $name {
         fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid hash hex"))
         }
      }
   };
}

define_hash! {
   /// Hash of a whole file's raw bytes; detects file-level change.
   ContentHash
}

define_hash! {
   /// Durable identity of a symbol: hash of (repo, path, qualified name).
   SymbolKey
}

define_hash! {
   /// Hash of a symbol's normalized source; detects meaningful change.
   ChunkHash
}

fn sha256(data: &[u8]) -> [u8; 32] {
   Sha256::digest(data).into()
}

/// Computes the content hash of a file.
///
/// Line endings are normalized to LF first so checkouts on different
/// platforms agree on whether a file changed. The pass is bytewise: the
/// bytes are never decoded, so files that are not valid UTF-8 still hash
/// distinctly.
pub fn content_hash(bytes: &[u8]) -> ContentHash {
   let mut normalized = Vec::with_capacity(bytes.len());
   let mut i = 0;
   while i < bytes.len() {
      if bytes[i] == b'\r' {
         normalized.push(b'\n');
         if bytes.get(i + 1) == Some(&b'\n') {
            i += 1;
         }
      } else {
         normalized.push(bytes[i]);
      }
      i += 1;
   }
   ContentHash(sha256(&normalized))
}

/// Computes the stable symbol key for `(repo, path, qualified name)`.
///
/// Inputs are canonicalized (repo lowercased and stripped of trailing
/// slashes, backslash path separators normalized) so the same symbol always
/// maps to the same key. Line numbers and revision identifiers are
/// deliberately excluded.
pub fn symbol_key(repo: &str, path: &str, qualified_name: &str) -> SymbolKey {
   let repo = repo.trim_end_matches('/').to_lowercase();
   let path = path.replace('\\', "/");
   let name = qualified_name.trim();

   let identity = format!("{repo}|{path}|{name}");
   SymbolKey(sha256(identity.as_bytes()))
}

/// Computes the chunk hash of a symbol's source text.
pub fn chunk_hash(source: &str) -> ChunkHash {
   ChunkHash(sha256(normalize_source(source).as_bytes()))
}

/// Normalizes symbol source for stable hashing.
///
/// Rules, pinned by the tests below:
/// - line endings become LF
/// - trailing whitespace is stripped from every line
/// - interior runs of spaces/tabs collapse to a single space
/// - leading indentation is preserved exactly (significant in
///   indentation-sensitive languages)
/// - leading/trailing blank lines are stripped
///
/// Reformatting that only touches the normalized aspects does not trigger
/// re-embedding; indentation or token changes do.
pub fn normalize_source(source: &str) -> String {
   let source = source.replace("\r\n", "\n").replace('\r', "\n");

   let normalized: Vec<String> = source
      .split('\n')
      .map(|line| {
         let line = line.trim_end();
         let indent_len = line.len() - line.trim_start().len();
         let (indent, rest) = line.split_at(indent_len);

         let mut collapsed = String::with_capacity(rest.len());
         let mut in_gap = false;
         for ch in rest.chars() {
            if ch == ' ' || ch == '\t' {
               if !in_gap {
                  collapsed.push(' ');
               }
               in_gap = true;
            } else {
               collapsed.push(ch);
               in_gap = false;
            }
         }

         format!("{indent}{collapsed}")
      })
      .collect();

   normalized.join("\n").trim_matches('\n').to_string()
}
