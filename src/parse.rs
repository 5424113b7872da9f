//! Symbol extraction seam.
//!
//! Real deployments plug a language-aware parser in behind [`Parser`]; the
//! engine itself only needs the complete symbol list for a file. The
//! built-in [`MarkerParser`] understands an explicit marker syntax, which
//! keeps local runs and the integration tests deterministic without pulling
//! a parsing stack into this crate.

use std::sync::OnceLock;

use regex::Regex;

use crate::{
   error::ParseError,
   types::{Symbol, SymbolKind},
};

/// Extracts the complete list of symbols from one file's source
pub trait Parser: Send + Sync {
   fn parse(&self, path: &str, source: &str) -> Result<Vec<Symbol>, ParseError>;
}

/// Deterministic marker-based parser.
///
/// A line of the form `#: <kind> <qualified_name>` starts a symbol; its
/// source runs until the next marker or end of file. A file without markers
/// yields a single module-level symbol covering the whole file, so plain
/// sources still sync as one unit.
#[derive(Default)]
pub struct MarkerParser;

fn marker_re() -> &'static Regex {
   static RE: OnceLock<Regex> = OnceLock::new();
   RE.get_or_init(|| Regex::new(r"^\s*#:\s*(\w+)\s+(\S+)\s*$").unwrap())
}

impl Parser for MarkerParser {
   fn parse(&self, path: &str, source: &str) -> Result<Vec<Symbol>, ParseError> {
      if source.trim().is_empty() {
         return Ok(Vec::new());
      }

      let mut symbols: Vec<Symbol> = Vec::new();
      let mut current: Option<(SymbolKind, String, Vec<&str>)> = None;

      for line in source.lines() {
         if let Some(caps) = marker_re().captures(line) {
            if let Some((kind, name, body)) = current.take() {
               symbols.push(finish(path, kind, name, body)?);
            }
            let kind = parse_kind(&caps[1]);
            current = Some((kind, caps[2].to_string(), Vec::new()));
         } else if let Some((_, _, body)) = current.as_mut() {
            body.push(line);
         }
      }

      if let Some((kind, name, body)) = current.take() {
         symbols.push(finish(path, kind, name, body)?);
      }

      if symbols.is_empty() {
         // No markers: the whole file is one module-level symbol.
         symbols.push(Symbol {
            qualified_name: "<module>".to_string(),
            source:         source.to_string(),
            kind:           SymbolKind::Module,
         });
      }

      Ok(symbols)
   }
}

fn parse_kind(raw: &str) -> SymbolKind {
   match raw {
      "function" | "fn" => SymbolKind::Function,
      "class" => SymbolKind::Class,
      "method" => SymbolKind::Method,
      "module" => SymbolKind::Module,
      _ => SymbolKind::Other,
   }
}

fn finish(
   path: &str,
   kind: SymbolKind,
   qualified_name: String,
   body: Vec<&str>,
) -> Result<Symbol, ParseError> {
   let source = body.join("\n");
   if source.trim().is_empty() {
      return Err(ParseError::Malformed {
         path:   path.to_string(),
         reason: format!("symbol '{qualified_name}' has an empty body"),
      });
   }
   Ok(Symbol { qualified_name, source, kind })
}
