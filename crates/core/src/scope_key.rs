//! Hierarchical scope keys derived from normalized paths.
//!
//! Every segment is hashed independently into a fixed-width label and labels
//! are joined with `.`, so a child key is always `parent_key + "." + label`.
//! Subtree queries become prefix queries on the key column without storing
//! materialized path strings in the index.

use crate::path::NormalizedPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Reserved label for the root path `/`.
pub const ROOT_LABEL: &str = "root";

/// Separator between labels.
pub const SEPARATOR: char = '.';

/// Length of a segment label: `h` plus 16 hex characters.
pub const LABEL_LEN: usize = 17;

/// A hierarchical key such as `root.h1f2e....h9a0b...`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// The key of the root path.
    pub fn root() -> Self {
        Self(ROOT_LABEL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of a direct child with the given segment.
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}{}{}", self.0, SEPARATOR, PathKeyCodec::label(segment)))
    }

    /// Whether `self` equals `other` or is a strict ancestor of it.
    pub fn is_ancestor_or_self(&self, other: &ScopeKey) -> bool {
        other.0 == self.0
            || (other.0.len() > self.0.len()
                && other.0.starts_with(&self.0)
                && other.0.as_bytes()[self.0.len()] == SEPARATOR as u8)
    }

    /// Subtree exclusivity: two keys overlap if either one contains the other.
    pub fn overlaps(&self, other: &ScopeKey) -> bool {
        self.is_ancestor_or_self(other) || other.is_ancestor_or_self(self)
    }

    /// Number of labels below the root label.
    pub fn depth(&self) -> usize {
        self.0.matches(SEPARATOR).count()
    }
}

impl fmt::Debug for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeKey({})", self.0)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encodes normalized paths into [`ScopeKey`]s.
///
/// Labels use the 64-bit XXH3 hash of the raw segment bytes rendered as
/// 16 lowercase hex characters, so every label has the same width regardless
/// of segment length.
#[derive(Clone, Copy, Debug, Default)]
pub struct PathKeyCodec;

impl PathKeyCodec {
    /// Label for a single segment.
    pub fn label(segment: &str) -> String {
        format!("h{:016x}", xxh3_64(segment.as_bytes()))
    }

    /// Full key for a path.
    pub fn encode(path: &NormalizedPath) -> ScopeKey {
        path.segments()
            .iter()
            .fold(ScopeKey::root(), |key, segment| key.child(segment))
    }
}
