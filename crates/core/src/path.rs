//! Normalized absolute paths in the store namespace.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Maximum length of a single path segment in bytes.
pub const MAX_SEGMENT_LEN: usize = 255;

/// An absolute, normalized path such as `/clients/42/report.pdf`.
///
/// Duplicate and trailing slashes are collapsed on parse. Empty, `.` and `..`
/// segments are rejected since paths are immutable once created and never
/// re-parented. The root path is `/` and has no segments.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath {
    segments: Vec<String>,
}

impl NormalizedPath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse and normalize a path string.
    pub fn parse(path: &str) -> crate::Result<Self> {
        if !path.starts_with('/') {
            return Err(crate::Error::InvalidPath(format!(
                "path must be absolute: {path:?}"
            )));
        }

        let mut segments = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            validate_segment(segment)?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Build a path from already split segments.
    pub fn from_segments<I, S>(segments: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for segment in segments {
            let segment = segment.into();
            validate_segment(&segment)?;
            out.push(segment);
        }
        Ok(Self { segments: out })
    }

    /// Append one segment, returning the child path.
    pub fn join(&self, segment: &str) -> crate::Result<Self> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// The last segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Path segments from the root downwards.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments below the root.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, other: &NormalizedPath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Render as a `/`-separated string.
    pub fn as_string(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            out.push_str(segment);
        }
        out
    }
}

fn validate_segment(segment: &str) -> crate::Result<()> {
    if segment.is_empty() {
        return Err(crate::Error::InvalidPath(
            "path segment cannot be empty".to_string(),
        ));
    }
    if segment == "." || segment == ".." {
        return Err(crate::Error::InvalidPath(format!(
            "relative segment not allowed: {segment}"
        )));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(crate::Error::InvalidPath(format!(
            "path segment exceeds {MAX_SEGMENT_LEN} bytes"
        )));
    }
    if let Some(c) = segment.chars().find(|c| *c == '/' || c.is_control()) {
        return Err(crate::Error::InvalidPath(format!(
            "invalid character in path segment: {c:?}"
        )));
    }
    Ok(())
}

impl std::str::FromStr for NormalizedPath {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NormalizedPath({})", self.as_string())
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl Serialize for NormalizedPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_string())
    }
}

impl<'de> Deserialize<'de> for NormalizedPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
