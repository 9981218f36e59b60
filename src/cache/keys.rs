//! Structured cache keys and invalidation tags.
//!
//! Keys are colon-separated segments: `context:type:identifier[:subpart...]`,
//! for example `website:doc:bylaws:content`. Tags share the same character
//! rules but carry no structural meaning; they only group entries for bulk
//! removal.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a key or tag, in characters.
pub const MAX_KEY_LEN: usize = 512;
/// Minimum number of segments in a cache key.
pub const MIN_KEY_SEGMENTS: usize = 3;

const SEPARATOR: char = ':';

/// Reasons a key or tag fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheKeyError {
    #[error("cache key is empty")]
    Empty,
    #[error("cache key is {len} characters long, limit is {MAX_KEY_LEN}")]
    TooLong { len: usize },
    #[error("cache key has {found} segments, at least {MIN_KEY_SEGMENTS} are required")]
    TooFewSegments { found: usize },
    #[error("cache key segment {index} is empty")]
    EmptySegment { index: usize },
    #[error("cache key segment {index} contains `{character}`")]
    InvalidCharacter { index: usize, character: char },
}

/// A cache key built from known segments.
///
/// Construction through [`CacheKey::build`] does not validate; keys assembled
/// from trusted literals are accepted as-is and checked once by the store
/// before they reach a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Join the non-empty segments with `:`.
    pub fn build(context: &str, kind: &str, identifier: &str, parts: &[&str]) -> Self {
        let segments: Vec<&str> = [context, kind, identifier]
            .into_iter()
            .chain(parts.iter().copied())
            .filter(|segment| !segment.is_empty())
            .collect();
        Self(segments.join(":"))
    }

    /// Accept an externally supplied key only if it is well formed.
    pub fn parse(raw: &str) -> Result<Self, CacheKeyError> {
        validate(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), CacheKeyError> {
        validate(&self.0)
    }

    pub fn is_valid(&self) -> bool {
        is_valid(&self.0)
    }

    pub fn context(&self) -> &str {
        context(&self.0)
    }

    pub fn kind(&self) -> &str {
        kind(&self.0)
    }

    pub fn identifier(&self) -> &str {
        identifier(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A grouping label for bulk invalidation, e.g. `website:document:bylaws`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn parse(raw: &str) -> Result<Self, CacheKeyError> {
        validate_tag(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), CacheKeyError> {
        validate_tag(&self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check a raw key against the format rules.
pub fn validate(key: &str) -> Result<(), CacheKeyError> {
    let found = check_segments(key)?;
    if found < MIN_KEY_SEGMENTS {
        return Err(CacheKeyError::TooFewSegments { found });
    }
    Ok(())
}

pub fn is_valid(key: &str) -> bool {
    validate(key).is_ok()
}

/// Tags follow the key charset but may have any number of segments.
pub fn validate_tag(tag: &str) -> Result<(), CacheKeyError> {
    check_segments(tag).map(|_| ())
}

/// Segment 0, or `""` when the key has fewer than three segments.
pub fn context(key: &str) -> &str {
    segment(key, 0)
}

/// Segment 1, or `""` when the key has fewer than three segments.
pub fn kind(key: &str) -> &str {
    segment(key, 1)
}

/// Segment 2, or `""` when the key has fewer than three segments.
pub fn identifier(key: &str) -> &str {
    segment(key, 2)
}

fn segment(key: &str, index: usize) -> &str {
    if key.split(SEPARATOR).count() < MIN_KEY_SEGMENTS {
        return "";
    }
    key.split(SEPARATOR).nth(index).unwrap_or("")
}

fn check_segments(value: &str) -> Result<usize, CacheKeyError> {
    if value.is_empty() {
        return Err(CacheKeyError::Empty);
    }

    let len = value.chars().count();
    if len > MAX_KEY_LEN {
        return Err(CacheKeyError::TooLong { len });
    }

    let mut found = 0;
    for (index, segment) in value.split(SEPARATOR).enumerate() {
        if segment.is_empty() {
            return Err(CacheKeyError::EmptySegment { index });
        }
        if let Some(character) = segment.chars().find(|c| !is_segment_char(*c)) {
            return Err(CacheKeyError::InvalidCharacter { index, character });
        }
        found += 1;
    }

    Ok(found)
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}
