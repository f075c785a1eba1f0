//! Segment flag tags.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::str::FromStr;

/// Prefix marking re-encryption bookkeeping tags.
pub const REENCRYPT_PREFIX: &str = "reencrypt-";

/// A flag attached to a segment.
///
/// Unrecognized tags survive a load/commit cycle as [`SegmentFlag::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SegmentFlag {
    /// The segment is the live target of an ongoing re-encryption.
    InReencryption,
    /// Old-key copy of data kept while re-encrypting.
    ReencryptPrevious,
    /// Final layout the re-encryption converges to.
    ReencryptFinal,
    /// Data moved aside to make room for the header.
    ReencryptMovedSegment,
    /// Any other tag.
    Other(String),
}

impl SegmentFlag {
    /// Returns the on-disk tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::InReencryption => "in-reencryption",
            Self::ReencryptPrevious => "reencrypt-previous",
            Self::ReencryptFinal => "reencrypt-final",
            Self::ReencryptMovedSegment => "reencrypt-moved-segment",
            Self::Other(tag) => tag,
        }
    }

    /// Returns true for re-encryption bookkeeping tags.
    ///
    /// Segments carrying one are not live data and are skipped by type
    /// queries.
    #[must_use]
    pub fn is_reencrypt_bookkeeping(&self) -> bool {
        match self {
            Self::ReencryptPrevious | Self::ReencryptFinal | Self::ReencryptMovedSegment => true,
            Self::InReencryption => false,
            Self::Other(tag) => tag.starts_with(REENCRYPT_PREFIX),
        }
    }
}

impl From<&str> for SegmentFlag {
    fn from(tag: &str) -> Self {
        match tag {
            "in-reencryption" => Self::InReencryption,
            "reencrypt-previous" => Self::ReencryptPrevious,
            "reencrypt-final" => Self::ReencryptFinal,
            "reencrypt-moved-segment" => Self::ReencryptMovedSegment,
            other => Self::Other(other.to_string()),
        }
    }
}

impl FromStr for SegmentFlag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(CoreError::invalid_argument("flag name is empty"));
        }
        Ok(Self::from(s))
    }
}

impl fmt::Display for SegmentFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insertion-ordered, duplicate-free set of segment flags.
///
/// Whether any flag is re-encryption bookkeeping is computed on every
/// mutation and cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentFlags {
    flags: Vec<SegmentFlag>,
    bookkeeping: bool,
}

impl SegmentFlags {
    /// Creates an empty flag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a flag set from on-disk tags, dropping repeats.
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags: Vec<SegmentFlag> = Vec::new();
        for tag in tags {
            let flag = SegmentFlag::from(tag.as_ref());
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
        let bookkeeping = flags.iter().any(SegmentFlag::is_reencrypt_bookkeeping);
        Self { flags, bookkeeping }
    }

    /// Returns the number of flags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Returns true if no flag is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Returns true if `flag` is set.
    #[must_use]
    pub fn contains(&self, flag: &SegmentFlag) -> bool {
        self.flags.contains(flag)
    }

    /// Returns true if the tag `name` is set.
    #[must_use]
    pub fn contains_tag(&self, name: &str) -> bool {
        self.flags.iter().any(|f| f.as_str() == name)
    }

    /// Returns true if any flag is re-encryption bookkeeping.
    #[must_use]
    pub fn has_bookkeeping(&self) -> bool {
        self.bookkeeping
    }

    /// Adds `flag` at the end. Adding a present flag is a no-op.
    ///
    /// Returns whether the flag was newly added.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfMemory`] if the set cannot grow.
    pub fn insert(&mut self, flag: SegmentFlag) -> CoreResult<bool> {
        if self.flags.contains(&flag) {
            return Ok(false);
        }
        self.flags
            .try_reserve(1)
            .map_err(|_| CoreError::OutOfMemory)?;
        self.bookkeeping |= flag.is_reencrypt_bookkeeping();
        self.flags.push(flag);
        Ok(true)
    }

    /// Removes `flag`, returning whether it was present.
    pub fn remove(&mut self, flag: &SegmentFlag) -> bool {
        let before = self.flags.len();
        self.flags.retain(|f| f != flag);
        let removed = self.flags.len() != before;
        if removed {
            self.bookkeeping = self.flags.iter().any(SegmentFlag::is_reencrypt_bookkeeping);
        }
        removed
    }

    /// Iterates flags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SegmentFlag> {
        self.flags.iter()
    }

    /// Returns the on-disk tags in insertion order.
    #[must_use]
    pub fn to_tags(&self) -> Vec<String> {
        self.flags.iter().map(|f| f.as_str().to_string()).collect()
    }
}
