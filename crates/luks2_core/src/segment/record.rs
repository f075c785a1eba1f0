//! Segment descriptors.

use crate::error::{CoreError, CoreResult};
use crate::segment::flags::{SegmentFlag, SegmentFlags};
use crate::types::SECTOR_SHIFT;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Cipher reported for segments that carry no encryption.
///
/// A pseudo-value, not a real cipher specification.
pub const NULL_CIPHER: &str = "null";

/// On-disk marker for a size that extends to the end of the device.
pub const DYNAMIC_SIZE: &str = "dynamic";

/// Kind of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentType {
    /// Passthrough range without encryption.
    Linear,
    /// Encrypted range.
    Crypt,
}

impl SegmentType {
    /// Returns the on-disk type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Crypt => "crypt",
        }
    }
}

impl FromStr for SegmentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "crypt" => Ok(Self::Crypt),
            "" => Err(CoreError::invalid_argument("segment type is empty")),
            other => Err(CoreError::invalid_metadata(format!(
                "unknown segment type {other:?}"
            ))),
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Length of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentSize {
    /// Fixed length in bytes.
    Fixed(u64),
    /// Extends to the end of the device.
    Dynamic,
}

impl SegmentSize {
    /// Returns the length in bytes; dynamic sizes report 0.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Fixed(n) => n,
            Self::Dynamic => 0,
        }
    }

    /// Returns true for [`SegmentSize::Dynamic`].
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::Dynamic)
    }
}

impl From<Option<u64>> for SegmentSize {
    fn from(length: Option<u64>) -> Self {
        length.map_or(Self::Dynamic, Self::Fixed)
    }
}

/// Type-specific segment parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// Passthrough range.
    Linear,
    /// Encrypted range. Absent fields resolve through the accessors on
    /// [`Segment`].
    Crypt {
        /// IV tweak base.
        iv_offset: Option<u64>,
        /// Cipher specification, e.g. `aes-xts-plain64`.
        cipher: Option<String>,
        /// Encryption sector size in bytes.
        sector_size: Option<u32>,
    },
}

/// One contiguous extent of the encrypted container.
///
/// Converted to and from its JSON object form only at the serialization
/// boundary. Keys the schema does not know are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSegment", into = "RawSegment")]
pub struct Segment {
    offset: u64,
    size: SegmentSize,
    kind: SegmentKind,
    flags: SegmentFlags,
    extra: Map<String, Value>,
}

impl Segment {
    /// Creates a linear segment. `None` length makes the size dynamic.
    #[must_use]
    pub fn linear(offset: u64, length: Option<u64>) -> Self {
        Self {
            offset,
            size: length.into(),
            kind: SegmentKind::Linear,
            flags: SegmentFlags::new(),
            extra: Map::new(),
        }
    }

    /// Creates a crypt segment. `None` length makes the size dynamic.
    #[must_use]
    pub fn crypt(
        offset: u64,
        iv_offset: u64,
        length: Option<u64>,
        cipher: &str,
        sector_size: u32,
    ) -> Self {
        Self {
            offset,
            size: length.into(),
            kind: SegmentKind::Crypt {
                iv_offset: Some(iv_offset),
                cipher: Some(cipher.to_string()),
                sector_size: Some(sector_size),
            },
            flags: SegmentFlags::new(),
            extra: Map::new(),
        }
    }

    /// Returns the offset in bytes, or in sectors when `blockwise`.
    #[must_use]
    pub fn offset(&self, blockwise: bool) -> u64 {
        if blockwise {
            self.offset >> SECTOR_SHIFT
        } else {
            self.offset
        }
    }

    /// Returns the size in bytes, or in sectors when `blockwise`.
    ///
    /// Dynamic segments report 0.
    #[must_use]
    pub fn size(&self, blockwise: bool) -> u64 {
        let bytes = self.size.bytes();
        if blockwise {
            bytes >> SECTOR_SHIFT
        } else {
            bytes
        }
    }

    /// Returns the declared size.
    #[must_use]
    pub fn size_spec(&self) -> SegmentSize {
        self.size
    }

    /// Returns the segment type.
    #[must_use]
    pub fn segment_type(&self) -> SegmentType {
        match self.kind {
            SegmentKind::Linear => SegmentType::Linear,
            SegmentKind::Crypt { .. } => SegmentType::Crypt,
        }
    }

    /// Returns true if the on-disk type name equals `name`.
    #[must_use]
    pub fn is_type(&self, name: &str) -> bool {
        self.segment_type().as_str() == name
    }

    /// Returns the type-specific parameters.
    #[must_use]
    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    /// Returns the IV tweak base, 0 when absent.
    #[must_use]
    pub fn iv_offset(&self) -> u64 {
        match &self.kind {
            SegmentKind::Crypt { iv_offset, .. } => iv_offset.unwrap_or(0),
            SegmentKind::Linear => 0,
        }
    }

    /// Returns the cipher specification, [`NULL_CIPHER`] when absent.
    #[must_use]
    pub fn cipher(&self) -> &str {
        match &self.kind {
            SegmentKind::Crypt {
                cipher: Some(cipher),
                ..
            } => cipher,
            _ => NULL_CIPHER,
        }
    }

    /// Returns the encryption sector size, -1 when absent.
    #[must_use]
    pub fn sector_size(&self) -> i32 {
        match &self.kind {
            SegmentKind::Crypt {
                sector_size: Some(size),
                ..
            } => i32::try_from(*size).unwrap_or(-1),
            _ => -1,
        }
    }

    /// Returns the flags, or `None` when the segment has none.
    #[must_use]
    pub fn flags(&self) -> Option<&SegmentFlags> {
        if self.flags.is_empty() {
            None
        } else {
            Some(&self.flags)
        }
    }

    /// Returns true if the tag `flag` is set.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains_tag(flag)
    }

    /// Returns true if the segment is re-encryption bookkeeping rather
    /// than live data.
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.flags.has_bookkeeping()
    }

    /// Adds the tag `flag`. Adding a present tag succeeds without change.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an empty tag and
    /// [`CoreError::OutOfMemory`] if the flag set cannot grow.
    pub fn set_flag(&mut self, flag: &str) -> CoreResult<()> {
        let flag: SegmentFlag = flag.parse()?;
        self.flags.insert(flag)?;
        Ok(())
    }

    /// Removes the tag `flag` if present.
    ///
    /// Removing the last tag drops the `flags` key from the serialized form.
    pub fn remove_flag(&mut self, flag: &str) {
        self.flags.remove(&SegmentFlag::from(flag));
    }
}

/// JSON object form of a segment.
#[derive(Serialize, Deserialize)]
struct RawSegment {
    #[serde(rename = "type")]
    kind: String,
    offset: String,
    size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iv_tweak: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encryption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sector_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    flags: Vec<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Parses a decimal 64-bit value stored as a JSON string.
fn parse_u64(field: &str, text: &str) -> CoreResult<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::invalid_metadata(format!(
            "segment {field} {text:?} is not a decimal value"
        )));
    }
    text.parse().map_err(|_| {
        CoreError::invalid_metadata(format!("segment {field} {text:?} overflows"))
    })
}

impl TryFrom<RawSegment> for Segment {
    type Error = CoreError;

    fn try_from(raw: RawSegment) -> CoreResult<Self> {
        let offset = parse_u64("offset", &raw.offset)?;
        let size = if raw.size == DYNAMIC_SIZE {
            SegmentSize::Dynamic
        } else {
            SegmentSize::Fixed(parse_u64("size", &raw.size)?)
        };

        let mut extra = raw.extra;
        let kind = match raw.kind.parse::<SegmentType>()? {
            SegmentType::Crypt => SegmentKind::Crypt {
                iv_offset: raw
                    .iv_tweak
                    .as_deref()
                    .map(|v| parse_u64("iv_tweak", v))
                    .transpose()?,
                cipher: raw.encryption,
                sector_size: raw.sector_size,
            },
            SegmentType::Linear => {
                // Crypt-only keys on a linear segment are kept verbatim
                if let Some(v) = raw.iv_tweak {
                    extra.insert("iv_tweak".to_string(), Value::String(v));
                }
                if let Some(v) = raw.encryption {
                    extra.insert("encryption".to_string(), Value::String(v));
                }
                if let Some(v) = raw.sector_size {
                    extra.insert("sector_size".to_string(), Value::from(v));
                }
                SegmentKind::Linear
            }
        };

        Ok(Self {
            offset,
            size,
            kind,
            flags: SegmentFlags::from_tags(&raw.flags),
            extra,
        })
    }
}

impl From<Segment> for RawSegment {
    fn from(segment: Segment) -> Self {
        let kind = segment.segment_type();
        let size = match segment.size {
            SegmentSize::Fixed(n) => n.to_string(),
            SegmentSize::Dynamic => DYNAMIC_SIZE.to_string(),
        };
        let (iv_tweak, encryption, sector_size) = match segment.kind {
            SegmentKind::Crypt {
                iv_offset,
                cipher,
                sector_size,
            } => (iv_offset.map(|v| v.to_string()), cipher, sector_size),
            SegmentKind::Linear => (None, None, None),
        };

        Self {
            kind: kind.as_str().to_string(),
            offset: segment.offset.to_string(),
            size,
            iv_tweak,
            encryption,
            sector_size,
            flags: segment.flags.to_tags(),
            extra: segment.extra,
        }
    }
}
