//! Core type definitions for LUKS2 metadata.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Shift converting bytes to 512-byte sectors.
pub const SECTOR_SHIFT: u32 = 9;

/// Sequence id stamped on every header slot write.
///
/// Higher sequence ids indicate later writes. The load protocol trusts the
/// valid slot with the highest id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceId(pub u64);

impl SequenceId {
    /// Creates a new sequence id.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Identifier of a segment within a metadata document.
///
/// On disk the id is the segment's key in the `segments` object: a decimal
/// string without sign or leading zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// Creates a new segment id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a segment key is not a canonical decimal id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSegmentIdError(String);

impl fmt::Display for ParseSegmentIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid segment id {:?}", self.0)
    }
}

impl std::error::Error for ParseSegmentIdError {}

impl FromStr for SegmentId {
    type Err = ParseSegmentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s == "0" || !s.starts_with('0'));
        if !canonical {
            return Err(ParseSegmentIdError(s.to_string()));
        }
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| ParseSegmentIdError(s.to_string()))
    }
}

impl Serialize for SegmentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for SegmentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SegmentIdVisitor;

        impl Visitor<'_> for SegmentIdVisitor {
            type Value = SegmentId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal segment id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<SegmentId, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(SegmentIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sequence_id_next() {
        let s1 = SequenceId::new(5);
        assert_eq!(s1.next().as_u64(), 6);
        assert!(s1 < s1.next());
    }

    #[test]
    fn sequence_id_next_saturates() {
        let top = SequenceId::new(u64::MAX);
        assert_eq!(top.next(), top);
    }

    #[test]
    fn segment_id_display_is_plain_decimal() {
        assert_eq!(SegmentId::new(42).to_string(), "42");
    }

    #[test]
    fn segment_id_parse_canonical() {
        assert_eq!("0".parse::<SegmentId>().unwrap(), SegmentId::new(0));
        assert_eq!("17".parse::<SegmentId>().unwrap(), SegmentId::new(17));
    }

    #[test]
    fn segment_id_parse_rejects_non_canonical() {
        for bad in ["", "01", "+1", "-1", " 1", "1a", "4294967296"] {
            assert!(bad.parse::<SegmentId>().is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn segment_id_json_key_roundtrip() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(SegmentId::new(3), true);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"3":true}"#);

        let back: std::collections::BTreeMap<SegmentId, bool> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn segment_id_display_parses_back(raw in any::<u32>()) {
            let id = SegmentId::new(raw);
            prop_assert_eq!(id.to_string().parse::<SegmentId>().unwrap(), id);
        }

        #[test]
        fn segment_id_rejects_leading_zeros(raw in 1u32.., zeros in 1usize..4) {
            let padded = format!("{}{raw}", "0".repeat(zeros));
            prop_assert!(padded.parse::<SegmentId>().is_err());
        }

        #[test]
        fn segment_id_parse_accepts_only_digits(text in "[0-9+ a-z-]{1,12}") {
            if let Ok(id) = text.parse::<SegmentId>() {
                prop_assert_eq!(id.to_string(), text);
            }
        }
    }
}
