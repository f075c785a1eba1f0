//! Volume metadata document.
//!
//! The document area of a header slot holds one JSON object. Its
//! `segments` section is parsed into the typed [`Segments`] store; every
//! other section (`keyslots`, `tokens`, `digests`, `config`, ...) is kept
//! as an opaque JSON value and written back unchanged.

use crate::error::{CoreError, CoreResult};
use crate::segment::{FindMode, Segment, Segments};
use crate::types::SegmentId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the segments section.
pub const SEGMENTS_SECTION: &str = "segments";

/// In-memory metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    segments: Option<Segments>,
    #[serde(flatten)]
    sections: Map<String, Value>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

impl Metadata {
    /// Creates a document with an empty segments section.
    #[must_use]
    pub fn new() -> Self {
        Self::with_segments(Segments::new())
    }

    /// Creates a document holding `segments`.
    #[must_use]
    pub fn with_segments(segments: Segments) -> Self {
        Self {
            segments: Some(segments),
            sections: Map::new(),
        }
    }

    /// Parses a document area.
    ///
    /// The text ends at the first zero byte; the area may be padded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidMetadata`] if the text is empty, not
    /// UTF-8, not a JSON object, or breaks a segment invariant.
    pub fn parse(area: &[u8]) -> CoreResult<Self> {
        let end = area.iter().position(|&b| b == 0).unwrap_or(area.len());
        let text = std::str::from_utf8(&area[..end])
            .map_err(|e| CoreError::invalid_metadata(format!("document is not UTF-8: {e}")))?;
        if text.trim().is_empty() {
            return Err(CoreError::invalid_metadata("document area is empty"));
        }

        let metadata: Self = serde_json::from_str(text)?;
        if let Some(segments) = &metadata.segments {
            segments.validate(None)?;
        }
        Ok(metadata)
    }

    /// Serializes the document to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Returns an opaque section by name.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    /// Sets an opaque section, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an empty name or for
    /// `segments`, which only changes through [`Metadata::replace_segments`].
    pub fn set_section(&mut self, name: &str, value: Value) -> CoreResult<Option<Value>> {
        if name.is_empty() || name == SEGMENTS_SECTION {
            return Err(CoreError::invalid_argument(format!(
                "cannot set section {name:?}"
            )));
        }
        Ok(self.sections.insert(name.to_string(), value))
    }

    /// Returns the segments section, if the document has one.
    #[must_use]
    pub fn segments(&self) -> Option<&Segments> {
        self.segments.as_ref()
    }

    /// Returns the segments section for mutation.
    pub fn segments_mut(&mut self) -> Option<&mut Segments> {
        self.segments.as_mut()
    }

    /// Swaps in a whole new segments collection, returning the old one.
    pub fn replace_segments(&mut self, segments: Segments) -> Option<Segments> {
        self.segments.replace(segments)
    }

    /// Returns the raw segment count.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the document has no
    /// segments section.
    pub fn count_segments(&self) -> CoreResult<usize> {
        self.segments
            .as_ref()
            .map(Segments::len)
            .ok_or_else(|| CoreError::invalid_argument("document has no segments"))
    }

    /// Returns segment `id`.
    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.as_ref()?.get(id)
    }

    /// Returns segment `id` for mutation.
    pub fn segment_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        self.segments.as_mut()?.get_mut(id)
    }

    /// Smallest segment offset; the largest representable value without
    /// segments.
    #[must_use]
    pub fn minimal_offset(&self, blockwise: bool) -> u64 {
        self.segments.as_ref().map_or_else(
            || Segments::new().minimal_offset(blockwise),
            |segments| segments.minimal_offset(blockwise),
        )
    }

    /// Returns the id the next new segment should take.
    #[must_use]
    pub fn first_unused_segment_id(&self) -> SegmentId {
        self.segments
            .as_ref()
            .map_or(SegmentId::new(0), Segments::first_unused_id)
    }

    /// Finds a live segment of type `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `type_name` is empty.
    pub fn find_segment_by_type(
        &self,
        type_name: &str,
        mode: FindMode,
    ) -> CoreResult<Option<SegmentId>> {
        match &self.segments {
            Some(segments) => segments.find_by_type(type_name, mode),
            None if type_name.is_empty() => {
                Err(CoreError::invalid_argument("segment type is empty"))
            }
            None => Ok(None),
        }
    }

    /// Lowest id of a live segment of type `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `type_name` is empty.
    pub fn segment_by_type(&self, type_name: &str) -> CoreResult<Option<SegmentId>> {
        self.find_segment_by_type(type_name, FindMode::First)
    }

    /// Highest id of a live segment of type `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `type_name` is empty.
    pub fn last_segment_by_type(&self, type_name: &str) -> CoreResult<Option<SegmentId>> {
        self.find_segment_by_type(type_name, FindMode::Last)
    }

    /// First segment carrying `flag`, with its id.
    #[must_use]
    pub fn find_segment_by_flag(&self, flag: &str) -> Option<(SegmentId, &Segment)> {
        self.segments.as_ref()?.find_by_flag(flag)
    }

    /// Id of the first segment carrying `flag`.
    #[must_use]
    pub fn segment_id_by_flag(&self, flag: &str) -> Option<SegmentId> {
        self.segments.as_ref()?.id_by_flag(flag)
    }

    /// First segment carrying `flag`.
    #[must_use]
    pub fn segment_by_flag(&self, flag: &str) -> Option<&Segment> {
        self.segments.as_ref()?.segment_by_flag(flag)
    }

    /// Id of the segment under re-encryption.
    #[must_use]
    pub fn segment_in_reencryption(&self) -> Option<SegmentId> {
        self.segments.as_ref()?.in_reencryption()
    }

    /// Bookkeeping segments re-keyed from 0; `None` without a segments
    /// section.
    #[must_use]
    pub fn ignored_segments(&self) -> Option<Segments> {
        self.segments.as_ref().map(Segments::ignored)
    }

    /// Offset of segment `id`; 0 when the segment does not exist.
    #[must_use]
    pub fn segment_offset(&self, id: SegmentId, blockwise: bool) -> u64 {
        self.segment(id).map_or(0, |s| s.offset(blockwise))
    }

    /// Size of segment `id`; 0 when the segment does not exist or is
    /// dynamic.
    #[must_use]
    pub fn segment_size(&self, id: SegmentId, blockwise: bool) -> u64 {
        self.segment(id).map_or(0, |s| s.size(blockwise))
    }

    /// Returns true if segment `id` exists and has type `type_name`.
    #[must_use]
    pub fn segment_is_type(&self, id: SegmentId, type_name: &str) -> bool {
        self.segment(id).is_some_and(|s| s.is_type(type_name))
    }

    /// Pretty-printed segments section for debug output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn dump_segments(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(&self.segments)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "keyslots": {},
            "tokens": {},
            "segments": {
                "0": {
                    "type": "crypt",
                    "offset": "16777216",
                    "size": "dynamic",
                    "iv_tweak": "0",
                    "encryption": "aes-xts-plain64",
                    "sector_size": 512
                },
                "1": {
                    "type": "linear",
                    "offset": "8388608",
                    "size": "8388608",
                    "flags": ["reencrypt-moved-segment"]
                }
            },
            "digests": {},
            "config": {"json_size": "12288", "keyslots_size": "16744448"}
        })
    }

    fn parse(value: &Value) -> Metadata {
        Metadata::parse(&serde_json::to_vec(value).unwrap()).unwrap()
    }

    #[test]
    fn parse_stops_at_padding() {
        let mut area = serde_json::to_vec(&document()).unwrap();
        area.resize(area.len() + 512, 0);

        let metadata = Metadata::parse(&area).unwrap();
        assert_eq!(metadata.count_segments().unwrap(), 2);
    }

    #[test]
    fn parse_empty_area_fails() {
        assert!(matches!(
            Metadata::parse(&[0u8; 64]),
            Err(CoreError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn parse_non_object_fails() {
        assert!(Metadata::parse(b"[1, 2, 3]").is_err());
        assert!(Metadata::parse(b"{\"segments\": ").is_err());
    }

    #[test]
    fn opaque_sections_roundtrip() {
        let metadata = parse(&document());
        let back: Value = serde_json::from_slice(&metadata.to_json().unwrap()).unwrap();
        assert_eq!(back, document());
        assert_eq!(metadata.section("config").unwrap()["json_size"], "12288");
    }

    #[test]
    fn ignored_segments_follow_numeric_order() {
        let area = br#"{"segments": {
            "5": {"type": "linear", "offset": "8388608", "size": "4096",
                  "flags": ["reencrypt-final"]},
            "1": {"type": "linear", "offset": "4194304", "size": "4096",
                  "flags": ["reencrypt-previous"]}
        }}"#;
        let metadata = Metadata::parse(area).unwrap();

        let ignored = metadata.ignored_segments().unwrap();
        assert_eq!(ignored.len(), 2);
        assert_eq!(ignored.get(SegmentId::new(0)).unwrap().offset(false), 4_194_304);
        assert_eq!(ignored.get(SegmentId::new(1)).unwrap().offset(false), 8_388_608);
    }

    #[test]
    fn set_section_refuses_segments() {
        let mut metadata = Metadata::new();
        assert!(metadata.set_section("segments", json!({})).is_err());
        assert!(metadata.set_section("", json!({})).is_err());
        assert!(metadata.set_section("tokens", json!({})).unwrap().is_none());
    }

    #[test]
    fn missing_segments_section() {
        let metadata = parse(&json!({"keyslots": {}}));

        assert!(metadata.segments().is_none());
        assert!(matches!(
            metadata.count_segments(),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert_eq!(metadata.minimal_offset(false), u64::MAX);
        assert_eq!(metadata.first_unused_segment_id(), SegmentId::new(0));
        assert_eq!(metadata.segment_by_type("crypt").unwrap(), None);
        assert!(metadata.ignored_segments().is_none());
        assert_eq!(metadata.segment_in_reencryption(), None);
    }

    #[test]
    fn type_queries_skip_bookkeeping() {
        let metadata = parse(&document());

        assert_eq!(metadata.segment_by_type("crypt").unwrap(), Some(SegmentId::new(0)));
        assert_eq!(metadata.last_segment_by_type("linear").unwrap(), None);
        assert!(metadata.segment_by_type("").is_err());
        assert_eq!(metadata.count_segments().unwrap(), 2);
    }

    #[test]
    fn header_level_accessors() {
        let metadata = parse(&document());

        assert_eq!(metadata.segment_offset(SegmentId::new(0), false), 16_777_216);
        assert_eq!(metadata.segment_offset(SegmentId::new(0), true), 32_768);
        assert_eq!(metadata.segment_size(SegmentId::new(1), true), 16_384);
        assert_eq!(metadata.segment_size(SegmentId::new(0), false), 0);
        assert_eq!(metadata.segment_offset(SegmentId::new(9), false), 0);
        assert!(metadata.segment_is_type(SegmentId::new(1), "linear"));
        assert!(!metadata.segment_is_type(SegmentId::new(9), "linear"));
        assert_eq!(metadata.minimal_offset(false), 8_388_608);
    }

    #[test]
    fn flag_lookup_through_document() {
        let metadata = parse(&document());

        assert_eq!(
            metadata.segment_id_by_flag("reencrypt-moved-segment"),
            Some(SegmentId::new(1))
        );
        let (id, segment) = metadata
            .find_segment_by_flag("reencrypt-moved-segment")
            .unwrap();
        assert_eq!(id, SegmentId::new(1));
        assert_eq!(metadata.segment_by_flag("reencrypt-moved-segment"), Some(segment));

        let ignored = metadata.ignored_segments().unwrap();
        assert_eq!(ignored.len(), 1);
        assert!(ignored.get(SegmentId::new(0)).unwrap().is_ignored());
    }

    #[test]
    fn replace_segments_swaps_whole_collection() {
        let mut metadata = parse(&document());
        let mut fresh = Segments::new();
        fresh.push(Segment::linear(1 << 20, None)).unwrap();

        let old = metadata.replace_segments(fresh).unwrap();
        assert_eq!(old.len(), 2);
        assert_eq!(metadata.count_segments().unwrap(), 1);
    }

    #[test]
    fn duplicate_reencryption_rejected_on_parse() {
        let value = json!({
            "segments": {
                "0": {"type": "linear", "offset": "4096", "size": "4096", "flags": ["in-reencryption"]},
                "1": {"type": "linear", "offset": "8192", "size": "4096", "flags": ["in-reencryption"]}
            }
        });
        assert!(Metadata::parse(&serde_json::to_vec(&value).unwrap()).is_err());
    }

    #[test]
    fn leading_zero_segment_key_rejected() {
        let value = json!({
            "segments": {
                "01": {"type": "linear", "offset": "4096", "size": "dynamic"}
            }
        });
        assert!(Metadata::parse(&serde_json::to_vec(&value).unwrap()).is_err());
    }

    #[test]
    fn dump_segments_is_pretty_json() {
        let metadata = parse(&document());
        let dump = metadata.dump_segments().unwrap();
        assert!(dump.contains('\n'));
        assert!(dump.contains("\"aes-xts-plain64\""));
    }
}
