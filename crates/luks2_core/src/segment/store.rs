//! Typed view over the `segments` collection.

use crate::error::{CoreError, CoreResult};
use crate::segment::flags::SegmentFlag;
use crate::segment::record::{Segment, SegmentKind, SegmentSize, SegmentType};
use crate::types::{SegmentId, SECTOR_SHIFT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smallest encryption sector size.
pub const MIN_SECTOR_SIZE: u32 = 512;

/// Largest encryption sector size.
pub const MAX_SECTOR_SIZE: u32 = 4096;

/// Which end of the id range a type query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    /// Lowest matching id.
    First,
    /// Highest matching id.
    Last,
}

/// Ordered mapping from segment id to segment.
///
/// Iteration runs in ascending numeric id order, which is the deterministic
/// order every "first match" query uses.
///
/// The store does no locking. Mutations take `&mut self`, so callers
/// sharing a collection across threads serialize them the usual way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Segments {
    entries: BTreeMap<SegmentId, Segment>,
}

impl Segments {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of segments, bookkeeping segments included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the collection holds no segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the segment stored under `id`.
    #[must_use]
    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.entries.get(&id)
    }

    /// Returns the segment stored under `id` for mutation.
    pub fn get_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        self.entries.get_mut(&id)
    }

    /// Stores `segment` under `id`, returning the segment it replaced.
    pub fn insert(&mut self, id: SegmentId, segment: Segment) -> Option<Segment> {
        self.entries.insert(id, segment)
    }

    /// Stores `segment` under the first unused id and returns that id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the id space is exhausted.
    pub fn push(&mut self, segment: Segment) -> CoreResult<SegmentId> {
        let id = self.first_unused_id();
        if self.entries.contains_key(&id) {
            return Err(CoreError::invalid_operation("segment id space exhausted"));
        }
        self.entries.insert(id, segment);
        Ok(id)
    }

    /// Removes and returns the segment stored under `id`.
    pub fn remove(&mut self, id: SegmentId) -> Option<Segment> {
        self.entries.remove(&id)
    }

    /// Iterates segments in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &Segment)> {
        self.entries.iter().map(|(id, segment)| (*id, segment))
    }

    /// Returns the smallest segment offset, in sectors when `blockwise`.
    ///
    /// A segment at offset 0 ends the scan immediately. An empty collection
    /// yields the largest representable value for the requested unit.
    #[must_use]
    pub fn minimal_offset(&self, blockwise: bool) -> u64 {
        let mut min = if blockwise {
            u64::MAX >> SECTOR_SHIFT
        } else {
            u64::MAX
        };

        for segment in self.entries.values() {
            let offset = segment.offset(blockwise);
            if offset == 0 {
                return 0;
            }
            min = min.min(offset);
        }

        min
    }

    /// Returns the highest id plus one, or 0 for an empty collection.
    #[must_use]
    pub fn first_unused_id(&self) -> SegmentId {
        self.entries
            .keys()
            .next_back()
            .map_or(SegmentId::new(0), |last| {
                SegmentId::new(last.as_u32().saturating_add(1))
            })
    }

    /// Finds the lowest or highest id of a live segment named `type_name`.
    ///
    /// Bookkeeping segments never match.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `type_name` is empty.
    pub fn find_by_type(&self, type_name: &str, mode: FindMode) -> CoreResult<Option<SegmentId>> {
        if type_name.is_empty() {
            return Err(CoreError::invalid_argument("segment type is empty"));
        }
        let mut matching = self
            .iter()
            .filter(|(_, segment)| !segment.is_ignored() && segment.is_type(type_name))
            .map(|(id, _)| id);

        Ok(match mode {
            FindMode::First => matching.next(),
            FindMode::Last => matching.last(),
        })
    }

    /// Typed form of [`Segments::find_by_type`].
    #[must_use]
    pub fn find_by_kind(&self, kind: SegmentType, mode: FindMode) -> Option<SegmentId> {
        self.find_by_type(kind.as_str(), mode).ok().flatten()
    }

    /// Returns the first segment carrying the tag `flag`.
    #[must_use]
    pub fn find_by_flag(&self, flag: &str) -> Option<(SegmentId, &Segment)> {
        if flag.is_empty() {
            return None;
        }
        self.iter().find(|(_, segment)| segment.has_flag(flag))
    }

    /// Returns the id of the first segment carrying the tag `flag`.
    #[must_use]
    pub fn id_by_flag(&self, flag: &str) -> Option<SegmentId> {
        self.find_by_flag(flag).map(|(id, _)| id)
    }

    /// Returns the first segment carrying the tag `flag`.
    #[must_use]
    pub fn segment_by_flag(&self, flag: &str) -> Option<&Segment> {
        self.find_by_flag(flag).map(|(_, segment)| segment)
    }

    /// Returns the id of the segment under re-encryption.
    #[must_use]
    pub fn in_reencryption(&self) -> Option<SegmentId> {
        self.id_by_flag(SegmentFlag::InReencryption.as_str())
    }

    /// Tags segment `id` with `flag`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] if `flag` is empty or `id` is unknown
    /// - [`CoreError::InvalidOperation`] if another segment is already
    ///   `in-reencryption`
    /// - [`CoreError::OutOfMemory`] if the flag set cannot grow
    pub fn set_flag(&mut self, id: SegmentId, flag: &str) -> CoreResult<()> {
        if flag == SegmentFlag::InReencryption.as_str() {
            if let Some(current) = self.in_reencryption() {
                if current != id {
                    return Err(CoreError::invalid_operation(format!(
                        "segment {current} is already in re-encryption"
                    )));
                }
            }
        }
        self.entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::invalid_argument(format!("no segment {id}")))?
            .set_flag(flag)
    }

    /// Removes `flag` from segment `id`; unknown ids are ignored.
    pub fn remove_flag(&mut self, id: SegmentId, flag: &str) {
        if let Some(segment) = self.entries.get_mut(&id) {
            segment.remove_flag(flag);
        }
    }

    /// Copies the bookkeeping segments into a fresh collection keyed
    /// 0, 1, 2, ... in ascending id order.
    ///
    /// The order is numeric, not the key order of the parsed document, so
    /// `{"5": .., "1": ..}` yields segment 1 as the new id 0.
    #[must_use]
    pub fn ignored(&self) -> Self {
        let entries = self
            .entries
            .values()
            .filter(|segment| segment.is_ignored())
            .cloned()
            .zip(0u32..)
            .map(|(segment, id)| (SegmentId::new(id), segment))
            .collect();
        Self { entries }
    }

    /// Checks the collection's invariants.
    ///
    /// With `header_area` set, also requires every segment to start at or
    /// past that many bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidMetadata`] describing the first violation.
    pub fn validate(&self, header_area: Option<u64>) -> CoreResult<()> {
        let mut reencrypting = None;

        for (id, segment) in self.iter() {
            if segment.size_spec() == SegmentSize::Fixed(0) {
                return Err(CoreError::invalid_metadata(format!(
                    "segment {id} has zero size"
                )));
            }

            if let SegmentKind::Crypt {
                sector_size: Some(size),
                ..
            } = segment.kind()
            {
                if !size.is_power_of_two() || !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(size) {
                    return Err(CoreError::invalid_metadata(format!(
                        "segment {id} has invalid sector size {size}"
                    )));
                }
            }

            if segment.has_flag(SegmentFlag::InReencryption.as_str()) {
                if let Some(other) = reencrypting.replace(id) {
                    return Err(CoreError::invalid_metadata(format!(
                        "segments {other} and {id} are both in re-encryption"
                    )));
                }
            }
        }

        if let Some(area) = header_area {
            let min = self.minimal_offset(false);
            if min < area {
                return Err(CoreError::invalid_metadata(format!(
                    "segment at offset {min} overlaps the {area} byte header area"
                )));
            }
        }

        Ok(())
    }
}

impl FromIterator<(SegmentId, Segment)> for Segments {
    fn from_iter<I: IntoIterator<Item = (SegmentId, Segment)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
