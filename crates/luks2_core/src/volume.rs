//! Volume handle.

use crate::config::HeaderConfig;
use crate::error::{CoreError, CoreResult};
use crate::header::{commit_header, load_header, HeaderState, SlotKind, SlotStatus};
use crate::metadata::Metadata;
use crate::segment::Segments;
use crate::types::SequenceId;
use luks2_storage::StorageBackend;
use uuid::Uuid;

/// An open volume: storage plus the in-memory header.
///
/// Every mutation takes `&mut self`, so a volume has one writer at a time.
/// Changes made through [`Volume::metadata_mut`] reach the disk only on
/// [`Volume::commit`].
///
/// # Example
///
/// ```rust
/// use luks2_core::{HeaderConfig, Metadata, Segment, Segments, Volume};
/// use luks2_storage::InMemoryBackend;
///
/// let mut segments = Segments::new();
/// segments.push(Segment::crypt(16 << 20, 0, None, "aes-xts-plain64", 512)).unwrap();
///
/// let volume = Volume::format(
///     Box::new(InMemoryBackend::new()),
///     HeaderConfig::default(),
///     Metadata::with_segments(segments),
/// ).unwrap();
///
/// let storage = volume.into_storage();
/// let reopened = Volume::load(storage, HeaderConfig::default()).unwrap();
/// assert_eq!(reopened.metadata().count_segments().unwrap(), 1);
/// ```
pub struct Volume {
    storage: Box<dyn StorageBackend>,
    config: HeaderConfig,
    state: HeaderState,
    metadata: Metadata,
    primary: SlotStatus,
    secondary: SlotStatus,
}

impl Volume {
    /// Writes a fresh header to both slots of `storage`.
    ///
    /// Any existing header is overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid, `metadata` does not fit or
    /// breaks a segment invariant, or a slot write fails.
    pub fn format(
        mut storage: Box<dyn StorageBackend>,
        config: HeaderConfig,
        metadata: Metadata,
    ) -> CoreResult<Self> {
        let mut state = HeaderState::for_format(&config)?;
        let [first, second] = commit_header(&mut *storage, &mut state, &metadata, &config)?;

        tracing::info!(
            uuid = %state.uuid,
            hdr_size = state.hdr_size,
            algorithm = %state.checksum_algorithm,
            "formatted volume"
        );

        let mut volume = Self {
            storage,
            config,
            state,
            metadata,
            primary: SlotStatus::Missing,
            secondary: SlotStatus::Missing,
        };
        for (slot, seqid) in [first, second] {
            *volume.status_mut(slot) = SlotStatus::Valid { seqid };
        }
        Ok(volume)
    }

    /// Opens the volume stored in `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityFailure`] if neither slot is valid and
    /// [`CoreError::InvalidMetadata`] if the authoritative document does not
    /// parse.
    pub fn load(storage: Box<dyn StorageBackend>, config: HeaderConfig) -> CoreResult<Self> {
        let loaded = load_header(&*storage, &config)?;
        Ok(Self {
            storage,
            config,
            state: loaded.state,
            metadata: loaded.metadata,
            primary: loaded.primary,
            secondary: loaded.secondary,
        })
    }

    /// Returns the metadata document.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the metadata document for modification.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Replaces the segments collection, returning the previous one.
    ///
    /// With `commit`, the header is written afterwards. A failed commit
    /// leaves the new segments in memory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidMetadata`] if `segments` breaks an
    /// invariant, or any error from [`Volume::commit`].
    pub fn replace_segments(
        &mut self,
        segments: Segments,
        commit: bool,
    ) -> CoreResult<Option<Segments>> {
        segments.validate(None)?;
        let previous = self.metadata.replace_segments(segments);
        if commit {
            self.commit()?;
        }
        Ok(previous)
    }

    /// Writes the in-memory document to both slots.
    ///
    /// Returns the sequence id of the authoritative slot.
    ///
    /// # Errors
    ///
    /// See [`commit_header`]. After a [`CoreError::WriteFailed`] the slot
    /// statuses reflect what reached the disk.
    pub fn commit(&mut self) -> CoreResult<SequenceId> {
        let result = commit_header(
            &mut *self.storage,
            &mut self.state,
            &self.metadata,
            &self.config,
        );

        match result {
            Ok(written) => {
                for (slot, seqid) in written {
                    *self.status_mut(slot) = SlotStatus::Valid { seqid };
                }
                Ok(self.state.seqid)
            }
            Err(CoreError::WriteFailed { slot, source }) => {
                let reason = format!("interrupted write: {source}");
                *self.status_mut(slot) = SlotStatus::Corrupt { reason };

                if slot == self.state.authoritative {
                    // The other slot was rewritten with the previous id.
                    let other = slot.other();
                    let seqid = SequenceId::new(self.state.seqid.as_u64().saturating_sub(1));
                    *self.status_mut(other) = SlotStatus::Valid { seqid };
                    self.state.authoritative = other;
                    tracing::warn!(authoritative = %other, %seqid, "authoritative slot write failed");
                }
                Err(CoreError::WriteFailed { slot, source })
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the sequence id of the newest header.
    #[must_use]
    pub fn sequence(&self) -> SequenceId {
        self.status(self.state.authoritative)
            .seqid()
            .unwrap_or(self.state.seqid)
    }

    /// Returns the volume UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.state.uuid
    }

    /// Returns the size of each header slot.
    #[must_use]
    pub fn header_size(&self) -> u64 {
        self.state.hdr_size
    }

    /// Returns the slot holding the newest header.
    #[must_use]
    pub fn authoritative_slot(&self) -> SlotKind {
        self.state.authoritative
    }

    /// Returns the last known status of `slot`.
    #[must_use]
    pub fn slot_status(&self, slot: SlotKind) -> &SlotStatus {
        self.status(slot)
    }

    /// Returns the header fields shared by both slots.
    #[must_use]
    pub fn header_state(&self) -> &HeaderState {
        &self.state
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HeaderConfig {
        &self.config
    }

    /// Closes the volume and returns its storage.
    #[must_use]
    pub fn into_storage(self) -> Box<dyn StorageBackend> {
        self.storage
    }

    fn status(&self, slot: SlotKind) -> &SlotStatus {
        match slot {
            SlotKind::Primary => &self.primary,
            SlotKind::Secondary => &self.secondary,
        }
    }

    fn status_mut(&mut self, slot: SlotKind) -> &mut SlotStatus {
        match slot {
            SlotKind::Primary => &mut self.primary,
            SlotKind::Secondary => &mut self.secondary,
        }
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("state", &self.state)
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Segment, SegmentFlag};
    use crate::types::SegmentId;
    use luks2_storage::InMemoryBackend;

    const DATA_OFFSET: u64 = 16 * 1024 * 1024;

    fn sample_segments() -> Segments {
        let mut segments = Segments::new();
        segments
            .push(Segment::crypt(DATA_OFFSET, 0, None, "aes-xts-plain64", 512))
            .unwrap();
        segments
    }

    fn formatted() -> Volume {
        Volume::format(
            Box::new(InMemoryBackend::new()),
            HeaderConfig::default(),
            Metadata::with_segments(sample_segments()),
        )
        .unwrap()
    }

    fn reopen(volume: Volume) -> Volume {
        let config = volume.config().clone();
        Volume::load(volume.into_storage(), config).unwrap()
    }

    #[test]
    fn format_marks_both_slots_valid() {
        let volume = formatted();
        assert_eq!(volume.sequence(), SequenceId::new(2));
        assert_eq!(volume.authoritative_slot(), SlotKind::Primary);
        assert!(volume.slot_status(SlotKind::Primary).is_valid());
        assert_eq!(
            volume.slot_status(SlotKind::Secondary).seqid(),
            Some(SequenceId::new(1))
        );
    }

    #[test]
    fn commit_survives_reload() {
        let mut volume = formatted();
        let uuid = volume.uuid();
        volume
            .metadata_mut()
            .set_section("config", serde_json::json!({ "json_size": "12288" }))
            .unwrap();
        assert_eq!(volume.commit().unwrap(), SequenceId::new(4));

        let volume = reopen(volume);
        assert_eq!(volume.uuid(), uuid);
        assert_eq!(volume.sequence(), SequenceId::new(4));
        assert_eq!(
            volume.metadata().section("config"),
            Some(&serde_json::json!({ "json_size": "12288" }))
        );
    }

    #[test]
    fn replace_segments_with_commit() {
        let mut volume = formatted();
        let mut next = sample_segments();
        next.push(Segment::linear(DATA_OFFSET * 2, Some(4096))).unwrap();
        next.set_flag(SegmentId::new(1), SegmentFlag::InReencryption.as_str())
            .unwrap();

        let previous = volume.replace_segments(next, true).unwrap();
        assert_eq!(previous.map(|s| s.len()), Some(1));

        let volume = reopen(volume);
        assert_eq!(volume.metadata().count_segments().unwrap(), 2);
        assert_eq!(
            volume.metadata().segment_in_reencryption(),
            Some(SegmentId::new(1))
        );
    }

    #[test]
    fn replace_segments_without_commit_stays_in_memory() {
        let mut volume = formatted();
        let mut next = sample_segments();
        next.push(Segment::linear(DATA_OFFSET * 2, None)).unwrap();
        volume.replace_segments(next, false).unwrap();
        assert_eq!(volume.metadata().count_segments().unwrap(), 2);

        let volume = reopen(volume);
        assert_eq!(volume.metadata().count_segments().unwrap(), 1);
    }

    #[test]
    fn invalid_segments_are_rejected_before_replacing() {
        let mut volume = formatted();
        let mut next = Segments::new();
        next.push(Segment::linear(DATA_OFFSET, Some(0))).unwrap();

        assert!(volume.replace_segments(next, true).is_err());
        assert_eq!(volume.metadata().count_segments().unwrap(), 1);
        assert_eq!(volume.sequence(), SequenceId::new(2));
    }

    #[test]
    fn commit_alternates_after_secondary_load() {
        let mut volume = formatted();
        let mut storage = volume.into_storage();
        storage.write_at(4096, b"#").unwrap();

        volume = Volume::load(storage, HeaderConfig::default()).unwrap();
        assert_eq!(volume.authoritative_slot(), SlotKind::Secondary);
        assert_eq!(volume.sequence(), SequenceId::new(1));

        volume.commit().unwrap();
        assert_eq!(volume.authoritative_slot(), SlotKind::Secondary);
        assert_eq!(
            volume.slot_status(SlotKind::Primary).seqid(),
            Some(SequenceId::new(2))
        );
        assert_eq!(volume.sequence(), SequenceId::new(3));

        let volume = reopen(volume);
        assert_eq!(volume.authoritative_slot(), SlotKind::Secondary);
        assert_eq!(volume.sequence(), SequenceId::new(3));
    }
}
