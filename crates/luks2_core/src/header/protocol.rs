//! Two-slot header load and commit.
//!
//! A volume carries two copies of its header: the primary at offset 0 and
//! the secondary right after it. Each copy is a binary preamble followed by
//! the JSON document, checksummed as one region.
//!
//! ## Load
//!
//! Both slots are read and validated. The valid slot with the higher
//! sequence id is authoritative; on a tie the primary wins. If the primary
//! is unusable, the secondary is probed at every permitted header size.
//!
//! ## Commit
//!
//! The slot that is *not* authoritative is written first, then the
//! authoritative one. Each slot write takes the next sequence id, so a
//! crash at any point leaves at least one slot that loads.
//!
//! Within a slot the region is written with a zeroed checksum field, then
//! the digest is written, then the backend is flushed (and synced when
//! configured). A torn slot therefore fails its checksum.

use crate::config::HeaderConfig;
use crate::error::{CoreError, CoreResult};
use crate::header::binary::{
    BinaryHeader, SlotKind, BINARY_HEADER_SIZE, CHECKSUM_LEN, CHECKSUM_OFFSET, HEADER_SIZES,
    HEADER_VERSION, SALT_LEN,
};
use crate::header::checksum::{header_checksum, verify_header_checksum, ChecksumAlgorithm};
use crate::metadata::Metadata;
use crate::types::SequenceId;
use luks2_storage::{StorageBackend, StorageError, StorageResult};
use rand::RngCore;
use std::fmt;
use uuid::Uuid;

/// Outcome of validating one slot on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    /// The slot passed every check.
    Valid {
        /// Sequence id stored in the slot.
        seqid: SequenceId,
    },
    /// The slot carries its magic but failed validation.
    Corrupt {
        /// Why the slot was rejected.
        reason: String,
    },
    /// No header was found at the slot's offset.
    Missing,
}

impl SlotStatus {
    /// Returns true for [`SlotStatus::Valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// Returns the stored sequence id of a valid slot.
    #[must_use]
    pub fn seqid(&self) -> Option<SequenceId> {
        match self {
            Self::Valid { seqid } => Some(*seqid),
            _ => None,
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid { seqid } => write!(f, "valid ({seqid})"),
            Self::Corrupt { reason } => write!(f, "corrupt ({reason})"),
            Self::Missing => f.write_str("missing"),
        }
    }
}

/// Header fields shared by both slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderState {
    /// Size of each slot.
    pub hdr_size: u64,
    /// Last sequence id written or loaded.
    pub seqid: SequenceId,
    /// Slot holding the newest header.
    pub authoritative: SlotKind,
    /// Volume UUID.
    pub uuid: Uuid,
    /// Volume label.
    pub label: String,
    /// Subsystem label.
    pub subsystem: String,
    /// Checksum algorithm.
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl HeaderState {
    /// Creates the state of a volume that has never been written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `config` does not validate.
    pub fn for_format(config: &HeaderConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            hdr_size: config.header_size,
            seqid: SequenceId::new(0),
            authoritative: SlotKind::Primary,
            uuid: config.uuid.unwrap_or_else(Uuid::new_v4),
            label: config.label.clone().unwrap_or_default(),
            subsystem: config.subsystem.clone().unwrap_or_default(),
            checksum_algorithm: config.checksum_algorithm,
        })
    }

    /// Returns the usable size of the document area.
    ///
    /// One byte is held back for the terminating NUL.
    #[must_use]
    pub fn document_capacity(&self) -> usize {
        (self.hdr_size as usize).saturating_sub(BINARY_HEADER_SIZE + 1)
    }

    fn from_slot(slot: SlotKind, valid: &ValidSlot) -> Self {
        Self {
            hdr_size: valid.header.hdr_size,
            seqid: valid.header.seqid,
            authoritative: slot,
            uuid: valid.uuid,
            label: valid.header.label.clone(),
            subsystem: valid.header.subsystem.clone(),
            checksum_algorithm: valid.algorithm,
        }
    }
}

/// Result of loading a volume's header.
#[derive(Debug, Clone)]
pub struct LoadedHeader {
    /// State taken from the authoritative slot.
    pub state: HeaderState,
    /// Document parsed from the authoritative slot.
    pub metadata: Metadata,
    /// Outcome for the primary slot.
    pub primary: SlotStatus,
    /// Outcome for the secondary slot.
    pub secondary: SlotStatus,
}

struct ValidSlot {
    header: BinaryHeader,
    uuid: Uuid,
    algorithm: ChecksumAlgorithm,
    region: Vec<u8>,
}

enum SlotRead {
    Valid(Box<ValidSlot>),
    Corrupt(String),
    Missing,
}

impl SlotRead {
    fn status(&self) -> SlotStatus {
        match self {
            Self::Valid(slot) => SlotStatus::Valid {
                seqid: slot.header.seqid,
            },
            Self::Corrupt(reason) => SlotStatus::Corrupt {
                reason: reason.clone(),
            },
            Self::Missing => SlotStatus::Missing,
        }
    }
}

/// Loads the newest valid header from `storage`.
///
/// # Errors
///
/// - [`CoreError::IntegrityFailure`] if neither slot is valid
/// - [`CoreError::InvalidMetadata`] if the authoritative document does not
///   parse; the other slot is not consulted
/// - [`CoreError::Storage`] for backend failures other than short reads
pub fn load_header(storage: &dyn StorageBackend, config: &HeaderConfig) -> CoreResult<LoadedHeader> {
    let primary = read_slot(storage, SlotKind::Primary, 0, config)?;
    let secondary = match &primary {
        SlotRead::Valid(slot) => read_slot(storage, SlotKind::Secondary, slot.header.hdr_size, config)?,
        _ => probe_secondary(storage, config)?,
    };

    let primary_status = primary.status();
    let secondary_status = secondary.status();

    let (slot, chosen) = match (primary, secondary) {
        (SlotRead::Valid(p), SlotRead::Valid(s)) => {
            if s.header.seqid > p.header.seqid {
                (SlotKind::Secondary, s)
            } else {
                (SlotKind::Primary, p)
            }
        }
        (SlotRead::Valid(p), _) => (SlotKind::Primary, p),
        (_, SlotRead::Valid(s)) => (SlotKind::Secondary, s),
        _ => {
            tracing::error!(primary = %primary_status, secondary = %secondary_status, "no valid header slot");
            return Err(CoreError::IntegrityFailure {
                primary: primary_status.to_string(),
                secondary: secondary_status.to_string(),
            });
        }
    };

    let stale = match slot {
        SlotKind::Primary => &secondary_status,
        SlotKind::Secondary => &primary_status,
    };
    if stale.seqid() != Some(chosen.header.seqid) {
        tracing::warn!(
            authoritative = %slot,
            seqid = %chosen.header.seqid,
            other = %stale,
            "header slots disagree; next commit rewrites both"
        );
    }

    let metadata = Metadata::parse(&chosen.region[BINARY_HEADER_SIZE..])?;
    let state = HeaderState::from_slot(slot, &chosen);

    tracing::debug!(
        authoritative = %slot,
        seqid = %state.seqid,
        hdr_size = state.hdr_size,
        "loaded header"
    );

    Ok(LoadedHeader {
        state,
        metadata,
        primary: primary_status,
        secondary: secondary_status,
    })
}

/// Writes `metadata` to both slots.
///
/// Returns the slots in write order with the sequence id each received.
/// `state.seqid` advances once per attempted slot write, including a write
/// that fails.
///
/// # Errors
///
/// - [`CoreError::MetadataTooLarge`] before any I/O if the document does
///   not fit the document area
/// - [`CoreError::InvalidMetadata`] if the segments break an invariant or
///   overlap the header area of an attached header
/// - [`CoreError::WriteFailed`] naming the slot whose write failed
pub fn commit_header(
    storage: &mut dyn StorageBackend,
    state: &mut HeaderState,
    metadata: &Metadata,
    config: &HeaderConfig,
) -> CoreResult<[(SlotKind, SequenceId); 2]> {
    let json = metadata.to_json()?;
    let capacity = state.document_capacity();
    if json.len() > capacity {
        return Err(CoreError::MetadataTooLarge {
            size: json.len(),
            capacity,
        });
    }

    if let Some(segments) = metadata.segments() {
        let header_area = (!config.detached_header).then(|| state.hdr_size * 2);
        segments.validate(header_area)?;
    }

    let first = state.authoritative.other();
    let mut written = [(first, state.seqid); 2];
    for (i, slot) in [first, state.authoritative].into_iter().enumerate() {
        state.seqid = state.seqid.next();
        write_slot(storage, state, slot, &json, config)?;
        written[i] = (slot, state.seqid);
    }

    tracing::info!(seqid = %state.seqid, bytes = json.len(), "committed header");
    Ok(written)
}

fn read_slot(
    storage: &dyn StorageBackend,
    slot: SlotKind,
    offset: u64,
    config: &HeaderConfig,
) -> CoreResult<SlotRead> {
    let preamble = match storage.read_at(offset, BINARY_HEADER_SIZE) {
        Ok(bytes) => bytes,
        Err(StorageError::ReadPastEnd { .. }) => return Ok(SlotRead::Missing),
        Err(e) => return Err(e.into()),
    };

    if preamble[..slot.magic().len()] != slot.magic() {
        return Ok(SlotRead::Missing);
    }

    let header = match BinaryHeader::decode(&preamble) {
        Ok(header) => header,
        Err(e) => return Ok(SlotRead::Corrupt(e.to_string())),
    };

    if header.version != HEADER_VERSION {
        return Ok(SlotRead::Corrupt(format!("unsupported version {}", header.version)));
    }
    if !config.accepts_header_size(header.hdr_size) {
        return Ok(SlotRead::Corrupt(format!("unsupported header size {:#x}", header.hdr_size)));
    }
    if header.hdr_offset != offset {
        return Ok(SlotRead::Corrupt(format!(
            "header offset {:#x} does not match slot offset {offset:#x}",
            header.hdr_offset
        )));
    }
    if slot.offset(header.hdr_size) != offset {
        return Ok(SlotRead::Corrupt(format!(
            "header size {:#x} does not place the slot at {offset:#x}",
            header.hdr_size
        )));
    }
    let Some(algorithm) = ChecksumAlgorithm::from_name(&header.checksum_alg) else {
        return Ok(SlotRead::Corrupt(format!(
            "unsupported checksum algorithm {:?}",
            header.checksum_alg
        )));
    };
    let Ok(uuid) = Uuid::parse_str(&header.uuid) else {
        return Ok(SlotRead::Corrupt(format!("invalid uuid {:?}", header.uuid)));
    };

    let region = match storage.read_at(offset, header.hdr_size as usize) {
        Ok(bytes) => bytes,
        Err(StorageError::ReadPastEnd { .. }) => {
            return Ok(SlotRead::Corrupt("header region is truncated".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    if !verify_header_checksum(algorithm, &region) {
        return Ok(SlotRead::Corrupt("checksum mismatch".to_string()));
    }

    Ok(SlotRead::Valid(Box::new(ValidSlot {
        header,
        uuid,
        algorithm,
        region,
    })))
}

/// Looks for the secondary at every permitted size.
///
/// The first valid candidate wins; otherwise the first corrupt one is
/// reported.
fn probe_secondary(storage: &dyn StorageBackend, config: &HeaderConfig) -> CoreResult<SlotRead> {
    let mut outcome = SlotRead::Missing;
    for size in HEADER_SIZES.into_iter().filter(|s| config.accepts_header_size(*s)) {
        match read_slot(storage, SlotKind::Secondary, size, config)? {
            valid @ SlotRead::Valid(_) => {
                tracing::debug!(hdr_size = size, "found secondary header by probing");
                return Ok(valid);
            }
            SlotRead::Corrupt(reason) if matches!(outcome, SlotRead::Missing) => {
                outcome = SlotRead::Corrupt(reason);
            }
            _ => {}
        }
    }
    Ok(outcome)
}

fn write_slot(
    storage: &mut dyn StorageBackend,
    state: &HeaderState,
    slot: SlotKind,
    json: &[u8],
    config: &HeaderConfig,
) -> CoreResult<()> {
    let offset = slot.offset(state.hdr_size);

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let header = BinaryHeader {
        magic: slot.magic(),
        version: HEADER_VERSION,
        hdr_size: state.hdr_size,
        seqid: state.seqid,
        label: state.label.clone(),
        checksum_alg: state.checksum_algorithm.name().to_string(),
        salt,
        uuid: state.uuid.hyphenated().to_string(),
        subsystem: state.subsystem.clone(),
        hdr_offset: offset,
        checksum: [0u8; CHECKSUM_LEN],
    };

    let mut region = header.encode()?;
    region.extend_from_slice(json);
    region.resize(state.hdr_size as usize, 0);
    let digest = header_checksum(state.checksum_algorithm, &region)?;

    write_region(storage, offset, &region, &digest, config.sync_on_commit).map_err(|e| {
        tracing::warn!(%slot, seqid = %state.seqid, error = %e, "header slot write failed");
        CoreError::write_failed(slot, e)
    })
}

fn write_region(
    storage: &mut dyn StorageBackend,
    offset: u64,
    region: &[u8],
    digest: &[u8],
    sync: bool,
) -> StorageResult<()> {
    storage.write_at(offset, region)?;
    storage.write_at(offset + CHECKSUM_OFFSET as u64, digest)?;
    storage.flush()?;
    if sync {
        storage.sync()?;
    }
    Ok(())
}
