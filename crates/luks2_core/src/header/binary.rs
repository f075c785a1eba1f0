//! Binary preamble of a header slot.
//!
//! ## Layout (4096 bytes, integers big-endian)
//!
//! ```text
//! | magic (6) | version (2) | hdr_size (8) | seqid (8) | label (48) |
//! | checksum_alg (32) | salt (64) | uuid (40) | subsystem (48) |
//! | hdr_offset (8) | padding (184) | checksum (64) | padding (3584) |
//! ```
//!
//! Text fields are NUL-padded and must leave room for a terminating NUL.

use crate::error::{CoreError, CoreResult};
use crate::types::SequenceId;
use std::fmt;

/// Length of the magic marker.
pub const MAGIC_LEN: usize = 6;
/// Magic marker of the primary slot.
pub const PRIMARY_MAGIC: [u8; MAGIC_LEN] = *b"LUKS\xba\xbe";
/// Magic marker of the secondary slot.
pub const SECONDARY_MAGIC: [u8; MAGIC_LEN] = *b"SKUL\xba\xbe";
/// Supported on-disk format version.
pub const HEADER_VERSION: u16 = 2;
/// Size of the binary preamble.
pub const BINARY_HEADER_SIZE: usize = 4096;

/// Width of the label field.
pub const LABEL_LEN: usize = 48;
/// Width of the checksum algorithm field.
pub const CHECKSUM_ALG_LEN: usize = 32;
/// Width of the salt field.
pub const SALT_LEN: usize = 64;
/// Width of the UUID field.
pub const UUID_LEN: usize = 40;
/// Width of the subsystem field.
pub const SUBSYSTEM_LEN: usize = 48;
/// Width of the checksum field.
pub const CHECKSUM_LEN: usize = 64;

const VERSION_OFFSET: usize = 6;
const HDR_SIZE_OFFSET: usize = 8;
const SEQID_OFFSET: usize = 16;
const LABEL_OFFSET: usize = 24;
const CHECKSUM_ALG_OFFSET: usize = 72;
const SALT_OFFSET: usize = 104;
const UUID_OFFSET: usize = 168;
const SUBSYSTEM_OFFSET: usize = 208;
const HDR_OFFSET_OFFSET: usize = 256;
/// Offset of the checksum field within the preamble.
pub const CHECKSUM_OFFSET: usize = 448;

/// Header sizes the format permits (preamble plus document area).
pub const HEADER_SIZES: [u64; 9] = [
    0x4000, 0x8000, 0x1_0000, 0x2_0000, 0x4_0000, 0x8_0000, 0x10_0000, 0x20_0000, 0x40_0000,
];

/// Identity of a header slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Slot at offset 0.
    Primary,
    /// Slot directly after the primary.
    Secondary,
}

impl SlotKind {
    /// Returns the magic marker identifying this slot.
    #[must_use]
    pub const fn magic(self) -> [u8; MAGIC_LEN] {
        match self {
            Self::Primary => PRIMARY_MAGIC,
            Self::Secondary => SECONDARY_MAGIC,
        }
    }

    /// Returns the other slot.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    /// Returns the slot's absolute offset for a header of `hdr_size` bytes.
    #[must_use]
    pub const fn offset(self, hdr_size: u64) -> u64 {
        match self {
            Self::Primary => 0,
            Self::Secondary => hdr_size,
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Decoded binary preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryHeader {
    /// Magic marker.
    pub magic: [u8; MAGIC_LEN],
    /// Format version.
    pub version: u16,
    /// Total header size: preamble plus document area.
    pub hdr_size: u64,
    /// Sequence id of the write that produced this slot.
    pub seqid: SequenceId,
    /// Volume label.
    pub label: String,
    /// Checksum algorithm name.
    pub checksum_alg: String,
    /// Per-write salt.
    pub salt: [u8; SALT_LEN],
    /// Volume UUID text.
    pub uuid: String,
    /// Subsystem label.
    pub subsystem: String,
    /// Absolute offset of this slot.
    pub hdr_offset: u64,
    /// Checksum digest, zero-padded.
    pub checksum: [u8; CHECKSUM_LEN],
}

impl BinaryHeader {
    /// Returns the slot the magic marker names, if any.
    #[must_use]
    pub fn slot(&self) -> Option<SlotKind> {
        match self.magic {
            PRIMARY_MAGIC => Some(SlotKind::Primary),
            SECONDARY_MAGIC => Some(SlotKind::Secondary),
            _ => None,
        }
    }

    /// Encodes the preamble into exactly [`BINARY_HEADER_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if a text field does not fit
    /// its width with a terminating NUL.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = vec![0u8; BINARY_HEADER_SIZE];

        buf[..MAGIC_LEN].copy_from_slice(&self.magic);
        put_u16(&mut buf, VERSION_OFFSET, self.version);
        put_u64(&mut buf, HDR_SIZE_OFFSET, self.hdr_size);
        put_u64(&mut buf, SEQID_OFFSET, self.seqid.as_u64());
        put_str(&mut buf, LABEL_OFFSET, LABEL_LEN, "label", &self.label)?;
        put_str(
            &mut buf,
            CHECKSUM_ALG_OFFSET,
            CHECKSUM_ALG_LEN,
            "checksum algorithm",
            &self.checksum_alg,
        )?;
        buf[SALT_OFFSET..SALT_OFFSET + SALT_LEN].copy_from_slice(&self.salt);
        put_str(&mut buf, UUID_OFFSET, UUID_LEN, "uuid", &self.uuid)?;
        put_str(
            &mut buf,
            SUBSYSTEM_OFFSET,
            SUBSYSTEM_LEN,
            "subsystem",
            &self.subsystem,
        )?;
        put_u64(&mut buf, HDR_OFFSET_OFFSET, self.hdr_offset);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN].copy_from_slice(&self.checksum);

        Ok(buf)
    }

    /// Decodes a preamble from the first [`BINARY_HEADER_SIZE`] bytes.
    ///
    /// Only the byte layout is checked here; slot validation belongs to
    /// the load protocol.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptHeader`] if `data` is too short or a text
    /// field is not UTF-8.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < BINARY_HEADER_SIZE {
            return Err(CoreError::corrupt_header(format!(
                "preamble too short: {} bytes",
                data.len()
            )));
        }

        let mut magic = [0u8; MAGIC_LEN];
        magic.copy_from_slice(&data[..MAGIC_LEN]);
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&data[SALT_OFFSET..SALT_OFFSET + SALT_LEN]);
        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN]);

        Ok(Self {
            magic,
            version: get_u16(data, VERSION_OFFSET),
            hdr_size: get_u64(data, HDR_SIZE_OFFSET),
            seqid: SequenceId::new(get_u64(data, SEQID_OFFSET)),
            label: get_str(data, LABEL_OFFSET, LABEL_LEN, "label")?,
            checksum_alg: get_str(data, CHECKSUM_ALG_OFFSET, CHECKSUM_ALG_LEN, "checksum algorithm")?,
            salt,
            uuid: get_str(data, UUID_OFFSET, UUID_LEN, "uuid")?,
            subsystem: get_str(data, SUBSYSTEM_OFFSET, SUBSYSTEM_LEN, "subsystem")?,
            hdr_offset: get_u64(data, HDR_OFFSET_OFFSET),
            checksum,
        })
    }
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_be_bytes());
}

fn get_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn get_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_be_bytes(bytes)
}

/// Checks that `value` fits a `width`-byte field with its terminating NUL.
pub(crate) fn check_str(field: &str, width: usize, value: &str) -> CoreResult<()> {
    if value.len() >= width || value.as_bytes().contains(&0) {
        return Err(CoreError::invalid_argument(format!(
            "{field} {value:?} does not fit a {width} byte field"
        )));
    }
    Ok(())
}

fn put_str(buf: &mut [u8], at: usize, width: usize, field: &str, value: &str) -> CoreResult<()> {
    check_str(field, width, value)?;
    buf[at..at + value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

fn get_str(data: &[u8], at: usize, width: usize, field: &str) -> CoreResult<String> {
    let raw = &data[at..at + width];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    std::str::from_utf8(&raw[..end])
        .map(str::to_string)
        .map_err(|_| CoreError::corrupt_header(format!("{field} field is not UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BinaryHeader {
        BinaryHeader {
            magic: PRIMARY_MAGIC,
            version: HEADER_VERSION,
            hdr_size: 0x4000,
            seqid: SequenceId::new(7),
            label: "data".to_string(),
            checksum_alg: "sha256".to_string(),
            salt: [1u8; SALT_LEN],
            uuid: "af7f64ea-3233-4581-946b-6187d812841e".to_string(),
            subsystem: String::new(),
            hdr_offset: 0,
            checksum: [0u8; CHECKSUM_LEN],
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let header = sample();
        let encoded = header.encode().unwrap();
        assert_eq!(encoded.len(), BINARY_HEADER_SIZE);
        assert_eq!(BinaryHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn fields_land_at_format_offsets() {
        let encoded = sample().encode().unwrap();

        assert_eq!(&encoded[..6], b"LUKS\xba\xbe");
        assert_eq!(&encoded[6..8], &[0, 2]);
        assert_eq!(&encoded[8..16], &0x4000u64.to_be_bytes());
        assert_eq!(&encoded[16..24], &7u64.to_be_bytes());
        assert_eq!(&encoded[24..28], b"data");
        assert_eq!(&encoded[72..78], b"sha256");
        assert_eq!(encoded[78], 0);
        assert_eq!(&encoded[104..168], &[1u8; 64][..]);
        assert_eq!(&encoded[168..172], b"af7f");
        assert_eq!(&encoded[256..264], &0u64.to_be_bytes());
        assert!(encoded[512..].iter().all(|&b| b == 0));
    }

    #[test]
    fn slot_from_magic() {
        let mut header = sample();
        assert_eq!(header.slot(), Some(SlotKind::Primary));
        header.magic = SECONDARY_MAGIC;
        assert_eq!(header.slot(), Some(SlotKind::Secondary));
        header.magic = [0; MAGIC_LEN];
        assert_eq!(header.slot(), None);
    }

    #[test]
    fn oversized_label_rejected() {
        let mut header = sample();
        header.label = "x".repeat(LABEL_LEN);
        assert!(matches!(
            header.encode(),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(matches!(
            BinaryHeader::decode(&[0u8; 100]),
            Err(CoreError::CorruptHeader { .. })
        ));
    }

    #[test]
    fn slot_offsets() {
        assert_eq!(SlotKind::Primary.offset(0x8000), 0);
        assert_eq!(SlotKind::Secondary.offset(0x8000), 0x8000);
        assert_eq!(SlotKind::Primary.other(), SlotKind::Secondary);
    }
}
