//! Redundant on-disk header.
//!
//! - [`binary`]: the 4096-byte preamble of each slot
//! - [`checksum`]: digests over a whole slot
//! - [`protocol`]: choosing the authoritative slot and committing both

pub mod binary;
pub mod checksum;
pub mod protocol;

pub use binary::{
    BinaryHeader, SlotKind, BINARY_HEADER_SIZE, CHECKSUM_ALG_LEN, CHECKSUM_LEN, CHECKSUM_OFFSET,
    HEADER_SIZES, HEADER_VERSION, LABEL_LEN, MAGIC_LEN, PRIMARY_MAGIC, SALT_LEN, SECONDARY_MAGIC,
    SUBSYSTEM_LEN, UUID_LEN,
};
pub use checksum::{header_checksum, verify_header_checksum, ChecksumAlgorithm, HeaderDigest};
pub use protocol::{commit_header, load_header, HeaderState, LoadedHeader, SlotStatus};

pub(crate) use binary::check_str;
