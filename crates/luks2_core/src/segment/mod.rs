//! Segment store.
//!
//! A segment describes one contiguous extent of the container's data area.
//! The `segments` object of the metadata document maps decimal ids to
//! segment objects:
//!
//! ```text
//! "segments": {
//!   "0": { "type": "crypt", "offset": "16777216", "size": "dynamic",
//!          "iv_tweak": "0", "encryption": "aes-xts-plain64", "sector_size": 512 }
//! }
//! ```
//!
//! Flags:
//! - `in-reencryption` = live target of an ongoing re-encryption (at most one)
//! - `reencrypt-*` = bookkeeping copy, skipped by type queries

mod flags;
mod record;
mod store;

pub use flags::{SegmentFlag, SegmentFlags, REENCRYPT_PREFIX};
pub use record::{Segment, SegmentKind, SegmentSize, SegmentType, DYNAMIC_SIZE, NULL_CIPHER};
pub use store::{FindMode, Segments, MAX_SECTOR_SIZE, MIN_SECTOR_SIZE};
