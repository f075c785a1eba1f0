//! # LUKS2 Core
//!
//! Segment metadata and redundant header handling for LUKS2 volumes.
//!
//! This crate provides:
//! - The segment store: typed segments, flags and the queries over them
//! - The metadata document with opaque sections preserved verbatim
//! - The two-slot header protocol (load newest valid slot, commit both)
//! - [`Volume`], tying storage, header state and metadata together
//!
//! Storage access goes through [`luks2_storage::StorageBackend`]; the
//! backends themselves know nothing about the on-disk format.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod header;
mod metadata;
pub mod segment;
mod types;
mod volume;

pub use config::HeaderConfig;
pub use error::{CoreError, CoreResult};
pub use header::{
    commit_header, load_header, ChecksumAlgorithm, HeaderState, LoadedHeader, SlotKind,
    SlotStatus,
};
pub use metadata::{Metadata, SEGMENTS_SECTION};
pub use segment::{
    FindMode, Segment, SegmentFlag, SegmentFlags, SegmentKind, SegmentSize, SegmentType, Segments,
};
pub use types::{ParseSegmentIdError, SegmentId, SequenceId, SECTOR_SHIFT};
pub use volume::Volume;
