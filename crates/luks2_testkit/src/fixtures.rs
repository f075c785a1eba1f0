//! Test fixtures and volume helpers.
//!
//! Provides formatted volumes, sample documents and helpers for damaging
//! or inspecting individual header slots.

use luks2_core::header::{BinaryHeader, BINARY_HEADER_SIZE};
use luks2_core::{HeaderConfig, Metadata, Segment, Segments, SlotKind, Volume};
use luks2_storage::{FileBackend, InMemoryBackend, StorageBackend};
use serde_json::json;
use std::path::PathBuf;
use tempfile::TempDir;

/// Offset of the sample data segment (16 MiB, past the largest header pair).
pub const DATA_OFFSET: u64 = 16 * 1024 * 1024;

/// Returns a collection with one dynamic `aes-xts-plain64` crypt segment.
pub fn sample_segments() -> Segments {
    let mut segments = Segments::new();
    segments
        .push(Segment::crypt(DATA_OFFSET, 0, None, "aes-xts-plain64", 512))
        .expect("Failed to add sample segment");
    segments
}

/// Returns a document shaped like a freshly formatted container.
pub fn sample_metadata() -> Metadata {
    let mut metadata = Metadata::with_segments(sample_segments());
    metadata
        .set_section("keyslots", json!({}))
        .expect("Failed to set keyslots");
    metadata
        .set_section("tokens", json!({}))
        .expect("Failed to set tokens");
    metadata
        .set_section("digests", json!({}))
        .expect("Failed to set digests");
    metadata
        .set_section("config", json!({ "json_size": "12288", "keyslots_size": "16744448" }))
        .expect("Failed to set config");
    metadata
}

/// Formats an in-memory volume with `config` and the sample document.
pub fn memory_volume(config: HeaderConfig) -> Volume {
    Volume::format(Box::new(InMemoryBackend::new()), config, sample_metadata())
        .expect("Failed to format in-memory volume")
}

/// Returns a copy of every byte in `storage`.
pub fn snapshot(storage: &dyn StorageBackend) -> Vec<u8> {
    let size = storage.size().expect("Failed to read storage size");
    storage
        .read_at(0, size as usize)
        .expect("Failed to read storage")
}

/// Formats an in-memory volume and returns the raw container bytes.
pub fn formatted_image(config: HeaderConfig) -> Vec<u8> {
    let storage = memory_volume(config).into_storage();
    snapshot(&*storage)
}

/// Flips one byte in the document area of `slot`.
///
/// The slot keeps its magic, so it loads as corrupt rather than missing.
pub fn corrupt_slot(storage: &mut dyn StorageBackend, slot: SlotKind, hdr_size: u64) {
    let at = slot.offset(hdr_size) + BINARY_HEADER_SIZE as u64;
    let byte = storage.read_at(at, 1).expect("Failed to read slot byte");
    storage
        .write_at(at, &[byte[0] ^ 0xFF])
        .expect("Failed to damage slot");
}

/// Zeroes the preamble of `slot`, so it loads as missing.
pub fn erase_slot(storage: &mut dyn StorageBackend, slot: SlotKind, hdr_size: u64) {
    storage
        .write_at(slot.offset(hdr_size), &[0u8; BINARY_HEADER_SIZE])
        .expect("Failed to erase slot");
}

/// Reads the sequence id stored in the preamble of `slot`.
pub fn read_slot_seqid(storage: &dyn StorageBackend, slot: SlotKind, hdr_size: u64) -> u64 {
    let bytes = storage
        .read_at(slot.offset(hdr_size), BINARY_HEADER_SIZE)
        .expect("Failed to read preamble");
    BinaryHeader::decode(&bytes)
        .expect("Failed to decode preamble")
        .seqid
        .as_u64()
}

/// A container file in a temporary directory.
pub struct TestContainer {
    /// Path of the container file.
    pub path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestContainer {
    /// Creates an empty container file.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("container.img");
        FileBackend::open_with_create_dirs(&path).expect("Failed to create container");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Opens a backend on the container file.
    pub fn backend(&self) -> Box<dyn StorageBackend> {
        Box::new(FileBackend::open(&self.path).expect("Failed to open container"))
    }

    /// Formats the container with `config` and the sample document.
    pub fn format(&self, config: HeaderConfig) -> Volume {
        Volume::format(self.backend(), config, sample_metadata())
            .expect("Failed to format container")
    }

    /// Loads the volume stored in the container.
    pub fn load(&self, config: HeaderConfig) -> Volume {
        Volume::load(self.backend(), config).expect("Failed to load container")
    }
}

impl Default for TestContainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_metadata_keeps_sections() {
        let metadata = sample_metadata();
        assert_eq!(metadata.count_segments().unwrap(), 1);
        assert!(metadata.section("keyslots").is_some());
        assert!(metadata.section("config").is_some());
    }

    #[test]
    fn damaged_primary_loads_from_secondary() {
        let volume = memory_volume(HeaderConfig::default());
        let hdr_size = volume.header_size();
        let mut storage = volume.into_storage();

        corrupt_slot(&mut *storage, SlotKind::Primary, hdr_size);

        let volume = Volume::load(storage, HeaderConfig::default()).unwrap();
        assert_eq!(volume.authoritative_slot(), SlotKind::Secondary);
    }

    #[test]
    fn seqids_after_format() {
        let volume = memory_volume(HeaderConfig::default());
        let hdr_size = volume.header_size();
        let storage = volume.into_storage();

        assert_eq!(read_slot_seqid(&*storage, SlotKind::Secondary, hdr_size), 1);
        assert_eq!(read_slot_seqid(&*storage, SlotKind::Primary, hdr_size), 2);
    }

    #[test]
    fn container_roundtrip() {
        let container = TestContainer::new();
        let uuid = container.format(HeaderConfig::default()).uuid();
        assert_eq!(container.load(HeaderConfig::default()).uuid(), uuid);
    }
}
