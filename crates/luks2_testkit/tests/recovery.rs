//! Integration tests for header load, commit and recovery.

use luks2_core::{
    ChecksumAlgorithm, CoreError, HeaderConfig, Metadata, Segment, SegmentId, SequenceId,
    SlotKind, SlotStatus, Volume,
};
use luks2_storage::{FileBackend, InMemoryBackend, StorageError};
use luks2_testkit::{
    corrupt_slot, erase_slot, formatted_image, memory_volume, read_slot_seqid, sample_metadata,
    snapshot, CrashRecoveryHarness, CrashableBackend, TestContainer, DATA_OFFSET,
};
use serde_json::json;

fn load_image(image: Vec<u8>) -> Volume {
    Volume::load(Box::new(InMemoryBackend::with_data(image)), HeaderConfig::default()).unwrap()
}

#[test]
fn crash_harness_with_larger_header() {
    let mut harness = CrashRecoveryHarness::with_config(HeaderConfig::default().header_size(0x8000));
    harness.stride = 1021;

    harness.run_all_tests();
    assert!(harness.all_passed(), "{}", harness.summary());
}

#[test]
fn crash_harness_with_sha512() {
    let mut harness = CrashRecoveryHarness::with_config(
        HeaderConfig::default().checksum_algorithm(ChecksumAlgorithm::Sha512),
    );
    harness.stride = 2039;

    let result = harness.test_torn_commit();
    assert!(result.passed, "{:?}", result.error);
    assert!(result.checked > 0);
}

#[test]
fn interrupted_second_write_keeps_new_document() {
    let image = formatted_image(HeaderConfig::default());
    let backend = CrashableBackend::new(Box::new(InMemoryBackend::with_data(image)));
    let control = backend.control();

    let mut volume = Volume::load(Box::new(backend), HeaderConfig::default()).unwrap();
    volume
        .metadata_mut()
        .set_section("tokens", json!({ "0": { "type": "test" } }))
        .unwrap();

    // secondary region and its digest, then the primary preamble
    control.crash_after(0x4000 + 32 + 100);
    let err = volume.commit().unwrap_err();
    assert!(matches!(err, CoreError::WriteFailed { slot: SlotKind::Primary, .. }));
    assert!(err.is_fatal());
    assert!(control.has_crashed());

    assert_eq!(volume.authoritative_slot(), SlotKind::Secondary);
    assert_eq!(volume.sequence(), SequenceId::new(3));
    assert!(matches!(
        volume.slot_status(SlotKind::Primary),
        SlotStatus::Corrupt { .. }
    ));

    let reloaded = Volume::load(volume.into_storage(), HeaderConfig::default()).unwrap();
    assert_eq!(reloaded.authoritative_slot(), SlotKind::Secondary);
    assert_eq!(reloaded.sequence(), SequenceId::new(3));
    assert!(reloaded.metadata().section("tokens").unwrap().get("0").is_some());
}

#[test]
fn retry_after_failed_commit_uses_fresh_ids() {
    let image = formatted_image(HeaderConfig::default());
    let backend = CrashableBackend::new(Box::new(InMemoryBackend::with_data(image)));
    let control = backend.control();
    let mut volume = Volume::load(Box::new(backend), HeaderConfig::default()).unwrap();

    control.crash_after(10);
    assert!(volume.commit().is_err());

    control.reset();
    let seqid = volume.commit().unwrap();
    // id 3 went to the failed write
    assert_eq!(seqid, SequenceId::new(5));

    let storage = volume.into_storage();
    assert_eq!(read_slot_seqid(&*storage, SlotKind::Secondary, 0x4000), 4);
    assert_eq!(read_slot_seqid(&*storage, SlotKind::Primary, 0x4000), 5);
}

#[test]
fn both_slots_damaged_is_fatal() {
    let volume = memory_volume(HeaderConfig::default());
    let mut storage = volume.into_storage();
    corrupt_slot(&mut *storage, SlotKind::Primary, 0x4000);
    erase_slot(&mut *storage, SlotKind::Secondary, 0x4000);

    let err = Volume::load(storage, HeaderConfig::default()).unwrap_err();
    match err {
        CoreError::IntegrityFailure { primary, secondary } => {
            assert!(primary.starts_with("corrupt"), "{primary}");
            assert_eq!(secondary, "missing");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn erased_primary_with_large_header_is_found_by_probing() {
    let config = HeaderConfig::default().header_size(0x10000);
    let mut storage = memory_volume(config).into_storage();
    erase_slot(&mut *storage, SlotKind::Primary, 0x10000);

    let volume = Volume::load(storage, HeaderConfig::default()).unwrap();
    assert_eq!(volume.header_size(), 0x10000);
    assert_eq!(volume.authoritative_slot(), SlotKind::Secondary);
    assert_eq!(volume.slot_status(SlotKind::Primary), &SlotStatus::Missing);
}

#[test]
fn header_size_outside_range_is_rejected() {
    let image = formatted_image(HeaderConfig::default().header_size(0x10000));
    let strict = HeaderConfig::default().header_size_range(0x4000, 0x8000);

    let err = Volume::load(Box::new(InMemoryBackend::with_data(image)), strict).unwrap_err();
    assert!(matches!(err, CoreError::IntegrityFailure { .. }));
}

#[test]
fn oversize_commit_leaves_disk_untouched() {
    let image = formatted_image(HeaderConfig::default());
    let backend = CrashableBackend::new(Box::new(InMemoryBackend::with_data(image.clone())));
    let control = backend.control();
    let mut volume = Volume::load(Box::new(backend), HeaderConfig::default()).unwrap();

    volume
        .metadata_mut()
        .set_section("keyslots", json!({ "blob": "k".repeat(0x4000) }))
        .unwrap();
    let err = volume.commit().unwrap_err();
    assert!(matches!(err, CoreError::MetadataTooLarge { .. }));
    assert_eq!(volume.sequence(), SequenceId::new(2));
    assert_eq!(control.bytes_written(), 0);
    assert_eq!(snapshot(&*volume.into_storage()), image);
}

#[test]
fn opaque_sections_survive_commit() {
    let mut volume = memory_volume(HeaderConfig::default());
    volume
        .metadata_mut()
        .set_section(
            "digests",
            json!({ "0": { "type": "pbkdf2", "keyslots": ["0"], "segments": ["0"] } }),
        )
        .unwrap();
    volume.commit().unwrap();

    let image = snapshot(&*volume.into_storage());
    let volume = load_image(image);
    let digests = volume.metadata().section("digests").unwrap();
    assert_eq!(digests["0"]["type"], "pbkdf2");
    assert_eq!(volume.metadata().section("config"), sample_metadata().section("config"));
}

#[test]
fn segment_changes_roundtrip_through_disk() {
    let mut volume = memory_volume(HeaderConfig::default());
    let mut segments = volume.metadata().segments().unwrap().clone();
    segments
        .push(Segment::linear(DATA_OFFSET * 4, Some(1 << 20)))
        .unwrap();
    segments.set_flag(SegmentId::new(1), "backup-previous").unwrap();
    volume.replace_segments(segments, true).unwrap();

    let image = snapshot(&*volume.into_storage());
    let volume = load_image(image);
    let metadata = volume.metadata();
    assert_eq!(metadata.count_segments().unwrap(), 2);
    assert_eq!(metadata.segment_id_by_flag("backup-previous"), Some(SegmentId::new(1)));
    assert_eq!(metadata.segment_size(SegmentId::new(1), true), 2048);
    assert_eq!(metadata.minimal_offset(false), DATA_OFFSET);
}

#[test]
fn file_backed_volume_survives_reopen() {
    let container = TestContainer::new();
    let mut volume = container.format(HeaderConfig::default().label("data"));
    volume
        .metadata_mut()
        .set_section("tokens", json!({ "1": { "type": "luks2-keyring" } }))
        .unwrap();
    let seqid = volume.commit().unwrap();
    drop(volume);

    let volume = container.load(HeaderConfig::default());
    assert_eq!(volume.sequence(), seqid);
    assert_eq!(volume.header_state().label, "data");
    assert!(volume.metadata().section("tokens").unwrap().get("1").is_some());
}

#[test]
fn file_backend_lock_is_exclusive() {
    let container = TestContainer::new();
    let first = FileBackend::open(&container.path).unwrap();
    first.try_lock_exclusive().unwrap();

    let second = FileBackend::open(&container.path).unwrap();
    assert!(matches!(second.try_lock_exclusive(), Err(StorageError::Locked)));
}

#[test]
fn document_equals_after_reload() {
    let image = formatted_image(HeaderConfig::default());
    let volume = load_image(image);
    let expected: Metadata = sample_metadata();
    assert_eq!(volume.metadata(), &expected);
}
