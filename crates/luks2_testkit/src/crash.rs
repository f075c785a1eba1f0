//! Crash recovery testing for the header protocol.
//!
//! This module interrupts header commits at chosen byte boundaries and
//! verifies that a fresh load still finds a consistent document.
//!
//! ## Test Strategy
//!
//! 1. **Torn commit** - crash after every stride of written bytes
//! 2. **Failed sync** - the backend refuses to sync after writing
//! 3. **Damaged slot** - one slot is corrupted between commits
//! 4. **Sequence ids** - ids only grow across commits and reloads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use luks2_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! harness.test_torn_commit();
//! ```

use crate::fixtures::{corrupt_slot, formatted_image, sample_metadata};
use luks2_core::{CoreError, CoreResult, HeaderConfig, Metadata, SlotKind, Volume};
use luks2_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Number of crash points or commits verified.
    pub checked: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, checked: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            checked,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, checked: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            checked,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

/// Shared handle for arming and inspecting a [`CrashableBackend`].
///
/// Stays usable after the backend has been moved into a volume.
#[derive(Debug, Clone)]
pub struct CrashControl {
    state: Arc<CrashState>,
}

impl CrashControl {
    /// Crashes once `bytes` bytes have been written in total.
    pub fn crash_after(&self, bytes: usize) {
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.state.bytes_written.load(Ordering::SeqCst)
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_sync.store(false, Ordering::SeqCst);
    }
}

/// A storage backend wrapper that can simulate crashes.
///
/// A write crossing the crash threshold lands partially; every later
/// write fails. Reads always reach the inner backend, so a volume can be
/// reloaded from the same wrapper after the crash.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: CrashControl,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            control: CrashControl {
                state: Arc::new(CrashState {
                    crash_after_bytes: AtomicUsize::new(usize::MAX),
                    bytes_written: AtomicUsize::new(0),
                    crashed: AtomicBool::new(false),
                    fail_on_sync: AtomicBool::new(false),
                }),
            },
        }
    }

    /// Returns a handle sharing this backend's crash state.
    pub fn control(&self) -> CrashControl {
        self.control.clone()
    }

    /// Sets the backend to crash after writing the specified number of bytes.
    pub fn crash_after(&self, bytes: usize) {
        self.control.crash_after(bytes);
    }

    /// Sets whether sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.control.set_fail_on_sync(fail);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.control.has_crashed()
    }

    /// Unwraps the inner backend.
    pub fn into_inner(self) -> Box<dyn StorageBackend> {
        self.inner
    }

    fn crash(&self, what: &str) -> StorageError {
        self.control.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let state = &self.control.state;
        let current = state.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let crash_threshold = state.crash_after_bytes.load(Ordering::SeqCst);

        if current >= crash_threshold {
            return Err(self.crash("write"));
        }

        // Check if this write will cross the crash threshold
        if current + data.len() > crash_threshold {
            let partial_len = crash_threshold - current;
            if partial_len > 0 {
                let _ = self.inner.write_at(offset, &data[..partial_len]);
            }
            return Err(self.crash("partial write"));
        }

        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.has_crashed() || self.control.state.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Configuration used to format and load volumes.
    pub config: HeaderConfig,
    /// Bytes between consecutive crash points in the torn commit test.
    pub stride: usize,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashRecoveryHarness {
    /// Creates a harness with the default configuration.
    pub fn new() -> Self {
        Self::with_config(HeaderConfig::default())
    }

    /// Creates a harness using `config`.
    pub fn with_config(config: HeaderConfig) -> Self {
        Self {
            config,
            stride: 509,
            results: Vec::new(),
        }
    }

    fn crashable(&self, image: &[u8]) -> (Box<dyn StorageBackend>, CrashControl) {
        let backend = CrashableBackend::new(Box::new(InMemoryBackend::with_data(image.to_vec())));
        let control = backend.control();
        (Box::new(backend), control)
    }

    fn marker(metadata: &Metadata) -> Option<u64> {
        metadata
            .section("tokens")
            .and_then(|tokens| tokens.get("marker"))
            .and_then(serde_json::Value::as_u64)
    }

    /// Crash points covering both slots, their checksum fields and every
    /// `stride` bytes in between.
    fn crash_points(&self, slot_bytes: usize) -> Vec<usize> {
        let total = slot_bytes * 2;
        let mut points: Vec<usize> = (0..=total).step_by(self.stride.max(1)).collect();
        for base in [0, slot_bytes] {
            for delta in [1, 24, 448, 4095, 4096, 4097, slot_bytes - 33, slot_bytes - 32] {
                points.push(base + delta);
            }
        }
        points.push(total);
        points.sort_unstable();
        points.dedup();
        points
    }

    fn torn_commit(&self) -> CoreResult<Result<usize, String>> {
        let image = formatted_image(self.config.clone());
        let (backend, control) = self.crashable(&image);
        let mut volume = Volume::load(backend, self.config.clone())?;
        volume
            .metadata_mut()
            .set_section("tokens", json!({ "marker": 0 }))?;
        volume.commit()?;
        let slot_bytes = control.bytes_written() / 2;

        let points = self.crash_points(slot_bytes);
        for &point in &points {
            let (storage, control) = self.crashable(&image);
            let mut volume = Volume::load(storage, self.config.clone())?;
            volume
                .metadata_mut()
                .set_section("tokens", json!({ "marker": point }))?;
            control.crash_after(point);

            let committed = volume.commit();
            if point >= slot_bytes * 2 && committed.is_err() {
                return Ok(Err(format!("commit failed without a crash at byte {point}")));
            }

            let reloaded = match Volume::load(volume.into_storage(), self.config.clone()) {
                Ok(volume) => volume,
                Err(e) => return Ok(Err(format!("crash at byte {point}: reload failed: {e}"))),
            };
            let expected = (point >= slot_bytes).then_some(point as u64);
            let actual = Self::marker(reloaded.metadata());
            if actual != expected {
                return Ok(Err(format!(
                    "crash at byte {point}: expected marker {expected:?}, found {actual:?}"
                )));
            }
        }
        Ok(Ok(points.len()))
    }

    /// Tests that a commit interrupted at any byte reloads as the old or the
    /// new document.
    pub fn test_torn_commit(&mut self) -> CrashRecoveryResult {
        self.record("Torn commit reloads old or new document", self.torn_commit())
    }

    fn failed_sync(&self) -> CoreResult<Result<usize, String>> {
        let image = formatted_image(self.config.clone().sync_on_commit(true));
        let (storage, control) = self.crashable(&image);
        let mut volume = Volume::load(storage, self.config.clone().sync_on_commit(true))?;
        volume
            .metadata_mut()
            .set_section("tokens", json!({ "marker": 1 }))?;
        control.set_fail_on_sync(true);

        match volume.commit() {
            Err(CoreError::WriteFailed { slot, .. }) if slot == SlotKind::Secondary => {}
            other => return Ok(Err(format!("expected secondary write failure, got {other:?}"))),
        }

        let reloaded = Volume::load(volume.into_storage(), self.config.clone())?;
        match Self::marker(reloaded.metadata()) {
            None | Some(1) => Ok(Ok(1)),
            Some(other) => Ok(Err(format!("unexpected marker {other}"))),
        }
    }

    /// Tests that a failed sync is reported and leaves a loadable volume.
    pub fn test_failed_sync(&mut self) -> CrashRecoveryResult {
        self.record("Failed sync leaves a loadable volume", self.failed_sync())
    }

    fn damaged_slot(&self) -> CoreResult<Result<usize, String>> {
        let mut checked = 0;
        for slot in [SlotKind::Primary, SlotKind::Secondary] {
            let mut storage: Box<dyn StorageBackend> =
                Box::new(InMemoryBackend::with_data(formatted_image(self.config.clone())));
            corrupt_slot(&mut *storage, slot, self.config.header_size);

            let mut volume = Volume::load(storage, self.config.clone())?;
            if volume.authoritative_slot() != slot.other() {
                return Ok(Err(format!("damaged {slot} slot was chosen")));
            }
            if volume.metadata() != &sample_metadata() {
                return Ok(Err(format!("document changed after damaging {slot} slot")));
            }

            volume.commit()?;
            let reloaded = Volume::load(volume.into_storage(), self.config.clone())?;
            if !reloaded.slot_status(slot).is_valid() {
                return Ok(Err(format!("commit did not repair the {slot} slot")));
            }
            checked += 1;
        }
        Ok(Ok(checked))
    }

    /// Tests that a damaged slot is skipped and repaired by the next commit.
    pub fn test_damaged_slot(&mut self) -> CrashRecoveryResult {
        self.record("Damaged slot is skipped and repaired", self.damaged_slot())
    }

    fn monotonic_seqids(&self) -> CoreResult<Result<usize, String>> {
        let storage: Box<dyn StorageBackend> =
            Box::new(InMemoryBackend::with_data(formatted_image(self.config.clone())));
        let mut volume = Volume::load(storage, self.config.clone())?;
        let mut last = volume.sequence();

        for round in 0..8 {
            let seqid = volume.commit()?;
            if seqid <= last {
                return Ok(Err(format!("round {round}: {seqid} does not follow {last}")));
            }
            volume = Volume::load(volume.into_storage(), self.config.clone())?;
            if volume.sequence() != seqid {
                return Ok(Err(format!("round {round}: reload found {}", volume.sequence())));
            }
            last = seqid;
        }
        Ok(Ok(8))
    }

    /// Tests that sequence ids grow across commits and reloads.
    pub fn test_monotonic_seqids(&mut self) -> CrashRecoveryResult {
        self.record("Sequence ids grow across commits", self.monotonic_seqids())
    }

    fn record(
        &mut self,
        description: &str,
        outcome: CoreResult<Result<usize, String>>,
    ) -> CrashRecoveryResult {
        let result = match outcome {
            Ok(Ok(checked)) => CrashRecoveryResult::pass(description, checked),
            Ok(Err(message)) => CrashRecoveryResult::fail(description, 0, &message),
            Err(e) => CrashRecoveryResult::fail(description, 0, &e.to_string()),
        };
        self.results.push(result.clone());
        result
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        self.results.clear();

        self.test_torn_commit();
        self.test_failed_sync();
        self.test_damaged_slot();
        self.test_monotonic_seqids();

        self.results.clone()
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let total = self.results.len();

        let mut summary = format!(
            "\n=== Crash Recovery Test Summary ===\n\
             Passed: {}/{}\n\n",
            passed, total
        );

        for result in &self.results {
            let status = if result.passed { "✓" } else { "✗" };
            summary.push_str(&format!(
                "{} {} ({} checked)\n",
                status, result.description, result.checked
            ));
            if let Some(ref error) = result.error {
                summary.push_str(&format!("  Error: {}\n", error));
            }
        }

        summary
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}
