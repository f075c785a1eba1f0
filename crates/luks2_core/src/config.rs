//! Volume configuration.

use crate::error::{CoreError, CoreResult};
use crate::header::{check_str, ChecksumAlgorithm, HEADER_SIZES, LABEL_LEN, SUBSYSTEM_LEN};
use uuid::Uuid;

/// Configuration for formatting and opening a volume.
#[derive(Debug, Clone)]
pub struct HeaderConfig {
    /// Size of each header slot written by `format`.
    pub header_size: u64,

    /// Smallest slot size accepted on load.
    pub min_header_size: u64,

    /// Largest slot size accepted on load.
    pub max_header_size: u64,

    /// Checksum algorithm stamped by `format`. Commits keep the
    /// algorithm of the loaded volume.
    pub checksum_algorithm: ChecksumAlgorithm,

    /// Whether to sync the backend after each slot write.
    pub sync_on_commit: bool,

    /// Label stamped by `format`.
    pub label: Option<String>,

    /// Subsystem stamped by `format`.
    pub subsystem: Option<String>,

    /// UUID stamped by `format` (random if unset).
    pub uuid: Option<Uuid>,

    /// Whether the header lives apart from the data it describes.
    ///
    /// Detached headers skip the check that segments start past both
    /// slots.
    pub detached_header: bool,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            header_size: 0x4000,       // 16 KiB
            min_header_size: 0x4000,   // 16 KiB
            max_header_size: 0x40_0000, // 4 MiB
            checksum_algorithm: ChecksumAlgorithm::Sha256,
            sync_on_commit: true,
            label: None,
            subsystem: None,
            uuid: None,
            detached_header: false,
        }
    }
}

impl HeaderConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the slot size used by `format`.
    #[must_use]
    pub const fn header_size(mut self, size: u64) -> Self {
        self.header_size = size;
        self
    }

    /// Sets the range of slot sizes accepted on load.
    #[must_use]
    pub const fn header_size_range(mut self, min: u64, max: u64) -> Self {
        self.min_header_size = min;
        self.max_header_size = max;
        self
    }

    /// Sets the checksum algorithm used by `format`.
    #[must_use]
    pub const fn checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }

    /// Sets whether to sync after each slot write.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the subsystem.
    #[must_use]
    pub fn subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    /// Sets the UUID.
    #[must_use]
    pub const fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Sets whether the header is detached from its data.
    #[must_use]
    pub const fn detached_header(mut self, value: bool) -> Self {
        self.detached_header = value;
        self
    }

    /// Returns true if `size` is a slot size this configuration accepts.
    #[must_use]
    pub fn accepts_header_size(&self, size: u64) -> bool {
        HEADER_SIZES.contains(&size) && (self.min_header_size..=self.max_header_size).contains(&size)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the size range is empty,
    /// the format size is not an accepted slot size, or a text field does
    /// not fit the preamble.
    pub fn validate(&self) -> CoreResult<()> {
        if self.min_header_size > self.max_header_size {
            return Err(CoreError::invalid_argument(format!(
                "header size range {:#x}..={:#x} is empty",
                self.min_header_size, self.max_header_size
            )));
        }
        if !self.accepts_header_size(self.header_size) {
            return Err(CoreError::invalid_argument(format!(
                "header size {:#x} is not a supported slot size",
                self.header_size
            )));
        }
        if let Some(label) = &self.label {
            check_str("label", LABEL_LEN, label)?;
        }
        if let Some(subsystem) = &self.subsystem {
            check_str("subsystem", SUBSYSTEM_LEN, subsystem)?;
        }
        Ok(())
    }
}
