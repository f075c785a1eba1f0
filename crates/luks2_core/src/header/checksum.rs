//! Header checksums.

use crate::error::{CoreError, CoreResult};
use crate::header::binary::{BINARY_HEADER_SIZE, CHECKSUM_LEN, CHECKSUM_OFFSET};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Digest algorithm named in a slot's preamble.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// SHA-256.
    #[default]
    Sha256,
    /// SHA-512.
    Sha512,
}

impl ChecksumAlgorithm {
    /// Returns the name stored in the preamble.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Looks up an algorithm by its preamble name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Returns the digest length in bytes.
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            CoreError::invalid_argument(format!("unsupported checksum algorithm {s:?}"))
        })
    }
}

enum DigestState {
    Sha256(Sha256),
    Sha512(Sha512),
}

/// Hash context for one header region.
///
/// Created per computation and consumed by [`HeaderDigest::finalize`];
/// dropping it early releases it on error paths.
pub struct HeaderDigest {
    state: DigestState,
}

impl HeaderDigest {
    /// Starts a digest with `algorithm`.
    #[must_use]
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let state = match algorithm {
            ChecksumAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => DigestState::Sha512(Sha512::new()),
        };
        Self { state }
    }

    /// Feeds `data` into the digest.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            DigestState::Sha256(h) => h.update(data),
            DigestState::Sha512(h) => h.update(data),
        }
    }

    /// Finishes the digest.
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        match self.state {
            DigestState::Sha256(h) => h.finalize().to_vec(),
            DigestState::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Computes the checksum of a whole header region.
///
/// The checksum field inside the preamble counts as zeroes, so the stored
/// digest does not affect the result.
///
/// # Errors
///
/// Returns `CorruptHeader` if `region` is shorter than the binary preamble.
pub fn header_checksum(algorithm: ChecksumAlgorithm, region: &[u8]) -> CoreResult<Vec<u8>> {
    if region.len() < BINARY_HEADER_SIZE {
        return Err(CoreError::corrupt_header(format!(
            "header region of {} bytes is shorter than the {BINARY_HEADER_SIZE}-byte preamble",
            region.len()
        )));
    }

    let mut digest = HeaderDigest::new(algorithm);
    digest.update(&region[..CHECKSUM_OFFSET]);
    digest.update(&[0u8; CHECKSUM_LEN]);
    digest.update(&region[CHECKSUM_OFFSET + CHECKSUM_LEN..]);
    Ok(digest.finalize())
}

/// Returns true if the digest stored in `region` matches its content.
///
/// A region shorter than the preamble never verifies.
#[must_use]
pub fn verify_header_checksum(algorithm: ChecksumAlgorithm, region: &[u8]) -> bool {
    let Ok(computed) = header_checksum(algorithm, region) else {
        return false;
    };
    let stored = &region[CHECKSUM_OFFSET..CHECKSUM_OFFSET + computed.len()];
    stored == computed.as_slice()
}
