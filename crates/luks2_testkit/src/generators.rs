//! Property-based test generators using proptest.
//!
//! Provides strategies for segments and segment collections that satisfy
//! the document invariants (non-zero sizes, valid sector sizes, at most one
//! segment in re-encryption).

use luks2_core::{Segment, SegmentFlag, SegmentId, Segments};
use proptest::prelude::*;

/// Strategy for generating segment ids.
pub fn segment_id_strategy() -> impl Strategy<Value = SegmentId> {
    (0u32..64).prop_map(SegmentId::new)
}

/// Strategy for generating cipher specifications.
pub fn cipher_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("aes-xts-plain64".to_string()),
        Just("aes-cbc-essiv:sha256".to_string()),
        Just("serpent-xts-plain64".to_string()),
        Just("null".to_string()),
    ]
}

/// Strategy for generating valid sector sizes.
pub fn sector_size_strategy() -> impl Strategy<Value = u32> {
    prop::sample::select(vec![512u32, 1024, 2048, 4096])
}

/// Strategy for generating segment lengths (`None` is dynamic).
pub fn length_strategy() -> impl Strategy<Value = Option<u64>> {
    prop_oneof![
        1 => Just(None),
        3 => (1u64..1 << 40).prop_map(Some),
    ]
}

/// Strategy for generating bookkeeping flags.
pub fn bookkeeping_flag_strategy() -> impl Strategy<Value = SegmentFlag> {
    prop_oneof![
        Just(SegmentFlag::ReencryptPrevious),
        Just(SegmentFlag::ReencryptFinal),
        Just(SegmentFlag::ReencryptMovedSegment),
        "[a-z]{1,8}".prop_map(|s| SegmentFlag::Other(format!("reencrypt-{s}"))),
    ]
}

/// Strategy for generating a segment starting at or past `min_offset`.
pub fn segment_strategy(min_offset: u64) -> impl Strategy<Value = Segment> {
    let offset = min_offset..min_offset + (1 << 40);
    prop_oneof![
        (offset.clone(), length_strategy())
            .prop_map(|(offset, length)| Segment::linear(offset, length)),
        (
            offset,
            any::<u32>(),
            length_strategy(),
            cipher_strategy(),
            sector_size_strategy()
        )
            .prop_map(|(offset, iv, length, cipher, sector)| {
                Segment::crypt(offset, u64::from(iv), length, &cipher, sector)
            }),
    ]
}

/// Strategy for generating a collection with sparse ids.
///
/// Some segments carry a bookkeeping flag; at most one is marked
/// `in-reencryption`.
pub fn segments_strategy(min_offset: u64, max_len: usize) -> impl Strategy<Value = Segments> {
    let entry = (
        segment_strategy(min_offset),
        prop::option::weighted(0.25, bookkeeping_flag_strategy()),
    )
        .prop_map(|(mut segment, flag)| {
            if let Some(flag) = flag {
                segment
                    .set_flag(flag.as_str())
                    .expect("Failed to set generated flag");
            }
            segment
        });

    (
        prop::collection::btree_map(segment_id_strategy(), entry, 0..=max_len),
        any::<prop::sample::Index>(),
        any::<bool>(),
    )
        .prop_map(|(entries, pick, reencrypt)| {
            let mut segments: Segments = entries.into_iter().collect();
            if reencrypt && !segments.is_empty() {
                let ids: Vec<SegmentId> = segments.iter().map(|(id, _)| id).collect();
                segments
                    .set_flag(*pick.get(&ids), SegmentFlag::InReencryption.as_str())
                    .expect("Failed to mark segment in re-encryption");
            }
            segments
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
