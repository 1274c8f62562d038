#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Proof-of-work math core for the double-SHA256 nonce search.
//!
//! This crate provides:
//! - The hash core: [`sha256`], [`double_sha256`] and block-level compression.
//! - The target comparator: [`meets_target`] and the [`Target`] newtype.
//! - The shared data model: [`HeaderPrefix`], [`Hash`], [`ScanResult`], [`PowError`].
//! - `JobContext`: per-job precomputation (SHA-256 midstate of the first header block)
//!   so that scanning one nonce costs two compressions plus the second hash.

pub mod sha256;
pub mod target;

pub use sha256::{double_sha256, sha256};
pub use target::{meets_target, target_from_difficulty, Target, DIFFICULTY_ONE_TARGET};

use sha256::{compress, compress_words, sha256_of_state, state_to_digest, INITIAL_STATE};
use target::meets_target_words;

/// Crate version reported to hosts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bytes of a block header preceding the nonce.
pub const HEADER_PREFIX_LEN: usize = 76;
/// Bytes of a complete block header.
pub const HEADER_LEN: usize = 80;
/// Bytes of a hash or target.
pub const HASH_LEN: usize = 32;
/// Header prefix length in 32-bit words.
pub const HEADER_PREFIX_WORDS: usize = HEADER_PREFIX_LEN / 4;

/// Output of double-SHA256 over a completed header.
pub type Hash = [u8; HASH_LEN];

/// Caller/input errors. Never folded into a scan outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PowError {
    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Outcome of a nonce search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScanResult {
    /// The first qualifying nonce in scan order.
    Found(u32),
    /// The whole range was searched and nothing qualified.
    Exhausted,
    /// The GPU path could not run. Says nothing about the range.
    Unavailable,
}

impl ScanResult {
    pub fn found(&self) -> Option<u32> {
        match self {
            ScanResult::Found(nonce) => Some(*nonce),
            _ => None,
        }
    }
}

/// The 76 bytes of a block header that precede the nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeaderPrefix([u8; HEADER_PREFIX_LEN]);

impl HeaderPrefix {
    pub const fn new(bytes: [u8; HEADER_PREFIX_LEN]) -> Self {
        Self(bytes)
    }

    /// Validate a host-supplied prefix. Anything but exactly 76 bytes is rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PowError> {
        let bytes: [u8; HEADER_PREFIX_LEN] =
            bytes.try_into().map_err(|_| PowError::InvalidLength {
                what: "header prefix",
                expected: HEADER_PREFIX_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HEADER_PREFIX_LEN] {
        &self.0
    }

    /// The prefix as nineteen big-endian words, the hash core's message layout.
    pub fn to_words(&self) -> [u32; HEADER_PREFIX_WORDS] {
        let mut words = [0u32; HEADER_PREFIX_WORDS];
        for (w, c) in words.iter_mut().zip(self.0.chunks_exact(4)) {
            *w = u32::from_be_bytes([c[0], c[1], c[2], c[3]]);
        }
        words
    }

    /// Complete the header: `prefix || le32(nonce)`.
    pub fn with_nonce(&self, nonce: u32) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..HEADER_PREFIX_LEN].copy_from_slice(&self.0);
        header[HEADER_PREFIX_LEN..].copy_from_slice(&nonce.to_le_bytes());
        header
    }
}

impl TryFrom<&[u8]> for HeaderPrefix {
    type Error = PowError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(bytes)
    }
}

/// Double-SHA256 of a complete 80-byte header.
pub fn hash_header(header: &[u8]) -> Result<Hash, PowError> {
    if header.len() != HEADER_LEN {
        return Err(PowError::InvalidLength {
            what: "block header",
            expected: HEADER_LEN,
            actual: header.len(),
        });
    }
    Ok(double_sha256(header))
}

/// Precomputed context for a single job (header prefix + target).
///
/// The first 64 header bytes never change while the nonce varies, so their compression
/// is done once here. Per nonce only the 16-byte tail block (three prefix words, the
/// nonce, padding) and the second hash remain.
#[derive(Clone, Debug)]
pub struct JobContext {
    prefix: HeaderPrefix,
    target: Target,
    midstate: [u32; 8],
    tail: [u32; 3],
    target_words: [u32; 8],
}

impl JobContext {
    pub fn new(prefix: HeaderPrefix, target: Target) -> Self {
        let mut first_block = [0u8; 64];
        first_block.copy_from_slice(&prefix.as_bytes()[..64]);
        let mut midstate = INITIAL_STATE;
        compress(&mut midstate, &first_block);

        let words = prefix.to_words();
        JobContext {
            prefix,
            target,
            midstate,
            tail: [words[16], words[17], words[18]],
            target_words: target.to_words(),
        }
    }

    /// Validate raw host inputs and build the context.
    pub fn from_slices(prefix: &[u8], target: &[u8]) -> Result<Self, PowError> {
        Ok(Self::new(
            HeaderPrefix::from_slice(prefix)?,
            Target::from_slice(target)?,
        ))
    }

    pub fn prefix(&self) -> &HeaderPrefix {
        &self.prefix
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// SHA-256 midstate after the first 64 header bytes.
    pub fn midstate(&self) -> &[u32; 8] {
        &self.midstate
    }

    fn hash_words(&self, nonce: u32) -> [u32; 8] {
        // The nonce is serialized little-endian; the hash reads that word big-endian.
        let nonce_word = u32::from_be_bytes(nonce.to_le_bytes());
        let mut block = [0u32; 16];
        block[..3].copy_from_slice(&self.tail);
        block[3] = nonce_word;
        block[4] = 0x8000_0000;
        block[15] = (HEADER_LEN * 8) as u32;

        let mut state = self.midstate;
        compress_words(&mut state, &block);
        sha256_of_state(&state)
    }

    /// Double-SHA256 of the header completed with `nonce`.
    pub fn hash_for_nonce(&self, nonce: u32) -> Hash {
        state_to_digest(&self.hash_words(nonce))
    }

    /// Whether `nonce` completes a header whose hash meets the target.
    #[inline]
    pub fn is_valid_nonce(&self, nonce: u32) -> bool {
        meets_target_words(&self.hash_words(nonce), &self.target_words)
    }
}

/// Check the hash core against the NIST `"abc"` vector.
pub fn self_test() -> bool {
    const ABC: [u8; HASH_LEN] = [
        0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae, 0x22,
        0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61, 0xf2, 0x00,
        0x15, 0xad,
    ];
    sha256(b"abc") == ABC
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    const GENESIS_HEADER: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";
    const GENESIS_HASH: &str = "6fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000";
    const GENESIS_NONCE: u32 = 2_083_236_893;

    fn genesis() -> Vec<u8> {
        hex::decode(GENESIS_HEADER).unwrap()
    }

    #[test]
    fn hashes_genesis_header() {
        let header = genesis();
        let hash = hash_header(&header).unwrap();
        assert_eq!(hex::encode(hash), GENESIS_HASH);
    }

    #[test]
    fn nonce_is_serialized_little_endian() {
        let header = genesis();
        let prefix = HeaderPrefix::from_slice(&header[..76]).unwrap();
        assert_eq!(&prefix.with_nonce(GENESIS_NONCE)[..], &header[..]);
        assert_eq!(&header[76..], &[0x1d, 0xac, 0x2b, 0x7c]);
    }

    #[test]
    fn hash_header_rejects_other_lengths() {
        assert_eq!(
            hash_header(&[0u8; 79]),
            Err(PowError::InvalidLength {
                what: "block header",
                expected: 80,
                actual: 79
            })
        );
        assert!(hash_header(&[0u8; 81]).is_err());
        assert!(hash_header(&[]).is_err());
    }

    #[test]
    fn prefix_rejects_other_lengths() {
        assert!(HeaderPrefix::from_slice(&[0u8; 75]).is_err());
        assert!(HeaderPrefix::from_slice(&[0u8; 80]).is_err());
        assert!(JobContext::from_slices(&[0u8; 76], &[0u8; 31]).is_err());
        assert!(JobContext::from_slices(&[0u8; 77], &[0u8; 32]).is_err());
    }

    #[test]
    fn midstate_path_matches_full_hash() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(12345);
        for _ in 0..64 {
            let mut prefix = [0u8; HEADER_PREFIX_LEN];
            rng.fill(&mut prefix[..]);
            let prefix = HeaderPrefix::new(prefix);
            let ctx = JobContext::new(prefix, Target::MAX);
            for nonce in [0u32, 1, rng.gen(), u32::MAX - 1, u32::MAX] {
                assert_eq!(
                    ctx.hash_for_nonce(nonce),
                    double_sha256(&prefix.with_nonce(nonce)),
                    "nonce {nonce}"
                );
            }
        }
    }

    #[test]
    fn fast_validity_matches_byte_comparison() {
        let header = genesis();
        let genesis_hash = hash_header(&header).unwrap();
        let ctx = JobContext::from_slices(&header[..76], &genesis_hash).unwrap();

        assert!(ctx.is_valid_nonce(GENESIS_NONCE));
        for nonce in GENESIS_NONCE - 50..GENESIS_NONCE + 50 {
            assert_eq!(
                ctx.is_valid_nonce(nonce),
                meets_target(&ctx.hash_for_nonce(nonce), ctx.target().as_bytes())
            );
        }
    }

    #[test]
    fn context_keeps_its_inputs() {
        let header = genesis();
        let target = [0x0fu8; 32];
        let ctx = JobContext::from_slices(&header[..76], &target).unwrap();
        assert_eq!(ctx.prefix().as_bytes()[..], header[..76]);
        assert_eq!(ctx.target().as_bytes(), &target);
        assert_eq!(ctx.hash_for_nonce(GENESIS_NONCE), hash_header(&header).unwrap());
    }

    #[test]
    fn self_test_passes() {
        assert!(self_test());
    }

    #[test]
    fn scan_result_accessor() {
        assert_eq!(ScanResult::Found(9).found(), Some(9));
        assert_eq!(ScanResult::Exhausted.found(), None);
        assert_eq!(ScanResult::Unavailable.found(), None);
    }
}
