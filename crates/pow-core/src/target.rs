//! Big-endian 256-bit targets and the proof-of-work comparison.

use primitive_types::U256;

use crate::{PowError, HASH_LEN};

/// Pool difficulty 1 (`nbits = 0x1d00ffff`).
pub const DIFFICULTY_ONE_TARGET: [u8; HASH_LEN] = [
    0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Inclusive upper bound a candidate hash must not exceed.
///
/// Byte 0 is the most significant byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Target([u8; HASH_LEN]);

impl Target {
    /// Every hash qualifies.
    pub const MAX: Target = Target([0xff; HASH_LEN]);
    /// Only the all-zero hash qualifies.
    pub const ZERO: Target = Target([0u8; HASH_LEN]);

    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Validate a host-supplied target. Anything but exactly 32 bytes is rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PowError> {
        let bytes: [u8; HASH_LEN] = bytes.try_into().map_err(|_| PowError::InvalidLength {
            what: "target",
            expected: HASH_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// The target as eight big-endian words, the layout the hash core compares in.
    pub fn to_words(&self) -> [u32; 8] {
        let mut words = [0u32; 8];
        for (w, c) in words.iter_mut().zip(self.0.chunks_exact(4)) {
            *w = u32::from_be_bytes([c[0], c[1], c[2], c[3]]);
        }
        words
    }

    /// Whether `hash` satisfies this target.
    #[inline]
    pub fn is_met_by(&self, hash: &[u8; HASH_LEN]) -> bool {
        meets_target(hash, &self.0)
    }
}

impl From<[u8; HASH_LEN]> for Target {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Target {
    type Error = PowError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(bytes)
    }
}

/// `hash <= target`, both read as 32-byte big-endian unsigned magnitudes.
///
/// Slices of `u8` order lexicographically from index 0, which is exactly the
/// most-significant-byte-first comparison; full equality qualifies.
#[inline]
pub fn meets_target(hash: &[u8; HASH_LEN], target: &[u8; HASH_LEN]) -> bool {
    hash[..] <= target[..]
}

/// Word-wise form of [`meets_target`] for hashes held as big-endian words.
#[inline]
pub(crate) fn meets_target_words(hash: &[u32; 8], target: &[u32; 8]) -> bool {
    hash <= target
}

/// Convert a pool share difficulty into a target: `DIFFICULTY_ONE_TARGET / difficulty`,
/// rounded down.
///
/// Difficulties at or below 1 (and NaN) are capped at the difficulty-1 target; the
/// result is never easier than that.
pub fn target_from_difficulty(difficulty: f64) -> Target {
    if difficulty.is_nan() || difficulty <= 1.0 {
        return Target(DIFFICULTY_ONE_TARGET);
    }

    // 32 fractional bits keep non-integer difficulties exact enough; the difficulty-1
    // target is below 2^224 so the shifted numerator cannot overflow.
    let numerator = U256::from_big_endian(&DIFFICULTY_ONE_TARGET) * U256::from(1u64 << 32);
    let scaled = difficulty * 4_294_967_296.0;
    let divisor = if scaled >= u128::MAX as f64 {
        U256::from(u128::MAX)
    } else {
        U256::from(scaled as u128)
    };

    Target((numerator / divisor).to_big_endian())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn hex32(s: &str) -> [u8; 32] {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).unwrap();
        out
    }

    #[test]
    fn agrees_with_u256_ordering() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(12345);
        for _ in 0..2_000 {
            let mut h = [0u8; 32];
            let mut t = [0u8; 32];
            rng.fill(&mut h);
            rng.fill(&mut t);
            // Force long shared prefixes so ties are resolved deep in the array.
            let shared = rng.gen_range(0..32);
            t[..shared].copy_from_slice(&h[..shared]);

            let expected = U256::from_big_endian(&h) <= U256::from_big_endian(&t);
            assert_eq!(meets_target(&h, &t), expected);
            assert_eq!(
                meets_target_words(&Target(h).to_words(), &Target(t).to_words()),
                expected
            );
        }
    }

    #[test]
    fn equality_qualifies() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let mut h = [0u8; 32];
            rng.fill(&mut h);
            assert!(meets_target(&h, &h));
        }
        assert!(Target::ZERO.is_met_by(&[0u8; 32]));
        assert!(Target::MAX.is_met_by(&[0xff; 32]));
    }

    #[test]
    fn monotonic_in_target() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(99);
        for _ in 0..1_000 {
            let mut h = [0u8; 32];
            let mut a = [0u8; 32];
            let mut b = [0u8; 32];
            rng.fill(&mut h);
            rng.fill(&mut a);
            rng.fill(&mut b);
            let (t1, t2) = if a <= b { (a, b) } else { (b, a) };
            if meets_target(&h, &t1) {
                assert!(meets_target(&h, &t2));
            }
        }
    }

    #[test]
    fn most_significant_byte_dominates() {
        let mut hash = [0u8; 32];
        hash[0] = 0x01;
        let mut target = [0xffu8; 32];
        target[0] = 0x00;
        assert!(!meets_target(&hash, &target));

        hash[0] = 0x00;
        hash[31] = 0xff;
        target = [0u8; 32];
        target[30] = 0x01;
        assert!(meets_target(&hash, &target));
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Target::from_slice(&[0u8; 31]).unwrap_err();
        assert_eq!(
            err,
            PowError::InvalidLength {
                what: "target",
                expected: 32,
                actual: 31
            }
        );
        assert!(Target::try_from(&[0u8; 33][..]).is_err());
        assert!(Target::try_from(&[0u8; 32][..]).is_ok());
    }

    #[test]
    fn difficulty_conversion() {
        assert_eq!(target_from_difficulty(1.0).as_bytes(), &DIFFICULTY_ONE_TARGET);
        assert_eq!(target_from_difficulty(0.001).as_bytes(), &DIFFICULTY_ONE_TARGET);
        assert_eq!(target_from_difficulty(-5.0).as_bytes(), &DIFFICULTY_ONE_TARGET);
        assert_eq!(target_from_difficulty(f64::NAN).as_bytes(), &DIFFICULTY_ONE_TARGET);
        assert_eq!(
            target_from_difficulty(2.0).as_bytes(),
            &hex32("000000007fff8000000000000000000000000000000000000000000000000000")
        );
        assert_eq!(
            target_from_difficulty(1.5).as_bytes(),
            &hex32("00000000aaaa0000000000000000000000000000000000000000000000000000")
        );
        assert_eq!(
            target_from_difficulty(1000.0).as_bytes(),
            &hex32("00000000004188f5c28f5c28f5c28f5c28f5c28f5c28f5c28f5c28f5c28f5c28")
        );
    }

    #[test]
    fn harder_difficulty_never_yields_easier_target() {
        let mut last = target_from_difficulty(1.0);
        for d in [1.5, 2.0, 16.0, 1e3, 1e6, 1e12, 1e20, f64::INFINITY] {
            let t = target_from_difficulty(d);
            assert!(t.as_bytes() <= last.as_bytes(), "difficulty {d}");
            last = t;
        }
    }
}
