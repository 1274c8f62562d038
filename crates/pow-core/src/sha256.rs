//! SHA-256 (FIPS 180-4) and double-SHA256.
//!
//! The compression function is exposed at block granularity so that mining code can
//! keep a midstate: an 80-byte header spans two blocks, and the first one does not
//! depend on the nonce.

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Length of one SHA-256 message block in bytes.
pub const BLOCK_LEN: usize = 64;

pub(crate) const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

/// Initial hash value H(0).
pub const INITIAL_STATE: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// Apply one compression round over a block given as sixteen big-endian words.
#[inline]
pub fn compress_words(state: &mut [u32; 8], block: &[u32; 16]) {
    let mut w = [0u32; 64];
    w[..16].copy_from_slice(block);
    for i in 16..64 {
        let s0 = w[i - 15].rotate_right(7) ^ w[i - 15].rotate_right(18) ^ (w[i - 15] >> 3);
        let s1 = w[i - 2].rotate_right(17) ^ w[i - 2].rotate_right(19) ^ (w[i - 2] >> 10);
        w[i] = w[i - 16]
            .wrapping_add(s0)
            .wrapping_add(w[i - 7])
            .wrapping_add(s1);
    }

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;
    for i in 0..64 {
        let s1 = e.rotate_right(6) ^ e.rotate_right(11) ^ e.rotate_right(25);
        let ch = (e & f) ^ (!e & g);
        let t1 = h
            .wrapping_add(s1)
            .wrapping_add(ch)
            .wrapping_add(K[i])
            .wrapping_add(w[i]);
        let s0 = a.rotate_right(2) ^ a.rotate_right(13) ^ a.rotate_right(22);
        let maj = (a & b) ^ (a & c) ^ (b & c);
        let t2 = s0.wrapping_add(maj);

        h = g;
        g = f;
        f = e;
        e = d.wrapping_add(t1);
        d = c;
        c = b;
        b = a;
        a = t1.wrapping_add(t2);
    }

    for (slot, v) in state.iter_mut().zip([a, b, c, d, e, f, g, h]) {
        *slot = slot.wrapping_add(v);
    }
}

/// Apply one compression round over a raw 64-byte block.
#[inline]
pub fn compress(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]) {
    let mut words = [0u32; 16];
    for (word, chunk) in words.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    compress_words(state, &words);
}

/// Serialize a state as a big-endian digest.
#[inline]
pub fn state_to_digest(state: &[u32; 8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    for (chunk, word) in out.chunks_exact_mut(4).zip(state) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// SHA-256 of an arbitrary byte sequence (including the empty one).
pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut state = INITIAL_STATE;

    let mut blocks = data.chunks_exact(BLOCK_LEN);
    for block in &mut blocks {
        let mut buf = [0u8; BLOCK_LEN];
        buf.copy_from_slice(block);
        compress(&mut state, &buf);
    }

    // 0x80 terminator, zero fill, 64-bit big-endian bit length.
    let tail = blocks.remainder();
    let bit_len = (data.len() as u64).wrapping_mul(8);
    let mut last = [0u8; BLOCK_LEN * 2];
    last[..tail.len()].copy_from_slice(tail);
    last[tail.len()] = 0x80;
    let padded_len = if tail.len() < BLOCK_LEN - 8 {
        BLOCK_LEN
    } else {
        BLOCK_LEN * 2
    };
    last[padded_len - 8..padded_len].copy_from_slice(&bit_len.to_be_bytes());

    for block in last[..padded_len].chunks_exact(BLOCK_LEN) {
        let mut buf = [0u8; BLOCK_LEN];
        buf.copy_from_slice(block);
        compress(&mut state, &buf);
    }

    state_to_digest(&state)
}

/// `sha256(sha256(data))`.
pub fn double_sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    sha256(&sha256(data))
}

/// Second SHA-256 pass over a 32-byte digest held as eight big-endian words.
///
/// The input fits one padded block, so no byte serialization is needed between passes.
#[inline]
pub(crate) fn sha256_of_state(first: &[u32; 8]) -> [u32; 8] {
    let mut block = [0u32; 16];
    block[..8].copy_from_slice(first);
    block[8] = 0x8000_0000;
    block[15] = 256;
    let mut state = INITIAL_STATE;
    compress_words(&mut state, &block);
    state
}
