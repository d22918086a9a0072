//! SM3 cryptographic hash (GB/T 32905-2016).
//!
//! Merkle–Damgård over 64-byte blocks with a 64-round compression function
//! and a 256-bit output.

use zeroize::Zeroize;

use crate::core::DIGEST_SIZE;

const BLOCK_LEN: usize = 64;

const IV: [u32; 8] = [
    0x7380_166F,
    0x4914_B2B9,
    0x1724_42D7,
    0xDA8A_0600,
    0xA96F_30BC,
    0x1631_38AA,
    0xE38D_EE4D,
    0xB0FB_0E4E,
];

const T_LOW: u32 = 0x79CC_4519;
const T_HIGH: u32 = 0x7A87_9D8A;

#[inline(always)]
fn p0(x: u32) -> u32 {
    x ^ x.rotate_left(9) ^ x.rotate_left(17)
}

#[inline(always)]
fn p1(x: u32) -> u32 {
    x ^ x.rotate_left(15) ^ x.rotate_left(23)
}

#[inline(always)]
fn ff(x: u32, y: u32, z: u32, round: usize) -> u32 {
    if round < 16 {
        x ^ y ^ z
    } else {
        (x & y) | (x & z) | (y & z)
    }
}

#[inline(always)]
fn gg(x: u32, y: u32, z: u32, round: usize) -> u32 {
    if round < 16 {
        x ^ y ^ z
    } else {
        (x & y) | (!x & z)
    }
}

fn compress(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]) {
    let mut w = [0u32; 68];
    for (i, chunk) in block.chunks_exact(4).enumerate() {
        w[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    for j in 16..68 {
        w[j] = p1(w[j - 16] ^ w[j - 9] ^ w[j - 3].rotate_left(15))
            ^ w[j - 13].rotate_left(7)
            ^ w[j - 6];
    }

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;

    for j in 0..64 {
        let t = if j < 16 { T_LOW } else { T_HIGH };
        let a12 = a.rotate_left(12);
        let ss1 = a12
            .wrapping_add(e)
            .wrapping_add(t.rotate_left((j % 32) as u32))
            .rotate_left(7);
        let ss2 = ss1 ^ a12;
        let w1 = w[j] ^ w[j + 4];
        let tt1 = ff(a, b, c, j)
            .wrapping_add(d)
            .wrapping_add(ss2)
            .wrapping_add(w1);
        let tt2 = gg(e, f, g, j)
            .wrapping_add(h)
            .wrapping_add(ss1)
            .wrapping_add(w[j]);

        d = c;
        c = b.rotate_left(9);
        b = a;
        a = tt1;
        h = g;
        g = f.rotate_left(19);
        f = e;
        e = p0(tt2);
    }

    for (word, v) in state.iter_mut().zip([a, b, c, d, e, f, g, h]) {
        *word ^= v;
    }

    w.zeroize();
}

/// Streaming SM3 context.
///
/// `update` may be called any number of times with chunks of any size.
/// `finalize` consumes the context, so it cannot be reused without a new
/// one (or an explicit [`Sm3::reset`] beforehand).
///
/// # Example
///
/// ```
/// use svtp_protocol::crypto::Sm3;
///
/// let mut hasher = Sm3::new();
/// hasher.update(b"a");
/// hasher.update(b"bc");
/// assert_eq!(hasher.finalize(), Sm3::digest(b"abc"));
/// ```
#[derive(Clone)]
pub struct Sm3 {
    state: [u32; 8],
    buffer: [u8; BLOCK_LEN],
    buffered: usize,
    /// Total bytes absorbed.
    length: u64,
}

impl Sm3 {
    /// Create a freshly initialized context.
    pub fn new() -> Self {
        Self {
            state: IV,
            buffer: [0u8; BLOCK_LEN],
            buffered: 0,
            length: 0,
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(data: &[u8]) -> [u8; DIGEST_SIZE] {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Return to the initial state, discarding absorbed input.
    pub fn reset(&mut self) {
        self.buffer.zeroize();
        self.state = IV;
        self.buffered = 0;
        self.length = 0;
    }

    /// Absorb `data`.
    pub fn update(&mut self, mut data: &[u8]) {
        self.length = self.length.wrapping_add(data.len() as u64);

        if self.buffered > 0 {
            let take = (BLOCK_LEN - self.buffered).min(data.len());
            self.buffer[self.buffered..self.buffered + take].copy_from_slice(&data[..take]);
            self.buffered += take;
            data = &data[take..];

            if self.buffered < BLOCK_LEN {
                return;
            }
            compress(&mut self.state, &self.buffer);
            self.buffered = 0;
        }

        let mut blocks = data.chunks_exact(BLOCK_LEN);
        for block in &mut blocks {
            let mut chunk = [0u8; BLOCK_LEN];
            chunk.copy_from_slice(block);
            compress(&mut self.state, &chunk);
        }

        let rest = blocks.remainder();
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.buffered = rest.len();
    }

    /// Apply padding and produce the 32-byte digest.
    pub fn finalize(mut self) -> [u8; DIGEST_SIZE] {
        let bit_len = self.length.wrapping_mul(8);

        let mut idx = self.buffered;
        self.buffer[idx] = 0x80;
        idx += 1;

        if idx > BLOCK_LEN - 8 {
            self.buffer[idx..].fill(0);
            compress(&mut self.state, &self.buffer);
            idx = 0;
        }
        self.buffer[idx..BLOCK_LEN - 8].fill(0);
        self.buffer[BLOCK_LEN - 8..].copy_from_slice(&bit_len.to_be_bytes());
        compress(&mut self.state, &self.buffer);

        let mut out = [0u8; DIGEST_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.state.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }
}

impl Default for Sm3 {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Sm3 {
    fn drop(&mut self) {
        self.state.zeroize();
        self.buffer.zeroize();
        self.buffered = 0;
        self.length = 0;
    }
}

impl std::fmt::Debug for Sm3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sm3").field("length", &self.length).finish_non_exhaustive()
    }
}
