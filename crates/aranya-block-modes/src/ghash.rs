//! GHASH, the universal hash used by GCM.

use heapless::Vec as HVec;
use zeroize::Zeroize;

/// The reduction constant for GF(2^128) in GCM's bit order.
const R: u128 = 0xE1 << 120;

/// Multiplies `x` by `y` in GF(2^128).
///
/// The loop runs in constant time with respect to both
/// operands.
fn gf_mul(x: u128, y: u128) -> u128 {
    let mut z = 0u128;
    let mut v = y;
    for i in (0..128).rev() {
        let bit = (x >> i) & 1;
        z ^= v & bit.wrapping_neg();
        let lsb = v & 1;
        v = (v >> 1) ^ (R & lsb.wrapping_neg());
    }
    z
}

/// A running GHASH.
///
/// Input that does not fill a 16-byte block is buffered until
/// more input arrives or the hash is padded.
#[derive(Clone)]
pub(crate) struct Ghash {
    h: u128,
    acc: u128,
    remainder: HVec<u8, 16>,
}

impl Ghash {
    /// Creates a GHASH keyed with `H = E_K(0^128)`.
    pub fn new(h: &[u8; 16]) -> Self {
        Self {
            h: u128::from_be_bytes(*h),
            acc: 0,
            remainder: HVec::new(),
        }
    }

    fn fold(&mut self, block: &[u8; 16]) {
        self.acc = gf_mul(self.acc ^ u128::from_be_bytes(*block), self.h);
    }

    /// Absorbs `data`.
    pub fn update(&mut self, mut data: &[u8]) {
        if !self.remainder.is_empty() {
            let n = (16 - self.remainder.len()).min(data.len());
            let (head, rest) = data.split_at(n);
            // At most `16 - len` bytes are added.
            let res = self.remainder.extend_from_slice(head);
            debug_assert!(res.is_ok(), "GHASH remainder overflowed");
            data = rest;
            if self.remainder.len() < 16 {
                return;
            }
            let mut block = [0u8; 16];
            block.copy_from_slice(&self.remainder);
            self.remainder.as_mut_slice().zeroize();
            self.remainder.clear();
            self.fold(&block);
        }
        let mut chunks = data.chunks_exact(16);
        for chunk in &mut chunks {
            let mut block = [0u8; 16];
            block.copy_from_slice(chunk);
            self.fold(&block);
        }
        let res = self.remainder.extend_from_slice(chunks.remainder());
        debug_assert!(res.is_ok(), "GHASH remainder overflowed");
    }

    /// Zero-pads any buffered input to a full block and absorbs
    /// it.
    pub fn pad(&mut self) {
        if self.remainder.is_empty() {
            return;
        }
        let mut block = [0u8; 16];
        block[..self.remainder.len()].copy_from_slice(&self.remainder);
        self.remainder.as_mut_slice().zeroize();
        self.remainder.clear();
        self.fold(&block);
    }

    /// Pads, absorbs the length block, and returns the hash.
    pub fn finalize(mut self, aad_bits: u64, ct_bits: u64) -> [u8; 16] {
        self.pad();
        let mut block = [0u8; 16];
        block[..8].copy_from_slice(&aad_bits.to_be_bytes());
        block[8..].copy_from_slice(&ct_bits.to_be_bytes());
        self.fold(&block);
        self.acc.to_be_bytes()
    }

    #[cfg(test)]
    fn remainder_len(&self) -> usize {
        self.remainder.len()
    }
}

impl Drop for Ghash {
    fn drop(&mut self) {
        self.h.zeroize();
        self.acc.zeroize();
        self.remainder.as_mut_slice().zeroize();
    }
}
