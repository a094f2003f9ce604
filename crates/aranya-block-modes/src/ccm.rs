//! Counter with CBC-MAC per [NIST SP 800-38C] and [RFC 3610].
//!
//! The MAC is a CBC chain over `B0 || len(AAD) || AAD || payload`
//! whose ciphertext is discarded. Only the final chaining value
//! is kept. The payload is encrypted with a CTR chain whose
//! counter block is derived from the nonce. Counter index 0 is
//! reserved for the tag mask.
//!
//! When decrypting, the recovered payload is kept in a scratch
//! buffer and is only released after the tag verifies.
//!
//! [NIST SP 800-38C]: https://nvlpubs.nist.gov/nistpubs/Legacy/SP/nistspecialpublication800-38c.pdf
//! [RFC 3610]: https://www.rfc-editor.org/rfc/rfc3610

use alloc::vec::Vec;
use core::cmp;

use buggy::BugExt as _;
use heapless::Vec as HVec;
use subtle::ConstantTimeEq as _;
use tracing::warn;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    block::{Block, BlockCipher, encrypt_one},
    chain::{Chain, ChainMode, Discard, Sink, add_counter, xor_in_place},
    error::{Error, Result},
    mechanism::{CcmParams, Direction},
};

/// Validates CCM parameters for a cipher with block size `bs`.
pub(crate) fn check_params(params: &CcmParams<'_>, bs: usize) -> Result<()> {
    if bs != 16 {
        return Err(Error::MechanismInvalid);
    }
    if !(7..=13).contains(&params.nonce.len()) {
        return Err(Error::MechanismParamInvalid("CCM nonce must be 7 to 13 bytes"));
    }
    if !matches!(params.mac_len, 4 | 6 | 8 | 10 | 12 | 14 | 16) {
        return Err(Error::MechanismParamInvalid("invalid CCM tag length"));
    }
    let q = 15 - params.nonce.len();
    let len = u64::try_from(params.data_len)
        .map_err(|_| Error::MechanismParamInvalid("CCM data length too large"))?;
    if q < 8 && len >> (8 * q) != 0 {
        return Err(Error::MechanismParamInvalid(
            "CCM data length does not fit in the length field",
        ));
    }
    Ok(())
}

/// Encodes the length of the associated data.
///
/// Returns the buffer and the number of bytes used.
fn aad_len_prefix(len: u64) -> ([u8; 10], usize) {
    let mut buf = [0u8; 10];
    if let Some(short) = u16::try_from(len).ok().filter(|&n| n < 0xFF00) {
        buf[..2].copy_from_slice(&short.to_be_bytes());
        (buf, 2)
    } else if let Ok(mid) = u32::try_from(len) {
        buf[..2].copy_from_slice(&[0xFF, 0xFE]);
        buf[2..6].copy_from_slice(&mid.to_be_bytes());
        (buf, 6)
    } else {
        buf[..2].copy_from_slice(&[0xFF, 0xFF]);
        buf[2..10].copy_from_slice(&len.to_be_bytes());
        (buf, 10)
    }
}

/// CCM state.
pub(crate) struct Ccm {
    dir: Direction,
    /// CBC-MAC. Its IV is the running MAC.
    mac: Chain,
    ctr: Chain,
    /// `E_K(A0)`.
    s0: Block,
    data_len: usize,
    tag_len: usize,
    /// Payload bytes received so far.
    processed: usize,
    /// Decrypted payload awaiting verification.
    scratch: Zeroizing<Vec<u8>>,
    /// The received tag.
    tag: HVec<u8, 16>,
}

/// Saved [`Ccm`] state.
pub(crate) struct CcmSnapshot {
    mac: Chain,
    ctr: Chain,
    processed: usize,
    scratch_len: usize,
    tag: HVec<u8, 16>,
}

impl Ccm {
    /// Authenticates the associated data and sets up the
    /// counter.
    pub async fn new<C: BlockCipher>(
        cipher: &C,
        params: &CcmParams<'_>,
        dir: Direction,
        max_transfer: usize,
    ) -> Result<Self> {
        let bs = cipher.block_size();
        check_params(params, bs)?;

        let n = params.nonce.len();
        let q = 15 - n;
        let q_byte = u8::try_from(q).assume("q is at most 8")?;
        let t_byte = u8::try_from((params.mac_len - 2) / 2).assume("tag length is at most 16")?;

        let mut b0 = Block::default();
        b0[0] = (u8::from(!params.aad.is_empty()) << 6) | (t_byte << 3) | (q_byte - 1);
        b0[1..=n].copy_from_slice(params.nonce);
        let len_bytes = u64::try_from(params.data_len)
            .assume("checked by check_params")?
            .to_be_bytes();
        b0[16 - q..].copy_from_slice(&len_bytes[8 - q..]);

        let mut mac = Chain::new(ChainMode::Cbc, Direction::Encrypt, bs, max_transfer)?;
        mac.set_iv(&[0u8; 16])?;
        mac.process(cipher, &b0, &mut Discard).await?;
        if !params.aad.is_empty() {
            let aad_len = u64::try_from(params.aad.len())
                .map_err(|_| Error::MechanismParamInvalid("CCM AAD too large"))?;
            let (prefix, used) = aad_len_prefix(aad_len);
            mac.process(cipher, &prefix[..used], &mut Discard).await?;
            mac.process(cipher, params.aad, &mut Discard).await?;
            mac.flush_zero_padded(cipher, &mut Discard).await?;
        }

        let counter_bits = u32::try_from(8 * q).assume("q is at most 8")?;
        let mut a0 = Block::default();
        a0[0] = q_byte - 1;
        a0[1..=n].copy_from_slice(params.nonce);
        let s0 = encrypt_one(cipher, &a0).await?;
        add_counter(&mut a0, counter_bits, 1);

        let mut ctr = Chain::new(ChainMode::Ctr, dir, bs, max_transfer)?;
        ctr.set_iv(&a0)?;
        ctr.set_counter_bits(counter_bits)?;

        let mut scratch = Zeroizing::new(Vec::new());
        if dir == Direction::Decrypt {
            scratch.try_reserve_exact(params.data_len)?;
        }

        Ok(Self {
            dir,
            mac,
            ctr,
            s0,
            data_len: params.data_len,
            tag_len: params.mac_len,
            processed: 0,
            scratch,
            tag: HVec::new(),
        })
    }

    pub fn update_len(&self, input_len: usize) -> Result<usize> {
        let limit = match self.dir {
            Direction::Encrypt => self.data_len,
            Direction::Decrypt => self.data_len + self.tag_len,
        };
        let seen = self.processed + self.tag.len();
        match seen.checked_add(input_len) {
            Some(total) if total <= limit => {}
            _ => return Err(Error::DataLenRange),
        }
        match self.dir {
            Direction::Encrypt => Ok(input_len),
            Direction::Decrypt => Ok(0),
        }
    }

    pub fn finish_len(&self) -> Result<usize> {
        match self.dir {
            Direction::Encrypt => {
                if self.processed != self.data_len {
                    return Err(Error::DataLenRange);
                }
                Ok(self.tag_len)
            }
            Direction::Decrypt => {
                if self.processed != self.data_len || self.tag.len() != self.tag_len {
                    return Err(Error::EncryptedDataLenRange);
                }
                Ok(self.data_len)
            }
        }
    }

    pub async fn update<C: BlockCipher>(
        &mut self,
        cipher: &C,
        input: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        self.update_len(input.len())?;
        match self.dir {
            Direction::Encrypt => {
                self.mac.process(cipher, input, &mut Discard).await?;
                self.ctr.process(cipher, input, out).await?;
                self.processed += input.len();
            }
            Direction::Decrypt => {
                // Payload first, then the tag.
                let n = cmp::min(self.data_len - self.processed, input.len());
                let (payload, tag) = input.split_at(n);
                if !payload.is_empty() {
                    self.ctr.process(cipher, payload, &mut *self.scratch).await?;
                    self.processed += n;
                }
                self.tag
                    .extend_from_slice(tag)
                    .ok()
                    .assume("tag length checked by update_len")?;
            }
        }
        Ok(())
    }

    pub async fn finish<C: BlockCipher>(&mut self, cipher: &C, out: &mut Vec<u8>) -> Result<()> {
        self.finish_len()?;
        if self.dir == Direction::Decrypt {
            self.mac.process(cipher, &self.scratch, &mut Discard).await?;
        }
        self.mac.flush_zero_padded(cipher, &mut Discard).await?;

        let mut expected = Zeroizing::new(self.s0);
        xor_in_place(&mut expected[..], self.mac.iv());
        let expected = &expected[..self.tag_len];

        match self.dir {
            Direction::Encrypt => out.put(expected),
            Direction::Decrypt => {
                if bool::from(expected.ct_eq(&self.tag)) {
                    out.put(&self.scratch)
                } else {
                    self.scratch.zeroize();
                    warn!("CCM tag mismatch");
                    Err(Error::InvalidMac)
                }
            }
        }
    }

    pub fn snapshot(&self) -> CcmSnapshot {
        CcmSnapshot {
            mac: self.mac.clone(),
            ctr: self.ctr.clone(),
            processed: self.processed,
            scratch_len: self.scratch.len(),
            tag: self.tag.clone(),
        }
    }

    pub fn restore(&mut self, snap: CcmSnapshot) {
        let CcmSnapshot {
            mac,
            ctr,
            processed,
            scratch_len,
            tag,
        } = snap;
        self.mac = mac;
        self.ctr = ctr;
        self.processed = processed;
        if let Some(tail) = self.scratch.get_mut(scratch_len..) {
            tail.zeroize();
        }
        self.scratch.truncate(scratch_len);
        self.tag = tag;
    }
}

impl Drop for Ccm {
    fn drop(&mut self) {
        self.s0.zeroize();
    }
}
