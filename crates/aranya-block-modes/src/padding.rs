//! PKCS padding and CBC-PAD.

use alloc::vec::Vec;

use buggy::{BugExt as _, bug};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    block::{Block, BlockCipher, MAX_BLOCK_SIZE},
    chain::{Chain, Sink},
    error::{Error, Result},
    mechanism::Direction,
};

/// Returns the number of pad bytes added to `len` bytes of
/// data.
///
/// The result is always in `1..=block_size`: block aligned data
/// gets a full block of padding.
pub const fn pad_len(len: usize, block_size: usize) -> usize {
    block_size - len % block_size
}

/// Appends PKCS padding to `data`.
///
/// # Errors
///
/// Returns [`Error::HostMemory`] if the output cannot be
/// allocated, or [`Error::MechanismParamInvalid`] if
/// `block_size` is not in `1..=255`.
pub fn pad(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
    let pad = pad_byte(data.len(), block_size)?;
    let mut out = Vec::new();
    out.try_reserve_exact(data.len() + usize::from(pad))?;
    out.extend_from_slice(data);
    out.resize(data.len() + usize::from(pad), pad);
    Ok(out)
}

/// Removes PKCS padding from `data`.
///
/// The final byte gives the pad length, which must be in
/// `1..=block_size`, and every pad byte must equal it.
///
/// # Errors
///
/// Returns [`Error::EncryptedDataLenRange`] if `data` is not a
/// non-empty multiple of `block_size` or the padding is
/// malformed.
pub fn unpad(data: &[u8], block_size: usize) -> Result<&[u8]> {
    if block_size == 0 || data.is_empty() || data.len() % block_size != 0 {
        return Err(Error::EncryptedDataLenRange);
    }
    let n = data.last().map_or(0, |&b| usize::from(b));
    if n == 0 || n > block_size {
        return Err(Error::EncryptedDataLenRange);
    }
    let (head, tail) = data.split_at(data.len() - n);
    if !tail.iter().all(|&b| usize::from(b) == n) {
        return Err(Error::EncryptedDataLenRange);
    }
    Ok(head)
}

fn pad_byte(len: usize, block_size: usize) -> Result<u8> {
    if block_size == 0 {
        return Err(Error::MechanismParamInvalid("block size must be non-zero"));
    }
    u8::try_from(pad_len(len, block_size))
        .map_err(|_| Error::MechanismParamInvalid("block size too large for PKCS padding"))
}

/// CBC with PKCS padding.
///
/// When encrypting, [`update`][Self::update] behaves like CBC
/// and [`finish`][Self::finish] pads the residue.
///
/// When decrypting, the most recent plaintext block is held back
/// because it may contain the padding. It is released by a later
/// `update` or unpadded by `finish`.
#[derive(Clone)]
pub(crate) struct CbcPad {
    chain: Chain,
    dir: Direction,
    held: Option<Block>,
}

impl CbcPad {
    pub fn new(chain: Chain, dir: Direction) -> Self {
        Self {
            chain,
            dir,
            held: None,
        }
    }

    pub fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    /// Reports whether nothing is buffered.
    pub fn is_aligned(&self) -> bool {
        self.held.is_none() && self.chain.is_aligned()
    }

    pub fn update_len(&self, input_len: usize) -> Result<usize> {
        let produced = self.chain.output_len(input_len)?;
        match self.dir {
            Direction::Encrypt => Ok(produced),
            Direction::Decrypt => {
                let bs = self.chain.block_size();
                let avail = produced + self.held.map_or(0, |_| bs);
                Ok(avail.saturating_sub(bs))
            }
        }
    }

    pub fn finish_len(&self) -> Result<usize> {
        let bs = self.chain.block_size();
        match self.dir {
            Direction::Encrypt => Ok(bs),
            Direction::Decrypt => Ok(self.unpadded_held()?.len()),
        }
    }

    /// Returns the held block without its padding.
    fn unpadded_held(&self) -> Result<&[u8]> {
        let bs = self.chain.block_size();
        if self.chain.residue_len() != 0 {
            return Err(Error::EncryptedDataLenRange);
        }
        match &self.held {
            Some(block) => unpad(&block[..bs], bs),
            None => Err(Error::EncryptedDataLenRange),
        }
    }

    pub async fn update<C: BlockCipher>(
        &mut self,
        cipher: &C,
        input: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        match self.dir {
            Direction::Encrypt => self.chain.process(cipher, input, out).await,
            Direction::Decrypt => {
                let bs = self.chain.block_size();
                let mut plain = Zeroizing::new(Vec::new());
                self.chain.process(cipher, input, &mut *plain).await?;
                let Some(last) = plain.len().checked_sub(bs) else {
                    // Nothing new was decrypted.
                    return Ok(());
                };
                if let Some(held) = self.held.take() {
                    out.put(&held[..bs])?;
                }
                out.put(&plain[..last])?;
                let mut held = Block::default();
                held[..bs].copy_from_slice(&plain[last..]);
                self.held = Some(held);
                Ok(())
            }
        }
    }

    pub async fn finish<C: BlockCipher>(&mut self, cipher: &C, out: &mut Vec<u8>) -> Result<()> {
        let bs = self.chain.block_size();
        match self.dir {
            Direction::Encrypt => {
                let n = pad_len(self.chain.residue_len(), bs);
                let pad = u8::try_from(n).assume("block size fits in a byte")?;
                let padding = [pad; MAX_BLOCK_SIZE];
                self.chain.process(cipher, &padding[..n], out).await?;
                if self.chain.residue_len() != 0 {
                    bug!("padding did not complete the block");
                }
                Ok(())
            }
            Direction::Decrypt => {
                let data = self.unpadded_held()?;
                out.put(data)?;
                if let Some(mut held) = self.held.take() {
                    held.zeroize();
                }
                Ok(())
            }
        }
    }
}

impl Drop for CbcPad {
    fn drop(&mut self) {
        if let Some(held) = self.held.as_mut() {
            held.zeroize();
        }
    }
}
