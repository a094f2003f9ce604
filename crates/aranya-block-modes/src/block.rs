//! The block primitive.
//!
//! Everything in this crate is built on top of a single
//! operation: encrypting (or decrypting) one block with an
//! already scheduled key. The primitive may be a software
//! implementation or a job submitted to hardware. Either way it
//! is modeled as a future, so a context suspends at each
//! primitive call and can be cancelled by dropping the pending
//! call.

use core::future::Future;

use crate::{
    error::{CipherError, Result},
    mechanism::Algorithm,
};

/// The largest block size supported by any [`BlockCipher`].
pub const MAX_BLOCK_SIZE: usize = 16;

/// A fixed-size block buffer.
///
/// Only the first `block_size` bytes are meaningful.
pub(crate) type Block = [u8; MAX_BLOCK_SIZE];

/// A block cipher with a scheduled key.
///
/// # Requirements
///
/// - [`block_size`][Self::block_size] must be 8 or 16 and must
///   equal `self.algorithm().block_size()`.
/// - Every method must reject input whose length is not exactly
///   one block (or, for the batch methods, a multiple of the
///   block size) with [`CipherError::InvalidBlockSize`].
pub trait BlockCipher: Send + Sync {
    /// Returns the cipher's algorithm.
    fn algorithm(&self) -> Algorithm;

    /// Returns the cipher's block size in bytes.
    fn block_size(&self) -> usize {
        self.algorithm().block_size()
    }

    /// Encrypts one block in place.
    fn encrypt_block(
        &self,
        block: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send;

    /// Decrypts one block in place.
    fn decrypt_block(
        &self,
        block: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send;

    /// Encrypts each block of `blocks` in place (ECB).
    ///
    /// The default implementation calls
    /// [`encrypt_block`][Self::encrypt_block] once per block.
    /// Implementations backed by hardware should submit the
    /// whole batch as a single job.
    fn encrypt_blocks(
        &self,
        blocks: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        async move {
            let bs = self.block_size();
            if bs == 0 || blocks.len() % bs != 0 {
                return Err(CipherError::InvalidBlockSize);
            }
            for block in blocks.chunks_exact_mut(bs) {
                self.encrypt_block(block).await?;
            }
            Ok(())
        }
    }

    /// Decrypts each block of `blocks` in place (ECB).
    ///
    /// See [`encrypt_blocks`][Self::encrypt_blocks].
    fn decrypt_blocks(
        &self,
        blocks: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        async move {
            let bs = self.block_size();
            if bs == 0 || blocks.len() % bs != 0 {
                return Err(CipherError::InvalidBlockSize);
            }
            for block in blocks.chunks_exact_mut(bs) {
                self.decrypt_block(block).await?;
            }
            Ok(())
        }
    }
}

impl<C: BlockCipher> BlockCipher for &C {
    fn algorithm(&self) -> Algorithm {
        (**self).algorithm()
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn encrypt_block(
        &self,
        block: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        (**self).encrypt_block(block)
    }

    fn decrypt_block(
        &self,
        block: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        (**self).decrypt_block(block)
    }

    fn encrypt_blocks(
        &self,
        blocks: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        (**self).encrypt_blocks(blocks)
    }

    fn decrypt_blocks(
        &self,
        blocks: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        (**self).decrypt_blocks(blocks)
    }
}

/// Creates [`BlockCipher`]s from raw keys.
pub trait Provider {
    /// The cipher created by this provider.
    type Cipher: BlockCipher;

    /// Schedules `key` for `algorithm`.
    ///
    /// The caller has already checked the key length with
    /// [`Algorithm::check_key_len`].
    fn new_cipher(&self, algorithm: Algorithm, key: &[u8]) -> Result<Self::Cipher>;
}

/// Encrypts a single block and returns it.
pub(crate) async fn encrypt_one<C: BlockCipher>(cipher: &C, input: &[u8]) -> Result<Block> {
    let bs = cipher.block_size();
    let mut block = Block::default();
    let dst = block
        .get_mut(..bs)
        .ok_or(CipherError::InvalidBlockSize)?;
    dst.copy_from_slice(input.get(..bs).ok_or(CipherError::InvalidBlockSize)?);
    cipher.encrypt_block(dst).await?;
    Ok(block)
}
