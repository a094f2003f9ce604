//! A software [`BlockCipher`] built on the RustCrypto `aes`
//! and `des` crates.

use core::future::{Future, ready};

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};

use crate::{
    block::{BlockCipher, Provider},
    error::{CipherError, Error, Result},
    mechanism::Algorithm,
};

/// A [`Provider`] for [`SoftCipher`].
#[derive(Copy, Clone, Debug, Default)]
pub struct SoftProvider;

impl Provider for SoftProvider {
    type Cipher = SoftCipher;

    fn new_cipher(&self, algorithm: Algorithm, key: &[u8]) -> Result<SoftCipher> {
        SoftCipher::new(algorithm, key)
    }
}

/// A block cipher implemented in software.
///
/// The key schedule is zeroized on drop.
#[derive(Clone)]
pub enum SoftCipher {
    /// AES-128.
    Aes128(aes::Aes128),
    /// AES-192.
    Aes192(aes::Aes192),
    /// AES-256.
    Aes256(aes::Aes256),
    /// DES.
    Des(des::Des),
    /// Two-key triple DES.
    TdesEde2(des::TdesEde2),
    /// Three-key triple DES.
    TdesEde3(des::TdesEde3),
}

impl SoftCipher {
    /// Schedules `key` for `algorithm`.
    pub fn new(algorithm: Algorithm, key: &[u8]) -> Result<Self> {
        algorithm.check_key_len(key.len())?;
        let cipher = match (algorithm, key.len()) {
            (Algorithm::Aes, 16) => Self::Aes128(new_from_slice(key)?),
            (Algorithm::Aes, 24) => Self::Aes192(new_from_slice(key)?),
            (Algorithm::Aes, 32) => Self::Aes256(new_from_slice(key)?),
            (Algorithm::Des, _) => Self::Des(new_from_slice(key)?),
            (Algorithm::Des3, 16) => Self::TdesEde2(new_from_slice(key)?),
            (Algorithm::Des3, _) => Self::TdesEde3(new_from_slice(key)?),
            (Algorithm::Aes, _) => return Err(Error::KeySizeRange),
        };
        Ok(cipher)
    }

    fn encrypt_now(&self, block: &mut [u8]) -> core::result::Result<(), CipherError> {
        if block.len() != self.block_size() {
            return Err(CipherError::InvalidBlockSize);
        }
        // Each arm picks its own `GenericArray` length.
        match self {
            Self::Aes128(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes192(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes256(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Des(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::TdesEde2(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::TdesEde3(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
        }
        Ok(())
    }

    fn decrypt_now(&self, block: &mut [u8]) -> core::result::Result<(), CipherError> {
        if block.len() != self.block_size() {
            return Err(CipherError::InvalidBlockSize);
        }
        // Each arm picks its own `GenericArray` length.
        match self {
            Self::Aes128(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes192(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes256(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Des(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::TdesEde2(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::TdesEde3(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
        }
        Ok(())
    }

    fn for_each_block(
        &self,
        blocks: &mut [u8],
        f: impl Fn(&Self, &mut [u8]) -> core::result::Result<(), CipherError>,
    ) -> core::result::Result<(), CipherError> {
        let bs = self.block_size();
        if blocks.len() % bs != 0 {
            return Err(CipherError::InvalidBlockSize);
        }
        blocks.chunks_exact_mut(bs).try_for_each(|b| f(self, b))
    }
}

fn new_from_slice<C: KeyInit>(key: &[u8]) -> Result<C> {
    C::new_from_slice(key).map_err(|_| Error::KeySizeRange)
}

impl BlockCipher for SoftCipher {
    fn algorithm(&self) -> Algorithm {
        match self {
            Self::Aes128(_) | Self::Aes192(_) | Self::Aes256(_) => Algorithm::Aes,
            Self::Des(_) => Algorithm::Des,
            Self::TdesEde2(_) | Self::TdesEde3(_) => Algorithm::Des3,
        }
    }

    fn encrypt_block(
        &self,
        block: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        ready(self.encrypt_now(block))
    }

    fn decrypt_block(
        &self,
        block: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        ready(self.decrypt_now(block))
    }

    fn encrypt_blocks(
        &self,
        blocks: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        ready(self.for_each_block(blocks, Self::encrypt_now))
    }

    fn decrypt_blocks(
        &self,
        blocks: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), CipherError>> + Send {
        ready(self.for_each_block(blocks, Self::decrypt_now))
    }
}

impl core::fmt::Debug for SoftCipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Aes128(_) => "Aes128",
            Self::Aes192(_) => "Aes192",
            Self::Aes256(_) => "Aes256",
            Self::Des(_) => "Des",
            Self::TdesEde2(_) => "TdesEde2",
            Self::TdesEde3(_) => "TdesEde3",
        };
        f.debug_tuple("SoftCipher").field(&name).finish_non_exhaustive()
    }
}
