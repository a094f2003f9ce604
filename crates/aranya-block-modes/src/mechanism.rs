//! Algorithms, modes, and their parameters.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A block cipher algorithm.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-128, AES-192, or AES-256, depending on the key
    /// length.
    Aes,
    /// Single DES.
    Des,
    /// Triple DES (EDE) with two or three keys.
    Des3,
}

impl Algorithm {
    /// Returns the algorithm's block size in bytes.
    pub const fn block_size(self) -> usize {
        match self {
            Self::Aes => 16,
            Self::Des | Self::Des3 => 8,
        }
    }

    /// Checks that `key_len` is a valid key length for the
    /// algorithm.
    pub fn check_key_len(self, key_len: usize) -> Result<()> {
        let ok = match self {
            Self::Aes => matches!(key_len, 16 | 24 | 32),
            Self::Des => key_len == 8,
            // K1K2K1 or K1K2K3.
            Self::Des3 => matches!(key_len, 16 | 24),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::KeySizeRange)
        }
    }

    /// Returns a human-readable name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aes => "AES",
            Self::Des => "DES",
            Self::Des3 => "3DES",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mode of operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Electronic codebook.
    Ecb,
    /// Cipher block chaining.
    Cbc,
    /// CBC with PKCS padding.
    CbcPad,
    /// Full-block cipher feedback.
    Cfb,
    /// Counter mode.
    Ctr,
    /// Counter with CBC-MAC.
    Ccm,
    /// Galois/counter mode.
    Gcm,
    /// GCM authenticating only the associated data.
    Gmac,
}

impl Mode {
    /// Reports whether the mode produces and checks a tag.
    pub const fn is_aead(self) -> bool {
        matches!(self, Self::Ccm | Self::Gcm | Self::Gmac)
    }

    /// Reports whether the mode accepts input of any length.
    pub const fn is_stream(self) -> bool {
        matches!(self, Self::Cfb | Self::Ctr | Self::Ccm | Self::Gcm | Self::Gmac)
    }

    /// Returns a human-readable name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ecb => "ECB",
            Self::Cbc => "CBC",
            Self::CbcPad => "CBC-PAD",
            Self::Cfb => "CFB",
            Self::Ctr => "CTR",
            Self::Ccm => "CCM",
            Self::Gcm => "GCM",
            Self::Gmac => "GMAC",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encrypt or decrypt.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Encrypt (or sign, for GMAC).
    Encrypt,
    /// Decrypt (or verify, for GMAC).
    Decrypt,
}

impl Direction {
    /// Returns the error used when the input length is invalid
    /// for this direction.
    pub(crate) const fn len_range_error(self) -> Error {
        match self {
            Self::Encrypt => Error::DataLenRange,
            Self::Decrypt => Error::EncryptedDataLenRange,
        }
    }
}

/// Fully describes an operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CipherOperation {
    /// The block cipher.
    pub algorithm: Algorithm,
    /// The mode of operation.
    pub mode: Mode,
    /// Encrypt or decrypt.
    pub direction: Direction,
}

impl fmt::Display for CipherOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Encrypt => "encrypt",
            Direction::Decrypt => "decrypt",
        };
        write!(f, "{}-{} {dir}", self.algorithm, self.mode)
    }
}

/// Parameters for [`Mode::Ctr`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CtrParams<'a> {
    /// The number of low-order bits of the counter block that
    /// are incremented. The remaining bits never change.
    pub counter_bits: u32,
    /// The initial counter block, or `None` if it will be
    /// supplied with [`Context::set_counter`][crate::Context::set_counter].
    pub counter_block: Option<&'a [u8]>,
}

/// Parameters for [`Mode::Ccm`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CcmParams<'a> {
    /// The nonce, 7 to 13 bytes.
    pub nonce: &'a [u8],
    /// Associated data.
    pub aad: &'a [u8],
    /// The length of the payload (plaintext when encrypting,
    /// ciphertext without the tag when decrypting).
    pub data_len: usize,
    /// The tag length: 4, 6, 8, 10, 12, 14, or 16.
    pub mac_len: usize,
}

/// Parameters for [`Mode::Gcm`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GcmParams<'a> {
    /// The IV. Must not be empty.
    pub iv: &'a [u8],
    /// Associated data.
    pub aad: &'a [u8],
    /// The tag length in bits: 32, 64, 96, 104, 112, 120, or
    /// 128.
    pub tag_bits: usize,
}

/// Parameters for [`Mode::Gmac`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GmacParams<'a> {
    /// The 12 byte IV.
    pub iv: &'a [u8],
    /// The data to authenticate.
    pub aad: &'a [u8],
}

/// A mode of operation along with its parameters.
///
/// An IV of `None` defers the IV to
/// [`Context::set_iv`][crate::Context::set_iv], which must be
/// called before any data is processed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mechanism<'a> {
    /// See [`Mode::Ecb`].
    Ecb,
    /// See [`Mode::Cbc`].
    Cbc {
        /// One block.
        iv: Option<&'a [u8]>,
    },
    /// See [`Mode::CbcPad`].
    CbcPad {
        /// One block.
        iv: Option<&'a [u8]>,
    },
    /// See [`Mode::Cfb`].
    Cfb {
        /// One block.
        iv: Option<&'a [u8]>,
    },
    /// See [`Mode::Ctr`].
    Ctr(CtrParams<'a>),
    /// See [`Mode::Ccm`].
    Ccm(CcmParams<'a>),
    /// See [`Mode::Gcm`].
    Gcm(GcmParams<'a>),
    /// See [`Mode::Gmac`].
    Gmac(GmacParams<'a>),
}

impl Mechanism<'_> {
    /// Returns the mechanism's mode.
    pub const fn mode(&self) -> Mode {
        match self {
            Self::Ecb => Mode::Ecb,
            Self::Cbc { .. } => Mode::Cbc,
            Self::CbcPad { .. } => Mode::CbcPad,
            Self::Cfb { .. } => Mode::Cfb,
            Self::Ctr(_) => Mode::Ctr,
            Self::Ccm(_) => Mode::Ccm,
            Self::Gcm(_) => Mode::Gcm,
            Self::Gmac(_) => Mode::Gmac,
        }
    }
}
