use core::fmt;

use buggy::Bug;

/// Shorthand for `Result`s that use [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

/// The output buffer is too small.
///
/// It contains the size that the buffer needs to be for the
/// call to succeed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BufferTooSmallError {
    /// The minimum number of output bytes required.
    pub need: usize,
}

impl BufferTooSmallError {
    /// Returns a human-readable string describing the error.
    pub const fn as_str(&self) -> &'static str {
        "output buffer too small"
    }
}

impl fmt::Display for BufferTooSmallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (need {})", self.as_str(), self.need)
    }
}

impl core::error::Error for BufferTooSmallError {}

/// An error returned by a [`BlockCipher`][crate::BlockCipher].
///
/// Block primitive errors are propagated to the caller
/// unchanged.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CipherError {
    /// The block was not exactly one block long.
    #[error("input is not exactly one cipher block")]
    InvalidBlockSize,
    /// The device aborted the job.
    #[error("block cipher job aborted")]
    Aborted,
    /// The device failed.
    #[error("block cipher device failure: {0}")]
    Device(&'static str),
}

/// An error returned from this API.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The plaintext length is not valid for the mechanism.
    #[error("data length is out of range")]
    DataLenRange,
    /// The ciphertext length is not valid for the mechanism, or
    /// its padding is invalid.
    #[error("encrypted data length is out of range")]
    EncryptedDataLenRange,
    /// The output buffer is too small.
    ///
    /// This error is not fatal: the context is unchanged and the
    /// call can be retried with a larger buffer.
    #[error("{0}")]
    BufferTooSmall(BufferTooSmallError),
    /// Memory could not be allocated.
    #[error("out of memory")]
    HostMemory,
    /// The mode is not supported with the algorithm.
    #[error("invalid mechanism")]
    MechanismInvalid,
    /// A mechanism parameter is invalid.
    #[error("invalid mechanism parameter: {0}")]
    MechanismParamInvalid(&'static str),
    /// The key is the wrong length for the algorithm.
    #[error("key size out of range")]
    KeySizeRange,
    /// The key does not match the requested algorithm.
    #[error("key type is inconsistent with the mechanism")]
    KeyTypeInconsistent,
    /// The operation is not supported.
    #[error("operation not supported")]
    Unsupported,
    /// The authentication tag did not verify.
    #[error("authentication failure")]
    InvalidMac,
    /// The context has finished or previously failed.
    #[error("operation is not active")]
    Inactive,
    /// The block primitive failed.
    #[error(transparent)]
    Cipher(#[from] CipherError),
    /// An internal bug was discovered.
    #[error(transparent)]
    Bug(#[from] Bug),
}

impl Error {
    /// Reports whether the error leaves the operation usable.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::BufferTooSmall(_))
    }
}

impl From<BufferTooSmallError> for Error {
    fn from(err: BufferTooSmallError) -> Self {
        Self::BufferTooSmall(err)
    }
}

impl From<alloc::collections::TryReserveError> for Error {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Self::HostMemory
    }
}
