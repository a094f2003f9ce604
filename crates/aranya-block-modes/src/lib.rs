//! Block cipher modes of operation.
//!
//! This crate turns a single-block primitive (see
//! [`BlockCipher`]) into complete, streaming encryption and
//! decryption operations:
//!
//! - ECB, CBC, CBC with PKCS padding, CFB, and CTR.
//! - CCM and GCM, which produce and verify a tag.
//! - GMAC, which only authenticates.
//!
//! # Usage
//!
//! Operations are driven through a [`Context`], usually created
//! by a [`Dispatcher`]:
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> aranya_block_modes::Result<()> {
//! use aranya_block_modes::{
//!     Algorithm, BufferView, BufferViewMut, Direction, Dispatcher, Mechanism, SoftProvider,
//! };
//!
//! let dispatcher = Dispatcher::new(SoftProvider);
//! let key = [0x2b; 16];
//! let iv = [0u8; 16];
//! let mechanism = Mechanism::CbcPad { iv: Some(&iv) };
//!
//! let mut ctx = dispatcher
//!     .init(Algorithm::Aes, &key, &mechanism, Direction::Encrypt)
//!     .await?;
//! let mut ciphertext = [0u8; 32];
//! let mut out = BufferViewMut::new(&mut ciphertext);
//! ctx.update(BufferView::new(b"hello, "), &mut out).await?;
//! ctx.update(BufferView::new(b"world"), &mut out).await?;
//! ctx.finish(&mut out).await?;
//! assert_eq!(out.written(), 16);
//! # Ok(())
//! # }
//! ```
//!
//! # Calls and state
//!
//! - Every call checks the output size before touching the
//!   block primitive. A too-small buffer returns
//!   [`Error::BufferTooSmall`] and changes nothing.
//! - Calls are `async` because the primitive may be a hardware
//!   job. Dropping a pending call rolls the context back to
//!   where it was before the call.
//! - Any other error ends the operation.
//! - Authenticated decryption never releases plaintext before
//!   the tag verifies.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

mod block;
mod buffer;
mod ccm;
mod chain;
mod config;
mod context;
mod error;
mod gcm;
mod ghash;
mod mechanism;
mod padding;
#[cfg(feature = "soft")]
mod soft;
pub mod testing;

pub use block::{BlockCipher, MAX_BLOCK_SIZE, Provider};
pub use buffer::{BufferView, BufferViewMut};
pub use config::Config;
pub use context::{Context, Dispatcher};
pub use error::{BufferTooSmallError, CipherError, Error, Result};
pub use gcm::{gmac_sign, gmac_verify};
pub use mechanism::{
    Algorithm, CcmParams, CipherOperation, CtrParams, Direction, GcmParams, GmacParams, Mechanism,
    Mode,
};
pub use padding::{pad, pad_len, unpad};
#[cfg(feature = "soft")]
pub use soft::{SoftCipher, SoftProvider};
