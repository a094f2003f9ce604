//! Block cipher wrappers for testing.

#![cfg(any(test, feature = "testing"))]
#![cfg_attr(docsrs, doc(cfg(feature = "testing")))]

use core::{
    future::Future,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{block::BlockCipher, error::CipherError, mechanism::Algorithm};

/// Wraps a [`BlockCipher`] to observe and disturb primitive
/// calls.
///
/// - Every single-block call is counted. The batch methods use
///   the default per-block loop, so batches are counted per
///   block.
/// - While stalled, calls never complete. This simulates a
///   device that has not answered yet, so the caller can drop
///   the pending future.
/// - While aborting, calls fail with [`CipherError::Aborted`].
#[derive(Debug, Default)]
pub struct InstrumentedCipher<C> {
    inner: C,
    calls: AtomicUsize,
    stalled: AtomicBool,
    aborting: AtomicBool,
}

impl<C> InstrumentedCipher<C> {
    /// Wraps `inner`.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            stalled: AtomicBool::new(false),
            aborting: AtomicBool::new(false),
        }
    }

    /// Returns the number of block calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resets the call counter.
    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Makes subsequent calls hang (or stop hanging).
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Makes subsequent calls fail (or stop failing).
    pub fn set_aborting(&self, aborting: bool) {
        self.aborting.store(aborting, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), CipherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            core::future::pending::<()>().await;
        }
        if self.aborting.load(Ordering::SeqCst) {
            return Err(CipherError::Aborted);
        }
        Ok(())
    }
}

impl<C: BlockCipher> BlockCipher for InstrumentedCipher<C> {
    fn algorithm(&self) -> Algorithm {
        self.inner.algorithm()
    }

    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn encrypt_block(
        &self,
        block: &mut [u8],
    ) -> impl Future<Output = Result<(), CipherError>> + Send {
        async move {
            self.gate().await?;
            self.inner.encrypt_block(block).await
        }
    }

    fn decrypt_block(
        &self,
        block: &mut [u8],
    ) -> impl Future<Output = Result<(), CipherError>> + Send {
        async move {
            self.gate().await?;
            self.inner.decrypt_block(block).await
        }
    }
}
