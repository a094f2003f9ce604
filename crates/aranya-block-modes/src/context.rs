//! Cipher contexts and the call dispatcher.
//!
//! A [`Context`] drives one logical operation through
//! [`update`][Context::update] and [`finish`][Context::finish],
//! or the whole thing at once with [`atomic`][Context::atomic].
//!
//! Every call follows the same steps:
//!
//! 1. Compute the exact output size. If the output buffer is
//!    too small, fail with [`Error::BufferTooSmall`] and leave
//!    the context untouched.
//! 2. Snapshot the engine.
//! 3. Run the engine, awaiting the block primitive.
//! 4. Commit the snapshot and copy the output to the caller.
//!
//! Dropping the future at step 3 restores the snapshot, so a
//! cancelled call can simply be retried. Any other error makes
//! the context terminal.

use alloc::vec::Vec;
use core::{
    fmt,
    ops::{Deref, DerefMut},
};

use buggy::{BugExt as _, bug};
use tracing::{debug, error, trace};
use zeroize::Zeroizing;

use crate::{
    block::{BlockCipher, MAX_BLOCK_SIZE, Provider},
    buffer::{BufferView, BufferViewMut},
    ccm::{self, Ccm, CcmSnapshot},
    chain::{Chain, ChainMode},
    config::Config,
    error::{BufferTooSmallError, Error, Result},
    gcm::{self, Gcm, GcmSnapshot},
    mechanism::{Algorithm, CipherOperation, Direction, Mechanism},
    padding::{CbcPad, pad_len},
};

/// Checks a mechanism's parameters without touching the block
/// primitive.
fn check_mechanism(mechanism: &Mechanism<'_>, bs: usize) -> Result<()> {
    let check_iv = |iv: Option<&[u8]>| match iv {
        Some(iv) if iv.len() != bs => {
            Err(Error::MechanismParamInvalid("IV must be exactly one block"))
        }
        _ => Ok(()),
    };
    match mechanism {
        Mechanism::Ecb => Ok(()),
        Mechanism::Cbc { iv } | Mechanism::CbcPad { iv } | Mechanism::Cfb { iv } => check_iv(*iv),
        Mechanism::Ctr(p) => {
            let max = u32::try_from(bs * 8).assume("block size fits in u32")?;
            if p.counter_bits == 0 || p.counter_bits > max {
                return Err(Error::MechanismParamInvalid("counter bits out of range"));
            }
            check_iv(p.counter_block)
        }
        Mechanism::Ccm(p) => ccm::check_params(p, bs),
        Mechanism::Gcm(p) => gcm::check_params(p, bs),
        Mechanism::Gmac(p) => gcm::check_gmac_params(p, bs),
    }
}

/// The output size of a one-shot operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum OutputLen {
    Exact(usize),
    /// The exact size is only known once the padding has been
    /// removed.
    AtLeast(usize),
}

impl OutputLen {
    const fn min(self) -> usize {
        match self {
            Self::Exact(n) | Self::AtLeast(n) => n,
        }
    }
}

/// Computes the output size of a one-shot operation over
/// `input_len` bytes, rejecting invalid input lengths.
fn atomic_len(
    mechanism: &Mechanism<'_>,
    dir: Direction,
    bs: usize,
    input_len: usize,
) -> Result<OutputLen> {
    let len = match (mechanism, dir) {
        (Mechanism::Ecb | Mechanism::Cbc { .. }, _) => {
            if input_len % bs != 0 {
                return Err(dir.len_range_error());
            }
            OutputLen::Exact(input_len)
        }
        (Mechanism::Cfb { .. } | Mechanism::Ctr(_), _) => OutputLen::Exact(input_len),
        (Mechanism::CbcPad { .. }, Direction::Encrypt) => OutputLen::Exact(
            input_len
                .checked_add(pad_len(input_len, bs))
                .ok_or(Error::DataLenRange)?,
        ),
        (Mechanism::CbcPad { .. }, Direction::Decrypt) => {
            if input_len == 0 || input_len % bs != 0 {
                return Err(Error::EncryptedDataLenRange);
            }
            OutputLen::AtLeast(input_len - bs)
        }
        (Mechanism::Ccm(p), Direction::Encrypt) => {
            if input_len != p.data_len {
                return Err(Error::DataLenRange);
            }
            OutputLen::Exact(
                input_len
                    .checked_add(p.mac_len)
                    .ok_or(Error::DataLenRange)?,
            )
        }
        (Mechanism::Ccm(p), Direction::Decrypt) => {
            if p.data_len.checked_add(p.mac_len) != Some(input_len) {
                return Err(Error::DataLenRange);
            }
            OutputLen::Exact(p.data_len)
        }
        (Mechanism::Gcm(p), Direction::Encrypt) => OutputLen::Exact(
            input_len
                .checked_add(gcm::tag_len(p))
                .ok_or(Error::DataLenRange)?,
        ),
        (Mechanism::Gcm(p), Direction::Decrypt) => OutputLen::Exact(
            input_len
                .checked_sub(gcm::tag_len(p))
                .ok_or(Error::InvalidMac)?,
        ),
        (Mechanism::Gmac(_), Direction::Encrypt) => {
            if input_len != 0 {
                return Err(Error::Unsupported);
            }
            OutputLen::Exact(gcm::gmac_tag_len())
        }
        (Mechanism::Gmac(_), Direction::Decrypt) => {
            if input_len != gcm::gmac_tag_len() {
                return Err(Error::InvalidMac);
            }
            OutputLen::Exact(0)
        }
    };
    Ok(len)
}

/// The per-mode state machine.
enum Engine {
    /// ECB, CBC, CFB, or CTR.
    Block(Chain),
    Pad(CbcPad),
    Ccm(Ccm),
    /// GCM or GMAC.
    Gcm(Gcm),
}

/// Saved [`Engine`] state.
enum Snapshot {
    Block(Chain),
    Pad(CbcPad),
    Ccm(CcmSnapshot),
    Gcm(GcmSnapshot),
}

fn new_chain(mode: ChainMode, dir: Direction, bs: usize, config: &Config) -> Result<Chain> {
    Chain::new(mode, dir, bs, config.max_transfer_len)
}

fn with_iv(mut chain: Chain, iv: Option<&[u8]>) -> Result<Chain> {
    if let Some(iv) = iv {
        chain.set_iv(iv)?;
    }
    Ok(chain)
}

impl Engine {
    async fn new<C: BlockCipher>(
        cipher: &C,
        mechanism: &Mechanism<'_>,
        dir: Direction,
        config: &Config,
    ) -> Result<Self> {
        let bs = cipher.block_size();
        check_mechanism(mechanism, bs)?;
        let max = config.max_transfer_len;
        let engine = match *mechanism {
            Mechanism::Ecb => Self::Block(new_chain(ChainMode::Ecb, dir, bs, config)?),
            Mechanism::Cbc { iv } => {
                Self::Block(with_iv(new_chain(ChainMode::Cbc, dir, bs, config)?, iv)?)
            }
            Mechanism::CbcPad { iv } => {
                let chain = with_iv(new_chain(ChainMode::Cbc, dir, bs, config)?, iv)?;
                Self::Pad(CbcPad::new(chain, dir))
            }
            Mechanism::Cfb { iv } => {
                Self::Block(with_iv(new_chain(ChainMode::Cfb, dir, bs, config)?, iv)?)
            }
            Mechanism::Ctr(p) => {
                let mut chain = new_chain(ChainMode::Ctr, dir, bs, config)?;
                chain.set_counter_bits(p.counter_bits)?;
                Self::Block(with_iv(chain, p.counter_block)?)
            }
            Mechanism::Ccm(p) => Self::Ccm(Ccm::new(cipher, &p, dir, max).await?),
            Mechanism::Gcm(p) => Self::Gcm(Gcm::new(cipher, &p, dir, max).await?),
            Mechanism::Gmac(p) => Self::Gcm(Gcm::new_gmac(cipher, &p, dir, max).await?),
        };
        Ok(engine)
    }

    fn update_len(&self, input_len: usize) -> Result<usize> {
        match self {
            Self::Block(chain) => chain.output_len(input_len),
            Self::Pad(pad) => pad.update_len(input_len),
            Self::Ccm(ccm) => ccm.update_len(input_len),
            Self::Gcm(gcm) => gcm.update_len(input_len),
        }
    }

    fn finish_len(&self, dir: Direction) -> Result<usize> {
        match self {
            Self::Block(chain) => {
                if chain.residue_len() != 0 {
                    return Err(dir.len_range_error());
                }
                Ok(0)
            }
            Self::Pad(pad) => pad.finish_len(),
            Self::Ccm(ccm) => ccm.finish_len(),
            Self::Gcm(gcm) => gcm.finish_len(),
        }
    }

    async fn update<C: BlockCipher>(
        &mut self,
        cipher: &C,
        input: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        match self {
            Self::Block(chain) => chain.process(cipher, input, out).await,
            Self::Pad(pad) => pad.update(cipher, input, out).await,
            Self::Ccm(ccm) => ccm.update(cipher, input, out).await,
            Self::Gcm(gcm) => gcm.update(cipher, input, out).await,
        }
    }

    async fn finish<C: BlockCipher>(
        &mut self,
        cipher: &C,
        out: &mut Vec<u8>,
        dir: Direction,
    ) -> Result<()> {
        match self {
            Self::Block(chain) => {
                if chain.residue_len() != 0 {
                    return Err(dir.len_range_error());
                }
                Ok(())
            }
            Self::Pad(pad) => pad.finish(cipher, out).await,
            Self::Ccm(ccm) => ccm.finish(cipher, out).await,
            Self::Gcm(gcm) => gcm.finish(cipher, out).await,
        }
    }

    fn snapshot(&self) -> Snapshot {
        match self {
            Self::Block(chain) => Snapshot::Block(chain.clone()),
            Self::Pad(pad) => Snapshot::Pad(pad.clone()),
            Self::Ccm(ccm) => Snapshot::Ccm(ccm.snapshot()),
            Self::Gcm(gcm) => Snapshot::Gcm(gcm.snapshot()),
        }
    }

    fn restore(&mut self, snap: Snapshot) {
        match (self, snap) {
            (Self::Block(chain), Snapshot::Block(saved)) => *chain = saved,
            (Self::Pad(pad), Snapshot::Pad(saved)) => *pad = saved,
            (Self::Ccm(ccm), Snapshot::Ccm(saved)) => ccm.restore(saved),
            (Self::Gcm(gcm), Snapshot::Gcm(saved)) => gcm.restore(saved),
            // Snapshots are only ever taken from the same engine.
            _ => {
                error!("engine snapshot does not match the engine");
            }
        }
    }

    fn is_aligned(&self) -> bool {
        match self {
            Self::Block(chain) => chain.is_aligned(),
            Self::Pad(pad) => pad.is_aligned(),
            Self::Ccm(_) | Self::Gcm(_) => false,
        }
    }
}

/// Restores an [`Engine`] when dropped unless
/// [`commit`][Self::commit] was called.
struct Txn<'a> {
    engine: &'a mut Engine,
    saved: Option<Snapshot>,
}

impl<'a> Txn<'a> {
    fn begin(engine: &'a mut Engine) -> Self {
        let saved = Some(engine.snapshot());
        Self { engine, saved }
    }

    fn commit(mut self) {
        self.saved = None;
    }
}

impl Deref for Txn<'_> {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        self.engine
    }
}

impl DerefMut for Txn<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.engine
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            trace!("rolling back engine state");
            self.engine.restore(saved);
        }
    }
}

/// One encryption or decryption operation.
///
/// Once [`finish`][Self::finish] succeeds, or any call fails
/// with an error other than [`Error::BufferTooSmall`], the
/// context is terminal and every further call returns
/// [`Error::Inactive`].
pub struct Context<C> {
    cipher: C,
    op: CipherOperation,
    /// `None` once the context is terminal.
    engine: Option<Engine>,
}

impl<C: BlockCipher> Context<C> {
    /// Creates a context for `mechanism` using `cipher`.
    ///
    /// CCM, GCM, and GMAC call the block primitive here to
    /// derive their subkeys and authenticate the associated data.
    ///
    /// # Errors
    ///
    /// - [`Error::MechanismInvalid`] if the mode requires a
    ///   16-byte block.
    /// - [`Error::MechanismParamInvalid`] if a parameter or
    ///   `config` is invalid.
    pub async fn new(
        cipher: C,
        mechanism: &Mechanism<'_>,
        direction: Direction,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        let op = CipherOperation {
            algorithm: cipher.algorithm(),
            mode: mechanism.mode(),
            direction,
        };
        if cipher.block_size() != op.algorithm.block_size() {
            bug!("cipher block size does not match its algorithm");
        }
        let engine = Engine::new(&cipher, mechanism, direction, config).await?;
        debug!(%op, "cipher context initialized");
        Ok(Self {
            cipher,
            op,
            engine: Some(engine),
        })
    }

    /// Returns the operation this context performs.
    pub fn operation(&self) -> CipherOperation {
        self.op
    }

    /// Reports whether the context can still be used.
    pub fn is_active(&self) -> bool {
        self.engine.is_some()
    }

    /// Makes the context terminal if `err` is not recoverable.
    fn fail(&mut self, err: Error) -> Error {
        if !err.is_recoverable() && self.engine.take().is_some() {
            debug!(op = %self.op, error = %err, "cipher context terminated");
        }
        err
    }

    /// Returns the chain whose IV (or counter) may be replaced.
    fn rekey_chain(&mut self, counter: bool) -> Result<&mut Chain> {
        let engine = self.engine.as_mut().ok_or(Error::Inactive)?;
        let aligned = engine.is_aligned();
        let chain = match engine {
            Engine::Block(chain) => match chain.mode() {
                ChainMode::Ctr => counter.then_some(chain),
                ChainMode::Ecb => None,
                ChainMode::Cbc | ChainMode::Cfb => (!counter).then_some(chain),
            },
            Engine::Pad(pad) => (!counter).then_some(pad.chain_mut()),
            _ => None,
        };
        let chain = chain.ok_or(Error::MechanismParamInvalid(if counter {
            "mode does not use a counter"
        } else {
            "mode does not take an IV"
        }))?;
        if !aligned {
            return Err(Error::MechanismParamInvalid(
                "cannot change the IV while a partial block is buffered",
            ));
        }
        Ok(chain)
    }

    /// Replaces the chaining value (CBC, CBC-PAD, CFB).
    ///
    /// Only allowed while no partial block is buffered.
    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        let res = self.rekey_chain(false).and_then(|chain| chain.set_iv(iv));
        res.map_err(|err| self.fail(err))
    }

    /// Replaces the counter block and the number of counter bits
    /// (CTR).
    ///
    /// Only allowed while no partial block is buffered.
    pub fn set_counter(&mut self, block: &[u8], counter_bits: u32) -> Result<()> {
        let res = self.rekey_chain(true).and_then(|chain| {
            let mut next = chain.clone();
            next.set_counter_bits(counter_bits)?;
            next.set_iv(block)?;
            *chain = next;
            Ok(())
        });
        res.map_err(|err| self.fail(err))
    }

    /// Processes `input`, writing the output to `output`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferTooSmall`] if `output` cannot hold
    /// the result. The context is unchanged and the call can be
    /// retried with a larger buffer.
    pub async fn update(
        &mut self,
        input: BufferView<'_>,
        output: &mut BufferViewMut<'_>,
    ) -> Result<usize> {
        match self.try_update(input, output).await {
            Ok(n) => Ok(n),
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn try_update(
        &mut self,
        mut input: BufferView<'_>,
        output: &mut BufferViewMut<'_>,
    ) -> Result<usize> {
        let engine = self.engine.as_mut().ok_or(Error::Inactive)?;
        let need = engine.update_len(input.remaining())?;
        if output.remaining() < need {
            return Err(BufferTooSmallError { need }.into());
        }

        let mut data = Zeroizing::new(Vec::new());
        input.gather_into(&mut data)?;
        let mut out = Zeroizing::new(Vec::new());
        out.try_reserve_exact(need)?;

        let mut txn = Txn::begin(engine);
        txn.update(&self.cipher, &data, &mut out).await?;
        if out.len() != need {
            bug!("update produced an unexpected amount of output");
        }
        txn.commit();

        output.write(&out)?;
        trace!(op = %self.op, input = data.len(), output = need, "update");
        Ok(need)
    }

    /// Processes `buf` in place.
    ///
    /// Returns the number of bytes written to the front of
    /// `buf`, which may be fewer than `buf.len()` when input is
    /// buffered.
    pub async fn update_in_place(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut input = Zeroizing::new(Vec::new());
        if let Err(err) = input.try_reserve_exact(buf.len()) {
            return Err(self.fail(err.into()));
        }
        input.extend_from_slice(buf);
        self.update(BufferView::new(&input), &mut BufferViewMut::new(buf))
            .await
    }

    /// Completes the operation, writing any remaining output
    /// (the final block, the tag, or the verified plaintext) to
    /// `output`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// - [`Error::BufferTooSmall`] as with [`update`][Self::update].
    /// - [`Error::InvalidMac`] if the tag does not verify. No
    ///   plaintext is written.
    pub async fn finish(&mut self, output: &mut BufferViewMut<'_>) -> Result<usize> {
        match self.try_finish(output).await {
            Ok(n) => Ok(n),
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn try_finish(&mut self, output: &mut BufferViewMut<'_>) -> Result<usize> {
        let dir = self.op.direction;
        let engine = self.engine.as_mut().ok_or(Error::Inactive)?;
        let need = engine.finish_len(dir)?;
        if output.remaining() < need {
            return Err(BufferTooSmallError { need }.into());
        }

        let mut out = Zeroizing::new(Vec::new());
        out.try_reserve_exact(need)?;

        let mut txn = Txn::begin(engine);
        txn.finish(&self.cipher, &mut out, dir).await?;
        if out.len() != need {
            bug!("finish produced an unexpected amount of output");
        }
        txn.commit();

        output.write(&out)?;
        self.engine = None;
        debug!(op = %self.op, output = need, "cipher context finished");
        Ok(need)
    }

    /// Performs a complete operation in a single call.
    ///
    /// This is equivalent to [`new`][Self::new], one
    /// [`update`][Self::update], and [`finish`][Self::finish],
    /// except that the output size is checked against the whole
    /// input before the block primitive is called.
    pub async fn atomic(
        cipher: C,
        mechanism: &Mechanism<'_>,
        direction: Direction,
        config: &Config,
        mut input: BufferView<'_>,
        output: &mut BufferViewMut<'_>,
    ) -> Result<usize> {
        config.validate()?;
        let bs = cipher.block_size();
        check_mechanism(mechanism, bs)?;
        let expected = atomic_len(mechanism, direction, bs, input.remaining())?;
        if output.remaining() < expected.min() {
            return Err(BufferTooSmallError {
                need: expected.min(),
            }
            .into());
        }

        let mut ctx = Self::new(cipher, mechanism, direction, config).await?;
        let mut data = Zeroizing::new(Vec::new());
        input.gather_into(&mut data)?;
        let mut out = Zeroizing::new(Vec::new());
        out.try_reserve_exact(expected.min().saturating_add(MAX_BLOCK_SIZE))?;

        let engine = ctx.engine.as_mut().assume("new context is active")?;
        engine.update(&ctx.cipher, &data, &mut out).await?;
        engine.finish(&ctx.cipher, &mut out, direction).await?;
        if let OutputLen::Exact(n) = expected {
            if out.len() != n {
                bug!("atomic produced an unexpected amount of output");
            }
        }

        output.write(&out)?;
        debug!(op = %ctx.op, input = data.len(), output = out.len(), "atomic operation");
        Ok(out.len())
    }
}

impl<C> fmt::Debug for Context<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("op", &self.op)
            .field("active", &self.engine.is_some())
            .finish_non_exhaustive()
    }
}

/// Routes requests to contexts built from a [`Provider`].
#[derive(Clone, Debug, Default)]
pub struct Dispatcher<P> {
    provider: P,
    config: Config,
}

impl<P: Provider> Dispatcher<P> {
    /// Creates a dispatcher with the default [`Config`].
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, Config::default())
    }

    /// Creates a dispatcher with a custom [`Config`].
    pub fn with_config(provider: P, config: Config) -> Self {
        Self { provider, config }
    }

    /// Returns the dispatcher's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn cipher(&self, algorithm: Algorithm, key: &[u8]) -> Result<P::Cipher> {
        algorithm.check_key_len(key.len())?;
        let cipher = self.provider.new_cipher(algorithm, key)?;
        if cipher.algorithm() != algorithm {
            return Err(Error::KeyTypeInconsistent);
        }
        Ok(cipher)
    }

    /// Starts a multi-part operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySizeRange`] if `key` is the wrong
    /// length for `algorithm`, in addition to the errors
    /// returned by [`Context::new`].
    pub async fn init(
        &self,
        algorithm: Algorithm,
        key: &[u8],
        mechanism: &Mechanism<'_>,
        direction: Direction,
    ) -> Result<Context<P::Cipher>> {
        let cipher = self.cipher(algorithm, key)?;
        Context::new(cipher, mechanism, direction, &self.config).await
    }

    /// Performs a single-part operation.
    ///
    /// See [`Context::atomic`].
    pub async fn atomic(
        &self,
        algorithm: Algorithm,
        key: &[u8],
        mechanism: &Mechanism<'_>,
        direction: Direction,
        input: BufferView<'_>,
        output: &mut BufferViewMut<'_>,
    ) -> Result<usize> {
        let cipher = self.cipher(algorithm, key)?;
        Context::atomic(cipher, mechanism, direction, &self.config, input, output).await
    }
}
