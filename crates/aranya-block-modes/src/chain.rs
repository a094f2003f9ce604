//! The chaining core.
//!
//! A [`Chain`] turns a block primitive into ECB, CBC, CFB, or
//! CTR over a byte stream that arrives in arbitrarily sized
//! pieces.
//!
//! ECB and CBC only ever process whole blocks. Input that does
//! not fill a block is kept in the residue until the next call.
//!
//! CFB and CTR are stream modes. Every input byte produces an
//! output byte immediately. A trailing partial block is
//! zero-padded for the primitive call, and the unused part of
//! that keystream block is kept so the next call can consume it
//! without invoking the primitive again.

use alloc::vec::Vec;
use core::cmp;

use buggy::{BugExt as _, bug};
use heapless::Vec as HVec;
use tracing::trace;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    block::{Block, BlockCipher, MAX_BLOCK_SIZE},
    error::{Error, Result},
    mechanism::Direction,
};

/// The chaining modes handled by [`Chain`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ChainMode {
    Ecb,
    Cbc,
    Cfb,
    Ctr,
}

impl ChainMode {
    const fn is_stream(self) -> bool {
        matches!(self, Self::Cfb | Self::Ctr)
    }
}

/// Receives a chain's output.
pub(crate) trait Sink {
    fn put(&mut self, data: &[u8]) -> Result<()>;
}

impl Sink for Vec<u8> {
    fn put(&mut self, data: &[u8]) -> Result<()> {
        self.try_reserve(data.len())?;
        self.extend_from_slice(data);
        Ok(())
    }
}

/// Drops a chain's output.
///
/// Used for CBC-MAC, where only the final chaining value
/// matters.
pub(crate) struct Discard;

impl Sink for Discard {
    fn put(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// ECB, CBC, CFB, or CTR state.
#[derive(Clone)]
pub(crate) struct Chain {
    mode: ChainMode,
    dir: Direction,
    bs: usize,
    /// The chaining value (CBC, CFB) or the next unused counter
    /// block (CTR).
    iv: Block,
    has_iv: bool,
    /// Input that does not yet fill a block (ECB, CBC).
    residue: HVec<u8, MAX_BLOCK_SIZE>,
    /// The keystream block from the most recent primitive call
    /// (CFB, CTR).
    last_block: Block,
    /// How many bytes of `last_block` have been used. Equal to
    /// `bs` when nothing is cached.
    last_block_len: usize,
    counter_bits: u32,
    /// The per-job transfer cap, a non-zero multiple of `bs`.
    max_job: usize,
}

impl Chain {
    /// Creates a chain.
    ///
    /// `max_transfer` caps the number of bytes submitted to the
    /// primitive per job.
    pub fn new(mode: ChainMode, dir: Direction, bs: usize, max_transfer: usize) -> Result<Self> {
        if bs == 0 || bs > MAX_BLOCK_SIZE {
            bug!("block size out of range");
        }
        let max_job = cmp::max(max_transfer - max_transfer % bs, bs);
        Ok(Self {
            mode,
            dir,
            bs,
            iv: Block::default(),
            has_iv: mode == ChainMode::Ecb,
            residue: HVec::new(),
            last_block: Block::default(),
            last_block_len: bs,
            counter_bits: u32::try_from(bs * 8).assume("block size fits in u32")?,
            max_job,
        })
    }

    /// Sets the chaining value or counter block.
    ///
    /// Any cached keystream is discarded.
    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        if self.mode == ChainMode::Ecb {
            return Err(Error::MechanismParamInvalid("ECB does not take an IV"));
        }
        if iv.len() != self.bs {
            return Err(Error::MechanismParamInvalid("IV must be exactly one block"));
        }
        self.iv[..self.bs].copy_from_slice(iv);
        self.has_iv = true;
        self.last_block.zeroize();
        self.last_block_len = self.bs;
        Ok(())
    }

    /// Sets the number of counter bits (CTR).
    pub fn set_counter_bits(&mut self, bits: u32) -> Result<()> {
        let max = u32::try_from(self.bs * 8).assume("block size fits in u32")?;
        if bits == 0 || bits > max {
            return Err(Error::MechanismParamInvalid("counter bits out of range"));
        }
        self.counter_bits = bits;
        Ok(())
    }

    /// Returns the current chaining value or counter block.
    pub fn iv(&self) -> &[u8] {
        &self.iv[..self.bs]
    }

    pub fn mode(&self) -> ChainMode {
        self.mode
    }

    pub fn block_size(&self) -> usize {
        self.bs
    }

    /// Returns the number of buffered input bytes.
    pub fn residue_len(&self) -> usize {
        self.residue.len()
    }

    /// Reports whether there is neither residue nor cached
    /// keystream.
    pub fn is_aligned(&self) -> bool {
        self.residue.is_empty() && self.last_block_len == self.bs
    }

    /// Returns the number of bytes that processing `input_len`
    /// more bytes would produce.
    pub fn output_len(&self, input_len: usize) -> Result<usize> {
        if self.mode.is_stream() {
            return Ok(input_len);
        }
        let total = self
            .residue
            .len()
            .checked_add(input_len)
            .ok_or(Error::DataLenRange)?;
        Ok(total - total % self.bs)
    }

    /// Processes `input`, writing the output to `sink`.
    pub async fn process<C, S>(&mut self, cipher: &C, input: &[u8], sink: &mut S) -> Result<()>
    where
        C: BlockCipher,
        S: Sink,
    {
        if !self.has_iv {
            return Err(Error::MechanismParamInvalid("no IV has been supplied"));
        }
        if cipher.block_size() != self.bs {
            bug!("cipher block size changed");
        }
        trace!(mode = ?self.mode, len = input.len(), residue = self.residue.len(), "chain");
        if self.mode.is_stream() {
            self.process_stream(cipher, input, sink).await
        } else {
            self.process_blocks(cipher, input, sink).await
        }
    }

    /// Zero-pads the residue to a full block and processes it.
    ///
    /// Does nothing if there is no residue.
    pub async fn flush_zero_padded<C, S>(&mut self, cipher: &C, sink: &mut S) -> Result<()>
    where
        C: BlockCipher,
        S: Sink,
    {
        let r = self.residue.len();
        if r == 0 {
            return Ok(());
        }
        let zeros = [0u8; MAX_BLOCK_SIZE];
        self.process(cipher, &zeros[..self.bs - r], sink).await
    }

    async fn process_blocks<C, S>(&mut self, cipher: &C, input: &[u8], sink: &mut S) -> Result<()>
    where
        C: BlockCipher,
        S: Sink,
    {
        let usable = self.output_len(input.len())?;
        if usable == 0 {
            self.residue
                .extend_from_slice(input)
                .ok()
                .assume("residue stays below one block")?;
            return Ok(());
        }

        let head_len = self.residue.len();
        let mut head_buf = Zeroizing::new(Block::default());
        head_buf[..head_len].copy_from_slice(&self.residue);
        self.residue.clear();

        let mut head = &head_buf[..head_len];
        let (mut body, tail) = input.split_at(usable - head_len);

        let mut work = Zeroizing::new(Vec::new());
        work.try_reserve_exact(cmp::min(usable, self.max_job))?;
        let mut left = usable;
        while left > 0 {
            let n = cmp::min(left, self.max_job);
            work.clear();
            let from_head = cmp::min(head.len(), n);
            work.extend_from_slice(&head[..from_head]);
            head = &head[from_head..];
            let (now, rest) = body.split_at(n - from_head);
            work.extend_from_slice(now);
            body = rest;

            self.block_job(cipher, &mut work).await?;
            sink.put(&work)?;
            left -= n;
        }

        self.residue
            .extend_from_slice(tail)
            .ok()
            .assume("residue stays below one block")?;
        Ok(())
    }

    /// Runs one ECB or CBC job over whole blocks.
    async fn block_job<C: BlockCipher>(&mut self, cipher: &C, work: &mut [u8]) -> Result<()> {
        let bs = self.bs;
        match (self.mode, self.dir) {
            (ChainMode::Ecb, Direction::Encrypt) => cipher.encrypt_blocks(work).await?,
            (ChainMode::Ecb, Direction::Decrypt) => cipher.decrypt_blocks(work).await?,
            (ChainMode::Cbc, Direction::Encrypt) => {
                for block in work.chunks_exact_mut(bs) {
                    xor_in_place(block, &self.iv[..bs]);
                    cipher.encrypt_block(block).await?;
                    self.iv[..bs].copy_from_slice(block);
                }
            }
            (ChainMode::Cbc, Direction::Decrypt) => {
                // The ciphertext must be captured before it is
                // overwritten.
                let mut ct = Vec::new();
                ct.try_reserve_exact(work.len())?;
                ct.extend_from_slice(work);

                cipher.decrypt_blocks(work).await?;
                let mut prev = &self.iv[..bs];
                for (block, next) in work.chunks_exact_mut(bs).zip(ct.chunks_exact(bs)) {
                    xor_in_place(block, prev);
                    prev = next;
                }
                let last = ct.len() - bs;
                self.iv[..bs].copy_from_slice(&ct[last..]);
            }
            (ChainMode::Cfb | ChainMode::Ctr, _) => bug!("stream mode in block path"),
        }
        Ok(())
    }

    async fn process_stream<C, S>(&mut self, cipher: &C, input: &[u8], sink: &mut S) -> Result<()>
    where
        C: BlockCipher,
        S: Sink,
    {
        let bs = self.bs;
        let mut input = input;

        // Use up the keystream left over from the previous call.
        if self.last_block_len < bs && !input.is_empty() {
            let off = self.last_block_len;
            let n = cmp::min(bs - off, input.len());
            let (now, rest) = input.split_at(n);
            let mut out = Zeroizing::new(Block::default());
            for ((o, &i), &k) in out.iter_mut().zip(now).zip(&self.last_block[off..off + n]) {
                *o = i ^ k;
            }
            if self.mode == ChainMode::Cfb {
                let feedback = match self.dir {
                    Direction::Encrypt => &out[..n],
                    Direction::Decrypt => now,
                };
                self.iv[off..off + n].copy_from_slice(feedback);
            }
            self.last_block_len += n;
            sink.put(&out[..n])?;
            input = rest;
            trace!(n, "used cached keystream");
        }
        if input.is_empty() {
            return Ok(());
        }

        let mut work = Zeroizing::new(Vec::new());
        work.try_reserve_exact(cmp::min(input.len(), self.max_job).next_multiple_of(bs))?;
        while !input.is_empty() {
            let n = cmp::min(input.len(), self.job_cap());
            let padded = n.next_multiple_of(bs);
            let (now, rest) = input.split_at(n);
            work.clear();
            work.extend_from_slice(now);
            work.resize(padded, 0);

            match self.mode {
                ChainMode::Ctr => self.ctr_job(cipher, &mut work).await?,
                ChainMode::Cfb => self.cfb_job(cipher, &mut work, n).await?,
                ChainMode::Ecb | ChainMode::Cbc => bug!("block mode in stream path"),
            }
            sink.put(&work[..n])?;
            self.last_block_len = bs - (padded - n);
            input = rest;
        }
        Ok(())
    }

    /// The largest job, in bytes, that can be submitted next.
    fn job_cap(&self) -> usize {
        if self.mode != ChainMode::Ctr {
            return self.max_job;
        }
        // Do not let a single job run past a counter wrap.
        let blocks = blocks_until_wrap(&self.iv[..self.bs], self.counter_bits);
        let bytes = usize::try_from(blocks)
            .unwrap_or(usize::MAX)
            .saturating_mul(self.bs);
        cmp::min(self.max_job, bytes)
    }

    async fn ctr_job<C: BlockCipher>(&mut self, cipher: &C, work: &mut [u8]) -> Result<()> {
        let bs = self.bs;
        let mut ks = Zeroizing::new(Vec::new());
        ks.try_reserve_exact(work.len())?;
        for _ in 0..work.len() / bs {
            ks.extend_from_slice(&self.iv[..bs]);
            add_counter(&mut self.iv[..bs], self.counter_bits, 1);
        }
        cipher.encrypt_blocks(&mut ks).await?;
        xor_in_place(work, &ks);
        let last = ks.len() - bs;
        self.last_block[..bs].copy_from_slice(&ks[last..]);
        Ok(())
    }

    /// `n` is the number of real (unpadded) bytes in `work`.
    async fn cfb_job<C: BlockCipher>(&mut self, cipher: &C, work: &mut [u8], n: usize) -> Result<()> {
        let bs = self.bs;
        match self.dir {
            Direction::Encrypt => {
                // Each block's feedback depends on the previous
                // block's ciphertext.
                let mut off = 0;
                for block in work.chunks_exact_mut(bs) {
                    let mut ks = Zeroizing::new(self.iv);
                    cipher.encrypt_block(&mut ks[..bs]).await?;
                    xor_in_place(block, &ks[..bs]);
                    let used = cmp::min(bs, n - off);
                    self.iv[..used].copy_from_slice(&block[..used]);
                    self.last_block = *ks;
                    off += bs;
                }
            }
            Direction::Decrypt => {
                // All of the ciphertext is known up front, so the
                // keystream is a single batch.
                let padded = work.len();
                let mut ks = Zeroizing::new(Vec::new());
                ks.try_reserve_exact(padded)?;
                ks.extend_from_slice(&self.iv[..bs]);
                ks.extend_from_slice(&work[..padded - bs]);
                cipher.encrypt_blocks(&mut ks).await?;

                let used = bs - (padded - n);
                self.iv[..used].copy_from_slice(&work[padded - bs..padded - bs + used]);
                xor_in_place(work, &ks);
                self.last_block[..bs].copy_from_slice(&ks[padded - bs..]);
            }
        }
        Ok(())
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.iv.zeroize();
        self.last_block.zeroize();
        self.residue.as_mut_slice().zeroize();
    }
}

/// XORs `src` into `dst`.
pub(crate) fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

fn counter_mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

fn load_be(block: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    let start = buf.len().saturating_sub(block.len());
    buf[start..].copy_from_slice(&block[..16 - start]);
    u128::from_be_bytes(buf)
}

fn store_be(v: u128, block: &mut [u8]) {
    let buf = v.to_be_bytes();
    let start = buf.len().saturating_sub(block.len());
    block.copy_from_slice(&buf[start..]);
}

/// Adds `n` to the low `bits` bits of the big-endian counter
/// `block`, wrapping within those bits. The other bits are left
/// untouched.
pub(crate) fn add_counter(block: &mut [u8], bits: u32, n: u128) {
    let mask = counter_mask(bits);
    let old = load_be(block);
    let new = (old & !mask) | (old.wrapping_add(n) & mask);
    store_be(new, block);
}

/// Returns the number of counter values, starting with the
/// current one, that can be used before the counter wraps.
pub(crate) fn blocks_until_wrap(block: &[u8], bits: u32) -> u128 {
    let mask = counter_mask(bits);
    let low = load_be(block) & mask;
    (mask - low).saturating_add(1)
}
