//! Galois/counter mode and GMAC per [NIST SP 800-38D].
//!
//! Encryption runs CTR from `inc32(J0)` and hashes the
//! ciphertext as it is produced. Decryption buffers the whole
//! ciphertext, verifies the tag, and only then decrypts, so no
//! plaintext is ever released for a forged message.
//!
//! [NIST SP 800-38D]: https://nvlpubs.nist.gov/nistpubs/Legacy/SP/nistspecialpublication800-38d.pdf

use alloc::vec::Vec;

use buggy::BugExt as _;
use subtle::ConstantTimeEq as _;
use tracing::warn;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    block::{Block, BlockCipher, encrypt_one},
    chain::{Chain, ChainMode, Sink, add_counter, xor_in_place},
    config::Config,
    error::{Error, Result},
    ghash::Ghash,
    mechanism::{Direction, GcmParams, GmacParams},
};

/// The largest plaintext, in bytes: `2^39 - 256` bits.
const MAX_DATA_LEN: u64 = (1 << 36) - 32;

/// The largest ciphertext plus tag, in bytes.
const MAX_TAGGED_LEN: u64 = MAX_DATA_LEN + 16;

/// The GMAC IV length.
const GMAC_IV_LEN: usize = 12;

/// The GMAC tag length.
const GMAC_TAG_LEN: usize = 16;

fn bits(len: usize) -> Result<u64> {
    u64::try_from(len)
        .ok()
        .and_then(|n| n.checked_mul(8))
        .ok_or(Error::MechanismParamInvalid("length overflows a 64-bit bit count"))
}

/// Validates GCM parameters for a cipher with block size `bs`.
pub(crate) fn check_params(params: &GcmParams<'_>, bs: usize) -> Result<()> {
    if bs != 16 {
        return Err(Error::MechanismInvalid);
    }
    if params.iv.is_empty() {
        return Err(Error::MechanismParamInvalid("GCM IV must not be empty"));
    }
    if !matches!(params.tag_bits, 32 | 64 | 96 | 104 | 112 | 120 | 128) {
        return Err(Error::MechanismParamInvalid("invalid GCM tag length"));
    }
    bits(params.iv.len())?;
    bits(params.aad.len())?;
    Ok(())
}

/// Validates GMAC parameters for a cipher with block size `bs`.
pub(crate) fn check_gmac_params(params: &GmacParams<'_>, bs: usize) -> Result<()> {
    if bs != 16 {
        return Err(Error::MechanismInvalid);
    }
    if params.iv.len() != GMAC_IV_LEN {
        return Err(Error::MechanismParamInvalid("GMAC IV must be 12 bytes"));
    }
    bits(params.aad.len())?;
    Ok(())
}

/// Returns the tag length in bytes for `params`.
pub(crate) const fn tag_len(params: &GcmParams<'_>) -> usize {
    params.tag_bits / 8
}

/// Returns the GMAC tag length in bytes.
pub(crate) const fn gmac_tag_len() -> usize {
    GMAC_TAG_LEN
}

/// GCM or GMAC state.
pub(crate) struct Gcm {
    dir: Direction,
    /// Whether this is GMAC, which takes no payload.
    gmac: bool,
    ghash: Ghash,
    ctr: Chain,
    /// `E_K(J0)`.
    ek_j0: Block,
    tag_len: usize,
    aad_bits: u64,
    /// Ciphertext bytes hashed so far when encrypting.
    ct_len: u64,
    /// Ciphertext and tag awaiting verification.
    scratch: Zeroizing<Vec<u8>>,
}

/// Saved [`Gcm`] state.
pub(crate) struct GcmSnapshot {
    ghash: Ghash,
    ctr: Chain,
    ct_len: u64,
    scratch_len: usize,
}

impl Gcm {
    /// Sets up GCM.
    pub async fn new<C: BlockCipher>(
        cipher: &C,
        params: &GcmParams<'_>,
        dir: Direction,
        max_transfer: usize,
    ) -> Result<Self> {
        check_params(params, cipher.block_size())?;
        Self::init(
            cipher,
            params.iv,
            params.aad,
            tag_len(params),
            dir,
            false,
            max_transfer,
        )
        .await
    }

    /// Sets up GMAC.
    pub async fn new_gmac<C: BlockCipher>(
        cipher: &C,
        params: &GmacParams<'_>,
        dir: Direction,
        max_transfer: usize,
    ) -> Result<Self> {
        check_gmac_params(params, cipher.block_size())?;
        Self::init(
            cipher,
            params.iv,
            params.aad,
            GMAC_TAG_LEN,
            dir,
            true,
            max_transfer,
        )
        .await
    }

    async fn init<C: BlockCipher>(
        cipher: &C,
        iv: &[u8],
        aad: &[u8],
        tag_len: usize,
        dir: Direction,
        gmac: bool,
        max_transfer: usize,
    ) -> Result<Self> {
        let h = Zeroizing::new(encrypt_one(cipher, &[0u8; 16]).await?);

        let mut j0 = Zeroizing::new(Block::default());
        if iv.len() == 12 {
            j0[..12].copy_from_slice(iv);
            j0[15] = 1;
        } else {
            let mut g = Ghash::new(&h);
            g.update(iv);
            *j0 = g.finalize(0, bits(iv.len())?);
        }
        let ek_j0 = encrypt_one(cipher, &j0[..]).await?;

        let mut ghash = Ghash::new(&h);
        ghash.update(aad);
        ghash.pad();

        add_counter(&mut j0[..], 32, 1);
        let mut ctr = Chain::new(ChainMode::Ctr, dir, 16, max_transfer)?;
        ctr.set_iv(&j0[..])?;
        ctr.set_counter_bits(32)?;

        Ok(Self {
            dir,
            gmac,
            ghash,
            ctr,
            ek_j0,
            tag_len,
            aad_bits: bits(aad.len())?,
            ct_len: 0,
            scratch: Zeroizing::new(Vec::new()),
        })
    }

    pub fn update_len(&self, input_len: usize) -> Result<usize> {
        let input = u64::try_from(input_len).map_err(|_| Error::DataLenRange)?;
        match self.dir {
            Direction::Encrypt if self.gmac => {
                if input_len != 0 {
                    return Err(Error::Unsupported);
                }
                Ok(0)
            }
            Direction::Encrypt => match self.ct_len.checked_add(input) {
                Some(total) if total <= MAX_DATA_LEN => Ok(input_len),
                _ => Err(Error::DataLenRange),
            },
            Direction::Decrypt => {
                let held = u64::try_from(self.scratch.len()).assume("length fits in u64")?;
                match held.checked_add(input) {
                    Some(total) if total <= MAX_TAGGED_LEN => Ok(0),
                    _ => Err(Error::DataLenRange),
                }
            }
        }
    }

    pub fn finish_len(&self) -> Result<usize> {
        match self.dir {
            Direction::Encrypt => Ok(self.tag_len),
            Direction::Decrypt => {
                let ct_len = self
                    .scratch
                    .len()
                    .checked_sub(self.tag_len)
                    .ok_or(Error::InvalidMac)?;
                if self.gmac && ct_len != 0 {
                    return Err(Error::InvalidMac);
                }
                Ok(ct_len)
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
        if input.is_empty() {
            return Ok(());
        }
        match self.dir {
            Direction::Encrypt => {
                let start = out.len();
                self.ctr.process(cipher, input, out).await?;
                self.ghash.update(&out[start..]);
                self.ct_len += u64::try_from(input.len()).assume("length fits in u64")?;
            }
            Direction::Decrypt => self.scratch.put(input)?,
        }
        Ok(())
    }

    /// Computes the tag over everything hashed so far.
    fn tag(&self, ct_len: usize) -> Result<Zeroizing<Block>> {
        let mut tag = Zeroizing::new(self.ghash.clone().finalize(self.aad_bits, bits(ct_len)?));
        xor_in_place(&mut tag[..], &self.ek_j0);
        Ok(tag)
    }

    pub async fn finish<C: BlockCipher>(&mut self, cipher: &C, out: &mut Vec<u8>) -> Result<()> {
        let t = self.tag_len;
        match self.dir {
            Direction::Encrypt => {
                let ct_len = usize::try_from(self.ct_len).assume("hashed bytes fit in usize")?;
                let tag = self.tag(ct_len)?;
                out.put(&tag[..t])
            }
            Direction::Decrypt => {
                let ct_len = self.finish_len()?;
                let (ct, received) = self.scratch.split_at(ct_len);
                self.ghash.update(ct);
                let tag = self.tag(ct_len)?;
                if bool::from(tag[..t].ct_eq(received)) {
                    self.ctr.process(cipher, ct, out).await
                } else {
                    self.scratch.zeroize();
                    warn!(gmac = self.gmac, "GCM tag mismatch");
                    Err(Error::InvalidMac)
                }
            }
        }
    }

    pub fn snapshot(&self) -> GcmSnapshot {
        GcmSnapshot {
            ghash: self.ghash.clone(),
            ctr: self.ctr.clone(),
            ct_len: self.ct_len,
            scratch_len: self.scratch.len(),
        }
    }

    pub fn restore(&mut self, snap: GcmSnapshot) {
        let GcmSnapshot {
            ghash,
            ctr,
            ct_len,
            scratch_len,
        } = snap;
        self.ghash = ghash;
        self.ctr = ctr;
        self.ct_len = ct_len;
        if let Some(tail) = self.scratch.get_mut(scratch_len..) {
            tail.zeroize();
        }
        self.scratch.truncate(scratch_len);
    }
}

impl Drop for Gcm {
    fn drop(&mut self) {
        self.ek_j0.zeroize();
    }
}

/// Computes a GMAC tag over `data`.
///
/// # Errors
///
/// Returns [`Error::MechanismInvalid`] unless `cipher` has a
/// 16-byte block, or [`Error::MechanismParamInvalid`] unless
/// `iv` is 12 bytes.
pub async fn gmac_sign<C: BlockCipher>(cipher: &C, iv: &[u8], data: &[u8]) -> Result<[u8; 16]> {
    let params = GmacParams { iv, aad: data };
    let max = Config::default().max_transfer_len;
    let mut gmac = Gcm::new_gmac(cipher, &params, Direction::Encrypt, max).await?;
    let mut out = Vec::new();
    gmac.finish(cipher, &mut out).await?;
    let mut tag = [0u8; 16];
    tag.copy_from_slice(out.get(..16).assume("GMAC tags are 16 bytes")?);
    Ok(tag)
}

/// Verifies a GMAC tag over `data`.
///
/// # Errors
///
/// Returns [`Error::InvalidMac`] if `tag` does not match, in
/// addition to the errors returned by [`gmac_sign`].
pub async fn gmac_verify<C: BlockCipher>(
    cipher: &C,
    iv: &[u8],
    data: &[u8],
    tag: &[u8],
) -> Result<()> {
    let params = GmacParams { iv, aad: data };
    let max = Config::default().max_transfer_len;
    let mut gmac = Gcm::new_gmac(cipher, &params, Direction::Decrypt, max).await?;
    let mut out = Vec::new();
    gmac.update(cipher, tag, &mut out).await?;
    gmac.finish(cipher, &mut out).await
}
