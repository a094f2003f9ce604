#![allow(clippy::arithmetic_side_effects, clippy::unwrap_used)]

use aranya_block_modes::{
    Algorithm, BlockCipher, BufferTooSmallError, BufferView, BufferViewMut, CcmParams,
    CipherError, Config, Context, CtrParams, Direction, Dispatcher, Error, GcmParams, GmacParams,
    Mechanism, Provider, SoftCipher, SoftProvider, gmac_sign, gmac_verify,
    testing::InstrumentedCipher, unpad,
};
use proptest::prelude::*;

/// NIST SP 800-38A, F.1 through F.5.
const KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
const PLAIN: &str = concat!(
    "6bc1bee22e409f96e93d7e117393172a",
    "ae2d8a571e03ac9c9eb76fac45af8e51",
    "30c81c46a35ce411e5fbc1191a0a52ef",
    "f69f2445df4f9b17ad2b417be66c3710",
);
const IV: &str = "000102030405060708090a0b0c0d0e0f";

fn h(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

fn aes(key: &[u8]) -> SoftCipher {
    SoftCipher::new(Algorithm::Aes, key).unwrap()
}

async fn atomic<C: BlockCipher>(
    cipher: C,
    mechanism: &Mechanism<'_>,
    dir: Direction,
    input: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut out = vec![0u8; input.len() + 32];
    let n = Context::atomic(
        cipher,
        mechanism,
        dir,
        &Config::default(),
        BufferView::new(input),
        &mut BufferViewMut::new(&mut out),
    )
    .await?;
    out.truncate(n);
    Ok(out)
}

/// Feeds `input` in pieces of the given sizes, then the rest.
async fn chunked<C: BlockCipher>(
    cipher: C,
    mechanism: &Mechanism<'_>,
    dir: Direction,
    input: &[u8],
    chunks: &[usize],
) -> Result<Vec<u8>, Error> {
    let mut ctx = Context::new(cipher, mechanism, dir, &Config::default()).await?;
    let mut out = vec![0u8; input.len() + 32];
    let mut view = BufferViewMut::new(&mut out);
    let mut rest = input;
    for &n in chunks {
        let (now, later) = rest.split_at(n.min(rest.len()));
        ctx.update(BufferView::new(now), &mut view).await?;
        rest = later;
    }
    ctx.update(BufferView::new(rest), &mut view).await?;
    ctx.finish(&mut view).await?;
    let n = view.written();
    out.truncate(n);
    Ok(out)
}

fn block_on<F: Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(fut)
}

#[test_log::test(tokio::test)]
async fn test_sp800_38a_ecb() {
    let want = concat!(
        "3ad77bb40d7a3660a89ecaf32466ef97",
        "f5d3d58503b9699de785895a96fdbaaf",
        "43b1cd7f598ece23881b00e3ed030688",
        "7b0c785e27e8ad3f8223207104725dd4",
    );
    let ct = atomic(aes(&h(KEY)), &Mechanism::Ecb, Direction::Encrypt, &h(PLAIN))
        .await
        .unwrap();
    assert_eq!(hex::encode(&ct), want);
    let pt = chunked(aes(&h(KEY)), &Mechanism::Ecb, Direction::Decrypt, &ct, &[3, 20, 9])
        .await
        .unwrap();
    assert_eq!(hex::encode(pt), PLAIN);
}

#[test_log::test(tokio::test)]
async fn test_sp800_38a_cbc() {
    let want = concat!(
        "7649abac8119b246cee98e9b12e9197d",
        "5086cb9b507219ee95db113a917678b2",
        "73bed6b8e3c1743b7116e69e22229516",
        "3ff1caa1681fac09120eca307586e1a7",
    );
    let iv = h(IV);
    let mech = Mechanism::Cbc { iv: Some(&iv) };
    let ct = chunked(aes(&h(KEY)), &mech, Direction::Encrypt, &h(PLAIN), &[1, 16, 30])
        .await
        .unwrap();
    assert_eq!(hex::encode(&ct), want);
    let pt = atomic(aes(&h(KEY)), &mech, Direction::Decrypt, &ct)
        .await
        .unwrap();
    assert_eq!(hex::encode(pt), PLAIN);
}

#[test_log::test(tokio::test)]
async fn test_sp800_38a_cfb128() {
    let want = concat!(
        "3b3fd92eb72dad20333449f8e83cfb4a",
        "c8a64537a0b3a93fcde3cdad9f1ce58b",
        "26751f67a3cbb140b1808cf187a4f4df",
        "c04b05357c5d1c0eeac4c66f9ff7f2e6",
    );
    let iv = h(IV);
    let mech = Mechanism::Cfb { iv: Some(&iv) };
    let ct = chunked(aes(&h(KEY)), &mech, Direction::Encrypt, &h(PLAIN), &[7, 5, 19, 0, 2])
        .await
        .unwrap();
    assert_eq!(hex::encode(&ct), want);
    let pt = chunked(aes(&h(KEY)), &mech, Direction::Decrypt, &ct, &[13, 13, 13])
        .await
        .unwrap();
    assert_eq!(hex::encode(pt), PLAIN);
}

#[test_log::test(tokio::test)]
async fn test_sp800_38a_ctr() {
    let want = concat!(
        "874d6191b620e3261bef6864990db6ce",
        "9806f66b7970fdff8617187bb9fffdff",
        "5ae4df3edbd5d35e5b4f09020db03eab",
        "1e031dda2fbe03d1792170a0f3009cee",
    );
    let counter = h("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff");
    let mech = Mechanism::Ctr(CtrParams {
        counter_bits: 128,
        counter_block: Some(&counter),
    });
    let ct = chunked(aes(&h(KEY)), &mech, Direction::Encrypt, &h(PLAIN), &[33, 1])
        .await
        .unwrap();
    assert_eq!(hex::encode(&ct), want);
    let pt = atomic(aes(&h(KEY)), &mech, Direction::Decrypt, &ct)
        .await
        .unwrap();
    assert_eq!(hex::encode(pt), PLAIN);
}

#[test_log::test(tokio::test)]
async fn test_ctr_counter_wraps_within_counter_bits() {
    let mut ctr0 = [0xABu8; 16];
    ctr0[15] = 0xFF;
    let mut ctr1 = [0xABu8; 16];
    ctr1[15] = 0x00;

    let mech = Mechanism::Ctr(CtrParams {
        counter_bits: 8,
        counter_block: Some(&ctr0),
    });
    let ks = atomic(aes(&h(KEY)), &mech, Direction::Encrypt, &[0u8; 32])
        .await
        .unwrap();

    let want = atomic(
        aes(&h(KEY)),
        &Mechanism::Ecb,
        Direction::Encrypt,
        &[ctr0, ctr1].concat(),
    )
    .await
    .unwrap();
    assert_eq!(ks, want);
}

struct Gcm {
    key: &'static str,
    iv: &'static str,
    aad: &'static str,
    plain: &'static str,
    cipher: &'static str,
    tag: &'static str,
}

/// NIST GCM test cases 1 through 4.
const GCM_VECTORS: &[Gcm] = &[
    Gcm {
        key: "00000000000000000000000000000000",
        iv: "000000000000000000000000",
        aad: "",
        plain: "",
        cipher: "",
        tag: "58e2fccefa7e3061367f1d57a4e7455a",
    },
    Gcm {
        key: "00000000000000000000000000000000",
        iv: "000000000000000000000000",
        aad: "",
        plain: "00000000000000000000000000000000",
        cipher: "0388dace60b6a392f328c2b971b2fe78",
        tag: "ab6e47d42cec13bdf53a67b21257bddf",
    },
    Gcm {
        key: "feffe9928665731c6d6a8f9467308308",
        iv: "cafebabefacedbaddecaf888",
        aad: "",
        plain: concat!(
            "d9313225f88406e5a55909c5aff5269a",
            "86a7a9531534f7da2e4c303d8a318a72",
            "1c3c0c95956809532fcf0e2449a6b525",
            "b16aedf5aa0de657ba637b391aafd255",
        ),
        cipher: concat!(
            "42831ec2217774244b7221b784d0d49c",
            "e3aa212f2c02a4e035c17e2329aca12e",
            "21d514b25466931c7d8f6a5aac84aa05",
            "1ba30b396a0aac973d58e091473f5985",
        ),
        tag: "4d5c2af327cd64a62cf35abd2ba6fab4",
    },
    Gcm {
        key: "feffe9928665731c6d6a8f9467308308",
        iv: "cafebabefacedbaddecaf888",
        aad: "feedfacedeadbeeffeedfacedeadbeefabaddad2",
        plain: concat!(
            "d9313225f88406e5a55909c5aff5269a",
            "86a7a9531534f7da2e4c303d8a318a72",
            "1c3c0c95956809532fcf0e2449a6b525",
            "b16aedf5aa0de657ba637b39",
        ),
        cipher: concat!(
            "42831ec2217774244b7221b784d0d49c",
            "e3aa212f2c02a4e035c17e2329aca12e",
            "21d514b25466931c7d8f6a5aac84aa05",
            "1ba30b396a0aac973d58e091",
        ),
        tag: "5bc94fbc3221a5db94fae95ae7121a47",
    },
];

#[test_log::test(tokio::test)]
async fn test_gcm_known_answers() {
    for (i, v) in GCM_VECTORS.iter().enumerate() {
        let (key, iv, aad) = (h(v.key), h(v.iv), h(v.aad));
        let mech = Mechanism::Gcm(GcmParams {
            iv: &iv,
            aad: &aad,
            tag_bits: 128,
        });
        let sealed = chunked(aes(&key), &mech, Direction::Encrypt, &h(v.plain), &[5, 16])
            .await
            .unwrap();
        assert_eq!(hex::encode(&sealed), format!("{}{}", v.cipher, v.tag), "case {}", i + 1);

        let opened = atomic(aes(&key), &mech, Direction::Decrypt, &sealed)
            .await
            .unwrap();
        assert_eq!(hex::encode(opened), v.plain, "case {}", i + 1);
    }
}

#[test_log::test(tokio::test)]
async fn test_gcm_truncated_tag() {
    let v = &GCM_VECTORS[3];
    let (key, iv, aad) = (h(v.key), h(v.iv), h(v.aad));
    let mech = Mechanism::Gcm(GcmParams {
        iv: &iv,
        aad: &aad,
        tag_bits: 96,
    });
    let sealed = atomic(aes(&key), &mech, Direction::Encrypt, &h(v.plain))
        .await
        .unwrap();
    assert_eq!(hex::encode(&sealed), format!("{}{}", v.cipher, &v.tag[..24]));
    let opened = chunked(aes(&key), &mech, Direction::Decrypt, &sealed, &[70])
        .await
        .unwrap();
    assert_eq!(hex::encode(opened), v.plain);
}

/// RFC 3610, packet vector #1.
#[test_log::test(tokio::test)]
async fn test_ccm_rfc3610_vector() {
    let key = h("c0c1c2c3c4c5c6c7c8c9cacbcccdcecf");
    let nonce = h("00000003020100a0a1a2a3a4a5");
    let aad = h("0001020304050607");
    let payload = h("08090a0b0c0d0e0f101112131415161718191a1b1c1d1e");
    let mech = Mechanism::Ccm(CcmParams {
        nonce: &nonce,
        aad: &aad,
        data_len: payload.len(),
        mac_len: 8,
    });
    let sealed = chunked(aes(&key), &mech, Direction::Encrypt, &payload, &[4, 4, 9])
        .await
        .unwrap();
    assert_eq!(
        hex::encode(&sealed),
        "588c979a61c663d2f066d0c2c0f989806d5f6b61dac38417e8d12cfdf926e0"
    );
    let opened = chunked(aes(&key), &mech, Direction::Decrypt, &sealed, &[22, 2, 1])
        .await
        .unwrap();
    assert_eq!(opened, payload);
}

/// AES-128-CBC-PAD over six bytes produces one block whose last
/// ten bytes are padding.
#[test_log::test(tokio::test)]
async fn test_scenario_cbc_pad_short_message() {
    let iv = h(IV);
    let mech = Mechanism::CbcPad { iv: Some(&iv) };
    let ct = atomic(aes(&h(KEY)), &mech, Direction::Encrypt, b"abcdef")
        .await
        .unwrap();
    assert_eq!(ct.len(), 16);

    let raw = atomic(aes(&h(KEY)), &Mechanism::Cbc { iv: Some(&iv) }, Direction::Decrypt, &ct)
        .await
        .unwrap();
    assert_eq!(&raw[..6], b"abcdef");
    assert_eq!(&raw[6..], &[0x0A; 10]);
    assert_eq!(unpad(&raw, 16).unwrap(), b"abcdef");

    let pt = chunked(aes(&h(KEY)), &mech, Direction::Decrypt, &ct, &[16])
        .await
        .unwrap();
    assert_eq!(pt, b"abcdef");
}

/// AES-256-GCM with no plaintext outputs only the tag.
#[test_log::test(tokio::test)]
async fn test_scenario_gcm_empty_plaintext() {
    let key = [0x11u8; 32];
    let iv = [0x22u8; 12];
    let aad = [0x33u8; 12];
    let mech = Mechanism::Gcm(GcmParams {
        iv: &iv,
        aad: &aad,
        tag_bits: 128,
    });
    let tag = atomic(aes(&key), &mech, Direction::Encrypt, &[])
        .await
        .unwrap();
    assert_eq!(tag.len(), 16);
    let pt = chunked(aes(&key), &mech, Direction::Decrypt, &tag, &[3, 3])
        .await
        .unwrap();
    assert!(pt.is_empty());
}

/// Streaming CCM matches the one-shot result.
#[test_log::test(tokio::test)]
async fn test_scenario_ccm_streaming_matches_atomic() {
    let key = [0x44u8; 16];
    let nonce = [0x55u8; 12];
    let data: Vec<u8> = (0u8..32).collect();
    let mech = Mechanism::Ccm(CcmParams {
        nonce: &nonce,
        aad: b"header",
        data_len: data.len(),
        mac_len: 16,
    });
    let streamed = chunked(aes(&key), &mech, Direction::Encrypt, &data, &[5, 7, 20])
        .await
        .unwrap();
    let whole = atomic(aes(&key), &mech, Direction::Encrypt, &data)
        .await
        .unwrap();
    assert_eq!(streamed, whole);
    assert_eq!(streamed.len(), 48);
}

/// A flipped tag bit fails and releases no plaintext.
#[test_log::test(tokio::test)]
async fn test_scenario_gcm_tampered_tag() {
    let v = &GCM_VECTORS[2];
    let (key, iv) = (h(v.key), h(v.iv));
    let mech = Mechanism::Gcm(GcmParams {
        iv: &iv,
        aad: &[],
        tag_bits: 128,
    });
    let mut sealed = h(&format!("{}{}", v.cipher, v.tag));
    *sealed.last_mut().unwrap() ^= 0x01;

    let mut ctx = Context::new(aes(&key), &mech, Direction::Decrypt, &Config::default())
        .await
        .unwrap();
    let mut out = vec![0u8; sealed.len()];
    let mut view = BufferViewMut::new(&mut out);
    assert_eq!(ctx.update(BufferView::new(&sealed), &mut view).await, Ok(0));
    assert_eq!(ctx.finish(&mut view).await, Err(Error::InvalidMac));
    assert_eq!(view.written(), 0);
    assert!(!ctx.is_active());
    assert_eq!(ctx.finish(&mut view).await, Err(Error::Inactive));
    assert!(out.iter().all(|&b| b == 0));

    let err = atomic(aes(&key), &mech, Direction::Decrypt, &sealed)
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidMac);
}

/// A short CFB update is served from the cached keystream.
#[test_log::test(tokio::test)]
async fn test_scenario_cfb_cached_keystream() {
    let cipher = InstrumentedCipher::new(aes(&h(KEY)));
    let iv = h(IV);
    let mech = Mechanism::Cfb { iv: Some(&iv) };
    let plain = h(PLAIN);

    let mut ctx = Context::new(&cipher, &mech, Direction::Encrypt, &Config::default())
        .await
        .unwrap();
    let mut out = [0u8; 10];
    let mut view = BufferViewMut::new(&mut out);
    ctx.update(BufferView::new(&plain[..7]), &mut view)
        .await
        .unwrap();
    assert_eq!(cipher.calls(), 1);

    cipher.reset_calls();
    ctx.update(BufferView::new(&plain[7..10]), &mut view)
        .await
        .unwrap();
    assert_eq!(cipher.calls(), 0);
    ctx.finish(&mut view).await.unwrap();

    let want = atomic(aes(&h(KEY)), &mech, Direction::Encrypt, &plain[..10])
        .await
        .unwrap();
    assert_eq!(out[..], want[..]);
}

#[test_log::test(tokio::test)]
async fn test_ccm_tampered_ciphertext() {
    let key = [0x66u8; 16];
    let nonce = [0x77u8; 13];
    let data = [0x88u8; 40];
    let mech = Mechanism::Ccm(CcmParams {
        nonce: &nonce,
        aad: &[],
        data_len: data.len(),
        mac_len: 10,
    });
    let mut sealed = atomic(aes(&key), &mech, Direction::Encrypt, &data)
        .await
        .unwrap();
    sealed[3] ^= 0x80;

    let mut out = vec![0xEEu8; 64];
    let mut view = BufferViewMut::new(&mut out);
    let mut ctx = Context::new(aes(&key), &mech, Direction::Decrypt, &Config::default())
        .await
        .unwrap();
    ctx.update(BufferView::new(&sealed), &mut view)
        .await
        .unwrap();
    assert_eq!(ctx.finish(&mut view).await, Err(Error::InvalidMac));
    assert_eq!(view.written(), 0);
    assert!(out.iter().all(|&b| b == 0xEE));
}

/// Flipping any single bit of `ciphertext ‖ tag` fails to
/// verify, however the input is split.
#[test_log::test(tokio::test)]
async fn test_aead_rejects_every_bit_flip() {
    let key = [0x19u8; 16];
    let nonce = [0x2Au8; 11];
    let iv = [0x3Bu8; 12];
    let ccm = Mechanism::Ccm(CcmParams {
        nonce: &nonce,
        aad: b"hdr",
        data_len: 21,
        mac_len: 8,
    });
    let gcm = Mechanism::Gcm(GcmParams {
        iv: &iv,
        aad: b"hdr",
        tag_bits: 128,
    });
    for (mech, data) in [(ccm, [0x4Cu8; 21].as_slice()), (gcm, [0x5Du8; 17].as_slice())] {
        let sealed = atomic(aes(&key), &mech, Direction::Encrypt, data)
            .await
            .unwrap();
        for bit in 0..sealed.len() * 8 {
            let mut bad = sealed.clone();
            bad[bit / 8] ^= 1 << (bit % 8);
            let res = chunked(aes(&key), &mech, Direction::Decrypt, &bad, &[5, 0, 11]).await;
            assert_eq!(res, Err(Error::InvalidMac), "{} bit {bit}", mech.mode());
        }
        let pt = chunked(aes(&key), &mech, Direction::Decrypt, &sealed, &[5, 0, 11])
            .await
            .unwrap();
        assert_eq!(pt, data);
    }
}

/// Padding whose bytes disagree with the pad length is rejected.
#[test_log::test(tokio::test)]
async fn test_cbc_pad_rejects_inconsistent_padding() {
    let iv = h(IV);
    let mut block = [0x41u8; 16];
    block[13..].copy_from_slice(&[0x09, 0x09, 0x03]);
    let ct = atomic(aes(&h(KEY)), &Mechanism::Cbc { iv: Some(&iv) }, Direction::Encrypt, &block)
        .await
        .unwrap();

    let mech = Mechanism::CbcPad { iv: Some(&iv) };
    let err = atomic(aes(&h(KEY)), &mech, Direction::Decrypt, &ct)
        .await
        .unwrap_err();
    assert_eq!(err, Error::EncryptedDataLenRange);
    let err = chunked(aes(&h(KEY)), &mech, Direction::Decrypt, &ct, &[7])
        .await
        .unwrap_err();
    assert_eq!(err, Error::EncryptedDataLenRange);
}

#[test_log::test(tokio::test)]
async fn test_ccm_length_checks() {
    let key = [0x66u8; 16];
    let nonce = [0x77u8; 13];
    let mech = Mechanism::Ccm(CcmParams {
        nonce: &nonce,
        aad: &[],
        data_len: 10,
        mac_len: 8,
    });

    let mut ctx = Context::new(aes(&key), &mech, Direction::Encrypt, &Config::default())
        .await
        .unwrap();
    let mut out = [0u8; 32];
    let mut view = BufferViewMut::new(&mut out);
    assert_eq!(
        ctx.update(BufferView::new(&[0u8; 11]), &mut view).await,
        Err(Error::DataLenRange)
    );

    let mut ctx = Context::new(aes(&key), &mech, Direction::Encrypt, &Config::default())
        .await
        .unwrap();
    ctx.update(BufferView::new(&[0u8; 9]), &mut view)
        .await
        .unwrap();
    assert_eq!(ctx.finish(&mut view).await, Err(Error::DataLenRange));

    let mut ctx = Context::new(aes(&key), &mech, Direction::Decrypt, &Config::default())
        .await
        .unwrap();
    ctx.update(BufferView::new(&[0u8; 17]), &mut view)
        .await
        .unwrap();
    assert_eq!(ctx.finish(&mut view).await, Err(Error::EncryptedDataLenRange));
}

#[test_log::test(tokio::test)]
async fn test_gmac() {
    let key = h(KEY);
    let iv = [0x99u8; 12];

    // With nothing to authenticate the tag is E_K(J0).
    let mut j0 = [0u8; 16];
    j0[..12].copy_from_slice(&iv);
    j0[15] = 1;
    aes(&key).encrypt_block(&mut j0).await.unwrap();
    let empty = GmacParams { iv: &iv, aad: &[] };
    let tag = atomic(aes(&key), &Mechanism::Gmac(empty), Direction::Encrypt, &[])
        .await
        .unwrap();
    assert_eq!(tag, j0);
    assert_eq!(gmac_sign(&aes(&key), &iv, &[]).await.unwrap(), j0);

    let tag = gmac_sign(&aes(&key), &iv, b"some data").await.unwrap();
    gmac_verify(&aes(&key), &iv, b"some data", &tag)
        .await
        .unwrap();
    assert_eq!(
        gmac_verify(&aes(&key), &iv, b"some date", &tag).await,
        Err(Error::InvalidMac)
    );
    assert_eq!(
        gmac_verify(&aes(&key), &iv, b"some data", &tag[..15]).await,
        Err(Error::InvalidMac)
    );

    let params = GmacParams {
        iv: &iv,
        aad: b"some data",
    };
    let verified = atomic(aes(&key), &Mechanism::Gmac(params), Direction::Decrypt, &tag)
        .await
        .unwrap();
    assert!(verified.is_empty());
    let err = atomic(aes(&key), &Mechanism::Gmac(params), Direction::Encrypt, b"payload")
        .await
        .unwrap_err();
    assert_eq!(err, Error::Unsupported);
}

#[test_log::test(tokio::test)]
async fn test_buffer_too_small_is_retryable() {
    let iv = h(IV);
    let mech = Mechanism::Cbc { iv: Some(&iv) };
    let plain = h(PLAIN);
    let mut ctx = Context::new(aes(&h(KEY)), &mech, Direction::Encrypt, &Config::default())
        .await
        .unwrap();

    let mut small = [0u8; 16];
    let err = ctx
        .update(BufferView::new(&plain[..40]), &mut BufferViewMut::new(&mut small))
        .await
        .unwrap_err();
    assert_eq!(err, Error::BufferTooSmall(BufferTooSmallError { need: 32 }));
    assert!(ctx.is_active());

    let mut out = [0u8; 64];
    let mut view = BufferViewMut::new(&mut out);
    assert_eq!(ctx.update(BufferView::new(&plain[..40]), &mut view).await, Ok(32));
    assert_eq!(ctx.update(BufferView::new(&plain[40..]), &mut view).await, Ok(32));
    assert_eq!(ctx.finish(&mut view).await, Ok(0));
    assert_eq!(
        hex::encode(out),
        concat!(
            "7649abac8119b246cee98e9b12e9197d",
            "5086cb9b507219ee95db113a917678b2",
            "73bed6b8e3c1743b7116e69e22229516",
            "3ff1caa1681fac09120eca307586e1a7",
        )
    );

    // One-shot calls check the whole output up front.
    let mut small = [0u8; 17];
    let err = Context::atomic(
        aes(&h(KEY)),
        &Mechanism::CbcPad { iv: Some(&iv) },
        Direction::Encrypt,
        &Config::default(),
        BufferView::new(&plain[..17]),
        &mut BufferViewMut::new(&mut small),
    )
    .await
    .unwrap_err();
    assert_eq!(err, Error::BufferTooSmall(BufferTooSmallError { need: 32 }));
}

#[test_log::test(tokio::test)]
async fn test_scatter_gather() {
    let iv = h(IV);
    let mech = Mechanism::Cbc { iv: Some(&iv) };
    let plain = h(PLAIN);
    let (a, rest) = plain.split_at(5);
    let (b, c) = rest.split_at(30);

    let mut x = [0u8; 20];
    let mut y = [0u8; 44];
    let n = Context::atomic(
        aes(&h(KEY)),
        &mech,
        Direction::Encrypt,
        &Config::default(),
        BufferView::from_segments([a, b, c]),
        &mut BufferViewMut::from_segments([&mut x[..], &mut y[..]]),
    )
    .await
    .unwrap();
    assert_eq!(n, 64);
    let want = atomic(aes(&h(KEY)), &mech, Direction::Encrypt, &plain)
        .await
        .unwrap();
    assert_eq!([&x[..], &y[..]].concat(), want);
}

#[test_log::test(tokio::test)]
async fn test_update_in_place() {
    let counter = h("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff");
    let mech = Mechanism::Ctr(CtrParams {
        counter_bits: 32,
        counter_block: Some(&counter),
    });
    let mut buf = h(PLAIN);
    let mut ctx = Context::new(aes(&h(KEY)), &mech, Direction::Encrypt, &Config::default())
        .await
        .unwrap();
    let (head, tail) = buf.split_at_mut(21);
    assert_eq!(ctx.update_in_place(head).await, Ok(21));
    assert_eq!(ctx.update_in_place(tail).await, Ok(43));
    ctx.finish(&mut BufferViewMut::default()).await.unwrap();
    assert_eq!(
        hex::encode(&buf[..16]),
        "874d6191b620e3261bef6864990db6ce"
    );

    // CBC cannot write more than it was given.
    let iv = h(IV);
    let mut ctx = Context::new(
        aes(&h(KEY)),
        &Mechanism::Cbc { iv: Some(&iv) },
        Direction::Encrypt,
        &Config::default(),
    )
    .await
    .unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(ctx.update_in_place(&mut buf).await, Ok(0));
    assert!(matches!(
        ctx.update_in_place(&mut buf).await,
        Err(Error::BufferTooSmall(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_deferred_iv_and_counter() {
    let plain = h(PLAIN);
    let mut out = [0u8; 64];

    let mut ctx = Context::new(
        aes(&h(KEY)),
        &Mechanism::Cbc { iv: None },
        Direction::Encrypt,
        &Config::default(),
    )
    .await
    .unwrap();
    ctx.set_iv(&h(IV)).unwrap();
    let mut view = BufferViewMut::new(&mut out);
    ctx.update(BufferView::new(&plain[..16]), &mut view)
        .await
        .unwrap();
    assert_eq!(hex::encode(&out[..16]), "7649abac8119b246cee98e9b12e9197d");

    // Without an IV the first update fails.
    let mut ctx = Context::new(
        aes(&h(KEY)),
        &Mechanism::Cfb { iv: None },
        Direction::Encrypt,
        &Config::default(),
    )
    .await
    .unwrap();
    let err = ctx
        .update(BufferView::new(&plain), &mut BufferViewMut::new(&mut out))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MechanismParamInvalid(_)));

    // The IV cannot change in the middle of a block.
    let mut ctx = Context::new(
        aes(&h(KEY)),
        &Mechanism::Cbc { iv: Some(&[0u8; 16]) },
        Direction::Encrypt,
        &Config::default(),
    )
    .await
    .unwrap();
    ctx.update(BufferView::new(&plain[..3]), &mut BufferViewMut::new(&mut out))
        .await
        .unwrap();
    assert!(matches!(
        ctx.set_iv(&h(IV)),
        Err(Error::MechanismParamInvalid(_))
    ));
    assert!(!ctx.is_active());

    let mut ctx = Context::new(
        aes(&h(KEY)),
        &Mechanism::Ctr(CtrParams {
            counter_bits: 128,
            counter_block: None,
        }),
        Direction::Encrypt,
        &Config::default(),
    )
    .await
    .unwrap();
    assert!(ctx.set_iv(&h(IV)).is_err());

    let mut ctx = Context::new(
        aes(&h(KEY)),
        &Mechanism::Ctr(CtrParams {
            counter_bits: 128,
            counter_block: None,
        }),
        Direction::Encrypt,
        &Config::default(),
    )
    .await
    .unwrap();
    ctx.set_counter(&h("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff"), 64)
        .unwrap();
    let mut view = BufferViewMut::new(&mut out);
    ctx.update(BufferView::new(&plain[..16]), &mut view)
        .await
        .unwrap();
    assert_eq!(hex::encode(&out[..16]), "874d6191b620e3261bef6864990db6ce");
}

#[test_log::test(tokio::test)]
async fn test_block_modes_reject_partial_blocks() {
    let iv = h(IV);
    let mech = Mechanism::Cbc { iv: Some(&iv) };
    let mut out = [0u8; 64];

    let mut ctx = Context::new(aes(&h(KEY)), &mech, Direction::Encrypt, &Config::default())
        .await
        .unwrap();
    let mut view = BufferViewMut::new(&mut out);
    ctx.update(BufferView::new(&[0u8; 20]), &mut view)
        .await
        .unwrap();
    assert_eq!(ctx.finish(&mut view).await, Err(Error::DataLenRange));

    assert_eq!(
        atomic(aes(&h(KEY)), &mech, Direction::Decrypt, &[0u8; 20]).await,
        Err(Error::EncryptedDataLenRange)
    );
    assert_eq!(
        atomic(aes(&h(KEY)), &Mechanism::CbcPad { iv: Some(&iv) }, Direction::Decrypt, &[0u8; 20])
            .await,
        Err(Error::EncryptedDataLenRange)
    );
}

struct MismatchedProvider;

impl Provider for MismatchedProvider {
    type Cipher = SoftCipher;

    fn new_cipher(&self, _algorithm: Algorithm, _key: &[u8]) -> Result<SoftCipher, Error> {
        SoftCipher::new(Algorithm::Aes, &[0u8; 16])
    }
}

#[test_log::test(tokio::test)]
async fn test_dispatcher_validation() {
    let dispatcher = Dispatcher::new(SoftProvider);
    let enc = Direction::Encrypt;

    let err = dispatcher
        .init(Algorithm::Aes, &[0u8; 15], &Mechanism::Ecb, enc)
        .await
        .unwrap_err();
    assert_eq!(err, Error::KeySizeRange);

    let err = dispatcher
        .init(Algorithm::Des3, &[0u8; 8], &Mechanism::Ecb, enc)
        .await
        .unwrap_err();
    assert_eq!(err, Error::KeySizeRange);

    let gcm = Mechanism::Gcm(GcmParams {
        iv: &[0u8; 12],
        aad: &[],
        tag_bits: 128,
    });
    let err = dispatcher
        .init(Algorithm::Des, &[0u8; 8], &gcm, enc)
        .await
        .unwrap_err();
    assert_eq!(err, Error::MechanismInvalid);

    let err = dispatcher
        .init(Algorithm::Aes, &[0u8; 16], &Mechanism::Cbc { iv: Some(&[0u8; 8]) }, enc)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MechanismParamInvalid(_)));

    let err = Dispatcher::new(MismatchedProvider)
        .init(Algorithm::Des3, &[0u8; 16], &Mechanism::Ecb, enc)
        .await
        .unwrap_err();
    assert_eq!(err, Error::KeyTypeInconsistent);

    let err = Dispatcher::with_config(
        SoftProvider,
        Config {
            max_transfer_len: 4,
        },
    )
    .init(Algorithm::Aes, &[0u8; 16], &Mechanism::Ecb, enc)
    .await
    .unwrap_err();
    assert!(matches!(err, Error::MechanismParamInvalid(_)));
}

#[test_log::test(tokio::test)]
async fn test_des3_cbc_pad_round_trip() {
    let dispatcher = Dispatcher::new(SoftProvider);
    let key = [0x5Au8; 24];
    let iv = [0x01u8; 8];
    let mech = Mechanism::CbcPad { iv: Some(&iv) };
    let msg = b"triple DES uses an eight byte block";

    let mut ct = [0u8; 48];
    let n = dispatcher
        .atomic(
            Algorithm::Des3,
            &key,
            &mech,
            Direction::Encrypt,
            BufferView::new(msg),
            &mut BufferViewMut::new(&mut ct),
        )
        .await
        .unwrap();
    assert_eq!(n, 40);

    let mut ctx = dispatcher
        .init(Algorithm::Des3, &key, &mech, Direction::Decrypt)
        .await
        .unwrap();
    let mut pt = [0u8; 48];
    let mut view = BufferViewMut::new(&mut pt);
    ctx.update(BufferView::new(&ct[..n]), &mut view)
        .await
        .unwrap();
    ctx.finish(&mut view).await.unwrap();
    let written = view.written();
    assert_eq!(&pt[..written], msg);
}

#[test_log::test(tokio::test)]
async fn test_primitive_errors_propagate() {
    let cipher = InstrumentedCipher::new(aes(&h(KEY)));
    let mut ctx = Context::new(&cipher, &Mechanism::Ecb, Direction::Encrypt, &Config::default())
        .await
        .unwrap();
    cipher.set_aborting(true);
    let mut out = [0u8; 16];
    let err = ctx
        .update(BufferView::new(&[0u8; 16]), &mut BufferViewMut::new(&mut out))
        .await
        .unwrap_err();
    assert_eq!(err, Error::Cipher(CipherError::Aborted));
    assert!(!ctx.is_active());

    cipher.set_aborting(false);
    let err = ctx
        .update(BufferView::new(&[0u8; 16]), &mut BufferViewMut::new(&mut out))
        .await
        .unwrap_err();
    assert_eq!(err, Error::Inactive);
}

static IV16: [u8; 16] = [0x3C; 16];
static NONCE: [u8; 11] = [0x4D; 11];
static GCM_IV: [u8; 12] = [0x5E; 12];

/// Every mode that accepts input of any length.
fn stream_mechanisms(data_len: usize) -> Vec<Mechanism<'static>> {
    vec![
        Mechanism::CbcPad { iv: Some(&IV16) },
        Mechanism::Cfb { iv: Some(&IV16) },
        Mechanism::Ctr(CtrParams {
            counter_bits: 16,
            counter_block: Some(&IV16),
        }),
        Mechanism::Ccm(CcmParams {
            nonce: &NONCE,
            aad: b"aad",
            data_len,
            mac_len: 12,
        }),
        Mechanism::Gcm(GcmParams {
            iv: &GCM_IV,
            aad: b"aad",
            tag_bits: 128,
        }),
        Mechanism::Gcm(GcmParams {
            iv: &IV16,
            aad: &[],
            tag_bits: 64,
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_streaming_matches_atomic(
        data in proptest::collection::vec(any::<u8>(), 0..160),
        chunks in proptest::collection::vec(0usize..40, 0..6),
    ) {
        let key = [0x7Fu8; 16];
        for mech in stream_mechanisms(data.len()) {
            let whole = block_on(atomic(aes(&key), &mech, Direction::Encrypt, &data)).unwrap();
            let streamed =
                block_on(chunked(aes(&key), &mech, Direction::Encrypt, &data, &chunks)).unwrap();
            prop_assert_eq!(&whole, &streamed, "{:?}", mech.mode());

            let opened =
                block_on(chunked(aes(&key), &mech, Direction::Decrypt, &whole, &chunks)).unwrap();
            prop_assert_eq!(&opened, &data, "{:?}", mech.mode());
        }
    }

    #[test]
    fn prop_block_modes_round_trip(
        blocks in proptest::collection::vec(any::<[u8; 16]>(), 0..8),
        chunks in proptest::collection::vec(0usize..40, 0..6),
    ) {
        let data = blocks.concat();
        let key = [0x2Eu8; 24];
        for mech in [Mechanism::Ecb, Mechanism::Cbc { iv: Some(&IV16) }] {
            let ct = block_on(chunked(aes(&key), &mech, Direction::Encrypt, &data, &chunks)).unwrap();
            prop_assert_eq!(ct.len(), data.len());
            let pt = block_on(atomic(aes(&key), &mech, Direction::Decrypt, &ct)).unwrap();
            prop_assert_eq!(&pt, &data);
        }
    }
}
