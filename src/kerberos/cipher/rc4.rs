//! [RFC 4757](https://www.rfc-editor.org/rfc/rfc4757#section-7) RC4-HMAC Wrap and MIC tokens.

use rand::rngs::OsRng;
use rand::RngCore;

use super::{
    check_legacy_sequence_field, concat_with_plaintext, detached_len, legacy_sequence_field, KerberosCipher,
    LegacyToken, LEGACY_CHECKSUM_SIZE, LEGACY_CONFOUNDER_SIZE, LEGACY_TOK_ID_MIC, LEGACY_TOK_ID_WRAP,
};
use crate::context::{concat_buffers, concat_sealed, scatter_sealed, SecurityBuffer};
use crate::crypto::{compute_hmac_md5, compute_md5_parts, rc4, xor_key, Rc4};
use crate::{Error, ErrorKind, Result};

const SGN_ALG_HMAC_MD5: [u8; 2] = [0x11, 0x00];
const SEAL_ALG_RC4: [u8; 2] = [0x10, 0x00];
const SEAL_ALG_NONE: [u8; 2] = [0xff, 0xff];

const SIGNATURE_KEY_CONSTANT: &[u8] = b"signaturekey\0";
const WRAP_SALT: u32 = 13;
const MIC_SALT: u32 = 15;

/// `HMAC_MD5(Ksign, MD5(salt | header | confounder | data))`, truncated.
fn checksum(key: &[u8], salt: u32, header: &[u8], confounder: &[u8], data: &[u8]) -> Result<[u8; LEGACY_CHECKSUM_SIZE]> {
    let signing_key = compute_hmac_md5(key, SIGNATURE_KEY_CONSTANT)?;
    let digest = compute_md5_parts(&[&salt.to_le_bytes(), header, confounder, data]);

    let mut checksum = [0; LEGACY_CHECKSUM_SIZE];
    checksum.copy_from_slice(&compute_hmac_md5(&signing_key, &digest)?[..LEGACY_CHECKSUM_SIZE]);

    Ok(checksum)
}

/// The sequence field is encrypted with a key bound to the checksum.
fn sequence_key(key: &[u8], checksum: &[u8]) -> Result<[u8; 16]> {
    compute_hmac_md5(&compute_hmac_md5(key, &0u32.to_le_bytes())?, checksum)
}

/// Per-message sealing key, derived from the plain sequence number.
fn sealing_key(key: &[u8], sequence_field: &[u8]) -> Result<[u8; 16]> {
    let local_key = xor_key(key, 0xf0);

    compute_hmac_md5(&compute_hmac_md5(&local_key, &0u32.to_le_bytes())?, &sequence_field[..4])
}

pub(super) fn wrap(cipher: &KerberosCipher, sequence_number: u64, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
    let key = cipher.key();
    let header = LegacyToken::header(LEGACY_TOK_ID_WRAP, SGN_ALG_HMAC_MD5, SEAL_ALG_RC4);
    let sequence_field = legacy_sequence_field(sequence_number, cipher.sender, true);

    let mut confounder = [0; LEGACY_CONFOUNDER_SIZE];
    OsRng.fill_bytes(&mut confounder);

    let checksum = checksum(key, WRAP_SALT, &header, &confounder, &concat_buffers(buffers))?;

    let mut sealing = Rc4::new(&sealing_key(key, &sequence_field)?)?;
    let mut encrypted_confounder = confounder;
    sealing.apply(&mut encrypted_confounder);
    let sealed = sealing.process(&concat_sealed(buffers));
    scatter_sealed(buffers, &sealed)?;

    let mut snd_seq = [0; 8];
    snd_seq.copy_from_slice(&rc4(&sequence_key(key, &checksum)?, &sequence_field)?);

    let token = LegacyToken {
        sgn_alg: SGN_ALG_HMAC_MD5,
        seal_alg: SEAL_ALG_RC4,
        snd_seq,
        checksum,
        confounder: Some(encrypted_confounder),
    };

    Ok(token.encode(detached_len(cipher, sealed.len())))
}

/// Decrypts and checks `SND_SEQ`, returning the plain field.
fn open_sequence_field(cipher: &KerberosCipher, token: &LegacyToken, expected_sequence_number: u64) -> Result<Vec<u8>> {
    let sequence_field = rc4(&sequence_key(cipher.key(), &token.checksum)?, &token.snd_seq)?;
    check_legacy_sequence_field(&sequence_field, expected_sequence_number, cipher.sender, true)?;

    Ok(sequence_field)
}

pub(super) fn unwrap(
    cipher: &KerberosCipher,
    expected_sequence_number: u64,
    buffers: &mut [SecurityBuffer],
    signature: &[u8],
) -> Result<()> {
    let sealed = concat_sealed(buffers);
    let token = LegacyToken::decode(signature, LEGACY_TOK_ID_WRAP, detached_len(cipher, sealed.len()))?;
    if token.sgn_alg != SGN_ALG_HMAC_MD5 || token.seal_alg != SEAL_ALG_RC4 {
        return Err(Error::new(ErrorKind::DefectiveToken, "GSS wrap token is not an RC4-HMAC token"));
    }
    let encrypted_confounder = token
        .confounder
        .ok_or_else(|| Error::new(ErrorKind::DefectiveToken, "GSS wrap token has no confounder"))?;

    let sequence_field = open_sequence_field(cipher, &token, expected_sequence_number)?;

    let mut sealing = Rc4::new(&sealing_key(cipher.key(), &sequence_field)?)?;
    let confounder = sealing.process(&encrypted_confounder);
    let plaintext = sealing.process(&sealed);

    let header = LegacyToken::header(LEGACY_TOK_ID_WRAP, token.sgn_alg, token.seal_alg);
    let expected = checksum(
        cipher.key(),
        WRAP_SALT,
        &header,
        &confounder,
        &concat_with_plaintext(buffers, &plaintext)?,
    )?;
    if expected != token.checksum {
        return Err(Error::new(ErrorKind::BadMic, "RC4-HMAC wrap token checksum mismatch"));
    }

    scatter_sealed(buffers, &plaintext)
}

pub(super) fn sign(cipher: &KerberosCipher, sequence_number: u64, buffers: &[SecurityBuffer]) -> Result<Vec<u8>> {
    let key = cipher.key();
    let header = LegacyToken::header(LEGACY_TOK_ID_MIC, SGN_ALG_HMAC_MD5, SEAL_ALG_NONE);
    let checksum = checksum(key, MIC_SALT, &header, &[], &concat_buffers(buffers))?;

    let sequence_field = legacy_sequence_field(sequence_number, cipher.sender, true);
    let mut snd_seq = [0; 8];
    snd_seq.copy_from_slice(&rc4(&sequence_key(key, &checksum)?, &sequence_field)?);

    Ok(LegacyToken {
        sgn_alg: SGN_ALG_HMAC_MD5,
        seal_alg: SEAL_ALG_NONE,
        snd_seq,
        checksum,
        confounder: None,
    }
    .encode(0))
}

pub(super) fn verify(
    cipher: &KerberosCipher,
    expected_sequence_number: u64,
    buffers: &[SecurityBuffer],
    signature: &[u8],
) -> Result<()> {
    let token = LegacyToken::decode(signature, LEGACY_TOK_ID_MIC, 0)?;
    if token.sgn_alg != SGN_ALG_HMAC_MD5 || token.seal_alg != SEAL_ALG_NONE {
        return Err(Error::new(ErrorKind::DefectiveToken, "GSS MIC token is not an RC4-HMAC token"));
    }

    open_sequence_field(cipher, &token, expected_sequence_number)?;

    let header = LegacyToken::header(LEGACY_TOK_ID_MIC, token.sgn_alg, token.seal_alg);
    if checksum(cipher.key(), MIC_SALT, &header, &[], &concat_buffers(buffers))? != token.checksum {
        return Err(Error::new(ErrorKind::BadMic, "RC4-HMAC MIC token checksum mismatch"));
    }

    Ok(())
}
