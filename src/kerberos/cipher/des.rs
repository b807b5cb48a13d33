//! [RFC 1964](https://www.rfc-editor.org/rfc/rfc1964#section-1.2) DES Wrap and MIC tokens.

use rand::rngs::OsRng;
use rand::RngCore;

use super::{
    check_legacy_sequence_field, concat_with_plaintext, detached_len, legacy_sequence_field, KerberosCipher,
    LegacyToken, LEGACY_CHECKSUM_SIZE, LEGACY_CONFOUNDER_SIZE, LEGACY_TOK_ID_MIC, LEGACY_TOK_ID_WRAP,
};
use crate::context::{concat_buffers, concat_sealed, scatter_sealed, SecurityBuffer};
use crate::crypto::des::{des_cbc_decrypt, des_cbc_encrypt, DES_BLOCK_SIZE};
use crate::crypto::{compute_md5_parts, xor_key};
use crate::{Error, ErrorKind, Result};

const SGN_ALG_DES_MAC_MD5: [u8; 2] = [0x00, 0x00];
const SEAL_ALG_DES: [u8; 2] = [0x00, 0x00];
const SEAL_ALG_NONE: [u8; 2] = [0xff, 0xff];

const ZERO_IV: [u8; DES_BLOCK_SIZE] = [0; DES_BLOCK_SIZE];

/// DES-MAC-MD5: the last block of the DES-CBC encrypted MD5 digest.
fn checksum(key: &[u8], header: &[u8], confounder: &[u8], data: &[u8]) -> Result<[u8; LEGACY_CHECKSUM_SIZE]> {
    let digest = compute_md5_parts(&[header, confounder, data]);
    let encrypted = des_cbc_encrypt(key, &ZERO_IV, &digest)?;

    let mut checksum = [0; LEGACY_CHECKSUM_SIZE];
    checksum.copy_from_slice(&encrypted[encrypted.len() - LEGACY_CHECKSUM_SIZE..]);

    Ok(checksum)
}

fn seal_sequence_field(key: &[u8], checksum: &[u8; LEGACY_CHECKSUM_SIZE], sequence_field: &[u8; 8]) -> Result<[u8; 8]> {
    let mut snd_seq = [0; 8];
    snd_seq.copy_from_slice(&des_cbc_encrypt(key, checksum, sequence_field)?);

    Ok(snd_seq)
}

fn open_sequence_field(cipher: &KerberosCipher, token: &LegacyToken, expected_sequence_number: u64) -> Result<()> {
    let sequence_field = des_cbc_decrypt(cipher.key(), &token.checksum, &token.snd_seq)?;

    check_legacy_sequence_field(&sequence_field, expected_sequence_number, cipher.sender, false)
}

fn check_block_aligned(len: usize) -> Result<()> {
    if len % DES_BLOCK_SIZE != 0 {
        return Err(Error::new(
            ErrorKind::InvalidParameter,
            format!("DES sealed data must be padded to {} bytes, got {}", DES_BLOCK_SIZE, len),
        ));
    }

    Ok(())
}

pub(super) fn wrap(cipher: &KerberosCipher, sequence_number: u64, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
    let key = cipher.key();
    let sealed = concat_sealed(buffers);
    check_block_aligned(sealed.len())?;

    let header = LegacyToken::header(LEGACY_TOK_ID_WRAP, SGN_ALG_DES_MAC_MD5, SEAL_ALG_DES);

    let mut confounder = [0; LEGACY_CONFOUNDER_SIZE];
    OsRng.fill_bytes(&mut confounder);

    let checksum = checksum(key, &header, &confounder, &concat_buffers(buffers))?;

    let mut plaintext = confounder.to_vec();
    plaintext.extend_from_slice(&sealed);
    let encrypted = des_cbc_encrypt(&xor_key(key, 0xf0), &ZERO_IV, &plaintext)?;
    let (encrypted_confounder, encrypted_data) = encrypted.split_at(LEGACY_CONFOUNDER_SIZE);
    scatter_sealed(buffers, encrypted_data)?;

    let sequence_field = legacy_sequence_field(sequence_number, cipher.sender, false);
    let mut token_confounder = [0; LEGACY_CONFOUNDER_SIZE];
    token_confounder.copy_from_slice(encrypted_confounder);

    Ok(LegacyToken {
        sgn_alg: SGN_ALG_DES_MAC_MD5,
        seal_alg: SEAL_ALG_DES,
        snd_seq: seal_sequence_field(key, &checksum, &sequence_field)?,
        checksum,
        confounder: Some(token_confounder),
    }
    .encode(detached_len(cipher, sealed.len())))
}

pub(super) fn unwrap(
    cipher: &KerberosCipher,
    expected_sequence_number: u64,
    buffers: &mut [SecurityBuffer],
    signature: &[u8],
) -> Result<()> {
    let sealed = concat_sealed(buffers);
    check_block_aligned(sealed.len())?;

    let token = LegacyToken::decode(signature, LEGACY_TOK_ID_WRAP, detached_len(cipher, sealed.len()))?;
    if token.sgn_alg != SGN_ALG_DES_MAC_MD5 || token.seal_alg != SEAL_ALG_DES {
        return Err(Error::new(ErrorKind::DefectiveToken, "GSS wrap token is not a DES token"));
    }
    let encrypted_confounder = token
        .confounder
        .ok_or_else(|| Error::new(ErrorKind::DefectiveToken, "GSS wrap token has no confounder"))?;

    open_sequence_field(cipher, &token, expected_sequence_number)?;

    let mut encrypted = encrypted_confounder.to_vec();
    encrypted.extend_from_slice(&sealed);
    let decrypted = des_cbc_decrypt(&xor_key(cipher.key(), 0xf0), &ZERO_IV, &encrypted)?;
    let (confounder, plaintext) = decrypted.split_at(LEGACY_CONFOUNDER_SIZE);

    let header = LegacyToken::header(LEGACY_TOK_ID_WRAP, token.sgn_alg, token.seal_alg);
    let expected = checksum(
        cipher.key(),
        &header,
        confounder,
        &concat_with_plaintext(buffers, plaintext)?,
    )?;
    if expected != token.checksum {
        return Err(Error::new(ErrorKind::BadMic, "DES wrap token checksum mismatch"));
    }

    scatter_sealed(buffers, plaintext)
}

pub(super) fn sign(cipher: &KerberosCipher, sequence_number: u64, buffers: &[SecurityBuffer]) -> Result<Vec<u8>> {
    let key = cipher.key();
    let header = LegacyToken::header(LEGACY_TOK_ID_MIC, SGN_ALG_DES_MAC_MD5, SEAL_ALG_NONE);
    let checksum = checksum(key, &header, &[], &concat_buffers(buffers))?;
    let sequence_field = legacy_sequence_field(sequence_number, cipher.sender, false);

    Ok(LegacyToken {
        sgn_alg: SGN_ALG_DES_MAC_MD5,
        seal_alg: SEAL_ALG_NONE,
        snd_seq: seal_sequence_field(key, &checksum, &sequence_field)?,
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
    if token.sgn_alg != SGN_ALG_DES_MAC_MD5 || token.seal_alg != SEAL_ALG_NONE {
        return Err(Error::new(ErrorKind::DefectiveToken, "GSS MIC token is not a DES token"));
    }

    open_sequence_field(cipher, &token, expected_sequence_number)?;

    let header = LegacyToken::header(LEGACY_TOK_ID_MIC, token.sgn_alg, token.seal_alg);
    if checksum(cipher.key(), &header, &[], &concat_buffers(buffers))? != token.checksum {
        return Err(Error::new(ErrorKind::BadMic, "DES MIC token checksum mismatch"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kerberos::cipher::tests::cipher_pair;
    use crate::kerberos::encryption::EncryptionType;

    #[test]
    fn unaligned_sealed_data_is_refused() {
        let ((mut client_out, _), _) = cipher_pair(EncryptionType::DesCbcMd5, true);

        let err = client_out
            .wrap(&mut [SecurityBuffer::data(b"seven b".to_vec())])
            .unwrap_err();

        assert_eq!(err.error_type, ErrorKind::InvalidParameter);
        // the sequence number is consumed anyway
        assert_eq!(client_out.sequence_number(), 0x1234_5678 + 1);
    }
}
