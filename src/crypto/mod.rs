//! Stateless cryptographic primitives shared by all mechanisms.

pub mod des;

use std::fmt;

use aes::Aes128;
use cfb8::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rc4::cipher::consts::{U16, U8};
use rc4::cipher::KeyInit;
use rc4::StreamCipher;
use sha2::Sha256;

use crate::{Error, ErrorKind, Result};

pub const HASH_SIZE: usize = 16;
pub const SHA256_SIZE: usize = 32;
pub const AES_BLOCK_SIZE: usize = 16;

pub fn compute_md4(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut context = Md4::new();
    context.update(data);

    context.finalize().into()
}

pub fn compute_md5(data: &[u8]) -> [u8; HASH_SIZE] {
    compute_md5_parts(&[data])
}

/// MD5 over the concatenation of `parts`.
pub fn compute_md5_parts(parts: &[&[u8]]) -> [u8; HASH_SIZE] {
    let mut context = Md5::new();
    for part in parts {
        context.update(part);
    }

    context.finalize().into()
}

pub fn compute_sha256(data: &[u8]) -> [u8; SHA256_SIZE] {
    let mut context = Sha256::new();
    context.update(data);

    context.finalize().into()
}

pub fn compute_hmac_md5(key: &[u8], input: &[u8]) -> Result<[u8; HASH_SIZE]> {
    compute_hmac_md5_parts(key, &[input])
}

/// HMAC-MD5 over the concatenation of `parts`.
pub fn compute_hmac_md5_parts(key: &[u8], parts: &[&[u8]]) -> Result<[u8; HASH_SIZE]> {
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(key)
        .map_err(|e| Error::new(ErrorKind::Failure, format!("failed to compute hmac md5: {}", e)))?;
    for part in parts {
        mac.update(part);
    }

    Ok(mac.finalize().into_bytes().into())
}

pub fn compute_hmac_sha256(key: &[u8], input: &[u8]) -> Result<[u8; SHA256_SIZE]> {
    compute_hmac_sha256_parts(key, &[input])
}

pub fn compute_hmac_sha256_parts(key: &[u8], parts: &[&[u8]]) -> Result<[u8; SHA256_SIZE]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::new(ErrorKind::Failure, format!("failed to compute hmac sha256: {}", e)))?;
    for part in parts {
        mac.update(part);
    }

    Ok(mac.finalize().into_bytes().into())
}

enum Rc4Inner {
    Key8(rc4::Rc4<U8>),
    Key16(rc4::Rc4<U16>),
}

/// RC4 key stream. The state advances with every processed byte.
pub struct Rc4(Rc4Inner);

impl Rc4 {
    /// Keys of 8 bytes (weakened NTLM sealing keys) and 16 bytes are supported.
    pub fn new(key: &[u8]) -> Result<Self> {
        let invalid = |e| Error::new(ErrorKind::InvalidParameter, format!("invalid RC4 key: {}", e));

        let inner = match key.len() {
            8 => Rc4Inner::Key8(rc4::Rc4::new_from_slice(key).map_err(invalid)?),
            16 => Rc4Inner::Key16(rc4::Rc4::new_from_slice(key).map_err(invalid)?),
            len => {
                return Err(Error::new(
                    ErrorKind::InvalidParameter,
                    format!("unsupported RC4 key length: {}", len),
                ))
            }
        };

        Ok(Self(inner))
    }

    pub fn apply(&mut self, data: &mut [u8]) {
        match &mut self.0 {
            Rc4Inner::Key8(cipher) => cipher.apply_keystream(data),
            Rc4Inner::Key16(cipher) => cipher.apply_keystream(data),
        }
    }

    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = data.to_vec();
        self.apply(&mut output);

        output
    }
}

impl fmt::Debug for Rc4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rc4").finish_non_exhaustive()
    }
}

/// One-shot RC4 with a fresh key stream.
pub fn rc4(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    Ok(Rc4::new(key)?.process(data))
}

fn cfb8_error(e: impl fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidParameter, format!("invalid AES-CFB8 key: {}", e))
}

/// AES-128 in 8-bit cipher feedback mode.
pub fn aes_cfb8_encrypt(key: &[u8], iv: &[u8; AES_BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    let mut output = data.to_vec();
    cfb8::Encryptor::<Aes128>::new_from_slices(key, iv)
        .map_err(cfb8_error)?
        .encrypt(&mut output);

    Ok(output)
}

pub fn aes_cfb8_decrypt(key: &[u8], iv: &[u8; AES_BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    let mut output = data.to_vec();
    cfb8::Decryptor::<Aes128>::new_from_slices(key, iv)
        .map_err(cfb8_error)?
        .decrypt(&mut output);

    Ok(output)
}

/// IEEE 802.3 CRC-32 as used by NTLM signatures without extended session security.
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// XORs every byte of `key` with `mask`.
pub fn xor_key(key: &[u8], mask: u8) -> Vec<u8> {
    key.iter().map(|byte| byte ^ mask).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_check_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn md4_of_password_is_nt_hash() {
        let password = crate::utils::string_to_utf16("Password");

        assert_eq!(
            compute_md4(&password),
            [0xa4, 0xf4, 0x9c, 0x40, 0x65, 0x10, 0xbd, 0xca, 0xb6, 0x82, 0x4e, 0xe7, 0xc3, 0x0f, 0xd8, 0x52]
        );
    }

    #[test]
    fn hmac_matches_rfc_vectors() {
        // RFC 2202 and RFC 4231, test case 2
        let data = b"what do ya want for nothing?";

        assert_eq!(
            compute_hmac_md5(b"Jefe", data).unwrap(),
            [0x75, 0x0c, 0x78, 0x3e, 0x6a, 0xb0, 0xb5, 0x03, 0xea, 0xa8, 0x6e, 0x31, 0x0a, 0x5d, 0xb7, 0x38]
        );
        assert_eq!(
            compute_hmac_sha256(b"Jefe", data).unwrap(),
            [
                0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95, 0x75, 0xc7, 0x5a, 0x00,
                0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9, 0x64, 0xec, 0x38, 0x43,
            ]
        );
    }

    #[test]
    fn hmac_md5_parts_matches_single_input() {
        let whole = compute_hmac_md5(b"key", b"hello world").unwrap();
        let parts = compute_hmac_md5_parts(b"key", &[b"hello", b" ", b"world"]).unwrap();

        assert_eq!(whole, parts);
    }

    #[test]
    fn rc4_stream_continues_across_calls() {
        let key = [0x42; 16];
        let data = b"confounder and payload";

        let mut split = Rc4::new(&key).unwrap();
        let mut first = split.process(&data[..10]);
        first.extend(split.process(&data[10..]));

        assert_eq!(first, rc4(&key, data).unwrap());
        assert_eq!(rc4(&key, &first).unwrap(), data.to_vec());
    }

    #[test]
    fn rc4_rejects_unsupported_key_length() {
        assert_eq!(Rc4::new(&[0; 5]).unwrap_err().error_type, ErrorKind::InvalidParameter);
    }

    #[test]
    fn aes_cfb8_matches_known_vector() {
        // NIST SP 800-38A F.3.7, CFB8-AES128
        let key = [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
        ];
        let iv = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
        ];
        let plaintext = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93, 0x17, 0x2a, 0xae, 0x2d,
        ];
        let ciphertext = [
            0x3b, 0x79, 0x42, 0x4c, 0x9c, 0x0d, 0xd4, 0x36, 0xba, 0xce, 0x9e, 0x0e, 0xd4, 0x58, 0x6a, 0x4f, 0x32, 0xb9,
        ];

        assert_eq!(aes_cfb8_encrypt(&key, &iv, &plaintext).unwrap(), ciphertext.to_vec());
        assert_eq!(aes_cfb8_decrypt(&key, &iv, &ciphertext).unwrap(), plaintext.to_vec());
    }

    #[test]
    fn aes_cfb8_rejects_short_key() {
        assert_eq!(
            aes_cfb8_encrypt(&[0; 8], &[0; AES_BLOCK_SIZE], b"data").unwrap_err().error_type,
            ErrorKind::InvalidParameter
        );
    }

    #[test]
    fn aes_cfb8_round_trip() {
        let key = [0x11; 16];
        let iv = [0x22; 16];
        let data = b"netlogon confounder";

        let encrypted = aes_cfb8_encrypt(&key, &iv, data).unwrap();

        assert_ne!(encrypted, data.to_vec());
        assert_eq!(aes_cfb8_decrypt(&key, &iv, &encrypted).unwrap(), data.to_vec());
    }

    #[test]
    fn aes_cfb8_is_a_stream_mode() {
        let key = [0x33; 16];
        let iv = [0; 16];
        let data = [0xab; 21];

        let encrypted = aes_cfb8_encrypt(&key, &iv, &data).unwrap();

        assert_eq!(encrypted.len(), data.len());
        assert_eq!(&aes_cfb8_encrypt(&key, &iv, &data[..8]).unwrap(), &encrypted[..8]);
    }
}
