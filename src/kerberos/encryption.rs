//! KDC encryption types: the RFC 3961 `encrypt`, `decrypt` and `string-to-key` operations
//! for the enctypes an RPC client meets in a Windows domain.

use std::fmt;
use std::str::FromStr;

use picky_krb::crypto::CipherSuite;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::des::{des_cbc_decrypt, des_cbc_encrypt, fix_parity, is_weak_key, DES_BLOCK_SIZE};
use crate::crypto::{compute_hmac_md5, compute_hmac_md5_parts, compute_md4, compute_md5, rc4, HASH_SIZE};
use crate::gss::der_element_size;
use crate::utils::string_to_utf16;
use crate::{Error, ErrorKind, Result};

const RC4_CONFOUNDER_SIZE: usize = 8;
const DES_CONFOUNDER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionType {
    DesCbcMd5 = 3,
    Aes128CtsHmacSha196 = 17,
    Aes256CtsHmacSha196 = 18,
    Rc4Hmac = 23,
}

impl EncryptionType {
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            3 => Some(Self::DesCbcMd5),
            17 => Some(Self::Aes128CtsHmacSha196),
            18 => Some(Self::Aes256CtsHmacSha196),
            23 => Some(Self::Rc4Hmac),
            _ => None,
        }
    }

    pub fn id(self) -> i32 {
        self as i32
    }

    /// Single byte used in `etype` fields. All supported ids are below 0x80.
    pub(crate) fn asn1_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DesCbcMd5 => "des-cbc-md5",
            Self::Aes128CtsHmacSha196 => "aes128-cts-hmac-sha1-96",
            Self::Aes256CtsHmacSha196 => "aes256-cts-hmac-sha1-96",
            Self::Rc4Hmac => "rc4-hmac",
        }
    }

    pub fn key_size(self) -> usize {
        match self {
            Self::DesCbcMd5 => DES_BLOCK_SIZE,
            Self::Aes128CtsHmacSha196 | Self::Rc4Hmac => 16,
            Self::Aes256CtsHmacSha196 => 32,
        }
    }

    pub(crate) fn cipher_suite(self) -> Option<CipherSuite> {
        match self {
            Self::Aes128CtsHmacSha196 => Some(CipherSuite::Aes128CtsHmacSha196),
            Self::Aes256CtsHmacSha196 => Some(CipherSuite::Aes256CtsHmacSha196),
            Self::DesCbcMd5 | Self::Rc4Hmac => None,
        }
    }

    pub fn string_to_key(self, password: &str, salt: &str) -> Result<Vec<u8>> {
        match self {
            Self::Rc4Hmac => Ok(compute_md4(&string_to_utf16(password)).to_vec()),
            Self::DesCbcMd5 => des_string_to_key(password.as_bytes(), salt.as_bytes()),
            aes => {
                let suite = aes.aes_suite()?;

                Ok(suite
                    .cipher()
                    .generate_key_from_password(password.as_bytes(), salt.as_bytes())?)
            }
        }
    }

    /// Fresh random key, used for authenticator subkeys.
    pub fn random_key(self) -> Vec<u8> {
        let mut key = vec![0; self.key_size()];
        OsRng.fill_bytes(&mut key);

        if self == Self::DesCbcMd5 {
            fix_parity(&mut key);
            des_key_correction(&mut key);
        }

        key
    }

    pub fn encrypt(self, key: &[u8], key_usage: i32, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_key(key)?;

        match self {
            Self::Rc4Hmac => rc4_hmac_encrypt(key, key_usage, plaintext),
            Self::DesCbcMd5 => des_cbc_md5_encrypt(key, plaintext),
            aes => Ok(aes.aes_suite()?.cipher().encrypt(key, key_usage, plaintext)?),
        }
    }

    pub fn decrypt(self, key: &[u8], key_usage: i32, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_key(key)?;

        match self {
            Self::Rc4Hmac => rc4_hmac_decrypt(key, key_usage, ciphertext),
            Self::DesCbcMd5 => des_cbc_md5_decrypt(key, ciphertext),
            aes => Ok(aes.aes_suite()?.cipher().decrypt(key, key_usage, ciphertext)?),
        }
    }

    fn aes_suite(self) -> Result<CipherSuite> {
        self.cipher_suite().ok_or_else(|| {
            Error::new(
                ErrorKind::Failure,
                format!("{} is not handled by the AES cipher suite", self),
            )
        })
    }

    fn check_key(self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size() {
            return Err(Error::new(
                ErrorKind::DefectiveCredential,
                format!("{} key must be {} bytes, got {}", self, self.key_size(), key.len()),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncryptionType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "aes256-cts-hmac-sha1-96" | "aes256-cts" | "aes256" => Self::Aes256CtsHmacSha196,
            "aes128-cts-hmac-sha1-96" | "aes128-cts" | "aes128" => Self::Aes128CtsHmacSha196,
            "rc4-hmac" | "arcfour-hmac" | "arcfour-hmac-md5" => Self::Rc4Hmac,
            "des-cbc-md5" => Self::DesCbcMd5,
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidParameter,
                    format!("unsupported encryption type: {}", other),
                ))
            }
        })
    }
}

/// RFC 4757 section 3: message types that share a key usage number with RC4-HMAC.
fn rc4_key_usage(key_usage: i32) -> i32 {
    match key_usage {
        3 => 8,
        9 => 8,
        23 => 13,
        other => other,
    }
}

fn rc4_hmac_encrypt(key: &[u8], key_usage: i32, plaintext: &[u8]) -> Result<Vec<u8>> {
    let k1 = compute_hmac_md5(key, &rc4_key_usage(key_usage).to_le_bytes())?;

    let mut confounder = [0; RC4_CONFOUNDER_SIZE];
    OsRng.fill_bytes(&mut confounder);

    let checksum = compute_hmac_md5_parts(&k1, &[&confounder, plaintext])?;
    let k3 = compute_hmac_md5(&k1, &checksum)?;

    let mut data = confounder.to_vec();
    data.extend_from_slice(plaintext);

    let mut ciphertext = checksum.to_vec();
    ciphertext.extend_from_slice(&rc4(&k3, &data)?);

    Ok(ciphertext)
}

fn rc4_hmac_decrypt(key: &[u8], key_usage: i32, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < HASH_SIZE + RC4_CONFOUNDER_SIZE {
        return Err(Error::new(ErrorKind::DefectiveToken, "RC4-HMAC cipher text is too short"));
    }

    let (checksum, data) = ciphertext.split_at(HASH_SIZE);
    let k1 = compute_hmac_md5(key, &rc4_key_usage(key_usage).to_le_bytes())?;
    let k3 = compute_hmac_md5(&k1, checksum)?;

    let plaintext = rc4(&k3, data)?;
    if compute_hmac_md5(&k1, &plaintext)?.as_slice() != checksum {
        return Err(Error::new(ErrorKind::BadMic, "RC4-HMAC checksum mismatch"));
    }

    Ok(plaintext[RC4_CONFOUNDER_SIZE..].to_vec())
}

fn des_cbc_md5_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut data = vec![0; DES_CONFOUNDER_SIZE];
    OsRng.fill_bytes(&mut data);
    data.extend_from_slice(&[0; HASH_SIZE]);
    data.extend_from_slice(plaintext);
    data.resize(data.len().div_ceil(DES_BLOCK_SIZE) * DES_BLOCK_SIZE, 0);

    let checksum = compute_md5(&data);
    data[DES_CONFOUNDER_SIZE..DES_CONFOUNDER_SIZE + HASH_SIZE].copy_from_slice(&checksum);

    des_cbc_encrypt(key, &[0; DES_BLOCK_SIZE], &data)
}

fn des_cbc_md5_decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let header_len = DES_CONFOUNDER_SIZE + HASH_SIZE;
    if ciphertext.len() < header_len || ciphertext.len() % DES_BLOCK_SIZE != 0 {
        return Err(Error::new(ErrorKind::DefectiveToken, "invalid DES-CBC-MD5 cipher text length"));
    }

    let mut data = des_cbc_decrypt(key, &[0; DES_BLOCK_SIZE], ciphertext)?;
    let mut checksum = [0; HASH_SIZE];
    checksum.copy_from_slice(&data[DES_CONFOUNDER_SIZE..header_len]);
    data[DES_CONFOUNDER_SIZE..header_len].fill(0);

    if compute_md5(&data) != checksum {
        return Err(Error::new(ErrorKind::BadMic, "DES-CBC-MD5 checksum mismatch"));
    }

    // the zero padding is not self-describing, the DER length of the content is
    let plaintext = &data[header_len..];
    let len = der_element_size(plaintext)
        .filter(|len| *len <= plaintext.len())
        .unwrap_or(plaintext.len());

    Ok(plaintext[..len].to_vec())
}

/// Flips the last byte of weak and semi-weak keys (RFC 3961 section 6.2).
fn des_key_correction(key: &mut [u8]) {
    let mut block = [0; DES_BLOCK_SIZE];
    block.copy_from_slice(&key[..DES_BLOCK_SIZE]);

    if is_weak_key(&block) {
        key[7] ^= 0xf0;
    }
}

/// `mit_des_string_to_key` from RFC 3961 section 6.2.
fn des_string_to_key(password: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
    let mut input = password.to_vec();
    input.extend_from_slice(salt);
    input.resize(input.len().div_ceil(DES_BLOCK_SIZE).max(1) * DES_BLOCK_SIZE, 0);

    let mut fan_fold = 0u64;
    for (index, block) in input.chunks(DES_BLOCK_SIZE).enumerate() {
        let mut bits = block
            .iter()
            .fold(0u64, |acc, byte| (acc << 7) | u64::from(byte & 0x7f));
        if index % 2 == 1 {
            // reverse the 56 bit string
            bits = bits.reverse_bits() >> 8;
        }
        fan_fold ^= bits;
    }

    let mut temp_key = [0u8; DES_BLOCK_SIZE];
    for (i, byte) in temp_key.iter_mut().enumerate() {
        *byte = (((fan_fold >> (7 * (7 - i))) & 0x7f) as u8) << 1;
    }
    fix_parity(&mut temp_key);
    des_key_correction(&mut temp_key);

    let encrypted = des_cbc_encrypt(&temp_key, &temp_key, &input)?;
    let mut key = encrypted[encrypted.len() - DES_BLOCK_SIZE..].to_vec();
    fix_parity(&mut key);
    des_key_correction(&mut key);

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(data: &str) -> Vec<u8> {
        (0..data.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&data[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn des_string_to_key_vectors() {
        // RFC 3961 appendix A.2
        assert_eq!(
            des_string_to_key(b"password", b"ATHENA.MIT.EDUraeburn").unwrap(),
            hex("cbc22fae235298e3")
        );
        assert_eq!(
            des_string_to_key(b"potatoe", b"WHITEHOUSE.GOVdanny").unwrap(),
            hex("df3d32a74fd92a01")
        );
    }

    #[test]
    fn rc4_string_to_key_is_the_nt_hash() {
        let key = EncryptionType::Rc4Hmac.string_to_key("Password", "ignored").unwrap();

        assert_eq!(key, hex("a4f49c406510bdcab6824ee7c30fd852"));
    }

    #[test]
    fn rc4_hmac_round_trip_with_translated_usage() {
        let key = EncryptionType::Rc4Hmac.random_key();
        let ciphertext = EncryptionType::Rc4Hmac.encrypt(&key, 3, b"as-rep part").unwrap();

        assert_eq!(ciphertext.len(), 16 + 8 + 11);
        // usage 3 and 8 share the same RC4 key usage
        assert_eq!(
            EncryptionType::Rc4Hmac.decrypt(&key, 8, &ciphertext).unwrap(),
            b"as-rep part"
        );

        let err = EncryptionType::Rc4Hmac.decrypt(&key, 7, &ciphertext).unwrap_err();
        assert_eq!(err.error_type, ErrorKind::BadMic);
    }

    #[test]
    fn des_cbc_md5_strips_padding_of_der_content() {
        let key = EncryptionType::DesCbcMd5.random_key();
        let plaintext = [0x30, 0x03, 0x02, 0x01, 0x05];

        let ciphertext = EncryptionType::DesCbcMd5.encrypt(&key, 1, &plaintext).unwrap();
        assert_eq!(ciphertext.len() % DES_BLOCK_SIZE, 0);

        assert_eq!(EncryptionType::DesCbcMd5.decrypt(&key, 1, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn tampered_des_cbc_md5_is_rejected() {
        let key = EncryptionType::DesCbcMd5.random_key();
        let mut ciphertext = EncryptionType::DesCbcMd5.encrypt(&key, 1, &[0x30, 0x00]).unwrap();
        ciphertext[9] ^= 0x01;

        let err = EncryptionType::DesCbcMd5.decrypt(&key, 1, &ciphertext).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::BadMic);
    }

    #[test]
    fn aes_round_trip() {
        for etype in [EncryptionType::Aes128CtsHmacSha196, EncryptionType::Aes256CtsHmacSha196] {
            let key = etype.string_to_key("Passw0rd!", "CONTOSO.COMalice").unwrap();
            assert_eq!(key.len(), etype.key_size());

            let ciphertext = etype.encrypt(&key, 11, b"authenticator").unwrap();
            assert_eq!(etype.decrypt(&key, 11, &ciphertext).unwrap(), b"authenticator");
        }
    }

    #[test]
    fn wrong_key_size_is_a_credential_error() {
        let err = EncryptionType::Aes256CtsHmacSha196.encrypt(&[0; 16], 1, b"x").unwrap_err();

        assert_eq!(err.error_type, ErrorKind::DefectiveCredential);
    }

    #[test]
    fn parses_krb5_conf_names() {
        assert_eq!(
            "arcfour-hmac".parse::<EncryptionType>().unwrap(),
            EncryptionType::Rc4Hmac
        );
        assert_eq!(EncryptionType::from_id(18), Some(EncryptionType::Aes256CtsHmacSha196));
        assert_eq!(EncryptionType::from_id(1), None);
        assert!("camellia128-cts-cmac".parse::<EncryptionType>().is_err());
    }
}
