//! DES building blocks for NTLMv1, legacy Kerberos and the Netlogon legacy cipher.

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::Des;

use crate::{Error, ErrorKind, Result};

pub const DES_BLOCK_SIZE: usize = 8;

const LM_MAGIC: &[u8; 8] = b"KGS!@#$%";

const WEAK_KEYS: [[u8; 8]; 16] = [
    [0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01],
    [0xfe, 0xfe, 0xfe, 0xfe, 0xfe, 0xfe, 0xfe, 0xfe],
    [0xe0, 0xe0, 0xe0, 0xe0, 0xf1, 0xf1, 0xf1, 0xf1],
    [0x1f, 0x1f, 0x1f, 0x1f, 0x0e, 0x0e, 0x0e, 0x0e],
    [0x01, 0xfe, 0x01, 0xfe, 0x01, 0xfe, 0x01, 0xfe],
    [0xfe, 0x01, 0xfe, 0x01, 0xfe, 0x01, 0xfe, 0x01],
    [0x1f, 0xe0, 0x1f, 0xe0, 0x0e, 0xf1, 0x0e, 0xf1],
    [0xe0, 0x1f, 0xe0, 0x1f, 0xf1, 0x0e, 0xf1, 0x0e],
    [0x01, 0xe0, 0x01, 0xe0, 0x01, 0xf1, 0x01, 0xf1],
    [0xe0, 0x01, 0xe0, 0x01, 0xf1, 0x01, 0xf1, 0x01],
    [0x1f, 0xfe, 0x1f, 0xfe, 0x0e, 0xfe, 0x0e, 0xfe],
    [0xfe, 0x1f, 0xfe, 0x1f, 0xfe, 0x0e, 0xfe, 0x0e],
    [0x01, 0x1f, 0x01, 0x1f, 0x01, 0x0e, 0x01, 0x0e],
    [0x1f, 0x01, 0x1f, 0x01, 0x0e, 0x01, 0x0e, 0x01],
    [0xe0, 0xfe, 0xe0, 0xfe, 0xf1, 0xfe, 0xf1, 0xfe],
    [0xfe, 0xe0, 0xfe, 0xe0, 0xfe, 0xf1, 0xfe, 0xf1],
];

fn cipher(key: &[u8]) -> Result<Des> {
    Des::new_from_slice(key).map_err(|e| Error::new(ErrorKind::InvalidParameter, format!("invalid DES key: {}", e)))
}

/// Sets the low bit of every byte so that each byte has odd parity.
pub fn fix_parity(key: &mut [u8]) {
    for byte in key.iter_mut() {
        let high = *byte & 0xfe;
        *byte = if high.count_ones() % 2 == 0 { high | 1 } else { high };
    }
}

pub fn is_weak_key(key: &[u8; 8]) -> bool {
    WEAK_KEYS.iter().any(|weak| weak == key)
}

/// Spreads 56 key bits over 8 bytes, leaving room for the parity bits.
pub fn expand_key(key: &[u8; 7]) -> [u8; 8] {
    let mut expanded = [
        key[0] >> 1,
        ((key[0] & 0x01) << 6) | (key[1] >> 2),
        ((key[1] & 0x03) << 5) | (key[2] >> 3),
        ((key[2] & 0x07) << 4) | (key[3] >> 4),
        ((key[3] & 0x0f) << 3) | (key[4] >> 5),
        ((key[4] & 0x1f) << 2) | (key[5] >> 6),
        ((key[5] & 0x3f) << 1) | (key[6] >> 7),
        key[6] & 0x7f,
    ];
    for byte in expanded.iter_mut() {
        *byte <<= 1;
    }
    fix_parity(&mut expanded);

    expanded
}

fn seven_byte_key(key: &[u8]) -> Result<[u8; 7]> {
    key.try_into()
        .map_err(|_| Error::new(ErrorKind::InvalidParameter, format!("expected 7 key bytes, got {}", key.len())))
}

pub fn des_ecb_encrypt(key: &[u8; 8], block: &[u8; 8]) -> Result<[u8; 8]> {
    let mut block = GenericArray::clone_from_slice(block);
    cipher(key)?.encrypt_block(&mut block);

    Ok(block.into())
}

/// DES-ECB of one block with a 7-byte key expanded to 56 bits plus parity.
pub fn des_ecb_encrypt_with_7_byte_key(key: &[u8], block: &[u8; 8]) -> Result<[u8; 8]> {
    des_ecb_encrypt(&expand_key(&seven_byte_key(key)?), block)
}

fn check_block_aligned(data: &[u8]) -> Result<()> {
    if data.len() % DES_BLOCK_SIZE != 0 {
        return Err(Error::new(
            ErrorKind::InvalidParameter,
            format!("DES-CBC input length {} is not a multiple of 8", data.len()),
        ));
    }

    Ok(())
}

pub fn des_cbc_encrypt(key: &[u8], iv: &[u8; 8], data: &[u8]) -> Result<Vec<u8>> {
    check_block_aligned(data)?;

    let cipher = cipher(key)?;
    let mut previous = *iv;
    let mut output = Vec::with_capacity(data.len());

    for chunk in data.chunks_exact(DES_BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        for (byte, prev) in block.iter_mut().zip(previous.iter()) {
            *byte ^= prev;
        }
        cipher.encrypt_block(&mut block);

        previous.copy_from_slice(&block);
        output.extend_from_slice(&block);
    }

    Ok(output)
}

pub fn des_cbc_decrypt(key: &[u8], iv: &[u8; 8], data: &[u8]) -> Result<Vec<u8>> {
    check_block_aligned(data)?;

    let cipher = cipher(key)?;
    let mut previous = *iv;
    let mut output = Vec::with_capacity(data.len());

    for chunk in data.chunks_exact(DES_BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        for (byte, prev) in block.iter_mut().zip(previous.iter()) {
            *byte ^= prev;
        }

        previous.copy_from_slice(chunk);
        output.extend_from_slice(&block);
    }

    Ok(output)
}

/// DESL from MS-NLMP: three DES encryptions of `data` under a 16-byte key padded to 21.
pub fn desl(key: &[u8], data: &[u8; 8]) -> Result<[u8; 24]> {
    if key.len() != 16 {
        return Err(Error::new(ErrorKind::InvalidParameter, "DESL key must be 16 bytes"));
    }

    let mut padded = [0u8; 21];
    padded[..16].copy_from_slice(key);

    let mut response = [0u8; 24];
    for (i, chunk) in padded.chunks_exact(7).enumerate() {
        response[i * 8..(i + 1) * 8].copy_from_slice(&des_ecb_encrypt_with_7_byte_key(chunk, data)?);
    }

    Ok(response)
}

/// LAN Manager one-way function over the uppercased OEM password.
pub fn lm_hash(password: &str) -> Result<[u8; 16]> {
    let mut key = [0u8; 14];
    for (dst, src) in key.iter_mut().zip(password.to_uppercase().bytes()) {
        *dst = src;
    }

    let mut hash = [0u8; 16];
    hash[..8].copy_from_slice(&des_ecb_encrypt_with_7_byte_key(&key[..7], LM_MAGIC)?);
    hash[8..].copy_from_slice(&des_ecb_encrypt_with_7_byte_key(&key[7..], LM_MAGIC)?);

    Ok(hash)
}
