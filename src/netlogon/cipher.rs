//! Netlogon secure channel message protection.
//!
//! Signatures follow `NL_AUTH_SIGNATURE` (HMAC-MD5 with RC4 sealing) or
//! `NL_AUTH_SHA2_SIGNATURE` (HMAC-SHA256 with AES-128-CFB8 sealing):
//!
//! ```not_rust
//! | header (8) | sequence number (8) | checksum (8 or 32) | confounder (8, sealed only) |
//! ```
//!
//! # MSDN
//!
//! * [3.3.4.2 Message Protection Services](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-nrpc/d3e14c6b-5a22-4b1d-8bc4-b4f5b1bd9e10)

use rand::rngs::OsRng;
use rand::RngCore;

use super::credential::SESSION_KEY_SIZE;
use crate::context::{
    concat_buffers, concat_sealed, scatter_sealed, Inbound, Outbound, Role, SecurityBuffer, SequenceNumber,
};
use crate::crypto::{
    aes_cfb8_decrypt, aes_cfb8_encrypt, compute_hmac_md5, compute_hmac_sha256_parts,
    compute_md5_parts, xor_key, Rc4, AES_BLOCK_SIZE,
};
use crate::{Error, ErrorKind, Result};

const HEADER_SIZE: usize = 8;
const SEQUENCE_NUMBER_SIZE: usize = 8;
const CHECKSUM_SIZE: usize = 8;
const SHA2_CHECKSUM_FIELD_SIZE: usize = 32;
const CONFOUNDER_SIZE: usize = 8;

const SIGN_ALGORITHM_HMAC_MD5: [u8; 2] = [0x77, 0x00];
const SIGN_ALGORITHM_HMAC_SHA256: [u8; 2] = [0x13, 0x00];
const SEAL_ALGORITHM_RC4: [u8; 2] = [0x7a, 0x00];
const SEAL_ALGORITHM_AES128: [u8; 2] = [0x1a, 0x00];
const SEAL_ALGORITHM_NONE: [u8; 2] = [0xff, 0xff];
const PAD: [u8; 2] = [0xff, 0xff];

const SEAL_KEY_MASK: u8 = 0xf0;
/// Set in the sequence number of every message sent by the client.
const CLIENT_DIRECTION: u8 = 0x80;

/// Unwrap compares the header, the sequence number and the checksum.
const UNWRAP_COMPARED_LEN: usize = 24;
/// Signature verification compares the header and the first half of the sequence number.
const VERIFY_COMPARED_LEN: usize = 12;

/// Key material of one direction; both directions share the session key.
#[derive(Debug)]
pub struct NetlogonCipher {
    session_key: [u8; SESSION_KEY_SIZE],
    aes: bool,
    /// The side that produces the tokens this cipher handles.
    sender: Role,
}

impl NetlogonCipher {
    fn new(session_key: &[u8; SESSION_KEY_SIZE], aes: bool, sender: Role) -> Self {
        Self {
            session_key: *session_key,
            aes,
            sender,
        }
    }

    pub fn signature_len(&self, sealed: bool) -> usize {
        let checksum = if self.aes {
            SHA2_CHECKSUM_FIELD_SIZE
        } else {
            CHECKSUM_SIZE
        };
        let confounder = if sealed { CONFOUNDER_SIZE } else { 0 };

        HEADER_SIZE + SEQUENCE_NUMBER_SIZE + checksum + confounder
    }

    fn header(&self, sealed: bool) -> [u8; HEADER_SIZE] {
        let (sign_algorithm, seal_algorithm) = match (self.aes, sealed) {
            (true, true) => (SIGN_ALGORITHM_HMAC_SHA256, SEAL_ALGORITHM_AES128),
            (true, false) => (SIGN_ALGORITHM_HMAC_SHA256, SEAL_ALGORITHM_NONE),
            (false, true) => (SIGN_ALGORITHM_HMAC_MD5, SEAL_ALGORITHM_RC4),
            (false, false) => (SIGN_ALGORITHM_HMAC_MD5, SEAL_ALGORITHM_NONE),
        };

        let mut header = [0x00; HEADER_SIZE];
        header[0..2].copy_from_slice(&sign_algorithm);
        header[2..4].copy_from_slice(&seal_algorithm);
        header[4..6].copy_from_slice(&PAD);

        header
    }

    /// `CopySeqNumber`: both halves big-endian, direction bit in the high half.
    fn copy_sequence_number(&self, sequence_number: u64) -> [u8; SEQUENCE_NUMBER_SIZE] {
        let mut encoded = [0x00; SEQUENCE_NUMBER_SIZE];
        // split into the low and high 32-bit halves
        encoded[..4].copy_from_slice(&(sequence_number as u32).to_be_bytes());
        encoded[4..].copy_from_slice(&((sequence_number >> 32) as u32).to_be_bytes());
        if self.sender == Role::Initiator {
            encoded[4] |= CLIENT_DIRECTION;
        }

        encoded
    }

    fn checksum(&self, header: &[u8], confounder: Option<&[u8]>, data: &[u8]) -> Result<[u8; CHECKSUM_SIZE]> {
        let confounder = confounder.unwrap_or_default();

        let digest = if self.aes {
            compute_hmac_sha256_parts(&self.session_key, &[header, confounder, data])?.to_vec()
        } else {
            let inner = compute_md5_parts(&[&[0x00; 4], header, confounder, data]);
            compute_hmac_md5(&self.session_key, &inner)?.to_vec()
        };

        let mut checksum = [0x00; CHECKSUM_SIZE];
        checksum.copy_from_slice(&digest[..CHECKSUM_SIZE]);

        Ok(checksum)
    }

    /// With AES the confounder and the payload form one key stream. RC4 restarts
    /// its key stream for the payload.
    fn seal(&self, sequence_number: &[u8; SEQUENCE_NUMBER_SIZE], data: &[u8], encrypt: bool) -> Result<Vec<u8>> {
        let seal_key = xor_key(&self.session_key, SEAL_KEY_MASK);

        if self.aes {
            let iv = doubled(sequence_number);
            return if encrypt {
                aes_cfb8_encrypt(&seal_key, &iv, data)
            } else {
                aes_cfb8_decrypt(&seal_key, &iv, data)
            };
        }

        let intermediate = compute_hmac_md5(&seal_key, &[0x00; 4])?;
        let key = compute_hmac_md5(&intermediate, sequence_number)?;

        let mut output = data.to_vec();
        let (confounder, payload) = output.split_at_mut(CONFOUNDER_SIZE.min(data.len()));
        Rc4::new(&key)?.apply(confounder);
        Rc4::new(&key)?.apply(payload);

        Ok(output)
    }

    /// The sequence number travels encrypted under a key bound to the checksum.
    fn encrypt_sequence_number(
        &self,
        sequence_number: &[u8; SEQUENCE_NUMBER_SIZE],
        checksum: &[u8; CHECKSUM_SIZE],
    ) -> Result<Vec<u8>> {
        if self.aes {
            return aes_cfb8_encrypt(&self.session_key, &doubled(checksum), sequence_number);
        }

        let key = compute_hmac_md5(&compute_hmac_md5(&self.session_key, &[0x00; 4])?, checksum)?;

        Ok(Rc4::new(&key)?.process(sequence_number))
    }

    fn signature(
        &self,
        sequence_number: u64,
        confounder: Option<&[u8; CONFOUNDER_SIZE]>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let sealed = confounder.is_some();
        let header = self.header(sealed);
        let checksum = self.checksum(&header, confounder.map(|c| c.as_slice()), plaintext)?;
        let sequence_number = self.copy_sequence_number(sequence_number);

        let mut signature = Vec::with_capacity(self.signature_len(sealed));
        signature.extend_from_slice(&header);
        signature.extend_from_slice(&self.encrypt_sequence_number(&sequence_number, &checksum)?);
        signature.extend_from_slice(&checksum);
        if self.aes {
            signature.extend_from_slice(&[0x00; SHA2_CHECKSUM_FIELD_SIZE - CHECKSUM_SIZE]);
        }
        if let Some(confounder) = confounder {
            signature.extend_from_slice(&self.seal(&sequence_number, confounder, true)?);
        }

        Ok(signature)
    }
}

fn doubled(half: &[u8; 8]) -> [u8; AES_BLOCK_SIZE] {
    let mut iv = [0x00; AES_BLOCK_SIZE];
    iv[..8].copy_from_slice(half);
    iv[8..].copy_from_slice(half);

    iv
}

/// Builds both directions for the given side of the secure channel.
///
/// Client messages use odd sequence numbers and server messages even ones; each
/// direction advances by two.
pub fn derive_cipher_state(
    session_key: &[u8; SESSION_KEY_SIZE],
    aes: bool,
    role: Role,
) -> (Outbound<NetlogonCipher>, Inbound<NetlogonCipher>) {
    let client_sequence = SequenceNumber::new(1, 2);
    let server_sequence = SequenceNumber::new(0, 2);

    let (outbound_sequence, inbound_sequence) = match role {
        Role::Initiator => (client_sequence, server_sequence),
        Role::Acceptor => (server_sequence, client_sequence),
    };

    (
        Outbound::new(NetlogonCipher::new(session_key, aes, role), outbound_sequence),
        Inbound::new(NetlogonCipher::new(session_key, aes, role.peer()), inbound_sequence),
    )
}

impl Outbound<NetlogonCipher> {
    pub fn seal(&mut self, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
        let mut confounder = [0x00; CONFOUNDER_SIZE];
        OsRng.fill_bytes(&mut confounder);

        self.seal_with_confounder(buffers, &confounder)
    }

    fn seal_with_confounder(
        &mut self,
        buffers: &mut [SecurityBuffer],
        confounder: &[u8; CONFOUNDER_SIZE],
    ) -> Result<Vec<u8>> {
        let sequence_number = self.next_sequence_number();
        let cipher = self.cipher();

        let signature = cipher.signature(sequence_number, Some(confounder), &concat_buffers(buffers))?;

        let mut stream = confounder.to_vec();
        stream.extend_from_slice(&concat_sealed(buffers));
        let sealed = cipher.seal(&cipher.copy_sequence_number(sequence_number), &stream, true)?;
        scatter_sealed(buffers, &sealed[CONFOUNDER_SIZE..])?;

        Ok(signature)
    }

    pub fn sign(&mut self, buffers: &[SecurityBuffer]) -> Result<Vec<u8>> {
        let sequence_number = self.next_sequence_number();

        self.cipher().signature(sequence_number, None, &concat_buffers(buffers))
    }
}

fn check_signature_len(signature: &[u8], expected: usize) -> Result<()> {
    if signature.len() < expected {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            format!(
                "Netlogon signature must be at least {} bytes, got {}",
                expected,
                signature.len()
            ),
        ));
    }

    Ok(())
}

fn compare_prefix(expected: &[u8], signature: &[u8], len: usize) -> Result<()> {
    if expected[..len] != signature[..len] {
        return Err(Error::new(ErrorKind::BadMic, "Netlogon signature verification failed"));
    }

    Ok(())
}

impl Inbound<NetlogonCipher> {
    pub fn unseal(&mut self, buffers: &mut [SecurityBuffer], signature: &[u8]) -> Result<()> {
        let sequence_number = self.next_sequence_number();
        let cipher = self.cipher();

        let signature_len = cipher.signature_len(true);
        check_signature_len(signature, signature_len)?;

        let mut stream = signature[signature_len - CONFOUNDER_SIZE..signature_len].to_vec();
        stream.extend_from_slice(&concat_sealed(buffers));
        let plaintext = cipher.seal(&cipher.copy_sequence_number(sequence_number), &stream, false)?;

        let mut confounder = [0x00; CONFOUNDER_SIZE];
        confounder.copy_from_slice(&plaintext[..CONFOUNDER_SIZE]);
        scatter_sealed(buffers, &plaintext[CONFOUNDER_SIZE..])?;

        let expected = cipher.signature(sequence_number, Some(&confounder), &concat_buffers(buffers))?;

        compare_prefix(&expected, signature, UNWRAP_COMPARED_LEN)
    }

    pub fn verify(&mut self, buffers: &[SecurityBuffer], signature: &[u8]) -> Result<()> {
        let sequence_number = self.next_sequence_number();
        let cipher = self.cipher();

        check_signature_len(signature, cipher.signature_len(false))?;
        let expected = cipher.signature(sequence_number, None, &concat_buffers(buffers))?;

        compare_prefix(&expected, signature, VERIFY_COMPARED_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION_KEY: [u8; SESSION_KEY_SIZE] = [
        0x8b, 0x1f, 0x46, 0x2d, 0xe0, 0x0a, 0x91, 0x73, 0x5c, 0x38, 0xd2, 0x07, 0xe6, 0x4f, 0xa1, 0x19,
    ];

    fn pair(aes: bool) -> (Outbound<NetlogonCipher>, Inbound<NetlogonCipher>) {
        let (client, _) = derive_cipher_state(&SESSION_KEY, aes, Role::Initiator);
        let (_, server) = derive_cipher_state(&SESSION_KEY, aes, Role::Acceptor);

        (client, server)
    }

    #[test]
    fn sealed_fragments_roundtrip_for_both_ciphers() {
        for aes in [false, true] {
            let (mut client, mut server) = pair(aes);

            let mut buffers = vec![
                SecurityBuffer::sign_only(b"pdu header".to_vec()),
                SecurityBuffer::data(b"NetrLogonSamLogonEx stub".to_vec()),
                SecurityBuffer::sign_only(b"verification trailer".to_vec()),
            ];
            let signature = client.seal(&mut buffers).unwrap();

            assert_eq!(signature.len(), if aes { 56 } else { 32 });
            assert_eq!(&signature[4..8], &[0xff, 0xff, 0x00, 0x00]);
            assert_ne!(buffers[1].data, b"NetrLogonSamLogonEx stub");
            assert_eq!(buffers[0].data, b"pdu header");

            server.unseal(&mut buffers, &signature).unwrap();

            assert_eq!(buffers[1].data, b"NetrLogonSamLogonEx stub");
        }
    }

    fn hex(value: &str) -> Vec<u8> {
        (0..value.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&value[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn first_client_messages_match_known_vectors() {
        let confounder = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let cases = [
            (
                true,
                "13001a00ffff0000fcec3bf2828cc9f38cbd62e284dc55ac\
                 000000000000000000000000000000000000000000000000d4cdd3136fa5dec5",
                "404199524344eb5693f9807a1f79ed5d72b31613202628de",
                "1300ffffffff000060aa720371d303251ea190c6851d251e\
                 000000000000000000000000000000000000000000000000",
            ),
            (
                false,
                "77007a00ffff0000c2f36b73d55fb7de20a2cb43c98988d415bbb4befbee9df0",
                "5adcc3c8b287fd978bb4e016e08a2774fcc2b2c59eec5f6c",
                "7700ffffffff00008bc517fb3dadc0005dfe80a7aa2fe263",
            ),
        ];

        for (aes, seal_signature, sealed_stub, sign_signature) in cases {
            let (mut client, mut server) = pair(aes);
            let mut buffers = vec![
                SecurityBuffer::sign_only(b"pdu header".to_vec()),
                SecurityBuffer::data(b"NetrLogonSamLogonEx stub".to_vec()),
            ];

            let signature = client.seal_with_confounder(&mut buffers, &confounder).unwrap();

            assert_eq!(signature, hex(seal_signature), "aes={}", aes);
            assert_eq!(buffers[1].data, hex(sealed_stub), "aes={}", aes);

            server.unseal(&mut buffers, &signature).unwrap();
            assert_eq!(buffers[1].data, b"NetrLogonSamLogonEx stub");

            let (mut client, _) = pair(aes);
            let signature = client.sign(&[SecurityBuffer::sign_only(b"payload".to_vec())]).unwrap();
            assert_eq!(signature, hex(sign_signature), "aes={}", aes);
        }
    }

    #[test]
    fn header_names_the_algorithms() {
        let (mut client, _) = pair(false);
        let signature = client.sign(&[SecurityBuffer::sign_only(b"payload".to_vec())]).unwrap();
        assert_eq!(&signature[..8], &[0x77, 0x00, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00]);
        assert_eq!(signature.len(), 24);

        let (mut client, _) = pair(true);
        let signature = client.sign(&[SecurityBuffer::sign_only(b"payload".to_vec())]).unwrap();
        assert_eq!(&signature[..8], &[0x13, 0x00, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00]);
        assert_eq!(signature.len(), 48);
        assert_eq!(&signature[24..], &[0x00; 24]);
    }

    #[test]
    fn client_sequence_numbers_carry_the_direction_bit() {
        let (client, _) = derive_cipher_state(&SESSION_KEY, false, Role::Initiator);
        let (server, _) = derive_cipher_state(&SESSION_KEY, false, Role::Acceptor);

        assert_eq!(
            client.cipher().copy_sequence_number(0x0000_0002_0000_0001),
            [0x00, 0x00, 0x00, 0x01, 0x80, 0x00, 0x00, 0x02]
        );
        assert_eq!(
            server.cipher().copy_sequence_number(0x0000_0002_0000_0001),
            [0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02]
        );
    }

    #[test]
    fn tampering_is_detected() {
        for aes in [false, true] {
            let (mut client, mut server) = pair(aes);

            let mut buffers = vec![SecurityBuffer::data(b"secret stub".to_vec())];
            let signature = client.seal(&mut buffers).unwrap();
            buffers[0].data[3] ^= 0x01;

            let err = server.unseal(&mut buffers, &signature).unwrap_err();
            assert_eq!(err.error_type, ErrorKind::BadMic);
        }
    }

    #[test]
    fn signatures_verify_in_order_only() {
        let (mut client, mut server) = pair(true);

        let first = client.sign(&[SecurityBuffer::sign_only(b"first".to_vec())]).unwrap();
        let second = client.sign(&[SecurityBuffer::sign_only(b"second".to_vec())]).unwrap();

        let err = server
            .verify(&[SecurityBuffer::sign_only(b"second".to_vec())], &second)
            .unwrap_err();
        assert_eq!(err.error_type, ErrorKind::BadMic);

        // the failed call consumed the first inbound value
        assert_eq!(server.sequence_number(), 3);
        assert!(server
            .verify(&[SecurityBuffer::sign_only(b"first".to_vec())], &first)
            .is_err());
    }

    #[test]
    fn counters_advance_by_two() {
        let (mut client, mut server) = pair(false);

        for _ in 0..3 {
            let signature = client.sign(&[SecurityBuffer::sign_only(b"ping".to_vec())]).unwrap();
            server
                .verify(&[SecurityBuffer::sign_only(b"ping".to_vec())], &signature)
                .unwrap();
        }

        assert_eq!(client.sequence_number(), 7);
        assert_eq!(server.sequence_number(), 7);
    }

    #[test]
    fn short_signatures_are_defective() {
        let (mut client, mut server) = pair(false);

        let mut buffers = vec![SecurityBuffer::data(b"stub".to_vec())];
        let signature = client.seal(&mut buffers).unwrap();

        let err = server.unseal(&mut buffers, &signature[..24]).unwrap_err();
        assert_eq!(err.error_type, ErrorKind::DefectiveToken);

        let err = server
            .verify(&[SecurityBuffer::sign_only(b"stub".to_vec())], &[0x00; 12])
            .unwrap_err();
        assert_eq!(err.error_type, ErrorKind::DefectiveToken);
    }
}
