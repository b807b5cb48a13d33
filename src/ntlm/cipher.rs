//! Per-direction NTLM signing and sealing.

use byteorder::{LittleEndian, WriteBytesExt};

use super::messages::computations::generate_signing_key;
use super::messages::{CLIENT_SEAL_MAGIC, CLIENT_SIGN_MAGIC, SERVER_SEAL_MAGIC, SERVER_SIGN_MAGIC};
use super::{NegotiateFlags, SESSION_KEY_SIZE, SIGNATURE_SIZE};
use crate::context::{
    concat_buffers, concat_sealed, scatter_sealed, Inbound, Outbound, Role, SecurityBuffer, SequenceNumber,
};
use crate::crypto::{compute_crc32, compute_hmac_md5_parts, Rc4, HASH_SIZE};
use crate::{Error, ErrorKind, Result};

const SIGNATURE_VERSION: u32 = 1;
const SIGNATURE_CHECKSUM_SIZE: usize = 8;

/// Key material of one direction.
#[derive(Debug)]
pub struct NtlmCipher {
    /// HMAC key, present with extended session security.
    signing_key: Option<[u8; HASH_SIZE]>,
    /// Shared by sealing and signature checksums, so both advance the same key stream.
    sealing: Rc4,
    key_exchange: bool,
}

fn seal_key(exported_session_key: &[u8; SESSION_KEY_SIZE], flags: NegotiateFlags, seal_magic: &[u8]) -> Vec<u8> {
    let strength = if flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE128) {
        SESSION_KEY_SIZE
    } else if flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE56) {
        7
    } else {
        5
    };

    if flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY) {
        return generate_signing_key(&exported_session_key[..strength], seal_magic).to_vec();
    }

    // without ESS the exported key is used directly, weakened when 128 bits were refused
    match strength {
        SESSION_KEY_SIZE => exported_session_key.to_vec(),
        7 => {
            let mut key = exported_session_key[..7].to_vec();
            key.push(0xa0);
            key
        }
        _ => {
            let mut key = exported_session_key[..5].to_vec();
            key.extend_from_slice(&[0xe5, 0x38, 0xb0]);
            key
        }
    }
}

impl NtlmCipher {
    fn new(
        exported_session_key: &[u8; SESSION_KEY_SIZE],
        flags: NegotiateFlags,
        sign_magic: &[u8],
        seal_magic: &[u8],
    ) -> Result<Self> {
        let ess = flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY);

        Ok(Self {
            signing_key: ess.then(|| generate_signing_key(exported_session_key, sign_magic)),
            sealing: Rc4::new(&seal_key(exported_session_key, flags, seal_magic))?,
            key_exchange: flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH),
        })
    }

    /// `NTLMSSP_MESSAGE_SIGNATURE` over the plaintext of all fragments.
    fn signature(&mut self, sequence_number: u32, data: &[u8]) -> Result<[u8; SIGNATURE_SIZE]> {
        let mut signature = Vec::with_capacity(SIGNATURE_SIZE);
        signature.write_u32::<LittleEndian>(SIGNATURE_VERSION)?;

        match self.signing_key {
            Some(signing_key) => {
                let digest = compute_hmac_md5_parts(&signing_key, &[&sequence_number.to_le_bytes(), data])?;
                let mut checksum = digest[..SIGNATURE_CHECKSUM_SIZE].to_vec();
                if self.key_exchange {
                    self.sealing.apply(&mut checksum);
                }

                signature.extend_from_slice(&checksum);
                signature.write_u32::<LittleEndian>(sequence_number)?;
            }
            None => {
                // random pad, CRC32 and sequence number, all under the sealing key stream
                let mut tail = Vec::with_capacity(SIGNATURE_SIZE - 4);
                tail.write_u32::<LittleEndian>(0)?;
                tail.write_u32::<LittleEndian>(compute_crc32(data))?;
                tail.write_u32::<LittleEndian>(sequence_number)?;
                self.sealing.apply(&mut tail);
                // the encrypted pad only advances the key stream and is sent as zeros
                tail[..4].fill(0);

                signature.extend_from_slice(&tail);
            }
        }

        let mut result = [0x00; SIGNATURE_SIZE];
        result.copy_from_slice(&signature);

        Ok(result)
    }
}

/// Builds both directions of the client (or, for tests and loopback, server) cipher state.
pub fn derive_cipher_state(
    exported_session_key: &[u8; SESSION_KEY_SIZE],
    flags: NegotiateFlags,
    role: Role,
) -> Result<(Outbound<NtlmCipher>, Inbound<NtlmCipher>)> {
    let client = NtlmCipher::new(exported_session_key, flags, CLIENT_SIGN_MAGIC, CLIENT_SEAL_MAGIC)?;
    let server = NtlmCipher::new(exported_session_key, flags, SERVER_SIGN_MAGIC, SERVER_SEAL_MAGIC)?;

    let (outbound, inbound) = match role {
        Role::Initiator => (client, server),
        Role::Acceptor => (server, client),
    };

    Ok((
        Outbound::new(outbound, SequenceNumber::new(0, 1)),
        Inbound::new(inbound, SequenceNumber::new(0, 1)),
    ))
}

fn sequence_number_u32(value: u64) -> u32 {
    // NTLM sequence numbers wrap at 32 bits
    value as u32
}

impl Outbound<NtlmCipher> {
    pub fn seal(&mut self, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
        let sequence_number = sequence_number_u32(self.next_sequence_number());
        let plaintext = concat_buffers(buffers);

        let mut sealed = concat_sealed(buffers);
        self.cipher_mut().sealing.apply(&mut sealed);
        scatter_sealed(buffers, &sealed)?;

        Ok(self.cipher_mut().signature(sequence_number, &plaintext)?.to_vec())
    }

    pub fn sign(&mut self, buffers: &[SecurityBuffer]) -> Result<Vec<u8>> {
        let sequence_number = sequence_number_u32(self.next_sequence_number());

        Ok(self
            .cipher_mut()
            .signature(sequence_number, &concat_buffers(buffers))?
            .to_vec())
    }
}

fn check_signature(expected: &[u8], signature: &[u8]) -> Result<()> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            format!("NTLM signature must be {} bytes, got {}", SIGNATURE_SIZE, signature.len()),
        ));
    }

    if expected != signature {
        return Err(Error::new(ErrorKind::BadMic, "NTLM signature verification failed"));
    }

    Ok(())
}

impl Inbound<NtlmCipher> {
    pub fn unseal(&mut self, buffers: &mut [SecurityBuffer], signature: &[u8]) -> Result<()> {
        let sequence_number = sequence_number_u32(self.next_sequence_number());

        let mut sealed = concat_sealed(buffers);
        self.cipher_mut().sealing.apply(&mut sealed);
        scatter_sealed(buffers, &sealed)?;

        let expected = self
            .cipher_mut()
            .signature(sequence_number, &concat_buffers(buffers))?;

        check_signature(&expected, signature)
    }

    pub fn verify(&mut self, buffers: &[SecurityBuffer], signature: &[u8]) -> Result<()> {
        let sequence_number = sequence_number_u32(self.next_sequence_number());
        let expected = self
            .cipher_mut()
            .signature(sequence_number, &concat_buffers(buffers))?;

        check_signature(&expected, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORTED_SESSION_KEY: [u8; SESSION_KEY_SIZE] = [0x55; SESSION_KEY_SIZE];

    fn ess_flags() -> NegotiateFlags {
        NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY
            | NegotiateFlags::NTLM_SSP_NEGOTIATE128
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH
    }

    #[test]
    fn client_seal_is_unsealed_by_server() {
        let (mut client, _) = derive_cipher_state(&EXPORTED_SESSION_KEY, ess_flags(), Role::Initiator).unwrap();
        let (_, mut server) = derive_cipher_state(&EXPORTED_SESSION_KEY, ess_flags(), Role::Acceptor).unwrap();

        let mut buffers = vec![
            SecurityBuffer::sign_only(b"header".to_vec()),
            SecurityBuffer::data(b"stub data".to_vec()),
        ];
        let signature = client.seal(&mut buffers).unwrap();

        assert_eq!(signature.len(), SIGNATURE_SIZE);
        assert_eq!(&signature[..4], &[1, 0, 0, 0]);
        assert_eq!(&signature[12..], &[0, 0, 0, 0]);
        assert_eq!(buffers[0].data, b"header");
        assert_ne!(buffers[1].data, b"stub data");

        server.unseal(&mut buffers, &signature).unwrap();

        assert_eq!(buffers[1].data, b"stub data");
        assert_eq!(server.sequence_number(), 1);
    }

    #[test]
    fn tampered_sign_only_fragment_fails_verification() {
        let (mut client, _) = derive_cipher_state(&EXPORTED_SESSION_KEY, ess_flags(), Role::Initiator).unwrap();
        let (_, mut server) = derive_cipher_state(&EXPORTED_SESSION_KEY, ess_flags(), Role::Acceptor).unwrap();

        let mut buffers = vec![
            SecurityBuffer::sign_only(b"header".to_vec()),
            SecurityBuffer::data(b"stub data".to_vec()),
        ];
        let signature = client.seal(&mut buffers).unwrap();
        buffers[0].data[0] ^= 1;

        let err = server.unseal(&mut buffers, &signature).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::BadMic);
    }

    fn hex(value: &str) -> Vec<u8> {
        (0..value.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&value[i..i + 2], 16).unwrap())
            .collect()
    }

    fn plaintext() -> Vec<u8> {
        "Plaintext".encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn ntlm_v1_seal_without_ess_matches_known_vector() {
        // MS-NLMP 4.2.2.4
        let flags = NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH
            | NegotiateFlags::NTLM_SSP_NEGOTIATE56
            | NegotiateFlags::NTLM_SSP_NEGOTIATE128;
        let (mut client, _) = derive_cipher_state(&EXPORTED_SESSION_KEY, flags, Role::Initiator).unwrap();

        let mut buffers = vec![SecurityBuffer::data(plaintext())];
        let signature = client.seal(&mut buffers).unwrap();

        assert_eq!(buffers[0].data, hex("56fe04d861f9319af0d7238a2e3b4d457fb8"));
        assert_eq!(signature, hex("010000000000000009dcd1df2e459d36"));
    }

    #[test]
    fn ntlm_v2_seal_matches_known_vector() {
        // MS-NLMP 4.2.4.4
        let (mut client, _) = derive_cipher_state(&EXPORTED_SESSION_KEY, ess_flags(), Role::Initiator).unwrap();

        let mut buffers = vec![SecurityBuffer::data(plaintext())];
        let signature = client.seal(&mut buffers).unwrap();

        assert_eq!(buffers[0].data, hex("54e50165bf1936dc996020c1811b0f06fb5f"));
        assert_eq!(signature, hex("010000007fb38ec5c55d497600000000"));
    }

    #[test]
    fn crc32_signatures_without_ess() {
        let flags = NegotiateFlags::NTLM_SSP_NEGOTIATE56;
        let (mut client, _) = derive_cipher_state(&EXPORTED_SESSION_KEY, flags, Role::Initiator).unwrap();
        let (_, mut server) = derive_cipher_state(&EXPORTED_SESSION_KEY, flags, Role::Acceptor).unwrap();

        for payload in [b"first".as_slice(), b"second".as_slice()] {
            let signature = client.sign(&[SecurityBuffer::sign_only(payload)]).unwrap();
            assert_eq!(&signature[..8], &[1, 0, 0, 0, 0, 0, 0, 0]);
            server.verify(&[SecurityBuffer::sign_only(payload)], &signature).unwrap();
        }

        assert_eq!(client.sequence_number(), 2);
    }

    #[test]
    fn weakened_seal_keys() {
        let key = [0x11; SESSION_KEY_SIZE];

        assert_eq!(
            seal_key(&key, NegotiateFlags::NTLM_SSP_NEGOTIATE56, CLIENT_SEAL_MAGIC),
            vec![0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0xa0]
        );
        assert_eq!(
            seal_key(&key, NegotiateFlags::empty(), CLIENT_SEAL_MAGIC),
            vec![0x11, 0x11, 0x11, 0x11, 0x11, 0xe5, 0x38, 0xb0]
        );
        assert_eq!(seal_key(&key, NegotiateFlags::NTLM_SSP_NEGOTIATE128, CLIENT_SEAL_MAGIC), key.to_vec());
    }

    #[test]
    fn wrong_signature_length_is_defective() {
        let (_, mut server) = derive_cipher_state(&EXPORTED_SESSION_KEY, ess_flags(), Role::Acceptor).unwrap();

        let err = server.verify(&[SecurityBuffer::sign_only(b"x".to_vec())], &[0; 8]).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::DefectiveToken);
        // the sequence number is consumed even though the call failed
        assert_eq!(server.sequence_number(), 1);
    }
}
