//! Session key derivation and the Netlogon credential chain.
//!
//! * [3.1.4.3 Session-Key Computation](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-nrpc/5ed93f06-a1d2-4837-8954-fa8b833c2654)
//! * [3.1.4.4 Netlogon Credential Computation](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-nrpc/594909fd-725f-45ac-9799-62e4aefe0585)
//! * [3.1.4.5 Netlogon Authenticator Computation and Verification](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-nrpc/da7acaa3-030b-481e-979b-f58f89389806)

use byteorder::{ByteOrder, LittleEndian};

use crate::crypto::des::des_ecb_encrypt_with_7_byte_key;
use crate::crypto::{aes_cfb8_encrypt, compute_hmac_md5, compute_hmac_sha256, compute_md5_parts, AES_BLOCK_SIZE, HASH_SIZE};
use crate::secret::Secret;
use crate::{Error, ErrorKind, Result};

pub const CHALLENGE_SIZE: usize = 8;
pub const CREDENTIAL_SIZE: usize = 8;
pub const SESSION_KEY_SIZE: usize = 16;

/// How the session key is derived from the shared secret and both challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKeyAlgorithm {
    /// `NETLOGON_NEG_SUPPORTS_AES`
    HmacSha256,
    /// `NETLOGON_NEG_STRONG_KEYS`
    HmacMd5,
    Des,
}

impl SessionKeyAlgorithm {
    pub fn negotiate(aes: bool, strong_key: bool) -> Self {
        if aes {
            Self::HmacSha256
        } else if strong_key {
            Self::HmacMd5
        } else {
            Self::Des
        }
    }
}

pub fn compute_session_key(
    algorithm: SessionKeyAlgorithm,
    nt_hash: &[u8; HASH_SIZE],
    client_challenge: &[u8; CHALLENGE_SIZE],
    server_challenge: &[u8; CHALLENGE_SIZE],
) -> Result<Secret<[u8; SESSION_KEY_SIZE]>> {
    let mut session_key = [0x00; SESSION_KEY_SIZE];

    match algorithm {
        SessionKeyAlgorithm::HmacSha256 => {
            let mut challenges = [0x00; 2 * CHALLENGE_SIZE];
            challenges[..CHALLENGE_SIZE].copy_from_slice(client_challenge);
            challenges[CHALLENGE_SIZE..].copy_from_slice(server_challenge);

            let digest = compute_hmac_sha256(nt_hash, &challenges)?;
            session_key.copy_from_slice(&digest[..SESSION_KEY_SIZE]);
        }
        SessionKeyAlgorithm::HmacMd5 => {
            let digest = compute_md5_parts(&[&[0x00; 4], client_challenge, server_challenge]);
            session_key = compute_hmac_md5(nt_hash, &digest)?;
        }
        SessionKeyAlgorithm::Des => {
            // the challenges are added as two little-endian 32-bit halves
            let mut sum = [0x00; CHALLENGE_SIZE];
            for half in [0..4, 4..8] {
                let value = LittleEndian::read_u32(&client_challenge[half.clone()])
                    .wrapping_add(LittleEndian::read_u32(&server_challenge[half.clone()]));
                LittleEndian::write_u32(&mut sum[half], value);
            }

            let first = des_ecb_encrypt_with_7_byte_key(&nt_hash[..7], &sum)?;
            let second = des_ecb_encrypt_with_7_byte_key(&nt_hash[9..], &first)?;
            session_key[..CREDENTIAL_SIZE].copy_from_slice(&second);
        }
    }

    Ok(Secret::new(session_key))
}

/// `ComputeNetlogonCredential`: AES-CFB8 with a zero IV, or two DES-ECB passes.
pub fn compute_credential(
    input: &[u8; CREDENTIAL_SIZE],
    session_key: &[u8; SESSION_KEY_SIZE],
    aes: bool,
) -> Result<[u8; CREDENTIAL_SIZE]> {
    if aes {
        let encrypted = aes_cfb8_encrypt(session_key, &[0x00; AES_BLOCK_SIZE], input)?;
        let mut credential = [0x00; CREDENTIAL_SIZE];
        credential.copy_from_slice(&encrypted);

        return Ok(credential);
    }

    let first = des_ecb_encrypt_with_7_byte_key(&session_key[..7], input)?;

    des_ecb_encrypt_with_7_byte_key(&session_key[7..14], &first)
}

/// The client side of the secure channel credential chain.
///
/// The stored credential starts as the credential of the client challenge. Each
/// authenticator adds the caller's increment (the authenticator timestamp) to its
/// first four bytes and sends the re-encrypted value; the server proves itself by
/// returning the encryption of the stored value plus one.
#[derive(Debug, Clone)]
pub struct SecureCredential {
    session_key: Secret<[u8; SESSION_KEY_SIZE]>,
    aes: bool,
    stored: [u8; CREDENTIAL_SIZE],
}

fn advance(credential: &[u8; CREDENTIAL_SIZE], increment: u32) -> [u8; CREDENTIAL_SIZE] {
    let mut advanced = *credential;
    let value = LittleEndian::read_u32(&advanced[..4]).wrapping_add(increment);
    LittleEndian::write_u32(&mut advanced[..4], value);

    advanced
}

impl SecureCredential {
    pub fn new(
        session_key: Secret<[u8; SESSION_KEY_SIZE]>,
        aes: bool,
        client_challenge: &[u8; CHALLENGE_SIZE],
    ) -> Result<Self> {
        let stored = compute_credential(client_challenge, session_key.as_ref(), aes)?;

        Ok(Self {
            session_key,
            aes,
            stored,
        })
    }

    /// Sent as `ClientCredential` in `NetrServerAuthenticate3`.
    pub fn client_credential(&self) -> [u8; CREDENTIAL_SIZE] {
        self.stored
    }

    /// Checks the `ServerCredential` returned by `NetrServerAuthenticate3`.
    pub fn verify_server_credential(
        &self,
        server_challenge: &[u8; CHALLENGE_SIZE],
        server_credential: &[u8],
    ) -> Result<()> {
        let expected = compute_credential(server_challenge, self.session_key.as_ref(), self.aes)?;

        check_credential(&expected, server_credential)
    }

    /// Advances the stored credential by `increment` and returns the credential to send.
    pub fn next(&mut self, increment: u32) -> Result<[u8; CREDENTIAL_SIZE]> {
        self.stored = advance(&self.stored, increment);

        compute_credential(&self.stored, self.session_key.as_ref(), self.aes)
    }

    /// Checks a credential produced from the stored value plus `increment` and
    /// keeps the advanced value when it matches.
    pub fn verify(&mut self, increment: u32, credential: &[u8]) -> Result<()> {
        let advanced = advance(&self.stored, increment);
        let expected = compute_credential(&advanced, self.session_key.as_ref(), self.aes)?;

        check_credential(&expected, credential)?;
        self.stored = advanced;

        Ok(())
    }
}

fn check_credential(expected: &[u8; CREDENTIAL_SIZE], credential: &[u8]) -> Result<()> {
    if credential.len() != CREDENTIAL_SIZE {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            format!("Netlogon credential must be {} bytes, got {}", CREDENTIAL_SIZE, credential.len()),
        ));
    }

    if expected.as_slice() != credential {
        return Err(Error::new(ErrorKind::BadMic, "Netlogon credential mismatch"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::crypto::compute_md4;
    use crate::utils::string_to_utf16;

    const CLIENT_CHALLENGE: [u8; CHALLENGE_SIZE] = [0x3a, 0x03, 0x90, 0xa4, 0x6d, 0x0c, 0x3d, 0x4f];
    const SERVER_CHALLENGE: [u8; CHALLENGE_SIZE] = [0x0c, 0x4c, 0x13, 0xd1, 0x60, 0x41, 0xc8, 0x60];

    fn nt_hash() -> [u8; HASH_SIZE] {
        compute_md4(&string_to_utf16("Machine$Passw0rd"))
    }

    #[test]
    fn aes_session_key_truncates_hmac_sha256() {
        let key = compute_session_key(
            SessionKeyAlgorithm::HmacSha256,
            &nt_hash(),
            &CLIENT_CHALLENGE,
            &SERVER_CHALLENGE,
        )
        .unwrap();

        let digest = compute_hmac_sha256(&nt_hash(), &[CLIENT_CHALLENGE, SERVER_CHALLENGE].concat()).unwrap();
        assert_eq!(key.as_ref(), &digest[..SESSION_KEY_SIZE]);
    }

    #[test]
    fn des_session_key_fills_only_the_first_half() {
        let key = compute_session_key(SessionKeyAlgorithm::Des, &nt_hash(), &CLIENT_CHALLENGE, &SERVER_CHALLENGE)
            .unwrap();
        let strong = compute_session_key(
            SessionKeyAlgorithm::HmacMd5,
            &nt_hash(),
            &CLIENT_CHALLENGE,
            &SERVER_CHALLENGE,
        )
        .unwrap();

        assert_eq!(&key.as_ref()[CREDENTIAL_SIZE..], &[0x00; 8]);
        assert_ne!(&key.as_ref()[..CREDENTIAL_SIZE], &[0x00; 8]);
        assert_ne!(key, strong);
    }

    #[test]
    fn algorithm_follows_negotiated_flags() {
        assert_eq!(SessionKeyAlgorithm::negotiate(true, true), SessionKeyAlgorithm::HmacSha256);
        assert_eq!(SessionKeyAlgorithm::negotiate(false, true), SessionKeyAlgorithm::HmacMd5);
        assert_eq!(SessionKeyAlgorithm::negotiate(false, false), SessionKeyAlgorithm::Des);
    }

    #[test]
    fn server_credential_is_the_encrypted_server_challenge() {
        for aes in [true, false] {
            let session_key = [0x5a; SESSION_KEY_SIZE];
            let credential = SecureCredential::new(Secret::new(session_key), aes, &CLIENT_CHALLENGE).unwrap();

            let server_credential = compute_credential(&SERVER_CHALLENGE, &session_key, aes).unwrap();
            credential
                .verify_server_credential(&SERVER_CHALLENGE, &server_credential)
                .unwrap();

            let err = credential
                .verify_server_credential(&SERVER_CHALLENGE, &credential.client_credential())
                .unwrap_err();
            assert_eq!(err.error_type, ErrorKind::BadMic);
        }
    }

    #[test]
    fn return_authenticator_is_stored_plus_one() {
        let mut client =
            SecureCredential::new(Secret::new([0x21; SESSION_KEY_SIZE]), true, &CLIENT_CHALLENGE).unwrap();
        let mut server = client.clone();

        let authenticator = client.next(0x6500_0000).unwrap();
        server.verify(0x6500_0000, &authenticator).unwrap();

        let return_authenticator = server.next(1).unwrap();
        client.verify(1, &return_authenticator).unwrap();
        assert_eq!(client.client_credential(), server.client_credential());
    }

    proptest! {
        #[test]
        fn verify_accepts_only_the_same_increment(
            aes: bool,
            session_key: [u8; SESSION_KEY_SIZE],
            increment: u32,
            other: u32,
        ) {
            prop_assume!(increment != other);

            let mut client = SecureCredential::new(Secret::new(session_key), aes, &CLIENT_CHALLENGE).unwrap();
            let server = client.clone();
            let credential = client.next(increment).unwrap();

            prop_assert!(server.clone().verify(increment, &credential).is_ok());
            prop_assert!(server.clone().verify(other, &credential).is_err());
        }
    }
}
