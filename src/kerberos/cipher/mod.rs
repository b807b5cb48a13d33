//! GSS-API per-message tokens of an established Kerberos context.
//!
//! The token format follows the session key type: RFC 4121 tokens for AES keys,
//! RFC 4757 tokens for RC4-HMAC and RFC 1964 tokens for single DES.

mod aes;
mod des;
mod rc4;

use crate::context::{Inbound, Outbound, Role, SecurityBuffer, SequenceNumber};
use crate::gss::{self, KRB5_OID_DER};
use crate::kerberos::encryption::EncryptionType;
use crate::secret::Secret;
use crate::{Error, ErrorKind, Result};

/// Key material of one direction.
#[derive(Debug)]
pub struct KerberosCipher {
    encryption_type: EncryptionType,
    key: Secret<Vec<u8>>,
    /// Role of the side that produces the tokens handled by this state.
    sender: Role,
    /// The key is the subkey chosen by the acceptor in its AP-REP.
    acceptor_subkey: bool,
    dce_style: bool,
}

impl KerberosCipher {
    pub fn new(
        encryption_type: EncryptionType,
        key: Secret<Vec<u8>>,
        sender: Role,
        acceptor_subkey: bool,
        dce_style: bool,
    ) -> Result<Self> {
        if key.len() != encryption_type.key_size() {
            return Err(Error::new(
                ErrorKind::Failure,
                format!("{} session key must be {} bytes", encryption_type, encryption_type.key_size()),
            ));
        }

        Ok(Self {
            encryption_type,
            key,
            sender,
            acceptor_subkey,
            dce_style,
        })
    }

    pub fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    fn key(&self) -> &[u8] {
        self.key.as_ref()
    }
}

/// Sequence numbers and keys of both directions.
#[derive(Debug, Clone)]
pub struct CipherParams {
    pub encryption_type: EncryptionType,
    pub key: Secret<Vec<u8>>,
    pub acceptor_subkey: bool,
    pub dce_style: bool,
    pub initiator_sequence_number: u32,
    pub acceptor_sequence_number: u32,
}

/// Builds the cipher state of `role`. The peer side is obtained with [`Role::peer`].
pub fn derive_cipher_state(
    params: &CipherParams,
    role: Role,
) -> Result<(Outbound<KerberosCipher>, Inbound<KerberosCipher>)> {
    let cipher = |sender| {
        KerberosCipher::new(
            params.encryption_type,
            params.key.clone(),
            sender,
            params.acceptor_subkey,
            params.dce_style,
        )
    };
    let sequence_number = |sender| match sender {
        Role::Initiator => SequenceNumber::new(u64::from(params.initiator_sequence_number), 1),
        Role::Acceptor => SequenceNumber::new(u64::from(params.acceptor_sequence_number), 1),
    };

    Ok((
        Outbound::new(cipher(role)?, sequence_number(role)),
        Inbound::new(cipher(role.peer())?, sequence_number(role.peer())),
    ))
}

impl Outbound<KerberosCipher> {
    pub fn wrap(&mut self, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
        let sequence_number = self.next_sequence_number();
        let cipher = self.cipher();

        match cipher.encryption_type {
            EncryptionType::Rc4Hmac => rc4::wrap(cipher, sequence_number, buffers),
            EncryptionType::DesCbcMd5 => des::wrap(cipher, sequence_number, buffers),
            EncryptionType::Aes128CtsHmacSha196 | EncryptionType::Aes256CtsHmacSha196 => {
                aes::wrap(cipher, sequence_number, buffers)
            }
        }
    }

    pub fn sign(&mut self, buffers: &[SecurityBuffer]) -> Result<Vec<u8>> {
        let sequence_number = self.next_sequence_number();
        let cipher = self.cipher();

        match cipher.encryption_type {
            EncryptionType::Rc4Hmac => rc4::sign(cipher, sequence_number, buffers),
            EncryptionType::DesCbcMd5 => des::sign(cipher, sequence_number, buffers),
            EncryptionType::Aes128CtsHmacSha196 | EncryptionType::Aes256CtsHmacSha196 => {
                aes::sign(cipher, sequence_number, buffers)
            }
        }
    }
}

impl Inbound<KerberosCipher> {
    pub fn unwrap(&mut self, buffers: &mut [SecurityBuffer], signature: &[u8]) -> Result<()> {
        let sequence_number = self.next_sequence_number();
        let cipher = self.cipher();

        match cipher.encryption_type {
            EncryptionType::Rc4Hmac => rc4::unwrap(cipher, sequence_number, buffers, signature),
            EncryptionType::DesCbcMd5 => des::unwrap(cipher, sequence_number, buffers, signature),
            EncryptionType::Aes128CtsHmacSha196 | EncryptionType::Aes256CtsHmacSha196 => {
                aes::unwrap(cipher, sequence_number, buffers, signature)
            }
        }
    }

    pub fn verify(&mut self, buffers: &[SecurityBuffer], signature: &[u8]) -> Result<()> {
        let sequence_number = self.next_sequence_number();
        let cipher = self.cipher();

        match cipher.encryption_type {
            EncryptionType::Rc4Hmac => rc4::verify(cipher, sequence_number, buffers, signature),
            EncryptionType::DesCbcMd5 => des::verify(cipher, sequence_number, buffers, signature),
            EncryptionType::Aes128CtsHmacSha196 | EncryptionType::Aes256CtsHmacSha196 => {
                aes::verify(cipher, sequence_number, buffers, signature)
            }
        }
    }
}

pub(super) const LEGACY_TOK_ID_MIC: [u8; 2] = [0x01, 0x01];
pub(super) const LEGACY_TOK_ID_WRAP: [u8; 2] = [0x02, 0x01];
const LEGACY_CHECKSUM_SIZE: usize = 8;
const LEGACY_CONFOUNDER_SIZE: usize = 8;
/// `SGN_ALG | SEAL_ALG | filler | SND_SEQ | SGN_CKSUM`
const LEGACY_MIC_BODY_SIZE: usize = 22;
const LEGACY_WRAP_BODY_SIZE: usize = LEGACY_MIC_BODY_SIZE + LEGACY_CONFOUNDER_SIZE;

/// Fields of an RFC 1964 style token, shared by the DES and RC4 formats.
struct LegacyToken {
    sgn_alg: [u8; 2],
    seal_alg: [u8; 2],
    snd_seq: [u8; 8],
    checksum: [u8; LEGACY_CHECKSUM_SIZE],
    confounder: Option<[u8; LEGACY_CONFOUNDER_SIZE]>,
}

impl LegacyToken {
    fn tok_id(&self) -> [u8; 2] {
        if self.confounder.is_some() {
            LEGACY_TOK_ID_WRAP
        } else {
            LEGACY_TOK_ID_MIC
        }
    }

    /// The first eight bytes of the token, covered by the checksum.
    fn header(tok_id: [u8; 2], sgn_alg: [u8; 2], seal_alg: [u8; 2]) -> [u8; 8] {
        [
            tok_id[0], tok_id[1], sgn_alg[0], sgn_alg[1], seal_alg[0], seal_alg[1], 0xff, 0xff,
        ]
    }

    /// Frames the token in the `0x60` application wrapper. `detached_len` bytes of sealed
    /// payload are counted in the length in DCE style.
    fn encode(&self, detached_len: usize) -> Vec<u8> {
        let mut body = Vec::with_capacity(LEGACY_WRAP_BODY_SIZE);
        body.extend_from_slice(&self.sgn_alg);
        body.extend_from_slice(&self.seal_alg);
        body.extend_from_slice(&[0xff, 0xff]);
        body.extend_from_slice(&self.snd_seq);
        body.extend_from_slice(&self.checksum);
        if let Some(confounder) = self.confounder {
            body.extend_from_slice(&confounder);
        }

        let tok_id = self.tok_id();
        let mut token = gss::encode_header(&KRB5_OID_DER, tok_id.len() + body.len() + detached_len);
        token.extend_from_slice(&tok_id);
        token.extend_from_slice(&body);

        token
    }

    fn decode(data: &[u8], tok_id: [u8; 2], detached_len: usize) -> Result<Self> {
        let token = gss::decode_with_detached(data, detached_len)?;
        if token.oid != KRB5_OID_DER {
            return Err(Error::new(ErrorKind::DefectiveToken, "GSS token is not a Kerberos token"));
        }
        if token.tok_id != tok_id {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("unexpected GSS token id {:02x?}", token.tok_id),
            ));
        }

        let expected_len = if tok_id == LEGACY_TOK_ID_WRAP {
            LEGACY_WRAP_BODY_SIZE
        } else {
            LEGACY_MIC_BODY_SIZE
        };
        let body = token.body;
        if body.len() != expected_len {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("GSS token body must be {} bytes, got {}", expected_len, body.len()),
            ));
        }
        if body[4..6] != [0xff, 0xff] {
            return Err(Error::new(ErrorKind::DefectiveToken, "invalid GSS token filler"));
        }

        let mut token = Self {
            sgn_alg: [body[0], body[1]],
            seal_alg: [body[2], body[3]],
            snd_seq: [0; 8],
            checksum: [0; LEGACY_CHECKSUM_SIZE],
            confounder: None,
        };
        token.snd_seq.copy_from_slice(&body[6..14]);
        token.checksum.copy_from_slice(&body[14..22]);
        if tok_id == LEGACY_TOK_ID_WRAP {
            let mut confounder = [0; LEGACY_CONFOUNDER_SIZE];
            confounder.copy_from_slice(&body[22..30]);
            token.confounder = Some(confounder);
        }

        Ok(token)
    }
}

/// Plain `SND_SEQ` field: the 32 bit sequence number followed by the direction marker.
fn legacy_sequence_field(sequence_number: u64, sender: Role, big_endian: bool) -> [u8; 8] {
    // legacy tokens carry 32 bit sequence numbers
    let sequence_number = sequence_number as u32;

    let mut field = [0; 8];
    if big_endian {
        field[..4].copy_from_slice(&sequence_number.to_be_bytes());
    } else {
        field[..4].copy_from_slice(&sequence_number.to_le_bytes());
    }
    if sender == Role::Acceptor {
        field[4..].fill(0xff);
    }

    field
}

/// Checks a decrypted `SND_SEQ` field against the expected sender and counter.
fn check_legacy_sequence_field(field: &[u8], expected_sequence_number: u64, sender: Role, big_endian: bool) -> Result<()> {
    let expected = legacy_sequence_field(expected_sequence_number, sender, big_endian);

    if field[4..] != expected[4..] {
        return Err(Error::new(ErrorKind::BadMic, "GSS token direction does not match the sender"));
    }
    if field[..4] != expected[..4] {
        return Err(Error::new(
            ErrorKind::OutOfSequence,
            format!("GSS token sequence number {:02x?} is not the expected one", &field[..4]),
        ));
    }

    Ok(())
}

fn detached_len(cipher: &KerberosCipher, sealed_len: usize) -> usize {
    if cipher.dce_style {
        sealed_len
    } else {
        0
    }
}

/// Concatenation of all fragments with the sealed ones replaced by `plaintext`.
fn concat_with_plaintext(buffers: &[SecurityBuffer], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut restored = buffers.to_vec();
    crate::context::scatter_sealed(&mut restored, plaintext)?;

    Ok(crate::context::concat_buffers(&restored))
}
