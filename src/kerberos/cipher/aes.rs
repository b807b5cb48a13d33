//! [RFC 4121](https://www.rfc-editor.org/rfc/rfc4121#section-4.2) Wrap and MIC tokens.

use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use picky_krb::constants::key_usages::{ACCEPTOR_SEAL, ACCEPTOR_SIGN, INITIATOR_SEAL, INITIATOR_SIGN};
use picky_krb::crypto::{CipherSuite, DecryptWithoutChecksum, EncryptWithoutChecksum};

use super::{concat_with_plaintext, KerberosCipher};
use crate::context::{concat_buffers, concat_sealed, scatter_sealed, Role, SecurityBuffer};
use crate::utils::{rotate_left, rotate_right};
use crate::{Error, ErrorKind, Result};

const TOK_ID_MIC: [u8; 2] = [0x04, 0x04];
const TOK_ID_WRAP: [u8; 2] = [0x05, 0x04];
const FILLER: u8 = 0xff;
const HEADER_SIZE: usize = 16;
const CHECKSUM_SIZE: usize = 12;
/// Header copy and checksum move in front of the cipher text.
const RRC: u16 = (HEADER_SIZE + CHECKSUM_SIZE) as u16;
/// Filler length Windows uses for DCE style wrap tokens.
const DCE_EC: u16 = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TokenFlags: u8 {
        const SENT_BY_ACCEPTOR = 0x01;
        const SEALED = 0x02;
        const ACCEPTOR_SUBKEY = 0x04;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TokenHeader {
    tok_id: [u8; 2],
    flags: TokenFlags,
    ec: u16,
    rrc: u16,
    sequence_number: u64,
}

impl TokenHeader {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(&self.tok_id);
        header.write_u8(self.flags.bits())?;
        if self.tok_id == TOK_ID_WRAP {
            header.write_u8(FILLER)?;
            header.write_u16::<BigEndian>(self.ec)?;
            header.write_u16::<BigEndian>(self.rrc)?;
        } else {
            header.extend_from_slice(&[FILLER; 5]);
        }
        header.write_u64::<BigEndian>(self.sequence_number)?;

        Ok(header)
    }

    fn decode(mut data: &[u8], tok_id: [u8; 2]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::new(ErrorKind::DefectiveToken, "GSS token is shorter than its header"));
        }
        if data[..2] != tok_id {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("unexpected GSS token id {:02x?}", &data[..2]),
            ));
        }
        data = &data[2..];

        let flags = TokenFlags::from_bits(data.read_u8()?)
            .ok_or_else(|| Error::new(ErrorKind::DefectiveToken, "unknown GSS token flags"))?;

        let (ec, rrc) = if tok_id == TOK_ID_WRAP {
            if data.read_u8()? != FILLER {
                return Err(Error::new(ErrorKind::DefectiveToken, "invalid GSS token filler"));
            }
            (data.read_u16::<BigEndian>()?, data.read_u16::<BigEndian>()?)
        } else {
            if data[..5] != [FILLER; 5] {
                return Err(Error::new(ErrorKind::DefectiveToken, "invalid GSS token filler"));
            }
            data = &data[5..];
            (0, 0)
        };

        Ok(Self {
            tok_id,
            flags,
            ec,
            rrc,
            sequence_number: data.read_u64::<BigEndian>()?,
        })
    }
}

fn cipher_suite(cipher: &KerberosCipher) -> Result<CipherSuite> {
    cipher.encryption_type.cipher_suite().ok_or_else(|| {
        Error::new(
            ErrorKind::Failure,
            format!("{} keys do not use RFC 4121 tokens", cipher.encryption_type),
        )
    })
}

fn sender_flags(cipher: &KerberosCipher) -> TokenFlags {
    let mut flags = TokenFlags::empty();
    if cipher.sender == Role::Acceptor {
        flags |= TokenFlags::SENT_BY_ACCEPTOR;
    }
    if cipher.acceptor_subkey {
        flags |= TokenFlags::ACCEPTOR_SUBKEY;
    }

    flags
}

fn seal_key_usage(sender: Role) -> i32 {
    match sender {
        Role::Initiator => INITIATOR_SEAL,
        Role::Acceptor => ACCEPTOR_SEAL,
    }
}

fn sign_key_usage(sender: Role) -> i32 {
    match sender {
        Role::Initiator => INITIATOR_SIGN,
        Role::Acceptor => ACCEPTOR_SIGN,
    }
}

fn check_header(cipher: &KerberosCipher, header: &TokenHeader, expected_sequence_number: u64, sealed: bool) -> Result<()> {
    let sent_by_acceptor = header.flags.contains(TokenFlags::SENT_BY_ACCEPTOR);
    if sent_by_acceptor != (cipher.sender == Role::Acceptor) {
        return Err(Error::new(ErrorKind::BadMic, "GSS token SentByAcceptor flag does not match the sender"));
    }
    if header.flags.contains(TokenFlags::SEALED) != sealed {
        return Err(Error::new(ErrorKind::DefectiveToken, "unexpected GSS token Sealed flag"));
    }
    if header.sequence_number != expected_sequence_number {
        return Err(Error::new(
            ErrorKind::OutOfSequence,
            format!(
                "GSS token sequence number {} is not the expected {}",
                header.sequence_number, expected_sequence_number
            ),
        ));
    }

    Ok(())
}

/// Output layout: `header | rotated(filler, header copy, checksum, confounder)`. The sealed
/// fragments receive the remaining cipher text in place, so they keep their length.
pub(super) fn wrap(cipher: &KerberosCipher, sequence_number: u64, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
    let suite = cipher_suite(cipher)?;
    let key_usage = seal_key_usage(cipher.sender);
    let ec = if cipher.dce_style { DCE_EC } else { 0 };

    let mut header = TokenHeader {
        tok_id: TOK_ID_WRAP,
        flags: sender_flags(cipher) | TokenFlags::SEALED,
        ec,
        rrc: 0,
        sequence_number,
    };
    // the encrypted copy carries a zero RRC
    let inner_header = header.encode()?;
    header.rrc = RRC;

    let filler = vec![FILLER; usize::from(ec)];
    let sealed = concat_sealed(buffers);

    let mut payload = sealed.clone();
    payload.extend_from_slice(&filler);
    payload.extend_from_slice(&inner_header);

    let EncryptWithoutChecksum {
        mut encrypted,
        confounder,
        ..
    } = suite.cipher().encrypt_no_checksum(cipher.key(), key_usage, &payload)?;

    let mut signed = confounder;
    signed.extend_from_slice(&concat_buffers(buffers));
    signed.extend_from_slice(&filler);
    signed.extend_from_slice(&inner_header);
    let checksum = suite.cipher().encryption_checksum(cipher.key(), key_usage, &signed)?;
    encrypted.extend_from_slice(&checksum);

    let rotated = rotate_right(&encrypted, usize::from(RRC + ec));
    let (trailer, data) = rotated.split_at(rotated.len() - sealed.len());
    scatter_sealed(buffers, data)?;

    let mut token = header.encode()?;
    token.extend_from_slice(trailer);

    trace!(sequence_number, token_len = token.len(), "RFC 4121 wrap token");

    Ok(token)
}

pub(super) fn unwrap(
    cipher: &KerberosCipher,
    expected_sequence_number: u64,
    buffers: &mut [SecurityBuffer],
    signature: &[u8],
) -> Result<()> {
    let suite = cipher_suite(cipher)?;
    let key_usage = seal_key_usage(cipher.sender);

    let header = TokenHeader::decode(signature, TOK_ID_WRAP)?;
    check_header(cipher, &header, expected_sequence_number, true)?;

    let sealed = concat_sealed(buffers);
    let mut rotated = signature[HEADER_SIZE..].to_vec();
    rotated.extend_from_slice(&sealed);

    // Windows counts the filler in the rotation of DCE style tokens
    let rotation = if cipher.dce_style {
        usize::from(header.rrc) + usize::from(header.ec)
    } else {
        usize::from(header.rrc)
    };
    let encrypted = rotate_left(&rotated, rotation);

    let DecryptWithoutChecksum {
        plaintext,
        confounder,
        checksum,
        ..
    } = suite.cipher().decrypt_no_checksum(cipher.key(), key_usage, &encrypted)?;

    let ec = usize::from(header.ec);
    if plaintext.len() != sealed.len() + ec + HEADER_SIZE {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            "GSS wrap token does not match the length of the sealed fragments",
        ));
    }
    let (data, rest) = plaintext.split_at(sealed.len());
    let (filler, inner_header) = rest.split_at(ec);

    // the RRC of the encrypted copy is not compared, implementations disagree on it
    let mut expected_inner_header = header.encode()?;
    expected_inner_header[6..8].copy_from_slice(&inner_header[6..8]);
    if inner_header != expected_inner_header.as_slice() {
        return Err(Error::new(ErrorKind::BadMic, "GSS wrap token header was altered"));
    }

    let mut signed = confounder;
    signed.extend_from_slice(&concat_with_plaintext(buffers, data)?);
    signed.extend_from_slice(filler);
    signed.extend_from_slice(inner_header);

    if suite.cipher().encryption_checksum(cipher.key(), key_usage, &signed)? != checksum {
        return Err(Error::new(ErrorKind::BadMic, "GSS wrap token checksum mismatch"));
    }

    scatter_sealed(buffers, data)
}

fn mic_checksum(cipher: &KerberosCipher, buffers: &[SecurityBuffer], header: &[u8]) -> Result<Vec<u8>> {
    let suite = cipher_suite(cipher)?;

    let mut payload = concat_buffers(buffers);
    payload.extend_from_slice(header);

    Ok(suite
        .cipher()
        .checksum_type()
        .hasher()
        .checksum(cipher.key(), sign_key_usage(cipher.sender), &payload)?)
}

pub(super) fn sign(cipher: &KerberosCipher, sequence_number: u64, buffers: &[SecurityBuffer]) -> Result<Vec<u8>> {
    let header = TokenHeader {
        tok_id: TOK_ID_MIC,
        flags: sender_flags(cipher),
        ec: 0,
        rrc: 0,
        sequence_number,
    }
    .encode()?;

    let mut token = header.clone();
    token.extend_from_slice(&mic_checksum(cipher, buffers, &header)?);

    Ok(token)
}

pub(super) fn verify(
    cipher: &KerberosCipher,
    expected_sequence_number: u64,
    buffers: &[SecurityBuffer],
    signature: &[u8],
) -> Result<()> {
    let header = TokenHeader::decode(signature, TOK_ID_MIC)?;
    check_header(cipher, &header, expected_sequence_number, false)?;

    let checksum = &signature[HEADER_SIZE..];
    if checksum.len() != CHECKSUM_SIZE {
        return Err(Error::new(ErrorKind::DefectiveToken, "invalid GSS MIC token checksum length"));
    }

    if mic_checksum(cipher, buffers, &signature[..HEADER_SIZE])? != checksum {
        return Err(Error::new(ErrorKind::BadMic, "GSS MIC token checksum mismatch"));
    }

    Ok(())
}
