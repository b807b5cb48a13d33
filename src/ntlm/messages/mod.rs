//! NEGOTIATE, CHALLENGE and AUTHENTICATE message codecs.

pub mod av_pair;
pub(crate) mod computations;

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{NegotiateFlags, CHALLENGE_SIZE, MESSAGE_INTEGRITY_CHECK_SIZE, NTLM_VERSION_SIZE};
use crate::{Error, ErrorKind, Result};

pub const NTLM_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

pub(crate) const CLIENT_SIGN_MAGIC: &[u8] = b"session key to client-to-server signing key magic constant\0";
pub(crate) const SERVER_SIGN_MAGIC: &[u8] = b"session key to server-to-client signing key magic constant\0";
pub(crate) const CLIENT_SEAL_MAGIC: &[u8] = b"session key to client-to-server sealing key magic constant\0";
pub(crate) const SERVER_SEAL_MAGIC: &[u8] = b"session key to server-to-client sealing key magic constant\0";

const NEGOTIATE_HEADER_SIZE: usize = 32;
const CHALLENGE_HEADER_SIZE: usize = 48;
const AUTHENTICATE_HEADER_SIZE: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum MessageTypes {
    Negotiate = 1,
    Challenge = 2,
    Authenticate = 3,
}

/// A `(len, max_len, offset)` triple and the payload it points to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MessageFields {
    buffer: Vec<u8>,
    buffer_offset: u32,
}

impl MessageFields {
    fn with_buffer(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            buffer_offset: 0,
        }
    }

    fn write_to(&self, mut buffer: impl Write) -> Result<()> {
        let len = u16::try_from(self.buffer.len())
            .map_err(|_| Error::new(ErrorKind::InvalidParameter, "NTLM message field is too long"))?;

        buffer.write_u16::<LittleEndian>(len)?; // len 2 bytes
        buffer.write_u16::<LittleEndian>(len)?; // max len 2 bytes
        buffer.write_u32::<LittleEndian>(self.buffer_offset)?; // offset 4 bytes

        Ok(())
    }

    /// Reads the triple and copies the payload out of `message`, checking the declared
    /// range against the message before anything is allocated.
    fn read_from(header: &mut impl Read, message: &[u8]) -> Result<Self> {
        let len = usize::from(header.read_u16::<LittleEndian>()?);
        let _max_len = header.read_u16::<LittleEndian>()?;
        let buffer_offset = header.read_u32::<LittleEndian>()?;

        if len == 0 {
            return Ok(Self {
                buffer: Vec::new(),
                buffer_offset,
            });
        }

        let start = buffer_offset as usize;
        let buffer = start
            .checked_add(len)
            .and_then(|end| message.get(start..end))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::DefectiveToken,
                    format!(
                        "NTLM field of {} bytes at offset {} exceeds the {} byte message",
                        len,
                        start,
                        message.len()
                    ),
                )
            })?;

        Ok(Self {
            buffer: buffer.to_vec(),
            buffer_offset,
        })
    }
}

/// Lays out payload fields one after another starting at `offset`.
fn assign_offsets<'a>(offset: usize, fields: impl IntoIterator<Item = &'a mut MessageFields>) -> Result<usize> {
    let mut offset = offset;
    for field in fields {
        field.buffer_offset = u32::try_from(offset)
            .map_err(|_| Error::new(ErrorKind::InvalidParameter, "NTLM message is too long"))?;
        offset += field.buffer.len();
    }

    Ok(offset)
}

fn read_ntlm_header(stream: &mut impl Read, expected_message_type: MessageTypes) -> Result<()> {
    let mut signature = [0x00; NTLM_SIGNATURE.len()];
    stream.read_exact(signature.as_mut())?;
    let message_type = stream.read_u32::<LittleEndian>()?;

    if signature.as_ref() != NTLM_SIGNATURE {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            format!("read NTLM signature is invalid: {:?}", signature),
        ));
    }
    if message_type != expected_message_type as u32 {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            format!(
                "message type is invalid: {} != expected ({:?})",
                message_type, expected_message_type
            ),
        ));
    }

    Ok(())
}

fn write_ntlm_header(buffer: &mut impl Write, message_type: MessageTypes) -> io::Result<()> {
    buffer.write_all(NTLM_SIGNATURE)?;
    buffer.write_u32::<LittleEndian>(message_type as u32)
}

fn try_read_version(flags: NegotiateFlags, stream: &mut impl Read) -> Result<Option<[u8; NTLM_VERSION_SIZE]>> {
    if flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION) {
        let mut version = [0x00; NTLM_VERSION_SIZE];
        stream.read_exact(version.as_mut()).map_err(truncated)?;

        Ok(Some(version))
    } else {
        Ok(None)
    }
}

fn truncated(err: io::Error) -> Error {
    Error::new(ErrorKind::DefectiveToken, format!("NTLM message is truncated: {}", err))
}

fn check_min_len(message: &[u8], min_len: usize, name: &str) -> Result<()> {
    if message.len() < min_len {
        Err(Error::new(
            ErrorKind::DefectiveToken,
            format!("{} message is too short: {} bytes", name, message.len()),
        ))
    } else {
        Ok(())
    }
}

/// Flags read off the wire. Unknown bits are kept.
fn read_flags(stream: &mut impl Read) -> Result<NegotiateFlags> {
    Ok(NegotiateFlags::from_bits_retain(stream.read_u32::<LittleEndian>()?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateMessage {
    pub flags: NegotiateFlags,
    /// OEM domain name.
    pub domain: Vec<u8>,
    /// OEM workstation name.
    pub workstation: Vec<u8>,
    pub version: Option<[u8; NTLM_VERSION_SIZE]>,
}

impl NegotiateMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut domain = MessageFields::with_buffer(self.domain.clone());
        let mut workstation = MessageFields::with_buffer(self.workstation.clone());
        let header_len = NEGOTIATE_HEADER_SIZE + self.version.map_or(0, |_| NTLM_VERSION_SIZE);
        let total_len = assign_offsets(header_len, [&mut domain, &mut workstation])?;

        let mut buffer = Vec::with_capacity(total_len);
        write_ntlm_header(&mut buffer, MessageTypes::Negotiate)?;
        buffer.write_u32::<LittleEndian>(self.flags.bits())?;
        domain.write_to(&mut buffer)?;
        workstation.write_to(&mut buffer)?;
        if let Some(version) = self.version {
            buffer.write_all(&version)?;
        }
        buffer.extend_from_slice(&domain.buffer);
        buffer.extend_from_slice(&workstation.buffer);

        Ok(buffer)
    }

    pub fn from_bytes(message: &[u8]) -> Result<Self> {
        check_min_len(message, NEGOTIATE_HEADER_SIZE, "NEGOTIATE")?;
        let mut stream = message;

        read_ntlm_header(&mut stream, MessageTypes::Negotiate)?;
        let flags = read_flags(&mut stream)?;
        let domain = MessageFields::read_from(&mut stream, message)?;
        let workstation = MessageFields::read_from(&mut stream, message)?;
        let version = try_read_version(flags, &mut stream)?;

        Ok(Self {
            flags,
            domain: domain.buffer,
            workstation: workstation.buffer,
            version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub target_name: Vec<u8>,
    pub flags: NegotiateFlags,
    pub server_challenge: [u8; CHALLENGE_SIZE],
    /// Raw AV pair list.
    pub target_info: Vec<u8>,
    pub version: Option<[u8; NTLM_VERSION_SIZE]>,
}

impl ChallengeMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut target_name = MessageFields::with_buffer(self.target_name.clone());
        let mut target_info = MessageFields::with_buffer(self.target_info.clone());
        let header_len = CHALLENGE_HEADER_SIZE + self.version.map_or(0, |_| NTLM_VERSION_SIZE);
        let total_len = assign_offsets(header_len, [&mut target_name, &mut target_info])?;

        let mut buffer = Vec::with_capacity(total_len);
        write_ntlm_header(&mut buffer, MessageTypes::Challenge)?;
        target_name.write_to(&mut buffer)?;
        buffer.write_u32::<LittleEndian>(self.flags.bits())?;
        buffer.write_all(&self.server_challenge)?;
        buffer.write_u64::<LittleEndian>(0)?; // reserved
        target_info.write_to(&mut buffer)?;
        if let Some(version) = self.version {
            buffer.write_all(&version)?;
        }
        buffer.extend_from_slice(&target_name.buffer);
        buffer.extend_from_slice(&target_info.buffer);

        Ok(buffer)
    }

    pub fn from_bytes(message: &[u8]) -> Result<Self> {
        check_min_len(message, CHALLENGE_HEADER_SIZE, "CHALLENGE")?;
        let mut stream = message;

        read_ntlm_header(&mut stream, MessageTypes::Challenge)?;
        let target_name = MessageFields::read_from(&mut stream, message)?;
        let flags = read_flags(&mut stream)?;
        let mut server_challenge = [0x00; CHALLENGE_SIZE];
        stream.read_exact(&mut server_challenge)?;
        let _reserved = stream.read_u64::<LittleEndian>()?;
        let target_info = MessageFields::read_from(&mut stream, message)?;
        let version = try_read_version(flags, &mut stream)?;

        Ok(Self {
            target_name: target_name.buffer,
            flags,
            server_challenge,
            target_info: target_info.buffer,
            version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateMessage {
    pub lm_challenge_response: Vec<u8>,
    pub nt_challenge_response: Vec<u8>,
    pub domain: Vec<u8>,
    pub user: Vec<u8>,
    pub workstation: Vec<u8>,
    pub encrypted_random_session_key: Vec<u8>,
    pub flags: NegotiateFlags,
    pub version: Option<[u8; NTLM_VERSION_SIZE]>,
    pub mic: Option<[u8; MESSAGE_INTEGRITY_CHECK_SIZE]>,
}

impl AuthenticateMessage {
    /// Offset of the MIC inside the marshaled message.
    pub fn mic_offset(&self) -> usize {
        AUTHENTICATE_HEADER_SIZE + self.version.map_or(0, |_| NTLM_VERSION_SIZE)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut lm = MessageFields::with_buffer(self.lm_challenge_response.clone());
        let mut nt = MessageFields::with_buffer(self.nt_challenge_response.clone());
        let mut domain = MessageFields::with_buffer(self.domain.clone());
        let mut user = MessageFields::with_buffer(self.user.clone());
        let mut workstation = MessageFields::with_buffer(self.workstation.clone());
        let mut session_key = MessageFields::with_buffer(self.encrypted_random_session_key.clone());

        let header_len = self.mic_offset() + self.mic.map_or(0, |_| MESSAGE_INTEGRITY_CHECK_SIZE);
        let total_len = assign_offsets(
            header_len,
            [
                &mut domain,
                &mut user,
                &mut workstation,
                &mut lm,
                &mut nt,
                &mut session_key,
            ],
        )?;

        let mut buffer = Vec::with_capacity(total_len);
        write_ntlm_header(&mut buffer, MessageTypes::Authenticate)?;
        lm.write_to(&mut buffer)?;
        nt.write_to(&mut buffer)?;
        domain.write_to(&mut buffer)?;
        user.write_to(&mut buffer)?;
        workstation.write_to(&mut buffer)?;
        session_key.write_to(&mut buffer)?;
        buffer.write_u32::<LittleEndian>(self.flags.bits())?;
        if let Some(version) = self.version {
            buffer.write_all(&version)?;
        }
        if let Some(mic) = self.mic {
            buffer.write_all(&mic)?;
        }
        for field in [&domain, &user, &workstation, &lm, &nt, &session_key] {
            buffer.extend_from_slice(&field.buffer);
        }

        Ok(buffer)
    }

    pub fn from_bytes(message: &[u8]) -> Result<Self> {
        check_min_len(message, AUTHENTICATE_HEADER_SIZE, "AUTHENTICATE")?;
        let mut stream = message;

        read_ntlm_header(&mut stream, MessageTypes::Authenticate)?;
        let lm = MessageFields::read_from(&mut stream, message)?;
        let nt = MessageFields::read_from(&mut stream, message)?;
        let domain = MessageFields::read_from(&mut stream, message)?;
        let user = MessageFields::read_from(&mut stream, message)?;
        let workstation = MessageFields::read_from(&mut stream, message)?;
        let session_key = MessageFields::read_from(&mut stream, message)?;
        let flags = read_flags(&mut stream)?;
        let version = try_read_version(flags, &mut stream)?;

        // the MIC is present when the payload starts after room for it
        let mic_offset = AUTHENTICATE_HEADER_SIZE + version.map_or(0, |_| NTLM_VERSION_SIZE);
        let payload_start = [&lm, &nt, &domain, &user, &workstation, &session_key]
            .iter()
            .filter(|field| !field.buffer.is_empty())
            .map(|field| field.buffer_offset as usize)
            .min()
            .unwrap_or(message.len());
        let mic = if payload_start >= mic_offset + MESSAGE_INTEGRITY_CHECK_SIZE {
            let mut mic = [0x00; MESSAGE_INTEGRITY_CHECK_SIZE];
            stream.read_exact(&mut mic).map_err(truncated)?;
            Some(mic)
        } else {
            None
        };

        Ok(Self {
            lm_challenge_response: lm.buffer,
            nt_challenge_response: nt.buffer,
            domain: domain.buffer,
            user: user.buffer,
            workstation: workstation.buffer,
            encrypted_random_session_key: session_key.buffer,
            flags,
            version,
            mic,
        })
    }
}
