//! `NL_AUTH_MESSAGE`, the only token the Netlogon security provider exchanges.

use std::io::{Cursor, Read, Write};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{Error, ErrorKind, Result};

pub const NEGOTIATE_REQUEST: u32 = 0x0000_0000;
pub const NEGOTIATE_RESPONSE: u32 = 0x0000_0001;
/// Message type, flags and a 4-byte buffer.
pub const NEGOTIATE_RESPONSE_SIZE: usize = 12;

const HEADER_SIZE: usize = 8;
const MAX_LABEL_SIZE: usize = 63;

bitflags! {
    /// Which name fields follow the header, in bit order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuthMessageFlags: u32 {
        /// OEM, NUL terminated.
        const NETBIOS_DOMAIN_NAME = 0x0000_0001;
        /// OEM, NUL terminated.
        const NETBIOS_COMPUTER_NAME = 0x0000_0002;
        /// UTF-8, compressed as in RFC 1035.
        const DNS_DOMAIN_NAME = 0x0000_0004;
        /// UTF-8, compressed as in RFC 1035.
        const DNS_HOST_NAME = 0x0000_0008;
        /// UTF-8, compressed as in RFC 1035.
        const NETBIOS_COMPUTER_NAME_UTF8 = 0x0000_0010;
    }
}

/// [NL_AUTH_MESSAGE](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-nrpc/76c93227-942a-4687-ab9d-9d972ffabdab)
/// of type negotiate request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NegotiateMessage {
    pub netbios_domain_name: Option<String>,
    pub netbios_computer_name: Option<String>,
    pub dns_domain_name: Option<String>,
    pub dns_host_name: Option<String>,
    pub netbios_computer_name_utf8: Option<String>,
}

impl NegotiateMessage {
    pub fn flags(&self) -> AuthMessageFlags {
        let mut flags = AuthMessageFlags::empty();

        for (field, flag) in [
            (&self.netbios_domain_name, AuthMessageFlags::NETBIOS_DOMAIN_NAME),
            (&self.netbios_computer_name, AuthMessageFlags::NETBIOS_COMPUTER_NAME),
            (&self.dns_domain_name, AuthMessageFlags::DNS_DOMAIN_NAME),
            (&self.dns_host_name, AuthMessageFlags::DNS_HOST_NAME),
            (&self.netbios_computer_name_utf8, AuthMessageFlags::NETBIOS_COMPUTER_NAME_UTF8),
        ] {
            if field.is_some() {
                flags |= flag;
            }
        }

        flags
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(HEADER_SIZE + 64);
        buffer.write_u32::<LittleEndian>(NEGOTIATE_REQUEST)?;
        buffer.write_u32::<LittleEndian>(self.flags().bits())?;

        if let Some(name) = &self.netbios_domain_name {
            write_oem_string(&mut buffer, name)?;
        }
        if let Some(name) = &self.netbios_computer_name {
            write_oem_string(&mut buffer, name)?;
        }
        for name in [
            &self.dns_domain_name,
            &self.dns_host_name,
            &self.netbios_computer_name_utf8,
        ]
        .into_iter()
        .flatten()
        {
            write_compressed_name(&mut buffer, name)?;
        }

        Ok(buffer)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let message_type = read_u32(&mut cursor)?;
        if message_type != NEGOTIATE_REQUEST {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("expected a negotiate request, got message type {}", message_type),
            ));
        }

        let flags = AuthMessageFlags::from_bits(read_u32(&mut cursor)?)
            .ok_or_else(|| Error::new(ErrorKind::DefectiveToken, "unknown NL_AUTH_MESSAGE flags"))?;

        let mut message = NegotiateMessage::default();
        if flags.contains(AuthMessageFlags::NETBIOS_DOMAIN_NAME) {
            message.netbios_domain_name = Some(read_oem_string(&mut cursor)?);
        }
        if flags.contains(AuthMessageFlags::NETBIOS_COMPUTER_NAME) {
            message.netbios_computer_name = Some(read_oem_string(&mut cursor)?);
        }
        if flags.contains(AuthMessageFlags::DNS_DOMAIN_NAME) {
            message.dns_domain_name = Some(read_compressed_name(&mut cursor)?);
        }
        if flags.contains(AuthMessageFlags::DNS_HOST_NAME) {
            message.dns_host_name = Some(read_compressed_name(&mut cursor)?);
        }
        if flags.contains(AuthMessageFlags::NETBIOS_COMPUTER_NAME_UTF8) {
            message.netbios_computer_name_utf8 = Some(read_compressed_name(&mut cursor)?);
        }

        Ok(message)
    }
}

/// Accepts only the fixed negotiate response: type 1 with no flags.
pub fn check_negotiate_response(data: &[u8]) -> Result<()> {
    if data.len() != NEGOTIATE_RESPONSE_SIZE {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            format!(
                "Netlogon negotiate response must be {} bytes, got {}",
                NEGOTIATE_RESPONSE_SIZE,
                data.len()
            ),
        ));
    }

    let mut cursor = Cursor::new(data);
    let message_type = read_u32(&mut cursor)?;
    let flags = read_u32(&mut cursor)?;

    if message_type != NEGOTIATE_RESPONSE || flags != 0 {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            format!(
                "unexpected Netlogon negotiate response: type {}, flags {:#x}",
                message_type, flags
            ),
        ));
    }

    Ok(())
}

/// The response a server sends, used by loopback tests and simulated peers.
pub fn negotiate_response() -> [u8; NEGOTIATE_RESPONSE_SIZE] {
    let mut response = [0x00; NEGOTIATE_RESPONSE_SIZE];
    response[..4].copy_from_slice(&NEGOTIATE_RESPONSE.to_le_bytes());

    response
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::new(ErrorKind::DefectiveToken, "truncated NL_AUTH_MESSAGE header"))
}

fn write_oem_string(buffer: &mut Vec<u8>, value: &str) -> Result<()> {
    if !value.is_ascii() || value.contains('\0') {
        return Err(Error::new(
            ErrorKind::InvalidParameter,
            format!("{:?} cannot be sent as an OEM string", value),
        ));
    }

    buffer.write_all(value.as_bytes())?;
    buffer.write_u8(0)?;

    Ok(())
}

fn read_oem_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let data = *cursor.get_ref();
    let start = cursor.position() as usize;
    let len = data[start..]
        .iter()
        .position(|byte| *byte == 0)
        .ok_or_else(|| Error::new(ErrorKind::DefectiveToken, "OEM name is not NUL terminated"))?;

    let value = std::str::from_utf8(&data[start..start + len])?.to_owned();
    cursor.set_position((start + len + 1) as u64);

    Ok(value)
}

fn write_compressed_name(buffer: &mut Vec<u8>, name: &str) -> Result<()> {
    for label in name.split('.').filter(|label| !label.is_empty()) {
        if label.len() > MAX_LABEL_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!("DNS label {:?} is longer than {} bytes", label, MAX_LABEL_SIZE),
            ));
        }

        // checked above
        buffer.write_u8(label.len() as u8)?;
        buffer.write_all(label.as_bytes())?;
    }
    buffer.write_u8(0)?;

    Ok(())
}

fn read_compressed_name(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let mut labels = Vec::new();

    loop {
        let len = usize::from(
            cursor
                .read_u8()
                .map_err(|_| Error::new(ErrorKind::DefectiveToken, "DNS name is not terminated"))?,
        );
        if len == 0 {
            break;
        }
        if len > MAX_LABEL_SIZE {
            // pointers cannot appear in a standalone message
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("invalid DNS label length {:#x}", len),
            ));
        }

        let mut label = vec![0x00; len];
        cursor
            .read_exact(&mut label)
            .map_err(|_| Error::new(ErrorKind::DefectiveToken, "truncated DNS label"))?;
        labels.push(String::from_utf8(label).map_err(|err| {
            Error::new(ErrorKind::DefectiveToken, format!("DNS label is not UTF-8: {}", err))
        })?);
    }

    Ok(labels.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_request_layout() {
        let message = NegotiateMessage {
            netbios_domain_name: Some("CONTOSO".to_owned()),
            netbios_computer_name: Some("WS01".to_owned()),
            dns_domain_name: Some("contoso.com".to_owned()),
            ..Default::default()
        };

        let bytes = message.to_bytes().unwrap();

        let mut expected = vec![0, 0, 0, 0, 0x07, 0, 0, 0];
        expected.extend_from_slice(b"CONTOSO\0WS01\0");
        expected.extend_from_slice(b"\x07contoso\x03com\x00");
        assert_eq!(bytes, expected);
        assert_eq!(NegotiateMessage::from_bytes(&bytes).unwrap(), message);
    }

    #[test]
    fn only_the_fixed_response_is_accepted() {
        check_negotiate_response(&negotiate_response()).unwrap();

        let mut with_flags = negotiate_response();
        with_flags[4] = 0x01;
        let mut too_long = negotiate_response().to_vec();
        too_long.push(0x00);

        for response in [&with_flags[..], &too_long[..], &negotiate_response()[..8]] {
            let err = check_negotiate_response(response).unwrap_err();
            assert_eq!(err.error_type, ErrorKind::DefectiveToken);
        }
    }

    #[test]
    fn truncated_names_are_defective() {
        let mut data = vec![0, 0, 0, 0, 0x05, 0, 0, 0];
        data.extend_from_slice(b"CONTOSO\0\x04ws");

        let err = NegotiateMessage::from_bytes(&data).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::DefectiveToken);
        assert!(NegotiateMessage::from_bytes(&data[..6]).is_err());
    }

    #[test]
    fn non_oem_names_are_refused() {
        let message = NegotiateMessage {
            netbios_computer_name: Some("POSTE-É".to_owned()),
            ..Default::default()
        };

        assert_eq!(message.to_bytes().unwrap_err().error_type, ErrorKind::InvalidParameter);
    }
}
