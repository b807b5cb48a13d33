use std::io::Write;

use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt};

use crate::crypto::HASH_SIZE;
use crate::{Error, ErrorKind, Result};

pub const AV_PAIR_EOL: u16 = 0;
pub const AV_PAIR_NB_COMPUTER_NAME: u16 = 1;
pub const AV_PAIR_NB_DOMAIN_NAME: u16 = 2;
pub const AV_PAIR_DNS_COMPUTER_NAME: u16 = 3;
pub const AV_PAIR_DNS_DOMAIN_NAME: u16 = 4;
pub const AV_PAIR_DNS_TREE_NAME: u16 = 5;
pub const AV_PAIR_FLAGS: u16 = 6;
pub const AV_PAIR_TIMESTAMP: u16 = 7;
pub const AV_PAIR_SINGLE_HOST: u16 = 8;
pub const AV_PAIR_TARGET_NAME: u16 = 9;
pub const AV_PAIR_CHANNEL_BINDINGS: u16 = 10;

const AV_PAIR_HEADER_SIZE: usize = 4;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MsvAvFlags: u32 {
        const ACCOUNT_AUTHENTICATION_CONSTRAINED = 0x0000_0001;
        const MESSAGE_INTEGRITY_CHECK = 0x0000_0002;
        const TARGET_SPN_FROM_UNTRUSTED_SOURCE = 0x0000_0004;
    }
}

/// One `MsvAv*` attribute of a target info list, keyed by its wire id.
///
/// Name values are kept as the UTF-16LE bytes found on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvPair {
    EOL,
    NbComputerName(Vec<u8>),
    NbDomainName(Vec<u8>),
    DnsComputerName(Vec<u8>),
    DnsDomainName(Vec<u8>),
    DnsTreeName(Vec<u8>),
    Flags(u32),
    Timestamp(u64),
    SingleHost(Vec<u8>),
    TargetName(Vec<u8>),
    ChannelBindings([u8; HASH_SIZE]),
    Other(u16, Vec<u8>),
}

fn fixed_value<const N: usize>(id: u16, value: &[u8]) -> Result<[u8; N]> {
    value.try_into().map_err(|_| {
        Error::new(
            ErrorKind::DefectiveToken,
            format!("AV pair {} must be {} bytes long, got {}", id, N, value.len()),
        )
    })
}

impl AvPair {
    pub fn id(&self) -> u16 {
        match self {
            AvPair::EOL => AV_PAIR_EOL,
            AvPair::NbComputerName(_) => AV_PAIR_NB_COMPUTER_NAME,
            AvPair::NbDomainName(_) => AV_PAIR_NB_DOMAIN_NAME,
            AvPair::DnsComputerName(_) => AV_PAIR_DNS_COMPUTER_NAME,
            AvPair::DnsDomainName(_) => AV_PAIR_DNS_DOMAIN_NAME,
            AvPair::DnsTreeName(_) => AV_PAIR_DNS_TREE_NAME,
            AvPair::Flags(_) => AV_PAIR_FLAGS,
            AvPair::Timestamp(_) => AV_PAIR_TIMESTAMP,
            AvPair::SingleHost(_) => AV_PAIR_SINGLE_HOST,
            AvPair::TargetName(_) => AV_PAIR_TARGET_NAME,
            AvPair::ChannelBindings(_) => AV_PAIR_CHANNEL_BINDINGS,
            AvPair::Other(id, _) => *id,
        }
    }

    fn from_wire(id: u16, value: &[u8]) -> Result<Self> {
        Ok(match id {
            AV_PAIR_EOL => AvPair::EOL,
            AV_PAIR_NB_COMPUTER_NAME => AvPair::NbComputerName(value.to_vec()),
            AV_PAIR_NB_DOMAIN_NAME => AvPair::NbDomainName(value.to_vec()),
            AV_PAIR_DNS_COMPUTER_NAME => AvPair::DnsComputerName(value.to_vec()),
            AV_PAIR_DNS_DOMAIN_NAME => AvPair::DnsDomainName(value.to_vec()),
            AV_PAIR_DNS_TREE_NAME => AvPair::DnsTreeName(value.to_vec()),
            AV_PAIR_FLAGS => AvPair::Flags(u32::from_le_bytes(fixed_value(id, value)?)),
            AV_PAIR_TIMESTAMP => AvPair::Timestamp(u64::from_le_bytes(fixed_value(id, value)?)),
            AV_PAIR_SINGLE_HOST => AvPair::SingleHost(value.to_vec()),
            AV_PAIR_TARGET_NAME => AvPair::TargetName(value.to_vec()),
            AV_PAIR_CHANNEL_BINDINGS => AvPair::ChannelBindings(fixed_value(id, value)?),
            other => AvPair::Other(other, value.to_vec()),
        })
    }

    fn value(&self) -> Vec<u8> {
        match self {
            AvPair::EOL => Vec::new(),
            AvPair::NbComputerName(value)
            | AvPair::NbDomainName(value)
            | AvPair::DnsComputerName(value)
            | AvPair::DnsDomainName(value)
            | AvPair::DnsTreeName(value)
            | AvPair::SingleHost(value)
            | AvPair::TargetName(value)
            | AvPair::Other(_, value) => value.clone(),
            AvPair::Flags(value) => value.to_le_bytes().to_vec(),
            AvPair::Timestamp(value) => value.to_le_bytes().to_vec(),
            AvPair::ChannelBindings(hash) => hash.to_vec(),
        }
    }

    /// Parses a target info list up to and excluding `MsvAvEOL`.
    pub fn buffer_to_av_pairs(mut buffer: &[u8]) -> Result<Vec<AvPair>> {
        let mut av_pairs = Vec::new();

        while !buffer.is_empty() {
            if buffer.len() < AV_PAIR_HEADER_SIZE {
                return Err(Error::new(ErrorKind::DefectiveToken, "AV pair header is truncated"));
            }

            let id = u16::from_le_bytes([buffer[0], buffer[1]]);
            let len = usize::from(u16::from_le_bytes([buffer[2], buffer[3]]));
            let value = buffer
                .get(AV_PAIR_HEADER_SIZE..AV_PAIR_HEADER_SIZE + len)
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::DefectiveToken,
                        format!("AV pair {} declares {} bytes but only {} remain", id, len, buffer.len()),
                    )
                })?;

            if id == AV_PAIR_EOL {
                break;
            }

            av_pairs.push(AvPair::from_wire(id, value)?);
            buffer = &buffer[AV_PAIR_HEADER_SIZE + len..];
        }

        Ok(av_pairs)
    }

    /// Serializes `av_pairs` and terminates the list with `MsvAvEOL`.
    pub fn list_to_buffer(av_pairs: &[AvPair]) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();

        for av_pair in av_pairs.iter().filter(|av_pair| **av_pair != AvPair::EOL) {
            let value = av_pair.value();
            let len = u16::try_from(value.len())
                .map_err(|_| Error::new(ErrorKind::InvalidParameter, "AV pair value is too long"))?;

            buffer.write_u16::<LittleEndian>(av_pair.id())?;
            buffer.write_u16::<LittleEndian>(len)?;
            buffer.write_all(&value)?;
        }
        buffer.write_u32::<LittleEndian>(0)?; // MsvAvEOL

        Ok(buffer)
    }
}

pub fn find_timestamp(av_pairs: &[AvPair]) -> Option<u64> {
    av_pairs.iter().find_map(|av_pair| match av_pair {
        AvPair::Timestamp(timestamp) => Some(*timestamp),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn av_pairs_survive_a_round_trip() {
        let av_pairs = vec![
            AvPair::NbDomainName(crate::utils::string_to_utf16("DOMAIN")),
            AvPair::Flags(MsvAvFlags::MESSAGE_INTEGRITY_CHECK.bits()),
            AvPair::Timestamp(0x01d8_0000_1234_5678),
            AvPair::ChannelBindings([7; HASH_SIZE]),
            AvPair::Other(0x42, vec![1, 2, 3]),
        ];

        let buffer = AvPair::list_to_buffer(&av_pairs).unwrap();

        assert_eq!(&buffer[buffer.len() - 4..], &[0, 0, 0, 0]);
        assert_eq!(AvPair::buffer_to_av_pairs(&buffer).unwrap(), av_pairs);
        assert_eq!(find_timestamp(&av_pairs), Some(0x01d8_0000_1234_5678));
    }

    #[test]
    fn overlong_value_is_rejected() {
        let buffer = [0x02, 0x00, 0xff, 0x00, 0x41, 0x00];

        let err = AvPair::buffer_to_av_pairs(&buffer).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::DefectiveToken);
    }

    #[test]
    fn timestamp_of_wrong_size_is_rejected() {
        let buffer = [0x07, 0x00, 0x02, 0x00, 0x01, 0x02];

        assert!(AvPair::buffer_to_av_pairs(&buffer).is_err());
    }
}
