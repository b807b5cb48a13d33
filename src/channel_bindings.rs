use byteorder::{LittleEndian, WriteBytesExt};

use crate::crypto::{compute_md5, HASH_SIZE};
use crate::{Error, ErrorKind, Result};

// size of SEC_CHANNEL_BINDINGS structure
const SEC_CHANNEL_BINDINGS_SIZE: usize = 32;

/// [SEC_CHANNEL_BINDINGS](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-sec_channel_bindings)
///
/// Carried into the NTLM `MsvAvChannelBindings` pair and the Kerberos authenticator checksum
/// as a 16-byte MD5 digest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelBindings {
    pub initiator_addr_type: u32,
    pub initiator: Vec<u8>,
    pub acceptor_addr_type: u32,
    pub acceptor: Vec<u8>,
    pub application_data: Vec<u8>,
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);

    u32::from_le_bytes(bytes)
}

/// Reads a `(length, offset)` pair at `header_offset` and returns the referenced bytes.
fn read_field(data: &[u8], header_offset: usize, name: &str) -> Result<Vec<u8>> {
    let len = read_u32(data, header_offset) as usize;
    let offset = read_u32(data, header_offset + 4) as usize;

    let end = offset.checked_add(len).filter(|end| *end <= data.len()).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidParameter,
            format!(
                "Invalid SEC_CHANNEL_BINDINGS buffer: {} offset {} + len {} goes outside the buffer ({})",
                name,
                offset,
                len,
                data.len()
            ),
        )
    })?;

    Ok(if len > 0 { data[offset..end].to_vec() } else { Vec::new() })
}

impl ChannelBindings {
    /// Bindings that carry only application data, e.g. `tls-server-end-point:<hash>`.
    pub fn from_application_data(application_data: impl Into<Vec<u8>>) -> Self {
        Self {
            application_data: application_data.into(),
            ..Default::default()
        }
    }

    pub fn from_bytes<T: AsRef<[u8]>>(data: T) -> Result<Self> {
        let data = data.as_ref();

        if data.len() < SEC_CHANNEL_BINDINGS_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!(
                    "Invalid SEC_CHANNEL_BINDINGS buffer: buffer is too short: {}. Minimum len: {}",
                    data.len(),
                    SEC_CHANNEL_BINDINGS_SIZE,
                ),
            ));
        }

        Ok(Self {
            initiator_addr_type: read_u32(data, 0),
            initiator: read_field(data, 4, "initiator")?,
            acceptor_addr_type: read_u32(data, 12),
            acceptor: read_field(data, 16, "acceptor")?,
            application_data: read_field(data, 24, "application")?,
        })
    }

    /// MD5 of the flattened `gss_channel_bindings_struct` (RFC 4121 section 4.1.1.2).
    pub fn gss_hash(&self) -> [u8; HASH_SIZE] {
        let mut flat = Vec::with_capacity(20 + self.initiator.len() + self.acceptor.len() + self.application_data.len());

        // writes into a Vec cannot fail
        let _ = flat.write_u32::<LittleEndian>(self.initiator_addr_type);
        let _ = flat.write_u32::<LittleEndian>(self.initiator.len() as u32);
        flat.extend_from_slice(&self.initiator);
        let _ = flat.write_u32::<LittleEndian>(self.acceptor_addr_type);
        let _ = flat.write_u32::<LittleEndian>(self.acceptor.len() as u32);
        flat.extend_from_slice(&self.acceptor);
        let _ = flat.write_u32::<LittleEndian>(self.application_data.len() as u32);
        flat.extend_from_slice(&self.application_data);

        compute_md5(&flat)
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelBindings;
    use crate::crypto::compute_md5;

    fn application_buffer(application_len: usize, application_offset: u32) -> [u8; 36] {
        let mut buffer = [0; 36];

        buffer[24..28].copy_from_slice(&(application_len as u32).to_le_bytes());
        buffer[28..32].copy_from_slice(&application_offset.to_le_bytes());
        buffer[32..].copy_from_slice(&[1, 2, 3, 4]);

        buffer
    }

    #[test]
    fn from_bytes() {
        let channel_bindings = ChannelBindings::from_bytes(application_buffer(4, 32)).unwrap();

        assert_eq!(channel_bindings, ChannelBindings::from_application_data(vec![1, 2, 3, 4]));
    }

    #[test]
    fn too_small_buffer() {
        assert!(ChannelBindings::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]).is_err());
        assert!(ChannelBindings::from_bytes([]).is_err());
    }

    #[test]
    fn invalid_len_or_offset() {
        assert!(ChannelBindings::from_bytes(application_buffer(6, 32)).is_err());
        assert!(ChannelBindings::from_bytes(application_buffer(4, 35)).is_err());
        assert!(ChannelBindings::from_bytes(application_buffer(4, u32::MAX)).is_err());
    }

    #[test]
    fn gss_hash_of_application_data_only() {
        let bindings = ChannelBindings::from_application_data(b"tls".to_vec());

        let mut flat = vec![0u8; 16];
        flat.extend_from_slice(&3u32.to_le_bytes());
        flat.extend_from_slice(b"tls");

        assert_eq!(bindings.gss_hash(), compute_md5(&flat));
    }
}
