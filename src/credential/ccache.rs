//! MIT credential cache reader (file format versions 0x0503 and 0x0504).

use std::fs;
use std::path::Path;

use super::{CredentialFileError, FileReader, Principal};
use crate::secret::Secret;

const VERSION_3: u16 = 0x0503;
const VERSION_4: u16 = 0x0504;

// realm of the configuration entries that MIT krb5 stores alongside real tickets
const CONFIG_REALM: &str = "X-CACHECONF:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCredential {
    pub client: Principal,
    pub server: Principal,
    pub key_type: i32,
    pub key: Secret<Vec<u8>>,
    pub auth_time: u32,
    pub start_time: u32,
    pub end_time: u32,
    pub renew_till: u32,
    pub is_skey: bool,
    pub ticket_flags: u32,
    /// DER encoded `Ticket`.
    pub ticket: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCache {
    pub version: u16,
    pub default_principal: Principal,
    pub credentials: Vec<CachedCredential>,
}

fn read_counted(reader: &mut FileReader<'_>) -> Result<Vec<u8>, CredentialFileError> {
    let len = reader.u32()? as usize;

    Ok(reader.bytes(len)?.to_vec())
}

fn read_principal(reader: &mut FileReader<'_>) -> Result<Principal, CredentialFileError> {
    let name_type = reader.u32()?;
    let count = reader.u32()? as usize;
    // each component needs at least its length field
    if count > reader.remaining() / 4 {
        return Err(CredentialFileError::InvalidLength {
            offset: reader.position(),
            len: count,
            remaining: reader.remaining(),
        });
    }

    let realm_len = reader.u32()? as usize;
    let realm = reader.string(realm_len)?;
    let components = (0..count)
        .map(|_| {
            let len = reader.u32()? as usize;
            reader.string(len)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Principal {
        name_type,
        realm,
        components,
    })
}

fn skip_counted_list(reader: &mut FileReader<'_>) -> Result<(), CredentialFileError> {
    let count = reader.u32()?;
    for _ in 0..count {
        reader.u16()?;
        read_counted(reader)?;
    }

    Ok(())
}

fn read_credential(reader: &mut FileReader<'_>, version: u16) -> Result<CachedCredential, CredentialFileError> {
    let client = read_principal(reader)?;
    let server = read_principal(reader)?;

    let key_type = i32::from(reader.u16()?);
    if version == VERSION_3 {
        // version 3 repeats the enctype
        reader.u16()?;
    }
    let key = read_counted(reader)?;

    let auth_time = reader.u32()?;
    let start_time = reader.u32()?;
    let end_time = reader.u32()?;
    let renew_till = reader.u32()?;
    let is_skey = reader.u8()? != 0;
    let ticket_flags = reader.u32()?;

    // addresses, then authorization data
    skip_counted_list(reader)?;
    skip_counted_list(reader)?;

    let ticket = read_counted(reader)?;
    let _second_ticket = read_counted(reader)?;

    Ok(CachedCredential {
        client,
        server,
        key_type,
        key: Secret::new(key),
        auth_time,
        start_time,
        end_time,
        renew_till,
        is_skey,
        ticket_flags,
        ticket,
    })
}

impl CredentialCache {
    pub fn parse(data: &[u8]) -> Result<Self, CredentialFileError> {
        let mut reader = FileReader::new(data);

        let version = reader.u16()?;
        match version {
            VERSION_4 => {
                let header_len = usize::from(reader.u16()?);
                reader.bytes(header_len)?;
            }
            VERSION_3 => {}
            other => return Err(CredentialFileError::UnsupportedVersion(other)),
        }

        let default_principal = read_principal(&mut reader)?;

        let mut credentials = Vec::new();
        while !reader.is_empty() {
            let credential = read_credential(&mut reader, version)?;
            if credential.server.realm != CONFIG_REALM {
                credentials.push(credential);
            }
        }

        Ok(Self {
            version,
            default_principal,
            credentials,
        })
    }

    pub fn load(path: &Path) -> Result<Self, CredentialFileError> {
        let data = fs::read(path)?;

        Self::parse(&data)
    }

    /// A cached ticket for `service/host@realm`.
    pub fn find_service_ticket(&self, spn: &str, realm: &str) -> Option<&CachedCredential> {
        self.credentials
            .iter()
            .find(|credential| credential.server.matches(spn, realm))
    }

    /// The ticket-granting ticket for `realm`.
    pub fn find_tgt(&self, realm: &str) -> Option<&CachedCredential> {
        self.find_service_ticket(&format!("krbtgt/{}", realm), realm)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn principal_bytes(realm: &str, components: &[&str]) -> Vec<u8> {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(&(components.len() as u32).to_be_bytes());
        data.extend_from_slice(&(realm.len() as u32).to_be_bytes());
        data.extend_from_slice(realm.as_bytes());
        for component in components {
            data.extend_from_slice(&(component.len() as u32).to_be_bytes());
            data.extend_from_slice(component.as_bytes());
        }
        data
    }

    pub(crate) fn credential_bytes(
        client: (&str, &[&str]),
        server: (&str, &[&str]),
        key_type: u16,
        key: &[u8],
        ticket: &[u8],
    ) -> Vec<u8> {
        let mut data = principal_bytes(client.0, client.1);
        data.extend(principal_bytes(server.0, server.1));
        data.extend_from_slice(&key_type.to_be_bytes());
        data.extend_from_slice(&(key.len() as u32).to_be_bytes());
        data.extend_from_slice(key);
        for time in [1u32, 1, u32::MAX, 0] {
            data.extend_from_slice(&time.to_be_bytes());
        }
        data.push(0);
        data.extend_from_slice(&0x4081_0000u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&(ticket.len() as u32).to_be_bytes());
        data.extend_from_slice(ticket);
        data.extend_from_slice(&0u32.to_be_bytes());
        data
    }

    pub(crate) fn ccache_bytes(default: (&str, &[&str]), credentials: &[Vec<u8>]) -> Vec<u8> {
        let mut data = VERSION_4.to_be_bytes().to_vec();
        // one header tag: KDC time offset
        data.extend_from_slice(&12u16.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x08, 0, 0, 0, 0, 0, 0, 0, 0]);
        data.extend(principal_bytes(default.0, default.1));
        for credential in credentials {
            data.extend_from_slice(credential);
        }
        data
    }

    #[test]
    fn finds_service_ticket_and_tgt() {
        let data = ccache_bytes(
            ("CONTOSO.COM", &["alice"]),
            &[
                credential_bytes(
                    ("CONTOSO.COM", &["alice"]),
                    ("CONTOSO.COM", &["krbtgt", "CONTOSO.COM"]),
                    18,
                    &[1; 32],
                    &[0x61, 0x00],
                ),
                credential_bytes(
                    ("CONTOSO.COM", &["alice"]),
                    ("X-CACHECONF:", &["krb5_ccache_conf_data", "pa_type"]),
                    0,
                    &[],
                    b"2",
                ),
                credential_bytes(
                    ("CONTOSO.COM", &["alice"]),
                    ("CONTOSO.COM", &["host", "dc01.contoso.com"]),
                    23,
                    &[2; 16],
                    &[0x61, 0x01],
                ),
            ],
        );

        let ccache = CredentialCache::parse(&data).unwrap();

        assert_eq!(ccache.default_principal.to_string(), "alice@CONTOSO.COM");
        assert_eq!(ccache.credentials.len(), 2);
        assert_eq!(ccache.find_tgt("CONTOSO.COM").unwrap().key_type, 18);
        let service = ccache.find_service_ticket("HOST/dc01.contoso.com", "CONTOSO.COM").unwrap();
        assert_eq!(service.ticket, vec![0x61, 0x01]);
    }

    #[test]
    fn truncated_cache_is_rejected() {
        let data = ccache_bytes(
            ("R", &["u"]),
            &[credential_bytes(("R", &["u"]), ("R", &["krbtgt", "R"]), 18, &[1; 32], &[1])],
        );

        for len in [1, 10, data.len() - 1] {
            assert!(CredentialCache::parse(&data[..len]).is_err());
        }
    }

    #[test]
    fn huge_component_count_is_rejected() {
        let mut data = VERSION_3.to_be_bytes().to_vec();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&u32::MAX.to_be_bytes());

        assert!(matches!(
            CredentialCache::parse(&data),
            Err(CredentialFileError::InvalidLength { .. })
        ));
    }
}
