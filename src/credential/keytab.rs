//! MIT keytab reader (file format version 0x0502).

use std::fs;
use std::path::Path;

use super::{CredentialFileError, FileReader, Principal};
use crate::secret::Secret;

pub const KEYTAB_VERSION: u16 = 0x0502;
const KEYTAB_MAGIC: u8 = 0x05;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeytabEntry {
    pub principal: Principal,
    pub timestamp: u32,
    pub kvno: u32,
    pub key_type: i32,
    pub key: Secret<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keytab {
    pub entries: Vec<KeytabEntry>,
}

fn read_counted_string(reader: &mut FileReader<'_>) -> Result<String, CredentialFileError> {
    let len = usize::from(reader.u16()?);
    reader.string(len)
}

fn read_entry(data: &[u8]) -> Result<KeytabEntry, CredentialFileError> {
    let mut reader = FileReader::new(data);

    let num_components = reader.u16()?;
    let realm = read_counted_string(&mut reader)?;
    let components = (0..num_components)
        .map(|_| read_counted_string(&mut reader))
        .collect::<Result<Vec<_>, _>>()?;
    let name_type = reader.u32()?;
    let timestamp = reader.u32()?;
    let kvno8 = reader.u8()?;
    let key_type = i32::from(reader.u16()?);
    let key_len = usize::from(reader.u16()?);
    let key = reader.bytes(key_len)?.to_vec();

    // the 32-bit kvno supersedes the 8-bit one when present and non zero
    let kvno = if reader.remaining() >= 4 {
        match reader.u32()? {
            0 => u32::from(kvno8),
            kvno => kvno,
        }
    } else {
        u32::from(kvno8)
    };

    Ok(KeytabEntry {
        principal: Principal {
            name_type,
            realm,
            components,
        },
        timestamp,
        kvno,
        key_type,
        key: Secret::new(key),
    })
}

impl Keytab {
    pub fn parse(data: &[u8]) -> Result<Self, CredentialFileError> {
        let mut reader = FileReader::new(data);

        let version = reader.u16()?;
        if version != KEYTAB_VERSION || (version >> 8) as u8 != KEYTAB_MAGIC {
            return Err(CredentialFileError::UnsupportedVersion(version));
        }

        let mut entries = Vec::new();
        while reader.remaining() >= 4 {
            let size = reader.i32()?;
            let len = size.unsigned_abs() as usize;
            let record = reader.bytes(len)?;

            // negative sizes mark deleted entries
            if size > 0 {
                entries.push(read_entry(record)?);
            }
        }

        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, CredentialFileError> {
        let data = fs::read(path)?;

        Self::parse(&data)
    }

    /// Newest key of `key_type` for `name@realm`.
    pub fn find(&self, name: &str, realm: &str, key_type: i32) -> Option<&KeytabEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.key_type == key_type && entry.principal.matches(name, realm))
            .max_by_key(|entry| entry.kvno)
    }

    /// Key types available for `name@realm`, in file order.
    pub fn key_types(&self, name: &str, realm: &str) -> Vec<i32> {
        let mut key_types = Vec::new();
        for entry in self.entries.iter().filter(|entry| entry.principal.matches(name, realm)) {
            if !key_types.contains(&entry.key_type) {
                key_types.push(entry.key_type);
            }
        }

        key_types
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry_bytes(realm: &str, components: &[&str], kvno: u32, key_type: u16, key: &[u8]) -> Vec<u8> {
        let mut entry = Vec::new();
        entry.extend_from_slice(&(components.len() as u16).to_be_bytes());
        entry.extend_from_slice(&(realm.len() as u16).to_be_bytes());
        entry.extend_from_slice(realm.as_bytes());
        for component in components {
            entry.extend_from_slice(&(component.len() as u16).to_be_bytes());
            entry.extend_from_slice(component.as_bytes());
        }
        entry.extend_from_slice(&1u32.to_be_bytes());
        entry.extend_from_slice(&0x5f00_0000u32.to_be_bytes());
        entry.push(kvno as u8);
        entry.extend_from_slice(&key_type.to_be_bytes());
        entry.extend_from_slice(&(key.len() as u16).to_be_bytes());
        entry.extend_from_slice(key);
        entry.extend_from_slice(&kvno.to_be_bytes());

        let mut record = (entry.len() as i32).to_be_bytes().to_vec();
        record.extend(entry);
        record
    }

    pub(crate) fn keytab_bytes(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut data = KEYTAB_VERSION.to_be_bytes().to_vec();
        for entry in entries {
            data.extend_from_slice(entry);
        }
        data
    }

    #[test]
    fn parses_entries_and_picks_newest_kvno() {
        let data = keytab_bytes(&[
            entry_bytes("CONTOSO.COM", &["alice"], 1, 18, &[1; 32]),
            entry_bytes("CONTOSO.COM", &["alice"], 300, 18, &[2; 32]),
            entry_bytes("CONTOSO.COM", &["alice"], 2, 23, &[3; 16]),
        ]);

        let keytab = Keytab::parse(&data).unwrap();

        assert_eq!(keytab.entries.len(), 3);
        let entry = keytab.find("ALICE", "contoso.com", 18).unwrap();
        assert_eq!(entry.kvno, 300);
        assert_eq!(entry.key.as_ref(), &vec![2; 32]);
        assert_eq!(keytab.key_types("alice", "CONTOSO.COM"), vec![18, 23]);
        assert!(keytab.find("bob", "CONTOSO.COM", 18).is_none());
    }

    #[test]
    fn deleted_entries_are_skipped() {
        let mut hole = (-6i32).to_be_bytes().to_vec();
        hole.extend_from_slice(&[0; 6]);
        let data = keytab_bytes(&[hole, entry_bytes("R", &["svc", "host"], 4, 17, &[9; 16])]);

        let keytab = Keytab::parse(&data).unwrap();

        assert_eq!(keytab.entries.len(), 1);
        assert_eq!(keytab.entries[0].principal.name(), "svc/host");
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let mut data = KEYTAB_VERSION.to_be_bytes().to_vec();
        data.extend_from_slice(&0x7fff_ffffi32.to_be_bytes());
        data.extend_from_slice(&[0; 8]);

        assert!(matches!(
            Keytab::parse(&data),
            Err(CredentialFileError::InvalidLength { .. })
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        assert!(matches!(
            Keytab::parse(&[0x05, 0x01]),
            Err(CredentialFileError::UnsupportedVersion(0x0501))
        ));
    }
}
