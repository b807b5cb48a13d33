//! Caller credentials.

pub mod ccache;
pub mod keytab;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error as ThisError;

use crate::crypto::{compute_md4, HASH_SIZE};
use crate::secret::Secret;
use crate::utils::string_to_utf16;
use crate::{Error, ErrorKind, Result};

/// RC4-HMAC key type, whose key is the NT hash.
pub const KEY_TYPE_RC4_HMAC: i32 = 23;

/// Who the credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub username: String,
    /// NetBIOS domain or Kerberos realm. Empty when unknown.
    pub domain: String,
    pub workstation: Option<String>,
}

impl Identity {
    /// Parses `DOMAIN\user`, `user@realm` or a bare `user`.
    pub fn parse(account: &str) -> Result<Self> {
        let (username, domain) = if let Some((domain, username)) = account.split_once('\\') {
            (username, domain)
        } else if let Some((username, domain)) = account.rsplit_once('@') {
            (username, domain)
        } else {
            (account, "")
        };

        if username.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!("account name has no user part: {:?}", account),
            ));
        }

        Ok(Self {
            username: username.to_owned(),
            domain: domain.to_owned(),
            workstation: None,
        })
    }

    pub fn new(username: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            domain: domain.into(),
            workstation: None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}", self.username)
        } else {
            write!(f, "{}\\{}", self.domain, self.username)
        }
    }
}

/// Credential supplied by the caller. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password {
        identity: Identity,
        password: Secret<String>,
    },
    NtHash {
        identity: Identity,
        hash: Secret<[u8; HASH_SIZE]>,
    },
    /// A long-term Kerberos key of the given RFC 3961 encryption type.
    EncryptionKey {
        identity: Identity,
        key_type: i32,
        value: Secret<Vec<u8>>,
    },
    Keytab {
        identity: Identity,
        path: PathBuf,
    },
    CredentialCache {
        identity: Identity,
        path: PathBuf,
    },
    Anonymous {
        identity: Identity,
    },
}

impl Credential {
    pub fn password(account: &str, password: &str) -> Result<Self> {
        Ok(Self::Password {
            identity: Identity::parse(account)?,
            password: Secret::from(password),
        })
    }

    pub fn nt_hash(account: &str, hash: [u8; HASH_SIZE]) -> Result<Self> {
        Ok(Self::NtHash {
            identity: Identity::parse(account)?,
            hash: Secret::new(hash),
        })
    }

    /// Parses the 32 hex digit form of an NT hash.
    pub fn nt_hash_hex(account: &str, hex: &str) -> Result<Self> {
        let invalid = || Error::new(ErrorKind::InvalidParameter, "NT hash must be 32 hex digits");

        if hex.len() != HASH_SIZE * 2 || !hex.is_ascii() {
            return Err(invalid());
        }

        let mut hash = [0u8; HASH_SIZE];
        for (i, byte) in hash.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }

        Self::nt_hash(account, hash)
    }

    pub fn encryption_key(account: &str, key_type: i32, value: Vec<u8>) -> Result<Self> {
        Ok(Self::EncryptionKey {
            identity: Identity::parse(account)?,
            key_type,
            value: Secret::new(value),
        })
    }

    pub fn keytab(account: &str, path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::Keytab {
            identity: Identity::parse(account)?,
            path: path.into(),
        })
    }

    pub fn credential_cache(account: &str, path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::CredentialCache {
            identity: Identity::parse(account)?,
            path: path.into(),
        })
    }

    pub fn anonymous() -> Self {
        Self::Anonymous {
            identity: Identity::default(),
        }
    }

    pub fn with_workstation(mut self, workstation: impl Into<String>) -> Self {
        self.identity_mut().workstation = Some(workstation.into());
        self
    }

    pub fn identity(&self) -> &Identity {
        match self {
            Self::Password { identity, .. }
            | Self::NtHash { identity, .. }
            | Self::EncryptionKey { identity, .. }
            | Self::Keytab { identity, .. }
            | Self::CredentialCache { identity, .. }
            | Self::Anonymous { identity } => identity,
        }
    }

    fn identity_mut(&mut self) -> &mut Identity {
        match self {
            Self::Password { identity, .. }
            | Self::NtHash { identity, .. }
            | Self::EncryptionKey { identity, .. }
            | Self::Keytab { identity, .. }
            | Self::CredentialCache { identity, .. }
            | Self::Anonymous { identity } => identity,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::NtHash { .. } => "NT hash",
            Self::EncryptionKey { .. } => "encryption key",
            Self::Keytab { .. } => "keytab",
            Self::CredentialCache { .. } => "credential cache",
            Self::Anonymous { .. } => "anonymous",
        }
    }

    /// MD4 of the UTF-16LE password, for mechanisms keyed by the NT hash.
    ///
    /// An RC4-HMAC encryption key is the NT hash and is accepted as well.
    pub fn nt_hash_value(&self) -> Result<Secret<[u8; HASH_SIZE]>> {
        match self {
            Self::Password { password, .. } => Ok(Secret::new(compute_md4(&string_to_utf16(password.as_ref().as_str())))),
            Self::NtHash { hash, .. } => Ok(hash.clone()),
            Self::EncryptionKey { key_type, value, .. } if *key_type == KEY_TYPE_RC4_HMAC => {
                let hash: [u8; HASH_SIZE] = value.as_ref().as_slice().try_into().map_err(|_| {
                    Error::new(ErrorKind::DefectiveCredential, "RC4-HMAC key must be 16 bytes long")
                })?;

                Ok(Secret::new(hash))
            }
            other => Err(Error::new(
                ErrorKind::DefectiveCredential,
                format!("{} credential cannot provide an NT hash", other.kind_name()),
            )),
        }
    }
}

/// Errors of the binary credential file readers.
#[derive(Debug, ThisError)]
pub enum CredentialFileError {
    #[error("unsupported file format version {0:#06x}")]
    UnsupportedVersion(u16),
    #[error("file is truncated at offset {0}")]
    Truncated(usize),
    #[error("length {len} at offset {offset} exceeds the {remaining} remaining bytes")]
    InvalidLength {
        offset: usize,
        len: usize,
        remaining: usize,
    },
    #[error("invalid UTF-8 in a principal name")]
    InvalidName,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CredentialFileError> for Error {
    fn from(err: CredentialFileError) -> Self {
        Self::new(ErrorKind::DefectiveCredential, err)
    }
}

/// Big-endian reader with bounds checks before every allocation.
pub(crate) struct FileReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FileReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn bytes(&mut self, len: usize) -> std::result::Result<&'a [u8], CredentialFileError> {
        if len > self.remaining() {
            return Err(CredentialFileError::InvalidLength {
                offset: self.pos,
                len,
                remaining: self.remaining(),
            });
        }

        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;

        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> std::result::Result<[u8; N], CredentialFileError> {
        let pos = self.pos;
        let bytes = self.bytes(N).map_err(|_| CredentialFileError::Truncated(pos))?;
        let mut array = [0u8; N];
        array.copy_from_slice(bytes);

        Ok(array)
    }

    pub(crate) fn u8(&mut self) -> std::result::Result<u8, CredentialFileError> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> std::result::Result<u16, CredentialFileError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> std::result::Result<u32, CredentialFileError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> std::result::Result<i32, CredentialFileError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub(crate) fn string(&mut self, len: usize) -> std::result::Result<String, CredentialFileError> {
        let bytes = self.bytes(len)?;

        String::from_utf8(bytes.to_vec()).map_err(|_| CredentialFileError::InvalidName)
    }
}

/// A Kerberos principal as stored in keytab and ccache files.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Principal {
    pub name_type: u32,
    pub realm: String,
    pub components: Vec<String>,
}

impl Principal {
    pub fn name(&self) -> String {
        self.components.join("/")
    }

    /// Case-insensitive match of name and realm.
    pub fn matches(&self, name: &str, realm: &str) -> bool {
        self.name().eq_ignore_ascii_case(name) && self.realm.eq_ignore_ascii_case(realm)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.realm)
    }
}
