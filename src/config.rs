//! Caller-facing configuration shared by the mechanisms.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::str::FromStr;

use lazy_static::lazy_static;
use oid::ObjectIdentifier;
use picky_asn1_x509::oids;

use crate::context::Capabilities;
use crate::credential::Credential;
use crate::security_context::SecurityContext;
use crate::{Error, ErrorKind, Result};

/// RPC authentication level (`RPC_C_AUTHN_LEVEL_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AuthLevel {
    None = 1,
    #[default]
    Connect = 2,
    Call = 3,
    Pkt = 4,
    Integrity = 5,
    Privacy = 6,
}

impl FromStr for AuthLevel {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "connect" => Self::Connect,
            "call" => Self::Call,
            "pkt" | "packet" => Self::Pkt,
            "integrity" | "pkt_integrity" => Self::Integrity,
            "privacy" | "pkt_privacy" => Self::Privacy,
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidParameter,
                    format!("unknown auth level: {}", other),
                ))
            }
        })
    }
}

/// RPC impersonation level (`RPC_C_IMP_LEVEL_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImpersonationLevel {
    Anonymous = 1,
    Identify = 2,
    #[default]
    Impersonate = 3,
    Delegate = 4,
}

impl FromStr for ImpersonationLevel {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "anonymous" => Self::Anonymous,
            "identify" => Self::Identify,
            "impersonate" => Self::Impersonate,
            "delegate" => Self::Delegate,
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidParameter,
                    format!("unknown impersonation level: {}", other),
                ))
            }
        })
    }
}

impl Capabilities {
    /// Capabilities an RPC connection needs for the given levels.
    pub fn from_levels(auth_level: AuthLevel, impersonation: ImpersonationLevel) -> Self {
        let mut capabilities = Capabilities::empty();

        if auth_level >= AuthLevel::Pkt {
            capabilities |= Capabilities::INTEGRITY | Capabilities::REPLAY_DETECTION | Capabilities::SEQUENCING;
        }
        if auth_level == AuthLevel::Privacy {
            capabilities |= Capabilities::CONFIDENTIALITY;
        }

        match impersonation {
            ImpersonationLevel::Anonymous => capabilities |= Capabilities::ANONYMITY,
            ImpersonationLevel::Identify => capabilities |= Capabilities::IDENTIFY,
            ImpersonationLevel::Impersonate | ImpersonationLevel::Delegate => {}
        }

        capabilities
    }
}

/// The mechanisms this crate can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MechanismKind {
    Ntlm,
    Kerberos,
    Netlogon,
    Spnego,
}

impl MechanismKind {
    /// `RPC_C_AUTHN_*` value carried in the PDU auth trailer.
    pub fn rpc_auth_type(self) -> u8 {
        match self {
            Self::Spnego => 0x09,
            Self::Ntlm => 0x0a,
            Self::Kerberos => 0x10,
            Self::Netlogon => 0x44,
        }
    }

    /// GSS mechanism OID. Netlogon has none and cannot be negotiated by SPNEGO.
    pub fn oid(self) -> Option<ObjectIdentifier> {
        match self {
            Self::Ntlm => Some(oids::ntlm_ssp()),
            Self::Kerberos => Some(oids::krb5()),
            Self::Spnego => Some(oids::spnego()),
            Self::Netlogon => None,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        let oid: String = oid.clone().into();
        MECHANISMS_BY_OID.get(&oid).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ntlm => "NTLM",
            Self::Kerberos => "Kerberos",
            Self::Netlogon => "Netlogon",
            Self::Spnego => "Negotiate",
        }
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

lazy_static! {
    /// Read-only OID lookup table built on first use.
    static ref MECHANISMS_BY_OID: HashMap<String, MechanismKind> = {
        let mut table = HashMap::new();
        table.insert(oids::ntlm_ssp().into(), MechanismKind::Ntlm);
        table.insert(oids::krb5().into(), MechanismKind::Kerberos);
        table.insert(oids::ms_krb5().into(), MechanismKind::Kerberos);
        table.insert(oids::spnego().into(), MechanismKind::Spnego);
        table
    };
}

/// Factory for one mechanism's security contexts.
pub trait ProtocolConfig: Debug + Send + Sync {
    fn mechanism(&self) -> MechanismKind;

    fn new_context(
        &self,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<SecurityContext>;

    fn box_clone(&self) -> Box<dyn ProtocolConfig>;
}

impl Clone for Box<dyn ProtocolConfig> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_from_names() {
        assert_eq!("privacy".parse::<AuthLevel>().unwrap(), AuthLevel::Privacy);
        assert_eq!("Identify".parse::<ImpersonationLevel>().unwrap(), ImpersonationLevel::Identify);
        assert!("secret".parse::<AuthLevel>().is_err());
    }

    #[test]
    fn privacy_requests_sealing() {
        let capabilities = Capabilities::from_levels(AuthLevel::Privacy, ImpersonationLevel::Impersonate);

        assert!(capabilities.contains(Capabilities::INTEGRITY | Capabilities::CONFIDENTIALITY));
        assert!(Capabilities::from_levels(AuthLevel::Connect, ImpersonationLevel::Impersonate).is_empty());
        assert!(Capabilities::from_levels(AuthLevel::Connect, ImpersonationLevel::Anonymous)
            .contains(Capabilities::ANONYMITY));
    }

    #[test]
    fn oid_table_resolves_both_kerberos_oids() {
        assert_eq!(MechanismKind::from_oid(&oids::ms_krb5()), Some(MechanismKind::Kerberos));
        assert_eq!(MechanismKind::from_oid(&oids::krb5()), Some(MechanismKind::Kerberos));
        assert_eq!(MechanismKind::from_oid(&oids::ntlm_ssp()), Some(MechanismKind::Ntlm));
        assert_eq!(MechanismKind::Netlogon.oid(), None);
        assert_eq!(MechanismKind::Kerberos.rpc_auth_type(), 16);
    }
}
