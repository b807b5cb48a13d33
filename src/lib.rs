//! Client-side security providers for MS-RPC transports.
//!
//! The crate implements the initiator half of four mechanisms: NTLM, Kerberos v5,
//! the Netlogon secure channel and the SPNEGO negotiation wrapper. A caller builds a
//! [`SecurityContext`] from a mechanism configuration and a [`Credential`], feeds peer
//! tokens into [`Mechanism::initialize`] until it reports [`SecurityStatus::Complete`],
//! and then protects each PDU with the wrap and signature operations.
//!
//! ```no_run
//! use msrpc_ssp::ntlm::NtlmConfig;
//! use msrpc_ssp::{Capabilities, Credential, Mechanism, SecurityContext};
//!
//! let credential = Credential::password("CONTOSO\\alice", "Passw0rd!").unwrap();
//! let mut context = SecurityContext::new(
//!     &NtlmConfig::default(),
//!     credential,
//!     Capabilities::INTEGRITY | Capabilities::CONFIDENTIALITY,
//!     Some("host/dc01.contoso.com".to_owned()),
//! )
//! .unwrap();
//!
//! let negotiate = context.initialize(None).unwrap();
//! # let _ = negotiate;
//! ```

#[macro_use]
extern crate tracing;

pub mod channel_bindings;
pub mod config;
pub mod context;
pub mod credential;
pub mod crypto;
pub mod gss;
pub mod kdc;
pub mod kerberos;
pub mod krb5_conf;
pub mod negotiate;
pub mod netlogon;
pub mod network_client;
pub mod ntlm;
pub mod secret;
pub mod security_context;
pub mod utils;

use std::{error, fmt, io, result};

use num_derive::{FromPrimitive, ToPrimitive};
use picky_krb::crypto::KerberosCryptoError;
use picky_krb::messages::KrbError;

pub use crate::channel_bindings::ChannelBindings;
pub use crate::config::{AuthLevel, ImpersonationLevel, MechanismKind, ProtocolConfig};
pub use crate::context::{
    BufferFlags, Capabilities, HandshakeResult, Inbound, InitializeResult, Mechanism, Outbound, Role,
    SecurityBuffer, SequenceNumber, SequenceState,
};
pub use crate::credential::Credential;
pub use crate::kerberos::{Kerberos, KerberosConfig};
pub use crate::negotiate::{NegotiateConfig, Spnego};
pub use crate::netlogon::{Netlogon, NetlogonConfig, SecureCredential};
pub use crate::ntlm::{Ntlm, NtlmConfig};
pub use crate::secret::Secret;
pub use crate::security_context::SecurityContext;

/// Representation of a security provider result.
pub type Result<T> = result::Result<T, Error>;

/// Holds the [`ErrorKind`] and the description of the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
}

/// The error taxonomy surfaced to the transport.
///
/// Each kind carries the Windows SSPI status code that a Windows peer would report
/// for the same condition, so the value can be forwarded unchanged in a fault PDU.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromPrimitive, ToPrimitive)]
pub enum ErrorKind {
    /// Used when a required function is not supported by the mechanism.
    Unavailable = 0x8009_0302,
    Failure = 0x8009_0304,
    /// Malformed or truncated wire data.
    DefectiveToken = 0x8009_0308,
    /// SPNEGO peer answered with `reject`.
    Rejected = 0x8009_030C,
    /// The credential type cannot be used by the selected mechanism.
    DefectiveCredential = 0x8009_030E,
    /// A signature or checksum did not verify.
    BadMic = 0x8009_030F,
    /// Used when the call does not correspond to the current handshake state.
    OutOfSequence = 0x8009_0310,
    InvalidParameter = 0x8009_035D,
    /// The mechanism was used before its configuration or session was ready.
    NoContext = 0x8009_0361,
}

/// Status of a successful handshake step.
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum SecurityStatus {
    Complete = 0,
    ContinueNeeded = 0x0009_0312,
}

impl Error {
    /// Allows to fill a new error easily, supplying it with a coherent description.
    pub fn new(error_type: ErrorKind, description: impl ToString) -> Self {
        Self {
            error_type,
            description: description.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error_type
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.description)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::Failure, format!("IO error: {:?}", err))
    }
}

impl From<picky_asn1_der::Asn1DerError> for Error {
    fn from(err: picky_asn1_der::Asn1DerError) -> Self {
        Self::new(ErrorKind::DefectiveToken, format!("ASN1 DER error: {:?}", err))
    }
}

impl From<KerberosCryptoError> for Error {
    fn from(err: KerberosCryptoError) -> Self {
        match err {
            KerberosCryptoError::IntegrityCheck => Self::new(ErrorKind::BadMic, "integrity check failed"),
            err => Self::new(ErrorKind::Failure, format!("Kerberos crypto error: {:?}", err)),
        }
    }
}

impl From<KrbError> for Error {
    fn from(krb_error: KrbError) -> Self {
        let code = krb_error.0.error_code.0;

        Self::new(ErrorKind::Failure, format!("KDC error {}: {:?}", code, krb_error.0.e_text.0))
    }
}

impl From<picky_asn1::restricted_string::CharSetError> for Error {
    fn from(err: picky_asn1::restricted_string::CharSetError) -> Self {
        Self::new(ErrorKind::InvalidParameter, format!("invalid Kerberos string: {:?}", err))
    }
}

impl From<std::string::FromUtf16Error> for Error {
    fn from(err: std::string::FromUtf16Error) -> Self {
        Self::new(ErrorKind::DefectiveToken, format!("UTF-16 error: {:?}", err))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::new(ErrorKind::DefectiveToken, format!("UTF-8 error: {:?}", err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::other(format!("{:?}: {}", err.error_type, err.description))
    }
}

#[cfg(test)]
mod tests {
    use num_traits::{FromPrimitive, ToPrimitive};

    use super::*;

    #[test]
    fn error_kind_maps_to_sspi_status_codes() {
        assert_eq!(ErrorKind::BadMic.to_u32(), Some(0x8009_030F));
        assert_eq!(ErrorKind::from_u32(0x8009_0308), Some(ErrorKind::DefectiveToken));
        assert_eq!(ErrorKind::from_u32(0), None);
    }

    #[test]
    fn error_display_contains_kind_and_description() {
        let err = Error::new(ErrorKind::Unavailable, "mutual authentication");

        assert_eq!(err.to_string(), "Unavailable: mutual authentication");
    }
}
