//! SPNEGO token types that picky-krb does not model.
//!
//! ```not_rust
//! NegTokenInit2 ::= SEQUENCE {
//!     mechTypes     [0] MechTypeList  OPTIONAL,
//!     reqFlags      [1] ContextFlags  OPTIONAL,
//!     mechToken     [2] OCTET STRING  OPTIONAL,
//!     negHints      [3] NegHints      OPTIONAL,
//!     mechListMIC   [4] OCTET STRING  OPTIONAL,
//! }
//!
//! NegHints ::= SEQUENCE {
//!     hintName      [0] GeneralString OPTIONAL,
//!     hintAddress   [1] OCTET STRING  OPTIONAL
//! }
//! ```
//!
//! A client `NegTokenInit` without a MIC has the same encoding, so both are read and
//! written through [`NegTokenInit2`]. Responses are written with picky-krb's `NegTokenTarg`,
//! which is the RFC 4178 `NegTokenResp`, and read field by field.

use picky_asn1::wrapper::{
    BitStringAsn1, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ObjectIdentifierAsn1, OctetStringAsn1, Optional,
};
use picky_krb::data_types::KerberosStringAsn1;
use picky_krb::gss_api::MechTypeList;
use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

const ENUMERATED_TAG: u8 = 0x0a;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegHints {
    #[serde(default)]
    pub hint_name: Optional<Option<ExplicitContextTag0<KerberosStringAsn1>>>,
    #[serde(default)]
    pub hint_address: Optional<Option<ExplicitContextTag1<OctetStringAsn1>>>,
}

/// [MS-SPNG 2.2.1 NegTokenInit2](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-spng/8e71cf53-e867-4b79-b5b5-38c92be3d472)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegTokenInit2 {
    #[serde(default)]
    pub mech_types: Optional<Option<ExplicitContextTag0<MechTypeList>>>,
    #[serde(default)]
    pub req_flags: Optional<Option<ExplicitContextTag1<BitStringAsn1>>>,
    #[serde(default)]
    pub mech_token: Optional<Option<ExplicitContextTag2<OctetStringAsn1>>>,
    #[serde(default)]
    pub neg_hints: Optional<Option<ExplicitContextTag3<NegHints>>>,
    #[serde(default)]
    pub mech_list_mic: Optional<Option<ExplicitContextTag4<OctetStringAsn1>>>,
}

/// `InitialContextToken` carrying the SPNEGO OID; wrapped in `ApplicationTag0` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GssApiNegInit2 {
    pub oid: ObjectIdentifierAsn1,
    pub neg_token_init: ExplicitContextTag0<NegTokenInit2>,
}

/// `negState` of a `NegTokenResp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegState {
    AcceptCompleted = 0,
    AcceptIncomplete = 1,
    Reject = 2,
    RequestMic = 3,
}

impl NegState {
    /// DER `ENUMERATED` encoding.
    pub fn to_der(self) -> Vec<u8> {
        vec![ENUMERATED_TAG, 0x01, self as u8]
    }

    pub fn from_der(data: &[u8]) -> Result<Self> {
        match data {
            [ENUMERATED_TAG, 0x01, value] => match value {
                0 => Ok(Self::AcceptCompleted),
                1 => Ok(Self::AcceptIncomplete),
                2 => Ok(Self::Reject),
                3 => Ok(Self::RequestMic),
                other => Err(Error::new(
                    ErrorKind::DefectiveToken,
                    format!("unknown SPNEGO negState {}", other),
                )),
            },
            _ => Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("negState is not a one byte ENUMERATED: {:02x?}", data),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neg_state_der() {
        assert_eq!(NegState::RequestMic.to_der(), vec![0x0a, 0x01, 0x03]);
        assert_eq!(NegState::from_der(&[0x0a, 0x01, 0x02]).unwrap(), NegState::Reject);

        for invalid in [&[0x0a, 0x01, 0x04][..], &[0x02, 0x01, 0x00][..], &[0x0a][..]] {
            assert_eq!(
                NegState::from_der(invalid).unwrap_err().error_type,
                ErrorKind::DefectiveToken
            );
        }
    }
}
