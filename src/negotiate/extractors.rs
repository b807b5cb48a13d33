use oid::ObjectIdentifier;
use picky_asn1::wrapper::{ExplicitContextTag0, ObjectIdentifierAsn1};
use picky_asn1_x509::oids;

use super::messages::{NegState, NegTokenInit2};
use crate::config::MechanismKind;
use crate::{gss, Error, ErrorKind, Result};

/// `negHints` of a server-initiated `NegTokenInit2`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NegotiationHints {
    pub hint_name: Option<String>,
    pub hint_address: Option<Vec<u8>>,
}

/// Decoded `NegTokenInit` or `NegTokenInit2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationInit {
    pub mech_types: Vec<ObjectIdentifier>,
    pub mech_token: Option<Vec<u8>>,
    pub hints: Option<NegotiationHints>,
    pub mech_list_mic: Option<Vec<u8>>,
}

/// Decoded `NegTokenResp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationResponse {
    pub neg_state: Option<NegState>,
    pub supported_mech: Option<ObjectIdentifier>,
    pub response_token: Option<Vec<u8>>,
    pub mech_list_mic: Option<Vec<u8>>,
}

const CONTEXT_TAG_0: u8 = 0xa0;
const CONTEXT_TAG_1: u8 = 0xa1;
const CONTEXT_TAG_2: u8 = 0xa2;
const CONTEXT_TAG_3: u8 = 0xa3;
const SEQUENCE_TAG: u8 = 0x30;
const OID_TAG: u8 = 0x06;

fn defective(message: impl ToString) -> Error {
    Error::new(ErrorKind::DefectiveToken, message)
}

/// Reads the single DER element that must span all of `data`.
fn single_element<'a>(data: &'a [u8], expected_tag: u8, name: &str) -> Result<&'a [u8]> {
    let (tag, contents, rest) = gss::split_der_element(data)?;
    if tag != expected_tag {
        return Err(defective(format!(
            "{}: expected tag {:#04x} but got {:#04x}",
            name, expected_tag, tag
        )));
    }
    if !rest.is_empty() {
        return Err(defective(format!("{}: {} trailing bytes", name, rest.len())));
    }

    Ok(contents)
}

/// The initial token is framed by hand: picky-krb's `ApplicationTag0` deserializer
/// does not report malformed contents as errors.
#[instrument(level = "trace", ret, skip_all)]
pub(super) fn decode_neg_token_init(data: &[u8]) -> Result<NegotiationInit> {
    let body = single_element(data, gss::GSS_APPLICATION_TAG, "InitialContextToken")?;

    let (tag, _, neg_token) = gss::split_der_element(body)?;
    if tag != OID_TAG {
        return Err(defective("InitialContextToken does not start with a mechanism OID"));
    }
    let oid: ObjectIdentifierAsn1 = picky_asn1_der::from_bytes(&body[..body.len() - neg_token.len()])?;

    let spnego = oids::spnego();
    if oid.0 != spnego {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            format!(
                "invalid oid inside NegTokenInit: expected SPNEGO ({:?}) but got {:?}",
                spnego, oid.0
            ),
        ));
    }

    single_element(neg_token, CONTEXT_TAG_0, "NegotiationToken")?;
    let neg_token_init: ExplicitContextTag0<NegTokenInit2> = picky_asn1_der::from_bytes(neg_token)?;

    let neg_token_init = neg_token_init.0;
    let mech_types = neg_token_init
        .mech_types
        .0
        .ok_or_else(|| Error::new(ErrorKind::DefectiveToken, "mech_types is missing in NegTokenInit"))?
        .0
        .0
        .iter()
        .map(|mech_type| mech_type.0.clone())
        .collect();

    let hints = neg_token_init.neg_hints.0.map(|hints| NegotiationHints {
        hint_name: hints.0.hint_name.0.map(|name| name.0.to_string()),
        hint_address: hints.0.hint_address.0.map(|address| address.0 .0),
    });

    Ok(NegotiationInit {
        mech_types,
        mech_token: neg_token_init.mech_token.0.map(|token| token.0 .0),
        hints,
        mech_list_mic: neg_token_init.mech_list_mic.0.map(|mic| mic.0 .0),
    })
}

/// Fields are read one element at a time: picky-asn1-der leaves an absent
/// `Asn1RawDer` field armed, which corrupts the next OCTET STRING.
#[instrument(level = "trace", ret, skip_all)]
pub(super) fn decode_neg_token_resp(data: &[u8]) -> Result<NegotiationResponse> {
    let choice = single_element(data, CONTEXT_TAG_1, "NegotiationToken")?;
    let mut fields = single_element(choice, SEQUENCE_TAG, "NegTokenResp")?;

    let mut response = NegotiationResponse {
        neg_state: None,
        supported_mech: None,
        response_token: None,
        mech_list_mic: None,
    };
    let mut previous_tag = None;

    while !fields.is_empty() {
        let (tag, contents, rest) = gss::split_der_element(fields)?;
        if previous_tag.map_or(false, |previous| tag <= previous) {
            return Err(defective(format!("NegTokenResp field {:#04x} is out of order", tag)));
        }
        previous_tag = Some(tag);

        match tag {
            CONTEXT_TAG_0 => response.neg_state = Some(NegState::from_der(contents)?),
            CONTEXT_TAG_1 => {
                let mech: ObjectIdentifierAsn1 = picky_asn1_der::from_bytes(contents)?;
                response.supported_mech = Some(mech.0);
            }
            CONTEXT_TAG_2 => response.response_token = Some(octet_string(contents)?),
            CONTEXT_TAG_3 => response.mech_list_mic = Some(octet_string(contents)?),
            other => return Err(defective(format!("unexpected NegTokenResp field {:#04x}", other))),
        }

        fields = rest;
    }

    Ok(response)
}

fn octet_string(data: &[u8]) -> Result<Vec<u8>> {
    const OCTET_STRING_TAG: u8 = 0x04;

    Ok(single_element(data, OCTET_STRING_TAG, "OCTET STRING")?.to_vec())
}

/// Keeps the locally configured mechanisms that the peer offers, in local preference order.
pub(super) fn select_mech_types(local: &[MechanismKind], offered: &[ObjectIdentifier]) -> Vec<MechanismKind> {
    let offered = offered
        .iter()
        .filter_map(MechanismKind::from_oid)
        .collect::<Vec<_>>();

    local
        .iter()
        .copied()
        .filter(|mechanism| offered.contains(mechanism))
        .collect()
}
