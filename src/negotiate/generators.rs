use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag2, ExplicitContextTag3, ObjectIdentifierAsn1,
    OctetStringAsn1, Optional,
};
use picky_asn1_der::Asn1RawDer;
use picky_asn1_x509::oids;
use picky_krb::gss_api::{ApplicationTag0, MechType, MechTypeList, NegTokenTarg, NegTokenTarg1};

use super::messages::{GssApiNegInit2, NegState, NegTokenInit2};
use crate::config::MechanismKind;
use crate::{Error, ErrorKind, Result};

/// Generates the mechanism type list in preference order.
pub(super) fn generate_mech_type_list(mechanisms: &[MechanismKind]) -> Result<MechTypeList> {
    let mech_types = mechanisms
        .iter()
        .map(|mechanism| {
            mechanism.oid().map(MechType::from).ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidParameter,
                    format!("{} cannot be negotiated by SPNEGO", mechanism),
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(MechTypeList::from(Asn1SequenceOf::from(mech_types)))
}

/// Generates the initial SPNEGO token with the optimistic mechanism token.
pub(super) fn generate_neg_token_init(mech_list: MechTypeList, mech_token: Option<Vec<u8>>) -> Result<Vec<u8>> {
    let token = ApplicationTag0(GssApiNegInit2 {
        oid: ObjectIdentifierAsn1::from(oids::spnego()),
        neg_token_init: ExplicitContextTag0::from(NegTokenInit2 {
            mech_types: Optional::from(Some(ExplicitContextTag0::from(mech_list))),
            req_flags: Optional::from(None),
            mech_token: Optional::from(mech_token.map(|token| ExplicitContextTag2::from(OctetStringAsn1::from(token)))),
            neg_hints: Optional::from(None),
            mech_list_mic: Optional::from(None),
        }),
    });

    Ok(picky_asn1_der::to_vec(&token)?)
}

/// Generates a `NegTokenResp`. The initiator leaves `negState` out.
pub(super) fn generate_neg_token_resp(
    neg_state: Option<NegState>,
    response_token: Option<Vec<u8>>,
    mech_list_mic: Option<Vec<u8>>,
) -> Result<Vec<u8>> {
    let token = NegTokenTarg1::from(NegTokenTarg {
        neg_result: Optional::from(neg_state.map(|state| ExplicitContextTag0::from(Asn1RawDer(state.to_der())))),
        supported_mech: Optional::from(None),
        response_token: Optional::from(
            response_token.map(|token| ExplicitContextTag2::from(OctetStringAsn1::from(token))),
        ),
        mech_list_mic: Optional::from(mech_list_mic.map(|mic| ExplicitContextTag3::from(OctetStringAsn1::from(mic)))),
    });

    Ok(picky_asn1_der::to_vec(&token)?)
}
