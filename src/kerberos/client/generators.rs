use picky_asn1::bit_string::BitString;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8,
    ExplicitContextTag9, GeneralizedTimeAsn1, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::gss_api::AUTHENTICATOR_CHECKSUM_TYPE;
use picky_krb::constants::key_usages::{AP_REP_ENC, TGS_REQ_PA_DATA_AP_REQ_AUTHENTICATOR};
use picky_krb::constants::types::{
    AD_AUTH_DATA_AP_OPTION_TYPE, AP_REP_MSG_TYPE, AP_REQ_MSG_TYPE, AS_REQ_MSG_TYPE, KERB_AP_OPTIONS_CBT,
    NET_BIOS_ADDR_TYPE, NT_SRV_INST, PA_ENC_TIMESTAMP, PA_ENC_TIMESTAMP_KEY_USAGE, PA_PAC_OPTIONS_TYPE, PA_PAC_REQUEST_TYPE,
    PA_TGS_REQ_TYPE, TGS_REQ_MSG_TYPE,
};
use picky_krb::data_types::{
    ApOptions, Authenticator, AuthenticatorInner, AuthorizationData, AuthorizationDataInner, Checksum, EncApRepPart,
    EncApRepPartInner, EncryptedData, EncryptionKey, HostAddress, KerbPaPacRequest, KerberosFlags, PaData,
    PaEncTsEnc, PaPacOptions, PrincipalName, Realm, Ticket,
};
use picky_krb::messages::{ApRep, ApRepInner, ApReq, ApReqInner, AsReq, KdcReq, KdcReqBody, TgsReq};
use time::{Duration, OffsetDateTime};

use crate::channel_bindings::ChannelBindings;
use crate::crypto::compute_md5;
use crate::kerberos::encryption::EncryptionType;
use crate::kerberos::flags::{ApOptions as ApOptionsFlags, GssFlags, KdcOptions};
use crate::kerberos::utils::{kerberos_now, kerberos_string, u32_to_integer};
use crate::kerberos::{KERBEROS_VERSION, TGT_SERVICE_NAME};
use crate::{Error, ErrorKind, Result};

const TICKET_LIFETIME_DAYS: i64 = 3;
const RSA_MD5_CHECKSUM_TYPE: u8 = 0x07;
const DEFAULT_PA_PAC_OPTIONS: [u8; 4] = [0x40, 0x00, 0x00, 0x00];

/// [Authenticator Checksum](https://datatracker.ietf.org/doc/html/rfc4121#section-4.1.1):
/// `Lgth`, the channel binding hash and the flags.
pub const AUTHENTICATOR_CHECKSUM_LEN: usize = 24;
const CHANNEL_BINDINGS_HASH_RANGE: std::ops::Range<usize> = 4..20;
const CHECKSUM_FLAGS_RANGE: std::ops::Range<usize> = 20..24;

fn expiration_date() -> Result<GeneralizedTime> {
    OffsetDateTime::now_utc()
        .checked_add(Duration::days(TICKET_LIFETIME_DAYS))
        .map(GeneralizedTime::from)
        .ok_or_else(|| Error::new(ErrorKind::Failure, "ticket expiration date overflow"))
}

pub(crate) fn principal_name(name_type: u8, components: &[&str]) -> Result<PrincipalName> {
    let name_string = components
        .iter()
        .map(|component| kerberos_string(component))
        .collect::<Result<Vec<_>>>()?;

    Ok(PrincipalName {
        name_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![name_type])),
        name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(name_string)),
    })
}

pub(crate) fn realm(value: &str) -> Result<Realm> {
    Ok(Realm::from(IA5String::from_string(value.to_owned())?))
}

fn encrypted_data(encryption_type: EncryptionType, cipher: Vec<u8>) -> EncryptedData {
    EncryptedData {
        etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![encryption_type.asn1_byte()])),
        kvno: Optional::from(None),
        cipher: ExplicitContextTag2::from(OctetStringAsn1::from(cipher)),
    }
}

fn etype_list(encryption_types: &[EncryptionType]) -> Asn1SequenceOf<IntegerAsn1> {
    Asn1SequenceOf::from(
        encryption_types
            .iter()
            .map(|etype| IntegerAsn1::from(vec![etype.asn1_byte()]))
            .collect::<Vec<_>>(),
    )
}

fn kdc_options(options: KdcOptions) -> KerberosFlags {
    KerberosFlags::from(BitString::with_bytes(options.bits().to_be_bytes().to_vec()))
}

/// `PA-ENC-TIMESTAMP` proving knowledge of the long-term key.
#[instrument(level = "trace", skip(key))]
pub fn generate_pa_enc_timestamp(encryption_type: EncryptionType, key: &[u8]) -> Result<PaData> {
    let (now, microseconds) = kerberos_now();
    let timestamp = PaEncTsEnc {
        patimestamp: ExplicitContextTag0::from(now),
        pausec: Optional::from(Some(ExplicitContextTag1::from(microseconds))),
    };

    let encrypted_timestamp = encryption_type.encrypt(
        key,
        PA_ENC_TIMESTAMP_KEY_USAGE,
        &picky_asn1_der::to_vec(&timestamp)?,
    )?;

    Ok(PaData {
        padata_type: ExplicitContextTag1::from(IntegerAsn1::from(PA_ENC_TIMESTAMP.to_vec())),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(picky_asn1_der::to_vec(&encrypted_data(
            encryption_type,
            encrypted_timestamp,
        ))?)),
    })
}

pub fn generate_pa_pac_request() -> Result<PaData> {
    Ok(PaData {
        padata_type: ExplicitContextTag1::from(IntegerAsn1::from(PA_PAC_REQUEST_TYPE.to_vec())),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(picky_asn1_der::to_vec(&KerbPaPacRequest {
            include_pac: ExplicitContextTag0::from(true),
        })?)),
    })
}

/// Parameters for generating [AsReq].
#[derive(Debug)]
pub struct GenerateAsReqOptions<'a> {
    pub realm: &'a str,
    pub username: &'a str,
    pub cname_type: u8,
    pub nonce: u32,
    /// NetBIOS name of this machine, sent as the client address.
    pub client_computer_name: Option<&'a str>,
    pub encryption_types: &'a [EncryptionType],
}

#[instrument(level = "debug", skip_all, fields(realm = options.realm, username = options.username))]
pub fn generate_as_req(options: &GenerateAsReqOptions<'_>, pa_datas: Vec<PaData>) -> Result<AsReq> {
    let expiration_date = expiration_date()?;

    let addresses = options.client_computer_name.map(|name| {
        ExplicitContextTag9::from(Asn1SequenceOf::from(vec![HostAddress {
            addr_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![NET_BIOS_ADDR_TYPE])),
            address: ExplicitContextTag1::from(OctetStringAsn1::from(name.to_uppercase().into_bytes())),
        }]))
    });

    let req_body = KdcReqBody {
        kdc_options: ExplicitContextTag0::from(kdc_options(KdcOptions::AS_REQ_DEFAULT)),
        cname: Optional::from(Some(ExplicitContextTag1::from(principal_name(
            options.cname_type,
            &[options.username],
        )?))),
        realm: ExplicitContextTag2::from(realm(options.realm)?),
        sname: Optional::from(Some(ExplicitContextTag3::from(principal_name(
            NT_SRV_INST,
            &[TGT_SERVICE_NAME, options.realm],
        )?))),
        from: Optional::from(None),
        till: ExplicitContextTag5::from(GeneralizedTimeAsn1::from(expiration_date.clone())),
        rtime: Optional::from(Some(ExplicitContextTag6::from(GeneralizedTimeAsn1::from(expiration_date)))),
        nonce: ExplicitContextTag7::from(u32_to_integer(options.nonce)),
        etype: ExplicitContextTag8::from(etype_list(options.encryption_types)),
        addresses: Optional::from(addresses),
        enc_authorization_data: Optional::from(None),
        additional_tickets: Optional::from(None),
    };

    Ok(AsReq::from(KdcReq {
        pvno: ExplicitContextTag1::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag2::from(IntegerAsn1::from(vec![AS_REQ_MSG_TYPE])),
        padata: Optional::from(Some(ExplicitContextTag3::from(Asn1SequenceOf::from(pa_datas)))),
        req_body: ExplicitContextTag4::from(req_body),
    }))
}

/// Parameters for generating [TgsReq].
#[derive(Debug)]
pub struct GenerateTgsReqOptions<'a> {
    pub realm: &'a str,
    /// Components of the service principal, e.g. `["host", "dc01.contoso.com"]`.
    pub service_principal: &'a [&'a str],
    pub nonce: u32,
    /// TGT and its session key, from the AS exchange or the credential cache.
    pub ticket: Ticket,
    pub session_key_type: EncryptionType,
    pub session_key: &'a [u8],
    pub crealm: Realm,
    pub cname: PrincipalName,
    pub encryption_types: &'a [EncryptionType],
}

#[instrument(level = "debug", skip_all, fields(realm = options.realm))]
pub fn generate_tgs_req(options: GenerateTgsReqOptions<'_>) -> Result<TgsReq> {
    let GenerateTgsReqOptions {
        realm: service_realm,
        service_principal,
        nonce,
        ticket,
        session_key_type,
        session_key,
        crealm,
        cname,
        encryption_types,
    } = options;

    let req_body = KdcReqBody {
        kdc_options: ExplicitContextTag0::from(kdc_options(KdcOptions::TGS_REQ_DEFAULT)),
        cname: Optional::from(None),
        realm: ExplicitContextTag2::from(realm(service_realm)?),
        sname: Optional::from(Some(ExplicitContextTag3::from(principal_name(
            NT_SRV_INST,
            service_principal,
        )?))),
        from: Optional::from(None),
        till: ExplicitContextTag5::from(GeneralizedTimeAsn1::from(expiration_date()?)),
        rtime: Optional::from(None),
        nonce: ExplicitContextTag7::from(u32_to_integer(nonce)),
        etype: ExplicitContextTag8::from(etype_list(encryption_types)),
        addresses: Optional::from(None),
        enc_authorization_data: Optional::from(None),
        additional_tickets: Optional::from(None),
    };

    let body_checksum = Checksum {
        cksumtype: ExplicitContextTag0::from(IntegerAsn1::from(vec![RSA_MD5_CHECKSUM_TYPE])),
        checksum: ExplicitContextTag1::from(OctetStringAsn1::from(
            compute_md5(&picky_asn1_der::to_vec(&req_body)?).to_vec(),
        )),
    };

    let authenticator = generate_authenticator(GenerateAuthenticatorOptions {
        crealm,
        cname,
        seq_number: None,
        subkey: None,
        checksum: Some(body_checksum),
        channel_bindings: None,
    })?;

    let ap_req = generate_ap_req(
        ticket,
        session_key_type,
        session_key,
        &authenticator,
        ApOptionsFlags::empty(),
        TGS_REQ_PA_DATA_AP_REQ_AUTHENTICATOR,
    )?;

    let pa_tgs_req = PaData {
        padata_type: ExplicitContextTag1::from(IntegerAsn1::from(PA_TGS_REQ_TYPE.to_vec())),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(picky_asn1_der::to_vec(&ap_req)?)),
    };

    let pa_pac_options = PaData {
        padata_type: ExplicitContextTag1::from(IntegerAsn1::from(PA_PAC_OPTIONS_TYPE.to_vec())),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(picky_asn1_der::to_vec(&PaPacOptions {
            flags: ExplicitContextTag0::from(KerberosFlags::from(BitString::with_bytes(
                DEFAULT_PA_PAC_OPTIONS.to_vec(),
            ))),
        })?)),
    };

    Ok(TgsReq::from(KdcReq {
        pvno: ExplicitContextTag1::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag2::from(IntegerAsn1::from(vec![TGS_REQ_MSG_TYPE])),
        padata: Optional::from(Some(ExplicitContextTag3::from(Asn1SequenceOf::from(vec![
            pa_tgs_req,
            pa_pac_options,
        ])))),
        req_body: ExplicitContextTag4::from(req_body),
    }))
}

/// The `0x8003` GSS checksum of an AP-REQ authenticator.
pub fn generate_gss_checksum(flags: GssFlags, channel_bindings: Option<&ChannelBindings>) -> Checksum {
    let mut value = [0x00; AUTHENTICATOR_CHECKSUM_LEN];
    value[..4].copy_from_slice(&16u32.to_le_bytes());
    if let Some(channel_bindings) = channel_bindings {
        value[CHANNEL_BINDINGS_HASH_RANGE].copy_from_slice(&channel_bindings.gss_hash());
    }
    value[CHECKSUM_FLAGS_RANGE].copy_from_slice(&flags.bits().to_le_bytes());

    Checksum {
        cksumtype: ExplicitContextTag0::from(IntegerAsn1::from(AUTHENTICATOR_CHECKSUM_TYPE.to_vec())),
        checksum: ExplicitContextTag1::from(OctetStringAsn1::from(value.to_vec())),
    }
}

/// Input parameters for generating an [Authenticator].
#[derive(Debug)]
pub struct GenerateAuthenticatorOptions<'a> {
    pub crealm: Realm,
    pub cname: PrincipalName,
    pub seq_number: Option<u32>,
    pub subkey: Option<(EncryptionType, &'a [u8])>,
    pub checksum: Option<Checksum>,
    /// Adds the `KERB_AP_OPTIONS_CBT` authorization data.
    pub channel_bindings: Option<&'a ChannelBindings>,
}

pub fn generate_authenticator(options: GenerateAuthenticatorOptions<'_>) -> Result<Authenticator> {
    let GenerateAuthenticatorOptions {
        crealm,
        cname,
        seq_number,
        subkey,
        checksum,
        channel_bindings,
    } = options;

    let (ctime, cusec) = kerberos_now();

    let authorization_data = Optional::from(channel_bindings.map(|_| {
        ExplicitContextTag8::from(AuthorizationData::from(vec![AuthorizationDataInner {
            ad_type: ExplicitContextTag0::from(IntegerAsn1::from(AD_AUTH_DATA_AP_OPTION_TYPE.to_vec())),
            ad_data: ExplicitContextTag1::from(OctetStringAsn1::from(KERB_AP_OPTIONS_CBT.to_vec())),
        }]))
    }));

    Ok(Authenticator::from(AuthenticatorInner {
        authenticator_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        crealm: ExplicitContextTag1::from(crealm),
        cname: ExplicitContextTag2::from(cname),
        cksum: Optional::from(checksum.map(ExplicitContextTag3::from)),
        cusec: ExplicitContextTag4::from(cusec),
        ctime: ExplicitContextTag5::from(ctime),
        subkey: Optional::from(subkey.map(|(key_type, key_value)| {
            ExplicitContextTag6::from(EncryptionKey {
                key_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![key_type.asn1_byte()])),
                key_value: ExplicitContextTag1::from(OctetStringAsn1::from(key_value.to_vec())),
            })
        })),
        seq_number: Optional::from(seq_number.map(|seq_number| ExplicitContextTag7::from(u32_to_integer(seq_number)))),
        authorization_data,
    }))
}

/// Encrypts the authenticator with `session_key` under `key_usage`: 11 for an
/// application request, 7 when the AP-REQ authenticates a TGS-REQ.
#[instrument(level = "trace", skip(ticket, session_key, authenticator))]
pub fn generate_ap_req(
    ticket: Ticket,
    encryption_type: EncryptionType,
    session_key: &[u8],
    authenticator: &Authenticator,
    options: ApOptionsFlags,
    key_usage: i32,
) -> Result<ApReq> {
    let encrypted_authenticator =
        encryption_type.encrypt(session_key, key_usage, &picky_asn1_der::to_vec(authenticator)?)?;

    Ok(ApReq::from(ApReqInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![AP_REQ_MSG_TYPE])),
        ap_options: ExplicitContextTag2::from(ApOptions::from(BitString::with_bytes(
            options.bits().to_be_bytes().to_vec(),
        ))),
        ticket: ExplicitContextTag3::from(ticket),
        authenticator: ExplicitContextTag4::from(encrypted_data(encryption_type, encrypted_authenticator)),
    }))
}

/// The AP-REP sent by the initiator as the third leg of a DCE style exchange.
#[instrument(level = "trace", skip(session_key))]
pub fn generate_ap_rep(encryption_type: EncryptionType, session_key: &[u8], seq_number: u32) -> Result<ApRep> {
    let (ctime, cusec) = kerberos_now();

    let enc_ap_rep_part = EncApRepPart::from(EncApRepPartInner {
        ctime: ExplicitContextTag0::from(ctime),
        cusec: ExplicitContextTag1::from(cusec),
        subkey: Optional::from(None),
        seq_number: Optional::from(Some(ExplicitContextTag3::from(u32_to_integer(seq_number)))),
    });

    let encrypted = encryption_type.encrypt(session_key, AP_REP_ENC, &picky_asn1_der::to_vec(&enc_ap_rep_part)?)?;

    Ok(ApRep::from(ApRepInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![AP_REP_MSG_TYPE])),
        enc_part: ExplicitContextTag2::from(encrypted_data(encryption_type, encrypted)),
    }))
}

#[cfg(test)]
mod tests {
    use picky_krb::constants::types::NT_PRINCIPAL;

    use super::*;

    #[test]
    fn gss_checksum_carries_bindings_and_flags() {
        let bindings = ChannelBindings::from_application_data(b"tls-server-end-point:0123".to_vec());
        let checksum = generate_gss_checksum(GssFlags::GSS_C_MUTUAL_FLAG | GssFlags::GSS_C_DCE_STYLE, Some(&bindings));
        let value = &checksum.checksum.0 .0;

        assert_eq!(value.len(), AUTHENTICATOR_CHECKSUM_LEN);
        assert_eq!(&value[..4], &[0x10, 0x00, 0x00, 0x00]);
        assert_eq!(&value[4..20], &bindings.gss_hash());
        assert_eq!(&value[20..], &[0x02, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn as_req_lists_requested_etypes() {
        let as_req = generate_as_req(
            &GenerateAsReqOptions {
                realm: "CONTOSO.COM",
                username: "alice",
                cname_type: NT_PRINCIPAL,
                nonce: 0x8765_4321,
                client_computer_name: Some("ws01"),
                encryption_types: &[EncryptionType::Aes256CtsHmacSha196, EncryptionType::Rc4Hmac],
            },
            vec![generate_pa_pac_request().unwrap()],
        )
        .unwrap();

        let body = &as_req.0.req_body.0;
        let etypes: Vec<_> = body.etype.0 .0.iter().map(|etype| etype.0.clone()).collect();
        assert_eq!(etypes, vec![vec![18], vec![23]]);
        assert_eq!(body.realm.0.to_string(), "CONTOSO.COM");
        assert_eq!(body.nonce.0 .0, vec![0x00, 0x87, 0x65, 0x43, 0x21]);

        let encoded = picky_asn1_der::to_vec(&as_req).unwrap();
        let decoded: AsReq = picky_asn1_der::from_bytes(&encoded).unwrap();
        assert_eq!(decoded.0.req_body.0.cname.0.as_ref().unwrap().0.name_string.0 .0[0].to_string(), "alice");
    }

    #[test]
    fn dce_ap_rep_echoes_the_sequence_number() {
        let key = EncryptionType::Aes128CtsHmacSha196.random_key();
        let ap_rep = generate_ap_rep(EncryptionType::Aes128CtsHmacSha196, &key, 0x0102_0304).unwrap();

        let plain = EncryptionType::Aes128CtsHmacSha196
            .decrypt(&key, AP_REP_ENC, &ap_rep.0.enc_part.0.cipher.0 .0)
            .unwrap();
        let part: EncApRepPart = picky_asn1_der::from_bytes(&plain).unwrap();

        assert_eq!(part.0.seq_number.0.unwrap().0 .0, vec![0x01, 0x02, 0x03, 0x04]);
    }
}
