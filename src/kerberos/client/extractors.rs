use picky_asn1::wrapper::Asn1SequenceOf;
use picky_krb::constants::key_usages::{AP_REP_ENC, AS_REP_ENC, TGS_REP_ENC_SESSION_KEY};
use picky_krb::constants::types::PA_ETYPE_INFO2_TYPE;
use picky_krb::data_types::{EncApRepPart, EncryptionKey, EtypeInfo2, PaData};
use picky_krb::messages::{ApRep, AsRep, EncAsRepPart, EncTgsRepPart, KdcRep, KrbError, TgsRep};

use crate::kerberos::encryption::EncryptionType;
use crate::kerberos::utils::{integer_to_i32, integer_to_u32};
use crate::secret::Secret;
use crate::{Error, ErrorKind, Result};

/// One `ETYPE-INFO2-ENTRY`: a key type the KDC knows for the client and its salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtypeInfo {
    /// Raw id, possibly one this crate cannot use.
    pub etype: i32,
    pub salt: Option<String>,
}

fn etype_info_from_pa_datas(pa_datas: &[PaData]) -> Result<Vec<EtypeInfo>> {
    let Some(pa_etype_info2) = pa_datas
        .iter()
        .find(|pa_data| pa_data.padata_type.0 .0 == PA_ETYPE_INFO2_TYPE)
    else {
        return Ok(Vec::new());
    };

    let etype_info2: EtypeInfo2 = picky_asn1_der::from_bytes(&pa_etype_info2.padata_data.0 .0)?;

    etype_info2
        .0
        .iter()
        .map(|entry| {
            Ok(EtypeInfo {
                etype: integer_to_i32(&entry.etype.0)?,
                salt: entry.salt.0.as_ref().map(|salt| salt.0.to_string()),
            })
        })
        .collect()
}

/// `ETYPE-INFO2` of a `KDC_ERR_PREAUTH_REQUIRED` error.
pub fn extract_etype_info_from_krb_error(error: &KrbError) -> Result<Vec<EtypeInfo>> {
    let Some(e_data) = error.0.e_data.0.as_ref() else {
        return Ok(Vec::new());
    };

    let pa_datas: Asn1SequenceOf<PaData> = picky_asn1_der::from_bytes(&e_data.0 .0)?;

    etype_info_from_pa_datas(&pa_datas.0)
}

/// `ETYPE-INFO2` echoed in the AS-REP padata.
pub fn extract_etype_info_from_as_rep(as_rep: &AsRep) -> Result<Vec<EtypeInfo>> {
    match as_rep.0.padata.0.as_ref() {
        Some(pa_datas) => etype_info_from_pa_datas(&pa_datas.0 .0),
        None => Ok(Vec::new()),
    }
}

fn reply_encryption_type(kdc_rep: &KdcRep) -> Result<EncryptionType> {
    let id = integer_to_i32(&kdc_rep.enc_part.0.etype.0)?;

    EncryptionType::from_id(i64::from(id))
        .ok_or_else(|| Error::new(ErrorKind::Failure, format!("KDC reply uses unsupported etype {}", id)))
}

fn session_key(key: &EncryptionKey) -> Result<(EncryptionType, Secret<Vec<u8>>)> {
    let id = integer_to_i32(&key.key_type.0)?;
    let encryption_type = EncryptionType::from_id(i64::from(id))
        .ok_or_else(|| Error::new(ErrorKind::Failure, format!("unsupported session key type {}", id)))?;

    Ok((encryption_type, Secret::new(key.key_value.0 .0.clone())))
}

/// The etype the AS-REP `enc-part` is encrypted with, i.e. the type of the client key.
pub fn extract_as_rep_encryption_type(as_rep: &AsRep) -> Result<EncryptionType> {
    reply_encryption_type(&as_rep.0)
}

/// Decrypts the AS-REP with the client's long-term key and returns the TGT session key.
#[instrument(level = "trace", skip_all)]
pub fn extract_session_key_from_as_rep(
    as_rep: &AsRep,
    client_key: &[u8],
) -> Result<(EncryptionType, Secret<Vec<u8>>)> {
    let encryption_type = reply_encryption_type(&as_rep.0)?;
    let enc_data = encryption_type.decrypt(client_key, AS_REP_ENC, &as_rep.0.enc_part.0.cipher.0 .0)?;

    // some KDCs tag the AS-REP part as a TGS-REP part
    let key = match picky_asn1_der::from_bytes::<EncAsRepPart>(&enc_data) {
        Ok(enc_as_rep_part) => enc_as_rep_part.0.key.0,
        Err(_) => picky_asn1_der::from_bytes::<EncTgsRepPart>(&enc_data)?.0.key.0,
    };

    session_key(&key)
}

/// Decrypts the TGS-REP with the TGT session key and returns the service session key.
#[instrument(level = "trace", skip_all)]
pub fn extract_session_key_from_tgs_rep(
    tgs_rep: &TgsRep,
    tgt_key_type: EncryptionType,
    tgt_session_key: &[u8],
) -> Result<(EncryptionType, Secret<Vec<u8>>)> {
    let enc_data = tgt_key_type.decrypt(
        tgt_session_key,
        TGS_REP_ENC_SESSION_KEY,
        &tgs_rep.0.enc_part.0.cipher.0 .0,
    )?;

    let enc_tgs_rep_part: EncTgsRepPart = picky_asn1_der::from_bytes(&enc_data)?;

    session_key(&enc_tgs_rep_part.0.key.0)
}

/// Decrypted AP-REP content.
#[derive(Debug)]
pub struct ApRepPart {
    pub subkey: Option<(EncryptionType, Secret<Vec<u8>>)>,
    pub seq_number: Option<u32>,
}

#[instrument(level = "trace", skip_all)]
pub fn extract_ap_rep_part(ap_rep: &ApRep, encryption_type: EncryptionType, key: &[u8]) -> Result<ApRepPart> {
    let enc_data = encryption_type
        .decrypt(key, AP_REP_ENC, &ap_rep.0.enc_part.0.cipher.0 .0)
        .map_err(|err| Error::new(ErrorKind::BadMic, format!("cannot decrypt the AP-REP: {}", err.description)))?;

    let enc_ap_rep_part: EncApRepPart = picky_asn1_der::from_bytes(&enc_data)?;

    let subkey = enc_ap_rep_part
        .0
        .subkey
        .0
        .as_ref()
        .map(|subkey| session_key(&subkey.0))
        .transpose()?;
    let seq_number = enc_ap_rep_part
        .0
        .seq_number
        .0
        .as_ref()
        .map(|seq_number| integer_to_u32(&seq_number.0))
        .transpose()?;

    Ok(ApRepPart { subkey, seq_number })
}
