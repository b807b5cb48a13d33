//! Ticket acquisition: an AS exchange for the TGT of the client principal and a TGS
//! exchange for the service ticket of the target.

pub mod extractors;
pub mod generators;

use picky_krb::constants::error_codes::KDC_ERR_PREAUTH_REQUIRED;
use picky_krb::constants::types::NT_PRINCIPAL;
use picky_krb::data_types::{PrincipalName, Realm, Ticket};
use picky_krb::messages::{AsRep, TgsRep};
use rand::rngs::OsRng;
use rand::RngCore;

use self::extractors::{
    extract_as_rep_encryption_type, extract_etype_info_from_as_rep, extract_etype_info_from_krb_error,
    extract_session_key_from_as_rep, extract_session_key_from_tgs_rep, EtypeInfo,
};
use self::generators::{
    generate_as_req, generate_pa_enc_timestamp, generate_pa_pac_request, generate_tgs_req, principal_name, realm,
    GenerateAsReqOptions, GenerateTgsReqOptions,
};
use crate::credential::ccache::{CachedCredential, CredentialCache};
use crate::credential::keytab::Keytab;
use crate::credential::{Credential, Principal};
use crate::kerberos::config::KerberosConfig;
use crate::kerberos::encryption::EncryptionType;
use crate::kerberos::utils::decode_kdc_reply;
use crate::network_client::NetworkRequest;
use crate::secret::Secret;
use crate::utils::{get_domain_from_fqdn, split_service_principal};
use crate::{Error, ErrorKind, Result};

/// A ticket together with the session key the KDC issued for it.
#[derive(Debug, Clone)]
pub struct AcquiredTicket {
    pub ticket: Ticket,
    pub session_key_type: EncryptionType,
    pub session_key: Secret<Vec<u8>>,
    pub crealm: Realm,
    pub cname: PrincipalName,
}

/// Long-term key material of the client principal.
enum ClientKey<'a> {
    Password(&'a str),
    Key {
        encryption_type: EncryptionType,
        value: &'a [u8],
    },
    Keytab(Keytab),
}

impl ClientKey<'_> {
    fn supports(&self, encryption_type: EncryptionType, username: &str, realm: &str) -> bool {
        match self {
            ClientKey::Password(_) => true,
            ClientKey::Key {
                encryption_type: key_type,
                ..
            } => *key_type == encryption_type,
            ClientKey::Keytab(keytab) => keytab.find(username, realm, encryption_type.id()).is_some(),
        }
    }

    fn key(&self, encryption_type: EncryptionType, salt: &str, username: &str, realm: &str) -> Result<Secret<Vec<u8>>> {
        match self {
            ClientKey::Password(password) => Ok(Secret::new(encryption_type.string_to_key(password, salt)?)),
            ClientKey::Key {
                encryption_type: key_type,
                value,
            } if *key_type == encryption_type => Ok(Secret::new(value.to_vec())),
            ClientKey::Keytab(keytab) => keytab
                .find(username, realm, encryption_type.id())
                .map(|entry| entry.key.clone())
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::DefectiveCredential,
                        format!("keytab has no {} key for {}@{}", encryption_type, username, realm),
                    )
                }),
            ClientKey::Key { encryption_type: key_type, .. } => Err(Error::new(
                ErrorKind::DefectiveCredential,
                format!("the KDC asked for a {} key but the credential holds a {} key", encryption_type, key_type),
            )),
        }
    }
}

fn client_key(credential: &Credential) -> Result<ClientKey<'_>> {
    match credential {
        Credential::Password { password, .. } => Ok(ClientKey::Password(password.as_ref().as_str())),
        Credential::NtHash { hash, .. } => Ok(ClientKey::Key {
            encryption_type: EncryptionType::Rc4Hmac,
            value: hash.as_ref().as_slice(),
        }),
        Credential::EncryptionKey { key_type, value, .. } => {
            let encryption_type = EncryptionType::from_id(i64::from(*key_type)).ok_or_else(|| {
                Error::new(
                    ErrorKind::DefectiveCredential,
                    format!("unsupported Kerberos key type {}", key_type),
                )
            })?;

            Ok(ClientKey::Key {
                encryption_type,
                value: value.as_ref().as_slice(),
            })
        }
        Credential::Keytab { path, .. } => Ok(ClientKey::Keytab(Keytab::load(path)?)),
        other => Err(Error::new(
            ErrorKind::DefectiveCredential,
            format!("{} credential has no Kerberos key", other.kind_name()),
        )),
    }
}

fn random_nonce() -> u32 {
    OsRng.next_u32() & 0x7fff_ffff
}

fn send(config: &KerberosConfig, realm: &str, data: Vec<u8>) -> Result<Vec<u8>> {
    let url = config.kdc_url_for(realm)?;
    debug!(%url, "sending KDC request");

    config.network_client.send(&NetworkRequest::new(url, data)?)
}

/// Default salt of a principal: the realm followed by the name components.
fn default_salt(realm: &str, username: &str) -> String {
    format!("{}{}", realm, username)
}

/// First KDC offered etype that is configured and that the key source can produce.
fn select_etype_info(
    etype_info: &[EtypeInfo],
    config: &KerberosConfig,
    key: &ClientKey<'_>,
    username: &str,
    realm: &str,
) -> Option<(EncryptionType, Option<String>)> {
    etype_info.iter().find_map(|info| {
        let encryption_type = EncryptionType::from_id(i64::from(info.etype))?;

        (config.encryption_types.contains(&encryption_type) && key.supports(encryption_type, username, realm))
            .then(|| (encryption_type, info.salt.clone()))
    })
}

fn decrypt_as_rep(
    as_rep: AsRep,
    key: &ClientKey<'_>,
    salt: &str,
    username: &str,
    realm: &str,
) -> Result<AcquiredTicket> {
    let encryption_type = extract_as_rep_encryption_type(&as_rep)?;
    let salt = extract_etype_info_from_as_rep(&as_rep)?
        .into_iter()
        .find(|info| info.etype == encryption_type.id())
        .and_then(|info| info.salt)
        .unwrap_or_else(|| salt.to_owned());

    let client_key = key.key(encryption_type, &salt, username, realm)?;
    let (session_key_type, session_key) = extract_session_key_from_as_rep(&as_rep, client_key.as_ref())?;
    debug!(%encryption_type, %session_key_type, "TGT acquired");

    let kdc_rep = as_rep.0;

    Ok(AcquiredTicket {
        ticket: kdc_rep.ticket.0,
        session_key_type,
        session_key,
        crealm: kdc_rep.crealm.0,
        cname: kdc_rep.cname.0,
    })
}

/// Requests a TGT, answering a `KDC_ERR_PREAUTH_REQUIRED` error with an encrypted timestamp.
#[instrument(level = "debug", skip(config, credential))]
pub fn as_exchange(config: &KerberosConfig, credential: &Credential, realm: &str) -> Result<AcquiredTicket> {
    let username = credential.identity().username.as_str();
    let key = client_key(credential)?;

    let options = GenerateAsReqOptions {
        realm,
        username,
        cname_type: NT_PRINCIPAL,
        nonce: random_nonce(),
        client_computer_name: config.client_computer_name.as_deref(),
        encryption_types: &config.encryption_types,
    };

    let as_req = generate_as_req(&options, vec![generate_pa_pac_request()?])?;
    let reply = send(config, realm, picky_asn1_der::to_vec(&as_req)?)?;

    let krb_error = match decode_kdc_reply::<AsRep>(&reply)? {
        Ok(as_rep) => {
            warn!("the KDC issued a TGT without pre-authentication");

            return decrypt_as_rep(as_rep, &key, &default_salt(realm, username), username, realm);
        }
        Err(krb_error) => krb_error,
    };

    if krb_error.0.error_code.0 != KDC_ERR_PREAUTH_REQUIRED {
        return Err(krb_error.into());
    }

    let etype_info = extract_etype_info_from_krb_error(&krb_error)?;
    let (encryption_type, salt) = select_etype_info(&etype_info, config, &key, username, realm)
        .or_else(|| {
            // no usable hint, fall back to the first configured etype with the default salt
            config
                .encryption_types
                .iter()
                .copied()
                .find(|encryption_type| key.supports(*encryption_type, username, realm))
                .map(|encryption_type| (encryption_type, None))
        })
        .ok_or_else(|| {
            Error::new(
                ErrorKind::DefectiveCredential,
                "the credential has no key of any encryption type offered by the KDC",
            )
        })?;
    let salt = salt.unwrap_or_else(|| default_salt(realm, username));
    debug!(%encryption_type, "pre-authenticating");

    let client_key = key.key(encryption_type, &salt, username, realm)?;
    let pa_datas = vec![
        generate_pa_enc_timestamp(encryption_type, client_key.as_ref())?,
        generate_pa_pac_request()?,
    ];

    let as_req = generate_as_req(
        &GenerateAsReqOptions {
            nonce: random_nonce(),
            ..options
        },
        pa_datas,
    )?;
    let reply = send(config, realm, picky_asn1_der::to_vec(&as_req)?)?;

    let as_rep = decode_kdc_reply::<AsRep>(&reply)?.map_err(Error::from)?;

    decrypt_as_rep(as_rep, &key, &salt, username, realm)
}

/// Exchanges the TGT for a ticket of `service_principal` in `service_realm`.
#[instrument(level = "debug", skip(config, tgt))]
pub fn tgs_exchange(
    config: &KerberosConfig,
    tgt: &AcquiredTicket,
    service_realm: &str,
    service_principal: &[&str],
) -> Result<AcquiredTicket> {
    let tgs_req = generate_tgs_req(GenerateTgsReqOptions {
        realm: service_realm,
        service_principal,
        nonce: random_nonce(),
        ticket: tgt.ticket.clone(),
        session_key_type: tgt.session_key_type,
        session_key: tgt.session_key.as_ref(),
        crealm: tgt.crealm.clone(),
        cname: tgt.cname.clone(),
        encryption_types: &config.encryption_types,
    })?;

    let reply = send(config, service_realm, picky_asn1_der::to_vec(&tgs_req)?)?;
    let tgs_rep = decode_kdc_reply::<TgsRep>(&reply)?.map_err(Error::from)?;

    let (session_key_type, session_key) =
        extract_session_key_from_tgs_rep(&tgs_rep, tgt.session_key_type, tgt.session_key.as_ref())?;
    debug!(%session_key_type, "service ticket acquired");

    let kdc_rep = tgs_rep.0;

    Ok(AcquiredTicket {
        ticket: kdc_rep.ticket.0,
        session_key_type,
        session_key,
        crealm: kdc_rep.crealm.0,
        cname: kdc_rep.cname.0,
    })
}

fn cached_ticket(cached: &CachedCredential) -> Result<AcquiredTicket> {
    let session_key_type = EncryptionType::from_id(i64::from(cached.key_type)).ok_or_else(|| {
        Error::new(
            ErrorKind::DefectiveCredential,
            format!("cached ticket uses unsupported key type {}", cached.key_type),
        )
    })?;

    Ok(AcquiredTicket {
        ticket: picky_asn1_der::from_bytes(&cached.ticket)?,
        session_key_type,
        session_key: cached.key.clone(),
        crealm: realm(&cached.client.realm)?,
        cname: cached_principal_name(&cached.client)?,
    })
}

fn cached_principal_name(principal: &Principal) -> Result<PrincipalName> {
    let name_type = u8::try_from(principal.name_type).map_err(|_| {
        Error::new(
            ErrorKind::DefectiveCredential,
            format!("unsupported principal name type {}", principal.name_type),
        )
    })?;
    let components = principal.components.iter().map(String::as_str).collect::<Vec<_>>();

    principal_name(name_type, &components)
}

/// Obtains a service ticket for `target_name`, from the credential cache when the
/// credential points at one, or through the AS and TGS exchanges otherwise.
#[instrument(level = "debug", skip(config, credential), fields(credential = credential.kind_name()))]
pub fn acquire_service_ticket(
    config: &KerberosConfig,
    credential: &Credential,
    target_name: &str,
) -> Result<AcquiredTicket> {
    let (service, host) = split_service_principal(target_name).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidParameter,
            format!("{:?} is not a service principal name", target_name),
        )
    })?;
    let spn = format!("{}/{}", service, host);

    if let Credential::CredentialCache { path, identity } = credential {
        let ccache = CredentialCache::load(path)?;
        let client_realm = if identity.domain.is_empty() {
            ccache.default_principal.realm.clone()
        } else {
            config.client_realm(&identity.domain)?
        };
        let service_realm = get_domain_from_fqdn(target_name)
            .map(str::to_uppercase)
            .unwrap_or_else(|| client_realm.clone());

        if let Some(cached) = ccache.find_service_ticket(&spn, &service_realm) {
            debug!(%spn, "using a cached service ticket");

            return cached_ticket(cached);
        }

        let tgt = ccache.find_tgt(&client_realm).ok_or_else(|| {
            Error::new(
                ErrorKind::DefectiveCredential,
                format!("credential cache has no ticket for {} nor a TGT for {}", spn, client_realm),
            )
        })?;

        return tgs_exchange(config, &cached_ticket(tgt)?, &service_realm, &[service, host]);
    }

    let client_realm = config.client_realm(&credential.identity().domain)?;
    let service_realm = get_domain_from_fqdn(target_name)
        .map(str::to_uppercase)
        .unwrap_or_else(|| client_realm.clone());

    let tgt = as_exchange(config, credential, &client_realm)?;

    tgs_exchange(config, &tgt, &service_realm, &[service, host])
}
