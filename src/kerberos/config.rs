use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::config::{MechanismKind, ProtocolConfig};
use crate::context::Capabilities;
use crate::credential::Credential;
use crate::kdc::{detect_kdc_url, parse_kdc_url};
use crate::kerberos::encryption::EncryptionType;
use crate::krb5_conf::Krb5Conf;
use crate::network_client::{NetworkClient, StdNetworkClient};
use crate::security_context::SecurityContext;
use crate::{Error, ErrorKind, Kerberos, Result};

const DEFAULT_KDC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct KerberosConfig {
    /// KDC used for every realm. Detected from the environment or `krb5.conf` when unset.
    pub kdc_url: Option<Url>,
    pub krb5_conf_path: Option<PathBuf>,
    /// Requested ticket encryption types, by preference.
    pub encryption_types: Vec<EncryptionType>,
    /// Raw AP-REQ/AP-REP tokens and the third leg expected by DCE RPC.
    pub dce_style: bool,
    pub mutual_authn: bool,
    /// Kept for configuration compatibility, FAST armoring is never attempted.
    pub disable_pafx_fast: bool,
    pub timeout: Duration,
    /// NetBIOS address sent in the AS-REQ.
    pub client_computer_name: Option<String>,
    pub network_client: Box<dyn NetworkClient>,
}

impl Debug for KerberosConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KerberosConfig")
            .field("kdc_url", &self.kdc_url)
            .field("encryption_types", &self.encryption_types)
            .field("dce_style", &self.dce_style)
            .field("mutual_authn", &self.mutual_authn)
            .finish_non_exhaustive()
    }
}

impl Default for KerberosConfig {
    fn default() -> Self {
        Self {
            kdc_url: None,
            krb5_conf_path: None,
            encryption_types: vec![
                EncryptionType::Aes256CtsHmacSha196,
                EncryptionType::Aes128CtsHmacSha196,
                EncryptionType::Rc4Hmac,
            ],
            dce_style: true,
            mutual_authn: false,
            disable_pafx_fast: true,
            timeout: DEFAULT_KDC_TIMEOUT,
            client_computer_name: None,
            network_client: Box::new(StdNetworkClient::new(DEFAULT_KDC_TIMEOUT)),
        }
    }
}

impl KerberosConfig {
    pub fn new(kdc_url: &str, client_computer_name: String) -> Self {
        Self {
            kdc_url: parse_kdc_url(kdc_url),
            client_computer_name: Some(client_computer_name),
            ..Default::default()
        }
    }

    pub fn from_kdc_url(kdc_url: &str) -> Self {
        Self {
            kdc_url: parse_kdc_url(kdc_url),
            ..Default::default()
        }
    }

    /// Also rebuilds the default network client so that it honors the new timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.network_client = Box::new(StdNetworkClient::new(timeout));
        self
    }

    pub fn with_network_client(mut self, network_client: Box<dyn NetworkClient>) -> Self {
        self.network_client = network_client;
        self
    }

    pub fn kdc_url_for(&self, realm: &str) -> Result<Url> {
        if let Some(url) = &self.kdc_url {
            return Ok(url.clone());
        }

        detect_kdc_url(realm, self.krb5_conf_path.as_deref())
            .ok_or_else(|| Error::new(ErrorKind::Failure, format!("no KDC found for realm {}", realm)))
    }

    /// Realm of the client principal: the `[domain_realm]` mapping of the domain, the
    /// upper-cased domain, or the default realm when the credential has no domain.
    pub fn client_realm(&self, domain: &str) -> Result<String> {
        let conf = Krb5Conf::load(self.krb5_conf_path.as_deref());

        if domain.is_empty() {
            return conf
                .as_ref()
                .and_then(|conf| conf.default_realm())
                .map(str::to_owned)
                .ok_or_else(|| Error::new(ErrorKind::DefectiveCredential, "the credential has no realm"));
        }

        Ok(conf
            .as_ref()
            .and_then(|conf| conf.realm_for_host(domain))
            .map(str::to_owned)
            .unwrap_or_else(|| domain.to_uppercase()))
    }
}

impl ProtocolConfig for KerberosConfig {
    fn mechanism(&self) -> MechanismKind {
        MechanismKind::Kerberos
    }

    fn new_context(
        &self,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<SecurityContext> {
        Ok(SecurityContext::Kerberos(Box::new(Kerberos::new(
            self.clone(),
            credential,
            capabilities,
            target_name,
        )?)))
    }

    fn box_clone(&self) -> Box<dyn ProtocolConfig> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn explicit_kdc_wins() {
        let config = KerberosConfig::from_kdc_url("dc01.contoso.com:88");

        assert_eq!(
            config.kdc_url_for("CONTOSO.COM").unwrap().as_str(),
            "tcp://dc01.contoso.com:88"
        );
    }

    #[test]
    fn client_realm_follows_domain_realm_mapping() {
        let dir = std::env::temp_dir().join(format!("msrpc-ssp-realm-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("krb5.conf");
        fs::write(
            &path,
            "[libdefaults]\n    default_realm = CORP.CONTOSO.COM\n[domain_realm]\n    .lab.contoso.com = LAB.CONTOSO.COM\n",
        )
        .unwrap();

        let config = KerberosConfig {
            krb5_conf_path: Some(path),
            ..Default::default()
        };

        assert_eq!(config.client_realm("dev.lab.contoso.com").unwrap(), "LAB.CONTOSO.COM");
        assert_eq!(config.client_realm("fabrikam.com").unwrap(), "FABRIKAM.COM");
        assert_eq!(config.client_realm("").unwrap(), "CORP.CONTOSO.COM");

        fs::remove_dir_all(dir).unwrap();
    }
}
