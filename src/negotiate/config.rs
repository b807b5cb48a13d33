use crate::config::{MechanismKind, ProtocolConfig};
use crate::context::Capabilities;
use crate::credential::Credential;
use crate::kerberos::KerberosConfig;
use crate::ntlm::NtlmConfig;
use crate::security_context::SecurityContext;
use crate::{Result, Spnego};

/// Candidate mechanisms, most preferred first. The first one supplies the optimistic token.
#[derive(Debug, Clone)]
pub struct NegotiateConfig {
    pub protocol_configs: Vec<Box<dyn ProtocolConfig>>,
}

impl NegotiateConfig {
    pub fn new(protocol_configs: Vec<Box<dyn ProtocolConfig>>) -> Self {
        Self { protocol_configs }
    }

    pub fn from_protocol_config(protocol_config: Box<dyn ProtocolConfig>) -> Self {
        Self {
            protocol_configs: vec![protocol_config],
        }
    }
}

impl Default for NegotiateConfig {
    /// Kerberos with an NTLM fallback.
    fn default() -> Self {
        Self {
            protocol_configs: vec![Box::new(KerberosConfig::default()), Box::new(NtlmConfig::default())],
        }
    }
}

impl ProtocolConfig for NegotiateConfig {
    fn mechanism(&self) -> MechanismKind {
        MechanismKind::Spnego
    }

    fn new_context(
        &self,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<SecurityContext> {
        Ok(SecurityContext::Spnego(Box::new(Spnego::new(
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
