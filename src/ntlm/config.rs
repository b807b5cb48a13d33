use crate::config::{MechanismKind, ProtocolConfig};
use crate::context::Capabilities;
use crate::credential::Credential;
use crate::security_context::SecurityContext;
use crate::{Ntlm, Result};

#[derive(Debug, Clone, Default)]
pub struct NtlmConfig {
    /// Workstation name sent when the credential does not carry one.
    pub workstation: Option<String>,
    /// Use NTLMv1 responses instead of NTLMv2.
    pub ntlm_v1: bool,
    /// Do not request extended session security.
    pub no_ess: bool,
}

impl NtlmConfig {
    pub fn new(workstation: String) -> Self {
        Self {
            workstation: Some(workstation),
            ..Default::default()
        }
    }
}

impl ProtocolConfig for NtlmConfig {
    fn mechanism(&self) -> MechanismKind {
        MechanismKind::Ntlm
    }

    fn new_context(
        &self,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<SecurityContext> {
        Ok(SecurityContext::Ntlm(Ntlm::new(
            self.clone(),
            credential,
            capabilities,
            target_name,
        )?))
    }

    fn box_clone(&self) -> Box<dyn ProtocolConfig> {
        Box::new(self.clone())
    }
}
