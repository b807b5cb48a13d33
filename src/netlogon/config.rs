use super::credential::CHALLENGE_SIZE;
use crate::config::{MechanismKind, ProtocolConfig};
use crate::context::Capabilities;
use crate::credential::Credential;
use crate::security_context::SecurityContext;
use crate::{Netlogon, Result};

/// Secure channel parameters agreed through `NetrServerReqChallenge` and
/// `NetrServerAuthenticate3` before the security context is created.
#[derive(Debug, Clone)]
pub struct NetlogonConfig {
    /// Computer account name sent in the negotiate message when the credential does not carry one.
    pub computer_name: Option<String>,
    /// `NETLOGON_NEG_SUPPORTS_AES`: HMAC-SHA256 session key, AES-CFB8 sealing.
    pub aes: bool,
    /// `NETLOGON_NEG_STRONG_KEYS`, used when AES was not negotiated.
    pub strong_key: bool,
    pub client_challenge: [u8; CHALLENGE_SIZE],
    pub server_challenge: [u8; CHALLENGE_SIZE],
}

impl Default for NetlogonConfig {
    fn default() -> Self {
        Self {
            computer_name: None,
            aes: true,
            strong_key: true,
            client_challenge: [0x00; CHALLENGE_SIZE],
            server_challenge: [0x00; CHALLENGE_SIZE],
        }
    }
}

impl NetlogonConfig {
    pub fn new(client_challenge: [u8; CHALLENGE_SIZE], server_challenge: [u8; CHALLENGE_SIZE]) -> Self {
        Self {
            client_challenge,
            server_challenge,
            ..Default::default()
        }
    }
}

impl ProtocolConfig for NetlogonConfig {
    fn mechanism(&self) -> MechanismKind {
        MechanismKind::Netlogon
    }

    fn new_context(
        &self,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<SecurityContext> {
        Ok(SecurityContext::Netlogon(Netlogon::new(
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
