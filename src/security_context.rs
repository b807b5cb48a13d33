use crate::channel_bindings::ChannelBindings;
use crate::config::{MechanismKind, ProtocolConfig};
use crate::context::{Capabilities, InitializeResult, Mechanism, SecurityBuffer, SequenceState};
use crate::credential::Credential;
use crate::{kerberos, negotiate, netlogon, ntlm, Kerberos, Netlogon, Ntlm, Result, Spnego};

/// A security context of any supported mechanism.
///
/// This is what a transport holds per connection: it is created from a
/// [`ProtocolConfig`] and driven through the [`Mechanism`] contract.
#[derive(Debug)]
pub enum SecurityContext {
    Ntlm(Ntlm),
    Kerberos(Box<Kerberos>),
    Netlogon(Netlogon),
    Spnego(Box<Spnego>),
}

impl SecurityContext {
    pub fn new(
        config: &dyn ProtocolConfig,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<Self> {
        config.new_context(credential, capabilities, target_name)
    }

    pub fn package_name(&self) -> &str {
        match self {
            SecurityContext::Ntlm(_) => ntlm::PKG_NAME,
            SecurityContext::Kerberos(_) => kerberos::PKG_NAME,
            SecurityContext::Netlogon(_) => netlogon::PKG_NAME,
            SecurityContext::Spnego(_) => negotiate::PKG_NAME,
        }
    }

    /// Netlogon has no channel binding support and ignores the bindings.
    pub fn set_channel_bindings(&mut self, channel_bindings: ChannelBindings) {
        match self {
            SecurityContext::Ntlm(ntlm) => ntlm.set_channel_bindings(channel_bindings),
            SecurityContext::Kerberos(kerberos) => kerberos.set_channel_bindings(channel_bindings),
            SecurityContext::Netlogon(_) => debug!("Netlogon ignores channel bindings"),
            SecurityContext::Spnego(spnego) => spnego.set_channel_bindings(channel_bindings),
        }
    }

    fn mechanism(&self) -> &dyn Mechanism {
        match self {
            SecurityContext::Ntlm(ntlm) => ntlm,
            SecurityContext::Kerberos(kerberos) => kerberos.as_ref(),
            SecurityContext::Netlogon(netlogon) => netlogon,
            SecurityContext::Spnego(spnego) => spnego.as_ref(),
        }
    }

    fn mechanism_mut(&mut self) -> &mut dyn Mechanism {
        match self {
            SecurityContext::Ntlm(ntlm) => ntlm,
            SecurityContext::Kerberos(kerberos) => kerberos.as_mut(),
            SecurityContext::Netlogon(netlogon) => netlogon,
            SecurityContext::Spnego(spnego) => spnego.as_mut(),
        }
    }
}

impl Mechanism for SecurityContext {
    fn kind(&self) -> MechanismKind {
        self.mechanism().kind()
    }

    fn initialize(&mut self, input: Option<&[u8]>) -> Result<InitializeResult> {
        self.mechanism_mut().initialize(input)
    }

    fn is_complete(&self) -> bool {
        self.mechanism().is_complete()
    }

    fn wrap_ex(&mut self, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
        self.mechanism_mut().wrap_ex(buffers)
    }

    fn unwrap_ex(&mut self, buffers: &mut [SecurityBuffer], signature: &[u8]) -> Result<()> {
        self.mechanism_mut().unwrap_ex(buffers, signature)
    }

    fn make_signature_ex(&mut self, buffers: &[SecurityBuffer]) -> Result<Vec<u8>> {
        self.mechanism_mut().make_signature_ex(buffers)
    }

    fn verify_signature_ex(&mut self, buffers: &[SecurityBuffer], signature: &[u8]) -> Result<()> {
        self.mechanism_mut().verify_signature_ex(buffers, signature)
    }

    fn sequence_state(&self) -> Option<SequenceState> {
        self.mechanism().sequence_state()
    }
}
