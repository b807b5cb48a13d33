//! The Netlogon secure channel security provider (`RPC_C_AUTHN_NETLOGON`).
//!
//! The secure channel itself is set up by the caller through `NetrServerReqChallenge`
//! and `NetrServerAuthenticate3`; this provider derives the same session key from the
//! machine account secret and both challenges, runs the one round `NL_AUTH_MESSAGE`
//! exchange, and then protects PDUs with the negotiated signature algorithm.
//!
//! # MSDN
//!
//! * [[MS-NRPC]: Netlogon Remote Protocol](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-nrpc/ff8f970f-3e37-40f7-bd4b-af7336e4792f)

mod cipher;
mod config;
pub mod credential;
pub mod messages;

pub use self::cipher::{derive_cipher_state, NetlogonCipher};
pub use self::config::NetlogonConfig;
pub use self::credential::{compute_credential, compute_session_key, SecureCredential, SessionKeyAlgorithm};
use self::credential::SESSION_KEY_SIZE;
use self::messages::{check_negotiate_response, NegotiateMessage};
use crate::config::MechanismKind;
use crate::context::{
    ensure_confidentiality, no_session, Capabilities, HandshakeResult, Inbound, InitializeResult, Mechanism, Outbound,
    Role, SecurityBuffer, SequenceState,
};
use crate::credential::Credential;
use crate::secret::Secret;
use crate::{Error, ErrorKind, Result};

pub const PKG_NAME: &str = "Netlogon";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum NetlogonState {
    Initial,
    Response,
    Final,
}

#[derive(Debug)]
struct NetlogonSession {
    outbound: Outbound<NetlogonCipher>,
    inbound: Inbound<NetlogonCipher>,
    capabilities: Capabilities,
}

#[derive(Debug)]
pub struct Netlogon {
    config: NetlogonConfig,
    credential: Credential,
    capabilities: Capabilities,
    target_name: Option<String>,
    session_key: Secret<[u8; SESSION_KEY_SIZE]>,

    state: NetlogonState,
    session: Option<NetlogonSession>,
}

impl Netlogon {
    pub fn new(
        config: NetlogonConfig,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<Self> {
        let unsupported = capabilities & (Capabilities::DATAGRAM | Capabilities::ANONYMITY);
        if !unsupported.is_empty() {
            return Err(Error::new(
                ErrorKind::Unavailable,
                format!("Netlogon cannot provide {:?}", unsupported),
            ));
        }

        let nt_hash = credential.nt_hash_value()?;
        let algorithm = SessionKeyAlgorithm::negotiate(config.aes, config.strong_key);
        let session_key = compute_session_key(
            algorithm,
            nt_hash.as_ref(),
            &config.client_challenge,
            &config.server_challenge,
        )?;
        debug!(?algorithm, "derived Netlogon session key");

        Ok(Self {
            config,
            credential,
            capabilities,
            target_name,
            session_key,

            state: NetlogonState::Initial,
            session: None,
        })
    }

    /// Credential chain for the authenticators of the secure channel calls.
    pub fn secure_credential(&self) -> Result<SecureCredential> {
        SecureCredential::new(self.session_key.clone(), self.config.aes, &self.config.client_challenge)
    }

    fn computer_name(&self) -> String {
        let identity = self.credential.identity();

        self.config
            .computer_name
            .clone()
            .or_else(|| identity.workstation.clone())
            .unwrap_or_else(|| identity.username.trim_end_matches('$').to_owned())
    }

    fn negotiate_message(&self) -> NegotiateMessage {
        let mut message = NegotiateMessage::default();

        let domain = &self.credential.identity().domain;
        if !domain.is_empty() {
            let (netbios, dns) = split_name(domain);
            message.netbios_domain_name = Some(netbios);
            message.dns_domain_name = dns;
        }

        let computer_name = self.computer_name();
        if !computer_name.is_empty() {
            let (netbios, dns) = split_name(&computer_name);
            message.netbios_computer_name = Some(netbios);
            message.dns_host_name = dns;
        }

        message
    }

    fn write_negotiate(&mut self) -> Result<Vec<u8>> {
        let message = self.negotiate_message();
        debug!(flags = ?message.flags(), "sending NL_AUTH_MESSAGE");

        let output = message.to_bytes()?;
        self.state = NetlogonState::Response;

        Ok(output)
    }

    fn read_response(&mut self, input: &[u8]) -> Result<HandshakeResult> {
        check_negotiate_response(input)?;

        let (outbound, inbound) = derive_cipher_state(self.session_key.as_ref(), self.config.aes, Role::Initiator);
        let capabilities = self.capabilities
            & (Capabilities::INTEGRITY
                | Capabilities::CONFIDENTIALITY
                | Capabilities::REPLAY_DETECTION
                | Capabilities::SEQUENCING
                | Capabilities::IDENTIFY
                | Capabilities::DCE_STYLE);
        self.session = Some(NetlogonSession {
            outbound,
            inbound,
            capabilities,
        });
        self.state = NetlogonState::Final;

        Ok(HandshakeResult {
            mechanism: MechanismKind::Netlogon,
            session_key: Secret::new(self.session_key.as_ref().to_vec()),
            target_name: self.target_name.clone(),
            capabilities,
        })
    }

    fn session_mut(&mut self) -> Result<&mut NetlogonSession> {
        self.session.as_mut().ok_or_else(no_session)
    }
}

/// NetBIOS form of a name, plus the DNS form when the name is qualified.
fn split_name(name: &str) -> (String, Option<String>) {
    match name.split_once('.') {
        Some((label, _)) => (label.to_ascii_uppercase(), Some(name.to_owned())),
        None => (name.to_ascii_uppercase(), None),
    }
}

impl Mechanism for Netlogon {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Netlogon
    }

    #[instrument(level = "debug", ret, fields(state = ?self.state), skip_all)]
    fn initialize(&mut self, input: Option<&[u8]>) -> Result<InitializeResult> {
        match (self.state, input) {
            (NetlogonState::Initial, None) => Ok(InitializeResult::continue_needed(self.write_negotiate()?)),
            (NetlogonState::Initial, Some(input)) if input.is_empty() => {
                Ok(InitializeResult::continue_needed(self.write_negotiate()?))
            }
            (NetlogonState::Response, Some(input)) => {
                let handshake = self.read_response(input)?;

                Ok(InitializeResult::complete(Vec::new(), handshake))
            }
            (state, _) => Err(Error::new(
                ErrorKind::OutOfSequence,
                format!("got wrong Netlogon state: {:?}", state),
            )),
        }
    }

    fn is_complete(&self) -> bool {
        self.state == NetlogonState::Final
    }

    #[instrument(level = "trace", skip_all)]
    fn wrap_ex(&mut self, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
        let session = self.session_mut()?;
        ensure_confidentiality(session.capabilities)?;

        session.outbound.seal(buffers)
    }

    #[instrument(level = "trace", skip_all)]
    fn unwrap_ex(&mut self, buffers: &mut [SecurityBuffer], signature: &[u8]) -> Result<()> {
        let session = self.session_mut()?;
        ensure_confidentiality(session.capabilities)?;

        session.inbound.unseal(buffers, signature)
    }

    #[instrument(level = "trace", skip_all)]
    fn make_signature_ex(&mut self, buffers: &[SecurityBuffer]) -> Result<Vec<u8>> {
        self.session_mut()?.outbound.sign(buffers)
    }

    #[instrument(level = "trace", skip_all)]
    fn verify_signature_ex(&mut self, buffers: &[SecurityBuffer], signature: &[u8]) -> Result<()> {
        self.session_mut()?.inbound.verify(buffers, signature)
    }

    fn sequence_state(&self) -> Option<SequenceState> {
        self.session.as_ref().map(|session| SequenceState {
            outbound: session.outbound.sequence_number(),
            inbound: session.inbound.sequence_number(),
        })
    }
}
