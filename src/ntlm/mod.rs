mod cipher;
mod config;
pub mod messages;

use bitflags::bitflags;
use rand::rngs::OsRng;
use rand::RngCore;

pub use self::cipher::{derive_cipher_state, NtlmCipher};
pub use self::config::NtlmConfig;
use self::messages::av_pair::{find_timestamp, AvPair};
use self::messages::computations::*;
pub use self::messages::{AuthenticateMessage, ChallengeMessage, NegotiateMessage};
use crate::channel_bindings::ChannelBindings;
use crate::config::MechanismKind;
use crate::context::{
    ensure_confidentiality, no_session, Capabilities, HandshakeResult, Inbound, InitializeResult, Mechanism, Outbound,
    Role, SecurityBuffer, SequenceState,
};
use crate::credential::Credential;
use crate::crypto::{rc4, HASH_SIZE};
use crate::secret::Secret;
use crate::utils::{current_filetime, string_to_utf16};
use crate::{Error, ErrorKind, Result};

pub const PKG_NAME: &str = "NTLM";
pub const NTLM_VERSION_SIZE: usize = 8;
/// Windows 10 build 17763, NTLM revision 15.
pub const DEFAULT_NTLM_VERSION: [u8; NTLM_VERSION_SIZE] = [0x0a, 0x00, 0x63, 0x45, 0x00, 0x00, 0x00, 0x0f];

pub const ENCRYPTED_RANDOM_SESSION_KEY_SIZE: usize = 16;
pub const SIGNATURE_SIZE: usize = 16;

const CHALLENGE_SIZE: usize = 8;
const SESSION_KEY_SIZE: usize = 16;
const MESSAGE_INTEGRITY_CHECK_SIZE: usize = 16;
const LM_CHALLENGE_RESPONSE_BUFFER_SIZE: usize = HASH_SIZE + CHALLENGE_SIZE;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum NtlmState {
    Initial,
    Challenge,
    Final,
}

/// Nonces pinned by tests so that the AUTHENTICATE message is reproducible.
#[derive(Debug, Clone, Copy)]
struct FixedNonces {
    client_challenge: [u8; CHALLENGE_SIZE],
    exported_session_key: [u8; SESSION_KEY_SIZE],
    timestamp: u64,
}

#[derive(Debug)]
struct NtlmSession {
    outbound: Outbound<NtlmCipher>,
    inbound: Inbound<NtlmCipher>,
    capabilities: Capabilities,
}

/// Client side of the NT LAN Manager (NTLM) Authentication Protocol.
///
/// # MSDN
///
/// * [[MS-NLMP]: NT LAN Manager (NTLM) Authentication Protocol](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-nlmp/b38c36ed-2804-4868-a9ff-8dd3182128e4)
#[derive(Debug)]
pub struct Ntlm {
    config: NtlmConfig,
    credential: Credential,
    nt_hash: Option<Secret<[u8; HASH_SIZE]>>,
    capabilities: Capabilities,
    target_name: Option<String>,
    channel_bindings: Option<ChannelBindings>,

    state: NtlmState,
    flags: NegotiateFlags,
    version: [u8; NTLM_VERSION_SIZE],
    negotiate_message: Option<Vec<u8>>,
    nonces: Option<FixedNonces>,

    session: Option<NtlmSession>,
}

impl Ntlm {
    pub fn new(
        config: NtlmConfig,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<Self> {
        let unsupported = capabilities & (Capabilities::MUTUAL_AUTHN | Capabilities::DATAGRAM);
        if !unsupported.is_empty() {
            return Err(Error::new(
                ErrorKind::Unavailable,
                format!("NTLM cannot provide {:?}", unsupported),
            ));
        }

        let nt_hash = if credential.is_anonymous() {
            None
        } else {
            Some(credential.nt_hash_value()?)
        };

        Ok(Self {
            config,
            credential,
            nt_hash,
            capabilities,
            target_name,
            channel_bindings: None,

            state: NtlmState::Initial,
            flags: NegotiateFlags::empty(),
            version: DEFAULT_NTLM_VERSION,
            negotiate_message: None,
            nonces: None,

            session: None,
        })
    }

    pub fn set_version(&mut self, version: [u8; NTLM_VERSION_SIZE]) {
        self.version = version;
    }

    /// The MD5 hash of these bindings is sent as `MsvAvChannelBindings` with NTLMv2.
    pub fn set_channel_bindings(&mut self, channel_bindings: ChannelBindings) {
        self.channel_bindings = Some(channel_bindings);
    }

    #[cfg(test)]
    fn fix_nonces(
        &mut self,
        client_challenge: [u8; CHALLENGE_SIZE],
        exported_session_key: [u8; SESSION_KEY_SIZE],
        timestamp: u64,
    ) {
        self.nonces = Some(FixedNonces {
            client_challenge,
            exported_session_key,
            timestamp,
        });
    }

    fn workstation(&self) -> String {
        self.credential
            .identity()
            .workstation
            .clone()
            .or_else(|| self.config.workstation.clone())
            .unwrap_or_default()
    }

    fn negotiate_flags(&self) -> NegotiateFlags {
        let mut flags = NegotiateFlags::NTLM_SSP_NEGOTIATE56
            | NegotiateFlags::NTLM_SSP_NEGOTIATE128
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_ALWAYS_SIGN
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_NTLM
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_REQUEST_TARGET
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_OEM
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE;

        if !self.config.no_ess {
            flags |= NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY;
        }

        if self
            .capabilities
            .intersects(Capabilities::INTEGRITY | Capabilities::REPLAY_DETECTION | Capabilities::SEQUENCING)
        {
            flags |= NegotiateFlags::NTLM_SSP_NEGOTIATE_SIGN;
        }

        if self.capabilities.contains(Capabilities::CONFIDENTIALITY) {
            // sealing implies signing
            flags |= NegotiateFlags::NTLM_SSP_NEGOTIATE_SEAL | NegotiateFlags::NTLM_SSP_NEGOTIATE_SIGN;
        }

        if self.capabilities.contains(Capabilities::IDENTIFY) {
            flags |= NegotiateFlags::NTLM_SSP_NEGOTIATE_IDENTIFY;
        }

        if self.credential.is_anonymous() {
            flags |= NegotiateFlags::NTLM_SSP_NEGOTIATE_ANONYMOUS;
        }

        flags
    }

    fn write_negotiate(&mut self) -> Result<Vec<u8>> {
        let flags = self.negotiate_flags();
        let message = NegotiateMessage {
            flags,
            domain: Vec::new(),
            workstation: Vec::new(),
            version: Some(self.version),
        }
        .to_bytes()?;

        self.flags = flags;
        self.negotiate_message = Some(message.clone());
        self.state = NtlmState::Challenge;

        Ok(message)
    }

    fn encode_string(&self, value: &str) -> Vec<u8> {
        if self.flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE) {
            string_to_utf16(value)
        } else {
            value.as_bytes().to_vec()
        }
    }

    /// LM response, NT response and key exchange key.
    fn compute_responses(
        &self,
        challenge: &ChallengeMessage,
        client_challenge: &[u8; CHALLENGE_SIZE],
        timestamp: u64,
    ) -> Result<(Vec<u8>, Vec<u8>, [u8; SESSION_KEY_SIZE], bool)> {
        let nt_hash = match &self.nt_hash {
            Some(nt_hash) => nt_hash.as_ref(),
            // anonymous: a single zero LM byte and an empty NT response
            None => return Ok((vec![0x00], Vec::new(), [0x00; SESSION_KEY_SIZE], false)),
        };
        let identity = self.credential.identity();
        let server_challenge = &challenge.server_challenge;

        if !self.config.ntlm_v1 {
            let ntlm_v2_hash = compute_ntlm_v2_hash(nt_hash, &identity.username, &identity.domain)?;
            let (target_info, use_mic) = get_authenticate_target_info(
                &challenge.target_info,
                self.target_name.as_deref(),
                self.channel_bindings.as_ref(),
            )?;

            let (nt_challenge_response, session_base_key) =
                compute_ntlm_v2_response(client_challenge, server_challenge, &target_info, &ntlm_v2_hash, timestamp)?;
            let lm_challenge_response = if use_mic {
                vec![0x00; LM_CHALLENGE_RESPONSE_BUFFER_SIZE]
            } else {
                compute_lm_v2_response(client_challenge, server_challenge, &ntlm_v2_hash)?.to_vec()
            };

            return Ok((lm_challenge_response, nt_challenge_response, session_base_key, use_mic));
        }

        let session_base_key = compute_ntlm_v1_session_base_key(nt_hash);
        if self
            .flags
            .contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY)
        {
            let (nt_challenge_response, lm_challenge_response) =
                compute_ntlm_v1_ess_response(nt_hash, server_challenge, client_challenge)?;
            let key_exchange_key =
                compute_ntlm_v1_ess_key_exchange_key(&session_base_key, server_challenge, &lm_challenge_response)?;

            Ok((
                lm_challenge_response.to_vec(),
                nt_challenge_response.to_vec(),
                key_exchange_key,
                false,
            ))
        } else {
            let nt_challenge_response = compute_ntlm_v1_response(nt_hash, server_challenge)?;
            let lm_challenge_response = match &self.credential {
                Credential::Password { password, .. } => compute_lm_v1_response(password.as_ref().as_str(), server_challenge)?,
                _ => None,
            }
            .unwrap_or(nt_challenge_response);

            Ok((
                lm_challenge_response.to_vec(),
                nt_challenge_response.to_vec(),
                session_base_key,
                false,
            ))
        }
    }

    fn write_authenticate(&mut self, input: &[u8]) -> Result<(Vec<u8>, HandshakeResult)> {
        let challenge = ChallengeMessage::from_bytes(input)?;
        let negotiate_message = self.negotiate_message.take().ok_or_else(|| {
            Error::new(ErrorKind::OutOfSequence, "CHALLENGE received before NEGOTIATE was sent")
        })?;

        self.flags &= challenge.flags;
        let charsets = NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE | NegotiateFlags::NTLM_SSP_NEGOTIATE_OEM;
        if !self.flags.intersects(charsets) {
            return Err(Error::new(ErrorKind::DefectiveToken, "the server selected no character set"));
        }
        debug!(flags = ?self.flags, "negotiated NTLM flags");

        let server_av_pairs = AvPair::buffer_to_av_pairs(&challenge.target_info)?;
        let nonces = self.nonces.unwrap_or_else(|| {
            let mut client_challenge = [0x00; CHALLENGE_SIZE];
            let mut exported_session_key = [0x00; SESSION_KEY_SIZE];
            OsRng.fill_bytes(&mut client_challenge);
            OsRng.fill_bytes(&mut exported_session_key);

            FixedNonces {
                client_challenge,
                exported_session_key,
                timestamp: current_filetime(),
            }
        });
        let timestamp = find_timestamp(&server_av_pairs).unwrap_or(nonces.timestamp);

        let (lm_challenge_response, nt_challenge_response, key_exchange_key, use_mic) =
            self.compute_responses(&challenge, &nonces.client_challenge, timestamp)?;

        let (exported_session_key, encrypted_random_session_key) =
            if self.flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH) {
                (
                    nonces.exported_session_key,
                    rc4(&key_exchange_key, &nonces.exported_session_key)?,
                )
            } else {
                (key_exchange_key, Vec::new())
            };

        let identity = self.credential.identity();
        let authenticate = AuthenticateMessage {
            lm_challenge_response,
            nt_challenge_response,
            domain: self.encode_string(&identity.domain),
            user: self.encode_string(&identity.username),
            workstation: self.encode_string(&self.workstation()),
            encrypted_random_session_key,
            flags: self.flags,
            version: self
                .flags
                .contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION)
                .then_some(self.version),
            mic: use_mic.then_some([0x00; MESSAGE_INTEGRITY_CHECK_SIZE]),
        };
        let mut message = authenticate.to_bytes()?;

        if use_mic {
            let mic = compute_message_integrity_check(&negotiate_message, input, &message, &exported_session_key)?;
            let offset = authenticate.mic_offset();
            message[offset..offset + MESSAGE_INTEGRITY_CHECK_SIZE].copy_from_slice(&mic);
        }

        let (outbound, inbound) = derive_cipher_state(&exported_session_key, self.flags, Role::Initiator)?;
        let capabilities = self.provided_capabilities();
        self.session = Some(NtlmSession {
            outbound,
            inbound,
            capabilities,
        });
        self.state = NtlmState::Final;

        Ok((
            message,
            HandshakeResult {
                mechanism: MechanismKind::Ntlm,
                session_key: Secret::new(exported_session_key.to_vec()),
                target_name: self.target_name.clone(),
                capabilities,
            },
        ))
    }

    fn provided_capabilities(&self) -> Capabilities {
        let mut capabilities = Capabilities::empty();

        if self.flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_SIGN) {
            capabilities |= Capabilities::INTEGRITY | Capabilities::REPLAY_DETECTION | Capabilities::SEQUENCING;
        }
        if self.flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_SEAL) {
            capabilities |= Capabilities::CONFIDENTIALITY;
        }
        if self.flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_IDENTIFY) {
            capabilities |= Capabilities::IDENTIFY;
        }
        if self.flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_ANONYMOUS) {
            capabilities |= Capabilities::ANONYMITY;
        }

        capabilities
    }

    fn session_mut(&mut self) -> Result<&mut NtlmSession> {
        self.session.as_mut().ok_or_else(no_session)
    }
}

impl Mechanism for Ntlm {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Ntlm
    }

    #[instrument(level = "debug", ret, fields(state = ?self.state), skip_all)]
    fn initialize(&mut self, input: Option<&[u8]>) -> Result<InitializeResult> {
        match (self.state, input) {
            (NtlmState::Initial, None) => Ok(InitializeResult::continue_needed(self.write_negotiate()?)),
            (NtlmState::Initial, Some(input)) if input.is_empty() => {
                Ok(InitializeResult::continue_needed(self.write_negotiate()?))
            }
            (NtlmState::Challenge, Some(input)) => {
                let (output, handshake) = self.write_authenticate(input)?;

                Ok(InitializeResult::complete(output, handshake))
            }
            (state, _) => Err(Error::new(
                ErrorKind::OutOfSequence,
                format!("got wrong NTLM state: {:?}", state),
            )),
        }
    }

    fn is_complete(&self) -> bool {
        self.state == NtlmState::Final
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

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct NegotiateFlags: u32 {
        /// W-bit
        /// requests 56-bit encryption
        const NTLM_SSP_NEGOTIATE56 = 0x8000_0000;

        /// V-bit
        /// requests explicit key exchange
        const NTLM_SSP_NEGOTIATE_KEY_EXCH = 0x4000_0000;

        /// U-bit
        /// requests an 128 bit session key
        const NTLM_SSP_NEGOTIATE128 = 0x2000_0000;

        /// r6
        const NTLM_SSP_NEGOTIATE_VERSION = 0x0200_0000;

        /// S-bit
        const NTLM_SSP_NEGOTIATE_TARGET_INFO = 0x0080_0000;

        /// R
        const NTLM_SSP_NEGOTIATE_REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;

        /// Q
        const NTLM_SSP_NEGOTIATE_IDENTIFY = 0x0010_0000;

        /// P-bit
        /// NTLMv2 Session Security
        const NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY = 0x0008_0000;

        /// O
        const NTLM_SSP_NEGOTIATE_TARGET_TYPE_SERVER = 0x0002_0000;

        /// N
        const NTLM_SSP_NEGOTIATE_TARGET_TYPE_DOMAIN = 0x0001_0000;

        /// M-bit
        /// requests a signature block
        const NTLM_SSP_NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;

        /// L-bit
        const NTLM_SSP_NEGOTIATE_WORKSTATION_SUPPLIED = 0x0000_2000;

        /// K-bit
        const NTLM_SSP_NEGOTIATE_DOMAIN_SUPPLIED = 0x0000_1000;

        /// J
        const NTLM_SSP_NEGOTIATE_ANONYMOUS = 0x0000_0800;

        /// H-bit
        const NTLM_SSP_NEGOTIATE_NTLM = 0x0000_0200;

        /// G-bit
        /// LM Session Security, never requested
        const NTLM_SSP_NEGOTIATE_LM_KEY = 0x0000_0080;

        /// F
        const NTLM_SSP_NEGOTIATE_DATAGRAM = 0x0000_0040;

        /// E-bit
        /// session key negotiation with message confidentiality
        const NTLM_SSP_NEGOTIATE_SEAL = 0x0000_0020;

        /// D-bit
        const NTLM_SSP_NEGOTIATE_SIGN = 0x0000_0010;

        /// C-bit
        const NTLM_SSP_NEGOTIATE_REQUEST_TARGET = 0x0000_0004;

        /// B-bit
        const NTLM_SSP_NEGOTIATE_OEM = 0x0000_0002;

        /// A-bit
        const NTLM_SSP_NEGOTIATE_UNICODE = 0x0000_0001;
    }
}
