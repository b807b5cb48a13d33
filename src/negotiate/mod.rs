//! Simple and Protected GSS-API Negotiation Mechanism (SPNEGO), initiator side.
//!
//! The initiator offers its configured mechanisms in preference order together with an
//! optimistic token of the first one. The acceptor either continues that mechanism, selects
//! another offered one through `supportedMech`, or rejects the negotiation. Once the inner
//! mechanism completes, the DER encoded mechanism list is protected by a `mechListMIC` in
//! each direction when the acceptor asks for it, when the mechanism was switched, or when the
//! mechanism is NTLM.
//!
//! # MSDN
//!
//! * [[MS-SPNG]: Simple and Protected GSS-API Negotiation Mechanism (SPNEGO) Extension](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-spng/f377a379-c24f-4a0f-a3eb-0d835389e28a)

mod config;
mod extractors;
mod generators;
pub mod messages;

use oid::ObjectIdentifier;

pub use self::config::NegotiateConfig;
use self::extractors::{decode_neg_token_init, decode_neg_token_resp, select_mech_types};
pub use self::extractors::{NegotiationHints, NegotiationInit, NegotiationResponse};
use self::generators::{generate_mech_type_list, generate_neg_token_init, generate_neg_token_resp};
use self::messages::NegState;
use crate::channel_bindings::ChannelBindings;
use crate::config::{MechanismKind, ProtocolConfig};
use crate::context::{
    no_session, Capabilities, HandshakeResult, InitializeResult, Mechanism, SecurityBuffer, SequenceState,
};
use crate::credential::Credential;
use crate::security_context::SecurityContext;
use crate::{Error, ErrorKind, Result};

pub const PKG_NAME: &str = "Negotiate";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SpnegoState {
    Initial,
    Negotiating,
    Final,
}

#[derive(Debug)]
struct SelectedMechanism {
    kind: MechanismKind,
    context: Box<SecurityContext>,
}

/// SPNEGO initiator wrapping one of the other mechanisms.
#[derive(Debug)]
pub struct Spnego {
    candidates: Vec<Box<dyn ProtocolConfig>>,
    credential: Credential,
    capabilities: Capabilities,
    target_name: Option<String>,
    channel_bindings: Option<ChannelBindings>,

    state: SpnegoState,
    hints: Option<NegotiationHints>,
    offered: Vec<MechanismKind>,
    // DER encoded MechTypeList, the input of both mechListMICs
    mech_list: Vec<u8>,
    selected: Option<SelectedMechanism>,
    handshake: Option<HandshakeResult>,

    answered: bool,
    switched: bool,
    mic_required: bool,
    mic_sent: bool,
    peer_mic_verified: bool,
}

impl Spnego {
    pub fn new(
        config: NegotiateConfig,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<Self> {
        let candidates = config
            .protocol_configs
            .into_iter()
            .filter(|protocol| {
                let mechanism = protocol.mechanism();
                let negotiable = mechanism != MechanismKind::Spnego && mechanism.oid().is_some();
                if !negotiable {
                    warn!(%mechanism, "mechanism cannot be negotiated by SPNEGO, skipping it");
                }

                negotiable
            })
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                "SPNEGO needs at least one mechanism with a GSS-API OID",
            ));
        }

        Ok(Self {
            candidates,
            credential,
            capabilities,
            target_name,
            channel_bindings: None,

            state: SpnegoState::Initial,
            hints: None,
            offered: Vec::new(),
            mech_list: Vec::new(),
            selected: None,
            handshake: None,

            answered: false,
            switched: false,
            mic_required: false,
            mic_sent: false,
            peer_mic_verified: false,
        })
    }

    /// Passed on to every inner mechanism that supports channel bindings.
    pub fn set_channel_bindings(&mut self, channel_bindings: ChannelBindings) {
        self.channel_bindings = Some(channel_bindings);
    }

    /// The inner mechanism currently carrying the negotiation.
    pub fn negotiated_mechanism(&self) -> Option<MechanismKind> {
        self.selected.as_ref().map(|selected| selected.kind)
    }

    /// Hints of an acceptor-initiated negotiation.
    pub fn hints(&self) -> Option<&NegotiationHints> {
        self.hints.as_ref()
    }

    fn candidate_kinds(&self) -> Vec<MechanismKind> {
        self.candidates.iter().map(|protocol| protocol.mechanism()).collect()
    }

    fn start_mechanism(&self, protocol: &dyn ProtocolConfig) -> Result<(Box<SecurityContext>, InitializeResult)> {
        let mut context = Box::new(protocol.new_context(
            self.credential.clone(),
            self.capabilities,
            self.target_name.clone(),
        )?);
        if let Some(channel_bindings) = &self.channel_bindings {
            context.set_channel_bindings(channel_bindings.clone());
        }

        let result = context.initialize(None)?;

        Ok((context, result))
    }

    fn apply_acceptor_init(&mut self, input: &[u8]) -> Result<()> {
        let init = decode_neg_token_init(input)?;

        let common = select_mech_types(&self.candidate_kinds(), &init.mech_types);
        if common.is_empty() {
            return Err(Error::new(
                ErrorKind::Unavailable,
                format!(
                    "the acceptor offers none of the configured mechanisms: {:?}",
                    init.mech_types
                ),
            ));
        }

        debug!(?common, hints = ?init.hints, "acceptor started the negotiation");

        self.candidates.retain(|protocol| common.contains(&protocol.mechanism()));
        self.hints = init.hints;

        Ok(())
    }

    fn write_init(&mut self) -> Result<Vec<u8>> {
        let mut last_error = None;

        while !self.candidates.is_empty() {
            let protocol = self.candidates[0].clone();
            let kind = protocol.mechanism();

            match self.start_mechanism(protocol.as_ref()) {
                Ok((context, result)) => {
                    self.offered = self.candidate_kinds();
                    let mech_list = generate_mech_type_list(&self.offered)?;
                    self.mech_list = picky_asn1_der::to_vec(&mech_list)?;

                    self.handshake = result.handshake;
                    self.selected = Some(SelectedMechanism { kind, context });
                    self.state = SpnegoState::Negotiating;

                    debug!(mechanism = %kind, offered = ?self.offered, "sending the optimistic token");

                    let mech_token = if result.output.is_empty() {
                        None
                    } else {
                        Some(result.output)
                    };

                    return generate_neg_token_init(mech_list, mech_token);
                }
                Err(err) => {
                    warn!(mechanism = %kind, %err, "cannot start mechanism, falling back to the next one");
                    self.candidates.remove(0);
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::new(ErrorKind::InvalidParameter, "no mechanism left to negotiate")))
    }

    fn offered_kind(&self, oid: &ObjectIdentifier) -> Result<MechanismKind> {
        MechanismKind::from_oid(oid)
            .filter(|kind| self.offered.contains(kind))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::DefectiveToken,
                    format!("the acceptor selected {:?} which was not offered", oid),
                )
            })
    }

    fn switch_mechanism(&mut self, kind: MechanismKind) -> Result<Option<Vec<u8>>> {
        let protocol = self
            .candidates
            .iter()
            .find(|protocol| protocol.mechanism() == kind)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::DefectiveToken, format!("{} was not offered", kind)))?;

        info!(from = ?self.negotiated_mechanism(), to = %kind, "acceptor selected another mechanism");

        let (context, result) = self.start_mechanism(protocol.as_ref())?;
        self.selected = Some(SelectedMechanism { kind, context });
        self.handshake = result.handshake;
        self.switched = true;
        self.mic_required = true;

        Ok(if result.output.is_empty() {
            None
        } else {
            Some(result.output)
        })
    }

    fn continue_mechanism(&mut self, token: &[u8]) -> Result<Option<Vec<u8>>> {
        let selected = self.selected.as_mut().ok_or_else(no_session)?;
        if selected.context.is_complete() {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("{} is complete but the acceptor sent another token", selected.kind),
            ));
        }

        let result = selected.context.initialize(Some(token))?;
        if result.handshake.is_some() {
            self.handshake = result.handshake;
        }

        Ok(if result.output.is_empty() {
            None
        } else {
            Some(result.output)
        })
    }

    fn read_response(&mut self, input: &[u8]) -> Result<InitializeResult> {
        let response = decode_neg_token_resp(input)?;
        let neg_state = response.neg_state.unwrap_or(NegState::AcceptIncomplete);

        debug!(?neg_state, supported_mech = ?response.supported_mech, "received NegTokenResp");

        match neg_state {
            NegState::Reject => {
                return Err(Error::new(ErrorKind::Rejected, "the acceptor rejected the negotiation"));
            }
            NegState::RequestMic => self.mic_required = true,
            NegState::AcceptCompleted | NegState::AcceptIncomplete => {}
        }

        let supported = match &response.supported_mech {
            Some(oid) => Some(self.offered_kind(oid)?),
            None => None,
        };

        let output_token = match supported {
            Some(kind) if Some(kind) != self.negotiated_mechanism() => {
                if self.answered {
                    return Err(Error::new(
                        ErrorKind::DefectiveToken,
                        "the acceptor changed the mechanism in the middle of the negotiation",
                    ));
                }
                if response.response_token.is_some() {
                    warn!(mechanism = %kind, "ignoring the response token sent with a mechanism switch");
                }

                self.switch_mechanism(kind)?
            }
            _ => match &response.response_token {
                Some(token) => self.continue_mechanism(token)?,
                None => None,
            },
        };
        self.answered = true;

        let selected = self.selected.as_mut().ok_or_else(no_session)?;
        let kind = selected.kind;
        let mechanism_complete = selected.context.is_complete();

        if let Some(mic) = &response.mech_list_mic {
            if !mechanism_complete {
                return Err(Error::new(
                    ErrorKind::DefectiveToken,
                    format!("mechListMIC received before {} completed", kind),
                ));
            }

            selected
                .context
                .verify_signature(&self.mech_list, mic)
                .map_err(|err| {
                    Error::new(
                        ErrorKind::BadMic,
                        format!("mechListMIC verification failed: {}", err.description),
                    )
                })?;
            self.peer_mic_verified = true;
            self.mic_required = true;
        }

        let mut mic = None;
        if mechanism_complete && !self.mic_sent && (self.mic_required || kind == MechanismKind::Ntlm) {
            mic = Some(selected.context.make_signature(&self.mech_list)?);
            self.mic_sent = true;
        }

        if neg_state == NegState::AcceptCompleted {
            if !mechanism_complete {
                return Err(Error::new(
                    ErrorKind::DefectiveToken,
                    format!("the acceptor completed the negotiation before {}", kind),
                ));
            }
            if self.switched && !self.peer_mic_verified {
                return Err(Error::new(
                    ErrorKind::BadMic,
                    "the acceptor did not protect the mechanism list after a mechanism switch",
                ));
            }

            let handshake = self
                .handshake
                .clone()
                .ok_or_else(|| Error::new(ErrorKind::Failure, format!("{} completed without a session", kind)))?;

            let output = if output_token.is_some() || mic.is_some() {
                generate_neg_token_resp(None, output_token, mic)?
            } else {
                Vec::new()
            };
            self.state = SpnegoState::Final;

            info!(mechanism = %kind, "SPNEGO negotiation complete");

            return Ok(InitializeResult::complete(output, handshake));
        }

        if output_token.is_none() && mic.is_none() {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                "the acceptor expects more but there is nothing to send",
            ));
        }

        Ok(InitializeResult::continue_needed(generate_neg_token_resp(
            None,
            output_token,
            mic,
        )?))
    }

    fn established_mut(&mut self) -> Result<&mut SecurityContext> {
        if self.state != SpnegoState::Final {
            return Err(no_session());
        }

        self.selected
            .as_mut()
            .map(|selected| selected.context.as_mut())
            .ok_or_else(no_session)
    }
}

impl Mechanism for Spnego {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Spnego
    }

    #[instrument(level = "debug", ret, fields(state = ?self.state), skip_all)]
    fn initialize(&mut self, input: Option<&[u8]>) -> Result<InitializeResult> {
        match (self.state, input) {
            (SpnegoState::Initial, input) => {
                if let Some(input) = input.filter(|input| !input.is_empty()) {
                    self.apply_acceptor_init(input)?;
                }

                Ok(InitializeResult::continue_needed(self.write_init()?))
            }
            (SpnegoState::Negotiating, Some(input)) => self.read_response(input),
            (state, _) => Err(Error::new(
                ErrorKind::OutOfSequence,
                format!("got wrong SPNEGO state: {:?}", state),
            )),
        }
    }

    fn is_complete(&self) -> bool {
        self.state == SpnegoState::Final
    }

    #[instrument(level = "trace", skip_all)]
    fn wrap_ex(&mut self, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
        self.established_mut()?.wrap_ex(buffers)
    }

    #[instrument(level = "trace", skip_all)]
    fn unwrap_ex(&mut self, buffers: &mut [SecurityBuffer], signature: &[u8]) -> Result<()> {
        self.established_mut()?.unwrap_ex(buffers, signature)
    }

    #[instrument(level = "trace", skip_all)]
    fn make_signature_ex(&mut self, buffers: &[SecurityBuffer]) -> Result<Vec<u8>> {
        self.established_mut()?.make_signature_ex(buffers)
    }

    #[instrument(level = "trace", skip_all)]
    fn verify_signature_ex(&mut self, buffers: &[SecurityBuffer], signature: &[u8]) -> Result<()> {
        self.established_mut()?.verify_signature_ex(buffers, signature)
    }

    fn sequence_state(&self) -> Option<SequenceState> {
        if self.state != SpnegoState::Final {
            return None;
        }

        self.selected
            .as_ref()
            .and_then(|selected| selected.context.sequence_state())
    }
}

#[cfg(test)]
mod tests {
    use picky_asn1::wrapper::{
        ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3, OctetStringAsn1, Optional,
    };
    use picky_asn1_der::Asn1RawDer;
    use picky_asn1_x509::oids;
    use picky_krb::gss_api::{MechType, NegTokenTarg, NegTokenTarg1};

    use super::*;
    use crate::context::{Inbound, Outbound, Role};
    use crate::kerberos::KerberosConfig;
    use crate::network_client::{NetworkClient, NetworkRequest};
    use crate::ntlm::messages::av_pair::AvPair;
    use crate::ntlm::{
        derive_cipher_state, AuthenticateMessage, ChallengeMessage, NegotiateFlags, NegotiateMessage, NtlmCipher,
        NtlmConfig, DEFAULT_NTLM_VERSION,
    };
    use crate::utils::string_to_utf16;
    use crate::SecurityStatus;

    const TARGET: &str = "host/dc01.contoso.com";

    #[derive(Debug, Clone)]
    struct UnreachableKdc;

    impl NetworkClient for UnreachableKdc {
        fn send(&self, _request: &NetworkRequest) -> Result<Vec<u8>> {
            Err(Error::new(ErrorKind::Failure, "KDC unreachable"))
        }

        fn box_clone(&self) -> Box<dyn NetworkClient> {
            Box::new(self.clone())
        }
    }

    fn unreachable_kerberos() -> Box<dyn ProtocolConfig> {
        Box::new(KerberosConfig {
            network_client: Box::new(UnreachableKdc),
            ..KerberosConfig::from_kdc_url("tcp://kdc.contoso.com:88")
        })
    }

    fn capabilities() -> Capabilities {
        Capabilities::INTEGRITY | Capabilities::CONFIDENTIALITY | Capabilities::SEQUENCING
    }

    fn spnego(protocol_configs: Vec<Box<dyn ProtocolConfig>>) -> Spnego {
        let credential = Credential::password("CONTOSO\\alice", "Passw0rd!").unwrap();

        Spnego::new(
            NegotiateConfig::new(protocol_configs),
            credential,
            capabilities(),
            Some(TARGET.to_owned()),
        )
        .unwrap()
    }

    fn acceptor_resp(
        neg_state: Option<NegState>,
        supported_mech: Option<ObjectIdentifier>,
        response_token: Option<Vec<u8>>,
        mech_list_mic: Option<Vec<u8>>,
    ) -> Vec<u8> {
        let token = NegTokenTarg1::from(NegTokenTarg {
            neg_result: Optional::from(neg_state.map(|state| ExplicitContextTag0::from(Asn1RawDer(state.to_der())))),
            supported_mech: Optional::from(supported_mech.map(|oid| ExplicitContextTag1::from(MechType::from(oid)))),
            response_token: Optional::from(
                response_token.map(|token| ExplicitContextTag2::from(OctetStringAsn1::from(token))),
            ),
            mech_list_mic: Optional::from(mech_list_mic.map(|mic| ExplicitContextTag3::from(OctetStringAsn1::from(mic)))),
        });

        picky_asn1_der::to_vec(&token).unwrap()
    }

    fn ntlm_challenge(negotiate: &[u8]) -> Vec<u8> {
        let negotiate = NegotiateMessage::from_bytes(negotiate).unwrap();

        ChallengeMessage {
            target_name: string_to_utf16("CONTOSO"),
            flags: negotiate.flags
                | NegotiateFlags::NTLM_SSP_NEGOTIATE_TARGET_INFO
                | NegotiateFlags::NTLM_SSP_NEGOTIATE_TARGET_TYPE_DOMAIN,
            server_challenge: [0x11; 8],
            target_info: AvPair::list_to_buffer(&[
                AvPair::NbDomainName(string_to_utf16("CONTOSO")),
                AvPair::NbComputerName(string_to_utf16("DC01")),
                AvPair::Timestamp(0x01d9_1111_2222_3333),
            ])
            .unwrap(),
            version: Some(DEFAULT_NTLM_VERSION),
        }
        .to_bytes()
        .unwrap()
    }

    /// Runs the NTLM legs and returns the acceptor's cipher state and the client's MIC.
    fn ntlm_until_authenticate(
        context: &mut Spnego,
        first_output: &[u8],
    ) -> (Outbound<NtlmCipher>, Inbound<NtlmCipher>, Vec<u8>) {
        let init = decode_neg_token_init(first_output).unwrap();
        let challenge = ntlm_challenge(&init.mech_token.unwrap());

        let result = context
            .initialize(Some(&acceptor_resp(
                Some(NegState::AcceptIncomplete),
                Some(oids::ntlm_ssp()),
                Some(challenge),
                None,
            )))
            .unwrap();
        assert_eq!(result.status, SecurityStatus::ContinueNeeded);

        let response = decode_neg_token_resp(&result.output).unwrap();
        assert_eq!(response.neg_state, None);
        let authenticate = AuthenticateMessage::from_bytes(&response.response_token.unwrap()).unwrap();

        let session_key: [u8; 16] = context
            .handshake
            .as_ref()
            .unwrap()
            .session_key
            .as_ref()
            .as_slice()
            .try_into()
            .unwrap();
        let (outbound, inbound) = derive_cipher_state(&session_key, authenticate.flags, Role::Acceptor).unwrap();

        (outbound, inbound, response.mech_list_mic.unwrap())
    }

    #[test]
    fn ntlm_negotiation_exchanges_mech_list_mics() {
        let mut context = spnego(vec![Box::new(NtlmConfig::default())]);

        let first = context.initialize(None).unwrap();
        assert_eq!(first.status, SecurityStatus::ContinueNeeded);
        assert_eq!(
            decode_neg_token_init(&first.output).unwrap().mech_types,
            vec![oids::ntlm_ssp()]
        );

        let (mut server_out, mut server_in, client_mic) = ntlm_until_authenticate(&mut context, &first.output);

        let mech_list = picky_asn1_der::to_vec(&generate_mech_type_list(&[MechanismKind::Ntlm]).unwrap()).unwrap();
        server_in
            .verify(&[SecurityBuffer::sign_only(mech_list.clone())], &client_mic)
            .unwrap();
        let server_mic = server_out.sign(&[SecurityBuffer::sign_only(mech_list)]).unwrap();

        let last = context
            .initialize(Some(&acceptor_resp(
                Some(NegState::AcceptCompleted),
                None,
                None,
                Some(server_mic),
            )))
            .unwrap();

        assert_eq!(last.status, SecurityStatus::Complete);
        assert!(last.output.is_empty());
        assert_eq!(last.handshake.unwrap().mechanism, MechanismKind::Ntlm);
        assert!(context.is_complete());
        assert_eq!(
            context.sequence_state(),
            Some(SequenceState {
                outbound: 1,
                inbound: 1
            })
        );

        let (sealed, signature) = context.wrap(b"ping").unwrap();
        let mut buffers = [SecurityBuffer::data(sealed)];
        server_in.unseal(&mut buffers, &signature).unwrap();
        assert_eq!(buffers[0].data, b"ping");
    }

    #[test]
    fn forged_acceptor_mic_is_refused() {
        let mut context = spnego(vec![Box::new(NtlmConfig::default())]);
        let first = context.initialize(None).unwrap();
        let _ = ntlm_until_authenticate(&mut context, &first.output);

        let err = context
            .initialize(Some(&acceptor_resp(
                Some(NegState::AcceptCompleted),
                None,
                None,
                Some(vec![0x01; 16]),
            )))
            .unwrap_err();

        assert_eq!(err.error_type, ErrorKind::BadMic);
        assert!(!context.is_complete());
    }

    #[test]
    fn reject_fails_the_negotiation() {
        let mut context = spnego(vec![Box::new(NtlmConfig::default())]);
        context.initialize(None).unwrap();

        let err = context
            .initialize(Some(&acceptor_resp(Some(NegState::Reject), None, None, None)))
            .unwrap_err();

        assert_eq!(err.error_type, ErrorKind::Rejected);
    }

    #[test]
    fn unreachable_kdc_falls_back_to_ntlm() {
        let mut context = spnego(vec![unreachable_kerberos(), Box::new(NtlmConfig::default())]);

        let first = context.initialize(None).unwrap();

        assert_eq!(context.negotiated_mechanism(), Some(MechanismKind::Ntlm));
        let init = decode_neg_token_init(&first.output).unwrap();
        assert_eq!(init.mech_types, vec![oids::ntlm_ssp()]);
        assert_eq!(&init.mech_token.unwrap()[..8], b"NTLMSSP\0");
    }

    #[test]
    fn selecting_a_mechanism_that_was_not_offered_is_defective() {
        let mut context = spnego(vec![Box::new(NtlmConfig::default())]);
        context.initialize(None).unwrap();

        let err = context
            .initialize(Some(&acceptor_resp(
                Some(NegState::AcceptIncomplete),
                Some(oids::ms_krb5()),
                None,
                None,
            )))
            .unwrap_err();

        assert_eq!(err.error_type, ErrorKind::DefectiveToken);
    }

    #[test]
    fn acceptor_selection_restarts_with_the_selected_mechanism() {
        let mut context = spnego(vec![Box::new(NtlmConfig::default()), unreachable_kerberos()]);
        let first = context.initialize(None).unwrap();
        assert_eq!(
            decode_neg_token_init(&first.output).unwrap().mech_types,
            vec![oids::ntlm_ssp(), oids::krb5()]
        );

        // Kerberos is started on selection, and its KDC exchange fails
        let err = context
            .initialize(Some(&acceptor_resp(
                Some(NegState::AcceptIncomplete),
                Some(oids::krb5()),
                None,
                None,
            )))
            .unwrap_err();

        assert_eq!(err.error_type, ErrorKind::Failure);
        assert_eq!(context.negotiated_mechanism(), Some(MechanismKind::Ntlm));
    }

    #[test]
    fn request_mic_without_completion_is_defective() {
        let mut context = spnego(vec![Box::new(NtlmConfig::default())]);
        context.initialize(None).unwrap();

        let err = context
            .initialize(Some(&acceptor_resp(Some(NegState::RequestMic), None, None, None)))
            .unwrap_err();

        assert_eq!(err.error_type, ErrorKind::DefectiveToken);
    }

    #[test]
    fn acceptor_init_narrows_the_offer() {
        let mut context = spnego(vec![unreachable_kerberos(), Box::new(NtlmConfig::default())]);
        let acceptor_init = generate_neg_token_init(
            generate_mech_type_list(&[MechanismKind::Ntlm]).unwrap(),
            None,
        )
        .unwrap();

        let first = context.initialize(Some(&acceptor_init)).unwrap();

        assert_eq!(
            decode_neg_token_init(&first.output).unwrap().mech_types,
            vec![oids::ntlm_ssp()]
        );
    }

    #[test]
    fn acceptor_init_without_common_mechanism_is_unavailable() {
        let mut context = spnego(vec![Box::new(NtlmConfig::default())]);
        let acceptor_init = generate_neg_token_init(
            generate_mech_type_list(&[MechanismKind::Kerberos]).unwrap(),
            None,
        )
        .unwrap();

        let err = context.initialize(Some(&acceptor_init)).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::Unavailable);
    }

    #[test]
    fn nested_or_oidless_mechanisms_are_not_negotiable() {
        let credential = Credential::password("CONTOSO\\alice", "Passw0rd!").unwrap();

        let err = Spnego::new(
            NegotiateConfig::new(vec![Box::new(NegotiateConfig::default())]),
            credential,
            capabilities(),
            None,
        )
        .unwrap_err();

        assert_eq!(err.error_type, ErrorKind::InvalidParameter);
    }

    #[test]
    fn per_message_operations_wait_for_completion() {
        let mut context = spnego(vec![Box::new(NtlmConfig::default())]);
        context.initialize(None).unwrap();

        assert_eq!(context.wrap(b"early").unwrap_err().error_type, ErrorKind::NoContext);
        assert_eq!(context.sequence_state(), None);
        assert_eq!(
            context.initialize(None).unwrap_err().error_type,
            ErrorKind::OutOfSequence
        );
    }
}
