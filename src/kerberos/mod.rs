pub mod cipher;
pub mod client;
pub mod config;
pub mod encryption;
pub mod flags;
pub(crate) mod utils;


use picky_krb::constants::key_usages::AP_REQ_AUTHENTICATOR;
use picky_krb::messages::ApRep;
use rand::rngs::OsRng;
use rand::RngCore;

pub use self::cipher::{derive_cipher_state, CipherParams, KerberosCipher};
use self::client::extractors::extract_ap_rep_part;
use self::client::generators::{
    generate_ap_rep, generate_ap_req, generate_authenticator, generate_gss_checksum, GenerateAuthenticatorOptions,
};
use self::client::{acquire_service_ticket, AcquiredTicket};
pub use self::config::KerberosConfig;
pub use self::encryption::EncryptionType;
use self::flags::{ApOptions, GssFlags};
use self::utils::decode_kdc_reply;
use crate::channel_bindings::ChannelBindings;
use crate::config::MechanismKind;
use crate::context::{
    ensure_confidentiality, no_session, Capabilities, HandshakeResult, Inbound, InitializeResult, Mechanism, Outbound,
    Role, SecurityBuffer, SequenceState,
};
use crate::credential::Credential;
use crate::gss::{self, KRB5_OID_DER, TOK_ID_AP_REP, TOK_ID_AP_REQ, TOK_ID_KRB_ERROR};
use crate::secret::Secret;
use crate::{Error, ErrorKind, Result};

pub const PKG_NAME: &str = "Kerberos";
pub const KERBEROS_VERSION: u8 = 0x05;
pub const TGT_SERVICE_NAME: &str = "krbtgt";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum KerberosState {
    Initial,
    ApRep,
    Final,
}

/// What the AP-REQ committed to, kept until the AP-REP arrives.
#[derive(Debug)]
struct PendingApExchange {
    ticket_key_type: EncryptionType,
    ticket_key: Secret<Vec<u8>>,
    subkey_type: EncryptionType,
    subkey: Secret<Vec<u8>>,
    seq_number: u32,
}

#[derive(Debug)]
struct KerberosSession {
    outbound: Outbound<KerberosCipher>,
    inbound: Inbound<KerberosCipher>,
    capabilities: Capabilities,
}

/// Client side of the Kerberos Network Authentication Service (V5).
///
/// The first `initialize` call acquires a service ticket for the target (a KDC round
/// trip unless a credential cache already holds one) and emits the AP-REQ. With mutual
/// authentication or DCE style the next call consumes the AP-REP. A DCE style exchange
/// ends with a third leg: the client echoes the acceptor sequence number in its own AP-REP.
///
/// # MSDN
///
/// * [[MS-KILE]: Kerberos Protocol Extensions](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-kile/2a32282e-dd48-4ad9-a542-609804b02cc9)
#[derive(Debug)]
pub struct Kerberos {
    config: KerberosConfig,
    credential: Credential,
    capabilities: Capabilities,
    target_name: Option<String>,
    channel_bindings: Option<ChannelBindings>,

    state: KerberosState,
    pending: Option<PendingApExchange>,

    session: Option<KerberosSession>,
}

impl Kerberos {
    pub fn new(
        config: KerberosConfig,
        credential: Credential,
        capabilities: Capabilities,
        target_name: Option<String>,
    ) -> Result<Self> {
        if capabilities.intersects(Capabilities::DATAGRAM | Capabilities::ANONYMITY) {
            return Err(Error::new(
                ErrorKind::Unavailable,
                format!(
                    "Kerberos cannot provide {:?}",
                    capabilities & (Capabilities::DATAGRAM | Capabilities::ANONYMITY)
                ),
            ));
        }
        if credential.is_anonymous() {
            return Err(Error::new(
                ErrorKind::DefectiveCredential,
                "Kerberos needs a named credential",
            ));
        }

        let mut capabilities = capabilities;
        if config.dce_style {
            capabilities |= Capabilities::DCE_STYLE;
        }
        if config.mutual_authn {
            capabilities |= Capabilities::MUTUAL_AUTHN;
        }

        Ok(Self {
            config,
            credential,
            capabilities,
            target_name,
            channel_bindings: None,

            state: KerberosState::Initial,
            pending: None,

            session: None,
        })
    }

    /// Hashed into the authenticator checksum and announced with `KERB_AP_OPTIONS_CBT`.
    pub fn set_channel_bindings(&mut self, channel_bindings: ChannelBindings) {
        self.channel_bindings = Some(channel_bindings);
    }

    fn dce_style(&self) -> bool {
        self.capabilities.contains(Capabilities::DCE_STYLE)
    }

    fn expects_ap_rep(&self) -> bool {
        self.capabilities
            .intersects(Capabilities::MUTUAL_AUTHN | Capabilities::DCE_STYLE)
    }

    fn write_ap_req(&mut self, ticket: AcquiredTicket) -> Result<Vec<u8>> {
        let subkey_type = ticket.session_key_type;
        let subkey = Secret::new(subkey_type.random_key());
        let seq_number = OsRng.next_u32() & 0x3fff_ffff;

        let checksum = generate_gss_checksum(GssFlags::from(self.capabilities), self.channel_bindings.as_ref());
        let authenticator = generate_authenticator(GenerateAuthenticatorOptions {
            crealm: ticket.crealm,
            cname: ticket.cname,
            seq_number: Some(seq_number),
            subkey: Some((subkey_type, subkey.as_ref())),
            checksum: Some(checksum),
            channel_bindings: self.channel_bindings.as_ref(),
        })?;

        let ap_req = generate_ap_req(
            ticket.ticket,
            ticket.session_key_type,
            ticket.session_key.as_ref(),
            &authenticator,
            ApOptions::from(self.capabilities),
            AP_REQ_AUTHENTICATOR,
        )?;
        let ap_req = picky_asn1_der::to_vec(&ap_req)?;

        self.pending = Some(PendingApExchange {
            ticket_key_type: ticket.session_key_type,
            ticket_key: ticket.session_key,
            subkey_type,
            subkey,
            seq_number,
        });

        if self.dce_style() {
            Ok(ap_req)
        } else {
            Ok(gss::encode(&KRB5_OID_DER, TOK_ID_AP_REQ, &ap_req))
        }
    }

    /// DER of the AP-REP, unwrapped from its GSS token outside of DCE style.
    fn ap_rep_bytes<'a>(&self, input: &'a [u8]) -> Result<&'a [u8]> {
        if self.dce_style() {
            return Ok(input);
        }

        let token = gss::decode(input)?;
        if token.oid != KRB5_OID_DER {
            return Err(Error::new(ErrorKind::DefectiveToken, "GSS token is not a Kerberos token"));
        }

        match token.tok_id {
            TOK_ID_AP_REP | TOK_ID_KRB_ERROR => Ok(token.body),
            tok_id => Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("unexpected GSS token id {:02x?}", tok_id),
            )),
        }
    }

    fn read_ap_rep(&mut self, input: &[u8]) -> Result<(Vec<u8>, HandshakeResult)> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| Error::new(ErrorKind::OutOfSequence, "AP-REP received before the AP-REQ was sent"))?;

        // the acceptor answers with a KRB-ERROR when it refuses the AP-REQ
        let ap_rep = decode_kdc_reply::<ApRep>(self.ap_rep_bytes(input)?)?.map_err(Error::from)?;

        let ap_rep_part = extract_ap_rep_part(&ap_rep, pending.ticket_key_type, pending.ticket_key.as_ref())?;
        let acceptor_sequence_number = ap_rep_part.seq_number.unwrap_or(pending.seq_number);

        let (encryption_type, key, acceptor_subkey) = match ap_rep_part.subkey {
            Some((encryption_type, key)) => (encryption_type, key, true),
            None => (pending.subkey_type, pending.subkey, false),
        };
        debug!(%encryption_type, acceptor_subkey, "AP-REP accepted");

        let output = if self.dce_style() {
            let ap_rep = generate_ap_rep(
                pending.ticket_key_type,
                pending.ticket_key.as_ref(),
                acceptor_sequence_number,
            )?;

            picky_asn1_der::to_vec(&ap_rep)?
        } else {
            Vec::new()
        };

        let handshake = self.establish(CipherParams {
            encryption_type,
            key,
            acceptor_subkey,
            dce_style: self.dce_style(),
            initiator_sequence_number: pending.seq_number,
            acceptor_sequence_number,
        })?;

        Ok((output, handshake))
    }

    /// Completes without an AP-REP: both directions use the authenticator subkey.
    fn complete_without_ap_rep(&mut self) -> Result<HandshakeResult> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Failure, "no AP-REQ was generated"))?;

        self.establish(CipherParams {
            encryption_type: pending.subkey_type,
            key: pending.subkey,
            acceptor_subkey: false,
            dce_style: false,
            initiator_sequence_number: pending.seq_number,
            acceptor_sequence_number: pending.seq_number,
        })
    }

    fn establish(&mut self, params: CipherParams) -> Result<HandshakeResult> {
        let (outbound, inbound) = derive_cipher_state(&params, Role::Initiator)?;

        let capabilities = self.capabilities;
        self.session = Some(KerberosSession {
            outbound,
            inbound,
            capabilities,
        });
        self.state = KerberosState::Final;

        Ok(HandshakeResult {
            mechanism: MechanismKind::Kerberos,
            session_key: params.key,
            target_name: self.target_name.clone(),
            capabilities,
        })
    }

    fn session_mut(&mut self) -> Result<&mut KerberosSession> {
        self.session.as_mut().ok_or_else(no_session)
    }
}

impl Mechanism for Kerberos {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Kerberos
    }

    #[instrument(level = "debug", ret, fields(state = ?self.state), skip_all)]
    fn initialize(&mut self, input: Option<&[u8]>) -> Result<InitializeResult> {
        match (self.state, input) {
            (KerberosState::Initial, input) if input.map_or(true, <[u8]>::is_empty) => {
                let target_name = self.target_name.as_deref().ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidParameter,
                        "Kerberos needs the service principal name of the target",
                    )
                })?;
                let ticket = acquire_service_ticket(&self.config, &self.credential, target_name)?;
                let output = self.write_ap_req(ticket)?;

                if self.expects_ap_rep() {
                    self.state = KerberosState::ApRep;

                    Ok(InitializeResult::continue_needed(output))
                } else {
                    let handshake = self.complete_without_ap_rep()?;

                    Ok(InitializeResult::complete(output, handshake))
                }
            }
            (KerberosState::ApRep, Some(input)) => {
                let (output, handshake) = self.read_ap_rep(input)?;

                Ok(InitializeResult::complete(output, handshake))
            }
            (state, _) => Err(Error::new(
                ErrorKind::OutOfSequence,
                format!("got wrong Kerberos state: {:?}", state),
            )),
        }
    }

    fn is_complete(&self) -> bool {
        self.state == KerberosState::Final
    }

    #[instrument(level = "trace", skip_all)]
    fn wrap_ex(&mut self, buffers: &mut [SecurityBuffer]) -> Result<Vec<u8>> {
        let session = self.session_mut()?;
        ensure_confidentiality(session.capabilities)?;

        session.outbound.wrap(buffers)
    }

    #[instrument(level = "trace", skip_all)]
    fn unwrap_ex(&mut self, buffers: &mut [SecurityBuffer], signature: &[u8]) -> Result<()> {
        let session = self.session_mut()?;
        ensure_confidentiality(session.capabilities)?;

        session.inbound.unwrap(buffers, signature)
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
