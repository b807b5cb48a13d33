use msrpc_ssp::ntlm::messages::av_pair::AvPair;
use msrpc_ssp::ntlm::{
    derive_cipher_state, AuthenticateMessage, ChallengeMessage, NegotiateFlags, NegotiateMessage, NtlmCipher,
    NtlmConfig, DEFAULT_NTLM_VERSION,
};
use msrpc_ssp::{
    Capabilities, ErrorKind, Inbound, Mechanism, MechanismKind, Outbound, Role, SecurityBuffer, SecurityContext,
    SecurityStatus, SequenceState,
};

use crate::common::{init_tracing, TARGET, USER};

fn utf16(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn challenge_for(negotiate: &[u8]) -> Vec<u8> {
    let negotiate = NegotiateMessage::from_bytes(negotiate).unwrap();

    ChallengeMessage {
        target_name: utf16("CONTOSO"),
        flags: negotiate.flags | NegotiateFlags::NTLM_SSP_NEGOTIATE_TARGET_INFO,
        server_challenge: [0x5a; 8],
        target_info: AvPair::list_to_buffer(&[
            AvPair::NbDomainName(utf16("CONTOSO")),
            AvPair::NbComputerName(utf16("DC01")),
            AvPair::DnsDomainName(utf16("contoso.com")),
            AvPair::Timestamp(0x01da_0000_0000_0000),
        ])
        .unwrap(),
        version: Some(DEFAULT_NTLM_VERSION),
    }
    .to_bytes()
    .unwrap()
}

/// Drives a client through NEGOTIATE, CHALLENGE and AUTHENTICATE and returns the
/// acceptor's view of the session.
fn establish(capabilities: Capabilities) -> (SecurityContext, Outbound<NtlmCipher>, Inbound<NtlmCipher>) {
    init_tracing();

    let mut context =
        SecurityContext::new(&NtlmConfig::default(), USER.clone(), capabilities, Some(TARGET.to_owned())).unwrap();

    let negotiate = context.initialize(None).unwrap();
    assert_eq!(negotiate.status, SecurityStatus::ContinueNeeded);

    let result = context.initialize(Some(&challenge_for(&negotiate.output))).unwrap();
    assert_eq!(result.status, SecurityStatus::Complete);

    let handshake = result.handshake.unwrap();
    assert_eq!(handshake.mechanism, MechanismKind::Ntlm);
    assert_eq!(handshake.target_name.as_deref(), Some(TARGET));

    let authenticate = AuthenticateMessage::from_bytes(&result.output).unwrap();
    assert!(authenticate.mic.is_some());

    let session_key: [u8; 16] = handshake.session_key.as_ref().as_slice().try_into().unwrap();
    let (outbound, inbound) = derive_cipher_state(&session_key, authenticate.flags, Role::Acceptor).unwrap();

    (context, outbound, inbound)
}

#[test]
fn sealed_requests_and_responses() {
    let (mut client, mut server_out, mut server_in) =
        establish(Capabilities::INTEGRITY | Capabilities::CONFIDENTIALITY);

    for request in [&b"NetrServerReqChallenge"[..], b"", &[0xff; 1024][..]] {
        let (sealed, signature) = client.wrap(request).unwrap();
        let mut buffers = [SecurityBuffer::data(sealed)];
        server_in.unseal(&mut buffers, &signature).unwrap();
        assert_eq!(buffers[0].data, request);

        let mut buffers = [SecurityBuffer::data(b"response stub".to_vec())];
        let signature = server_out.seal(&mut buffers).unwrap();
        let [response] = buffers;
        assert_eq!(client.unwrap(&response.data, &signature).unwrap(), b"response stub");
    }

    assert_eq!(
        client.sequence_state(),
        Some(SequenceState {
            outbound: 3,
            inbound: 3
        })
    );
}

#[test]
fn pdu_header_is_signed_but_not_sealed() {
    let (mut client, _, mut server_in) = establish(Capabilities::INTEGRITY | Capabilities::CONFIDENTIALITY);

    let header = vec![0x05, 0x00, 0x00, 0x03, 0x10, 0x00, 0x00, 0x00];
    let mut buffers = [
        SecurityBuffer::sign_only(header.clone()),
        SecurityBuffer::data(b"stub data".to_vec()),
    ];
    let signature = client.wrap_ex(&mut buffers).unwrap();

    assert_eq!(buffers[0].data, header);
    assert_ne!(buffers[1].data, b"stub data");

    server_in.unseal(&mut buffers, &signature).unwrap();
    assert_eq!(buffers[1].data, b"stub data");
}

#[test]
fn tampered_signature_is_rejected() {
    let (mut client, _, mut server_in) = establish(Capabilities::INTEGRITY);

    let mut signature = client.make_signature(b"bind ack").unwrap();
    signature[6] ^= 0x01;

    let err = server_in
        .verify(&[SecurityBuffer::sign_only(b"bind ack".to_vec())], &signature)
        .unwrap_err();
    assert_eq!(err.error_type, ErrorKind::BadMic);
}

#[test]
fn integrity_only_context_cannot_wrap() {
    let (mut client, _, _) = establish(Capabilities::INTEGRITY);

    assert_eq!(client.wrap(b"secret").unwrap_err().error_type, ErrorKind::Unavailable);
}
