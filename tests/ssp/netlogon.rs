use msrpc_ssp::netlogon::credential::SessionKeyAlgorithm;
use msrpc_ssp::netlogon::messages::negotiate_response;
use msrpc_ssp::netlogon::{compute_credential, compute_session_key, derive_cipher_state};
use msrpc_ssp::{
    Capabilities, ErrorKind, Mechanism, MechanismKind, NetlogonConfig, Role, SecurityBuffer, SecurityContext,
    SecurityStatus,
};
use proptest::prelude::*;

use crate::common::{init_tracing, MACHINE};

const CLIENT_CHALLENGE: [u8; 8] = [0x3a, 0x1f, 0x44, 0x07, 0x9c, 0x21, 0x5e, 0x60];
const SERVER_CHALLENGE: [u8; 8] = [0xc1, 0x02, 0x7d, 0x9e, 0x11, 0x4b, 0x88, 0xf3];

fn config(aes: bool) -> NetlogonConfig {
    NetlogonConfig {
        aes,
        ..NetlogonConfig::new(CLIENT_CHALLENGE, SERVER_CHALLENGE)
    }
}

fn server_session_key(aes: bool) -> [u8; 16] {
    let nt_hash = MACHINE.nt_hash_value().unwrap();
    let key = compute_session_key(
        SessionKeyAlgorithm::negotiate(aes, true),
        nt_hash.as_ref(),
        &CLIENT_CHALLENGE,
        &SERVER_CHALLENGE,
    )
    .unwrap();

    *key.as_ref()
}

fn established(aes: bool) -> SecurityContext {
    init_tracing();

    let mut context = SecurityContext::new(
        &config(aes),
        MACHINE.clone(),
        Capabilities::INTEGRITY | Capabilities::CONFIDENTIALITY,
        Some("DC01".to_owned()),
    )
    .unwrap();

    assert_eq!(context.initialize(None).unwrap().status, SecurityStatus::ContinueNeeded);
    let result = context.initialize(Some(&negotiate_response())).unwrap();
    assert_eq!(result.status, SecurityStatus::Complete);
    assert_eq!(result.handshake.unwrap().mechanism, MechanismKind::Netlogon);

    context
}

#[test]
fn credential_chain_matches_the_server() {
    for aes in [false, true] {
        let context = SecurityContext::new(&config(aes), MACHINE.clone(), Capabilities::INTEGRITY, None).unwrap();
        let SecurityContext::Netlogon(netlogon) = &context else {
            panic!("expected a Netlogon context");
        };

        let key = server_session_key(aes);
        let secure_credential = netlogon.secure_credential().unwrap();

        assert_eq!(
            secure_credential.client_credential(),
            compute_credential(&CLIENT_CHALLENGE, &key, aes).unwrap()
        );

        let server_credential = compute_credential(&SERVER_CHALLENGE, &key, aes).unwrap();
        secure_credential
            .verify_server_credential(&SERVER_CHALLENGE, &server_credential)
            .unwrap();
    }
}

#[test]
fn wrong_server_credential_is_bad_mic() {
    let context = SecurityContext::new(&config(true), MACHINE.clone(), Capabilities::INTEGRITY, None).unwrap();
    let SecurityContext::Netlogon(netlogon) = &context else {
        panic!("expected a Netlogon context");
    };

    let err = netlogon
        .secure_credential()
        .unwrap()
        .verify_server_credential(&SERVER_CHALLENGE, &[0x00; 8])
        .unwrap_err();

    assert_eq!(err.error_type, ErrorKind::BadMic);
}

#[test]
fn replayed_request_is_refused_by_the_server() {
    let mut client = established(true);
    let (_, mut server_in) = derive_cipher_state(&server_session_key(true), true, Role::Acceptor);

    let (first, first_signature) = client.wrap(b"NetrLogonSamLogonEx").unwrap();
    let mut buffers = [SecurityBuffer::data(first.clone())];
    server_in.unseal(&mut buffers, &first_signature).unwrap();

    let mut replayed = [SecurityBuffer::data(first)];
    let err = server_in.unseal(&mut replayed, &first_signature).unwrap_err();
    assert_eq!(err.error_type, ErrorKind::BadMic);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_payload_reaches_the_server(aes in any::<bool>(), payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut client = established(aes);
        let (_, mut server_in) = derive_cipher_state(&server_session_key(aes), aes, Role::Acceptor);

        let (sealed, signature) = client.wrap(&payload).unwrap();
        let mut buffers = [SecurityBuffer::data(sealed)];
        server_in.unseal(&mut buffers, &signature).unwrap();

        prop_assert_eq!(&buffers[0].data, &payload);
    }
}
