use msrpc_ssp::{
    Capabilities, Credential, ErrorKind, Mechanism, MechanismKind, NegotiateConfig, NetlogonConfig, NtlmConfig,
    ProtocolConfig, SecurityContext,
};
use static_assertions::assert_impl_all;

use crate::common::{init_tracing, MACHINE, TARGET, USER};

assert_impl_all!(SecurityContext: Send, std::fmt::Debug);
assert_impl_all!(Credential: Send, Sync, Clone);
assert_impl_all!(Box<dyn ProtocolConfig>: Send, Sync, Clone);

#[test]
fn each_configuration_builds_its_own_mechanism() {
    init_tracing();

    let configs: Vec<Box<dyn ProtocolConfig>> = vec![
        Box::new(NtlmConfig::default()),
        Box::new(NetlogonConfig::new([0x01; 8], [0x02; 8])),
        Box::new(NegotiateConfig::from_protocol_config(Box::new(NtlmConfig::default()))),
    ];

    let kinds = configs
        .iter()
        .map(|config| {
            SecurityContext::new(config.as_ref(), MACHINE.clone(), Capabilities::INTEGRITY, Some(TARGET.to_owned()))
                .unwrap()
                .kind()
        })
        .collect::<Vec<_>>();

    assert_eq!(
        kinds,
        vec![MechanismKind::Ntlm, MechanismKind::Netlogon, MechanismKind::Spnego]
    );
}

#[test]
fn anonymous_credential_is_refused_where_a_secret_is_needed() {
    let err = SecurityContext::new(
        &NetlogonConfig::default(),
        Credential::anonymous(),
        Capabilities::INTEGRITY,
        None,
    )
    .unwrap_err();

    assert_eq!(err.error_type, ErrorKind::DefectiveCredential);
}

#[test]
fn spnego_offers_ntlm_with_an_optimistic_token() {
    let mut context = SecurityContext::new(
        &NegotiateConfig::from_protocol_config(Box::new(NtlmConfig::default())),
        USER.clone(),
        Capabilities::INTEGRITY | Capabilities::CONFIDENTIALITY,
        Some(TARGET.to_owned()),
    )
    .unwrap();

    let output = context.initialize(None).unwrap().output;

    // APPLICATION 0 with the SPNEGO OID
    assert_eq!(output[0], 0x60);
    assert!(output.windows(8).any(|window| window == b"NTLMSSP\0"));
    assert!(!context.is_complete());
    assert_eq!(
        context.make_signature(b"too early").unwrap_err().error_type,
        ErrorKind::NoContext
    );
}
