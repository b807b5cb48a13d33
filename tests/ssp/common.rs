use std::sync::Once;

use lazy_static::lazy_static;
use msrpc_ssp::Credential;
use tracing_subscriber::EnvFilter;

lazy_static! {
    pub static ref USER: Credential = Credential::password("CONTOSO\\alice", "Passw0rd!").unwrap();
    pub static ref MACHINE: Credential = Credential::password("contoso.com\\WS01$", "Machine-Account-Secret").unwrap();
}

pub const TARGET: &str = "host/dc01.contoso.com";

static TRACING: Once = Once::new();

/// `RUST_LOG=msrpc_ssp=trace cargo test` shows the handshake traces.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
