mod common;
mod netlogon;
mod ntlm;
mod security_context;
