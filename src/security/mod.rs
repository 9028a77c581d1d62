pub mod audit_log;
pub mod auth;
pub mod jwks;
pub mod replay;
pub mod request_signer;
pub mod token;
pub mod verifier;
