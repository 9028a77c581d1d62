pub mod agent;
pub mod comms;
pub mod error;
pub mod lifecycle;
pub mod security;
pub mod store;
pub mod transport;
pub mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
