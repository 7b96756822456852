pub mod client;
pub mod crypto;
pub mod server;
pub mod signal;
