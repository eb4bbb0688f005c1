pub mod anchor;
pub mod chain;
pub mod crypto;
pub mod error;
pub mod server;
pub mod state;
