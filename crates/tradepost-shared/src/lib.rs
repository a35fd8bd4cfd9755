//! # tradepost-shared
//!
//! Types shared between the store and the server: user references, message
//! bodies, the resolved message shape sent to clients, and the real-time
//! event protocol.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use types::*;
