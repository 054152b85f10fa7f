//! termgate-core: Shared protocol library for termgate.
//!
//! Provides the terminal frame types exchanged over the WebSocket, the SSH
//! credential descriptor, and the common error type.

pub mod credentials;
pub mod error;
pub mod frames;

// Re-export commonly used items at crate root.
pub use credentials::{Credentials, Secret, DEFAULT_SSH_PORT};
pub use error::{TermgateError, TermgateResult};
pub use frames::{decode_inbound, InboundFrame, OutboundFrame};
