//! SSH session management.

pub mod registry;
pub mod ssh;

pub use registry::SessionRegistry;
pub use ssh::{ConnectOptions, SshSession};
