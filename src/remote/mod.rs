//! Authenticated command channels into a running sandbox

pub mod channel;
pub mod error;
pub mod keys;
pub mod ssh;

pub use channel::{capture_stdout, Connector, RemoteChannel};
pub use error::{Result, TransportError};
pub use ssh::{SshChannel, SshConnector, SshTarget};
