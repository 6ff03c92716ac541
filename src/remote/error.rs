use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unable to parse key material: {0}")]
    InvalidPrivateKey(String),

    #[error("unable to parse sandbox host key: {0}")]
    InvalidHostKey(String),

    #[error("invalid sandbox address '{0}'")]
    InvalidAddress(String),

    #[error(
        "unable to connect to sandbox at {address}: {reason}\n\
         The sandbox may have expired. Run `sandcastle reset` to start a fresh one."
    )]
    Connect { address: String, reason: String },

    #[error("remote command was terminated by a signal")]
    Terminated,

    #[error("connection to the sandbox is already closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
