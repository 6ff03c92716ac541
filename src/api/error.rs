use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Run {0} was not found")]
    RunNotFound(String),

    #[error(
        "Not authorized with the sandbox service.\n\
         Set SANDCASTLE_ACCESS_TOKEN or add access_token to the [api] section of config.toml."
    )]
    Unauthorized,

    #[error("Invalid run id: {0:?}")]
    InvalidRunId(String),

    #[error("Invalid sandbox service host {0}")]
    InvalidHost(String),

    #[error("Sandbox service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request to the sandbox service failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ApiError>;
