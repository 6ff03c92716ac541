use thiserror::Error;

use crate::api::ApiError;
use crate::git::GitError;
use crate::remote::TransportError;
use crate::sync::SyncError;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("config file {0} does not exist")]
    ConfigFileMissing(String),

    #[error("no command given. Usage: sandcastle exec -- <command> [args...]")]
    NoCommand,

    #[error("{0}")]
    Validation(String),

    #[error("sandbox run {0} was not found. Check the id with `sandcastle list`.")]
    RunNotFound(String),

    #[error(
        "sandbox run {0} has already completed and cannot be reattached.\n\
         Start a new sandbox with `sandcastle start` instead."
    )]
    RunCompleted(String),

    #[error(
        "sandbox run {0} ended before becoming ready.\n\
         Start a new sandbox with `sandcastle start`."
    )]
    EndedBeforeReady(String),

    #[error(
        "multiple active sandboxes for {cwd} on branch {branch}: {}.\n\
         Specify a config file or --id.",
        run_ids.join(", ")
    )]
    AmbiguousSession {
        cwd: String,
        branch: String,
        run_ids: Vec<String>,
    },

    #[error(transparent)]
    Api(ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ApiError> for SandboxError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::RunNotFound(run_id) => SandboxError::RunNotFound(run_id),
            other => SandboxError::Api(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
