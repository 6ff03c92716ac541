use thiserror::Error;

use crate::git::GitError;
use crate::remote::TransportError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(
        "SANDCASTLE_BASE_COMMIT is not set in the sandbox.\n\
         The sandbox must export the commit its checkout is based on before files can be synced.\n\
         Check the sandbox config, or pass --no-sync to run without syncing."
    )]
    MissingBaseCommit,

    #[error(
        "git is not installed in the sandbox.\n\
         Install git in the sandbox image, or pass --no-sync to run without syncing."
    )]
    GitNotInstalled,

    #[error("unable to reset the sandbox working tree to {commit} (exit code {code})")]
    ResetFailed { commit: String, code: i32 },

    #[error(
        "unable to apply local changes in the sandbox (git apply exited with {0}).\n\
         Local commits the sandbox does not have can cause this; push them or run `sandcastle reset`."
    )]
    PatchApplyFailed(i32),

    #[error("unable to list changed files in the sandbox (exit code {0})")]
    ListChangesFailed(i32),

    #[error("unable to archive changed files in the sandbox (exit code {0})")]
    ArchiveFailed(i32),

    #[error("unable to extract sandbox files locally: {0}")]
    ExtractFailed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
