use std::io;

use tracing::{debug, info, warn};

use super::error::{Result, SyncError};
use super::{BASE_COMMIT_ENV, COMMAND_NOT_FOUND};
use crate::git::VersionControl;
use crate::remote::{capture_stdout, RemoteChannel};
use crate::sandbox::command::shell_quote;

const APPLY_COMMAND: &str = "git apply --allow-empty -";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The sandbox was reset and the local patch applied on top.
    Applied { bytes: usize },
    /// The sandbox was reset; there were no local changes to apply.
    Reset,
    /// Large-file-storage files changed locally; nothing was touched remotely.
    SkippedLfs(Vec<String>),
}

/// Make the sandbox working tree match the local one.
pub fn push(channel: &mut dyn RemoteChannel, repo: &dyn VersionControl) -> Result<PushOutcome> {
    let patch = repo.generate_patch()?;
    if patch.has_lfs_changes() {
        warn!(
            "Skipping sync: {} LFS file(s) changed locally",
            patch.lfs_files.len()
        );
        return Ok(PushOutcome::SkippedLfs(patch.lfs_files));
    }

    let base = read_base_commit(channel)?;
    reset_remote(channel, &base)?;

    if patch.is_empty() {
        debug!("No local changes to push");
        return Ok(PushOutcome::Reset);
    }

    let bytes = patch.patch.len();
    let code = channel.exec_with_stdin(APPLY_COMMAND, &mut patch.patch.as_slice())?;
    match code {
        0 => {
            info!(
                "Pushed {} changed path(s) ({} bytes) to sandbox",
                patch.changed_paths.len(),
                bytes
            );
            Ok(PushOutcome::Applied { bytes })
        }
        COMMAND_NOT_FOUND => Err(SyncError::GitNotInstalled),
        code => Err(SyncError::PatchApplyFailed(code)),
    }
}

fn read_base_commit(channel: &mut dyn RemoteChannel) -> Result<String> {
    let command = format!("printf '%s' \"${{{BASE_COMMIT_ENV}:-}}\"");
    let (code, stdout) = capture_stdout(channel, &command)?;
    let base = String::from_utf8_lossy(&stdout).trim().to_string();
    if code != 0 || base.is_empty() {
        return Err(SyncError::MissingBaseCommit);
    }
    Ok(base)
}

fn reset_remote(channel: &mut dyn RemoteChannel, base: &str) -> Result<()> {
    let command = format!("git reset --hard {} && git clean -fd", shell_quote(base));
    let code = channel.exec_with_stdout(&command, &mut io::sink())?;
    match code {
        0 => Ok(()),
        COMMAND_NOT_FOUND => Err(SyncError::GitNotInstalled),
        code => Err(SyncError::ResetFailed {
            commit: base.to_string(),
            code,
        }),
    }
}
