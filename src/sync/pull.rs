use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path};
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use super::error::{Result, SyncError};
use super::COMMAND_NOT_FOUND;
use crate::git::VersionControl;
use crate::remote::{capture_stdout, RemoteChannel};
use crate::sandbox::command::shell_join;

const REMOTE_MODIFIED: &str = "git diff --name-only -z HEAD";
const REMOTE_UNTRACKED: &str = "git ls-files --others --exclude-standard -z";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOutcome {
    /// Paths copied from the sandbox over the local tree.
    pub pulled: Vec<String>,
    /// Paths the sandbox deleted that were removed locally.
    pub deleted: Vec<String>,
}

/// Every path that has to be replaced locally: whatever the sandbox changed,
/// whatever was changed locally since the last sync, and anything the caller
/// asked for explicitly. Local changes are included so that the sandbox's
/// copy, which already contains them, is the one that ends up on disk.
///
/// Paths that would resolve outside the repository root are dropped.
pub fn reconcile_paths(
    remote_changed: &BTreeSet<String>,
    local_changed: &[String],
    explicit: &[String],
) -> BTreeSet<String> {
    remote_changed
        .iter()
        .chain(local_changed)
        .chain(explicit)
        .filter_map(|p| repo_relative(p))
        .collect()
}

/// Normalizes a repository-relative path, or returns `None` when it is empty,
/// absolute, or climbs out of the root.
fn repo_relative(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches("./");
    if trimmed.is_empty() {
        return None;
    }
    let contained = Path::new(trimmed)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained {
        warn!("Ignoring path outside the repository: {}", path);
        return None;
    }
    Some(trimmed.to_string())
}

/// Copy the sandbox's state of every changed path back into the local tree.
pub fn pull(
    channel: &mut dyn RemoteChannel,
    repo: &dyn VersionControl,
    explicit: &[String],
) -> Result<PullOutcome> {
    let remote_changed = remote_changed_paths(channel)?;
    let local_changed = repo.changed_paths()?;
    let paths = reconcile_paths(&remote_changed, &local_changed, explicit);
    if paths.is_empty() {
        debug!("Nothing to pull from sandbox");
        return Ok(PullOutcome::default());
    }

    let present: BTreeSet<String> = remote_existing_paths(channel, &paths)?
        .intersection(&paths)
        .cloned()
        .collect();
    if !present.is_empty() {
        extract_remote_archive(channel, repo.root(), &present)?;
    }

    // Paths the sandbox changed or received from the last push mirror its
    // deletions. Explicit paths that never existed there are left alone.
    let synced = reconcile_paths(&remote_changed, &local_changed, &[]);
    let mut deleted = Vec::new();
    for path in paths
        .iter()
        .filter(|p| !present.contains(*p) && synced.contains(*p))
    {
        match fs::remove_file(repo.root().join(path)) {
            Ok(()) => deleted.push(path.clone()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        "Pulled {} path(s) from sandbox, removed {}",
        present.len(),
        deleted.len()
    );
    Ok(PullOutcome {
        pulled: present.into_iter().collect(),
        deleted,
    })
}

fn remote_changed_paths(channel: &mut dyn RemoteChannel) -> Result<BTreeSet<String>> {
    let mut paths = BTreeSet::new();
    for command in [REMOTE_MODIFIED, REMOTE_UNTRACKED] {
        let (code, stdout) = capture_stdout(channel, command)?;
        match code {
            0 => paths.extend(split_nul(&stdout)),
            COMMAND_NOT_FOUND => return Err(SyncError::GitNotInstalled),
            code => return Err(SyncError::ListChangesFailed(code)),
        }
    }
    Ok(paths)
}

/// The subset of `paths` that still exists in the sandbox.
fn remote_existing_paths(
    channel: &mut dyn RemoteChannel,
    paths: &BTreeSet<String>,
) -> Result<BTreeSet<String>> {
    let quoted = shell_join(paths.iter().map(String::as_str));
    let command = format!(
        "for p in {quoted}; do if [ -e \"$p\" ] || [ -L \"$p\" ]; then printf '%s\\0' \"$p\"; fi; done"
    );
    let (code, stdout) = capture_stdout(channel, &command)?;
    if code != 0 {
        return Err(SyncError::ListChangesFailed(code));
    }
    Ok(split_nul(&stdout).collect())
}

fn extract_remote_archive(
    channel: &mut dyn RemoteChannel,
    root: &Path,
    paths: &BTreeSet<String>,
) -> Result<()> {
    let command = format!(
        "tar -cf - -- {}",
        shell_join(paths.iter().map(String::as_str))
    );

    let mut child = Command::new("tar")
        .arg("-xf")
        .arg("-")
        .arg("-C")
        .arg(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut stderr = String::new();
            let _ = pipe.read_to_string(&mut stderr);
            stderr
        })
    });

    let streamed = match child.stdin.take() {
        Some(mut stdin) => channel.exec_with_stdout(&command, &mut stdin),
        None => Err(io::Error::other("local tar has no stdin").into()),
    };

    let status = child.wait()?;
    let stderr = stderr_reader
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default();

    let extract_failed = || {
        SyncError::ExtractFailed(match stderr.trim() {
            "" => format!("tar exited with {}", status),
            msg => msg.to_string(),
        })
    };

    // A local tar that exits early breaks the stream; its error is the cause.
    match streamed {
        Err(_) if !status.success() => return Err(extract_failed()),
        Err(e) => return Err(e.into()),
        Ok(0) => {}
        Ok(code) => return Err(SyncError::ArchiveFailed(code)),
    }
    if !status.success() {
        return Err(extract_failed());
    }
    Ok(())
}

fn split_nul(bytes: &[u8]) -> impl Iterator<Item = String> + '_ {
    bytes
        .split(|b| *b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).to_string())
}
