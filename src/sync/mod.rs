//! File sync between the local working tree and a sandbox
//!
//! Push runs before a command: the sandbox checkout is reset to the commit it
//! was created from and the local patch is applied on top, so repeated pushes
//! never stack. Pull runs after the command and copies every path either side
//! changed back over the local tree.

pub mod error;
pub mod pull;
pub mod push;

pub use error::{Result, SyncError};
pub use pull::{pull, reconcile_paths, PullOutcome};
pub use push::{push, PushOutcome};

/// Environment variable through which the sandbox exposes its base commit.
pub const BASE_COMMIT_ENV: &str = "SANDCASTLE_BASE_COMMIT";

/// Shell exit code for "command not found".
pub(crate) const COMMAND_NOT_FOUND: i32 = 127;
