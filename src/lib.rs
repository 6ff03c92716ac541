//! sandcastle library - Sessions, sync and command execution for remote sandboxes

pub mod api;
pub mod cli;
pub mod config;
pub mod git;
pub mod remote;
pub mod sandbox;
pub mod sync;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
