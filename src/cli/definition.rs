//! Command-line definition

use clap::{Parser, Subcommand};

use super::exec::ExecArgs;
use super::list::ListArgs;
use super::reset::ResetArgs;
use super::start::StartArgs;
use super::stop::StopArgs;

#[derive(Parser)]
#[command(name = "sandcastle")]
#[command(about = "Run commands in a remote sandbox that mirrors your working tree")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a sandbox for this directory and branch, or attach to a run
    Start(StartArgs),

    /// Run a command in the sandbox, syncing files before and after
    Exec(ExecArgs),

    /// Stop sandboxes and forget their sessions
    Stop(StopArgs),

    /// List known sandbox sessions
    #[command(alias = "ls")]
    List(ListArgs),

    /// Replace the sandbox for this directory and branch with a fresh one
    Reset(ResetArgs),
}
