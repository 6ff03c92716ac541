//! `sandcastle exec` command implementation

use anyhow::Result;
use clap::Args;

use super::Runtime;
use crate::sandbox::ExecOptions;

#[derive(Args)]
pub struct ExecArgs {
    /// Sandbox config file, relative to the current directory
    #[arg(long)]
    pub config: Option<String>,

    /// Run in this sandbox run instead of the current session
    #[arg(long)]
    pub id: Option<String>,

    /// Do not sync files before or after the command
    #[arg(long)]
    pub no_sync: bool,

    /// Also copy PATH back from the sandbox after the command (repeatable)
    #[arg(long, value_name = "PATH")]
    pub pull: Vec<String>,

    /// Command and arguments to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Exit code reported when the command is interrupted locally.
const INTERRUPTED: i32 = 130;

/// Returns the remote command's exit code.
pub async fn run(args: ExecArgs) -> Result<i32> {
    let mut runtime = Runtime::load()?;
    let mut manager = runtime.manager(true);
    let exec = manager.exec(ExecOptions {
        config_file: args.config,
        run_id: args.id,
        args: args.command,
        no_sync: args.no_sync,
        pull_paths: args.pull,
    });

    let Some(outcome) = super::until_interrupted(exec, tokio::signal::ctrl_c()).await else {
        eprintln!("Interrupted");
        return Ok(INTERRUPTED);
    };
    let outcome = outcome?;

    if outcome.auto_started {
        eprintln!("Started sandbox {}", outcome.run_id);
    }
    super::print_warnings(&outcome.warnings);
    Ok(outcome.exit_code)
}
