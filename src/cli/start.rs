//! `sandcastle start` command implementation

use anyhow::Result;
use clap::Args;

use super::Runtime;
use crate::sandbox::{StartOptions, StartOutcome};

#[derive(Args)]
pub struct StartArgs {
    /// Sandbox config file, relative to the current directory
    #[arg(long)]
    pub config: Option<String>,

    /// Attach to an existing run instead of starting a new one
    #[arg(long)]
    pub id: Option<String>,

    /// Wait until the sandbox accepts connections
    #[arg(long)]
    pub wait: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: StartArgs) -> Result<()> {
    let mut runtime = Runtime::load()?;
    let outcome = runtime
        .manager(!args.json)
        .start(StartOptions {
            config_file: args.config,
            run_id: args.id,
            wait: args.wait,
        })
        .await?;

    super::print_warnings(&outcome.warnings);
    print_outcome(&outcome, args.json)
}

pub(crate) fn print_outcome(outcome: &StartOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    if outcome.reused {
        println!("✓ Attached to sandbox: {}", outcome.run_id);
    } else {
        println!("✓ Started sandbox: {}", outcome.run_id);
    }
    println!("  Config: {}", outcome.config_file);
    if let Some(url) = &outcome.run_url {
        println!("  URL:    {}", url);
    }
    if outcome.ready {
        println!("  Ready for `sandcastle exec`");
    }
    Ok(())
}
