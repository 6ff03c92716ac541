//! `sandcastle reset` command implementation

use anyhow::Result;
use clap::Args;

use super::Runtime;
use crate::sandbox::ResetOptions;

#[derive(Args)]
pub struct ResetArgs {
    /// Sandbox config file whose session is replaced
    #[arg(long)]
    pub config: Option<String>,

    /// Wait until the new sandbox accepts connections
    #[arg(long)]
    pub wait: bool,

    /// Output the new sandbox as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ResetArgs) -> Result<()> {
    let mut runtime = Runtime::load()?;
    let outcome = runtime
        .manager(!args.json)
        .reset(ResetOptions {
            config_file: args.config,
            wait: args.wait,
        })
        .await?;

    if !args.json {
        for report in &outcome.stopped {
            println!("✓ Stopped sandbox: {}", report.run_id);
        }
    }
    super::print_warnings(&outcome.warnings);
    super::print_warnings(&outcome.started.warnings);
    super::start::print_outcome(&outcome.started, args.json)
}
