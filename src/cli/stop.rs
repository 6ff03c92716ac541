//! `sandcastle stop` command implementation

use anyhow::Result;
use clap::Args;

use super::Runtime;
use crate::sandbox::{SignalOutcome, StopTarget};

#[derive(Args)]
pub struct StopArgs {
    /// Stop this run
    #[arg(long, conflicts_with = "all")]
    pub id: Option<String>,

    /// Stop every known sandbox
    #[arg(long)]
    pub all: bool,

    /// Only stop the session for this config file
    #[arg(long, conflicts_with_all = ["id", "all"])]
    pub config: Option<String>,
}

impl StopArgs {
    fn target(self) -> StopTarget {
        match (self.id, self.all) {
            (Some(run_id), _) => StopTarget::RunId(run_id),
            (None, true) => StopTarget::All,
            (None, false) => StopTarget::Current {
                config_file: self.config,
            },
        }
    }
}

pub async fn run(args: StopArgs) -> Result<()> {
    let mut runtime = Runtime::load()?;
    let outcome = runtime.manager(false).stop(args.target()).await?;

    if outcome.reports.is_empty() {
        println!("No sandboxes to stop.");
        return Ok(());
    }

    for report in &outcome.reports {
        match &report.signal {
            SignalOutcome::Delivered => println!("✓ Stopped sandbox: {}", report.run_id),
            SignalOutcome::NotReachable(_) => {
                println!("Sandbox is not running: {}", report.run_id)
            }
            SignalOutcome::Failed(_) => {}
        }
        if report.removed {
            println!("  Removed session");
        }
    }
    super::print_warnings(&outcome.warnings);

    Ok(())
}
