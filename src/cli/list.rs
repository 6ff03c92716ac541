//! `sandcastle list` command implementation

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::Runtime;
use crate::sandbox::{SessionListing, SessionStatus};

const TABLE_COL_RUN: usize = 24;
const TABLE_COL_STATUS: usize = 8;
const TABLE_COL_BRANCH: usize = 20;
const TABLE_COL_CONFIG: usize = 28;

#[derive(Args)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct SessionJson {
    run_id: String,
    status: SessionStatus,
    cwd: String,
    branch: String,
    config_file: String,
}

impl From<&SessionListing> for SessionJson {
    fn from(listing: &SessionListing) -> Self {
        Self {
            run_id: listing.session.run_id.clone(),
            status: listing.status,
            cwd: listing.key.cwd.clone(),
            branch: listing.key.branch.clone(),
            config_file: listing.session.config_file.clone(),
        }
    }
}

fn print_table_header() {
    println!(
        "{:<width_run$} {:<width_status$} {:<width_branch$} {:<width_config$} DIRECTORY",
        "RUN",
        "STATUS",
        "BRANCH",
        "CONFIG",
        width_run = TABLE_COL_RUN,
        width_status = TABLE_COL_STATUS,
        width_branch = TABLE_COL_BRANCH,
        width_config = TABLE_COL_CONFIG
    );
    println!(
        "{}",
        "-".repeat(TABLE_COL_RUN + TABLE_COL_STATUS + TABLE_COL_BRANCH + TABLE_COL_CONFIG + 40)
    );
}

fn print_table_row(listing: &SessionListing) {
    println!(
        "{:<width_run$} {:<width_status$} {:<width_branch$} {:<width_config$} {}",
        super::truncate_id(&listing.session.run_id, TABLE_COL_RUN),
        listing.status,
        super::truncate(&listing.key.branch, TABLE_COL_BRANCH),
        super::truncate(&listing.session.config_file, TABLE_COL_CONFIG),
        listing.key.cwd,
        width_run = TABLE_COL_RUN,
        width_status = TABLE_COL_STATUS,
        width_branch = TABLE_COL_BRANCH,
        width_config = TABLE_COL_CONFIG
    );
}

pub async fn run(args: ListArgs) -> Result<()> {
    let mut runtime = Runtime::load()?;
    let listings = runtime.manager(false).list().await;

    if args.json {
        let sessions: Vec<SessionJson> = listings.iter().map(SessionJson::from).collect();
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if listings.is_empty() {
        println!("No sandbox sessions found.");
        return Ok(());
    }

    print_table_header();
    for listing in &listings {
        print_table_row(listing);
    }
    println!("\nTotal: {} sessions", listings.len());

    Ok(())
}
