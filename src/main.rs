//! sandcastle - Run commands in a remote sandbox that mirrors your working tree

use anyhow::Result;
use clap::Parser;
use sandcastle::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("SANDCASTLE_DEBUG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter("sandcastle=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => cli::start::run(args).await,
        Commands::Exec(args) => {
            let code = cli::exec::run(args).await?;
            std::process::exit(code);
        }
        Commands::Stop(args) => cli::stop::run(args).await,
        Commands::List(args) => cli::list::run(args).await,
        Commands::Reset(args) => cli::reset::run(args).await,
    }
}
