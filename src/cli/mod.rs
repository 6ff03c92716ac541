//! CLI command implementations

pub mod definition;
pub mod exec;
pub mod list;
pub mod reset;
pub mod start;
pub mod stop;

pub use definition::{Cli, Commands};

use std::future::Future;
use std::io;

use anyhow::Result;
use tracing::debug;

use crate::api::HttpControlPlane;
use crate::config::Config;
use crate::git::{GitRepository, VersionControl};
use crate::remote::SshConnector;
use crate::sandbox::{SandboxContext, SandboxManager, SessionStore, Settings, Warning};

/// Everything a sandbox subcommand needs, loaded once per invocation.
pub struct Runtime {
    pub config: Config,
    pub store: SessionStore,
    pub api: HttpControlPlane,
    pub connector: SshConnector,
    pub repo: Option<GitRepository>,
    pub context: SandboxContext,
}

impl Runtime {
    pub fn load() -> Result<Self> {
        let config = Config::load()?;
        let store = SessionStore::load()?;
        let api = HttpControlPlane::new(&config.api)?;
        let connector = SshConnector::new(&config.sandbox.ssh_user);

        let cwd = std::env::current_dir()?;
        let repo = match GitRepository::discover(&cwd) {
            Ok(repo) => Some(repo),
            Err(e) => {
                debug!("No git repository: {}", e);
                None
            }
        };
        let context = SandboxContext::detect(&cwd, repo.as_ref().map(|r| r as &dyn VersionControl))?;

        Ok(Self {
            config,
            store,
            api,
            connector,
            repo,
            context,
        })
    }

    /// A manager over this invocation's state. `progress` enables the
    /// readiness spinner.
    pub fn manager(&mut self, progress: bool) -> SandboxManager<'_> {
        let settings = Settings {
            progress,
            ..Settings::from_config(&self.config.sandbox)
        };
        let manager = SandboxManager::new(
            &self.api,
            &self.connector,
            &mut self.store,
            self.context.clone(),
        )
        .with_settings(settings);

        match &self.repo {
            Some(repo) => manager.with_repo(repo),
            None => manager,
        }
    }
}

/// Drives `operation` until it finishes or `interrupt` fires. On interrupt
/// the operation is dropped, which closes any sandbox connection it holds
/// and removes its key material. Returns `None` when interrupted.
///
/// Waiting on the interrupt also stops the signal from killing the process,
/// so remote child processes are reaped and cleanup still runs.
pub async fn until_interrupted<T>(
    operation: impl Future<Output = T>,
    interrupt: impl Future<Output = io::Result<()>>,
) -> Option<T> {
    tokio::pin!(operation);
    tokio::select! {
        result = &mut operation => Some(result),
        signal = interrupt => match signal {
            Ok(()) => None,
            Err(e) => {
                debug!("Unable to listen for interrupts: {}", e);
                Some(operation.await)
            }
        },
    }
}

pub fn print_warnings(warnings: &[Warning]) {
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max <= 3 {
        s.chars().take(max).collect()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    }
}

pub fn truncate_id(id: &str, max_len: usize) -> &str {
    match id.char_indices().nth(max_len) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
