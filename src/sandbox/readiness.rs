//! Waiting for a sandbox to accept connections
//!
//! A run moves through `Starting` until the control plane reports it
//! sandboxable (`Ready`) or finished (`Ended`). Polling has no deadline of its
//! own; the process lifetime bounds it.

use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::error::{Result, SandboxError};
use crate::api::{ConnectionInfo, ControlPlane};

pub const DEFAULT_BACKOFF_MS: u64 = 2000;

const SPINNER_FRAMES: &[char] = &['◐', '◓', '◑', '◒'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Starting { backoff: Duration },
    Ready(ConnectionInfo),
    Ended,
}

impl Readiness {
    /// Classify one connection-info response. A sandboxable run is ready even
    /// if it also reports completion.
    pub fn observe(info: ConnectionInfo, default_backoff: Duration) -> Self {
        if info.sandboxable {
            Readiness::Ready(info)
        } else if info.polling.completed {
            Readiness::Ended
        } else {
            let backoff = info
                .polling
                .backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(default_backoff);
            Readiness::Starting { backoff }
        }
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct ReadinessWaiter<'a> {
    api: &'a dyn ControlPlane,
    sleeper: &'a dyn Sleeper,
    default_backoff: Duration,
    progress: bool,
}

impl<'a> ReadinessWaiter<'a> {
    pub fn new(api: &'a dyn ControlPlane, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            api,
            sleeper,
            default_backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            progress: false,
        }
    }

    pub fn default_backoff(mut self, backoff: Duration) -> Self {
        self.default_backoff = backoff;
        self
    }

    /// Show a spinner on stderr while polling. Ignored when stderr is not a
    /// terminal.
    pub fn progress(mut self, enabled: bool) -> Self {
        self.progress = enabled && io::stderr().is_terminal();
        self
    }

    pub async fn wait(&self, run_id: &str) -> Result<ConnectionInfo> {
        let mut spinner = Spinner::new(self.progress);
        loop {
            let info = self.api.connection_info(run_id).await?;
            match Readiness::observe(info, self.default_backoff) {
                Readiness::Ready(info) => {
                    debug!("Sandbox {} is ready at {}", run_id, info.address);
                    return Ok(info);
                }
                Readiness::Ended => {
                    return Err(SandboxError::EndedBeforeReady(run_id.to_string()));
                }
                Readiness::Starting { backoff } => {
                    debug!("Sandbox {} is starting, polling again in {:?}", run_id, backoff);
                    spinner.tick(run_id);
                    self.sleeper.sleep(backoff).await;
                }
            }
        }
    }
}

struct Spinner {
    enabled: bool,
    frame: usize,
}

impl Spinner {
    fn new(enabled: bool) -> Self {
        Self { enabled, frame: 0 }
    }

    fn tick(&mut self, run_id: &str) {
        if !self.enabled {
            return;
        }
        let mut stderr = io::stderr();
        let _ = write!(
            stderr,
            "\r  {} Waiting for sandbox {} to start...",
            SPINNER_FRAMES[self.frame % SPINNER_FRAMES.len()],
            run_id
        );
        let _ = stderr.flush();
        self.frame += 1;
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if self.enabled && self.frame > 0 {
            let mut stderr = io::stderr();
            let _ = write!(stderr, "\r\x1b[2K");
            let _ = stderr.flush();
        }
    }
}
