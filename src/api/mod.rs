//! Control-plane client
//!
//! The sandbox service owns run creation, run status and the connection
//! details of a running sandbox. Everything else in the crate talks to it
//! through [`ControlPlane`].

pub mod error;
pub mod http;
pub mod types;

pub use error::{ApiError, Result};
pub use http::HttpControlPlane;
pub use types::{ConnectionInfo, Polling, RunStarted, RunStatus, StartRunRequest};

use async_trait::async_trait;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Current connection details for a run. Not-yet-ready runs answer with
    /// `sandboxable = false` and polling hints.
    async fn connection_info(&self, run_id: &str) -> Result<ConnectionInfo>;

    async fn run_status(&self, run_id: &str) -> Result<RunStatus>;

    async fn start_run(&self, request: &StartRunRequest) -> Result<RunStarted>;
}
