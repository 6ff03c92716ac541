//! Sandbox sessions
//!
//! A session binds "this directory, this branch, this config file" to a
//! remote run so that repeated CLI invocations keep talking to the same
//! sandbox.

pub mod command;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod readiness;
pub mod storage;

pub use command::{execute, shell_join, shell_quote, STOP_COMMAND};
pub use error::{Result, SandboxError};
pub use key::{SessionKey, DETACHED_BRANCH};
pub use lifecycle::{
    ExecOptions, ExecOutcome, ResetOptions, ResetOutcome, SandboxContext, SandboxManager,
    SessionListing, SessionStatus, Settings, SignalOutcome, StartOptions, StartOutcome,
    StopOutcome, StopReport, StopTarget, Warning,
};
pub use readiness::{Readiness, ReadinessWaiter, Sleeper, TokioSleeper, DEFAULT_BACKOFF_MS};
pub use storage::{SandboxSession, SessionStore};
