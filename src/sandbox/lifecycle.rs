//! Sandbox lifecycle: start, exec, stop, list and reset
//!
//! Each operation loads nothing itself; the caller hands in a loaded
//! [`SessionStore`] and the manager saves it at the points where a session is
//! created or removed. Failures to save are reported as warnings so the
//! operation the user asked for still completes.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::command::{self, STOP_COMMAND};
use super::error::{Result, SandboxError};
use super::key::{normalize_branch, SessionKey};
use super::readiness::{ReadinessWaiter, Sleeper, TokioSleeper};
use super::storage::{SandboxSession, SessionStore};
use crate::api::{ApiError, ControlPlane, RunStarted, RunStatus, StartRunRequest};
use crate::config::SandboxConfig;
use crate::git::VersionControl;
use crate::remote::{Connector, RemoteChannel};
use crate::sync::{self, PullOutcome, PushOutcome};

static TOKIO_SLEEPER: TokioSleeper = TokioSleeper;

/// Where the CLI was invoked: the directory and branch half of a session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxContext {
    pub cwd: String,
    pub branch: String,
}

impl SandboxContext {
    pub fn new(cwd: &str, branch: Option<&str>) -> Self {
        Self {
            cwd: cwd.to_string(),
            branch: normalize_branch(branch.unwrap_or_default()).to_string(),
        }
    }

    pub fn detect(cwd: &Path, repo: Option<&dyn VersionControl>) -> Result<Self> {
        let branch = match repo {
            Some(repo) => repo.current_branch()?,
            None => None,
        };
        Ok(Self::new(&cwd.to_string_lossy(), branch.as_deref()))
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub default_config_file: String,
    pub sync: bool,
    pub default_backoff: Duration,
    /// Show a spinner while waiting for readiness.
    pub progress: bool,
}

impl Settings {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            default_config_file: config.default_config_file.clone(),
            sync: config.sync,
            default_backoff: Duration::from_millis(config.default_backoff_ms),
            progress: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub config_file: Option<String>,
    /// Attach to this run instead of creating one.
    pub run_id: Option<String>,
    pub wait: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub config_file: Option<String>,
    pub run_id: Option<String>,
    pub args: Vec<String>,
    pub no_sync: bool,
    /// Extra paths to copy back after the command, on top of changed files.
    pub pull_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopTarget {
    RunId(String),
    All,
    /// Sessions for the current directory and branch; only the given config
    /// file's slot when one is named.
    Current { config_file: Option<String> },
}

#[derive(Debug, Clone, Default)]
pub struct ResetOptions {
    pub config_file: Option<String>,
    pub wait: bool,
}

/// A problem that did not stop the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    LfsChangesSkipped(Vec<String>),
    SyncUnavailable(String),
    PullFailed(String),
    StoreNotSaved(String),
    StopSignalFailed { run_id: String, reason: String },
    CloseFailed(String),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::LfsChangesSkipped(files) => write!(
                f,
                "LFS files changed locally ({}); files were not synced to the sandbox",
                files.join(", ")
            ),
            Warning::SyncUnavailable(reason) => write!(f, "files were not synced: {}", reason),
            Warning::PullFailed(reason) => {
                write!(f, "unable to copy changes back from the sandbox: {}", reason)
            }
            Warning::StoreNotSaved(reason) => {
                write!(f, "sandbox session could not be saved: {}", reason)
            }
            Warning::StopSignalFailed { run_id, reason } => {
                write!(f, "unable to signal sandbox {} to stop: {}", run_id, reason)
            }
            Warning::CloseFailed(reason) => {
                write!(f, "sandbox connection did not close cleanly: {}", reason)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub run_id: String,
    pub config_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_url: Option<String>,
    /// An existing session was reattached rather than a run created.
    pub reused: bool,
    /// Readiness was awaited and reached.
    pub ready: bool,
    #[serde(skip)]
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub run_id: String,
    pub exit_code: i32,
    pub auto_started: bool,
    pub push: Option<PushOutcome>,
    pub pull: Option<PullOutcome>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The sandbox could not be reached, usually because it already ended.
    NotReachable(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct StopReport {
    pub run_id: String,
    /// Store slot the session occupied, if it was stored.
    pub key: Option<SessionKey>,
    pub signal: SignalOutcome,
    pub removed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StopOutcome {
    pub reports: Vec<StopReport>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
    Unknown,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Expired => write!(f, "expired"),
            SessionStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionListing {
    pub key: SessionKey,
    pub session: SandboxSession,
    pub status: SessionStatus,
}

#[derive(Debug, Clone)]
pub struct ResetOutcome {
    pub stopped: Vec<StopReport>,
    pub started: StartOutcome,
    pub warnings: Vec<Warning>,
}

/// Status-probe classification used by `list`.
pub fn classify(probe: &std::result::Result<RunStatus, ApiError>) -> SessionStatus {
    match probe {
        Ok(status) if status.completed => SessionStatus::Expired,
        Ok(_) => SessionStatus::Active,
        Err(_) => SessionStatus::Unknown,
    }
}

/// A stored session that can never be attached to again.
fn is_stale(probe: &std::result::Result<RunStatus, ApiError>) -> bool {
    match probe {
        Ok(status) => status.completed,
        Err(ApiError::RunNotFound(_)) => true,
        Err(_) => false,
    }
}

struct RemoteRun {
    exit_code: i32,
    push: Option<PushOutcome>,
    pull: Option<PullOutcome>,
}

pub struct SandboxManager<'a> {
    api: &'a dyn ControlPlane,
    connector: &'a dyn Connector,
    sleeper: &'a dyn Sleeper,
    repo: Option<&'a dyn VersionControl>,
    store: &'a mut SessionStore,
    settings: Settings,
    context: SandboxContext,
}

impl<'a> SandboxManager<'a> {
    pub fn new(
        api: &'a dyn ControlPlane,
        connector: &'a dyn Connector,
        store: &'a mut SessionStore,
        context: SandboxContext,
    ) -> Self {
        Self {
            api,
            connector,
            sleeper: &TOKIO_SLEEPER,
            repo: None,
            store,
            settings: Settings::default(),
            context,
        }
    }

    pub fn with_repo(mut self, repo: &'a dyn VersionControl) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn context(&self) -> &SandboxContext {
        &self.context
    }

    fn config_file(&self, explicit: Option<&str>) -> String {
        explicit
            .unwrap_or(&self.settings.default_config_file)
            .to_string()
    }

    fn waiter(&self) -> ReadinessWaiter<'_> {
        ReadinessWaiter::new(self.api, self.sleeper)
            .default_backoff(self.settings.default_backoff)
            .progress(self.settings.progress)
    }

    fn save(&self, warnings: &mut Vec<Warning>) {
        if let Err(e) = self.store.save() {
            warn!("Failed to save sandbox sessions: {:#}", e);
            warnings.push(Warning::StoreNotSaved(format!("{:#}", e)));
        }
    }

    fn remember(&mut self, config_file: &str, run_id: &str, warnings: &mut Vec<Warning>) {
        self.store.set(
            &self.context.cwd,
            &self.context.branch,
            config_file,
            SandboxSession::new(run_id, config_file),
        );
        self.save(warnings);
    }

    fn forget(&mut self, key: &SessionKey) -> bool {
        self.store
            .delete(&key.cwd, &key.branch, &key.config_file)
            .is_some()
    }

    /// Create a new run for `config_file`, read relative to the current
    /// directory.
    async fn start_run(&self, config_file: &str) -> Result<RunStarted> {
        let path = Path::new(&self.context.cwd).join(config_file);
        let config_contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SandboxError::ConfigFileMissing(config_file.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let commit_sha = match self.repo {
            Some(repo) => repo.head_commit()?,
            None => None,
        };

        let request = StartRunRequest {
            config_file: config_file.to_string(),
            config_contents,
            branch: self.context.branch.clone(),
            commit_sha,
        };
        let started = self.api.start_run(&request).await?;
        info!("Started sandbox run {} for {}", started.run_id, config_file);
        Ok(started)
    }

    pub async fn start(&mut self, options: StartOptions) -> Result<StartOutcome> {
        let mut warnings = Vec::new();

        if let Some(run_id) = options.run_id {
            let status = self.api.run_status(&run_id).await?;
            if status.completed {
                return Err(SandboxError::RunCompleted(run_id));
            }
            let config_file = match options.config_file {
                Some(config_file) => config_file,
                None => status
                    .config_file
                    .unwrap_or_else(|| self.settings.default_config_file.clone()),
            };
            self.remember(&config_file, &run_id, &mut warnings);
            let ready = self.wait_if(options.wait, &run_id).await?;
            return Ok(StartOutcome {
                run_id,
                config_file,
                run_url: None,
                reused: true,
                ready,
                warnings,
            });
        }

        let config_file = self.config_file(options.config_file.as_deref());
        let existing = self
            .store
            .get(&self.context.cwd, &self.context.branch, &config_file)
            .cloned();
        if let Some(session) = existing {
            let probe = self.api.run_status(&session.run_id).await;
            if !is_stale(&probe) {
                debug!("Reusing sandbox {} for {}", session.run_id, config_file);
                let ready = self.wait_if(options.wait, &session.run_id).await?;
                return Ok(StartOutcome {
                    run_id: session.run_id,
                    config_file,
                    run_url: None,
                    reused: true,
                    ready,
                    warnings,
                });
            }
            info!("Dropping expired sandbox session {}", session.run_id);
            let key = SessionKey::new(&self.context.cwd, &self.context.branch, &config_file);
            self.forget(&key);
        }

        let started = self.start_run(&config_file).await?;
        // Persist before waiting so an interrupted wait still leaves a
        // session `exec` and `stop` can find.
        self.remember(&config_file, &started.run_id, &mut warnings);
        let ready = self.wait_if(options.wait, &started.run_id).await?;

        Ok(StartOutcome {
            run_id: started.run_id,
            config_file,
            run_url: started.run_url,
            reused: false,
            ready,
            warnings,
        })
    }

    async fn wait_if(&self, wait: bool, run_id: &str) -> Result<bool> {
        if !wait {
            return Ok(false);
        }
        self.waiter().wait(run_id).await?;
        Ok(true)
    }

    /// Pick the run `exec` targets, starting one if nothing fits. Returns the
    /// run id and whether it was started here.
    async fn select_for_exec(
        &mut self,
        options: &ExecOptions,
        warnings: &mut Vec<Warning>,
    ) -> Result<(String, bool)> {
        if let Some(run_id) = &options.run_id {
            return Ok((run_id.clone(), false));
        }

        let candidates = match options.config_file.as_deref() {
            Some(config_file) => self
                .store
                .get(&self.context.cwd, &self.context.branch, config_file)
                .map(|session| {
                    let key =
                        SessionKey::new(&self.context.cwd, &self.context.branch, config_file);
                    vec![(key, session.clone())]
                })
                .unwrap_or_default(),
            None => self
                .store
                .get_all_for_cwd_branch(&self.context.cwd, &self.context.branch),
        };

        let mut active = Vec::new();
        let mut pruned = false;
        for (key, session) in candidates {
            let probe = self.api.run_status(&session.run_id).await;
            if is_stale(&probe) {
                info!("Removing expired sandbox session {}", session.run_id);
                pruned |= self.forget(&key);
            } else {
                active.push(session.run_id);
            }
        }
        if pruned {
            self.save(warnings);
        }

        match active.len() {
            0 => {}
            1 => return Ok((active.remove(0), false)),
            _ => {
                return Err(SandboxError::AmbiguousSession {
                    cwd: self.context.cwd.clone(),
                    branch: self.context.branch.clone(),
                    run_ids: active,
                })
            }
        }

        let config_file = self.config_file(options.config_file.as_deref());
        let started = self.start_run(&config_file).await?;
        self.remember(&config_file, &started.run_id, warnings);
        Ok((started.run_id, true))
    }

    pub async fn exec(&mut self, options: ExecOptions) -> Result<ExecOutcome> {
        if options.args.is_empty() {
            return Err(SandboxError::NoCommand);
        }

        let mut warnings = Vec::new();
        let (run_id, auto_started) = self.select_for_exec(&options, &mut warnings).await?;
        let info = self.waiter().wait(&run_id).await?;

        let mut channel = self.connector.connect(&info)?;
        let result = self.run_in_sandbox(channel.as_mut(), &options, &mut warnings);
        if let Err(e) = channel.close() {
            warn!("Failed to close sandbox connection: {}", e);
            warnings.push(Warning::CloseFailed(e.to_string()));
        }
        let run = result?;

        Ok(ExecOutcome {
            run_id,
            exit_code: run.exit_code,
            auto_started,
            push: run.push,
            pull: run.pull,
            warnings,
        })
    }

    fn run_in_sandbox(
        &self,
        channel: &mut dyn RemoteChannel,
        options: &ExecOptions,
        warnings: &mut Vec<Warning>,
    ) -> Result<RemoteRun> {
        let sync_repo = if !self.settings.sync || options.no_sync {
            None
        } else if self.repo.is_none() {
            warnings.push(Warning::SyncUnavailable(
                "not inside a git repository".to_string(),
            ));
            None
        } else {
            self.repo
        };

        let mut push = None;
        let mut pull_repo = None;
        if let Some(repo) = sync_repo {
            let outcome = sync::push(channel, repo)?;
            match &outcome {
                PushOutcome::SkippedLfs(files) => {
                    warnings.push(Warning::LfsChangesSkipped(files.clone()));
                }
                PushOutcome::Applied { .. } | PushOutcome::Reset => pull_repo = Some(repo),
            }
            push = Some(outcome);
        }

        let exit_code = command::execute(channel, &options.args)?;
        debug!("Sandbox command exited with {}", exit_code);

        let pull = match pull_repo {
            Some(repo) => match sync::pull(channel, repo, &options.pull_paths) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!("Pull from sandbox failed: {}", e);
                    warnings.push(Warning::PullFailed(e.to_string()));
                    None
                }
            },
            None => None,
        };

        Ok(RemoteRun {
            exit_code,
            push,
            pull,
        })
    }

    /// Ask the sandbox to shut down. Never fails; the outcome says how far
    /// it got.
    async fn signal_stop(&self, run_id: &str) -> SignalOutcome {
        let info = match self.api.connection_info(run_id).await {
            Ok(info) => info,
            Err(e) => return SignalOutcome::NotReachable(e.to_string()),
        };
        if !info.sandboxable {
            return SignalOutcome::NotReachable("sandbox is not running".to_string());
        }

        let mut channel = match self.connector.connect(&info) {
            Ok(channel) => channel,
            Err(e) => return SignalOutcome::NotReachable(e.to_string()),
        };
        let outcome = match channel.exec_with_stdout(STOP_COMMAND, &mut io::sink()) {
            Ok(_) => SignalOutcome::Delivered,
            Err(e) => SignalOutcome::Failed(e.to_string()),
        };
        if let Err(e) = channel.close() {
            debug!("Closing stop connection for {} failed: {}", run_id, e);
        }
        outcome
    }

    pub async fn stop(&mut self, target: StopTarget) -> Result<StopOutcome> {
        let targets: Vec<(Option<SessionKey>, String)> = match &target {
            StopTarget::RunId(run_id) => match self.store.find_by_run_id(run_id) {
                Some((key, session)) => vec![(Some(key), session.run_id)],
                None => vec![(None, run_id.clone())],
            },
            StopTarget::All => self
                .store
                .entries()
                .into_iter()
                .map(|(key, session)| (Some(key), session.run_id))
                .collect(),
            StopTarget::Current {
                config_file: Some(config_file),
            } => self
                .store
                .get(&self.context.cwd, &self.context.branch, config_file)
                .map(|session| {
                    let key =
                        SessionKey::new(&self.context.cwd, &self.context.branch, config_file);
                    vec![(Some(key), session.run_id.clone())]
                })
                .unwrap_or_default(),
            StopTarget::Current { config_file: None } => self
                .store
                .get_all_for_cwd_branch(&self.context.cwd, &self.context.branch)
                .into_iter()
                .map(|(key, session)| (Some(key), session.run_id))
                .collect(),
        };

        let mut outcome = StopOutcome::default();
        for (key, run_id) in targets {
            let signal = self.signal_stop(&run_id).await;
            match &signal {
                SignalOutcome::Delivered => info!("Signalled sandbox {} to stop", run_id),
                SignalOutcome::NotReachable(reason) => {
                    debug!("Sandbox {} not reachable for stop: {}", run_id, reason)
                }
                SignalOutcome::Failed(reason) => {
                    warn!("Failed to signal sandbox {} to stop: {}", run_id, reason);
                    outcome.warnings.push(Warning::StopSignalFailed {
                        run_id: run_id.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            let removed = key.as_ref().is_some_and(|key| self.forget(key));
            outcome.reports.push(StopReport {
                run_id,
                key,
                signal,
                removed,
            });
        }

        if outcome.reports.iter().any(|r| r.removed) {
            self.save(&mut outcome.warnings);
        }
        Ok(outcome)
    }

    /// Every stored session with its probed status.
    pub async fn list(&self) -> Vec<SessionListing> {
        let mut listings = Vec::new();
        for (key, session) in self.store.entries() {
            let probe = self.api.run_status(&session.run_id).await;
            if let Err(e) = &probe {
                debug!("Status probe for {} failed: {}", session.run_id, e);
            }
            listings.push(SessionListing {
                key,
                status: classify(&probe),
                session,
            });
        }
        listings
    }

    /// Stop the session in the config file's slot, then start a fresh one
    /// in the same slot.
    pub async fn reset(&mut self, options: ResetOptions) -> Result<ResetOutcome> {
        let config_file = self.config_file(options.config_file.as_deref());
        let stopped = self
            .stop(StopTarget::Current {
                config_file: Some(config_file.clone()),
            })
            .await?;
        let started = self
            .start(StartOptions {
                config_file: Some(config_file),
                run_id: None,
                wait: options.wait,
            })
            .await?;

        Ok(ResetOutcome {
            stopped: stopped.reports,
            started,
            warnings: stopped.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ConnectionInfo;
    use crate::testing::{FakeConnector, FakeControlPlane, FakeRepo, RecordingSleeper};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        api: FakeControlPlane,
        remote: FakeConnector,
        sleeper: RecordingSleeper,
        repo: FakeRepo,
        store: SessionStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join(".sandcastle")).unwrap();
            std::fs::write(dir.path().join(".sandcastle/sandbox.yml"), "image: rust\n").unwrap();
            let store = SessionStore::load_from(dir.path().join("state/sandboxes.json")).unwrap();
            let repo = FakeRepo {
                root: dir.path().to_path_buf(),
                ..FakeRepo::default()
            };
            Self {
                dir,
                api: FakeControlPlane::new(),
                remote: FakeConnector::new(),
                sleeper: RecordingSleeper::default(),
                repo,
                store,
            }
        }

        fn cwd(&self) -> String {
            self.dir.path().to_string_lossy().to_string()
        }

        /// Point the store at a path whose parent is a regular file.
        fn make_store_unwritable(&mut self) {
            let blocker = self.dir.path().join("blocker");
            std::fs::write(&blocker, "not a directory\n").unwrap();
            self.store = SessionStore::load_from(blocker.join("sandboxes.json")).unwrap();
        }

        fn manager(&mut self) -> SandboxManager<'_> {
            let context = SandboxContext::new(&self.cwd(), Some("main"));
            let settings = Settings {
                sync: false,
                ..Settings::default()
            };
            SandboxManager::new(&self.api, &self.remote, &mut self.store, context)
                .with_sleeper(&self.sleeper)
                .with_settings(settings)
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_context_normalizes_missing_branch() {
        let ctx = SandboxContext::new("/src/app", None);
        assert_eq!(ctx.branch, "detached");
        let ctx = SandboxContext::new("/src/app", Some(""));
        assert_eq!(ctx.branch, "detached");
    }

    #[test]
    fn test_classify() {
        let active = RunStatus {
            run_id: "r".to_string(),
            ..RunStatus::default()
        };
        let done = RunStatus {
            completed: true,
            ..active.clone()
        };
        assert_eq!(classify(&Ok(active)), SessionStatus::Active);
        assert_eq!(classify(&Ok(done)), SessionStatus::Expired);
        assert_eq!(
            classify(&Err(ApiError::RunNotFound("r".to_string()))),
            SessionStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_start_persists_session_before_wait_fails() {
        let mut fx = Fixture::new();
        let cwd = fx.cwd();
        fx.api.end_new_runs();

        let err = fx
            .manager()
            .start(StartOptions {
                wait: true,
                ..StartOptions::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::EndedBeforeReady(_)));
        let session = fx.store.get(&cwd, "main", ".sandcastle/sandbox.yml").unwrap();
        assert_eq!(session.run_id, "run-1");
    }

    #[tokio::test]
    async fn test_start_with_completed_run_id_is_rejected() {
        let mut fx = Fixture::new();
        fx.api.complete_run("old-run");

        let err = fx
            .manager()
            .start(StartOptions {
                run_id: Some("old-run".to_string()),
                ..StartOptions::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::RunCompleted(_)));
        assert!(err.to_string().contains("Start a new sandbox"));
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_start_reuses_active_session() {
        let mut fx = Fixture::new();
        let first = fx.manager().start(StartOptions::default()).await.unwrap();
        let second = fx.manager().start(StartOptions::default()).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.run_id, second.run_id);
        assert_eq!(fx.api.started_runs().len(), 1);
    }

    #[tokio::test]
    async fn test_start_replaces_expired_session() {
        let mut fx = Fixture::new();
        let first = fx.manager().start(StartOptions::default()).await.unwrap();
        fx.api.complete_run(&first.run_id);

        let second = fx.manager().start(StartOptions::default()).await.unwrap();

        assert!(!second.reused);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(fx.store.len(), 1);
    }

    #[tokio::test]
    async fn test_start_missing_config_file() {
        let mut fx = Fixture::new();
        let err = fx
            .manager()
            .start(StartOptions {
                config_file: Some("nope.yml".to_string()),
                ..StartOptions::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::ConfigFileMissing(ref f) if f == "nope.yml"));
    }

    #[tokio::test]
    async fn test_start_sends_config_and_branch() {
        let mut fx = Fixture::new();
        let cwd = fx.cwd();
        let repo = fx.repo.clone();
        {
            let context = SandboxContext::new(&cwd, Some("feature/x"));
            let mut manager =
                SandboxManager::new(&fx.api, &fx.remote, &mut fx.store, context)
                    .with_sleeper(&fx.sleeper)
                    .with_repo(&repo);
            manager.start(StartOptions::default()).await.unwrap();
        }

        let runs = fx.api.started_runs();
        let request = &runs[0];
        assert_eq!(request.config_file, ".sandcastle/sandbox.yml");
        assert_eq!(request.config_contents, "image: rust\n");
        assert_eq!(request.branch, "feature/x");
        assert_eq!(request.commit_sha, repo.head);
    }

    #[tokio::test]
    async fn test_exec_auto_starts_and_returns_exit_code() {
        let mut fx = Fixture::new();
        fx.remote.respond("exit 7", 7, "");

        let outcome = fx
            .manager()
            .exec(ExecOptions {
                args: args(&["sh", "-c", "exit 7"]),
                ..ExecOptions::default()
            })
            .await
            .unwrap();

        assert!(outcome.auto_started);
        assert_eq!(outcome.exit_code, 7);
        assert_eq!(fx.remote.closes(), 1);
        assert_eq!(fx.store.len(), 1);
    }

    #[tokio::test]
    async fn test_exec_without_command() {
        let mut fx = Fixture::new();
        let err = fx.manager().exec(ExecOptions::default()).await.unwrap_err();
        assert!(matches!(err, SandboxError::NoCommand));
        assert!(fx.api.started_runs().is_empty());
    }

    #[tokio::test]
    async fn test_exec_prefers_explicit_run_id() {
        let mut fx = Fixture::new();
        fx.manager().start(StartOptions::default()).await.unwrap();
        fx.api.add_ready_run("other");

        let outcome = fx
            .manager()
            .exec(ExecOptions {
                run_id: Some("other".to_string()),
                args: args(&["true"]),
                ..ExecOptions::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.run_id, "other");
        assert_eq!(fx.remote.connects(), vec!["other.sandbox.test:22"]);
    }

    #[tokio::test]
    async fn test_exec_ambiguous_sessions() {
        let mut fx = Fixture::new();
        let cwd = fx.cwd();
        fx.api.add_ready_run("a");
        fx.api.add_ready_run("b");
        fx.store
            .set(&cwd, "main", "one.yml", SandboxSession::new("a", "one.yml"));
        fx.store
            .set(&cwd, "main", "two.yml", SandboxSession::new("b", "two.yml"));

        let err = fx
            .manager()
            .exec(ExecOptions {
                args: args(&["true"]),
                ..ExecOptions::default()
            })
            .await
            .unwrap_err();

        match err {
            SandboxError::AmbiguousSession { run_ids, .. } => assert_eq!(run_ids, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.remote.connects().is_empty());
    }

    #[tokio::test]
    async fn test_exec_prunes_expired_and_uses_remaining() {
        let mut fx = Fixture::new();
        let cwd = fx.cwd();
        fx.api.add_ready_run("live");
        fx.api.complete_run("dead");
        fx.store
            .set(&cwd, "main", "one.yml", SandboxSession::new("dead", "one.yml"));
        fx.store
            .set(&cwd, "main", "two.yml", SandboxSession::new("live", "two.yml"));

        let outcome = fx
            .manager()
            .exec(ExecOptions {
                args: args(&["true"]),
                ..ExecOptions::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.run_id, "live");
        assert!(!outcome.auto_started);
        assert!(fx.store.get(&cwd, "main", "one.yml").is_none());
    }

    #[tokio::test]
    async fn test_start_save_failure_is_a_warning() {
        let mut fx = Fixture::new();
        let cwd = fx.cwd();
        fx.make_store_unwritable();

        let outcome = fx.manager().start(StartOptions::default()).await.unwrap();

        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::StoreNotSaved(_)]
        ));
        assert_eq!(fx.api.started_runs().len(), 1);
        let session = fx.store.get(&cwd, "main", ".sandcastle/sandbox.yml").unwrap();
        assert_eq!(session.run_id, outcome.run_id);
    }

    #[tokio::test]
    async fn test_exec_prune_save_failure_is_a_warning() {
        let mut fx = Fixture::new();
        let cwd = fx.cwd();
        fx.make_store_unwritable();
        fx.api.add_ready_run("live");
        fx.api.complete_run("dead");
        fx.store
            .set(&cwd, "main", "one.yml", SandboxSession::new("dead", "one.yml"));
        fx.store
            .set(&cwd, "main", "two.yml", SandboxSession::new("live", "two.yml"));

        let outcome = fx
            .manager()
            .exec(ExecOptions {
                args: args(&["true"]),
                ..ExecOptions::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.run_id, "live");
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::StoreNotSaved(_))));
        assert!(fx.store.get(&cwd, "main", "one.yml").is_none());
    }

    #[tokio::test]
    async fn test_exec_closes_channel_when_push_fails() {
        let mut fx = Fixture::new();
        fx.remote.respond(sync::BASE_COMMIT_ENV, 0, "");
        let repo = fx.repo.clone();
        let cwd = fx.cwd();

        let err = {
            let context = SandboxContext::new(&cwd, Some("main"));
            let mut manager = SandboxManager::new(&fx.api, &fx.remote, &mut fx.store, context)
                .with_sleeper(&fx.sleeper)
                .with_repo(&repo);
            manager
                .exec(ExecOptions {
                    args: args(&["make"]),
                    ..ExecOptions::default()
                })
                .await
                .unwrap_err()
        };

        assert!(matches!(err, SandboxError::Sync(_)));
        assert_eq!(fx.remote.closes(), 1);
        assert!(!fx.remote.commands().iter().any(|c| c == "make"));
    }

    #[tokio::test]
    async fn test_exec_pull_failure_is_a_warning() {
        let mut fx = Fixture::new();
        fx.remote.respond(sync::BASE_COMMIT_ENV, 0, "abc");
        fx.remote.respond("git diff --name-only", 128, "");
        fx.remote.respond("cargo test", 3, "");
        let repo = fx.repo.clone();
        let cwd = fx.cwd();

        let outcome = {
            let context = SandboxContext::new(&cwd, Some("main"));
            let mut manager = SandboxManager::new(&fx.api, &fx.remote, &mut fx.store, context)
                .with_sleeper(&fx.sleeper)
                .with_repo(&repo);
            manager
                .exec(ExecOptions {
                    args: args(&["cargo", "test"]),
                    ..ExecOptions::default()
                })
                .await
                .unwrap()
        };

        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.push, Some(PushOutcome::Reset));
        assert!(outcome.pull.is_none());
        assert!(matches!(outcome.warnings[..], [Warning::PullFailed(_)]));
    }

    #[tokio::test]
    async fn test_exec_lfs_changes_skip_push_and_pull() {
        let mut fx = Fixture::new();
        let mut repo = fx.repo.clone();
        repo.patch.lfs_files = vec!["model.bin".to_string()];
        let cwd = fx.cwd();

        let outcome = {
            let context = SandboxContext::new(&cwd, Some("main"));
            let mut manager = SandboxManager::new(&fx.api, &fx.remote, &mut fx.store, context)
                .with_sleeper(&fx.sleeper)
                .with_repo(&repo);
            manager
                .exec(ExecOptions {
                    args: args(&["ls"]),
                    ..ExecOptions::default()
                })
                .await
                .unwrap()
        };

        assert!(outcome.pull.is_none());
        assert_eq!(
            outcome.warnings,
            vec![Warning::LfsChangesSkipped(vec!["model.bin".to_string()])]
        );
        assert_eq!(fx.remote.commands(), vec!["ls"]);
    }

    #[tokio::test]
    async fn test_exec_waits_for_readiness() {
        let mut fx = Fixture::new();
        fx.api.script_connection(
            "slow",
            vec![
                ConnectionInfo::starting(Some(100)),
                ConnectionInfo::ready("slow:22", "k", "h"),
            ],
        );

        fx.manager()
            .exec(ExecOptions {
                run_id: Some("slow".to_string()),
                args: args(&["true"]),
                ..ExecOptions::default()
            })
            .await
            .unwrap();

        assert_eq!(fx.sleeper.sleeps(), vec![Duration::from_millis(100)]);
    }

    #[tokio::test]
    async fn test_stop_removes_session_even_when_signal_fails() {
        let mut fx = Fixture::new();
        let started = fx.manager().start(StartOptions::default()).await.unwrap();
        fx.remote.fail_command(STOP_COMMAND, "broken pipe");

        let outcome = fx
            .manager()
            .stop(StopTarget::RunId(started.run_id.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.reports.len(), 1);
        assert!(matches!(outcome.reports[0].signal, SignalOutcome::Failed(_)));
        assert!(outcome.reports[0].removed);
        assert!(matches!(
            outcome.warnings[..],
            [Warning::StopSignalFailed { .. }]
        ));
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_stop_delivers_sentinel() {
        let mut fx = Fixture::new();
        fx.manager().start(StartOptions::default()).await.unwrap();

        let outcome = fx
            .manager()
            .stop(StopTarget::Current { config_file: None })
            .await
            .unwrap();

        assert_eq!(outcome.reports[0].signal, SignalOutcome::Delivered);
        assert!(outcome.warnings.is_empty());
        assert_eq!(fx.remote.commands(), vec![STOP_COMMAND]);
        assert_eq!(fx.remote.closes(), 1);
    }

    #[tokio::test]
    async fn test_stop_unreachable_sandbox_is_not_a_warning() {
        let mut fx = Fixture::new();
        let started = fx.manager().start(StartOptions::default()).await.unwrap();
        fx.api.complete_run(&started.run_id);

        let outcome = fx.manager().stop(StopTarget::All).await.unwrap();

        assert!(matches!(
            outcome.reports[0].signal,
            SignalOutcome::NotReachable(_)
        ));
        assert!(outcome.warnings.is_empty());
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_list_classifies_sessions() {
        let mut fx = Fixture::new();
        let cwd = fx.cwd();
        fx.api.add_ready_run("live");
        fx.api.complete_run("done");
        fx.api.add_ready_run("flaky");
        fx.api.fail_status("flaky");
        for (config, run) in [("a.yml", "live"), ("b.yml", "done"), ("c.yml", "flaky")] {
            fx.store.set(&cwd, "main", config, SandboxSession::new(run, config));
        }

        let listings = fx.manager().list().await;
        let statuses: Vec<_> = listings
            .iter()
            .map(|l| (l.session.run_id.as_str(), l.status))
            .collect();

        assert_eq!(
            statuses,
            vec![
                ("live", SessionStatus::Active),
                ("done", SessionStatus::Expired),
                ("flaky", SessionStatus::Unknown),
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_replaces_session_in_same_slot() {
        let mut fx = Fixture::new();
        let cwd = fx.cwd();
        let first = fx.manager().start(StartOptions::default()).await.unwrap();

        let outcome = fx.manager().reset(ResetOptions::default()).await.unwrap();

        assert_eq!(outcome.stopped.len(), 1);
        assert_eq!(outcome.stopped[0].run_id, first.run_id);
        assert_ne!(outcome.started.run_id, first.run_id);
        let session = fx.store.get(&cwd, "main", ".sandcastle/sandbox.yml").unwrap();
        assert_eq!(session.run_id, outcome.started.run_id);
    }
}
