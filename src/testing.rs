//! In-memory stand-ins for the control plane, the remote channel and the
//! local repository.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{
    ApiError, ConnectionInfo, ControlPlane, RunStarted, RunStatus, StartRunRequest,
};
use crate::git::{self, PatchFile, VersionControl};
use crate::remote::{self, Connector, RemoteChannel, TransportError};
use crate::sandbox::readiness::Sleeper;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Reply {
    Exit(i32, Vec<u8>),
    Fail(String),
}

#[derive(Default)]
struct FakeRemote {
    replies: Vec<(String, Reply)>,
    commands: Vec<String>,
    stdins: Vec<(String, Vec<u8>)>,
    connect_error: Option<String>,
    connected_to: Vec<String>,
    closes: usize,
}

impl FakeRemote {
    fn reply(&mut self, command: &str) -> remote::Result<(i32, Vec<u8>)> {
        self.commands.push(command.to_string());
        match self
            .replies
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
        {
            Some((_, Reply::Exit(code, stdout))) => Ok((*code, stdout.clone())),
            Some((_, Reply::Fail(reason))) => Err(TransportError::Io(io::Error::other(reason.clone()))),
            None => Ok((0, Vec::new())),
        }
    }
}

/// Scripted sandbox. Commands are matched against registered needles in
/// registration order; the first needle the command contains decides the
/// exit code and standard output. Unmatched commands succeed silently.
#[derive(Clone, Default)]
pub struct FakeConnector {
    remote: Arc<Mutex<FakeRemote>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, needle: &str, code: i32, stdout: impl Into<Vec<u8>>) {
        lock(&self.remote)
            .replies
            .push((needle.to_string(), Reply::Exit(code, stdout.into())));
    }

    /// Make commands containing `needle` fail at the transport level.
    pub fn fail_command(&self, needle: &str, reason: &str) {
        lock(&self.remote)
            .replies
            .push((needle.to_string(), Reply::Fail(reason.to_string())));
    }

    pub fn fail_connect(&self, reason: &str) {
        lock(&self.remote).connect_error = Some(reason.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.remote).commands.clone()
    }

    /// Bytes streamed to the first command containing `needle`.
    pub fn stdin_for(&self, needle: &str) -> Option<Vec<u8>> {
        lock(&self.remote)
            .stdins
            .iter()
            .find(|(command, _)| command.contains(needle))
            .map(|(_, bytes)| bytes.clone())
    }

    /// Addresses of every successful connection.
    pub fn connects(&self) -> Vec<String> {
        lock(&self.remote).connected_to.clone()
    }

    pub fn closes(&self) -> usize {
        lock(&self.remote).closes
    }

    pub fn channel(&self) -> FakeChannel {
        FakeChannel {
            remote: Arc::clone(&self.remote),
        }
    }
}

impl Connector for FakeConnector {
    fn connect(&self, info: &ConnectionInfo) -> remote::Result<Box<dyn RemoteChannel>> {
        let mut remote = lock(&self.remote);
        if let Some(reason) = &remote.connect_error {
            return Err(TransportError::Connect {
                address: info.address.clone(),
                reason: reason.clone(),
            });
        }
        remote.connected_to.push(info.address.clone());
        Ok(Box::new(FakeChannel {
            remote: Arc::clone(&self.remote),
        }))
    }
}

pub struct FakeChannel {
    remote: Arc<Mutex<FakeRemote>>,
}

impl RemoteChannel for FakeChannel {
    fn exec(&mut self, command: &str) -> remote::Result<i32> {
        Ok(lock(&self.remote).reply(command)?.0)
    }

    fn exec_with_stdin(&mut self, command: &str, stdin: &mut dyn Read) -> remote::Result<i32> {
        let mut bytes = Vec::new();
        stdin.read_to_end(&mut bytes)?;
        let mut remote = lock(&self.remote);
        remote.stdins.push((command.to_string(), bytes));
        Ok(remote.reply(command)?.0)
    }

    fn exec_with_stdout(&mut self, command: &str, stdout: &mut dyn Write) -> remote::Result<i32> {
        let (code, bytes) = lock(&self.remote).reply(command)?;
        stdout.write_all(&bytes)?;
        Ok(code)
    }

    fn close(&mut self) -> remote::Result<()> {
        lock(&self.remote).closes += 1;
        Ok(())
    }
}

/// Repository with a fixed branch, head and patch.
#[derive(Debug, Clone)]
pub struct FakeRepo {
    pub root: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub patch: PatchFile,
    pub changed: Vec<String>,
}

impl Default for FakeRepo {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            branch: Some("main".to_string()),
            head: Some("0123456789abcdef0123456789abcdef01234567".to_string()),
            patch: PatchFile::default(),
            changed: Vec::new(),
        }
    }
}

impl VersionControl for FakeRepo {
    fn root(&self) -> &Path {
        &self.root
    }

    fn current_branch(&self) -> git::Result<Option<String>> {
        Ok(self.branch.clone())
    }

    fn head_commit(&self) -> git::Result<Option<String>> {
        Ok(self.head.clone())
    }

    fn generate_patch(&self) -> git::Result<PatchFile> {
        Ok(self.patch.clone())
    }

    fn changed_paths(&self) -> git::Result<Vec<String>> {
        Ok(self.changed.clone())
    }
}

#[derive(Default)]
struct ControlPlaneState {
    connections: HashMap<String, VecDeque<ConnectionInfo>>,
    statuses: HashMap<String, RunStatus>,
    failing: HashSet<String>,
    started: Vec<StartRunRequest>,
    end_new_runs: bool,
}

/// Control plane that knows only the runs it was told about. Runs created
/// through `start_run` are named `run-1`, `run-2`, ... and are ready at once.
#[derive(Default)]
pub struct FakeControlPlane {
    state: Mutex<ControlPlaneState>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue connection-info answers for `run_id`. The last answer repeats
    /// once the queue is drained. Marks the run active if it has no status.
    pub fn script_connection(&self, run_id: &str, answers: Vec<ConnectionInfo>) {
        let mut state = lock(&self.state);
        state
            .connections
            .insert(run_id.to_string(), answers.into_iter().collect());
        state
            .statuses
            .entry(run_id.to_string())
            .or_insert_with(|| active_status(run_id));
    }

    pub fn add_ready_run(&self, run_id: &str) {
        self.script_connection(run_id, vec![ready_info(run_id)]);
    }

    pub fn complete_run(&self, run_id: &str) {
        let mut state = lock(&self.state);
        state
            .connections
            .insert(run_id.to_string(), VecDeque::from([ConnectionInfo::completed()]));
        let status = state
            .statuses
            .entry(run_id.to_string())
            .or_insert_with(|| active_status(run_id));
        status.completed = true;
        status.result = Some("succeeded".to_string());
    }

    /// Make status probes for `run_id` fail with a server error.
    pub fn fail_status(&self, run_id: &str) {
        lock(&self.state).failing.insert(run_id.to_string());
    }

    /// Runs created from now on end before ever becoming ready.
    pub fn end_new_runs(&self) {
        lock(&self.state).end_new_runs = true;
    }

    pub fn started_runs(&self) -> Vec<StartRunRequest> {
        lock(&self.state).started.clone()
    }
}

fn active_status(run_id: &str) -> RunStatus {
    RunStatus {
        run_id: run_id.to_string(),
        ..RunStatus::default()
    }
}

fn ready_info(run_id: &str) -> ConnectionInfo {
    ConnectionInfo::ready(&format!("{run_id}.sandbox.test:22"), "user-key", "host-key")
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn connection_info(&self, run_id: &str) -> crate::api::Result<ConnectionInfo> {
        let mut state = lock(&self.state);
        let answers = state
            .connections
            .get_mut(run_id)
            .ok_or_else(|| ApiError::RunNotFound(run_id.to_string()))?;
        let answer = if answers.len() > 1 {
            answers.pop_front()
        } else {
            answers.front().cloned()
        };
        answer.ok_or_else(|| ApiError::RunNotFound(run_id.to_string()))
    }

    async fn run_status(&self, run_id: &str) -> crate::api::Result<RunStatus> {
        let state = lock(&self.state);
        if state.failing.contains(run_id) {
            return Err(ApiError::Status {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        state
            .statuses
            .get(run_id)
            .cloned()
            .ok_or_else(|| ApiError::RunNotFound(run_id.to_string()))
    }

    async fn start_run(&self, request: &StartRunRequest) -> crate::api::Result<RunStarted> {
        let mut state = lock(&self.state);
        state.started.push(request.clone());
        let run_id = format!("run-{}", state.started.len());
        let answer = if state.end_new_runs {
            ConnectionInfo::completed()
        } else {
            ready_info(&run_id)
        };
        state
            .connections
            .insert(run_id.clone(), VecDeque::from([answer]));
        let mut status = active_status(&run_id);
        status.config_file = Some(request.config_file.clone());
        state.statuses.insert(run_id.clone(), status);
        Ok(RunStarted {
            run_url: Some(format!("https://sandcastle.test/runs/{run_id}")),
            run_id,
        })
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
    }
}
