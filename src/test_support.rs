//! Test support utilities shared across unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::exec::{CommandOutput, CommandRunner, SpawnError};
use crate::provider::{
    InstanceHandle, InstanceObservation, InstanceSpec, InstanceStatus, Provider, ProviderFuture,
    TransientError,
};
use crate::session::{Credential, RemoteShell, SessionError, ShellFactory};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(&self, code: Option<i32>, stdout: impl Into<String>, stderr: impl Into<String>) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses).pop_front().ok_or_else(|| SpawnError {
            program: program.to_owned(),
            message: String::from("no scripted response available"),
        })
    }
}

/// Errors produced by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeProviderError {
    /// Failure classified as transient (skipped during polling).
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Failure classified as fatal (aborts the run).
    #[error("fatal provider failure: {0}")]
    Fatal(String),
}

impl TransientError for FakeProviderError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One scripted poll result: a status plus an optional address, or an error.
pub type ObservationStep = Result<(InstanceStatus, Option<IpAddr>), FakeProviderError>;

#[derive(Debug, Default)]
struct FakeProviderState {
    created: Vec<InstanceSpec>,
    create_failures: HashMap<String, FakeProviderError>,
    observations: HashMap<String, VecDeque<ObservationStep>>,
    observe_counts: HashMap<String, usize>,
    listing: Vec<InstanceHandle>,
    destroy_failures: HashMap<String, FakeProviderError>,
    destroyed: Vec<String>,
}

/// Scripted provider double driving the orchestrator without HTTP calls.
///
/// Creation assigns deterministic identifiers (`fake-<name>`); observations
/// are consumed in FIFO order per droplet name.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    inner: Arc<Mutex<FakeProviderState>>,
}

impl FakeProvider {
    /// Creates an empty provider double.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes creation of the named droplet fail with `error`.
    pub fn script_create_failure(&self, name: &str, error: FakeProviderError) {
        lock(&self.inner)
            .create_failures
            .insert(name.to_owned(), error);
    }

    /// Appends one scripted observation for the named droplet.
    pub fn script_observation(&self, name: &str, step: ObservationStep) {
        lock(&self.inner)
            .observations
            .entry(name.to_owned())
            .or_default()
            .push_back(step);
    }

    /// Appends several scripted observations for the named droplet.
    pub fn script_observations(&self, name: &str, steps: Vec<ObservationStep>) {
        let mut state = lock(&self.inner);
        state
            .observations
            .entry(name.to_owned())
            .or_default()
            .extend(steps);
    }

    /// Seeds the handles returned by `list`.
    pub fn seed_listing(&self, handles: Vec<InstanceHandle>) {
        lock(&self.inner).listing = handles;
    }

    /// Makes destruction of the identified droplet fail with `error`.
    pub fn script_destroy_failure(&self, id: &str, error: FakeProviderError) {
        lock(&self.inner)
            .destroy_failures
            .insert(id.to_owned(), error);
    }

    /// Returns the names of all droplets created so far, in order.
    #[must_use]
    pub fn created_names(&self) -> Vec<String> {
        lock(&self.inner)
            .created
            .iter()
            .map(|spec| spec.name.clone())
            .collect()
    }

    /// Returns how many times the named droplet was observed.
    #[must_use]
    pub fn observe_count(&self, name: &str) -> usize {
        lock(&self.inner)
            .observe_counts
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the identifiers destroyed so far, in call order.
    #[must_use]
    pub fn destroyed_ids(&self) -> Vec<String> {
        lock(&self.inner).destroyed.clone()
    }
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn create<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.inner);
            if let Some(error) = state.create_failures.get(&spec.name) {
                return Err(error.clone());
            }
            state.created.push(spec.clone());
            Ok(InstanceHandle {
                id: format!("fake-{}", spec.name),
                name: spec.name.clone(),
            })
        })
    }

    fn observe<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, InstanceObservation, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.inner);
            *state.observe_counts.entry(handle.name.clone()).or_insert(0) += 1;
            let step = state
                .observations
                .get_mut(&handle.name)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| {
                    FakeProviderError::Fatal(format!(
                        "no scripted observation for {}",
                        handle.name
                    ))
                })?;
            let (status, public_ip) = step?;
            Ok(InstanceObservation {
                id: handle.id.clone(),
                name: handle.name.clone(),
                status,
                public_ip,
            })
        })
    }

    fn list(&self) -> ProviderFuture<'_, Vec<InstanceHandle>, Self::Error> {
        Box::pin(async move { Ok(lock(&self.inner).listing.clone()) })
    }

    fn destroy<'a>(&'a self, handle: &'a InstanceHandle) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.inner);
            state.destroyed.push(handle.id.clone());
            match state.destroy_failures.get(&handle.id) {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        })
    }
}

#[derive(Debug, Default)]
struct FakeShellState {
    open_results: VecDeque<Result<(), SessionError>>,
    opened_hosts: Vec<String>,
    staged: Vec<(String, String, String)>,
    stage_results: VecDeque<Result<(), SessionError>>,
    executed: Vec<(String, String)>,
    execute_results: VecDeque<Result<(), SessionError>>,
}

/// Scripted shell factory recording every open, stage, and execute call.
///
/// Unscripted calls succeed, so tests only queue the failures they need.
#[derive(Clone, Debug, Default)]
pub struct FakeShellFactory {
    inner: Arc<Mutex<FakeShellState>>,
}

impl FakeShellFactory {
    /// Creates a factory with no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of the next `open` call.
    pub fn push_open_result(&self, result: Result<(), SessionError>) {
        lock(&self.inner).open_results.push_back(result);
    }

    /// Queues the outcome of the next `stage_file` call.
    pub fn push_stage_result(&self, result: Result<(), SessionError>) {
        lock(&self.inner).stage_results.push_back(result);
    }

    /// Queues the outcome of the next `execute` call.
    pub fn push_execute_result(&self, result: Result<(), SessionError>) {
        lock(&self.inner).execute_results.push_back(result);
    }

    /// Returns every host an open was attempted against, in order.
    #[must_use]
    pub fn opened_hosts(&self) -> Vec<String> {
        lock(&self.inner).opened_hosts.clone()
    }

    /// Returns `(host, source, remote_path)` for each staged file.
    #[must_use]
    pub fn staged(&self) -> Vec<(String, String, String)> {
        lock(&self.inner).staged.clone()
    }

    /// Returns `(host, command)` for each executed command.
    #[must_use]
    pub fn executed(&self) -> Vec<(String, String)> {
        lock(&self.inner).executed.clone()
    }
}

impl ShellFactory for FakeShellFactory {
    type Shell = FakeShell;

    fn open(&self, host: &str, _credential: &Credential) -> Result<Self::Shell, SessionError> {
        let mut state = lock(&self.inner);
        state.opened_hosts.push(host.to_owned());
        if let Some(result) = state.open_results.pop_front() {
            result?;
        }
        Ok(FakeShell {
            host: host.to_owned(),
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Shell double produced by [`FakeShellFactory`].
#[derive(Clone, Debug)]
pub struct FakeShell {
    host: String,
    inner: Arc<Mutex<FakeShellState>>,
}

impl RemoteShell for FakeShell {
    fn stage_file(&self, source_url: &str, remote_path: &str) -> Result<(), SessionError> {
        let mut state = lock(&self.inner);
        state.staged.push((
            self.host.clone(),
            source_url.to_owned(),
            remote_path.to_owned(),
        ));
        state.stage_results.pop_front().unwrap_or(Ok(()))
    }

    fn execute(
        &self,
        command: &str,
        _on_stdout: &mut dyn FnMut(&str),
        _on_stderr: &mut dyn FnMut(&str),
    ) -> Result<(), SessionError> {
        let mut state = lock(&self.inner);
        state.executed.push((self.host.clone(), command.to_owned()));
        state.execute_results.pop_front().unwrap_or(Ok(()))
    }
}
