//! Remote shell sessions over the system `ssh` client.
//!
//! Session open failures are classified so the orchestrator can retry the
//! transient ones (connection timeouts and authentication errors) with a
//! bounded back-off. Everything after a successful open is fatal on failure.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::bootstrap;
use crate::exec::{CommandOutput, CommandRunner, SpawnError};

/// SSH settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SALTFLEET_SSH")]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `sshpass` executable used for password authentication.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// TCP port the remote SSH daemon listens on.
    #[ortho_config(default = 22_u16)]
    pub ssh_port: u16,
    /// Connection timeout in seconds passed to the SSH client.
    #[ortho_config(default = 10_u64)]
    pub connect_timeout_secs: u64,
    /// Whether to enforce host key checking; defaults to disabling to smooth
    /// freshly created droplets.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for fresh hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Path to an SSH private key file. Optional; when not provided, SSH
    /// falls back to its default key locations.
    pub ssh_identity_file: Option<String>,
}

impl SshConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] when any required field is
    /// empty.
    pub fn validate(&self) -> Result<(), SessionError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.sshpass_bin, "sshpass_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConfigLoad`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SessionError> {
        Self::load_from_iter([OsString::from("saltfleet")])
            .map_err(|err| SessionError::ConfigLoad(err.to_string()))
    }

    fn require_value(value: &str, field: &str) -> Result<(), SessionError> {
        Self::require_optional_value(Some(value), field)
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), SessionError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(SessionError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }
}

/// Credential presented when opening a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Credential {
    /// Password authentication routed through `sshpass`.
    Password(String),
    /// Key authentication using configured or default identity files.
    DefaultKeys,
}

/// Errors surfaced while opening or driving a remote session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set SALTFLEET_SSH_{env_suffix} or add {field} to saltfleet.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when loading the layered SSH configuration fails.
    #[error("ssh configuration parsing failed: {0}")]
    ConfigLoad(String),
    /// Raised when the connection attempt timed out.
    #[error("connection to {host} timed out: {message}")]
    Timeout {
        /// Host the connection was made to.
        host: String,
        /// Stderr reported by the SSH client.
        message: String,
    },
    /// Raised when the remote host rejected the credential.
    #[error("authentication to {host} failed: {message}")]
    Auth {
        /// Host the connection was made to.
        host: String,
        /// Stderr reported by the SSH client.
        message: String,
    },
    /// Raised when the SSH client cannot be spawned.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// Raised when a remote command exits with a non-zero status.
    #[error("{program} exited with status {status_text} on {host}: {stderr}")]
    CommandFailure {
        /// Program used for the attempted operation.
        program: String,
        /// Host the command was dispatched to.
        host: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

impl SessionError {
    /// Returns `true` for the failure kinds the orchestrator retries once.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Auth { .. })
    }
}

/// Open session to a single remote host.
pub trait RemoteShell {
    /// Stages the file at `source_url` on the remote host at `remote_path`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the staging command cannot be dispatched
    /// or exits with a non-zero status.
    fn stage_file(&self, source_url: &str, remote_path: &str) -> Result<(), SessionError>;

    /// Executes `command` on the remote host, streaming output lines to the
    /// provided callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the command cannot be dispatched or
    /// exits with a non-zero status.
    fn execute(
        &self,
        command: &str,
        on_stdout: &mut dyn FnMut(&str),
        on_stderr: &mut dyn FnMut(&str),
    ) -> Result<(), SessionError>;
}

/// Opens remote shell sessions.
pub trait ShellFactory {
    /// Session type produced on a successful open.
    type Shell: RemoteShell;

    /// Opens a session to `host` using `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] or [`SessionError::Auth`] for the
    /// retryable open failures, and other [`SessionError`] variants for
    /// fatal ones.
    fn open(&self, host: &str, credential: &Credential) -> Result<Self::Shell, SessionError>;
}

/// Factory that opens sessions by shelling out to the system SSH client.
#[derive(Clone, Debug)]
pub struct SshShellFactory<R: CommandRunner + Clone> {
    config: SshConfig,
    runner: R,
}

impl<R: CommandRunner + Clone> SshShellFactory<R> {
    /// Creates a new factory using the provided configuration and runner.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self { config, runner })
    }
}

impl<R: CommandRunner + Clone> ShellFactory for SshShellFactory<R> {
    type Shell = SshShell<R>;

    fn open(&self, host: &str, credential: &Credential) -> Result<Self::Shell, SessionError> {
        let shell = SshShell {
            host: host.to_owned(),
            credential: credential.clone(),
            config: self.config.clone(),
            runner: self.runner.clone(),
        };
        // Probe with a no-op command so authentication and reachability
        // problems surface here, where the caller can retry them.
        shell.run_classified("true", classify_open)?;
        Ok(shell)
    }
}

/// Session to one droplet backed by `ssh` invocations.
#[derive(Clone, Debug)]
pub struct SshShell<R: CommandRunner> {
    host: String,
    credential: Credential,
    config: SshConfig,
    runner: R,
}

impl<R: CommandRunner> SshShell<R> {
    fn invocation(&self, remote_command: &str) -> (String, Vec<OsString>) {
        let mut args = Vec::new();
        let program = match &self.credential {
            Credential::Password(password) => {
                args.push(OsString::from("-p"));
                args.push(OsString::from(password));
                args.push(OsString::from(&self.config.ssh_bin));
                self.config.sshpass_bin.clone()
            }
            Credential::DefaultKeys => self.config.ssh_bin.clone(),
        };

        args.push(OsString::from("-p"));
        args.push(OsString::from(self.config.ssh_port.to_string()));
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.connect_timeout_secs
        )));

        if matches!(self.credential, Credential::DefaultKeys) {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(identity_file));
        }

        args.push(OsString::from(format!(
            "{}@{}",
            self.config.ssh_user, self.host
        )));
        args.push(OsString::from(remote_command));

        (program, args)
    }

    fn run_classified(
        &self,
        remote_command: &str,
        classify: fn(&str, &str, &CommandOutput) -> SessionError,
    ) -> Result<CommandOutput, SessionError> {
        let (program, args) = self.invocation(remote_command);
        let output = self.runner.run(&program, &args)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(classify(&program, &self.host, &output))
    }
}

fn classify_open(program: &str, host: &str, output: &CommandOutput) -> SessionError {
    let stderr = output.stderr.trim().to_owned();
    let lowered = stderr.to_lowercase();
    if lowered.contains("permission denied") || lowered.contains("authentication") {
        return SessionError::Auth {
            host: host.to_owned(),
            message: stderr,
        };
    }
    if lowered.contains("timed out") || lowered.contains("timeout") {
        return SessionError::Timeout {
            host: host.to_owned(),
            message: stderr,
        };
    }
    command_failure(program, host, output)
}

fn command_failure(program: &str, host: &str, output: &CommandOutput) -> SessionError {
    let status_text = output
        .code
        .map_or_else(|| String::from("unknown"), |code| code.to_string());
    SessionError::CommandFailure {
        program: program.to_owned(),
        host: host.to_owned(),
        status_text,
        stderr: output.stderr.trim().to_owned(),
    }
}

impl<R: CommandRunner> RemoteShell for SshShell<R> {
    fn stage_file(&self, source_url: &str, remote_path: &str) -> Result<(), SessionError> {
        let command = bootstrap::stage_command(source_url, remote_path);
        self.run_classified(&command, command_failure)?;
        Ok(())
    }

    fn execute(
        &self,
        command: &str,
        on_stdout: &mut dyn FnMut(&str),
        on_stderr: &mut dyn FnMut(&str),
    ) -> Result<(), SessionError> {
        let output = self.run_classified(command, command_failure)?;
        for line in output.stdout.lines() {
            on_stdout(line);
        }
        for line in output.stderr.lines() {
            on_stderr(line);
        }
        Ok(())
    }
}
