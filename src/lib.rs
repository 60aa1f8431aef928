//! Core library for the saltfleet provisioning tool.
//!
//! The crate exposes a provider abstraction for droplet lifecycle calls and
//! a DigitalOcean implementation that powers the two binaries: `saltfleet`
//! (create → poll until active → bootstrap Salt over SSH) and
//! `saltfleet-reaper` (list → destroy everything the token can see).

pub mod bootstrap;
pub mod config;
pub mod digitalocean;
pub mod exec;
pub mod fleet;
pub mod provider;
pub mod reaper;
pub mod session;
pub mod test_support;

pub use config::{ConfigError, DoConfig};
pub use digitalocean::{DoApi, DoError};
pub use exec::{CommandOutput, CommandRunner, ProcessCommandRunner, SpawnError};
pub use fleet::{
    CREATE_SPACING, FleetError, FleetOrchestrator, FleetPlan, FleetReport, POLL_DELAY,
    ReadyInstance, RetryPolicy, SESSION_RETRY, SETTLE_DELAY,
};
pub use provider::{
    InstanceHandle, InstanceObservation, InstanceSpec, InstanceSpecBuilder, InstanceStatus,
    Provider, ProviderFuture, SpecError, TransientError,
};
pub use reaper::{ReapError, Reaper, SweepSummary};
pub use session::{
    Credential, RemoteShell, SessionError, ShellFactory, SshConfig, SshShell, SshShellFactory,
};
