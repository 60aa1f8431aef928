//! Fleet provisioning orchestrator.
//!
//! The run submits one creation request per index, then polls the provider
//! until every droplet reports `active` with a public address. Newly ready
//! droplets are batched per round: after a settle delay that lets the SSH
//! daemon finish initialising, the whole batch is bootstrapped in one pass.
//! Bootstrap dispatch is fire-and-forget; a droplet counts as bootstrapped
//! once the remote command was accepted, not once the install finished.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::net::IpAddr;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::time::sleep;

use crate::bootstrap;
use crate::provider::{
    InstanceHandle, InstanceSpec, InstanceStatus, Provider, SpecError, TransientError,
};
use crate::session::{Credential, RemoteShell, SessionError, ShellFactory};

/// Pause between creation submissions, respecting provider rate limits.
pub const CREATE_SPACING: Duration = Duration::from_millis(500);

/// Pause before re-polling when a round produced no newly ready droplets.
pub const POLL_DELAY: Duration = Duration::from_secs(5);

/// Pause before bootstrapping a round's batch, so sshd finishes coming up.
pub const SETTLE_DELAY: Duration = Duration::from_secs(15);

/// Default retry policy for session opens: one retry after a 10s back-off.
pub const SESSION_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    backoff: Duration::from_secs(10),
};

/// Bounded retry policy applied to retryable session-open failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

/// Everything a single provisioning run needs, assembled from the CLI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FleetPlan {
    /// First index of the fleet, inclusive.
    pub min: i64,
    /// Last index of the fleet, inclusive.
    pub max: i64,
    /// Name prefix; droplets are named `prefix + index`.
    pub prefix: String,
    /// Region slug for every droplet.
    pub region: String,
    /// Image slug for every droplet.
    pub image: String,
    /// Size slug for every droplet.
    pub size: String,
    /// SSH key identifiers authorised on every droplet.
    pub ssh_keys: Vec<u64>,
    /// Root password for session authentication; key auth when absent.
    pub password: Option<String>,
    /// URL of the bootstrap script fetched by each droplet.
    pub script_url: String,
    /// Whether this fleet hosts the Salt master. Parsed and carried but not
    /// consulted by the orchestration loop, matching the original tool.
    pub salt_master: bool,
    /// Address of the Salt master, passed to the bootstrap script.
    pub salt_master_address: String,
    /// Public key file. Parsed and carried but currently unused.
    pub pubkeyfile: Option<Utf8PathBuf>,
}

impl FleetPlan {
    /// Builds one validated spec per index in `[min, max]` inclusive.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when a derived spec is invalid, for
    /// example when the prefix is blank.
    pub fn specs(&self) -> Result<Vec<InstanceSpec>, SpecError> {
        (self.min..=self.max)
            .map(|index| {
                InstanceSpec::builder()
                    .name(format!("{}{index}", self.prefix))
                    .region(&self.region)
                    .image(&self.image)
                    .size(&self.size)
                    .ssh_keys(self.ssh_keys.clone())
                    .build()
            })
            .collect()
    }

    /// Returns the credential presented when opening sessions.
    #[must_use]
    pub fn credential(&self) -> Credential {
        self.password
            .clone()
            .map_or(Credential::DefaultKeys, Credential::Password)
    }
}

/// A droplet observed `active` with an assigned public address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadyInstance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Locally known desired name.
    pub name: String,
    /// Public IPv4 address reported by the provider.
    pub address: IpAddr,
}

/// Outcome of a completed provisioning run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FleetReport {
    /// Number of creation requests submitted.
    pub created: usize,
    /// Number of droplets a bootstrap was dispatched to.
    pub bootstrapped: usize,
}

/// Errors surfaced while provisioning and bootstrapping a fleet.
#[derive(Debug, Error)]
pub enum FleetError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when an instance spec cannot be derived from the plan.
    #[error("invalid instance spec: {0}")]
    Spec(#[from] SpecError),
    /// Raised when a creation request fails. Already created droplets are
    /// left running; the operator must run the reaper.
    #[error("failed to create {name}: {source}")]
    Create {
        /// Name of the droplet whose creation failed.
        name: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when a non-transient provider error interrupts polling.
    #[error("failed to query droplet {id}: {source}")]
    Poll {
        /// Identifier of the droplet being queried.
        id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when a session cannot be opened after the bounded retries.
    #[error("ssh session to {host} failed: {source}")]
    Session {
        /// Host the session was opened against.
        host: String,
        /// Final session error after retries were exhausted.
        #[source]
        source: SessionError,
    },
    /// Raised when staging the bootstrap script fails. Not retried.
    #[error("failed to stage bootstrap script on {host}: {source}")]
    Stage {
        /// Host the staging was attempted on.
        host: String,
        /// Underlying session error.
        #[source]
        source: SessionError,
    },
    /// Raised when the bootstrap command cannot be dispatched. Not retried.
    #[error("failed to dispatch bootstrap on {host}: {source}")]
    Dispatch {
        /// Host the dispatch was attempted on.
        host: String,
        /// Underlying session error.
        #[source]
        source: SessionError,
    },
}

/// Drives a fleet from creation requests to dispatched bootstraps.
#[derive(Debug)]
pub struct FleetOrchestrator<P, F, W> {
    provider: P,
    shells: F,
    out: W,
    create_spacing: Duration,
    poll_delay: Duration,
    settle_delay: Duration,
    session_retry: RetryPolicy,
}

impl<P, F, W> FleetOrchestrator<P, F, W>
where
    P: Provider,
    F: ShellFactory,
    W: Write,
{
    /// Creates a new orchestrator with the production delays.
    #[must_use]
    pub const fn new(provider: P, shells: F, out: W) -> Self {
        Self {
            provider,
            shells,
            out,
            create_spacing: CREATE_SPACING,
            poll_delay: POLL_DELAY,
            settle_delay: SETTLE_DELAY,
            session_retry: SESSION_RETRY,
        }
    }

    /// Overrides every delay at once.
    ///
    /// This is primarily used by tests to keep polling scenarios fast.
    #[must_use]
    pub const fn with_delays(
        mut self,
        create_spacing: Duration,
        poll_delay: Duration,
        settle_delay: Duration,
    ) -> Self {
        self.create_spacing = create_spacing;
        self.poll_delay = poll_delay;
        self.settle_delay = settle_delay;
        self
    }

    /// Overrides the session-open retry policy.
    #[must_use]
    pub const fn with_session_retry(mut self, policy: RetryPolicy) -> Self {
        self.session_retry = policy;
        self
    }

    /// Runs the whole workflow: create the fleet, poll until every droplet
    /// is ready, and bootstrap each newly ready batch.
    ///
    /// The loop only terminates once every submitted droplet has been
    /// bootstrapped, or an error propagates. Nothing is rolled back on
    /// failure; already created droplets keep running.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError`] when spec derivation, creation, polling, or
    /// bootstrap dispatch fail.
    pub async fn run(&mut self, plan: &FleetPlan) -> Result<FleetReport, FleetError<P::Error>> {
        let handles = self.create_fleet(plan).await?;
        let bootstrapped = self.poll_until_bootstrapped(plan, &handles).await?;
        Ok(FleetReport {
            created: handles.len(),
            bootstrapped,
        })
    }

    async fn create_fleet(
        &mut self,
        plan: &FleetPlan,
    ) -> Result<Vec<InstanceHandle>, FleetError<P::Error>> {
        let specs = plan.specs()?;
        let mut handles = Vec::with_capacity(specs.len());
        for spec in &specs {
            writeln!(self.out, "Creating node {}", spec.name).ok();
            let handle = self
                .provider
                .create(spec)
                .await
                .map_err(|source| FleetError::Create {
                    name: spec.name.clone(),
                    source,
                })?;
            handles.push(handle);
            sleep(self.create_spacing).await;
        }
        Ok(handles)
    }

    async fn poll_until_bootstrapped(
        &mut self,
        plan: &FleetPlan,
        handles: &[InstanceHandle],
    ) -> Result<usize, FleetError<P::Error>> {
        let mut ready: HashSet<String> = HashSet::new();
        // Address-to-name registry, kept for display only.
        let mut names: BTreeMap<String, String> = BTreeMap::new();
        let mut bootstrapped = 0_usize;

        while ready.len() < handles.len() {
            let mut batch = Vec::new();
            for handle in handles {
                if ready.contains(&handle.id) {
                    continue;
                }
                let observation = match self.provider.observe(handle).await {
                    Ok(observation) => observation,
                    // Transient lookup failures are retried next round.
                    Err(source) if source.is_transient() => continue,
                    Err(source) => {
                        return Err(FleetError::Poll {
                            id: handle.id.clone(),
                            source,
                        });
                    }
                };
                if observation.status != InstanceStatus::Active {
                    continue;
                }
                // Active without an address yet: not ready, poll again.
                let Some(address) = observation.public_ip else {
                    continue;
                };
                names.insert(address.to_string(), handle.name.clone());
                ready.insert(handle.id.clone());
                batch.push(ReadyInstance {
                    id: handle.id.clone(),
                    name: handle.name.clone(),
                    address,
                });
            }

            if batch.is_empty() {
                sleep(self.poll_delay).await;
                continue;
            }

            sleep(self.settle_delay).await;
            self.bootstrap_batch(plan, &batch, &names).await?;
            bootstrapped += batch.len();
        }

        Ok(bootstrapped)
    }

    async fn bootstrap_batch(
        &mut self,
        plan: &FleetPlan,
        batch: &[ReadyInstance],
        names: &BTreeMap<String, String>,
    ) -> Result<(), FleetError<P::Error>> {
        let credential = plan.credential();
        let command = bootstrap::bootstrap_command(&plan.script_url, &plan.salt_master_address);
        for instance in batch {
            let host = instance.address.to_string();
            let shell = self.open_with_retry(&host, &credential).await?;
            shell
                .stage_file(&plan.script_url, bootstrap::BOOTSTRAP_SCRIPT_PATH)
                .map_err(|source| FleetError::Stage {
                    host: host.clone(),
                    source,
                })?;
            let display_name = names
                .get(&host)
                .map_or(instance.name.as_str(), String::as_str);
            writeln!(self.out, "Bootstrapping {display_name} ({host})").ok();
            shell
                .execute(&command, &mut |_line| {}, &mut |_line| {})
                .map_err(|source| FleetError::Dispatch {
                    host: host.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn open_with_retry(
        &mut self,
        host: &str,
        credential: &Credential,
    ) -> Result<F::Shell, FleetError<P::Error>> {
        let mut attempt = 1_u32;
        loop {
            match self.shells.open(host, credential) {
                Ok(shell) => return Ok(shell),
                Err(err) if err.is_retryable() && attempt < self.session_retry.max_attempts => {
                    writeln!(
                        self.out,
                        "Session to {host} failed ({err}), trying one last time"
                    )
                    .ok();
                    sleep(self.session_retry.backoff).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(FleetError::Session {
                        host: host.to_owned(),
                        source,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
