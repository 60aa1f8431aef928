//! Provider abstraction for the droplet lifecycle.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

/// Parameters required to create a new droplet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Desired droplet name, derived from the fleet prefix and index.
    pub name: String,
    /// Target region slug (for example `fra1`).
    pub region: String,
    /// Image slug used for the boot disk (for example `debian-7-0-x64`).
    pub image: String,
    /// Size slug describing the plan (for example `2gb`).
    pub size: String,
    /// Identifiers of SSH keys authorised on the new droplet.
    pub ssh_keys: Vec<u64>,
    /// Whether to enable IPv6 networking.
    pub ipv6: bool,
    /// Whether to attach the droplet to the private network.
    pub private_networking: bool,
    /// Whether to enable automated backups.
    pub backups: bool,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::new()
    }

    /// Validates the spec, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any required string field is
    /// empty.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::Validation("name".to_owned()));
        }
        if self.region.is_empty() {
            return Err(SpecError::Validation("region".to_owned()));
        }
        if self.image.is_empty() {
            return Err(SpecError::Validation("image".to_owned()));
        }
        if self.size.is_empty() {
            return Err(SpecError::Validation("size".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`InstanceSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpecBuilder {
    name: String,
    region: String,
    image: String,
    size: String,
    ssh_keys: Vec<u64>,
    ipv6: bool,
    private_networking: bool,
    backups: bool,
}

impl Default for InstanceSpecBuilder {
    fn default() -> Self {
        Self {
            name: String::new(),
            region: String::new(),
            image: String::new(),
            size: String::new(),
            ssh_keys: Vec::new(),
            ipv6: false,
            private_networking: true,
            backups: false,
        }
    }
}

impl InstanceSpecBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the droplet name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the region slug.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the image slug.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the size slug.
    #[must_use]
    pub fn size(mut self, value: impl Into<String>) -> Self {
        self.size = value.into();
        self
    }

    /// Sets the authorised SSH key identifiers.
    #[must_use]
    pub fn ssh_keys(mut self, value: Vec<u64>) -> Self {
        self.ssh_keys = value;
        self
    }

    /// Sets the IPv6 flag.
    #[must_use]
    pub const fn ipv6(mut self, value: bool) -> Self {
        self.ipv6 = value;
        self
    }

    /// Sets the private networking flag.
    #[must_use]
    pub const fn private_networking(mut self, value: bool) -> Self {
        self.private_networking = value;
        self
    }

    /// Sets the backups flag.
    #[must_use]
    pub const fn backups(mut self, value: bool) -> Self {
        self.backups = value;
        self
    }

    /// Builds and validates the [`InstanceSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<InstanceSpec, SpecError> {
        let spec = InstanceSpec {
            name: self.name.trim().to_owned(),
            region: self.region.trim().to_owned(),
            image: self.image.trim().to_owned(),
            size: self.size.trim().to_owned(),
            ssh_keys: self.ssh_keys,
            ipv6: self.ipv6,
            private_networking: self.private_networking,
            backups: self.backups,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Handle returned by a provider once a creation request was accepted.
///
/// The identifier is the only field guaranteed valid immediately; status and
/// address remain unknown until observed.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InstanceHandle {
    /// Provider-assigned droplet identifier.
    pub id: String,
    /// Locally known desired name.
    pub name: String,
}

/// Lifecycle status reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    /// The droplet is still being provisioned.
    Pending,
    /// The droplet is running.
    Active,
    /// Any other provider state (for example `off` or `archive`).
    Other(String),
}

impl From<&str> for InstanceStatus {
    fn from(value: &str) -> Self {
        match value {
            "new" => Self::Pending,
            "active" => Self::Active,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Point-in-time view of a droplet as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceObservation {
    /// Provider-assigned identifier.
    pub id: String,
    /// Name reported by the provider.
    pub name: String,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Public IPv4 address, once assigned.
    pub public_ip: Option<IpAddr>,
}

/// Errors raised while constructing instance specifications.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a spec is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Classifies provider errors into transient and fatal failures.
///
/// Transient failures during status polling are skipped for the round and
/// retried on the next one; everything else aborts the run.
pub trait TransientError {
    /// Returns `true` when the failure is expected to clear on its own.
    fn is_transient(&self) -> bool;
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by cloud providers.
pub trait Provider {
    /// Provider specific error type.
    type Error: std::error::Error + TransientError + Send + Sync + 'static;

    /// Submits a creation request and returns a handle for subsequent calls.
    fn create<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceHandle, Self::Error>;

    /// Queries the current status and address of a droplet.
    fn observe<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, InstanceObservation, Self::Error>;

    /// Lists every droplet visible to the caller's credentials.
    fn list(&self) -> ProviderFuture<'_, Vec<InstanceHandle>, Self::Error>;

    /// Destroys the droplet identified by `handle`.
    fn destroy<'a>(&'a self, handle: &'a InstanceHandle) -> ProviderFuture<'a, (), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn full_builder() -> InstanceSpecBuilder {
        InstanceSpec::builder()
            .name("mw0")
            .region("fra1")
            .image("debian-7-0-x64")
            .size("2gb")
            .ssh_keys(vec![101, 102])
    }

    #[rstest]
    fn build_produces_trimmed_spec() {
        let spec = full_builder()
            .name("  mw0  ")
            .build()
            .expect("spec should build");
        assert_eq!(spec.name, "mw0");
        assert_eq!(spec.ssh_keys, vec![101, 102]);
        assert!(!spec.ipv6);
        assert!(spec.private_networking);
        assert!(!spec.backups);
    }

    #[rstest]
    #[case("name", full_builder().name(" "))]
    #[case("region", full_builder().region(""))]
    #[case("image", full_builder().image("  "))]
    #[case("size", full_builder().size(""))]
    fn build_rejects_blank_fields(#[case] expected: &str, #[case] builder: InstanceSpecBuilder) {
        let err = builder.build().expect_err("expected validation failure");
        assert_eq!(err, SpecError::Validation(expected.to_owned()));
    }

    #[rstest]
    #[case("new", InstanceStatus::Pending)]
    #[case("active", InstanceStatus::Active)]
    #[case("off", InstanceStatus::Other(String::from("off")))]
    #[case("archive", InstanceStatus::Other(String::from("archive")))]
    fn status_parses_provider_strings(#[case] raw: &str, #[case] expected: InstanceStatus) {
        assert_eq!(InstanceStatus::from(raw), expected);
    }
}
