//! DigitalOcean implementation of the droplet lifecycle.

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::DoConfig;
use crate::provider::{
    InstanceHandle, InstanceObservation, InstanceSpec, InstanceStatus, Provider, ProviderFuture,
    TransientError,
};

mod types;

use types::{CreateDropletBody, Droplet, DropletEnvelope, DropletListPage, PER_PAGE};

/// Errors raised by the DigitalOcean provider.
#[derive(Debug, Error)]
pub enum DoError {
    /// Raised when the client configuration or a request is invalid.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the API answers with a non-success HTTP status.
    #[error("DigitalOcean API error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code returned by the API.
        status: u16,
        /// Response body text, usually a JSON error description.
        message: String,
    },
    /// Raised when the request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode {what} response: {message}")]
    Decode {
        /// Operation whose response failed to decode.
        what: &'static str,
        /// Decoder error message.
        message: String,
    },
}

impl TransientError for DoError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            // A droplet briefly missing from the API, rate limiting, and
            // server-side hiccups all clear on their own; client-side
            // rejections do not.
            Self::Api { status, .. } => matches!(*status, 404 | 429) || *status >= 500,
            Self::Config(_) | Self::Decode { .. } => false,
        }
    }
}

/// Thin client for the DigitalOcean v2 droplets API.
#[derive(Clone, Debug)]
pub struct DoApi {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl DoApi {
    /// Constructs a new client from an API token and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DoError::Config`] when the token is blank, the configuration
    /// fails validation, or the HTTP client cannot be built.
    pub fn new(token: impl Into<String>, config: &DoConfig) -> Result<Self, DoError> {
        config
            .validate()
            .map_err(|err| DoError::Config(err.to_string()))?;
        let trimmed = token.into().trim().to_owned();
        if trimmed.is_empty() {
            return Err(DoError::Config(String::from("API token must not be empty")));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| DoError::Config(err.to_string()))?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            token: trimmed,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    async fn create_droplet(&self, spec: &InstanceSpec) -> Result<Droplet, DoError> {
        let body = CreateDropletBody::from(spec);
        let response = self
            .http
            .post(self.endpoint("/v2/droplets"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let envelope: DropletEnvelope = decode(response, "create droplet").await?;
        Ok(envelope.droplet)
    }

    async fn get_droplet(&self, id: &str) -> Result<Droplet, DoError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/v2/droplets/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport)?;
        let envelope: DropletEnvelope = decode(response, "get droplet").await?;
        Ok(envelope.droplet)
    }

    async fn list_droplets(&self) -> Result<Vec<Droplet>, DoError> {
        let mut droplets = Vec::new();
        let mut page = 1_u32;
        loop {
            let url = format!(
                "{}?page={page}&per_page={PER_PAGE}",
                self.endpoint("/v2/droplets")
            );
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(transport)?;
            let listed: DropletListPage = decode(response, "list droplets").await?;
            let count = listed.droplets.len();
            droplets.extend(listed.droplets);
            if count < PER_PAGE {
                return Ok(droplets);
            }
            page += 1;
        }
    }

    async fn delete_droplet(&self, id: &str) -> Result<(), DoError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("/v2/droplets/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport)?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(api_error(response).await)
    }
}

fn transport(err: reqwest::Error) -> DoError {
    DoError::Transport(err.to_string())
}

async fn api_error(response: reqwest::Response) -> DoError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    DoError::Api { status, message }
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    what: &'static str,
) -> Result<T, DoError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    response.json::<T>().await.map_err(|err| DoError::Decode {
        what,
        message: err.to_string(),
    })
}

impl Provider for DoApi {
    type Error = DoError;

    fn create<'a>(&'a self, spec: &'a InstanceSpec) -> ProviderFuture<'a, InstanceHandle, DoError> {
        Box::pin(async move {
            spec.validate().map_err(|err| DoError::Config(err.to_string()))?;
            let droplet = self.create_droplet(spec).await?;
            Ok(InstanceHandle {
                id: droplet.id.to_string(),
                name: spec.name.clone(),
            })
        })
    }

    fn observe<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, InstanceObservation, DoError> {
        Box::pin(async move {
            let droplet = self.get_droplet(&handle.id).await?;
            Ok(InstanceObservation {
                id: handle.id.clone(),
                name: droplet.name.clone(),
                status: InstanceStatus::from(droplet.status.as_str()),
                public_ip: droplet.public_v4(),
            })
        })
    }

    fn list(&self) -> ProviderFuture<'_, Vec<InstanceHandle>, DoError> {
        Box::pin(async move {
            let droplets = self.list_droplets().await?;
            Ok(droplets
                .into_iter()
                .map(|droplet| InstanceHandle {
                    id: droplet.id.to_string(),
                    name: droplet.name,
                })
                .collect())
        })
    }

    fn destroy<'a>(&'a self, handle: &'a InstanceHandle) -> ProviderFuture<'a, (), DoError> {
        Box::pin(async move { self.delete_droplet(&handle.id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::net::{IpAddr, Ipv4Addr};

    fn droplet_json(status: &str, networks: &str) -> String {
        format!(
            "{{\"id\":3164494,\"name\":\"mw0\",\"status\":\"{status}\",\"networks\":{networks}}}"
        )
    }

    #[rstest]
    fn droplet_decodes_with_public_address() {
        let json = droplet_json(
            "active",
            concat!(
                "{\"v4\":[",
                "{\"ip_address\":\"10.128.0.2\",\"type\":\"private\"},",
                "{\"ip_address\":\"104.131.186.241\",\"type\":\"public\"}",
                "]}"
            ),
        );
        let droplet: Droplet = serde_json::from_str(&json).expect("droplet should decode");
        assert_eq!(droplet.status, "active");
        assert_eq!(
            droplet.public_v4(),
            Some(IpAddr::V4(Ipv4Addr::new(104, 131, 186, 241)))
        );
    }

    #[rstest]
    fn droplet_without_networks_has_no_address() {
        let json = "{\"id\":1,\"name\":\"mw0\",\"status\":\"new\"}";
        let droplet: Droplet = serde_json::from_str(json).expect("droplet should decode");
        assert_eq!(droplet.public_v4(), None);
    }

    #[rstest]
    fn private_only_networks_yield_no_address() {
        let json = droplet_json(
            "active",
            "{\"v4\":[{\"ip_address\":\"10.128.0.2\",\"type\":\"private\"}]}",
        );
        let droplet: Droplet = serde_json::from_str(&json).expect("droplet should decode");
        assert_eq!(droplet.public_v4(), None);
    }

    #[rstest]
    fn create_body_carries_network_flags() {
        let spec = InstanceSpec::builder()
            .name("mw0")
            .region("fra1")
            .image("debian-7-0-x64")
            .size("2gb")
            .ssh_keys(vec![42])
            .build()
            .expect("spec should build");
        let body = CreateDropletBody::from(&spec);
        let rendered = serde_json::to_string(&body).expect("body should serialise");
        assert!(rendered.contains("\"ipv6\":false"));
        assert!(rendered.contains("\"private_networking\":true"));
        assert!(rendered.contains("\"backups\":false"));
        assert!(rendered.contains("\"ssh_keys\":[42]"));
    }

    #[rstest]
    #[case(DoError::Transport(String::from("connection reset")), true)]
    #[case(DoError::Api { status: 404, message: String::new() }, true)]
    #[case(DoError::Api { status: 429, message: String::new() }, true)]
    #[case(DoError::Api { status: 503, message: String::new() }, true)]
    #[case(DoError::Api { status: 401, message: String::new() }, false)]
    #[case(DoError::Api { status: 422, message: String::new() }, false)]
    #[case(DoError::Config(String::from("bad")), false)]
    fn transient_classification(#[case] err: DoError, #[case] expected: bool) {
        assert_eq!(err.is_transient(), expected);
    }

    #[rstest]
    fn new_rejects_blank_token() {
        let config = DoConfig {
            api_url: String::from("https://api.digitalocean.com"),
            request_timeout_secs: 30,
        };
        let err = DoApi::new("  ", &config).expect_err("blank token must fail");
        assert!(matches!(err, DoError::Config(_)));
    }

    #[rstest]
    fn endpoint_trims_trailing_slash() {
        let config = DoConfig {
            api_url: String::from("https://api.digitalocean.com/"),
            request_timeout_secs: 30,
        };
        let api = DoApi::new("token", &config).expect("client should build");
        assert_eq!(
            api.endpoint("/v2/droplets"),
            "https://api.digitalocean.com/v2/droplets"
        );
    }
}
