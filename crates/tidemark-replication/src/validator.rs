//! Remote endpoint validation.
//!
//! Before a replication is trusted, its remote configuration is probed for
//! reachability and authorization by issuing a zero-length write against the
//! remote's write endpoint. The probe honors the remote's
//! `allow_insecure_tls` flag.

use crate::remotes::RemoteHttpConfig;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from probing a remote endpoint.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// The remote rejected the configured credentials.
    #[error("remote endpoint rejected the request with status {status}")]
    Unauthorized {
        /// The HTTP status returned.
        status: u16,
    },
    /// The remote answered with a status the probe does not accept.
    #[error("remote endpoint returned unexpected status {status}")]
    UnexpectedStatus {
        /// The HTTP status returned.
        status: u16,
    },
    /// The remote could not be reached at all.
    #[error("failed to reach remote endpoint")]
    Unreachable(#[from] reqwest::Error),
}

/// Probes a remote endpoint for reachability and authorization.
#[async_trait]
pub trait ReplicationValidator: Send + Sync {
    /// Succeeds when the configuration can write to the remote.
    async fn validate_replication(&self, config: &RemoteHttpConfig) -> Result<(), ValidatorError>;
}

/// Validator that performs a real HTTP probe.
#[derive(Debug, Clone)]
pub struct HttpValidator {
    timeout: Duration,
}

impl HttpValidator {
    /// Creates a validator with the default probe timeout.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Overrides the probe timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicationValidator for HttpValidator {
    async fn validate_replication(&self, config: &RemoteHttpConfig) -> Result<(), ValidatorError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(config.allow_insecure_tls)
            .build()?;

        let url = format!("{}/api/v2/write", config.remote_url.trim_end_matches('/'));
        let response = client
            .post(url)
            .query(&[
                ("org", config.remote_org_id.to_string()),
                ("bucket", config.remote_bucket_id.to_string()),
            ])
            .header(
                AUTHORIZATION,
                format!("Token {}", config.remote_api_token),
            )
            .body(Vec::new())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ValidatorError::Unauthorized {
                status: status.as_u16(),
            });
        }
        Err(ValidatorError::UnexpectedStatus {
            status: status.as_u16(),
        })
    }
}
