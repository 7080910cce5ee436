//! Read-only view of remote endpoint parameters.
//!
//! Remotes themselves are managed by another subsystem; replication only
//! joins their connection parameters with a replication's remote bucket to
//! build the configuration handed to the validator and the shipper.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use tidemark_core::{BucketId, OrgId};

/// Everything needed to talk to one remote write endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHttpConfig {
    /// Base URL of the remote API.
    pub remote_url: String,
    /// API token presented to the remote.
    pub remote_api_token: String,
    /// Organization id on the remote.
    pub remote_org_id: OrgId,
    /// Whether TLS certificate verification may be skipped.
    pub allow_insecure_tls: bool,
    /// Target bucket on the remote.
    pub remote_bucket_id: BucketId,
}

// The token never appears in logs or debug output.
impl fmt::Debug for RemoteHttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHttpConfig")
            .field("remote_url", &self.remote_url)
            .field("remote_api_token", &"<redacted>")
            .field("remote_org_id", &self.remote_org_id)
            .field("allow_insecure_tls", &self.allow_insecure_tls)
            .field("remote_bucket_id", &self.remote_bucket_id)
            .finish()
    }
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for RemoteHttpConfig {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            remote_url: row.try_get("remote_url")?,
            remote_api_token: row.try_get("remote_api_token")?,
            remote_org_id: OrgId::new(row.try_get::<i64, _>("remote_org_id")? as u64),
            allow_insecure_tls: row.try_get("allow_insecure_tls")?,
            remote_bucket_id: BucketId::new(row.try_get::<i64, _>("remote_bucket_id")? as u64),
        })
    }
}
