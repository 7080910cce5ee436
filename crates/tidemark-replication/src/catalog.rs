//! Transactional catalog of replication definitions.
//!
//! Backed by SQLite through `sqlx`, opened in WAL mode with foreign keys
//! enforced. Reads are lock-free (the store provides snapshot isolation per
//! statement); writers are serialized by the service's exclusive lock, not
//! here. Identifiers are stored as the i64 bit-cast of their u64 value.

use crate::remotes::RemoteHttpConfig;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tidemark_core::{BucketId, OrgId, RemoteId, ReplicationId};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS remotes (
    id INTEGER PRIMARY KEY,
    org_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    remote_url TEXT NOT NULL,
    remote_api_token TEXT NOT NULL,
    remote_org_id INTEGER NOT NULL,
    allow_insecure_tls BOOLEAN NOT NULL DEFAULT false,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (org_id, name)
);

CREATE TABLE IF NOT EXISTS replications (
    id INTEGER PRIMARY KEY,
    org_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    remote_id INTEGER NOT NULL REFERENCES remotes (id),
    local_bucket_id INTEGER NOT NULL,
    remote_bucket_id INTEGER NOT NULL,
    max_queue_size_bytes INTEGER NOT NULL,
    drop_non_retryable_data BOOLEAN NOT NULL DEFAULT false,
    latest_response_code INTEGER,
    latest_error_message TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (org_id, name)
);

CREATE INDEX IF NOT EXISTS idx_replications_write_path
    ON replications (org_id, local_bucket_id);
"#;

const REPLICATION_COLUMNS: &str = "id, org_id, name, description, remote_id, local_bucket_id, \
     remote_bucket_id, max_queue_size_bytes, drop_non_retryable_data, latest_response_code, \
     latest_error_message, created_at, updated_at";

fn to_db(id: u64) -> i64 {
    id as i64
}

/// A replication definition as stored in the catalog.
///
/// `current_queue_size_bytes` is derived from the queue manager at read
/// time and never stored; the catalog always returns it as zero and the
/// service splices the live value in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replication {
    /// Immutable identifier.
    pub id: ReplicationId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Name, unique within the organization.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// The remote endpoint written to.
    pub remote_id: RemoteId,
    /// The local bucket being mirrored.
    pub local_bucket_id: BucketId,
    /// The target bucket on the remote.
    pub remote_bucket_id: BucketId,
    /// Soft upper bound on the on-disk queue, in bytes.
    pub max_queue_size_bytes: u64,
    /// Whether the shipper may drop data the remote permanently rejects.
    pub drop_non_retryable_data: bool,
    /// Last HTTP status the shipper observed, if any.
    pub latest_response_code: Option<i32>,
    /// Last error message the shipper observed, if any.
    pub latest_error_message: Option<String>,
    /// Creation timestamp (store-native form).
    pub created_at: String,
    /// Last-update timestamp (store-native form).
    pub updated_at: String,
    /// Bytes currently queued on disk; derived, never stored.
    #[serde(default)]
    pub current_queue_size_bytes: u64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for Replication {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: ReplicationId::new(row.try_get::<i64, _>("id")? as u64),
            org_id: OrgId::new(row.try_get::<i64, _>("org_id")? as u64),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            remote_id: RemoteId::new(row.try_get::<i64, _>("remote_id")? as u64),
            local_bucket_id: BucketId::new(row.try_get::<i64, _>("local_bucket_id")? as u64),
            remote_bucket_id: BucketId::new(row.try_get::<i64, _>("remote_bucket_id")? as u64),
            max_queue_size_bytes: row.try_get::<i64, _>("max_queue_size_bytes")? as u64,
            drop_non_retryable_data: row.try_get("drop_non_retryable_data")?,
            latest_response_code: row.try_get("latest_response_code")?,
            latest_error_message: row.try_get("latest_error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            current_queue_size_bytes: 0,
        })
    }
}

/// Request to create a replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateReplicationRequest {
    /// Owning organization.
    pub org_id: OrgId,
    /// Name, unique within the organization.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// The remote endpoint to write to.
    pub remote_id: RemoteId,
    /// The local bucket to mirror.
    pub local_bucket_id: BucketId,
    /// The target bucket on the remote.
    pub remote_bucket_id: BucketId,
    /// Soft upper bound on the on-disk queue, in bytes.
    pub max_queue_size_bytes: u64,
    /// Whether the shipper may drop data the remote permanently rejects.
    pub drop_non_retryable_data: bool,
}

/// Partial update of a replication; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateReplicationRequest {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New remote endpoint.
    pub remote_id: Option<RemoteId>,
    /// New target bucket on the remote.
    pub remote_bucket_id: Option<BucketId>,
    /// New queue bound in bytes.
    pub max_queue_size_bytes: Option<u64>,
    /// New drop policy.
    pub drop_non_retryable_data: Option<bool>,
}

/// Predicates for listing replications. `org_id` is required; the rest
/// narrow the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationFilter {
    /// Organization to list within.
    pub org_id: OrgId,
    /// Restrict to this name.
    pub name: Option<String>,
    /// Restrict to this remote.
    pub remote_id: Option<RemoteId>,
    /// Restrict to this local bucket.
    pub local_bucket_id: Option<BucketId>,
}

impl ReplicationFilter {
    /// A filter with only the required organization predicate.
    pub fn for_org(org_id: OrgId) -> Self {
        Self {
            org_id,
            name: None,
            remote_id: None,
            local_bucket_id: None,
        }
    }
}

/// SQLite-backed catalog store.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Opens (creating if missing) the catalog database at `path` and runs
    /// the schema migration.
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying pool, shared with the sibling subsystems (remotes,
    /// shipper telemetry) that persist into the same store.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Lists replications matching the filter, ordered by id.
    pub async fn list(&self, filter: &ReplicationFilter) -> Result<Vec<Replication>, sqlx::Error> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {REPLICATION_COLUMNS} FROM replications WHERE org_id = "
        ));
        query.push_bind(to_db(filter.org_id.as_u64()));
        if let Some(name) = &filter.name {
            query.push(" AND name = ").push_bind(name.clone());
        }
        if let Some(remote_id) = filter.remote_id {
            query
                .push(" AND remote_id = ")
                .push_bind(to_db(remote_id.as_u64()));
        }
        if let Some(bucket_id) = filter.local_bucket_id {
            query
                .push(" AND local_bucket_id = ")
                .push_bind(to_db(bucket_id.as_u64()));
        }
        query.push(" ORDER BY id");
        query
            .build_query_as::<Replication>()
            .fetch_all(&self.pool)
            .await
    }

    /// Fetches one replication by id.
    pub async fn get(&self, id: ReplicationId) -> Result<Option<Replication>, sqlx::Error> {
        sqlx::query_as::<_, Replication>(&format!(
            "SELECT {REPLICATION_COLUMNS} FROM replications WHERE id = ?"
        ))
        .bind(to_db(id.as_u64()))
        .fetch_optional(&self.pool)
        .await
    }

    /// Inserts a new replication row, returning it as stored.
    pub async fn insert(
        &self,
        id: ReplicationId,
        request: &CreateReplicationRequest,
    ) -> Result<Replication, sqlx::Error> {
        sqlx::query_as::<_, Replication>(&format!(
            "INSERT INTO replications (id, org_id, name, description, remote_id, \
             local_bucket_id, remote_bucket_id, max_queue_size_bytes, drop_non_retryable_data, \
             created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'), datetime('now')) \
             RETURNING {REPLICATION_COLUMNS}"
        ))
        .bind(to_db(id.as_u64()))
        .bind(to_db(request.org_id.as_u64()))
        .bind(&request.name)
        .bind(&request.description)
        .bind(to_db(request.remote_id.as_u64()))
        .bind(to_db(request.local_bucket_id.as_u64()))
        .bind(to_db(request.remote_bucket_id.as_u64()))
        .bind(to_db(request.max_queue_size_bytes))
        .bind(request.drop_non_retryable_data)
        .fetch_one(&self.pool)
        .await
    }

    /// Applies the non-`None` fields of `request` to a row, bumping
    /// `updated_at`. Returns the updated row, or `None` when no row matched.
    pub async fn update(
        &self,
        id: ReplicationId,
        request: &UpdateReplicationRequest,
    ) -> Result<Option<Replication>, sqlx::Error> {
        let mut query =
            QueryBuilder::<Sqlite>::new("UPDATE replications SET updated_at = datetime('now')");
        if let Some(name) = &request.name {
            query.push(", name = ").push_bind(name.clone());
        }
        if let Some(description) = &request.description {
            query
                .push(", description = ")
                .push_bind(description.clone());
        }
        if let Some(remote_id) = request.remote_id {
            query
                .push(", remote_id = ")
                .push_bind(to_db(remote_id.as_u64()));
        }
        if let Some(bucket_id) = request.remote_bucket_id {
            query
                .push(", remote_bucket_id = ")
                .push_bind(to_db(bucket_id.as_u64()));
        }
        if let Some(max) = request.max_queue_size_bytes {
            query.push(", max_queue_size_bytes = ").push_bind(to_db(max));
        }
        if let Some(drop) = request.drop_non_retryable_data {
            query.push(", drop_non_retryable_data = ").push_bind(drop);
        }
        query
            .push(" WHERE id = ")
            .push_bind(to_db(id.as_u64()))
            .push(format!(" RETURNING {REPLICATION_COLUMNS}"));
        query
            .build_query_as::<Replication>()
            .fetch_optional(&self.pool)
            .await
    }

    /// Deletes one replication. Returns whether a row existed.
    pub async fn delete(&self, id: ReplicationId) -> Result<bool, sqlx::Error> {
        let deleted = sqlx::query("DELETE FROM replications WHERE id = ? RETURNING id")
            .bind(to_db(id.as_u64()))
            .fetch_optional(&self.pool)
            .await?;
        Ok(deleted.is_some())
    }

    /// Deletes every replication of a local bucket, returning the deleted
    /// ids. Zero matches is a success.
    pub async fn delete_by_bucket(
        &self,
        local_bucket_id: BucketId,
    ) -> Result<Vec<ReplicationId>, sqlx::Error> {
        let rows = sqlx::query("DELETE FROM replications WHERE local_bucket_id = ? RETURNING id")
            .bind(to_db(local_bucket_id.as_u64()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok(ReplicationId::new(row.try_get::<i64, _>("id")? as u64)))
            .collect()
    }

    /// Hot-path lookup: ids of every replication bound to `(org, bucket)`.
    pub async fn ids_for_write(
        &self,
        org_id: OrgId,
        local_bucket_id: BucketId,
    ) -> Result<Vec<ReplicationId>, sqlx::Error> {
        let rows =
            sqlx::query("SELECT id FROM replications WHERE org_id = ? AND local_bucket_id = ?")
                .bind(to_db(org_id.as_u64()))
                .bind(to_db(local_bucket_id.as_u64()))
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| Ok(ReplicationId::new(row.try_get::<i64, _>("id")? as u64)))
            .collect()
    }

    /// The `{id → max_queue_size_bytes}` map used for startup
    /// reconciliation.
    pub async fn queue_bounds(&self) -> Result<HashMap<ReplicationId, u64>, sqlx::Error> {
        let rows = sqlx::query("SELECT id, max_queue_size_bytes FROM replications")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok((
                    ReplicationId::new(row.try_get::<i64, _>("id")? as u64),
                    row.try_get::<i64, _>("max_queue_size_bytes")? as u64,
                ))
            })
            .collect()
    }

    /// Builds the HTTP config for a prospective replication from a remote's
    /// stored parameters plus the requested remote bucket. `None` when the
    /// remote does not exist.
    pub async fn remote_http_config(
        &self,
        remote_id: RemoteId,
        remote_bucket_id: BucketId,
    ) -> Result<Option<RemoteHttpConfig>, sqlx::Error> {
        sqlx::query_as::<_, RemoteHttpConfig>(
            "SELECT remote_url, remote_api_token, remote_org_id, allow_insecure_tls, \
             ? AS remote_bucket_id \
             FROM remotes WHERE id = ?",
        )
        .bind(to_db(remote_bucket_id.as_u64()))
        .bind(to_db(remote_id.as_u64()))
        .fetch_optional(&self.pool)
        .await
    }

    /// Builds the HTTP config for an existing replication by joining its
    /// row with its remote. `None` when the replication does not exist.
    pub async fn full_http_config(
        &self,
        id: ReplicationId,
    ) -> Result<Option<RemoteHttpConfig>, sqlx::Error> {
        sqlx::query_as::<_, RemoteHttpConfig>(
            "SELECT c.remote_url, c.remote_api_token, c.remote_org_id, c.allow_insecure_tls, \
             r.remote_bucket_id \
             FROM replications r INNER JOIN remotes c ON r.remote_id = c.id \
             WHERE r.id = ?",
        )
        .bind(to_db(id.as_u64()))
        .fetch_optional(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{is_foreign_key_violation, is_unique_violation};
    use tempfile::TempDir;

    const ORG: OrgId = OrgId::new(0x10);
    const BUCKET: BucketId = BucketId::new(0x20);
    const REMOTE: RemoteId = RemoteId::new(0x30);
    const REMOTE_BUCKET: BucketId = BucketId::new(0x40);

    async fn open_catalog(tmp: &TempDir) -> Catalog {
        Catalog::open(&tmp.path().join("catalog.db")).await.unwrap()
    }

    async fn seed_remote(catalog: &Catalog, id: RemoteId) {
        sqlx::query(
            "INSERT INTO remotes (id, org_id, name, remote_url, remote_api_token, \
             remote_org_id, allow_insecure_tls) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.as_u64() as i64)
        .bind(ORG.as_u64() as i64)
        .bind(format!("remote-{id}"))
        .bind("https://remote.example")
        .bind("remote-token")
        .bind(0x99i64)
        .bind(false)
        .execute(catalog.pool())
        .await
        .unwrap();
    }

    fn create_request(name: &str) -> CreateReplicationRequest {
        CreateReplicationRequest {
            org_id: ORG,
            name: name.to_string(),
            description: Some("mirror".to_string()),
            remote_id: REMOTE,
            local_bucket_id: BUCKET,
            remote_bucket_id: REMOTE_BUCKET,
            max_queue_size_bytes: 1 << 30,
            drop_non_retryable_data: false,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;

        let id = ReplicationId::new(1);
        let inserted = catalog.insert(id, &create_request("r1")).await.unwrap();
        assert_eq!(inserted.id, id);
        assert_eq!(inserted.name, "r1");
        assert_eq!(inserted.max_queue_size_bytes, 1 << 30);
        assert!(!inserted.created_at.is_empty());

        let fetched = catalog.get(id).await.unwrap().unwrap();
        assert_eq!(fetched, inserted);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        assert!(catalog.get(ReplicationId::new(404)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_unknown_remote_is_fk_violation() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;

        let err = catalog
            .insert(ReplicationId::new(1), &create_request("r1"))
            .await
            .unwrap_err();
        assert!(is_foreign_key_violation(&err));

        assert!(catalog.get(ReplicationId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_unique_violation() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;

        catalog
            .insert(ReplicationId::new(1), &create_request("same"))
            .await
            .unwrap();
        let err = catalog
            .insert(ReplicationId::new(2), &create_request("same"))
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;
        let other_remote = RemoteId::new(0x31);
        seed_remote(&catalog, other_remote).await;

        catalog
            .insert(ReplicationId::new(1), &create_request("alpha"))
            .await
            .unwrap();
        let mut beta = create_request("beta");
        beta.remote_id = other_remote;
        beta.local_bucket_id = BucketId::new(0x21);
        catalog.insert(ReplicationId::new(2), &beta).await.unwrap();

        let all = catalog.list(&ReplicationFilter::for_org(ORG)).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha");

        let by_name = catalog
            .list(&ReplicationFilter {
                name: Some("beta".to_string()),
                ..ReplicationFilter::for_org(ORG)
            })
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, ReplicationId::new(2));

        let by_remote = catalog
            .list(&ReplicationFilter {
                remote_id: Some(REMOTE),
                ..ReplicationFilter::for_org(ORG)
            })
            .await
            .unwrap();
        assert_eq!(by_remote.len(), 1);
        assert_eq!(by_remote[0].id, ReplicationId::new(1));

        let by_bucket = catalog
            .list(&ReplicationFilter {
                local_bucket_id: Some(BucketId::new(0x21)),
                ..ReplicationFilter::for_org(ORG)
            })
            .await
            .unwrap();
        assert_eq!(by_bucket.len(), 1);
        assert_eq!(by_bucket[0].id, ReplicationId::new(2));

        let other_org = catalog
            .list(&ReplicationFilter::for_org(OrgId::new(0x11)))
            .await
            .unwrap();
        assert!(other_org.is_empty());
    }

    #[tokio::test]
    async fn test_partial_update_touches_only_named_fields() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;

        let id = ReplicationId::new(1);
        let original = catalog.insert(id, &create_request("r1")).await.unwrap();

        let updated = catalog
            .update(
                id,
                &UpdateReplicationRequest {
                    name: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.description, original.description);
        assert_eq!(updated.max_queue_size_bytes, original.max_queue_size_bytes);
        assert_eq!(updated.remote_id, original.remote_id);
    }

    #[tokio::test]
    async fn test_update_missing_row_returns_none() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        let updated = catalog
            .update(ReplicationId::new(404), &UpdateReplicationRequest::default())
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_update_to_unknown_remote_is_fk_violation() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;
        let id = ReplicationId::new(1);
        catalog.insert(id, &create_request("r1")).await.unwrap();

        let err = catalog
            .update(
                id,
                &UpdateReplicationRequest {
                    remote_id: Some(RemoteId::new(0xdead)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(is_foreign_key_violation(&err));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;
        let id = ReplicationId::new(1);
        catalog.insert(id, &create_request("r1")).await.unwrap();

        assert!(catalog.delete(id).await.unwrap());
        assert!(!catalog.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_by_bucket_returns_ids() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;

        catalog
            .insert(ReplicationId::new(1), &create_request("a"))
            .await
            .unwrap();
        catalog
            .insert(ReplicationId::new(2), &create_request("b"))
            .await
            .unwrap();
        let mut elsewhere = create_request("c");
        elsewhere.local_bucket_id = BucketId::new(0x21);
        catalog
            .insert(ReplicationId::new(3), &elsewhere)
            .await
            .unwrap();

        let mut deleted = catalog.delete_by_bucket(BUCKET).await.unwrap();
        deleted.sort();
        assert_eq!(deleted, vec![ReplicationId::new(1), ReplicationId::new(2)]);
        assert!(catalog.get(ReplicationId::new(3)).await.unwrap().is_some());

        let none = catalog.delete_by_bucket(BucketId::new(0x99)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_ids_for_write_matches_org_and_bucket() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;

        catalog
            .insert(ReplicationId::new(1), &create_request("a"))
            .await
            .unwrap();
        let mut elsewhere = create_request("b");
        elsewhere.local_bucket_id = BucketId::new(0x21);
        catalog
            .insert(ReplicationId::new(2), &elsewhere)
            .await
            .unwrap();

        let ids = catalog.ids_for_write(ORG, BUCKET).await.unwrap();
        assert_eq!(ids, vec![ReplicationId::new(1)]);

        let none = catalog.ids_for_write(OrgId::new(0x11), BUCKET).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_queue_bounds_map() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;

        catalog
            .insert(ReplicationId::new(1), &create_request("a"))
            .await
            .unwrap();
        let mut bigger = create_request("b");
        bigger.max_queue_size_bytes = 1 << 31;
        catalog
            .insert(ReplicationId::new(2), &bigger)
            .await
            .unwrap();

        let bounds = catalog.queue_bounds().await.unwrap();
        assert_eq!(bounds.len(), 2);
        assert_eq!(bounds[&ReplicationId::new(1)], 1 << 30);
        assert_eq!(bounds[&ReplicationId::new(2)], 1 << 31);
    }

    #[tokio::test]
    async fn test_remote_http_config_lookup() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;

        let config = catalog
            .remote_http_config(REMOTE, REMOTE_BUCKET)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.remote_url, "https://remote.example");
        assert_eq!(config.remote_api_token, "remote-token");
        assert_eq!(config.remote_org_id, OrgId::new(0x99));
        assert_eq!(config.remote_bucket_id, REMOTE_BUCKET);

        let missing = catalog
            .remote_http_config(RemoteId::new(0xdead), REMOTE_BUCKET)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_full_http_config_joins_replication_with_remote() {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        seed_remote(&catalog, REMOTE).await;
        let id = ReplicationId::new(1);
        catalog.insert(id, &create_request("r1")).await.unwrap();

        let config = catalog.full_http_config(id).await.unwrap().unwrap();
        assert_eq!(config.remote_bucket_id, REMOTE_BUCKET);
        assert_eq!(config.remote_url, "https://remote.example");

        let missing = catalog
            .full_http_config(ReplicationId::new(404))
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
