//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult, is_unique_violation};
use crate::models::*;
use crate::repos::versions::{VERSION_COLUMNS, VERSION_FROM, next_recorded_at};
use crate::repos::{AcquiredLocks, HeadRepo, LockRepo, NamespaceRepo, TransactionRepo, VersionRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{PgConnection, Pool, Postgres};
use std::str::FromStr;
use strata_core::config::PgSslMode;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Transaction-scoped advisory lock key serializing lock acquisition.
const LOCK_ACQUIRE_ADVISORY_KEY: i64 = 0x5354_5241_5441_4c4b;

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// Visibility predicate binding the caller's transaction id as `$param`.
fn visible(param: usize) -> String {
    format!(
        "(COALESCE(o.result, v.transaction_result) IN ('auto_committed', 'committed') OR v.transaction_id = ${param})"
    )
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, e.g. the password
    /// through an environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Shorthand for `from_url`.
    pub async fn new(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        Self::from_url(url, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

const FENCED_HEAD_UPSERT: &str = r#"
    INSERT INTO node_head (inode_id, version_id, fence_token, updated_at)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (inode_id) DO UPDATE SET
        version_id = EXCLUDED.version_id,
        fence_token = EXCLUDED.fence_token,
        updated_at = EXCLUDED.updated_at
    WHERE COALESCE(node_head.fence_token, -1) < EXCLUDED.fence_token
"#;

const UNFENCED_HEAD_UPSERT: &str = r#"
    INSERT INTO node_head (inode_id, version_id, fence_token, updated_at)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (inode_id) DO UPDATE SET
        version_id = EXCLUDED.version_id,
        updated_at = EXCLUDED.updated_at
    WHERE node_head.fence_token IS NULL
"#;

const LOCK_OVERLAP: &str = r#"
    SELECT scope_key FROM path_lock
    WHERE active
      AND lease_expires_at > $1
      AND (scope_key = $2 OR $2 LIKE scope_key || '.%' OR scope_key LIKE $2 || '.%')
    LIMIT 1
"#;

async fn cas_head(
    conn: &mut PgConnection,
    update: HeadUpdate,
    fence_token: Option<i64>,
    now: OffsetDateTime,
) -> MetadataResult<()> {
    let sql = match fence_token {
        Some(_) => FENCED_HEAD_UPSERT,
        None => UNFENCED_HEAD_UPSERT,
    };
    let result = sqlx::query(sql)
        .bind(update.inode_id)
        .bind(update.version_id)
        .bind(fence_token)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(MetadataError::StaleFence {
            inode_id: update.inode_id,
            fence_token,
        });
    }
    Ok(())
}

/// Append a ledger row. Takes a row lock on the inode first so appends to
/// one inode stay in timestamp order.
async fn insert_version(conn: &mut PgConnection, version: &NewVersionRow) -> MetadataResult<i64> {
    sqlx::query("SELECT id FROM inode WHERE id = $1 FOR UPDATE")
        .bind(version.inode_id)
        .execute(&mut *conn)
        .await?;

    let previous: Option<OffsetDateTime> = sqlx::query_scalar(
        "SELECT recorded_at FROM node_version WHERE inode_id = $1 ORDER BY id DESC LIMIT 1",
    )
    .bind(version.inode_id)
    .fetch_optional(&mut *conn)
    .await?;
    let recorded_at = next_recorded_at(previous, OffsetDateTime::now_utc());

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO node_version (
            inode_id, recorded_at, path, operation, principal, correlation_id,
            workflow_id, context_name, transaction_id, transaction_result,
            hash, name, mime_type, size, reason
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING id
        "#,
    )
    .bind(version.inode_id)
    .bind(recorded_at)
    .bind(&version.path)
    .bind(&version.operation)
    .bind(&version.principal)
    .bind(&version.correlation_id)
    .bind(&version.workflow_id)
    .bind(&version.context_name)
    .bind(&version.transaction_id)
    .bind(&version.transaction_result)
    .bind(&version.hash)
    .bind(&version.name)
    .bind(&version.mime_type)
    .bind(version.size)
    .bind(&version.reason)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Fail with `StaleFence` unless HEAD points at `expected`. Callers hold
/// the inode row lock.
async fn ensure_head_at(
    conn: &mut PgConnection,
    inode_id: i64,
    expected: Option<i64>,
    fence_token: Option<i64>,
) -> MetadataResult<()> {
    let current: Option<i64> =
        sqlx::query_scalar("SELECT version_id FROM node_head WHERE inode_id = $1 FOR UPDATE")
            .bind(inode_id)
            .fetch_optional(&mut *conn)
            .await?;
    if current != expected {
        return Err(MetadataError::StaleFence {
            inode_id,
            fence_token,
        });
    }
    Ok(())
}

async fn record_outcome(
    conn: &mut PgConnection,
    transaction_id: &str,
    result: &str,
    now: OffsetDateTime,
) -> MetadataResult<()> {
    let inserted = sqlx::query(
        "INSERT INTO transaction_outcome (transaction_id, result, decided_at) VALUES ($1, $2, $3)",
    )
    .bind(transaction_id)
    .bind(result)
    .bind(now)
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(MetadataError::AlreadyExists(format!(
            "transaction {transaction_id} already decided"
        ))),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl NamespaceRepo for PostgresStore {
    async fn ensure_root_inode(
        &self,
        scope_key: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<InodeRow> {
        sqlx::query(
            "INSERT INTO inode (scope_key, created_at) VALUES ($1, $2) ON CONFLICT (scope_key) DO NOTHING",
        )
        .bind(scope_key)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_inode_by_scope_key(scope_key)
            .await?
            .ok_or_else(|| MetadataError::Internal("root inode vanished".to_string()))
    }

    async fn get_inode(&self, inode_id: i64) -> MetadataResult<Option<InodeRow>> {
        let row = sqlx::query_as::<_, InodeRow>("SELECT * FROM inode WHERE id = $1")
            .bind(inode_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_inode_by_scope_key(&self, scope_key: &str) -> MetadataResult<Option<InodeRow>> {
        let row = sqlx::query_as::<_, InodeRow>("SELECT * FROM inode WHERE scope_key = $1")
            .bind(scope_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_dir_entry(
        &self,
        parent_id: i64,
        name: &str,
    ) -> MetadataResult<Option<DirEntryRow>> {
        let row = sqlx::query_as::<_, DirEntryRow>(
            "SELECT * FROM dir_entry WHERE parent_id = $1 AND name = $2",
        )
        .bind(parent_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_child_inode(
        &self,
        parent_id: i64,
        name: &str,
        scope_key: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<InodeRow> {
        let mut tx = self.pool.begin().await?;

        let parent_depth: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM inode_path_segment WHERE inode_id = $1")
                .bind(parent_id)
                .fetch_one(&mut *tx)
                .await?;
        if parent_depth == 0 {
            let parent_is_child: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM dir_entry WHERE child_id = $1)")
                    .bind(parent_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if parent_is_child {
                return Err(MetadataError::ProjectionMissing(parent_id));
            }
        }

        let inserted = sqlx::query_as::<_, InodeRow>(
            "INSERT INTO inode (scope_key, created_at) VALUES ($1, $2) RETURNING id, scope_key, created_at",
        )
        .bind(scope_key)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;
        let inode = match inserted {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => {
                return Err(MetadataError::AlreadyExists(format!(
                    "inode with scope key {scope_key}"
                )));
            }
            Err(err) => return Err(err.into()),
        };

        let inserted: Result<i64, sqlx::Error> = sqlx::query_scalar(
            "INSERT INTO dir_entry (parent_id, name, child_id, created_at) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(parent_id)
        .bind(name)
        .bind(inode.id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;
        let dir_entry_id = match inserted {
            Ok(id) => id,
            Err(err) if is_unique_violation(&err) => {
                return Err(MetadataError::AlreadyExists(format!(
                    "dir entry {name} under inode {parent_id}"
                )));
            }
            Err(err) => return Err(err.into()),
        };

        sqlx::query(
            r#"
            INSERT INTO inode_path_segment (inode_id, ord, dir_entry_id)
            SELECT $1, ord, dir_entry_id FROM inode_path_segment WHERE inode_id = $2
            "#,
        )
        .bind(inode.id)
        .bind(parent_id)
        .execute(&mut *tx)
        .await?;

        let ord = i32::try_from(parent_depth)
            .map_err(|_| MetadataError::Internal(format!("inode {parent_id} is too deep")))?;
        sqlx::query(
            "INSERT INTO inode_path_segment (inode_id, ord, dir_entry_id) VALUES ($1, $2, $3)",
        )
        .bind(inode.id)
        .bind(ord)
        .bind(dir_entry_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inode)
    }

    async fn get_path_segments(&self, inode_id: i64) -> MetadataResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT d.name FROM inode_path_segment s
            JOIN dir_entry d ON d.id = s.dir_entry_id
            WHERE s.inode_id = $1
            ORDER BY s.ord
            "#,
        )
        .bind(inode_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn list_dir_entries(&self, parent_id: i64) -> MetadataResult<Vec<DirEntryRow>> {
        let rows = sqlx::query_as::<_, DirEntryRow>(
            "SELECT * FROM dir_entry WHERE parent_id = $1 ORDER BY name",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl VersionRepo for PostgresStore {
    async fn append_version(&self, version: &NewVersionRow) -> MetadataResult<VersionRow> {
        let mut tx = self.pool.begin().await?;
        let id = insert_version(&mut tx, version).await?;
        tx.commit().await?;

        self.get_version(id)
            .await?
            .ok_or_else(|| MetadataError::Internal(format!("version {id} vanished")))
    }

    async fn get_version(&self, version_id: i64) -> MetadataResult<Option<VersionRow>> {
        let sql = format!("SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.id = $1");
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(version_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_versions(
        &self,
        inode_id: i64,
        visible_to: Option<&str>,
    ) -> MetadataResult<Vec<VersionRow>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.inode_id = $1 AND {} ORDER BY v.id",
            visible(2)
        );
        let rows = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(inode_id)
            .bind(visible_to)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_version_by_hash(
        &self,
        inode_id: i64,
        hash: &str,
        visible_to: Option<&str>,
    ) -> MetadataResult<Option<VersionRow>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.inode_id = $1 AND v.hash = $2 AND {} ORDER BY v.id DESC LIMIT 1",
            visible(3)
        );
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(inode_id)
            .bind(hash)
            .bind(visible_to)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn latest_in_transaction(
        &self,
        inode_id: i64,
        transaction_id: &str,
    ) -> MetadataResult<Option<VersionRow>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.inode_id = $1 AND v.transaction_id = $2 ORDER BY v.id DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(inode_id)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn pending_in_transaction(
        &self,
        transaction_id: &str,
    ) -> MetadataResult<Vec<VersionRow>> {
        let sql = format!(
            r#"SELECT {VERSION_COLUMNS} {VERSION_FROM}
            WHERE v.id IN (
                SELECT MAX(id) FROM node_version WHERE transaction_id = $1 GROUP BY inode_id
            )
            ORDER BY v.inode_id"#
        );
        let rows = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_by_hash(&self, hash: &str) -> MetadataResult<Option<VersionRow>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.hash = $1 AND {} ORDER BY v.id DESC LIMIT 1",
            visible(2)
        );
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(hash)
            .bind(None::<&str>)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn children_head_versions(&self, parent_id: i64) -> MetadataResult<Vec<VersionRow>> {
        let sql = format!(
            r#"SELECT {VERSION_COLUMNS}
            FROM dir_entry d
            JOIN node_head h ON h.inode_id = d.child_id
            JOIN node_version v ON v.id = h.version_id
            LEFT JOIN transaction_outcome o ON o.transaction_id = v.transaction_id
            WHERE d.parent_id = $1
            ORDER BY d.name"#
        );
        let rows = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl HeadRepo for PostgresStore {
    async fn get_head(&self, inode_id: i64) -> MetadataResult<Option<HeadRow>> {
        let row = sqlx::query_as::<_, HeadRow>("SELECT * FROM node_head WHERE inode_id = $1")
            .bind(inode_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_head_version(&self, inode_id: i64) -> MetadataResult<Option<VersionRow>> {
        let sql = format!(
            r#"SELECT {VERSION_COLUMNS}
            FROM node_head h
            JOIN node_version v ON v.id = h.version_id
            LEFT JOIN transaction_outcome o ON o.transaction_id = v.transaction_id
            WHERE h.inode_id = $1"#
        );
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(inode_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn publish_head(
        &self,
        update: HeadUpdate,
        fence_token: Option<i64>,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        let mut conn = self.pool.acquire().await?;
        cas_head(&mut conn, update, fence_token, now).await
    }

    async fn publish_heads(
        &self,
        updates: &[HeadUpdate],
        fence_token: Option<i64>,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        for update in updates {
            cas_head(&mut tx, *update, fence_token, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_and_publish(
        &self,
        version: &NewVersionRow,
        expected_head: Option<i64>,
        fence_token: Option<i64>,
        now: OffsetDateTime,
    ) -> MetadataResult<VersionRow> {
        let mut tx = self.pool.begin().await?;
        let id = insert_version(&mut tx, version).await?;
        ensure_head_at(&mut tx, version.inode_id, expected_head, fence_token).await?;
        let update = HeadUpdate {
            inode_id: version.inode_id,
            version_id: id,
        };
        cas_head(&mut tx, update, fence_token, now).await?;
        tx.commit().await?;

        self.get_version(id)
            .await?
            .ok_or_else(|| MetadataError::Internal(format!("version {id} vanished")))
    }
}

#[async_trait]
impl TransactionRepo for PostgresStore {
    async fn get_transaction_outcome(
        &self,
        transaction_id: &str,
    ) -> MetadataResult<Option<TransactionOutcomeRow>> {
        let row = sqlx::query_as::<_, TransactionOutcomeRow>(
            "SELECT * FROM transaction_outcome WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn commit_transaction(
        &self,
        transaction_id: &str,
        updates: &[HeadUpdate],
        fence_token: Option<i64>,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        for update in updates {
            cas_head(&mut tx, *update, fence_token, now).await?;
        }
        record_outcome(&mut tx, transaction_id, "committed", now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback_transaction(
        &self,
        transaction_id: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        let mut conn = self.pool.acquire().await?;
        record_outcome(&mut conn, transaction_id, "rolled_back", now).await
    }
}

#[async_trait]
impl LockRepo for PostgresStore {
    async fn next_fence_token(&self) -> MetadataResult<i64> {
        let token: i64 = sqlx::query_scalar("SELECT nextval('fence_token_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(token)
    }

    async fn acquire_lock_group(
        &self,
        owner_id: &str,
        scope_keys: &[String],
        now: OffsetDateTime,
        lease_expires_at: OffsetDateTime,
    ) -> MetadataResult<AcquiredLocks> {
        if scope_keys.is_empty() {
            return Err(MetadataError::Constraint(
                "lock group needs at least one scope key".to_string(),
            ));
        }
        let mut keys: Vec<&str> = Vec::with_capacity(scope_keys.len());
        for key in scope_keys {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }

        let mut tx = self.pool.begin().await?;

        // Overlap check and insert must not interleave with another acquirer.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(LOCK_ACQUIRE_ADVISORY_KEY)
            .execute(&mut *tx)
            .await?;

        for key in &keys {
            let held: Option<String> = sqlx::query_scalar(LOCK_OVERLAP)
                .bind(now)
                .bind(*key)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(held) = held {
                tracing::debug!(requested = %key, held = %held, "lock overlaps an active grant");
                return Err(MetadataError::LockConflict {
                    scope_key: key.to_string(),
                });
            }
        }

        let fence_token: i64 = sqlx::query_scalar("SELECT nextval('fence_token_seq')")
            .fetch_one(&mut *tx)
            .await?;

        let group = LockGroupRow {
            lock_group_id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            fence_token,
            active: true,
            acquired_at: now,
            lease_expires_at,
            released_at: None,
        };
        sqlx::query(
            r#"
            INSERT INTO lock_group (
                lock_group_id, owner_id, fence_token, active, acquired_at,
                lease_expires_at, released_at
            ) VALUES ($1, $2, $3, TRUE, $4, $5, NULL)
            "#,
        )
        .bind(group.lock_group_id)
        .bind(&group.owner_id)
        .bind(group.fence_token)
        .bind(group.acquired_at)
        .bind(group.lease_expires_at)
        .execute(&mut *tx)
        .await?;

        let mut paths = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = PathLockRow {
                id: Uuid::new_v4(),
                lock_group_id: group.lock_group_id,
                owner_id: owner_id.to_string(),
                scope_key: key.to_string(),
                active: true,
                acquired_at: now,
                lease_expires_at,
                released_at: None,
            };
            sqlx::query(
                r#"
                INSERT INTO path_lock (
                    id, lock_group_id, owner_id, scope_key, active, acquired_at,
                    lease_expires_at, released_at
                ) VALUES ($1, $2, $3, $4, TRUE, $5, $6, NULL)
                "#,
            )
            .bind(lock.id)
            .bind(lock.lock_group_id)
            .bind(&lock.owner_id)
            .bind(&lock.scope_key)
            .bind(lock.acquired_at)
            .bind(lock.lease_expires_at)
            .execute(&mut *tx)
            .await?;
            paths.push(lock);
        }

        tx.commit().await?;
        Ok(AcquiredLocks { group, paths })
    }

    async fn release_lock_group(
        &self,
        lock_group_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE lock_group SET active = FALSE, released_at = $1 WHERE lock_group_id = $2 AND active",
        )
        .bind(now)
        .bind(lock_group_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE path_lock SET active = FALSE, released_at = $1 WHERE lock_group_id = $2 AND active",
        )
        .bind(now)
        .bind(lock_group_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_lock_group(&self, lock_group_id: Uuid) -> MetadataResult<Option<LockGroupRow>> {
        let row =
            sqlx::query_as::<_, LockGroupRow>("SELECT * FROM lock_group WHERE lock_group_id = $1")
                .bind(lock_group_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn list_active_locks(&self, now: OffsetDateTime) -> MetadataResult<Vec<PathLockRow>> {
        let rows = sqlx::query_as::<_, PathLockRow>(
            "SELECT * FROM path_lock WHERE active AND lease_expires_at > $1 ORDER BY scope_key",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn reap_expired_locks(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE path_lock SET active = FALSE, released_at = $1 WHERE active AND lease_expires_at <= $1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query(
            "UPDATE lock_group SET active = FALSE, released_at = $1 WHERE active AND lease_expires_at <= $1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn find_active_advisory_locks(
        &self,
        virtual_transaction: Option<&str>,
    ) -> MetadataResult<Vec<AdvisoryLockRow>> {
        let rows = sqlx::query_as::<_, AdvisoryLockRow>(
            r#"
            SELECT pid, virtualtransaction AS virtual_transaction, mode, granted,
                   classid::bigint AS classid, objid::bigint AS objid
            FROM pg_locks
            WHERE locktype = 'advisory'
              AND ($1::text IS NULL OR virtualtransaction = $1)
            ORDER BY pid
            "#,
        )
        .bind(virtual_transaction)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
