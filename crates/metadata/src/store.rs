//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{HeadRepo, LockRepo, NamespaceRepo, TransactionRepo, VersionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    NamespaceRepo + VersionRepo + HeadRepo + TransactionRepo + LockRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store. `query_timeout_secs` bounds how long a
    /// statement waits on a database locked by another process.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(30);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(query_timeout_secs));

        let pool = SqlitePoolOptions::new()
            // One connection serializes writers: lock acquisition and HEAD
            // batches rely on it instead of SELECT ... FOR UPDATE.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::warn!(
            busy_timeout_secs = query_timeout_secs,
            "SQLite serializes writers and advisory-lock introspection is unavailable. \
             Use PostgreSQL for multi-process deployments."
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::error::is_unique_violation;
    use crate::models::*;
    use crate::repos::AcquiredLocks;
    use crate::repos::versions::{VERSION_COLUMNS, VERSION_FROM, next_recorded_at};
    use sqlx::SqliteConnection;
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Visibility predicate; binds the caller's transaction id.
    const VISIBLE: &str = "(COALESCE(o.result, v.transaction_result) IN ('auto_committed', 'committed') OR v.transaction_id = ?)";

    const FENCED_HEAD_UPSERT: &str = r#"
        INSERT INTO node_head (inode_id, version_id, fence_token, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(inode_id) DO UPDATE SET
            version_id = excluded.version_id,
            fence_token = excluded.fence_token,
            updated_at = excluded.updated_at
        WHERE COALESCE(node_head.fence_token, -1) < excluded.fence_token
    "#;

    const UNFENCED_HEAD_UPSERT: &str = r#"
        INSERT INTO node_head (inode_id, version_id, fence_token, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(inode_id) DO UPDATE SET
            version_id = excluded.version_id,
            updated_at = excluded.updated_at
        WHERE node_head.fence_token IS NULL
    "#;

    const LOCK_OVERLAP: &str = r#"
        SELECT scope_key FROM path_lock
        WHERE active = 1
          AND lease_expires_at > ?
          AND (scope_key = ? OR ? LIKE scope_key || '.%' OR scope_key LIKE ? || '.%')
        LIMIT 1
    "#;

    async fn cas_head(
        conn: &mut SqliteConnection,
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

    async fn insert_version(
        conn: &mut SqliteConnection,
        version: &NewVersionRow,
    ) -> MetadataResult<i64> {
        let previous: Option<OffsetDateTime> = sqlx::query_scalar(
            "SELECT recorded_at FROM node_version WHERE inode_id = ? ORDER BY id DESC LIMIT 1",
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
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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

    /// Fail with `StaleFence` unless HEAD points at `expected`.
    async fn ensure_head_at(
        conn: &mut SqliteConnection,
        inode_id: i64,
        expected: Option<i64>,
        fence_token: Option<i64>,
    ) -> MetadataResult<()> {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT version_id FROM node_head WHERE inode_id = ?")
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
        conn: &mut SqliteConnection,
        transaction_id: &str,
        result: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        let inserted = sqlx::query(
            "INSERT INTO transaction_outcome (transaction_id, result, decided_at) VALUES (?, ?, ?)",
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
    impl NamespaceRepo for SqliteStore {
        async fn ensure_root_inode(
            &self,
            scope_key: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<InodeRow> {
            sqlx::query(
                "INSERT INTO inode (scope_key, created_at) VALUES (?, ?) ON CONFLICT(scope_key) DO NOTHING",
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
            let row = sqlx::query_as::<_, InodeRow>("SELECT * FROM inode WHERE id = ?")
                .bind(inode_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_inode_by_scope_key(
            &self,
            scope_key: &str,
        ) -> MetadataResult<Option<InodeRow>> {
            let row = sqlx::query_as::<_, InodeRow>("SELECT * FROM inode WHERE scope_key = ?")
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
                "SELECT * FROM dir_entry WHERE parent_id = ? AND name = ?",
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
                sqlx::query_scalar("SELECT COUNT(*) FROM inode_path_segment WHERE inode_id = ?")
                    .bind(parent_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if parent_depth == 0 {
                let parent_is_child: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM dir_entry WHERE child_id = ?)",
                )
                .bind(parent_id)
                .fetch_one(&mut *tx)
                .await?;
                if parent_is_child {
                    return Err(MetadataError::ProjectionMissing(parent_id));
                }
            }

            let inserted = sqlx::query_as::<_, InodeRow>(
                "INSERT INTO inode (scope_key, created_at) VALUES (?, ?) RETURNING id, scope_key, created_at",
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
                "INSERT INTO dir_entry (parent_id, name, child_id, created_at) VALUES (?, ?, ?, ?) RETURNING id",
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
                SELECT ?, ord, dir_entry_id FROM inode_path_segment WHERE inode_id = ?
                "#,
            )
            .bind(inode.id)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;

            let ord = i32::try_from(parent_depth)
                .map_err(|_| MetadataError::Internal(format!("inode {parent_id} is too deep")))?;
            sqlx::query(
                "INSERT INTO inode_path_segment (inode_id, ord, dir_entry_id) VALUES (?, ?, ?)",
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
                WHERE s.inode_id = ?
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
                "SELECT * FROM dir_entry WHERE parent_id = ? ORDER BY name",
            )
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl VersionRepo for SqliteStore {
        async fn append_version(&self, version: &NewVersionRow) -> MetadataResult<VersionRow> {
            let mut tx = self.pool.begin().await?;
            let id = insert_version(&mut tx, version).await?;
            tx.commit().await?;

            self.get_version(id)
                .await?
                .ok_or_else(|| MetadataError::Internal(format!("version {id} vanished")))
        }

        async fn get_version(&self, version_id: i64) -> MetadataResult<Option<VersionRow>> {
            let sql = format!("SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.id = ?");
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
                "SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.inode_id = ? AND {VISIBLE} ORDER BY v.id"
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
                "SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.inode_id = ? AND v.hash = ? AND {VISIBLE} ORDER BY v.id DESC LIMIT 1"
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
                "SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.inode_id = ? AND v.transaction_id = ? ORDER BY v.id DESC LIMIT 1"
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
                    SELECT MAX(id) FROM node_version WHERE transaction_id = ? GROUP BY inode_id
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
                "SELECT {VERSION_COLUMNS} {VERSION_FROM} WHERE v.hash = ? AND {VISIBLE} ORDER BY v.id DESC LIMIT 1"
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
                WHERE d.parent_id = ?
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
    impl HeadRepo for SqliteStore {
        async fn get_head(&self, inode_id: i64) -> MetadataResult<Option<HeadRow>> {
            let row = sqlx::query_as::<_, HeadRow>("SELECT * FROM node_head WHERE inode_id = ?")
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
                WHERE h.inode_id = ?"#
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
            ensure_head_at(&mut tx, version.inode_id, expected_head, fence_token).await?;
            let id = insert_version(&mut tx, version).await?;
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
    impl TransactionRepo for SqliteStore {
        async fn get_transaction_outcome(
            &self,
            transaction_id: &str,
        ) -> MetadataResult<Option<TransactionOutcomeRow>> {
            let row = sqlx::query_as::<_, TransactionOutcomeRow>(
                "SELECT * FROM transaction_outcome WHERE transaction_id = ?",
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
    impl LockRepo for SqliteStore {
        async fn next_fence_token(&self) -> MetadataResult<i64> {
            let token: i64 = sqlx::query_scalar(
                "UPDATE fence_counter SET value = value + 1 WHERE id = 1 RETURNING value",
            )
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

            for key in &keys {
                let held: Option<String> = sqlx::query_scalar(LOCK_OVERLAP)
                    .bind(now)
                    .bind(*key)
                    .bind(*key)
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

            let fence_token: i64 = sqlx::query_scalar(
                "UPDATE fence_counter SET value = value + 1 WHERE id = 1 RETURNING value",
            )
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
                ) VALUES (?, ?, ?, 1, ?, ?, NULL)
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
                    ) VALUES (?, ?, ?, ?, 1, ?, ?, NULL)
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
                "UPDATE lock_group SET active = 0, released_at = ? WHERE lock_group_id = ? AND active = 1",
            )
            .bind(now)
            .bind(lock_group_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "UPDATE path_lock SET active = 0, released_at = ? WHERE lock_group_id = ? AND active = 1",
            )
            .bind(now)
            .bind(lock_group_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_lock_group(
            &self,
            lock_group_id: Uuid,
        ) -> MetadataResult<Option<LockGroupRow>> {
            let row = sqlx::query_as::<_, LockGroupRow>(
                "SELECT * FROM lock_group WHERE lock_group_id = ?",
            )
            .bind(lock_group_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_active_locks(&self, now: OffsetDateTime) -> MetadataResult<Vec<PathLockRow>> {
            let rows = sqlx::query_as::<_, PathLockRow>(
                "SELECT * FROM path_lock WHERE active = 1 AND lease_expires_at > ? ORDER BY scope_key",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn reap_expired_locks(&self, now: OffsetDateTime) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "UPDATE path_lock SET active = 0, released_at = ? WHERE active = 1 AND lease_expires_at <= ?",
            )
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            let result = sqlx::query(
                "UPDATE lock_group SET active = 0, released_at = ? WHERE active = 1 AND lease_expires_at <= ?",
            )
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(result.rows_affected())
        }

        async fn find_active_advisory_locks(
            &self,
            _virtual_transaction: Option<&str>,
        ) -> MetadataResult<Vec<AdvisoryLockRow>> {
            Ok(Vec::new())
        }
    }
}

impl std::convert::From<std::io::Error> for crate::MetadataError {
    fn from(e: std::io::Error) -> Self {
        crate::MetadataError::Config(e.to_string())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Path hierarchy
CREATE TABLE IF NOT EXISTS inode (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope_key TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_inode_scope_key ON inode(scope_key);

CREATE TABLE IF NOT EXISTS dir_entry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER NOT NULL REFERENCES inode(id),
    name TEXT NOT NULL,
    child_id INTEGER NOT NULL UNIQUE REFERENCES inode(id),
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_dir_entry_parent_name ON dir_entry(parent_id, name);

-- Root-to-inode chain of directory entries
CREATE TABLE IF NOT EXISTS inode_path_segment (
    inode_id INTEGER NOT NULL REFERENCES inode(id),
    ord INTEGER NOT NULL,
    dir_entry_id INTEGER NOT NULL REFERENCES dir_entry(id),
    PRIMARY KEY (inode_id, ord)
);

-- Append-only version ledger
CREATE TABLE IF NOT EXISTS node_version (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    inode_id INTEGER NOT NULL REFERENCES inode(id),
    recorded_at TEXT NOT NULL,
    path TEXT NOT NULL,
    operation TEXT NOT NULL,
    principal TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    context_name TEXT NOT NULL,
    transaction_id TEXT,
    transaction_result TEXT NOT NULL,
    hash TEXT NOT NULL,
    name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    reason TEXT,
    CHECK ((transaction_id IS NULL) = (transaction_result = 'auto_committed'))
);
CREATE INDEX IF NOT EXISTS idx_node_version_inode ON node_version(inode_id, id);
CREATE INDEX IF NOT EXISTS idx_node_version_hash ON node_version(hash);
CREATE INDEX IF NOT EXISTS idx_node_version_transaction ON node_version(transaction_id) WHERE transaction_id IS NOT NULL;

-- Current version per inode
CREATE TABLE IF NOT EXISTS node_head (
    inode_id INTEGER PRIMARY KEY REFERENCES inode(id),
    version_id INTEGER NOT NULL REFERENCES node_version(id),
    fence_token INTEGER,
    updated_at TEXT NOT NULL
);

-- Decided external transactions
CREATE TABLE IF NOT EXISTS transaction_outcome (
    transaction_id TEXT PRIMARY KEY,
    result TEXT NOT NULL,
    decided_at TEXT NOT NULL
);

-- Fence token counter (single row)
CREATE TABLE IF NOT EXISTS fence_counter (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO fence_counter (id, value) VALUES (1, 0);

-- Subtree locks
CREATE TABLE IF NOT EXISTS lock_group (
    lock_group_id BLOB PRIMARY KEY,
    owner_id TEXT NOT NULL,
    fence_token INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    acquired_at TEXT NOT NULL,
    lease_expires_at TEXT NOT NULL,
    released_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_lock_group_active ON lock_group(lease_expires_at) WHERE active = 1;

CREATE TABLE IF NOT EXISTS path_lock (
    id BLOB PRIMARY KEY,
    lock_group_id BLOB NOT NULL REFERENCES lock_group(lock_group_id),
    owner_id TEXT NOT NULL,
    scope_key TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    acquired_at TEXT NOT NULL,
    lease_expires_at TEXT NOT NULL,
    released_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_path_lock_active ON path_lock(scope_key) WHERE active = 1;
CREATE INDEX IF NOT EXISTS idx_path_lock_group ON path_lock(lock_group_id);
"#;
