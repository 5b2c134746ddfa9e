//! Postgres backend.
//!
//! Nodes are rows keyed by path. Watches ride on `LISTEN`/`NOTIFY`:
//! creating or deleting a node notifies `coordination_children` with the
//! parent path, changing node data notifies `coordination_data` with the
//! node path. Locks are session advisory locks held on a dedicated
//! connection.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgListener, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Connection;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::path::{self, ROOT};
use crate::{
    content_digest, Backend, ChildrenWatch, DataWatch, LockGuard, PutOptions, PutOutcome,
    StoreError, StoreResult,
};

const CHILDREN_CHANNEL: &str = "coordination_children";
const DATA_CHANNEL: &str = "coordination_data";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS coordination_nodes (
    path        TEXT PRIMARY KEY,
    parent      TEXT NOT NULL,
    data        BYTEA NOT NULL DEFAULT ''::bytea,
    digest      TEXT NOT NULL DEFAULT '',
    acl         JSONB NOT NULL DEFAULT '[]'::jsonb,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_coordination_nodes_parent
    ON coordination_nodes (parent);

CREATE TABLE IF NOT EXISTS coordination_sequences (
    parent      TEXT PRIMARY KEY,
    next_seq    BIGINT NOT NULL DEFAULT 0
);
"#;

/// Postgres backend configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,

    /// How often a held lock's connection is probed.
    pub lock_keepalive: Duration,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/treadmill".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            lock_keepalive: Duration::from_secs(5),
        }
    }
}

impl PgConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/treadmill".to_string());

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..Default::default()
        }
    }
}

/// [`Backend`] stored in Postgres.
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
    lock_keepalive: Duration,
}

impl PgBackend {
    /// Connects and creates the schema if needed.
    pub async fn connect(config: &PgConfig) -> StoreResult<Self> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await?;

        let backend = Self {
            pool,
            lock_keepalive: config.lock_keepalive,
        };
        backend.init_schema().await?;

        info!("Database connection pool established");
        Ok(backend)
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

async fn notify(conn: &mut PgConnection, channel: &str, payload: &str) -> StoreResult<()> {
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(channel)
        .bind(payload)
        .execute(conn)
        .await?;
    Ok(())
}

/// Creates `path` and its ancestors. Returns true if `path` was created.
async fn create_path(conn: &mut PgConnection, path: &str) -> StoreResult<bool> {
    if path == ROOT {
        return Ok(false);
    }
    let empty_digest = content_digest(&[]);
    let mut created = false;
    for node in path::ancestors(path).into_iter().chain([path]) {
        let parent = path::parent(node).unwrap_or(ROOT);
        let result = sqlx::query(
            r#"
            INSERT INTO coordination_nodes (path, parent, digest)
            VALUES ($1, $2, $3)
            ON CONFLICT (path) DO NOTHING
            "#,
        )
        .bind(node)
        .bind(parent)
        .bind(&empty_digest)
        .execute(&mut *conn)
        .await?;
        created = result.rows_affected() > 0;
        if created {
            notify(conn, CHILDREN_CHANNEL, parent).await?;
        }
    }
    Ok(created)
}

async fn list_children(pool: &PgPool, path: &str) -> StoreResult<Vec<String>> {
    let paths: Vec<String> = sqlx::query_scalar(
        "SELECT path FROM coordination_nodes WHERE parent = $1 ORDER BY path",
    )
    .bind(path)
    .fetch_all(pool)
    .await?;
    Ok(paths
        .iter()
        .map(|p| path::basename(p).to_string())
        .collect())
}

async fn get_data(pool: &PgPool, path: &str) -> StoreResult<Option<Vec<u8>>> {
    if path == ROOT {
        return Ok(Some(Vec::new()));
    }
    let data: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT data FROM coordination_nodes WHERE path = $1")
            .bind(path)
            .fetch_optional(pool)
            .await?;
    Ok(data)
}

#[async_trait]
impl Backend for PgBackend {
    async fn ensure_exists(&self, path: &str) -> StoreResult<()> {
        path::validate(path)?;
        let mut tx = self.pool.begin().await?;
        create_path(&mut tx, path).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        path::validate(path)?;
        if path == ROOT {
            return Ok(true);
        }
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM coordination_nodes WHERE path = $1)")
                .bind(path)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        path::validate(path)?;
        get_data(&self.pool, path).await
    }

    async fn put(&self, path: &str, data: Vec<u8>, opts: PutOptions) -> StoreResult<PutOutcome> {
        path::validate(path)?;
        if path == ROOT {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let parent = path::parent(path).unwrap_or(ROOT).to_string();
        let mut tx = self.pool.begin().await?;

        let path = if opts.sequence {
            let seq: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO coordination_sequences (parent, next_seq)
                VALUES ($1, 1)
                ON CONFLICT (parent)
                DO UPDATE SET next_seq = coordination_sequences.next_seq + 1
                RETURNING next_seq - 1
                "#,
            )
            .bind(&parent)
            .fetch_one(&mut *tx)
            .await?;
            path::join(&parent, &format!("{}{seq:010}", path::basename(path)))
        } else {
            path.to_string()
        };

        let digest = content_digest(&data);
        if opts.check_content {
            let current: Option<String> = sqlx::query_scalar(
                "SELECT digest FROM coordination_nodes WHERE path = $1 FOR UPDATE",
            )
            .bind(&path)
            .fetch_optional(&mut *tx)
            .await?;
            if current.as_deref() == Some(digest.as_str()) {
                tx.commit().await?;
                return Ok(PutOutcome {
                    path,
                    changed: false,
                });
            }
        }

        create_path(&mut tx, &parent).await?;
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO coordination_nodes (path, parent, data, digest, acl)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (path) DO UPDATE
            SET data = EXCLUDED.data,
                digest = EXCLUDED.digest,
                acl = EXCLUDED.acl,
                updated_at = now()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&path)
        .bind(&parent)
        .bind(&data)
        .bind(&digest)
        .bind(Json(&opts.acl))
        .fetch_one(&mut *tx)
        .await?;

        if inserted {
            notify(&mut tx, CHILDREN_CHANNEL, &parent).await?;
        }
        notify(&mut tx, DATA_CHANNEL, &path).await?;
        tx.commit().await?;

        debug!(path = %path, inserted, "Node written");
        Ok(PutOutcome {
            path,
            changed: true,
        })
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        path::validate(path)?;
        if path == ROOT {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let mut tx = self.pool.begin().await?;
        let removed: Vec<(String, String)> = sqlx::query_as(
            r#"
            DELETE FROM coordination_nodes
            WHERE path = $1 OR left(path, length($2)) = $2
            RETURNING path, parent
            "#,
        )
        .bind(path)
        .bind(format!("{path}/"))
        .fetch_all(&mut *tx)
        .await?;

        let mut parents: Vec<&str> = removed.iter().map(|(_, parent)| parent.as_str()).collect();
        parents.sort_unstable();
        parents.dedup();
        for parent in parents {
            notify(&mut tx, CHILDREN_CHANNEL, parent).await?;
        }
        for (removed_path, _) in &removed {
            notify(&mut tx, DATA_CHANNEL, removed_path).await?;
        }
        tx.commit().await?;

        Ok(removed.iter().any(|(p, _)| p == path))
    }

    async fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        path::validate(path)?;
        list_children(&self.pool, path).await
    }

    async fn watch_children(&self, path: &str) -> StoreResult<ChildrenWatch> {
        path::validate(path)?;
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHILDREN_CHANNEL).await?;
        let initial = list_children(&self.pool, path).await?;

        let (tx, rx) = mpsc::channel(1);
        let pool = self.pool.clone();
        let watched = path.to_string();
        tokio::spawn(async move {
            if tx.send(initial).await.is_err() {
                return;
            }
            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) if notification.payload() == watched => {
                        match list_children(&pool, &watched).await {
                            Ok(children) => {
                                if tx.send(children).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(path = %watched, error = %e, "Failed to list children");
                                break;
                            }
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!(path = %watched, "Listener connection lost, closing watch");
                        break;
                    }
                    Err(e) => {
                        warn!(path = %watched, error = %e, "Listener failed, closing watch");
                        break;
                    }
                }
            }
        });
        Ok(ChildrenWatch::new(path, rx))
    }

    async fn watch_data(&self, path: &str) -> StoreResult<DataWatch> {
        path::validate(path)?;
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(DATA_CHANNEL).await?;
        let initial = get_data(&self.pool, path).await?;

        let (tx, rx) = mpsc::channel(1);
        let pool = self.pool.clone();
        let watched = path.to_string();
        tokio::spawn(async move {
            if tx.send(initial).await.is_err() {
                return;
            }
            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) if notification.payload() == watched => {
                        match get_data(&pool, &watched).await {
                            Ok(data) => {
                                if tx.send(data).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(path = %watched, error = %e, "Failed to read node");
                                break;
                            }
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!(path = %watched, "Listener connection lost, closing watch");
                        break;
                    }
                    Err(e) => {
                        warn!(path = %watched, error = %e, "Listener failed, closing watch");
                        break;
                    }
                }
            }
        });
        Ok(DataWatch::new(path, rx))
    }

    async fn lock(&self, path: &str, identity: &str) -> StoreResult<LockGuard> {
        path::validate(path)?;
        let mut conn = self.pool.acquire().await?.detach();
        info!(path = %path, identity = %identity, "Waiting for lock");
        sqlx::query("SELECT pg_advisory_lock(hashtextextended($1, 0))")
            .bind(path)
            .execute(&mut conn)
            .await?;
        info!(path = %path, identity = %identity, "Lock acquired");

        let (lost_tx, lost_rx) = watch::channel(false);
        let (release_tx, mut release_rx) = oneshot::channel::<()>();
        let keepalive = self.lock_keepalive;
        let lock_path = path.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keepalive);
            loop {
                tokio::select! {
                    _ = &mut release_rx => {
                        let _ = sqlx::query("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                            .bind(&lock_path)
                            .execute(&mut conn)
                            .await;
                        let _ = conn.close().await;
                        debug!(path = %lock_path, "Lock released");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = sqlx::query("SELECT 1").execute(&mut conn).await {
                            warn!(path = %lock_path, error = %e, "Lock connection lost");
                            lost_tx.send_replace(true);
                            break;
                        }
                    }
                }
            }
        });

        Ok(LockGuard::new(path, identity, lost_rx, move || {
            let _ = release_tx.send(());
        }))
    }
}
