use std::collections::BTreeSet;
use std::path::Path;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{ConnectOptions, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{error, info, warn};

use crate::live::ChangeBus;
use crate::repo::Table;
use crate::{migrate, AppError, AppResult};

pub async fn open_sqlite_pool(db_path: &Path) -> AppResult<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            error!(
                target: "minet",
                error = %e,
                event = "data_dir_create_failed",
                path = %parent.display()
            );
            AppError::from(e).with_context("path", parent.display().to_string())
        })?;
    }
    info!(target: "minet", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(std::time::Duration::from_millis(5000))
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(opts)
        .await?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

/// Single-connection in-memory pool. The connection is never recycled, since
/// closing it would drop the database.
pub async fn open_memory_pool() -> AppResult<SqlitePool> {
    let opts = SqliteConnectOptions::new()
        .in_memory(true)
        .log_statements(log::LevelFilter::Off);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

async fn log_effective_pragmas(pool: &SqlitePool) {
    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let sync: (i64,) = sqlx::query_as("PRAGMA synchronous;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    let busy: (i64,) = sqlx::query_as("PRAGMA busy_timeout;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "minet",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        synchronous = %sync.0,
        busy_timeout_ms = %busy.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "minet",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Handle to the entity store: the pool plus the change bus that drives
/// live queries. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    bus: ChangeBus,
}

impl Store {
    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn open(db_path: &Path) -> AppResult<Self> {
        let pool = open_sqlite_pool(db_path).await?;
        Self::from_pool(pool).await
    }

    pub async fn in_memory() -> AppResult<Self> {
        let pool = open_memory_pool().await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> AppResult<Self> {
        migrate::apply_migrations(&pool).await?;
        Ok(Self {
            pool,
            bus: ChangeBus::new(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Starts a write transaction. Nothing is published to observers until
    /// the transaction commits.
    pub async fn begin(&self, op: &'static str) -> AppResult<WriteTx> {
        let tx = self.pool.begin().await?;
        info!(target: "minet", event = "db_tx_begin", op);
        Ok(WriteTx {
            tx,
            touched: BTreeSet::new(),
            bus: self.bus.clone(),
            op,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// A multi-table write. Dropping it without `commit` rolls everything back.
pub struct WriteTx {
    tx: Transaction<'static, Sqlite>,
    touched: BTreeSet<Table>,
    bus: ChangeBus,
    op: &'static str,
}

impl WriteTx {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Marks `table` as written so its observers re-run after commit.
    pub fn touch(&mut self, table: Table) {
        self.touched.insert(table);
    }

    pub fn touched(&self) -> &BTreeSet<Table> {
        &self.touched
    }

    pub async fn commit(self) -> AppResult<()> {
        let WriteTx {
            tx,
            touched,
            bus,
            op,
        } = self;
        tx.commit().await?;
        info!(target: "minet", event = "db_tx_commit", op, tables = ?touched);
        bus.publish(&touched);
        Ok(())
    }

    pub async fn rollback(self) {
        let op = self.op;
        if let Err(rb) = self.tx.rollback().await {
            error!(target: "minet", event = "db_tx_rollback_failed", op, error = %rb);
        } else {
            warn!(target: "minet", event = "db_tx_rollback", op);
        }
    }

    /// Commits on `Ok`, rolls back on `Err`, and passes the result through.
    pub async fn finish<T>(self, result: AppResult<T>) -> AppResult<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                self.rollback().await;
                Err(err)
            }
        }
    }
}
