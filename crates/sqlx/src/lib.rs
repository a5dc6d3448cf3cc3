//! SQL foundation for RedBase.
//!
//! Provides everything the repositories build on:
//! - Dialect adapter between canonical SQL and the active engine
//! - Two database handles: one writer, a pool of readers
//! - SQLite pragmas applied through a connection-init hook
//! - Idempotent schema bootstrap
//! - `view`/`update` transaction envelope with cancellation

pub mod dialect;
pub mod token;
pub mod tx;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use r2d2_postgres::PostgresConnectionManager;
use r2d2_sqlite::SqliteConnectionManager;
use rb_core::{Error, Result};
use rusqlite::TransactionBehavior;
use tracing::{debug, info};

pub use dialect::{expand_in, glob_to_like, Dialect};
pub use token::Token;
pub use tx::{Arg, Row, SqlValue, Tx};

use tx::{classify_pg, classify_sqlite};

const SQLITE_SCHEMA: &str = include_str!("schema.sql");
const POSTGRES_SCHEMA: &str = include_str!("schema_postgres.sql");

/// Default SQLite settings, applied to the writer at open and to every
/// pooled reader through the manager's init hook.
pub fn default_pragma() -> Vec<(String, String)> {
    [
        ("journal_mode", "wal"),
        ("synchronous", "normal"),
        ("temp_store", "memory"),
        ("mmap_size", "268435456"),
        ("foreign_keys", "on"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Open-time configuration.
#[derive(Clone)]
pub struct Config {
    pub dialect: Dialect,
    /// SQLite pragmas; ignored for PostgreSQL.
    pub pragma: Vec<(String, String)>,
    /// Read pool size; defaults to `clamp(num_cpus, 2, 8)`.
    pub read_conns: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dialect: Dialect::Sqlite,
            pragma: default_pragma(),
            read_conns: None,
        }
    }
}

enum Handles {
    Sqlite {
        rw: Mutex<rusqlite::Connection>,
        ro: r2d2::Pool<SqliteConnectionManager>,
    },
    Postgres {
        rw: Mutex<postgres::Client>,
        ro: r2d2::Pool<PostgresConnectionManager<postgres::NoTls>>,
    },
}

/// A database with separate read-write and read-only handles.
///
/// The writer handle holds a single connection: SQLite allows one
/// writer at a time and serializing writers is the fastest way to
/// enforce that; PostgreSQL gets the same discipline. Readers come
/// from a small pool sized to the host CPU count.
pub struct Db {
    handles: Handles,
    dialect: Dialect,
}

// Names in-memory databases uniquely so separate opens in one process
// do not alias each other through the shared cache.
static MEMORY_SEQ: AtomicU64 = AtomicU64::new(0);

fn sqlite_source(source: &str) -> String {
    if source == ":memory:" {
        let n = MEMORY_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("file:redbase-{n}?mode=memory&cache=shared")
    } else {
        source.to_string()
    }
}

fn suggest_num_conns() -> u32 {
    num_cpus::get().clamp(2, 8) as u32
}

fn apply_pragmas(conn: &rusqlite::Connection, pragma: &[(String, String)]) -> rusqlite::Result<()> {
    for (name, value) in pragma {
        conn.pragma_update(None, name, value)?;
    }
    Ok(())
}

impl Db {
    /// Opens (and bootstraps) a database.
    ///
    /// For SQLite, `source` is a file path or `:memory:`; in-memory
    /// databases are rewritten into a shared-cache URI so the writer
    /// and all pooled readers see the same data. For PostgreSQL,
    /// `source` is a connection string.
    pub fn open(source: &str, config: Config) -> Result<Db> {
        let nconns = config.read_conns.unwrap_or_else(suggest_num_conns);
        match config.dialect {
            Dialect::Sqlite => {
                let source = sqlite_source(source);
                let rw = rusqlite::Connection::open(&source).map_err(classify_sqlite)?;
                apply_pragmas(&rw, &config.pragma).map_err(classify_sqlite)?;
                rw.execute_batch(SQLITE_SCHEMA).map_err(classify_sqlite)?;
                debug!(source = %source, "sqlite schema ready");

                let pragma = config.pragma.clone();
                let manager = SqliteConnectionManager::file(&source)
                    .with_init(move |conn| apply_pragmas(conn, &pragma));
                let ro = r2d2::Pool::builder()
                    .max_size(nconns)
                    .build(manager)
                    .map_err(Error::db)?;

                info!(dialect = "sqlite", read_conns = nconns, "database open");
                Ok(Db {
                    handles: Handles::Sqlite {
                        rw: Mutex::new(rw),
                        ro,
                    },
                    dialect: Dialect::Sqlite,
                })
            }
            Dialect::Postgres => {
                let pg_config: postgres::Config = source.parse().map_err(Error::db)?;
                let mut rw = pg_config
                    .connect(postgres::NoTls)
                    .map_err(classify_pg)?;
                rw.batch_execute(POSTGRES_SCHEMA).map_err(classify_pg)?;
                debug!("postgres schema ready");

                let manager = PostgresConnectionManager::new(pg_config, postgres::NoTls);
                let ro = r2d2::Pool::builder()
                    .max_size(nconns)
                    .build(manager)
                    .map_err(Error::db)?;

                info!(dialect = "postgres", read_conns = nconns, "database open");
                Ok(Db {
                    handles: Handles::Postgres {
                        rw: Mutex::new(rw),
                        ro,
                    },
                    dialect: Dialect::Postgres,
                })
            }
        }
    }

    /// The engine this database runs on.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Executes a function within a read-only transaction.
    pub fn view<T>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        self.run_tx(false, None, f)
    }

    /// Executes a function within a read-only transaction that can be
    /// canceled through the token.
    pub fn view_with<T>(&self, token: &Token, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        self.run_tx(false, Some(token), f)
    }

    /// Executes a function within a writable transaction.
    /// Commits on success, rolls back on error.
    pub fn update<T>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        self.run_tx(true, None, f)
    }

    /// Executes a function within a writable transaction that can be
    /// canceled through the token.
    pub fn update_with<T>(&self, token: &Token, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        self.run_tx(true, Some(token), f)
    }

    /// Runs raw statements on the writer handle, outside any
    /// repository transaction. Used for bulk maintenance
    /// (`delete_all`) that must not run inside a transaction.
    pub fn exec_batch(&self, sql: &str) -> Result<()> {
        match &self.handles {
            Handles::Sqlite { rw, .. } => {
                rw.lock().execute_batch(sql).map_err(classify_sqlite)
            }
            Handles::Postgres { rw, .. } => {
                rw.lock().batch_execute(sql).map_err(classify_pg)
            }
        }
    }

    fn run_tx<T>(
        &self,
        writable: bool,
        token: Option<&Token>,
        f: impl FnOnce(&mut Tx<'_>) -> Result<T>,
    ) -> Result<T> {
        if let Some(token) = token {
            if token.is_canceled() {
                return Err(Error::Canceled);
            }
        }
        let result = match &self.handles {
            Handles::Sqlite { rw, ro } => {
                if writable {
                    let mut conn = rw.lock();
                    if let Some(token) = token {
                        token.attach_sqlite(conn.get_interrupt_handle());
                    }
                    // BEGIN IMMEDIATE: concurrent writers fail fast
                    // instead of deadlocking at commit.
                    let inner = conn
                        .transaction_with_behavior(TransactionBehavior::Immediate)
                        .map_err(classify_sqlite);
                    inner.and_then(|txn| {
                        let mut tx = Tx::sqlite(txn, token.cloned());
                        let out = f(&mut tx)?;
                        tx.commit()?;
                        Ok(out)
                    })
                } else {
                    let conn = ro.get().map_err(Error::db);
                    conn.and_then(|mut conn| {
                        if let Some(token) = token {
                            token.attach_sqlite(conn.get_interrupt_handle());
                        }
                        let txn = conn.transaction().map_err(classify_sqlite)?;
                        let mut tx = Tx::sqlite(txn, token.cloned());
                        let out = f(&mut tx)?;
                        tx.commit()?;
                        Ok(out)
                    })
                }
            }
            Handles::Postgres { rw, ro } => {
                if writable {
                    let mut client = rw.lock();
                    let txn = client.transaction().map_err(classify_pg);
                    txn.and_then(|txn| {
                        let mut tx = Tx::postgres(txn, token.cloned());
                        let out = f(&mut tx)?;
                        tx.commit()?;
                        Ok(out)
                    })
                } else {
                    let conn = ro.get().map_err(Error::db);
                    conn.and_then(|mut conn| {
                        let txn = conn
                            .build_transaction()
                            .read_only(true)
                            .start()
                            .map_err(classify_pg)?;
                        let mut tx = Tx::postgres(txn, token.cloned());
                        let out = f(&mut tx)?;
                        tx.commit()?;
                        Ok(out)
                    })
                }
            }
        };
        if let Some(token) = token {
            token.clear_handles();
        }
        result
    }
}
