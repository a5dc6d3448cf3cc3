//! RedBase: a Redis-compatible data engine on SQLite or PostgreSQL.
//!
//! Persists the five core Redis types (strings, lists, hashes, sets,
//! sorted sets) in a relational schema while preserving Redis's
//! observable behavior: type-strict keys, versioned mutations,
//! millisecond expirations, atomic multi-step operations.
//!
//! Two ways in:
//! - Per-call repositories: `db.str().set("name", "alice")`, where
//!   each call runs in its own transaction.
//! - Explicit transactions: `db.update(|tx| ...)` composes several
//!   repository calls atomically.

pub mod rhash;
pub mod rkey;
pub mod rlist;
pub mod rset;
pub mod rstring;
pub mod rzset;
pub mod scan;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

// Re-export commonly used types
pub use rb_core::{Error, Key, Result, TypeId, Value};
pub use sqlx::{Dialect, Token};

pub use rhash::{HashTx, Hashes};
pub use rkey::{KeyTx, Keys};
pub use rlist::{ListTx, Lists};
pub use rset::{SetTx, Sets};
pub use rstring::{StringTx, Strings};
pub use rzset::{Aggregate, ZItem, ZSetTx, ZSets};

/// Open-time options.
#[derive(Clone)]
pub struct Options {
    /// Target engine; the default is SQLite.
    pub driver: Dialect,
    /// SQLite pragmas; ignored for PostgreSQL.
    pub pragma: Vec<(String, String)>,
    /// Read pool size; defaults to `clamp(num_cpus, 2, 8)`.
    pub read_conns: Option<u32>,
    /// Cadence of the background expiration sweep; `None` disables it.
    pub sweep_interval: Option<Duration>,
    /// Maximum keys deleted per sweep (0 = all expired keys).
    pub sweep_batch: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            driver: Dialect::Sqlite,
            pragma: sqlx::default_pragma(),
            read_conns: None,
            sweep_interval: Some(Duration::from_secs(60)),
            sweep_batch: 0,
        }
    }
}

/// A transaction composing repository calls atomically.
///
/// Obtained through [`Db::view`] / [`Db::update`]; the typed accessors
/// borrow the transaction for one repository call at a time.
pub struct Tx<'a, 'c> {
    inner: &'a mut sqlx::Tx<'c>,
}

impl<'a, 'c> Tx<'a, 'c> {
    /// The engine this transaction runs against.
    pub fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    pub fn key(&mut self) -> KeyTx<'_, 'c> {
        KeyTx::new(&mut *self.inner)
    }

    pub fn str(&mut self) -> StringTx<'_, 'c> {
        StringTx::new(&mut *self.inner)
    }

    pub fn list(&mut self) -> ListTx<'_, 'c> {
        ListTx::new(&mut *self.inner)
    }

    pub fn hash(&mut self) -> HashTx<'_, 'c> {
        HashTx::new(&mut *self.inner)
    }

    pub fn set(&mut self) -> SetTx<'_, 'c> {
        SetTx::new(&mut *self.inner)
    }

    pub fn zset(&mut self) -> ZSetTx<'_, 'c> {
        ZSetTx::new(&mut *self.inner)
    }
}

struct Sweeper {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: thread::JoinHandle<()>,
}

impl Sweeper {
    fn start(sql: Arc<sqlx::Db>, interval: Duration, batch: usize) -> Sweeper {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let shared = stop.clone();
        let handle = thread::spawn(move || {
            let keys = Keys::new(sql);
            let (lock, cvar) = &*shared;
            loop {
                {
                    let mut stopped = lock.lock();
                    if *stopped {
                        break;
                    }
                    cvar.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                }
                match keys.delete_expired(batch) {
                    Ok(0) => {}
                    Ok(n) => debug!(deleted = n, "expired keys swept"),
                    Err(err) => warn!(%err, "expiration sweep failed"),
                }
            }
        });
        Sweeper { stop, handle }
    }

    fn stop(self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock() = true;
        cvar.notify_all();
        let _ = self.handle.join();
    }
}

/// A Redis-compatible database.
///
/// Cheap to share: clone the typed repositories or wrap the `Db` in
/// an `Arc`. All handles point at the same pools.
pub struct Db {
    sql: Arc<sqlx::Db>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Db {
    /// Opens a SQLite-backed database with default options.
    /// `source` is a file path or `:memory:`.
    pub fn open(source: &str) -> Result<Db> {
        Db::open_with(source, Options::default())
    }

    /// Opens a database with the given options. For PostgreSQL,
    /// `source` is a connection string.
    pub fn open_with(source: &str, options: Options) -> Result<Db> {
        let config = sqlx::Config {
            dialect: options.driver,
            pragma: options.pragma,
            read_conns: options.read_conns,
        };
        let sql = Arc::new(sqlx::Db::open(source, config)?);
        let sweeper = options
            .sweep_interval
            .map(|interval| Sweeper::start(sql.clone(), interval, options.sweep_batch));
        Ok(Db {
            sql,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// The engine this database runs on.
    pub fn dialect(&self) -> Dialect {
        self.sql.dialect()
    }

    /// Key repository: expiration, renaming, scanning, deletion.
    pub fn key(&self) -> Keys {
        Keys::new(self.sql.clone())
    }

    /// String repository.
    pub fn str(&self) -> Strings {
        Strings::new(self.sql.clone())
    }

    /// List repository.
    pub fn list(&self) -> Lists {
        Lists::new(self.sql.clone())
    }

    /// Hash repository.
    pub fn hash(&self) -> Hashes {
        Hashes::new(self.sql.clone())
    }

    /// Set repository.
    pub fn set(&self) -> Sets {
        Sets::new(self.sql.clone())
    }

    /// Sorted-set repository.
    pub fn zset(&self) -> ZSets {
        ZSets::new(self.sql.clone())
    }

    /// Executes a function within a read-only transaction.
    pub fn view<T>(&self, f: impl FnOnce(&mut Tx<'_, '_>) -> Result<T>) -> Result<T> {
        self.sql.view(|inner| f(&mut Tx { inner }))
    }

    /// Executes a function within a read-only transaction that can be
    /// canceled through the token.
    pub fn view_with<T>(
        &self,
        token: &Token,
        f: impl FnOnce(&mut Tx<'_, '_>) -> Result<T>,
    ) -> Result<T> {
        self.sql.view_with(token, |inner| f(&mut Tx { inner }))
    }

    /// Executes a function within a writable transaction.
    /// Commits on success, rolls back on error.
    pub fn update<T>(&self, f: impl FnOnce(&mut Tx<'_, '_>) -> Result<T>) -> Result<T> {
        self.sql.update(|inner| f(&mut Tx { inner }))
    }

    /// Executes a function within a writable transaction that can be
    /// canceled through the token.
    pub fn update_with<T>(
        &self,
        token: &Token,
        f: impl FnOnce(&mut Tx<'_, '_>) -> Result<T>,
    ) -> Result<T> {
        self.sql.update_with(token, |inner| f(&mut Tx { inner }))
    }

    /// Stops the background sweeper. Called automatically on drop.
    pub fn close(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_accessors() {
        let db = Db::open(":memory:").unwrap();
        assert_eq!(db.dialect(), Dialect::Sqlite);
        db.str().set("name", "alice").unwrap();
        assert_eq!(db.key().count(&["name"]).unwrap(), 1);
        db.close();
    }

    #[test]
    fn test_update_composes_atomically() {
        let db = Db::open(":memory:").unwrap();
        let res: Result<()> = db.update(|tx| {
            tx.str().set("one", "1")?;
            tx.str().set("two", "2")?;
            Err(Error::SyntaxError)
        });
        assert_eq!(res, Err(Error::SyntaxError));
        assert_eq!(db.key().count(&["one", "two"]).unwrap(), 0);

        db.update(|tx| {
            tx.str().set("one", "1")?;
            tx.str().set("two", "2")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.key().count(&["one", "two"]).unwrap(), 2);
    }

    #[test]
    fn test_mixed_types_in_one_tx() {
        let db = Db::open(":memory:").unwrap();
        db.update(|tx| {
            tx.str().set("name", "alice")?;
            tx.list().push_back("queue", "a")?;
            tx.hash().set("user", "age", "25")?;
            tx.set().add("tags", &["x"])?;
            tx.zset().add("board", "one", 1.0)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.key().len().unwrap(), 5);
    }

    #[test]
    fn test_sweeper_removes_expired_keys() {
        let db = Db::open_with(
            ":memory:",
            Options {
                sweep_interval: Some(Duration::from_millis(20)),
                ..Options::default()
            },
        )
        .unwrap();
        db.str().set("gone", "x").unwrap();
        db.key()
            .expire_at("gone", rb_core::now_ms() - 1)
            .unwrap();
        assert_eq!(db.key().len().unwrap(), 1);

        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(db.key().len().unwrap(), 0);
        db.close();
    }

    #[test]
    fn test_canceled_update_rolls_back() {
        let db = Db::open(":memory:").unwrap();
        let token = Token::new();
        let res: Result<()> = db.update_with(&token, |tx| {
            tx.str().set("one", "1")?;
            token.cancel();
            tx.str().set("two", "2")?;
            Ok(())
        });
        assert_eq!(res, Err(Error::Canceled));
        assert_eq!(db.key().count(&["one", "two"]).unwrap(), 0);
    }
}
