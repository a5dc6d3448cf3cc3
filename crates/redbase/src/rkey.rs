//! Key repository.
//!
//! A key is a unique name for a data structure (string, list, hash,
//! set or sorted set). This repository manages keys regardless of
//! their type: existence, expiration, renaming, scanning, deletion.
//! The typed repositories call into it implicitly: every typed
//! mutation maintains the owning `rkey` row.

use std::sync::Arc;
use std::time::Duration;

use rb_core::{now_ms, Error, Key, Result, TypeId};
use sqlx::{expand_in, Arg, Dialect, Row, Tx};

use crate::scan::Scanner;

const DEFAULT_PAGE_SIZE: usize = 10;

const SQL_COUNT: &str = "
select count(id) from rkey
where key in (:keys) and (etime is null or etime > ?)";

const SQL_DELETE: &str = "
delete from rkey
where key in (:keys) and (etime is null or etime > ?)";

const SQL_DELETE_EXPIRED: &str = "
delete from rkey
where id in (
    select id from rkey
    where etime <= ?
    order by id
    limit ?
)";

const SQL_DELETE_EXPIRED_ALL: &str = "
delete from rkey where etime <= ?";

const SQL_EXPIRE: &str = "
update rkey set version = version + 1, etime = ?
where key = ? and (etime is null or etime > ?)";

const SQL_PERSIST: &str = "
update rkey set version = version + 1, etime = null
where key = ? and (etime is null or etime > ?)";

const SQL_GET: &str = "
select id, key, type, version, etime, mtime from rkey
where key = ? and (etime is null or etime > ?)";

const SQL_KEYS: &str = "
select id, key, type, version, etime, mtime from rkey
where key glob ? and (etime is null or etime > ?)
order by id asc";

const SQL_SCAN: &str = "
select id, key, type, version, etime, mtime from rkey
where id > ? and key glob ? and (type = ? or ? = 0)
and (etime is null or etime > ?)
order by id asc
limit ?";

const SQL_RANDOM: &str = "
select id, key, type, version, etime, mtime from rkey
where etime is null or etime > ?
order by random()
limit 1";

const SQL_LEN: &str = "select count(id) from rkey";

const SQL_DELETE_DST: &str = "delete from rkey where key = ?";

const SQL_RENAME: &str = "
update rkey set key = ?, version = version + 1, mtime = ?
where id = ?";

const SQL_PURGE: &str = "
delete from rkey
where key = ? and etime is not null and etime <= ?";

/// Deletes the key row iff it has already expired, so the caller's
/// create-if-missing upsert starts a fresh key (`version = 1`, no
/// expiration) instead of inheriting the stale row.
pub(crate) fn purge_expired(tx: &mut Tx<'_>, key: &str, now: i64) -> Result<()> {
    tx.exec(SQL_PURGE, &[Arg::from(key), Arg::from(now)])?;
    Ok(())
}

fn key_from_row(row: &Row) -> Result<Key> {
    Ok(Key {
        id: row.int(0)?,
        key: row.text(1)?,
        ktype: TypeId::try_from(row.int(2)?)?,
        version: row.int(3)?,
        etime: row.opt_int(4)?,
        mtime: row.int(5)?,
    })
}

/// Result of one [`KeyTx::scan`] page.
#[derive(Debug)]
pub struct KeyScan {
    /// Cursor to pass to the next call; the maximum id seen.
    pub cursor: i64,
    /// Matching keys; empty means the iteration has ended.
    pub keys: Vec<Key>,
}

/// Key repository bound to a transaction.
pub struct KeyTx<'a, 'c> {
    tx: &'a mut Tx<'c>,
}

impl<'a, 'c> KeyTx<'a, 'c> {
    pub fn new(tx: &'a mut Tx<'c>) -> Self {
        KeyTx { tx }
    }

    /// Returns the number of the given keys that exist.
    pub fn count(&mut self, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let sql = expand_in(SQL_COUNT, ":keys", keys.len());
        let mut args: Vec<Arg> = keys.iter().map(|&k| Arg::from(k)).collect();
        args.push(Arg::from(now_ms()));
        let row = self.tx.query_row(&sql, &args)?;
        Ok(row.map(|r| r.int(0)).transpose()?.unwrap_or(0) as usize)
    }

    /// Reports whether the key exists.
    pub fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.count(&[key])? > 0)
    }

    /// Deletes keys and their values, regardless of type. Returns the
    /// number of keys deleted; non-existing keys are ignored.
    pub fn delete(&mut self, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let sql = expand_in(SQL_DELETE, ":keys", keys.len());
        let mut args: Vec<Arg> = keys.iter().map(|&k| Arg::from(k)).collect();
        args.push(Arg::from(now_ms()));
        Ok(self.tx.exec(&sql, &args)? as usize)
    }

    /// Deletes keys with expired TTL, at most `n` of them (all when
    /// `n` = 0). Returns the number deleted.
    pub fn delete_expired(&mut self, n: usize) -> Result<usize> {
        let now = now_ms();
        let count = if n == 0 {
            self.tx.exec(SQL_DELETE_EXPIRED_ALL, &[Arg::from(now)])?
        } else {
            self.tx
                .exec(SQL_DELETE_EXPIRED, &[Arg::from(now), Arg::from(n as i64)])?
        };
        Ok(count as usize)
    }

    /// Sets a relative time-to-live for the key.
    /// Returns `Error::NotFound` if the key does not exist.
    pub fn expire(&mut self, key: &str, ttl: Duration) -> Result<()> {
        self.expire_at(key, now_ms() + ttl.as_millis() as i64)
    }

    /// Sets an absolute expiration time (ms) for the key.
    /// Returns `Error::NotFound` if the key does not exist.
    pub fn expire_at(&mut self, key: &str, at: i64) -> Result<()> {
        let n = self.tx.exec(
            SQL_EXPIRE,
            &[Arg::from(at), Arg::from(key), Arg::from(now_ms())],
        )?;
        if n == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Removes the expiration time from the key.
    /// Returns `Error::NotFound` if the key does not exist.
    pub fn persist(&mut self, key: &str) -> Result<()> {
        let n = self
            .tx
            .exec(SQL_PERSIST, &[Arg::from(key), Arg::from(now_ms())])?;
        if n == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Returns the key record with all associated details.
    /// Returns `Error::NotFound` if the key does not exist.
    pub fn get(&mut self, key: &str) -> Result<Key> {
        let row = self
            .tx
            .query_row(SQL_GET, &[Arg::from(key), Arg::from(now_ms())])?;
        match row {
            Some(row) => key_from_row(&row),
            None => Err(Error::NotFound),
        }
    }

    /// Returns all keys matching a glob pattern
    /// (`key*`, `k?y`, `k[bce]y`). Intended for small result sets;
    /// use [`KeyTx::scan`] or [`KeyTx::scanner`] otherwise.
    pub fn keys(&mut self, pattern: &str) -> Result<Vec<Key>> {
        let args = [self.tx.pattern(pattern), Arg::from(now_ms())];
        let rows = self.tx.query(SQL_KEYS, &args)?;
        rows.iter().map(key_from_row).collect()
    }

    /// Returns one page of keys matching the pattern and type
    /// (`TypeId::Any` = any type), starting after the cursor. The
    /// returned cursor is the maximum id seen; an empty page means the
    /// iteration has ended. `count` = 0 uses the default page size.
    pub fn scan(
        &mut self,
        cursor: i64,
        pattern: &str,
        ktype: TypeId,
        count: usize,
    ) -> Result<KeyScan> {
        let count = if count == 0 { DEFAULT_PAGE_SIZE } else { count };
        let args = [
            Arg::from(cursor),
            self.tx.pattern(pattern),
            Arg::from(ktype.code()),
            Arg::from(ktype.code()),
            Arg::from(now_ms()),
            Arg::from(count as i64),
        ];
        let rows = self.tx.query(SQL_SCAN, &args)?;
        let keys: Vec<Key> = rows.iter().map(key_from_row).collect::<Result<_>>()?;
        let cursor = keys.iter().map(|k| k.id).max().unwrap_or(cursor);
        Ok(KeyScan { cursor, keys })
    }

    /// Returns an iterator over keys matching the pattern and type,
    /// fetching them in `page_size` batches (0 = default).
    pub fn scanner(
        self,
        pattern: &str,
        ktype: TypeId,
        page_size: usize,
    ) -> Scanner<'a, Key> {
        let pattern = pattern.to_string();
        let tx = self.tx;
        Scanner::new(move |cursor| {
            let scan = KeyTx::new(&mut *tx).scan(cursor, &pattern, ktype, page_size)?;
            Ok((scan.cursor, scan.keys))
        })
    }

    /// Returns a uniformly sampled live key.
    /// Returns `Error::NotFound` if the database is empty.
    pub fn random(&mut self) -> Result<Key> {
        let row = self.tx.query_row(SQL_RANDOM, &[Arg::from(now_ms())])?;
        match row {
            Some(row) => key_from_row(&row),
            None => Err(Error::NotFound),
        }
    }

    /// Returns the total number of keys, including expired ones.
    pub fn len(&mut self) -> Result<usize> {
        let row = self.tx.query_row(SQL_LEN, &[])?;
        Ok(row.map(|r| r.int(0)).transpose()?.unwrap_or(0) as usize)
    }

    /// Renames a key. An existing key under the new name is replaced,
    /// payload included. Returns `Error::NotFound` if the source key
    /// does not exist.
    pub fn rename(&mut self, key: &str, new_key: &str) -> Result<()> {
        let src = self.get(key)?;
        if key != new_key {
            self.tx.exec(SQL_DELETE_DST, &[Arg::from(new_key)])?;
        }
        self.tx.exec(
            SQL_RENAME,
            &[Arg::from(new_key), Arg::from(now_ms()), Arg::from(src.id)],
        )?;
        Ok(())
    }

    /// Renames a key unless the new name is already taken; reports
    /// whether the rename happened. Returns `Error::NotFound` if the
    /// source key does not exist.
    pub fn rename_not_exists(&mut self, key: &str, new_key: &str) -> Result<bool> {
        if !self.exists(key)? {
            return Err(Error::NotFound);
        }
        if self.exists(new_key)? {
            return Ok(false);
        }
        self.rename(key, new_key)?;
        Ok(true)
    }
}

/// Key repository with one transaction per call.
#[derive(Clone)]
pub struct Keys {
    db: Arc<sqlx::Db>,
}

impl Keys {
    pub(crate) fn new(db: Arc<sqlx::Db>) -> Self {
        Keys { db }
    }

    pub fn count(&self, keys: &[&str]) -> Result<usize> {
        self.db.view(|tx| KeyTx::new(tx).count(keys))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        self.db.view(|tx| KeyTx::new(tx).exists(key))
    }

    pub fn delete(&self, keys: &[&str]) -> Result<usize> {
        self.db.update(|tx| KeyTx::new(tx).delete(keys))
    }

    /// Deletes all keys and values, resetting the database.
    /// Runs outside any transaction.
    pub fn delete_all(&self) -> Result<()> {
        let sql = match self.db.dialect() {
            Dialect::Sqlite => {
                "delete from rzset; delete from rset; delete from rhash; \
                 delete from rlist; delete from rstring; delete from rkey; \
                 vacuum; pragma optimize;"
            }
            Dialect::Postgres => {
                "delete from rzset; delete from rset; delete from rhash; \
                 delete from rlist; delete from rstring; delete from rkey;"
            }
        };
        self.db.exec_batch(sql)
    }

    pub fn delete_expired(&self, n: usize) -> Result<usize> {
        self.db.update(|tx| KeyTx::new(tx).delete_expired(n))
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.db.update(|tx| KeyTx::new(tx).expire(key, ttl))
    }

    pub fn expire_at(&self, key: &str, at: i64) -> Result<()> {
        self.db.update(|tx| KeyTx::new(tx).expire_at(key, at))
    }

    pub fn persist(&self, key: &str) -> Result<()> {
        self.db.update(|tx| KeyTx::new(tx).persist(key))
    }

    pub fn get(&self, key: &str) -> Result<Key> {
        self.db.view(|tx| KeyTx::new(tx).get(key))
    }

    pub fn keys(&self, pattern: &str) -> Result<Vec<Key>> {
        self.db.view(|tx| KeyTx::new(tx).keys(pattern))
    }

    pub fn scan(&self, cursor: i64, pattern: &str, ktype: TypeId, count: usize) -> Result<KeyScan> {
        self.db
            .view(|tx| KeyTx::new(tx).scan(cursor, pattern, ktype, count))
    }

    /// Returns an iterator over matching keys, fetching pages through
    /// one read transaction per page.
    pub fn scanner(&self, pattern: &str, ktype: TypeId, page_size: usize) -> Scanner<'_, Key> {
        let pattern = pattern.to_string();
        Scanner::new(move |cursor| {
            let scan = self.scan(cursor, &pattern, ktype, page_size)?;
            Ok((scan.cursor, scan.keys))
        })
    }

    pub fn random(&self) -> Result<Key> {
        self.db.view(|tx| KeyTx::new(tx).random())
    }

    pub fn len(&self) -> Result<usize> {
        self.db.view(|tx| KeyTx::new(tx).len())
    }

    pub fn rename(&self, key: &str, new_key: &str) -> Result<()> {
        self.db.update(|tx| KeyTx::new(tx).rename(key, new_key))
    }

    pub fn rename_not_exists(&self, key: &str, new_key: &str) -> Result<bool> {
        self.db
            .update(|tx| KeyTx::new(tx).rename_not_exists(key, new_key))
    }
}
