//! String repository.
//!
//! Strings are the simplest type: one opaque byte value per key.
//! Numeric operations parse the decimal representation on the fly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rb_core::{now_ms, Error, Result, Value};
use sqlx::{expand_in, Arg, Tx};

use crate::rkey::purge_expired;

const SQL_GET: &str = "
select value
from rstring join rkey on kid = rkey.id and type = 1
where key = ? and (etime is null or etime > ?)";

const SQL_GET_MANY: &str = "
select key, value
from rstring join rkey on kid = rkey.id and type = 1
where key in (:keys) and (etime is null or etime > ?)";

const SQL_LEN: &str = "
select length(value)
from rstring join rkey on kid = rkey.id and type = 1
where key = ? and (etime is null or etime > ?)";

// Creates or updates the key, rebinding its expiration.
const SQL_SET_KEY: &str = "
insert into rkey (key, type, version, etime, mtime)
values (?, 1, 1, ?, ?)
on conflict (key) do update set
    type = case when rkey.type = excluded.type then rkey.type else null end,
    version = rkey.version + 1,
    etime = excluded.etime,
    mtime = excluded.mtime
returning id";

// Creates or updates the key, leaving its expiration untouched.
const SQL_UPDATE_KEY: &str = "
insert into rkey (key, type, version, etime, mtime)
values (?, 1, 1, null, ?)
on conflict (key) do update set
    type = case when rkey.type = excluded.type then rkey.type else null end,
    version = rkey.version + 1,
    mtime = excluded.mtime
returning id";

const SQL_PUT: &str = "
insert into rstring (kid, value)
values (?, ?)
on conflict (kid) do update
set value = excluded.value";

/// How a write treats the key's expiration time.
enum Expiry {
    /// Rebind to the given absolute time (`None` = no expiration).
    Bind(Option<i64>),
    /// Leave any existing expiration in place.
    Keep,
}

/// String repository bound to a transaction.
pub struct StringTx<'a, 'c> {
    tx: &'a mut Tx<'c>,
}

impl<'a, 'c> StringTx<'a, 'c> {
    pub fn new(tx: &'a mut Tx<'c>) -> Self {
        StringTx { tx }
    }

    /// Returns the value of the key, or `None` if the key does not
    /// exist or is not a string.
    pub fn get(&mut self, key: &str) -> Result<Option<Value>> {
        let row = self
            .tx
            .query_row(SQL_GET, &[Arg::from(key), Arg::from(now_ms())])?;
        match row {
            Some(row) => Ok(Some(Value::from(row.bytes(0)?))),
            None => Ok(None),
        }
    }

    /// Returns the values of the given keys that exist and are
    /// strings, keyed by name.
    pub fn get_many(&mut self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = expand_in(SQL_GET_MANY, ":keys", keys.len());
        let mut args: Vec<Arg> = keys.iter().map(|&k| Arg::from(k)).collect();
        args.push(Arg::from(now_ms()));
        let rows = self.tx.query(&sql, &args)?;
        let mut items = HashMap::with_capacity(rows.len());
        for row in &rows {
            items.insert(row.text(0)?, Value::from(row.bytes(1)?));
        }
        Ok(items)
    }

    /// Sets the value of the key, removing any expiration time.
    /// If the key exists but is not a string, returns `Error::KeyType`.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.put(key, &value.into(), Expiry::Bind(None))
    }

    /// Sets the value and expiration time of the key.
    pub fn set_expires(&mut self, key: &str, value: impl Into<Value>, ttl: Duration) -> Result<()> {
        let at = now_ms() + ttl.as_millis() as i64;
        self.put(key, &value.into(), Expiry::Bind(Some(at)))
    }

    /// Sets the value only if the key does not exist; reports whether
    /// the value was set.
    pub fn set_not_exists(&mut self, key: &str, value: impl Into<Value>) -> Result<bool> {
        if self.exists(key)? {
            return Ok(false);
        }
        self.put(key, &value.into(), Expiry::Bind(None))?;
        Ok(true)
    }

    /// Sets the value only if the key already exists; reports whether
    /// the value was set.
    pub fn set_exists(&mut self, key: &str, value: impl Into<Value>) -> Result<bool> {
        if !self.exists(key)? {
            return Ok(false);
        }
        self.put(key, &value.into(), Expiry::Bind(None))?;
        Ok(true)
    }

    /// Sets the value and returns the previous one, if any.
    pub fn get_set(&mut self, key: &str, value: impl Into<Value>) -> Result<Option<Value>> {
        let prev = self.get(key)?;
        self.put(key, &value.into(), Expiry::Bind(None))?;
        Ok(prev)
    }

    /// Sets multiple keys in one go, removing their expiration times.
    pub fn set_many<V: Into<Value> + Clone>(&mut self, items: &[(&str, V)]) -> Result<()> {
        for (key, value) in items {
            self.put(key, &value.clone().into(), Expiry::Bind(None))?;
        }
        Ok(())
    }

    /// Starts a set operation with options (TTL, KEEPTTL, NX/XX).
    pub fn set_with(self, key: &str, value: impl Into<Value>) -> SetCmd<'a, 'c> {
        SetCmd {
            str: self,
            key: key.to_string(),
            value: value.into(),
            at: None,
            keep_ttl: false,
            exists: None,
        }
    }

    /// Increments the integer value of the key by delta and returns
    /// the result. A missing key counts as 0. The key's expiration is
    /// left untouched. Returns `Error::ValueType` if the current value
    /// is not an integer.
    pub fn incr(&mut self, key: &str, delta: i64) -> Result<i64> {
        let cur = match self.get(key)? {
            Some(value) => value.as_int()?,
            None => 0,
        };
        let next = cur + delta;
        self.put(key, &Value::from(next), Expiry::Keep)?;
        Ok(next)
    }

    /// Increments the float value of the key by delta and returns the
    /// result. A missing key counts as 0.
    pub fn incr_float(&mut self, key: &str, delta: f64) -> Result<f64> {
        let cur = match self.get(key)? {
            Some(value) => value.as_float()?,
            None => 0.0,
        };
        let next = cur + delta;
        self.put(key, &Value::from(next), Expiry::Keep)?;
        Ok(next)
    }

    /// Appends the value to the key, creating it if missing. Returns
    /// the length after the append. The expiration is left untouched.
    pub fn append(&mut self, key: &str, value: impl Into<Value>) -> Result<usize> {
        let mut data = self.get(key)?.map(|v| v.bytes().to_vec()).unwrap_or_default();
        data.extend_from_slice(value.into().bytes());
        let len = data.len();
        self.put(key, &Value::from(data), Expiry::Keep)?;
        Ok(len)
    }

    /// Returns the value length in bytes, or 0 if the key is missing.
    pub fn len(&mut self, key: &str) -> Result<usize> {
        let row = self
            .tx
            .query_row(SQL_LEN, &[Arg::from(key), Arg::from(now_ms())])?;
        Ok(row.map(|r| r.int(0)).transpose()?.unwrap_or(0) as usize)
    }

    /// Returns the substring between start and stop (both inclusive,
    /// negative indexes count from the end). Out-of-range requests
    /// return an empty value.
    pub fn get_range(&mut self, key: &str, start: i64, stop: i64) -> Result<Value> {
        let data = match self.get(key)? {
            Some(value) => value,
            None => return Ok(Value::default()),
        };
        let len = data.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        let mut stop = if stop < 0 { len + stop } else { stop };
        start = start.max(0);
        stop = stop.min(len - 1);
        if len == 0 || start > stop || start >= len {
            return Ok(Value::default());
        }
        Ok(Value::from(&data.bytes()[start as usize..=stop as usize]))
    }

    /// Overwrites part of the value starting at offset, zero-padding
    /// when the current value is shorter. Returns the length after the
    /// write. The expiration is left untouched.
    pub fn set_range(&mut self, key: &str, offset: usize, value: impl Into<Value>) -> Result<usize> {
        let patch = value.into();
        let mut data = self.get(key)?.map(|v| v.bytes().to_vec()).unwrap_or_default();
        let end = offset + patch.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(patch.bytes());
        let len = data.len();
        self.put(key, &Value::from(data), Expiry::Keep)?;
        Ok(len)
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn put(&mut self, key: &str, value: &Value, expiry: Expiry) -> Result<()> {
        let now = now_ms();
        purge_expired(self.tx, key, now)?;
        let row = match expiry {
            Expiry::Bind(at) => self.tx.query_row(
                SQL_SET_KEY,
                &[Arg::from(key), Arg::from(at), Arg::from(now)],
            )?,
            Expiry::Keep => self
                .tx
                .query_row(SQL_UPDATE_KEY, &[Arg::from(key), Arg::from(now)])?,
        };
        let kid = row
            .ok_or_else(|| Error::Db("key upsert returned no id".into()))?
            .int(0)?;
        self.tx.exec(SQL_PUT, &[Arg::from(kid), Arg::from(value)])?;
        Ok(())
    }
}

/// A set operation with options, built by [`StringTx::set_with`].
pub struct SetCmd<'a, 'c> {
    str: StringTx<'a, 'c>,
    key: String,
    value: Value,
    at: Option<i64>,
    keep_ttl: bool,
    exists: Option<bool>,
}

impl SetCmd<'_, '_> {
    /// Sets a relative expiration time.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.at = Some(now_ms() + ttl.as_millis() as i64);
        self
    }

    /// Sets an absolute expiration time (ms).
    pub fn at(mut self, at: i64) -> Self {
        self.at = Some(at);
        self
    }

    /// Keeps the key's current expiration time (KEEPTTL).
    pub fn keep_ttl(mut self) -> Self {
        self.keep_ttl = true;
        self
    }

    /// Only set the value if the key already exists (XX).
    pub fn if_exists(mut self) -> Self {
        self.exists = Some(true);
        self
    }

    /// Only set the value if the key does not exist (NX).
    pub fn if_not_exists(mut self) -> Self {
        self.exists = Some(false);
        self
    }

    /// Runs the operation; reports whether the value was set.
    pub fn run(mut self) -> Result<bool> {
        if let Some(want) = self.exists {
            if self.str.exists(&self.key)? != want {
                return Ok(false);
            }
        }
        let expiry = if self.keep_ttl {
            Expiry::Keep
        } else {
            Expiry::Bind(self.at)
        };
        self.str.put(&self.key, &self.value, expiry)?;
        Ok(true)
    }
}

/// String repository with one transaction per call.
#[derive(Clone)]
pub struct Strings {
    db: Arc<sqlx::Db>,
}

impl Strings {
    pub(crate) fn new(db: Arc<sqlx::Db>) -> Self {
        Strings { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.db.view(|tx| StringTx::new(tx).get(key))
    }

    pub fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        self.db.view(|tx| StringTx::new(tx).get_many(keys))
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.db.update(|tx| StringTx::new(tx).set(key, value.clone()))
    }

    pub fn set_expires(&self, key: &str, value: impl Into<Value>, ttl: Duration) -> Result<()> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).set_expires(key, value.clone(), ttl))
    }

    pub fn set_not_exists(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).set_not_exists(key, value.clone()))
    }

    pub fn set_exists(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).set_exists(key, value.clone()))
    }

    pub fn get_set(&self, key: &str, value: impl Into<Value>) -> Result<Option<Value>> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).get_set(key, value.clone()))
    }

    pub fn set_many<V: Into<Value> + Clone>(&self, items: &[(&str, V)]) -> Result<()> {
        self.db.update(|tx| StringTx::new(tx).set_many(items))
    }

    pub fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.db.update(|tx| StringTx::new(tx).incr(key, delta))
    }

    pub fn incr_float(&self, key: &str, delta: f64) -> Result<f64> {
        self.db.update(|tx| StringTx::new(tx).incr_float(key, delta))
    }

    pub fn append(&self, key: &str, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).append(key, value.clone()))
    }

    pub fn len(&self, key: &str) -> Result<usize> {
        self.db.view(|tx| StringTx::new(tx).len(key))
    }

    pub fn get_range(&self, key: &str, start: i64, stop: i64) -> Result<Value> {
        self.db
            .view(|tx| StringTx::new(tx).get_range(key, start, stop))
    }

    pub fn set_range(&self, key: &str, offset: usize, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).set_range(key, offset, value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn open() -> Db {
        Db::open(":memory:").unwrap()
    }

    #[test]
    fn test_set_get() {
        let db = open();
        db.str().set("name", "alice").unwrap();
        assert_eq!(db.str().get("name").unwrap().unwrap(), "alice");
        assert_eq!(db.str().get("city").unwrap(), None);

        // Repeated set is idempotent on the value.
        db.str().set("name", "alice").unwrap();
        assert_eq!(db.str().get("name").unwrap().unwrap(), "alice");
    }

    #[test]
    fn test_set_clears_ttl() {
        let db = open();
        db.str()
            .set_expires("name", "alice", Duration::from_secs(60))
            .unwrap();
        assert!(db.key().get("name").unwrap().etime.is_some());

        db.str().set("name", "bob").unwrap();
        assert_eq!(db.key().get("name").unwrap().etime, None);
    }

    #[test]
    fn test_set_with_keep_ttl() {
        let db = open();
        db.str()
            .set_expires("name", "alice", Duration::from_secs(60))
            .unwrap();
        db.update(|tx| tx.str().set_with("name", "bob").keep_ttl().run())
            .unwrap();
        assert!(db.key().get("name").unwrap().etime.is_some());
        assert_eq!(db.str().get("name").unwrap().unwrap(), "bob");
    }

    #[test]
    fn test_set_with_nx_xx() {
        let db = open();
        assert!(db
            .update(|tx| tx.str().set_with("name", "alice").if_not_exists().run())
            .unwrap());
        assert!(!db
            .update(|tx| tx.str().set_with("name", "bob").if_not_exists().run())
            .unwrap());
        assert_eq!(db.str().get("name").unwrap().unwrap(), "alice");

        assert!(db
            .update(|tx| tx.str().set_with("name", "bob").if_exists().run())
            .unwrap());
        assert!(!db
            .update(|tx| tx.str().set_with("city", "paris").if_exists().run())
            .unwrap());
        assert_eq!(db.str().get("city").unwrap(), None);
    }

    #[test]
    fn test_set_not_exists_set_exists() {
        let db = open();
        assert!(db.str().set_not_exists("name", "alice").unwrap());
        assert!(!db.str().set_not_exists("name", "bob").unwrap());
        assert!(db.str().set_exists("name", "carol").unwrap());
        assert!(!db.str().set_exists("city", "paris").unwrap());
        assert_eq!(db.str().get("name").unwrap().unwrap(), "carol");
    }

    #[test]
    fn test_get_set() {
        let db = open();
        assert_eq!(db.str().get_set("name", "alice").unwrap(), None);
        let prev = db.str().get_set("name", "bob").unwrap().unwrap();
        assert_eq!(prev, "alice");
        assert_eq!(db.str().get("name").unwrap().unwrap(), "bob");
    }

    #[test]
    fn test_incr() {
        let db = open();
        assert_eq!(db.str().incr("count", 5).unwrap(), 5);
        assert_eq!(db.str().incr("count", -2).unwrap(), 3);

        db.str().set("name", "alice").unwrap();
        assert_eq!(db.str().incr("name", 1), Err(Error::ValueType));
    }

    #[test]
    fn test_incr_keeps_ttl() {
        let db = open();
        db.str()
            .set_expires("count", "10", Duration::from_secs(60))
            .unwrap();
        assert_eq!(db.str().incr("count", 1).unwrap(), 11);
        assert!(db.key().get("count").unwrap().etime.is_some());
    }

    #[test]
    fn test_incr_float() {
        let db = open();
        assert_eq!(db.str().incr_float("pi", 3.0).unwrap(), 3.0);
        assert_eq!(db.str().incr_float("pi", 0.14).unwrap(), 3.14);
        db.str().set("name", "alice").unwrap();
        assert_eq!(db.str().incr_float("name", 1.0), Err(Error::ValueType));
    }

    #[test]
    fn test_append_and_len() {
        let db = open();
        assert_eq!(db.str().append("greet", "hello").unwrap(), 5);
        assert_eq!(db.str().append("greet", " world").unwrap(), 11);
        assert_eq!(db.str().get("greet").unwrap().unwrap(), "hello world");
        assert_eq!(db.str().len("greet").unwrap(), 11);
        assert_eq!(db.str().len("nope").unwrap(), 0);
    }

    #[test]
    fn test_get_range() {
        let db = open();
        db.str().set("greet", "hello world").unwrap();
        assert_eq!(db.str().get_range("greet", 0, 4).unwrap(), "hello");
        assert_eq!(db.str().get_range("greet", -5, -1).unwrap(), "world");
        assert_eq!(db.str().get_range("greet", 0, -1).unwrap(), "hello world");
        assert_eq!(db.str().get_range("greet", 20, 30).unwrap(), "");
        assert_eq!(db.str().get_range("nope", 0, 1).unwrap(), "");
    }

    #[test]
    fn test_set_range() {
        let db = open();
        db.str().set("greet", "hello world").unwrap();
        assert_eq!(db.str().set_range("greet", 6, "redis").unwrap(), 11);
        assert_eq!(db.str().get("greet").unwrap().unwrap(), "hello redis");

        // Zero padding past the end.
        assert_eq!(db.str().set_range("pad", 3, "x").unwrap(), 4);
        assert_eq!(db.str().get("pad").unwrap().unwrap().bytes(), b"\0\0\0x");
    }

    #[test]
    fn test_get_many_set_many() {
        let db = open();
        db.str().set_many(&[("one", "1"), ("two", "2")]).unwrap();
        let items = db.str().get_many(&["one", "two", "thr"]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items["one"], "1");
        assert_eq!(items["two"], "2");
        assert!(!items.contains_key("thr"));
    }

    #[test]
    fn test_wrong_type_reads_as_missing() {
        let db = open();
        db.list().push_back("queue", "a").unwrap();
        assert_eq!(db.str().get("queue").unwrap(), None);
        assert_eq!(db.str().len("queue").unwrap(), 0);
    }

    #[test]
    fn test_type_conflict_on_write() {
        let db = open();
        db.list().push_back("queue", "a").unwrap();
        assert_eq!(db.str().set("queue", "x"), Err(Error::KeyType));
        // The original value is intact.
        assert_eq!(db.list().range("queue", 0, -1).unwrap().len(), 1);
    }

    #[test]
    fn test_binary_values() {
        let db = open();
        let blob = vec![0u8, 1, 2, 255];
        db.str().set("bin", blob.clone()).unwrap();
        assert_eq!(db.str().get("bin").unwrap().unwrap().bytes(), &blob[..]);
    }
}
