//! Hash repository.
//!
//! A hash is a field-value map under one key. Fields are text, values
//! are opaque bytes. `rkey.len` tracks the field count.

use std::collections::HashMap;
use std::sync::Arc;

use rb_core::{now_ms, Error, Result, Value};
use sqlx::{expand_in, Arg, Tx};

use crate::rkey::purge_expired;
use crate::scan::Scanner;

const DEFAULT_PAGE_SIZE: usize = 10;

const SQL_SET_KEY: &str = "
insert into rkey (key, type, version, mtime, len)
values (?, 4, 1, ?, 0)
on conflict (key) do update set
    type = case when rkey.type = excluded.type then rkey.type else null end,
    version = rkey.version + 1,
    mtime = excluded.mtime
returning id";

const SQL_COUNT_FIELDS: &str = "
select count(field) from rhash
where kid = ? and field in (:fields)";

const SQL_PUT_FIELD: &str = "
insert into rhash (kid, field, value)
values (?, ?, ?)
on conflict (kid, field) do update
set value = excluded.value";

const SQL_GROW: &str = "
update rkey set len = coalesce(len, 0) + ?
where id = ?";

const SQL_GET: &str = "
select value
from rhash join rkey on kid = rkey.id and type = 4
where key = ? and (etime is null or etime > ?) and field = ?";

const SQL_GET_MANY: &str = "
select field, value
from rhash join rkey on kid = rkey.id and type = 4
where key = ? and (etime is null or etime > ?) and field in (:fields)";

const SQL_FIELDS: &str = "
select field
from rhash join rkey on kid = rkey.id and type = 4
where key = ? and (etime is null or etime > ?)";

const SQL_VALUES: &str = "
select value
from rhash join rkey on kid = rkey.id and type = 4
where key = ? and (etime is null or etime > ?)";

const SQL_ITEMS: &str = "
select field, value
from rhash join rkey on kid = rkey.id and type = 4
where key = ? and (etime is null or etime > ?)";

const SQL_LEN: &str = "
select len from rkey
where key = ? and type = 4 and (etime is null or etime > ?)";

const SQL_DELETE: &str = "
delete from rhash
where kid = (
        select id from rkey
        where key = ? and type = 4 and (etime is null or etime > ?)
    ) and field in (:fields)";

const SQL_SHRINK: &str = "
update rkey set version = version + 1, mtime = ?, len = len - ?
where key = ? and type = 4 and (etime is null or etime > ?)";

const SQL_SCAN: &str = "
select rhash.rowid, field, value
from rhash join rkey on kid = rkey.id and type = 4
where
    key = ? and (etime is null or etime > ?)
    and rhash.rowid > ? and field glob ?
order by rhash.rowid asc
limit ?";

/// Result of one [`HashTx::scan`] page.
#[derive(Debug)]
pub struct HashScan {
    /// Cursor to pass to the next call.
    pub cursor: i64,
    /// Field-value pairs; empty means the iteration has ended.
    pub items: Vec<(String, Value)>,
}

/// Hash repository bound to a transaction.
pub struct HashTx<'a, 'c> {
    tx: &'a mut Tx<'c>,
}

impl<'a, 'c> HashTx<'a, 'c> {
    pub fn new(tx: &'a mut Tx<'c>) -> Self {
        HashTx { tx }
    }

    /// Creates or updates a field; reports whether it was created.
    /// Creates the key if missing; `Error::KeyType` if it exists with
    /// another type.
    pub fn set(&mut self, key: &str, field: &str, value: impl Into<Value>) -> Result<bool> {
        let created = self.set_fields(key, &[(field, value.into())])?;
        Ok(created == 1)
    }

    /// Creates or updates multiple fields; returns the number created
    /// (as opposed to updated).
    pub fn set_many<V: Into<Value> + Clone>(&mut self, key: &str, items: &[(&str, V)]) -> Result<usize> {
        let items: Vec<(&str, Value)> = items
            .iter()
            .map(|(f, v)| (*f, v.clone().into()))
            .collect();
        self.set_fields(key, &items)
    }

    /// Creates a field only if it does not exist yet; reports whether
    /// it was created.
    pub fn set_not_exists(&mut self, key: &str, field: &str, value: impl Into<Value>) -> Result<bool> {
        if self.exists(key, field)? {
            return Ok(false);
        }
        self.set_fields(key, &[(field, value.into())])?;
        Ok(true)
    }

    /// Returns the value of a field, or `None` if the field or the
    /// key does not exist.
    pub fn get(&mut self, key: &str, field: &str) -> Result<Option<Value>> {
        let row = self.tx.query_row(
            SQL_GET,
            &[Arg::from(key), Arg::from(now_ms()), Arg::from(field)],
        )?;
        match row {
            Some(row) => Ok(Some(Value::from(row.bytes(0)?))),
            None => Ok(None),
        }
    }

    /// Returns the values of the given fields that exist, keyed by
    /// field name.
    pub fn get_many(&mut self, key: &str, fields: &[&str]) -> Result<HashMap<String, Value>> {
        if fields.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = expand_in(SQL_GET_MANY, ":fields", fields.len());
        let mut args = vec![Arg::from(key), Arg::from(now_ms())];
        args.extend(fields.iter().map(|&f| Arg::from(f)));
        let rows = self.tx.query(&sql, &args)?;
        let mut items = HashMap::with_capacity(rows.len());
        for row in &rows {
            items.insert(row.text(0)?, Value::from(row.bytes(1)?));
        }
        Ok(items)
    }

    /// Reports whether the field exists.
    pub fn exists(&mut self, key: &str, field: &str) -> Result<bool> {
        Ok(self.get(key, field)?.is_some())
    }

    /// Deletes fields; returns the number deleted. Missing fields are
    /// ignored; a missing or wrong-typed key yields 0.
    pub fn delete(&mut self, key: &str, fields: &[&str]) -> Result<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        let now = now_ms();
        let sql = expand_in(SQL_DELETE, ":fields", fields.len());
        let mut args = vec![Arg::from(key), Arg::from(now)];
        args.extend(fields.iter().map(|&f| Arg::from(f)));
        let n = self.tx.exec(&sql, &args)?;
        if n > 0 {
            self.tx.exec(
                SQL_SHRINK,
                &[
                    Arg::from(now),
                    Arg::from(n as i64),
                    Arg::from(key),
                    Arg::from(now),
                ],
            )?;
        }
        Ok(n as usize)
    }

    /// Returns all field names.
    pub fn fields(&mut self, key: &str) -> Result<Vec<String>> {
        let rows = self
            .tx
            .query(SQL_FIELDS, &[Arg::from(key), Arg::from(now_ms())])?;
        rows.iter().map(|r| r.text(0)).collect()
    }

    /// Returns all values.
    pub fn values(&mut self, key: &str) -> Result<Vec<Value>> {
        let rows = self
            .tx
            .query(SQL_VALUES, &[Arg::from(key), Arg::from(now_ms())])?;
        rows.iter().map(|r| Ok(Value::from(r.bytes(0)?))).collect()
    }

    /// Returns all field-value pairs.
    pub fn items(&mut self, key: &str) -> Result<HashMap<String, Value>> {
        let rows = self
            .tx
            .query(SQL_ITEMS, &[Arg::from(key), Arg::from(now_ms())])?;
        let mut items = HashMap::with_capacity(rows.len());
        for row in &rows {
            items.insert(row.text(0)?, Value::from(row.bytes(1)?));
        }
        Ok(items)
    }

    /// Returns the number of fields; 0 if the key is missing.
    pub fn len(&mut self, key: &str) -> Result<usize> {
        let row = self
            .tx
            .query_row(SQL_LEN, &[Arg::from(key), Arg::from(now_ms())])?;
        Ok(row.map(|r| r.opt_int(0)).transpose()?.flatten().unwrap_or(0) as usize)
    }

    /// Increments the integer value of a field by delta; a missing
    /// field counts as 0. Returns the value after the increment.
    /// `Error::ValueType` if the current value is not an integer.
    pub fn incr(&mut self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let cur = match self.get(key, field)? {
            Some(value) => value.as_int()?,
            None => 0,
        };
        let next = cur + delta;
        self.set_fields(key, &[(field, Value::from(next))])?;
        Ok(next)
    }

    /// Increments the float value of a field by delta; a missing
    /// field counts as 0. Returns the value after the increment.
    pub fn incr_float(&mut self, key: &str, field: &str, delta: f64) -> Result<f64> {
        let cur = match self.get(key, field)? {
            Some(value) => value.as_float()?,
            None => 0.0,
        };
        let next = cur + delta;
        self.set_fields(key, &[(field, Value::from(next))])?;
        Ok(next)
    }

    /// Returns one page of field-value pairs with fields matching the
    /// pattern, starting after the cursor. `count` = 0 uses the
    /// default page size.
    pub fn scan(&mut self, key: &str, cursor: i64, pattern: &str, count: usize) -> Result<HashScan> {
        let count = if count == 0 { DEFAULT_PAGE_SIZE } else { count };
        let args = [
            Arg::from(key),
            Arg::from(now_ms()),
            Arg::from(cursor),
            self.tx.pattern(pattern),
            Arg::from(count as i64),
        ];
        let rows = self.tx.query(SQL_SCAN, &args)?;
        let mut next_cursor = cursor;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            next_cursor = next_cursor.max(row.int(0)?);
            items.push((row.text(1)?, Value::from(row.bytes(2)?)));
        }
        Ok(HashScan {
            cursor: next_cursor,
            items,
        })
    }

    /// Returns an iterator over field-value pairs with fields matching
    /// the pattern, fetching `page_size` items at a time (0 = default).
    pub fn scanner(self, key: &str, pattern: &str, page_size: usize) -> Scanner<'a, (String, Value)> {
        let key = key.to_string();
        let pattern = pattern.to_string();
        let tx = self.tx;
        Scanner::new(move |cursor| {
            let scan = HashTx::new(&mut *tx).scan(&key, cursor, &pattern, page_size)?;
            Ok((scan.cursor, scan.items))
        })
    }

    fn set_fields(&mut self, key: &str, items: &[(&str, Value)]) -> Result<usize> {
        let now = now_ms();
        purge_expired(self.tx, key, now)?;
        let row = self
            .tx
            .query_row(SQL_SET_KEY, &[Arg::from(key), Arg::from(now)])?;
        let kid = row
            .ok_or_else(|| Error::Db("key upsert returned no id".into()))?
            .int(0)?;

        let fields: Vec<&str> = items.iter().map(|(f, _)| *f).collect();
        let sql = expand_in(SQL_COUNT_FIELDS, ":fields", fields.len());
        let mut args = vec![Arg::from(kid)];
        args.extend(fields.iter().map(|&f| Arg::from(f)));
        let existing = self
            .tx
            .query_row(&sql, &args)?
            .map(|r| r.int(0))
            .transpose()?
            .unwrap_or(0) as usize;

        for (field, value) in items {
            self.tx.exec(
                SQL_PUT_FIELD,
                &[Arg::from(kid), Arg::from(*field), Arg::from(value)],
            )?;
        }

        let created = items.len().saturating_sub(existing);
        if created > 0 {
            self.tx
                .exec(SQL_GROW, &[Arg::from(created as i64), Arg::from(kid)])?;
        }
        Ok(created)
    }
}

/// Hash repository with one transaction per call.
#[derive(Clone)]
pub struct Hashes {
    db: Arc<sqlx::Db>,
}

impl Hashes {
    pub(crate) fn new(db: Arc<sqlx::Db>) -> Self {
        Hashes { db }
    }

    pub fn set(&self, key: &str, field: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        self.db
            .update(|tx| HashTx::new(tx).set(key, field, value.clone()))
    }

    pub fn set_many<V: Into<Value> + Clone>(&self, key: &str, items: &[(&str, V)]) -> Result<usize> {
        self.db.update(|tx| HashTx::new(tx).set_many(key, items))
    }

    pub fn set_not_exists(&self, key: &str, field: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        self.db
            .update(|tx| HashTx::new(tx).set_not_exists(key, field, value.clone()))
    }

    pub fn get(&self, key: &str, field: &str) -> Result<Option<Value>> {
        self.db.view(|tx| HashTx::new(tx).get(key, field))
    }

    pub fn get_many(&self, key: &str, fields: &[&str]) -> Result<HashMap<String, Value>> {
        self.db.view(|tx| HashTx::new(tx).get_many(key, fields))
    }

    pub fn exists(&self, key: &str, field: &str) -> Result<bool> {
        self.db.view(|tx| HashTx::new(tx).exists(key, field))
    }

    pub fn delete(&self, key: &str, fields: &[&str]) -> Result<usize> {
        self.db.update(|tx| HashTx::new(tx).delete(key, fields))
    }

    pub fn fields(&self, key: &str) -> Result<Vec<String>> {
        self.db.view(|tx| HashTx::new(tx).fields(key))
    }

    pub fn values(&self, key: &str) -> Result<Vec<Value>> {
        self.db.view(|tx| HashTx::new(tx).values(key))
    }

    pub fn items(&self, key: &str) -> Result<HashMap<String, Value>> {
        self.db.view(|tx| HashTx::new(tx).items(key))
    }

    pub fn len(&self, key: &str) -> Result<usize> {
        self.db.view(|tx| HashTx::new(tx).len(key))
    }

    pub fn incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.db.update(|tx| HashTx::new(tx).incr(key, field, delta))
    }

    pub fn incr_float(&self, key: &str, field: &str, delta: f64) -> Result<f64> {
        self.db
            .update(|tx| HashTx::new(tx).incr_float(key, field, delta))
    }

    pub fn scan(&self, key: &str, cursor: i64, pattern: &str, count: usize) -> Result<HashScan> {
        self.db
            .view(|tx| HashTx::new(tx).scan(key, cursor, pattern, count))
    }

    /// Returns an iterator over matching field-value pairs, fetching
    /// pages through one read transaction per page.
    pub fn scanner(&self, key: &str, pattern: &str, page_size: usize) -> Scanner<'_, (String, Value)> {
        let key = key.to_string();
        let pattern = pattern.to_string();
        Scanner::new(move |cursor| {
            let scan = self.scan(&key, cursor, &pattern, page_size)?;
            Ok((scan.cursor, scan.items))
        })
    }
}
