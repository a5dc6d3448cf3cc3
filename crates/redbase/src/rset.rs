//! Set repository.
//!
//! Unordered sets of byte elements, plus the multi-key combinators
//! (diff, inter, union) and their store variants. Store destinations
//! follow the engine rule: an empty result never overwrites a
//! wrong-typed destination (the op returns 0), while a non-empty
//! result over a wrong-typed destination fails with `KeyType` and the
//! transaction rollback preserves the destination.

use std::sync::Arc;

use rb_core::{now_ms, Error, Result, Value};
use sqlx::{expand_in, Arg, Tx};

use crate::rkey::purge_expired;
use crate::scan::Scanner;

const DEFAULT_PAGE_SIZE: usize = 10;

const SQL_ADD_KEY: &str = "
insert into rkey (key, type, version, mtime, len)
values (?, 3, 1, ?, 0)
on conflict (key) do update set
    type = case when rkey.type = excluded.type then rkey.type else null end,
    version = rkey.version + 1,
    mtime = excluded.mtime
returning id";

const SQL_PUT: &str = "
insert into rset (kid, elem)
values (?, ?)
on conflict (kid, elem) do nothing";

const SQL_GROW: &str = "
update rkey set len = coalesce(len, 0) + ?
where id = ?";

const SQL_FIND: &str = "
select id, len from rkey
where key = ? and type = 3 and (etime is null or etime > ?)";

const SQL_ITEMS: &str = "
select elem
from rset join rkey on kid = rkey.id and type = 3
where key = ? and (etime is null or etime > ?)";

const SQL_EXISTS: &str = "
select count(elem)
from rset join rkey on kid = rkey.id and type = 3
where key = ? and (etime is null or etime > ?) and elem = ?";

const SQL_RANDOM: &str = "
select elem from rset
where kid = ?
order by random()
limit 1";

const SQL_DELETE: &str = "
delete from rset
where kid = (
        select id from rkey
        where key = ? and type = 3 and (etime is null or etime > ?)
    ) and elem in (:elems)";

const SQL_DELETE_ONE: &str = "
delete from rset
where kid = ? and elem = ?";

const SQL_SHRINK: &str = "
update rkey set version = version + 1, mtime = ?, len = len - ?
where id = ?";

const SQL_SCAN: &str = "
select rset.rowid, elem
from rset join rkey on kid = rkey.id and type = 3
where
    key = ? and (etime is null or etime > ?)
    and rset.rowid > ? and elem glob ?
order by rset.rowid asc
limit ?";

const SQL_DIFF: &str = "
select elem from rset
where kid = (
    select id from rkey
    where key = ? and type = 3 and (etime is null or etime > ?)
)
and elem not in (
    select elem from rset
    where kid in (
        select id from rkey
        where key in (:keys) and type = 3 and (etime is null or etime > ?)
    )
)";

const SQL_INTER: &str = "
select elem from rset
where kid in (
    select id from rkey
    where key in (:keys) and type = 3 and (etime is null or etime > ?)
)
group by elem
having count(distinct kid) = ?";

const SQL_UNION: &str = "
select elem from rset
where kid in (
    select id from rkey
    where key in (:keys) and type = 3 and (etime is null or etime > ?)
)
group by elem";

const SQL_CLEAR: &str = "
delete from rset
where kid = (
    select id from rkey
    where key = ? and type = 3 and (etime is null or etime > ?)
)";

const SQL_ZERO_LEN: &str = "
update rkey set version = version + 1, mtime = ?, len = 0
where key = ? and type = 3 and (etime is null or etime > ?)";

const SQL_SET_LEN: &str = "
update rkey set len = ?
where id = ?";

/// Result of one [`SetTx::scan`] page.
#[derive(Debug)]
pub struct SetScan {
    /// Cursor to pass to the next call.
    pub cursor: i64,
    /// Elements; empty means the iteration has ended.
    pub items: Vec<Value>,
}

/// Set repository bound to a transaction.
pub struct SetTx<'a, 'c> {
    tx: &'a mut Tx<'c>,
}

impl<'a, 'c> SetTx<'a, 'c> {
    pub fn new(tx: &'a mut Tx<'c>) -> Self {
        SetTx { tx }
    }

    /// Adds elements to the set; returns the number actually added
    /// (existing elements do not count). Creates the key if missing;
    /// `Error::KeyType` if it exists with another type.
    pub fn add<V: Into<Value> + Clone>(&mut self, key: &str, elems: &[V]) -> Result<usize> {
        let now = now_ms();
        purge_expired(self.tx, key, now)?;
        let row = self
            .tx
            .query_row(SQL_ADD_KEY, &[Arg::from(key), Arg::from(now)])?;
        let kid = row
            .ok_or_else(|| Error::Db("key upsert returned no id".into()))?
            .int(0)?;

        let mut added = 0u64;
        for elem in elems {
            let value = elem.clone().into();
            added += self
                .tx
                .exec(SQL_PUT, &[Arg::from(kid), Arg::from(&value)])?;
        }
        if added > 0 {
            self.tx
                .exec(SQL_GROW, &[Arg::from(added as i64), Arg::from(kid)])?;
        }
        Ok(added as usize)
    }

    /// Removes elements from the set; returns the number removed.
    /// A missing or wrong-typed key yields 0.
    pub fn delete<V: Into<Value> + Clone>(&mut self, key: &str, elems: &[V]) -> Result<usize> {
        if elems.is_empty() {
            return Ok(0);
        }
        let now = now_ms();
        let (kid, _) = match self.find(key)? {
            Some(found) => found,
            None => return Ok(0),
        };
        let sql = expand_in(SQL_DELETE, ":elems", elems.len());
        let mut args = vec![Arg::from(key), Arg::from(now)];
        args.extend(elems.iter().map(|e| Arg::from(&e.clone().into())));
        let n = self.tx.exec(&sql, &args)?;
        if n > 0 {
            self.tx.exec(
                SQL_SHRINK,
                &[Arg::from(now), Arg::from(n as i64), Arg::from(kid)],
            )?;
        }
        Ok(n as usize)
    }

    /// Reports whether the element belongs to the set.
    pub fn exists(&mut self, key: &str, elem: impl Into<Value>) -> Result<bool> {
        let row = self.tx.query_row(
            SQL_EXISTS,
            &[
                Arg::from(key),
                Arg::from(now_ms()),
                Arg::from(&elem.into()),
            ],
        )?;
        Ok(row.map(|r| r.int(0)).transpose()?.unwrap_or(0) > 0)
    }

    /// Returns all elements of the set.
    pub fn items(&mut self, key: &str) -> Result<Vec<Value>> {
        let rows = self
            .tx
            .query(SQL_ITEMS, &[Arg::from(key), Arg::from(now_ms())])?;
        rows.iter().map(|r| Ok(Value::from(r.bytes(0)?))).collect()
    }

    /// Returns the set cardinality; 0 if the key is missing.
    pub fn len(&mut self, key: &str) -> Result<usize> {
        Ok(self
            .find(key)?
            .map(|(_, len)| len as usize)
            .unwrap_or(0))
    }

    /// Removes and returns a random element.
    /// Returns `Error::NotFound` if the set is missing or empty.
    pub fn pop(&mut self, key: &str) -> Result<Value> {
        let (kid, _) = self.find(key)?.ok_or(Error::NotFound)?;
        let row = self.tx.query_row(SQL_RANDOM, &[Arg::from(kid)])?;
        let elem = row.ok_or(Error::NotFound)?.bytes(0)?;
        self.tx
            .exec(SQL_DELETE_ONE, &[Arg::from(kid), Arg::from(elem.clone())])?;
        self.tx.exec(
            SQL_SHRINK,
            &[Arg::from(now_ms()), Arg::from(1i64), Arg::from(kid)],
        )?;
        Ok(Value::from(elem))
    }

    /// Returns a random element without removing it.
    /// Returns `Error::NotFound` if the set is missing or empty.
    pub fn random(&mut self, key: &str) -> Result<Value> {
        let (kid, _) = self.find(key)?.ok_or(Error::NotFound)?;
        let row = self.tx.query_row(SQL_RANDOM, &[Arg::from(kid)])?;
        Ok(Value::from(row.ok_or(Error::NotFound)?.bytes(0)?))
    }

    /// Moves an element from one set to another. Returns
    /// `Error::NotFound` if the source does not contain the element;
    /// `Error::KeyType` if the destination holds another type.
    pub fn move_elem(&mut self, src: &str, dest: &str, elem: impl Into<Value>) -> Result<()> {
        let now = now_ms();
        let value = elem.into();
        let (src_kid, _) = self.find(src)?.ok_or(Error::NotFound)?;
        let n = self
            .tx
            .exec(SQL_DELETE_ONE, &[Arg::from(src_kid), Arg::from(&value)])?;
        if n == 0 {
            return Err(Error::NotFound);
        }
        self.tx.exec(
            SQL_SHRINK,
            &[Arg::from(now), Arg::from(1i64), Arg::from(src_kid)],
        )?;

        purge_expired(self.tx, dest, now)?;
        let row = self
            .tx
            .query_row(SQL_ADD_KEY, &[Arg::from(dest), Arg::from(now)])?;
        let dest_kid = row
            .ok_or_else(|| Error::Db("key upsert returned no id".into()))?
            .int(0)?;
        let inserted = self
            .tx
            .exec(SQL_PUT, &[Arg::from(dest_kid), Arg::from(&value)])?;
        if inserted > 0 {
            self.tx
                .exec(SQL_GROW, &[Arg::from(1i64), Arg::from(dest_kid)])?;
        }
        Ok(())
    }

    /// Returns one page of elements matching the pattern, starting
    /// after the cursor. `count` = 0 uses the default page size.
    pub fn scan(&mut self, key: &str, cursor: i64, pattern: &str, count: usize) -> Result<SetScan> {
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
            items.push(Value::from(row.bytes(1)?));
        }
        Ok(SetScan {
            cursor: next_cursor,
            items,
        })
    }

    /// Returns an iterator over elements matching the pattern,
    /// fetching `page_size` items at a time (0 = default).
    pub fn scanner(self, key: &str, pattern: &str, page_size: usize) -> Scanner<'a, Value> {
        let key = key.to_string();
        let pattern = pattern.to_string();
        let tx = self.tx;
        Scanner::new(move |cursor| {
            let scan = SetTx::new(&mut *tx).scan(&key, cursor, &pattern, page_size)?;
            Ok((scan.cursor, scan.items))
        })
    }

    /// Returns the elements of the first set that belong to none of
    /// the other sets.
    pub fn diff(&mut self, keys: &[&str]) -> Result<Vec<Value>> {
        let (first, rest) = match keys.split_first() {
            Some(split) => split,
            None => return Ok(Vec::new()),
        };
        if rest.is_empty() {
            return self.items(first);
        }
        let now = now_ms();
        let sql = expand_in(SQL_DIFF, ":keys", rest.len());
        let mut args = vec![Arg::from(*first), Arg::from(now)];
        args.extend(rest.iter().map(|&k| Arg::from(k)));
        args.push(Arg::from(now));
        let rows = self.tx.query(&sql, &args)?;
        rows.iter().map(|r| Ok(Value::from(r.bytes(0)?))).collect()
    }

    /// Computes the diff and stores it under `dest`, replacing any
    /// previous set value. Returns the result cardinality.
    pub fn diff_store(&mut self, dest: &str, keys: &[&str]) -> Result<usize> {
        let elems = self.diff(keys)?;
        self.store(dest, &elems)
    }

    /// Returns the elements present in all of the sets. The result is
    /// empty when any key is missing or holds another type.
    pub fn inter(&mut self, keys: &[&str]) -> Result<Vec<Value>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = expand_in(SQL_INTER, ":keys", keys.len());
        let mut args: Vec<Arg> = keys.iter().map(|&k| Arg::from(k)).collect();
        args.push(Arg::from(now_ms()));
        args.push(Arg::from(keys.len() as i64));
        let rows = self.tx.query(&sql, &args)?;
        rows.iter().map(|r| Ok(Value::from(r.bytes(0)?))).collect()
    }

    /// Computes the intersection and stores it under `dest`.
    pub fn inter_store(&mut self, dest: &str, keys: &[&str]) -> Result<usize> {
        let elems = self.inter(keys)?;
        self.store(dest, &elems)
    }

    /// Returns the union of all the sets; missing and wrong-typed
    /// keys are skipped.
    pub fn union(&mut self, keys: &[&str]) -> Result<Vec<Value>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = expand_in(SQL_UNION, ":keys", keys.len());
        let mut args: Vec<Arg> = keys.iter().map(|&k| Arg::from(k)).collect();
        args.push(Arg::from(now_ms()));
        let rows = self.tx.query(&sql, &args)?;
        rows.iter().map(|r| Ok(Value::from(r.bytes(0)?))).collect()
    }

    /// Computes the union and stores it under `dest`.
    pub fn union_store(&mut self, dest: &str, keys: &[&str]) -> Result<usize> {
        let elems = self.union(keys)?;
        self.store(dest, &elems)
    }

    fn find(&mut self, key: &str) -> Result<Option<(i64, i64)>> {
        let row = self
            .tx
            .query_row(SQL_FIND, &[Arg::from(key), Arg::from(now_ms())])?;
        match row {
            Some(row) => Ok(Some((row.int(0)?, row.opt_int(1)?.unwrap_or(0)))),
            None => Ok(None),
        }
    }

    /// Replaces the destination with the computed elements.
    /// An existing same-typed destination is cleared even when the
    /// result is empty; a wrong-typed destination is only touched
    /// (and then rejected with `KeyType`) when the result is not.
    fn store(&mut self, dest: &str, elems: &[Value]) -> Result<usize> {
        let now = now_ms();
        self.tx.exec(SQL_CLEAR, &[Arg::from(dest), Arg::from(now)])?;
        self.tx.exec(
            SQL_ZERO_LEN,
            &[Arg::from(now), Arg::from(dest), Arg::from(now)],
        )?;
        if elems.is_empty() {
            return Ok(0);
        }

        purge_expired(self.tx, dest, now)?;
        let row = self
            .tx
            .query_row(SQL_ADD_KEY, &[Arg::from(dest), Arg::from(now)])?;
        let kid = row
            .ok_or_else(|| Error::Db("key upsert returned no id".into()))?
            .int(0)?;
        for elem in elems {
            self.tx.exec(SQL_PUT, &[Arg::from(kid), Arg::from(elem)])?;
        }
        self.tx.exec(
            SQL_SET_LEN,
            &[Arg::from(elems.len() as i64), Arg::from(kid)],
        )?;
        Ok(elems.len())
    }
}

/// Set repository with one transaction per call.
#[derive(Clone)]
pub struct Sets {
    db: Arc<sqlx::Db>,
}

impl Sets {
    pub(crate) fn new(db: Arc<sqlx::Db>) -> Self {
        Sets { db }
    }

    pub fn add<V: Into<Value> + Clone>(&self, key: &str, elems: &[V]) -> Result<usize> {
        self.db.update(|tx| SetTx::new(tx).add(key, elems))
    }

    pub fn delete<V: Into<Value> + Clone>(&self, key: &str, elems: &[V]) -> Result<usize> {
        self.db.update(|tx| SetTx::new(tx).delete(key, elems))
    }

    pub fn exists(&self, key: &str, elem: impl Into<Value>) -> Result<bool> {
        let elem = elem.into();
        self.db.view(|tx| SetTx::new(tx).exists(key, elem.clone()))
    }

    pub fn items(&self, key: &str) -> Result<Vec<Value>> {
        self.db.view(|tx| SetTx::new(tx).items(key))
    }

    pub fn len(&self, key: &str) -> Result<usize> {
        self.db.view(|tx| SetTx::new(tx).len(key))
    }

    pub fn pop(&self, key: &str) -> Result<Value> {
        self.db.update(|tx| SetTx::new(tx).pop(key))
    }

    pub fn random(&self, key: &str) -> Result<Value> {
        self.db.view(|tx| SetTx::new(tx).random(key))
    }

    pub fn move_elem(&self, src: &str, dest: &str, elem: impl Into<Value>) -> Result<()> {
        let elem = elem.into();
        self.db
            .update(|tx| SetTx::new(tx).move_elem(src, dest, elem.clone()))
    }

    pub fn scan(&self, key: &str, cursor: i64, pattern: &str, count: usize) -> Result<SetScan> {
        self.db
            .view(|tx| SetTx::new(tx).scan(key, cursor, pattern, count))
    }

    /// Returns an iterator over matching elements, fetching pages
    /// through one read transaction per page.
    pub fn scanner(&self, key: &str, pattern: &str, page_size: usize) -> Scanner<'_, Value> {
        let key = key.to_string();
        let pattern = pattern.to_string();
        Scanner::new(move |cursor| {
            let scan = self.scan(&key, cursor, &pattern, page_size)?;
            Ok((scan.cursor, scan.items))
        })
    }

    pub fn diff(&self, keys: &[&str]) -> Result<Vec<Value>> {
        self.db.view(|tx| SetTx::new(tx).diff(keys))
    }

    pub fn diff_store(&self, dest: &str, keys: &[&str]) -> Result<usize> {
        self.db.update(|tx| SetTx::new(tx).diff_store(dest, keys))
    }

    pub fn inter(&self, keys: &[&str]) -> Result<Vec<Value>> {
        self.db.view(|tx| SetTx::new(tx).inter(keys))
    }

    pub fn inter_store(&self, dest: &str, keys: &[&str]) -> Result<usize> {
        self.db.update(|tx| SetTx::new(tx).inter_store(dest, keys))
    }

    pub fn union(&self, keys: &[&str]) -> Result<Vec<Value>> {
        self.db.view(|tx| SetTx::new(tx).union(keys))
    }

    pub fn union_store(&self, dest: &str, keys: &[&str]) -> Result<usize> {
        self.db.update(|tx| SetTx::new(tx).union_store(dest, keys))
    }
}
