//! List repository.
//!
//! Ordering is induced by a float `pos` column: pushes at the back
//! (front) take `max(pos)+1` (`min(pos)-1`), and an insertion between
//! two elements takes their midpoint. End operations stay O(1) and no
//! renumbering happens on the hot path. When midpoint precision runs
//! out (~50 inserts at one locus), the key's positions are compacted
//! to consecutive integers and the insert retried once.

use std::sync::Arc;

use rb_core::{now_ms, Error, Result, Value};
use sqlx::{Arg, Tx};

use crate::rkey::purge_expired;

const SQL_FIND: &str = "
select id, len from rkey
where key = ? and type = 2 and (etime is null or etime > ?)";

const SQL_PUSH_KEY: &str = "
insert into rkey (key, type, version, mtime, len)
values (?, 2, 1, ?, 1)
on conflict (key) do update set
    type = case when rkey.type = excluded.type then rkey.type else null end,
    version = rkey.version + 1,
    mtime = excluded.mtime,
    len = rkey.len + 1
returning id, len";

const SQL_INSERT_KEY: &str = "
update rkey set version = version + 1, mtime = ?, len = len + 1
where key = ? and type = 2 and (etime is null or etime > ?)
returning id, len";

const SQL_PUSH_BACK: &str = "
insert into rlist (kid, pos, elem)
select ?, coalesce(max(pos)+1, 0), ?
from rlist
where kid = ?";

const SQL_PUSH_FRONT: &str = "
insert into rlist (kid, pos, elem)
select ?, coalesce(min(pos)-1, 0), ?
from rlist
where kid = ?";

const SQL_POP_BACK: &str = "
with curkey as (
    select id from rkey
    where key = ? and type = 2 and (etime is null or etime > ?)
)
delete from rlist
where
    kid = (select id from curkey)
    and pos = (
        select max(pos) from rlist
        where kid = (select id from curkey)
    )
returning kid, elem";

const SQL_POP_FRONT: &str = "
with curkey as (
    select id from rkey
    where key = ? and type = 2 and (etime is null or etime > ?)
)
delete from rlist
where
    kid = (select id from curkey)
    and pos = (
        select min(pos) from rlist
        where kid = (select id from curkey)
    )
returning kid, elem";

// The pivot position is the first occurrence of the pivot element.
const SQL_PIVOT_POS: &str = "
select min(pos) from rlist
where kid = ? and elem = ?";

const SQL_NEXT_POS: &str = "
select min(pos) from rlist
where kid = ? and pos > ?";

const SQL_PREV_POS: &str = "
select max(pos) from rlist
where kid = ? and pos < ?";

const SQL_GET: &str = "
select elem from rlist
where kid = ?
order by pos asc
limit 1 offset ?";

const SQL_FIND_POS: &str = "
select pos from rlist
where kid = ?
order by pos asc
limit 1 offset ?";

const SQL_SET_ELEM: &str = "
update rlist set elem = ?
where kid = ? and pos = ?";

const SQL_RANGE: &str = "
select elem from rlist
where kid = ?
order by pos
limit ? offset ?";

const SQL_DELETE_ELEM: &str = "
delete from rlist
where kid = ? and elem = ?";

const SQL_DELETE_FRONT: &str = "
delete from rlist
where rowid in (
    select rowid from rlist
    where kid = ? and elem = ?
    order by pos asc
    limit ?
)";

const SQL_DELETE_BACK: &str = "
delete from rlist
where rowid in (
    select rowid from rlist
    where kid = ? and elem = ?
    order by pos desc
    limit ?
)";

const SQL_DELETE_ALL: &str = "
delete from rlist
where kid = ?";

const SQL_TRIM: &str = "
with remain as (
    select rowid from rlist
    where kid = ?
    order by pos
    limit ? offset ?
)
delete from rlist
where kid = ? and rowid not in (select rowid from remain)";

const SQL_READ_ELEMS: &str = "
select elem from rlist
where kid = ?
order by pos";

const SQL_PUT_AT: &str = "
insert into rlist (kid, pos, elem)
values (?, ?, ?)";

// Applied after deletes: the affected-row count of the preceding
// statement keeps rkey.len exact.
const SQL_SHRINK: &str = "
update rkey set version = version + 1, mtime = ?, len = len - ?
where id = ?";

const SQL_TOUCH: &str = "
update rkey set version = version + 1, mtime = ?
where id = ?";

/// Insert direction relative to the pivot element.
#[derive(Clone, Copy)]
enum Side {
    Before,
    After,
}

/// List repository bound to a transaction.
pub struct ListTx<'a, 'c> {
    tx: &'a mut Tx<'c>,
}

impl<'a, 'c> ListTx<'a, 'c> {
    pub fn new(tx: &'a mut Tx<'c>) -> Self {
        ListTx { tx }
    }

    /// Appends an element; returns the list length afterwards.
    /// Creates the key if missing; `Error::KeyType` if it exists with
    /// another type.
    pub fn push_back(&mut self, key: &str, elem: impl Into<Value>) -> Result<usize> {
        self.push(key, &elem.into(), SQL_PUSH_BACK)
    }

    /// Prepends an element; returns the list length afterwards.
    pub fn push_front(&mut self, key: &str, elem: impl Into<Value>) -> Result<usize> {
        self.push(key, &elem.into(), SQL_PUSH_FRONT)
    }

    /// Removes and returns the last element.
    /// Returns `Error::NotFound` if the key is missing or empty.
    pub fn pop_back(&mut self, key: &str) -> Result<Value> {
        self.pop(key, SQL_POP_BACK)
    }

    /// Removes and returns the first element.
    pub fn pop_front(&mut self, key: &str) -> Result<Value> {
        self.pop(key, SQL_POP_FRONT)
    }

    /// Atomically pops the last element of `src` and pushes it onto
    /// the front of `dest` (RPOPLPUSH). Returns the moved element.
    pub fn pop_back_push_front(&mut self, src: &str, dest: &str) -> Result<Value> {
        let elem = self.pop_back(src)?;
        self.push_front(dest, elem.clone())?;
        Ok(elem)
    }

    /// Returns the element at the index; negative indexes count from
    /// the end (-1 is the last element).
    /// Returns `Error::NotFound` when out of range.
    pub fn get(&mut self, key: &str, idx: i64) -> Result<Value> {
        let (kid, _) = self.find(key)?.ok_or(Error::NotFound)?;
        let (sql, offset) = if idx < 0 {
            (SQL_GET.replace("pos asc", "pos desc"), -idx - 1)
        } else {
            (SQL_GET.to_string(), idx)
        };
        let row = self
            .tx
            .query_row(&sql, &[Arg::from(kid), Arg::from(offset)])?;
        match row {
            Some(row) => Ok(Value::from(row.bytes(0)?)),
            None => Err(Error::NotFound),
        }
    }

    /// Replaces the element at the index; negative indexes count from
    /// the end. Returns `Error::NotFound` when the key is missing or
    /// the index is out of range.
    pub fn set(&mut self, key: &str, idx: i64, elem: impl Into<Value>) -> Result<()> {
        let (kid, _) = self.find(key)?.ok_or(Error::NotFound)?;
        let (sql, offset) = if idx < 0 {
            (SQL_FIND_POS.replace("pos asc", "pos desc"), -idx - 1)
        } else {
            (SQL_FIND_POS.to_string(), idx)
        };
        let row = self
            .tx
            .query_row(&sql, &[Arg::from(kid), Arg::from(offset)])?;
        let pos = match row {
            Some(row) => row.float(0)?,
            None => return Err(Error::NotFound),
        };
        self.tx.exec(
            SQL_SET_ELEM,
            &[Arg::from(&elem.into()), Arg::from(kid), Arg::Real(pos)],
        )?;
        self.tx
            .exec(SQL_TOUCH, &[Arg::from(now_ms()), Arg::from(kid)])?;
        Ok(())
    }

    /// Inserts an element after the first occurrence of the pivot.
    /// Returns the list length afterwards. `Error::NotFound` if the
    /// key or the pivot is missing.
    pub fn insert_after(
        &mut self,
        key: &str,
        pivot: impl Into<Value>,
        elem: impl Into<Value>,
    ) -> Result<usize> {
        self.insert(key, &pivot.into(), &elem.into(), Side::After)
    }

    /// Inserts an element before the first occurrence of the pivot.
    pub fn insert_before(
        &mut self,
        key: &str,
        pivot: impl Into<Value>,
        elem: impl Into<Value>,
    ) -> Result<usize> {
        self.insert(key, &pivot.into(), &elem.into(), Side::Before)
    }

    /// Returns elements between start and stop, both inclusive.
    /// Negative indexes count from the end. Missing keys and
    /// degenerate ranges yield an empty vector.
    pub fn range(&mut self, key: &str, start: i64, stop: i64) -> Result<Vec<Value>> {
        if start > stop && (start >= 0) == (stop >= 0) {
            return Ok(Vec::new());
        }
        let (kid, len) = match self.find(key)? {
            Some(found) => found,
            None => return Ok(Vec::new()),
        };
        let (offset, count) = resolve_range(start, stop, len);
        if count == 0 {
            return Ok(Vec::new());
        }
        let rows = self.tx.query(
            SQL_RANGE,
            &[Arg::from(kid), Arg::from(count), Arg::from(offset)],
        )?;
        rows.iter().map(|r| Ok(Value::from(r.bytes(0)?))).collect()
    }

    /// Keeps only the elements between start and stop (inclusive,
    /// negative indexes from the end) and deletes the rest. Returns
    /// the number of elements removed.
    pub fn trim(&mut self, key: &str, start: i64, stop: i64) -> Result<usize> {
        let (kid, len) = match self.find(key)? {
            Some(found) => found,
            None => return Ok(0),
        };
        let (offset, count) = resolve_range(start, stop, len);
        let deleted = if count == 0 {
            self.tx.exec(SQL_DELETE_ALL, &[Arg::from(kid)])?
        } else {
            self.tx.exec(
                SQL_TRIM,
                &[
                    Arg::from(kid),
                    Arg::from(count),
                    Arg::from(offset),
                    Arg::from(kid),
                ],
            )?
        };
        self.shrink(kid, deleted)?;
        Ok(deleted as usize)
    }

    /// Deletes all occurrences of an element. Returns the number
    /// deleted. Does nothing if the key is missing.
    pub fn delete(&mut self, key: &str, elem: impl Into<Value>) -> Result<usize> {
        let (kid, _) = match self.find(key)? {
            Some(found) => found,
            None => return Ok(0),
        };
        let n = self.tx.exec(
            SQL_DELETE_ELEM,
            &[Arg::from(kid), Arg::from(&elem.into())],
        )?;
        self.shrink(kid, n)?;
        Ok(n as usize)
    }

    /// Deletes up to `count` occurrences of an element, scanning from
    /// the front. Count must be positive.
    pub fn delete_front(
        &mut self,
        key: &str,
        elem: impl Into<Value>,
        count: usize,
    ) -> Result<usize> {
        self.delete_n(key, &elem.into(), count, SQL_DELETE_FRONT)
    }

    /// Deletes up to `count` occurrences of an element, scanning from
    /// the back. Count must be positive.
    pub fn delete_back(
        &mut self,
        key: &str,
        elem: impl Into<Value>,
        count: usize,
    ) -> Result<usize> {
        self.delete_n(key, &elem.into(), count, SQL_DELETE_BACK)
    }

    /// Returns the list length; 0 if the key is missing or not a list.
    pub fn len(&mut self, key: &str) -> Result<usize> {
        Ok(self.find(key)?.map(|(_, len)| len as usize).unwrap_or(0))
    }

    /// Renumbers the key's positions to consecutive integers.
    /// Runs automatically when midpoint insertion exhausts float
    /// precision; exposed for tests and maintenance.
    pub fn compact(&mut self, key: &str) -> Result<()> {
        if let Some((kid, _)) = self.find(key)? {
            self.compact_kid(kid)?;
        }
        Ok(())
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

    fn push(&mut self, key: &str, elem: &Value, sql: &str) -> Result<usize> {
        let now = now_ms();
        purge_expired(self.tx, key, now)?;
        let row = self
            .tx
            .query_row(SQL_PUSH_KEY, &[Arg::from(key), Arg::from(now)])?;
        let row = row.ok_or_else(|| Error::Db("key upsert returned no id".into()))?;
        let (kid, len) = (row.int(0)?, row.int(1)?);
        self.tx
            .exec(sql, &[Arg::from(kid), Arg::from(elem), Arg::from(kid)])?;
        Ok(len as usize)
    }

    fn pop(&mut self, key: &str, sql: &str) -> Result<Value> {
        let row = self
            .tx
            .query_row(sql, &[Arg::from(key), Arg::from(now_ms())])?;
        let row = row.ok_or(Error::NotFound)?;
        let (kid, elem) = (row.int(0)?, row.bytes(1)?);
        self.shrink(kid, 1)?;
        Ok(Value::from(elem))
    }

    fn insert(&mut self, key: &str, pivot: &Value, elem: &Value, side: Side) -> Result<usize> {
        let now = now_ms();
        let row = self.tx.query_row(
            SQL_INSERT_KEY,
            &[Arg::from(now), Arg::from(key), Arg::from(now)],
        )?;
        let row = row.ok_or(Error::NotFound)?;
        let (kid, len) = (row.int(0)?, row.int(1)?);

        let pos = match self.insert_pos(kid, pivot, side)? {
            Some(pos) => pos,
            None => {
                // Midpoint precision exhausted at this locus:
                // renumber and recompute against integer positions.
                self.compact_kid(kid)?;
                self.insert_pos(kid, pivot, side)?.ok_or(Error::NotFound)?
            }
        };
        self.tx.exec(
            SQL_PUT_AT,
            &[Arg::from(kid), Arg::Real(pos), Arg::from(elem)],
        )?;
        Ok(len as usize)
    }

    /// Computes the position for an insert next to the pivot.
    /// `Err(NotFound)` if the pivot is absent; `Ok(None)` if the
    /// midpoint is no longer representable.
    fn insert_pos(&mut self, kid: i64, pivot: &Value, side: Side) -> Result<Option<f64>> {
        let row = self
            .tx
            .query_row(SQL_PIVOT_POS, &[Arg::from(kid), Arg::from(pivot)])?;
        let pivot_pos = match row.map(|r| r.opt_float(0)).transpose()?.flatten() {
            Some(pos) => pos,
            None => return Err(Error::NotFound),
        };

        let (sql, args) = match side {
            Side::After => (SQL_NEXT_POS, [Arg::from(kid), Arg::Real(pivot_pos)]),
            Side::Before => (SQL_PREV_POS, [Arg::from(kid), Arg::Real(pivot_pos)]),
        };
        let neighbor = self
            .tx
            .query_row(sql, &args)?
            .map(|r| r.opt_float(0))
            .transpose()?
            .flatten();

        let pos = match (side, neighbor) {
            (Side::After, None) => pivot_pos + 1.0,
            (Side::Before, None) => pivot_pos - 1.0,
            (_, Some(neighbor)) => (pivot_pos + neighbor) / 2.0,
        };
        if pos == pivot_pos || neighbor == Some(pos) {
            return Ok(None);
        }
        Ok(Some(pos))
    }

    fn delete_n(&mut self, key: &str, elem: &Value, count: usize, sql: &str) -> Result<usize> {
        let (kid, _) = match self.find(key)? {
            Some(found) => found,
            None => return Ok(0),
        };
        let n = self.tx.exec(
            sql,
            &[Arg::from(kid), Arg::from(elem), Arg::from(count as i64)],
        )?;
        self.shrink(kid, n)?;
        Ok(n as usize)
    }

    fn shrink(&mut self, kid: i64, deleted: u64) -> Result<()> {
        if deleted == 0 {
            return Ok(());
        }
        self.tx.exec(
            SQL_SHRINK,
            &[Arg::from(now_ms()), Arg::from(deleted as i64), Arg::from(kid)],
        )?;
        Ok(())
    }

    fn compact_kid(&mut self, kid: i64) -> Result<()> {
        let rows = self.tx.query(SQL_READ_ELEMS, &[Arg::from(kid)])?;
        self.tx.exec(SQL_DELETE_ALL, &[Arg::from(kid)])?;
        for (i, row) in rows.iter().enumerate() {
            self.tx.exec(
                SQL_PUT_AT,
                &[
                    Arg::from(kid),
                    Arg::Real(i as f64),
                    Arg::from(row.bytes(0)?),
                ],
            )?;
        }
        Ok(())
    }
}

/// Resolves inclusive start/stop indexes (negative = from the end)
/// into a non-negative (offset, count) pair against the length.
pub(crate) fn resolve_range(start: i64, stop: i64, len: i64) -> (i64, i64) {
    let start = if start < 0 { len + start } else { start }.max(0);
    let stop = if stop < 0 { len + stop } else { stop }.min(len - 1);
    if len == 0 || start > stop || start >= len {
        return (0, 0);
    }
    (start, stop - start + 1)
}

/// List repository with one transaction per call.
#[derive(Clone)]
pub struct Lists {
    db: Arc<sqlx::Db>,
}

impl Lists {
    pub(crate) fn new(db: Arc<sqlx::Db>) -> Self {
        Lists { db }
    }

    pub fn push_back(&self, key: &str, elem: impl Into<Value>) -> Result<usize> {
        let elem = elem.into();
        self.db
            .update(|tx| ListTx::new(tx).push_back(key, elem.clone()))
    }

    pub fn push_front(&self, key: &str, elem: impl Into<Value>) -> Result<usize> {
        let elem = elem.into();
        self.db
            .update(|tx| ListTx::new(tx).push_front(key, elem.clone()))
    }

    pub fn pop_back(&self, key: &str) -> Result<Value> {
        self.db.update(|tx| ListTx::new(tx).pop_back(key))
    }

    pub fn pop_front(&self, key: &str) -> Result<Value> {
        self.db.update(|tx| ListTx::new(tx).pop_front(key))
    }

    pub fn pop_back_push_front(&self, src: &str, dest: &str) -> Result<Value> {
        self.db
            .update(|tx| ListTx::new(tx).pop_back_push_front(src, dest))
    }

    pub fn get(&self, key: &str, idx: i64) -> Result<Value> {
        self.db.view(|tx| ListTx::new(tx).get(key, idx))
    }

    pub fn set(&self, key: &str, idx: i64, elem: impl Into<Value>) -> Result<()> {
        let elem = elem.into();
        self.db
            .update(|tx| ListTx::new(tx).set(key, idx, elem.clone()))
    }

    pub fn insert_after(
        &self,
        key: &str,
        pivot: impl Into<Value>,
        elem: impl Into<Value>,
    ) -> Result<usize> {
        let (pivot, elem) = (pivot.into(), elem.into());
        self.db
            .update(|tx| ListTx::new(tx).insert_after(key, pivot.clone(), elem.clone()))
    }

    pub fn insert_before(
        &self,
        key: &str,
        pivot: impl Into<Value>,
        elem: impl Into<Value>,
    ) -> Result<usize> {
        let (pivot, elem) = (pivot.into(), elem.into());
        self.db
            .update(|tx| ListTx::new(tx).insert_before(key, pivot.clone(), elem.clone()))
    }

    pub fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Value>> {
        self.db.view(|tx| ListTx::new(tx).range(key, start, stop))
    }

    pub fn trim(&self, key: &str, start: i64, stop: i64) -> Result<usize> {
        self.db.update(|tx| ListTx::new(tx).trim(key, start, stop))
    }

    pub fn delete(&self, key: &str, elem: impl Into<Value>) -> Result<usize> {
        let elem = elem.into();
        self.db
            .update(|tx| ListTx::new(tx).delete(key, elem.clone()))
    }

    pub fn delete_front(&self, key: &str, elem: impl Into<Value>, count: usize) -> Result<usize> {
        let elem = elem.into();
        self.db
            .update(|tx| ListTx::new(tx).delete_front(key, elem.clone(), count))
    }

    pub fn delete_back(&self, key: &str, elem: impl Into<Value>, count: usize) -> Result<usize> {
        let elem = elem.into();
        self.db
            .update(|tx| ListTx::new(tx).delete_back(key, elem.clone(), count))
    }

    pub fn len(&self, key: &str) -> Result<usize> {
        self.db.view(|tx| ListTx::new(tx).len(key))
    }

    pub fn compact(&self, key: &str) -> Result<()> {
        self.db.update(|tx| ListTx::new(tx).compact(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn open() -> Db {
        Db::open(":memory:").unwrap()
    }

    fn push_all(db: &Db, key: &str, elems: &[&str]) {
        for elem in elems {
            db.list().push_back(key, *elem).unwrap();
        }
    }

    fn contents(db: &Db, key: &str) -> Vec<String> {
        db.list()
            .range(key, 0, -1)
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect()
    }

    #[test]
    fn test_push_returns_length() {
        let db = open();
        assert_eq!(db.list().push_back("q", "a").unwrap(), 1);
        assert_eq!(db.list().push_back("q", "b").unwrap(), 2);
        assert_eq!(db.list().push_front("q", "z").unwrap(), 3);
        assert_eq!(contents(&db, "q"), vec!["z", "a", "b"]);
    }

    #[test]
    fn test_pop_round_trip() {
        let db = open();
        db.list().push_front("q", "v").unwrap();
        assert_eq!(db.list().pop_front("q").unwrap(), "v");
        db.list().push_back("q", "w").unwrap();
        assert_eq!(db.list().pop_back("q").unwrap(), "w");
        assert_eq!(db.list().pop_back("q"), Err(Error::NotFound));
        assert_eq!(db.list().pop_back("nope"), Err(Error::NotFound));
        assert_eq!(db.list().len("q").unwrap(), 0);
    }

    #[test]
    fn test_get_with_negative_index() {
        let db = open();
        push_all(&db, "q", &["a", "b", "c", "d"]);
        assert_eq!(db.list().get("q", 0).unwrap(), "a");
        assert_eq!(db.list().get("q", 3).unwrap(), "d");
        assert_eq!(db.list().get("q", -1).unwrap(), "d");
        assert_eq!(db.list().get("q", -4).unwrap(), "a");
        assert_eq!(db.list().get("q", 4), Err(Error::NotFound));
        assert_eq!(db.list().get("q", -5), Err(Error::NotFound));
    }

    #[test]
    fn test_set_by_index() {
        let db = open();
        push_all(&db, "q", &["a", "b", "c"]);
        db.list().set("q", 1, "B").unwrap();
        db.list().set("q", -1, "C").unwrap();
        assert_eq!(contents(&db, "q"), vec!["a", "B", "C"]);
        assert_eq!(db.list().set("q", 5, "x"), Err(Error::NotFound));
        assert_eq!(db.list().set("nope", 0, "x"), Err(Error::NotFound));
    }

    #[test]
    fn test_range() {
        let db = open();
        push_all(&db, "q", &["a", "b", "c", "d", "e"]);
        assert_eq!(contents(&db, "q"), vec!["a", "b", "c", "d", "e"]);

        let mid: Vec<String> = db
            .list()
            .range("q", 1, 3)
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(mid, vec!["b", "c", "d"]);

        let tail: Vec<String> = db
            .list()
            .range("q", -2, -1)
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(tail, vec!["d", "e"]);

        assert!(db.list().range("q", 3, 1).unwrap().is_empty());
        assert!(db.list().range("q", -1, -3).unwrap().is_empty());
        assert!(db.list().range("nope", 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_trim() {
        let db = open();
        push_all(&db, "q", &["a", "b", "c", "d", "e"]);
        assert_eq!(db.list().trim("q", 1, 3).unwrap(), 2);
        assert_eq!(contents(&db, "q"), vec!["b", "c", "d"]);
        assert_eq!(db.list().len("q").unwrap(), 3);
    }

    #[test]
    fn test_trim_degenerate_clears_list() {
        let db = open();
        push_all(&db, "q", &["a", "b", "c"]);
        assert_eq!(db.list().trim("q", 2, 1).unwrap(), 3);
        assert_eq!(db.list().len("q").unwrap(), 0);
    }

    #[test]
    fn test_insert_before_after() {
        let db = open();
        push_all(&db, "q", &["a", "c"]);
        assert_eq!(db.list().insert_before("q", "c", "b").unwrap(), 3);
        assert_eq!(db.list().insert_after("q", "c", "d").unwrap(), 4);
        assert_eq!(contents(&db, "q"), vec!["a", "b", "c", "d"]);

        assert_eq!(
            db.list().insert_before("q", "zz", "x"),
            Err(Error::NotFound)
        );
        assert_eq!(
            db.list().insert_before("nope", "a", "x"),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_insert_front_edge() {
        let db = open();
        push_all(&db, "q", &["b", "c"]);
        assert_eq!(db.list().insert_before("q", "b", "a").unwrap(), 3);
        assert_eq!(contents(&db, "q"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_repeated_midpoint_inserts() {
        // Inserting before the same pivot halves the gap every time;
        // after ~50 rounds the midpoint is no longer representable and
        // the insert compacts the positions and retries.
        let db = open();
        push_all(&db, "q", &["lo", "hi"]);
        for i in 0..80 {
            db.list()
                .insert_before("q", "hi", &format!("e{i}")[..])
                .unwrap();
        }
        assert_eq!(db.list().len("q").unwrap(), 82);
        let items = contents(&db, "q");
        assert_eq!(items[0], "lo");
        assert_eq!(items[1], "e0");
        assert_eq!(items[80], "e79");
        assert_eq!(items[81], "hi");
    }

    #[test]
    fn test_compact_preserves_order() {
        let db = open();
        push_all(&db, "q", &["a", "b", "c"]);
        db.list().push_front("q", "z").unwrap();
        db.list().compact("q").unwrap();
        assert_eq!(contents(&db, "q"), vec!["z", "a", "b", "c"]);
    }

    #[test]
    fn test_delete_variants() {
        let db = open();
        push_all(&db, "q", &["x", "a", "x", "b", "x"]);
        assert_eq!(db.list().delete_front("q", "x", 1).unwrap(), 1);
        assert_eq!(contents(&db, "q"), vec!["a", "x", "b", "x"]);
        assert_eq!(db.list().delete_back("q", "x", 1).unwrap(), 1);
        assert_eq!(contents(&db, "q"), vec!["a", "x", "b"]);
        assert_eq!(db.list().delete("q", "x").unwrap(), 1);
        assert_eq!(contents(&db, "q"), vec!["a", "b"]);
        assert_eq!(db.list().len("q").unwrap(), 2);
        assert_eq!(db.list().delete("nope", "x").unwrap(), 0);
    }

    #[test]
    fn test_pop_back_push_front() {
        let db = open();
        push_all(&db, "src", &["a", "b", "c"]);
        let moved = db.list().pop_back_push_front("src", "dst").unwrap();
        assert_eq!(moved, "c");
        assert_eq!(contents(&db, "src"), vec!["a", "b"]);
        assert_eq!(contents(&db, "dst"), vec!["c"]);

        // Rotating a list onto itself.
        let moved = db.list().pop_back_push_front("src", "src").unwrap();
        assert_eq!(moved, "b");
        assert_eq!(contents(&db, "src"), vec!["b", "a"]);

        assert_eq!(
            db.list().pop_back_push_front("nope", "dst"),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_type_conflict() {
        let db = open();
        db.str().set("k", "v").unwrap();
        assert_eq!(db.list().push_back("k", "x"), Err(Error::KeyType));
        assert_eq!(db.str().get("k").unwrap().unwrap(), "v");
    }

    #[test]
    fn test_len_tracks_mutations() {
        let db = open();
        push_all(&db, "q", &["a", "b", "c", "d"]);
        assert_eq!(db.list().len("q").unwrap(), 4);
        db.list().pop_front("q").unwrap();
        assert_eq!(db.list().len("q").unwrap(), 3);
        db.list().trim("q", 0, 0).unwrap();
        assert_eq!(db.list().len("q").unwrap(), 1);
        assert_eq!(db.list().len("nope").unwrap(), 0);
    }
}
