//! Sorted-set repository.
//!
//! Members carry a float score; the set order is `(score asc, elem
//! asc)` with element bytes as the tiebreak. Range queries go through
//! the [`ZRange`] builder (by rank or by score, optionally reversed);
//! the `(kid, score, elem)` index serves score ranges.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use rb_core::{now_ms, Error, Result, Value};
use sqlx::{expand_in, Arg, Tx};

use crate::rkey::purge_expired;
use crate::rlist::resolve_range;
use crate::scan::Scanner;

const DEFAULT_PAGE_SIZE: usize = 10;

const SQL_ADD_KEY: &str = "
insert into rkey (key, type, version, mtime, len)
values (?, 5, 1, ?, 0)
on conflict (key) do update set
    type = case when rkey.type = excluded.type then rkey.type else null end,
    version = rkey.version + 1,
    mtime = excluded.mtime
returning id";

const SQL_FIND: &str = "
select id, len from rkey
where key = ? and type = 5 and (etime is null or etime > ?)";

const SQL_EXISTS_ELEM: &str = "
select count(elem) from rzset
where kid = ? and elem = ?";

const SQL_PUT: &str = "
insert into rzset (kid, elem, score)
values (?, ?, ?)
on conflict (kid, elem) do update
set score = excluded.score";

const SQL_INCR: &str = "
insert into rzset (kid, elem, score)
values (?, ?, ?)
on conflict (kid, elem) do update
set score = rzset.score + excluded.score
returning score";

const SQL_GROW: &str = "
update rkey set len = coalesce(len, 0) + ?
where id = ?";

const SQL_SHRINK: &str = "
update rkey set version = version + 1, mtime = ?, len = len - ?
where id = ?";

const SQL_SET_LEN: &str = "
update rkey set len = ?
where id = ?";

const SQL_GET_SCORE: &str = "
select score
from rzset join rkey on kid = rkey.id and type = 5
where key = ? and (etime is null or etime > ?) and elem = ?";

const SQL_RANK: &str = "
with ranked as (
    select elem, row_number() over (order by score asc, elem asc) as rank
    from rzset
    where kid = ?
)
select rank - 1 from ranked
where elem = ?";

const SQL_RANGE_RANK: &str = "
select elem, score from rzset
where kid = ?
order by score asc, elem asc
limit ? offset ?";

const SQL_COUNT: &str = "
select count(elem)
from rzset join rkey on kid = rkey.id and type = 5
where key = ? and (etime is null or etime > ?)
and score >= ? and score <= ?";

const SQL_DELETE: &str = "
delete from rzset
where kid = (
        select id from rkey
        where key = ? and type = 5 and (etime is null or etime > ?)
    ) and elem in (:elems)";

const SQL_DELETE_BY_SCORE: &str = "
delete from rzset
where kid = ? and score >= ? and score <= ?";

const SQL_DELETE_BY_RANK: &str = "
delete from rzset
where kid = ? and elem in (
    select elem from rzset
    where kid = ?
    order by score asc, elem asc
    limit ? offset ?
)";

const SQL_ITEMS_OF: &str = "
select elem, score
from rzset join rkey on kid = rkey.id and type = 5
where key = ? and (etime is null or etime > ?)";

const SQL_CLEAR: &str = "
delete from rzset
where kid = (
    select id from rkey
    where key = ? and type = 5 and (etime is null or etime > ?)
)";

const SQL_ZERO_LEN: &str = "
update rkey set version = version + 1, mtime = ?, len = 0
where key = ? and type = 5 and (etime is null or etime > ?)";

const SQL_SCAN: &str = "
select rzset.rowid, elem, score
from rzset join rkey on kid = rkey.id and type = 5
where
    key = ? and (etime is null or etime > ?)
    and rzset.rowid > ? and elem glob ?
order by rzset.rowid asc
limit ?";

/// A sorted-set member with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ZItem {
    pub elem: Value,
    pub score: f64,
}

/// Score folding for the store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregate {
    #[default]
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn fold(self, acc: f64, score: f64) -> f64 {
        match self {
            Aggregate::Sum => acc + score,
            Aggregate::Min => acc.min(score),
            Aggregate::Max => acc.max(score),
        }
    }
}

impl FromStr for Aggregate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Aggregate::Sum),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            _ => Err(Error::SyntaxError),
        }
    }
}

/// Range options shared by the transaction- and database-level
/// builders.
#[derive(Debug, Clone)]
struct RangeSpec {
    key: String,
    rank: Option<(i64, i64)>,
    score: Option<(f64, f64)>,
    min_excl: bool,
    max_excl: bool,
    rev: bool,
    offset: i64,
    count: i64,
}

impl RangeSpec {
    fn new(key: &str) -> Self {
        RangeSpec {
            key: key.to_string(),
            rank: None,
            score: None,
            min_excl: false,
            max_excl: false,
            rev: false,
            offset: 0,
            count: -1,
        }
    }
}

fn exec_range(tx: &mut Tx<'_>, spec: &RangeSpec) -> Result<Vec<ZItem>> {
    let row = tx.query_row(SQL_FIND, &[Arg::from(spec.key.as_str()), Arg::from(now_ms())])?;
    let (kid, len) = match row {
        Some(row) => (row.int(0)?, row.opt_int(1)?.unwrap_or(0)),
        None => return Ok(Vec::new()),
    };

    let order = if spec.rev {
        "order by score desc, elem desc"
    } else {
        "order by score asc, elem asc"
    };

    let rows = if let Some((min, max)) = spec.score {
        let min_op = if spec.min_excl { ">" } else { ">=" };
        let max_op = if spec.max_excl { "<" } else { "<=" };
        let sql = format!(
            "select elem, score from rzset \
             where kid = ? and score {min_op} ? and score {max_op} ? \
             {order} limit ? offset ?"
        );
        let count = if spec.count < 0 { i64::MAX } else { spec.count };
        tx.query(
            &sql,
            &[
                Arg::from(kid),
                Arg::Real(min),
                Arg::Real(max),
                Arg::from(count),
                Arg::from(spec.offset),
            ],
        )?
    } else {
        let (start, stop) = spec.rank.unwrap_or((0, -1));
        let (offset, count) = resolve_range(start, stop, len);
        if count == 0 {
            return Ok(Vec::new());
        }
        let sql = SQL_RANGE_RANK.replace("order by score asc, elem asc", order);
        tx.query(&sql, &[Arg::from(kid), Arg::from(count), Arg::from(offset)])?
    };

    rows.iter()
        .map(|r| {
            Ok(ZItem {
                elem: Value::from(r.bytes(0)?),
                score: r.float(1)?,
            })
        })
        .collect()
}

/// Sorted-set repository bound to a transaction.
pub struct ZSetTx<'a, 'c> {
    tx: &'a mut Tx<'c>,
}

impl<'a, 'c> ZSetTx<'a, 'c> {
    pub fn new(tx: &'a mut Tx<'c>) -> Self {
        ZSetTx { tx }
    }

    /// Adds a member or updates its score; reports whether the member
    /// was added (as opposed to updated). Creates the key if missing;
    /// `Error::KeyType` if it exists with another type.
    pub fn add(&mut self, key: &str, elem: impl Into<Value>, score: f64) -> Result<bool> {
        let value = elem.into();
        let kid = self.upsert_key(key)?;
        self.put(kid, &value, score)
    }

    /// Adds multiple members; returns the number actually added.
    pub fn add_many<V: Into<Value> + Clone>(
        &mut self,
        key: &str,
        items: &[(V, f64)],
    ) -> Result<usize> {
        let kid = self.upsert_key(key)?;
        let mut created = 0;
        for (elem, score) in items {
            if self.put(kid, &elem.clone().into(), *score)? {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Increments the member's score by delta, creating the member
    /// (and the key) as needed. Returns the score afterwards.
    pub fn incr(&mut self, key: &str, elem: impl Into<Value>, delta: f64) -> Result<f64> {
        let value = elem.into();
        let kid = self.upsert_key(key)?;
        let existed = self.elem_exists(kid, &value)?;
        let row = self
            .tx
            .query_row(SQL_INCR, &[Arg::from(kid), Arg::from(&value), Arg::Real(delta)])?;
        let score = row
            .ok_or_else(|| Error::Db("score upsert returned no row".into()))?
            .float(0)?;
        if !existed {
            self.tx.exec(SQL_GROW, &[Arg::from(1i64), Arg::from(kid)])?;
        }
        Ok(score)
    }

    /// Returns the member's score.
    /// `Error::NotFound` if the key or the member is missing.
    pub fn get_score(&mut self, key: &str, elem: impl Into<Value>) -> Result<f64> {
        let row = self.tx.query_row(
            SQL_GET_SCORE,
            &[
                Arg::from(key),
                Arg::from(now_ms()),
                Arg::from(&elem.into()),
            ],
        )?;
        row.ok_or(Error::NotFound)?.float(0)
    }

    /// Returns the member's rank: its zero-based position in
    /// `(score asc, elem asc)` order, reversed when `reverse` is set.
    /// `Error::NotFound` if the key or the member is missing.
    pub fn get_rank(&mut self, key: &str, elem: impl Into<Value>, reverse: bool) -> Result<usize> {
        let (kid, _) = self.find(key)?.ok_or(Error::NotFound)?;
        let sql = if reverse {
            SQL_RANK.replace("score asc, elem asc", "score desc, elem desc")
        } else {
            SQL_RANK.to_string()
        };
        let row = self
            .tx
            .query_row(&sql, &[Arg::from(kid), Arg::from(&elem.into())])?;
        Ok(row.ok_or(Error::NotFound)?.int(0)? as usize)
    }

    /// Removes members; returns the number removed.
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

    /// Removes members between two ranks, both inclusive (negative
    /// ranks count from the end). Returns the number removed.
    pub fn delete_by_rank(&mut self, key: &str, start: i64, stop: i64) -> Result<usize> {
        let (kid, len) = match self.find(key)? {
            Some(found) => found,
            None => return Ok(0),
        };
        let (offset, count) = resolve_range(start, stop, len);
        if count == 0 {
            return Ok(0);
        }
        let n = self.tx.exec(
            SQL_DELETE_BY_RANK,
            &[
                Arg::from(kid),
                Arg::from(kid),
                Arg::from(count),
                Arg::from(offset),
            ],
        )?;
        self.shrink(kid, n)?;
        Ok(n as usize)
    }

    /// Removes members with scores between min and max, both
    /// inclusive. Returns the number removed.
    pub fn delete_by_score(&mut self, key: &str, min: f64, max: f64) -> Result<usize> {
        let (kid, _) = match self.find(key)? {
            Some(found) => found,
            None => return Ok(0),
        };
        let n = self.tx.exec(
            SQL_DELETE_BY_SCORE,
            &[Arg::from(kid), Arg::Real(min), Arg::Real(max)],
        )?;
        self.shrink(kid, n)?;
        Ok(n as usize)
    }

    /// Returns the set cardinality; 0 if the key is missing.
    pub fn len(&mut self, key: &str) -> Result<usize> {
        Ok(self.find(key)?.map(|(_, len)| len as usize).unwrap_or(0))
    }

    /// Returns the number of members with scores between min and max,
    /// both inclusive.
    pub fn count(&mut self, key: &str, min: f64, max: f64) -> Result<usize> {
        let row = self.tx.query_row(
            SQL_COUNT,
            &[
                Arg::from(key),
                Arg::from(now_ms()),
                Arg::Real(min),
                Arg::Real(max),
            ],
        )?;
        Ok(row.map(|r| r.int(0)).transpose()?.unwrap_or(0) as usize)
    }

    /// Returns members between two ranks in `(score, elem)` order,
    /// both inclusive (negative ranks count from the end).
    pub fn range(&mut self, key: &str, start: i64, stop: i64) -> Result<Vec<ZItem>> {
        let mut spec = RangeSpec::new(key);
        spec.rank = Some((start, stop));
        exec_range(self.tx, &spec)
    }

    /// Starts a range query with options (by score, reversed, offset
    /// and count).
    pub fn range_with(self, key: &str) -> ZRange<'a, 'c> {
        ZRange {
            tx: self.tx,
            spec: RangeSpec::new(key),
        }
    }

    /// Returns one page of members matching the pattern, starting
    /// after the cursor. `count` = 0 uses the default page size.
    pub fn scan(&mut self, key: &str, cursor: i64, pattern: &str, count: usize) -> Result<ZSetScan> {
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
            items.push(ZItem {
                elem: Value::from(row.bytes(1)?),
                score: row.float(2)?,
            });
        }
        Ok(ZSetScan {
            cursor: next_cursor,
            items,
        })
    }

    /// Returns an iterator over members matching the pattern,
    /// fetching `page_size` items at a time (0 = default).
    pub fn scanner(self, key: &str, pattern: &str, page_size: usize) -> Scanner<'a, ZItem> {
        let key = key.to_string();
        let pattern = pattern.to_string();
        let tx = self.tx;
        Scanner::new(move |cursor| {
            let scan = ZSetTx::new(&mut *tx).scan(&key, cursor, &pattern, page_size)?;
            Ok((scan.cursor, scan.items))
        })
    }

    /// Returns the intersection of the sets, scores folded with
    /// `Sum`. Missing and wrong-typed keys make the result empty.
    pub fn inter(&mut self, keys: &[&str]) -> Result<Vec<ZItem>> {
        self.fold(keys, None, Aggregate::Sum, true)
    }

    /// Computes the intersection with per-key weights (default 1.0)
    /// and the aggregate, then stores it under `dest`. Returns the
    /// result cardinality.
    pub fn inter_store(
        &mut self,
        dest: &str,
        keys: &[&str],
        weights: Option<&[f64]>,
        aggregate: Aggregate,
    ) -> Result<usize> {
        let items = self.fold(keys, weights, aggregate, true)?;
        self.store(dest, &items)
    }

    /// Returns the union of the sets, scores folded with `Sum`.
    /// Missing and wrong-typed keys contribute nothing.
    pub fn union(&mut self, keys: &[&str]) -> Result<Vec<ZItem>> {
        self.fold(keys, None, Aggregate::Sum, false)
    }

    /// Computes the union with per-key weights and the aggregate,
    /// then stores it under `dest`. Returns the result cardinality.
    pub fn union_store(
        &mut self,
        dest: &str,
        keys: &[&str],
        weights: Option<&[f64]>,
        aggregate: Aggregate,
    ) -> Result<usize> {
        let items = self.fold(keys, weights, aggregate, false)?;
        self.store(dest, &items)
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

    fn upsert_key(&mut self, key: &str) -> Result<i64> {
        let now = now_ms();
        purge_expired(self.tx, key, now)?;
        let row = self
            .tx
            .query_row(SQL_ADD_KEY, &[Arg::from(key), Arg::from(now)])?;
        row.ok_or_else(|| Error::Db("key upsert returned no id".into()))?
            .int(0)
    }

    /// Writes one member; reports whether it was created (as opposed
    /// to updated). A created member grows the key length by one.
    fn put(&mut self, kid: i64, elem: &Value, score: f64) -> Result<bool> {
        let existed = self.elem_exists(kid, elem)?;
        self.tx.exec(
            SQL_PUT,
            &[Arg::from(kid), Arg::from(elem), Arg::Real(score)],
        )?;
        if !existed {
            self.tx.exec(SQL_GROW, &[Arg::from(1i64), Arg::from(kid)])?;
        }
        Ok(!existed)
    }

    fn elem_exists(&mut self, kid: i64, elem: &Value) -> Result<bool> {
        let row = self
            .tx
            .query_row(SQL_EXISTS_ELEM, &[Arg::from(kid), Arg::from(elem)])?;
        Ok(row.map(|r| r.int(0)).transpose()?.unwrap_or(0) > 0)
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

    fn fold(
        &mut self,
        keys: &[&str],
        weights: Option<&[f64]>,
        aggregate: Aggregate,
        inter: bool,
    ) -> Result<Vec<ZItem>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let weights = match weights {
            Some(weights) if weights.len() != keys.len() => return Err(Error::InvalidArgNum),
            Some(weights) => weights.to_vec(),
            None => vec![1.0; keys.len()],
        };

        let now = now_ms();
        let mut acc: BTreeMap<Vec<u8>, (f64, usize)> = BTreeMap::new();
        for (key, weight) in keys.iter().zip(&weights) {
            let rows = self
                .tx
                .query(SQL_ITEMS_OF, &[Arg::from(*key), Arg::from(now)])?;
            for row in &rows {
                let elem = row.bytes(0)?;
                let score = row.float(1)? * weight;
                acc.entry(elem)
                    .and_modify(|(total, seen)| {
                        *total = aggregate.fold(*total, score);
                        *seen += 1;
                    })
                    .or_insert((score, 1));
            }
        }

        let mut items: Vec<ZItem> = acc
            .into_iter()
            .filter(|(_, (_, seen))| !inter || *seen == keys.len())
            .map(|(elem, (score, _))| ZItem {
                elem: Value::from(elem),
                score,
            })
            .collect();
        items.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.elem.bytes().cmp(b.elem.bytes()))
        });
        Ok(items)
    }

    /// Replaces the destination with the computed members, under the
    /// same destination rule as the set stores.
    fn store(&mut self, dest: &str, items: &[ZItem]) -> Result<usize> {
        let now = now_ms();
        self.tx.exec(SQL_CLEAR, &[Arg::from(dest), Arg::from(now)])?;
        self.tx.exec(
            SQL_ZERO_LEN,
            &[Arg::from(now), Arg::from(dest), Arg::from(now)],
        )?;
        if items.is_empty() {
            return Ok(0);
        }

        let kid = self.upsert_key(dest)?;
        for item in items {
            self.tx.exec(
                SQL_PUT,
                &[
                    Arg::from(kid),
                    Arg::from(&item.elem),
                    Arg::Real(item.score),
                ],
            )?;
        }
        self.tx.exec(
            SQL_SET_LEN,
            &[Arg::from(items.len() as i64), Arg::from(kid)],
        )?;
        Ok(items.len())
    }
}

/// Result of one [`ZSetTx::scan`] page.
#[derive(Debug)]
pub struct ZSetScan {
    /// Cursor to pass to the next call.
    pub cursor: i64,
    /// Members with scores; empty means the iteration has ended.
    pub items: Vec<ZItem>,
}

/// A range query under construction, bound to a transaction.
pub struct ZRange<'a, 'c> {
    tx: &'a mut Tx<'c>,
    spec: RangeSpec,
}

impl ZRange<'_, '_> {
    /// Selects by rank (zero-based, inclusive, negative from the
    /// end). This is the default with `(0, -1)`.
    pub fn by_rank(mut self, start: i64, stop: i64) -> Self {
        self.spec.rank = Some((start, stop));
        self.spec.score = None;
        self
    }

    /// Selects by score (inclusive bounds).
    pub fn by_score(mut self, min: f64, max: f64) -> Self {
        self.spec.score = Some((min, max));
        self
    }

    /// Makes the minimum bound exclusive (`(min` syntax).
    pub fn min_exclusive(mut self) -> Self {
        self.spec.min_excl = true;
        self
    }

    /// Makes the maximum bound exclusive (`(max` syntax).
    pub fn max_exclusive(mut self) -> Self {
        self.spec.max_excl = true;
        self
    }

    /// Reverses the order to `(score desc, elem desc)`.
    pub fn rev(mut self) -> Self {
        self.spec.rev = true;
        self
    }

    /// Skips the first `n` matching members (score ranges only).
    pub fn offset(mut self, n: i64) -> Self {
        self.spec.offset = n;
        self
    }

    /// Limits the number of members returned; -1 means to the end.
    pub fn count(mut self, n: i64) -> Self {
        self.spec.count = n;
        self
    }

    /// Runs the query.
    pub fn run(self) -> Result<Vec<ZItem>> {
        exec_range(self.tx, &self.spec)
    }
}

/// A range query under construction, one transaction per run.
pub struct DbZRange<'d> {
    db: &'d Arc<sqlx::Db>,
    spec: RangeSpec,
}

impl DbZRange<'_> {
    pub fn by_rank(mut self, start: i64, stop: i64) -> Self {
        self.spec.rank = Some((start, stop));
        self.spec.score = None;
        self
    }

    pub fn by_score(mut self, min: f64, max: f64) -> Self {
        self.spec.score = Some((min, max));
        self
    }

    pub fn min_exclusive(mut self) -> Self {
        self.spec.min_excl = true;
        self
    }

    pub fn max_exclusive(mut self) -> Self {
        self.spec.max_excl = true;
        self
    }

    pub fn rev(mut self) -> Self {
        self.spec.rev = true;
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.spec.offset = n;
        self
    }

    pub fn count(mut self, n: i64) -> Self {
        self.spec.count = n;
        self
    }

    pub fn run(self) -> Result<Vec<ZItem>> {
        self.db.view(|tx| exec_range(tx, &self.spec))
    }
}

/// Sorted-set repository with one transaction per call.
#[derive(Clone)]
pub struct ZSets {
    db: Arc<sqlx::Db>,
}

impl ZSets {
    pub(crate) fn new(db: Arc<sqlx::Db>) -> Self {
        ZSets { db }
    }

    pub fn add(&self, key: &str, elem: impl Into<Value>, score: f64) -> Result<bool> {
        let elem = elem.into();
        self.db
            .update(|tx| ZSetTx::new(tx).add(key, elem.clone(), score))
    }

    pub fn add_many<V: Into<Value> + Clone>(&self, key: &str, items: &[(V, f64)]) -> Result<usize> {
        self.db.update(|tx| ZSetTx::new(tx).add_many(key, items))
    }

    pub fn incr(&self, key: &str, elem: impl Into<Value>, delta: f64) -> Result<f64> {
        let elem = elem.into();
        self.db
            .update(|tx| ZSetTx::new(tx).incr(key, elem.clone(), delta))
    }

    pub fn get_score(&self, key: &str, elem: impl Into<Value>) -> Result<f64> {
        let elem = elem.into();
        self.db
            .view(|tx| ZSetTx::new(tx).get_score(key, elem.clone()))
    }

    pub fn get_rank(&self, key: &str, elem: impl Into<Value>, reverse: bool) -> Result<usize> {
        let elem = elem.into();
        self.db
            .view(|tx| ZSetTx::new(tx).get_rank(key, elem.clone(), reverse))
    }

    pub fn delete<V: Into<Value> + Clone>(&self, key: &str, elems: &[V]) -> Result<usize> {
        self.db.update(|tx| ZSetTx::new(tx).delete(key, elems))
    }

    pub fn delete_by_rank(&self, key: &str, start: i64, stop: i64) -> Result<usize> {
        self.db
            .update(|tx| ZSetTx::new(tx).delete_by_rank(key, start, stop))
    }

    pub fn delete_by_score(&self, key: &str, min: f64, max: f64) -> Result<usize> {
        self.db
            .update(|tx| ZSetTx::new(tx).delete_by_score(key, min, max))
    }

    pub fn len(&self, key: &str) -> Result<usize> {
        self.db.view(|tx| ZSetTx::new(tx).len(key))
    }

    pub fn count(&self, key: &str, min: f64, max: f64) -> Result<usize> {
        self.db.view(|tx| ZSetTx::new(tx).count(key, min, max))
    }

    pub fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ZItem>> {
        self.db.view(|tx| ZSetTx::new(tx).range(key, start, stop))
    }

    /// Starts a range query with options; runs in its own read
    /// transaction.
    pub fn range_with(&self, key: &str) -> DbZRange<'_> {
        DbZRange {
            db: &self.db,
            spec: RangeSpec::new(key),
        }
    }

    pub fn scan(&self, key: &str, cursor: i64, pattern: &str, count: usize) -> Result<ZSetScan> {
        self.db
            .view(|tx| ZSetTx::new(tx).scan(key, cursor, pattern, count))
    }

    pub fn scanner(&self, key: &str, pattern: &str, page_size: usize) -> Scanner<'_, ZItem> {
        let key = key.to_string();
        let pattern = pattern.to_string();
        Scanner::new(move |cursor| {
            let scan = self.scan(&key, cursor, &pattern, page_size)?;
            Ok((scan.cursor, scan.items))
        })
    }

    pub fn inter(&self, keys: &[&str]) -> Result<Vec<ZItem>> {
        self.db.view(|tx| ZSetTx::new(tx).inter(keys))
    }

    pub fn inter_store(
        &self,
        dest: &str,
        keys: &[&str],
        weights: Option<&[f64]>,
        aggregate: Aggregate,
    ) -> Result<usize> {
        self.db
            .update(|tx| ZSetTx::new(tx).inter_store(dest, keys, weights, aggregate))
    }

    pub fn union(&self, keys: &[&str]) -> Result<Vec<ZItem>> {
        self.db.view(|tx| ZSetTx::new(tx).union(keys))
    }

    pub fn union_store(
        &self,
        dest: &str,
        keys: &[&str],
        weights: Option<&[f64]>,
        aggregate: Aggregate,
    ) -> Result<usize> {
        self.db
            .update(|tx| ZSetTx::new(tx).union_store(dest, keys, weights, aggregate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn open() -> Db {
        Db::open(":memory:").unwrap()
    }

    fn names(items: &[ZItem]) -> Vec<String> {
        items.iter().map(|it| it.elem.to_string()).collect()
    }

    #[test]
    fn test_add_and_score() {
        let db = open();
        assert!(db.zset().add("board", "one", 10.0).unwrap());
        assert!(!db.zset().add("board", "one", 15.0).unwrap());
        assert_eq!(db.zset().get_score("board", "one").unwrap(), 15.0);
        assert_eq!(db.zset().get_score("board", "two"), Err(Error::NotFound));
        assert_eq!(db.zset().len("board").unwrap(), 1);
    }

    #[test]
    fn test_add_many() {
        let db = open();
        let created = db
            .zset()
            .add_many("board", &[("one", 1.0), ("two", 2.0), ("thr", 3.0)])
            .unwrap();
        assert_eq!(created, 3);
        let created = db
            .zset()
            .add_many("board", &[("two", 20.0), ("fou", 4.0)])
            .unwrap();
        assert_eq!(created, 1);
        assert_eq!(db.zset().len("board").unwrap(), 4);
        assert_eq!(db.zset().get_score("board", "two").unwrap(), 20.0);
    }

    #[test]
    fn test_incr() {
        let db = open();
        assert_eq!(db.zset().incr("board", "one", 5.0).unwrap(), 5.0);
        assert_eq!(db.zset().incr("board", "one", 2.5).unwrap(), 7.5);
        assert_eq!(db.zset().len("board").unwrap(), 1);
    }

    #[test]
    fn test_rank_ordering() {
        let db = open();
        db.zset()
            .add_many("board", &[("b", 2.0), ("a", 1.0), ("c", 2.0)])
            .unwrap();
        // (score asc, elem asc): a=1, b=2, c=2.
        assert_eq!(db.zset().get_rank("board", "a", false).unwrap(), 0);
        assert_eq!(db.zset().get_rank("board", "b", false).unwrap(), 1);
        assert_eq!(db.zset().get_rank("board", "c", false).unwrap(), 2);
        assert_eq!(db.zset().get_rank("board", "a", true).unwrap(), 2);
        assert_eq!(db.zset().get_rank("board", "zz", false), Err(Error::NotFound));
    }

    #[test]
    fn test_range_by_rank() {
        let db = open();
        db.zset()
            .add_many("board", &[("one", 1.0), ("two", 2.0), ("thr", 3.0)])
            .unwrap();
        let items = db.zset().range("board", 0, -1).unwrap();
        assert_eq!(names(&items), vec!["one", "two", "thr"]);

        let items = db.zset().range("board", 1, 2).unwrap();
        assert_eq!(names(&items), vec!["two", "thr"]);

        let items = db
            .zset()
            .range_with("board")
            .by_rank(0, 1)
            .rev()
            .run()
            .unwrap();
        assert_eq!(names(&items), vec!["thr", "two"]);

        assert!(db.zset().range("nope", 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_range_by_score_rev() {
        let db = open();
        db.zset()
            .add_many(
                "board",
                &[("one", 10.0), ("two", 20.0), ("thr", 30.0), ("2nd", 20.0)],
            )
            .unwrap();

        let items = db
            .zset()
            .range_with("board")
            .by_score(0.0, 50.0)
            .rev()
            .run()
            .unwrap();
        assert_eq!(names(&items), vec!["thr", "two", "2nd", "one"]);
    }

    #[test]
    fn test_range_by_score_bounds() {
        let db = open();
        db.zset()
            .add_many("board", &[("one", 1.0), ("two", 2.0), ("thr", 3.0)])
            .unwrap();

        let items = db
            .zset()
            .range_with("board")
            .by_score(1.0, 3.0)
            .min_exclusive()
            .run()
            .unwrap();
        assert_eq!(names(&items), vec!["two", "thr"]);

        let items = db
            .zset()
            .range_with("board")
            .by_score(1.0, 3.0)
            .max_exclusive()
            .run()
            .unwrap();
        assert_eq!(names(&items), vec!["one", "two"]);

        let items = db
            .zset()
            .range_with("board")
            .by_score(f64::NEG_INFINITY, f64::INFINITY)
            .offset(1)
            .count(1)
            .run()
            .unwrap();
        assert_eq!(names(&items), vec!["two"]);
    }

    #[test]
    fn test_count() {
        let db = open();
        db.zset()
            .add_many("board", &[("one", 1.0), ("two", 2.0), ("thr", 3.0)])
            .unwrap();
        assert_eq!(db.zset().count("board", 2.0, 3.0).unwrap(), 2);
        assert_eq!(db.zset().count("board", 10.0, 20.0).unwrap(), 0);
        assert_eq!(db.zset().count("nope", 0.0, 1.0).unwrap(), 0);
    }

    #[test]
    fn test_delete() {
        let db = open();
        db.zset()
            .add_many("board", &[("one", 1.0), ("two", 2.0), ("thr", 3.0)])
            .unwrap();
        assert_eq!(db.zset().delete("board", &["one", "nope"]).unwrap(), 1);
        assert_eq!(db.zset().len("board").unwrap(), 2);
    }

    #[test]
    fn test_delete_by_rank() {
        let db = open();
        db.zset()
            .add_many(
                "board",
                &[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)],
            )
            .unwrap();
        assert_eq!(db.zset().delete_by_rank("board", 0, 1).unwrap(), 2);
        let items = db.zset().range("board", 0, -1).unwrap();
        assert_eq!(names(&items), vec!["c", "d"]);
        assert_eq!(db.zset().len("board").unwrap(), 2);
    }

    #[test]
    fn test_delete_by_score() {
        let db = open();
        db.zset()
            .add_many("board", &[("a", 1.0), ("b", 2.0), ("c", 3.0)])
            .unwrap();
        assert_eq!(db.zset().delete_by_score("board", 1.5, 3.0).unwrap(), 2);
        assert_eq!(names(&db.zset().range("board", 0, -1).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_inter_store_aggregate() {
        let db = open();
        db.zset()
            .add_many("k1", &[("one", 1.0), ("two", 2.0), ("thr", 3.0)])
            .unwrap();
        db.zset()
            .add_many("k2", &[("two", 20.0), ("thr", 3.0), ("fou", 4.0)])
            .unwrap();
        db.zset()
            .add_many(
                "k3",
                &[("one", 1.0), ("two", 200.0), ("thr", 3.0), ("fou", 400.0)],
            )
            .unwrap();

        let n = db
            .zset()
            .inter_store("dest", &["k1", "k2", "k3"], None, Aggregate::Sum)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(db.zset().get_score("dest", "two").unwrap(), 222.0);
        assert_eq!(db.zset().get_score("dest", "thr").unwrap(), 9.0);

        let n = db
            .zset()
            .inter_store("dest", &["k1", "k2", "k3"], None, Aggregate::Min)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(db.zset().get_score("dest", "two").unwrap(), 2.0);
        assert_eq!(db.zset().get_score("dest", "thr").unwrap(), 3.0);
    }

    #[test]
    fn test_inter_store_overwrites_dest() {
        let db = open();
        db.zset().add("k1", "one", 1.0).unwrap();
        db.zset().add("k2", "one", 2.0).unwrap();
        db.zset().add("dest", "old", 9.0).unwrap();

        let n = db
            .zset()
            .inter_store("dest", &["k1", "k2"], None, Aggregate::Sum)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(db.zset().get_score("dest", "old"), Err(Error::NotFound));
        assert_eq!(db.zset().get_score("dest", "one").unwrap(), 3.0);
    }

    #[test]
    fn test_inter_store_empty_result() {
        let db = open();
        db.zset().add("k1", "one", 1.0).unwrap();
        db.zset().add("k2", "two", 1.0).unwrap();
        db.zset().add("dest", "old", 1.0).unwrap();

        let n = db
            .zset()
            .inter_store("dest", &["k1", "k2"], None, Aggregate::Sum)
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(db.zset().len("dest").unwrap(), 0);
    }

    #[test]
    fn test_store_wrong_typed_dest() {
        let db = open();
        db.zset().add("k1", "one", 1.0).unwrap();
        db.str().set("dest", "old").unwrap();

        // Empty result: destination preserved, no error.
        let n = db
            .zset()
            .inter_store("dest", &["k1", "missing"], None, Aggregate::Sum)
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(db.str().get("dest").unwrap().unwrap(), "old");

        // Non-empty result: rejected, destination preserved.
        assert_eq!(
            db.zset()
                .inter_store("dest", &["k1"], None, Aggregate::Sum),
            Err(Error::KeyType)
        );
        assert_eq!(db.str().get("dest").unwrap().unwrap(), "old");
    }

    #[test]
    fn test_union_store_weights() {
        let db = open();
        db.zset()
            .add_many("k1", &[("one", 1.0), ("two", 2.0)])
            .unwrap();
        db.zset()
            .add_many("k2", &[("two", 10.0), ("thr", 3.0)])
            .unwrap();

        let n = db
            .zset()
            .union_store("dest", &["k1", "k2"], Some(&[2.0, 1.0]), Aggregate::Sum)
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(db.zset().get_score("dest", "one").unwrap(), 2.0);
        assert_eq!(db.zset().get_score("dest", "two").unwrap(), 14.0);
        assert_eq!(db.zset().get_score("dest", "thr").unwrap(), 3.0);

        assert_eq!(
            db.zset()
                .union_store("dest", &["k1", "k2"], Some(&[1.0]), Aggregate::Sum),
            Err(Error::InvalidArgNum)
        );
    }

    #[test]
    fn test_aggregate_parse() {
        assert_eq!("sum".parse::<Aggregate>().unwrap(), Aggregate::Sum);
        assert_eq!("MIN".parse::<Aggregate>().unwrap(), Aggregate::Min);
        assert_eq!("max".parse::<Aggregate>().unwrap(), Aggregate::Max);
        assert_eq!("avg".parse::<Aggregate>(), Err(Error::SyntaxError));
    }

    #[test]
    fn test_scan() {
        let db = open();
        db.zset()
            .add_many("board", &[("f1", 1.0), ("f2", 2.0), ("g1", 3.0)])
            .unwrap();
        let page = db.zset().scan("board", 0, "f*", 10).unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[test]
    fn test_type_conflict() {
        let db = open();
        db.str().set("k", "v").unwrap();
        assert_eq!(db.zset().add("k", "one", 1.0), Err(Error::KeyType));
        assert_eq!(db.str().get("k").unwrap().unwrap(), "v");
    }
}
