//! Transaction capability and value bridging between drivers.
//!
//! `Tx` is the narrow surface repositories program against: `query`,
//! `query_row`, `exec`, plus the active dialect. Canonical SQL is
//! rewritten for the engine at this boundary, so repositories never
//! see driver-specific text.

use bytes::BytesMut;
use postgres::error::SqlState;
use postgres::types::{IsNull, ToSql, Type};
use rb_core::{Error, Result};
use rusqlite::types::ValueRef;

use crate::dialect::Dialect;
use crate::token::Token;

/// A bind argument for a canonical query.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// A SQL NULL in an integer position (e.g. `etime`).
    Null,
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Real(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Text(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Text(v)
    }
}

impl From<&[u8]> for Arg {
    fn from(v: &[u8]) -> Self {
        Arg::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Bytes(v)
    }
}

impl From<Option<i64>> for Arg {
    fn from(v: Option<i64>) -> Self {
        match v {
            Some(n) => Arg::Int(n),
            None => Arg::Null,
        }
    }
}

impl From<&rb_core::Value> for Arg {
    fn from(v: &rb_core::Value) -> Self {
        Arg::Bytes(v.bytes().to_vec())
    }
}

fn arg_to_sqlite(arg: &Arg) -> rusqlite::types::Value {
    match arg {
        Arg::Int(v) => rusqlite::types::Value::Integer(*v),
        Arg::Real(v) => rusqlite::types::Value::Real(*v),
        Arg::Text(v) => rusqlite::types::Value::Text(v.clone()),
        Arg::Bytes(v) => rusqlite::types::Value::Blob(v.clone()),
        Arg::Null => rusqlite::types::Value::Null,
    }
}

// PostgreSQL infers parameter types from query context; an integer
// parameter compared against a literal may come back as int2/int4, so
// the integer variant adapts to whatever width the server expects.
impl ToSql for Arg {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Arg::Int(v) => {
                if *ty == Type::INT2 {
                    (*v as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*v as i32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Arg::Real(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Arg::Text(v) => v.as_str().to_sql(ty, out),
            Arg::Bytes(v) => v.as_slice().to_sql(ty, out),
            Arg::Null => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        self.to_sql(ty, out)
    }
}

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Null,
}

/// One eagerly decoded result row.
#[derive(Debug, Clone)]
pub struct Row(Vec<SqlValue>);

impl Row {
    pub fn int(&self, idx: usize) -> Result<i64> {
        match self.col(idx)? {
            SqlValue::Int(v) => Ok(*v),
            other => Err(Error::Db(format!("column {idx}: expected int, got {other:?}"))),
        }
    }

    pub fn opt_int(&self, idx: usize) -> Result<Option<i64>> {
        match self.col(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(v) => Ok(Some(*v)),
            other => Err(Error::Db(format!("column {idx}: expected int, got {other:?}"))),
        }
    }

    pub fn float(&self, idx: usize) -> Result<f64> {
        match self.col(idx)? {
            SqlValue::Float(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v as f64),
            other => Err(Error::Db(format!("column {idx}: expected float, got {other:?}"))),
        }
    }

    pub fn opt_float(&self, idx: usize) -> Result<Option<f64>> {
        match self.col(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Float(v) => Ok(Some(*v)),
            SqlValue::Int(v) => Ok(Some(*v as f64)),
            other => Err(Error::Db(format!("column {idx}: expected float, got {other:?}"))),
        }
    }

    pub fn text(&self, idx: usize) -> Result<String> {
        match self.col(idx)? {
            SqlValue::Text(v) => Ok(v.clone()),
            SqlValue::Blob(v) => Ok(String::from_utf8_lossy(v).into_owned()),
            other => Err(Error::Db(format!("column {idx}: expected text, got {other:?}"))),
        }
    }

    pub fn bytes(&self, idx: usize) -> Result<Vec<u8>> {
        match self.col(idx)? {
            SqlValue::Blob(v) => Ok(v.clone()),
            SqlValue::Text(v) => Ok(v.clone().into_bytes()),
            other => Err(Error::Db(format!("column {idx}: expected bytes, got {other:?}"))),
        }
    }

    fn col(&self, idx: usize) -> Result<&SqlValue> {
        self.0
            .get(idx)
            .ok_or_else(|| Error::Db(format!("column {idx} out of range")))
    }
}

pub(crate) enum TxInner<'c> {
    Sqlite(rusqlite::Transaction<'c>),
    Postgres(postgres::Transaction<'c>),
}

/// A database transaction capability.
///
/// Dropping a `Tx` without committing rolls the transaction back;
/// the envelope in [`crate::Db`] commits on success.
pub struct Tx<'c> {
    inner: TxInner<'c>,
    dialect: Dialect,
    token: Option<Token>,
}

impl<'c> Tx<'c> {
    pub(crate) fn sqlite(tx: rusqlite::Transaction<'c>, token: Option<Token>) -> Self {
        Tx {
            inner: TxInner::Sqlite(tx),
            dialect: Dialect::Sqlite,
            token,
        }
    }

    pub(crate) fn postgres(tx: postgres::Transaction<'c>, token: Option<Token>) -> Self {
        Tx {
            inner: TxInner::Postgres(tx),
            dialect: Dialect::Postgres,
            token,
        }
    }

    /// The engine this transaction runs against.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Translates a glob pattern into the bind argument this engine
    /// matches with (`glob` on SQLite, `ilike` on PostgreSQL).
    pub fn pattern(&self, glob: &str) -> Arg {
        Arg::Text(self.dialect.pattern(glob))
    }

    /// Runs a canonical query, returning all rows.
    pub fn query(&mut self, sql: &str, args: &[Arg]) -> Result<Vec<Row>> {
        self.check_token()?;
        let sql = self.dialect.prepare(sql);
        let sql: &str = &sql;
        match &mut self.inner {
            TxInner::Sqlite(tx) => {
                let mut stmt = tx.prepare(sql).map_err(classify_sqlite)?;
                let ncols = stmt.column_count();
                let mut rows = stmt
                    .query(rusqlite::params_from_iter(args.iter().map(arg_to_sqlite)))
                    .map_err(classify_sqlite)?;
                let mut out = Vec::new();
                while let Some(row) = rows.next().map_err(classify_sqlite)? {
                    out.push(sqlite_row(row, ncols)?);
                }
                Ok(out)
            }
            TxInner::Postgres(tx) => {
                let params = pg_params(args);
                let rows = tx.query(sql, &params).map_err(classify_pg)?;
                rows.iter().map(pg_row).collect()
            }
        }
    }

    /// Runs a canonical query, returning the first row if any.
    pub fn query_row(&mut self, sql: &str, args: &[Arg]) -> Result<Option<Row>> {
        Ok(self.query(sql, args)?.into_iter().next())
    }

    /// Runs a canonical statement, returning the affected row count.
    pub fn exec(&mut self, sql: &str, args: &[Arg]) -> Result<u64> {
        self.check_token()?;
        let sql = self.dialect.prepare(sql);
        let sql: &str = &sql;
        match &mut self.inner {
            TxInner::Sqlite(tx) => {
                let mut stmt = tx.prepare(sql).map_err(classify_sqlite)?;
                let n = stmt
                    .execute(rusqlite::params_from_iter(args.iter().map(arg_to_sqlite)))
                    .map_err(classify_sqlite)?;
                Ok(n as u64)
            }
            TxInner::Postgres(tx) => {
                let params = pg_params(args);
                tx.execute(sql, &params).map_err(classify_pg)
            }
        }
    }

    pub(crate) fn commit(self) -> Result<()> {
        match self.inner {
            TxInner::Sqlite(tx) => tx.commit().map_err(classify_sqlite),
            TxInner::Postgres(tx) => tx.commit().map_err(classify_pg),
        }
    }

    fn check_token(&self) -> Result<()> {
        match &self.token {
            Some(token) if token.is_canceled() => Err(Error::Canceled),
            _ => Ok(()),
        }
    }
}

fn pg_params(args: &[Arg]) -> Vec<&(dyn ToSql + Sync)> {
    args.iter().map(|a| a as &(dyn ToSql + Sync)).collect()
}

fn sqlite_row(row: &rusqlite::Row<'_>, ncols: usize) -> Result<Row> {
    let mut cols = Vec::with_capacity(ncols);
    for i in 0..ncols {
        let val = match row.get_ref(i).map_err(classify_sqlite)? {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Int(v),
            ValueRef::Real(v) => SqlValue::Float(v),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        };
        cols.push(val);
    }
    Ok(Row(cols))
}

fn pg_row(row: &postgres::Row) -> Result<Row> {
    let mut cols = Vec::with_capacity(row.len());
    for (i, col) in row.columns().iter().enumerate() {
        let ty = col.type_();
        let val = if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)
                .map(|v| v.map(SqlValue::Int))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)
                .map(|v| v.map(|n| SqlValue::Int(n as i64)))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)
                .map(|v| v.map(|n| SqlValue::Int(n as i64)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i)
                .map(|v| v.map(SqlValue::Float))
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)
                .map(|v| v.map(|n| SqlValue::Float(n as f64)))
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i)
                .map(|v| v.map(SqlValue::Blob))
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i)
                .map(|v| v.map(|b| SqlValue::Int(b as i64)))
        } else {
            row.try_get::<_, Option<String>>(i)
                .map(|v| v.map(SqlValue::Text))
        };
        match val {
            Ok(Some(v)) => cols.push(v),
            Ok(None) => cols.push(SqlValue::Null),
            Err(err) => return Err(classify_pg(err)),
        }
    }
    Ok(Row(cols))
}

/// Maps a SQLite driver error into the engine taxonomy.
///
/// The NOT NULL violation on `rkey.type` is the type-conflict signal
/// (see the key repository); on `rlist.pos` it means a list insert
/// could not locate its pivot.
pub(crate) fn classify_sqlite(err: rusqlite::Error) -> Error {
    let msg = err.to_string();
    if msg.contains("NOT NULL constraint failed: rkey.type") {
        Error::KeyType
    } else if msg.contains("NOT NULL constraint failed: rlist.pos") {
        Error::NotFound
    } else if msg.contains("interrupted") {
        Error::Canceled
    } else {
        Error::Db(msg)
    }
}

/// Maps a PostgreSQL driver error into the engine taxonomy, reading
/// the structured error fields rather than the formatted message.
pub(crate) fn classify_pg(err: postgres::Error) -> Error {
    if let Some(db) = err.as_db_error() {
        if db.code() == &SqlState::NOT_NULL_VIOLATION {
            match (db.table(), db.column()) {
                (Some("rkey"), Some("type")) => return Error::KeyType,
                (Some("rlist"), Some("pos")) => return Error::NotFound,
                _ => {}
            }
        }
        if db.code() == &SqlState::QUERY_CANCELED {
            return Error::Canceled;
        }
        return Error::Db(db.message().to_string());
    }
    Error::Db(err.to_string())
}
