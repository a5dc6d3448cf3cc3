//! Key metadata types.

use crate::error::{Error, Result};

/// Data type of a key.
///
/// The numeric values are stored in the `rkey.type` column and must
/// never change. `Any` (0) is only used as a filter wildcard in scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i64)]
pub enum TypeId {
    #[default]
    Any = 0,
    String = 1,
    List = 2,
    Set = 3,
    Hash = 4,
    ZSet = 5,
}

impl TypeId {
    /// Returns the registry value stored in the database.
    pub fn code(self) -> i64 {
        self as i64
    }

    /// Returns the type name as reported by the TYPE command.
    pub fn name(self) -> &'static str {
        match self {
            TypeId::Any => "any",
            TypeId::String => "string",
            TypeId::List => "list",
            TypeId::Set => "set",
            TypeId::Hash => "hash",
            TypeId::ZSet => "zset",
        }
    }
}

impl TryFrom<i64> for TypeId {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(TypeId::Any),
            1 => Ok(TypeId::String),
            2 => Ok(TypeId::List),
            3 => Ok(TypeId::Set),
            4 => Ok(TypeId::Hash),
            5 => Ok(TypeId::ZSet),
            other => Err(Error::Db(format!("unknown type id: {other}"))),
        }
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single row of the `rkey` table: one logical key with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    /// Internal key id (`rkey.id`), referenced by the typed tables.
    pub id: i64,
    /// Key name, unique across the database.
    pub key: String,
    /// Data type of the payload.
    pub ktype: TypeId,
    /// Monotonic per-key mutation counter.
    pub version: i64,
    /// Absolute expiration time in ms, `None` = no expiration.
    pub etime: Option<i64>,
    /// Last modification time in ms.
    pub mtime: i64,
}

impl Key {
    /// Reports whether the key is still live at the given time.
    pub fn is_live(&self, now: i64) -> bool {
        match self.etime {
            Some(etime) => etime > now,
            None => true,
        }
    }
}
