//! Error taxonomy for the storage core.

/// Result type used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors originating from the storage core.
///
/// The first three are the ones repositories produce on their own;
/// the argument/syntax variants exist for callers that parse client
/// input (e.g. a RESP command layer) and want a single taxonomy.
/// Any error aborts the enclosing transaction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Key or element does not exist.
    #[error("key not found")]
    NotFound,

    /// Operation targets a key holding another data type.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    KeyType,

    /// Numeric operation on a non-numeric value (or vice versa).
    #[error("value is not a valid number")]
    ValueType,

    /// Wrong number of arguments for an operation.
    #[error("wrong number of arguments")]
    InvalidArgNum,

    /// Value is not a valid integer.
    #[error("value is not an integer or out of range")]
    InvalidInt,

    /// Value is not a valid float.
    #[error("value is not a valid float")]
    InvalidFloat,

    /// Malformed option or token.
    #[error("syntax error")]
    SyntaxError,

    /// Index is out of range.
    #[error("index out of range")]
    OutOfRange,

    /// Operation was canceled via a cancellation token.
    #[error("operation canceled")]
    Canceled,

    /// Underlying database error that maps to no specific variant.
    #[error("database error: {0}")]
    Db(String),
}

impl Error {
    /// Wraps an arbitrary driver error as a database error.
    pub fn db(err: impl std::fmt::Display) -> Self {
        Error::Db(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(Error::NotFound.to_string(), "key not found");
        assert_eq!(
            Error::KeyType.to_string(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );
        assert_eq!(Error::Db("boom".into()).to_string(), "database error: boom");
    }

    #[test]
    fn test_db_wrap() {
        let err = Error::db("no such table: rkey");
        assert_eq!(err, Error::Db("no such table: rkey".into()));
    }
}
