//! Binary values with typed accessors.

use bytes::Bytes;

use crate::error::{Error, Result};

/// A value stored by the engine.
///
/// Values are opaque byte strings. Numeric operations (INCR and
/// friends) parse the decimal text representation on demand and fail
/// with [`Error::ValueType`] when the bytes are not a valid number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Value(Bytes);

impl Value {
    /// Creates a value from anything byte-like.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Value(data.into())
    }

    /// Returns the raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the value, returning the underlying bytes.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value as UTF-8 text, or `Error::ValueType` if the
    /// bytes are not valid UTF-8.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.0).map_err(|_| Error::ValueType)
    }

    /// Parses the value as a signed integer.
    pub fn as_int(&self) -> Result<i64> {
        self.as_str()?.parse().map_err(|_| Error::ValueType)
    }

    /// Parses the value as a float.
    pub fn as_float(&self) -> Result<f64> {
        self.as_str()?.parse().map_err(|_| Error::ValueType)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value(Bytes::from(s.into_bytes()))
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value(Bytes::from(b))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value(Bytes::from(n.to_string().into_bytes()))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value(Bytes::from(n.to_string().into_bytes()))
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == other.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Value::from("42").as_int().unwrap(), 42);
        assert_eq!(Value::from("-7").as_int().unwrap(), -7);
        assert_eq!(Value::from("2.5").as_float().unwrap(), 2.5);
        assert_eq!(Value::from("abc").as_int(), Err(Error::ValueType));
        assert_eq!(Value::from("abc").as_float(), Err(Error::ValueType));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(42i64), Value::from("42"));
        assert_eq!(Value::from(b"raw".as_slice()).bytes(), b"raw");
        assert_eq!(Value::from("one"), "one");
    }

    #[test]
    fn test_binary_safe() {
        let val = Value::from(vec![0u8, 159, 146, 150]);
        assert_eq!(val.len(), 4);
        assert!(val.as_str().is_err());
    }
}
