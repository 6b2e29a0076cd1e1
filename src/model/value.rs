//! Column values, features and primary keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single typed column value.
///
/// The variants mirror SQLite's storage classes so that rows round-trip
/// between the working copy and the repository without coercion.
/// Serialized with lowercase tags; blobs (e.g. geometries) as hex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(#[serde(with = "hex::serde")] Vec<u8>),
}

impl From<rusqlite::types::Value> for Value {
    fn from(v: rusqlite::types::Value) -> Self {
        match v {
            rusqlite::types::Value::Null => Self::Null,
            rusqlite::types::Value::Integer(i) => Self::Integer(i),
            rusqlite::types::Value::Real(f) => Self::Real(f),
            rusqlite::types::Value::Text(s) => Self::Text(s),
            rusqlite::types::Value::Blob(b) => Self::Blob(b),
        }
    }
}

impl From<&Value> for rusqlite::types::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Integer(i) => Self::Integer(*i),
            Value::Real(f) => Self::Real(*f),
            Value::Text(s) => Self::Text(s.clone()),
            Value::Blob(b) => Self::Blob(b.clone()),
        }
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// A whole row: column name to value, ordered by column name.
pub type Feature = BTreeMap<String, Value>;

/// Primary-key value of a feature.
///
/// Integer keys sort before text keys; within a kind the natural order applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Text(String),
}

impl PrimaryKey {
    /// The key as a column value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::Integer(*i),
            Self::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl TryFrom<&Value> for PrimaryKey {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        match v {
            Value::Integer(i) => Ok(Self::Int(*i)),
            Value::Text(s) => Ok(Self::Text(s.clone())),
            other => Err(Error::InvalidArgument(format!(
                "primary key must be an integer or text, got {other:?}"
            ))),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for PrimaryKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl rusqlite::ToSql for PrimaryKey {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            Self::Int(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Extract the primary key of a feature.
///
/// # Errors
///
/// Returns `InvalidArgument` if the key column is missing or not a valid key type.
pub fn feature_pk(feature: &Feature, pk_field: &str) -> Result<PrimaryKey> {
    let value = feature.get(pk_field).ok_or_else(|| {
        Error::InvalidArgument(format!("feature has no primary key field '{pk_field}'"))
    })?;
    PrimaryKey::try_from(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_json_shape() {
        let mut f = Feature::new();
        f.insert("fid".into(), Value::Integer(3));
        f.insert("geom".into(), Value::Blob(vec![0xde, 0xad]));
        f.insert("name".into(), Value::Null);

        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(
            json,
            r#"{"fid":{"integer":3},"geom":{"blob":"dead"},"name":"null"}"#
        );

        let back: Feature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn test_feature_pk_rejects_real() {
        let mut f = Feature::new();
        f.insert("fid".into(), Value::Real(1.5));
        assert!(feature_pk(&f, "fid").is_err());
        assert!(feature_pk(&f, "missing").is_err());
    }

    #[test]
    fn test_rusqlite_value_conversion() {
        let v: Value = rusqlite::types::Value::Text("x".into()).into();
        assert_eq!(v, Value::Text("x".into()));
        let back: rusqlite::types::Value = (&v).into();
        assert_eq!(back, rusqlite::types::Value::Text("x".into()));
    }
}
