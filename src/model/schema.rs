//! Dataset column layout, stored as the `schema` meta item.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One column of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// Declared SQL type, kept verbatim from the source (e.g. `INTEGER`, `MULTIPOLYGON`).
    pub data_type: String,
    #[serde(default)]
    pub primary_key: bool,
}

/// Ordered column list of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Name of the single primary-key column.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for tables without a key or with a composite key.
    pub fn primary_key(&self) -> Result<&str> {
        let mut pks = self.columns.iter().filter(|c| c.primary_key);
        match (pks.next(), pks.next()) {
            (Some(col), None) => Ok(&col.name),
            (None, _) => Err(Error::InvalidArgument(
                "table has no primary key column".to_string(),
            )),
            (Some(_), Some(_)) => Err(Error::InvalidArgument(
                "composite primary keys are not supported".to_string(),
            )),
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, pk: bool) -> Column {
        Column {
            name: name.into(),
            data_type: "INTEGER".into(),
            primary_key: pk,
        }
    }

    #[test]
    fn test_single_primary_key() {
        let schema = Schema::new(vec![col("fid", true), col("t50_fid", false)]);
        assert_eq!(schema.primary_key().unwrap(), "fid");
    }

    #[test]
    fn test_composite_primary_key_rejected() {
        let schema = Schema::new(vec![col("a", true), col("b", true)]);
        assert!(matches!(
            schema.primary_key(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(Schema::new(vec![col("a", false)]).primary_key().is_err());
    }
}
