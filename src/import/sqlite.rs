//! Import source reading one table of a SQLite database.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use super::ImportSource;
use crate::error::{Error, Result};
use crate::model::{Column, Feature, Schema, Value};
use crate::working_copy::schema::quote_ident;

/// A table in a SQLite (or GeoPackage) file.
#[derive(Debug)]
pub struct SqliteImportSource {
    conn: Connection,
    table: String,
}

impl SqliteImportSource {
    /// Open `path` read-only and bind `table`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the table does not exist.
    pub fn open(path: &Path, table: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Self::from_connection(conn, table)
    }

    /// Bind `table` on an existing connection.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the table does not exist.
    pub fn from_connection(conn: Connection, table: &str) -> Result<Self> {
        let exists: bool = conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?
            .exists([table])?;
        if !exists {
            return Err(Error::not_found(format!("table '{table}'")));
        }
        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }

    /// Names of the user tables in a database, for listing candidates.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be read.
    pub fn list_tables(path: &Path) -> Result<Vec<String>> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE 'gpkg_%'
             AND name NOT LIKE 'rtree_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self
            .conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?
            .exists([name])?)
    }
}

impl ImportSource for SqliteImportSource {
    fn table(&self) -> &str {
        &self.table
    }

    fn schema(&self) -> Result<Schema> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(&self.table)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(Column {
                    name: row.get("name")?,
                    data_type: row.get("type")?,
                    primary_key: row.get::<_, i64>("pk")? > 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Schema::new(columns))
    }

    /// `title` comes from the GeoPackage contents table when present,
    /// otherwise it is the table name.
    fn meta_items(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let mut items = BTreeMap::new();
        let mut title = None;
        if self.has_table("gpkg_contents")? {
            title = self
                .conn
                .query_row(
                    "SELECT identifier FROM gpkg_contents WHERE table_name = ?1",
                    [&self.table],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten();
        }
        items.insert(
            "title".to_string(),
            serde_json::Value::String(title.unwrap_or_else(|| self.table.clone())),
        );
        Ok(items)
    }

    fn row_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table)),
            [],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| Error::Other(format!("bad row count {count}")))
    }

    fn for_each_feature(&self, f: &mut dyn FnMut(Feature) -> Result<()>) -> Result<()> {
        let pk = self.primary_key()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {}",
            quote_ident(&self.table),
            quote_ident(&pk)
        ))?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut feature = Feature::new();
            for (i, name) in names.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(i)?;
                feature.insert(name.clone(), Value::from(value));
            }
            f(feature)?;
        }
        Ok(())
    }
}
