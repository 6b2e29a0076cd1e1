//! Working copy bookkeeping schema and per-table change capture.
//!
//! Each dataset table gets three triggers that record the primary key of
//! every inserted, updated or deleted row in `_strata_track`. A key change
//! also records the key the row was moved from, following earlier moves so
//! that `moved_from` always names the key the row had at the last sync.

use rusqlite::{Connection, Result};

use crate::model::Schema;

/// Current working copy layout version.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// `_strata_state.table_name` for repository-wide entries.
pub const GLOBAL: &str = "*";

/// Bookkeeping tables, created on open.
///
/// `pk` and `moved_from` have no declared type so integer and text keys
/// keep their storage class.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS _strata_state (
    table_name TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (table_name, key)
);

CREATE TABLE IF NOT EXISTS _strata_track (
    table_name TEXT NOT NULL,
    pk NOT NULL,
    moved_from,
    PRIMARY KEY (table_name, pk)
);
";

/// Apply pragmas and create the bookkeeping tables.
///
/// # Errors
///
/// Returns an error if the schema cannot be created.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO _strata_state (table_name, key, value) VALUES (?1, 'schema_version', ?2)",
        rusqlite::params![GLOBAL, CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Quote an SQL identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an SQL string literal.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `CREATE TABLE` statement for a dataset table.
#[must_use]
pub fn create_table_sql(table: &str, schema: &Schema) -> String {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| {
            let mut def = quote_ident(&c.name);
            if !c.data_type.is_empty() {
                def.push(' ');
                def.push_str(&c.data_type);
            }
            if c.primary_key {
                def.push_str(" PRIMARY KEY");
            }
            def
        })
        .collect();
    format!(
        "CREATE TABLE {} (\n    {}\n);",
        quote_ident(table),
        columns.join(",\n    ")
    )
}

fn trigger_names(table: &str) -> [String; 3] {
    ["ins", "upd", "del"].map(|op| quote_ident(&format!("_strata_{op}_{table}")))
}

/// Change capture triggers for a dataset table.
#[must_use]
pub fn create_triggers_sql(table: &str, pk: &str) -> String {
    let [ins, upd, del] = trigger_names(table);
    let t = quote_ident(table);
    let name = quote_literal(table);
    let pk = quote_ident(pk);
    format!(
        r"
CREATE TRIGGER IF NOT EXISTS {ins} AFTER INSERT ON {t}
BEGIN
    INSERT INTO _strata_track (table_name, pk) VALUES ({name}, NEW.{pk})
    ON CONFLICT(table_name, pk) DO NOTHING;
END;

CREATE TRIGGER IF NOT EXISTS {upd} AFTER UPDATE ON {t}
BEGIN
    INSERT INTO _strata_track (table_name, pk, moved_from)
    VALUES (
        {name},
        NEW.{pk},
        CASE WHEN OLD.{pk} IS NOT NEW.{pk} THEN COALESCE(
            (SELECT moved_from FROM _strata_track WHERE table_name = {name} AND pk = OLD.{pk}),
            OLD.{pk}
        ) END
    )
    ON CONFLICT(table_name, pk) DO UPDATE SET moved_from = COALESCE(excluded.moved_from, moved_from);
    INSERT INTO _strata_track (table_name, pk)
    SELECT {name}, OLD.{pk} WHERE OLD.{pk} IS NOT NEW.{pk}
    ON CONFLICT(table_name, pk) DO NOTHING;
END;

CREATE TRIGGER IF NOT EXISTS {del} AFTER DELETE ON {t}
BEGIN
    INSERT INTO _strata_track (table_name, pk) VALUES ({name}, OLD.{pk})
    ON CONFLICT(table_name, pk) DO NOTHING;
END;
"
    )
}

/// Statements dropping the change capture triggers of a table.
#[must_use]
pub fn drop_triggers_sql(table: &str) -> String {
    trigger_names(table)
        .iter()
        .map(|t| format!("DROP TRIGGER IF EXISTS {t};"))
        .collect::<Vec<_>>()
        .join("\n")
}
