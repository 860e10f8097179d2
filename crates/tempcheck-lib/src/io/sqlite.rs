use crate::io::store::{format_timestamp, parse_cell, parse_timestamp, ReadingStore, Row, Source, Table, TIME_COLUMN};
use anyhow::{Context, Result};
use log::{debug, warn};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

/// Table holding the readings in every database file.
pub const READINGS_TABLE: &str = "home";

/// Which database file holds which source.
#[derive(Debug, Clone)]
enum Layout {
    /// `<dir>/temper.db` and `<dir>/zigbee.db`
    PerSource(PathBuf),
    /// One file whose `home` table carries every column of both sources.
    Shared(PathBuf),
}

/// SQLite-backed store. Every load or append opens its own connection, so
/// each access is one self-contained transaction.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    layout: Layout,
}

impl SqliteStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::PerSource(dir.into()),
        }
    }

    /// Both sources read from and written to the same database file.
    pub fn shared(path: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::Shared(path.into()),
        }
    }

    pub fn db_path(&self, source: Source) -> PathBuf {
        match &self.layout {
            Layout::PerSource(dir) => dir.join(format!("{}.db", source.table_name())),
            Layout::Shared(path) => path.clone(),
        }
    }

    /// Value columns created for a new `home` table.
    fn schema_columns(&self, source: Source) -> Vec<&'static str> {
        match self.layout {
            Layout::PerSource(_) => source.columns().to_vec(),
            Layout::Shared(_) => Source::Probe
                .columns()
                .iter()
                .chain(Source::Zigbee.columns())
                .copied()
                .collect(),
        }
    }
}

impl ReadingStore for SqliteStore {
    fn load(&self, source: Source) -> Result<Table> {
        let path = self.db_path(source);
        if !path.exists() {
            warn!("database {} not found, treating as empty", path.display());
            return Ok(Table::empty(source));
        }
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("opening {}", path.display()))?;
        if !has_table(&conn)? {
            warn!("{} has no {} table, treating as empty", path.display(), READINGS_TABLE);
            return Ok(Table::empty(source));
        }
        read_table_sqlite(&conn, source).with_context(|| format!("reading {}", path.display()))
    }

    fn append(&mut self, source: Source, row: &Row) -> Result<()> {
        self.append_many(source, std::slice::from_ref(row))
    }

    fn append_many(&mut self, source: Source, rows: &[Row]) -> Result<()> {
        let columns = source.columns();
        if let Some(bad) = rows.iter().find(|r| r.values.len() != columns.len()) {
            anyhow::bail!(
                "{} rows carry {} values, got {}",
                source.table_name(),
                columns.len(),
                bad.values.len()
            );
        }
        let path = self.db_path(source);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating store dir {}", parent.display()))?;
        }
        let mut conn = Connection::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let schema: Vec<String> = self
            .schema_columns(source)
            .iter()
            .map(|c| format!("{} REAL", c))
            .collect();
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({} TIMESTAMP, {})",
                READINGS_TABLE,
                TIME_COLUMN,
                schema.join(", ")
            ),
            [],
        )?;

        let insert = format!(
            "INSERT INTO {} ({}, {}) VALUES (?1, {})",
            READINGS_TABLE,
            TIME_COLUMN,
            columns.join(", "),
            (2..=columns.len() + 1)
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for row in rows {
                let mut params = Vec::with_capacity(columns.len() + 1);
                params.push(Value::Text(format_timestamp(row.time)));
                params.extend(row.values.iter().map(|v| v.map_or(Value::Null, Value::Real)));
                stmt.execute(params_from_iter(params.iter()))?;
            }
        }
        tx.commit()
            .with_context(|| format!("committing to {}", path.display()))?;
        debug!("{}: appended {} rows", path.display(), rows.len());
        Ok(())
    }
}

fn has_table(conn: &Connection) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [READINGS_TABLE],
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// `SELECT * FROM home`, keeping the columns of `source` by name. Rows with an
/// unreadable timestamp or an unconvertible cell are dropped.
fn read_table_sqlite(conn: &Connection, source: Source) -> Result<Table> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", READINGS_TABLE))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let locate = |wanted: &str| names.iter().position(|n| n.eq_ignore_ascii_case(wanted));
    let time_idx = locate(TIME_COLUMN).with_context(|| format!("missing {} column", TIME_COLUMN))?;
    let value_idx: Vec<Option<usize>> = source.columns().iter().map(|c| locate(c)).collect();

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    let mut cursor = stmt.query([])?;
    while let Some(record) = cursor.next()? {
        let time = text_of(record.get_ref(time_idx)?).and_then(parse_timestamp);
        let values: Option<Vec<Option<f64>>> = value_idx
            .iter()
            .map(|idx| match idx {
                Some(i) => record.get_ref(*i).ok().and_then(number_of),
                None => Some(None),
            })
            .collect();
        match (time, values) {
            (Some(time), Some(values)) => rows.push(Row::new(time, values)),
            _ => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!("{}: dropped {} malformed rows", source.table_name(), dropped);
    }
    Ok(Table::new(source, rows))
}

fn text_of(value: ValueRef<'_>) -> Option<&str> {
    match value {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    }
}

/// `Some(None)` for NULL, `None` when the cell cannot be a reading.
fn number_of(value: ValueRef<'_>) -> Option<Option<f64>> {
    match value {
        ValueRef::Null => Some(None),
        ValueRef::Integer(i) => Some(Some(i as f64)),
        ValueRef::Real(f) if f.is_finite() => Some(Some(f)),
        ValueRef::Real(_) => Some(None),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().and_then(|t| parse_cell(t).ok()),
        ValueRef::Blob(_) => None,
    }
}

/// Whether `path` looks like a SQLite database rather than a store directory.
pub fn is_database_file(path: &Path) -> bool {
    path.is_file()
        || path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("db") || ext.eq_ignore_ascii_case("sqlite"))
}
