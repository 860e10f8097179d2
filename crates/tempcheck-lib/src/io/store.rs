use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim, WriterBuilder};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub(crate) const TIME_COLUMN: &str = "time";
const WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// USB probe with internal and external temperature
    Probe,
    /// Zigbee temperature/humidity sensor
    Zigbee,
}

impl Source {
    pub fn table_name(self) -> &'static str {
        match self {
            Source::Probe => "temper",
            Source::Zigbee => "zigbee",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Source::Probe => &["temp_in", "temp_out"],
            Source::Zigbee => &["temp_zb", "hum_zb"],
        }
    }
}

/// One stored reading. `values` follows `Source::columns` order; `None` is a cell
/// that was not available when the row was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub time: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

impl Row {
    pub fn new(time: NaiveDateTime, values: Vec<Option<f64>>) -> Self {
        Self { time, values }
    }

    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|v| v.is_none())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub source: Source,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(source: Source, rows: Vec<Row>) -> Self {
        Self { source, rows }
    }

    pub fn empty(source: Source) -> Self {
        Self::new(source, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Access to the per-source reading tables. The pipeline only loads; the
/// ingestion side only appends.
pub trait ReadingStore {
    fn load(&self, source: Source) -> Result<Table>;
    fn append(&mut self, source: Source, row: &Row) -> Result<()>;

    /// Append several rows; backends with transactions write them in one.
    fn append_many(&mut self, source: Source, rows: &[Row]) -> Result<()> {
        for row in rows {
            self.append(source, row)?;
        }
        Ok(())
    }
}

/// One CSV file per source under `dir` (`temper.csv`, `zigbee.csv`).
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn table_path(&self, source: Source) -> PathBuf {
        self.dir.join(format!("{}.csv", source.table_name()))
    }
}

impl ReadingStore for CsvStore {
    fn load(&self, source: Source) -> Result<Table> {
        let path = self.table_path(source);
        if !path.exists() {
            warn!("table {} not found, treating as empty", path.display());
            return Ok(Table::empty(source));
        }
        read_table_csv(&path, source)
    }

    fn append(&mut self, source: Source, row: &Row) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating store dir {}", self.dir.display()))?;
        append_row_csv(&self.table_path(source), source, row)
    }
}

/// In-process store, mostly for tests and synthetic data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: HashMap<Source, Vec<Row>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.insert(table.source, table.rows);
        self
    }
}

impl ReadingStore for MemoryStore {
    fn load(&self, source: Source) -> Result<Table> {
        let rows = self.tables.get(&source).cloned().unwrap_or_default();
        Ok(Table::new(source, rows))
    }

    fn append(&mut self, source: Source, row: &Row) -> Result<()> {
        anyhow::ensure!(
            row.values.len() == source.columns().len(),
            "{} rows carry {} values, got {}",
            source.table_name(),
            source.columns().len(),
            row.values.len()
        );
        self.tables.entry(source).or_default().push(row.clone());
        Ok(())
    }
}

/// Read one source table. Rows with an unreadable timestamp, a non-numeric
/// cell or bytes that are not UTF-8 are dropped; a missing value column reads
/// as all-missing.
pub fn read_table_csv(path: &Path, source: Source) -> Result<Table> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers().context("reading header")?.clone();
    let time_idx = locate_column(&headers, TIME_COLUMN)
        .with_context(|| format!("missing {} column in {}", TIME_COLUMN, path.display()))?;
    let value_idx: Vec<Option<usize>> = source
        .columns()
        .iter()
        .map(|col| locate_column(&headers, col))
        .collect();

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for (line, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("reading record {}", line + 1))?;
        match parse_record(&record, time_idx, &value_idx) {
            Some(row) => rows.push(row),
            None => {
                debug!("{}: dropping malformed row {}", path.display(), line + 1);
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        warn!("{}: dropped {} malformed rows", path.display(), dropped);
    }
    Ok(Table::new(source, rows))
}

fn parse_record(record: &ByteRecord, time_idx: usize, value_idx: &[Option<usize>]) -> Option<Row> {
    let field = |i: usize| std::str::from_utf8(record.get(i)?).ok();
    let time = parse_timestamp(field(time_idx)?)?;
    let mut values = Vec::with_capacity(value_idx.len());
    for idx in value_idx {
        let cell = match idx {
            Some(i) if *i < record.len() => field(*i)?,
            _ => "",
        };
        values.push(parse_cell(cell).ok()?);
    }
    Some(Row::new(time, values))
}

/// `Ok(None)` for an empty/null cell, `Err` for text that is not a number.
pub(crate) fn parse_cell(cell: &str) -> std::result::Result<Option<f64>, ()> {
    let trimmed = cell.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("nan")
    {
        return Ok(None);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(()),
    }
}

fn locate_column(headers: &StringRecord, requested: &str) -> Option<usize> {
    headers
        .iter()
        .position(|name| name.eq_ignore_ascii_case(requested))
}

/// Parse the timestamp layouts written by the ingestion side: Python's
/// `str(datetime)`, ISO-8601 with `T`, or RFC 3339 (offset dropped).
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(t);
        }
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.naive_local())
}

pub fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(WRITE_FORMAT).to_string()
}

fn append_row_csv(path: &Path, source: Source, row: &Row) -> Result<()> {
    anyhow::ensure!(
        row.values.len() == source.columns().len(),
        "{} rows carry {} values, got {}",
        source.table_name(),
        source.columns().len(),
        row.values.len()
    );
    let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {} for append", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    if is_new {
        let mut header = vec![TIME_COLUMN];
        header.extend_from_slice(source.columns());
        writer.write_record(&header)?;
    }
    let mut record = vec![format_timestamp(row.time)];
    record.extend(
        row.values
            .iter()
            .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
    );
    writer.write_record(&record)?;
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}
