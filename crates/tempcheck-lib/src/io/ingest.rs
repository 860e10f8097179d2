use crate::io::store::{ReadingStore, Row, Source};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Payload published by zigbee2mqtt for a temperature/humidity sensor.
/// Fields other than the two readings (battery, linkquality, ...) are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZigbeeMessage {
    pub temperature: f64,
    pub humidity: f64,
}

impl ZigbeeMessage {
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).context("parsing zigbee message")
    }

    pub fn into_row(self, time: NaiveDateTime) -> Row {
        Row::new(time, vec![Some(self.temperature), Some(self.humidity)])
    }
}

/// Rate-limit state for one source, owned by the caller.
#[derive(Debug, Clone)]
pub struct IngestGate {
    min_interval: Duration,
    last: Option<NaiveDateTime>,
}

impl IngestGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Resume from the newest timestamp already stored.
    pub fn resume_from(min_interval: Duration, last: Option<NaiveDateTime>) -> Self {
        Self { min_interval, last }
    }

    pub fn last(&self) -> Option<NaiveDateTime> {
        self.last
    }

    /// Accept `now` when it is not older than the previous reading and at least
    /// `min_interval` has passed since it.
    pub fn admit(&mut self, now: NaiveDateTime) -> bool {
        let admitted = match self.last {
            None => true,
            Some(prev) => now >= prev && now - prev >= self.min_interval,
        };
        if admitted {
            self.last = Some(now);
        }
        admitted
    }
}

/// Append `row` to the `source` table if the gate lets it through.
/// Returns whether the row was stored.
pub fn record<S: ReadingStore + ?Sized>(
    store: &mut S,
    gate: &mut IngestGate,
    source: Source,
    row: &Row,
) -> Result<bool> {
    if !gate.admit(row.time) {
        debug!(
            "{}: skipping reading at {} (rate limited)",
            source.table_name(),
            row.time
        );
        return Ok(false);
    }
    store.append(source, row)?;
    info!("{}: stored reading at {}", source.table_name(), row.time);
    Ok(true)
}

/// Newest timestamp in the stored `source` table.
pub fn last_stored<S: ReadingStore + ?Sized>(store: &S, source: Source) -> Result<Option<NaiveDateTime>> {
    let table = store.load(source)?;
    Ok(table.rows.iter().map(|r| r.time).max())
}
