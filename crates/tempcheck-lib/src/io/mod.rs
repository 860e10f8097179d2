pub mod ingest;
pub mod sqlite;
pub mod store;

pub use ingest::{IngestGate, ZigbeeMessage};
pub use sqlite::SqliteStore;
pub use store::{CsvStore, MemoryStore, ReadingStore, Row, Source, Table};
