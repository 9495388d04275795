//! Database repositories for each table.

pub mod deliveries;
pub mod escalations;

pub use deliveries::DeliveriesRepo;
pub use escalations::{create_preview, hash_message, EscalationsRepo};

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::error::{Result, StorageError};

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StorageError::Corrupt(format!("bad id {s:?}: {e}")))
}
