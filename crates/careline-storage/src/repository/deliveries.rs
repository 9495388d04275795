//! Delivery status repository.

use careline_core::escalation::{DeliveryState, DeliveryStatus, OverallStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::error::{Result, StorageError};

/// Repository for per-escalation delivery status.
pub struct DeliveriesRepo;

impl DeliveriesRepo {
    /// Insert or replace the status of an escalation.
    pub fn upsert(conn: &Connection, status: &DeliveryStatus) -> Result<()> {
        conn.execute(
            "INSERT INTO delivery_status (escalation_id, teams, email, overall_status, failures, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(escalation_id) DO UPDATE SET
                 teams = excluded.teams,
                 email = excluded.email,
                 overall_status = excluded.overall_status,
                 failures = excluded.failures,
                 updated_at = excluded.updated_at",
            params![
                status.escalation_id.to_string(),
                status.teams.as_str(),
                status.email.as_str(),
                status.overall_status.as_str(),
                serde_json::to_string(&status.failures)?,
                format_datetime(&status.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Status of one escalation.
    pub fn get(conn: &Connection, escalation_id: Uuid) -> Result<Option<DeliveryStatus>> {
        let raw = conn
            .query_row(
                "SELECT escalation_id, teams, email, overall_status, failures, updated_at
                 FROM delivery_status WHERE escalation_id = ?1",
                [escalation_id.to_string()],
                RawStatus::from_row,
            )
            .optional()?;

        raw.map(RawStatus::into_status).transpose()
    }

    /// All escalations with the given overall status, oldest first.
    pub fn get_by_status(conn: &Connection, status: OverallStatus) -> Result<Vec<DeliveryStatus>> {
        let mut stmt = conn.prepare(
            "SELECT escalation_id, teams, email, overall_status, failures, updated_at
             FROM delivery_status WHERE overall_status = ?1 ORDER BY updated_at ASC",
        )?;

        let rows = stmt
            .query_map([status.as_str()], RawStatus::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawStatus::into_status).collect()
    }
}

struct RawStatus {
    escalation_id: String,
    teams: String,
    email: String,
    overall_status: String,
    failures: String,
    updated_at: String,
}

impl RawStatus {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            escalation_id: row.get(0)?,
            teams: row.get(1)?,
            email: row.get(2)?,
            overall_status: row.get(3)?,
            failures: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_status(self) -> Result<DeliveryStatus> {
        let state = |s: &str| {
            DeliveryState::parse(s)
                .ok_or_else(|| StorageError::Corrupt(format!("unknown delivery state {s:?}")))
        };

        Ok(DeliveryStatus {
            escalation_id: parse_uuid(&self.escalation_id)?,
            teams: state(&self.teams)?,
            email: state(&self.email)?,
            overall_status: OverallStatus::parse(&self.overall_status).ok_or_else(|| {
                StorageError::Corrupt(format!("unknown overall status {:?}", self.overall_status))
            })?,
            failures: serde_json::from_str(&self.failures)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}
