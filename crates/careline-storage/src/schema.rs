//! Database schema and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!(
            "Running migrations from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        if current_version < 1 {
            migrate_v1(conn)?;
        }

        if current_version < 2 {
            migrate_v2(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Migrations complete");
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration to version 1: escalation events.
///
/// The full event is kept as JSON for the nurse team; the message hash and
/// preview let listings avoid loading message bodies.
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("Applying migration v1: Escalations");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS escalations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            severity TEXT NOT NULL,
            escalation_type TEXT NOT NULL,
            urgency TEXT NOT NULL,
            message_hash TEXT NOT NULL,
            message_preview TEXT NOT NULL,
            event_json TEXT NOT NULL,
            notification_sent INTEGER NOT NULL DEFAULT 0,
            nurse_team_alerted INTEGER NOT NULL DEFAULT 0,
            response_generated INTEGER NOT NULL DEFAULT 0,
            flags_recorded_at TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_escalations_created_at ON escalations (created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_escalations_user_id ON escalations (user_id)",
        [],
    )?;

    Ok(())
}

/// Migration to version 2: per-channel delivery status.
fn migrate_v2(conn: &Connection) -> Result<()> {
    info!("Applying migration v2: Delivery status");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS delivery_status (
            escalation_id TEXT PRIMARY KEY,
            teams TEXT NOT NULL,
            email TEXT NOT NULL,
            overall_status TEXT NOT NULL,
            failures TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_delivery_status_overall ON delivery_status (overall_status)",
        [],
    )?;

    Ok(())
}
