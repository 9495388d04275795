//! Escalations repository.

use careline_core::escalation::{DispatchFlags, EscalationEvent, EscalationType, UrgencyLevel};
use careline_core::{Severity, ValidationError};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::error::{Result, StorageError};
use crate::models::EscalationRecord;

/// Maximum preview length in characters.
const PREVIEW_MAX_LEN: usize = 50;

const RECORD_COLUMNS: &str = "id, user_id, session_id, severity, escalation_type, urgency,
     message_hash, message_preview, notification_sent, nurse_team_alerted,
     response_generated, flags_recorded_at, created_at";

/// Repository for escalation events.
pub struct EscalationsRepo;

impl EscalationsRepo {
    /// Insert a new event. The event is validated first.
    pub fn insert(conn: &Connection, event: &EscalationEvent) -> Result<()> {
        event.validate()?;
        let flags = event.flags();

        conn.execute(
            "INSERT INTO escalations (id, user_id, session_id, severity, escalation_type, urgency,
                 message_hash, message_preview, event_json, notification_sent, nurse_team_alerted,
                 response_generated, flags_recorded_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                event.id().to_string(),
                event.user_id,
                event.session_id,
                event.severity.as_str(),
                event.escalation_type.as_str(),
                event.urgency_level.as_str(),
                hash_message(&event.user_message),
                create_preview(&event.user_message),
                serde_json::to_string(event)?,
                flags.notification_sent,
                flags.nurse_team_alerted,
                flags.response_generated,
                flags.recorded_at.as_ref().map(format_datetime),
                format_datetime(&event.timestamp),
            ],
        )?;

        Ok(())
    }

    /// Load a full event. Stored events are re-validated.
    pub fn get(conn: &Connection, id: Uuid) -> Result<Option<EscalationEvent>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT event_json FROM escalations WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(json) = json else {
            return Ok(None);
        };
        let event: EscalationEvent = serde_json::from_str(&json)?;
        event.validate()?;
        Ok(Some(event))
    }

    /// Record the dispatch flags of an event. Fails if flags were already
    /// recorded.
    pub fn update_flags(conn: &Connection, id: Uuid, flags: &DispatchFlags) -> Result<()> {
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT event_json, flags_recorded_at FROM escalations WHERE id = ?1",
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((json, recorded_at)) = row else {
            return Err(StorageError::EscalationNotFound(id));
        };
        if recorded_at.is_some() {
            return Err(ValidationError::FlagsAlreadyRecorded(id).into());
        }

        let flags = DispatchFlags {
            recorded_at: Some(flags.recorded_at.unwrap_or_else(Utc::now)),
            ..flags.clone()
        };

        // Flags are flattened into the event document.
        let mut event: Value = serde_json::from_str(&json)?;
        let Value::Object(flag_fields) = serde_json::to_value(&flags)? else {
            return Err(StorageError::Corrupt("dispatch flags are not an object".into()));
        };
        event
            .as_object_mut()
            .ok_or_else(|| StorageError::Corrupt(format!("event {id} is not a JSON object")))?
            .extend(flag_fields);

        let updated = conn.execute(
            "UPDATE escalations SET event_json = ?2, notification_sent = ?3,
                 nurse_team_alerted = ?4, response_generated = ?5, flags_recorded_at = ?6
             WHERE id = ?1 AND flags_recorded_at IS NULL",
            params![
                id.to_string(),
                serde_json::to_string(&event)?,
                flags.notification_sent,
                flags.nurse_team_alerted,
                flags.response_generated,
                flags.recorded_at.as_ref().map(format_datetime),
            ],
        )?;

        if updated == 0 {
            return Err(ValidationError::FlagsAlreadyRecorded(id).into());
        }
        Ok(())
    }

    /// Most recent escalations first.
    pub fn get_recent(conn: &Connection, limit: i64) -> Result<Vec<EscalationRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM escalations
             ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))?;

        let rows = stmt
            .query_map([limit], RawRecord::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRecord::into_record).collect()
    }

    /// Escalations whose dispatch reached no channel.
    pub fn get_undelivered(conn: &Connection) -> Result<Vec<EscalationRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM escalations
             WHERE flags_recorded_at IS NOT NULL AND notification_sent = 0
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt
            .query_map([], RawRecord::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRecord::into_record).collect()
    }

    /// Count all escalations.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM escalations", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count escalations raised for one user.
    pub fn count_for_user(conn: &Connection, user_id: &str) -> Result<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM escalations WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Columns as read, before decoding.
struct RawRecord {
    id: String,
    user_id: String,
    session_id: String,
    severity: String,
    escalation_type: String,
    urgency: String,
    message_hash: String,
    message_preview: String,
    notification_sent: bool,
    nurse_team_alerted: bool,
    response_generated: bool,
    flags_recorded_at: Option<String>,
    created_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            session_id: row.get(2)?,
            severity: row.get(3)?,
            escalation_type: row.get(4)?,
            urgency: row.get(5)?,
            message_hash: row.get(6)?,
            message_preview: row.get(7)?,
            notification_sent: row.get(8)?,
            nurse_team_alerted: row.get(9)?,
            response_generated: row.get(10)?,
            flags_recorded_at: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<EscalationRecord> {
        let corrupt = |field: &str, value: &str| {
            StorageError::Corrupt(format!("unknown {field} {value:?}"))
        };

        Ok(EscalationRecord {
            id: parse_uuid(&self.id)?,
            severity: self
                .severity
                .parse::<Severity>()
                .map_err(|_| corrupt("severity", &self.severity))?,
            escalation_type: EscalationType::parse(&self.escalation_type)
                .ok_or_else(|| corrupt("escalation type", &self.escalation_type))?,
            urgency: UrgencyLevel::parse(&self.urgency)
                .ok_or_else(|| corrupt("urgency", &self.urgency))?,
            flags_recorded_at: self
                .flags_recorded_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            user_id: self.user_id,
            session_id: self.session_id,
            message_hash: self.message_hash,
            message_preview: self.message_preview,
            notification_sent: self.notification_sent,
            nurse_team_alerted: self.nurse_team_alerted,
            response_generated: self.response_generated,
        })
    }
}

/// Hash a message using SHA-256, hex encoded.
pub fn hash_message(message: &str) -> String {
    format!("{:x}", Sha256::digest(message.as_bytes()))
}

/// Create a preview from a message (truncated, control characters removed).
pub fn create_preview(message: &str) -> String {
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control())
        .take(PREVIEW_MAX_LEN)
        .collect();

    if message.chars().count() > PREVIEW_MAX_LEN {
        format!("{}...", cleaned)
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;
    use careline_core::classifier::{ConversationContext, MessageClassifier};
    use careline_core::EscalationEventFactory;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn event(user_id: &str, message: &str) -> EscalationEvent {
        let classifier = MessageClassifier::with_defaults().unwrap();
        let result = classifier.analyze(message, &ConversationContext::new(user_id, "session-1"));
        EscalationEventFactory::new()
            .create(user_id, "session-1", message, result, None)
            .unwrap()
    }

    fn flags(sent: bool, alerted: bool) -> DispatchFlags {
        DispatchFlags {
            notification_sent: sent,
            nurse_team_alerted: alerted,
            response_generated: true,
            recorded_at: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = setup_db();
        let event = event("user-1", "I want to kill myself");

        EscalationsRepo::insert(&conn, &event).unwrap();
        let loaded = EscalationsRepo::get(&conn, event.id()).unwrap().unwrap();

        assert_eq!(loaded, event);
        assert_eq!(EscalationsRepo::count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_get_missing() {
        let conn = setup_db();
        assert!(EscalationsRepo::get(&conn, Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let conn = setup_db();
        let event = event("user-1", "I want to kill myself");
        EscalationsRepo::insert(&conn, &event).unwrap();
        assert!(matches!(
            EscalationsRepo::insert(&conn, &event),
            Err(StorageError::Database(_))
        ));
    }

    #[test]
    fn test_update_flags_once() {
        let conn = setup_db();
        let event = event("user-1", "I want to kill myself");
        EscalationsRepo::insert(&conn, &event).unwrap();

        EscalationsRepo::update_flags(&conn, event.id(), &flags(true, false)).unwrap();

        let loaded = EscalationsRepo::get(&conn, event.id()).unwrap().unwrap();
        assert!(loaded.is_dispatch_recorded());
        assert!(loaded.flags().notification_sent);
        assert!(!loaded.flags().nurse_team_alerted);
        assert!(loaded.flags().response_generated);

        let err = EscalationsRepo::update_flags(&conn, event.id(), &flags(true, true)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::FlagsAlreadyRecorded(id)) if id == event.id()
        ));
    }

    #[test]
    fn test_update_flags_unknown_id() {
        let conn = setup_db();
        let id = Uuid::new_v4();
        assert!(matches!(
            EscalationsRepo::update_flags(&conn, id, &flags(true, true)),
            Err(StorageError::EscalationNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_get_recent_and_undelivered() {
        let conn = setup_db();
        let first = event("user-1", "I want to kill myself");
        let second = event("user-2", "I'm bleeding heavily and feel faint");
        EscalationsRepo::insert(&conn, &first).unwrap();
        EscalationsRepo::insert(&conn, &second).unwrap();
        EscalationsRepo::update_flags(&conn, first.id(), &flags(false, false)).unwrap();
        EscalationsRepo::update_flags(&conn, second.id(), &flags(true, true)).unwrap();

        let recent = EscalationsRepo::get_recent(&conn, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id());
        assert_eq!(recent[0].severity, Severity::Crisis);
        assert_eq!(recent[0].urgency, UrgencyLevel::Immediate);
        assert_eq!(recent[1].message_hash, hash_message("I want to kill myself"));

        let limited = EscalationsRepo::get_recent(&conn, 1).unwrap();
        assert_eq!(limited.len(), 1);

        let undelivered = EscalationsRepo::get_undelivered(&conn).unwrap();
        assert_eq!(undelivered.len(), 1);
        assert_eq!(undelivered[0].id, first.id());
        assert!(undelivered[0].flags_recorded_at.is_some());
    }

    #[test]
    fn test_count_for_user() {
        let conn = setup_db();
        EscalationsRepo::insert(&conn, &event("user-1", "I want to kill myself")).unwrap();
        EscalationsRepo::insert(&conn, &event("user-1", "I want to end my life")).unwrap();
        EscalationsRepo::insert(&conn, &event("user-2", "I want to kill myself")).unwrap();

        assert_eq!(EscalationsRepo::count_for_user(&conn, "user-1").unwrap(), 2);
        assert_eq!(EscalationsRepo::count_for_user(&conn, "user-3").unwrap(), 0);
    }

    #[test]
    fn test_hash_message() {
        let hash1 = hash_message("test");
        let hash2 = hash_message("test");
        let hash3 = hash_message("different");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_create_preview() {
        assert_eq!(create_preview("short"), "short");

        let long = "a".repeat(100);
        let preview = create_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), PREVIEW_MAX_LEN + 3);

        assert_eq!(create_preview("line\nbreak"), "linebreak");
    }
}
