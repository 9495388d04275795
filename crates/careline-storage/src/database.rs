//! High-level database interface.

use std::path::PathBuf;

use careline_core::escalation::{
    DeliveryStatus, DispatchFlags, EscalationEvent, EscalationStore, OverallStatus, StoreError,
};
use directories::ProjectDirs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::models::EscalationRecord;
use crate::pool::ConnectionPool;
use crate::repository::{DeliveriesRepo, EscalationsRepo};

/// High-level database interface for Careline.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Create a new database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Create a new database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "careline", "careline")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("careline.db"))
    }

    // === Escalations ===

    /// Store a new escalation event.
    pub fn save_escalation(&self, event: &EscalationEvent) -> Result<()> {
        let conn = self.pool.get()?;
        EscalationsRepo::insert(&conn, event)?;
        debug!(escalation_id = %event.id(), "Stored escalation");
        Ok(())
    }

    /// Load an escalation event.
    pub fn get_escalation(&self, id: Uuid) -> Result<Option<EscalationEvent>> {
        let conn = self.pool.get()?;
        EscalationsRepo::get(&conn, id)
    }

    /// Record the dispatch flags of an escalation (once).
    pub fn record_flags(&self, id: Uuid, flags: &DispatchFlags) -> Result<()> {
        let conn = self.pool.get()?;
        EscalationsRepo::update_flags(&conn, id, flags)
    }

    /// Most recent escalations first.
    pub fn recent_escalations(&self, limit: i64) -> Result<Vec<EscalationRecord>> {
        let conn = self.pool.get()?;
        EscalationsRepo::get_recent(&conn, limit)
    }

    /// Escalations that reached no channel.
    pub fn undelivered_escalations(&self) -> Result<Vec<EscalationRecord>> {
        let conn = self.pool.get()?;
        EscalationsRepo::get_undelivered(&conn)
    }

    /// Total number of escalations.
    pub fn count_escalations(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        EscalationsRepo::count(&conn)
    }

    /// Number of escalations raised for a user.
    pub fn count_escalations_for_user(&self, user_id: &str) -> Result<i64> {
        let conn = self.pool.get()?;
        EscalationsRepo::count_for_user(&conn, user_id)
    }

    // === Delivery status ===

    /// Insert or replace the delivery status of an escalation.
    pub fn save_delivery_status(&self, status: &DeliveryStatus) -> Result<()> {
        let conn = self.pool.get()?;
        DeliveriesRepo::upsert(&conn, status)
    }

    /// Delivery status of an escalation.
    pub fn delivery_status(&self, id: Uuid) -> Result<Option<DeliveryStatus>> {
        let conn = self.pool.get()?;
        DeliveriesRepo::get(&conn, id)
    }

    /// Delivery statuses with the given overall status.
    pub fn deliveries_with_status(&self, status: OverallStatus) -> Result<Vec<DeliveryStatus>> {
        let conn = self.pool.get()?;
        DeliveriesRepo::get_by_status(&conn, status)
    }
}

impl EscalationStore for Database {
    fn save(&self, event: &EscalationEvent) -> std::result::Result<(), StoreError> {
        Ok(self.save_escalation(event)?)
    }

    fn update_flags(
        &self,
        escalation_id: Uuid,
        flags: &DispatchFlags,
    ) -> std::result::Result<(), StoreError> {
        Ok(self.record_flags(escalation_id, flags)?)
    }

    fn get(&self, escalation_id: Uuid) -> std::result::Result<Option<EscalationEvent>, StoreError> {
        Ok(self.get_escalation(escalation_id)?)
    }

    fn record_delivery_status(&self, status: &DeliveryStatus) -> std::result::Result<(), StoreError> {
        Ok(self.save_delivery_status(status)?)
    }

    fn query_delivery_status(
        &self,
        escalation_id: Uuid,
    ) -> std::result::Result<Option<DeliveryStatus>, StoreError> {
        Ok(self.delivery_status(escalation_id)?)
    }
}
