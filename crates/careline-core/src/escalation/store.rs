//! Persistence seam for escalations and their delivery status.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use uuid::Uuid;

use super::delivery::DeliveryStatus;
use super::event::{DispatchFlags, EscalationEvent};
use crate::error::ValidationError;

/// Errors raised by an [`EscalationStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No escalation with this id.
    #[error("escalation not found: {0}")]
    NotFound(Uuid),

    /// A stored record failed validation.
    #[error("invalid stored escalation: {0}")]
    Validation(#[from] ValidationError),

    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Where escalation events and delivery outcomes are kept.
pub trait EscalationStore: Send + Sync {
    /// Saves a new event.
    fn save(&self, event: &EscalationEvent) -> Result<(), StoreError>;

    /// Stores the dispatch flags of an existing event.
    fn update_flags(&self, escalation_id: Uuid, flags: &DispatchFlags) -> Result<(), StoreError>;

    /// Loads an event.
    fn get(&self, escalation_id: Uuid) -> Result<Option<EscalationEvent>, StoreError>;

    /// Upserts the delivery status of an escalation.
    fn record_delivery_status(&self, status: &DeliveryStatus) -> Result<(), StoreError>;

    /// Reads the delivery status of an escalation.
    fn query_delivery_status(
        &self,
        escalation_id: Uuid,
    ) -> Result<Option<DeliveryStatus>, StoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryEscalationStore {
    events: RwLock<HashMap<Uuid, EscalationEvent>>,
    statuses: RwLock<HashMap<Uuid, DeliveryStatus>>,
}

impl InMemoryEscalationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EscalationStore for InMemoryEscalationStore {
    fn save(&self, event: &EscalationEvent) -> Result<(), StoreError> {
        event.validate()?;
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.id(), event.clone());
        Ok(())
    }

    fn update_flags(&self, escalation_id: Uuid, flags: &DispatchFlags) -> Result<(), StoreError> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let event = events
            .get_mut(&escalation_id)
            .ok_or(StoreError::NotFound(escalation_id))?;
        event.record_dispatch(
            flags.notification_sent,
            flags.nurse_team_alerted,
            flags.response_generated,
        )?;
        Ok(())
    }

    fn get(&self, escalation_id: Uuid) -> Result<Option<EscalationEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&escalation_id)
            .cloned())
    }

    fn record_delivery_status(&self, status: &DeliveryStatus) -> Result<(), StoreError> {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(status.escalation_id, status.clone());
        Ok(())
    }

    fn query_delivery_status(
        &self,
        escalation_id: Uuid,
    ) -> Result<Option<DeliveryStatus>, StoreError> {
        Ok(self
            .statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&escalation_id)
            .cloned())
    }
}
