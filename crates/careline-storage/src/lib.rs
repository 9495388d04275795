//! Careline Storage - SQLite persistence layer.
//!
//! This crate stores escalation events and their delivery status. It handles:
//!
//! - Escalation events (full event as JSON plus message hash and preview)
//! - Dispatch flags, recorded once per event
//! - Per-channel delivery status
//!
//! [`Database`] implements [`careline_core::escalation::EscalationStore`],
//! so it can back a [`careline_core::SafetyPipeline`] directly.
//!
//! # Example
//!
//! ```no_run
//! use careline_storage::Database;
//!
//! let db = Database::in_memory().unwrap();
//! for record in db.recent_escalations(10).unwrap() {
//!     println!("{} {} {}", record.id, record.severity, record.message_preview);
//! }
//! ```

mod database;
pub mod error;
pub mod models;
mod pool;
pub mod repository;
mod schema;

pub use database::Database;
pub use error::{Result, StorageError};
pub use models::EscalationRecord;
pub use pool::ConnectionPool;
pub use repository::{create_preview, hash_message, DeliveriesRepo, EscalationsRepo};
