//! Careline - safety classification and nurse escalation.
//!
//! This crate provides the command-line application:
//!
//! - `analyze`: classify a message and show the user response
//! - `escalate`: run the full pipeline, alerting the nurse team
//! - `callback`: request a nurse callback
//! - `status` / `recent`: inspect stored escalations
//!
//! # Usage
//!
//! ```ignore
//! use careline_app::commands;
//! use careline_core::classifier::ConversationContext;
//!
//! let config = commands::load_config(None)?;
//! let context = ConversationContext::new("user-1", "session-1");
//! let assessment = commands::analyze(&config, "I can't cope anymore", &context)?;
//! println!("{}", serde_json::to_string_pretty(&assessment)?);
//! ```

pub mod commands;
pub mod logging;

pub use logging::init_logging;
