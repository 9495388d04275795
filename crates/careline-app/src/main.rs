//! Careline - safety classification and nurse escalation.
//!
//! Command output is JSON on stdout; logs go to stderr and a rotated file.

use std::path::PathBuf;

use anyhow::bail;
use careline_app::{commands, init_logging};
use clap::{Parser, Subcommand};
use serde::Serialize;

/// Careline - safety classification and nurse escalation
#[derive(Parser, Debug)]
#[command(name = "careline", version, about)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides the configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a message and print the result and user response
    Analyze {
        /// Message text
        message: String,
        #[command(flatten)]
        conversation: Conversation,
    },
    /// Classify a message and escalate it to the nurse team if needed
    Escalate {
        /// Message text
        message: String,
        #[command(flatten)]
        conversation: Conversation,
    },
    /// Request a nurse callback
    Callback {
        /// User identifier
        #[arg(long)]
        user: String,
        /// Session identifier
        #[arg(long, default_value = "cli")]
        session: String,
        /// Phone number to call back
        #[arg(long)]
        phone: Option<String>,
        /// Email address
        #[arg(long)]
        email: Option<String>,
        /// Reason for the callback
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show the delivery status of an escalation
    Status {
        /// Escalation id
        id: String,
    },
    /// List recent escalations
    Recent {
        /// Maximum number of escalations
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Only escalations that reached no channel
        #[arg(long)]
        undelivered: bool,
    },
}

#[derive(clap::Args, Debug)]
struct Conversation {
    /// User identifier
    #[arg(long, default_value = "cli-user")]
    user: String,
    /// Session identifier
    #[arg(long, default_value = "cli")]
    session: String,
    /// JSON file with the conversation context (history, profile)
    #[arg(long)]
    context: Option<PathBuf>,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.debug, &args.log_level);

    let config = commands::load_config(args.config.as_deref())?;

    match args.command {
        Command::Analyze {
            message,
            conversation,
        } => {
            let context = commands::load_context(
                conversation.context.as_deref(),
                &conversation.user,
                &conversation.session,
            )?;
            print_json(&commands::analyze(&config, &message, &context)?)?;
        }
        Command::Escalate {
            message,
            conversation,
        } => {
            let db = commands::open_database(&config, args.db.as_deref())?;
            let context = commands::load_context(
                conversation.context.as_deref(),
                &conversation.user,
                &conversation.session,
            )?;
            let outcome = commands::escalate(&config, &db, &message, context).await?;
            print_json(&outcome)?;

            if let Some(escalation) = &outcome.escalation {
                if !escalation.notified() {
                    bail!(
                        "Escalation {} was not delivered to any channel",
                        escalation.escalation_id
                    );
                }
            }
        }
        Command::Callback {
            user,
            session,
            phone,
            email,
            reason,
        } => {
            let db = commands::open_database(&config, args.db.as_deref())?;
            let outcome =
                commands::callback(&config, &db, &user, &session, phone, email, reason.as_deref())
                    .await?;
            print_json(&outcome)?;
        }
        Command::Status { id } => {
            let db = commands::open_database(&config, args.db.as_deref())?;
            match commands::status(&db, &id)? {
                Some(status) => print_json(&status)?,
                None => bail!("No delivery status recorded for {}", id),
            }
        }
        Command::Recent { limit, undelivered } => {
            let db = commands::open_database(&config, args.db.as_deref())?;
            print_json(&commands::recent(&db, limit, undelivered)?)?;
        }
    }

    Ok(())
}
