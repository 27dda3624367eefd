//! # Display
//!
//! User facing output of the CLI. Every line is an action column (right aligned,
//! coloured by [`MessageType`]) followed by the details.
//!
//! Use the `show_message!` macro from anywhere in the crate; it also mirrors the
//! message into the log so a run can be reconstructed from the log file alone.

pub mod status;
pub mod terminal;

use serde::Serialize;

/// Environment variable that disables ANSI colours (<https://no-color.org>)
const NO_COLOR_ENV: &str = "NO_COLOR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageType {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub action: String,
    pub details: String,
}

impl Message {
    pub fn new(action: String, details: String) -> Self {
        Self { action, details }
    }
}

macro_rules! show_message {
    ($message_type:expr, $message:expr) => {
        $crate::cli::display::show_message_wrapper($message_type, $message)
    };
}

fn no_ansi() -> bool {
    std::env::var_os(NO_COLOR_ENV).is_some()
}

pub fn show_message_wrapper(message_type: MessageType, message: Message) {
    let written = terminal::write_action_line(
        &mut std::io::stdout().lock(),
        message_type,
        &message.action,
        &message.details,
        no_ansi(),
    );
    if let Err(e) = written {
        tracing::warn!("Failed to write message to the terminal: {}", e);
    }

    match message_type {
        MessageType::Error => tracing::error!("{}: {}", message.action, message.details),
        MessageType::Warning => tracing::warn!("{}: {}", message.action, message.details),
        _ => tracing::info!("{}: {}", message.action, message.details),
    }
}
