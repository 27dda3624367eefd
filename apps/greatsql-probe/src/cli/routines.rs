//! # Routines
//!
//! Routines that get run by a CLI command are plain async functions returning a
//! [`RoutineSuccess`] or a [`RoutineFailure`]. `main` turns them into the final
//! message and the process exit code.

use crate::cli::display::{Message, MessageType};

pub mod check;
pub mod serve;

#[derive(Debug, Clone)]
pub struct RoutineSuccess {
    pub message: Message,
    pub message_type: MessageType,
}

impl From<RoutineFailure> for anyhow::Error {
    fn from(failure: RoutineFailure) -> Self {
        if let Some(err) = failure.error {
            err
        } else {
            anyhow::anyhow!("{}: {}", failure.message.action, failure.message.details)
        }
    }
}

impl RoutineSuccess {
    pub fn success(message: Message) -> Self {
        Self {
            message,
            message_type: MessageType::Success,
        }
    }

    /// Nothing left to print, e.g. JSON output already written to stdout
    pub fn silent() -> Self {
        Self::success(Message::new(String::new(), String::new()))
    }
}

#[derive(Debug)]
pub struct RoutineFailure {
    pub message: Message,
    pub message_type: MessageType,
    pub error: Option<anyhow::Error>,
}

impl RoutineFailure {
    pub fn new<F: Into<anyhow::Error>>(message: Message, error: F) -> Self {
        Self {
            message,
            message_type: MessageType::Error,
            error: Some(error.into()),
        }
    }

    /// create a RoutineFailure error without an error
    pub fn error(message: Message) -> Self {
        Self {
            message,
            message_type: MessageType::Error,
            error: None,
        }
    }
}
