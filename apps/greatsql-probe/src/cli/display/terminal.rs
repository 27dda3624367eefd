//! Action column rendering: `[ACTION] details`, the action right-aligned in a fixed
//! column and coloured by message type.

use crossterm::{
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};
use std::io::{self, Write};

use super::MessageType;

pub const ACTION_WIDTH: usize = 15;

pub fn action_color(message_type: MessageType) -> Color {
    match message_type {
        MessageType::Info => Color::Cyan,
        MessageType::Success => Color::Green,
        MessageType::Warning => Color::Yellow,
        MessageType::Error => Color::Red,
    }
}

/// Cut by characters so multi-byte actions never split, then pad on the left
fn action_column(action: &str) -> String {
    let cut: String = action.chars().take(ACTION_WIDTH).collect();
    format!("{cut:>ACTION_WIDTH$}")
}

pub fn write_action_line<W: Write>(
    writer: &mut W,
    message_type: MessageType,
    action: &str,
    details: &str,
    no_ansi: bool,
) -> io::Result<()> {
    let column = action_column(action);

    if no_ansi {
        queue!(writer, Print(column))?;
    } else {
        queue!(
            writer,
            SetForegroundColor(action_color(message_type)),
            SetAttribute(Attribute::Bold),
            Print(column),
            SetAttribute(Attribute::Reset),
            ResetColor
        )?;
    }

    queue!(writer, Print(" "), Print(details), Print("\n"))?;
    writer.flush()
}
