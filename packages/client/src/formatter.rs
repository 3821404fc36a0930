//! Message formatting utilities for the terminal shell.

use hiroba_shared::time::millis_to_rfc3339;

use crate::client::{ConnectionInfo, ConnectionStatus};
use crate::history::ChatEntry;
use crate::presence::OnlineUser;

/// Message formatter for terminal display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format one history entry for display.
    ///
    /// System entries are a single narration line; chat entries carry the
    /// author, timestamp and the message id (needed for `/reply`), preceded
    /// by the quoted original when the entry is a reply.
    pub fn format_entry(entry: &ChatEntry) -> String {
        if entry.is_system {
            return format!("\n* {}\n", entry.text);
        }

        let mut output = String::from("\n");
        if let Some(reply) = &entry.reply_to {
            output.push_str(&format!("  > @{}: {}\n", reply.username, reply.text));
        }
        let me_suffix = if entry.is_local { " (me)" } else { "" };
        let timestamp_str = millis_to_rfc3339(entry.timestamp);
        output.push_str(&format!(
            "@{}{} [{}] ({}): {}\n",
            entry.username, me_suffix, timestamp_str, entry.id, entry.text
        ));
        output
    }

    /// Format the room roster shown by `/who`.
    pub fn format_roster(users: &[OnlineUser]) -> String {
        let mut output = String::new();
        output.push_str("\n============================================================\n");
        output.push_str("Online:\n");

        if users.is_empty() {
            output.push_str("(nobody here)\n");
        } else {
            for user in users {
                let me_suffix = if user.is_local { " (me)" } else { "" };
                output.push_str(&format!(
                    "{}{} - {}\n",
                    user.username, me_suffix, user.player_id
                ));
            }
        }

        output.push_str("============================================================\n");
        output
    }

    /// Format a connection status transition.
    pub fn format_connection(info: &ConnectionInfo) -> String {
        match info.status {
            ConnectionStatus::Connected => match info.rtt_ms {
                Some(rtt) => format!("connected ({} ms)", rtt),
                None => "connected".to_string(),
            },
            ConnectionStatus::Connecting => "connecting...".to_string(),
            ConnectionStatus::Disconnected => "disconnected".to_string(),
        }
    }
}
