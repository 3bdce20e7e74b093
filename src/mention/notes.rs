//! Bounded audit log attached to a Mention
//!
//! One line per decision, prefixed with a level/timestamp tag. The log
//! is append-only up to a hard cap; when it overflows, the oldest lines
//! are dropped so the most recent entries always survive.

use chrono::{SecondsFormat, Utc};

/// Characters of notes kept per mention.
pub const MAX_NOTES_LEN: usize = 1023;

/// Append a tagged entry, truncating from the front if needed.
pub fn append_note(notes: &str, level: &str, message: &str) -> String {
    let entry = format!(
        "[{} {}] {}",
        level,
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        message
    );

    let combined = if notes.is_empty() {
        entry
    } else {
        format!("{}\n{}", notes, entry)
    };

    truncate_front(&combined, MAX_NOTES_LEN)
}

/// Keep the newest `max` characters, dropping whole lines from the
/// front where possible.
fn truncate_front(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }

    let mut remaining = text;
    while remaining.len() > max {
        match remaining.split_once('\n') {
            Some((_, rest)) => remaining = rest,
            // A single oversized line: keep its tail.
            None => {
                let start = remaining.len() - max;
                // Step forward to a char boundary
                let start = (start..remaining.len())
                    .find(|i| remaining.is_char_boundary(*i))
                    .unwrap_or(remaining.len());
                return remaining[start..].to_string();
            }
        }
    }
    remaining.to_string()
}
