//! Inbound event records and text helpers for HTML replies.
//!
//! Replies are sent with Telegram's HTML parse mode, so every piece of
//! resident-supplied text goes through [`html_escape`] before it is embedded.

/// The resident behind an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: String,
}

/// A text message addressed to the bot.
#[derive(Debug, Clone)]
pub struct IncomingText {
    pub chat_id: i64,
    pub message_id: i64,
    /// Private chat with the bot (positive chat id on Telegram).
    pub is_private: bool,
    pub sender: Sender,
    pub text: String,
    /// The bot message this one replies to, if any. Used to route form submissions.
    pub reply_to_message_id: Option<i64>,
}

/// A button press on one of the bot's inline keyboards.
#[derive(Debug, Clone)]
pub struct IncomingCallback {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender: Sender,
    pub data: String,
}

/// Escape text for Telegram HTML parse mode.
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            _ => result.push(c),
        }
    }
    result
}

/// Cut `s` to at most `budget` characters, marking the cut with `…`.
///
/// The ellipsis counts toward the budget.
pub fn truncate_chars(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        return s.to_string();
    }
    if budget == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(budget - 1).collect();
    out.push('…');
    out
}
