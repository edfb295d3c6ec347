use std::collections::HashMap;
use std::time::{Duration, Instant};

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Identical messages inside this window are forwarded once.
const REPEAT_WINDOW: Duration = Duration::from_secs(60);

/// Telegram's message length limit, with room for the prefix.
const MAX_LOG_CHARS: usize = 4000;

/// Forwards WARN and ERROR events to an admin chat.
pub struct AdminLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl AdminLogLayer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut filter = RepeatFilter::new(REPEAT_WINDOW);
            while let Some(text) = rx.recv().await {
                if filter.admit(&text, Instant::now()) {
                    send_log(&bot, chat_id, &text).await;
                }
            }
        });

        Self { tx }
    }
}

/// Drops a message when the same text was admitted less than `window` ago.
struct RepeatFilter {
    window: Duration,
    last_sent: HashMap<String, Instant>,
}

impl RepeatFilter {
    fn new(window: Duration) -> Self {
        Self { window, last_sent: HashMap::new() }
    }

    fn admit(&mut self, text: &str, now: Instant) -> bool {
        self.last_sent.retain(|_, at| now.duration_since(*at) < self.window);
        if self.last_sent.contains_key(text) {
            return false;
        }
        self.last_sent.insert(text.to_string(), now);
        true
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    let text = if text.chars().count() > MAX_LOG_CHARS {
        let truncated: String = text.chars().take(MAX_LOG_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    };
    if let Err(e) = bot.send_message(chat_id, &text).await {
        // Logging here would feed straight back into this layer.
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

fn format_event(level: Level, message: &str) -> Option<String> {
    match level {
        Level::ERROR => Some(format!("❌ {message}")),
        Level::WARN => Some(format!("⚠️ {message}")),
        _ => None,
    }
}

impl<S: Subscriber> Layer<S> for AdminLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let Some(text) = format_event(level, &visitor.message) else {
            return;
        };
        if self.tx.send(text).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
