//! Telegram client using teloxide.

use teloxide::prelude::*;
use teloxide::{ApiError, RequestError};
use teloxide::types::{
    BotCommand, ForceReply, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode, User,
};
use tracing::{debug, info, warn};

use crate::house::actions::Keyboard;
use crate::house::command::COMMAND_LIST;
use crate::house::engine::{Markup, Outgoing, Tracked};
use crate::house::message::{IncomingCallback, IncomingText, Sender};

/// A tracked message that reached the chat and now has a message id.
#[derive(Debug)]
pub struct Delivered {
    pub chat_id: i64,
    pub message_id: i64,
    pub tracked: Tracked,
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

fn inline_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.action.encode()))
            .collect::<Vec<_>>()
    }))
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str, markup: &Markup) -> Result<i64, String> {
        let request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);

        let result = match markup {
            Markup::None => request.await,
            Markup::Inline(keyboard) => request.reply_markup(inline_markup(keyboard)).await,
            Markup::ForceReply => request.reply_markup(ForceReply::new()).await,
        };

        result.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }

    pub async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: &Markup,
    ) -> Result<(), String> {
        let request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text)
            .parse_mode(ParseMode::Html);

        // Leaving the markup out removes the keyboard.
        let result = match markup {
            Markup::Inline(keyboard) => request.reply_markup(inline_markup(keyboard)).await,
            Markup::None | Markup::ForceReply => request.await,
        };

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unchanged(&e) => {
                debug!("Message {} already up to date", message_id);
                Ok(())
            }
            Err(e) => {
                let msg = format!("Failed to edit message {message_id}: {e}");
                warn!("{}", msg);
                Err(msg)
            }
        }
    }

    pub async fn answer_callback(&self, query: &CallbackQuery, notice: Option<&str>) -> Result<(), String> {
        let mut request = self.bot.answer_callback_query(query.id.clone());
        if let Some(text) = notice {
            request = request.text(text);
        }
        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to answer callback: {e}");
            warn!("{}", msg);
            msg
        })
    }

    pub async fn set_commands(&self) -> Result<(), String> {
        let commands: Vec<BotCommand> = COMMAND_LIST
            .iter()
            .map(|(name, description)| BotCommand::new(*name, *description))
            .collect();
        self.bot
            .set_my_commands(commands)
            .await
            .map(|_| info!("Registered {} bot commands", COMMAND_LIST.len()))
            .map_err(|e| {
                let msg = format!("Failed to set commands: {e}");
                warn!("{}", msg);
                msg
            })
    }

    /// Execute the engine's replies for one inbound event.
    ///
    /// A message that cannot be posted to its chat is retried as a direct
    /// message to `user_id`. Returns the tracked messages that were delivered.
    pub async fn deliver(&self, outgoing: Vec<Outgoing>, user_id: i64) -> Vec<Delivered> {
        let mut delivered = Vec::new();
        for item in outgoing {
            match item {
                Outgoing::Send { chat_id, text, markup, track } => {
                    let mut target = chat_id;
                    let mut sent = self.send_message(chat_id, &text, &markup).await;
                    if sent.is_err() && chat_id != user_id {
                        info!("📩 Falling back to DM for user {}", user_id);
                        target = user_id;
                        sent = self.send_message(user_id, &text, &markup).await;
                    }
                    if let (Ok(message_id), Some(tracked)) = (sent, track) {
                        delivered.push(Delivered { chat_id: target, message_id, tracked });
                    }
                }
                Outgoing::Edit { chat_id, message_id, text, markup } => {
                    // Failure is already logged; the original message stays as it was.
                    let _ = self.edit_message(chat_id, message_id, &text, &markup).await;
                }
            }
        }
        delivered
    }
}

/// Telegram refuses an edit that changes nothing, e.g. "this week" pressed
/// on the current week.
fn is_unchanged(err: &RequestError) -> bool {
    matches!(err, RequestError::Api(ApiError::MessageNotModified))
}

fn sender_of(user: &User) -> Sender {
    Sender {
        user_id: user.id.0 as i64,
        username: user.username.clone(),
        display_name: user.full_name(),
    }
}

/// Convert a Telegram text message. Returns `None` for non-text messages and
/// messages without a sender.
pub fn incoming_text(msg: &Message) -> Option<IncomingText> {
    let user = msg.from.as_ref()?;
    let text = msg.text()?;
    Some(IncomingText {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0 as i64,
        is_private: msg.chat.is_private(),
        sender: sender_of(user),
        text: text.to_string(),
        reply_to_message_id: msg.reply_to_message().map(|reply| reply.id.0 as i64),
    })
}

/// Convert a button press. Returns `None` when the message is too old for
/// Telegram to include or the button carries no data.
pub fn incoming_callback(query: &CallbackQuery) -> Option<IncomingCallback> {
    let msg = query.regular_message()?;
    Some(IncomingCallback {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0 as i64,
        sender: sender_of(&query.from),
        data: query.data.clone()?,
    })
}
