//! House module - cleaning logs, presence, manuals and the weekly calendar.

pub mod actions;
pub mod calendar;
pub mod command;
pub mod database;
pub mod engine;
pub mod forms;
pub mod home;
pub mod manual;
pub mod message;
pub mod migrations;
pub mod search;
pub mod telegram;

#[cfg(test)]
mod tests;

pub use database::{Database, StoreError};
pub use engine::{CallbackReply, HouseBot, HouseConfig, Markup, Outgoing, Tracked};
pub use message::{IncomingCallback, IncomingText, Sender};
pub use telegram::TelegramClient;
