//! Button actions and their callback-data encoding.
//!
//! Telegram hands callback data back verbatim when a button is pressed and
//! limits it to 64 bytes, so every action has a short textual form. Anything
//! longer (a search query) stays in the engine, keyed by the message.

use tracing::warn;

use crate::house::database::PresenceStatus;

/// Everything a button can ask the bot to do.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAction {
    /// Redraw the home view for another week. `offset` is in days from today.
    WeekNav { offset: i64 },
    /// List every manual title.
    ManualList,
    /// Show one manual.
    ManualShow { id: i64 },
    /// Advance through the search results of this message. `index` is the
    /// hit currently shown.
    ManualNext { index: usize },
    PresenceMenu,
    PresenceSet(PresenceStatus),
    /// Open the presence note form.
    PresenceNote,
    /// Open the event form.
    EventNew,
    EventDelete { id: i64 },
    CleaningMenu,
    /// A cleaning location, by position in the configured list.
    CleaningPick { index: usize },
    Help,
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        match self {
            Self::WeekNav { offset } => format!("home:week:{offset}"),
            Self::ManualList => "m:list".to_string(),
            Self::ManualShow { id } => format!("m:show:{id}"),
            Self::ManualNext { index } => format!("m:next:{index}"),
            Self::PresenceMenu => "p:menu".to_string(),
            Self::PresenceSet(status) => format!("p:{}", status.as_str()),
            Self::PresenceNote => "p:note".to_string(),
            Self::EventNew => "e:new".to_string(),
            Self::EventDelete { id } => format!("e:del:{id}"),
            Self::CleaningMenu => "c:menu".to_string(),
            Self::CleaningPick { index } => format!("c:{index}"),
            Self::Help => "help".to_string(),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        if let Some(rest) = data.strip_prefix("home:week:") {
            // An unreadable offset still redraws the current week.
            let offset = rest.parse().unwrap_or_else(|e| {
                warn!("Invalid week offset {rest:?}: {e}");
                0
            });
            return Some(Self::WeekNav { offset });
        }
        if let Some(index) = data.strip_prefix("m:next:") {
            return Some(Self::ManualNext { index: index.parse().ok()? });
        }
        if let Some(id) = data.strip_prefix("m:show:") {
            return Some(Self::ManualShow { id: id.parse().ok()? });
        }
        if let Some(id) = data.strip_prefix("e:del:") {
            return Some(Self::EventDelete { id: id.parse().ok()? });
        }
        match data {
            "m:list" => Some(Self::ManualList),
            "p:menu" => Some(Self::PresenceMenu),
            "p:home" => Some(Self::PresenceSet(PresenceStatus::Home)),
            "p:away" => Some(Self::PresenceSet(PresenceStatus::Away)),
            "p:note" => Some(Self::PresenceNote),
            "e:new" => Some(Self::EventNew),
            "c:menu" => Some(Self::CleaningMenu),
            "help" => Some(Self::Help),
            _ => {
                let index = data.strip_prefix("c:")?.parse().ok()?;
                Some(Self::CleaningPick { index })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub action: CallbackAction,
}

impl Button {
    pub fn new(label: impl Into<String>, action: CallbackAction) -> Self {
        Self { label: label.into(), action }
    }
}

/// An inline keyboard, row by row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }

    pub fn find(&self, action: &CallbackAction) -> Option<&Button> {
        self.buttons().find(|b| &b.action == action)
    }
}
