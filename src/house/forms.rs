//! Form prompts and submissions.
//!
//! A form is a bot message sent with a force-reply markup. The resident
//! answers by replying to it; the engine looks the prompt up in its pending
//! registry to learn which form the reply fills in.

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use chrono_tz::Tz;
use regex::Regex;

use crate::house::calendar::{parse_date, parse_time, resolve_local};
use crate::house::database::NewEvent;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_LOCATION_CHARS: usize = 100;
pub const MAX_MEMO_CHARS: usize = 500;
pub const MAX_NOTE_CHARS: usize = 200;

/// What a pending form collects.
#[derive(Debug, Clone, PartialEq)]
pub enum FormKind {
    NewEvent,
    CleaningNote { location: String },
    PresenceNote,
}

/// A form prompt waiting for its reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingForm {
    pub kind: FormKind,
    /// Only the resident who opened the form may submit it.
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Title,
    Date,
    Start,
    End,
    Location,
    Memo,
}

impl EventField {
    fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "title" | "タイトル" | "件名" => Some(Self::Title),
            "date" | "日付" | "日にち" => Some(Self::Date),
            "start" | "開始" | "開始時刻" => Some(Self::Start),
            "end" | "終了" | "終了時刻" => Some(Self::End),
            "location" | "place" | "場所" => Some(Self::Location),
            "memo" | "note" | "メモ" => Some(Self::Memo),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Title => "タイトル",
            Self::Date => "日付",
            Self::Start => "開始",
            Self::End => "終了",
            Self::Location => "場所",
            Self::Memo => "メモ",
        }
    }
}

/// One problem with a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    /// `None` for problems not tied to a known field (unknown keys, stray lines).
    pub field: Option<EventField>,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            Some(field) => write!(f, "{}: {}", field.label(), self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Every problem found in a submission, reported together.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", render_errors(.errors))]
pub struct FormError {
    pub errors: Vec<FieldError>,
}

fn render_errors(errors: &[FieldError]) -> String {
    errors.iter().map(|e| format!("・{e}")).collect::<Vec<_>>().join("\n")
}

static FORM_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^:：]+?)\s*[:：]\s*(.*?)\s*$").expect("static regex"));

/// Values that mean "left blank" (the template's placeholder included).
fn is_blank(value: &str) -> bool {
    matches!(value.trim(), "" | "(任意)" | "（任意）" | "-")
}

/// The prompt text for the event form.
pub fn event_form_template(today: NaiveDate, tz: Tz) -> String {
    format!(
        "📅 <b>予定を追加</b>\nこのメッセージに返信して入力してください（時刻は {tz}）。\n\n\
         タイトル: \n日付: {}\n開始: 19:00\n終了: 21:00\n場所: (任意)\nメモ: (任意)",
        today.format("%Y-%m-%d")
    )
}

#[derive(Default)]
struct RawEventForm {
    values: Vec<(EventField, String)>,
}

impl RawEventForm {
    fn get(&self, field: EventField) -> Option<&str> {
        self.values
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
            .filter(|v| !is_blank(v))
    }
}

fn split_form(text: &str, errors: &mut Vec<FieldError>) -> RawEventForm {
    let mut form = RawEventForm::default();

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let Some(caps) = FORM_LINE.captures(line) else {
            // Lines without a key continue the previous value (multi-line memos).
            match form.values.last_mut() {
                Some((_, value)) => {
                    value.push('\n');
                    value.push_str(line.trim());
                }
                None => errors.push(FieldError {
                    field: None,
                    message: format!("「{}」は「項目: 値」の形式ではありません", line.trim()),
                }),
            }
            continue;
        };

        let key = &caps[1];
        let value = caps[2].to_string();
        match EventField::from_key(key) {
            Some(field) if form.values.iter().any(|(f, _)| *f == field) => errors.push(FieldError {
                field: Some(field),
                message: "2回指定されています".to_string(),
            }),
            Some(field) => form.values.push((field, value)),
            None => errors.push(FieldError {
                field: None,
                message: format!("不明な項目「{}」", key.trim()),
            }),
        }
    }

    form
}

fn required<'a>(form: &'a RawEventForm, field: EventField, errors: &mut Vec<FieldError>) -> Option<&'a str> {
    let value = form.get(field);
    if value.is_none() {
        errors.push(FieldError { field: Some(field), message: "入力してください".to_string() });
    }
    value
}

fn optional_text(
    form: &RawEventForm,
    field: EventField,
    max: usize,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let value = form.get(field)?.trim().to_string();
    if value.chars().count() > max {
        errors.push(FieldError { field: Some(field), message: format!("{max}文字以内で入力してください") });
    }
    Some(value)
}

/// Validate an event submission. Times are read in `tz`; the result is UTC.
pub fn parse_event_form(text: &str, today: NaiveDate, tz: Tz) -> Result<NewEvent, FormError> {
    let mut errors = Vec::new();
    let form = split_form(text, &mut errors);

    let title = required(&form, EventField::Title, &mut errors).map(|t| t.trim().to_string());
    if let Some(ref t) = title
        && t.chars().count() > MAX_TITLE_CHARS
    {
        errors.push(FieldError {
            field: Some(EventField::Title),
            message: format!("{MAX_TITLE_CHARS}文字以内で入力してください"),
        });
    }

    let date = required(&form, EventField::Date, &mut errors).and_then(|raw| {
        let parsed = parse_date(raw, today);
        if parsed.is_none() {
            errors.push(FieldError {
                field: Some(EventField::Date),
                message: format!("「{raw}」は日付として読めません（例: 2026-10-20, 10/20, 明日）"),
            });
        }
        parsed
    });

    let start_time = required(&form, EventField::Start, &mut errors).and_then(|raw| {
        let parsed = parse_time(raw);
        if parsed.is_none() {
            errors.push(FieldError {
                field: Some(EventField::Start),
                message: format!("「{raw}」は時刻として読めません（例: 19:00）"),
            });
        }
        parsed
    });

    // End is a time on the start date, or a date and time for multi-day events.
    let end = required(&form, EventField::End, &mut errors).and_then(|raw| {
        let parsed = match raw.trim().rsplit_once(char::is_whitespace) {
            Some((d, t)) => parse_date(d, today).zip(parse_time(t)).map(|(d, t)| (Some(d), t)),
            None => parse_time(raw).map(|t| (None, t)),
        };
        if parsed.is_none() {
            errors.push(FieldError {
                field: Some(EventField::End),
                message: format!("「{raw}」は時刻として読めません（例: 21:00, 2026-10-21 10:00）"),
            });
        }
        parsed
    });

    let location = optional_text(&form, EventField::Location, MAX_LOCATION_CHARS, &mut errors);
    let memo = optional_text(&form, EventField::Memo, MAX_MEMO_CHARS, &mut errors);

    let mut window = None;
    if let (Some(date), Some(start_time), Some((end_date, end_time))) = (date, start_time, end) {
        let start_at = resolve_local(tz, date.and_time(start_time));
        let end_at = resolve_local(tz, end_date.unwrap_or(date).and_time(end_time));
        if start_at.is_none() {
            errors.push(FieldError {
                field: Some(EventField::Start),
                message: format!("{tz} にその時刻は存在しません"),
            });
        }
        if end_at.is_none() {
            errors.push(FieldError {
                field: Some(EventField::End),
                message: format!("{tz} にその時刻は存在しません"),
            });
        }
        if let (Some(s), Some(e)) = (start_at, end_at) {
            if e <= s {
                errors.push(FieldError {
                    field: Some(EventField::End),
                    message: "開始より後の時刻にしてください".to_string(),
                });
            } else {
                window = Some((s, e));
            }
        }
    }

    match (errors.is_empty(), title, window) {
        (true, Some(title), Some((start_at, end_at))) => Ok(NewEvent { title, start_at, end_at, location, memo }),
        _ => Err(FormError { errors }),
    }
}

/// Parse a free-text note reply. `-`, `なし` and `none` mean no note.
pub fn parse_note(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if matches!(trimmed.to_lowercase().as_str(), "" | "-" | "なし" | "無し" | "none") {
        return None;
    }
    Some(trimmed.chars().take(MAX_NOTE_CHARS).collect())
}
