//! House engine - turns inbound chat events into replies.
//!
//! The engine never calls Telegram. Every handler returns a list of
//! [`Outgoing`] items that [`TelegramClient`](crate::house::telegram::TelegramClient)
//! executes, so the whole flow runs in tests without a network.

use std::collections::{HashMap, VecDeque};
use std::mem::discriminant;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::house::actions::{Button, CallbackAction, Keyboard};
use crate::house::calendar::{WeekWindow, clamp_offset, day_heading, local_date, parse_tz};
use crate::house::command::{Command, parse_command};
use crate::house::database::{
    Database, EventRecord, NewEvent, PresenceStatus, Role, StoreResult,
};
use crate::house::forms::{FormKind, PendingForm, event_form_template, parse_event_form, parse_note};
use crate::house::home::{HomeData, RECENT_CLEANING_LIMIT, home_keyboard, render_home};
use crate::house::manual::{ManualRecord, ManualSeed, default_manuals};
use crate::house::message::{IncomingCallback, IncomingText, Sender, html_escape};
use crate::house::search::search;

const APOLOGY: &str = "⚠️ 処理中にエラーが発生しました。時間をおいてもう一度お試しください。";
const GREETING: &str = "こんにちは！ 検索したいキーワードをメンション付きで送ってください（例: <code>@bot ゴミ出し</code>）。";
pub const NO_MORE_RESULTS: &str = "これ以上の検索結果はありません。";
const NOT_YOUR_FORM: &str = "このフォームは開いた人だけが送信できます。";
const STALE_BUTTON: &str = "このボタンは使えなくなりました。/home から開き直してください。";
pub const SEARCH_EXPIRED: &str = "この検索は期限切れです。もう一度検索してください。";

/// Search queries remembered for "next result" buttons, oldest dropped first.
const MAX_TRACKED_SEARCHES: usize = 500;

/// Longest room number accepted by `/room`.
const MAX_ROOM_CHARS: usize = 20;

pub const HELP_TEXT: &str = "🏡 <b>シェアハウスbotの使い方</b>

1️⃣ <b>マニュアル検索</b>
・グループでは <code>@bot キーワード</code>、DMではそのまま送信
・例: <code>@bot ゴミ出し</code>、<code>/manual キッチン</code>
・入力内容からキーワードを抽出し、近い回答を順に表示します

2️⃣ <b>ホーム</b> /home
・今日の在宅状況、今週の予定、最近の掃除記録
・◀ ▶ で週を移動できます

3️⃣ <b>在宅/外出</b> /presence
・<code>/presence</code> で切り替え、<code>/presence away 22時に帰宅</code> でメモ付き

4️⃣ <b>予定</b> /event
・フォームに返信して追加します

5️⃣ <b>掃除チェック</b> /clean
・場所を選んでメモを返信（なければ「なし」）

⚙️ /tz Asia/Tokyo で表示タイムゾーン、/room 201 で部屋番号を登録

💡 結果が出ない場合は別の単語でもお試しください🙇";

/// Reply markup attached to an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum Markup {
    None,
    Inline(Keyboard),
    /// Ask the client to open a reply to this message (a form prompt).
    ForceReply,
}

/// State tied to a sent message, registered once Telegram has assigned its id.
#[derive(Debug, Clone, PartialEq)]
pub enum Tracked {
    Form(PendingForm),
    /// The full query behind a search result's "next" button.
    Search(String),
}

/// Something the bot should do in the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Send {
        chat_id: i64,
        text: String,
        markup: Markup,
        track: Option<Tracked>,
    },
    Edit {
        chat_id: i64,
        message_id: i64,
        text: String,
        markup: Markup,
    },
}

impl Outgoing {
    fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self::Send { chat_id, text: text.into(), markup: Markup::None, track: None }
    }

    fn with_keyboard(chat_id: i64, text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self::Send { chat_id, text: text.into(), markup: Markup::Inline(keyboard), track: None }
    }

    fn search_result(chat_id: i64, text: impl Into<String>, keyboard: Keyboard, query: &str) -> Self {
        Self::Send {
            chat_id,
            text: text.into(),
            markup: Markup::Inline(keyboard),
            track: Some(Tracked::Search(query.to_string())),
        }
    }

    fn form(chat_id: i64, text: impl Into<String>, form: PendingForm) -> Self {
        Self::Send { chat_id, text: text.into(), markup: Markup::ForceReply, track: Some(Tracked::Form(form)) }
    }

    fn edit(chat_id: i64, message_id: i64, text: impl Into<String>, markup: Markup) -> Self {
        Self::Edit { chat_id, message_id, text: text.into(), markup }
    }

    /// The message text, for logs and tests.
    pub fn body(&self) -> &str {
        match self {
            Self::Send { text, .. } | Self::Edit { text, .. } => text,
        }
    }

    pub fn keyboard(&self) -> Option<&Keyboard> {
        match self {
            Self::Send { markup: Markup::Inline(kb), .. } | Self::Edit { markup: Markup::Inline(kb), .. } => Some(kb),
            _ => None,
        }
    }
}

/// The answer to a button press: a short toast plus any messages.
#[derive(Debug, Default)]
pub struct CallbackReply {
    pub notice: Option<String>,
    pub outgoing: Vec<Outgoing>,
}

impl CallbackReply {
    fn notice(text: impl Into<String>) -> Self {
        Self { notice: Some(text.into()), outgoing: Vec::new() }
    }

    fn send(outgoing: Outgoing) -> Self {
        Self { notice: None, outgoing: vec![outgoing] }
    }
}

/// House engine configuration.
#[derive(Debug, Clone)]
pub struct HouseConfig {
    /// Zone of the house. Decides "today" for presence and the default display zone.
    pub house_tz: Tz,
    pub admin_ids: Vec<i64>,
    pub clean_locations: Vec<String>,
    /// Character budget for one rendered line.
    pub line_budget: usize,
    pub bot_username: Option<String>,
}

impl Default for HouseConfig {
    fn default() -> Self {
        Self {
            house_tz: chrono_tz::Asia::Tokyo,
            admin_ids: Vec::new(),
            clean_locations: crate::config::default_clean_locations(),
            line_budget: crate::config::DEFAULT_LINE_BUDGET,
            bot_username: None,
        }
    }
}

/// The house engine.
pub struct HouseBot {
    config: HouseConfig,
    database: Arc<Database>,
    /// Open form prompts, keyed by (chat id, prompt message id).
    forms: Mutex<HashMap<(i64, i64), PendingForm>>,
    /// Queries of sent search results, keyed by (chat id, message id).
    searches: Mutex<VecDeque<((i64, i64), String)>>,
}

impl HouseBot {
    pub fn new(config: HouseConfig, database: Arc<Database>) -> Self {
        Self {
            config,
            database,
            forms: Mutex::new(HashMap::new()),
            searches: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &HouseConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Seed the built-in manual records (existing titles are kept) and
    /// upsert `extra` over them. Returns how many built-in records were new.
    pub fn seed_manuals(&self, extra: &[ManualSeed]) -> StoreResult<usize> {
        let mut inserted = 0;
        for seed in default_manuals() {
            if self.database.insert_manual_if_missing(&seed)? {
                inserted += 1;
            }
        }
        for seed in extra {
            self.database.upsert_manual(seed)?;
        }
        info!("📚 Seeded manuals ({} new, {} from file)", inserted, extra.len());
        Ok(inserted)
    }

    /// Remember a form prompt once Telegram has assigned it a message id.
    ///
    /// A resident has at most one open form of each kind; opening another
    /// replaces the older prompt.
    pub async fn register_form(&self, chat_id: i64, message_id: i64, form: PendingForm) {
        let mut forms = self.forms.lock().await;
        forms.retain(|_, f| !(f.user_id == form.user_id && discriminant(&f.kind) == discriminant(&form.kind)));
        debug!("Form {:?} registered at {}/{}", form.kind, chat_id, message_id);
        forms.insert((chat_id, message_id), form);
    }

    pub async fn pending_form(&self, chat_id: i64, message_id: i64) -> Option<PendingForm> {
        self.forms.lock().await.get(&(chat_id, message_id)).cloned()
    }

    /// Remember the query behind a sent search result.
    pub async fn register_search(&self, chat_id: i64, message_id: i64, query: String) {
        let mut searches = self.searches.lock().await;
        if searches.len() == MAX_TRACKED_SEARCHES {
            searches.pop_front();
        }
        searches.push_back(((chat_id, message_id), query));
    }

    async fn search_query(&self, chat_id: i64, message_id: i64) -> Option<String> {
        let searches = self.searches.lock().await;
        searches.iter().rev().find(|(key, _)| *key == (chat_id, message_id)).map(|(_, q)| q.clone())
    }

    /// Register whatever a delivered message carries.
    pub async fn track(&self, chat_id: i64, message_id: i64, tracked: Tracked) {
        match tracked {
            Tracked::Form(form) => self.register_form(chat_id, message_id, form).await,
            Tracked::Search(query) => self.register_search(chat_id, message_id, query).await,
        }
    }

    pub async fn handle_text(&self, msg: &IncomingText) -> Vec<Outgoing> {
        self.handle_text_at(msg, Utc::now()).await
    }

    pub async fn handle_text_at(&self, msg: &IncomingText, now: DateTime<Utc>) -> Vec<Outgoing> {
        match self.route_text(msg, now).await {
            Ok(out) => out,
            Err(e) => {
                error!("Failed to handle message {} from {}: {e}", msg.message_id, msg.sender.user_id);
                vec![Outgoing::text(msg.chat_id, APOLOGY)]
            }
        }
    }

    pub async fn handle_callback(&self, cb: &IncomingCallback) -> CallbackReply {
        self.handle_callback_at(cb, Utc::now()).await
    }

    pub async fn handle_callback_at(&self, cb: &IncomingCallback, now: DateTime<Utc>) -> CallbackReply {
        match self.route_callback(cb, now).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Failed to handle button {:?} from {}: {e}", cb.data, cb.sender.user_id);
                CallbackReply::notice(APOLOGY)
            }
        }
    }

    // ==================== ROUTING ====================

    fn role_of(&self, user_id: i64) -> Role {
        if self.config.admin_ids.contains(&user_id) { Role::Admin } else { Role::Member }
    }

    /// The resident's display zone, falling back to the house zone.
    fn viewer_tz(&self, user_id: i64) -> StoreResult<Tz> {
        let tz = self
            .database
            .resident(user_id)?
            .and_then(|r| r.timezone)
            .and_then(|name| parse_tz(&name));
        Ok(tz.unwrap_or(self.config.house_tz))
    }

    async fn route_text(&self, msg: &IncomingText, now: DateTime<Utc>) -> StoreResult<Vec<Outgoing>> {
        self.database.upsert_resident(&msg.sender, self.role_of(msg.sender.user_id), now)?;

        if let Some(prompt_id) = msg.reply_to_message_id
            && let Some(form) = self.pending_form(msg.chat_id, prompt_id).await
        {
            return self.submit_form(msg, prompt_id, form, now).await;
        }

        if let Some(command) = parse_command(&msg.text, self.config.bot_username.as_deref()) {
            info!("📨 {:?} from {} ({})", command, msg.sender.display_name, msg.sender.user_id);
            return self.run_command(msg, command, now).await;
        }
        if msg.text.trim_start().starts_with('/') {
            // A command for another bot.
            return Ok(Vec::new());
        }

        let query = match self.strip_mention(&msg.text) {
            Some(query) => Some(query),
            None if msg.is_private => Some(msg.text.trim().to_string()),
            None => None,
        };
        match query {
            Some(query) => self.answer_query(msg.chat_id, &query),
            None => Ok(Vec::new()),
        }
    }

    /// The query in a group message that mentions the bot, or `None` when the
    /// bot is not mentioned.
    fn strip_mention(&self, text: &str) -> Option<String> {
        let me = self.config.bot_username.as_deref()?;
        let needle = format!("@{}", me.to_ascii_lowercase());

        // ASCII lowercasing keeps byte offsets, so positions map back onto `text`.
        let lower = text.to_ascii_lowercase();
        // `@house_bot2` is a different bot.
        let mentions: Vec<usize> = lower
            .match_indices(&needle)
            .map(|(pos, _)| pos)
            .filter(|pos| {
                !lower[pos + needle.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            })
            .collect();
        if mentions.is_empty() {
            return None;
        }
        let mut query = String::with_capacity(text.len());
        let mut rest = 0;
        for pos in mentions {
            query.push_str(&text[rest..pos]);
            query.push(' ');
            rest = pos + needle.len();
        }
        query.push_str(&text[rest..]);

        // The cleaning button label sometimes gets pasted along with the mention.
        let query = query.replace("掃除チェック", " ");
        Some(query.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    async fn run_command(&self, msg: &IncomingText, command: Command, now: DateTime<Utc>) -> StoreResult<Vec<Outgoing>> {
        let chat_id = msg.chat_id;
        let user_id = msg.sender.user_id;
        Ok(match command {
            Command::Start => {
                let keyboard = Keyboard::default()
                    .row(vec![Button::new("🏡 ホームを開く", CallbackAction::WeekNav { offset: 0 })]);
                vec![Outgoing::with_keyboard(chat_id, HELP_TEXT, keyboard)]
            }
            Command::Help => vec![Outgoing::text(chat_id, HELP_TEXT)],
            Command::Home => {
                let (text, keyboard) = self.home_view(user_id, 0, now)?;
                vec![Outgoing::with_keyboard(chat_id, text, keyboard)]
            }
            Command::Manuals => vec![self.manual_list(chat_id)?],
            Command::Manual(query) if query.is_empty() => vec![self.manual_list(chat_id)?],
            Command::Manual(query) => self.answer_query(chat_id, &query)?,
            Command::Presence(args) => vec![self.presence_command(msg, &args, now)?],
            Command::Event(args) if args.is_empty() => vec![self.event_form(chat_id, user_id, now)?],
            Command::Event(args) => vec![self.submit_event(chat_id, &msg.sender, &args, now)?],
            Command::Clean => vec![self.cleaning_menu(chat_id)],
            Command::Tz(args) => vec![self.tz_command(chat_id, user_id, &args)?],
            Command::Room(args) => vec![self.room_command(chat_id, user_id, &args)?],
            Command::Unknown(name) => {
                if !msg.is_private {
                    return Ok(Vec::new());
                }
                warn!("Unknown command /{name} from {user_id}");
                vec![Outgoing::text(chat_id, "不明なコマンドです。/help をご覧ください。")]
            }
        })
    }

    async fn route_callback(&self, cb: &IncomingCallback, now: DateTime<Utc>) -> StoreResult<CallbackReply> {
        self.database.upsert_resident(&cb.sender, self.role_of(cb.sender.user_id), now)?;

        let Some(action) = CallbackAction::parse(&cb.data) else {
            warn!("Unknown callback data {:?} from {}", cb.data, cb.sender.user_id);
            return Ok(CallbackReply::notice(STALE_BUTTON));
        };
        info!("🔘 {:?} from {} ({})", action, cb.sender.display_name, cb.sender.user_id);

        let chat_id = cb.chat_id;
        let user_id = cb.sender.user_id;
        Ok(match action {
            CallbackAction::WeekNav { offset } => {
                let (text, keyboard) = self.home_view(user_id, offset, now)?;
                CallbackReply::send(Outgoing::edit(chat_id, cb.message_id, text, Markup::Inline(keyboard)))
            }
            CallbackAction::ManualList => CallbackReply::send(self.manual_list(chat_id)?),
            CallbackAction::ManualShow { id } => match self.database.manual(id)? {
                Some(record) => CallbackReply::send(Outgoing::text(chat_id, manual_text(&record))),
                None => CallbackReply::notice("このマニュアルは見つかりませんでした。"),
            },
            CallbackAction::ManualNext { index } => match self.search_query(chat_id, cb.message_id).await {
                Some(query) => CallbackReply::send(self.next_result(chat_id, cb.message_id, index, &query)?),
                None => {
                    debug!("No search recorded for {}/{}", chat_id, cb.message_id);
                    CallbackReply::notice(SEARCH_EXPIRED)
                }
            },
            CallbackAction::PresenceMenu => CallbackReply::send(self.presence_menu(chat_id, &cb.sender, now)?),
            CallbackAction::PresenceSet(status) => {
                let (status, note) = self.set_presence(user_id, Some(status), None, now)?;
                let text = self.presence_text(&cb.sender.display_name, status, note.as_deref(), now);
                CallbackReply {
                    notice: Some(format!("{} にしました", status.label())),
                    outgoing: vec![Outgoing::edit(chat_id, cb.message_id, text, Markup::Inline(presence_keyboard()))],
                }
            }
            CallbackAction::PresenceNote => CallbackReply::send(Outgoing::form(
                chat_id,
                "📝 今日の在宅メモをこのメッセージに返信してください（「なし」で消去）。",
                PendingForm { kind: FormKind::PresenceNote, user_id },
            )),
            CallbackAction::EventNew => CallbackReply::send(self.event_form(chat_id, user_id, now)?),
            CallbackAction::EventDelete { id } => self.delete_event(cb, id)?,
            CallbackAction::CleaningMenu => CallbackReply::send(self.cleaning_menu(chat_id)),
            CallbackAction::CleaningPick { index } => match self.config.clean_locations.get(index) {
                Some(location) => CallbackReply::send(Outgoing::form(
                    chat_id,
                    format!(
                        "🧹 <b>{}</b> の掃除メモをこのメッセージに返信してください（なければ「なし」）。",
                        html_escape(location)
                    ),
                    PendingForm { kind: FormKind::CleaningNote { location: location.clone() }, user_id },
                )),
                None => {
                    warn!("Cleaning location #{index} is not configured");
                    CallbackReply::notice(STALE_BUTTON)
                }
            },
            CallbackAction::Help => CallbackReply::send(Outgoing::text(chat_id, HELP_TEXT)),
        })
    }

    // ==================== HOME ====================

    fn home_view(&self, user_id: i64, offset: i64, now: DateTime<Utc>) -> StoreResult<(String, Keyboard)> {
        let tz = self.viewer_tz(user_id)?;
        let offset = clamp_offset(offset);
        let window = WeekWindow::new(now, tz, offset);
        let presence_date = local_date(now, self.config.house_tz);

        let presence = self.database.presence_on(presence_date)?;
        let events = self.database.events_overlapping(window.lower, window.upper)?;
        let cleaning = self.database.recent_cleaning_logs(RECENT_CLEANING_LIMIT)?;

        let text = render_home(&HomeData {
            viewer_tz: tz,
            presence_date,
            window,
            line_budget: self.config.line_budget,
            presence: &presence,
            events: &events,
            cleaning: &cleaning,
        });
        Ok((text, home_keyboard(offset)))
    }

    // ==================== MANUALS ====================

    fn manual_list(&self, chat_id: i64) -> StoreResult<Outgoing> {
        let records = self.database.manuals()?;
        if records.is_empty() {
            return Ok(Outgoing::text(chat_id, "マニュアルはまだ登録されていません。"));
        }
        let keyboard = records.iter().fold(Keyboard::default(), |kb, record| {
            kb.row(vec![Button::new(record.title.clone(), CallbackAction::ManualShow { id: record.id })])
        });
        Ok(Outgoing::with_keyboard(chat_id, "📖 <b>マニュアル一覧</b>\n見たい項目を選んでください。", keyboard))
    }

    fn answer_query(&self, chat_id: i64, query: &str) -> StoreResult<Vec<Outgoing>> {
        if query.is_empty() {
            return Ok(vec![Outgoing::text(chat_id, GREETING)]);
        }
        let records = self.database.manuals()?;
        let hits = search(&records, query);
        info!("🔎 Manual search {:?}: {} hit(s)", query, hits.len());

        let Some(first) = hits.first() else {
            return Ok(vec![Outgoing::text(
                chat_id,
                format!("「{}」に一致するマニュアルは見つかりませんでした。", html_escape(query)),
            )]);
        };
        Ok(vec![Outgoing::search_result(chat_id, manual_text(first.record), next_keyboard(0), query)])
    }

    fn next_result(&self, chat_id: i64, message_id: i64, index: usize, query: &str) -> StoreResult<Outgoing> {
        let records = self.database.manuals()?;
        let hits = search(&records, query);
        let next = index + 1;
        Ok(match hits.get(next) {
            Some(hit) => {
                Outgoing::edit(chat_id, message_id, manual_text(hit.record), Markup::Inline(next_keyboard(next)))
            }
            None => Outgoing::edit(chat_id, message_id, NO_MORE_RESULTS, Markup::None),
        })
    }

    // ==================== PRESENCE ====================

    /// Update today's presence. `status: None` toggles (a missing entry becomes
    /// home); `note: None` keeps the day's note. Returns what was stored.
    fn set_presence(
        &self,
        user_id: i64,
        status: Option<PresenceStatus>,
        note: Option<Option<String>>,
        now: DateTime<Utc>,
    ) -> StoreResult<(PresenceStatus, Option<String>)> {
        let date = local_date(now, self.config.house_tz);
        let existing = self.database.presence_for(user_id, date)?;
        let status = status.unwrap_or_else(|| match &existing {
            Some(entry) => entry.status.toggled(),
            None => PresenceStatus::Home,
        });
        let note = match note {
            Some(note) => note,
            None => existing.and_then(|e| e.note),
        };
        self.database.upsert_presence(user_id, date, status, note.as_deref(), now)?;
        info!("🏠 Presence {} on {}: {}", user_id, date, status.as_str());
        Ok((status, note))
    }

    fn presence_text(&self, name: &str, status: PresenceStatus, note: Option<&str>, now: DateTime<Utc>) -> String {
        let date = local_date(now, self.config.house_tz);
        let mut text = format!(
            "👥 <b>{} さんの在宅状況（{}）</b>\n{}",
            html_escape(name),
            day_heading(date),
            status.label()
        );
        if let Some(note) = note {
            text.push_str(&format!("｜{}", html_escape(note)));
        }
        text
    }

    fn presence_menu(&self, chat_id: i64, sender: &Sender, now: DateTime<Utc>) -> StoreResult<Outgoing> {
        let date = local_date(now, self.config.house_tz);
        let text = match self.database.presence_for(sender.user_id, date)? {
            Some(entry) => self.presence_text(&sender.display_name, entry.status, entry.note.as_deref(), now),
            None => format!("👥 <b>今日の在宅状況（{}）</b>\nまだ登録していません。", day_heading(date)),
        };
        Ok(Outgoing::with_keyboard(chat_id, text, presence_keyboard()))
    }

    fn presence_command(&self, msg: &IncomingText, args: &str, now: DateTime<Utc>) -> StoreResult<Outgoing> {
        let (status, note) = if args.is_empty() {
            (None, None)
        } else {
            let (word, rest) = match args.split_once(char::is_whitespace) {
                Some((word, rest)) => (word, rest.trim()),
                None => (args, ""),
            };
            let Some(status) = PresenceStatus::parse(word) else {
                return Ok(Outgoing::text(
                    msg.chat_id,
                    "使い方: <code>/presence</code>（切り替え）または <code>/presence home|away [メモ]</code>",
                ));
            };
            let note = if rest.is_empty() { None } else { Some(parse_note(rest)) };
            (Some(status), note)
        };

        let (status, note) = self.set_presence(msg.sender.user_id, status, note, now)?;
        let text = self.presence_text(&msg.sender.display_name, status, note.as_deref(), now);
        Ok(Outgoing::with_keyboard(msg.chat_id, text, presence_keyboard()))
    }

    // ==================== EVENTS ====================

    fn event_form(&self, chat_id: i64, user_id: i64, now: DateTime<Utc>) -> StoreResult<Outgoing> {
        let tz = self.viewer_tz(user_id)?;
        Ok(Outgoing::form(
            chat_id,
            event_form_template(local_date(now, tz), tz),
            PendingForm { kind: FormKind::NewEvent, user_id },
        ))
    }

    /// Validate and store an event. On validation errors the reply lists
    /// them; the caller decides whether the form stays open.
    fn try_create_event(
        &self,
        sender: &Sender,
        text: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Result<(EventRecord, Tz), String>> {
        let tz = self.viewer_tz(sender.user_id)?;
        let new_event = match parse_event_form(text, local_date(now, tz), tz) {
            Ok(event) => event,
            Err(e) => {
                warn!("Rejected event form from {}: {} problem(s)", sender.user_id, e.errors.len());
                return Ok(Err(format!("⚠️ 入力内容を確認してください\n{}", html_escape(&e.to_string()))));
            }
        };
        let record = self.insert_event(sender, &new_event, now)?;
        Ok(Ok((record, tz)))
    }

    fn insert_event(&self, sender: &Sender, event: &NewEvent, now: DateTime<Utc>) -> StoreResult<EventRecord> {
        let id = self.database.insert_event(event, sender.user_id, now)?;
        info!("📅 Event {} \"{}\" created by {}", id, event.title, sender.user_id);
        Ok(EventRecord {
            id,
            title: event.title.clone(),
            start_at: event.start_at,
            end_at: event.end_at,
            created_by: Some(sender.user_id),
            creator_name: Some(sender.display_name.clone()),
            location: event.location.clone(),
            memo: event.memo.clone(),
        })
    }

    fn submit_event(&self, chat_id: i64, sender: &Sender, text: &str, now: DateTime<Utc>) -> StoreResult<Outgoing> {
        Ok(match self.try_create_event(sender, text, now)? {
            Ok((record, tz)) => event_created(chat_id, &record, tz),
            Err(problems) => Outgoing::text(chat_id, problems),
        })
    }

    fn delete_event(&self, cb: &IncomingCallback, id: i64) -> StoreResult<CallbackReply> {
        let Some(event) = self.database.event(id)? else {
            return Ok(CallbackReply::notice("この予定はすでに削除されています。"));
        };
        let user_id = cb.sender.user_id;
        let allowed = event.created_by == Some(user_id) || self.role_of(user_id) == Role::Admin;
        if !allowed {
            warn!("User {} tried to delete event {} owned by {:?}", user_id, id, event.created_by);
            return Ok(CallbackReply::notice("予定を削除できるのは作成者か管理者だけです。"));
        }
        self.database.delete_event(id)?;
        info!("🗑 Event {} deleted by {}", id, user_id);
        Ok(CallbackReply {
            notice: Some("削除しました".to_string()),
            outgoing: vec![Outgoing::edit(
                cb.chat_id,
                cb.message_id,
                format!("🗑 予定「{}」を削除しました。", html_escape(&event.title)),
                Markup::None,
            )],
        })
    }

    // ==================== CLEANING ====================

    fn cleaning_menu(&self, chat_id: i64) -> Outgoing {
        let buttons: Vec<Button> = self
            .config
            .clean_locations
            .iter()
            .enumerate()
            .map(|(index, location)| Button::new(location.clone(), CallbackAction::CleaningPick { index }))
            .collect();
        let keyboard = buttons
            .chunks(2)
            .fold(Keyboard::default(), |kb, row| kb.row(row.to_vec()));
        Outgoing::with_keyboard(chat_id, "🧹 どこを掃除しましたか？", keyboard)
    }

    // ==================== FORMS ====================

    async fn submit_form(
        &self,
        msg: &IncomingText,
        prompt_id: i64,
        form: PendingForm,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Outgoing>> {
        let chat_id = msg.chat_id;
        if form.user_id != msg.sender.user_id {
            debug!("User {} replied to a form opened by {}", msg.sender.user_id, form.user_id);
            return Ok(vec![Outgoing::text(chat_id, NOT_YOUR_FORM)]);
        }

        let reply = match form.kind {
            FormKind::NewEvent => match self.try_create_event(&msg.sender, &msg.text, now)? {
                Ok((record, tz)) => event_created(chat_id, &record, tz),
                Err(problems) => {
                    // The prompt stays registered so the resident can reply to it again.
                    return Ok(vec![Outgoing::text(
                        chat_id,
                        format!("{problems}\n\nもう一度フォームのメッセージに返信してください。"),
                    )]);
                }
            },
            FormKind::CleaningNote { ref location } => {
                let note = parse_note(&msg.text);
                let id = self.database.insert_cleaning_log(msg.sender.user_id, location, note.as_deref(), now)?;
                info!("🧹 Cleaning log {} by {} at {}", id, msg.sender.user_id, location);
                Outgoing::text(
                    chat_id,
                    format!(
                        "{} が <b>{}</b> を掃除しました！🧼\n📝 メモ: {}",
                        html_escape(&msg.sender.display_name),
                        html_escape(location),
                        note.as_deref().map(html_escape).unwrap_or_else(|| "（なし）".to_string())
                    ),
                )
            }
            FormKind::PresenceNote => {
                let note = parse_note(&msg.text);
                let date = local_date(now, self.config.house_tz);
                // A note on a day without a status keeps the day "home".
                let status = self
                    .database
                    .presence_for(msg.sender.user_id, date)?
                    .map_or(PresenceStatus::Home, |e| e.status);
                let (status, note) = self.set_presence(msg.sender.user_id, Some(status), Some(note), now)?;
                let text = self.presence_text(&msg.sender.display_name, status, note.as_deref(), now);
                Outgoing::with_keyboard(chat_id, text, presence_keyboard())
            }
        };

        self.forms.lock().await.remove(&(chat_id, prompt_id));
        Ok(vec![reply])
    }

    // ==================== SETTINGS ====================

    fn tz_command(&self, chat_id: i64, user_id: i64, args: &str) -> StoreResult<Outgoing> {
        if args.is_empty() {
            let current = self.viewer_tz(user_id)?;
            return Ok(Outgoing::text(
                chat_id,
                format!("🕒 表示タイムゾーン: <code>{current}</code>\n変更: <code>/tz Asia/Tokyo</code>（<code>/tz reset</code> で既定に戻す）"),
            ));
        }
        if matches!(args, "reset" | "default") {
            self.database.set_timezone(user_id, None)?;
            return Ok(Outgoing::text(
                chat_id,
                format!("🕒 表示タイムゾーンを既定（<code>{}</code>）に戻しました。", self.config.house_tz),
            ));
        }
        let Some(tz) = parse_tz(args) else {
            warn!("Unknown timezone {:?} from {}", args, user_id);
            return Ok(Outgoing::text(
                chat_id,
                format!("「{}」は知らないタイムゾーンです（例: Asia/Tokyo, Europe/Berlin）。", html_escape(args)),
            ));
        };
        self.database.set_timezone(user_id, Some(tz.name()))?;
        info!("🕒 Timezone of {} set to {}", user_id, tz);
        Ok(Outgoing::text(chat_id, format!("🕒 表示タイムゾーンを <code>{tz}</code> にしました。")))
    }

    fn room_command(&self, chat_id: i64, user_id: i64, args: &str) -> StoreResult<Outgoing> {
        if args.is_empty() {
            let room = self.database.resident(user_id)?.and_then(|r| r.room_no);
            let text = match room {
                Some(room) => format!("🚪 部屋番号: {}", html_escape(&room)),
                None => "🚪 部屋番号は未登録です。<code>/room 201</code> で登録できます。".to_string(),
            };
            return Ok(Outgoing::text(chat_id, text));
        }
        let room: String = args.chars().take(MAX_ROOM_CHARS).collect();
        self.database.set_room(user_id, Some(&room))?;
        info!("🚪 Room of {} set to {}", user_id, room);
        Ok(Outgoing::text(chat_id, format!("🚪 部屋番号を {} にしました。", html_escape(&room))))
    }
}

fn manual_text(record: &ManualRecord) -> String {
    format!("📖 <b>{}</b>\n{}", html_escape(&record.title), html_escape(&record.body))
}

fn next_keyboard(index: usize) -> Keyboard {
    Keyboard::default().row(vec![Button::new("次の結果 ▶", CallbackAction::ManualNext { index })])
}

fn presence_keyboard() -> Keyboard {
    Keyboard::default().row(vec![
        Button::new("🏠 在宅", CallbackAction::PresenceSet(PresenceStatus::Home)),
        Button::new("🚶 外出", CallbackAction::PresenceSet(PresenceStatus::Away)),
        Button::new("📝 メモ", CallbackAction::PresenceNote),
    ])
}

fn event_created(chat_id: i64, event: &EventRecord, tz: Tz) -> Outgoing {
    let start = event.start_at.with_timezone(&tz);
    let end = event.end_at.with_timezone(&tz);
    let end_text = if end.date_naive() == start.date_naive() {
        end.format("%H:%M").to_string()
    } else {
        format!("{} {}", day_heading(end.date_naive()), end.format("%H:%M"))
    };

    let mut text = format!(
        "✅ 予定を追加しました\n<b>{}</b>\n🕒 {} {}-{}（{}）",
        html_escape(&event.title),
        day_heading(start.date_naive()),
        start.format("%H:%M"),
        end_text,
        tz
    );
    if let Some(location) = &event.location {
        text.push_str(&format!("\n📍 {}", html_escape(location)));
    }
    if let Some(memo) = &event.memo {
        text.push_str(&format!("\n📝 {}", html_escape(memo)));
    }
    let keyboard = Keyboard::default().row(vec![Button::new("🗑 削除", CallbackAction::EventDelete { id: event.id })]);
    Outgoing::with_keyboard(chat_id, text, keyboard)
}
