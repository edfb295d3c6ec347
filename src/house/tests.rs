//! Scenario tests for the house engine: inbound events in, replies out.
//!
//! Run with: cargo test house

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::house::actions::CallbackAction;
use crate::house::database::{Database, PresenceStatus};
use crate::house::engine::{
    CallbackReply, HouseBot, HouseConfig, Markup, NO_MORE_RESULTS, Outgoing, SEARCH_EXPIRED, Tracked,
};
use crate::house::forms::{FormKind, PendingForm};
use crate::house::home::NO_EVENTS;
use crate::house::message::{IncomingCallback, IncomingText, Sender};

const GROUP: i64 = -100_123;
const AKI: i64 = 1;
const BEN: i64 = 2;
const ADMIN: i64 = 99;

/// Sunday 2026-10-18, 12:00 in Tokyo.
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

fn house() -> HouseBot {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let config = HouseConfig {
        admin_ids: vec![ADMIN],
        bot_username: Some("house_bot".to_string()),
        ..HouseConfig::default()
    };
    let bot = HouseBot::new(config, db);
    bot.seed_manuals(&[]).unwrap();
    bot
}

fn sender(user_id: i64) -> Sender {
    let name = match user_id {
        AKI => "Aki",
        BEN => "Ben",
        ADMIN => "Kanri",
        _ => "Someone",
    };
    Sender {
        user_id,
        username: Some(name.to_lowercase()),
        display_name: name.to_string(),
    }
}

fn message(chat_id: i64, user_id: i64, text: &str) -> IncomingText {
    IncomingText {
        chat_id,
        message_id: 1000,
        is_private: chat_id > 0,
        sender: sender(user_id),
        text: text.to_string(),
        reply_to_message_id: None,
    }
}

fn reply_to(chat_id: i64, user_id: i64, text: &str, prompt_id: i64) -> IncomingText {
    IncomingText { reply_to_message_id: Some(prompt_id), ..message(chat_id, user_id, text) }
}

fn press(chat_id: i64, user_id: i64, action: CallbackAction) -> IncomingCallback {
    IncomingCallback {
        chat_id,
        message_id: 2000,
        sender: sender(user_id),
        data: action.encode(),
    }
}

async fn say(bot: &HouseBot, msg: IncomingText) -> Vec<Outgoing> {
    bot.handle_text_at(&msg, now()).await
}

async fn click(bot: &HouseBot, cb: IncomingCallback) -> CallbackReply {
    bot.handle_callback_at(&cb, now()).await
}

/// Register the prompt the way the client does once it has a message id.
async fn open_form(bot: &HouseBot, out: &Outgoing, prompt_id: i64) -> PendingForm {
    match out {
        Outgoing::Send { chat_id, markup: Markup::ForceReply, track: Some(Tracked::Form(form)), .. } => {
            bot.register_form(*chat_id, prompt_id, form.clone()).await;
            form.clone()
        }
        other => panic!("expected a form prompt, got {other:?}"),
    }
}

/// Register a sent search result as message 2000, the id `press` uses.
async fn track_search(bot: &HouseBot, out: &Outgoing) {
    match out {
        Outgoing::Send { chat_id, track: Some(tracked @ Tracked::Search(_)), .. } => {
            bot.track(*chat_id, 2000, tracked.clone()).await;
        }
        other => panic!("expected a search result, got {other:?}"),
    }
}

fn only(out: &[Outgoing]) -> &Outgoing {
    assert_eq!(out.len(), 1, "expected one reply, got {out:?}");
    &out[0]
}

const NABE_FORM: &str = "タイトル: 鍋パーティー\n日付: 2026-10-20\n開始: 19:00\n終了: 21:00\n場所: リビング";

// =============================================================================
// MANUAL SEARCH
// =============================================================================

mod manual_search {
    use super::*;

    #[tokio::test]
    async fn test_private_text_is_a_query() {
        let bot = house();
        let out = say(&bot, message(AKI, AKI, "ゴミ出しについて教えて")).await;
        let reply = only(&out);
        assert!(reply.body().contains("<b>ゴミ出しルール</b>"));
        let kb = reply.keyboard().expect("next button");
        assert!(kb.find(&CallbackAction::ManualNext { index: 0 }).is_some());
        match reply {
            Outgoing::Send { track: Some(Tracked::Search(query)), .. } => assert_eq!(query, "ゴミ出しについて教えて"),
            other => panic!("expected a tracked search, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unspaced_question_finds_the_kitchen() {
        let bot = house();
        let out = say(&bot, message(AKI, AKI, "キッチンのルールは？")).await;
        assert!(only(&out).body().contains("<b>共有キッチン</b>"));
    }

    #[tokio::test]
    async fn test_group_needs_a_mention() {
        let bot = house();
        assert!(say(&bot, message(GROUP, AKI, "ゴミ出し")).await.is_empty());

        let out = say(&bot, message(GROUP, AKI, "@house_bot ゴミ出し")).await;
        assert!(only(&out).body().contains("ゴミ出しルール"));
    }

    #[tokio::test]
    async fn test_mention_of_a_longer_bot_name_is_ignored() {
        let bot = house();
        assert!(say(&bot, message(GROUP, AKI, "@house_bot2 ゴミ出し")).await.is_empty());
        assert!(say(&bot, message(GROUP, AKI, "@house_bot_dev ゴミ出し")).await.is_empty());

        let out = say(&bot, message(GROUP, AKI, "ゴミ出し @house_bot")).await;
        assert!(only(&out).body().contains("ゴミ出しルール"));
    }

    #[tokio::test]
    async fn test_bare_mention_gets_a_greeting() {
        let bot = house();
        let out = say(&bot, message(GROUP, AKI, "@House_Bot 掃除チェック")).await;
        assert!(only(&out).body().starts_with("こんにちは"));
    }

    #[tokio::test]
    async fn test_no_match() {
        let bot = house();
        let out = say(&bot, message(AKI, AKI, "駐輪場")).await;
        assert!(only(&out).body().contains("見つかりませんでした"));
        assert!(only(&out).keyboard().is_none());
    }

    #[tokio::test]
    async fn test_next_result_past_the_end() {
        let bot = house();
        let out = say(&bot, message(AKI, AKI, "JR平泉駅")).await;
        assert!(only(&out).body().contains("アクセス"));
        track_search(&bot, only(&out)).await;

        let reply = click(&bot, press(AKI, AKI, CallbackAction::ManualNext { index: 0 })).await;
        match only(&reply.outgoing) {
            Outgoing::Edit { message_id, text, markup, .. } => {
                assert_eq!(*message_id, 2000);
                assert_eq!(text, NO_MORE_RESULTS);
                assert_eq!(*markup, Markup::None);
            }
            other => panic!("expected an edit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_next_result_advances() {
        let bot = house();
        let out = say(&bot, message(AKI, AKI, "ルール")).await;
        track_search(&bot, only(&out)).await;

        let reply = click(&bot, press(AKI, AKI, CallbackAction::ManualNext { index: 0 })).await;
        let edit = only(&reply.outgoing);
        assert!(matches!(edit, Outgoing::Edit { .. }));
        assert!(edit.keyboard().unwrap().find(&CallbackAction::ManualNext { index: 1 }).is_some());
    }

    #[tokio::test]
    async fn test_next_result_keeps_a_long_query_whole() {
        let bot = house();
        // Well past the 64 bytes a button can carry; the last word decides the hit.
        let query = format!("{}夜", "ルール ".repeat(8));
        assert!(query.len() > 64);
        let out = say(&bot, message(AKI, AKI, &query)).await;
        assert!(only(&out).body().contains("<b>静音タイム</b>"));
        track_search(&bot, only(&out)).await;

        let data = only(&out).keyboard().unwrap().buttons().next().unwrap().action.encode();
        assert!(data.len() <= 64);

        let reply = click(&bot, press(AKI, AKI, CallbackAction::ManualNext { index: 0 })).await;
        assert_eq!(only(&reply.outgoing).body(), NO_MORE_RESULTS);
    }

    #[tokio::test]
    async fn test_next_result_for_an_unknown_message() {
        let bot = house();
        let reply = click(&bot, press(AKI, AKI, CallbackAction::ManualNext { index: 0 })).await;
        assert!(reply.outgoing.is_empty());
        assert_eq!(reply.notice.as_deref(), Some(SEARCH_EXPIRED));
    }

    #[tokio::test]
    async fn test_manual_list_and_show() {
        let bot = house();
        let out = say(&bot, message(AKI, AKI, "/manuals")).await;
        let kb = only(&out).keyboard().unwrap();
        assert_eq!(kb.buttons().count(), bot.database().manuals().unwrap().len());

        let first = kb.buttons().next().unwrap().action.clone();
        let reply = click(&bot, press(AKI, AKI, first)).await;
        assert!(only(&reply.outgoing).body().starts_with("📖 <b>"));

        let missing = click(&bot, press(AKI, AKI, CallbackAction::ManualShow { id: 9999 })).await;
        assert!(missing.outgoing.is_empty());
        assert!(missing.notice.is_some());
    }

    #[tokio::test]
    async fn test_manual_command() {
        let bot = house();
        let out = say(&bot, message(GROUP, AKI, "/manual@house_bot キッチン")).await;
        assert!(only(&out).body().contains("共有キッチン"));
        // Commands addressed to another bot are not ours.
        assert!(say(&bot, message(GROUP, AKI, "/manual@other_bot キッチン")).await.is_empty());
    }
}

// =============================================================================
// PRESENCE
// =============================================================================

mod presence {
    use super::*;

    #[tokio::test]
    async fn test_toggle_keeps_one_record_per_day() {
        let bot = house();
        say(&bot, message(GROUP, AKI, "/presence")).await;
        let first = bot.database().presence_for(AKI, today()).unwrap().unwrap();
        assert_eq!(first.status, PresenceStatus::Home);

        let out = say(&bot, message(GROUP, AKI, "/presence")).await;
        assert!(only(&out).body().contains("外出🚶"));

        let all = bot.database().presence_on(today()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, PresenceStatus::Away);
    }

    #[tokio::test]
    async fn test_explicit_status_with_note_and_button_keeps_note() {
        let bot = house();
        say(&bot, message(GROUP, AKI, "/presence away 22時に帰宅")).await;
        let entry = bot.database().presence_for(AKI, today()).unwrap().unwrap();
        assert_eq!(entry.status, PresenceStatus::Away);
        assert_eq!(entry.note.as_deref(), Some("22時に帰宅"));

        let reply = click(&bot, press(GROUP, AKI, CallbackAction::PresenceSet(PresenceStatus::Home))).await;
        assert_eq!(reply.notice.as_deref(), Some("在宅🏠 にしました"));
        assert!(only(&reply.outgoing).body().contains("在宅🏠｜22時に帰宅"));

        let entry = bot.database().presence_for(AKI, today()).unwrap().unwrap();
        assert_eq!(entry.status, PresenceStatus::Home);
        assert_eq!(entry.note.as_deref(), Some("22時に帰宅"));
    }

    #[tokio::test]
    async fn test_bad_status_shows_usage() {
        let bot = house();
        let out = say(&bot, message(GROUP, AKI, "/presence sleeping")).await;
        assert!(only(&out).body().contains("使い方"));
        assert!(bot.database().presence_for(AKI, today()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_note_form() {
        let bot = house();
        let reply = click(&bot, press(GROUP, AKI, CallbackAction::PresenceNote)).await;
        let form = open_form(&bot, only(&reply.outgoing), 501).await;
        assert_eq!(form.kind, FormKind::PresenceNote);

        let out = say(&bot, reply_to(GROUP, AKI, "夕飯いりません", 501)).await;
        assert!(only(&out).body().contains("夕飯いりません"));
        let entry = bot.database().presence_for(AKI, today()).unwrap().unwrap();
        assert_eq!(entry.note.as_deref(), Some("夕飯いりません"));
        assert!(bot.pending_form(GROUP, 501).await.is_none());
    }

    #[tokio::test]
    async fn test_presence_on_home_view() {
        let bot = house();
        say(&bot, message(GROUP, AKI, "/room 201")).await;
        say(&bot, message(GROUP, AKI, "/presence home")).await;
        let out = say(&bot, message(GROUP, BEN, "/home")).await;
        assert!(only(&out).body().contains("・Aki（201）— 在宅🏠"));
    }
}

// =============================================================================
// EVENTS
// =============================================================================

mod events {
    use super::*;

    async fn create_nabe(bot: &HouseBot, user_id: i64) -> i64 {
        let out = say(bot, message(GROUP, user_id, &format!("/event\n{NABE_FORM}"))).await;
        let kb = only(&out).keyboard().expect("delete button");
        match kb.buttons().next().map(|b| &b.action) {
            Some(CallbackAction::EventDelete { id }) => *id,
            other => panic!("expected a delete button, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_form_flow() {
        let bot = house();
        let out = say(&bot, message(GROUP, AKI, "/event")).await;
        assert!(only(&out).body().contains("予定を追加"));
        open_form(&bot, only(&out), 700).await;

        let out = say(&bot, reply_to(GROUP, AKI, NABE_FORM, 700)).await;
        let confirmation = only(&out).body();
        assert!(confirmation.contains("<b>鍋パーティー</b>"));
        assert!(confirmation.contains("10/20（火） 19:00-21:00"));
        assert!(confirmation.contains("📍 リビング"));
        assert!(bot.pending_form(GROUP, 700).await.is_none());

        let home = say(&bot, message(GROUP, BEN, "/home")).await;
        assert!(only(&home).body().contains("・19:00-21:00 鍋パーティー @リビング — Aki"));
    }

    #[tokio::test]
    async fn test_invalid_submission_keeps_form_open() {
        let bot = house();
        let out = click(&bot, press(GROUP, AKI, CallbackAction::EventNew)).await;
        open_form(&bot, only(&out.outgoing), 701).await;

        let bad = "タイトル: \n日付: someday\n開始: 19:00\n終了: 18:00";
        let out = say(&bot, reply_to(GROUP, AKI, bad, 701)).await;
        let text = only(&out).body();
        assert!(text.contains("タイトル: 入力してください"));
        assert!(text.contains("日付"));
        assert!(bot.pending_form(GROUP, 701).await.is_some());

        // A corrected reply to the same prompt goes through.
        let out = say(&bot, reply_to(GROUP, AKI, NABE_FORM, 701)).await;
        assert!(only(&out).body().starts_with("✅"));
        assert!(bot.pending_form(GROUP, 701).await.is_none());
    }

    #[tokio::test]
    async fn test_form_belongs_to_its_opener() {
        let bot = house();
        let out = say(&bot, message(GROUP, AKI, "/event")).await;
        open_form(&bot, only(&out), 702).await;

        let out = say(&bot, reply_to(GROUP, BEN, NABE_FORM, 702)).await;
        assert!(only(&out).body().contains("開いた人だけ"));
        assert!(bot.pending_form(GROUP, 702).await.is_some());
    }

    #[tokio::test]
    async fn test_reopening_replaces_older_prompt() {
        let bot = house();
        let out = say(&bot, message(GROUP, AKI, "/event")).await;
        open_form(&bot, only(&out), 703).await;
        let out = say(&bot, message(GROUP, AKI, "/event")).await;
        open_form(&bot, only(&out), 704).await;

        assert!(bot.pending_form(GROUP, 703).await.is_none());
        assert!(bot.pending_form(GROUP, 704).await.is_some());
    }

    #[tokio::test]
    async fn test_week_navigation_hides_other_weeks() {
        let bot = house();
        let next_week = "/event\nタイトル: 映画会\n日付: 2026-10-27\n開始: 20:00\n終了: 22:00";
        say(&bot, message(GROUP, AKI, next_week)).await;

        let home = say(&bot, message(GROUP, AKI, "/home")).await;
        assert!(!only(&home).body().contains("映画会"));
        assert!(only(&home).body().contains(NO_EVENTS));

        let reply = click(&bot, press(GROUP, AKI, CallbackAction::WeekNav { offset: 7 })).await;
        let edit = only(&reply.outgoing);
        assert!(matches!(edit, Outgoing::Edit { message_id: 2000, .. }));
        assert!(edit.body().contains("10/27（火）"));
        assert!(edit.body().contains("映画会"));
        assert!(edit.keyboard().unwrap().find(&CallbackAction::WeekNav { offset: 14 }).is_some());
    }

    #[tokio::test]
    async fn test_unreadable_offset_shows_this_week() {
        let bot = house();
        create_nabe(&bot, AKI).await;
        let cb = IncomingCallback { data: "home:week:soon".to_string(), ..press(GROUP, AKI, CallbackAction::Help) };
        let reply = click(&bot, cb).await;
        assert!(only(&reply.outgoing).body().contains("鍋パーティー"));
    }

    #[tokio::test]
    async fn test_viewer_timezone() {
        let bot = house();
        create_nabe(&bot, AKI).await;
        let out = say(&bot, message(BEN, BEN, "/tz UTC")).await;
        assert!(only(&out).body().contains("UTC"));

        let home = say(&bot, message(BEN, BEN, "/home")).await;
        assert!(only(&home).body().contains("・10:00-12:00 鍋パーティー"));

        let out = say(&bot, message(BEN, BEN, "/tz Mars/Olympus")).await;
        assert!(only(&out).body().contains("知らないタイムゾーン"));
    }

    #[tokio::test]
    async fn test_delete_permissions() {
        let bot = house();
        let id = create_nabe(&bot, AKI).await;

        let refused = click(&bot, press(GROUP, BEN, CallbackAction::EventDelete { id })).await;
        assert!(refused.notice.unwrap().contains("作成者か管理者"));
        assert!(bot.database().event(id).unwrap().is_some());

        let done = click(&bot, press(GROUP, ADMIN, CallbackAction::EventDelete { id })).await;
        assert!(only(&done.outgoing).body().contains("削除しました"));
        assert!(bot.database().event(id).unwrap().is_none());

        let again = click(&bot, press(GROUP, AKI, CallbackAction::EventDelete { id })).await;
        assert!(again.notice.unwrap().contains("すでに削除"));
    }

    #[tokio::test]
    async fn test_creator_may_delete() {
        let bot = house();
        let id = create_nabe(&bot, BEN).await;
        click(&bot, press(GROUP, BEN, CallbackAction::EventDelete { id })).await;
        assert!(bot.database().event(id).unwrap().is_none());
    }
}

// =============================================================================
// CLEANING
// =============================================================================

mod cleaning {
    use super::*;

    #[tokio::test]
    async fn test_menu_lists_locations() {
        let bot = house();
        let out = say(&bot, message(GROUP, AKI, "/clean")).await;
        let kb = only(&out).keyboard().unwrap();
        assert_eq!(kb.buttons().count(), bot.config().clean_locations.len());
        assert!(kb.rows.iter().all(|row| row.len() <= 2));
    }

    #[tokio::test]
    async fn test_pick_and_note() {
        let bot = house();
        let reply = click(&bot, press(GROUP, AKI, CallbackAction::CleaningPick { index: 0 })).await;
        let form = open_form(&bot, only(&reply.outgoing), 800).await;
        assert_eq!(form.kind, FormKind::CleaningNote { location: "キッチン".to_string() });

        let out = say(&bot, reply_to(GROUP, AKI, "換気扇の油汚れ", 800)).await;
        let text = only(&out).body();
        assert!(text.contains("Aki が <b>キッチン</b> を掃除しました！🧼"));
        assert!(text.contains("📝 メモ: 換気扇の油汚れ"));

        let logs = bot.database().recent_cleaning_logs(5).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].note.as_deref(), Some("換気扇の油汚れ"));
    }

    #[tokio::test]
    async fn test_no_note() {
        let bot = house();
        let reply = click(&bot, press(GROUP, AKI, CallbackAction::CleaningPick { index: 13 })).await;
        open_form(&bot, only(&reply.outgoing), 801).await;

        let out = say(&bot, reply_to(GROUP, AKI, "なし", 801)).await;
        assert!(only(&out).body().contains("（なし）"));
        let logs = bot.database().recent_cleaning_logs(5).unwrap();
        assert_eq!(logs[0].location, "玄関");
        assert_eq!(logs[0].note, None);

        let home = say(&bot, message(GROUP, BEN, "/home")).await;
        assert!(only(&home).body().contains("Aki — 玄関"));
    }

    #[tokio::test]
    async fn test_unknown_location() {
        let bot = house();
        let reply = click(&bot, press(GROUP, AKI, CallbackAction::CleaningPick { index: 99 })).await;
        assert!(reply.outgoing.is_empty());
        assert!(reply.notice.is_some());
    }
}

// =============================================================================
// MISC
// =============================================================================

mod misc {
    use super::*;

    #[tokio::test]
    async fn test_every_event_records_the_resident() {
        let bot = house();
        say(&bot, message(GROUP, BEN, "hello")).await;
        let resident = bot.database().resident(BEN).unwrap().unwrap();
        assert_eq!(resident.display_name, "Ben");

        click(&bot, press(GROUP, ADMIN, CallbackAction::Help)).await;
        let admin = bot.database().resident(ADMIN).unwrap().unwrap();
        assert_eq!(admin.role, crate::house::database::Role::Admin);
    }

    #[tokio::test]
    async fn test_stale_button() {
        let bot = house();
        let cb = IncomingCallback { data: "next_manual".to_string(), ..press(GROUP, AKI, CallbackAction::Help) };
        let reply = click(&bot, cb).await;
        assert!(reply.outgoing.is_empty());
        assert!(reply.notice.unwrap().contains("/home"));
    }

    #[tokio::test]
    async fn test_unknown_command_only_answered_in_private() {
        let bot = house();
        assert!(say(&bot, message(GROUP, AKI, "/dance")).await.is_empty());
        let out = say(&bot, message(AKI, AKI, "/dance")).await;
        assert!(only(&out).body().contains("/help"));
    }

    #[tokio::test]
    async fn test_start_offers_home() {
        let bot = house();
        let out = say(&bot, message(AKI, AKI, "/start")).await;
        let kb = only(&out).keyboard().unwrap();
        assert!(kb.find(&CallbackAction::WeekNav { offset: 0 }).is_some());
    }

    #[tokio::test]
    async fn test_room_command() {
        let bot = house();
        let out = say(&bot, message(AKI, AKI, "/room")).await;
        assert!(only(&out).body().contains("未登録"));
        say(&bot, message(AKI, AKI, "/room 305")).await;
        let out = say(&bot, message(AKI, AKI, "/room")).await;
        assert!(only(&out).body().contains("305"));
    }
}
