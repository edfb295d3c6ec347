//! The home view: today's presence, the week's events and recent cleaning.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::house::actions::{Button, CallbackAction, Keyboard};
use crate::house::calendar::{WeekWindow, clamp_offset, day_heading, local_date};
use crate::house::database::{CleaningLog, EventRecord, PresenceEntry};
use crate::house::message::{html_escape, truncate_chars};

/// Number of cleaning logs shown on the home view.
pub const RECENT_CLEANING_LIMIT: usize = 5;

pub const NO_EVENTS: &str = "・この週の予定はありません";
/// Most event lines shown for one week.
pub const MAX_WEEK_EVENT_LINES: usize = 40;
/// Characters the week section may fill, leaving room for the other
/// sections under Telegram's 4096-character message limit.
const WEEK_SECTION_CHARS: usize = 2400;

fn week_line_cap(line_budget: usize) -> usize {
    (WEEK_SECTION_CHARS / line_budget.max(1)).min(MAX_WEEK_EVENT_LINES)
}
const NO_PRESENCE: &str = "・まだ誰も登録していません";
const NO_CLEANING: &str = "・まだ記録はありません";

/// Everything the home view shows, loaded by the engine.
pub struct HomeData<'a> {
    /// Zone used for the week and timestamps.
    pub viewer_tz: Tz,
    /// Date of the presence section, in the house zone.
    pub presence_date: NaiveDate,
    pub window: WeekWindow,
    pub line_budget: usize,
    pub presence: &'a [PresenceEntry],
    pub events: &'a [EventRecord],
    pub cleaning: &'a [CleaningLog],
}

fn hm(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%H:%M").to_string()
}

fn md_hm(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%m/%d %H:%M").to_string()
}

/// One event line, truncated to `line_budget` characters and escaped.
///
/// Times print as `HH:MM` when they fall on `day`, otherwise as `MM/DD HH:MM`.
pub fn event_line(event: &EventRecord, day: NaiveDate, tz: Tz, line_budget: usize) -> String {
    let stamp = |ts: DateTime<Utc>| {
        if local_date(ts, tz) == day { hm(ts, tz) } else { md_hm(ts, tz) }
    };

    let mut line = format!("・{}-{} {}", stamp(event.start_at), stamp(event.end_at), event.title);
    if let Some(location) = &event.location {
        line.push_str(&format!(" @{location}"));
    }
    if let Some(creator) = &event.creator_name {
        line.push_str(&format!(" — {creator}"));
    }
    if let Some(memo) = &event.memo {
        let memo = memo.replace('\n', " ");
        line.push_str(&format!("｜{memo}"));
    }
    html_escape(&truncate_chars(&line, line_budget))
}

/// Group the events overlapping `window` by local start day.
///
/// Events that began before the window are listed under its first day.
pub fn bucket_events<'a>(
    events: &'a [EventRecord],
    window: &WeekWindow,
    tz: Tz,
) -> BTreeMap<NaiveDate, Vec<&'a EventRecord>> {
    let mut days: BTreeMap<NaiveDate, Vec<&EventRecord>> = BTreeMap::new();
    for event in events {
        if event.start_at >= window.upper || event.end_at <= window.lower {
            continue;
        }
        let day = local_date(event.start_at, tz).max(window.first_day);
        days.entry(day).or_default().push(event);
    }
    for list in days.values_mut() {
        list.sort_by(|a, b| a.start_at.cmp(&b.start_at).then(a.id.cmp(&b.id)));
    }
    days
}

/// The week section: a heading, then each day that has events.
pub fn render_week(events: &[EventRecord], window: &WeekWindow, tz: Tz, line_budget: usize) -> String {
    let mut out = format!(
        "📅 <b>{} 〜 {} の予定</b>",
        day_heading(window.first_day),
        day_heading(window.last_day)
    );

    let days = bucket_events(events, window, tz);
    if days.is_empty() {
        out.push('\n');
        out.push_str(NO_EVENTS);
        return out;
    }
    let cap = week_line_cap(line_budget);
    let total: usize = days.values().map(Vec::len).sum();
    let mut shown = 0;
    for (day, list) in days {
        if shown == cap {
            break;
        }
        out.push_str(&format!("\n\n<b>{}</b>", day_heading(day)));
        for event in list.into_iter().take(cap - shown) {
            out.push('\n');
            out.push_str(&event_line(event, day, tz, line_budget));
            shown += 1;
        }
    }
    if shown < total {
        out.push_str(&format!("\n・…他{}件", total - shown));
    }
    out
}

pub fn render_presence(entries: &[PresenceEntry], date: NaiveDate, line_budget: usize) -> String {
    let mut out = format!("👥 <b>今日の在宅状況（{}）</b>", day_heading(date));
    if entries.is_empty() {
        out.push('\n');
        out.push_str(NO_PRESENCE);
        return out;
    }
    for entry in entries {
        let mut line = match &entry.room_no {
            Some(room) => format!("・{}（{room}）— {}", entry.display_name, entry.status.label()),
            None => format!("・{} — {}", entry.display_name, entry.status.label()),
        };
        if let Some(note) = &entry.note {
            line.push_str(&format!("｜{note}"));
        }
        out.push('\n');
        out.push_str(&html_escape(&truncate_chars(&line, line_budget)));
    }
    out
}

pub fn render_cleaning(logs: &[CleaningLog], tz: Tz, line_budget: usize) -> String {
    let mut out = "🧹 <b>最近の掃除</b>".to_string();
    if logs.is_empty() {
        out.push('\n');
        out.push_str(NO_CLEANING);
        return out;
    }
    for log in logs {
        let name = log.display_name.clone().unwrap_or_else(|| log.user_id.to_string());
        let mut line = format!("・{} {name} — {}", md_hm(log.timestamp, tz), log.location);
        if let Some(note) = &log.note {
            line.push_str(&format!("｜{note}"));
        }
        out.push('\n');
        out.push_str(&html_escape(&truncate_chars(&line, line_budget)));
    }
    out
}

pub fn render_home(data: &HomeData<'_>) -> String {
    format!(
        "🏡 <b>シェアハウス ホーム</b>\n\n{}\n\n{}\n\n{}",
        render_presence(data.presence, data.presence_date, data.line_budget),
        render_week(data.events, &data.window, data.viewer_tz, data.line_budget),
        render_cleaning(data.cleaning, data.viewer_tz, data.line_budget),
    )
}

/// Previous / this / next week buttons around `offset`.
pub fn week_nav_row(offset: i64) -> Vec<Button> {
    let offset = clamp_offset(offset);
    vec![
        Button::new("◀ 前の週", CallbackAction::WeekNav { offset: clamp_offset(offset - 7) }),
        Button::new("今週", CallbackAction::WeekNav { offset: 0 }),
        Button::new("次の週 ▶", CallbackAction::WeekNav { offset: clamp_offset(offset + 7) }),
    ]
}

pub fn home_keyboard(offset: i64) -> Keyboard {
    Keyboard::default()
        .row(vec![
            Button::new("📖 マニュアル", CallbackAction::ManualList),
            Button::new("🏠 在宅/外出", CallbackAction::PresenceMenu),
        ])
        .row(vec![
            Button::new("➕ 予定を追加", CallbackAction::EventNew),
            Button::new("🧹 掃除チェック", CallbackAction::CleaningMenu),
        ])
        .row(week_nav_row(offset))
        .row(vec![Button::new("❓ ヘルプ", CallbackAction::Help)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::house::database::PresenceStatus;
    use chrono::TimeZone;
    use chrono_tz::Asia::Tokyo;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(id: i64, title: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> EventRecord {
        EventRecord {
            id,
            title: title.to_string(),
            start_at: start,
            end_at: end,
            created_by: Some(1),
            creator_name: None,
            location: None,
            memo: None,
        }
    }

    // Sunday 2026-10-18 12:00 in Tokyo.
    fn window() -> WeekWindow {
        WeekWindow::new(utc(2026, 10, 18, 3, 0), Tokyo, 0)
    }

    #[test]
    fn test_events_outside_window_never_render() {
        let w = window();
        let events = vec![
            // Ends exactly at the window's lower bound.
            event(1, "前の週の飲み会", utc(2026, 10, 17, 12, 0), w.lower),
            // Starts exactly at the upper bound.
            event(2, "来週の掃除", w.upper, utc(2026, 10, 25, 16, 0)),
            event(3, "今週のBBQ", utc(2026, 10, 20, 9, 0), utc(2026, 10, 20, 12, 0)),
        ];
        let text = render_week(&events, &w, Tokyo, 48);
        assert!(!text.contains("前の週の飲み会"));
        assert!(!text.contains("来週の掃除"));
        assert!(text.contains("今週のBBQ"));
    }

    #[test]
    fn test_empty_week_has_placeholder() {
        let text = render_week(&[], &window(), Tokyo, 48);
        assert!(text.ends_with(NO_EVENTS));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_days_are_unique_and_sorted() {
        let w = window();
        let events = vec![
            event(3, "夕飯", utc(2026, 10, 19, 10, 0), utc(2026, 10, 19, 11, 0)),
            event(1, "朝ヨガ", utc(2026, 10, 18, 22, 0), utc(2026, 10, 18, 23, 0)),
            event(2, "同時刻", utc(2026, 10, 18, 22, 0), utc(2026, 10, 18, 23, 30)),
        ];
        let days = bucket_events(&events, &w, Tokyo);
        // 2026-10-18 22:00 UTC is 10/19 07:00 in Tokyo, so everything lands on 10/19.
        assert_eq!(days.len(), 1);
        let ids: Vec<_> = days[&day(2026, 10, 19)].iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let text = render_week(&events, &w, Tokyo, 48);
        assert_eq!(text.matches("10/19（月）").count(), 1);
    }

    #[test]
    fn test_event_started_before_window_goes_to_first_day() {
        let w = window();
        let events = vec![event(1, "合宿", utc(2026, 10, 16, 0, 0), utc(2026, 10, 19, 0, 0))];
        let days = bucket_events(&events, &w, Tokyo);
        assert!(days.contains_key(&w.first_day));

        let line = event_line(&events[0], w.first_day, Tokyo, 48);
        assert_eq!(line, "・10/16 09:00-10/19 09:00 合宿");
    }

    #[test]
    fn test_event_line_converts_to_viewer_zone() {
        let mut e = event(1, "映画会", utc(2026, 10, 18, 10, 0), utc(2026, 10, 18, 12, 0));
        e.location = Some("リビング".to_string());
        e.creator_name = Some("Aki".to_string());
        e.memo = Some("ポップコーン".to_string());
        assert_eq!(
            event_line(&e, day(2026, 10, 18), Tokyo, 48),
            "・19:00-21:00 映画会 @リビング — Aki｜ポップコーン"
        );
        assert_eq!(event_line(&e, day(2026, 10, 18), chrono_tz::UTC, 48), "・10:00-12:00 映画会 @リビング — Aki｜ポップコーン");
    }

    #[test]
    fn test_event_line_truncates_before_escaping() {
        let e = event(1, "<b>とても長いタイトルのイベントです</b>", utc(2026, 10, 18, 10, 0), utc(2026, 10, 18, 12, 0));
        let line = event_line(&e, day(2026, 10, 18), Tokyo, 20);
        assert!(line.ends_with('…'));
        assert!(line.starts_with("・19:00-21:00 &lt;b&gt;"));
        assert!(!line.contains("<b>"));
    }

    #[test]
    fn test_busy_week_is_capped() {
        let w = window();
        let events: Vec<_> = (0..60)
            .map(|i| {
                let start = utc(2026, 10, 19, 0, 0) + chrono::Duration::minutes(i * 10);
                event(i, &"長い名前の予定".repeat(5), start, start + chrono::Duration::hours(1))
            })
            .collect();
        let text = render_week(&events, &w, Tokyo, 48);
        assert_eq!(text.matches("\n・").count(), MAX_WEEK_EVENT_LINES + 1);
        assert!(text.ends_with("・…他20件"));

        // Wider lines leave room for fewer of them.
        let wide = render_week(&events, &w, Tokyo, 200);
        assert!(wide.ends_with("・…他48件"));
        assert!(wide.chars().count() <= WEEK_SECTION_CHARS + 200);
    }

    #[test]
    fn test_presence_section() {
        let entries = vec![PresenceEntry {
            user_id: 1,
            display_name: "Aki".to_string(),
            room_no: Some("201".to_string()),
            date: day(2026, 10, 18),
            status: PresenceStatus::Away,
            note: Some("22時に帰宅".to_string()),
            updated_at: utc(2026, 10, 18, 3, 0),
        }];
        let text = render_presence(&entries, day(2026, 10, 18), 48);
        assert!(text.contains("・Aki（201）— 外出🚶｜22時に帰宅"));
        assert!(render_presence(&[], day(2026, 10, 18), 48).ends_with(NO_PRESENCE));
    }

    #[test]
    fn test_cleaning_section() {
        let logs = vec![CleaningLog {
            id: 1,
            user_id: 7,
            display_name: None,
            location: "キッチン".to_string(),
            note: None,
            timestamp: utc(2026, 10, 18, 0, 30),
        }];
        assert_eq!(render_cleaning(&logs, Tokyo, 48).lines().nth(1), Some("・10/18 09:30 7 — キッチン"));
    }

    #[test]
    fn test_nav_row_is_clamped() {
        let row = week_nav_row(364);
        assert_eq!(row[0].action, CallbackAction::WeekNav { offset: 357 });
        assert_eq!(row[2].action, CallbackAction::WeekNav { offset: 364 });
        let kb = home_keyboard(0);
        assert!(kb.find(&CallbackAction::WeekNav { offset: -7 }).is_some());
        assert!(kb.find(&CallbackAction::EventNew).is_some());
    }
}
