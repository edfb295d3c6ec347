//! Slash commands.

/// A parsed slash command. Arguments are the text after the command, trimmed.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    Home,
    Manuals,
    Manual(String),
    Presence(String),
    Event(String),
    Clean,
    Tz(String),
    Room(String),
    Unknown(String),
}

/// Commands advertised through `setMyCommands`.
pub const COMMAND_LIST: &[(&str, &str)] = &[
    ("home", "ホーム画面（在宅状況・今週の予定・掃除記録）"),
    ("manual", "マニュアルを検索: /manual ゴミ出し"),
    ("manuals", "マニュアルの一覧"),
    ("presence", "在宅/外出を切り替え: /presence away 22時に帰宅"),
    ("event", "予定を追加"),
    ("clean", "掃除チェック"),
    ("tz", "表示タイムゾーンを設定: /tz Asia/Tokyo"),
    ("room", "部屋番号を登録: /room 201"),
    ("help", "使い方"),
];

/// Parse `text` as a command.
///
/// Returns `None` for plain text and for commands addressed to another bot
/// (`/home@other_bot`).
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let text = text.trim_start();
    let rest = text.strip_prefix('/')?;

    let (head, args) = match rest.find(char::is_whitespace) {
        Some(pos) => (&rest[..pos], rest[pos..].trim()),
        None => (rest, ""),
    };
    let (name, target) = match head.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (head, None),
    };
    if let (Some(target), Some(me)) = (target, bot_username)
        && !target.eq_ignore_ascii_case(me)
    {
        return None;
    }
    if name.is_empty() {
        return None;
    }

    let args = args.to_string();
    Some(match name.to_lowercase().as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "home" => Command::Home,
        "manuals" => Command::Manuals,
        "manual" | "search" => Command::Manual(args),
        "presence" => Command::Presence(args),
        "event" => Command::Event(args),
        "clean" => Command::Clean,
        "tz" => Command::Tz(args),
        "room" => Command::Room(args),
        other => Command::Unknown(other.to_string()),
    })
}
