use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use teloxide::types::ChatId;

use crate::house::HouseConfig;

/// Default character budget for one rendered line.
pub const DEFAULT_LINE_BUDGET: usize = 48;

const LINE_BUDGET_RANGE: std::ops::RangeInclusive<usize> = 10..=200;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Unknown IANA timezone name.
    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Residents who may delete anyone's events.
    #[serde(default)]
    admin_ids: Vec<i64>,
    /// Group chats the bot answers in. Empty means every group.
    #[serde(default)]
    allowed_chats: Vec<i64>,
    /// House timezone (IANA name). Defaults to Asia/Tokyo.
    timezone: Option<String>,
    /// Directory for the database and logs. Defaults to current directory.
    data_dir: Option<String>,
    /// Chat that receives warnings and errors.
    log_chat_id: Option<i64>,
    /// Cleaning locations offered by the cleaning check.
    clean_locations: Option<Vec<String>>,
    /// JSON file of manual records upserted at startup.
    manuals_file: Option<String>,
    #[serde(default = "default_line_budget")]
    line_budget: usize,
}

fn default_line_budget() -> usize {
    DEFAULT_LINE_BUDGET
}

/// Cleaning locations of the house, in display order.
pub fn default_clean_locations() -> Vec<String> {
    [
        "キッチン",
        "トイレ1階男",
        "トイレ1階女",
        "トイレ2階男",
        "トイレ2階女",
        "お風呂男",
        "お風呂女",
        "脱衣所男",
        "脱衣所女",
        "広間",
        "廊下1階",
        "廊下2階",
        "階段",
        "玄関",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub struct Config {
    pub config_path: PathBuf,
    pub telegram_bot_token: String,
    pub admin_ids: Vec<i64>,
    pub allowed_chats: HashSet<ChatId>,
    pub timezone: Tz,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    pub log_chat_id: Option<ChatId>,
    pub clean_locations: Vec<String>,
    pub manuals_file: Option<PathBuf>,
    pub line_budget: usize,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        if !LINE_BUDGET_RANGE.contains(&file.line_budget) {
            return Err(ConfigError::Validation(format!(
                "line_budget must be between {} and {}",
                LINE_BUDGET_RANGE.start(),
                LINE_BUDGET_RANGE.end()
            )));
        }

        let timezone = match file.timezone {
            Some(name) => name.trim().parse::<Tz>().map_err(|_| ConfigError::InvalidTimezone(name))?,
            None => chrono_tz::Asia::Tokyo,
        };

        let clean_locations = match file.clean_locations {
            Some(locations) => {
                let locations: Vec<String> = locations
                    .into_iter()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
                if locations.is_empty() {
                    return Err(ConfigError::Validation("clean_locations must not be empty".into()));
                }
                locations
            }
            None => default_clean_locations(),
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            telegram_bot_token: file.telegram_bot_token,
            admin_ids: file.admin_ids,
            allowed_chats: file.allowed_chats.into_iter().map(ChatId).collect(),
            timezone,
            data_dir,
            log_chat_id: file.log_chat_id.map(ChatId),
            clean_locations,
            manuals_file: file.manuals_file.map(PathBuf::from),
            line_budget: file.line_budget,
        })
    }

    /// Private chats are always served; groups only when allowed.
    pub fn is_allowed_chat(&self, chat_id: ChatId) -> bool {
        chat_id.is_user() || self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("house.db")
    }

    pub fn house_config(&self, bot_username: Option<String>) -> HouseConfig {
        HouseConfig {
            house_tz: self.timezone,
            admin_ids: self.admin_ids.clone(),
            clean_locations: self.clean_locations.clone(),
            line_budget: self.line_budget,
            bot_username,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.timezone, chrono_tz::Asia::Tokyo);
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.line_budget, DEFAULT_LINE_BUDGET);
        assert_eq!(config.clean_locations.len(), 14);
        assert_eq!(config.clean_locations[0], "キッチン");
        assert!(config.admin_ids.is_empty());
        assert!(config.log_chat_id.is_none());
        assert_eq!(config.database_path(), PathBuf::from("./house.db"));
    }

    #[test]
    fn test_full_config() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "admin_ids": [42],
            "allowed_chats": [-1001234],
            "timezone": "Europe/Berlin",
            "data_dir": "/var/lib/house",
            "log_chat_id": -1009999,
            "clean_locations": ["Kitchen", "  ", "Bath"],
            "manuals_file": "manuals.json",
            "line_budget": 60
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.clean_locations, vec!["Kitchen", "Bath"]);
        assert_eq!(config.log_chat_id, Some(ChatId(-1009999)));
        assert_eq!(config.manuals_file, Some(PathBuf::from("manuals.json")));

        let house = config.house_config(Some("house_bot".into()));
        assert_eq!(house.admin_ids, vec![42]);
        assert_eq!(house.line_budget, 60);
    }

    #[test]
    fn test_allowed_chats() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "allowed_chats": [-1001234]
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert!(config.is_allowed_chat(ChatId(-1001234)));
        assert!(!config.is_allowed_chat(ChatId(-1005678)));
        // Private chats are always allowed.
        assert!(config.is_allowed_chat(ChatId(777)));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{ "telegram_bot_token": "" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = write_config(r#"{ "telegram_bot_token": "invalid_token_no_colon" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{ "telegram_bot_token": "notanumber:ABCdef" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_token_format_empty_secret() {
        let file = write_config(r#"{ "telegram_bot_token": "123456789:" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_timezone() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "timezone": "Mars/Olympus"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::InvalidTimezone(ref name) if name == "Mars/Olympus"));
    }

    #[test]
    fn test_line_budget_out_of_range() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "line_budget": 5
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("line_budget"));
    }

    #[test]
    fn test_blank_clean_locations() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "clean_locations": [" "]
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("clean_locations"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
