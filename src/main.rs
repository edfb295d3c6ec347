use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use sharehouse_bot::admin_log::AdminLogLayer;
use sharehouse_bot::config::Config;
use sharehouse_bot::house::manual::load_manuals_file;
use sharehouse_bot::house::telegram::{incoming_callback, incoming_text};
use sharehouse_bot::house::{Database, HouseBot, Outgoing, TelegramClient};

struct BotState {
    config: Config,
    house: HouseBot,
    telegram: TelegramClient,
}

impl BotState {
    async fn new(config: Config, bot: &Bot) -> Result<Self, String> {
        let bot_username = match bot.get_me().await {
            Ok(me) => {
                info!("Bot user ID: {}, username: @{}", me.id, me.username());
                Some(me.username().to_string())
            }
            Err(e) => {
                warn!("Failed to get bot info: {e}");
                None
            }
        };

        let db_path = config.database_path();
        let database = Database::open(&db_path)
            .map_err(|e| format!("Failed to open database {}: {e}", db_path.display()))?;

        let house = HouseBot::new(config.house_config(bot_username), Arc::new(database));

        let extra = match &config.manuals_file {
            Some(path) => match load_manuals_file(path) {
                Ok(seeds) => seeds,
                Err(e) => {
                    warn!("Skipping manuals file: {e}");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        house.seed_manuals(&extra).map_err(|e| format!("Failed to seed manuals: {e}"))?;

        let telegram = TelegramClient::new(bot.clone());
        telegram.set_commands().await.ok();

        Ok(Self { config, house, telegram })
    }

    /// Execute replies and register the form prompts and search results that went out.
    async fn deliver(&self, outgoing: Vec<Outgoing>, user_id: i64) {
        for sent in self.telegram.deliver(outgoing, user_id).await {
            self.house.track(sent.chat_id, sent.message_id, sent.tracked).await;
        }
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "house.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("house.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(AdminLogLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting sharehouse-bot...");
    info!("Loaded config from {config_path}");
    info!("House timezone: {}, admins: {:?}", config.timezone, config.admin_ids);

    let state = match BotState::new(config, &bot).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    if !state.config.is_allowed_chat(msg.chat.id) {
        return Ok(());
    }
    if msg.from.as_ref().is_some_and(|u| u.is_bot) {
        return Ok(());
    }
    let Some(incoming) = incoming_text(&msg) else {
        return Ok(());
    };

    let outgoing = state.house.handle_text(&incoming).await;
    state.deliver(outgoing, incoming.sender.user_id).await;
    Ok(())
}

async fn handle_callback(query: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(incoming) = incoming_callback(&query) else {
        warn!("Callback {:?} without message or data", query.id);
        state.telegram.answer_callback(&query, None).await.ok();
        return Ok(());
    };
    if !state.config.is_allowed_chat(ChatId(incoming.chat_id)) {
        state.telegram.answer_callback(&query, None).await.ok();
        return Ok(());
    }

    let reply = state.house.handle_callback(&incoming).await;
    // Answer first so the client stops its spinner.
    state.telegram.answer_callback(&query, reply.notice.as_deref()).await.ok();
    state.deliver(reply.outgoing, incoming.sender.user_id).await;
    Ok(())
}
