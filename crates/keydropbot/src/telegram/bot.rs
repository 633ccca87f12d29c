//! Bot initialization and the command enum

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use keydropcore::config;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "open the menu")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "redeem a key: /key <KEY>")]
    Key(String),
    #[command(description = "show your key")]
    MyKey,
    #[command(description = "time left on your key")]
    MyTime,
    #[command(description = "get a batch of lines: /generate <resource>")]
    Generate(String),
    #[command(description = "create a key (admin)")]
    GenKey(String),
    #[command(description = "delete a key (admin)")]
    Revoke(String),
    #[command(description = "message every key holder (admin)")]
    Broadcast(String),
    #[command(description = "remaining lines per resource (admin)")]
    Stock,
    #[command(description = "append lines to a resource (admin)")]
    Restock(String),
    #[command(description = "counters (admin)")]
    Stats,
}

impl Command {
    /// Command name and raw argument text, as understood by `Request::from_command`.
    pub fn parts(&self) -> (&'static str, &str) {
        match self {
            Command::Start => ("start", ""),
            Command::Help => ("help", ""),
            Command::Key(args) => ("key", args),
            Command::MyKey => ("mykey", ""),
            Command::MyTime => ("mytime", ""),
            Command::Generate(args) => ("generate", args),
            Command::GenKey(args) => ("genkey", args),
            Command::Revoke(args) => ("revoke", args),
            Command::Broadcast(args) => ("broadcast", args),
            Command::Stock => ("stock", ""),
            Command::Restock(args) => ("restock", args),
            Command::Stats => ("stats", ""),
        }
    }
}

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Missing token, invalid URL or HTTP client failure
pub fn create_bot() -> anyhow::Result<Bot> {
    let token = config::BOT_TOKEN.as_str();
    if token.is_empty() {
        anyhow::bail!("BOT_TOKEN (or TELOXIDE_TOKEN) environment variable is not set");
    }

    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = Bot::with_client(token, client);

    // Check if local Bot API server is configured
    let bot = match std::env::var("BOT_API_URL") {
        Ok(bot_api_url) => {
            log::info!("Using custom Bot API URL: {}", bot_api_url);
            let url = url::Url::parse(&bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
            bot.set_api_url(url)
        }
        Err(_) => bot,
    };

    Ok(bot)
}

/// Sets up bot commands in Telegram UI
///
/// Only user-facing commands are listed; admin commands stay hidden.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::types::BotCommand;

    bot.set_my_commands(vec![
        BotCommand::new("start", "open the menu"),
        BotCommand::new("key", "redeem a key"),
        BotCommand::new("mykey", "show your key"),
        BotCommand::new("mytime", "time left on your key"),
        BotCommand::new("help", "list commands"),
    ])
    .await?;

    Ok(())
}
