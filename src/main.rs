use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use serenity::{
    async_trait,
    model::{
        channel::Message,
        gateway::{GatewayIntents, Ready},
    },
    prelude::*,
    Client,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use dotenvy::dotenv;

mod command;
mod compose;
mod config;
mod conversation;
mod llm;
mod presence;
mod steam;
mod tenor;
#[cfg(test)]
mod test_http;
mod utils;

use command::*;
use config::Settings;
use conversation::ConversationStore;
use llm::{LlmClient, TextGenerator};
use presence::PresenceGame;
use steam::SteamClient;
use tenor::TenorClient;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub struct Data {
    pub conversation: Arc<ConversationStore>,
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => panic!("Failed to start bot: {:?}", error),
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Error in command `{}`: {:?}", ctx.command().name, error);
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling error: {}", e)
            }
        }
    }
}

struct Handler {
    conversation: Arc<ConversationStore>,
    main_chat_id: serenity::ChannelId,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: serenity::Context, ready: Ready) {
        info!("Logged in as {}", ready.user.name);
        info!("Bot ID: {}", ready.user.id);
        info!("Connected to {} guilds", ready.guilds.len());
    }

    // Main chat messages become context for generated announcements
    async fn message(&self, _ctx: serenity::Context, msg: Message) {
        if msg.author.bot || msg.channel_id != self.main_chat_id {
            return;
        }

        let content = msg.content.trim();
        if content.is_empty() {
            return;
        }

        self.conversation
            .add_user_message(msg.channel_id, format!("{}: {}", msg.author.name, content));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load().context("Failed to load configuration")?;
    if settings.user_links.is_empty() {
        warn!("No Steam accounts linked, presence updates will be skipped");
    }

    // One connection pool for every outbound API, released when main returns
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let conversation = Arc::new(ConversationStore::new(settings.conversation.clone()));
    let generator: Arc<dyn TextGenerator> = Arc::new(LlmClient::new(http.clone(), settings.llm.clone()));
    let presence = PresenceGame::new(
        &settings,
        SteamClient::new(http.clone(), settings.steam_api_key.clone(), settings.steam.clone()),
        TenorClient::new(http.clone(), settings.tenor_api_key.clone()),
        generator,
        conversation.clone(),
    );

    let options = poise::FrameworkOptions {
        commands: vec![
            now_playing(),
            role_members(),
            random_emoji(),
            random_sticker(),
        ],
        prefix_options: poise::PrefixFrameworkOptions {
            prefix: Some("/".into()),
            edit_tracker: Some(Arc::new(poise::EditTracker::for_timespan(
                Duration::from_secs(3600),
            ))),
            ..Default::default()
        },
        on_error: |error| Box::pin(on_error(error)),
        pre_command: |ctx| {
            Box::pin(async move {
                info!("Executing command {}...", ctx.command().qualified_name);
            })
        },
        ..Default::default()
    };

    let token = settings.discord_token.clone();
    let handler = Handler {
        conversation: conversation.clone(),
        main_chat_id: settings.main_chat_id,
    };

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_EMOJIS_AND_STICKERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let framework = poise::Framework::builder()
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                if let Ok(guild_id_str) = std::env::var("GUILD_ID") {
                    if let Ok(guild_id) = guild_id_str.parse::<u64>() {
                        let guild_id = serenity::GuildId::new(guild_id);
                        poise::builtins::register_in_guild(ctx, &framework.options().commands, guild_id).await?;
                        info!("Registered commands for guild {}", guild_id);
                    } else {
                        warn!("Invalid GUILD_ID format: {}", guild_id_str);
                    }
                }

                // Setup runs after Ready, so the gateway is usable from the first tick
                tokio::spawn(presence.run(ctx.clone()));

                Ok(Data { conversation })
            })
        })
        .options(options)
        .build();

    let mut client = Client::builder(token, intents)
        .event_handler(handler)
        .framework(framework)
        .await
        .context("Failed to create Discord client")?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutting down");
        shard_manager.shutdown_all().await;
    });

    client.start().await?;
    Ok(())
}
