//! Hourly presence update: play a random game from a linked Steam library
//! and, now and then, announce it in the main chat.

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serenity::{ActivityData, OnlineStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::compose::{GameAnnouncement, compose_game_message, roll_roast};
use crate::config::{PresenceConfig, Settings};
use crate::conversation::ConversationStore;
use crate::llm::{LlmError, TextGenerator};
use crate::steam::{OwnedGame, SteamClient, SteamClientError, SteamId};
use crate::tenor::{TenorClient, TenorError};

pub const STATUSES: [OnlineStatus; 3] = [
    OnlineStatus::Online,
    OnlineStatus::Idle,
    OnlineStatus::DoNotDisturb,
];

/// A roll of exactly `RANDOM_POST_HIT` on `1..=RANDOM_POST_SIDES` posts early.
const RANDOM_POST_SIDES: u32 = 50;
const RANDOM_POST_HIT: u32 = 10;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Steam(#[from] SteamClientError),
    #[error(transparent)]
    Tenor(#[from] TenorError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),
    #[error("completion backend returned an empty message")]
    EmptyMessage,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    ChannelNotFound,
    NoLinkedAccounts,
    NothingPlayed { steam_id: SteamId },
    PresenceOnly { game: String, cycles_without_post: u32 },
    Posted { game: String },
}

/// Cycles since the last announcement.
#[derive(Debug)]
pub struct PostCounter {
    count: u32,
    guarantee: u32,
}

impl PostCounter {
    pub fn new(guarantee: u32) -> Self {
        Self {
            count: 0,
            guarantee: guarantee.max(1),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Counts one cycle and decides whether it should post. The count stays
    /// at the guarantee until `mark_posted` is called.
    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        self.count = (self.count + 1).min(self.guarantee);
        let lucky = roll_random_post(rng);
        lucky || self.count >= self.guarantee
    }

    pub fn mark_posted(&mut self) {
        self.count = 0;
    }
}

pub fn roll_random_post<R: Rng + ?Sized>(rng: &mut R) -> bool {
    rng.random_range(1..=RANDOM_POST_SIDES) == RANDOM_POST_HIT
}

pub fn random_status<R: Rng + ?Sized>(rng: &mut R) -> OnlineStatus {
    STATUSES.choose(rng).copied().unwrap_or(OnlineStatus::Online)
}

/// The channel a cycle reports to, plus the bot's presence.
#[async_trait]
pub trait CycleTarget: Send + Sync {
    fn channel_id(&self) -> serenity::ChannelId;
    fn guild_name(&self) -> Option<String>;
    fn set_playing(&self, game: &str, status: OnlineStatus);
    async fn say(&self, content: &str) -> Result<(), serenity::Error>;
}

/// The main chat as seen through the gateway.
struct DiscordChannel {
    ctx: serenity::Context,
    channel: serenity::GuildChannel,
}

#[async_trait]
impl CycleTarget for DiscordChannel {
    fn channel_id(&self) -> serenity::ChannelId {
        self.channel.id
    }

    fn guild_name(&self) -> Option<String> {
        self.channel.guild_id.name(&self.ctx.cache)
    }

    fn set_playing(&self, game: &str, status: OnlineStatus) {
        self.ctx.set_presence(Some(ActivityData::playing(game)), status);
    }

    async fn say(&self, content: &str) -> Result<(), serenity::Error> {
        self.channel.id.say(&self.ctx.http, content).await?;
        Ok(())
    }
}

pub struct PresenceGame {
    steam: SteamClient,
    tenor: TenorClient,
    generator: Arc<dyn TextGenerator>,
    conversation: Arc<ConversationStore>,
    links: Vec<(serenity::UserId, SteamId)>,
    channel_id: serenity::ChannelId,
    config: PresenceConfig,
    counter: PostCounter,
    rng: StdRng,
}

impl PresenceGame {
    pub fn new(
        settings: &Settings,
        steam: SteamClient,
        tenor: TenorClient,
        generator: Arc<dyn TextGenerator>,
        conversation: Arc<ConversationStore>,
    ) -> Self {
        let mut links: Vec<_> = settings
            .user_links
            .iter()
            .map(|(user, steam)| (*user, *steam))
            .collect();
        links.sort_by_key(|(user, _)| *user);

        Self {
            steam,
            tenor,
            generator,
            conversation,
            links,
            channel_id: settings.main_chat_id,
            counter: PostCounter::new(settings.presence.post_guarantee),
            config: settings.presence.clone(),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Runs forever. A failed cycle is logged and the next tick proceeds.
    pub async fn run(mut self, ctx: serenity::Context) {
        let period = Duration::from_secs(self.config.interval_minutes.max(1) * 60);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Presence task started: {} linked accounts, every {:?}",
            self.links.len(),
            period
        );

        loop {
            interval.tick().await;

            match self.run_cycle(&ctx).await {
                Ok(outcome) => info!("Presence cycle finished: {:?}", outcome),
                Err(e) => error!("Presence cycle failed: {}", e),
            }
        }
    }

    pub async fn run_cycle(&mut self, ctx: &serenity::Context) -> Result<CycleOutcome, CycleError> {
        let channel = match self.channel_id.to_channel(ctx).await {
            Ok(channel) => channel.guild(),
            Err(e) => {
                warn!("Could not resolve channel {}: {}", self.channel_id, e);
                None
            }
        };
        let Some(channel) = channel else {
            return Ok(CycleOutcome::ChannelNotFound);
        };

        let target = DiscordChannel {
            ctx: ctx.clone(),
            channel,
        };
        self.play_cycle(&target).await
    }

    /// One cycle against a resolved channel. The post counter is reset only
    /// once the announcement has been sent.
    pub async fn play_cycle(&mut self, target: &dyn CycleTarget) -> Result<CycleOutcome, CycleError> {
        let Some((user_id, steam_id)) = self.links.choose(&mut self.rng).copied() else {
            return Ok(CycleOutcome::NoLinkedAccounts);
        };

        let Some(game) = self.steam.random_game_from_user(steam_id, &mut self.rng).await? else {
            return Ok(CycleOutcome::NothingPlayed { steam_id });
        };

        let status = random_status(&mut self.rng);
        target.set_playing(&game.name, status);
        self.conversation.set_current_game(&game.name);
        info!("Now playing {} ({:?}) from {}'s library", game.name, status, user_id);

        if !self.counter.tick(&mut self.rng) {
            return Ok(CycleOutcome::PresenceOnly {
                game: game.name,
                cycles_without_post: self.counter.count(),
            });
        }

        self.announce(target, user_id, &game).await?;
        Ok(CycleOutcome::Posted { game: game.name })
    }

    async fn announce(
        &mut self,
        target: &dyn CycleTarget,
        user_id: serenity::UserId,
        game: &OwnedGame,
    ) -> Result<(), CycleError> {
        let description = self.steam.game_description(game.appid).await;
        let roast = roll_roast(&mut self.rng, self.config.roast_chance_percent);
        let announcement = GameAnnouncement {
            user_id,
            game,
            description: description.as_deref(),
            roast,
        };

        let guild_name = target.guild_name();
        let message = compose_game_message(
            self.generator.as_ref(),
            &self.conversation,
            target.channel_id(),
            guild_name.as_deref(),
            &announcement,
        )
        .await?;

        if message.trim().is_empty() {
            return Err(CycleError::EmptyMessage);
        }

        target.say(&message).await?;
        self.conversation.add_assistant_message(target.channel_id(), message);
        self.counter.mark_posted();

        match self.tenor.first_gif_url(&game.name).await? {
            Some(url) => target.say(&url).await?,
            None => warn!("No GIF found for {}", game.name),
        }

        Ok(())
    }

    #[cfg(test)]
    fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversationConfig, LlmConfig, SteamConfig};
    use crate::llm::{ChatMessage, FragmentStream, Role};
    use crate::test_http::{Route, serve};
    use futures_util::stream::{self, StreamExt};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_random_post_rate() {
        let mut rng = StdRng::seed_from_u64(50);
        let trials = 200_000;
        let hits = (0..trials).filter(|_| roll_random_post(&mut rng)).count();
        let rate = hits as f64 / trials as f64;

        assert!((0.017..0.023).contains(&rate), "random post rate {}", rate);
    }

    #[test]
    fn test_post_guaranteed_within_five_cycles() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut counter = PostCounter::new(5);
        let mut since_post = 0;

        for _ in 0..10_000 {
            since_post += 1;
            if counter.tick(&mut rng) {
                counter.mark_posted();
                assert!(since_post <= 5);
                since_post = 0;
            }
            assert!(counter.count() <= 5);
        }
    }

    /// Always yields the lowest value of any range.
    struct ZeroRng;

    impl rand::RngCore for ZeroRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            dst.fill(0);
        }
    }

    #[test]
    fn test_fifth_cycle_forces_post() {
        let mut rng = ZeroRng;
        let mut counter = PostCounter::new(5);

        for _ in 0..4 {
            assert!(!counter.tick(&mut rng));
        }
        assert!(counter.tick(&mut rng));
        assert_eq!(counter.count(), 5);
    }

    #[test]
    fn test_count_saturates_until_posted() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut counter = PostCounter::new(2);

        counter.tick(&mut rng);
        assert!(counter.tick(&mut rng));
        assert!(counter.tick(&mut rng));
        assert_eq!(counter.count(), 2);

        counter.mark_posted();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_random_status_covers_all() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = Vec::new();

        for _ in 0..200 {
            let status = random_status(&mut rng);
            assert!(STATUSES.contains(&status));
            if !seen.contains(&status) {
                seen.push(status);
            }
        }

        assert_eq!(seen.len(), 3);
    }

    const USER: serenity::UserId = serenity::UserId::new(42);
    const STEAM: SteamId = SteamId(76561198000000001);
    const GIF: &str = "https://media.tenor.com/dota.gif";

    /// Replies with a fixed text, or fails when `reply` is `None`.
    struct FixedGenerator {
        reply: Option<&'static str>,
    }

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn stream_reply(&self, _messages: Vec<ChatMessage>) -> Result<FragmentStream, LlmError> {
            match self.reply {
                Some(reply) => Ok(stream::iter(vec![Ok(reply.to_string())]).boxed()),
                None => Err(LlmError::Status {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    body: "backend down".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        playing: Mutex<Vec<(String, OnlineStatus)>>,
        said: Mutex<Vec<String>>,
        refuse_messages: bool,
    }

    #[async_trait]
    impl CycleTarget for RecordingChannel {
        fn channel_id(&self) -> serenity::ChannelId {
            serenity::ChannelId::new(100)
        }

        fn guild_name(&self) -> Option<String> {
            Some("Cucumbers".to_string())
        }

        fn set_playing(&self, game: &str, status: OnlineStatus) {
            self.playing.lock().unwrap().push((game.to_string(), status));
        }

        async fn say(&self, content: &str) -> Result<(), serenity::Error> {
            if self.refuse_messages {
                return Err(serenity::Error::Other("missing permissions"));
            }
            self.said.lock().unwrap().push(content.to_string());
            Ok(())
        }
    }

    fn library(games: serde_json::Value) -> Route {
        Route::new("/owned", 200, json!({"response": {"games": games}}).to_string())
    }

    fn dota_library() -> Route {
        library(json!([{"appid": 570, "name": "Dota 2", "playtime_forever": 125}]))
    }

    fn gif_search() -> Route {
        let body = json!({"results": [{"media_formats": {"gif": {"url": GIF}}}]});
        Route::new("/search", 200, body.to_string())
    }

    fn settings(post_guarantee: u32, linked: bool) -> Settings {
        let mut user_links = HashMap::new();
        if linked {
            user_links.insert(USER, STEAM);
        }

        Settings {
            discord_token: "token".to_string(),
            steam_api_key: "steam".to_string(),
            tenor_api_key: "tenor".to_string(),
            main_chat_id: serenity::ChannelId::new(100),
            llm: LlmConfig {
                api_url: "http://127.0.0.1:9".to_string(),
                api_key: String::new(),
                model: "test".to_string(),
            },
            presence: PresenceConfig {
                post_guarantee,
                ..Default::default()
            },
            steam: SteamConfig::default(),
            conversation: ConversationConfig::default(),
            user_links,
        }
    }

    async fn presence_game(
        settings: Settings,
        routes: Vec<Route>,
        reply: Option<&'static str>,
    ) -> (PresenceGame, Arc<ConversationStore>) {
        let base = serve(routes).await;
        let http = reqwest::Client::new();
        let steam_config = SteamConfig {
            owned_games_url: format!("{}/owned", base),
            store_url: format!("{}/store", base),
            ..Default::default()
        };
        let conversation = Arc::new(ConversationStore::new(settings.conversation.clone()));

        let game = PresenceGame::new(
            &settings,
            SteamClient::new(http.clone(), settings.steam_api_key.clone(), steam_config),
            TenorClient::new(http, settings.tenor_api_key.clone()).with_search_url(format!("{}/search", base)),
            Arc::new(FixedGenerator { reply }),
            conversation.clone(),
        )
        .with_seed(9);
        (game, conversation)
    }

    #[tokio::test]
    async fn test_cycle_without_links_is_noop() {
        let (mut game, conversation) = presence_game(settings(1, false), vec![], Some("hi")).await;
        let channel = RecordingChannel::default();

        let outcome = game.play_cycle(&channel).await.unwrap();
        assert_eq!(outcome, CycleOutcome::NoLinkedAccounts);
        assert_eq!(game.counter.count(), 0);
        assert!(channel.playing.lock().unwrap().is_empty());
        assert_eq!(conversation.current_game(), None);
    }

    #[tokio::test]
    async fn test_cycle_with_nothing_played_is_noop() {
        let routes = vec![library(json!([{"appid": 570, "name": "Dota 2", "playtime_forever": 0}]))];
        let (mut game, conversation) = presence_game(settings(1, true), routes, Some("hi")).await;
        let channel = RecordingChannel::default();

        let outcome = game.play_cycle(&channel).await.unwrap();
        assert_eq!(outcome, CycleOutcome::NothingPlayed { steam_id: STEAM });
        assert_eq!(game.counter.count(), 0);
        assert!(channel.playing.lock().unwrap().is_empty());
        assert!(channel.said.lock().unwrap().is_empty());
        assert_eq!(conversation.current_game(), None);
    }

    #[tokio::test]
    async fn test_steam_failure_skips_cycle() {
        let routes = vec![Route::new("/owned", 500, "down")];
        let (mut game, _) = presence_game(settings(1, true), routes, Some("hi")).await;
        let channel = RecordingChannel::default();

        let err = game.play_cycle(&channel).await.unwrap_err();
        assert!(matches!(err, CycleError::Steam(SteamClientError::Status { .. })));
        assert_eq!(game.counter.count(), 0);
        assert!(channel.playing.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_posted_cycle_resets_counter() {
        let routes = vec![dota_library(), gif_search()];
        let (mut game, conversation) = presence_game(settings(1, true), routes, Some("<@42> Dota time")).await;
        let channel = RecordingChannel::default();

        let outcome = game.play_cycle(&channel).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Posted { game: "Dota 2".to_string() });
        assert_eq!(game.counter.count(), 0);

        let playing = channel.playing.lock().unwrap();
        assert_eq!(playing.len(), 1);
        assert_eq!(playing[0].0, "Dota 2");
        assert!(STATUSES.contains(&playing[0].1));
        assert_eq!(*channel.said.lock().unwrap(), vec!["<@42> Dota time".to_string(), GIF.to_string()]);

        assert_eq!(conversation.current_game().as_deref(), Some("Dota 2"));
        let history = conversation.history(channel.channel_id());
        assert_eq!(history[0].role, Role::System);
        assert!(history.iter().any(|m| m.content.contains("Cucumbers")));
        assert_eq!(history.last(), Some(&ChatMessage::assistant("<@42> Dota time")));
    }

    #[tokio::test]
    async fn test_failed_compose_keeps_counter_saturated() {
        let routes = vec![dota_library(), gif_search()];
        let (mut game, conversation) = presence_game(settings(1, true), routes, None).await;
        let channel = RecordingChannel::default();

        for _ in 0..2 {
            let err = game.play_cycle(&channel).await.unwrap_err();
            assert!(matches!(err, CycleError::Llm(_)));
            assert_eq!(game.counter.count(), 1);
        }

        // Presence still moves on, only the announcement is missing
        assert_eq!(channel.playing.lock().unwrap().len(), 2);
        assert!(channel.said.lock().unwrap().is_empty());
        assert!(
            conversation
                .history(channel.channel_id())
                .iter()
                .all(|m| m.role != Role::Assistant)
        );
    }

    #[tokio::test]
    async fn test_empty_reply_is_not_posted() {
        let routes = vec![dota_library(), gif_search()];
        let (mut game, _) = presence_game(settings(1, true), routes, Some("  \n")).await;
        let channel = RecordingChannel::default();

        let err = game.play_cycle(&channel).await.unwrap_err();
        assert!(matches!(err, CycleError::EmptyMessage));
        assert_eq!(game.counter.count(), 1);
        assert!(channel.said.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_keeps_counter_saturated() {
        let routes = vec![dota_library(), gif_search()];
        let (mut game, conversation) = presence_game(settings(1, true), routes, Some("hello")).await;
        let channel = RecordingChannel {
            refuse_messages: true,
            ..Default::default()
        };

        let err = game.play_cycle(&channel).await.unwrap_err();
        assert!(matches!(err, CycleError::Discord(_)));
        assert_eq!(game.counter.count(), 1);
        assert!(
            conversation
                .history(channel.channel_id())
                .iter()
                .all(|m| m.role != Role::Assistant)
        );
    }

    #[tokio::test]
    async fn test_gif_failure_after_post_still_resets_counter() {
        let routes = vec![dota_library(), Route::new("/search", 500, "down")];
        let (mut game, _) = presence_game(settings(1, true), routes, Some("hello")).await;
        let channel = RecordingChannel::default();

        let err = game.play_cycle(&channel).await.unwrap_err();
        assert!(matches!(err, CycleError::Tenor(_)));
        assert_eq!(game.counter.count(), 0);
        assert_eq!(*channel.said.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_cycles_post_within_guarantee() {
        let routes = vec![dota_library(), gif_search()];
        let (mut game, _) = presence_game(settings(5, true), routes, Some("hello")).await;
        let channel = RecordingChannel::default();

        let mut posted_at = None;
        for cycle in 1..=5 {
            match game.play_cycle(&channel).await.unwrap() {
                CycleOutcome::PresenceOnly { game: name, cycles_without_post } => {
                    assert_eq!(name, "Dota 2");
                    assert_eq!(cycles_without_post, cycle);
                    assert!(channel.said.lock().unwrap().is_empty());
                }
                CycleOutcome::Posted { .. } => {
                    posted_at = Some(cycle);
                    break;
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert!(posted_at.is_some());
        assert_eq!(game.counter.count(), 0);
        assert_eq!(channel.playing.lock().unwrap().len() as u32, posted_at.unwrap());
    }
}
