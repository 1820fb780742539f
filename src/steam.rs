//! Steam Web API client for owned games and store descriptions.

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::config::SteamConfig;

pub const OWNED_GAMES_URL: &str = "https://api.steampowered.com/IPlayerService/GetOwnedGames/v1/";
pub const STORE_URL: &str = "https://store.steampowered.com/api/appdetails";

/// SteamID64 of a linked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SteamId(pub u64);

impl std::fmt::Display for SteamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OwnedGame {
    pub appid: u64,
    #[serde(default)]
    pub name: String,
    /// Total playtime in minutes
    #[serde(default)]
    pub playtime_forever: u64,
}

#[derive(Error, Debug)]
pub enum SteamClientError {
    #[error("Steam API error {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct OwnedGamesEnvelope {
    #[serde(default)]
    response: OwnedGamesResponse,
}

#[derive(Debug, Default, Deserialize)]
struct OwnedGamesResponse {
    #[serde(default)]
    games: Vec<OwnedGame>,
}

#[derive(Debug, Deserialize)]
struct AppDetails {
    #[serde(default)]
    success: bool,
    data: Option<AppData>,
}

#[derive(Debug, Deserialize)]
struct AppData {
    short_description: Option<String>,
}

#[derive(Clone)]
pub struct SteamClient {
    http: reqwest::Client,
    api_key: String,
    config: SteamConfig,
}

impl SteamClient {
    pub fn new(http: reqwest::Client, api_key: String, config: SteamConfig) -> Self {
        Self {
            http,
            api_key,
            config,
        }
    }

    pub async fn fetch_owned_games(
        &self,
        steam_id: SteamId,
    ) -> Result<Vec<OwnedGame>, SteamClientError> {
        let steam_id = steam_id.to_string();
        let response = self
            .http
            .get(&self.config.owned_games_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("steamid", steam_id.as_str()),
                ("include_appinfo", "1"),
                ("include_played_free_games", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SteamClientError::Status { status, body });
        }

        let envelope: OwnedGamesEnvelope = response.json().await?;
        Ok(envelope.response.games)
    }

    /// Picks a random game the account has actually played.
    pub async fn random_game_from_user<R: Rng + ?Sized>(
        &self,
        steam_id: SteamId,
        rng: &mut R,
    ) -> Result<Option<OwnedGame>, SteamClientError> {
        let games = self.fetch_owned_games(steam_id).await?;
        debug!("Steam account {} owns {} games", steam_id, games.len());

        Ok(pick_played_game(&games, rng).cloned())
    }

    /// Short store description in the configured locale. Failures are logged
    /// and turned into `None`.
    pub async fn game_description(&self, appid: u64) -> Option<String> {
        let appid_param = appid.to_string();
        let response = self
            .http
            .get(&self.config.store_url)
            .query(&[
                ("appids", appid_param.as_str()),
                ("l", self.config.locale.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                debug!("Store request for app {} failed: {}", appid, e);
                return None;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!("Store returned {} for app {}", response.status(), appid);
            return None;
        }

        match response.json::<serde_json::Value>().await {
            Ok(body) => description_from_store(&body, appid),
            Err(e) => {
                debug!("Store body for app {} is not JSON: {}", appid, e);
                None
            }
        }
    }
}

/// Uniform choice among named games with nonzero playtime. A game without a
/// name cannot be shown as an activity or searched for.
pub fn pick_played_game<'a, R: Rng + ?Sized>(
    games: &'a [OwnedGame],
    rng: &mut R,
) -> Option<&'a OwnedGame> {
    let played: Vec<&OwnedGame> = games
        .iter()
        .filter(|g| g.playtime_forever > 0 && !g.name.trim().is_empty())
        .collect();
    played.choose(rng).copied()
}

/// Extracts `<appid>.data.short_description` from an appdetails body.
fn description_from_store(body: &serde_json::Value, appid: u64) -> Option<String> {
    let details: HashMap<String, AppDetails> = serde_json::from_value(body.clone()).ok()?;
    let app = details.get(&appid.to_string())?;

    if !app.success {
        return None;
    }

    app.data
        .as_ref()
        .and_then(|data| data.short_description.clone())
        .filter(|desc| !desc.trim().is_empty())
}
