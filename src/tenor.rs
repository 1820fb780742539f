//! Tenor GIF search.

use serde::Deserialize;
use thiserror::Error;

pub const SEARCH_URL: &str = "https://tenor.googleapis.com/v2/search";

#[derive(Error, Debug)]
pub enum TenorError {
    #[error("Tenor API error {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    media_formats: MediaFormats,
}

#[derive(Debug, Default, Deserialize)]
struct MediaFormats {
    gif: Option<MediaObject>,
}

#[derive(Debug, Deserialize)]
struct MediaObject {
    url: String,
}

#[derive(Clone)]
pub struct TenorClient {
    http: reqwest::Client,
    api_key: String,
    search_url: String,
}

impl TenorClient {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self {
            http,
            api_key,
            search_url: SEARCH_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_search_url(mut self, search_url: impl Into<String>) -> Self {
        self.search_url = search_url.into();
        self
    }

    pub async fn first_gif_url(&self, query: &str) -> Result<Option<String>, TenorError> {
        let response = self
            .http
            .get(&self.search_url)
            .query(&[
                ("q", query),
                ("key", self.api_key.as_str()),
                ("client_key", env!("CARGO_PKG_NAME")),
                ("limit", "1"),
                ("media_filter", "gif"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TenorError::Status { status, body });
        }

        let search: SearchResponse = response.json().await?;
        Ok(first_url(search))
    }
}

fn first_url(search: SearchResponse) -> Option<String> {
    let result = search.results.into_iter().next()?;
    result.media_formats.gif.map(|gif| gif.url).or(result.url)
}
