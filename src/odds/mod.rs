//! BetExplorer odds extractor.
//!
//! The match page loads its odds table from
//! `{base}/match-odds/{match_id}/1/1x2/`, which answers with a JSON object
//! whose `odds` field is an HTML fragment. Every bookmaker row carries its
//! name in a `td.h-text-left.over-s-only` cell.
//!
//! Rate limiting shows up as 4xx/5xx; those are surfaced as errors so the
//! caller's retry policy can absorb them.

use crate::scrape::{self, FetchError};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const BOOKMAKER_CELL: [&str; 2] = ["h-text-left", "over-s-only"];

/// Anything that can list the bookmakers currently offering odds for a match.
#[async_trait]
pub trait OddsSource: Send + Sync {
    /// Lower-cased bookmaker names in page order.
    async fn live_bookmakers(&self, uri: &str) -> Result<Vec<String>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct OddsPayload {
    #[serde(default)]
    odds: String,
}

pub struct BetExplorerClient {
    client: reqwest::Client,
    base_url: String,
}

impl BetExplorerClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn odds_url(&self, uri: &str) -> Result<String, FetchError> {
        let id = match_id(uri).ok_or_else(|| FetchError::Layout(format!("no match id in {}", uri)))?;
        Ok(format!("{}/match-odds/{}/1/1x2/", self.base_url, id))
    }
}

/// Last path segment of a match uri.
pub fn match_id(uri: &str) -> Option<&str> {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
}

/// Bookmaker names from the `odds` HTML fragment.
pub fn bookmakers_from_fragment(html: &str) -> Vec<String> {
    scrape::cell_texts(html, &BOOKMAKER_CELL)
        .into_iter()
        .map(|name| name.to_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

#[async_trait]
impl OddsSource for BetExplorerClient {
    async fn live_bookmakers(&self, uri: &str) -> Result<Vec<String>, FetchError> {
        let url = self.odds_url(uri)?;
        let resp = self
            .client
            .get(&url)
            .header("accept", "application/json, text/javascript, */*; q=0.01")
            .header("accept-language", "en-US,en;q=0.9")
            .header("referer", uri)
            .header("sec-fetch-dest", "empty")
            .header("sec-fetch-mode", "cors")
            .header("sec-fetch-site", "same-origin")
            .header("x-requested-with", "XMLHttpRequest")
            .header("cookie", "my_timezone=%2B1")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }

        // Served as text/plain, so parse the body ourselves.
        let body = resp.text().await?;
        let payload: OddsPayload = serde_json::from_str(&body)?;
        let bookmakers = bookmakers_from_fragment(&payload.odds);
        debug!(uri = uri, count = bookmakers.len(), "fetched live bookmakers");
        Ok(bookmakers)
    }
}
