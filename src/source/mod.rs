//! Match source: a published note listing the matches to watch.
//!
//! Every link in the note body is one match descriptor:
//!
//!   {uri}[,{bookmaker}]*
//!
//! A descriptor without bookmakers gets the default watch-list.

use crate::fingerprint::{Fingerprint, FingerprintError};
use crate::scrape::{self, FetchError, USER_AGENT};
use std::time::Duration;

/// Marker class of the rendered note body on the published page.
const NOTE_BODY_CLASS: &str = "note-detail-markdown";

/// Synchronous source of raw match descriptors.
pub trait MatchSource {
    fn fetch_descriptors(&self) -> Result<Vec<String>, FetchError>;
}

/// Published Simplenote page.
pub struct NoteSource {
    client: reqwest::blocking::Client,
    url: String,
}

impl NoteSource {
    pub fn new(url: String, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, url })
    }
}

impl MatchSource for NoteSource {
    fn fetch_descriptors(&self) -> Result<Vec<String>, FetchError> {
        let resp = self.client.get(&self.url).send()?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status: resp.status().as_u16(),
            });
        }
        let html = resp.text()?;
        descriptors_from_note(&html)
    }
}

/// Link texts inside the note body.
pub fn descriptors_from_note(html: &str) -> Result<Vec<String>, FetchError> {
    let start = html
        .find(NOTE_BODY_CLASS)
        .ok_or_else(|| FetchError::Layout("note body not found".into()))?;
    Ok(scrape::anchor_texts(&html[start..])
        .into_iter()
        .filter(|text| !text.is_empty())
        .collect())
}

/// Parse one descriptor line. Returns `None` for blank lines.
pub fn parse_descriptor(
    line: &str,
    default_bookmakers: &[String],
) -> Option<Result<Fingerprint, FingerprintError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.split(',');
    let uri = parts.next().unwrap_or_default().trim();

    let mut bookmakers: Vec<String> = parts
        .map(|b| b.trim().to_lowercase())
        .filter(|b| !b.is_empty())
        .collect();
    if bookmakers.is_empty() {
        bookmakers = default_bookmakers
            .iter()
            .map(|b| b.trim().to_lowercase())
            .filter(|b| !b.is_empty())
            .collect();
    }

    Some(Fingerprint::new(uri, bookmakers))
}
