//! Match identity.
//!
//! A tracked match is identified by the page it lives on plus the set of
//! bookmakers being watched for it. Both are folded into a URL-safe base64
//! string which is the only key used in the coordination store:
//!
//!   hash = b64url("{uri}|{sorted bookmakers, concatenated}")
//!
//! Bookmakers are concatenated without a separator so hashes stay identical
//! to the ones already written by existing deployments.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use std::collections::BTreeSet;
use thiserror::Error;

/// Bookmakers watched when a match descriptor does not name any.
pub const DEFAULT_BOOKMAKERS: [&str; 12] = [
    "10bet",
    "1xbet",
    "bet-at-home",
    "betvictor",
    "betway",
    "bwin",
    "comeon",
    "pinnacle",
    "unibet",
    "william hill",
    "youwin",
    "betfair exchange",
];

#[derive(Error, Debug, PartialEq)]
pub enum FingerprintError {
    #[error("match uri is empty")]
    EmptyUri,
    #[error("bookmaker watch-list is empty")]
    NoBookmakers,
    #[error("hash is not valid url-safe base64: {0}")]
    Encoding(String),
    #[error("decoded hash has no uri separator")]
    Malformed,
}

/// Identity of a tracked match. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    uri: String,
    bookmakers: BTreeSet<String>,
    hash: String,
}

impl Fingerprint {
    /// Build a fingerprint. Bookmaker names are expected to be normalised
    /// (lower-case) by the caller; no default watch-list is applied here.
    pub fn new<I, S>(uri: &str, bookmakers: I) -> Result<Self, FingerprintError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if uri.is_empty() {
            return Err(FingerprintError::EmptyUri);
        }
        let bookmakers: BTreeSet<String> = bookmakers.into_iter().map(Into::into).collect();
        if bookmakers.is_empty() {
            return Err(FingerprintError::NoBookmakers);
        }

        // BTreeSet iteration is already sorted.
        let joined: String = bookmakers.iter().map(String::as_str).collect();
        let hash = URL_SAFE.encode(format!("{}|{}", uri, joined));

        Ok(Self {
            uri: uri.to_string(),
            bookmakers,
            hash,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn bookmakers(&self) -> &BTreeSet<String> {
        &self.bookmakers
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Recover the match uri from a hash produced by [`Fingerprint::new`].
pub fn uri_from_hash(hash: &str) -> Result<String, FingerprintError> {
    let bytes = URL_SAFE
        .decode(hash)
        .map_err(|e| FingerprintError::Encoding(e.to_string()))?;
    let row = String::from_utf8(bytes).map_err(|e| FingerprintError::Encoding(e.to_string()))?;
    match row.split_once('|') {
        Some((uri, _)) if !uri.is_empty() => Ok(uri.to_string()),
        _ => Err(FingerprintError::Malformed),
    }
}

/// Human-readable match name used in alerts and logs.
///
/// `https://www.betexplorer.com/football/england/premier-league/arsenal-chelsea/AbC123/`
/// becomes `football => england => premier-league => arsenal-chelsea`.
pub fn match_name(uri: &str) -> String {
    let trimmed = uri.trim_end_matches('/');
    let segments: Vec<&str> = trimmed.split('/').skip(3).collect();
    match segments.split_last() {
        Some((_, rest)) if !rest.is_empty() => rest.join(" => "),
        _ => uri.to_string(),
    }
}
