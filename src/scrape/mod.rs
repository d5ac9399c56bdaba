//! Shared HTTP/HTML plumbing for the note source and the odds extractor.
//!
//! Pages are small and their markup is stable, so extraction is done with a
//! handful of regexes instead of a DOM.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/103.0.5060.66 Safari/537.36";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected page layout: {0}")]
    Layout(String),
}

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static RE_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").unwrap());
static RE_TD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<td\b([^>]*)>(.*?)</td>"#).unwrap());
static RE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)class\s*=\s*["']([^"']*)["']"#).unwrap());

/// Plain text of an HTML fragment: tags stripped, common entities decoded,
/// whitespace collapsed.
pub fn inner_text(fragment: &str) -> String {
    let stripped = RE_TAG.replace_all(fragment, "");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of every `<a>` element in `html`.
pub fn anchor_texts(html: &str) -> Vec<String> {
    RE_ANCHOR
        .captures_iter(html)
        .map(|c| inner_text(&c[1]))
        .collect()
}

/// Text of every `<td>` carrying all of `classes`, in document order.
pub fn cell_texts(html: &str, classes: &[&str]) -> Vec<String> {
    RE_TD
        .captures_iter(html)
        .filter(|c| {
            let attrs = &c[1];
            RE_CLASS.captures(attrs).map_or(false, |cls| {
                let present: Vec<&str> = cls[1].split_whitespace().collect();
                classes.iter().all(|wanted| present.contains(wanted))
            })
        })
        .map(|c| inner_text(&c[2]))
        .collect()
}

/// Async client shared by the odds extractor, optionally through a proxy
/// (`socks5h://` for Tor).
pub fn build_client(timeout: Duration, proxy: Option<&str>) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT);
    if let Some(url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(url)?);
    }
    Ok(builder.build()?)
}
