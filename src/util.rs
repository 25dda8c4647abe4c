use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

pub fn mask_secret(s: &str, left: usize, right: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= left + right { return "*".repeat(chars.len()); }
    let head: String = chars[..left].iter().collect();
    let tail: String = chars[chars.len() - right..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - left - right), tail)
}

pub fn truncate(s: &str) -> String {
    const MAX: usize = 512;
    if s.len() <= MAX {
        return s.to_string();
    }
    let mut end = MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Shared client for upstream, image and webhook calls. Every request is
/// bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("earthquake-notifier/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build http client")
}
