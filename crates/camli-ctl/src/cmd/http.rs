//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result};
use serde::Deserialize;

use camli_core::config::StoreConfig;

/// GET a JSON document, with the configured credentials if any.
pub async fn get_json<T: for<'de> Deserialize<'de>>(store: &StoreConfig, url: &str) -> Result<T> {
    let mut request = reqwest::Client::new().get(url);
    if !store.username.is_empty() {
        request = request.basic_auth(&store.username, Some(&store.password));
    }
    request
        .send()
        .await
        .with_context(|| format!("failed to connect to {url}, is the blob server running?"))?
        .error_for_status()
        .with_context(|| format!("{url} returned an error"))?
        .json::<T>()
        .await
        .context("failed to parse response")
}
