// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::header::{COOKIE, HeaderMap, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::PageConfig;

/// Create a configured asynchronous HTTP client.
///
/// The session cookie is read from the environment variable named by
/// `page.cookie_env`; without it the dashboard only serves a login page.
pub fn create_async_client(config: &PageConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    match std::env::var(&config.cookie_env) {
        Ok(cookie) if !cookie.trim().is_empty() => {
            let value = HeaderValue::from_str(cookie.trim()).map_err(|e| {
                AppError::config(format!("{} is not a valid cookie: {e}", config.cookie_env))
            })?;
            headers.insert(COOKIE, value);
        }
        _ => log::warn!(
            "{} is not set; requests will be unauthenticated",
            config.cookie_env
        ),
    }

    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .default_headers(headers)
        .build()?;
    Ok(client)
}

/// Fetch a page asynchronously and return its markup.
pub async fn fetch_page_async(client: &reqwest::Client, url: &str) -> Result<String> {
    let text = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(text)
}
