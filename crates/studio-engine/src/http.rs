use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::error::ProviderError;

pub(crate) fn build_client(timeout: Duration) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .user_agent(concat!("product-studio/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Drops the request URL from the error so query strings never reach reports.
pub(crate) fn transport_error(provider: &str, source: reqwest::Error) -> ProviderError {
    ProviderError::Transport {
        provider: provider.to_string(),
        source: source.without_url(),
    }
}

pub(crate) fn classify_status(provider: &str, status: u16, body: &str) -> ProviderError {
    let provider = provider.to_string();
    let body = truncate_text(body.trim(), 512);
    match status {
        401 | 403 => ProviderError::Unauthorized { provider, status },
        429 => ProviderError::RateLimited {
            provider,
            status,
            body,
        },
        _ => ProviderError::Status {
            provider,
            status,
            body,
        },
    }
}

pub(crate) fn response_json_or_error(
    provider: &str,
    response: HttpResponse,
) -> Result<Value, ProviderError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| transport_error(provider, err))?;
    if !status.is_success() {
        return Err(classify_status(provider, status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|err| {
        ProviderError::invalid_payload(provider, format!("invalid JSON payload: {err}"))
    })
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}
