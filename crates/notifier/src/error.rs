use std::time::Duration;

use thiserror::Error;

/// Failure reported by a delivery provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} rejected the request ({status}): {body}")]
    Rejected {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} did not answer within {}ms", timeout.as_millis())]
    Timeout {
        provider: String,
        timeout: Duration,
    },

    #[error("{0} is not configured: {1}")]
    NotConfigured(&'static str, String),

    #[error("{0} cannot deliver this message: {1}")]
    Unsupported(&'static str, String),

    #[error("Invalid response from {0}: {1}")]
    InvalidResponse(&'static str, String),

    /// Error surfaced by an AWS SDK client, rendered with its source chain.
    #[error("{0} request failed: {1}")]
    Sdk(&'static str, String),
}

impl ProviderError {
    pub fn timeout(provider: impl Into<String>, timeout: Duration) -> Self {
        ProviderError::Timeout {
            provider: provider.into(),
            timeout,
        }
    }
}

/// Turn a non-2xx response into `ProviderError::Rejected`, keeping the body for diagnostics.
pub(crate) async fn reject(provider: &'static str, response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(provider, status, body = %body, "Provider rejected request");
    ProviderError::Rejected {
        provider,
        status,
        body,
    }
}
