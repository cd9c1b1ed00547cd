use crate::provider::Operation;
use reqwest::StatusCode;

/// Settings that cannot produce a request. Resolved by the session
/// controller, which reports a fixed message instead of contacting the
/// endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no endpoint configured for `{0}`")]
    MissingEndpoint(Operation),

    #[error("endpoint for `{op}` is not a valid URL: {url}")]
    InvalidEndpoint {
        op: Operation,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("API key is set but cannot be sent as a bearer token")]
    InvalidCredential,
}

/// Failure of the HTTP exchange behind a unit stream. Ends the stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamTransportError {
    #[error("request to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("response stream interrupted: {0}")]
    Body(#[source] reqwest::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

impl StreamTransportError {
    pub(crate) fn from_send(url: &reqwest::Url, e: reqwest::Error) -> Self {
        let url = url.to_string();
        if e.is_timeout() {
            Self::Timeout { url, source: e }
        } else {
            Self::Connect { url, source: e }
        }
    }

    pub(crate) fn from_body(url: &reqwest::Url, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
                source: e,
            }
        } else {
            Self::Body(e)
        }
    }
}
