use thiserror::Error;

/// Failure taxonomy for the provider layer.
///
/// Adapters classify and surface; they never swallow. Only `Transport` is
/// eligible for retry. `RateLimit` puts the adapter in cool-down at the
/// manager, `NotConfigured` disables it for the session, and everything else
/// triggers failover to the next source.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by upstream: {0}")]
    RateLimit(String),

    #[error("unexpected response shape: {0}")]
    Parse(String),

    #[error("empty response: {0}")]
    Empty(String),

    #[error("source not configured: {0}")]
    NotConfigured(String),

    #[error("all sources exhausted for {0}")]
    AllSourcesExhausted(String),

    #[error("cancelled by caller")]
    Cancelled,
}

/// Keywords upstreams use when throttling. Matched case-insensitively against
/// error text so a ban disguised as a generic failure still lands in
/// `RateLimit` instead of the retry path.
const RATE_LIMIT_KEYWORDS: [&str; 5] = ["banned", "blocked", "rate", "limit", "429"];

impl FetchError {
    /// Classify a reqwest failure. Explicit 403/429 statuses are throttle
    /// signals; connect/timeout/body failures are transport.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.as_u16() == 403 || status.as_u16() == 429 {
                return FetchError::RateLimit(err.to_string());
            }
        }
        FetchError::Transport(err.to_string())
    }

    /// Promote upstream error text to `RateLimit` when it smells like a ban,
    /// otherwise keep the given fallback kind.
    pub fn classify_message(message: String, fallback: fn(String) -> FetchError) -> Self {
        let lowered = message.to_lowercase();
        if RATE_LIMIT_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            FetchError::RateLimit(message)
        } else {
            fallback(message)
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FetchError::RateLimit(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }
}
