use std::collections::HashMap;
use std::time::Duration;

use market_core::{FetchError, Quote};
use tokio::sync::Mutex;
use tokio::time::Instant;

mod baostock;
mod eastmoney;
mod sina;
mod tencent;
mod tonghuashun;
mod tushare;
mod yahoo;

pub use baostock::BaostockFetcher;
pub use eastmoney::EastmoneyFetcher;
pub use sina::SinaFetcher;
pub use tencent::TencentFetcher;
pub use tonghuashun::TonghuashunFetcher;
pub use tushare::TushareFetcher;
pub use yahoo::YahooFetcher;

/// Per-adapter realtime quote cache: instance state, not module state, so two
/// adapter instances never share entries.
pub(crate) struct QuoteCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Quote, Instant)>>,
}

impl QuoteCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn get(&self, code: &str) -> Option<Quote> {
        let entries = self.entries.lock().await;
        let (quote, stored_at) = entries.get(code)?;
        if stored_at.elapsed() < self.ttl {
            tracing::debug!(code, "realtime cache hit");
            Some(quote.clone())
        } else {
            None
        }
    }

    pub(crate) async fn put(&self, code: &str, quote: Quote) {
        let mut entries = self.entries.lock().await;
        entries.insert(code.to_string(), (quote, Instant::now()));
    }
}

/// Positional field access for delimiter-separated payloads. Missing or
/// non-numeric positions read as zero.
pub(crate) fn field_f64(fields: &[&str], idx: usize) -> f64 {
    fields
        .get(idx)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

pub(crate) fn field_i64(fields: &[&str], idx: usize) -> i64 {
    field_f64(fields, idx) as i64
}

/// Map a non-success HTTP status to the error taxonomy: explicit throttle
/// statuses become RateLimit, everything else transport.
pub(crate) fn status_error(status: reqwest::StatusCode) -> FetchError {
    if status.as_u16() == 403 || status.as_u16() == 429 {
        FetchError::RateLimit(format!("HTTP {status}"))
    } else {
        FetchError::Transport(format!("HTTP {status}"))
    }
}

pub(crate) fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}
