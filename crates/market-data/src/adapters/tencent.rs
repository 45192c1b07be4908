use std::time::Duration;

use async_trait::async_trait;
use market_core::{format_code, Bar, FetchError, Fetcher, Fundamental, Quote, SymbolStyle};
use reqwest::header;
use reqwest::Client;

use crate::headers::random_user_agent;
use crate::pacer::Pacer;
use crate::retry::{with_retry, RetryPolicy};

use super::{field_f64, status_error, today, QuoteCache};

const QUOTE_URL: &str = "http://qt.gtimg.cn/q=";
const MIN_QUOTE_FIELDS: usize = 20;

/// Fast snapshot source (priority 0). Tilde-delimited positional payload with
/// roughly fifty fields per symbol; volume arrives in lots and amount in
/// wan-yuan, both converted here. History is a single-session frame built
/// from the snapshot, which is all this upstream serves.
pub struct TencentFetcher {
    client: Client,
    pacer: Pacer,
    retry: RetryPolicy,
    cache: QuoteCache,
}

impl TencentFetcher {
    pub fn new() -> Self {
        Self::with_pacing(Duration::from_millis(100), Duration::from_millis(500))
    }

    pub fn with_pacing(sleep_min: Duration, sleep_max: Duration) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            pacer: Pacer::interval(sleep_min, sleep_max),
            retry: RetryPolicy::new(
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(10),
            ),
            cache: QuoteCache::new(Duration::from_secs(30)),
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.pacer.wait().await;
        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        response
            .text_with_charset("gbk")
            .await
            .map_err(FetchError::from_reqwest)
    }

    /// Parse `v_sh600519="1~贵州茅台~600519~…";`. Positions used: 1 name,
    /// 3 last, 4 pre_close, 5 open, 6 volume-in-lots, 18 high, 19 low,
    /// 21 amount-in-wan, 42 change, 43 pct, 49 turnover, 50 pe.
    fn parse_quote(&self, content: &str, code: &str) -> Result<Option<Quote>, FetchError> {
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed.contains("pv_none_match") {
            return Ok(None);
        }
        let payload = trimmed
            .split_once("=\"")
            .map(|(_, rest)| rest.trim_end_matches(';').trim_end_matches('"'))
            .ok_or_else(|| {
                FetchError::Parse(format!("tencent payload missing quote wrapper: {code}"))
            })?;
        let fields: Vec<&str> = payload.split('~').collect();
        if fields.len() < MIN_QUOTE_FIELDS {
            return Err(FetchError::Parse(format!(
                "tencent payload has {} fields, need {MIN_QUOTE_FIELDS}",
                fields.len()
            )));
        }

        let price = field_f64(&fields, 3);
        let pre_close = field_f64(&fields, 4);
        let high = {
            let h = field_f64(&fields, 18);
            if h > 0.0 { h } else { price }
        };
        let low = {
            let l = field_f64(&fields, 19);
            if l > 0.0 { l } else { price }
        };
        let amplitude = if pre_close > 0.0 {
            (high - low) / pre_close * 100.0
        } else {
            0.0
        };

        Ok(Some(Quote {
            code: code.to_string(),
            name: fields[1].to_string(),
            price,
            change_pct: field_f64(&fields, 43),
            change_amount: field_f64(&fields, 42),
            volume: (field_f64(&fields, 6) * 100.0) as i64,
            amount: field_f64(&fields, 21) * 10_000.0,
            turnover_rate: field_f64(&fields, 49),
            amplitude,
            high,
            low,
            open_price: field_f64(&fields, 5),
            pre_close,
            pe_ratio: field_f64(&fields, 50),
            pb_ratio: 0.0,
            total_mv: 0.0,
            circulation_mv: 0.0,
        }))
    }

    async fn fetch_quote(&self, code: &str) -> Result<Option<Quote>, FetchError> {
        if let Some(cached) = self.cache.get(code).await {
            return Ok(Some(cached));
        }
        let tencent_code = format_code(code, SymbolStyle::LowerPrefix);
        let url = format!("{QUOTE_URL}{tencent_code}");
        let body = with_retry(&self.retry, self.name(), || self.fetch_text(&url)).await?;
        let quote = self.parse_quote(&body, code)?;
        if let Some(q) = &quote {
            self.cache.put(code, q.clone()).await;
        }
        Ok(quote)
    }
}

impl Default for TencentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for TencentFetcher {
    fn name(&self) -> &'static str {
        "tencent"
    }

    fn priority(&self) -> f64 {
        0.0
    }

    async fn daily_bars(&self, code: &str, _days: usize) -> Result<Vec<Bar>, FetchError> {
        let quote = self
            .fetch_quote(code)
            .await?
            .ok_or_else(|| FetchError::Empty(format!("no tencent snapshot for {code}")))?;
        if quote.price <= 0.0 {
            return Err(FetchError::Empty(format!(
                "tencent snapshot has no price for {code}"
            )));
        }
        Ok(vec![Bar {
            code: code.to_string(),
            date: today(),
            open: quote.open_price,
            high: quote.high,
            low: quote.low,
            close: quote.price,
            volume: quote.volume,
            amount: quote.amount,
            pct_chg: quote.change_pct,
        }])
    }

    async fn realtime_quote(&self, code: &str) -> Result<Option<Quote>, FetchError> {
        self.fetch_quote(code).await
    }

    async fn fundamental_data(&self, code: &str) -> Result<Fundamental, FetchError> {
        let quote = self.fetch_quote(code).await?.unwrap_or_default();
        Ok(Fundamental {
            pe_ratio: quote.pe_ratio,
            pb_ratio: quote.pb_ratio,
            total_mv: quote.total_mv,
            circ_mv: quote.circulation_mv,
            roe: 0.0,
            revenue_growth: 0.0,
        })
    }
}
