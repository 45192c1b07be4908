use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use market_core::{
    display_code, format_code, Bar, FetchError, Fetcher, Fundamental, Quote, SymbolStyle,
};
use regex::Regex;
use reqwest::header;
use reqwest::Client;

use super::{field_f64, status_error, today, QuoteCache};
use crate::headers::random_user_agent;
use crate::pacer::Pacer;
use crate::retry::{with_retry, RetryPolicy};

const LINE_URL: &str = "http://d.10jqka.com.cn/v6/line";
const BASIC_URL: &str = "http://basic.10jqka.com.cn";
const MIN_DATA_FIELDS: usize = 8;

/// Secondary snapshot source (priority 0.5). The line endpoint answers with a
/// JSONP wrapper whose `data` field is one comma-separated daily record;
/// the stock name lives in the `<title>` of a second, HTML endpoint.
pub struct TonghuashunFetcher {
    client: Client,
    pacer: Pacer,
    retry: RetryPolicy,
    cache: QuoteCache,
}

fn jsonp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\{.*\})\)").expect("valid jsonp regex"))
}

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<title>([^(<]+)").expect("valid title regex"))
}

/// The day record behind the JSONP wrapper:
/// `YYYYMMDD,open,close,high,low,volume-in-lots,amount-in-wan,pct_chg`.
struct DayRecord {
    date: chrono::NaiveDate,
    open: f64,
    close: f64,
    high: f64,
    low: f64,
    volume: i64,
    amount: f64,
    pct_chg: f64,
}

impl TonghuashunFetcher {
    pub fn new() -> Self {
        Self::with_pacing(Duration::from_millis(200), Duration::from_millis(600))
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
                Duration::from_secs(15),
            ),
            cache: QuoteCache::new(Duration::from_secs(45)),
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.pacer.wait().await;
        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, random_user_agent())
            .header(header::REFERER, "http://10jqka.com.cn/")
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.8,en-US;q=0.5,en;q=0.3")
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

    fn parse_day_record(&self, content: &str, code: &str) -> Result<DayRecord, FetchError> {
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed == "null" || trimmed.len() < 10 {
            return Err(FetchError::Empty(format!("no tonghuashun data for {code}")));
        }
        let json_text = jsonp_regex()
            .captures(trimmed)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| {
                FetchError::Parse(format!("tonghuashun response is not jsonp: {code}"))
            })?;
        let value: serde_json::Value = serde_json::from_str(json_text)
            .map_err(|e| FetchError::Parse(format!("tonghuashun jsonp body: {e}")))?;
        let data = value
            .get("data")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if data.is_empty() {
            return Err(FetchError::Empty(format!(
                "tonghuashun data field empty for {code}"
            )));
        }
        let fields: Vec<&str> = data.split(',').collect();
        if fields.len() < MIN_DATA_FIELDS {
            return Err(FetchError::Parse(format!(
                "tonghuashun record has {} fields, need {MIN_DATA_FIELDS}",
                fields.len()
            )));
        }

        let date = chrono::NaiveDate::parse_from_str(fields[0], "%Y%m%d").unwrap_or_else(|_| today());
        let close = field_f64(&fields, 2);
        Ok(DayRecord {
            date,
            open: field_f64(&fields, 1),
            close,
            high: {
                let h = field_f64(&fields, 3);
                if h > 0.0 { h } else { close }
            },
            low: {
                let l = field_f64(&fields, 4);
                if l > 0.0 { l } else { close }
            },
            volume: (field_f64(&fields, 5) * 100.0) as i64,
            amount: field_f64(&fields, 6) * 10_000.0,
            pct_chg: field_f64(&fields, 7),
        })
    }

    /// Stock name from the HTML `<title>` of the basic-info page.
    async fn stock_name(&self, code: &str) -> Option<String> {
        let bare = display_code(code);
        let url = format!("{BASIC_URL}/{bare}/");
        match self.fetch_text(&url).await {
            Ok(html) => title_regex()
                .captures(&html)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|name| !name.is_empty()),
            Err(err) => {
                tracing::debug!(code, %err, "tonghuashun name lookup failed");
                None
            }
        }
    }

    async fn fetch_record(&self, code: &str) -> Result<DayRecord, FetchError> {
        let ths_code = format_code(code, SymbolStyle::HsPrefix);
        let url = format!("{LINE_URL}/{ths_code}/01/last.js");
        let body = with_retry(&self.retry, self.name(), || self.fetch_text(&url)).await?;
        self.parse_day_record(&body, code)
    }

    /// The day record carries no previous close, so it is backed out of the
    /// change: `pre_close = close / (1 + pct_chg / 100)`, with change amount
    /// and amplitude derived from it.
    fn quote_from_record(code: &str, name: String, record: &DayRecord) -> Quote {
        let price = record.close;
        let pre_close = if record.pct_chg != 0.0 {
            let base = 1.0 + record.pct_chg / 100.0;
            if base > 0.0 { price / base } else { 0.0 }
        } else {
            price
        };
        let change_amount = if pre_close > 0.0 { price - pre_close } else { 0.0 };
        let amplitude = if pre_close > 0.0 {
            (record.high - record.low) / pre_close * 100.0
        } else {
            0.0
        };
        Quote {
            code: code.to_string(),
            name,
            price,
            change_pct: record.pct_chg,
            change_amount,
            volume: record.volume,
            amount: record.amount,
            turnover_rate: 0.0,
            amplitude,
            high: record.high,
            low: record.low,
            open_price: record.open,
            pre_close,
            pe_ratio: 0.0,
            pb_ratio: 0.0,
            total_mv: 0.0,
            circulation_mv: 0.0,
        }
    }
}

impl Default for TonghuashunFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for TonghuashunFetcher {
    fn name(&self) -> &'static str {
        "tonghuashun"
    }

    fn priority(&self) -> f64 {
        0.5
    }

    async fn daily_bars(&self, code: &str, _days: usize) -> Result<Vec<Bar>, FetchError> {
        let record = self.fetch_record(code).await?;
        Ok(vec![Bar {
            code: code.to_string(),
            date: record.date,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
            amount: record.amount,
            pct_chg: record.pct_chg,
        }])
    }

    async fn realtime_quote(&self, code: &str) -> Result<Option<Quote>, FetchError> {
        if let Some(cached) = self.cache.get(code).await {
            return Ok(Some(cached));
        }
        let record = match self.fetch_record(code).await {
            Ok(record) => record,
            Err(FetchError::Empty(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let name = self.stock_name(code).await.unwrap_or_default();
        let quote = Self::quote_from_record(code, name, &record);
        self.cache.put(code, quote.clone()).await;
        Ok(Some(quote))
    }

    async fn fundamental_data(&self, _code: &str) -> Result<Fundamental, FetchError> {
        // The line endpoint carries no valuation data.
        Ok(Fundamental::default())
    }
}
