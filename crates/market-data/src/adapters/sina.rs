use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use market_core::{
    fill_pct_chg, format_code, Bar, FetchError, Fetcher, Fundamental, Quote, SymbolStyle,
};
use regex::Regex;
use reqwest::header;
use reqwest::Client;
use serde::Deserialize;

use crate::headers::random_user_agent;
use crate::pacer::Pacer;
use crate::retry::{with_retry, RetryPolicy};

use super::{field_f64, field_i64, status_error, QuoteCache};

const QUOTE_URL: &str = "http://hq.sinajs.cn/list=";
const KLINE_URL: &str =
    "http://money.finance.sina.com.cn/quotes_service/api/json_v2.php/CN_MarketData.getKLineData";
/// The list endpoint accepts up to 800 symbols per request.
const BATCH_SIZE: usize = 800;
const MIN_QUOTE_FIELDS: usize = 32;

/// Ultra-fast snapshot source (priority 0.1).
///
/// One comma-delimited text line per symbol, so bulk quote fan-in is a single
/// GET per 800 codes. History comes from the getKLineData JSON endpoint,
/// which carries no amount column; pct_chg is recomputed from closes.
pub struct SinaFetcher {
    client: Client,
    pacer: Pacer,
    retry: RetryPolicy,
    cache: QuoteCache,
}

fn payload_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"="([^"]*)""#).expect("valid payload regex"))
}

impl SinaFetcher {
    pub fn new() -> Self {
        Self::with_pacing(Duration::from_millis(50), Duration::from_millis(200))
    }

    pub fn with_pacing(sleep_min: Duration, sleep_max: Duration) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            pacer: Pacer::interval(sleep_min, sleep_max),
            retry: RetryPolicy::new(
                Duration::from_millis(300),
                Duration::from_millis(500),
                Duration::from_secs(5),
            ),
            cache: QuoteCache::new(Duration::from_secs(30)),
        }
    }

    /// One paced GET with rotated browser headers. The quote host rejects
    /// requests without a finance.sina.com.cn referer.
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.pacer.wait().await;
        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, random_user_agent())
            .header(header::REFERER, "https://finance.sina.com.cn/")
            .header(header::ACCEPT, "*/*")
            .header(header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        // Quote payloads are GBK-encoded; names would be mojibake otherwise.
        response
            .text_with_charset("gbk")
            .await
            .map_err(FetchError::from_reqwest)
    }

    /// Parse one `var hq_str_<code>="…";` line. Empty payload means the
    /// upstream knows no such symbol.
    fn parse_quote_line(&self, line: &str, code: &str) -> Option<Quote> {
        let payload = payload_regex()
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())?;
        if payload.is_empty() {
            return None;
        }
        let fields: Vec<&str> = payload.split(',').collect();
        if fields.len() < MIN_QUOTE_FIELDS {
            tracing::warn!(
                code,
                got = fields.len(),
                want = MIN_QUOTE_FIELDS,
                "sina quote has too few fields"
            );
            return None;
        }

        let price = field_f64(&fields, 3);
        let pre_close = field_f64(&fields, 2);
        let high = field_f64(&fields, 4);
        let low = field_f64(&fields, 5);
        let change_amount = if pre_close > 0.0 { price - pre_close } else { 0.0 };
        let change_pct = if pre_close > 0.0 {
            change_amount / pre_close * 100.0
        } else {
            0.0
        };
        let amplitude = if pre_close > 0.0 {
            (high - low) / pre_close * 100.0
        } else {
            0.0
        };

        Some(Quote {
            code: code.to_string(),
            name: fields[0].to_string(),
            price,
            change_pct,
            change_amount,
            volume: field_i64(&fields, 8),
            amount: field_f64(&fields, 9),
            turnover_rate: 0.0,
            amplitude,
            high,
            low,
            open_price: field_f64(&fields, 1),
            pre_close,
            pe_ratio: 0.0,
            pb_ratio: 0.0,
            total_mv: 0.0,
            circulation_mv: 0.0,
        })
    }

    async fn fetch_quote_chunk(
        &self,
        codes: &[String],
    ) -> Result<HashMap<String, Option<Quote>>, FetchError> {
        let sina_codes: Vec<String> = codes
            .iter()
            .map(|c| format_code(c, SymbolStyle::LowerPrefix))
            .collect();
        let url = format!("{QUOTE_URL}{}", sina_codes.join(","));
        let body = with_retry(&self.retry, self.name(), || self.fetch_text(&url)).await?;

        let mut quotes = HashMap::with_capacity(codes.len());
        for (code, line) in codes.iter().zip(body.lines()) {
            let quote = self.parse_quote_line(line, code);
            if let Some(q) = &quote {
                self.cache.put(code, q.clone()).await;
            }
            quotes.insert(code.clone(), quote);
        }
        // Upstream dropped trailing symbols; report them as missing.
        for code in codes.iter().skip(body.lines().count()) {
            quotes.insert(code.clone(), None);
        }
        Ok(quotes)
    }
}

impl Default for SinaFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// One day record of the getKLineData response. All values arrive as strings.
#[derive(Debug, Deserialize)]
struct SinaKline {
    day: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

#[async_trait]
impl Fetcher for SinaFetcher {
    fn name(&self) -> &'static str {
        "sina"
    }

    fn priority(&self) -> f64 {
        0.1
    }

    async fn daily_bars(&self, code: &str, days: usize) -> Result<Vec<Bar>, FetchError> {
        let sina_code = format_code(code, SymbolStyle::LowerPrefix);
        let url = format!("{KLINE_URL}?symbol={sina_code}&scale=240&ma=no&datalen={days}");
        let body = with_retry(&self.retry, self.name(), || self.fetch_text(&url)).await?;

        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" || trimmed.len() < 10 {
            return Err(FetchError::Empty(format!("no sina history for {code}")));
        }
        let klines: Vec<SinaKline> = serde_json::from_str(trimmed)
            .map_err(|e| FetchError::Parse(format!("sina kline json: {e}")))?;
        if klines.is_empty() {
            return Err(FetchError::Empty(format!("sina history empty for {code}")));
        }

        let mut bars = Vec::with_capacity(klines.len());
        for item in klines {
            let date = match chrono::NaiveDate::parse_from_str(&item.day, "%Y-%m-%d") {
                Ok(d) => d,
                Err(err) => {
                    tracing::warn!(code, day = %item.day, %err, "skipping kline with bad date");
                    continue;
                }
            };
            let parse = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
            bars.push(Bar {
                code: code.to_string(),
                date,
                open: parse(&item.open),
                high: parse(&item.high),
                low: parse(&item.low),
                close: parse(&item.close),
                volume: parse(&item.volume) as i64,
                amount: 0.0,
                pct_chg: 0.0,
            });
        }
        if bars.is_empty() {
            return Err(FetchError::Empty(format!(
                "sina history unparseable for {code}"
            )));
        }
        bars.sort_by_key(|b| b.date);
        fill_pct_chg(&mut bars);
        tracing::info!(code, rows = bars.len(), "sina history fetched");
        Ok(bars)
    }

    async fn realtime_quote(&self, code: &str) -> Result<Option<Quote>, FetchError> {
        if let Some(cached) = self.cache.get(code).await {
            return Ok(Some(cached));
        }
        let sina_code = format_code(code, SymbolStyle::LowerPrefix);
        let url = format!("{QUOTE_URL}{sina_code}");
        let body = with_retry(&self.retry, self.name(), || self.fetch_text(&url)).await?;
        let line = match body.lines().next() {
            Some(line) => line,
            None => return Ok(None),
        };
        let quote = self.parse_quote_line(line, code);
        if let Some(q) = &quote {
            self.cache.put(code, q.clone()).await;
        }
        Ok(quote)
    }

    async fn fundamental_data(&self, _code: &str) -> Result<Fundamental, FetchError> {
        // The snapshot feed carries no valuation columns.
        Ok(Fundamental::default())
    }

    async fn batch_realtime_quotes(
        &self,
        codes: &[String],
    ) -> Result<HashMap<String, Option<Quote>>, FetchError> {
        let mut quotes = HashMap::with_capacity(codes.len());
        for chunk in codes.chunks(BATCH_SIZE) {
            quotes.extend(self.fetch_quote_chunk(chunk).await?);
        }
        Ok(quotes)
    }
}
