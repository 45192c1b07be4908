use std::time::Duration;

use async_trait::async_trait;
use market_core::{secid, Bar, FetchError, Fetcher, Fundamental, Quote};
use reqwest::header;
use reqwest::Client;
use serde_json::Value;

use super::{status_error, QuoteCache};
use crate::headers::random_user_agent;
use crate::pacer::Pacer;
use crate::retry::{with_retry, RetryPolicy};

const KLINE_URL: &str = "http://push2his.eastmoney.com/api/qt/stock/kline/get";
const QUOTE_URL: &str = "http://push2.eastmoney.com/api/qt/stock/get";

/// Quote fields requested from the push2 endpoint. Numeric field ids:
/// f43 price, f44 high, f45 low, f46 open, f47 volume(lots), f48 amount,
/// f58 name, f60 pre_close, f116 total_mv, f117 circ_mv, f162 pe, f167 pb,
/// f168 turnover, f169 change, f170 pct, f171 amplitude.
const QUOTE_FIELDS: &str = "f43,f44,f45,f46,f47,f48,f58,f60,f116,f117,f162,f167,f168,f169,f170,f171";

/// General-purpose source (priority 1): the richest free feed, serving full
/// daily history with amount and pct_chg plus valuation data for quotes and
/// fundamentals.
pub struct EastmoneyFetcher {
    client: Client,
    pacer: Pacer,
    retry: RetryPolicy,
    cache: QuoteCache,
}

impl EastmoneyFetcher {
    pub fn new() -> Self {
        Self::with_pacing(Duration::from_millis(200), Duration::from_millis(500))
    }

    pub fn with_pacing(sleep_min: Duration, sleep_max: Duration) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            pacer: Pacer::interval(sleep_min, sleep_max),
            retry: RetryPolicy::default(),
            cache: QuoteCache::new(Duration::from_secs(30)),
        }
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
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
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Parse(format!("eastmoney json: {e}")))
    }

    /// One kline row: `date,open,close,high,low,volume,amount,amplitude,
    /// pct_chg,change,turnover`. Volume arrives in lots.
    fn parse_kline_row(code: &str, row: &str) -> Option<Bar> {
        let fields: Vec<&str> = row.split(',').collect();
        if fields.len() < 9 {
            tracing::warn!(code, row, "skipping short eastmoney kline row");
            return None;
        }
        let date = chrono::NaiveDate::parse_from_str(fields[0], "%Y-%m-%d").ok()?;
        let parse = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
        Some(Bar {
            code: code.to_string(),
            date,
            open: parse(fields[1]),
            close: parse(fields[2]),
            high: parse(fields[3]),
            low: parse(fields[4]),
            volume: (parse(fields[5]) * 100.0) as i64,
            amount: parse(fields[6]),
            pct_chg: parse(fields[8]),
        })
    }

    fn quote_field(data: &Value, key: &str) -> f64 {
        data.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
    }
}

impl Default for EastmoneyFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for EastmoneyFetcher {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    fn priority(&self) -> f64 {
        1.0
    }

    async fn daily_bars(&self, code: &str, days: usize) -> Result<Vec<Bar>, FetchError> {
        let secid = secid(code);
        let url = format!(
            "{KLINE_URL}?secid={secid}&klt=101&fqt=1&lmt={days}&end=20500101\
             &fields1=f1,f2,f3,f4,f5,f6&fields2=f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61"
        );
        let value = with_retry(&self.retry, self.name(), || self.fetch_json(&url)).await?;
        let klines = value
            .get("data")
            .and_then(|d| d.get("klines"))
            .and_then(|k| k.as_array())
            .ok_or_else(|| FetchError::Parse(format!("eastmoney kline shape for {code}")))?;
        if klines.is_empty() {
            return Err(FetchError::Empty(format!("no eastmoney history for {code}")));
        }

        let mut bars: Vec<Bar> = klines
            .iter()
            .filter_map(|row| row.as_str())
            .filter_map(|row| Self::parse_kline_row(code, row))
            .collect();
        if bars.is_empty() {
            return Err(FetchError::Empty(format!(
                "eastmoney history unparseable for {code}"
            )));
        }
        bars.sort_by_key(|b| b.date);
        tracing::info!(code, rows = bars.len(), "eastmoney history fetched");
        Ok(bars)
    }

    async fn realtime_quote(&self, code: &str) -> Result<Option<Quote>, FetchError> {
        if let Some(cached) = self.cache.get(code).await {
            return Ok(Some(cached));
        }
        let secid = secid(code);
        let url = format!("{QUOTE_URL}?secid={secid}&invt=2&fltt=2&fields={QUOTE_FIELDS}");
        let value = with_retry(&self.retry, self.name(), || self.fetch_json(&url)).await?;
        let data = match value.get("data") {
            Some(data) if !data.is_null() => data,
            _ => return Ok(None),
        };

        let price = Self::quote_field(data, "f43");
        if price <= 0.0 {
            return Ok(None);
        }
        let quote = Quote {
            code: code.to_string(),
            name: data
                .get("f58")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            price,
            change_pct: Self::quote_field(data, "f170"),
            change_amount: Self::quote_field(data, "f169"),
            volume: (Self::quote_field(data, "f47") * 100.0) as i64,
            amount: Self::quote_field(data, "f48"),
            turnover_rate: Self::quote_field(data, "f168"),
            amplitude: Self::quote_field(data, "f171"),
            high: Self::quote_field(data, "f44"),
            low: Self::quote_field(data, "f45"),
            open_price: Self::quote_field(data, "f46"),
            pre_close: Self::quote_field(data, "f60"),
            pe_ratio: Self::quote_field(data, "f162"),
            pb_ratio: Self::quote_field(data, "f167"),
            total_mv: Self::quote_field(data, "f116"),
            circulation_mv: Self::quote_field(data, "f117"),
        };
        self.cache.put(code, quote.clone()).await;
        Ok(Some(quote))
    }

    async fn fundamental_data(&self, code: &str) -> Result<Fundamental, FetchError> {
        let quote = self.realtime_quote(code).await?.unwrap_or_default();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kline_row_with_lot_conversion() {
        let bar = EastmoneyFetcher::parse_kline_row(
            "600519",
            "2024-05-20,1700.00,1710.50,1720.00,1690.00,34567,5901230000.0,1.77,0.91,15.50,0.28",
        )
        .unwrap();
        assert_eq!(
            bar.date,
            chrono::NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
        );
        assert_eq!(bar.open, 1700.00);
        assert_eq!(bar.close, 1710.50);
        assert_eq!(bar.high, 1720.00);
        assert_eq!(bar.low, 1690.00);
        assert_eq!(bar.volume, 3_456_700);
        assert_eq!(bar.amount, 5_901_230_000.0);
        assert_eq!(bar.pct_chg, 0.91);
        assert!(bar.is_valid());
    }

    #[test]
    fn short_kline_row_is_skipped() {
        assert!(EastmoneyFetcher::parse_kline_row("600519", "2024-05-20,1,2").is_none());
    }

    #[test]
    fn quote_fields_default_to_zero() {
        let data = serde_json::json!({ "f43": 10.5 });
        assert_eq!(EastmoneyFetcher::quote_field(&data, "f43"), 10.5);
        assert_eq!(EastmoneyFetcher::quote_field(&data, "f162"), 0.0);
    }
}
