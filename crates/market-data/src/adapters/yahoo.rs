use std::time::Duration;

use async_trait::async_trait;
use market_core::{
    fill_pct_chg, format_code, Bar, FetchError, Fetcher, Fundamental, Quote, SymbolStyle,
};
use reqwest::Client;
use serde_json::Value;

use super::{status_error, QuoteCache};
use crate::headers::random_user_agent;
use crate::pacer::Pacer;
use crate::retry::{with_retry, RetryPolicy};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// International fallback source (priority 4, `.SS`/`.SZ` suffixes). The
/// chart endpoint has no per-bar turnover, so `pct_chg` is recomputed from
/// closes and `amount` is approximated as `volume * close`.
pub struct YahooFetcher {
    client: Client,
    pacer: Pacer,
    retry: RetryPolicy,
    cache: QuoteCache,
}

impl YahooFetcher {
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
            retry: RetryPolicy::default(),
            cache: QuoteCache::new(Duration::from_secs(30)),
        }
    }

    async fn fetch_chart(&self, symbol: &str, days: usize) -> Result<Value, FetchError> {
        self.pacer.wait().await;
        let period2 = chrono::Utc::now().timestamp();
        // Calendar window wide enough to cover `days` trading sessions.
        let period1 = period2 - ((days * 2 + 10) as i64) * 86_400;
        let url = format!(
            "{CHART_URL}/{symbol}?period1={period1}&period2={period2}&interval=1d"
        );
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
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
            .map_err(|e| FetchError::Parse(format!("yahoo chart json: {e}")))
    }

    fn chart_result(value: &Value) -> Result<&Value, FetchError> {
        value
            .get("chart")
            .and_then(|v| v.get("result"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .ok_or_else(|| FetchError::Parse("yahoo chart has no result".into()))
    }

    fn series<'a>(quote: &'a Value, name: &str) -> Result<&'a Vec<Value>, FetchError> {
        quote
            .get(name)
            .and_then(|v| v.as_array())
            .ok_or_else(|| FetchError::Parse(format!("yahoo chart missing {name} series")))
    }

    fn bars_from_chart(code: &str, value: &Value) -> Result<Vec<Bar>, FetchError> {
        let chart = Self::chart_result(value)?;
        let timestamps = Self::series(chart, "timestamp")?;
        let quote = chart
            .get("indicators")
            .and_then(|v| v.get("quote"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .ok_or_else(|| FetchError::Parse("yahoo chart has no quote block".into()))?;
        let opens = Self::series(quote, "open")?;
        let highs = Self::series(quote, "high")?;
        let lows = Self::series(quote, "low")?;
        let closes = Self::series(quote, "close")?;
        let volumes = Self::series(quote, "volume")?;

        let mut bars = Vec::with_capacity(timestamps.len());
        for i in 0..timestamps.len() {
            // Null rows (market holidays, halts) are skipped wholesale.
            let (Some(ts), Some(open), Some(high), Some(low), Some(close)) = (
                timestamps.get(i).and_then(|v| v.as_i64()),
                opens.get(i).and_then(|v| v.as_f64()),
                highs.get(i).and_then(|v| v.as_f64()),
                lows.get(i).and_then(|v| v.as_f64()),
                closes.get(i).and_then(|v| v.as_f64()),
            ) else {
                continue;
            };
            let volume = volumes.get(i).and_then(|v| v.as_i64()).unwrap_or(0);
            let Some(date) = chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
            else {
                continue;
            };
            bars.push(Bar {
                code: code.to_string(),
                date,
                open,
                high,
                low,
                close,
                volume,
                // No turnover series on this endpoint.
                amount: volume as f64 * close,
                pct_chg: 0.0,
            });
        }
        if bars.is_empty() {
            return Err(FetchError::Empty(format!("no yahoo bars for {code}")));
        }
        bars.sort_by_key(|b| b.date);
        fill_pct_chg(&mut bars);
        Ok(bars)
    }

    fn quote_from_meta(code: &str, value: &Value) -> Option<Quote> {
        let meta = Self::chart_result(value).ok()?.get("meta")?;
        let price = meta.get("regularMarketPrice")?.as_f64()?;
        let pre_close = meta
            .get("chartPreviousClose")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let change_amount = if pre_close > 0.0 { price - pre_close } else { 0.0 };
        let change_pct = if pre_close > 0.0 {
            change_amount / pre_close * 100.0
        } else {
            0.0
        };
        Some(Quote {
            code: code.to_string(),
            name: meta
                .get("shortName")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            price,
            change_pct,
            change_amount,
            volume: meta
                .get("regularMarketVolume")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            high: meta
                .get("regularMarketDayHigh")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            low: meta
                .get("regularMarketDayLow")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            pre_close,
            ..Quote::default()
        })
    }
}

impl Default for YahooFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for YahooFetcher {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn priority(&self) -> f64 {
        4.0
    }

    async fn daily_bars(&self, code: &str, days: usize) -> Result<Vec<Bar>, FetchError> {
        let symbol = format_code(code, SymbolStyle::YahooSuffix);
        let value =
            with_retry(&self.retry, self.name(), || self.fetch_chart(&symbol, days)).await?;
        let mut bars = Self::bars_from_chart(code, &value)?;
        if bars.len() > days {
            bars.drain(..bars.len() - days);
        }
        tracing::info!(code, rows = bars.len(), "yahoo history fetched");
        Ok(bars)
    }

    async fn realtime_quote(&self, code: &str) -> Result<Option<Quote>, FetchError> {
        if let Some(cached) = self.cache.get(code).await {
            return Ok(Some(cached));
        }
        let symbol = format_code(code, SymbolStyle::YahooSuffix);
        let value = with_retry(&self.retry, self.name(), || self.fetch_chart(&symbol, 1)).await?;
        let quote = Self::quote_from_meta(code, &value);
        if let Some(q) = &quote {
            self.cache.put(code, q.clone()).await;
        }
        Ok(quote)
    }

    async fn fundamental_data(&self, _code: &str) -> Result<Fundamental, FetchError> {
        // The chart endpoint has no valuation block.
        Ok(Fundamental::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chart(timestamps: Vec<i64>, closes: Vec<f64>) -> Value {
        let opens: Vec<f64> = closes.iter().map(|c| c - 1.0).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 2.0).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 2.0).collect();
        let volumes: Vec<i64> = closes.iter().map(|_| 1_000).collect();
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "regularMarketPrice": closes.last().copied().unwrap_or(0.0),
                        "chartPreviousClose": closes.first().copied().unwrap_or(0.0),
                    },
                    "timestamp": timestamps,
                    "indicators": { "quote": [{
                        "open": opens, "high": highs, "low": lows,
                        "close": closes, "volume": volumes,
                    }]},
                }],
            },
        })
    }

    #[test]
    fn bars_compute_pct_chg_and_amount() {
        let value = chart(vec![1_716_163_200, 1_716_249_600], vec![100.0, 110.0]);
        let bars = YahooFetcher::bars_from_chart("600519", &value).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].pct_chg, 0.0);
        assert!((bars[1].pct_chg - 10.0).abs() < 1e-9);
        assert_eq!(bars[1].amount, 1_000.0 * 110.0);
    }

    #[test]
    fn null_rows_are_skipped() {
        let mut value = chart(vec![1_716_163_200, 1_716_249_600], vec![100.0, 110.0]);
        value["chart"]["result"][0]["indicators"]["quote"][0]["close"][1] = Value::Null;
        let bars = YahooFetcher::bars_from_chart("600519", &value).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn missing_result_is_parse_error() {
        let err = YahooFetcher::bars_from_chart("600519", &json!({"chart": {}})).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn meta_quote_derives_change() {
        let value = chart(vec![1_716_163_200], vec![100.0]);
        let quote = YahooFetcher::quote_from_meta("600519", &value).unwrap();
        assert_eq!(quote.price, 100.0);
        assert_eq!(quote.pre_close, 100.0);
        assert_eq!(quote.change_amount, 0.0);
    }
}
