use std::time::Duration;

use async_trait::async_trait;
use chrono::Days;
use market_core::{format_code, Bar, FetchError, Fetcher, Fundamental, Quote, SymbolStyle};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{status_error, today};
use crate::pacer::Pacer;
use crate::retry::{with_retry, RetryPolicy};

const API_URL: &str = "http://api.tushare.pro";
const ENV_TOKEN: &str = "TUSHARE_TOKEN";
const DEFAULT_RATE_LIMIT: u32 = 80;

/// Token-quota source (priority 2). JSON-RPC style POST API with a per-minute
/// call budget. Daily rows arrive with volume in lots and amount in
/// thousand-yuan; both are converted to canonical units here. Without a
/// token the adapter reports `NotConfigured` and the manager skips it for
/// the session.
pub struct TushareFetcher {
    client: Client,
    pacer: Pacer,
    retry: RetryPolicy,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    msg: Option<String>,
    data: Option<TushareFrame>,
}

/// Column-oriented result frame: named fields plus row tuples.
#[derive(Debug, Deserialize)]
struct TushareFrame {
    fields: Vec<String>,
    items: Vec<Vec<Value>>,
}

impl TushareFrame {
    fn column(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    fn f64_at(&self, row: &[Value], name: &str) -> f64 {
        self.column(name)
            .and_then(|idx| row.get(idx))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    fn str_at<'a>(&self, row: &'a [Value], name: &str) -> &'a str {
        self.column(name)
            .and_then(|idx| row.get(idx))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }
}

impl TushareFetcher {
    pub fn new(token: Option<String>) -> Self {
        Self::with_rate_limit(token, DEFAULT_RATE_LIMIT)
    }

    /// Token from the environment; an empty or unset variable disables the
    /// adapter rather than failing construction.
    pub fn from_env() -> Self {
        let token = std::env::var(ENV_TOKEN).ok().filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::warn!("{ENV_TOKEN} not set, tushare source disabled");
        }
        Self::new(token)
    }

    pub fn with_rate_limit(token: Option<String>, per_minute: u32) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            pacer: Pacer::budget(per_minute),
            retry: RetryPolicy::default(),
            token,
        }
    }

    fn token(&self) -> Result<&str, FetchError> {
        self.token
            .as_deref()
            .ok_or_else(|| FetchError::NotConfigured(format!("{ENV_TOKEN} not set")))
    }

    async fn call(&self, api_name: &str, params: Value) -> Result<TushareFrame, FetchError> {
        let token = self.token()?;
        self.pacer.wait().await;
        let body = json!({
            "api_name": api_name,
            "token": token,
            "params": params,
            "fields": "",
        });
        let response = self
            .client
            .post(API_URL)
            .json(&body)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        let parsed: TushareResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("tushare response: {e}")))?;
        if parsed.code != 0 {
            let msg = parsed
                .msg
                .unwrap_or_else(|| format!("tushare error code {}", parsed.code));
            // Quota exhaustion comes back as an application error string.
            return Err(FetchError::classify_message(msg, FetchError::Parse));
        }
        parsed
            .data
            .ok_or_else(|| FetchError::Parse(format!("tushare {api_name}: missing data frame")))
    }

    /// Latest daily_basic row for the code: today's if published, otherwise
    /// the most recent available.
    async fn latest_basic(&self, ts_code: &str) -> Result<Option<TushareBasicRow>, FetchError> {
        let trade_date = today().format("%Y%m%d").to_string();
        let fields = "ts_code,trade_date,close,turnover_rate,volume_ratio,pe,pb,total_mv,circ_mv";
        let frame = with_retry(&self.retry, self.name(), || {
            self.call(
                "daily_basic",
                json!({ "ts_code": ts_code, "trade_date": trade_date, "fields": fields }),
            )
        })
        .await?;
        let frame = if frame.items.is_empty() {
            with_retry(&self.retry, self.name(), || {
                self.call("daily_basic", json!({ "ts_code": ts_code, "fields": fields }))
            })
            .await?
        } else {
            frame
        };
        let Some(row) = frame.items.first() else {
            return Ok(None);
        };
        Ok(Some(TushareBasicRow {
            close: frame.f64_at(row, "close"),
            turnover_rate: frame.f64_at(row, "turnover_rate"),
            pe: frame.f64_at(row, "pe"),
            pb: frame.f64_at(row, "pb"),
            // wan-yuan -> yuan
            total_mv: frame.f64_at(row, "total_mv") * 10_000.0,
            circ_mv: frame.f64_at(row, "circ_mv") * 10_000.0,
        }))
    }
}

struct TushareBasicRow {
    close: f64,
    turnover_rate: f64,
    pe: f64,
    pb: f64,
    total_mv: f64,
    circ_mv: f64,
}

#[async_trait]
impl Fetcher for TushareFetcher {
    fn name(&self) -> &'static str {
        "tushare"
    }

    fn priority(&self) -> f64 {
        2.0
    }

    async fn daily_bars(&self, code: &str, days: usize) -> Result<Vec<Bar>, FetchError> {
        let ts_code = format_code(code, SymbolStyle::UpperSuffix);
        let end = today();
        // Calendar window wide enough to cover `days` trading sessions.
        let start = end
            .checked_sub_days(Days::new((days * 2 + 10) as u64))
            .unwrap_or(end);
        let params = json!({
            "ts_code": ts_code,
            "start_date": start.format("%Y%m%d").to_string(),
            "end_date": end.format("%Y%m%d").to_string(),
        });
        let frame =
            with_retry(&self.retry, self.name(), || self.call("daily", params.clone())).await?;
        if frame.items.is_empty() {
            return Err(FetchError::Empty(format!("no tushare rows for {code}")));
        }

        let mut bars = Vec::with_capacity(frame.items.len());
        for row in &frame.items {
            let date_str = frame.str_at(row, "trade_date");
            let date = match chrono::NaiveDate::parse_from_str(date_str, "%Y%m%d") {
                Ok(d) => d,
                Err(err) => {
                    tracing::warn!(code, date_str, %err, "skipping tushare row with bad date");
                    continue;
                }
            };
            bars.push(Bar {
                code: code.to_string(),
                date,
                open: frame.f64_at(row, "open"),
                high: frame.f64_at(row, "high"),
                low: frame.f64_at(row, "low"),
                close: frame.f64_at(row, "close"),
                // lots -> shares
                volume: (frame.f64_at(row, "vol") * 100.0) as i64,
                // thousand-yuan -> yuan
                amount: frame.f64_at(row, "amount") * 1_000.0,
                pct_chg: frame.f64_at(row, "pct_chg"),
            });
        }
        if bars.is_empty() {
            return Err(FetchError::Empty(format!("tushare rows unparseable for {code}")));
        }
        bars.sort_by_key(|b| b.date);
        if bars.len() > days {
            bars.drain(..bars.len() - days);
        }
        tracing::info!(code, rows = bars.len(), "tushare history fetched");
        Ok(bars)
    }

    async fn realtime_quote(&self, code: &str) -> Result<Option<Quote>, FetchError> {
        let ts_code = format_code(code, SymbolStyle::UpperSuffix);
        let Some(basic) = self.latest_basic(&ts_code).await? else {
            return Ok(None);
        };
        Ok(Some(Quote {
            code: code.to_string(),
            name: String::new(),
            price: basic.close,
            turnover_rate: basic.turnover_rate,
            pe_ratio: basic.pe,
            pb_ratio: basic.pb,
            total_mv: basic.total_mv,
            circulation_mv: basic.circ_mv,
            ..Quote::default()
        }))
    }

    async fn fundamental_data(&self, code: &str) -> Result<Fundamental, FetchError> {
        let ts_code = format_code(code, SymbolStyle::UpperSuffix);
        let Some(basic) = self.latest_basic(&ts_code).await? else {
            return Ok(Fundamental::default());
        };
        Ok(Fundamental {
            pe_ratio: basic.pe,
            pb_ratio: basic.pb,
            total_mv: basic.total_mv,
            circ_mv: basic.circ_mv,
            roe: 0.0,
            revenue_growth: 0.0,
        })
    }
}
