use std::time::Duration;

use async_trait::async_trait;
use chrono::Days;
use market_core::{format_code, Bar, FetchError, Fetcher, Fundamental, Quote, SymbolStyle};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::today;
use crate::pacer::Pacer;
use crate::retry::{with_retry, RetryPolicy};

const DEFAULT_BASE_URL: &str = "http://www.baostock.com/api/v1";
const KLINE_FIELDS: &str = "date,open,high,low,close,volume,amount,pctChg";

/// Session-based history source (priority 3). Every query is bracketed by an
/// explicit login/logout pair; logout runs on every exit path, including a
/// failed query, so server-side sessions never leak. The upstream has no
/// snapshot endpoint, so quotes are synthesized from the latest daily row.
pub struct BaostockFetcher {
    client: Client,
    base_url: String,
    pacer: Pacer,
    retry: RetryPolicy,
}

/// Login handle scoped to a single query.
struct Session {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    error_code: String,
    #[serde(default)]
    error_msg: Option<String>,
}

impl ApiStatus {
    fn ok(&self) -> bool {
        self.error_code == "0"
    }

    fn message(&self) -> String {
        self.error_msg
            .clone()
            .unwrap_or_else(|| format!("error_code {}", self.error_code))
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<String>>,
}

impl BaostockFetcher {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into(),
            pacer: Pacer::interval(Duration::from_millis(100), Duration::from_millis(300)),
            retry: RetryPolicy::default(),
        }
    }

    async fn login(&self) -> Result<Session, FetchError> {
        self.pacer.wait().await;
        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .json(&json!({}))
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let parsed: LoginResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("baostock login: {e}")))?;
        if !parsed.status.ok() {
            return Err(FetchError::classify_message(
                format!("baostock login failed: {}", parsed.status.message()),
                FetchError::Parse,
            ));
        }
        let id = parsed
            .session_id
            .ok_or_else(|| FetchError::Parse("baostock login returned no session".into()))?;
        tracing::debug!("baostock session opened");
        Ok(Session { id })
    }

    async fn logout(&self, session: &Session) -> Result<(), FetchError> {
        let response = self
            .client
            .post(format!("{}/logout", self.base_url))
            .json(&json!({ "session_id": session.id }))
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let parsed: ApiStatus = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("baostock logout: {e}")))?;
        if !parsed.ok() {
            return Err(FetchError::Parse(format!(
                "baostock logout failed: {}",
                parsed.message()
            )));
        }
        tracing::debug!("baostock session closed");
        Ok(())
    }

    async fn query_history(
        &self,
        session: &Session,
        bs_code: &str,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<QueryResponse, FetchError> {
        self.pacer.wait().await;
        let response = self
            .client
            .post(format!("{}/query_history_k_data_plus", self.base_url))
            .json(&json!({
                "session_id": session.id,
                "code": bs_code,
                "fields": KLINE_FIELDS,
                "start_date": start.format("%Y-%m-%d").to_string(),
                "end_date": end.format("%Y-%m-%d").to_string(),
                "frequency": "d",
                // 2 = forward-adjusted prices
                "adjustflag": "2",
            }))
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("baostock query: {e}")))?;
        if !parsed.status.ok() {
            return Err(FetchError::classify_message(
                format!("baostock query failed: {}", parsed.status.message()),
                FetchError::Parse,
            ));
        }
        Ok(parsed)
    }

    /// Row values arrive as strings; empty cells (suspensions) read as zero
    /// and are dropped by the bar validity screen downstream.
    fn rows_to_bars(code: &str, response: &QueryResponse) -> Vec<Bar> {
        let column = |name: &str| response.fields.iter().position(|f| f == name);
        let (Some(date_idx), Some(open_idx), Some(high_idx), Some(low_idx), Some(close_idx)) = (
            column("date"),
            column("open"),
            column("high"),
            column("low"),
            column("close"),
        ) else {
            return Vec::new();
        };
        let volume_idx = column("volume");
        let amount_idx = column("amount");
        let pct_idx = column("pctChg");

        let cell_f64 = |row: &[String], idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(0.0)
        };

        let mut bars = Vec::with_capacity(response.data.len());
        for row in &response.data {
            let Some(date) = row
                .get(date_idx)
                .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            else {
                tracing::warn!(code, "skipping baostock row with bad date");
                continue;
            };
            bars.push(Bar {
                code: code.to_string(),
                date,
                open: cell_f64(row, Some(open_idx)),
                high: cell_f64(row, Some(high_idx)),
                low: cell_f64(row, Some(low_idx)),
                close: cell_f64(row, Some(close_idx)),
                volume: cell_f64(row, volume_idx) as i64,
                amount: cell_f64(row, amount_idx),
                pct_chg: cell_f64(row, pct_idx),
            });
        }
        bars
    }

    /// Run one session-bracketed history query. Logout must run whether or
    /// not the query succeeded, so the result is held and only propagated
    /// afterwards.
    async fn query_in_session(
        &self,
        bs_code: &str,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<QueryResponse, FetchError> {
        let session = with_retry(&self.retry, self.name(), || self.login()).await?;
        let result = with_retry(&self.retry, self.name(), || {
            self.query_history(&session, bs_code, start, end)
        })
        .await;
        if let Err(err) = self.logout(&session).await {
            tracing::warn!(%err, "baostock logout failed");
        }
        result
    }

    /// No snapshot endpoint upstream: the latest daily row stands in, with
    /// the previous close backed out of the change
    /// (`pre_close = close / (1 + pct_chg / 100)`) and change amount and
    /// amplitude derived from it. The name column does not exist here.
    fn quote_from_latest(code: &str, latest: &Bar) -> Quote {
        let price = latest.close;
        let pre_close = if latest.pct_chg != 0.0 {
            let base = 1.0 + latest.pct_chg / 100.0;
            if base > 0.0 { price / base } else { 0.0 }
        } else {
            price
        };
        let change_amount = if pre_close > 0.0 { price - pre_close } else { 0.0 };
        let amplitude = if pre_close > 0.0 {
            (latest.high - latest.low) / pre_close * 100.0
        } else {
            0.0
        };
        Quote {
            code: code.to_string(),
            name: String::new(),
            price,
            change_pct: latest.pct_chg,
            change_amount,
            volume: latest.volume,
            amount: latest.amount,
            turnover_rate: 0.0,
            amplitude,
            high: latest.high,
            low: latest.low,
            open_price: latest.open,
            pre_close,
            pe_ratio: 0.0,
            pb_ratio: 0.0,
            total_mv: 0.0,
            circulation_mv: 0.0,
        }
    }
}

impl Default for BaostockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for BaostockFetcher {
    fn name(&self) -> &'static str {
        "baostock"
    }

    fn priority(&self) -> f64 {
        3.0
    }

    async fn daily_bars(&self, code: &str, days: usize) -> Result<Vec<Bar>, FetchError> {
        let bs_code = format_code(code, SymbolStyle::DottedPrefix);
        let end = today();
        // Calendar window wide enough to cover `days` trading sessions.
        let start = end
            .checked_sub_days(Days::new((days * 2 + 10) as u64))
            .unwrap_or(end);
        let response = self.query_in_session(&bs_code, start, end).await?;

        if response.data.is_empty() {
            return Err(FetchError::Empty(format!("no baostock rows for {code}")));
        }
        let mut bars = Self::rows_to_bars(code, &response);
        if bars.is_empty() {
            return Err(FetchError::Empty(format!(
                "baostock rows unparseable for {code}"
            )));
        }
        bars.sort_by_key(|b| b.date);
        tracing::info!(code, rows = bars.len(), "baostock history fetched");
        Ok(bars)
    }

    async fn realtime_quote(&self, code: &str) -> Result<Option<Quote>, FetchError> {
        let bs_code = format_code(code, SymbolStyle::DottedPrefix);
        // A few calendar days guarantee at least one trading session.
        let end = today();
        let start = end.checked_sub_days(Days::new(3)).unwrap_or(end);
        let response = self.query_in_session(&bs_code, start, end).await?;

        let bars = Self::rows_to_bars(code, &response);
        let Some(latest) = bars.iter().max_by_key(|b| b.date) else {
            tracing::warn!(code, "no recent baostock rows to derive a quote from");
            return Ok(None);
        };
        tracing::info!(code, date = %latest.date, "baostock quote synthesized from latest row");
        Ok(Some(Self::quote_from_latest(code, latest)))
    }

    async fn fundamental_data(&self, _code: &str) -> Result<Fundamental, FetchError> {
        Ok(Fundamental::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_response(rows: Vec<Vec<String>>) -> QueryResponse {
        QueryResponse {
            status: ApiStatus {
                error_code: "0".into(),
                error_msg: None,
            },
            fields: KLINE_FIELDS.split(',').map(str::to_string).collect(),
            data: rows,
        }
    }

    #[test]
    fn string_rows_parse_to_bars() {
        let response = query_response(vec![vec![
            "2024-05-20".into(),
            "1700.00".into(),
            "1720.00".into(),
            "1690.00".into(),
            "1710.50".into(),
            "3456700".into(),
            "5901230000.00".into(),
            "0.9145".into(),
        ]]);
        let bars = BaostockFetcher::rows_to_bars("600519", &response);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].volume, 3_456_700);
        assert_eq!(bars[0].close, 1710.50);
        assert!(bars[0].is_valid());
    }

    #[test]
    fn empty_cells_read_as_zero() {
        let response = query_response(vec![vec![
            "2024-05-20".into(),
            "".into(),
            "".into(),
            "".into(),
            "".into(),
            "".into(),
            "".into(),
            "".into(),
        ]]);
        let bars = BaostockFetcher::rows_to_bars("600519", &response);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 0.0);
        // Suspension rows fail the validity screen downstream.
        assert!(!bars[0].is_valid());
    }

    #[test]
    fn synthesized_quote_derives_pre_close_change_and_amplitude() {
        let response = query_response(vec![vec![
            "2024-05-20".into(),
            "1700.00".into(),
            "1720.00".into(),
            "1690.00".into(),
            "1710.50".into(),
            "3456700".into(),
            "5901230000.00".into(),
            "0.91".into(),
        ]]);
        let bars = BaostockFetcher::rows_to_bars("600519", &response);
        let quote = BaostockFetcher::quote_from_latest("600519", &bars[0]);

        assert_eq!(quote.price, 1710.50);
        assert_eq!(quote.change_pct, 0.91);
        let expected_pre_close = 1710.50 / (1.0 + 0.91 / 100.0);
        assert!((quote.pre_close - expected_pre_close).abs() < 1e-9);
        assert!((quote.change_amount - (1710.50 - expected_pre_close)).abs() < 1e-9);
        let expected_amplitude = (1720.00 - 1690.00) / expected_pre_close * 100.0;
        assert!((quote.amplitude - expected_amplitude).abs() < 1e-9);
        // No name or valuation columns on this upstream.
        assert!(quote.name.is_empty());
        assert_eq!(quote.pe_ratio(), None);
    }

    #[test]
    fn flat_session_quote_reads_close_as_pre_close() {
        let response = query_response(vec![vec![
            "2024-05-20".into(),
            "10.00".into(),
            "10.20".into(),
            "9.80".into(),
            "10.00".into(),
            "1000".into(),
            "10000.00".into(),
            "0".into(),
        ]]);
        let bars = BaostockFetcher::rows_to_bars("600519", &response);
        let quote = BaostockFetcher::quote_from_latest("600519", &bars[0]);
        assert_eq!(quote.pre_close, 10.0);
        assert_eq!(quote.change_amount, 0.0);
        assert!((quote.amplitude - (10.2 - 9.8) / 10.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn bad_dates_are_skipped() {
        let response = query_response(vec![vec![
            "not-a-date".into(),
            "1".into(),
            "1".into(),
            "1".into(),
            "1".into(),
            "0".into(),
            "0".into(),
            "0".into(),
        ]]);
        assert!(BaostockFetcher::rows_to_bars("600519", &response).is_empty());
    }
}
