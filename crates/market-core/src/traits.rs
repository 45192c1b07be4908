use std::collections::HashMap;

use async_trait::async_trait;

use crate::{Bar, EnhancedData, FetchError, Fundamental, Quote};

/// Contract every upstream adapter implements.
///
/// `priority` orders failover at the manager: lower is consulted first.
/// All calls are whole-or-nothing; no partial bar sequences are emitted.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stable identifier used for source attribution and cool-down tracking.
    fn name(&self) -> &'static str;

    /// Lower is higher priority.
    fn priority(&self) -> f64;

    /// At least the most recent `days` trading sessions in canonical form,
    /// sorted ascending by date.
    async fn daily_bars(&self, code: &str, days: usize) -> Result<Vec<Bar>, FetchError>;

    /// Single-symbol snapshot. `Ok(None)` means the upstream answered but
    /// has no quote for this symbol.
    async fn realtime_quote(&self, code: &str) -> Result<Option<Quote>, FetchError>;

    /// Best-effort fundamentals; unsupported fields are zero.
    async fn fundamental_data(&self, code: &str) -> Result<Fundamental, FetchError>;

    /// Bars + quote + fundamentals in one call. Quote and fundamentals are
    /// best-effort; only the bar fetch is allowed to fail the aggregate.
    async fn enhanced_data(&self, code: &str, days: usize) -> Result<EnhancedData, FetchError> {
        let bars = self.daily_bars(code, days).await?;
        let quote = match self.realtime_quote(code).await {
            Ok(quote) => quote,
            Err(err) => {
                tracing::warn!(source = self.name(), code, %err, "quote unavailable for enhanced data");
                None
            }
        };
        let fundamental = self.fundamental_data(code).await.unwrap_or_default();
        Ok(EnhancedData {
            code: code.to_string(),
            bars,
            quote,
            fundamental,
        })
    }

    /// Bulk snapshot fan-in. The default walks codes one by one; adapters
    /// with a batch endpoint override this and group requests.
    async fn batch_realtime_quotes(
        &self,
        codes: &[String],
    ) -> Result<HashMap<String, Option<Quote>>, FetchError> {
        let mut quotes = HashMap::with_capacity(codes.len());
        for code in codes {
            let quote = self.realtime_quote(code).await?;
            quotes.insert(code.clone(), quote);
        }
        Ok(quotes)
    }
}
