use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use market_core::{Bar, EnhancedData, FetchError, Fetcher, Fundamental, Quote};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapters::{
    BaostockFetcher, EastmoneyFetcher, SinaFetcher, TencentFetcher, TonghuashunFetcher,
    TushareFetcher, YahooFetcher,
};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a rate-limited adapter sits out of the rotation.
    pub cooldown: Duration,
    pub bar_cache_ttl: Duration,
    pub quote_cache_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            bar_cache_ttl: Duration::from_secs(300),
            quote_cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Priority-ordered failover front for the registered adapters.
///
/// Sources are consulted strictly in ascending priority order; a source is
/// only tried after the previous one reached a final outcome. Rate-limited
/// sources cool down, unconfigured sources are dropped for the session, and
/// every successful answer carries the name of the source that produced it.
pub struct FetcherManager {
    fetchers: Vec<Arc<dyn Fetcher>>,
    config: ManagerConfig,
    cooldown_until: Mutex<HashMap<&'static str, Instant>>,
    disabled: Mutex<HashSet<&'static str>>,
    bar_cache: Mutex<HashMap<(String, usize), (Vec<Bar>, Instant)>>,
    quote_cache: Mutex<HashMap<String, (Quote, Instant)>>,
}

impl FetcherManager {
    pub fn new(fetchers: Vec<Arc<dyn Fetcher>>) -> Self {
        Self::with_config(fetchers, ManagerConfig::default())
    }

    pub fn with_config(mut fetchers: Vec<Arc<dyn Fetcher>>, config: ManagerConfig) -> Self {
        fetchers.sort_by(|a, b| a.priority().total_cmp(&b.priority()));
        Self {
            fetchers,
            config,
            cooldown_until: Mutex::new(HashMap::new()),
            disabled: Mutex::new(HashSet::new()),
            bar_cache: Mutex::new(HashMap::new()),
            quote_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The full built-in source stack in priority order.
    pub fn with_default_sources() -> Self {
        Self::new(vec![
            Arc::new(TencentFetcher::new()),
            Arc::new(SinaFetcher::new()),
            Arc::new(TonghuashunFetcher::new()),
            Arc::new(EastmoneyFetcher::new()),
            Arc::new(TushareFetcher::from_env()),
            Arc::new(BaostockFetcher::new()),
            Arc::new(YahooFetcher::new()),
        ])
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.fetchers.iter().map(|f| f.name()).collect()
    }

    /// Enabled adapters in priority order, skipping cool-downs. Expired
    /// cool-down entries are dropped on the way through.
    async fn candidates(&self) -> Vec<Arc<dyn Fetcher>> {
        let disabled = self.disabled.lock().await;
        let mut cooldowns = self.cooldown_until.lock().await;
        let now = Instant::now();
        cooldowns.retain(|_, until| *until > now);
        self.fetchers
            .iter()
            .filter(|f| !disabled.contains(f.name()) && !cooldowns.contains_key(f.name()))
            .cloned()
            .collect()
    }

    /// Record a per-source failure and decide whether to keep going.
    async fn note_failure(&self, source: &'static str, err: &FetchError) {
        match err {
            FetchError::RateLimit(msg) => {
                tracing::warn!(source, %msg, "source rate limited, entering cool-down");
                let mut cooldowns = self.cooldown_until.lock().await;
                cooldowns.insert(source, Instant::now() + self.config.cooldown);
            }
            FetchError::NotConfigured(msg) => {
                tracing::info!(source, %msg, "source not configured, disabling for session");
                let mut disabled = self.disabled.lock().await;
                disabled.insert(source);
            }
            _ => {
                tracing::warn!(source, %err, "source failed, trying next candidate");
            }
        }
    }

    pub async fn daily_bars(
        &self,
        code: &str,
        days: usize,
    ) -> Result<(Vec<Bar>, &'static str), FetchError> {
        {
            let cache = self.bar_cache.lock().await;
            if let Some((bars, stored_at)) = cache.get(&(code.to_string(), days)) {
                if stored_at.elapsed() < self.config.bar_cache_ttl {
                    tracing::debug!(code, days, "bar cache hit");
                    return Ok((bars.clone(), "cache"));
                }
            }
        }

        for fetcher in self.candidates().await {
            let source = fetcher.name();
            match fetcher.daily_bars(code, days).await {
                Ok(bars) if !bars.is_empty() => {
                    tracing::info!(code, source, rows = bars.len(), "daily bars fetched");
                    let mut cache = self.bar_cache.lock().await;
                    cache.insert((code.to_string(), days), (bars.clone(), Instant::now()));
                    return Ok((bars, source));
                }
                Ok(_) => {
                    tracing::warn!(code, source, "source returned no rows, trying next");
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(err) => self.note_failure(source, &err).await,
            }
        }
        Err(FetchError::AllSourcesExhausted(code.to_string()))
    }

    /// `daily_bars` raced against a caller-held cancellation token. Dropping
    /// the losing branch aborts the in-flight attempt and any pending
    /// retries; no partial result is ever returned.
    pub async fn daily_bars_with_cancel(
        &self,
        code: &str,
        days: usize,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Bar>, &'static str), FetchError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.daily_bars(code, days) => result,
        }
    }

    /// Failover quote lookup. A healthy source answering "no such symbol"
    /// does not stop the scan; it is only the answer of last resort.
    pub async fn realtime_quote(
        &self,
        code: &str,
    ) -> Result<(Option<Quote>, &'static str), FetchError> {
        {
            let cache = self.quote_cache.lock().await;
            if let Some((quote, stored_at)) = cache.get(code) {
                if stored_at.elapsed() < self.config.quote_cache_ttl {
                    tracing::debug!(code, "quote cache hit");
                    return Ok((Some(quote.clone()), "cache"));
                }
            }
        }

        let mut miss_source = None;
        for fetcher in self.candidates().await {
            let source = fetcher.name();
            match fetcher.realtime_quote(code).await {
                Ok(Some(quote)) => {
                    let mut cache = self.quote_cache.lock().await;
                    cache.insert(code.to_string(), (quote.clone(), Instant::now()));
                    return Ok((Some(quote), source));
                }
                Ok(None) => miss_source = Some(source),
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(err) => self.note_failure(source, &err).await,
            }
        }
        match miss_source {
            Some(source) => Ok((None, source)),
            None => Err(FetchError::AllSourcesExhausted(code.to_string())),
        }
    }

    pub async fn fundamental_data(
        &self,
        code: &str,
    ) -> Result<(Fundamental, &'static str), FetchError> {
        for fetcher in self.candidates().await {
            let source = fetcher.name();
            match fetcher.fundamental_data(code).await {
                Ok(fundamental) => return Ok((fundamental, source)),
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(err) => self.note_failure(source, &err).await,
            }
        }
        Err(FetchError::AllSourcesExhausted(code.to_string()))
    }

    pub async fn enhanced_data(
        &self,
        code: &str,
        days: usize,
    ) -> Result<(EnhancedData, &'static str), FetchError> {
        for fetcher in self.candidates().await {
            let source = fetcher.name();
            match fetcher.enhanced_data(code, days).await {
                Ok(data) if !data.bars.is_empty() => return Ok((data, source)),
                Ok(_) => {
                    tracing::warn!(code, source, "enhanced data had no bars, trying next");
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(err) => self.note_failure(source, &err).await,
            }
        }
        Err(FetchError::AllSourcesExhausted(code.to_string()))
    }

    pub async fn batch_realtime_quotes(
        &self,
        codes: &[String],
    ) -> Result<(HashMap<String, Option<Quote>>, &'static str), FetchError> {
        for fetcher in self.candidates().await {
            let source = fetcher.name();
            match fetcher.batch_realtime_quotes(codes).await {
                Ok(quotes) if quotes.values().any(|q| q.is_some()) => {
                    return Ok((quotes, source));
                }
                Ok(_) => {
                    tracing::warn!(source, "batch returned no quotes, trying next");
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(err) => self.note_failure(source, &err).await,
            }
        }
        Err(FetchError::AllSourcesExhausted(format!(
            "batch of {} codes",
            codes.len()
        )))
    }
}
