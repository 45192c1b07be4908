use market_core::Bar;

/// Minimum number of clean bars the decomposition needs.
pub const MIN_BARS: usize = 10;

/// Screen the input series before decomposition: bars violating the OHLC
/// range invariant are dropped, and dates must be strictly increasing
/// (duplicates and regressions are dropped, keeping the first occurrence).
/// Every drop is reported as a warning; the analyzer never raises over dirty
/// input.
pub fn clean_bars(bars: &[Bar]) -> (Vec<Bar>, Vec<String>) {
    let mut clean: Vec<Bar> = Vec::with_capacity(bars.len());
    let mut warnings = Vec::new();

    for bar in bars {
        if !bar.is_valid() {
            warnings.push(format!(
                "dropped bar {} {}: OHLC range violated (o={} h={} l={} c={})",
                bar.code, bar.date, bar.open, bar.high, bar.low, bar.close
            ));
            continue;
        }
        if let Some(last) = clean.last() {
            if bar.date <= last.date {
                warnings.push(format!(
                    "dropped bar {} {}: date not after {}",
                    bar.code, bar.date, last.date
                ));
                continue;
            }
        }
        clean.push(bar.clone());
    }

    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    (clean, warnings)
}
