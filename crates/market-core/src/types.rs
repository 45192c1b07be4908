use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical bar column names, in order. Every adapter renames, type-converts
/// and unit-converts into this schema before returning.
pub const CANONICAL_COLUMNS: [&str; 9] = [
    "code", "date", "open", "high", "low", "close", "volume", "amount", "pct_chg",
];

/// Daily OHLCV bar in canonical form. Volume is in shares, amount in yuan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub code: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub amount: f64,
    #[serde(default)]
    pub pct_chg: f64,
}

impl Bar {
    /// OHLC sanity: `low <= min(open, close) <= max(open, close) <= high`,
    /// positive prices, non-negative volume and amount.
    pub fn is_valid(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low > 0.0
            && self.low <= body_low
            && body_high <= self.high
            && self.volume >= 0
            && self.amount >= 0.0
    }
}

/// Fill `pct_chg` from consecutive closes. The first bar (no prior close)
/// keeps zero. Used by sources whose history endpoint omits the field.
pub fn fill_pct_chg(bars: &mut [Bar]) {
    for i in 1..bars.len() {
        let prev_close = bars[i - 1].close;
        if prev_close > 0.0 {
            bars[i].pct_chg = (bars[i].close - prev_close) / prev_close * 100.0;
        }
    }
}

/// Realtime snapshot. Fields an upstream cannot supply are carried as zero;
/// the `Option`-returning accessors are how callers disambiguate "unknown"
/// from a true zero for the valuation fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Quote {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub change_pct: f64,
    pub change_amount: f64,
    pub volume: i64,
    pub amount: f64,
    pub turnover_rate: f64,
    pub amplitude: f64,
    pub high: f64,
    pub low: f64,
    pub open_price: f64,
    pub pre_close: f64,
    pub pe_ratio: f64,
    pub pb_ratio: f64,
    pub total_mv: f64,
    pub circulation_mv: f64,
}

fn known(value: f64) -> Option<f64> {
    (value != 0.0).then_some(value)
}

impl Quote {
    pub fn pe_ratio(&self) -> Option<f64> {
        known(self.pe_ratio)
    }

    pub fn pb_ratio(&self) -> Option<f64> {
        known(self.pb_ratio)
    }

    pub fn total_mv(&self) -> Option<f64> {
        known(self.total_mv)
    }

    pub fn circulation_mv(&self) -> Option<f64> {
        known(self.circulation_mv)
    }
}

/// Best-effort fundamental snapshot, zero-as-unknown like [`Quote`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fundamental {
    pub pe_ratio: f64,
    pub pb_ratio: f64,
    pub total_mv: f64,
    pub circ_mv: f64,
    pub roe: f64,
    pub revenue_growth: f64,
}

/// Convenience aggregation returned by `Fetcher::enhanced_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnhancedData {
    pub code: String,
    pub bars: Vec<Bar>,
    pub quote: Option<Quote>,
    pub fundamental: Fundamental,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            code: "600519".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1_000,
            amount: 10_000.0,
            pct_chg: 0.0,
        }
    }

    #[test]
    fn valid_bar_passes_range_check() {
        assert!(bar(10.0, 12.0, 9.0, 11.0).is_valid());
    }

    #[test]
    fn high_below_close_fails() {
        assert!(!bar(10.0, 10.5, 9.0, 11.0).is_valid());
    }

    #[test]
    fn low_above_open_fails() {
        assert!(!bar(10.0, 12.0, 10.5, 11.0).is_valid());
    }

    #[test]
    fn negative_volume_fails() {
        let mut b = bar(10.0, 12.0, 9.0, 11.0);
        b.volume = -1;
        assert!(!b.is_valid());
    }

    #[test]
    fn fill_pct_chg_uses_previous_close() {
        let mut bars = vec![bar(10.0, 12.0, 9.0, 10.0), bar(10.0, 12.0, 9.0, 11.0)];
        fill_pct_chg(&mut bars);
        assert_eq!(bars[0].pct_chg, 0.0);
        assert!((bars[1].pct_chg - 10.0).abs() < 1e-9);
    }

    #[test]
    fn quote_zero_fields_read_as_unknown() {
        let quote = Quote {
            pe_ratio: 15.2,
            ..Quote::default()
        };
        assert_eq!(quote.pe_ratio(), Some(15.2));
        assert_eq!(quote.pb_ratio(), None);
        assert_eq!(quote.total_mv(), None);
    }
}
