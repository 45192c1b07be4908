use market_core::Bar;

use crate::preprocess::{self, MIN_BARS};
use crate::types::ChanLunReport;
use crate::{fractal, pivot, signal, stroke};

/// The Chan-Lun decomposition engine: bars -> fractals -> strokes -> central
/// pivots -> signals, trend, divergence and a composite score.
///
/// Analysis is pure CPU over the input sequence and deterministic: the same
/// bars always produce the same report, and nothing is carried between
/// invocations. Precondition violations produce an empty report with a
/// warning instead of an error, so batch callers can keep going.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChanLunAnalyzer;

impl ChanLunAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, bars: &[Bar]) -> ChanLunReport {
        if bars.is_empty() {
            tracing::warn!("chanlun analysis got an empty bar series");
            return ChanLunReport::empty_with_warning("no input bars");
        }

        let (clean, mut warnings) = preprocess::clean_bars(bars);
        if clean.len() < MIN_BARS {
            let warning = format!(
                "insufficient data: {} clean bars, need at least {MIN_BARS}",
                clean.len()
            );
            tracing::warn!("{warning}");
            warnings.push(warning);
            return ChanLunReport {
                warnings,
                ..ChanLunReport::default()
            };
        }

        let fractals = fractal::filter_adjacent(fractal::detect_fractals(&clean));
        let strokes = stroke::build_strokes(&fractals);
        let pivots = pivot::build_pivots(&strokes);
        let signals = signal::classify_signals(&strokes, &pivots);
        let trend = signal::trend_type(&strokes);
        let divergence = signal::divergence(&strokes);
        let score = signal::score(trend, &divergence, &signals);

        let buy_count = signals.iter().filter(|s| s.class.is_buy()).count();
        let sell_count = signals.len() - buy_count;
        let summary = format!(
            "{} fractals, {} strokes, {} pivots, {} buy points, {} sell points",
            fractals.len(),
            strokes.len(),
            pivots.len(),
            buy_count,
            sell_count,
        );
        tracing::info!(
            bars = clean.len(),
            fractals = fractals.len(),
            strokes = strokes.len(),
            pivots = pivots.len(),
            signals = signals.len(),
            score,
            "chanlun analysis complete"
        );

        ChanLunReport {
            fractals,
            strokes,
            pivots,
            signals,
            trend: Some(trend),
            divergence,
            score,
            summary,
            warnings,
        }
    }
}
