use chrono::NaiveDate;
use market_core::Bar;

use crate::types::{FractalType, StrokeDirection, TrendType};
use crate::ChanLunAnalyzer;

fn bars_from_ranges(highs: &[f64], lows: &[f64]) -> Vec<Bar> {
    highs
        .iter()
        .zip(lows)
        .enumerate()
        .map(|(i, (&high, &low))| Bar {
            code: "600519".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1_000,
            amount: 10_000.0,
            pct_chg: 0.0,
        })
        .collect()
}

/// Drifting zig-zag long enough to exercise every pipeline stage.
fn zigzag_bars(len: usize) -> Vec<Bar> {
    let cycle = [10.0, 12.0, 11.0, 13.0, 10.5, 12.5, 9.5, 11.5];
    let highs: Vec<f64> = (0..len)
        .map(|i| cycle[i % cycle.len()] + (i / cycle.len()) as f64 * 0.3)
        .collect();
    let lows: Vec<f64> = highs.iter().map(|h| h - 1.5).collect();
    bars_from_ranges(&highs, &lows)
}

#[test]
fn fewer_than_ten_bars_returns_empty_report_with_warning() {
    let bars = zigzag_bars(9);
    let report = ChanLunAnalyzer::new().analyze(&bars);
    assert!(report.is_empty());
    assert!(!report.warnings.is_empty());
    assert_eq!(report.score, 0.0);
    assert!(report.trend.is_none());
}

#[test]
fn empty_input_returns_empty_report_with_warning() {
    let report = ChanLunAnalyzer::new().analyze(&[]);
    assert!(report.is_empty());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn dirty_bars_are_dropped_not_fatal() {
    let mut bars = zigzag_bars(20);
    // Corrupt one bar so its high sits below its close.
    bars[5].high = bars[5].close - 1.0;
    let report = ChanLunAnalyzer::new().analyze(&bars);
    assert!(!report.is_empty());
    assert!(report.warnings.iter().any(|w| w.contains("OHLC")));
}

#[test]
fn too_few_clean_bars_degrades_to_warning() {
    let mut bars = zigzag_bars(12);
    for bar in bars.iter_mut().take(4) {
        bar.high = bar.close - 1.0;
    }
    let report = ChanLunAnalyzer::new().analyze(&bars);
    assert!(report.is_empty());
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("insufficient data")));
}

#[test]
fn three_alternating_fractals_give_two_strokes_and_nothing_more() {
    // Smooth descent to a bottom, rise to a top, dip to a second bottom.
    let highs = [
        15.0, 14.0, 13.0, 12.0, 13.0, 14.0, 15.0, 16.0, 15.0, 14.0, 13.5, 14.5, 15.5, 16.5,
    ];
    let lows: Vec<f64> = highs.iter().map(|h| h - 1.0).collect();
    let bars = bars_from_ranges(&highs, &lows);

    let report = ChanLunAnalyzer::new().analyze(&bars);
    assert_eq!(report.fractals.len(), 3);
    assert_eq!(report.fractals[0].kind, FractalType::Bottom);
    assert_eq!(report.fractals[1].kind, FractalType::Top);
    assert_eq!(report.fractals[2].kind, FractalType::Bottom);

    assert_eq!(report.strokes.len(), 2);
    assert_eq!(report.strokes[0].direction, StrokeDirection::Up);
    assert_eq!(report.strokes[1].direction, StrokeDirection::Down);

    assert!(report.pivots.is_empty());
    assert!(report.signals.is_empty());
    assert_eq!(report.trend, Some(TrendType::Consolidation));
    assert!(!report.divergence.has_divergence);
    assert_eq!(report.score, 50.0);
}

#[test]
fn report_invariants_hold_on_a_long_series() {
    let bars = zigzag_bars(48);
    let report = ChanLunAnalyzer::new().analyze(&bars);
    assert!(!report.fractals.is_empty());
    assert!(!report.strokes.is_empty());

    // Fractals: the three-bar extremum condition against the input bars.
    for fractal in &report.fractals {
        let i = fractal.index;
        assert!(i >= 1 && i + 1 < bars.len());
        match fractal.kind {
            FractalType::Top => {
                assert!(bars[i].high > bars[i - 1].high && bars[i].high > bars[i + 1].high);
                assert!(bars[i].low > bars[i - 1].low && bars[i].low > bars[i + 1].low);
                assert_eq!(fractal.price, bars[i].high);
            }
            FractalType::Bottom => {
                assert!(bars[i].low < bars[i - 1].low && bars[i].low < bars[i + 1].low);
                assert!(bars[i].high < bars[i - 1].high && bars[i].high < bars[i + 1].high);
                assert_eq!(fractal.price, bars[i].low);
            }
        }
    }

    // Filtered fractals never keep a dominated same-type neighbor.
    for pair in report.fractals.windows(2) {
        if pair[0].kind == pair[1].kind {
            match pair[0].kind {
                FractalType::Top => assert!(pair[1].price > pair[0].price),
                FractalType::Bottom => assert!(pair[1].price < pair[0].price),
            }
        }
    }

    // Strokes: opposite endpoint types, direction consistent, positive span.
    for stroke in &report.strokes {
        assert_ne!(stroke.start.kind, stroke.end.kind);
        match stroke.direction {
            StrokeDirection::Up => assert_eq!(stroke.start.kind, FractalType::Bottom),
            StrokeDirection::Down => assert_eq!(stroke.start.kind, FractalType::Top),
        }
        assert!(stroke.length > 0);
        assert!(stroke.strength >= 0.0);
    }

    // Pivots: proper interval, at least three strokes.
    for pivot in &report.pivots {
        assert!(pivot.high > pivot.low);
        assert!(pivot.stroke_count >= 3);
        assert!(pivot.end_stroke_index >= pivot.start_stroke_index + 2);
        assert!(pivot.contains((pivot.low + pivot.high) / 2.0));
    }

    // Signals: ascending bar index, sane confidence.
    for pair in report.signals.windows(2) {
        assert!(pair[0].index <= pair[1].index);
    }
    for signal in &report.signals {
        assert!(signal.confidence > 0.0 && signal.confidence <= 1.0);
        assert!(!signal.reason.is_empty());
    }

    assert!(report.trend.is_some());
    assert!((0.0..=100.0).contains(&report.score));
    assert!(report.summary.contains("strokes"));
}

#[test]
fn analysis_is_deterministic() {
    let bars = zigzag_bars(32);
    let analyzer = ChanLunAnalyzer::new();
    let first = analyzer.analyze(&bars);
    let second = analyzer.analyze(&bars);
    assert_eq!(first.fractals, second.fractals);
    assert_eq!(first.strokes, second.strokes);
    assert_eq!(first.pivots, second.pivots);
    assert_eq!(first.signals, second.signals);
    assert_eq!(first.score, second.score);
}

#[test]
fn report_serializes_to_json() {
    let bars = zigzag_bars(24);
    let report = ChanLunAnalyzer::new().analyze(&bars);
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"score\""));
    let round_tripped: crate::ChanLunReport = serde_json::from_str(&json).unwrap();
    assert_eq!(round_tripped.signals.len(), report.signals.len());
}
