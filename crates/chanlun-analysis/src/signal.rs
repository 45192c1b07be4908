use crate::types::{
    CentralPivot, DivergenceKind, DivergenceReport, Fractal, Signal, SignalClass, Stroke,
    StrokeDirection, TrendType,
};

/// Dominance ratio for the trend vote over the final strokes. Tunable; 1.5
/// means one direction must outnumber the other by half again to win.
pub const TREND_DOMINANCE_RATIO: f64 = 1.5;
const TREND_WINDOW: usize = 5;
/// Only the final signals weigh into the score.
const SCORED_SIGNAL_WINDOW: usize = 10;
/// A later stroke must come in below this fraction of the prior stroke's
/// strength to count as divergent.
const DIVERGENCE_DECAY: f64 = 0.8;

fn signal_at(fractal: &Fractal, class: SignalClass, confidence: f64, reason: &str) -> Signal {
    Signal {
        index: fractal.index,
        date: fractal.date,
        price: fractal.price,
        class,
        confidence,
        reason: reason.to_string(),
    }
}

/// Classify buy/sell points around every pivot, sorted by bar index.
pub fn classify_signals(strokes: &[Stroke], pivots: &[CentralPivot]) -> Vec<Signal> {
    let mut signals = Vec::new();
    for pivot in pivots {
        first_class(strokes, pivot, &mut signals);
        second_class(strokes, pivot, &mut signals);
        third_class(strokes, pivot, &mut signals);
    }
    signals.sort_by_key(|s| s.index);
    signals
}

/// Class-1: trend reversal at the pivot exit. A buy needs the stroke into
/// the pivot to be down and the stroke out to be up; a sell only needs the
/// exit stroke to point down.
fn first_class(strokes: &[Stroke], pivot: &CentralPivot, out: &mut Vec<Signal>) {
    let Some(next) = strokes.get(pivot.end_stroke_index + 1) else {
        return;
    };

    if pivot.start_stroke_index > 0 {
        let prev = &strokes[pivot.start_stroke_index - 1];
        if prev.direction == StrokeDirection::Down && next.direction == StrokeDirection::Up {
            out.push(signal_at(
                &next.start,
                SignalClass::Buy1,
                0.8,
                "downtrend ended, upward break after pivot",
            ));
        }
    }

    if next.direction == StrokeDirection::Down {
        out.push(signal_at(
            &next.start,
            SignalClass::Sell1,
            0.8,
            "upward trend exhausted, downward break after pivot",
        ));
    }
}

/// Class-2: reversals inside the pivot's stroke range that respect the zone
/// edges. These fire within the oscillation, not at the exit.
fn second_class(strokes: &[Stroke], pivot: &CentralPivot, out: &mut Vec<Signal>) {
    for i in pivot.start_stroke_index..pivot.end_stroke_index {
        let Some(next) = strokes.get(i + 1) else {
            break;
        };
        let stroke = &strokes[i];

        if stroke.direction == StrokeDirection::Down
            && next.direction == StrokeDirection::Up
            && stroke.end.price > pivot.low
        {
            out.push(signal_at(
                &next.start,
                SignalClass::Buy2,
                0.6,
                "pullback holds above pivot support",
            ));
        } else if stroke.direction == StrokeDirection::Up
            && next.direction == StrokeDirection::Down
            && stroke.end.price < pivot.high
        {
            out.push(signal_at(
                &next.start,
                SignalClass::Sell2,
                0.6,
                "bounce fails below pivot resistance",
            ));
        }
    }
}

/// Class-3: breakout and retest. The stroke after the pivot must escape the
/// zone and the following stroke must pull back without re-entering it.
fn third_class(strokes: &[Stroke], pivot: &CentralPivot, out: &mut Vec<Signal>) {
    let Some(breakout) = strokes.get(pivot.end_stroke_index + 1) else {
        return;
    };
    let Some(retest) = strokes.get(pivot.end_stroke_index + 2) else {
        return;
    };

    if breakout.direction == StrokeDirection::Up
        && breakout.end.price > pivot.high
        && retest.direction == StrokeDirection::Down
        && retest.end.price > pivot.high
    {
        out.push(signal_at(
            &retest.end,
            SignalClass::Buy3,
            0.7,
            "upward breakout, pullback holds above pivot",
        ));
    } else if breakout.direction == StrokeDirection::Down
        && breakout.end.price < pivot.low
        && retest.direction == StrokeDirection::Up
        && retest.end.price < pivot.low
    {
        out.push(signal_at(
            &retest.end,
            SignalClass::Sell3,
            0.7,
            "downward breakout, bounce stays below pivot",
        ));
    }
}

/// Vote over the final strokes: a direction wins only with a clear majority.
pub fn trend_type(strokes: &[Stroke]) -> TrendType {
    if strokes.is_empty() {
        return TrendType::Consolidation;
    }
    let recent = &strokes[strokes.len().saturating_sub(TREND_WINDOW)..];
    let up = recent
        .iter()
        .filter(|s| s.direction == StrokeDirection::Up)
        .count() as f64;
    let down = recent.len() as f64 - up;

    if up > down * TREND_DOMINANCE_RATIO {
        TrendType::Up
    } else if down > up * TREND_DOMINANCE_RATIO {
        TrendType::Down
    } else {
        TrendType::Consolidation
    }
}

/// Momentum divergence over the last two strokes: same direction, a fresh
/// extreme, but clearly less strength than the stroke before.
pub fn divergence(strokes: &[Stroke]) -> DivergenceReport {
    let [.., prior, last] = strokes else {
        return DivergenceReport::default();
    };
    if last.direction != prior.direction || prior.strength <= 0.0 {
        return DivergenceReport::default();
    }

    let strength_delta = (last.strength - prior.strength).abs() / prior.strength;
    let weakening = last.strength < prior.strength * DIVERGENCE_DECAY;
    let (has, kind) = match last.direction {
        StrokeDirection::Up if last.end.price > prior.end.price && weakening => {
            (true, DivergenceKind::UpDivergence)
        }
        StrokeDirection::Down if last.end.price < prior.end.price && weakening => {
            (true, DivergenceKind::DownDivergence)
        }
        _ => (false, DivergenceKind::None),
    };
    DivergenceReport {
        has_divergence: has,
        kind,
        strength: strength_delta,
    }
}

/// Composite score on [0, 100]: trend direction, divergence (a down-side
/// divergence is bullish), and the balance of recent buy/sell points.
pub fn score(trend: TrendType, divergence: &DivergenceReport, signals: &[Signal]) -> f64 {
    let mut score: f64 = 50.0;

    match trend {
        TrendType::Up => score += 20.0,
        TrendType::Down => score -= 20.0,
        TrendType::Consolidation => {}
    }

    if divergence.has_divergence {
        match divergence.kind {
            DivergenceKind::DownDivergence => score += 15.0,
            DivergenceKind::UpDivergence => score -= 15.0,
            DivergenceKind::None => {}
        }
    }

    let recent = &signals[signals.len().saturating_sub(SCORED_SIGNAL_WINDOW)..];
    for signal in recent {
        if signal.class.is_buy() {
            score += 5.0;
        } else {
            score -= 5.0;
        }
    }

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FractalType;
    use chrono::NaiveDate;

    fn fractal(index: usize, kind: FractalType, price: f64) -> Fractal {
        Fractal {
            index,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(index as u64),
            kind,
            price,
            high: price,
            low: price,
            close: price,
        }
    }

    fn chain(prices: &[f64]) -> Vec<Stroke> {
        prices
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let up = pair[1] > pair[0];
                let (start_kind, end_kind) = if up {
                    (FractalType::Bottom, FractalType::Top)
                } else {
                    (FractalType::Top, FractalType::Bottom)
                };
                Stroke {
                    start: fractal(i * 2, start_kind, pair[0]),
                    end: fractal(i * 2 + 2, end_kind, pair[1]),
                    direction: if up { StrokeDirection::Up } else { StrokeDirection::Down },
                    strength: (pair[1] - pair[0]).abs() / pair[0],
                    length: 2,
                }
            })
            .collect()
    }

    fn pivot(low: f64, high: f64, start: usize, end: usize) -> CentralPivot {
        CentralPivot {
            high,
            low,
            start_stroke_index: start,
            end_stroke_index: end,
            level_label: "daily".to_string(),
            stroke_count: end - start + 1,
        }
    }

    #[test]
    fn class1_buy_after_downtrend_into_pivot() {
        // Down into the zone, oscillation, then an up stroke out. The up
        // stroke starts at price 10.
        let strokes = chain(&[16.0, 9.0, 11.0, 9.5, 10.8, 10.0, 14.0]);
        let pivots = vec![pivot(9.5, 10.8, 1, 4)];
        let signals = classify_signals(&strokes, &pivots);
        let buy1: Vec<_> = signals
            .iter()
            .filter(|s| s.class == SignalClass::Buy1)
            .collect();
        assert_eq!(buy1.len(), 1);
        assert_eq!(buy1[0].price, 10.0);
        assert_eq!(buy1[0].confidence, 0.8);
        assert_eq!(buy1[0].index, strokes[5].start.index);
    }

    #[test]
    fn class1_sell_when_exit_stroke_points_down() {
        let strokes = chain(&[8.0, 12.0, 9.0, 11.0, 10.0, 6.0]);
        let pivots = vec![pivot(9.0, 11.0, 0, 3)];
        let signals = classify_signals(&strokes, &pivots);
        assert!(signals.iter().any(|s| s.class == SignalClass::Sell1));
    }

    #[test]
    fn class2_buy_fires_inside_the_pivot_range() {
        // Within the zone [9,11]: a down stroke ending at 9.5 (above the
        // low) followed by an up stroke.
        let strokes = chain(&[8.0, 12.0, 9.5, 10.8, 9.6, 10.9]);
        let pivots = vec![pivot(9.0, 11.0, 0, 4)];
        let signals = classify_signals(&strokes, &pivots);
        assert!(signals.iter().any(|s| s.class == SignalClass::Buy2
            && s.confidence == 0.6));
    }

    #[test]
    fn class2_sell_on_failed_bounce() {
        let strokes = chain(&[12.0, 8.0, 10.5, 9.2, 10.4, 9.0]);
        let pivots = vec![pivot(9.0, 11.0, 0, 4)];
        let signals = classify_signals(&strokes, &pivots);
        assert!(signals.iter().any(|s| s.class == SignalClass::Sell2));
    }

    #[test]
    fn class3_buy_on_breakout_retest() {
        // Breakout above 11, retest down to 11.5 stays above the zone.
        let strokes = chain(&[8.0, 12.0, 9.0, 11.0, 9.5, 13.0, 11.5]);
        let pivots = vec![pivot(9.0, 11.0, 0, 3)];
        let signals = classify_signals(&strokes, &pivots);
        let buy3: Vec<_> = signals
            .iter()
            .filter(|s| s.class == SignalClass::Buy3)
            .collect();
        assert_eq!(buy3.len(), 1);
        assert_eq!(buy3[0].price, 11.5);
        assert_eq!(buy3[0].confidence, 0.7);
    }

    #[test]
    fn class3_requires_retest_to_hold() {
        // Retest falls back inside the zone: no class-3 point.
        let strokes = chain(&[8.0, 12.0, 9.0, 11.0, 9.5, 13.0, 10.5]);
        let pivots = vec![pivot(9.0, 11.0, 0, 3)];
        let signals = classify_signals(&strokes, &pivots);
        assert!(!signals.iter().any(|s| s.class == SignalClass::Buy3));
    }

    #[test]
    fn signals_sorted_by_bar_index() {
        let strokes = chain(&[16.0, 9.0, 11.0, 9.5, 10.8, 10.0, 14.0, 11.2]);
        let pivots = vec![pivot(9.5, 10.8, 1, 4)];
        let signals = classify_signals(&strokes, &pivots);
        for pair in signals.windows(2) {
            assert!(pair[0].index <= pair[1].index);
        }
    }

    #[test]
    fn trend_votes_over_final_five_strokes() {
        // 4 up vs 1 down in the final five.
        let up_heavy = chain(&[10.0, 12.0, 11.0, 13.0, 14.0, 15.0, 16.0]);
        // Strokes: up, down, up, up, up ... direction comes from deltas.
        assert_eq!(trend_type(&up_heavy), TrendType::Up);

        let down_heavy = chain(&[16.0, 14.0, 15.0, 12.0, 10.0, 8.0, 6.0]);
        assert_eq!(trend_type(&down_heavy), TrendType::Down);

        let mixed = chain(&[10.0, 12.0, 9.0, 11.0, 8.0]);
        assert_eq!(trend_type(&mixed), TrendType::Consolidation);

        assert_eq!(trend_type(&[]), TrendType::Consolidation);
    }

    #[test]
    fn divergence_requires_same_direction_and_decay() {
        // Two up strokes, later one reaches higher on much less strength.
        let mut strokes = chain(&[10.0, 13.0]);
        strokes.push(Stroke {
            start: fractal(4, FractalType::Bottom, 12.5),
            end: fractal(6, FractalType::Top, 13.1),
            direction: StrokeDirection::Up,
            strength: 0.048,
            length: 2,
        });
        let report = divergence(&strokes);
        assert!(report.has_divergence);
        assert_eq!(report.kind, DivergenceKind::UpDivergence);
        assert!(report.strength > 0.0);
    }

    #[test]
    fn no_divergence_on_opposite_directions() {
        let strokes = chain(&[10.0, 13.0, 11.0]);
        let report = divergence(&strokes);
        assert!(!report.has_divergence);
        assert_eq!(report.kind, DivergenceKind::None);
    }

    #[test]
    fn no_divergence_without_fresh_extreme() {
        // Same direction, weaker, but no new high.
        let mut strokes = chain(&[10.0, 13.0]);
        strokes.push(Stroke {
            start: fractal(4, FractalType::Bottom, 11.0),
            end: fractal(6, FractalType::Top, 12.0),
            direction: StrokeDirection::Up,
            strength: 0.05,
            length: 2,
        });
        assert!(!divergence(&strokes).has_divergence);
    }

    #[test]
    fn score_combines_trend_divergence_and_signals() {
        let no_signals: Vec<Signal> = Vec::new();
        let none = DivergenceReport::default();
        assert_eq!(score(TrendType::Consolidation, &none, &no_signals), 50.0);
        assert_eq!(score(TrendType::Up, &none, &no_signals), 70.0);
        assert_eq!(score(TrendType::Down, &none, &no_signals), 30.0);

        let bullish = DivergenceReport {
            has_divergence: true,
            kind: DivergenceKind::DownDivergence,
            strength: 0.5,
        };
        assert_eq!(score(TrendType::Up, &bullish, &no_signals), 85.0);

        let buys: Vec<Signal> = (0..12)
            .map(|i| Signal {
                index: i,
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                price: 10.0,
                class: SignalClass::Buy2,
                confidence: 0.6,
                reason: String::new(),
            })
            .collect();
        // Only the final ten count: 50 + 20 + 15 + 10 * 5 = 135, clamped.
        assert_eq!(score(TrendType::Up, &bullish, &buys), 100.0);
    }

    #[test]
    fn score_stays_in_bounds() {
        let sells: Vec<Signal> = (0..12)
            .map(|i| Signal {
                index: i,
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                price: 10.0,
                class: SignalClass::Sell1,
                confidence: 0.8,
                reason: String::new(),
            })
            .collect();
        let bearish = DivergenceReport {
            has_divergence: true,
            kind: DivergenceKind::UpDivergence,
            strength: 0.5,
        };
        assert_eq!(score(TrendType::Down, &bearish, &sells), 0.0);
    }
}
