use crate::types::{CentralPivot, Stroke};

/// Overlap of two strokes' price extents: `[max(min), min(max)]`, or `None`
/// when degenerate. Boundaries are closed on both sides.
fn overlap(a: &Stroke, b: &Stroke) -> Option<(f64, f64)> {
    let low = a.price_min().max(b.price_min());
    let high = a.price_max().min(b.price_max());
    (high > low).then_some((low, high))
}

/// Scan the stroke sequence for central pivots.
///
/// A pivot seeds from three consecutive strokes whose pairwise overlaps
/// intersect in a non-degenerate interval, then extends over each following
/// stroke whose endpoints both lie inside the interval (closed bounds).
/// After emitting, the scan resumes at the pivot's last stroke so a trailing
/// stroke can seed the next zone.
pub fn build_pivots(strokes: &[Stroke]) -> Vec<CentralPivot> {
    let mut pivots = Vec::new();
    if strokes.len() < 3 {
        return pivots;
    }

    let mut i = 0;
    while i + 2 < strokes.len() {
        let Some(pivot) = try_build_at(strokes, i) else {
            i += 1;
            continue;
        };
        i = pivot.end_stroke_index;
        pivots.push(pivot);
    }
    pivots
}

fn try_build_at(strokes: &[Stroke], start: usize) -> Option<CentralPivot> {
    let (first, second, third) = (&strokes[start], &strokes[start + 1], &strokes[start + 2]);

    let (low1, high1) = overlap(first, second)?;
    let (low2, high2) = overlap(second, third)?;
    let low = low1.max(low2);
    let high = high1.min(high2);
    if high <= low {
        return None;
    }

    let mut end = start + 2;
    let mut stroke_count = 3;
    for (j, stroke) in strokes.iter().enumerate().skip(start + 3) {
        let inside = stroke.start.price >= low
            && stroke.start.price <= high
            && stroke.end.price >= low
            && stroke.end.price <= high;
        if !inside {
            break;
        }
        end = j;
        stroke_count += 1;
    }

    Some(CentralPivot {
        high,
        low,
        start_stroke_index: start,
        end_stroke_index: end,
        level_label: "daily".to_string(),
        stroke_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fractal, FractalType, StrokeDirection};
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

    /// Build a stroke chain from a price path: consecutive extremes, each
    /// stroke sharing its start with the previous end.
    pub(super) fn chain(prices: &[f64]) -> Vec<Stroke> {
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

    #[test]
    fn three_overlapping_strokes_seed_a_pivot() {
        // Ranges [8,12], [12,9], [9,11]: overlaps [9,12] and [9,11] -> [9,11].
        let strokes = chain(&[8.0, 12.0, 9.0, 11.0]);
        let pivots = build_pivots(&strokes);
        assert_eq!(pivots.len(), 1);
        let pivot = &pivots[0];
        assert_eq!(pivot.high, 11.0);
        assert_eq!(pivot.low, 9.0);
        assert_eq!(pivot.stroke_count, 3);
        assert_eq!(pivot.start_stroke_index, 0);
        assert_eq!(pivot.end_stroke_index, 2);
    }

    #[test]
    fn non_intersecting_overlaps_form_no_pivot() {
        // Pairwise overlaps are [10,12] and [6,8]; their intersection is
        // empty, so no zone forms.
        let strokes = chain(&[10.0, 12.0, 6.0, 8.0]);
        assert!(build_pivots(&strokes).is_empty());
    }

    #[test]
    fn contained_strokes_extend_the_pivot() {
        // Fourth and fifth strokes oscillate inside [9,11].
        let strokes = chain(&[8.0, 12.0, 9.0, 11.0, 9.5, 10.5, 15.0]);
        let pivots = build_pivots(&strokes);
        assert_eq!(pivots.len(), 1);
        let pivot = &pivots[0];
        assert_eq!(pivot.stroke_count, 5);
        assert_eq!(pivot.end_stroke_index, 4);
    }

    #[test]
    fn extension_boundary_is_closed() {
        // Fourth stroke touches the pivot edges exactly; inclusive bounds
        // keep it in the zone.
        let strokes = chain(&[8.0, 12.0, 9.0, 11.0, 9.0, 15.0]);
        let pivots = build_pivots(&strokes);
        assert_eq!(pivots[0].stroke_count, 4);
    }

    #[test]
    fn escaping_stroke_stops_extension() {
        // The fourth stroke breaks above the zone immediately.
        let strokes = chain(&[8.0, 12.0, 9.0, 11.0, 13.0]);
        let pivots = build_pivots(&strokes);
        assert_eq!(pivots[0].stroke_count, 3);
        assert_eq!(pivots[0].end_stroke_index, 2);
    }

    #[test]
    fn pivot_interval_is_always_proper() {
        let strokes = chain(&[8.0, 12.0, 9.0, 11.0, 9.5, 10.5, 8.2, 12.5, 9.1, 11.2]);
        for pivot in build_pivots(&strokes) {
            assert!(pivot.high > pivot.low);
            assert!(pivot.stroke_count >= 3);
        }
    }

    #[test]
    fn scan_resumes_at_pivot_end() {
        // First pivot over [9,11]; the escape stroke then seeds a second
        // zone higher up.
        let strokes = chain(&[8.0, 12.0, 9.0, 11.0, 9.5, 14.0, 12.5, 13.8, 12.8]);
        let pivots = build_pivots(&strokes);
        assert_eq!(pivots.len(), 2);
        assert!(pivots[1].low > pivots[0].high);
    }
}
