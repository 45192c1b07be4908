use crate::types::{Fractal, FractalType, Stroke, StrokeDirection};

/// Pair consecutive opposite-type fractals into strokes. Same-type pairs can
/// still appear after filtering in edge cases; they are skipped rather than
/// treated as an error.
pub fn build_strokes(fractals: &[Fractal]) -> Vec<Stroke> {
    let mut strokes = Vec::new();

    for pair in fractals.windows(2) {
        let (start, end) = (&pair[0], &pair[1]);
        let direction = match (start.kind, end.kind) {
            (FractalType::Bottom, FractalType::Top) => StrokeDirection::Up,
            (FractalType::Top, FractalType::Bottom) => StrokeDirection::Down,
            _ => continue,
        };
        if start.price <= 0.0 {
            tracing::warn!(index = start.index, "skipping stroke with non-positive start price");
            continue;
        }
        strokes.push(Stroke {
            start: start.clone(),
            end: end.clone(),
            direction,
            strength: (end.price - start.price).abs() / start.price,
            length: end.index - start.index,
        });
    }
    strokes
}
