use market_core::Bar;

use crate::types::{Fractal, FractalType};

/// Raw fractal scan over bar positions `1..len-1`.
///
/// Position i is a top when both its high and its low exceed both
/// neighbors'; a bottom when both are below. Requiring high AND low keeps
/// inside bars from reading as pivots.
pub fn detect_fractals(bars: &[Bar]) -> Vec<Fractal> {
    let mut fractals = Vec::new();
    if bars.len() < 3 {
        return fractals;
    }

    for i in 1..bars.len() - 1 {
        let prev = &bars[i - 1];
        let current = &bars[i];
        let next = &bars[i + 1];

        let kind = if current.high > prev.high
            && current.high > next.high
            && current.low > prev.low
            && current.low > next.low
        {
            FractalType::Top
        } else if current.low < prev.low
            && current.low < next.low
            && current.high < prev.high
            && current.high < next.high
        {
            FractalType::Bottom
        } else {
            continue;
        };

        let price = match kind {
            FractalType::Top => current.high,
            FractalType::Bottom => current.low,
        };
        fractals.push(Fractal {
            index: i,
            date: current.date,
            kind,
            price,
            high: current.high,
            low: current.low,
            close: current.close,
        });
    }
    fractals
}

/// Collapse same-type runs to their extremum: a later top replaces the last
/// accepted top only when it is higher, a later bottom only when lower.
/// Opposite types always pass through.
pub fn filter_adjacent(fractals: Vec<Fractal>) -> Vec<Fractal> {
    let mut filtered: Vec<Fractal> = Vec::with_capacity(fractals.len());

    for fractal in fractals {
        match filtered.last_mut() {
            Some(last) if last.kind == fractal.kind => {
                let more_extreme = match fractal.kind {
                    FractalType::Top => fractal.price > last.price,
                    FractalType::Bottom => fractal.price < last.price,
                };
                if more_extreme {
                    *last = fractal;
                }
            }
            _ => filtered.push(fractal),
        }
    }
    filtered
}
