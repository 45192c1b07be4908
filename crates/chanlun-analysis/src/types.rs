use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Local extremum across three adjacent bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractalType {
    Top,
    Bottom,
}

/// A top or bottom fractal. `price` is the high for tops and the low for
/// bottoms. `index` is the position in the bar sequence the fractal was
/// detected on; fractals are regenerated from scratch on every analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fractal {
    pub index: usize,
    pub date: NaiveDate,
    pub kind: FractalType,
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrokeDirection {
    Up,
    Down,
}

/// Directed segment between two adjacent fractals of opposite type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub start: Fractal,
    pub end: Fractal,
    pub direction: StrokeDirection,
    /// Relative magnitude: `|end.price - start.price| / start.price`.
    pub strength: f64,
    /// Bar count covered: `end.index - start.index`.
    pub length: usize,
}

impl Stroke {
    /// Smaller of the two endpoint prices.
    pub fn price_min(&self) -> f64 {
        self.start.price.min(self.end.price)
    }

    /// Larger of the two endpoint prices.
    pub fn price_max(&self) -> f64 {
        self.start.price.max(self.end.price)
    }
}

/// Consolidation range formed by the intersection of the overlaps of three
/// consecutive strokes, extended while later strokes stay inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentralPivot {
    pub high: f64,
    pub low: f64,
    pub start_stroke_index: usize,
    pub end_stroke_index: usize,
    pub level_label: String,
    pub stroke_count: usize,
}

impl CentralPivot {
    /// Closed-interval membership, the convention used both for seeding and
    /// for extension.
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalClass {
    Buy1,
    Buy2,
    Buy3,
    Sell1,
    Sell2,
    Sell3,
}

impl SignalClass {
    pub fn is_buy(&self) -> bool {
        matches!(self, SignalClass::Buy1 | SignalClass::Buy2 | SignalClass::Buy3)
    }
}

/// A classified buy/sell point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub index: usize,
    pub date: NaiveDate,
    pub price: f64,
    pub class: SignalClass,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendType {
    Up,
    Down,
    Consolidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceKind {
    UpDivergence,
    DownDivergence,
    None,
}

/// Momentum divergence between the last two same-direction strokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceReport {
    pub has_divergence: bool,
    pub kind: DivergenceKind,
    /// `|last.strength - prior.strength| / prior.strength` when the last two
    /// strokes share a direction, zero otherwise.
    pub strength: f64,
}

impl Default for DivergenceReport {
    fn default() -> Self {
        Self {
            has_divergence: false,
            kind: DivergenceKind::None,
            strength: 0.0,
        }
    }
}

/// Full analysis product for one bar sequence. All collections are derived
/// from the input on each run; nothing persists between invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChanLunReport {
    pub fractals: Vec<Fractal>,
    pub strokes: Vec<Stroke>,
    pub pivots: Vec<CentralPivot>,
    pub signals: Vec<Signal>,
    pub trend: Option<TrendType>,
    pub divergence: DivergenceReport,
    pub score: f64,
    pub summary: String,
    pub warnings: Vec<String>,
}

impl ChanLunReport {
    /// Best-effort empty result carrying only a warning, the contract for
    /// precondition violations.
    pub fn empty_with_warning(warning: impl Into<String>) -> Self {
        Self {
            warnings: vec![warning.into()],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fractals.is_empty() && self.strokes.is_empty() && self.signals.is_empty()
    }
}
