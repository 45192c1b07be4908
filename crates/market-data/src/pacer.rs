use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BUDGET_WINDOW: Duration = Duration::from_secs(60);
const BUDGET_RESET_BUFFER: Duration = Duration::from_secs(1);

/// Pacing discipline enforced before every outbound call. State sits behind a
/// `tokio::sync::Mutex` held across the sleep, so concurrent callers on one
/// adapter queue up and the minimum spacing holds adapter-wide.
pub enum Pacer {
    Interval(IntervalPacer),
    Budget(BudgetPacer),
}

impl Pacer {
    /// Minimum-interval policy with uniform jitter in `[sleep_min, sleep_max]`.
    pub fn interval(sleep_min: Duration, sleep_max: Duration) -> Self {
        Pacer::Interval(IntervalPacer {
            sleep_min,
            sleep_max,
            last_request: Mutex::new(None),
        })
    }

    /// Fixed request budget per 60-second window.
    pub fn budget(per_minute: u32) -> Self {
        Pacer::Budget(BudgetPacer {
            per_minute,
            state: Mutex::new(BudgetState {
                count: 0,
                window_start: None,
            }),
        })
    }

    pub async fn wait(&self) {
        match self {
            Pacer::Interval(p) => p.wait().await,
            Pacer::Budget(p) => p.wait().await,
        }
    }
}

pub struct IntervalPacer {
    sleep_min: Duration,
    sleep_max: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl IntervalPacer {
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.sleep_min {
                tokio::time::sleep(self.sleep_min - elapsed).await;
            }
        }
        let jitter = {
            let mut rng = rand::rng();
            rng.random_range(self.sleep_min.as_secs_f64()..=self.sleep_max.as_secs_f64())
        };
        tokio::time::sleep(Duration::from_secs_f64(jitter)).await;
        *last = Some(Instant::now());
    }
}

struct BudgetState {
    count: u32,
    window_start: Option<Instant>,
}

pub struct BudgetPacer {
    per_minute: u32,
    state: Mutex<BudgetState>,
}

impl BudgetPacer {
    async fn wait(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let expired = match state.window_start {
            None => true,
            Some(start) => now.duration_since(start) >= BUDGET_WINDOW,
        };
        if expired {
            state.window_start = Some(now);
            state.count = 0;
        }

        if state.count >= self.per_minute {
            let start = state.window_start.unwrap_or(now);
            let remaining = BUDGET_WINDOW.saturating_sub(now.duration_since(start));
            let sleep_for = remaining + BUDGET_RESET_BUFFER;
            tracing::warn!(
                used = state.count,
                limit = self.per_minute,
                wait_secs = sleep_for.as_secs_f64(),
                "per-minute budget exhausted, waiting for next window"
            );
            tokio::time::sleep(sleep_for).await;
            state.window_start = Some(Instant::now());
            state.count = 0;
        }

        state.count += 1;
    }
}
