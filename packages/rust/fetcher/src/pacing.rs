//! Waiting between requests.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use novelpull_shared::PacingConfig;

/// What a pause is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    /// Before retrying a failed chapter.
    Backoff,
    /// Base inter-request delay after a success, scaled by the session multiplier.
    Pacing,
    /// Independent "reading time" after a success.
    Dwell,
}

/// Sleeps on behalf of the orchestrator. Swapped out in tests to count pauses.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, kind: PauseKind, duration: Duration);
}

/// Real sleeping with `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, _kind: PauseKind, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Backoff before retry number `retry_index` (0-based). The last entry repeats.
pub fn backoff_for(schedule: &[Duration], retry_index: usize) -> Duration {
    schedule
        .get(retry_index)
        .or_else(|| schedule.last())
        .copied()
        .unwrap_or(Duration::ZERO)
}

/// Draw the post-success pacing and dwell delays.
pub fn success_delays(config: &PacingConfig, multiplier: f64) -> (Duration, Duration) {
    let mut rng = rand::thread_rng();
    let base = draw(&mut rng, config.delay_ms);
    let dwell = draw(&mut rng, config.dwell_ms);
    (base.mul_f64(multiplier.max(1.0)), dwell)
}

fn draw(rng: &mut impl Rng, [min, max]: [u64; 2]) -> Duration {
    if max <= min {
        return Duration::from_millis(min);
    }
    Duration::from_millis(rng.gen_range(min..=max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_last_value_repeats() {
        let schedule = [Duration::from_millis(100), Duration::from_millis(500)];
        assert_eq!(backoff_for(&schedule, 0), Duration::from_millis(100));
        assert_eq!(backoff_for(&schedule, 1), Duration::from_millis(500));
        assert_eq!(backoff_for(&schedule, 7), Duration::from_millis(500));
        assert_eq!(backoff_for(&[], 0), Duration::ZERO);
    }

    #[test]
    fn success_delays_stay_in_window() {
        let config = PacingConfig {
            delay_ms: [100, 200],
            dwell_ms: [10, 20],
        };
        for _ in 0..100 {
            let (base, dwell) = success_delays(&config, 2.0);
            assert!(base >= Duration::from_millis(200) && base <= Duration::from_millis(400));
            assert!(dwell >= Duration::from_millis(10) && dwell <= Duration::from_millis(20));
        }
    }

    #[test]
    fn degenerate_window_is_fixed() {
        let config = PacingConfig {
            delay_ms: [0, 0],
            dwell_ms: [5, 5],
        };
        assert_eq!(
            success_delays(&config, 1.0),
            (Duration::ZERO, Duration::from_millis(5))
        );
    }
}
