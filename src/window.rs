// Collection window bounds and the adaptive window-length ladder

use crate::config::validate_ladder;
use crate::error::PickerResult;
use chrono::Utc;
use std::time::Duration;

/// Backoff ladder of window lengths.
///
/// Level 0 is the normal window. An empty cycle moves one level up, saturating
/// at the last entry; a cycle with candidates drops back to level 0.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveLadder {
    levels: Vec<Duration>,
    level: usize,
}

impl AdaptiveLadder {
    pub fn new(levels: Vec<Duration>) -> PickerResult<Self> {
        validate_ladder(&levels)?;
        Ok(Self { levels, level: 0 })
    }

    /// Window length for the next cycle
    pub fn current(&self) -> Duration {
        self.levels[self.level]
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn max_level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn reset(&mut self) {
        self.level = 0;
    }

    pub fn advance(&mut self) {
        self.level = (self.level + 1).min(self.max_level());
    }
}

/// Inclusive event-time bounds of one collection cycle, in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub start: i64,
    pub deadline: i64,
}

impl EventWindow {
    /// Window opening at `start` and spanning `length` plus the broadcast delay margin
    pub fn new(start: i64, length: Duration, margin: Duration) -> Self {
        // Float-to-int casts saturate, so huge spans clamp instead of wrapping
        let span = length.saturating_add(margin).as_secs_f64().ceil() as i64;
        Self {
            start,
            deadline: start.saturating_add(span),
        }
    }

    /// Window opening now on the collector's clock
    pub fn starting_now(length: Duration, margin: Duration) -> Self {
        Self::new(Utc::now().timestamp(), length, margin)
    }

    pub fn contains(&self, event_time: i64) -> bool {
        event_time >= self.start && event_time <= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_ladder_validation() {
        assert!(AdaptiveLadder::new(vec![]).is_err());
        assert!(AdaptiveLadder::new(secs(&[10, 0])).is_err());
        assert!(AdaptiveLadder::new(secs(&[20, 10])).is_err());
        assert!(AdaptiveLadder::new(secs(&[10, 10, 40])).is_ok());
    }

    #[test]
    fn test_single_level_ladder_stays_saturated() {
        let mut ladder = AdaptiveLadder::new(secs(&[20])).unwrap();
        ladder.advance();
        assert_eq!(ladder.level(), 0);
        assert_eq!(ladder.current(), Duration::from_secs(20));
    }

    #[test]
    fn test_ladder_advances_and_resets() {
        let mut ladder = AdaptiveLadder::new(secs(&[10, 20, 40])).unwrap();
        ladder.advance();
        assert_eq!(ladder.level(), 1);
        ladder.advance();
        assert_eq!(ladder.level(), 2);
        assert_eq!(ladder.current(), Duration::from_secs(40));

        ladder.advance();
        assert_eq!(ladder.level(), 2);

        ladder.reset();
        assert_eq!(ladder.level(), 0);
        assert_eq!(ladder.current(), Duration::from_secs(10));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let window = EventWindow::new(1_000, Duration::from_secs(15), Duration::from_secs(4));
        assert_eq!(window.deadline, 1_019);

        assert!(window.contains(1_000));
        assert!(window.contains(1_019));
        assert!(!window.contains(999));
        assert!(!window.contains(1_020));
    }

    #[test]
    fn test_oversized_span_saturates() {
        let window = EventWindow::new(1_000, Duration::MAX, Duration::from_secs(4));
        assert_eq!(window.deadline, i64::MAX);
        assert!(window.contains(1_000));
    }

    #[test]
    fn test_ladder_rejects_levels_over_a_day() {
        assert!(AdaptiveLadder::new(secs(&[10, 86_400])).is_ok());
        assert!(AdaptiveLadder::new(secs(&[10, 86_401])).is_err());
        assert!(AdaptiveLadder::new(vec![Duration::from_secs_f64(1e19)]).is_err());
    }

    #[test]
    fn test_fractional_span_rounds_up() {
        let window = EventWindow::new(0, Duration::from_millis(1_500), Duration::ZERO);
        assert_eq!(window.deadline, 2);
    }
}
