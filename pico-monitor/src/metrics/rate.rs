//! Rolling publish success rate

use std::collections::VecDeque;

/// Outcomes remembered by default
pub const DEFAULT_WINDOW: usize = 20;

/// Success percentage over the last `window` publish outcomes
#[derive(Debug, Clone)]
pub struct SuccessRate {
    outcomes: VecDeque<bool>,
    window: usize,
}

impl SuccessRate {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            outcomes: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    /// 100.0 until the first outcome is recorded
    pub fn percent(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 100.0;
        }
        let successes = self.outcomes.iter().filter(|ok| **ok).count();
        successes as f64 / self.outcomes.len() as f64 * 100.0
    }

    /// Number of outcomes currently in the window
    pub fn samples(&self) -> usize {
        self.outcomes.len()
    }
}

impl Default for SuccessRate {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_reports_full_rate() {
        let rate = SuccessRate::default();
        assert_eq!(rate.percent(), 100.0);
        assert_eq!(rate.samples(), 0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut rate = SuccessRate::new(4);
        rate.record(false);
        rate.record(false);
        rate.record(true);
        rate.record(true);
        assert_eq!(rate.percent(), 50.0);

        rate.record(true);
        rate.record(true);
        assert_eq!(rate.samples(), 4);
        assert_eq!(rate.percent(), 100.0);
    }

    #[test]
    fn test_zero_window_is_clamped() {
        let mut rate = SuccessRate::new(0);
        rate.record(false);
        rate.record(true);
        assert_eq!(rate.samples(), 1);
        assert_eq!(rate.percent(), 100.0);
    }
}
