use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use research_core::LlmUsage;

/// Payload-sizing limits the orchestrator consults before assembling the LLM
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveLimits {
    pub max_filings: usize,
    pub news_limit: usize,
}

/// Sliding-window observer of LLM spend. When the windowed cost rate exceeds
/// the threshold, payload limits shrink until the rate drops back.
pub struct AdaptiveUsageMonitor {
    samples: Mutex<VecDeque<(Instant, f64)>>,
    window: Duration,
    cost_threshold_per_window: f64,
}

impl AdaptiveUsageMonitor {
    pub fn new(window: Duration, cost_threshold_per_window: f64) -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            window,
            cost_threshold_per_window,
        }
    }

    pub fn record(&self, usage: &LlmUsage) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push_back((Instant::now(), usage.total_cost));
        Self::evict(&mut samples, self.window);
    }

    pub fn window_cost(&self) -> f64 {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict(&mut samples, self.window);
        samples.iter().map(|(_, cost)| cost).sum()
    }

    /// Shrinks the defaults when the window is over budget: filings drop to
    /// one, the news list halves (never below two).
    pub fn adaptive_limits(&self, defaults: AdaptiveLimits) -> AdaptiveLimits {
        if self.window_cost() <= self.cost_threshold_per_window {
            return defaults;
        }
        AdaptiveLimits {
            max_filings: defaults.max_filings.min(1),
            news_limit: (defaults.news_limit / 2).max(2),
        }
    }

    fn evict(samples: &mut VecDeque<(Instant, f64)>, window: Duration) {
        let now = Instant::now();
        while let Some((ts, _)) = samples.front() {
            if now.duration_since(*ts) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for AdaptiveUsageMonitor {
    fn default() -> Self {
        // One-hour window, $5 ceiling before limits shrink.
        Self::new(Duration::from_secs(3600), 5.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_costing(total_cost: f64) -> LlmUsage {
        LlmUsage {
            total_cost,
            ..Default::default()
        }
    }

    #[test]
    fn limits_untouched_under_threshold() {
        let monitor = AdaptiveUsageMonitor::new(Duration::from_secs(60), 1.0);
        monitor.record(&usage_costing(0.2));
        let defaults = AdaptiveLimits {
            max_filings: 2,
            news_limit: 4,
        };
        assert_eq!(monitor.adaptive_limits(defaults), defaults);
    }

    #[test]
    fn limits_shrink_over_threshold() {
        let monitor = AdaptiveUsageMonitor::new(Duration::from_secs(60), 1.0);
        monitor.record(&usage_costing(0.8));
        monitor.record(&usage_costing(0.7));
        let limits = monitor.adaptive_limits(AdaptiveLimits {
            max_filings: 2,
            news_limit: 4,
        });
        assert_eq!(limits.max_filings, 1);
        assert_eq!(limits.news_limit, 2);
    }

    #[test]
    fn window_cost_sums_recent_samples() {
        let monitor = AdaptiveUsageMonitor::new(Duration::from_secs(60), 1.0);
        monitor.record(&usage_costing(0.25));
        monitor.record(&usage_costing(0.5));
        assert!((monitor.window_cost() - 0.75).abs() < 1e-9);
    }
}
