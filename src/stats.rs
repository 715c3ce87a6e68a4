//! Process-wide transform instrumentation.
//!
//! Timers are only read and counters only incremented while statistics are
//! enabled. Call [`reset`] before a run to start from zero; workers on any
//! thread may [`record`] concurrently.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Named elapsed-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Counter {
    FeatureHashApply = 0,
}

impl Counter {
    pub const ALL: [Counter; 1] = [Counter::FeatureHashApply];

    pub fn name(self) -> &'static str {
        match self {
            Counter::FeatureHashApply => "transform_feature_hashing_apply",
        }
    }
}

pub struct TransformStats {
    enabled: AtomicBool,
    nanos: [AtomicU64; Counter::ALL.len()],
}

impl TransformStats {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            nanos: [const { AtomicU64::new(0) }; Counter::ALL.len()],
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Zero every counter. Leaves the enabled flag alone.
    pub fn reset(&self) {
        for c in &self.nanos {
            c.store(0, Ordering::Relaxed);
        }
    }

    /// Start a timer if statistics are enabled.
    #[inline]
    pub fn start(&self) -> Option<Instant> {
        self.is_enabled().then(Instant::now)
    }

    /// Add the time elapsed since `t0` to `counter`. No-op for `None`.
    #[inline]
    pub fn record(&self, counter: Counter, t0: Option<Instant>) {
        if let Some(t0) = t0 {
            self.add(counter, t0.elapsed());
        }
    }

    pub fn add(&self, counter: Counter, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos[counter as usize].fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn elapsed(&self, counter: Counter) -> Duration {
        Duration::from_nanos(self.nanos[counter as usize].load(Ordering::Relaxed))
    }

    /// `(name, elapsed)` for every counter, in declaration order.
    pub fn snapshot(&self) -> Vec<(&'static str, Duration)> {
        Counter::ALL
            .iter()
            .map(|&c| (c.name(), self.elapsed(c)))
            .collect()
    }
}

impl Default for TransformStats {
    fn default() -> Self {
        Self::new()
    }
}

/// The counters every encoder in this process reports into.
pub static STATS: TransformStats = TransformStats::new();

pub fn set_enabled(enabled: bool) {
    STATS.set_enabled(enabled);
}

pub fn is_enabled() -> bool {
    STATS.is_enabled()
}

pub fn reset() {
    STATS.reset();
}

#[inline]
pub fn start() -> Option<Instant> {
    STATS.start()
}

#[inline]
pub fn record(counter: Counter, t0: Option<Instant>) {
    STATS.record(counter, t0);
}

pub fn snapshot() -> Vec<(&'static str, Duration)> {
    STATS.snapshot()
}

/// Held by tests that flip the process-wide flag, so they do not race.
#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_stats_do_not_time() {
        let stats = TransformStats::new();
        assert!(stats.start().is_none());
        stats.record(Counter::FeatureHashApply, stats.start());
        assert_eq!(stats.elapsed(Counter::FeatureHashApply), Duration::ZERO);
    }

    #[test]
    fn test_enabled_stats_accumulate_and_reset() {
        let stats = TransformStats::new();
        stats.set_enabled(true);
        stats.add(Counter::FeatureHashApply, Duration::from_nanos(150));
        stats.add(Counter::FeatureHashApply, Duration::from_nanos(50));
        assert_eq!(
            stats.snapshot(),
            vec![("transform_feature_hashing_apply", Duration::from_nanos(200))]
        );

        stats.reset();
        assert_eq!(stats.elapsed(Counter::FeatureHashApply), Duration::ZERO);
        assert!(stats.is_enabled());
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = TransformStats::new();
        stats.set_enabled(true);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        stats.add(Counter::FeatureHashApply, Duration::from_nanos(1));
                    }
                });
            }
        });
        assert_eq!(stats.elapsed(Counter::FeatureHashApply), Duration::from_nanos(8000));
    }
}
