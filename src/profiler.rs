use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

#[derive(Clone, Debug)]
pub struct MethodTimingSummary {
    pub label: String,
    pub last_ms: f32,
    pub average_ms: f32,
    pub max_ms: f32,
    pub samples: u64,
}

#[derive(Default)]
struct MethodTiming {
    last_ms: f32,
    total_ms: f32,
    max_ms: f32,
    samples: u64,
}

/// Per-label timings of graph method invocations (`<asset-name>::<method-name>`).
#[derive(Default)]
pub struct ScriptProfiler {
    timings: Mutex<HashMap<String, MethodTiming>>,
}

impl ScriptProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope<'a>(&'a self, label: &'a str) -> ScriptProfileScope<'a> {
        ScriptProfileScope { label, profiler: self, start: Instant::now() }
    }

    fn record(&self, label: &str, duration: f32) {
        let mut timings = self.timings.lock();
        let entry = timings.entry(label.to_string()).or_default();
        entry.last_ms = duration;
        entry.max_ms = entry.max_ms.max(duration);
        entry.total_ms += duration;
        entry.samples += 1;
    }

    pub fn samples(&self, label: &str) -> u64 {
        self.timings.lock().get(label).map(|timing| timing.samples).unwrap_or(0)
    }

    pub fn summaries(&self) -> Vec<MethodTimingSummary> {
        let timings = self.timings.lock();
        let mut out = Vec::with_capacity(timings.len());
        for (label, timing) in timings.iter() {
            let avg = if timing.samples == 0 { 0.0 } else { timing.total_ms / timing.samples as f32 };
            out.push(MethodTimingSummary {
                label: label.clone(),
                last_ms: timing.last_ms,
                average_ms: avg,
                max_ms: timing.max_ms,
                samples: timing.samples,
            });
        }
        out.sort_by(|a, b| b.last_ms.partial_cmp(&a.last_ms).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    pub fn reset(&self) {
        self.timings.lock().clear();
    }
}

pub struct ScriptProfileScope<'a> {
    label: &'a str,
    profiler: &'a ScriptProfiler,
    start: Instant,
}

impl<'a> Drop for ScriptProfileScope<'a> {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_secs_f32() * 1000.0;
        self.profiler.record(self.label, duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_accumulate_samples_per_label() {
        let profiler = ScriptProfiler::new();
        for _ in 0..3 {
            let _scope = profiler.scope("Player::Tick");
        }
        {
            let _scope = profiler.scope("Player::Start");
        }
        assert_eq!(profiler.samples("Player::Tick"), 3);
        assert_eq!(profiler.samples("Player::Start"), 1);
        assert_eq!(profiler.summaries().len(), 2);
        profiler.reset();
        assert_eq!(profiler.samples("Player::Tick"), 0);
    }
}
