use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MAX_LATENCY_SAMPLES: usize = 1000;

#[derive(Debug, Clone)]
pub struct ExecutionMetrics {
    pub count: u64,
    pub total_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub latency_samples: Vec<Duration>,
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_latency: Duration::ZERO,
            min_latency: Duration::MAX,
            max_latency: Duration::ZERO,
            latency_samples: Vec::new(),
        }
    }

    pub fn record(&mut self, latency: Duration) {
        self.count += 1;
        self.total_latency += latency;
        self.min_latency = self.min_latency.min(latency);
        self.max_latency = self.max_latency.max(latency);

        self.latency_samples.push(latency);
        if self.latency_samples.len() > MAX_LATENCY_SAMPLES {
            self.latency_samples.remove(0);
        }
    }

    pub fn average_latency(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        self.total_latency / self.count as u32
    }

    pub fn percentile(&self, p: f64) -> Duration {
        if self.latency_samples.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted = self.latency_samples.clone();
        sorted.sort();

        let index = ((sorted.len() - 1) as f64 * p / 100.0) as usize;
        sorted[index]
    }

    pub fn p95(&self) -> Duration {
        self.percentile(95.0)
    }
}

/// Point-in-time copy of the driver counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub executions: u64,
    pub prepares: u64,
    pub errors: u64,
    pub buffer_regrowths: u64,
    pub uptime_secs: u64,
}

/// Per-driver counters, shared by every handle the driver opens.
pub struct Metrics {
    executions: Mutex<ExecutionMetrics>,
    prepares: AtomicU64,
    errors: AtomicU64,
    buffer_regrowths: AtomicU64,
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            executions: Mutex::new(ExecutionMetrics::new()),
            prepares: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            buffer_regrowths: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_execution(&self, latency: Duration) {
        if let Ok(mut m) = self.executions.lock() {
            m.record(latency);
        }
    }

    pub fn record_prepare(&self) {
        self.prepares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_regrowths(&self, n: u64) {
        if n > 0 {
            self.buffer_regrowths.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn execution_metrics(&self) -> ExecutionMetrics {
        self.executions
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            executions: self.execution_metrics().count,
            prepares: self.prepares.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            buffer_regrowths: self.buffer_regrowths.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}
