use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::engine::PassLatency;
use crate::error::EngineError;

/// Observer pattern for pipeline telemetry. Called from the hot path, so
/// implementations must stay cheap.
pub trait MetricsObserver: Send + Sync {
    fn on_frame_received(&self);
    fn on_frame_dropped(&self);
    fn on_pass_completed(&self, latency: &PassLatency);
    fn on_pass_failed(&self, error: &EngineError);
}

/// Fans telemetry events out to every registered observer.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    observers: Vec<Arc<dyn MetricsObserver>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(mut self, observer: Arc<dyn MetricsObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn notify_frame_received(&self) {
        for observer in &self.observers {
            observer.on_frame_received();
        }
    }

    pub fn notify_frame_dropped(&self) {
        for observer in &self.observers {
            observer.on_frame_dropped();
        }
    }

    pub fn notify_pass_completed(&self, latency: &PassLatency) {
        for observer in &self.observers {
            observer.on_pass_completed(latency);
        }
    }

    pub fn notify_pass_failed(&self, error: &EngineError) {
        for observer in &self.observers {
            observer.on_pass_failed(error);
        }
    }
}

/// Snapshot of pipeline throughput and latency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub passes_completed: u64,
    pub passes_failed: u64,

    // EWMA timing per phase
    pub avg_bind_us: f32,
    pub avg_evaluate_us: f32,

    pub max_bind_us: u64,
    pub max_evaluate_us: u64,

    pub passes_per_second: f32,
}

impl PerformanceStats {
    pub fn drop_rate(&self) -> f32 {
        if self.frames_received == 0 {
            0.0
        } else {
            self.frames_dropped as f32 / self.frames_received as f32
        }
    }
}

struct LatencyWindow {
    avg_bind_us: f32,
    avg_evaluate_us: f32,
    max_bind_us: u64,
    max_evaluate_us: u64,
    passes_per_second: f32,
    window_started: Instant,
    window_passes: u64,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self {
            avg_bind_us: 0.0,
            avg_evaluate_us: 0.0,
            max_bind_us: 0,
            max_evaluate_us: 0,
            passes_per_second: 0.0,
            window_started: Instant::now(),
            window_passes: 0,
        }
    }
}

/// Counts frames and passes and keeps smoothed phase latencies.
#[derive(Default)]
pub struct PerformanceMonitor {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    passes_completed: AtomicU64,
    passes_failed: AtomicU64,
    latency: Mutex<LatencyWindow>,
}

const ALPHA: f32 = 0.1;

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> PerformanceStats {
        let latency = self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        PerformanceStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_failed: self.passes_failed.load(Ordering::Relaxed),
            avg_bind_us: latency.avg_bind_us,
            avg_evaluate_us: latency.avg_evaluate_us,
            max_bind_us: latency.max_bind_us,
            max_evaluate_us: latency.max_evaluate_us,
            passes_per_second: latency.passes_per_second,
        }
    }

    fn update_ewma(current: f32, new_value: u64, first: bool) -> f32 {
        if first {
            new_value as f32
        } else {
            current * (1.0 - ALPHA) + new_value as f32 * ALPHA
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl MetricsObserver for PerformanceMonitor {
    fn on_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    fn on_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn on_pass_completed(&self, latency: &PassLatency) {
        let completed = self.passes_completed.fetch_add(1, Ordering::Relaxed) + 1;
        let bind_us = micros(latency.bind);
        let evaluate_us = micros(latency.evaluate);
        debug!(
            "PerformanceMonitor: pass {} bind={}us eval={}us",
            completed, bind_us, evaluate_us
        );

        let mut window = self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        let first = completed == 1;
        window.avg_bind_us = Self::update_ewma(window.avg_bind_us, bind_us, first);
        window.avg_evaluate_us = Self::update_ewma(window.avg_evaluate_us, evaluate_us, first);
        window.max_bind_us = window.max_bind_us.max(bind_us);
        window.max_evaluate_us = window.max_evaluate_us.max(evaluate_us);

        window.window_passes += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(window.window_started);
        if elapsed.as_secs_f32() >= 1.0 {
            window.passes_per_second = window.window_passes as f32 / elapsed.as_secs_f32();
            window.window_passes = 0;
            window.window_started = now;
        }
    }

    fn on_pass_failed(&self, _error: &EngineError) {
        self.passes_failed.fetch_add(1, Ordering::Relaxed);
    }
}
