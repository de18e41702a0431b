//! Metrics hooks.
//!
//! Components report through a [`MetricsSink`]. Calls are fire-and-forget:
//! implementations must not block, and the core never inspects a result.

use std::time::Duration;

use tracing::trace;

/// Receives counters, gauges and latencies from the core.
pub trait MetricsSink: Send + Sync {
    /// Adds `value` to a counter.
    fn counter(&self, name: &'static str, value: u64);

    /// Sets a gauge.
    fn gauge(&self, name: &'static str, value: f64);

    /// Records a latency sample.
    fn latency(&self, name: &'static str, elapsed: Duration);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter(&self, _name: &'static str, _value: u64) {}

    fn gauge(&self, _name: &'static str, _value: f64) {}

    fn latency(&self, _name: &'static str, _elapsed: Duration) {}
}

/// Emits every report as a `trace!` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn counter(&self, name: &'static str, value: u64) {
        trace!(metric = name, value, "counter");
    }

    fn gauge(&self, name: &'static str, value: f64) {
        trace!(metric = name, value, "gauge");
    }

    fn latency(&self, name: &'static str, elapsed: Duration) {
        trace!(metric = name, micros = elapsed.as_micros() as u64, "latency");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sinks_are_object_safe() {
        let sinks: Vec<Arc<dyn MetricsSink>> = vec![Arc::new(NoopMetrics), Arc::new(TracingMetrics)];
        for sink in sinks {
            sink.counter("writes", 1);
            sink.gauge("usage", 0.5);
            sink.latency("load", Duration::from_millis(3));
        }
    }
}
