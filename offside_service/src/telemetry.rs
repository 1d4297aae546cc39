use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

const DURATION_SEGMENTS_MS: &[(u64, u64)] = &[(100, 10), (500, 50), (2_000, 250), (10_000, 2_000)];

pub struct Metrics {
    request_counter: Counter<u64>,
    detection_duration: Histogram<u64>,
    verdict_counter: Counter<u64>,
    failure_counter: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("offside_service");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of upload requests")
            .build();

        let boundaries = generate_boundaries(10, DURATION_SEGMENTS_MS);

        let detection_duration = meter
            .u64_histogram("detection_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of detection and evaluation in milliseconds")
            .build();

        let verdict_counter = meter
            .u64_counter("verdicts_total")
            .with_description("Verdicts returned, by strategy and outcome")
            .build();

        let failure_counter = meter
            .u64_counter("strategy_failures_total")
            .with_description("Requests that ended in a detection or worker failure")
            .build();

        Ok(Metrics {
            request_counter,
            detection_duration,
            verdict_counter,
            failure_counter,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_detection_duration(&self, duration_ms: u64, strategy: &str) {
        let attributes = vec![KeyValue::new("strategy", strategy.to_string())];
        self.detection_duration.record(duration_ms, &attributes);
    }

    pub fn record_verdict(&self, strategy: &str, verdict: &str) {
        let attributes = vec![
            KeyValue::new("strategy", strategy.to_string()),
            KeyValue::new("verdict", verdict.to_string()),
        ];
        self.verdict_counter.add(1, &attributes);
    }

    pub fn record_failure(&self, strategy: &str, kind: &str) {
        let attributes = vec![
            KeyValue::new("strategy", strategy.to_string()),
            KeyValue::new("kind", kind.to_string()),
        ];
        self.failure_counter.add(1, &attributes);
    }
}

/// Histogram bucket edges from `start`, each `(end, step)` segment walking up
/// to `end` in `step` increments. Repeated edges are dropped.
fn generate_boundaries(start: u64, segments: &[(u64, u64)]) -> Vec<f64> {
    let mut boundaries = vec![start as f64];
    let mut from = start;

    for &(end, step) in segments {
        let mut edge = from;
        while edge + step <= end {
            edge += step;
            boundaries.push(edge as f64);
        }
        if edge != end && end > from {
            boundaries.push(end as f64);
        }
        from = end;
    }

    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let get = generate_boundaries(2, &[(22, 10), (26, 2), (46, 20), (146, 100)]);
        let expected = vec![2.0, 12.0, 22.0, 24.0, 26.0, 46.0, 146.0];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_generate_boundaries_closes_uneven_segments() {
        let get = generate_boundaries(0, &[(25, 10)]);

        assert_eq!(get, vec![0.0, 10.0, 20.0, 25.0]);
    }
}
