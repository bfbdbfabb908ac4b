//! A simple in-memory metrics recorder for testing.
//!
//! Counters are keyed by name and `type` label, e.g.
//! `alerting_notifications_sent_total{type=slack}`. The recorder is global to
//! the test binary, so each test should use a channel type of its own.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Debug, Clone, Default)]
pub struct TestMetrics {
    counters: Arc<Mutex<HashMap<String, u64>>>,
    histograms: Arc<Mutex<HashMap<String, Vec<f64>>>>,
}

/// Installs the recorder for this test binary on first use.
pub fn global() -> &'static TestMetrics {
    static METRICS: OnceLock<TestMetrics> = OnceLock::new();
    METRICS.get_or_init(|| {
        let metrics = TestMetrics::default();
        if metrics::set_global_recorder(metrics.clone()).is_err() {
            panic!("a metrics recorder is already installed");
        }
        metrics
    })
}

impl TestMetrics {
    pub fn get_counter(&self, name: &str, kind: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&series(name, kind))
            .cloned()
            .unwrap_or(0)
    }

    pub fn histogram_count(&self, name: &str, kind: &str) -> usize {
        self.histograms
            .lock()
            .unwrap()
            .get(&series(name, kind))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn series(name: &str, kind: &str) -> String {
    format!("{}{{type={}}}", name, kind)
}

fn key_series(key: &Key) -> String {
    let kind = key
        .labels()
        .find(|l| l.key() == "type")
        .map(|l| l.value().to_string())
        .unwrap_or_default();
    series(key.name(), &kind)
}

impl Recorder for TestMetrics {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata) -> Counter {
        Counter::from_arc(Arc::new(MetricCounter {
            series: key_series(key),
            counters: self.counters.clone(),
        }))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata) -> Histogram {
        Histogram::from_arc(Arc::new(MetricHistogram {
            series: key_series(key),
            histograms: self.histograms.clone(),
        }))
    }
}

#[derive(Debug)]
struct MetricCounter {
    series: String,
    counters: Arc<Mutex<HashMap<String, u64>>>,
}

impl metrics::CounterFn for MetricCounter {
    fn increment(&self, value: u64) {
        let mut counters = self.counters.lock().unwrap();
        *counters.entry(self.series.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.counters.lock().unwrap().insert(self.series.clone(), value);
    }
}

#[derive(Debug)]
struct MetricHistogram {
    series: String,
    histograms: Arc<Mutex<HashMap<String, Vec<f64>>>>,
}

impl metrics::HistogramFn for MetricHistogram {
    fn record(&self, value: f64) {
        self.histograms
            .lock()
            .unwrap()
            .entry(self.series.clone())
            .or_default()
            .push(value);
    }
}
