//! Bridge from the `metrics` facade into an [`Engine`].
//!
//! Code instrumented with `counter!`, `gauge!` and `histogram!` lands in the
//! same table as the native instruments. Facade labels become tags; labels
//! that are not valid tags are dropped with a warning.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    chrono::Utc,
    metrics::{
        Counter as FacadeCounter, CounterFn, Gauge as FacadeGauge, GaugeFn,
        Histogram as FacadeHistogram, HistogramFn, Key, KeyName, Metadata, Recorder,
        SharedString, Unit,
    },
    tracing::{info, warn},
};

use crate::{
    engine::Engine,
    error::{Error, Result},
    instrument::{Counter, Gauge, Series},
    tag::Tag,
};

/// `metrics::Recorder` that feeds an engine.
#[derive(Debug, Clone)]
pub struct EngineRecorder {
    engine: Engine,
}

impl EngineRecorder {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

/// Install an [`EngineRecorder`] as the process-wide `metrics` recorder.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_recorder(engine: Engine) -> Result<()> {
    metrics::set_global_recorder(EngineRecorder::new(engine))
        .map_err(|_| Error::RecorderInstalled)?;
    info!("metrics facade recorder installed");
    Ok(())
}

fn key_tags(key: &Key) -> Vec<Tag> {
    key.labels()
        .filter_map(|label| match Tag::new(label.key(), label.value()) {
            Ok(tag) => Some(tag),
            Err(e) => {
                warn!(metric = key.name(), error = %e, "metric label dropped");
                None
            },
        })
        .collect()
}

impl Recorder for EngineRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> FacadeCounter {
        let counter = self.engine.counter(key.name(), &key_tags(key));
        FacadeCounter::from_arc(Arc::new(CounterHandle {
            counter,
            last_absolute: AtomicU64::new(0),
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> FacadeGauge {
        let gauge = self.engine.gauge(key.name(), &key_tags(key));
        FacadeGauge::from_arc(Arc::new(GaugeHandle(gauge)))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> FacadeHistogram {
        let series = Series::new(&self.engine, key.name(), &key_tags(key));
        FacadeHistogram::from_arc(Arc::new(HistogramHandle {
            series,
            next: AtomicU64::new(0),
        }))
    }
}

struct CounterHandle {
    counter: Counter,
    last_absolute: AtomicU64,
}

impl CounterFn for CounterHandle {
    fn increment(&self, value: u64) {
        self.counter.add(value as f64);
    }

    /// Applies the rise above the highest absolute value seen so far.
    fn absolute(&self, value: u64) {
        let previous = self.last_absolute.fetch_max(value, Ordering::AcqRel);
        if value > previous {
            self.counter.add((value - previous) as f64);
        }
    }
}

struct GaugeHandle(Gauge);

impl GaugeFn for GaugeHandle {
    fn increment(&self, value: f64) {
        self.0.add(value);
    }

    fn decrement(&self, value: f64) {
        self.0.add(-value);
    }

    fn set(&self, value: f64) {
        self.0.set(value);
    }
}

/// Each `record` is one indexed sample in the histogram's group.
struct HistogramHandle {
    series: Series,
    next: AtomicU64,
}

impl HistogramFn for HistogramHandle {
    fn record(&self, value: f64) {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.series.observe(index, value, Utc::now());
    }
}
