//! Counter, gauge and timer handles.
//!
//! Each handle binds a qualified name and a sorted tag set to an engine.
//! Identity is encoded once at creation; operations only enqueue updates
//! and never wait on the engine.

use std::{collections::HashMap, sync::Arc};

use {
    chrono::{DateTime, TimeDelta, Utc},
    tracing::warn,
};

use crate::{
    engine::{Engine, Op, Update},
    key::{STAMP_TAG, TOTAL_STAMP, encode_sorted, sample_key},
    snapshot::MetricType,
    tag::{Tag, merge_tags},
};

/// Name, tags and precomputed key of one series.
#[derive(Debug, Clone)]
pub(crate) struct Series {
    engine: Engine,
    name: Arc<str>,
    tags: Arc<[Tag]>,
    key: Arc<str>,
}

impl Series {
    pub(crate) fn new(engine: &Engine, name: &str, tags: &[Tag]) -> Self {
        let name = engine.qualify(name);
        let tags = engine.merge_tags(tags);
        let key = encode_sorted(&name, &tags);
        Self {
            engine: engine.clone(),
            name: Arc::from(name),
            tags: Arc::from(tags),
            key: Arc::from(key),
        }
    }

    fn with_tags(&self, extra: &[Tag]) -> Self {
        let tags = merge_tags(&self.tags, extra);
        let key = encode_sorted(&self.name, &tags);
        Self {
            engine: self.engine.clone(),
            name: Arc::clone(&self.name),
            tags: Arc::from(tags),
            key: Arc::from(key),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    fn send(&self, metric_type: MetricType, op: Op, time: DateTime<Utc>) {
        self.engine.send(Update {
            metric_type,
            op,
            key: Arc::clone(&self.key),
            group: None,
            name: Arc::clone(&self.name),
            tags: Arc::clone(&self.tags),
            time,
        });
    }

    /// Send one histogram sample. The series key is the group identity.
    pub(crate) fn observe(&self, index: u64, payload: f64, time: DateTime<Utc>) {
        self.engine.send(Update {
            metric_type: MetricType::Histogram,
            op: Op::Observe(payload),
            key: Arc::from(sample_key(&self.key, index)),
            group: Some(Arc::clone(&self.key)),
            name: Arc::clone(&self.name),
            tags: Arc::clone(&self.tags),
            time,
        });
    }
}

/// Monotonically increasing count.
#[derive(Debug, Clone)]
pub struct Counter {
    series: Series,
}

impl Counter {
    #[must_use]
    pub fn new(engine: &Engine, name: &str, tags: &[Tag]) -> Self {
        Self {
            series: Series::new(engine, name, tags),
        }
    }

    pub fn incr(&self) {
        self.add(1.0);
    }

    /// Add `delta`. Negative or non-finite deltas are discarded by the engine.
    pub fn add(&self, delta: f64) {
        self.series.send(MetricType::Counter, Op::Add(delta), Utc::now());
    }

    /// Same counter name with extra tags; a distinct series.
    #[must_use]
    pub fn with_tags(&self, tags: &[Tag]) -> Self {
        Self {
            series: self.series.with_tags(tags),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        self.series.key()
    }
}

/// Last-write-wins value.
#[derive(Debug, Clone)]
pub struct Gauge {
    series: Series,
}

impl Gauge {
    #[must_use]
    pub fn new(engine: &Engine, name: &str, tags: &[Tag]) -> Self {
        Self {
            series: Series::new(engine, name, tags),
        }
    }

    pub fn set(&self, value: f64) {
        self.series.send(MetricType::Gauge, Op::Set(value), Utc::now());
    }

    pub fn add(&self, delta: f64) {
        self.series.send(MetricType::Gauge, Op::Add(delta), Utc::now());
    }

    pub fn incr(&self) {
        self.add(1.0);
    }

    pub fn decr(&self) {
        self.add(-1.0);
    }

    #[must_use]
    pub fn with_tags(&self, tags: &[Tag]) -> Self {
        Self {
            series: self.series.with_tags(tags),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        self.series.key()
    }
}

/// Measures laps and a total duration from a start instant.
///
/// Every [`stamp_at`](Self::stamp_at) adds an indexed sample to the group
/// tagged `stamp=<label>`; [`stop_at`](Self::stop_at) adds one to the group
/// tagged `stamp=total` and consumes the timer.
#[derive(Debug)]
pub struct Timer {
    series: Series,
    start: DateTime<Utc>,
    laps: HashMap<String, Lap>,
}

#[derive(Debug)]
struct Lap {
    series: Series,
    next: u64,
}

impl Timer {
    /// Create a timer started now.
    #[must_use]
    pub fn new(engine: &Engine, name: &str, tags: &[Tag]) -> Self {
        Self {
            series: Series::new(engine, name, tags),
            start: Utc::now(),
            laps: HashMap::new(),
        }
    }

    #[must_use]
    pub fn start_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub fn start(self) -> Self {
        self.start_at(Utc::now())
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.start
    }

    /// Time since the start instant.
    #[must_use]
    pub fn elapsed(&self) -> TimeDelta {
        Utc::now() - self.start
    }

    /// Record a lap ending at `at`. The start instant is kept.
    pub fn stamp_at(&mut self, label: &str, at: DateTime<Utc>) {
        self.record(label, at);
    }

    pub fn stamp(&mut self, label: &str) {
        self.stamp_at(label, Utc::now());
    }

    /// Record the total duration ending at `at`.
    pub fn stop_at(mut self, at: DateTime<Utc>) {
        self.record(TOTAL_STAMP, at);
    }

    pub fn stop(self) {
        self.stop_at(Utc::now());
    }

    #[must_use]
    pub fn with_tags(&self, tags: &[Tag]) -> Self {
        Self {
            series: self.series.with_tags(tags),
            start: self.start,
            laps: HashMap::new(),
        }
    }

    fn record(&mut self, label: &str, at: DateTime<Utc>) {
        if !self.laps.contains_key(label) {
            let stamp = match Tag::new(STAMP_TAG, label) {
                Ok(stamp) => stamp,
                Err(e) => {
                    warn!(error = %e, "timer stamp dropped");
                    return;
                },
            };
            self.laps.insert(label.to_string(), Lap {
                series: self.series.with_tags(&[stamp]),
                next: 0,
            });
        }

        let elapsed = elapsed_seconds(self.start, at);
        let Some(lap) = self.laps.get_mut(label) else {
            return;
        };
        lap.series.observe(lap.next, elapsed, at);
        lap.next += 1;
    }
}

/// Seconds from `start` to `at`, negative when `at` comes first. Spans too
/// large for microsecond precision saturate toward their sign.
fn elapsed_seconds(start: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    let delta = at.signed_duration_since(start);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None if delta < TimeDelta::zero() => f64::MIN,
        None => f64::MAX,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, snapshot::sort_metrics};

    fn engine() -> Engine {
        Engine::new(EngineConfig::new("test").with_tag(Tag::new("hello", "world").unwrap()))
            .unwrap()
    }

    #[test]
    fn test_counter_keys_merge_engine_tags() {
        let engine = engine();
        assert_eq!(engine.counter("A", &[]).key(), "test.A?hello=world");

        let c = engine.counter("C", &[Tag::new("context", "test").unwrap()]);
        assert_eq!(c.key(), "test.C?context=test&hello=world");
        assert_eq!(
            c.with_tags(&[Tag::new("zone", "b").unwrap()]).key(),
            "test.C?context=test&hello=world&zone=b"
        );
        engine.close();
    }

    #[tokio::test]
    async fn test_gauge_incr_and_decr_are_additive() {
        let engine = engine();
        let g = engine.gauge("inflight", &[]);
        g.set(10.0);
        g.incr();
        g.incr();
        g.decr();
        g.add(-0.5);

        let metrics = engine.state().await;
        assert_eq!(metrics[0].value, 10.5);
        assert_eq!(metrics[0].sample, 5);
        engine.close();
    }

    #[tokio::test]
    async fn test_counter_rejects_negative_delta() {
        let engine = engine();
        let c = engine.counter("A", &[]);
        c.add(3.0);
        c.add(-1.0);

        let metrics = engine.state().await;
        assert_eq!(metrics[0].value, 3.0);
        assert_eq!(metrics[0].sample, 1);
        engine.close();
    }

    #[tokio::test]
    async fn test_timer_indexes_samples_per_label() {
        let engine = engine();
        let start = Utc::now();
        let mut t = engine.timer("D", &[]).start_at(start);
        assert_eq!(t.started_at(), start);

        t.stamp_at("parse", start + TimeDelta::milliseconds(5));
        t.stamp_at("lap", start + TimeDelta::seconds(1));
        t.stamp_at("parse", start + TimeDelta::milliseconds(7));
        t.stamp_at("lap", start + TimeDelta::seconds(2));
        t.stop_at(start + TimeDelta::seconds(3));

        let mut metrics = engine.state().await;
        sort_metrics(&mut metrics);
        let keys: Vec<_> = metrics.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec![
            "test.D?hello=world&stamp=lap#0",
            "test.D?hello=world&stamp=lap#1",
            "test.D?hello=world&stamp=parse#0",
            "test.D?hello=world&stamp=parse#1",
            "test.D?hello=world&stamp=total#0",
        ]);

        let total = &metrics[4];
        assert_eq!(total.group, "test.D?hello=world&stamp=total");
        assert_eq!(total.time, start + TimeDelta::seconds(3));
        assert!(metrics.iter().all(|m| m.value == 1.0 && m.sample == 1));
        engine.close();
    }

    #[test]
    fn test_elapsed_seconds_keeps_sign() {
        let start = Utc::now();
        assert_eq!(elapsed_seconds(start, start + TimeDelta::milliseconds(1500)), 1.5);
        assert_eq!(elapsed_seconds(start, start - TimeDelta::seconds(2)), -2.0);

        let (min, max) = (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC);
        assert_eq!(elapsed_seconds(max, min), f64::MIN);
        assert_eq!(elapsed_seconds(min, max), f64::MAX);
    }

    #[tokio::test]
    async fn test_timer_drops_invalid_label() {
        let engine = engine();
        let mut t = engine.timer("D", &[]);
        t.stamp("a&b");
        t.stamp("ok");

        let metrics = engine.state().await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].key, "test.D?hello=world&stamp=ok#0");
        engine.close();
    }

    #[tokio::test]
    async fn test_separate_timers_share_sample_slots() {
        let engine = engine();
        engine.timer("D", &[]).stop();
        engine.timer("D", &[]).stop();

        let metrics = engine.state().await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].value, 2.0);
        assert_eq!(metrics[0].sample, 2);
        engine.close();
    }
}
