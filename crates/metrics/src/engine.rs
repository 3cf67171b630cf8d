//! The aggregation engine.
//!
//! Every instrument operation becomes a [`Command`] on one unbounded queue.
//! A single thread drains the queue and owns the metric table, so records
//! are never touched concurrently and updates from one producer apply in the
//! order they were issued. Snapshot requests travel through the same queue;
//! a caller therefore always sees the updates it sent before asking.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
};

use {
    chrono::{DateTime, Utc},
    tokio::sync::{mpsc, oneshot},
    tracing::{debug, error, trace, warn},
};

use crate::{
    config::EngineConfig,
    error::{Error, Result},
    instrument::{Counter, Gauge, Timer},
    key,
    snapshot::{Metric, MetricType, Snapshot},
    tag::{Tag, merge_tags, sort_tags},
};

const THREAD_NAME: &str = "tally-engine";

/// How an update folds into its record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Op {
    /// Add to the value.
    Add(f64),
    /// Replace the value.
    Set(f64),
    /// Count one observation. The payload is informational only.
    Observe(f64),
}

/// One update handed from an instrument to the engine.
#[derive(Debug, Clone)]
pub(crate) struct Update {
    pub metric_type: MetricType,
    pub op: Op,
    pub key: Arc<str>,
    pub group: Option<Arc<str>>,
    pub name: Arc<str>,
    pub tags: Arc<[Tag]>,
    pub time: DateTime<Utc>,
}

#[derive(Debug)]
enum Command {
    Update(Update),
    State(oneshot::Sender<Vec<Metric>>),
    Close,
}

/// Handle to an aggregation engine.
///
/// Cloning is cheap; all clones (and every instrument made from them) feed
/// the same table. The consumer thread stops on [`Engine::close`] or when
/// the last handle is dropped.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    prefix: String,
    tags: Vec<Tag>,
    tx: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
    dropped: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
    frozen: Arc<Mutex<Vec<Metric>>>,
}

impl Engine {
    /// Start an engine and its consumer thread.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let EngineConfig { prefix, mut tags } = config;
        sort_tags(&mut tags);

        let (tx, rx) = mpsc::unbounded_channel();
        let frozen = Arc::new(Mutex::new(Vec::new()));
        let dropped = Arc::new(AtomicU64::new(0));

        let worker = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn({
                let frozen = Arc::clone(&frozen);
                let dropped = Arc::clone(&dropped);
                move || run(rx, frozen, dropped)
            })
            .map_err(|source| Error::Spawn { source })?;

        debug!(prefix = %prefix, tags = tags.len(), "metrics engine started");

        Ok(Self {
            inner: Arc::new(Inner {
                prefix,
                tags,
                tx,
                closed: AtomicBool::new(false),
                dropped,
                worker: Mutex::new(Some(worker)),
                frozen,
            }),
        })
    }

    /// Prefix applied to every metric name.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Engine-wide tags, sorted.
    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.inner.tags
    }

    #[must_use]
    pub fn counter(&self, name: &str, tags: &[Tag]) -> Counter {
        Counter::new(self, name, tags)
    }

    #[must_use]
    pub fn gauge(&self, name: &str, tags: &[Tag]) -> Gauge {
        Gauge::new(self, name, tags)
    }

    #[must_use]
    pub fn timer(&self, name: &str, tags: &[Tag]) -> Timer {
        Timer::new(self, name, tags)
    }

    /// Copy of every record.
    ///
    /// Reflects at least every update issued by this task before the call.
    /// After [`close`](Self::close) the final table is returned.
    pub async fn state(&self) -> Vec<Metric> {
        let (reply, rx) = oneshot::channel();
        if self.inner.tx.send(Command::State(reply)).is_ok()
            && let Ok(metrics) = rx.await
        {
            return metrics;
        }
        self.frozen()
    }

    /// Same as [`state`](Self::state) for synchronous callers.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_state(&self) -> Vec<Metric> {
        let (reply, rx) = oneshot::channel();
        if self.inner.tx.send(Command::State(reply)).is_ok()
            && let Ok(metrics) = rx.blocking_recv()
        {
            return metrics;
        }
        self.frozen()
    }

    /// [`state`](Self::state) wrapped with a capture time and sorted by key.
    pub async fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.state().await)
    }

    /// Drain pending updates, stop the consumer and freeze the table.
    ///
    /// Only the first call does anything.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.inner.tx.send(Command::Close);

        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker
            && worker.join().is_err()
        {
            error!("metrics engine thread panicked");
        }

        debug!(
            dropped = self.dropped_updates(),
            "metrics engine closed"
        );
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of updates discarded because the engine was closed.
    #[must_use]
    pub fn dropped_updates(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn send(&self, update: Update) {
        if self.is_closed() || self.inner.tx.send(Command::Update(update)).is_err() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("metrics engine closed, update dropped");
        }
    }

    pub(crate) fn qualify(&self, name: &str) -> String {
        key::qualify(&self.inner.prefix, name)
    }

    pub(crate) fn merge_tags(&self, call_site: &[Tag]) -> Vec<Tag> {
        merge_tags(&self.inner.tags, call_site)
    }

    fn frozen(&self) -> Vec<Metric> {
        self.inner
            .frozen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// The consumer loop.
fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    frozen: Arc<Mutex<Vec<Metric>>>,
    dropped: Arc<AtomicU64>,
) {
    let mut table = Table::default();

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Update(update) => table.apply(update),
            Command::State(reply) => {
                let _ = reply.send(table.copy());
            },
            Command::Close => break,
        }
    }

    let last = table.copy();
    *frozen.lock().unwrap_or_else(|e| e.into_inner()) = last.clone();

    // Producers that raced `close` may have queued behind the stop command.
    // Once the receiver is closed further sends fail and are counted by the
    // sender; whatever is already queued is counted here.
    rx.close();
    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Update(_) => {
                dropped.fetch_add(1, Ordering::Relaxed);
            },
            Command::State(reply) => {
                let _ = reply.send(last.clone());
            },
            Command::Close => {},
        }
    }

    debug!(records = table.len(), "metrics engine stopped");
}

/// The metric table, keyed by canonical identity.
#[derive(Debug, Default)]
pub(crate) struct Table {
    metrics: HashMap<Arc<str>, Metric>,
}

impl Table {
    pub(crate) fn apply(&mut self, update: Update) {
        if let Some(reason) = reject(&update) {
            warn!(key = %update.key, op = ?update.op, reason, "malformed metric update skipped");
            return;
        }

        if let Op::Observe(payload) = update.op {
            trace!(key = %update.key, payload, "histogram observation");
        }

        match self.metrics.get_mut(&update.key) {
            Some(metric) if metric.metric_type != update.metric_type => {
                error!(
                    key = %update.key,
                    existing = ?metric.metric_type,
                    incoming = ?update.metric_type,
                    "metric type conflict, update skipped"
                );
            },
            Some(metric) => {
                metric.value = match update.op {
                    Op::Add(delta) => metric.value + delta,
                    Op::Set(value) => value,
                    Op::Observe(_) => metric.value + 1.0,
                };
                metric.sample += 1;
                metric.time = update.time;
            },
            None => {
                let value = match update.op {
                    Op::Add(value) | Op::Set(value) => value,
                    Op::Observe(_) => 1.0,
                };
                let metric = Metric {
                    metric_type: update.metric_type,
                    key: update.key.to_string(),
                    group: update.group.as_deref().unwrap_or_default().to_string(),
                    name: update.name.to_string(),
                    tags: update.tags.to_vec(),
                    value,
                    sample: 1,
                    time: update.time,
                };
                self.metrics.insert(update.key, metric);
            },
        }
    }

    pub(crate) fn copy(&self) -> Vec<Metric> {
        self.metrics.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.metrics.len()
    }
}

fn reject(update: &Update) -> Option<&'static str> {
    match (update.metric_type, update.op) {
        (MetricType::Counter, Op::Add(delta)) if !delta.is_finite() || delta < 0.0 => {
            Some("counter delta must be finite and non-negative")
        },
        (MetricType::Counter, Op::Add(_)) => None,
        (MetricType::Gauge, Op::Add(value) | Op::Set(value)) if !value.is_finite() => {
            Some("gauge value must be finite")
        },
        (MetricType::Gauge, Op::Add(_) | Op::Set(_)) => None,
        (MetricType::Histogram, Op::Observe(_)) => None,
        _ => Some("operation does not match metric type"),
    }
}
