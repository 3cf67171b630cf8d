//! In-process metrics aggregation.
//!
//! Counters, gauges and timers are handles bound to an [`Engine`]. Their
//! operations are queued to a single consumer that owns the metric table,
//! and [`Engine::state`] returns a copy of that table for an exporter to
//! ship wherever it likes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tally_metrics::{Engine, EngineConfig, Tag};
//!
//! let engine = Engine::new(
//!     EngineConfig::new("app").with_tag(Tag::new("host", "a1")?),
//! )?;
//!
//! engine.counter("requests", &[]).incr();
//! engine.gauge("sessions", &[]).set(42.0);
//!
//! let mut timer = engine.timer("render", &[]).start();
//! timer.stamp("layout");
//! timer.stop();
//!
//! let snapshot = engine.snapshot().await;
//! engine.close();
//! ```
//!
//! Identities follow `prefix.name?k1=v1&k2=v2`, with tags sorted by key;
//! timer samples append `#<index>` to their group identity.

mod config;
mod engine;
mod error;
mod instrument;
pub mod key;
mod recorder;
mod snapshot;
pub mod tag;

pub use {
    config::EngineConfig,
    engine::Engine,
    error::{Error, Result},
    instrument::{Counter, Gauge, Timer},
    recorder::{EngineRecorder, install_recorder},
    snapshot::{Metric, MetricType, Snapshot, sort_metrics},
    tag::Tag,
};
