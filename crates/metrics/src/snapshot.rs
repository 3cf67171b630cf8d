//! Point-in-time copies of the engine's metric table.
//!
//! Records are copied verbatim; aggregation and filtering for a particular
//! backend is left to whoever consumes the snapshot.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::tag::Tag;

/// Type of metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// One record of the metric table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// The metric type
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Canonical identity, including the `#<index>` suffix for histogram samples
    pub key: String,
    /// Identity shared by all samples of a histogram series (empty otherwise)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Prefixed metric name
    pub name: String,
    /// Sorted tag set
    pub tags: Vec<Tag>,
    /// Accumulated or last-set value
    pub value: f64,
    /// Number of updates folded into this record
    pub sample: u64,
    /// Time of the last update
    pub time: DateTime<Utc>,
}

/// A timestamped copy of every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the copy was taken
    pub timestamp: DateTime<Utc>,
    /// All records, ordered by key
    pub metrics: Vec<Metric>,
}

impl Snapshot {
    #[must_use]
    pub fn new(mut metrics: Vec<Metric>) -> Self {
        sort_metrics(&mut metrics);
        Self {
            timestamp: Utc::now(),
            metrics,
        }
    }

    /// Look up a record by its key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Metric> {
        self.metrics
            .binary_search_by(|m| m.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.metrics[i])
    }

    /// All samples belonging to a histogram group, in key order.
    pub fn group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a Metric> + 'a {
        self.metrics.iter().filter(move |m| m.group == group)
    }

    /// Serialize as JSON for exporters that speak it.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Order records by key.
pub fn sort_metrics(metrics: &mut [Metric]) {
    metrics.sort_by(|a, b| a.key.cmp(&b.key));
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn metric(key: &str, group: &str) -> Metric {
        Metric {
            metric_type: if group.is_empty() {
                MetricType::Counter
            } else {
                MetricType::Histogram
            },
            key: key.to_string(),
            group: group.to_string(),
            name: "m".to_string(),
            tags: Vec::new(),
            value: 1.0,
            sample: 1,
            time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_snapshot_sorts_and_looks_up() {
        let snapshot = Snapshot::new(vec![
            metric("m?b", ""),
            metric("m?a#1", "m?a"),
            metric("m?a#0", "m?a"),
        ]);

        let keys: Vec<_> = snapshot.metrics.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["m?a#0", "m?a#1", "m?b"]);
        assert_eq!(snapshot.get("m?b").unwrap().key, "m?b");
        assert!(snapshot.get("m?c").is_none());
        assert_eq!(snapshot.group("m?a").count(), 2);
    }

    #[test]
    fn test_json_uses_lowercase_type_and_omits_empty_group() {
        let snapshot = Snapshot::new(vec![metric("m?", ""), metric("h?#0", "h?")]);
        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();

        let metrics = json["metrics"].as_array().unwrap();
        assert_eq!(metrics[0]["type"], "histogram");
        assert_eq!(metrics[0]["group"], "h?");
        assert_eq!(metrics[1]["type"], "counter");
        assert!(metrics[1].get("group").is_none());
    }

    #[test]
    fn test_metric_round_trips_through_json() {
        let original = metric("m?a#0", "m?a");
        let text = serde_json::to_string(&original).unwrap();
        let back: Metric = serde_json::from_str(&text).unwrap();
        assert_eq!(back, original);
    }
}
