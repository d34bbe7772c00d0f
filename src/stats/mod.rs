//! Request statistics: recording, cumulative snapshots and console output.
mod histogram;
mod sink;
mod summary;


use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::DistributedError;

pub use histogram::{LatencyHistogram, Percentiles};
pub use sink::{ConsoleSink, StatsSink, StatsView};
pub use summary::{error_report_lines, stats_table_lines};

/// One completed request (or task) as reported by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub kind: String,
    pub name: String,
    pub latency: Duration,
    pub error: Option<String>,
}

impl RequestRecord {
    #[must_use]
    pub fn success(kind: &str, name: &str, latency: Duration) -> Self {
        Self {
            kind: kind.to_owned(),
            name: name.to_owned(),
            latency,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(kind: &str, name: &str, latency: Duration, error: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            name: name.to_owned(),
            latency,
            error: Some(error.to_owned()),
        }
    }
}

/// Cheap handle users record into; the owning runner drains the other end.
#[derive(Debug, Clone)]
pub struct StatsRecorder {
    tx: mpsc::UnboundedSender<RequestRecord>,
}

impl StatsRecorder {
    pub fn record(&self, record: RequestRecord) {
        if self.tx.send(record).is_err() {
            debug!("Stats receiver dropped; record discarded");
        }
    }
}

pub type StatsInbox = mpsc::UnboundedReceiver<RequestRecord>;

#[must_use]
pub fn stats_channel() -> (StatsRecorder, StatsInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StatsRecorder { tx }, rx)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct EntryKey {
    kind: String,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ErrorKey {
    kind: String,
    name: String,
    error: String,
}

/// Counters for one (kind, name) pair, or for the aggregate.
#[derive(Debug, Clone, Default)]
pub struct StatsEntry {
    pub num_requests: u64,
    pub num_failures: u64,
    pub total_ms: u64,
    pub min_ms: Option<u64>,
    pub max_ms: u64,
    histogram: Option<LatencyHistogram>,
}

impl StatsEntry {
    fn log(&mut self, latency_ms: u64, failed: bool) {
        self.num_requests = self.num_requests.saturating_add(1);
        if failed {
            self.num_failures = self.num_failures.saturating_add(1);
        }
        self.total_ms = self.total_ms.saturating_add(latency_ms);
        self.min_ms = Some(self.min_ms.map_or(latency_ms, |min| min.min(latency_ms)));
        self.max_ms = self.max_ms.max(latency_ms);
        if self.histogram.is_none() {
            match LatencyHistogram::new() {
                Ok(histogram) => self.histogram = Some(histogram),
                Err(err) => debug!("{}", err),
            }
        }
        if let Some(histogram) = self.histogram.as_mut()
            && let Err(err) = histogram.record(latency_ms)
        {
            debug!("{}", err);
        }
    }

    fn merge(&mut self, other: &StatsEntry) -> Result<(), DistributedError> {
        self.num_requests = self.num_requests.saturating_add(other.num_requests);
        self.num_failures = self.num_failures.saturating_add(other.num_failures);
        self.total_ms = self.total_ms.saturating_add(other.total_ms);
        self.min_ms = match (self.min_ms, other.min_ms) {
            (Some(left), Some(right)) => Some(left.min(right)),
            (left, right) => left.or(right),
        };
        self.max_ms = self.max_ms.max(other.max_ms);
        if let Some(other_hist) = other.histogram.as_ref() {
            match self.histogram.as_mut() {
                Some(hist) => hist.merge(other_hist)?,
                None => self.histogram = Some(other_hist.clone()),
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn avg_ms(&self) -> u64 {
        self.total_ms.checked_div(self.num_requests).unwrap_or(0)
    }

    #[must_use]
    pub fn percentiles(&self) -> Percentiles {
        self.histogram
            .as_ref()
            .map(LatencyHistogram::percentiles)
            .unwrap_or_default()
    }
}

/// Cumulative statistics for one process, or merged across workers.
#[derive(Debug, Clone, Default)]
pub struct RequestStats {
    entries: BTreeMap<EntryKey, StatsEntry>,
    errors: BTreeMap<ErrorKey, u64>,
    total: StatsEntry,
}

impl RequestStats {
    pub fn log(&mut self, record: &RequestRecord) {
        let latency_ms = u64::try_from(record.latency.as_millis()).unwrap_or(u64::MAX);
        let failed = record.error.is_some();
        self.entries
            .entry(EntryKey {
                kind: record.kind.clone(),
                name: record.name.clone(),
            })
            .or_default()
            .log(latency_ms, failed);
        self.total.log(latency_ms, failed);
        if let Some(error) = record.error.as_ref() {
            let count = self
                .errors
                .entry(ErrorKey {
                    kind: record.kind.clone(),
                    name: record.name.clone(),
                    error: error.clone(),
                })
                .or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    /// Drains every record currently queued in `inbox`.
    pub fn drain(&mut self, inbox: &mut StatsInbox) {
        while let Ok(record) = inbox.try_recv() {
            self.log(&record);
        }
    }

    #[must_use]
    pub const fn total(&self) -> &StatsEntry {
        &self.total
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.total.num_failures > 0
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &StatsEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.kind.as_str(), key.name.as_str(), entry))
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &str, &str, u64)> {
        self.errors.iter().map(|(key, count)| {
            (
                key.kind.as_str(),
                key.name.as_str(),
                key.error.as_str(),
                *count,
            )
        })
    }

    /// Serializable copy of the cumulative counters.
    ///
    /// # Errors
    ///
    /// Returns an error if a histogram cannot be serialized.
    pub fn snapshot(&self) -> Result<StatsSnapshot, DistributedError> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for (key, entry) in &self.entries {
            let histogram_b64 = match entry.histogram.as_ref() {
                Some(hist) => Some(hist.encode_base64()?),
                None => None,
            };
            entries.push(EntrySnapshot {
                kind: key.kind.clone(),
                name: key.name.clone(),
                num_requests: entry.num_requests,
                num_failures: entry.num_failures,
                total_ms: entry.total_ms,
                min_ms: entry.min_ms,
                max_ms: entry.max_ms,
                histogram_b64,
            });
        }
        let errors = self
            .errors
            .iter()
            .map(|(key, occurrences)| ErrorSnapshot {
                kind: key.kind.clone(),
                name: key.name.clone(),
                error: key.error.clone(),
                occurrences: *occurrences,
            })
            .collect();
        Ok(StatsSnapshot { entries, errors })
    }

    /// Adds a snapshot's counters to these statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if an embedded histogram cannot be decoded or merged.
    pub fn merge_snapshot(&mut self, snapshot: &StatsSnapshot) -> Result<(), DistributedError> {
        for item in &snapshot.entries {
            let histogram = match item.histogram_b64.as_deref() {
                Some(encoded) => Some(LatencyHistogram::decode_base64(encoded)?),
                None => None,
            };
            let incoming = StatsEntry {
                num_requests: item.num_requests,
                num_failures: item.num_failures,
                total_ms: item.total_ms,
                min_ms: item.min_ms,
                max_ms: item.max_ms,
                histogram,
            };
            self.entries
                .entry(EntryKey {
                    kind: item.kind.clone(),
                    name: item.name.clone(),
                })
                .or_default()
                .merge(&incoming)?;
            self.total.merge(&incoming)?;
        }
        for item in &snapshot.errors {
            let count = self
                .errors
                .entry(ErrorKey {
                    kind: item.kind.clone(),
                    name: item.name.clone(),
                    error: item.error.clone(),
                })
                .or_insert(0);
            *count = count.saturating_add(item.occurrences);
        }
        Ok(())
    }
}

/// Cumulative statistics of one worker as sent over the wire.
///
/// Each snapshot supersedes the previous one from the same worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub entries: Vec<EntrySnapshot>,
    pub errors: Vec<ErrorSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub kind: String,
    pub name: String,
    pub num_requests: u64,
    pub num_failures: u64,
    pub total_ms: u64,
    pub min_ms: Option<u64>,
    pub max_ms: u64,
    pub histogram_b64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSnapshot {
    pub kind: String,
    pub name: String,
    pub error: String,
    pub occurrences: u64,
}
