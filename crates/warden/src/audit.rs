//! Fire-and-forget audit records for script fetches.
//!
//! Every fetch a script performs leaves one record: the destination origin
//! and path (never the query string, which routinely carries tokens), the
//! response status and the duration. The sink contract is strictly
//! non-blocking - a slow or failing sink must never add latency or failure
//! coupling to policy evaluation.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

/// One audit record per fetch call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAuditRecord {
    /// Destination origin, e.g. `https://api.example.com`
    pub origin: String,
    /// Destination path, query stripped
    pub path: String,
    /// Response status, absent when the request failed before a response
    pub status: Option<u16>,
    /// Wall-clock duration of the request in milliseconds
    pub duration_ms: u64,
    /// Failure description when the request did not complete
    pub error: Option<String>,
}

/// Destination for fetch audit records.
///
/// `record` must not block and must not fail: implementations swallow their
/// own errors. Evaluation correctness never depends on auditing.
pub trait AuditSink: Send + Sync {
    /// Accept one record, best effort.
    fn record(&self, record: FetchAuditRecord);
}

/// Default sink: emits each record as a tracing event on the
/// `warden::audit` target.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: FetchAuditRecord) {
        tracing::info!(
            target: "warden::audit",
            origin = %record.origin,
            path = %record.path,
            status = record.status,
            duration_ms = record.duration_ms,
            error = record.error.as_deref(),
            "script fetch"
        );
    }
}

/// A sink that forwards records into a bounded channel drained by a
/// background task, decoupling evaluation latency from wherever the records
/// ultimately land.
///
/// When the queue is full the record is dropped and counted via tracing;
/// the calling invocation is never delayed.
#[derive(Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<FetchAuditRecord>,
}

impl fmt::Debug for ChannelAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAuditSink").finish_non_exhaustive()
    }
}

impl ChannelAuditSink {
    /// Create a sink with the given queue capacity, returning the receiver
    /// for the owner to drain.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<FetchAuditRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Spawn a drain task that forwards every queued record to `sink`.
    ///
    /// The task ends when all senders are dropped.
    pub fn spawn_drain(
        mut rx: mpsc::Receiver<FetchAuditRecord>,
        sink: impl AuditSink + 'static,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                sink.record(record);
            }
        })
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, record: FetchAuditRecord) {
        if self.tx.try_send(record).is_err() {
            tracing::debug!(target: "warden::audit", "audit queue full, record dropped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(path: &str) -> FetchAuditRecord {
        FetchAuditRecord {
            origin: "https://api.example.com".to_string(),
            path: path.to_string(),
            status: Some(200),
            duration_ms: 12,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_records() {
        let (sink, mut rx) = ChannelAuditSink::bounded(4);
        sink.record(record("/v1/advisories"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.path, "/v1/advisories");
        assert_eq!(received.status, Some(200));
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (sink, rx) = ChannelAuditSink::bounded(1);
        sink.record(record("/a"));
        // Queue is full now; this must return immediately without error.
        sink.record(record("/b"));

        drop(rx);
        // A closed channel must also be a no-op.
        sink.record(record("/c"));
    }

    #[tokio::test]
    async fn test_drain_forwards_to_inner_sink() {
        use std::sync::{Arc, Mutex};

        #[derive(Default)]
        struct Capture(Arc<Mutex<Vec<FetchAuditRecord>>>);
        impl AuditSink for Capture {
            fn record(&self, record: FetchAuditRecord) {
                if let Ok(mut records) = self.0.lock() {
                    records.push(record);
                }
            }
        }

        let captured = Arc::new(Mutex::new(Vec::new()));
        let (sink, rx) = ChannelAuditSink::bounded(4);
        let handle = ChannelAuditSink::spawn_drain(rx, Capture(captured.clone()));

        sink.record(record("/v1/scorecard"));
        drop(sink);
        handle.await.unwrap();

        let records = captured.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "/v1/scorecard");
    }
}
