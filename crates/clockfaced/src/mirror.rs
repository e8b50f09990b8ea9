use crate::sink::{ReportSink, SinkError};
use clockface_core::{AttendanceEvent, ExportRow};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Clone-safe handle to the mirror worker.
///
/// `mirror` never waits: rows go onto a bounded queue and a background task
/// appends them to the sink. Failures are logged and dropped; the ledger is
/// the record of truth and is never touched from here.
#[derive(Clone)]
pub struct MirrorHandle {
    tx: mpsc::Sender<ExportRow>,
    enabled: bool,
}

impl MirrorHandle {
    /// Queue an already-committed event for the external sink.
    pub fn mirror(&self, event: &AttendanceEvent, employee_name: &str) {
        if !self.enabled {
            tracing::debug!(employee_id = %event.employee_id, "report sink disabled; not mirroring");
            return;
        }

        let row = ExportRow::from_event(event, employee_name);
        match self.tx.try_send(row) {
            Ok(()) => {}
            Err(TrySendError::Full(row)) => {
                tracing::warn!(
                    employee_id = %row.employee_id,
                    kind = %row.kind,
                    timestamp = %row.timestamp,
                    operation = "mirror",
                    "mirror queue full; row not sent to report sink"
                );
            }
            Err(TrySendError::Closed(row)) => {
                tracing::warn!(
                    employee_id = %row.employee_id,
                    kind = %row.kind,
                    timestamp = %row.timestamp,
                    operation = "mirror",
                    "mirror worker stopped; row not sent to report sink"
                );
            }
        }
    }
}

/// Spawn the mirror worker on the current runtime.
///
/// The worker exits once every `MirrorHandle` is dropped and the queue is
/// drained; await the returned `JoinHandle` to flush on shutdown.
pub fn spawn_mirror(
    sink: Arc<dyn ReportSink>,
    capacity: usize,
    timeout: Duration,
) -> (MirrorHandle, JoinHandle<()>) {
    let enabled = sink.is_enabled();
    let (tx, mut rx) = mpsc::channel::<ExportRow>(capacity.max(1));

    let worker = tokio::spawn(async move {
        tracing::info!(enabled, "mirror worker started");
        while let Some(row) = rx.recv().await {
            let result = match tokio::time::timeout(timeout, sink.append(&row)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(timeout)),
            };
            match result {
                Ok(()) => {
                    tracing::debug!(employee_id = %row.employee_id, kind = %row.kind, "row mirrored");
                }
                Err(err) => {
                    tracing::warn!(
                        employee_id = %row.employee_id,
                        kind = %row.kind,
                        timestamp = %row.timestamp,
                        operation = "mirror",
                        error = %err,
                        "report sink append failed; ledger entry kept"
                    );
                }
            }
        }
        tracing::info!("mirror worker exiting");
    });

    (MirrorHandle { tx, enabled }, worker)
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::sink::DisabledSink;
    use chrono::Utc;
    use clockface_core::AttendanceKind;

    fn event(seq: i64, id: &str) -> AttendanceEvent {
        AttendanceEvent {
            seq,
            employee_id: id.into(),
            kind: AttendanceKind::CheckIn,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rows_reach_sink_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let (handle, worker) = spawn_mirror(sink.clone(), 8, Duration::from_secs(1));
        handle.mirror(&event(1, "E1"), "Ada");
        handle.mirror(&event(2, "E2"), "Grace");
        drop(handle);
        worker.await.unwrap();

        let rows = sink.appended();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].employee_id, "E1");
        assert_eq!(rows[0].name, "Ada");
        assert_eq!(rows[1].employee_id, "E2");
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_worker() {
        let sink = Arc::new(RecordingSink::failing());
        let (handle, worker) = spawn_mirror(sink.clone(), 8, Duration::from_secs(1));
        handle.mirror(&event(1, "E1"), "Ada");
        handle.mirror(&event(2, "E2"), "Grace");
        drop(handle);
        worker.await.unwrap();
        assert!(sink.appended().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_sink_times_out() {
        let sink = Arc::new(RecordingSink::stalling(Duration::from_secs(30)));
        let (handle, worker) = spawn_mirror(sink.clone(), 8, Duration::from_millis(20));
        handle.mirror(&event(1, "E1"), "Ada");
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker should give up on a stalled sink")
            .unwrap();
        assert!(sink.appended().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let sink = Arc::new(RecordingSink::stalling(Duration::from_millis(50)));
        let (handle, worker) = spawn_mirror(sink.clone(), 1, Duration::from_secs(1));
        for i in 0..10 {
            handle.mirror(&event(i, "E1"), "Ada");
        }
        drop(handle);
        worker.await.unwrap();
        let appended = sink.appended().len();
        assert!((1..10).contains(&appended), "appended {appended}");
    }

    #[tokio::test]
    async fn test_disabled_sink_skips_queue() {
        let (handle, worker) = spawn_mirror(Arc::new(DisabledSink), 1, Duration::from_secs(1));
        for i in 0..5 {
            handle.mirror(&event(i, "E1"), "Ada");
        }
        drop(handle);
        worker.await.unwrap();
    }
}
