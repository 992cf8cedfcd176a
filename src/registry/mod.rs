//! Connection registry and reaper.
//!
//! The registry is the only structure shared between connections. It maps socket endpoints to
//! [`ConnectionHandle`]s; the session state behind a handle stays with the connection's worker.

mod handle;
mod reaper;
mod report;

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

pub use handle::{ConnectionActivity, ConnectionCommand, ConnectionHandle};
pub use reaper::{check_expiry, Expiry, Reaper, Timeouts};
pub use report::{ReportKind, TerminalReport};

#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<SocketAddr, Arc<ConnectionHandle>>,
    reports: broadcast::Sender<TerminalReport>,
}

impl ConnectionRegistry {
    pub fn new(report_capacity: usize) -> Self {
        let (reports, _) = broadcast::channel(report_capacity.max(1));
        ConnectionRegistry {
            connections: DashMap::new(),
            reports,
        }
    }

    pub fn insert(&self, handle: Arc<ConnectionHandle>) {
        debug!(peer = %handle.peer(), "connection registered");
        if let Some(previous) = self.connections.insert(handle.peer(), handle) {
            previous.close("replaced by a new connection from the same endpoint");
        }
    }

    /// Removes `handle`, leaving a newer connection registered under the same endpoint alone.
    pub fn remove(&self, handle: &ConnectionHandle) -> bool {
        let removed = self
            .connections
            .remove_if(&handle.peer(), |_, registered| {
                std::ptr::eq(registered.as_ref(), handle)
            })
            .is_some();
        if removed {
            debug!(peer = %handle.peer(), "connection deregistered");
        }
        removed
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(peer).map(|entry| entry.value().clone())
    }

    /// The newest open connection whose terminal id is `terminal_id`.
    pub fn find_by_terminal_id(&self, terminal_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .filter_map(|entry| {
                let activity = entry.value().activity();
                (activity.terminal_id.as_deref() == Some(terminal_id))
                    .then(|| (activity.connected_at, entry.value().clone()))
            })
            .max_by_key(|(connected_at, _)| *connected_at)
            .map(|(_, handle)| handle)
    }

    /// Clones every handle so callers can work without holding shard locks.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<TerminalReport> {
        self.reports.subscribe()
    }

    /// Publishes a terminal report; dropped when nobody is subscribed.
    pub fn publish_report(&self, report: TerminalReport) {
        if self.reports.send(report).is_err() {
            trace!("terminal report dropped, no subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::protocol::resource::FileUploadCompleted;
    use crate::session::ConnectionState;

    fn handle(port: u16, terminal_id: Option<&str>) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel(1);
        let handle = Arc::new(ConnectionHandle::new(
            SocketAddr::from(([127, 0, 0, 1], port)),
            tx,
            CancellationToken::new(),
        ));
        let mut activity = handle.activity();
        activity.terminal_id = terminal_id.map(str::to_string);
        activity.state = ConnectionState::Authenticated;
        handle.update_activity(activity);
        handle
    }

    #[tokio::test]
    async fn test_find_by_terminal_id() {
        let registry = ConnectionRegistry::new(8);
        registry.insert(handle(1, Some("T1")));
        registry.insert(handle(2, Some("T2")));
        registry.insert(handle(3, None));
        assert_eq!(registry.len(), 3);
        let found = registry.find_by_terminal_id("T2").unwrap();
        assert_eq!(found.peer().port(), 2);
        assert!(registry.find_by_terminal_id("T9").is_none());

        found.close("test");
        assert!(registry.find_by_terminal_id("T2").is_none());
        assert!(registry.remove(&found));
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_same_endpoint_replaces_and_closes_previous() {
        let registry = ConnectionRegistry::new(8);
        let first = handle(1, Some("T1"));
        registry.insert(first.clone());
        registry.insert(handle(1, Some("T1")));
        assert!(first.is_closed());
        assert!(!registry.remove(&first));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_reports_reach_subscribers() {
        let registry = ConnectionRegistry::new(8);
        registry.publish_report(TerminalReport::new(
            "T1",
            ReportKind::FileUploadCompleted(FileUploadCompleted {
                reply_serial: 1,
                result: 0,
            }),
        ));
        let mut rx = registry.subscribe_reports();
        registry.publish_report(TerminalReport::new(
            "T1",
            ReportKind::FileUploadCompleted(FileUploadCompleted {
                reply_serial: 2,
                result: 0,
            }),
        ));
        let report = rx.recv().await.unwrap();
        assert_eq!(
            report.kind,
            ReportKind::FileUploadCompleted(FileUploadCompleted {
                reply_serial: 2,
                result: 0
            })
        );
    }
}
