//! Session state
//!
//! The session is the triple of cluster tracker, traffic manager handle and
//! bridge for the one active connection. Only the connection state machine
//! writes it; everyone else reads cheap snapshots.

use clusterlink_proto::{SessionPhase, SessionStatus};
use std::sync::{Arc, PoisonError, RwLock};

use crate::bridge::Bridge;
use crate::cluster::ClusterTracker;
use crate::coordinator::TrafficCoordinator;

/// Snapshot of the session's components
#[derive(Clone, Default)]
pub struct Session {
    pub cluster: Option<Arc<dyn ClusterTracker>>,
    pub coordinator: Option<Arc<dyn TrafficCoordinator>>,
    pub bridge: Option<Arc<dyn Bridge>>,
}

impl Session {
    pub fn phase(&self) -> SessionPhase {
        match (&self.cluster, &self.coordinator, &self.bridge) {
            (Some(_), Some(_), Some(_)) => SessionPhase::Connected,
            (Some(_), _, _) => SessionPhase::Connecting,
            _ => SessionPhase::Disconnected,
        }
    }

    /// Status as reported to callers; checks the bridge if there is one
    pub async fn status(&self) -> SessionStatus {
        let config = self.cluster.as_ref().map(|c| c.config().clone());
        let bridge_ok = match &self.bridge {
            Some(bridge) => Some(bridge.check().await),
            None => None,
        };
        SessionStatus {
            phase: self.phase(),
            cluster_context: config.as_ref().map(|c| c.context.clone()),
            cluster_server: config.and_then(|c| c.server),
            bridge_ok,
        }
    }
}

/// Lock-guarded session storage
///
/// Reads never wait on a connect attempt: the lock is only held long enough
/// to clone or replace the `Arc`s.
#[derive(Default)]
pub struct SessionCell {
    inner: RwLock<Session>,
}

impl SessionCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Session {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut Session)) {
        let mut session = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut session);
    }
}
