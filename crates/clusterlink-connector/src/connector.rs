//! Connection state machine
//!
//! Owns the one session of the process. Connect attempts are serialized by a
//! single lock held for the whole attempt; status and intercept calls read
//! snapshots without taking it.

use clusterlink_proto::{
    ConnectError, ConnectInfo, ConnectRequest, CreateInterceptRequest, DeploymentInfoSnapshot,
    InterceptError, InterceptResult, ListRequest, RpcError, SessionStatus, UninstallRequest,
    UninstallResult, UninstallType,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::bridge::BridgeFactory;
use crate::call_context::CallContext;
use crate::cluster::{normalize_namespaces, ClusterConfig, ClusterTrackerFactory};
use crate::config::ConnectorConfig;
use crate::coordinator::{TrafficCoordinator, TrafficCoordinatorFactory};
use crate::error::ConnectorError;
use crate::lifetime::{Lifetime, LifetimeError};
use crate::relay::ManagerRelay;
use crate::session::{Session, SessionCell};
use crate::usage::{report_best_effort, UsageEvent, UsageReporter};

/// External components the connector drives
#[derive(Clone)]
pub struct Collaborators {
    pub clusters: Arc<dyn ClusterTrackerFactory>,
    pub coordinators: Arc<dyn TrafficCoordinatorFactory>,
    pub bridges: Arc<dyn BridgeFactory>,
    pub usage: Arc<dyn UsageReporter>,
}

/// Tunables for connect attempts
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub install_id: String,
    /// Upper bound on waiting for the traffic manager to accept the client
    pub ready_timeout: Duration,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self::from(&ConnectorConfig::default())
    }
}

impl From<&ConnectorConfig> for ConnectSettings {
    fn from(config: &ConnectorConfig) -> Self {
        Self {
            install_id: config.install_id.clone().unwrap_or_default(),
            ready_timeout: config.coordinator_ready_timeout(),
        }
    }
}

pub struct Connector {
    lifetime: Lifetime,
    collaborators: Collaborators,
    relay: Arc<ManagerRelay>,
    settings: ConnectSettings,
    connect_mu: Mutex<()>,
    session: SessionCell,
}

impl Connector {
    pub fn new(
        lifetime: Lifetime,
        collaborators: Collaborators,
        relay: Arc<ManagerRelay>,
        settings: ConnectSettings,
    ) -> Self {
        Self {
            lifetime,
            collaborators,
            relay,
            settings,
            connect_mu: Mutex::new(()),
            session: SessionCell::new(),
        }
    }

    /// Connect to the cluster selected by `request`, or report why not
    ///
    /// Never fails outright: every outcome, including failures, comes back as
    /// a [`ConnectInfo`] carrying whatever status could be gathered.
    pub async fn connect(&self, ctx: &CallContext, request: &ConnectRequest) -> ConnectInfo {
        let _guard = self.connect_mu.lock().await;

        let config = match ClusterConfig::from_flags(&request.kube_flags) {
            Ok(config) => config,
            Err(e) => return ConnectInfo::failed(ConnectError::ClusterFailed, e.to_string()),
        };

        let session = self.session.snapshot();
        match (&session.cluster, &session.bridge) {
            (Some(cluster), _) if cluster.matches(&config) => {
                if !request.mapped_namespaces.is_empty() {
                    let namespaces = normalize_namespaces(&request.mapped_namespaces);
                    debug!("Updating mapped namespaces to {:?}", namespaces);
                    cluster.set_mapped_namespaces(namespaces).await;
                }
                Self::connect_info(&session, ConnectError::AlreadyConnected, None).await
            }
            (Some(cluster), _) => {
                info!(
                    "Refusing to switch from context {} to {} without a restart",
                    cluster.config().context,
                    config.context
                );
                Self::connect_info(&session, ConnectError::MustRestart, None).await
            }
            // Only reachable while a teardown is in flight
            (None, Some(_)) => Self::connect_info(&session, ConnectError::Disconnecting, None).await,
            (None, None) => match self.establish(ctx, config, request).await {
                Ok(()) => {
                    Self::connect_info(&self.session.snapshot(), ConnectError::Unspecified, None)
                        .await
                }
                Err(e) => {
                    if self.lifetime.end(format!("connect failed: {}", e)) {
                        error!("Connect failed, shutting down: {}", e);
                    }
                    let outcome = e.connect_error().unwrap_or(ConnectError::ClusterFailed);
                    Self::connect_info(&self.session.snapshot(), outcome, Some(e.to_string()))
                        .await
                }
            },
        }
    }

    async fn establish(
        &self,
        ctx: &CallContext,
        config: ClusterConfig,
        request: &ConnectRequest,
    ) -> Result<(), ConnectorError> {
        let started = Instant::now();
        let usage = self.collaborators.usage.as_ref();
        let namespaces = normalize_namespaces(&request.mapped_namespaces);

        report_best_effort(usage, UsageEvent::new("connect")).await;
        info!(
            "Connecting to context {} (server {})",
            config.context,
            config.server.as_deref().unwrap_or("from kubeconfig")
        );

        let cluster = self
            .collaborators
            .clusters
            .track_cluster(&self.lifetime, &config, &namespaces)
            .await
            .map_err(|e| ConnectorError::ClusterFailed(format!("{:#}", e)))?;
        self.session.update(|s| s.cluster = Some(cluster.clone()));

        let cluster_id = cluster.cluster_id().await;
        let mut event = UsageEvent::new("connecting_traffic_manager")
            .with("cluster_id", cluster_id.clone())
            .with("mapped_namespaces", request.mapped_namespaces.len());
        for (kind, count) in cluster.count_objects().await {
            event = event.with(format!("{}_count", kind), count);
        }
        report_best_effort(usage, event).await;

        let coordinator = self
            .collaborators
            .coordinators
            .new_coordinator(&self.lifetime, cluster.clone(), &self.settings.install_id)
            .await
            .map_err(|e| ConnectorError::TrafficCoordinatorFailed(format!("{:#}", e)))?;
        self.session
            .update(|s| s.coordinator = Some(coordinator.clone()));

        self.wait_until_ready(ctx, coordinator.as_ref()).await?;
        self.relay.set_client(coordinator.manager_client());
        info!("Connected to traffic manager in cluster {}", cluster_id);

        let bridge = self
            .collaborators
            .bridges
            .new_bridge(coordinator.bridge_port());
        bridge
            .start(&self.lifetime)
            .await
            .map_err(|e| ConnectorError::BridgeFailed(format!("{:#}", e)))?;
        self.session.update(|s| s.bridge = Some(bridge));

        let elapsed = started.elapsed();
        report_best_effort(
            usage,
            UsageEvent::new("finished_connecting_traffic_manager")
                .with("connect_duration", elapsed.as_secs_f64()),
        )
        .await;
        info!("Connected in {:.1}s", elapsed.as_secs_f64());

        Ok(())
    }

    async fn wait_until_ready(
        &self,
        ctx: &CallContext,
        coordinator: &dyn TrafficCoordinator,
    ) -> Result<(), ConnectorError> {
        let timeout = self.settings.ready_timeout;
        tokio::select! {
            result = tokio::time::timeout(timeout, coordinator.wait_until_started()) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ConnectorError::TrafficCoordinatorFailed(format!("{:#}", e))),
                Err(_) => Err(ConnectorError::TrafficCoordinatorFailed(format!(
                    "traffic manager not ready after {:?}",
                    timeout
                ))),
            },
            _ = ctx.done() => Err(ConnectorError::TrafficCoordinatorFailed(format!(
                "{} while waiting for traffic manager",
                ctx.err().map_or_else(|| "ended".to_string(), |e| e.to_string())
            ))),
        }
    }

    /// Build a connect outcome from whatever parts of `session` exist
    async fn connect_info(
        session: &Session,
        error: ConnectError,
        error_text: Option<String>,
    ) -> ConnectInfo {
        let mut info = ConnectInfo {
            error,
            error_text,
            ..Default::default()
        };

        if let Some(cluster) = &session.cluster {
            let config = cluster.config();
            info.cluster_ok = true;
            info.cluster_context = config.context.clone();
            info.cluster_server = config.server.clone().unwrap_or_default();
            info.cluster_id = cluster.cluster_id().await;
            info.ingress_infos = cluster.detect_ingress().await;
        }
        if let Some(bridge) = &session.bridge {
            info.bridge_ok = bridge.check().await;
        }
        if let Some(coordinator) = &session.coordinator {
            coordinator.set_status(&mut info).await;
        }

        info
    }

    pub async fn status(&self) -> SessionStatus {
        self.session.snapshot().status().await
    }

    pub async fn create_intercept(&self, request: CreateInterceptRequest) -> InterceptResult {
        let coordinator = match Self::intercept_target(&self.session.snapshot()) {
            Ok(coordinator) => coordinator,
            Err(not_ready) => return not_ready,
        };

        let name = request.spec.name.clone();
        match coordinator.add_intercept(request).await {
            Ok(intercept) => {
                info!("Intercept {} created", name);
                InterceptResult {
                    intercept: Some(intercept),
                    ..Default::default()
                }
            }
            Err(e) => InterceptResult::failed(InterceptError::TrafficManagerError, format!("{:#}", e)),
        }
    }

    pub async fn remove_intercept(&self, name: &str) -> InterceptResult {
        let coordinator = match Self::intercept_target(&self.session.snapshot()) {
            Ok(coordinator) => coordinator,
            Err(not_ready) => return not_ready,
        };

        match coordinator.remove_intercept(name).await {
            Ok(()) => {
                info!("Intercept {} removed", name);
                InterceptResult::default()
            }
            Err(e) => InterceptResult::failed(InterceptError::TrafficManagerError, format!("{:#}", e)),
        }
    }

    /// Workloads visible through the session
    ///
    /// Empty until the traffic manager client has been published.
    pub async fn list(&self, request: &ListRequest) -> DeploymentInfoSnapshot {
        match self.published_coordinator() {
            Some(coordinator) => coordinator.workloads(request).await,
            None => DeploymentInfoSnapshot::default(),
        }
    }

    pub async fn uninstall(
        &self,
        ctx: &CallContext,
        request: UninstallRequest,
    ) -> Result<UninstallResult, ConnectorError> {
        let coordinator = self
            .published_coordinator()
            .ok_or(ConnectorError::NotConnected)?;

        let uninstall_type = request.uninstall_type;
        if uninstall_type == UninstallType::Unspecified {
            return Ok(UninstallResult {
                error_text: Some("invalid uninstall request".to_string()),
            });
        }

        let outcome = tokio::select! {
            outcome = coordinator.uninstall(request) => outcome,
            _ = ctx.done() => {
                return Err(match ctx.err() {
                    Some(LifetimeError::DeadlineExceeded) => RpcError::DeadlineExceeded.into(),
                    _ => RpcError::Cancelled.into(),
                });
            }
        };

        Ok(match outcome {
            Ok(()) => {
                info!("Uninstall ({:?}) done", uninstall_type);
                UninstallResult::default()
            }
            Err(e) => UninstallResult {
                error_text: Some(format!("{:#}", e)),
            },
        })
    }

    fn published_coordinator(&self) -> Option<Arc<dyn TrafficCoordinator>> {
        if !self.relay.is_ready() {
            return None;
        }
        self.session.snapshot().coordinator
    }

    /// The coordinator to run an intercept operation against, once fully connected
    fn intercept_target(
        session: &Session,
    ) -> Result<Arc<dyn TrafficCoordinator>, InterceptResult> {
        match (&session.cluster, &session.coordinator, &session.bridge) {
            (None, _, _) => Err(InterceptResult::failed(
                InterceptError::NoConnection,
                "not connected to a cluster",
            )),
            (Some(_), None, _) => Err(InterceptResult::failed(
                InterceptError::NoTrafficManager,
                "no traffic manager",
            )),
            (Some(_), Some(_), None) => Err(InterceptResult::failed(
                InterceptError::TrafficManagerConnecting,
                "traffic manager is still connecting",
            )),
            (Some(_), Some(coordinator), Some(_)) => Ok(coordinator.clone()),
        }
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &SessionCell {
        &self.session
    }
}
