//! Traffic manager handle contract

use async_trait::async_trait;
use clusterlink_proto::{
    ConnectInfo, CreateInterceptRequest, DeploymentInfoSnapshot, InterceptInfo, ListRequest,
    ManagerClient, UninstallRequest,
};
use std::sync::Arc;

use crate::cluster::ClusterTracker;
use crate::lifetime::Lifetime;

/// Connector-side handle on the remote traffic manager
#[async_trait]
pub trait TrafficCoordinator: Send + Sync {
    /// Wait until the traffic manager has accepted this client
    async fn wait_until_started(&self) -> anyhow::Result<()>;

    /// Raw protocol client, published into the relay once started
    fn manager_client(&self) -> Arc<dyn ManagerClient>;

    /// Port negotiated for the bridge
    fn bridge_port(&self) -> u16;

    /// Add the traffic manager's own fields to a connect outcome
    async fn set_status(&self, info: &mut ConnectInfo);

    async fn add_intercept(&self, request: CreateInterceptRequest)
        -> anyhow::Result<InterceptInfo>;

    async fn remove_intercept(&self, name: &str) -> anyhow::Result<()>;

    /// Workloads in the mapped namespaces with their agent and intercept state
    async fn workloads(&self, request: &ListRequest) -> DeploymentInfoSnapshot;

    /// Remove agents, or the traffic manager itself, from the cluster
    async fn uninstall(&self, request: UninstallRequest) -> anyhow::Result<()>;
}

/// Creates traffic manager handles bound to a tracked cluster
#[async_trait]
pub trait TrafficCoordinatorFactory: Send + Sync {
    async fn new_coordinator(
        &self,
        lifetime: &Lifetime,
        cluster: Arc<dyn ClusterTracker>,
        install_id: &str,
    ) -> anyhow::Result<Arc<dyn TrafficCoordinator>>;
}
