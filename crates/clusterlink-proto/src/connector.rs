//! Connector request and response messages
//!
//! Unlike [`crate::messages`], these belong to the connector's own surface:
//! the CLI sends them over local IPC and the connector answers them itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::messages::{AgentInfo, InterceptInfo};

/// API version of the connector surface
pub const API_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionInfo {
    pub api_version: u32,
    pub version: String,
}

/// Request to connect to a cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Cluster selection flags, keyed by flag name without leading dashes
    pub kube_flags: BTreeMap<String, String>,
    /// Namespaces to make visible; `["all"]` means every namespace
    pub mapped_namespaces: Vec<String>,
}

/// Outcome classification of a connect attempt
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectError {
    /// The connect succeeded
    #[default]
    Unspecified,
    AlreadyConnected,
    /// Connected to a different cluster; the connector must be restarted
    MustRestart,
    Disconnecting,
    ClusterFailed,
    TrafficManagerFailed,
    BridgeFailed,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Unspecified => write!(f, "connected"),
            ConnectError::AlreadyConnected => write!(f, "already connected"),
            ConnectError::MustRestart => write!(f, "must restart"),
            ConnectError::Disconnecting => write!(f, "disconnecting"),
            ConnectError::ClusterFailed => write!(f, "cluster failed"),
            ConnectError::TrafficManagerFailed => write!(f, "traffic manager failed"),
            ConnectError::BridgeFailed => write!(f, "bridge failed"),
        }
    }
}

/// How a cluster exposes services to the outside, as detected by the tracker
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngressInfo {
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Result of a connect attempt
///
/// Cluster and bridge fields are populated from whatever succeeded, even when
/// `error` reports a failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectInfo {
    pub error: ConnectError,
    pub error_text: Option<String>,
    pub cluster_ok: bool,
    pub cluster_context: String,
    pub cluster_server: String,
    pub cluster_id: String,
    pub bridge_ok: bool,
    pub ingress_infos: Vec<IngressInfo>,
    /// Filled in by the traffic manager handle
    pub session_id: Option<String>,
    pub manager_version: Option<String>,
}

impl ConnectInfo {
    /// A failure outcome carrying only an error
    pub fn failed(error: ConnectError, text: impl Into<String>) -> Self {
        Self {
            error,
            error_text: Some(text.into()),
            ..Default::default()
        }
    }

    /// True for outcomes that leave the caller connected
    pub fn is_connected(&self) -> bool {
        matches!(
            self.error,
            ConnectError::Unspecified | ConnectError::AlreadyConnected
        )
    }
}

/// Coarse phase of the connector's session
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Disconnected => write!(f, "○ Disconnected"),
            SessionPhase::Connecting => write!(f, "◐ Connecting"),
            SessionPhase::Connected => write!(f, "● Connected"),
        }
    }
}

/// Snapshot of the session for status queries
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub cluster_context: Option<String>,
    pub cluster_server: Option<String>,
    pub bridge_ok: Option<bool>,
}

/// Why an intercept operation could not be attempted
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterceptError {
    #[default]
    Unspecified,
    NoConnection,
    NoTrafficManager,
    TrafficManagerConnecting,
    TrafficManagerError,
}

/// Result of a connector-local intercept operation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterceptResult {
    pub intercept: Option<InterceptInfo>,
    pub error: InterceptError,
    pub error_text: Option<String>,
}

impl InterceptResult {
    pub fn failed(error: InterceptError, text: impl Into<String>) -> Self {
        Self {
            intercept: None,
            error,
            error_text: Some(text.into()),
        }
    }
}

/// Which workloads a list request should return
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListFilter {
    #[default]
    Everything,
    Interceptable,
    Intercepts,
    InstalledAgents,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListRequest {
    pub filter: ListFilter,
    /// Limit the listing to one namespace
    pub namespace: Option<String>,
}

/// A workload in one of the mapped namespaces
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadInfo {
    pub name: String,
    pub namespace: String,
    /// Deployment, ReplicaSet, StatefulSet
    pub resource_type: String,
    /// Set when the workload cannot be intercepted
    pub not_interceptable_reason: Option<String>,
    pub agent: Option<AgentInfo>,
    pub intercept: Option<InterceptInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentInfoSnapshot {
    pub workloads: Vec<WorkloadInfo>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UninstallType {
    #[default]
    Unspecified,
    /// Remove the agents listed in the request
    NamedAgents,
    AllAgents,
    /// Remove all agents and the traffic manager itself
    Everything,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UninstallRequest {
    pub uninstall_type: UninstallType,
    pub agents: Vec<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UninstallResult {
    pub error_text: Option<String>,
}
