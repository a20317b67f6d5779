//! Traffic manager protocol messages
//!
//! These are the request and response types of the remote control plane.
//! The connector relays them unchanged, so nothing here carries
//! connector-specific meaning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies a session (client or agent) registered with the traffic manager
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
}

/// Version of the traffic manager
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagerVersion {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct License {
    pub license: String,
    pub host_domain: String,
    pub error_text: String,
}

/// Port on which the in-cluster client API is served
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientApiInfo {
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudConnection {
    pub can_connect: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudConfig {
    pub host: String,
    pub port: u16,
}

/// Sent by a workstation client when it arrives
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
    pub install_id: String,
    pub product: String,
    pub version: String,
}

/// Sent by an in-cluster agent when it arrives
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInfo {
    pub name: String,
    pub namespace: String,
    pub pod_ip: String,
    pub product: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemainRequest {
    pub session: SessionInfo,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInfoSnapshot {
    pub agents: Vec<AgentInfo>,
}

/// Disposition of an intercept as seen by the traffic manager
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterceptDisposition {
    #[default]
    Unspecified,
    Active,
    Waiting,
    NoAgent,
    NoPorts,
    AgentError,
    Removed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterceptSpec {
    pub name: String,
    pub client: String,
    pub agent: String,
    pub namespace: String,
    pub target_host: String,
    pub target_port: u16,
    pub mechanism: String,
    pub mechanism_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterceptInfo {
    pub id: String,
    pub spec: InterceptSpec,
    pub disposition: InterceptDisposition,
    pub message: String,
    pub client_session: SessionInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterceptInfoSnapshot {
    pub intercepts: Vec<InterceptInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetInterceptRequest {
    pub session: SessionInfo,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateInterceptRequest {
    pub session: SessionInfo,
    pub spec: InterceptSpec,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoveInterceptRequest {
    pub session: SessionInfo,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateInterceptRequest {
    pub session: SessionInfo,
    pub name: String,
    pub preview_domain: Option<String>,
}

/// Sent by an agent to report on the state of an intercept
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewInterceptRequest {
    pub session: SessionInfo,
    pub id: String,
    pub disposition: InterceptDisposition,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterInfo {
    pub kube_dns_ip: String,
    pub service_subnet: String,
    pub pod_subnets: Vec<String>,
    pub cluster_domain: String,
}

/// Asks the receiver to open a connection to `host:port` for tunnel `conn_id`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialRequest {
    pub conn_id: Vec<u8>,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupHostRequest {
    pub session: SessionInfo,
    pub host: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupHostResponse {
    pub ips: Vec<String>,
}

/// An agent's answer to a forwarded host lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupHostAgentResponse {
    pub session: SessionInfo,
    pub request: LookupHostRequest,
    pub response: LookupHostResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLevelRequest {
    pub log_level: String,
    /// Seconds until the level reverts; zero keeps it
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetLogsRequest {
    pub traffic_manager: bool,
    pub agents: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogsResponse {
    /// Pod name to log text
    pub pod_logs: BTreeMap<String, String>,
    pub error: String,
}

/// One frame of an opaque tunnel byte stream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelMessage {
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl TunnelMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

// Helper module for serializing Vec<u8> as bytes rather than a sequence
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<u8>::deserialize(deserializer)
    }
}
