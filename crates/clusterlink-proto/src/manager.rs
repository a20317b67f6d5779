//! Client side of the traffic manager protocol

use async_trait::async_trait;
use thiserror::Error;

use crate::messages::*;
use crate::stream::{BoxReceiver, BoxSender, StreamError};

/// Errors returned by traffic manager calls
#[derive(Debug, Error)]
pub enum RpcError {
    /// No traffic manager client has been published yet
    #[error("not connected to the traffic manager")]
    Unavailable,

    /// The call is valid protocol but must not be made through this endpoint
    #[error("{0}")]
    Unsupported(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Error reported by the remote side
    #[error("remote error: {0}")]
    Remote(String),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// A fault caught at the call boundary
    #[error("internal fault: {0}")]
    Internal(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Both halves of a bidirectional stream
pub type Duplex<T> = (BoxSender<T>, BoxReceiver<T>);

/// Raw protocol client connected to a traffic manager
///
/// Dropping a returned stream ends the corresponding call.
#[async_trait]
pub trait ManagerClient: Send + Sync {
    async fn version(&self) -> RpcResult<ManagerVersion>;
    async fn get_license(&self) -> RpcResult<License>;
    async fn get_client_api(&self) -> RpcResult<ClientApiInfo>;
    async fn can_connect_cloud(&self) -> RpcResult<CloudConnection>;
    async fn get_cloud_config(&self) -> RpcResult<CloudConfig>;

    async fn arrive_as_client(&self, info: ClientInfo) -> RpcResult<SessionInfo>;
    async fn arrive_as_agent(&self, info: AgentInfo) -> RpcResult<SessionInfo>;
    async fn remain(&self, request: RemainRequest) -> RpcResult<()>;
    async fn depart(&self, session: SessionInfo) -> RpcResult<()>;

    async fn get_intercept(&self, request: GetInterceptRequest) -> RpcResult<InterceptInfo>;
    async fn create_intercept(&self, request: CreateInterceptRequest) -> RpcResult<InterceptInfo>;
    async fn remove_intercept(&self, request: RemoveInterceptRequest) -> RpcResult<()>;
    async fn update_intercept(&self, request: UpdateInterceptRequest) -> RpcResult<InterceptInfo>;
    async fn review_intercept(&self, request: ReviewInterceptRequest) -> RpcResult<()>;

    async fn lookup_host(&self, request: LookupHostRequest) -> RpcResult<LookupHostResponse>;
    async fn agent_lookup_host_response(&self, response: LookupHostAgentResponse)
        -> RpcResult<()>;

    async fn set_log_level(&self, request: LogLevelRequest) -> RpcResult<()>;
    async fn get_logs(&self, request: GetLogsRequest) -> RpcResult<LogsResponse>;

    async fn watch_agents(&self, session: SessionInfo) -> RpcResult<BoxReceiver<AgentInfoSnapshot>>;
    async fn watch_intercepts(
        &self,
        session: SessionInfo,
    ) -> RpcResult<BoxReceiver<InterceptInfoSnapshot>>;
    async fn watch_cluster_info(&self, session: SessionInfo) -> RpcResult<BoxReceiver<ClusterInfo>>;
    async fn watch_dial(&self, session: SessionInfo) -> RpcResult<BoxReceiver<DialRequest>>;
    async fn watch_lookup_host(
        &self,
        session: SessionInfo,
    ) -> RpcResult<BoxReceiver<LookupHostRequest>>;
    async fn watch_log_level(&self) -> RpcResult<BoxReceiver<LogLevelRequest>>;

    /// Open a bidirectional tunnel stream
    async fn tunnel(&self) -> RpcResult<Duplex<TunnelMessage>>;
}
