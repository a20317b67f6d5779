//! Traffic manager relay
//!
//! Local tooling talks to the traffic manager through the connector. Each
//! call is forwarded to the client published by the connection state machine
//! and its result returned unchanged. Intercept creation and removal are the
//! exception: they have side effects in the connector and must go through
//! its own operations instead.

use clusterlink_proto::{
    AgentInfo, AgentInfoSnapshot, BoxReceiver, ClientApiInfo, ClientInfo, CloudConfig,
    CloudConnection, ClusterInfo, CreateInterceptRequest, DialRequest, Duplex, GetInterceptRequest,
    GetLogsRequest, InterceptInfo, InterceptInfoSnapshot, License, LogLevelRequest, LogsResponse,
    LookupHostAgentResponse, LookupHostRequest, LookupHostResponse, ManagerClient, ManagerReply,
    ManagerRequest, ManagerVersion, MessageSender, RemainRequest, RemoveInterceptRequest,
    ReviewInterceptRequest, RpcError, RpcResult, SessionInfo, TunnelMessage,
    UpdateInterceptRequest,
};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::call_context::CallContext;
use crate::lifetime::LifetimeError;
use crate::tunnel;

/// Forwards the traffic manager protocol to the published client
#[derive(Default)]
pub struct ManagerRelay {
    client: OnceLock<Arc<dyn ManagerClient>>,
}

impl ManagerRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the traffic manager client; only the first call has an effect
    pub fn set_client(&self, client: Arc<dyn ManagerClient>) {
        if self.client.set(client).is_err() {
            warn!("Traffic manager client already published, ignoring");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.client.get().is_some()
    }

    fn client(&self) -> RpcResult<Arc<dyn ManagerClient>> {
        self.client.get().cloned().ok_or(RpcError::Unavailable)
    }

    pub async fn version(&self, ctx: &CallContext) -> RpcResult<ManagerVersion> {
        let client = self.client()?;
        forward(ctx, client.version()).await
    }

    pub async fn get_license(&self, ctx: &CallContext) -> RpcResult<License> {
        let client = self.client()?;
        forward(ctx, client.get_license()).await
    }

    pub async fn get_client_api(&self, ctx: &CallContext) -> RpcResult<ClientApiInfo> {
        let client = self.client()?;
        forward(ctx, client.get_client_api()).await
    }

    pub async fn can_connect_cloud(&self, ctx: &CallContext) -> RpcResult<CloudConnection> {
        let client = self.client()?;
        forward(ctx, client.can_connect_cloud()).await
    }

    pub async fn get_cloud_config(&self, ctx: &CallContext) -> RpcResult<CloudConfig> {
        let client = self.client()?;
        forward(ctx, client.get_cloud_config()).await
    }

    pub async fn arrive_as_client(
        &self,
        ctx: &CallContext,
        info: ClientInfo,
    ) -> RpcResult<SessionInfo> {
        let client = self.client()?;
        forward(ctx, client.arrive_as_client(info)).await
    }

    pub async fn arrive_as_agent(&self, ctx: &CallContext, info: AgentInfo) -> RpcResult<SessionInfo> {
        let client = self.client()?;
        forward(ctx, client.arrive_as_agent(info)).await
    }

    pub async fn remain(&self, ctx: &CallContext, request: RemainRequest) -> RpcResult<()> {
        let client = self.client()?;
        forward(ctx, client.remain(request)).await
    }

    pub async fn depart(&self, ctx: &CallContext, session: SessionInfo) -> RpcResult<()> {
        let client = self.client()?;
        forward(ctx, client.depart(session)).await
    }

    pub async fn get_intercept(
        &self,
        ctx: &CallContext,
        request: GetInterceptRequest,
    ) -> RpcResult<InterceptInfo> {
        let client = self.client()?;
        forward(ctx, client.get_intercept(request)).await
    }

    pub async fn create_intercept(
        &self,
        _ctx: &CallContext,
        _request: CreateInterceptRequest,
    ) -> RpcResult<InterceptInfo> {
        Err(RpcError::Unsupported(
            "must call connector CreateIntercept instead of manager CreateIntercept".into(),
        ))
    }

    pub async fn remove_intercept(
        &self,
        _ctx: &CallContext,
        _request: RemoveInterceptRequest,
    ) -> RpcResult<()> {
        Err(RpcError::Unsupported(
            "must call connector RemoveIntercept instead of manager RemoveIntercept".into(),
        ))
    }

    pub async fn update_intercept(
        &self,
        ctx: &CallContext,
        request: UpdateInterceptRequest,
    ) -> RpcResult<InterceptInfo> {
        let client = self.client()?;
        forward(ctx, client.update_intercept(request)).await
    }

    pub async fn review_intercept(
        &self,
        ctx: &CallContext,
        request: ReviewInterceptRequest,
    ) -> RpcResult<()> {
        let client = self.client()?;
        forward(ctx, client.review_intercept(request)).await
    }

    pub async fn lookup_host(
        &self,
        ctx: &CallContext,
        request: LookupHostRequest,
    ) -> RpcResult<LookupHostResponse> {
        let client = self.client()?;
        forward(ctx, client.lookup_host(request)).await
    }

    pub async fn agent_lookup_host_response(
        &self,
        ctx: &CallContext,
        response: LookupHostAgentResponse,
    ) -> RpcResult<()> {
        let client = self.client()?;
        forward(ctx, client.agent_lookup_host_response(response)).await
    }

    pub async fn set_log_level(&self, ctx: &CallContext, request: LogLevelRequest) -> RpcResult<()> {
        let client = self.client()?;
        forward(ctx, client.set_log_level(request)).await
    }

    pub async fn get_logs(&self, ctx: &CallContext, request: GetLogsRequest) -> RpcResult<LogsResponse> {
        let client = self.client()?;
        forward(ctx, client.get_logs(request)).await
    }

    pub async fn watch_agents(
        &self,
        ctx: &CallContext,
        session: SessionInfo,
        out: &mut dyn MessageSender<AgentInfoSnapshot>,
    ) -> RpcResult<()> {
        let client = self.client()?;
        let upstream = forward(ctx, client.watch_agents(session)).await?;
        pump(ctx, "WatchAgents", upstream, out).await
    }

    pub async fn watch_intercepts(
        &self,
        ctx: &CallContext,
        session: SessionInfo,
        out: &mut dyn MessageSender<InterceptInfoSnapshot>,
    ) -> RpcResult<()> {
        let client = self.client()?;
        let upstream = forward(ctx, client.watch_intercepts(session)).await?;
        pump(ctx, "WatchIntercepts", upstream, out).await
    }

    pub async fn watch_cluster_info(
        &self,
        ctx: &CallContext,
        session: SessionInfo,
        out: &mut dyn MessageSender<ClusterInfo>,
    ) -> RpcResult<()> {
        let client = self.client()?;
        let upstream = forward(ctx, client.watch_cluster_info(session)).await?;
        pump(ctx, "WatchClusterInfo", upstream, out).await
    }

    pub async fn watch_dial(
        &self,
        ctx: &CallContext,
        session: SessionInfo,
        out: &mut dyn MessageSender<DialRequest>,
    ) -> RpcResult<()> {
        let client = self.client()?;
        let upstream = forward(ctx, client.watch_dial(session)).await?;
        pump(ctx, "WatchDial", upstream, out).await
    }

    /// Agents only; a workstation has no host lookups to answer
    pub async fn watch_lookup_host(
        &self,
        _ctx: &CallContext,
        _session: SessionInfo,
        _out: &mut dyn MessageSender<LookupHostRequest>,
    ) -> RpcResult<()> {
        Err(RpcError::Unsupported(
            "must call manager WatchLookupHost from an agent (intercepted pod), not from a client (workstation)".into(),
        ))
    }

    /// Agents only; log levels of the workstation are not managed remotely
    pub async fn watch_log_level(
        &self,
        _ctx: &CallContext,
        _out: &mut dyn MessageSender<LogLevelRequest>,
    ) -> RpcResult<()> {
        Err(RpcError::Unsupported(
            "must call manager WatchLogLevel from an agent (intercepted pod), not from a client (workstation)".into(),
        ))
    }

    /// Run a unary call received over IPC
    pub async fn call(&self, ctx: &CallContext, request: ManagerRequest) -> RpcResult<ManagerReply> {
        let reply = match request {
            ManagerRequest::Version => ManagerReply::Version(self.version(ctx).await?),
            ManagerRequest::GetLicense => ManagerReply::License(self.get_license(ctx).await?),
            ManagerRequest::GetClientApi => ManagerReply::ClientApi(self.get_client_api(ctx).await?),
            ManagerRequest::CanConnectCloud => {
                ManagerReply::CloudConnection(self.can_connect_cloud(ctx).await?)
            }
            ManagerRequest::GetCloudConfig => {
                ManagerReply::CloudConfig(self.get_cloud_config(ctx).await?)
            }
            ManagerRequest::ArriveAsClient { info } => {
                ManagerReply::Session(self.arrive_as_client(ctx, info).await?)
            }
            ManagerRequest::ArriveAsAgent { info } => {
                ManagerReply::Session(self.arrive_as_agent(ctx, info).await?)
            }
            ManagerRequest::Remain { request } => {
                self.remain(ctx, request).await?;
                ManagerReply::Empty
            }
            ManagerRequest::Depart { session } => {
                self.depart(ctx, session).await?;
                ManagerReply::Empty
            }
            ManagerRequest::GetIntercept { request } => {
                ManagerReply::Intercept(self.get_intercept(ctx, request).await?)
            }
            ManagerRequest::CreateIntercept { request } => {
                ManagerReply::Intercept(self.create_intercept(ctx, request).await?)
            }
            ManagerRequest::RemoveIntercept { request } => {
                self.remove_intercept(ctx, request).await?;
                ManagerReply::Empty
            }
            ManagerRequest::UpdateIntercept { request } => {
                ManagerReply::Intercept(self.update_intercept(ctx, request).await?)
            }
            ManagerRequest::ReviewIntercept { request } => {
                self.review_intercept(ctx, request).await?;
                ManagerReply::Empty
            }
            ManagerRequest::LookupHost { request } => {
                ManagerReply::LookupHost(self.lookup_host(ctx, request).await?)
            }
            ManagerRequest::AgentLookupHostResponse { response } => {
                self.agent_lookup_host_response(ctx, response).await?;
                ManagerReply::Empty
            }
            ManagerRequest::SetLogLevel { request } => {
                self.set_log_level(ctx, request).await?;
                ManagerReply::Empty
            }
            ManagerRequest::GetLogs { request } => ManagerReply::Logs(self.get_logs(ctx, request).await?),
        };
        Ok(reply)
    }

    /// Relay a tunnel between the caller and the traffic manager
    ///
    /// Returns once both directions have wound down.
    pub async fn tunnel(&self, ctx: &CallContext, caller: Duplex<TunnelMessage>) -> RpcResult<()> {
        let client = self.client()?;
        let manager = forward(ctx, client.tunnel()).await?;
        tunnel::relay(ctx, caller, manager).await;
        Ok(())
    }
}

/// Run `call`, giving up as soon as the call context ends
async fn forward<T>(ctx: &CallContext, call: impl Future<Output = RpcResult<T>>) -> RpcResult<T> {
    tokio::select! {
        result = call => result,
        _ = ctx.done() => Err(ended(ctx)),
    }
}

fn ended(ctx: &CallContext) -> RpcError {
    match ctx.err() {
        Some(LifetimeError::DeadlineExceeded) => RpcError::DeadlineExceeded,
        _ => RpcError::Cancelled,
    }
}

/// Copy a subscription to the caller one message at a time
///
/// End of stream and caller cancellation end the subscription without error.
async fn pump<T: Send>(
    ctx: &CallContext,
    name: &str,
    mut upstream: BoxReceiver<T>,
    out: &mut dyn MessageSender<T>,
) -> RpcResult<()> {
    loop {
        let next = tokio::select! {
            next = upstream.recv() => next,
            _ = ctx.done() => {
                debug!("{} ended by caller", name);
                return Ok(());
            }
        };

        let message = match next {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("{} stream ended", name);
                return Ok(());
            }
            Err(_) if ctx.is_done() => return Ok(()),
            Err(e) if e.is_closed() => {
                debug!("{} stream closed", name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let sent = tokio::select! {
            sent = out.send(message) => sent,
            _ = ctx.done() => return Ok(()),
        };
        if let Err(e) = sent {
            if ctx.is_done() {
                return Ok(());
            }
            return Err(e.into());
        }
    }
}
