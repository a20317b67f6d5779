//! Service boundary
//!
//! Every inbound call, whether it targets the connector itself or the relayed
//! traffic manager protocol, enters here and runs through [`guarded`].

use clusterlink_proto::{
    ConnectInfo, ConnectRequest, CreateInterceptRequest, DeploymentInfoSnapshot, InterceptResult,
    ListRequest, ManagerReply, ManagerRequest, RpcResult, SessionStatus, UninstallRequest,
    UninstallResult, VersionInfo, API_VERSION,
};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::call_context::{guarded, CallContext};
use crate::connector::{Collaborators, ConnectSettings, Connector};
use crate::error::ConnectorError;
use crate::lifetime::Lifetime;
use crate::relay::ManagerRelay;

pub struct ConnectorService {
    lifetime: Lifetime,
    connector: Connector,
    relay: Arc<ManagerRelay>,
}

impl ConnectorService {
    pub fn new(lifetime: Lifetime, collaborators: Collaborators, settings: ConnectSettings) -> Self {
        let relay = Arc::new(ManagerRelay::new());
        let connector = Connector::new(lifetime.clone(), collaborators, relay.clone(), settings);
        Self {
            lifetime,
            connector,
            relay,
        }
    }

    /// The service lifetime; ending it shuts the connector down
    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub fn relay(&self) -> &Arc<ManagerRelay> {
        &self.relay
    }

    /// Run a connector call at the boundary
    pub async fn call<T, F, Fut>(
        &self,
        caller: &Lifetime,
        operation: &str,
        call: F,
    ) -> Result<T, ConnectorError>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        guarded(&self.lifetime, caller, operation, call).await
    }

    /// Run a relayed traffic manager call at the boundary
    pub async fn relay_call<T, F, Fut>(&self, caller: &Lifetime, operation: &str, call: F) -> RpcResult<T>
    where
        F: FnOnce(CallContext, Arc<ManagerRelay>) -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let relay = self.relay.clone();
        guarded(&self.lifetime, caller, operation, |ctx| call(ctx, relay)).await
    }

    pub async fn version(&self, caller: &Lifetime) -> Result<VersionInfo, ConnectorError> {
        self.call(caller, "Version", |_ctx| async {
            Ok(VersionInfo {
                api_version: API_VERSION,
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
        })
        .await
    }

    pub async fn connect(
        &self,
        caller: &Lifetime,
        request: ConnectRequest,
    ) -> Result<ConnectInfo, ConnectorError> {
        self.call(caller, "Connect", |ctx| async move {
            Ok(self.connector.connect(&ctx, &request).await)
        })
        .await
    }

    pub async fn status(&self, caller: &Lifetime) -> Result<SessionStatus, ConnectorError> {
        self.call(caller, "Status", |_ctx| async {
            Ok(self.connector.status().await)
        })
        .await
    }

    pub async fn list(
        &self,
        caller: &Lifetime,
        request: ListRequest,
    ) -> Result<DeploymentInfoSnapshot, ConnectorError> {
        self.call(caller, "List", |_ctx| async move {
            Ok(self.connector.list(&request).await)
        })
        .await
    }

    pub async fn create_intercept(
        &self,
        caller: &Lifetime,
        request: CreateInterceptRequest,
    ) -> Result<InterceptResult, ConnectorError> {
        self.call(caller, "CreateIntercept", |_ctx| async move {
            Ok(self.connector.create_intercept(request).await)
        })
        .await
    }

    pub async fn remove_intercept(
        &self,
        caller: &Lifetime,
        name: String,
    ) -> Result<InterceptResult, ConnectorError> {
        self.call(caller, "RemoveIntercept", |_ctx| async move {
            Ok(self.connector.remove_intercept(&name).await)
        })
        .await
    }

    pub async fn uninstall(
        &self,
        caller: &Lifetime,
        request: UninstallRequest,
    ) -> Result<UninstallResult, ConnectorError> {
        self.call(caller, "Uninstall", |ctx| async move {
            self.connector.uninstall(&ctx, request).await
        })
        .await
    }

    /// Relay a unary traffic manager call
    pub async fn manager(&self, caller: &Lifetime, request: ManagerRequest) -> RpcResult<ManagerReply> {
        let operation = request.operation();
        self.relay_call(caller, operation, |ctx, relay| async move {
            relay.call(&ctx, request).await
        })
        .await
    }

    /// End the service lifetime
    pub async fn quit(&self, caller: &Lifetime) -> Result<(), ConnectorError> {
        self.call(caller, "Quit", |_ctx| async {
            if self.lifetime.end("quit") {
                info!("Quit requested, shutting down");
            }
            Ok(())
        })
        .await
    }
}
