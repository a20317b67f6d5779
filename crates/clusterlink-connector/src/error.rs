//! Connector error taxonomy

use clusterlink_proto::{ConnectError, RpcError};
use thiserror::Error;

use crate::call_context::Fault;

/// Connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid cluster configuration: {0}")]
    ConfigInvalid(String),

    #[error("unable to track cluster: {0}")]
    ClusterFailed(String),

    #[error("unable to connect to traffic manager: {0}")]
    TrafficCoordinatorFailed(String),

    #[error("unable to start traffic manager bridge: {0}")]
    BridgeFailed(String),

    #[error("not connected to a traffic manager")]
    NotConnected,

    #[error("internal fault: {0}")]
    InternalFault(#[from] Fault),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl ConnectorError {
    /// Connect outcome that reports this error, if it is a connect error
    pub fn connect_error(&self) -> Option<ConnectError> {
        match self {
            ConnectorError::ConfigInvalid(_) | ConnectorError::ClusterFailed(_) => {
                Some(ConnectError::ClusterFailed)
            }
            ConnectorError::TrafficCoordinatorFailed(_) => Some(ConnectError::TrafficManagerFailed),
            ConnectorError::BridgeFailed(_) => Some(ConnectError::BridgeFailed),
            _ => None,
        }
    }
}
