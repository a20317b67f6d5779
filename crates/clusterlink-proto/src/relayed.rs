//! Traffic manager calls as carried over the connector's local socket
//!
//! Unary calls travel as a [`ManagerRequest`] and come back as a
//! [`ManagerReply`]. Streaming calls are opened with a [`StreamRequest`];
//! after that the connection carries length-delimited frames only.

use serde::{Deserialize, Serialize};

use crate::messages::*;

/// A unary traffic manager call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ManagerRequest {
    Version,
    GetLicense,
    GetClientApi,
    CanConnectCloud,
    GetCloudConfig,
    ArriveAsClient { info: ClientInfo },
    ArriveAsAgent { info: AgentInfo },
    Remain { request: RemainRequest },
    Depart { session: SessionInfo },
    GetIntercept { request: GetInterceptRequest },
    CreateIntercept { request: CreateInterceptRequest },
    RemoveIntercept { request: RemoveInterceptRequest },
    UpdateIntercept { request: UpdateInterceptRequest },
    ReviewIntercept { request: ReviewInterceptRequest },
    LookupHost { request: LookupHostRequest },
    AgentLookupHostResponse { response: LookupHostAgentResponse },
    SetLogLevel { request: LogLevelRequest },
    GetLogs { request: GetLogsRequest },
}

impl ManagerRequest {
    /// Protocol name of the call, used to name it in logs
    pub fn operation(&self) -> &'static str {
        match self {
            ManagerRequest::Version => "Version",
            ManagerRequest::GetLicense => "GetLicense",
            ManagerRequest::GetClientApi => "GetClientApi",
            ManagerRequest::CanConnectCloud => "CanConnectCloud",
            ManagerRequest::GetCloudConfig => "GetCloudConfig",
            ManagerRequest::ArriveAsClient { .. } => "ArriveAsClient",
            ManagerRequest::ArriveAsAgent { .. } => "ArriveAsAgent",
            ManagerRequest::Remain { .. } => "Remain",
            ManagerRequest::Depart { .. } => "Depart",
            ManagerRequest::GetIntercept { .. } => "GetIntercept",
            ManagerRequest::CreateIntercept { .. } => "CreateIntercept",
            ManagerRequest::RemoveIntercept { .. } => "RemoveIntercept",
            ManagerRequest::UpdateIntercept { .. } => "UpdateIntercept",
            ManagerRequest::ReviewIntercept { .. } => "ReviewIntercept",
            ManagerRequest::LookupHost { .. } => "LookupHost",
            ManagerRequest::AgentLookupHostResponse { .. } => "AgentLookupHostResponse",
            ManagerRequest::SetLogLevel { .. } => "SetLogLevel",
            ManagerRequest::GetLogs { .. } => "GetLogs",
        }
    }
}

/// Result of a unary traffic manager call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ManagerReply {
    /// Calls without a result
    Empty,
    Version(ManagerVersion),
    License(License),
    ClientApi(ClientApiInfo),
    CloudConnection(CloudConnection),
    CloudConfig(CloudConfig),
    Session(SessionInfo),
    Intercept(InterceptInfo),
    LookupHost(LookupHostResponse),
    Logs(LogsResponse),
}

/// A streaming traffic manager call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "stream", rename_all = "snake_case")]
pub enum StreamRequest {
    WatchAgents { session: SessionInfo },
    WatchIntercepts { session: SessionInfo },
    WatchClusterInfo { session: SessionInfo },
    WatchDial { session: SessionInfo },
    WatchLookupHost { session: SessionInfo },
    WatchLogLevel,
    /// Frames in both directions are plain [`TunnelMessage`]s
    Tunnel,
}

impl StreamRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            StreamRequest::WatchAgents { .. } => "WatchAgents",
            StreamRequest::WatchIntercepts { .. } => "WatchIntercepts",
            StreamRequest::WatchClusterInfo { .. } => "WatchClusterInfo",
            StreamRequest::WatchDial { .. } => "WatchDial",
            StreamRequest::WatchLookupHost { .. } => "WatchLookupHost",
            StreamRequest::WatchLogLevel => "WatchLogLevel",
            StreamRequest::Tunnel => "Tunnel",
        }
    }
}

/// One frame of a watch stream
///
/// `End` is always the last frame; it carries the error that ended the
/// watch, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamFrame<T> {
    Message(T),
    End { error: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&ManagerRequest::LookupHost {
            request: LookupHostRequest {
                host: "db".to_string(),
                ..Default::default()
            },
        })
        .unwrap();
        assert!(json.starts_with(r#"{"method":"lookup_host","request":"#));

        let parsed: ManagerRequest = serde_json::from_str(r#"{"method":"get_license"}"#).unwrap();
        assert_eq!(parsed, ManagerRequest::GetLicense);
        assert_eq!(parsed.operation(), "GetLicense");
    }

    #[test]
    fn test_reply_wire_format() {
        let json = serde_json::to_string(&ManagerReply::Empty).unwrap();
        assert_eq!(json, r#"{"kind":"empty"}"#);

        let json = serde_json::to_string(&ManagerReply::ClientApi(ClientApiInfo { port: 8081 }))
            .unwrap();
        assert_eq!(json, r#"{"kind":"client_api","value":{"port":8081}}"#);
    }

    #[test]
    fn test_stream_request_wire_format() {
        let parsed: StreamRequest = serde_json::from_str(r#"{"stream":"tunnel"}"#).unwrap();
        assert_eq!(parsed, StreamRequest::Tunnel);
        assert_eq!(StreamRequest::WatchLogLevel.operation(), "WatchLogLevel");
    }
}
