//! Mock collaborators shared by the connector test suites

#![allow(dead_code)]

use async_trait::async_trait;
use clusterlink_connector::{
    Bridge, BridgeFactory, ClusterConfig, ClusterTracker, ClusterTrackerFactory, Collaborators,
    ConnectSettings, ConnectorService, Lifetime, TrafficCoordinator, TrafficCoordinatorFactory,
    UsageEvent, UsageReporter,
};
use clusterlink_proto::stream::channel;
use clusterlink_proto::*;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn flags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn connect_request(context: &str, namespaces: &[&str]) -> ConnectRequest {
    ConnectRequest {
        kube_flags: flags(&[("context", context), ("server", "https://k8s.example:6443")]),
        mapped_namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
    }
}

// ============================================================================
// Cluster
// ============================================================================

pub struct MockCluster {
    config: ClusterConfig,
    namespaces: Mutex<Vec<String>>,
}

impl MockCluster {
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterTracker for MockCluster {
    fn config(&self) -> &ClusterConfig {
        &self.config
    }

    async fn set_mapped_namespaces(&self, namespaces: Vec<String>) {
        *self.namespaces.lock().unwrap() = namespaces;
    }

    async fn cluster_id(&self) -> String {
        format!("cluster-{}", self.config.context)
    }

    async fn detect_ingress(&self) -> Vec<IngressInfo> {
        vec![IngressInfo {
            kind: "LoadBalancer".to_string(),
            host: "ingress.example".to_string(),
            port: 443,
            use_tls: true,
        }]
    }

    async fn count_objects(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([("pods".to_string(), 12), ("services".to_string(), 4)])
    }
}

#[derive(Default)]
pub struct MockClusterFactory {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub last: Mutex<Option<Arc<MockCluster>>>,
}

#[async_trait]
impl ClusterTrackerFactory for MockClusterFactory {
    async fn track_cluster(
        &self,
        _lifetime: &Lifetime,
        config: &ClusterConfig,
        mapped_namespaces: &[String],
    ) -> anyhow::Result<Arc<dyn ClusterTracker>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("kubeconfig has no context {}", config.context);
        }
        let cluster = Arc::new(MockCluster {
            config: config.clone(),
            namespaces: Mutex::new(mapped_namespaces.to_vec()),
        });
        *self.last.lock().unwrap() = Some(cluster.clone());
        Ok(cluster)
    }
}

// ============================================================================
// Traffic manager
// ============================================================================

/// Receiver that replays a script, then either ends or hangs
pub struct ScriptedReceiver<T> {
    items: VecDeque<StreamResult<T>>,
    hang: bool,
}

impl<T> ScriptedReceiver<T> {
    pub fn new(items: Vec<StreamResult<T>>, hang: bool) -> Self {
        Self {
            items: items.into(),
            hang,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> MessageReceiver<T> for ScriptedReceiver<T> {
    async fn recv(&mut self) -> StreamResult<Option<T>> {
        match self.items.pop_front() {
            Some(item) => item.map(Some),
            None if self.hang => std::future::pending().await,
            None => Ok(None),
        }
    }
}

pub fn agents_snapshot(names: &[&str]) -> AgentInfoSnapshot {
    AgentInfoSnapshot {
        agents: names
            .iter()
            .map(|name| AgentInfo {
                name: name.to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            })
            .collect(),
    }
}

/// Traffic manager client with canned answers
///
/// Tunnels opened through it hand their manager-side halves to the
/// receiver returned by [`MockManagerClient::new`].
pub struct MockManagerClient {
    pub slow: AtomicBool,
    pub calls: AtomicUsize,
    tunnels: mpsc::UnboundedSender<Duplex<TunnelMessage>>,
}

impl MockManagerClient {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Duplex<TunnelMessage>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            slow: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            tunnels: tx,
        });
        (client, rx)
    }

    async fn answer<T>(&self, value: T) -> RpcResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(value)
    }
}

#[async_trait]
impl ManagerClient for MockManagerClient {
    async fn version(&self) -> RpcResult<ManagerVersion> {
        self.answer(ManagerVersion {
            name: "traffic-manager".to_string(),
            version: "2.4.0".to_string(),
        })
        .await
    }

    async fn get_license(&self) -> RpcResult<License> {
        self.answer(License {
            license: "community".to_string(),
            host_domain: "example.com".to_string(),
            error_text: String::new(),
        })
        .await
    }

    async fn get_client_api(&self) -> RpcResult<ClientApiInfo> {
        self.answer(ClientApiInfo { port: 8081 }).await
    }

    async fn can_connect_cloud(&self) -> RpcResult<CloudConnection> {
        self.answer(CloudConnection { can_connect: false }).await
    }

    async fn get_cloud_config(&self) -> RpcResult<CloudConfig> {
        Err(RpcError::Remote("cloud not configured".to_string()))
    }

    async fn arrive_as_client(&self, info: ClientInfo) -> RpcResult<SessionInfo> {
        self.answer(SessionInfo {
            session_id: format!("session-{}", info.name),
        })
        .await
    }

    async fn arrive_as_agent(&self, info: AgentInfo) -> RpcResult<SessionInfo> {
        self.answer(SessionInfo {
            session_id: format!("agent-{}", info.name),
        })
        .await
    }

    async fn remain(&self, _request: RemainRequest) -> RpcResult<()> {
        self.answer(()).await
    }

    async fn depart(&self, _session: SessionInfo) -> RpcResult<()> {
        self.answer(()).await
    }

    async fn get_intercept(&self, request: GetInterceptRequest) -> RpcResult<InterceptInfo> {
        Err(RpcError::Remote(format!("intercept {} not found", request.name)))
    }

    async fn create_intercept(&self, request: CreateInterceptRequest) -> RpcResult<InterceptInfo> {
        self.answer(InterceptInfo {
            spec: request.spec,
            ..Default::default()
        })
        .await
    }

    async fn remove_intercept(&self, _request: RemoveInterceptRequest) -> RpcResult<()> {
        self.answer(()).await
    }

    async fn update_intercept(&self, request: UpdateInterceptRequest) -> RpcResult<InterceptInfo> {
        self.answer(InterceptInfo {
            spec: InterceptSpec {
                name: request.name,
                ..Default::default()
            },
            ..Default::default()
        })
        .await
    }

    async fn review_intercept(&self, _request: ReviewInterceptRequest) -> RpcResult<()> {
        self.answer(()).await
    }

    async fn lookup_host(&self, request: LookupHostRequest) -> RpcResult<LookupHostResponse> {
        let ips = match request.host.as_str() {
            "db.default" => vec!["10.0.0.7".to_string()],
            _ => Vec::new(),
        };
        self.answer(LookupHostResponse { ips }).await
    }

    async fn agent_lookup_host_response(
        &self,
        _response: LookupHostAgentResponse,
    ) -> RpcResult<()> {
        self.answer(()).await
    }

    async fn set_log_level(&self, _request: LogLevelRequest) -> RpcResult<()> {
        self.answer(()).await
    }

    async fn get_logs(&self, _request: GetLogsRequest) -> RpcResult<LogsResponse> {
        self.answer(LogsResponse::default()).await
    }

    async fn watch_agents(&self, _session: SessionInfo) -> RpcResult<BoxReceiver<AgentInfoSnapshot>> {
        Ok(Box::new(ScriptedReceiver::new(
            vec![
                Ok(agents_snapshot(&["web"])),
                Ok(agents_snapshot(&["web", "db"])),
            ],
            false,
        )))
    }

    async fn watch_intercepts(
        &self,
        _session: SessionInfo,
    ) -> RpcResult<BoxReceiver<InterceptInfoSnapshot>> {
        Ok(Box::new(ScriptedReceiver::new(
            vec![Ok(InterceptInfoSnapshot::default())],
            true,
        )))
    }

    async fn watch_cluster_info(&self, _session: SessionInfo) -> RpcResult<BoxReceiver<ClusterInfo>> {
        Ok(Box::new(ScriptedReceiver::new(
            vec![
                Ok(ClusterInfo {
                    cluster_domain: "cluster.local".to_string(),
                    ..Default::default()
                }),
                Err(StreamError::Transport("stream reset by peer".to_string())),
            ],
            false,
        )))
    }

    async fn watch_dial(&self, _session: SessionInfo) -> RpcResult<BoxReceiver<DialRequest>> {
        Ok(Box::new(ScriptedReceiver::new(
            vec![Err(StreamError::Closed)],
            false,
        )))
    }

    async fn watch_lookup_host(
        &self,
        _session: SessionInfo,
    ) -> RpcResult<BoxReceiver<LookupHostRequest>> {
        Ok(Box::new(ScriptedReceiver::new(Vec::new(), false)))
    }

    async fn watch_log_level(&self) -> RpcResult<BoxReceiver<LogLevelRequest>> {
        Ok(Box::new(ScriptedReceiver::new(Vec::new(), false)))
    }

    async fn tunnel(&self) -> RpcResult<Duplex<TunnelMessage>> {
        let (to_manager_tx, to_manager_rx) = channel::<TunnelMessage>(8);
        let (from_manager_tx, from_manager_rx) = channel::<TunnelMessage>(8);
        let manager_end: Duplex<TunnelMessage> =
            (Box::new(from_manager_tx), Box::new(to_manager_rx));
        self.tunnels
            .send(manager_end)
            .map_err(|_| RpcError::Remote("tunnel endpoint gone".to_string()))?;
        Ok((Box::new(to_manager_tx), Box::new(from_manager_rx)))
    }
}

pub struct MockCoordinator {
    client: Arc<MockManagerClient>,
    ready: ReadyBehavior,
    pub intercepts: Mutex<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyBehavior {
    #[default]
    Ready,
    Fail,
    Hang,
}

#[async_trait]
impl TrafficCoordinator for MockCoordinator {
    async fn wait_until_started(&self) -> anyhow::Result<()> {
        match self.ready {
            ReadyBehavior::Ready => Ok(()),
            ReadyBehavior::Fail => anyhow::bail!("traffic manager rejected client"),
            ReadyBehavior::Hang => std::future::pending().await,
        }
    }

    fn manager_client(&self) -> Arc<dyn ManagerClient> {
        self.client.clone()
    }

    fn bridge_port(&self) -> u16 {
        8022
    }

    async fn set_status(&self, info: &mut ConnectInfo) {
        info.session_id = Some("session-1".to_string());
        info.manager_version = Some("2.4.0".to_string());
    }

    async fn add_intercept(&self, request: CreateInterceptRequest) -> anyhow::Result<InterceptInfo> {
        let name = request.spec.name.clone();
        if name == "broken" {
            anyhow::bail!("no agent for workload broken");
        }
        self.intercepts.lock().unwrap().push(name.clone());
        Ok(InterceptInfo {
            id: format!("{}-id", name),
            spec: request.spec,
            disposition: InterceptDisposition::Active,
            ..Default::default()
        })
    }

    async fn remove_intercept(&self, name: &str) -> anyhow::Result<()> {
        let mut intercepts = self.intercepts.lock().unwrap();
        let before = intercepts.len();
        intercepts.retain(|n| n != name);
        if intercepts.len() == before {
            anyhow::bail!("intercept {} not found", name);
        }
        Ok(())
    }

    async fn workloads(&self, request: &ListRequest) -> DeploymentInfoSnapshot {
        let namespace = request
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let mut workloads = vec![WorkloadInfo {
            name: "web".to_string(),
            namespace: namespace.clone(),
            resource_type: "Deployment".to_string(),
            ..Default::default()
        }];
        if request.filter == ListFilter::Everything {
            workloads.push(WorkloadInfo {
                name: "batch".to_string(),
                namespace,
                resource_type: "Job".to_string(),
                not_interceptable_reason: Some("not a long-running workload".to_string()),
                ..Default::default()
            });
        }
        DeploymentInfoSnapshot { workloads }
    }

    async fn uninstall(&self, request: UninstallRequest) -> anyhow::Result<()> {
        if request.agents.iter().any(|a| a == "broken") {
            anyhow::bail!("agent broken is not installed");
        }
        Ok(())
    }
}

pub struct MockCoordinatorFactory {
    pub client: Arc<MockManagerClient>,
    pub fail: AtomicBool,
    pub ready: Mutex<ReadyBehavior>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl TrafficCoordinatorFactory for MockCoordinatorFactory {
    async fn new_coordinator(
        &self,
        _lifetime: &Lifetime,
        _cluster: Arc<dyn ClusterTracker>,
        install_id: &str,
    ) -> anyhow::Result<Arc<dyn TrafficCoordinator>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(install_id, "install-test");
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("traffic manager not installed");
        }
        Ok(Arc::new(MockCoordinator {
            client: self.client.clone(),
            ready: *self.ready.lock().unwrap(),
            intercepts: Mutex::new(Vec::new()),
        }))
    }
}

// ============================================================================
// Bridge
// ============================================================================

pub struct MockBridge {
    pub port: u16,
}

#[async_trait]
impl Bridge for MockBridge {
    async fn start(&self, _lifetime: &Lifetime) -> anyhow::Result<()> {
        Ok(())
    }

    async fn check(&self) -> bool {
        true
    }
}

struct FailingBridge;

#[async_trait]
impl Bridge for FailingBridge {
    async fn start(&self, _lifetime: &Lifetime) -> anyhow::Result<()> {
        anyhow::bail!("port 8022 refused")
    }

    async fn check(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct MockBridgeFactory {
    pub fail: AtomicBool,
    pub ports: Mutex<Vec<u16>>,
}

impl BridgeFactory for MockBridgeFactory {
    fn new_bridge(&self, bridge_port: u16) -> Arc<dyn Bridge> {
        self.ports.lock().unwrap().push(bridge_port);
        if self.fail.load(Ordering::SeqCst) {
            Arc::new(FailingBridge)
        } else {
            Arc::new(MockBridge { port: bridge_port })
        }
    }
}

// ============================================================================
// Usage
// ============================================================================

#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<UsageEvent>>,
    pub fail: AtomicBool,
}

impl RecordingReporter {
    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.action.clone())
            .collect()
    }
}

#[async_trait]
impl UsageReporter for RecordingReporter {
    async fn report(&self, event: UsageEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("usage endpoint unreachable");
        }
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub lifetime: Lifetime,
    pub service: Arc<ConnectorService>,
    pub clusters: Arc<MockClusterFactory>,
    pub coordinators: Arc<MockCoordinatorFactory>,
    pub bridges: Arc<MockBridgeFactory>,
    pub usage: Arc<RecordingReporter>,
    pub manager: Arc<MockManagerClient>,
    pub tunnels: mpsc::UnboundedReceiver<Duplex<TunnelMessage>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ready_timeout(Duration::from_secs(5))
    }

    pub fn with_ready_timeout(ready_timeout: Duration) -> Self {
        let lifetime = Lifetime::new();
        let (manager, tunnels) = MockManagerClient::new();
        let clusters = Arc::new(MockClusterFactory::default());
        let coordinators = Arc::new(MockCoordinatorFactory {
            client: manager.clone(),
            fail: AtomicBool::new(false),
            ready: Mutex::new(ReadyBehavior::Ready),
            calls: AtomicUsize::new(0),
        });
        let bridges = Arc::new(MockBridgeFactory::default());
        let usage = Arc::new(RecordingReporter::default());

        let collaborators = Collaborators {
            clusters: clusters.clone(),
            coordinators: coordinators.clone(),
            bridges: bridges.clone(),
            usage: usage.clone(),
        };
        let settings = ConnectSettings {
            install_id: "install-test".to_string(),
            ready_timeout,
        };
        let service = Arc::new(ConnectorService::new(
            lifetime.clone(),
            collaborators,
            settings,
        ));

        Self {
            lifetime,
            service,
            clusters,
            coordinators,
            bridges,
            usage,
            manager,
            tunnels,
        }
    }

    /// A caller lifetime for one test call
    pub fn caller(&self) -> Lifetime {
        Lifetime::new()
    }

    pub async fn connect(&self, request: ConnectRequest) -> ConnectInfo {
        self.service
            .connect(&self.caller(), request)
            .await
            .expect("connect never fails at the boundary")
    }
}
