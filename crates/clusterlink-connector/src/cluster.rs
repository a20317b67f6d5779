//! Cluster configuration and the cluster tracker contract

use async_trait::async_trait;
use clusterlink_proto::IngressInfo;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConnectorError;
use crate::lifetime::Lifetime;

/// Namespace filter value meaning "every namespace"
pub const ALL_NAMESPACES: &str = "all";

const KNOWN_FLAGS: &[&str] = &[
    "context",
    "server",
    "namespace",
    "kubeconfig",
    "cluster",
    "user",
    "request-timeout",
    "insecure-skip-tls-verify",
];

/// Canonical cluster selection, derived from the caller's flags
///
/// Two configs are equal when they select the same cluster connection;
/// `request_timeout` does not take part in the comparison.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub context: String,
    pub server: Option<String>,
    pub namespace: String,
    pub kubeconfig: Option<String>,
    pub cluster: Option<String>,
    pub user: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub request_timeout: Option<Duration>,
}

impl PartialEq for ClusterConfig {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context
            && self.server == other.server
            && self.namespace == other.namespace
            && self.kubeconfig == other.kubeconfig
            && self.cluster == other.cluster
            && self.user == other.user
            && self.insecure_skip_tls_verify == other.insecure_skip_tls_verify
    }
}

impl Eq for ClusterConfig {}

impl ClusterConfig {
    /// Parse and validate cluster selection flags
    pub fn from_flags(flags: &BTreeMap<String, String>) -> Result<Self, ConnectorError> {
        for (key, value) in flags {
            if !KNOWN_FLAGS.contains(&key.as_str()) {
                return Err(ConnectorError::ConfigInvalid(format!(
                    "unknown flag --{}",
                    key
                )));
            }
            if value.trim().is_empty() {
                return Err(ConnectorError::ConfigInvalid(format!(
                    "flag --{} has an empty value",
                    key
                )));
            }
        }

        let get = |key: &str| flags.get(key).map(|v| v.trim().to_string());

        let server = get("server");
        if let Some(server) = &server {
            if !(server.starts_with("https://") || server.starts_with("http://")) {
                return Err(ConnectorError::ConfigInvalid(format!(
                    "server {} must start with http:// or https://",
                    server
                )));
            }
        }

        let request_timeout = get("request-timeout")
            .map(|v| parse_timeout(&v))
            .transpose()?;

        let insecure_skip_tls_verify = match get("insecure-skip-tls-verify").as_deref() {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(ConnectorError::ConfigInvalid(format!(
                    "--insecure-skip-tls-verify must be true or false, got {}",
                    other
                )))
            }
        };

        Ok(Self {
            context: get("context").unwrap_or_else(|| "default".to_string()),
            server,
            namespace: get("namespace").unwrap_or_else(|| "default".to_string()),
            kubeconfig: get("kubeconfig"),
            cluster: get("cluster"),
            user: get("user"),
            insecure_skip_tls_verify,
            request_timeout,
        })
    }
}

/// Parse `30s`, `2m`, `500ms` or a bare number of seconds
fn parse_timeout(value: &str) -> Result<Duration, ConnectorError> {
    let invalid = || ConnectorError::ConfigInvalid(format!("invalid --request-timeout {}", value));

    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let n: u64 = number.parse().map_err(|_| invalid())?;
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(invalid()),
    }
}

/// Normalize a namespace filter set
///
/// `["all"]` collapses to the empty set (no filtering); any other set is
/// sorted so that comparisons and logs are deterministic.
pub fn normalize_namespaces(namespaces: &[String]) -> Vec<String> {
    if namespaces.len() == 1 && namespaces[0] == ALL_NAMESPACES {
        return Vec::new();
    }
    let mut sorted = namespaces.to_vec();
    sorted.sort();
    sorted
}

/// Live connection to one cluster
#[async_trait]
pub trait ClusterTracker: Send + Sync {
    /// The config this tracker was created for
    fn config(&self) -> &ClusterConfig;

    /// Whether this tracker already serves `config`
    fn matches(&self, config: &ClusterConfig) -> bool {
        self.config() == config
    }

    /// Replace the namespace filter of the running tracker
    async fn set_mapped_namespaces(&self, namespaces: Vec<String>);

    async fn cluster_id(&self) -> String;

    async fn detect_ingress(&self) -> Vec<IngressInfo>;

    /// Number of objects per resource kind, for diagnostics
    async fn count_objects(&self) -> BTreeMap<String, u64>;
}

/// Creates cluster trackers
#[async_trait]
pub trait ClusterTrackerFactory: Send + Sync {
    async fn track_cluster(
        &self,
        lifetime: &Lifetime,
        config: &ClusterConfig,
        mapped_namespaces: &[String],
    ) -> anyhow::Result<std::sync::Arc<dyn ClusterTracker>>;
}
