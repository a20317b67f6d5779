//! Clusterlink connector
//!
//! The session-management core of the workstation side: it owns the single
//! cluster connection of the process, relays the traffic manager protocol to
//! local tooling, and serves both over a local IPC socket.

pub mod bridge;
pub mod call_context;
pub mod cluster;
pub mod config;
pub mod connector;
pub mod coordinator;
#[cfg(unix)]
pub mod daemon;
pub mod error;
#[cfg(unix)]
pub mod ipc;
pub mod lifetime;
pub mod relay;
pub mod service;
pub mod session;
pub mod tunnel;
pub mod usage;

pub use bridge::{Bridge, BridgeFactory};
pub use call_context::{call_name, guarded, CallContext, Fault};
pub use cluster::{
    normalize_namespaces, ClusterConfig, ClusterTracker, ClusterTrackerFactory, ALL_NAMESPACES,
};
pub use config::{ConfigManager, ConnectorConfig};
pub use connector::{Collaborators, ConnectSettings, Connector};
pub use coordinator::{TrafficCoordinator, TrafficCoordinatorFactory};
pub use error::ConnectorError;
pub use lifetime::{Lifetime, LifetimeError};
pub use relay::ManagerRelay;
pub use service::ConnectorService;
pub use session::{Session, SessionCell};
pub use usage::{LogReporter, UsageEvent, UsageReporter};
