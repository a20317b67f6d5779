//! Bridge contract
//!
//! The bridge is the network path between the workstation and the cluster.
//! How it is carried is up to the implementation; the connector only starts it
//! and asks whether it is healthy.

use async_trait::async_trait;
use std::sync::Arc;

use crate::lifetime::Lifetime;

#[async_trait]
pub trait Bridge: Send + Sync {
    /// Start the bridge; it keeps running until `lifetime` ends
    async fn start(&self, lifetime: &Lifetime) -> anyhow::Result<()>;

    /// Check bridge health
    async fn check(&self) -> bool;
}

/// Creates bridges from the traffic manager's negotiated transport parameters
pub trait BridgeFactory: Send + Sync {
    fn new_bridge(&self, bridge_port: u16) -> Arc<dyn Bridge>;
}
