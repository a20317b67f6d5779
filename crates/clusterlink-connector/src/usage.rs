//! Usage reporting
//!
//! Reports are fire-and-forget: a failed report never affects the operation
//! that emitted it.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// One usage event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageEvent {
    pub action: String,
    pub metadata: BTreeMap<String, Value>,
}

impl UsageEvent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn report(&self, event: UsageEvent) -> anyhow::Result<()>;
}

/// Report and ignore the outcome
pub async fn report_best_effort(reporter: &dyn UsageReporter, event: UsageEvent) {
    let action = event.action.clone();
    if let Err(e) = reporter.report(event).await {
        debug!("Usage report {} failed: {}", action, e);
    }
}

/// Reporter that writes events to the log
#[derive(Debug, Clone)]
pub struct LogReporter {
    install_id: String,
}

impl LogReporter {
    pub fn new(install_id: impl Into<String>) -> Self {
        Self {
            install_id: install_id.into(),
        }
    }
}

#[async_trait]
impl UsageReporter for LogReporter {
    async fn report(&self, event: UsageEvent) -> anyhow::Result<()> {
        let metadata = serde_json::to_string(&event.metadata)?;
        debug!(
            install_id = %self.install_id,
            action = %event.action,
            "usage {}",
            metadata
        );
        Ok(())
    }
}
