//! Per-call context and the call boundary guard
//!
//! Every inbound call runs under a [`CallContext`] that is done as soon as
//! either the service lifetime or the caller's lifetime is over. The call
//! itself runs inside [`guarded`], which names it, opens a tracing span, and
//! turns a panic into an ordinary error so one failing call cannot take the
//! service down.

use futures::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info_span, Instrument};

use crate::lifetime::{Lifetime, LifetimeError};

static CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique, human-readable name for one inbound call, e.g. `Connect-7`
pub fn call_name(operation: &str) -> String {
    let id = CALL_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{}-{}", operation, id)
}

/// Context of one inbound call
#[derive(Debug, Clone)]
pub struct CallContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    service: Lifetime,
    caller: Lifetime,
    name: String,
}

impl CallContext {
    pub fn new(service: &Lifetime, caller: &Lifetime, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                service: service.clone(),
                caller: caller.clone(),
                name: name.into(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The service lifetime this call runs under
    pub fn service(&self) -> &Lifetime {
        &self.inner.service
    }

    /// The earlier of the two deadlines
    pub fn deadline(&self) -> Option<Instant> {
        match (self.inner.service.deadline(), self.inner.caller.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.service.is_done() || self.inner.caller.is_done()
    }

    /// Resolves as soon as either lifetime is over
    pub async fn done(&self) {
        tokio::select! {
            _ = self.inner.service.done() => {}
            _ = self.inner.caller.done() => {}
        }
    }

    /// The service's error wins when both lifetimes are over
    pub fn err(&self) -> Option<LifetimeError> {
        self.inner
            .service
            .err()
            .or_else(|| self.inner.caller.err())
    }

    /// Values come from the service lifetime only; the caller's are not visible
    pub fn value(&self, key: &str) -> Option<&str> {
        self.inner.service.value(key)
    }
}

/// A panic caught at the call boundary
#[derive(Debug, Clone, Error)]
#[error("{call} panicked: {message}")]
pub struct Fault {
    pub call: String,
    pub message: String,
}

impl Fault {
    fn from_panic(call: &str, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self {
            call: call.to_string(),
            message,
        }
    }
}

impl From<Fault> for clusterlink_proto::RpcError {
    fn from(fault: Fault) -> Self {
        clusterlink_proto::RpcError::Internal(fault.to_string())
    }
}

/// Run one inbound call at the service boundary
///
/// The call gets a freshly named [`CallContext`]. A panic inside it is logged
/// and returned as `E::from(Fault)`; ordinary errors are logged and returned
/// unchanged.
pub async fn guarded<T, E, F, Fut>(
    service: &Lifetime,
    caller: &Lifetime,
    operation: &str,
    call: F,
) -> Result<T, E>
where
    F: FnOnce(CallContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Fault> + Display,
{
    let ctx = CallContext::new(service, caller, call_name(operation));
    let span = info_span!("call", name = %ctx.name());
    let name = ctx.name().to_string();

    let outcome = AssertUnwindSafe(call(ctx))
        .catch_unwind()
        .instrument(span.clone())
        .await;

    let _enter = span.enter();
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!("{}", e);
            Err(e)
        }
        Err(payload) => {
            let fault = Fault::from_panic(&name, payload);
            error!("{}", fault);
            Err(fault.into())
        }
    }
}
