//! Tunnel multiplexer
//!
//! A tunnel is relayed as two independent directions. Each endpoint gets a
//! receive pump feeding the other endpoint's send pump through its own queue,
//! so a stalled consumer on one side never blocks reads on the other.

use clusterlink_proto::{BoxReceiver, BoxSender, Duplex, TunnelMessage};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::call_context::CallContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Manager,
    Client,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Manager => write!(f, "manager"),
            Endpoint::Client => write!(f, "client"),
        }
    }
}

/// Pump frames between `caller` and `manager` until both directions end
///
/// Ending `ctx` winds down all four pumps. Each send pump half-closes its
/// destination on exit.
pub async fn relay(ctx: &CallContext, caller: Duplex<TunnelMessage>, manager: Duplex<TunnelMessage>) {
    let (caller_tx, caller_rx) = caller;
    let (manager_tx, manager_rx) = manager;

    let (to_client_tx, to_client_rx) = mpsc::channel(1);
    let (to_manager_tx, to_manager_rx) = mpsc::channel(1);

    let pumps = tokio::join!(
        tokio::spawn(recv_loop(ctx.clone(), Endpoint::Manager, manager_rx, to_client_tx)),
        tokio::spawn(send_loop(ctx.clone(), Endpoint::Manager, manager_tx, to_manager_rx)),
        tokio::spawn(recv_loop(ctx.clone(), Endpoint::Client, caller_rx, to_manager_tx)),
        tokio::spawn(send_loop(ctx.clone(), Endpoint::Client, caller_tx, to_client_rx)),
    );

    for result in [pumps.0, pumps.1, pumps.2, pumps.3] {
        if let Err(e) = result {
            error!("Tunnel pump task failed: {}", e);
        }
    }
    debug!("Tunnel relay ended");
}

async fn recv_loop(
    ctx: CallContext,
    from: Endpoint,
    mut source: BoxReceiver<TunnelMessage>,
    queue: mpsc::Sender<TunnelMessage>,
) {
    debug!("{} recv loop started", from);
    loop {
        let received = tokio::select! {
            received = source.recv() => received,
            _ = ctx.done() => break,
        };

        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                if !ctx.is_done() && !e.is_closed() {
                    error!("Tunnel {} recv failed: {}", from, e);
                }
                break;
            }
        };
        trace!("<- {} {}", from, message.payload.len());

        tokio::select! {
            queued = queue.send(message) => {
                if queued.is_err() {
                    break;
                }
            }
            _ = ctx.done() => break,
        }
    }
    // Dropping the queue sender ends the opposite send loop
    debug!("{} recv loop ended", from);
}

async fn send_loop(
    ctx: CallContext,
    to: Endpoint,
    mut sink: BoxSender<TunnelMessage>,
    mut queue: mpsc::Receiver<TunnelMessage>,
) {
    debug!("{} send loop started", to);
    loop {
        let message = tokio::select! {
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = ctx.done() => break,
        };

        let len = message.payload.len();
        let sent = tokio::select! {
            sent = sink.send(message) => sent,
            _ = ctx.done() => break,
        };
        if let Err(e) = sent {
            if !(e.is_closed() && ctx.is_done()) {
                error!("Tunnel {} send failed: {}", to, e);
            }
            break;
        }
        trace!("-> {} {}", to, len);
    }

    if let Err(e) = sink.close_send().await {
        if e.is_closed() {
            debug!("Tunnel {} already closed", to);
        } else {
            error!("Tunnel {} close_send failed: {}", to, e);
        }
    }
    debug!("{} send loop ended", to);
}
