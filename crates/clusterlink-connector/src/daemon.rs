//! Connector daemon
//!
//! Serves the connector over IPC until the service lifetime ends, either
//! through Quit, a fatal connect failure, or Ctrl-C.

use anyhow::Result;
use clusterlink_proto::stream::{channel, ChannelSender};
use clusterlink_proto::{
    AgentInfoSnapshot, ClusterInfo, DialRequest, Duplex, FramedReceiver, FramedSender,
    InterceptInfoSnapshot, LogLevelRequest, LookupHostRequest, MessageReceiver, MessageSender,
    RpcError, RpcResult, StreamFrame, StreamRequest, TunnelMessage,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::call_context::CallContext;
use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::ipc::{
    IpcConnection, IpcRequest, IpcResponse, IpcServer, LineReader, RequestReader, ResponseWriter,
};
use crate::lifetime::Lifetime;
use crate::relay::ManagerRelay;
use crate::service::ConnectorService;

/// Requests read ahead of the one being served
const REQUEST_QUEUE: usize = 16;

/// Watch messages buffered between the relay and the socket
const WATCH_BUFFER: usize = 16;

/// What the reader task hands to the connection handler, in arrival order
enum Inbound {
    Request(IpcRequest),
    /// Last item: the rest of the input belongs to the stream
    Stream(StreamRequest, RequestReader),
}

/// Run the daemon on the configured socket
pub async fn run(service: Arc<ConnectorService>, config: &ConnectorConfig) -> Result<()> {
    info!("🚀 Connector starting...");

    let server = IpcServer::bind_to(&config.socket_path()?).await?;
    info!("IPC server listening at {:?}", server.path());

    let lifetime = service.lifetime().clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    if lifetime.end("interrupted") {
                        info!("Interrupted, shutting down");
                    }
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            },
            _ = lifetime.done() => {}
        }
    });

    serve(service, server, config.soft_shutdown_timeout()).await;
    Ok(())
}

/// Accept IPC connections until the service lifetime ends
///
/// In-flight connections get `soft_shutdown` to finish before they are
/// aborted.
pub async fn serve(service: Arc<ConnectorService>, server: IpcServer, soft_shutdown: Duration) {
    let lifetime = service.lifetime().clone();
    let mut connections = JoinSet::new();

    info!("✅ Connector ready");
    loop {
        tokio::select! {
            _ = lifetime.done() => break,
            accepted = server.accept() => match accepted {
                Ok(conn) => {
                    connections.spawn(handle_connection(service.clone(), conn));
                }
                Err(e) => {
                    error!("IPC accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    warn!("IPC connection task failed: {}", e);
                }
            }
        }
    }

    info!(
        "Shutting down ({}), waiting for {} connection(s)",
        lifetime.end_reason().unwrap_or("cancelled"),
        connections.len()
    );
    let drained = tokio::time::timeout(soft_shutdown, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Soft shutdown timed out after {:?}, aborting", soft_shutdown);
        connections.abort_all();
    }

    info!("✅ Connector stopped");
}

async fn handle_connection(service: Arc<ConnectorService>, conn: IpcConnection) {
    // Ends when the client hangs up, which cancels its in-flight call
    let caller = Lifetime::new();

    let (reader, mut writer) = conn.into_split();
    let (queue, mut inbound) = mpsc::channel(REQUEST_QUEUE);
    let reading = tokio::spawn(read_requests(reader, queue, caller.clone()));

    loop {
        let next = tokio::select! {
            next = inbound.recv() => next,
            _ = service.lifetime().done() => break,
        };

        match next {
            Some(Inbound::Request(request)) => {
                let response = dispatch(&service, &caller, request).await;
                if let Err(e) = writer.send(&response).await {
                    warn!("IPC send error: {}", e);
                    break;
                }
            }
            Some(Inbound::Stream(request, reader)) => {
                serve_stream(&service, &caller, request, reader, writer).await;
                break;
            }
            None => break,
        }
    }

    caller.end("connection closed");
    reading.abort();
}

/// Read requests until end of input, a read error, or a stream request
///
/// Requests are queued in order; the handler answers them one at a time
/// while this task keeps reading.
async fn read_requests(mut reader: RequestReader, queue: mpsc::Sender<Inbound>, caller: Lifetime) {
    loop {
        let next = match reader.recv().await {
            Ok(Some(IpcRequest::Stream { request })) => {
                let _ = queue.send(Inbound::Stream(request, reader)).await;
                return;
            }
            Ok(Some(request)) => Inbound::Request(request),
            Ok(None) => {
                debug!("IPC client hung up");
                break;
            }
            Err(e) => {
                warn!("IPC recv error: {:#}", e);
                break;
            }
        };

        if queue.send(next).await.is_err() {
            return;
        }
    }

    caller.end("connection closed");
}

async fn dispatch(service: &ConnectorService, caller: &Lifetime, request: IpcRequest) -> IpcResponse {
    let result = match request {
        IpcRequest::Ping => return IpcResponse::Pong,
        IpcRequest::Version => service
            .version(caller)
            .await
            .map(|info| IpcResponse::Version { info }),
        IpcRequest::Connect { request } => service
            .connect(caller, request)
            .await
            .map(|info| IpcResponse::Connect { info }),
        IpcRequest::Status => service
            .status(caller)
            .await
            .map(|status| IpcResponse::Status { status }),
        IpcRequest::List { request } => service
            .list(caller, request)
            .await
            .map(|snapshot| IpcResponse::List { snapshot }),
        IpcRequest::CreateIntercept { request } => service
            .create_intercept(caller, request)
            .await
            .map(|result| IpcResponse::Intercept { result }),
        IpcRequest::RemoveIntercept { name } => service
            .remove_intercept(caller, name)
            .await
            .map(|result| IpcResponse::Intercept { result }),
        IpcRequest::Uninstall { request } => service
            .uninstall(caller, request)
            .await
            .map(|result| IpcResponse::Uninstall { result }),
        IpcRequest::Manager { call } => service
            .manager(caller, call)
            .await
            .map(|reply| IpcResponse::Manager { reply })
            .map_err(ConnectorError::from),
        // The reader task hands stream requests over separately
        IpcRequest::Stream { request } => {
            return IpcResponse::Error {
                message: format!("{} must be the last request on a connection", request.operation()),
            }
        }
        IpcRequest::Quit => service.quit(caller).await.map(|()| IpcResponse::Ok {
            message: Some("Connector shutting down".to_string()),
        }),
    };

    result.unwrap_or_else(|e| IpcResponse::Error {
        message: e.to_string(),
    })
}

/// Serve a streaming call on a connection that has switched to frames
async fn serve_stream(
    service: &ConnectorService,
    caller: &Lifetime,
    request: StreamRequest,
    reader: RequestReader,
    mut writer: ResponseWriter,
) {
    let operation = request.operation();

    // Once framing starts there is no way to report a tunnel error
    if matches!(request, StreamRequest::Tunnel) && !service.relay().is_ready() {
        let response = IpcResponse::Error {
            message: RpcError::Unavailable.to_string(),
        };
        if let Err(e) = writer.send(&response).await {
            warn!("IPC send error: {}", e);
        }
        return;
    }

    if let Err(e) = writer.send(&IpcResponse::Streaming).await {
        warn!("IPC send error: {}", e);
        return;
    }
    debug!("Connection switched to {} frames", operation);

    let reader = reader.into_inner();
    let writer = writer.into_inner();
    match request {
        StreamRequest::Tunnel => {
            let caller_end: Duplex<TunnelMessage> = (
                Box::new(FramedSender::<_, TunnelMessage>::new(writer)),
                Box::new(FramedReceiver::<_, TunnelMessage>::new(reader)),
            );
            let result = service
                .relay_call(caller, operation, |ctx, relay| async move {
                    relay.tunnel(&ctx, caller_end).await
                })
                .await;
            if let Err(e) = result {
                warn!("Tunnel failed: {}", e);
            }
        }
        StreamRequest::WatchAgents { session } => {
            watch::<AgentInfoSnapshot, _, _>(
                service,
                caller,
                operation,
                reader,
                writer,
                |ctx, relay, mut out| async move { relay.watch_agents(&ctx, session, &mut out).await },
            )
            .await
        }
        StreamRequest::WatchIntercepts { session } => {
            watch::<InterceptInfoSnapshot, _, _>(
                service,
                caller,
                operation,
                reader,
                writer,
                |ctx, relay, mut out| async move {
                    relay.watch_intercepts(&ctx, session, &mut out).await
                },
            )
            .await
        }
        StreamRequest::WatchClusterInfo { session } => {
            watch::<ClusterInfo, _, _>(
                service,
                caller,
                operation,
                reader,
                writer,
                |ctx, relay, mut out| async move {
                    relay.watch_cluster_info(&ctx, session, &mut out).await
                },
            )
            .await
        }
        StreamRequest::WatchDial { session } => {
            watch::<DialRequest, _, _>(
                service,
                caller,
                operation,
                reader,
                writer,
                |ctx, relay, mut out| async move { relay.watch_dial(&ctx, session, &mut out).await },
            )
            .await
        }
        StreamRequest::WatchLookupHost { session } => {
            watch::<LookupHostRequest, _, _>(
                service,
                caller,
                operation,
                reader,
                writer,
                |ctx, relay, mut out| async move {
                    relay.watch_lookup_host(&ctx, session, &mut out).await
                },
            )
            .await
        }
        StreamRequest::WatchLogLevel => {
            watch::<LogLevelRequest, _, _>(
                service,
                caller,
                operation,
                reader,
                writer,
                |ctx, relay, mut out| async move { relay.watch_log_level(&ctx, &mut out).await },
            )
            .await
        }
    }
}

/// Run a watch and write its messages as frames, then a final `End` frame
async fn watch<T, F, Fut>(
    service: &ConnectorService,
    caller: &Lifetime,
    operation: &str,
    reader: LineReader,
    writer: OwnedWriteHalf,
    subscribe: F,
) where
    T: Serialize + Send + 'static,
    F: FnOnce(CallContext, Arc<ManagerRelay>, ChannelSender<T>) -> Fut,
    Fut: Future<Output = RpcResult<()>>,
{
    // Nothing is read on a watch, so end of input means the client left
    let hangup = tokio::spawn({
        let caller = caller.clone();
        let mut reader = reader;
        async move {
            let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
            caller.end("connection closed");
        }
    });

    let mut frames = FramedSender::<_, StreamFrame<T>>::new(writer);
    let (out, messages) = channel::<T>(WATCH_BUFFER);
    let subscription = service.relay_call(caller, operation, |ctx, relay| {
        subscribe(ctx, relay, out)
    });
    let forwarding = async {
        let mut messages = messages;
        while let Ok(Some(message)) = messages.recv().await {
            if let Err(e) = frames.send(StreamFrame::Message(message)).await {
                debug!("{} client went away: {}", operation, e);
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(subscription, forwarding);

    let error = match result {
        Ok(()) => None,
        Err(e) => {
            debug!("{} ended: {}", operation, e);
            Some(e.to_string())
        }
    };
    if let Err(e) = frames.send(StreamFrame::End { error }).await {
        debug!("{} end frame not delivered: {}", operation, e);
    }
    let _ = frames.close_send().await;
    hangup.abort();
}
