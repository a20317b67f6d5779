//! IPC between local tooling and the connector daemon
//!
//! Newline-delimited JSON over a unix domain socket. A connection may carry
//! any number of request/response exchanges, and requests may be written
//! before earlier responses arrive; responses come back in request order.
//!
//! A [`IpcRequest::Stream`] request turns the connection into a stream: once
//! the daemon answers [`IpcResponse::Streaming`], both directions carry
//! length-delimited frames instead of JSON lines.

use anyhow::{Context, Result};
use clusterlink_proto::{
    ConnectInfo, ConnectRequest, CreateInterceptRequest, DeploymentInfoSnapshot, Duplex,
    FramedReceiver, FramedSender, InterceptResult, ListRequest, ManagerReply, ManagerRequest,
    MessageReceiver, SessionStatus, StreamFrame, StreamRequest, TunnelMessage, UninstallRequest,
    UninstallResult, VersionInfo,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

/// IPC request from local tooling to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Check that the daemon is alive
    Ping,

    Version,

    Connect { request: ConnectRequest },

    Status,

    List { request: ListRequest },

    CreateIntercept { request: CreateInterceptRequest },

    RemoveIntercept { name: String },

    Uninstall { request: UninstallRequest },

    /// Unary traffic manager call, relayed
    Manager { call: ManagerRequest },

    /// Streaming traffic manager call; switches the connection to frames
    Stream { request: StreamRequest },

    /// Shut the connector down
    Quit,
}

/// IPC response from the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Pong,

    Version { info: VersionInfo },

    Connect { info: ConnectInfo },

    Status { status: SessionStatus },

    List { snapshot: DeploymentInfoSnapshot },

    Intercept { result: InterceptResult },

    Uninstall { result: UninstallResult },

    Manager { reply: ManagerReply },

    /// Frames follow from here on
    Streaming,

    /// Success acknowledgment
    Ok { message: Option<String> },

    Error { message: String },
}

/// Buffered reading half of a connection
pub type LineReader = BufReader<OwnedReadHalf>;

async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, message: &T) -> Result<()> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');

    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write message")?;
    writer.flush().await.context("Failed to flush message")?;
    Ok(())
}

/// Read one JSON line; `None` at end of input
async fn read_line<T: DeserializeOwned>(reader: &mut LineReader) -> Result<Option<T>> {
    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read message")?;
    if bytes_read == 0 {
        return Ok(None);
    }

    let message = serde_json::from_str(&line).context("Failed to parse message")?;
    Ok(Some(message))
}

/// IPC client for local tooling
pub struct IpcClient {
    reader: LineReader,
    writer: OwnedWriteHalf,
}

impl IpcClient {
    pub async fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("Failed to connect to connector socket at {:?}", path))?;

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send a request and receive a response
    pub async fn request(&mut self, req: &IpcRequest) -> Result<IpcResponse> {
        write_line(&mut self.writer, req)
            .await
            .context("Failed to send request")?;

        match read_line(&mut self.reader).await? {
            Some(response) => Ok(response),
            None => anyhow::bail!("Connector closed the connection"),
        }
    }

    /// Make a relayed traffic manager call
    pub async fn manager(&mut self, call: ManagerRequest) -> Result<ManagerReply> {
        match self.request(&IpcRequest::Manager { call }).await? {
            IpcResponse::Manager { reply } => Ok(reply),
            IpcResponse::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    async fn open_stream(mut self, request: StreamRequest) -> Result<(LineReader, OwnedWriteHalf)> {
        match self.request(&IpcRequest::Stream { request }).await? {
            IpcResponse::Streaming => Ok((self.reader, self.writer)),
            IpcResponse::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Open a watch stream; `T` must match the watched message type
    pub async fn watch<T>(self, request: StreamRequest) -> Result<WatchStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (reader, writer) = self.open_stream(request).await?;
        Ok(WatchStream {
            frames: FramedReceiver::new(reader),
            _writer: writer,
        })
    }

    /// Open a tunnel through the connector to the traffic manager
    pub async fn tunnel(self) -> Result<Duplex<TunnelMessage>> {
        let (reader, writer) = self.open_stream(StreamRequest::Tunnel).await?;
        Ok((
            Box::new(FramedSender::<_, TunnelMessage>::new(writer)),
            Box::new(FramedReceiver::<_, TunnelMessage>::new(reader)),
        ))
    }
}

/// Client end of a relayed watch
pub struct WatchStream<T> {
    frames: FramedReceiver<LineReader, StreamFrame<T>>,
    // Closing the write side tells the daemon the client is gone
    _writer: OwnedWriteHalf,
}

impl<T: DeserializeOwned + Send + 'static> WatchStream<T> {
    /// Next message; `None` once the watch has ended cleanly
    pub async fn next(&mut self) -> Result<Option<T>> {
        match self.frames.recv().await? {
            Some(StreamFrame::Message(message)) => Ok(Some(message)),
            Some(StreamFrame::End { error: None }) | None => Ok(None),
            Some(StreamFrame::End { error: Some(error) }) => anyhow::bail!("{}", error),
        }
    }
}

/// IPC server owned by the daemon
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind to `path`, replacing a stale socket but never a live one
    pub async fn bind_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory {:?}", parent))?;
        }

        if path.exists() {
            match UnixStream::connect(path).await {
                Ok(_) => {
                    anyhow::bail!(
                        "Another connector is already running (socket at {:?} is active)",
                        path
                    );
                }
                Err(_) => {
                    std::fs::remove_file(path)
                        .with_context(|| format!("Failed to remove stale socket {:?}", path))?;
                }
            }
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind to socket at {:?}", path))?;

        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
        })
    }

    pub async fn accept(&self) -> Result<IpcConnection> {
        let (stream, _) = self.listener.accept().await?;
        let (reader, writer) = stream.into_split();
        Ok(IpcConnection {
            reader: RequestReader {
                reader: BufReader::new(reader),
            },
            writer: ResponseWriter { writer },
        })
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// A single IPC connection from a client
pub struct IpcConnection {
    reader: RequestReader,
    writer: ResponseWriter,
}

impl IpcConnection {
    pub fn into_split(self) -> (RequestReader, ResponseWriter) {
        (self.reader, self.writer)
    }
}

/// Reading half of a connection
///
/// `recv` is not cancel-safe; the daemon drives it from a dedicated task.
pub struct RequestReader {
    reader: LineReader,
}

impl RequestReader {
    /// Receive the next request; `None` once the client has hung up
    pub async fn recv(&mut self) -> Result<Option<IpcRequest>> {
        read_line(&mut self.reader)
            .await
            .context("Failed to receive request")
    }

    /// The buffered reader, including bytes read ahead of the last request
    pub fn into_inner(self) -> LineReader {
        self.reader
    }
}

/// Writing half of a connection
pub struct ResponseWriter {
    writer: OwnedWriteHalf,
}

impl ResponseWriter {
    pub async fn send(&mut self, response: &IpcResponse) -> Result<()> {
        write_line(&mut self.writer, response)
            .await
            .context("Failed to send response")
    }

    pub fn into_inner(self) -> OwnedWriteHalf {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&IpcRequest::RemoveIntercept {
            name: "web".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"remove_intercept","name":"web"}"#);

        let parsed: IpcRequest = serde_json::from_str(r#"{"type":"quit"}"#).unwrap();
        assert_eq!(parsed, IpcRequest::Quit);
    }

    #[test]
    fn test_relayed_request_wire_format() {
        let json = serde_json::to_string(&IpcRequest::Manager {
            call: ManagerRequest::GetClientApi,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"manager","call":{"method":"get_client_api"}}"#);

        let parsed: IpcRequest =
            serde_json::from_str(r#"{"type":"stream","request":{"stream":"tunnel"}}"#).unwrap();
        assert_eq!(
            parsed,
            IpcRequest::Stream {
                request: StreamRequest::Tunnel
            }
        );
    }

    #[test]
    fn test_response_round_trip() {
        let response = IpcResponse::Status {
            status: SessionStatus::default(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.starts_with(r#"{"type":"status""#));
        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }
}
