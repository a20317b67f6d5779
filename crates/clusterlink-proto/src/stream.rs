//! Message stream abstraction
//!
//! Streaming calls on the traffic manager protocol are expressed as a pair of
//! one-directional traits so that the relay does not care whether a stream is
//! backed by a socket, an in-process channel, or a test double.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::codec::CodecError;

/// Stream-level errors
#[derive(Debug, Error)]
pub enum StreamError {
    /// The underlying connection is gone
    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(CodecError),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// True when the error only says that the peer went away
    pub fn is_closed(&self) -> bool {
        match self {
            StreamError::Closed => true,
            StreamError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Receiving half of a message stream
#[async_trait]
pub trait MessageReceiver<T>: Send {
    /// Receive the next message
    ///
    /// Returns `None` once the peer has ended the stream.
    async fn recv(&mut self) -> StreamResult<Option<T>>;
}

/// Sending half of a message stream
#[async_trait]
pub trait MessageSender<T>: Send {
    async fn send(&mut self, message: T) -> StreamResult<()>;

    /// Half-close: tell the peer no more messages will follow
    ///
    /// Streams without a half-close signal keep the default no-op.
    async fn close_send(&mut self) -> StreamResult<()> {
        Ok(())
    }
}

pub type BoxSender<T> = Box<dyn MessageSender<T>>;
pub type BoxReceiver<T> = Box<dyn MessageReceiver<T>>;

/// In-process stream backed by a bounded channel
pub fn channel<T: Send + 'static>(capacity: usize) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelSender { tx: Some(tx) }, ChannelReceiver { rx })
}

#[derive(Debug)]
pub struct ChannelSender<T> {
    tx: Option<mpsc::Sender<T>>,
}

#[derive(Debug)]
pub struct ChannelReceiver<T> {
    rx: mpsc::Receiver<T>,
}

#[async_trait]
impl<T: Send + 'static> MessageSender<T> for ChannelSender<T> {
    async fn send(&mut self, message: T) -> StreamResult<()> {
        let tx = self.tx.as_ref().ok_or(StreamError::Closed)?;
        tx.send(message).await.map_err(|_| StreamError::Closed)
    }

    async fn close_send(&mut self) -> StreamResult<()> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl<T: Send + 'static> MessageReceiver<T> for ChannelReceiver<T> {
    async fn recv(&mut self) -> StreamResult<Option<T>> {
        Ok(self.rx.recv().await)
    }
}
