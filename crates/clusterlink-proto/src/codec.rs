//! Length-delimited codec for protocol messages
//!
//! Format: `[length: u32 big-endian][payload: bincode serialized message]`

use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::stream::{MessageReceiver, MessageSender, StreamError, StreamResult};
use async_trait::async_trait;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec for one message type
pub struct MessageCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> MessageCodec<T> {
    /// Maximum message size (16MB)
    pub const MAX_MESSAGE_SIZE: usize = crate::MAX_FRAME_SIZE as usize;

    const HEADER_SIZE: usize = 4;

    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for MessageCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Encoder<T> for MessageCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&item)?;

        if payload.len() > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(payload.len()));
        }

        dst.reserve(Self::HEADER_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl<T: DeserializeOwned> Decoder for MessageCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, Self::Error> {
        if src.len() < Self::HEADER_SIZE {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..Self::HEADER_SIZE]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(length));
        }

        if src.len() < Self::HEADER_SIZE + length {
            src.reserve(Self::HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(Self::HEADER_SIZE);
        let msg_bytes = src.split_to(length);
        Ok(Some(bincode::deserialize(&msg_bytes)?))
    }
}

impl From<CodecError> for StreamError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io) => StreamError::Io(io),
            other => StreamError::Codec(other),
        }
    }
}

/// Sending half of a framed byte stream
pub struct FramedSender<W, T> {
    inner: FramedWrite<W, MessageCodec<T>>,
}

impl<W: AsyncWrite + Unpin, T: Serialize> FramedSender<W, T> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, MessageCodec::new()),
        }
    }
}

/// Receiving half of a framed byte stream
pub struct FramedReceiver<R, T> {
    inner: FramedRead<R, MessageCodec<T>>,
}

impl<R: AsyncRead + Unpin, T: DeserializeOwned> FramedReceiver<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, MessageCodec::new()),
        }
    }
}

#[async_trait]
impl<W, T> MessageSender<T> for FramedSender<W, T>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize + Send + 'static,
{
    async fn send(&mut self, message: T) -> StreamResult<()> {
        self.inner.send(message).await.map_err(StreamError::from)
    }

    async fn close_send(&mut self) -> StreamResult<()> {
        SinkExt::<T>::close(&mut self.inner)
            .await
            .map_err(StreamError::from)
    }
}

#[async_trait]
impl<R, T> MessageReceiver<T> for FramedReceiver<R, T>
where
    R: AsyncRead + Unpin + Send,
    T: DeserializeOwned + Send + 'static,
{
    async fn recv(&mut self) -> StreamResult<Option<T>> {
        self.inner
            .next()
            .await
            .transpose()
            .map_err(StreamError::from)
    }
}
