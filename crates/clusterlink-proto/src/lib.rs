//! Clusterlink protocol definitions
//!
//! This crate defines the traffic manager protocol as seen from the
//! workstation, the connector's own request/response types, and the stream
//! and codec primitives used to carry them.

pub mod codec;
pub mod connector;
pub mod manager;
pub mod messages;
pub mod relayed;
pub mod stream;

pub use codec::{CodecError, FramedReceiver, FramedSender, MessageCodec};
pub use connector::*;
pub use manager::{Duplex, ManagerClient, RpcError, RpcResult};
pub use messages::*;
pub use relayed::{ManagerReply, ManagerRequest, StreamFrame, StreamRequest};
pub use stream::{
    BoxReceiver, BoxSender, MessageReceiver, MessageSender, StreamError, StreamResult,
};

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
