//! 基于结束标记分帧的 TCP 消息协议库
//!
//! 包含:
//! - 帧编解码 (FrameCodec)
//! - 传输层抽象 (Transport trait)
//! - 连接封装 (Connection / ConnectionReader)

mod codec;
mod connection;
mod constants;
mod error;
mod transport;

pub use codec::{
    decode_text, encode_chunks, encode_frame, feed, is_blank, FrameDecoder, Payload,
};
pub use connection::{
    Connection, ConnectionHandler, ConnectionId, ConnectionReader, DisconnectReason,
};
pub use constants::*;
pub use error::{ProtocolError, Result};
pub use transport::{TcpListener, TcpTransport, Transport, TransportConfig, TransportListener};
