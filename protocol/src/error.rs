//! 错误类型定义

use std::any::Any;

use thiserror::Error;

use crate::connection::ConnectionId;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 监听地址不可用
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// 无法建立连接
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// 连接超时
    #[error("Connection to {addr} timed out")]
    ConnectionTimeout { addr: String },

    /// 读取失败
    #[error("Read error: {0}")]
    Read(#[source] std::io::Error),

    /// 写入失败
    #[error("Write error: {0}")]
    Write(#[source] std::io::Error),

    /// 连接未注册
    #[error("Connection {0} not found")]
    NotFound(ConnectionId),

    /// 客户端尚未连接
    #[error("Not connected")]
    NotConnected,

    /// 客户端已连接
    #[error("Already connected")]
    AlreadyConnected,

    /// 服务端已启动
    #[error("Server already started")]
    AlreadyStarted,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 分块大小非法
    #[error("Invalid chunk size: {0} (must be at least 1)")]
    InvalidChunkSize(usize),

    /// 配置非法
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// 回调 panic
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    /// 帧大小超限
    #[error("Frame too large: {size} bytes buffered (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// 由 `catch_unwind` 捕获的 panic 负载构造
    pub fn handler_panicked(panic: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else {
            "unknown panic payload".to_string()
        };
        Self::HandlerPanicked(message)
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_panicked_message() {
        let err = ProtocolError::handler_panicked(Box::new("boom"));
        assert_eq!(err.to_string(), "Handler panicked: boom");

        let err = ProtocolError::handler_panicked(Box::new(format!("bad {}", 7)));
        assert!(matches!(err, ProtocolError::HandlerPanicked(ref m) if m == "bad 7"));

        let err = ProtocolError::handler_panicked(Box::new(42u8));
        assert!(matches!(err, ProtocolError::HandlerPanicked(ref m) if m == "unknown panic payload"));
    }
}
