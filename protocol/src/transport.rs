//! 传输层抽象
//!
//! 提供 Transport trait 使帧协议与具体传输实现解耦。

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ProtocolError, Result};
use crate::{CONNECT_TIMEOUT, DEFAULT_ADDRESS, DEFAULT_CHUNK_SIZE, DEFAULT_PORT, MAX_FRAME_SIZE};

/// 传输层配置
///
/// 客户端和服务端必须使用相同的 `chunk_size`。
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// 地址（IP 或主机名）
    pub address: String,
    /// 端口，服务端传 0 表示由系统分配
    pub port: u16,
    /// 每次读写的分块大小
    pub chunk_size: usize,
    /// 单帧累积缓冲区上限
    pub max_frame_size: usize,
    /// 连接超时时间
    pub connect_timeout: Duration,
    /// 是否禁用 Nagle 算法（TCP nodelay）
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_frame_size: MAX_FRAME_SIZE,
            connect_timeout: CONNECT_TIMEOUT,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// 以给定地址和端口创建配置，其余取默认值
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// 设置分块大小
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// "address:port" 形式的地址
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ProtocolError::InvalidChunkSize(self.chunk_size));
        }
        if self.max_frame_size == 0 {
            return Err(ProtocolError::InvalidConfig(
                "max_frame_size must be at least 1".to_string(),
            ));
        }
        if self.address.is_empty() {
            return Err(ProtocolError::InvalidConfig("address is empty".to_string()));
        }
        Ok(())
    }
}

/// 传输层抽象 trait
///
/// 定义了客户端连接和读写分离的基本操作。
pub trait Transport: Send + Sync + Sized {
    /// 读取端类型
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// 写入端类型
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// 建立连接（客户端使用）
    fn connect(config: &TransportConfig) -> impl std::future::Future<Output = Result<Self>> + Send;

    /// 对端地址
    fn peer_addr(&self) -> Result<SocketAddr>;

    /// 分离读写端，便于接收循环和发送方并发使用
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// 传输层监听器抽象 trait（服务端使用）
pub trait TransportListener: Send + Sync + Sized {
    /// 对应的传输类型
    type Transport: Transport;

    /// 绑定地址并开始监听
    fn bind(config: &TransportConfig) -> impl std::future::Future<Output = Result<Self>> + Send;

    /// 接受新连接
    fn accept(&self) -> impl std::future::Future<Output = Result<Self::Transport>> + Send;

    /// 实际绑定的本地地址
    fn local_addr(&self) -> Result<SocketAddr>;
}

// ============================================================================
// TCP 实现
// ============================================================================

/// TCP 传输实现
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    async fn connect(config: &TransportConfig) -> Result<Self> {
        config.validate()?;
        let addr = config.socket_addr();

        // 带超时的连接
        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout { addr: addr.clone() })?
            .map_err(|source| ProtocolError::Connect { addr, source })?;

        stream.set_nodelay(config.nodelay)?;

        Ok(Self { stream })
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        self.stream.into_split()
    }
}

impl TcpTransport {
    /// 从已有的 TcpStream 创建（服务端 accept 后使用）
    pub fn from_stream(stream: TcpStream, nodelay: bool) -> Result<Self> {
        stream.set_nodelay(nodelay)?;
        Ok(Self { stream })
    }
}

/// TCP 监听器实现
pub struct TcpListener {
    listener: tokio::net::TcpListener,
    nodelay: bool,
}

impl TransportListener for TcpListener {
    type Transport = TcpTransport;

    async fn bind(config: &TransportConfig) -> Result<Self> {
        config.validate()?;
        let addr = config.socket_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ProtocolError::Bind { addr, source })?;
        Ok(Self {
            listener,
            nodelay: config.nodelay,
        })
    }

    async fn accept(&self) -> Result<TcpTransport> {
        let (stream, _addr) = self.listener.accept().await?;
        TcpTransport::from_stream(stream, self.nodelay)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> TransportConfig {
        TransportConfig::new("127.0.0.1", 0)
    }

    #[test]
    fn test_config_validate() {
        assert!(TransportConfig::default().validate().is_ok());
        assert!(matches!(
            loopback().with_chunk_size(0).validate(),
            Err(ProtocolError::InvalidChunkSize(0))
        ));
        let config = TransportConfig {
            max_frame_size: 0,
            ..loopback()
        };
        assert!(matches!(config.validate(), Err(ProtocolError::InvalidConfig(_))));
    }

    #[test]
    fn test_socket_addr() {
        assert_eq!(TransportConfig::default().socket_addr(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_tcp_listener_bind() {
        let listener = TcpListener::bind(&loopback()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_bind_address_in_use() {
        let first = TcpListener::bind(&loopback()).await.unwrap();
        let port = first.local_addr().unwrap().port();

        let result = TcpListener::bind(&TransportConfig::new("127.0.0.1", port)).await;
        assert!(matches!(result, Err(ProtocolError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // 先占用再释放一个端口，确保无人监听
        let port = {
            let listener = TcpListener::bind(&loopback()).await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = TcpTransport::connect(&TransportConfig::new("127.0.0.1", port)).await;
        assert!(matches!(result, Err(ProtocolError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_tcp_connect_and_accept() {
        let listener = TcpListener::bind(&loopback()).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client_handle = tokio::spawn(async move {
            TcpTransport::connect(&TransportConfig::new("127.0.0.1", port)).await
        });

        let server_transport = listener.accept().await.unwrap();
        let client_transport = client_handle.await.unwrap().unwrap();

        assert_eq!(
            server_transport.peer_addr().unwrap().port(),
            client_transport.stream.local_addr().unwrap().port()
        );
    }
}
