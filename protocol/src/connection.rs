//! 连接封装
//!
//! `Connection` 是一条活动连接的共享句柄，负责分块发送；
//! `ConnectionReader` 持有读取端和累积缓冲区，由接收循环独占。

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::codec::{decode_text, encode_chunks, is_blank, FrameDecoder, Payload};
use crate::error::{ProtocolError, Result};
use crate::transport::{Transport, TransportConfig};

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// 连接标识，进程内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 接收循环结束的原因
#[derive(Debug)]
pub enum DisconnectReason {
    /// 对端关闭了写端（读到 0 字节）
    PeerClosed,
    /// 本地调用了 `Connection::close`
    Closed,
    /// 读取失败或帧超限
    Failed(ProtocolError),
}

/// 接收循环的回调
///
/// 回调在连接自己的任务上顺序执行，长时间阻塞会拖住这条连接的后续读取。
pub trait ConnectionHandler: Send + Sync {
    /// 收到一条非空白的完整消息
    fn on_message(
        &self,
        conn: &Arc<Connection>,
        message: String,
    ) -> impl Future<Output = ()> + Send;

    /// 接收循环结束，每条连接恰好一次
    fn on_disconnected(&self, conn: &Arc<Connection>) -> impl Future<Output = ()> + Send;
}

/// 连接封装
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    chunk_size: usize,
    /// 写锁保证同一时刻只有一个发送方写入分块
    writer: Mutex<BoxedWriter>,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// 从传输层创建连接
    pub fn new<T: Transport>(
        transport: T,
        config: &TransportConfig,
    ) -> Result<(Arc<Self>, ConnectionReader)> {
        let peer_addr = transport.peer_addr()?;
        let (reader, writer) = transport.split();
        Self::from_parts(peer_addr, reader, writer, config)
    }

    /// 从读写端直接创建连接
    pub fn from_parts<R, W>(
        peer_addr: SocketAddr,
        reader: R,
        writer: W,
        config: &TransportConfig,
    ) -> Result<(Arc<Self>, ConnectionReader)>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let (closed, closed_rx) = watch::channel(false);

        let conn = Arc::new(Self {
            id: ConnectionId::next(),
            peer_addr,
            chunk_size: config.chunk_size,
            writer: Mutex::new(Box::new(writer)),
            closed,
        });
        let reader = ConnectionReader {
            reader: Box::new(reader),
            decoder: FrameDecoder::new(config.max_frame_size),
            chunk_size: config.chunk_size,
            closed: closed_rx,
        };
        Ok((conn, reader))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// 连接是否已关闭或正在关闭
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// 编码并分块发送一条消息
    ///
    /// 任一分块写入失败即中止并返回 `Write`，连接本身不会因此关闭。
    pub async fn send<'a>(&self, payload: impl Into<Payload<'a>>) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let payload = payload.into();
        let chunks = encode_chunks(payload.as_bytes(), self.chunk_size)?;

        // 关闭信号会打断阻塞中的写入，避免终止流程等待写锁
        let mut closed = self.closed.subscribe();
        let mut writer = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => return Err(ProtocolError::ConnectionClosed),
            writer = self.writer.lock() => writer,
        };

        let write = async {
            for chunk in &chunks {
                writer.write_all(chunk).await?;
            }
            writer.flush().await
        };
        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => return Err(ProtocolError::ConnectionClosed),
            result = write => result.map_err(ProtocolError::Write)?,
        }

        debug!(
            "Sent {} bytes to {} in {} chunks",
            payload.as_bytes().len(),
            self.id,
            chunks.len()
        );
        Ok(())
    }

    /// 关闭连接
    ///
    /// 接收循环会中断正在进行的读取并走正常的终止流程。可重复调用。
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!("Close requested for {}", self.id);
        }
    }

    async fn shutdown_writer(&self) {
        self.closed.send_replace(true);
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Failed to shut down writer of {}: {}", self.id, e);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("chunk_size", &self.chunk_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 连接的读取端
pub struct ConnectionReader {
    reader: BoxedReader,
    decoder: FrameDecoder,
    chunk_size: usize,
    closed: watch::Receiver<bool>,
}

impl ConnectionReader {
    /// 运行接收循环直到连接终止
    ///
    /// 无论因何终止，都会关闭写端并调用一次 `on_disconnected`。
    pub async fn run<H: ConnectionHandler>(
        mut self,
        conn: Arc<Connection>,
        handler: &H,
    ) -> DisconnectReason {
        let reason = self.receive(&conn, handler).await;

        conn.shutdown_writer().await;
        match &reason {
            DisconnectReason::PeerClosed => {
                info!("{} ({}) closed by peer", conn.id, conn.peer_addr)
            }
            DisconnectReason::Closed => info!("{} ({}) closed locally", conn.id, conn.peer_addr),
            DisconnectReason::Failed(e) => {
                warn!("{} ({}) failed: {}", conn.id, conn.peer_addr, e)
            }
        }

        if let Err(panic) = AssertUnwindSafe(handler.on_disconnected(&conn))
            .catch_unwind()
            .await
        {
            let e = ProtocolError::handler_panicked(panic);
            error!("Disconnect handler of {} failed: {}", conn.id, e);
        }
        reason
    }

    async fn receive<H: ConnectionHandler>(
        &mut self,
        conn: &Arc<Connection>,
        handler: &H,
    ) -> DisconnectReason {
        let mut chunk = vec![0u8; self.chunk_size];

        loop {
            let read = tokio::select! {
                biased;
                _ = wait_closed(&mut self.closed) => return DisconnectReason::Closed,
                result = self.reader.read(&mut chunk) => result,
            };

            let n = match read {
                Ok(0) => return DisconnectReason::PeerClosed,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return DisconnectReason::Failed(ProtocolError::Read(e)),
            };
            self.decoder.extend(&chunk[..n]);

            loop {
                match self.decoder.next_frame() {
                    Ok(Some(frame)) => {
                        let message = decode_text(&frame);
                        if is_blank(&message) {
                            debug!("Skipping blank message from {}", conn.id);
                            continue;
                        }
                        // 回调 panic 只终止这一条连接
                        let delivered = AssertUnwindSafe(handler.on_message(conn, message))
                            .catch_unwind()
                            .await;
                        if let Err(panic) = delivered {
                            return DisconnectReason::Failed(ProtocolError::handler_panicked(panic));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return DisconnectReason::Failed(e),
                }
            }
        }
    }
}

/// 等待关闭信号；发送端已释放时也视为关闭
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}
