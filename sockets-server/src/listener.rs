//! 服务端监听器
//!
//! accept 任务为每个连接创建 `Client`、登记并派生接收循环任务。
//! 所有任务句柄由各自的派生者持有，`shutdown` 时逐一关闭并等待。

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use sockets_protocol::{
    Connection, ConnectionHandler, ConnectionId, Payload, ProtocolError, Result, TcpListener,
    TransportConfig, TransportListener,
};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::handler::ServerHandler;
use crate::registry::ConnectionRegistry;

/// 单个客户端的接收循环回调：先移出登记表，再通知应用
struct ClientEvents<H: ServerHandler> {
    client: Arc<Client<H::ClientState>>,
    handler: Arc<H>,
    registry: ConnectionRegistry<H::ClientState>,
}

impl<H: ServerHandler> ConnectionHandler for ClientEvents<H> {
    async fn on_message(&self, _conn: &Arc<Connection>, message: String) {
        debug!("Message from {}: {:?}", self.client.id(), message);
        self.handler.on_message(&self.client, message).await;
    }

    async fn on_disconnected(&self, _conn: &Arc<Connection>) {
        self.registry.remove(self.client.id()).await;
        self.handler.on_client_disconnected(&self.client).await;
    }
}

/// 服务端句柄
///
/// 可克隆，交给命令循环等外部任务使用。
pub struct ServerHandle<S> {
    registry: ConnectionRegistry<S>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl<S> Clone for ServerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            shutdown_tx: Arc::clone(&self.shutdown_tx),
        }
    }
}

impl<S> ServerHandle<S> {
    /// 向已登记的客户端发送消息
    pub async fn send<'a>(&self, id: ConnectionId, payload: impl Into<Payload<'a>>) -> Result<()> {
        let client = self
            .registry
            .get(id)
            .await
            .ok_or(ProtocolError::NotFound(id))?;
        client.send(payload).await
    }

    /// 按连接标识查找
    pub async fn find_connection(&self, id: ConnectionId) -> Option<Arc<Client<S>>> {
        self.registry.get(id).await
    }

    /// 当前所有客户端
    pub async fn connections(&self) -> Vec<Arc<Client<S>>> {
        self.registry.snapshot().await
    }

    /// 断开指定客户端
    pub async fn close(&self, id: ConnectionId) -> Result<()> {
        let client = self
            .registry
            .get(id)
            .await
            .ok_or(ProtocolError::NotFound(id))?;
        client.close();
        Ok(())
    }

    /// 通知 accept 循环停止，关闭所有连接
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

struct Running {
    local_addr: SocketAddr,
    accept_task: Option<JoinHandle<()>>,
    command_task: Option<JoinHandle<()>>,
}

/// TCP 服务端
pub struct ServerListener<H: ServerHandler> {
    config: TransportConfig,
    handler: Arc<H>,
    registry: ConnectionRegistry<H::ClientState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    has_commands: bool,
    running: Option<Running>,
}

impl<H: ServerHandler> ServerListener<H> {
    pub fn new(config: TransportConfig, handler: H) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            handler: Arc::new(handler),
            registry: ConnectionRegistry::new(),
            shutdown_tx: Arc::new(shutdown_tx),
            has_commands: false,
            running: None,
        }
    }

    /// 启动时同时运行 `ServerHandler::command_loop`
    pub fn with_command_loop(mut self) -> Self {
        self.has_commands = true;
        self
    }

    /// 绑定地址并启动 accept 循环，返回实际监听地址
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.running.is_some() {
            return Err(ProtocolError::AlreadyStarted);
        }

        let listener = TcpListener::bind(&self.config).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        self.shutdown_tx.send_replace(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            Arc::clone(&self.handler),
            self.registry.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let command_task = self.has_commands.then(|| {
            let handler = Arc::clone(&self.handler);
            let server = self.handle();
            tokio::spawn(async move { handler.command_loop(server).await })
        });

        self.running = Some(Running {
            local_addr,
            accept_task: Some(accept_task),
            command_task,
        });

        self.handler.on_server_started(local_addr).await;
        Ok(local_addr)
    }

    /// 实际监听地址，未启动时为 None
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    pub fn handle(&self) -> ServerHandle<H::ClientState> {
        ServerHandle {
            registry: self.registry.clone(),
            shutdown_tx: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry<H::ClientState> {
        &self.registry
    }

    /// 向已登记的客户端发送消息，不存在时返回 `NotFound`
    pub async fn send<'a>(&self, id: ConnectionId, payload: impl Into<Payload<'a>>) -> Result<()> {
        self.handle().send(id, payload).await
    }

    pub async fn find_connection(&self, id: ConnectionId) -> Option<Arc<Client<H::ClientState>>> {
        self.registry.get(id).await
    }

    pub async fn connections(&self) -> Vec<Arc<Client<H::ClientState>>> {
        self.registry.snapshot().await
    }

    /// 断开指定客户端
    pub async fn close(&self, id: ConnectionId) -> Result<()> {
        self.handle().close(id).await
    }

    /// 等待 accept 循环结束（由 `ServerHandle::shutdown` 触发）
    ///
    /// 可以被取消，取消后句柄仍由监听器持有。
    pub async fn wait(&mut self) {
        let Some(task) = self.running.as_mut().and_then(|r| r.accept_task.as_mut()) else {
            return;
        };
        let result = task.await;
        if let Some(running) = self.running.as_mut() {
            running.accept_task = None;
        }
        if let Err(e) = result {
            error!("Accept loop failed: {}", e);
        }
    }

    /// 停止监听，关闭所有连接并等待其接收循环结束
    pub async fn shutdown(&mut self) {
        self.shutdown_tx.send_replace(true);
        self.wait().await;

        let Some(running) = self.running.take() else {
            return;
        };
        if let Some(task) = running.command_task {
            task.abort();
            let _ = task.await;
        }
        info!("Server shutdown complete");
    }
}

async fn accept_loop<H: ServerHandler>(
    listener: TcpListener,
    config: TransportConfig,
    handler: Arc<H>,
    registry: ConnectionRegistry<H::ClientState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            // 不把 watch::Ref 带出 select，accept 任务才是 Send
            _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => break,

            // 接受新连接
            result = listener.accept() => {
                let transport = match result {
                    Ok(transport) => transport,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                let (conn, reader) = match Connection::new(transport, &config) {
                    Ok(parts) => parts,
                    Err(e) => {
                        warn!("Failed to set up connection: {}", e);
                        continue;
                    }
                };

                let state = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.new_client_state(&conn)
                })) {
                    Ok(state) => state,
                    Err(panic) => {
                        let e = ProtocolError::handler_panicked(panic);
                        error!("Dropping {} ({}): {}", conn.id(), conn.peer_addr(), e);
                        continue;
                    }
                };
                let client = Arc::new(Client::new(Arc::clone(&conn), state));

                registry.insert(Arc::clone(&client)).await;
                info!("Client {} connected from {}", client.id(), client.peer_addr());
                if let Err(panic) = AssertUnwindSafe(handler.on_client_connected(&client))
                    .catch_unwind()
                    .await
                {
                    // 仍然启动接收循环，走正常的断开流程
                    let e = ProtocolError::handler_panicked(panic);
                    error!("Connect handler of {} failed: {}", client.id(), e);
                    client.close();
                }

                let events = ClientEvents {
                    client,
                    handler: Arc::clone(&handler),
                    registry: registry.clone(),
                };
                connections.spawn(async move {
                    reader.run(conn, &events).await;
                });
            }

            // 回收已结束的连接任务
            Some(result) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = result {
                    error!("Connection task failed: {}", e);
                }
            }
        }
    }

    let open = registry.snapshot().await;
    info!("Stopping accept loop, closing {} connections", open.len());
    for client in &open {
        client.close();
    }
    while let Some(result) = connections.join_next().await {
        if let Err(e) = result {
            error!("Connection task failed: {}", e);
        }
    }
}
