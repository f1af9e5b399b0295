//! 客户端会话
//!
//! 持有一条出站连接，接收循环和可选的输入循环各占一个任务。

use std::sync::Arc;

use sockets_protocol::{
    Connection, ConnectionHandler, DisconnectReason, Payload, ProtocolError, Result, TcpTransport,
    Transport, TransportConfig,
};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::handler::ClientHandler;

/// 把连接回调转给 `ClientHandler`
struct ClientEvents<H> {
    handler: Arc<H>,
}

impl<H: ClientHandler> ConnectionHandler for ClientEvents<H> {
    async fn on_message(&self, _conn: &Arc<Connection>, message: String) {
        self.handler.on_message(message).await;
    }

    async fn on_disconnected(&self, _conn: &Arc<Connection>) {
        self.handler.on_disconnected().await;
    }
}

struct Active {
    conn: Arc<Connection>,
    receive_task: Option<JoinHandle<DisconnectReason>>,
    input_task: Option<JoinHandle<()>>,
}

/// TCP 客户端会话
pub struct ClientSession<H> {
    config: TransportConfig,
    handler: Arc<H>,
    has_input: bool,
    active: Option<Active>,
}

impl<H: ClientHandler> ClientSession<H> {
    pub fn new(config: TransportConfig, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            has_input: false,
            active: None,
        }
    }

    /// 连接后同时运行 `ClientHandler::input_loop`
    pub fn with_input_loop(mut self) -> Self {
        self.has_input = true;
        self
    }

    /// 连接服务器并启动接收循环
    ///
    /// 连接失败时不启动任何任务。上一条连接已断开时可以重新连接。
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.disconnect().await;

        let transport = TcpTransport::connect(&self.config).await?;
        let (conn, reader) = Connection::new(transport, &self.config)?;
        info!("Connected to {} as {}", conn.peer_addr(), conn.id());

        self.handler.on_connected().await;

        let events = ClientEvents {
            handler: Arc::clone(&self.handler),
        };
        let receive_task = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { reader.run(conn, &events).await }
        });

        let input_task = self.has_input.then(|| {
            let handler = Arc::clone(&self.handler);
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { handler.input_loop(conn).await })
        });

        self.active = Some(Active {
            conn,
            receive_task: Some(receive_task),
            input_task,
        });
        Ok(())
    }

    /// 连接仍然打开
    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.conn.is_closed())
    }

    /// 当前连接
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.active.as_ref().map(|active| &active.conn)
    }

    /// 发送消息，可与接收循环并发
    pub async fn send<'a>(&self, payload: impl Into<Payload<'a>>) -> Result<()> {
        let active = self.active.as_ref().ok_or(ProtocolError::NotConnected)?;
        active.conn.send(payload).await
    }

    /// 等待接收循环结束（服务端断开或输入循环关闭连接），然后回收输入循环
    ///
    /// 可以被取消，取消后任务句柄仍由会话持有。
    pub async fn wait(&mut self) -> Option<DisconnectReason> {
        let task = self.active.as_mut()?.receive_task.as_mut()?;
        let result = task.await;
        if let Some(active) = self.active.as_mut() {
            active.receive_task = None;
        }
        self.teardown().await;

        match result {
            Ok(reason) => Some(reason),
            Err(e) => {
                error!("Receive loop failed: {}", e);
                None
            }
        }
    }

    /// 主动断开并等待所有任务结束
    pub async fn disconnect(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.conn.close();
        if let Some(task) = active.input_task {
            task.abort();
            let _ = task.await;
        }
        if let Some(task) = active.receive_task {
            if let Err(e) = task.await {
                error!("Receive loop failed: {}", e);
            }
        }
    }
}
