//! 服务端侧的客户端对象
//!
//! 把连接和应用为它创建的状态绑在一起，回调、登记表和句柄都以它为单位。

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use sockets_protocol::Connection;

/// 已接入的客户端
pub struct Client<S> {
    conn: Arc<Connection>,
    state: S,
}

impl<S> Client<S> {
    pub fn new(conn: Arc<Connection>, state: S) -> Self {
        Self { conn, state }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// 由 `ServerHandler::new_client_state` 创建的状态
    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S> Deref for Client<S> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl<S: fmt::Debug> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("conn", &self.conn)
            .field("state", &self.state)
            .finish()
    }
}
