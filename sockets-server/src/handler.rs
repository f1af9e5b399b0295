//! 服务端生命周期回调

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use sockets_protocol::Connection;

use crate::client::Client;
use crate::listener::ServerHandle;

/// 服务端回调
///
/// 除 `new_client_state` 外全部方法默认为空实现，按需覆盖。
/// `on_client_connected` 在 accept 任务上执行，其余连接回调在该连接自己的任务上执行。
/// 回调 panic 只会终止对应的连接。
pub trait ServerHandler: Send + Sync + 'static {
    /// 每个客户端附带的应用状态，不需要时用 `()`
    type ClientState: Send + Sync + 'static;

    /// 为新连接创建状态，在登记之前调用
    fn new_client_state(&self, conn: &Arc<Connection>) -> Self::ClientState;

    /// 开始监听后调用一次
    fn on_server_started(&self, _addr: SocketAddr) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// 客户端已登记，接收循环尚未启动
    fn on_client_connected(
        &self,
        _client: &Arc<Client<Self::ClientState>>,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// 客户端已从登记表移除
    fn on_client_disconnected(
        &self,
        _client: &Arc<Client<Self::ClientState>>,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// 收到一条完整消息
    fn on_message(
        &self,
        _client: &Arc<Client<Self::ClientState>>,
        _message: String,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// 命令循环，仅在 `with_command_loop` 时在独立任务上运行
    fn command_loop(
        &self,
        _server: ServerHandle<Self::ClientState>,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}
