//! 客户端生命周期回调

use std::future::Future;
use std::sync::Arc;

use sockets_protocol::Connection;

/// 客户端回调，全部方法默认为空实现
pub trait ClientHandler: Send + Sync + 'static {
    /// 连接建立后、接收循环启动前调用
    fn on_connected(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// 接收循环结束，每个会话恰好一次
    fn on_disconnected(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// 收到一条完整消息
    fn on_message(&self, _message: String) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// 输入循环，仅在 `with_input_loop` 时在独立任务上运行
    ///
    /// 通过 `conn` 发送消息，调用 `conn.close()` 结束会话。
    fn input_loop(&self, _conn: Arc<Connection>) -> impl Future<Output = ()> + Send {
        async {}
    }
}
