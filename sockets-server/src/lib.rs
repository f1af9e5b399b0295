//! 基于结束标记分帧的 TCP 服务端
//!
//! - `Client`: 连接加上应用为它创建的状态
//! - `ConnectionRegistry`: 活动客户端登记表
//! - `ServerListener`: 监听、accept 循环、每连接接收循环
//! - `ServerHandler`: 生命周期回调

mod client;
mod handler;
mod listener;
mod registry;

pub use client::Client;
pub use handler::ServerHandler;
pub use listener::{ServerHandle, ServerListener};
pub use registry::ConnectionRegistry;
