//! 基于结束标记分帧的 TCP 客户端

mod handler;
mod session;

pub use handler::ClientHandler;
pub use session::ClientSession;
