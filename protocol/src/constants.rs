//! 协议常量定义

use std::time::Duration;

/// 帧结束标记
///
/// 收发双方共用同一个常量，两侧的记录分隔符（0x1E）保证它不会出现在普通文本中。
pub const SENTINEL: &[u8] = b"\x1e<finished>\x1e";

/// 默认监听/连接地址
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// 默认端口
pub const DEFAULT_PORT: u16 = 8080;

/// 默认分块大小（字节），收发双方一致
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// 累积缓冲区上限，超过即视为读取失败
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);
