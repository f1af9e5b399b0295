//! 命令行客户端
//!
//! 用法: sockets-client [address] [port] [chunk_size]
//!
//! 标准输入的每一行作为一条消息发送，`/quit` 断开连接。

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use sockets_client::{ClientHandler, ClientSession};
use sockets_protocol::{Connection, TransportConfig};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Console {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl ClientHandler for Console {
    async fn on_connected(&self) {
        println!("Connected, type a message or /quit");
    }

    async fn on_disconnected(&self) {
        println!("Disconnected");
    }

    async fn on_message(&self, message: String) {
        println!("< {}", message);
    }

    async fn input_loop(&self, conn: Arc<Connection>) {
        let mut lines = self.lines.lock().await;

        while let Some(line) = lines.recv().await {
            if line.trim() == "/quit" {
                break;
            }
            if let Err(e) = conn.send(&line).await {
                warn!("Failed to send: {}", e);
                break;
            }
        }

        conn.close();
    }
}

/// 标准输入按行转发到 channel
///
/// 读取线程不归运行时管理，进程退出时不会等待阻塞中的读取。
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn config_from_args() -> Result<TransportConfig> {
    let mut args = std::env::args().skip(1);
    let mut config = TransportConfig::default();

    if let Some(address) = args.next() {
        config.address = address;
    }
    if let Some(port) = args.next() {
        config.port = port.parse()?;
    }
    if let Some(chunk_size) = args.next() {
        config.chunk_size = chunk_size.parse()?;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sockets_client=debug".parse()?)
                .add_directive("sockets_protocol=info".parse()?),
        )
        .init();

    let config = config_from_args()?;
    info!("Connecting to {}", config.socket_addr());

    let console = Console {
        lines: Mutex::new(stdin_lines()),
    };
    let mut session = ClientSession::new(config, console).with_input_loop();
    session.connect().await?;

    tokio::select! {
        reason = session.wait() => info!("Session ended: {:?}", reason),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    session.disconnect().await;

    Ok(())
}
