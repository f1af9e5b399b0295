//! 回显服务端
//!
//! 用法: sockets-server [address] [port] [chunk_size]
//!
//! 标准输入命令:
//! - `list` (连接、对端地址、已收消息数)
//! - `send <id> <text>`
//! - `broadcast <text>`
//! - `kick <id>`
//! - `quit`

use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sockets_protocol::{Connection, ConnectionId, TransportConfig};
use sockets_server::{Client, ServerHandle, ServerHandler, ServerListener};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct EchoServer {
    commands: Mutex<mpsc::Receiver<String>>,
}

impl ServerHandler for EchoServer {
    /// 已收消息数
    type ClientState = AtomicUsize;

    fn new_client_state(&self, _conn: &Arc<Connection>) -> AtomicUsize {
        AtomicUsize::new(0)
    }

    async fn on_server_started(&self, addr: SocketAddr) {
        println!("Listening on {}", addr);
    }

    async fn on_client_connected(&self, client: &Arc<Client<AtomicUsize>>) {
        println!("[{}] connected from {}", client.id(), client.peer_addr());
    }

    async fn on_client_disconnected(&self, client: &Arc<Client<AtomicUsize>>) {
        let received = client.state().load(Ordering::Relaxed);
        println!("[{}] disconnected after {} messages", client.id(), received);
    }

    async fn on_message(&self, client: &Arc<Client<AtomicUsize>>, message: String) {
        client.state().fetch_add(1, Ordering::Relaxed);
        println!("[{}] {}", client.id(), message);
        if let Err(e) = client.send(&format!("echo: {}", message)).await {
            warn!("Failed to echo to {}: {}", client.id(), e);
        }
    }

    async fn command_loop(&self, server: ServerHandle<AtomicUsize>) {
        let mut commands = self.commands.lock().await;

        while let Some(line) = commands.recv().await {
            let line = line.trim();
            let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

            match command {
                "" => {}
                "list" => {
                    for client in server.connections().await {
                        let received = client.state().load(Ordering::Relaxed);
                        println!("{} {} {}", client.id(), client.peer_addr(), received);
                    }
                }
                "send" => {
                    let (id, text) = rest.split_once(' ').unwrap_or((rest, ""));
                    match parse_id(id) {
                        Some(id) => {
                            if let Err(e) = server.send(id, text).await {
                                println!("send failed: {}", e);
                            }
                        }
                        None => println!("usage: send <id> <text>"),
                    }
                }
                "broadcast" => {
                    for client in server.connections().await {
                        if let Err(e) = client.send(rest).await {
                            println!("send to {} failed: {}", client.id(), e);
                        }
                    }
                }
                "kick" => match parse_id(rest) {
                    Some(id) => {
                        if let Err(e) = server.close(id).await {
                            println!("kick failed: {}", e);
                        }
                    }
                    None => println!("usage: kick <id>"),
                },
                "quit" => break,
                other => println!("unknown command: {}", other),
            }
        }

        server.shutdown();
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

fn parse_id(text: &str) -> Option<ConnectionId> {
    text.trim_start_matches('#').parse::<u64>().ok().map(ConnectionId::from)
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
                .add_directive("sockets_server=debug".parse()?)
                .add_directive("sockets_protocol=debug".parse()?),
        )
        .init();

    let config = config_from_args()?;
    info!("Server starting on {}", config.socket_addr());

    let handler = EchoServer {
        commands: Mutex::new(stdin_lines()),
    };
    let mut server = ServerListener::new(config, handler).with_command_loop();
    server.start().await?;

    tokio::select! {
        _ = server.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
        }
    }
    server.shutdown().await;

    Ok(())
}
