//! 活动客户端登记表

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use sockets_protocol::ConnectionId;
use tokio::sync::RwLock;

use crate::client::Client;

/// 服务端活动客户端表
///
/// 所有操作都经过同一把锁：插入和移除互斥，查询不会看到只完成一半的插入。
/// 克隆得到的是同一张表。
pub struct ConnectionRegistry<S> {
    clients: Arc<RwLock<HashMap<ConnectionId, Arc<Client<S>>>>>,
}

impl<S> Clone for ConnectionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            clients: Arc::clone(&self.clients),
        }
    }
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记客户端，id 已存在时返回 false
    pub async fn insert(&self, client: Arc<Client<S>>) -> bool {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&client.id()) {
            return false;
        }
        clients.insert(client.id(), client);
        true
    }

    /// 移除客户端，重复移除返回 None
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Client<S>>> {
        self.clients.write().await.remove(&id)
    }

    /// 按连接标识查找
    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Client<S>>> {
        self.clients.read().await.get(&id).cloned()
    }

    /// 按对端地址查找
    pub async fn find_by_peer(&self, addr: SocketAddr) -> Option<Arc<Client<S>>> {
        self.clients
            .read()
            .await
            .values()
            .find(|client| client.peer_addr() == addr)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// 当前所有客户端，按 id 排序
    pub async fn snapshot(&self) -> Vec<Arc<Client<S>>> {
        let mut clients: Vec<_> = self.clients.read().await.values().cloned().collect();
        clients.sort_by_key(|client| client.id());
        clients
    }
}
