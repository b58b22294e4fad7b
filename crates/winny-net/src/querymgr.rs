//! The query manager: a single event loop owning the gossiped keys
//! cache, search subscriptions and keyword-stream subscriptions.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use winny_core::cmds::QueryCmd;
use winny_core::config::QueryManagerConfig;
use winny_core::{Command, FileKey, NodeAddr};

use crate::nodemgr::{Direction, NodeManagerMsg, SendTarget};

pub type SubscriptionId = u64;

pub enum QueryManagerMsg {
    AddQuery {
        keyword: String,
        sink: mpsc::Sender<FileKey>,
        reply: oneshot::Sender<SubscriptionId>,
    },
    RemoveQuery(SubscriptionId),
    AddKeywordStream {
        sink: mpsc::Sender<String>,
        reply: oneshot::Sender<SubscriptionId>,
    },
    RemoveKeywordStream(SubscriptionId),
    RecvQuery(QueryCmd),
}

struct QuerySub {
    keyword: String,
    sink: mpsc::Sender<FileKey>,
}

pub struct QueryManager {
    keys: HashMap<[u8; 16], FileKey>,
    queries: HashMap<SubscriptionId, QuerySub>,
    keyword_sinks: HashMap<SubscriptionId, mpsc::Sender<String>>,
    next_id: SubscriptionId,
    cfg: QueryManagerConfig,
    node_mgr_tx: mpsc::Sender<NodeManagerMsg>,
    rx: mpsc::Receiver<QueryManagerMsg>,
}

impl QueryManager {
    pub fn new(
        cfg: QueryManagerConfig,
        node_mgr_tx: mpsc::Sender<NodeManagerMsg>,
    ) -> (Self, mpsc::Sender<QueryManagerMsg>) {
        let (tx, rx) = mpsc::channel(256);
        let mgr = QueryManager {
            keys: HashMap::new(),
            queries: HashMap::new(),
            keyword_sinks: HashMap::new(),
            next_id: 0,
            cfg,
            node_mgr_tx,
            rx,
        };
        (mgr, tx)
    }

    fn alloc_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        self.next_id
    }

    pub async fn run(mut self) {
        let base_period = Duration::from_secs(self.cfg.spread_tick_secs.max(1));
        let mut next_spread = Instant::now() + base_period;
        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_msg(msg).await,
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(next_spread) => {
                    self.send_spread().await;
                    let connected = self.fetch_connected_count().await.max(1);
                    let period = base_period / connected as u32;
                    next_spread = Instant::now() + period.max(Duration::from_millis(1));
                }
            }
        }
    }

    async fn handle_msg(&mut self, msg: QueryManagerMsg) {
        match msg {
            QueryManagerMsg::AddQuery { keyword, sink, reply } => {
                let id = self.alloc_id();
                self.replay_cache(&keyword, &sink).await;
                self.queries.insert(id, QuerySub { keyword, sink });
                let _ = reply.send(id);
            }
            QueryManagerMsg::RemoveQuery(id) => {
                self.queries.remove(&id);
            }
            QueryManagerMsg::AddKeywordStream { sink, reply } => {
                let id = self.alloc_id();
                self.keyword_sinks.insert(id, sink);
                let _ = reply.send(id);
            }
            QueryManagerMsg::RemoveKeywordStream(id) => {
                self.keyword_sinks.remove(&id);
            }
            QueryManagerMsg::RecvQuery(query) => self.recv_query(query).await,
        }
    }

    async fn replay_cache(&self, keyword: &str, sink: &mpsc::Sender<FileKey>) {
        for key in self.keys.values() {
            if winny_core::matcher::matches(key, keyword) {
                let _ = sink.send(key.clone()).await;
            }
        }
    }

    async fn recv_query(&mut self, query: QueryCmd) {
        let fresh: Vec<FileKey> = query
            .keys
            .iter()
            .filter(|k| !self.keys.contains_key(&k.hash))
            .cloned()
            .collect();

        debug!(
            keyword = %query.keyword,
            fresh = fresh.len(),
            total = query.keys.len(),
            "received query"
        );

        for key in &fresh {
            for sub in self.queries.values() {
                if winny_core::matcher::matches(key, &sub.keyword) {
                    let _ = sub.sink.send(key.clone()).await;
                }
            }
        }

        if !query.keyword.is_empty() {
            for sink in self.keyword_sinks.values() {
                let _ = sink.send(query.keyword.clone()).await;
            }
        }

        for key in &fresh {
            self.keys.insert(key.hash, key.clone());
        }

        for node in &query.nodes {
            self.forward_node_addr(*node).await;
        }
        for key in &query.keys {
            self.forward_node_addr(key.node).await;
        }
    }

    async fn forward_node_addr(&self, addr: NodeAddr) {
        let _ = self
            .node_mgr_tx
            .send(NodeManagerMsg::AddNodeAddr(addr))
            .await;
    }

    async fn send_spread(&self) {
        let _ = self
            .node_mgr_tx
            .send(NodeManagerMsg::Send {
                target: SendTarget::Broadcast(Direction::All),
                cmd: Command::Spread,
            })
            .await;
    }

    async fn fetch_connected_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .node_mgr_tx
            .send(NodeManagerMsg::ConnectedCount(tx))
            .await
            .is_err()
        {
            return 1;
        }
        rx.await.unwrap_or(1)
    }
}
