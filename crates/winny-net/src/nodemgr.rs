//! The node manager: a single event loop owning the known/connected
//! peer maps and the connection-trying budget, following the same
//! receive-loop-plus-periodic-tick shape as the teacher's chunk manager.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use winny_core::cmds::ConnType;
use winny_core::config::NodeManagerConfig;
use winny_core::{Command, NodeAddr, NodeInfo};

use crate::conn::LocalIdentity;
use crate::error::{NetError, PolicyError};
use crate::InboundEvent;

/// Fan-out filter for a broadcast `Send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    All,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy)]
pub enum SendTarget {
    One(NodeAddr),
    Broadcast(Direction),
}

pub struct AddrUpdate {
    pub addr: NodeAddr,
    pub bbs_port: u16,
    pub is_bbs: bool,
    pub speed: u32,
    pub clusters: [String; 3],
}

pub enum NodeManagerMsg {
    Send { target: SendTarget, cmd: Command },
    AddNode(AddrUpdate),
    AddNodeAddr(NodeAddr),
    AddNodeStr(String),
    Disconnect(NodeAddr),
    GetNodeList(oneshot::Sender<Vec<String>>),
    Established(Box<EstablishedHandle>),
    Closed(NodeAddr),
    ConnTryingDelta(i32),
    ConnectedCount(oneshot::Sender<usize>),
}

/// What the connection engine hands back to the node manager once a
/// handshake completes; everything the manager needs to install the
/// connection into `connected`, migrate the peer's `NodeInfo` forward,
/// and drive future sends.
pub struct EstablishedHandle {
    pub addr: NodeAddr,
    /// The candidate address this connection was dialed as, before
    /// handshake reconciliation — `None` for an accepted (inbound)
    /// connection, which has no prior known address to migrate from.
    pub prev_addr: Option<NodeAddr>,
    pub conn_type: ConnType,
    pub is_downstream: bool,
    pub started_at: Instant,
    pub sender: mpsc::Sender<Command>,
    pub proto_version: u32,
    pub cert: String,
    pub speed: u32,
    pub ddns: String,
    pub clusters: [String; 3],
}

struct LiveConnection {
    conn_type: ConnType,
    is_downstream: bool,
    started_at: Instant,
    sender: mpsc::Sender<Command>,
}

/// Everything a dial attempt or an accept loop needs to run the
/// handshake and wire a freshly established connection back in.
#[derive(Clone)]
pub struct DialContext {
    pub local: Arc<LocalIdentity>,
    pub max_payload: usize,
    pub max_cache_res: usize,
    pub dial_timeout: Duration,
    pub inbound_tx: mpsc::Sender<InboundEvent>,
}

pub struct NodeManager {
    known: HashMap<NodeAddr, NodeInfo>,
    connected: HashMap<NodeAddr, LiveConnection>,
    conn_trying_budget: i64,
    local_speed: u32,
    cfg: NodeManagerConfig,
    dial_ctx: DialContext,
    self_tx: mpsc::Sender<NodeManagerMsg>,
    rx: mpsc::Receiver<NodeManagerMsg>,
}

impl NodeManager {
    pub fn new(
        cfg: NodeManagerConfig,
        local_speed: u32,
        dial_ctx: DialContext,
    ) -> (Self, mpsc::Sender<NodeManagerMsg>) {
        let (tx, rx) = mpsc::channel(256);
        let budget = cfg.conn_trying_budget as i64;
        let mgr = NodeManager {
            known: HashMap::new(),
            connected: HashMap::new(),
            conn_trying_budget: budget,
            local_speed,
            cfg,
            dial_ctx,
            self_tx: tx.clone(),
            rx,
        };
        (mgr, tx)
    }

    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(Duration::from_secs(self.cfg.manage_tick_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_msg(msg).await,
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    self.manage_node_conn();
                }
            }
        }
    }

    async fn handle_msg(&mut self, msg: NodeManagerMsg) {
        match msg {
            NodeManagerMsg::Send { target, cmd } => self.select_and_send(target, cmd).await,
            NodeManagerMsg::AddNode(update) => self.add_node(update),
            NodeManagerMsg::AddNodeAddr(addr) => self.add_node_addr(addr),
            NodeManagerMsg::AddNodeStr(token) => self.add_node_str(token),
            NodeManagerMsg::Disconnect(addr) => self.disconnect(addr),
            NodeManagerMsg::GetNodeList(reply) => {
                let list = self
                    .known
                    .keys()
                    .map(|a| winny_core::nodestr::encrypt(&a.to_string()))
                    .collect();
                let _ = reply.send(list);
            }
            NodeManagerMsg::Established(handle) => self.add_established(*handle),
            NodeManagerMsg::Closed(addr) => {
                self.connected.remove(&addr);
                debug!(%addr, "connection closed");
            }
            NodeManagerMsg::ConnTryingDelta(delta) => {
                self.conn_trying_budget += delta as i64;
            }
            NodeManagerMsg::ConnectedCount(reply) => {
                let _ = reply.send(self.connected.len());
            }
        }
    }

    async fn select_and_send(&self, target: SendTarget, cmd: Command) {
        match target {
            SendTarget::One(addr) => {
                if let Some(conn) = self.connected.get(&addr) {
                    let _ = conn.sender.send(cmd).await;
                }
            }
            SendTarget::Broadcast(dir) => {
                for conn in self.connected.values() {
                    let matches = match dir {
                        Direction::All => true,
                        Direction::Up => !conn.is_downstream,
                        Direction::Down => conn.is_downstream,
                    };
                    if matches {
                        let _ = conn.sender.send(cmd.clone()).await;
                    }
                }
            }
        }
    }

    fn add_node(&mut self, update: AddrUpdate) {
        if update.addr.is_private() {
            return;
        }
        let entry = self.known.entry(update.addr).or_default();
        entry.bbs_port = update.bbs_port;
        entry.is_bbs = update.is_bbs;
        entry.speed = update.speed;
        entry.clusters = update.clusters;
    }

    fn add_node_addr(&mut self, addr: NodeAddr) {
        if addr.is_private() {
            return;
        }
        self.known.entry(addr).or_default();
    }

    fn add_node_str(&mut self, token: String) {
        let decoded = match winny_core::nodestr::decrypt(&token) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to decrypt node string");
                return;
            }
        };
        let addr: SocketAddr = match decoded.parse() {
            Ok(a) => a,
            Err(_) => {
                debug!(%decoded, "node string is not an IPv4 socket address, ignoring");
                return;
            }
        };
        let ip = match addr.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => return,
        };
        self.add_node_addr(NodeAddr::new(ip, addr.port()));
    }

    fn disconnect(&mut self, addr: NodeAddr) {
        if let Some(conn) = self.connected.remove(&addr) {
            // Dropping the sender ends the writer task, which drops its
            // socket half; the read task notices the close independently
            // and reports a `Closed` event that arrives here as a no-op
            // since the entry is already gone.
            info!(%addr, "disconnecting by manager request");
            drop(conn);
        }
    }

    fn add_established(&mut self, handle: EstablishedHandle) {
        self.connected.insert(
            handle.addr,
            LiveConnection {
                conn_type: handle.conn_type,
                is_downstream: handle.is_downstream,
                started_at: handle.started_at,
                sender: handle.sender,
            },
        );

        // Migrate any NodeInfo recorded under the pre-handshake dial
        // address forward to the handshake-reconciled address, preferring
        // whatever is already recorded at the reconciled address if both
        // exist, then stamp the handshake-derived fields onto it.
        let prev_info = handle
            .prev_addr
            .and_then(|prev| self.known.remove(&prev));
        let mut info = self
            .known
            .remove(&handle.addr)
            .or(prev_info)
            .unwrap_or_default();
        info.proto_version = handle.proto_version;
        info.cert = handle.cert;
        info.speed = handle.speed;
        info.ddns = if handle.ddns.is_empty() {
            None
        } else {
            Some(handle.ddns)
        };
        info.clusters = handle.clusters;
        self.known.insert(handle.addr, info);
    }

    fn manage_node_conn(&mut self) {
        let (upstream, downstream) = self.count_search_connections();
        debug!(
            upstream,
            downstream,
            known = self.known.len(),
            budget = self.conn_trying_budget,
            "node manager tick"
        );

        if upstream < self.cfg.upstream_low_watermark {
            let n = self.conn_trying_budget.max(0) as usize;
            let candidates = self.select_candidates(n);
            for addr in candidates {
                self.spawn_dial(addr);
            }
        }

        if upstream > self.cfg.upstream_high_watermark {
            self.evict_shortest_lived(|c| !c.is_downstream);
        }
        if downstream > self.cfg.downstream_high_watermark {
            self.evict_shortest_lived(|c| c.is_downstream);
        }
    }

    fn count_search_connections(&self) -> (usize, usize) {
        let mut up = 0;
        let mut down = 0;
        for conn in self.connected.values() {
            if conn.conn_type != ConnType::Search {
                continue;
            }
            if conn.is_downstream {
                down += 1;
            } else {
                up += 1;
            }
        }
        (up, down)
    }

    fn evict_shortest_lived<F: Fn(&LiveConnection) -> bool>(&mut self, filter: F) {
        let shortest = self
            .connected
            .iter()
            .filter(|(_, c)| filter(c))
            .max_by_key(|(_, c)| c.started_at)
            .map(|(addr, _)| *addr);
        if let Some(addr) = shortest {
            if let Some(conn) = self.connected.remove(&addr) {
                info!(%addr, "evicting shortest-lived connection");
                drop(conn);
            }
        }
    }

    /// Scans `known`, skipping anything already connected or more than
    /// 20x off in reported speed, removing each chosen candidate from
    /// `known` as it's picked (preventing immediate re-selection).
    fn select_candidates(&mut self, n: usize) -> Vec<NodeAddr> {
        let mut chosen = Vec::new();
        let mut skip = std::collections::HashSet::new();
        loop {
            if chosen.len() >= n {
                break;
            }
            let pick = self
                .known
                .iter()
                .find(|(addr, info)| {
                    !skip.contains(*addr)
                        && !self.connected.contains_key(*addr)
                        && !speed_ratio_exceeds_20x(self.local_speed, info.speed)
                })
                .map(|(addr, _)| *addr);
            match pick {
                Some(addr) => {
                    self.known.remove(&addr);
                    chosen.push(addr);
                }
                None => break,
            }
            skip.insert(chosen.last().copied().unwrap());
        }
        if chosen.is_empty() {
            debug!(error = %PolicyError::NoCandidate, "candidate selection found nothing");
        }
        chosen
    }

    fn spawn_dial(&self, addr: NodeAddr) {
        let ctx = self.dial_ctx.clone();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let _ = self_tx.send(NodeManagerMsg::ConnTryingDelta(-1)).await;
            let result = dial_one(addr, &ctx).await;
            let _ = self_tx.send(NodeManagerMsg::ConnTryingDelta(1)).await;
            if let Err(e) = result {
                warn!(%addr, error = %e, "dial failed");
            }
        });
    }
}

fn speed_ratio_exceeds_20x(local: u32, candidate: u32) -> bool {
    if local == 0 || candidate == 0 {
        return false;
    }
    let ratio = local as f64 / candidate as f64;
    !(0.05..=20.0).contains(&ratio)
}

async fn dial_one(addr: NodeAddr, ctx: &DialContext) -> Result<(), NetError> {
    let socket_addr: SocketAddr = (addr.ip, addr.port).into();
    let stream = tokio::time::timeout(ctx.dial_timeout, TcpStream::connect(socket_addr))
        .await
        .map_err(|_| NetError::DialTimeout {
            addr: socket_addr,
            secs: ctx.dial_timeout.as_secs(),
        })??;
    crate::spawn_established_connection(stream, socket_addr, true, Some(addr), ctx.clone()).await
}
