//! The servent: central inbound dispatch plus the public library surface
//! consumed by the operational entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use winny_core::cmds::CloseKind;
use winny_core::config::Config;
use winny_core::{Command, FileKey};

use crate::conn::LocalIdentity;
use crate::nodemgr::{AddrUpdate, DialContext, NodeManager, NodeManagerMsg};
use crate::querymgr::{QueryManager, QueryManagerMsg, SubscriptionId};
use crate::InboundEvent;

/// A live subscription returned by [`Servent::search`] or
/// [`Servent::keyword_stream`]. Dropping it does not unsubscribe —
/// callers must call [`QuerySubscription::unsubscribe`] (or the
/// equivalent on [`KeywordSubscription`]) themselves, matching the
/// source's explicit-quit-signal contract: a sink that stops draining
/// blocks the query manager's loop.
pub struct QuerySubscription {
    id: SubscriptionId,
    query_mgr_tx: mpsc::Sender<QueryManagerMsg>,
    pub results: mpsc::Receiver<FileKey>,
}

impl QuerySubscription {
    pub async fn unsubscribe(self) {
        let _ = self
            .query_mgr_tx
            .send(QueryManagerMsg::RemoveQuery(self.id))
            .await;
    }
}

pub struct KeywordSubscription {
    id: SubscriptionId,
    query_mgr_tx: mpsc::Sender<QueryManagerMsg>,
    pub keywords: mpsc::Receiver<String>,
}

impl KeywordSubscription {
    pub async fn unsubscribe(self) {
        let _ = self
            .query_mgr_tx
            .send(QueryManagerMsg::RemoveKeywordStream(self.id))
            .await;
    }
}

/// Handle to the running servent; the value returned by
/// [`Servent::bind`] and used by the operational program to drive the
/// public API.
#[derive(Clone)]
pub struct Servent {
    node_mgr_tx: mpsc::Sender<NodeManagerMsg>,
    query_mgr_tx: mpsc::Sender<QueryManagerMsg>,
}

impl Servent {
    /// Starts the listener, the two manager event loops, and the central
    /// inbound dispatcher, and returns a handle to the running servent
    /// without blocking. The operational entry point uses this to drive
    /// [`Servent::add_node`] / [`Servent::node_list`] / [`Servent::search`]
    /// against a servent that is already live, which [`listen_and_serve`]'s
    /// all-in-one, blocks-forever shape cannot offer a caller.
    ///
    /// [`listen_and_serve`]: Servent::listen_and_serve
    pub async fn bind(cfg: Config) -> Result<Self> {
        if cfg.servent.speed == 0 {
            bail!("servent.speed must be set before ListenAndServe");
        }
        if cfg.servent.port == 0 {
            bail!("servent.port must be nonzero");
        }

        let listener = TcpListener::bind(("0.0.0.0", cfg.servent.port)).await?;
        info!(port = cfg.servent.port, "listening");

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundEvent>(256);

        let local = Arc::new(LocalIdentity {
            speed: cfg.servent.speed,
            port: cfg.servent.port as u32,
            ddns: cfg.servent.ddns.clone().unwrap_or_default(),
            clusters: cfg.servent.clusters.clone(),
        });

        let dial_ctx = DialContext {
            local: local.clone(),
            max_payload: cfg.network.max_payload_bytes,
            max_cache_res: cfg.network.max_cache_res_bytes,
            dial_timeout: Duration::from_secs(cfg.network.dial_timeout_secs),
            inbound_tx: inbound_tx.clone(),
        };

        let (node_mgr, node_mgr_tx) =
            NodeManager::new(cfg.node_manager.clone(), cfg.servent.speed, dial_ctx.clone());
        tokio::spawn(node_mgr.run());

        let (query_mgr, query_mgr_tx) =
            QueryManager::new(cfg.query_manager.clone(), node_mgr_tx.clone());
        tokio::spawn(query_mgr.run());

        tokio::spawn(accept_loop(listener, dial_ctx));

        let node_mgr_tx_for_dispatch = node_mgr_tx.clone();
        let query_mgr_tx_for_dispatch = query_mgr_tx.clone();
        tokio::spawn(async move {
            dispatch_loop(&mut inbound_rx, &node_mgr_tx_for_dispatch, &query_mgr_tx_for_dispatch)
                .await;
        });

        Ok(Servent { node_mgr_tx, query_mgr_tx })
    }

    /// Starts the servent exactly as [`Servent::bind`] does, then blocks
    /// forever on the inbound dispatcher, matching the library surface's
    /// `ListenAndServe()` contract for a caller with no need of a handle.
    pub async fn listen_and_serve(cfg: Config) -> Result<()> {
        let _servent = Servent::bind(cfg).await?;
        std::future::pending::<()>().await;
        Ok(())
    }

    /// Enqueues an `@hex` node string for the node manager to decode and
    /// (if eligible) add to the known-peer set.
    pub async fn add_node(&self, token: String) {
        let _ = self.node_mgr_tx.send(NodeManagerMsg::AddNodeStr(token)).await;
    }

    /// A synchronous snapshot of the known-peer set, re-encrypted as
    /// `@hex` tokens.
    pub async fn node_list(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        if self
            .node_mgr_tx
            .send(NodeManagerMsg::GetNodeList(tx))
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Registers a search. `""` matches every cached key. The returned
    /// subscription immediately receives a replay of every
    /// currently-cached match before any live results.
    pub async fn search(&self, keyword: String) -> QuerySubscription {
        let (sink, results) = mpsc::channel(64);
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .query_mgr_tx
            .send(QueryManagerMsg::AddQuery {
                keyword,
                sink,
                reply: reply_tx,
            })
            .await;
        let id = reply_rx.await.unwrap_or(0);
        QuerySubscription {
            id,
            query_mgr_tx: self.query_mgr_tx.clone(),
            results,
        }
    }

    /// Subscribes to every keyword observed in an incoming, non-empty
    /// `Query`.
    pub async fn keyword_stream(&self) -> KeywordSubscription {
        let (sink, keywords) = mpsc::channel(64);
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .query_mgr_tx
            .send(QueryManagerMsg::AddKeywordStream {
                sink,
                reply: reply_tx,
            })
            .await;
        let id = reply_rx.await.unwrap_or(0);
        KeywordSubscription {
            id,
            query_mgr_tx: self.query_mgr_tx.clone(),
            keywords,
        }
    }
}

async fn accept_loop(listener: TcpListener, ctx: DialContext) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        crate::spawn_established_connection(stream, peer, false, None, ctx).await
                    {
                        warn!(%peer, error = %e, "inbound handshake failed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Central inbound dispatch: by command type, to the node manager
/// (address updates, disconnect requests) or the query manager (search
/// commands), mirroring the reference servent's single dispatch loop.
async fn dispatch_loop(
    inbound_rx: &mut mpsc::Receiver<InboundEvent>,
    node_mgr_tx: &mpsc::Sender<NodeManagerMsg>,
    query_mgr_tx: &mpsc::Sender<QueryManagerMsg>,
) {
    while let Some(event) = inbound_rx.recv().await {
        match event {
            InboundEvent::Established(handle) => {
                let _ = node_mgr_tx.send(NodeManagerMsg::Established(handle)).await;
            }
            InboundEvent::Closed { addr, cause } => {
                info!(%addr, %cause, "connection closed");
                let _ = node_mgr_tx.send(NodeManagerMsg::Closed(addr)).await;
            }
            InboundEvent::Received { from, cmd } => {
                dispatch_command(from, cmd, node_mgr_tx, query_mgr_tx).await;
            }
        }
    }
}

async fn dispatch_command(
    from: winny_core::NodeAddr,
    cmd: Command,
    node_mgr_tx: &mpsc::Sender<NodeManagerMsg>,
    query_mgr_tx: &mpsc::Sender<QueryManagerMsg>,
) {
    match cmd {
        Command::Addr { ip, port, bbs_port, is_bbs, speed, clusters } => {
            let update = AddrUpdate {
                addr: winny_core::NodeAddr::new(ip, port as u16),
                bbs_port: bbs_port as u16,
                is_bbs,
                speed,
                clusters,
            };
            let _ = node_mgr_tx.send(NodeManagerMsg::AddNode(update)).await;
        }
        Command::Query(query) => {
            let _ = query_mgr_tx.send(QueryManagerMsg::RecvQuery(query)).await;
        }
        Command::Close(kind) => {
            if matches!(
                kind,
                CloseKind::Close
                    | CloseKind::TransLimit
                    | CloseKind::BadPort0
                    | CloseKind::Ignored
                    | CloseKind::Slow
                    | CloseKind::Forgery
            ) {
                let _ = node_mgr_tx.send(NodeManagerMsg::Disconnect(from)).await;
            }
        }
        other => {
            warn!(from = %from, idx = other.idx(), "unhandled command on inbound dispatch");
        }
    }
}
