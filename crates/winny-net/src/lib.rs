pub mod conn;
pub mod error;
pub mod nodemgr;
pub mod querymgr;
pub mod servent;

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use winny_core::{Command, NodeAddr};

use conn::{CipherSlot, Established};
use error::NetError;
use nodemgr::{DialContext, EstablishedHandle};

pub use servent::Servent;

/// Posted by a connection's read task to the servent's central inbound
/// channel. This is the single hand-off point between the connection
/// engine and the two managers.
pub enum InboundEvent {
    Established(Box<EstablishedHandle>),
    Closed { addr: NodeAddr, cause: String },
    Received { from: NodeAddr, cmd: Command },
}

/// Runs the handshake over `stream`, then spawns the paired read/write
/// tasks for steady-state framing. Mirrors the teacher's
/// `spawn_new_sessions` shape: one fresh bounded channel and two paired
/// `tokio::spawn` tasks per newly observed connection.
pub async fn spawn_established_connection(
    stream: tokio::net::TcpStream,
    transport_peer: SocketAddr,
    is_dialer: bool,
    prev_addr: Option<NodeAddr>,
    ctx: DialContext,
) -> Result<(), NetError> {
    let established = conn::handshake(
        stream,
        transport_peer,
        is_dialer,
        &ctx.local,
        ctx.max_payload,
    )
    .await?;

    let Established {
        remote_addr,
        is_nat,
        is_downstream,
        remote,
        started_at,
        reader,
        writer,
        read_cipher,
        write_cipher,
    } = established;

    debug!(%remote_addr, is_nat, is_downstream, cert = %remote.cert, "handshake complete");

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);

    tokio::spawn(write_loop(writer, write_cipher, cmd_rx));
    tokio::spawn(read_loop(
        reader,
        read_cipher,
        remote_addr,
        ctx.max_payload,
        ctx.max_cache_res,
        ctx.inbound_tx.clone(),
    ));

    let handle = EstablishedHandle {
        addr: remote_addr,
        prev_addr,
        conn_type: remote.conn_type,
        is_downstream,
        started_at,
        sender: cmd_tx,
        proto_version: remote.proto_version,
        cert: remote.cert,
        speed: remote.speed,
        ddns: remote.ddns,
        clusters: remote.clusters,
    };
    let _ = ctx
        .inbound_tx
        .send(InboundEvent::Established(Box::new(handle)))
        .await;

    Ok(())
}

async fn write_loop(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut cipher: CipherSlot,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(cmd) = rx.recv().await {
        if let Err(e) = conn::write_frame(&mut writer, &mut cipher, &cmd).await {
            warn!(error = %e, "write loop exiting on error");
            break;
        }
    }
}

async fn read_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    mut cipher: CipherSlot,
    addr: NodeAddr,
    max_payload: usize,
    max_cache_res: usize,
    inbound_tx: mpsc::Sender<InboundEvent>,
) {
    loop {
        match conn::read_frame(&mut reader, &mut cipher, max_payload, max_cache_res).await {
            Ok(cmd) => {
                if inbound_tx
                    .send(InboundEvent::Received { from: addr, cmd })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                let _ = inbound_tx
                    .send(InboundEvent::Closed {
                        addr,
                        cause: e.to_string(),
                    })
                    .await;
                break;
            }
        }
    }
}
