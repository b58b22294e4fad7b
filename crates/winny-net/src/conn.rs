//! Per-connection framing, RC4 streams, and the handshake state machine.
//!
//! One task pair per TCP connection: a read-side loop owns the read
//! cipher and posts decoded commands to the servent's inbound channel; a
//! write-side task owns the write cipher and serialises one command at a
//! time onto the socket. The handshake runs both directions
//! concurrently over the same socket, since the peer is doing its own
//! mirrored handshake at the same time.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use winny_core::cmds::{ConnType, OUR_CERT, OUR_PROTO_VERSION};
use winny_core::crypto::Rc4;
use winny_core::wire::{get_u32_le, get_u8};
use winny_core::{Command, NodeAddr};

use crate::error::{NetError, ProtocolError};

/// Bytes 1..=3 (0-indexed) of the 4-byte handshake key are XORed with
/// this mask between the `ProtoHdr` exchange and the `Speed` exchange.
const KEY_SHUFFLE_MASK: u8 = 0x39;
const HANDSHAKE_NONCE_LEN: usize = 6;

/// A one-directional RC4 stream that passes bytes through unmodified
/// until a cipher is installed. Reproduces the reference connection
/// wrapper's write-while-unkeyed behaviour faithfully: real bytes reach
/// the peer, never a zeroed buffer (see the design notes on this).
#[derive(Default)]
pub struct CipherSlot {
    cipher: Option<Rc4>,
}

impl CipherSlot {
    pub fn install(&mut self, key: &[u8]) -> Result<(), NetError> {
        self.cipher = Some(Rc4::new(key).map_err(NetError::Crypto)?);
        Ok(())
    }

    pub fn apply(&mut self, buf: &mut [u8]) {
        if let Some(c) = &mut self.cipher {
            c.apply_keystream(buf);
        }
    }
}

/// Who we are, as advertised to every peer during the handshake.
pub struct LocalIdentity {
    pub speed: u32,
    pub port: u32,
    pub ddns: String,
    pub clusters: [String; 3],
}

/// What the peer advertised about itself, collected during the handshake.
pub struct RemoteIdentity {
    pub proto_version: u32,
    pub cert: String,
    pub speed: u32,
    pub advertised_ip: Ipv4Addr,
    pub advertised_port: u32,
    pub ddns: String,
    pub clusters: [String; 3],
    pub conn_type: ConnType,
    pub is_port0: bool,
    pub is_bad_port0: bool,
    pub is_bbs: bool,
}

/// Outcome of a completed handshake: the reconciled remote address, the
/// direction classification, and the still-open, correctly-keyed halves
/// ready for steady-state framing.
pub struct Established {
    pub remote_addr: NodeAddr,
    pub is_nat: bool,
    pub is_downstream: bool,
    pub remote: RemoteIdentity,
    pub started_at: Instant,
    pub reader: OwnedReadHalf,
    pub writer: OwnedWriteHalf,
    pub read_cipher: CipherSlot,
    pub write_cipher: CipherSlot,
}

fn shuffle_key(key: &mut [u8; 4]) {
    key[1] ^= KEY_SHUFFLE_MASK;
    key[2] ^= KEY_SHUFFLE_MASK;
    key[3] ^= KEY_SHUFFLE_MASK;
}

async fn write_raw(
    writer: &mut OwnedWriteHalf,
    cipher: &mut CipherSlot,
    bytes: &[u8],
) -> Result<(), NetError> {
    let mut buf = bytes.to_vec();
    cipher.apply(&mut buf);
    writer.write_all(&buf).await?;
    Ok(())
}

async fn write_command(
    writer: &mut OwnedWriteHalf,
    cipher: &mut CipherSlot,
    cmd: &Command,
) -> Result<(), NetError> {
    let frame = cmd.encode_frame()?;
    write_raw(writer, cipher, &frame).await
}

async fn read_exact_decrypt(
    reader: &mut OwnedReadHalf,
    cipher: &mut CipherSlot,
    n: usize,
) -> Result<Vec<u8>, NetError> {
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf).await?;
    cipher.apply(&mut buf);
    Ok(buf)
}

async fn read_command(
    reader: &mut OwnedReadHalf,
    cipher: &mut CipherSlot,
    max_payload: usize,
    max_cache_res: usize,
) -> Result<Command, NetError> {
    let header = read_exact_decrypt(reader, cipher, 5).await?;
    let mut hbuf = &header[..];
    let length = get_u32_le(&mut hbuf)? as usize;
    let idx = get_u8(&mut hbuf)?;
    let payload_len = length.checked_sub(1).ok_or(winny_core::CodecError::Truncated {
        need: 1,
        have: 0,
    })?;
    let limit = if idx == 21 { max_cache_res } else { max_payload };
    if payload_len > limit {
        return Err(NetError::Policy(crate::error::PolicyError::PayloadTooLarge {
            len: payload_len,
            limit,
        }));
    }
    let payload = read_exact_decrypt(reader, cipher, payload_len).await?;
    Ok(Command::decode(idx, &payload)?)
}

async fn expect_command(
    reader: &mut OwnedReadHalf,
    cipher: &mut CipherSlot,
    max_payload: usize,
    expected_idx: u8,
    expected_name: &'static str,
) -> Result<Command, NetError> {
    let cmd = read_command(reader, cipher, max_payload, max_payload).await?;
    if cmd.idx() != expected_idx {
        return Err(NetError::Protocol(ProtocolError::UnexpectedCommand {
            expected: expected_name,
            actual: cmd.idx(),
        }));
    }
    Ok(cmd)
}

/// Runs our side of the handshake (generate nonce, send `Compat` +
/// `ProtoHdr`, reshuffle the key, send `Speed` + `ConnType` + `SelfAddr`)
/// on the write half.
async fn run_outbound(
    writer: &mut OwnedWriteHalf,
    cipher: &mut CipherSlot,
    local: &LocalIdentity,
) -> Result<(), NetError> {
    let mut nonce = [0u8; HANDSHAKE_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    writer.write_all(&nonce).await?; // clear, cipher not yet installed

    let mut key: [u8; 4] = nonce[2..6].try_into().expect("nonce is 6 bytes");
    cipher.install(&key)?;

    write_command(writer, cipher, &Command::Compat).await?;
    write_command(
        writer,
        cipher,
        &Command::ProtoHdr {
            version: OUR_PROTO_VERSION,
            cert: OUR_CERT.to_string(),
        },
    )
    .await?;

    shuffle_key(&mut key);
    cipher.install(&key)?;

    write_command(writer, cipher, &Command::Speed { speed: local.speed }).await?;
    write_command(
        writer,
        cipher,
        &Command::ConnType {
            conn_type: ConnType::Search,
            is_port0: local.port == 0,
            is_bad_port0: false,
            is_bbs: false,
        },
    )
    .await?;
    write_command(
        writer,
        cipher,
        &Command::SelfAddr {
            ip: Ipv4Addr::UNSPECIFIED,
            port: local.port,
            ddns: local.ddns.clone(),
            clusters: local.clusters.clone(),
        },
    )
    .await?;
    Ok(())
}

/// Runs the peer's mirrored handshake on our read half, returning what
/// they advertised about themselves.
async fn run_inbound(
    reader: &mut OwnedReadHalf,
    cipher: &mut CipherSlot,
    max_payload: usize,
) -> Result<RemoteIdentity, NetError> {
    let nonce = {
        let mut buf = [0u8; HANDSHAKE_NONCE_LEN];
        reader.read_exact(&mut buf).await?;
        buf // cipher not yet installed, so no decrypt needed
    };
    let mut key: [u8; 4] = nonce[2..6].try_into().expect("nonce is 6 bytes");
    cipher.install(&key)?;

    expect_command(reader, cipher, max_payload, 97, "Compat").await?;
    let proto_hdr = expect_command(reader, cipher, max_payload, 0, "ProtoHdr").await?;
    let (proto_version, cert) = match proto_hdr {
        Command::ProtoHdr { version, cert } => (version, cert),
        _ => unreachable!("expect_command checked the index"),
    };

    shuffle_key(&mut key);
    cipher.install(&key)?;

    let speed_cmd = expect_command(reader, cipher, max_payload, 1, "Speed").await?;
    let speed = match speed_cmd {
        Command::Speed { speed } => speed,
        _ => unreachable!(),
    };
    let conn_type_cmd = expect_command(reader, cipher, max_payload, 2, "ConnType").await?;
    let (conn_type, is_port0, is_bad_port0, is_bbs) = match conn_type_cmd {
        Command::ConnType { conn_type, is_port0, is_bad_port0, is_bbs } => {
            (conn_type, is_port0, is_bad_port0, is_bbs)
        }
        _ => unreachable!(),
    };
    let self_addr_cmd = expect_command(reader, cipher, max_payload, 3, "SelfAddr").await?;
    let (advertised_ip, advertised_port, ddns, clusters) = match self_addr_cmd {
        Command::SelfAddr { ip, port, ddns, clusters } => (ip, port, ddns, clusters),
        _ => unreachable!(),
    };

    Ok(RemoteIdentity {
        proto_version,
        cert,
        speed,
        advertised_ip,
        advertised_port,
        ddns,
        clusters,
        conn_type,
        is_port0,
        is_bad_port0,
        is_bbs,
    })
}

/// Whether the *local* side of the connection should be downstream,
/// based purely on the speed ratio. `None` means the two speeds are
/// close enough (within ±20%) that the dial-direction tie-break applies
/// instead.
fn speed_based_downstream(local_speed: u32, remote_speed: u32) -> Option<bool> {
    if local_speed == 0 {
        return None;
    }
    let l = local_speed as f64;
    let r = remote_speed as f64;
    if r < 0.8 * l {
        Some(false) // remote is much slower -> remote is downstream, so we are not
    } else if r > 1.2 * l {
        Some(true) // local is much slower -> local is downstream
    } else {
        None
    }
}

/// Performs the full, symmetric handshake over `stream` and returns the
/// established connection ready for steady-state framing.
pub async fn handshake(
    stream: TcpStream,
    transport_peer: SocketAddr,
    is_dialer: bool,
    local: &LocalIdentity,
    max_payload: usize,
) -> Result<Established, NetError> {
    let started_at = Instant::now();
    let (mut reader, mut writer) = stream.into_split();
    let mut write_cipher = CipherSlot::default();
    let mut read_cipher = CipherSlot::default();

    let (write_res, read_res) = tokio::join!(
        run_outbound(&mut writer, &mut write_cipher, local),
        run_inbound(&mut reader, &mut read_cipher, max_payload),
    );
    write_res?;
    let remote = read_res?;

    let observed_ip = match transport_peer.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => remote.advertised_ip,
    };
    let is_nat = observed_ip != remote.advertised_ip;
    let remote_addr = NodeAddr::new(observed_ip, remote.advertised_port as u16);

    // Tie-break when speeds are within +-20%: the dialer ends up
    // downstream, the acceptor upstream.
    let default_is_downstream = is_dialer;
    let is_downstream =
        speed_based_downstream(local.speed, remote.speed).unwrap_or(default_is_downstream);

    Ok(Established {
        remote_addr,
        is_nat,
        is_downstream,
        remote,
        started_at,
        reader,
        writer,
        read_cipher,
        write_cipher,
    })
}

/// Reads one steady-state frame, enforcing the payload-size limits
/// before the payload bytes are pulled off the socket.
pub async fn read_frame(
    reader: &mut OwnedReadHalf,
    cipher: &mut CipherSlot,
    max_payload: usize,
    max_cache_res: usize,
) -> Result<Command, NetError> {
    read_command(reader, cipher, max_payload, max_cache_res).await
}

/// Writes one steady-state frame.
pub async fn write_frame(
    writer: &mut OwnedWriteHalf,
    cipher: &mut CipherSlot,
    cmd: &Command,
) -> Result<(), NetError> {
    write_command(writer, cipher, cmd).await
}

pub fn dial_timeout_duration(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_speeds_leave_classification_to_tie_break() {
        assert_eq!(speed_based_downstream(1000, 1100), None);
    }

    #[test]
    fn much_slower_remote_is_downstream() {
        assert_eq!(speed_based_downstream(1000, 100), Some(false));
    }

    #[test]
    fn much_slower_local_is_downstream() {
        assert_eq!(speed_based_downstream(100, 1000), Some(true));
    }

    #[test]
    fn key_shuffle_only_touches_bytes_1_to_3() {
        let mut key = [0xAAu8, 0xBB, 0xCC, 0xDD];
        let original_first = key[0];
        shuffle_key(&mut key);
        assert_eq!(key[0], original_first);
        assert_eq!(key[1], 0xBB ^ KEY_SHUFFLE_MASK);
        assert_eq!(key[2], 0xCC ^ KEY_SHUFFLE_MASK);
        assert_eq!(key[3], 0xDD ^ KEY_SHUFFLE_MASK);
    }
}
