//! Little-endian primitive reads/writes shared by every command and the
//! `FileKey` record. The rest of the codec builds on top of `bytes::Buf`
//! / `BufMut` and these helpers rather than hand-rolling offsets.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut};

use crate::addr::NodeAddr;
use crate::error::CodecError;

/// Guard a read of `len` bytes against `buf`'s remaining length.
pub fn need(buf: &[u8], len: usize) -> Result<(), CodecError> {
    if buf.len() < len {
        Err(CodecError::Truncated {
            need: len,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

pub fn get_u8(buf: &mut impl Buf) -> Result<u8, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::Truncated { need: 1, have: 0 });
    }
    Ok(buf.get_u8())
}

pub fn get_u16_le(buf: &mut impl Buf) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated {
            need: 2,
            have: buf.remaining(),
        });
    }
    Ok(buf.get_u16_le())
}

pub fn get_u32_le(buf: &mut impl Buf) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated {
            need: 4,
            have: buf.remaining(),
        });
    }
    Ok(buf.get_u32_le())
}

/// Reads exactly `len` raw bytes and returns them as an owned `Vec<u8>`.
pub fn get_bytes(buf: &mut impl Buf, len: usize) -> Result<Vec<u8>, CodecError> {
    if buf.remaining() < len {
        return Err(CodecError::Truncated {
            need: len,
            have: buf.remaining(),
        });
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn put_bool(out: &mut impl BufMut, v: bool) {
    out.put_u8(if v { 1 } else { 0 });
}

pub fn get_bool(buf: &mut impl Buf) -> Result<bool, CodecError> {
    Ok(get_u8(buf)? != 0)
}

/// Reads the packed `4B IP + u16 LE port` address shape used by node
/// records, `cmdAddr` and `FileKey`.
pub fn get_node_addr16(buf: &mut impl Buf) -> Result<NodeAddr, CodecError> {
    if buf.remaining() < 6 {
        return Err(CodecError::Truncated {
            need: 6,
            have: buf.remaining(),
        });
    }
    let ip = Ipv4Addr::new(buf.get_u8(), buf.get_u8(), buf.get_u8(), buf.get_u8());
    let port = buf.get_u16_le();
    Ok(NodeAddr::new(ip, port))
}

pub fn put_node_addr16(out: &mut impl BufMut, addr: &NodeAddr) {
    out.put_slice(&addr.ip.octets());
    out.put_u16_le(addr.port);
}

/// Reads the `4B IP + u32 LE port` address shape used by `cmdAddr`'s own
/// node field and `cmdSelfAddr`.
pub fn get_node_addr32(buf: &mut impl Buf) -> Result<(Ipv4Addr, u32), CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::Truncated {
            need: 8,
            have: buf.remaining(),
        });
    }
    let ip = Ipv4Addr::new(buf.get_u8(), buf.get_u8(), buf.get_u8(), buf.get_u8());
    let port = buf.get_u32_le();
    Ok((ip, port))
}

pub fn put_node_addr32(out: &mut impl BufMut, ip: Ipv4Addr, port: u32) {
    out.put_slice(&ip.octets());
    out.put_u32_le(port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn reads_u32_le() {
        let mut b = Bytes::from_static(&[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(get_u32_le(&mut b).unwrap(), 1);
    }

    #[test]
    fn truncated_read_reports_sizes() {
        let mut b = Bytes::from_static(&[0x01]);
        let err = get_u32_le(&mut b).unwrap_err();
        match err {
            CodecError::Truncated { need, have } => {
                assert_eq!(need, 4);
                assert_eq!(have, 1);
            }
            _ => panic!("wrong error variant"),
        }
    }

    #[test]
    fn bool_roundtrip() {
        let mut out = Vec::new();
        put_bool(&mut out, true);
        put_bool(&mut out, false);
        let mut b = Bytes::from(out);
        assert!(get_bool(&mut b).unwrap());
        assert!(!get_bool(&mut b).unwrap());
    }
}
