//! The `FileKey` record embedded in `Query` and gossiped through the
//! keys cache.

use bytes::{Buf, BufMut};

use crate::addr::NodeAddr;
use crate::crypto::Rc4;
use crate::error::CodecError;
use crate::text;
use crate::wire::{self, get_bool, get_u16_le, get_u32_le, get_u8, put_bool};

/// A gossiped file descriptor. The hash is its identity — a key cache
/// accepts a given hash at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct FileKey {
    pub node: NodeAddr,
    pub bbs_node: NodeAddr,
    pub size: u32,
    pub hash: [u8; 16],
    pub file_name: String,
    pub trip: [u8; 11],
    pub bbs_trip: Vec<u8>,
    pub ttl: u16,
    pub ref_cnt: u32,
    pub timestamp: u32,
    pub is_ignored: bool,
    pub key_ver: u8,
}

fn checksum16(plain: &[u8]) -> u16 {
    plain
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

impl FileKey {
    pub fn unmarshal(buf: &mut impl Buf) -> Result<Self, CodecError> {
        let node = wire::get_node_addr16(buf)?;
        let bbs_node = wire::get_node_addr16(buf)?;
        let size = get_u32_le(buf)?;
        let hash: [u8; 16] = wire::get_bytes(buf, 16)?
            .try_into()
            .expect("length checked above");

        let name_len = get_u8(buf)? as usize;
        let declared_checksum = get_u16_le(buf)?;
        let mut name_bytes = wire::get_bytes(buf, name_len)?;

        let key = [(declared_checksum & 0xFF) as u8];
        let mut cipher = Rc4::new_raw(&key).expect("non-empty key");
        cipher.apply_keystream(&mut name_bytes);

        let computed_checksum = checksum16(&name_bytes);
        if computed_checksum != declared_checksum {
            return Err(CodecError::BadFileKeyChecksum {
                declared: declared_checksum,
                computed: computed_checksum,
            });
        }
        let file_name = text::decode(&name_bytes);

        let trip: [u8; 11] = wire::get_bytes(buf, 11)?
            .try_into()
            .expect("length checked above");
        let bbs_trip_len = get_u8(buf)? as usize;
        let bbs_trip = wire::get_bytes(buf, bbs_trip_len)?;
        let ttl = get_u16_le(buf)?;
        let ref_cnt = get_u32_le(buf)?;
        let timestamp = get_u32_le(buf)?;
        let is_ignored = get_bool(buf)?;
        let key_ver = get_u8(buf)?;

        Ok(FileKey {
            node,
            bbs_node,
            size,
            hash,
            file_name,
            trip,
            bbs_trip,
            ttl,
            ref_cnt,
            timestamp,
            is_ignored,
            key_ver,
        })
    }

    pub fn marshal(&self, out: &mut impl BufMut) -> Result<(), CodecError> {
        wire::put_node_addr16(out, &self.node);
        wire::put_node_addr16(out, &self.bbs_node);
        out.put_u32_le(self.size);
        out.put_slice(&self.hash);

        let mut name_bytes = text::encode(&self.file_name, "FileKey.file_name")?;
        if name_bytes.len() > u8::MAX as usize {
            return Err(CodecError::TooLong {
                len: name_bytes.len(),
                limit: u8::MAX as usize,
            });
        }
        let checksum = checksum16(&name_bytes);
        out.put_u8(name_bytes.len() as u8);
        out.put_u16_le(checksum);

        let key = [(checksum & 0xFF) as u8];
        let mut cipher = Rc4::new_raw(&key).expect("non-empty key");
        cipher.apply_keystream(&mut name_bytes);
        out.put_slice(&name_bytes);

        out.put_slice(&self.trip);
        if self.bbs_trip.len() > u8::MAX as usize {
            return Err(CodecError::TooLong {
                len: self.bbs_trip.len(),
                limit: u8::MAX as usize,
            });
        }
        out.put_u8(self.bbs_trip.len() as u8);
        out.put_slice(&self.bbs_trip);
        out.put_u16_le(self.ttl);
        out.put_u32_le(self.ref_cnt);
        out.put_u32_le(self.timestamp);
        put_bool(out, self.is_ignored);
        out.put_u8(self.key_ver);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample() -> FileKey {
        FileKey {
            node: NodeAddr::new(Ipv4Addr::new(10, 0, 0, 1), 7743),
            bbs_node: NodeAddr::new(Ipv4Addr::new(0, 0, 0, 0), 0),
            size: 123_456,
            hash: [7u8; 16],
            file_name: "anime_ep01.mkv".to_string(),
            trip: [1u8; 11],
            bbs_trip: vec![],
            ttl: 5,
            ref_cnt: 1,
            timestamp: 1_700_000_000,
            is_ignored: false,
            key_ver: 1,
        }
    }

    #[test]
    fn roundtrips_through_marshal_unmarshal() {
        let key = sample();
        let mut buf = Vec::new();
        key.marshal(&mut buf).unwrap();
        let mut cursor = &buf[..];
        let parsed = FileKey::unmarshal(&mut cursor).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn tampered_filename_bytes_fail_checksum() {
        let key = sample();
        let mut buf = Vec::new();
        key.marshal(&mut buf).unwrap();
        // Flip a byte inside the encrypted filename field, which lives
        // right after the 3-byte name-len+checksum header at the fixed
        // offset following the two 6-byte addresses and the 4-byte size
        // and 16-byte hash (6+6+4+16+1+2 = 35).
        buf[35] ^= 0xFF;
        let mut cursor = &buf[..];
        assert!(matches!(
            FileKey::unmarshal(&mut cursor),
            Err(CodecError::BadFileKeyChecksum { .. })
        ));
    }

    #[test]
    fn empty_filename_roundtrips() {
        let mut key = sample();
        key.file_name = String::new();
        let mut buf = Vec::new();
        key.marshal(&mut buf).unwrap();
        let mut cursor = &buf[..];
        let parsed = FileKey::unmarshal(&mut cursor).unwrap();
        assert_eq!(parsed, key);
    }
}
