//! RC4 stream cipher and the key-truncation quirk the wire protocol
//! depends on.
//!
//! The reference servent carries its handshake-derived RC4 key as a C
//! string, so any key with an embedded zero byte gets silently truncated
//! by `strlen()` before the key schedule runs. Only the handshake's
//! per-direction stream key goes through that truncation
//! (`examples/original_source/winny/nodeconn.go`'s `strlenWorkaround`
//! call sites) — the node-string key, the fixed `ProtoHdr` key and the
//! `FileKey` filename key are all built with `rc4.NewCipher` directly on
//! the full key, untruncated
//! (`examples/original_source/winny/nodestr.go`, `cmds.go`, `structs.go`).
//! [`Rc4::new`] is the truncating constructor for the handshake path;
//! [`Rc4::new_raw`] is for everywhere else.
//!
//! RC4 here takes genuinely variable-length keys (1 to 256 bytes)
//! depending on call site, which doesn't fit the const-generic key sizes
//! the RustCrypto stream-cipher crates expose; a plain from-scratch
//! implementation of the (very small) KSA/PRGA algorithm is the more
//! robust choice here than forcing a fixed-size key type.

use crate::error::CryptoError;

/// Truncates `key` at its first zero byte, matching the C `strlen()`
/// behavior the reference servent relies on when building its RC4 key.
/// A key that is all zero bytes, or starts with one, yields `&key[..1]`
/// rather than an empty slice.
pub fn strlen_workaround(key: &[u8]) -> &[u8] {
    if key.is_empty() {
        return key;
    }
    if key[0] == 0 {
        return &key[0..1];
    }
    match key.iter().position(|&b| b == 0) {
        Some(pos) => &key[..pos],
        None => key,
    }
}

/// A keyed RC4 keystream generator.
pub struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Builds a cipher from `key` after applying [`strlen_workaround`].
    /// Use this only for the handshake-derived stream key (see
    /// `winny-net`'s `CipherSlot::install`); every other call site in
    /// this protocol wants [`Rc4::new_raw`].
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        Self::new_raw(strlen_workaround(key))
    }

    /// Builds a cipher from the full `key`, with no `strlen` truncation.
    /// This is what the node-string cipher, the `ProtoHdr` obfuscation
    /// key and the `FileKey` filename key all use on the wire.
    pub fn new_raw(key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }

        let mut state = [0u8; 256];
        for (idx, slot) in state.iter_mut().enumerate() {
            *slot = idx as u8;
        }

        let mut j: u8 = 0;
        for i in 0..256usize {
            j = j
                .wrapping_add(state[i])
                .wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }

        Ok(Rc4 { state, i: 0, j: 0 })
    }

    /// XORs `buf` in place with the next `buf.len()` keystream bytes.
    pub fn apply_keystream(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let k = self.state[(self.state[self.i as usize]
                .wrapping_add(self.state[self.j as usize])) as usize];
            *byte ^= k;
        }
    }
}
