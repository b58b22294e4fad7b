//! Shift-JIS <-> UTF-8 transcoding at the codec boundary.
//!
//! Winny2 carries filenames, trip fields and keyword strings as raw
//! Shift-JIS bytes on the wire. Everything above the codec boundary works
//! in UTF-8; these two functions are the only place the conversion happens.

use encoding_rs::SHIFT_JIS;

use crate::error::CodecError;

/// Decodes a Shift-JIS byte string into UTF-8. Malformed sequences are
/// replaced with U+FFFD by `encoding_rs` rather than rejected — wire data
/// from other servents is not trusted to be clean, and a cosmetic mangled
/// filename is preferable to dropping the whole record.
pub fn decode(bytes: &[u8]) -> String {
    let (cow, _encoding, _had_errors) = SHIFT_JIS.decode(bytes);
    cow.into_owned()
}

/// Encodes UTF-8 text back to Shift-JIS for the wire. Characters with no
/// Shift-JIS representation are replaced with `?` by `encoding_rs`'s HTML
/// encode path; we use the stricter form and surface a `BadTranscode`
/// error instead, since re-encoding our own node's filenames should never
/// hit an unmappable character in practice.
pub fn encode(s: &str, field: &'static str) -> Result<Vec<u8>, CodecError> {
    let (bytes, _encoding, had_errors) = SHIFT_JIS.encode(s);
    if had_errors {
        return Err(CodecError::BadTranscode { field });
    }
    Ok(bytes.into_owned())
}
