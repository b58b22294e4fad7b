//! Boolean keyword matching against a `FileKey`.

use crate::filekey::FileKey;

/// Splits `filter` on ASCII space and matches a [`FileKey`] against every
/// non-empty word. A leading `%` matches the content hash as lowercase
/// hex; a leading `-` negates a substring match against the filename;
/// otherwise it's a plain substring match. Empty words are skipped, and
/// an empty or all-whitespace filter matches everything.
pub fn matches(key: &FileKey, filter: &str) -> bool {
    filter.split(' ').all(|word| {
        if word.is_empty() {
            true
        } else if let Some(hex_hash) = word.strip_prefix('%') {
            match_hash(key, hex_hash)
        } else if let Some(needle) = word.strip_prefix('-') {
            !key.file_name.contains(needle)
        } else {
            key.file_name.contains(word)
        }
    })
}

fn match_hash(key: &FileKey, hex_hash: &str) -> bool {
    match hex::decode(hex_hash) {
        Ok(decoded) => decoded == key.hash,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::NodeAddr;
    use std::net::Ipv4Addr;

    fn sample() -> FileKey {
        FileKey {
            node: NodeAddr::new(Ipv4Addr::new(10, 0, 0, 1), 7743),
            bbs_node: NodeAddr::new(Ipv4Addr::new(0, 0, 0, 0), 0),
            size: 1,
            hash: [0xabu8; 16],
            file_name: "anime_ep01.mkv".to_string(),
            trip: [0u8; 11],
            bbs_trip: vec![],
            ttl: 0,
            ref_cnt: 0,
            timestamp: 0,
            is_ignored: false,
            key_ver: 0,
        }
    }

    #[test]
    fn negated_word_excludes_match() {
        let key = sample();
        assert!(matches(&key, "anime -avi"));
        assert!(!matches(&key, "anime -mkv"));
    }

    #[test]
    fn plain_words_all_must_match() {
        let key = sample();
        assert!(!matches(&key, "anime avi"));
        assert!(matches(&key, "anime mkv"));
    }

    #[test]
    fn hash_prefix_matches_exact_hash_only() {
        let key = sample();
        let hex_hash = hex::encode(key.hash);
        assert!(matches(&key, &format!("%{hex_hash}")));
        assert!(!matches(&key, "%0000000000000000000000000000ff"));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let key = sample();
        assert!(matches(&key, ""));
    }
}
