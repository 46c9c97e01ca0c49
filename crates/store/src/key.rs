//! Binary key encodings for every column. Integers are big-endian so the
//! backend's key order matches numeric order; timestamps are stored
//! inverted (`u64::MAX - ts`) so ascending iteration yields newest-first.
//! String components (CID roots, hex pubkeys) never contain `0x00`, which
//! makes it a safe separator.

use nectar_primitives::{EventId, Kind, Pubkey};

use crate::{Column, Result, StoreError};

pub const SEP: u8 = 0x00;

/// Inverted timestamp for descending scans.
#[must_use]
pub fn ts_desc(created_at: u64) -> [u8; 8] {
    (u64::MAX - created_at).to_be_bytes()
}

#[must_use]
pub fn from_ts_desc(bytes: [u8; 8]) -> u64 {
    u64::MAX - u64::from_be_bytes(bytes)
}

// ---- event columns -------------------------------------------------------

#[must_use]
pub fn event(id: &EventId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

#[must_use]
pub fn author_index(pubkey: &Pubkey, kind: Kind, created_at: u64, id: &EventId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + 4 + 8 + 32);
    key.extend_from_slice(pubkey.as_bytes());
    key.extend_from_slice(&kind.0.to_be_bytes());
    key.extend_from_slice(&ts_desc(created_at));
    key.extend_from_slice(id.as_bytes());
    key
}

#[must_use]
pub fn author_prefix(pubkey: &Pubkey) -> Vec<u8> {
    pubkey.as_bytes().to_vec()
}

#[must_use]
pub fn author_kind_prefix(pubkey: &Pubkey, kind: Kind) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + 4);
    key.extend_from_slice(pubkey.as_bytes());
    key.extend_from_slice(&kind.0.to_be_bytes());
    key
}

#[must_use]
pub fn kind_index(kind: Kind, created_at: u64, id: &EventId) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 8 + 32);
    key.extend_from_slice(&kind.0.to_be_bytes());
    key.extend_from_slice(&ts_desc(created_at));
    key.extend_from_slice(id.as_bytes());
    key
}

#[must_use]
pub fn kind_prefix(kind: Kind) -> Vec<u8> {
    kind.0.to_be_bytes().to_vec()
}

#[must_use]
pub fn tag_index(name: &str, value: &str, created_at: u64, id: &EventId) -> Vec<u8> {
    let mut key = tag_prefix(name, value);
    key.extend_from_slice(&ts_desc(created_at));
    key.extend_from_slice(id.as_bytes());
    key
}

#[must_use]
pub fn tag_prefix(name: &str, value: &str) -> Vec<u8> {
    let name = name.as_bytes();
    let value = value.as_bytes();

    let mut key = Vec::with_capacity(1 + name.len() + 2 + value.len());
    key.push(u8::try_from(name.len()).unwrap_or(u8::MAX));
    key.extend_from_slice(name);
    key.extend_from_slice(&u16::try_from(value.len()).unwrap_or(u16::MAX).to_be_bytes());
    key.extend_from_slice(value);
    key
}

#[must_use]
pub fn addressable(pubkey: &Pubkey, kind: Kind, d_value: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + 4 + d_value.len());
    key.extend_from_slice(pubkey.as_bytes());
    key.extend_from_slice(&kind.0.to_be_bytes());
    key.extend_from_slice(d_value.as_bytes());
    key
}

/// Pull the trailing event id out of an index key.
pub fn id_suffix(column: Column, key: &[u8]) -> Result<EventId> {
    let Some(tail) = key.len().checked_sub(32).map(|at| &key[at..]) else {
        return Err(StoreError::MalformedKey { column });
    };

    let bytes: [u8; 32] = tail
        .try_into()
        .map_err(|_| StoreError::MalformedKey { column })?;

    Ok(EventId::from_bytes(bytes))
}

/// Pull the `created_at` preceding the trailing id out of an index key.
pub fn ts_before_id(column: Column, key: &[u8]) -> Result<u64> {
    let Some(at) = key.len().checked_sub(40) else {
        return Err(StoreError::MalformedKey { column });
    };

    let bytes: [u8; 8] = key[at..at + 8]
        .try_into()
        .map_err(|_| StoreError::MalformedKey { column })?;

    Ok(from_ts_desc(bytes))
}

// ---- dag / content columns -----------------------------------------------

#[must_use]
pub fn leaf(root: &str, hash: &str) -> Vec<u8> {
    scoped(root, hash.as_bytes())
}

#[must_use]
pub fn leaf_prefix(root: &str) -> Vec<u8> {
    scope_prefix(root)
}

#[must_use]
pub fn content(hash: &[u8; 32]) -> Vec<u8> {
    hash.to_vec()
}

#[must_use]
pub fn label(root: &str, label: u64) -> Vec<u8> {
    scoped(root, &label.to_be_bytes())
}

#[must_use]
pub fn label_prefix(root: &str) -> Vec<u8> {
    scope_prefix(root)
}

#[must_use]
pub fn owner(root: &str, pubkey: &Pubkey) -> Vec<u8> {
    scoped(root, pubkey.to_hex().as_bytes())
}

#[must_use]
pub fn owner_prefix(root: &str) -> Vec<u8> {
    scope_prefix(root)
}

#[must_use]
pub fn owner_roots(pubkey: &Pubkey, root: &str) -> Vec<u8> {
    scoped(&pubkey.to_hex(), root.as_bytes())
}

#[must_use]
pub fn owner_roots_prefix(pubkey: &Pubkey) -> Vec<u8> {
    scope_prefix(&pubkey.to_hex())
}

#[must_use]
pub fn blob_meta(hash: &[u8; 32]) -> Vec<u8> {
    hash.to_vec()
}

/// The suffix after the scope separator, as UTF-8.
pub fn scoped_suffix(column: Column, key: &[u8]) -> Result<String> {
    let at = key
        .iter()
        .position(|&b| b == SEP)
        .ok_or(StoreError::MalformedKey { column })?;

    String::from_utf8(key[at + 1..].to_vec()).map_err(|_| StoreError::MalformedKey { column })
}

/// The label suffix after the scope separator.
pub fn label_suffix(column: Column, key: &[u8]) -> Result<u64> {
    let at = key
        .iter()
        .position(|&b| b == SEP)
        .ok_or(StoreError::MalformedKey { column })?;

    let bytes: [u8; 8] = key[at + 1..]
        .try_into()
        .map_err(|_| StoreError::MalformedKey { column })?;

    Ok(u64::from_be_bytes(bytes))
}

fn scoped(scope: &str, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(scope.len() + 1 + suffix.len());
    key.extend_from_slice(scope.as_bytes());
    key.push(SEP);
    key.extend_from_slice(suffix);
    key
}

fn scope_prefix(scope: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(scope.len() + 1);
    key.extend_from_slice(scope.as_bytes());
    key.push(SEP);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_desc_reverses_order() {
        assert!(ts_desc(10) > ts_desc(20));
        assert_eq!(from_ts_desc(ts_desc(1_700_000_000)), 1_700_000_000);
    }

    #[test]
    fn author_index_sorts_newest_first_within_kind() {
        let pubkey = Pubkey::from_bytes([1; 32]);
        let id = EventId::from_bytes([2; 32]);

        let newer = author_index(&pubkey, Kind(1), 200, &id);
        let older = author_index(&pubkey, Kind(1), 100, &id);

        assert!(newer < older);
        assert!(newer.starts_with(&author_kind_prefix(&pubkey, Kind(1))));
    }

    #[test]
    fn index_key_decodes_id_and_ts() {
        let pubkey = Pubkey::from_bytes([1; 32]);
        let id = EventId::from_bytes([9; 32]);
        let key = author_index(&pubkey, Kind(7), 1_234, &id);

        assert_eq!(id_suffix(Column::AuthorIndex, &key).expect("id"), id);
        assert_eq!(ts_before_id(Column::AuthorIndex, &key).expect("ts"), 1_234);
    }

    #[test]
    fn tag_prefix_is_unambiguous() {
        // Same concatenation, different (name, value) split.
        let a = tag_prefix("e", "xy");
        let b = tag_prefix("ex", "y");
        assert_ne!(a, b);
    }

    #[test]
    fn scoped_keys_roundtrip() {
        let key = leaf("broot123", "bleafabc");
        assert_eq!(
            scoped_suffix(Column::Leaf, &key).expect("suffix"),
            "bleafabc"
        );

        let key = label("broot123", 42);
        assert_eq!(label_suffix(Column::Label, &key).expect("label"), 42);

        assert!(key.starts_with(&label_prefix("broot123")));
    }

    #[test]
    fn labels_sort_numerically() {
        let two = label("r", 2);
        let ten = label("r", 10);
        assert!(two < ten);
    }
}
