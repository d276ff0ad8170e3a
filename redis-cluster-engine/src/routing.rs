//! Key to slot routing.

use crate::errors::{ClusterError, ClusterResult, ErrorKind};
use crate::slot_map::SLOT_SIZE;

fn slot(key: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(key) % SLOT_SIZE
}

/// Returns the slot that matches `key`.
///
/// Only the part between the first `{` and the following `}` is hashed when
/// that part is not empty, so keys sharing a hash tag share a slot.
pub fn get_slot(key: &[u8]) -> u16 {
    let key = match get_hashtag(key) {
        Some(tag) => tag,
        None => key,
    };

    slot(key)
}

fn get_hashtag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|v| *v == b'{')?;

    let close = key[open..].iter().position(|v| *v == b'}')?;

    let rv = &key[open + 1..open + close];
    (!rv.is_empty()).then_some(rv)
}

/// Returns true if all `keys` map to the same slot.
pub fn is_same_slot<K: AsRef<[u8]>>(keys: &[K]) -> bool {
    let mut slots = keys.iter().map(|key| get_slot(key.as_ref()));
    match slots.next() {
        Some(first) => slots.all(|slot| slot == first),
        None => true,
    }
}

/// Returns the common slot of `keys`.
///
/// Fails with [`ErrorKind::InvalidUsage`] if the keys hash to different
/// slots, or if there are no keys at all.
pub(crate) fn common_slot<K: AsRef<[u8]>>(keys: &[K]) -> ClusterResult<u16> {
    let Some(first) = keys.first() else {
        return Err(ClusterError::from((
            ErrorKind::InvalidUsage,
            "At least one key is required",
        )));
    };
    if !is_same_slot(keys) {
        return Err(ClusterError::from((
            ErrorKind::InvalidUsage,
            "All keys must map to the same slot in cluster mode",
            keys.iter()
                .map(|key| String::from_utf8_lossy(key.as_ref()).into_owned())
                .collect::<Vec<_>>()
                .join(", "),
        )));
    }
    Ok(get_slot(first.as_ref()))
}
