use std::cmp::Ordering;

use crate::util::coding::{decode_fixed_64, put_fixed_64, VarintU32};
use crate::util::comparator::Comparator;

/// The max key sequence number. Only 56 bits are available because the
/// sequence number shares its u64 with the one-byte value type when
/// serialized into an internal key.
pub const MAX_KEY_SEQUENCE: u64 = (1u64 << 56) - 1;

/// The tail length of an internal key:
/// 7 bytes of sequence number + 1 byte of value type.
pub const INTERNAL_KEY_TAIL: usize = 8;

#[derive(Debug, Clone, Copy, Eq, PartialEq, FromPrimitive)]
pub enum ValueType {
    KTypeDeletion = 0x0,
    KTypeValue = 0x1,
}

/// The value type packed into lookup keys. It must be the highest-numbered
/// type so that a lookup key sorts before every entry of the same user key
/// and sequence number.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::KTypeValue;

/// Packs a sequence number and a value type into the single u64 stored at
/// the tail of an internal key.
pub fn pack_sequence_and_type(seq: u64, t: ValueType) -> u64 {
    assert!(
        seq <= MAX_KEY_SEQUENCE,
        "key sequence number should be <= {}, but got {}",
        MAX_KEY_SEQUENCE,
        seq
    );
    seq << 8 | t as u64
}

/// The user-key prefix of an internal key.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    assert!(internal_key.len() >= INTERNAL_KEY_TAIL);
    &internal_key[..internal_key.len() - INTERNAL_KEY_TAIL]
}

/// Orders internal keys by user key ascending (per the user comparator),
/// then by sequence number descending, then by value type descending, so
/// that the newest version of a user key sorts first.
#[derive(Clone)]
pub struct InternalKeyComparator<C: Comparator> {
    pub user_comparator: C,
}

impl<C: Comparator> InternalKeyComparator<C> {
    pub fn new(user_comparator: C) -> Self {
        InternalKeyComparator { user_comparator }
    }
}

impl<C: Comparator> Comparator for InternalKeyComparator<C> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user_comparator
            .compare(extract_user_key(a), extract_user_key(b))
        {
            Ordering::Equal => {
                let a_tag = decode_fixed_64(&a[a.len() - INTERNAL_KEY_TAIL..]);
                let b_tag = decode_fixed_64(&b[b.len() - INTERNAL_KEY_TAIL..]);
                // Bigger tag (newer entry) sorts first.
                b_tag.cmp(&a_tag)
            }
            ord => ord,
        }
    }

    fn name(&self) -> &str {
        "InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut tmp = self
            .user_comparator
            .find_shortest_separator(user_start, user_limit);
        if tmp.len() < user_start.len()
            && self.user_comparator.compare(user_start, &tmp) == Ordering::Less
        {
            // The user key became shorter physically but larger logically.
            // Tack on the earliest possible tail.
            put_fixed_64(
                &mut tmp,
                pack_sequence_and_type(MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(start, &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            return tmp;
        }
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        let user_key = extract_user_key(key);
        let mut tmp = self.user_comparator.find_short_successor(user_key);
        if tmp.len() < user_key.len()
            && self.user_comparator.compare(user_key, &tmp) == Ordering::Less
        {
            put_fixed_64(
                &mut tmp,
                pack_sequence_and_type(MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK),
            );
            return tmp;
        }
        key.to_vec()
    }
}

/// A `LookupKey` represents a point read at a specific sequence number.
///
/// The buffer layout allows one allocation to serve all three key views:
///
/// ```text
///   +---------------------------------+
///   | varint32 of internal key length |
///   +---------------------------------+ --------------- user key start
///   | user key bytes                  |
///   +---------------------------------+   internal key
///   | sequence (7)        |  type (1) |
///   +---------------------------------+ ---------------
/// ```
pub struct LookupKey {
    data: Vec<u8>,
    user_key_start: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: u64) -> Self {
        let mut data = vec![];
        let user_key_start =
            VarintU32::put_varint(&mut data, (user_key.len() + INTERNAL_KEY_TAIL) as u32);
        data.extend_from_slice(user_key);
        put_fixed_64(
            &mut data,
            pack_sequence_and_type(sequence, VALUE_TYPE_FOR_SEEK),
        );
        LookupKey {
            data,
            user_key_start,
        }
    }

    /// A key suitable for seeking a memtable.
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    /// A key suitable for passing to an internal iterator.
    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.user_key_start..]
    }

    /// The user key alone.
    pub fn user_key(&self) -> &[u8] {
        &self.data[self.user_key_start..self.data.len() - INTERNAL_KEY_TAIL]
    }
}
