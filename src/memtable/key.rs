use std::cmp::Ordering;

use crate::db::format::InternalKeyComparator;
use crate::util::coding::VarintU32;
use crate::util::comparator::{BytewiseComparator, Comparator};

/// Ordering over the encoded entries stored in a skiplist, plus the raw
/// user-key ordering needed to recognize which user key an entry belongs
/// to.
pub trait KeyComparator: Clone {
    /// Compares two stored entries.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Compares two user keys.
    fn compare_key(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Orders memtable records, which are internal keys carrying a varint32
/// length prefix (the value trailing the internal key never participates
/// in the ordering).
#[derive(Clone)]
pub struct MemTableKeyComparator<C: Comparator> {
    pub icmp: InternalKeyComparator<C>,
}

impl<C: Comparator> MemTableKeyComparator<C> {
    pub fn new(icmp: InternalKeyComparator<C>) -> Self {
        MemTableKeyComparator { icmp }
    }
}

impl<C: Comparator> KeyComparator for MemTableKeyComparator<C> {
    fn compare(&self, mut a: &[u8], mut b: &[u8]) -> Ordering {
        let ikey_a = VarintU32::get_varint_prefixed_slice(&mut a)
            .expect("corrupted memtable record");
        let ikey_b = VarintU32::get_varint_prefixed_slice(&mut b)
            .expect("corrupted memtable record");
        self.icmp.compare(ikey_a, ikey_b)
    }

    fn compare_key(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.icmp.user_comparator.compare(a, b)
    }
}

/// Plain byte ordering over whole entries; handy for exercising the
/// skiplist directly.
impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn compare_key(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
