use num_traits::FromPrimitive;

use crate::db::format::{
    pack_sequence_and_type, LookupKey, ValueType, INTERNAL_KEY_TAIL,
};
use crate::error::Error;
use crate::iterator::Iter;
use crate::memtable::key::{KeyComparator, MemTableKeyComparator};
use crate::memtable::skiplist::{Skiplist, SkiplistIterator};
use crate::util::coding::{decode_fixed_64, put_fixed_64, VarintU32};
use crate::util::comparator::Comparator;
use crate::IResult;

pub mod arena;
pub mod key;
pub mod skiplist;

use crate::db::format::InternalKeyComparator;

/// The engine's mutable in-memory staging area: recent writes ordered by
/// internal key, backed by a skiplist whose memory comes from an arena.
///
/// `MemTable` is a shared-ownership handle: clone it to keep the table
/// alive (an iterator does this internally), drop every clone to destroy
/// the table and release its arena in one step. One thread may `add` at a
/// time; `get` and iteration are lock-free and may run concurrently with
/// the writer.
#[derive(Clone)]
pub struct MemTable<C: Comparator> {
    table: Skiplist<MemTableKeyComparator<C>>,
}

impl<C: Comparator> MemTable<C> {
    pub fn new(icmp: InternalKeyComparator<C>) -> Self {
        MemTable {
            table: Skiplist::new(MemTableKeyComparator::new(icmp)),
        }
    }

    /// Adds an entry that maps `key` to `value` at `sequence` with the
    /// given type. `value` is typically empty for `KTypeDeletion`.
    ///
    /// ```text
    /// Format of an entry is the concatenation of:
    ///
    /// key_size     : varint32 of internal_key.len()
    /// key bytes    : internal key = user key + fixed64(sequence << 8 | type)
    /// value_size   : varint32 of value.len()
    /// value bytes  : value
    /// ```
    ///
    /// Entries for the same user key coexist; lookups resolve to the one
    /// with the highest sequence number at or below their snapshot.
    pub fn add(&self, sequence: u64, value_type: ValueType, key: &[u8], value: &[u8]) {
        let internal_key_size = key.len() + INTERNAL_KEY_TAIL;
        let mut buf = Vec::with_capacity(5 + internal_key_size + 5 + value.len());
        VarintU32::put_varint(&mut buf, internal_key_size as u32);
        buf.extend_from_slice(key);
        put_fixed_64(&mut buf, pack_sequence_and_type(sequence, value_type));
        VarintU32::put_varint_prefixed_slice(&mut buf, value);
        self.table.put(&buf);
    }

    /// Point lookup. Returns `Some(Ok(value))` for a live entry,
    /// `Some(Err(Error::NotFound))` for a tombstone (so callers know to
    /// stop searching older sources), and `None` when this memtable holds
    /// nothing for the user key at the lookup's sequence bound.
    pub fn get(&self, key: &LookupKey) -> Option<IResult<Vec<u8>>> {
        let mut iter = self.table.iter();
        iter.seek(key.memtable_key());
        if iter.valid() {
            let mut entry = iter.key();
            let ikey = VarintU32::get_varint_prefixed_slice(&mut entry)
                .expect("corrupted memtable record");
            let key_size = ikey.len();
            if self.table.c.compare_key(
                &ikey[..key_size - INTERNAL_KEY_TAIL],
                key.user_key(),
            ) == std::cmp::Ordering::Equal
            {
                let tag = decode_fixed_64(&ikey[key_size - INTERNAL_KEY_TAIL..]);
                match ValueType::from_u64(tag & 0xff) {
                    Some(ValueType::KTypeValue) => {
                        let value = VarintU32::get_varint_prefixed_slice(&mut entry)
                            .expect("corrupted memtable record");
                        return Some(Ok(value.to_vec()));
                    }
                    Some(ValueType::KTypeDeletion) => return Some(Err(Error::NotFound)),
                    None => {}
                }
            }
        }
        None
    }

    /// An iterator yielding internal keys in ascending order. The iterator
    /// holds a clone of this handle, so the table outlives it.
    pub fn iter(&self) -> MemTableIterator<C> {
        MemTableIterator {
            inner: self.table.iter(),
            tmp: vec![],
        }
    }

    /// An estimate of the bytes in use by this table. Safe to call while
    /// the table is being modified.
    pub fn approximate_memory_usage(&self) -> usize {
        self.table.memory_usage()
    }
}

/// Iterates a memtable's skiplist, exposing decoded internal keys and
/// values instead of raw length-prefixed records.
pub struct MemTableIterator<C: Comparator> {
    inner: SkiplistIterator<MemTableKeyComparator<C>>,
    // Scratch buffer for re-encoding seek targets as memtable keys.
    tmp: Vec<u8>,
}

impl<C: Comparator> MemTableIterator<C> {
    fn encode_target(&mut self, target: &[u8]) {
        self.tmp.clear();
        VarintU32::put_varint_prefixed_slice(&mut self.tmp, target);
    }
}

impl<C: Comparator> Iter for MemTableIterator<C> {
    fn valid(&self) -> bool {
        self.inner.valid()
    }

    fn seek_to_first(&mut self) {
        self.inner.seek_to_first();
    }

    fn seek_to_last(&mut self) {
        self.inner.seek_to_last();
    }

    /// `target` is an internal key.
    fn seek(&mut self, target: &[u8]) {
        self.encode_target(target);
        let tmp = std::mem::take(&mut self.tmp);
        self.inner.seek(&tmp);
        self.tmp = tmp;
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.encode_target(target);
        let tmp = std::mem::take(&mut self.tmp);
        self.inner.seek_for_prev(&tmp);
        self.tmp = tmp;
    }

    fn next(&mut self) {
        self.inner.next();
    }

    fn prev(&mut self) {
        self.inner.prev();
    }

    /// The internal key of the current entry.
    fn key(&self) -> &[u8] {
        let mut entry = self.inner.key();
        VarintU32::get_varint_prefixed_slice(&mut entry).expect("corrupted memtable record")
    }

    /// The user value of the current entry.
    fn value(&self) -> &[u8] {
        let mut entry = self.inner.key();
        VarintU32::get_varint_prefixed_slice(&mut entry).expect("corrupted memtable record");
        VarintU32::get_varint_prefixed_slice(&mut entry).expect("corrupted memtable record")
    }

    fn status(&mut self) -> IResult<()> {
        Ok(())
    }
}
