use std::cmp::{min, Ordering};
use std::mem::size_of;

use bytes::Bytes;

use crate::error::Error;
use crate::iterator::Iter;
use crate::util::coding::{decode_fixed_32, put_fixed_32, VarintU32};
use crate::util::comparator::Comparator;
use crate::IResult;

const U32_LEN: usize = size_of::<u32>();

/// `BlockBuilder` generates blocks where keys are prefix-compressed:
///
/// When we store a key, we drop the prefix shared with the previous
/// key. This helps reduce the space requirement significantly.
/// Furthermore, once every `block_restart_interval` keys, we do not apply
/// the prefix compression and store the entire key. We call this a
/// "restart point". The tail end of the block stores the offsets of all
/// the restart points, and can be used to do a binary search when looking
/// for a particular key. Values are stored as-is (without compression)
/// immediately following the corresponding key.
///
/// An entry for a particular key-value pair has the form:
///      shared_bytes: varint32
///      unshared_bytes: varint32
///      value_length: varint32
///      key_delta: u8[unshared_bytes]
///      value: u8[value_length]
/// shared_bytes == 0 for restart points.
///
/// The trailer of the block has the form:
///      restarts: u32[num_restarts]
///      num_restarts: u32
/// restarts[i] contains the offset within the block of the ith restart
/// point.
pub struct BlockBuilder<C: Comparator> {
    c: C,
    block_restart_interval: u32,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: u32,
    finished: bool,
    last_key: Vec<u8>,
}

impl<C: Comparator> BlockBuilder<C> {
    pub fn new(block_restart_interval: u32, c: C) -> Self {
        assert!(
            block_restart_interval >= 1,
            "[block builder] restart interval must be >= 1, but got {}",
            block_restart_interval
        );
        BlockBuilder {
            c,
            block_restart_interval,
            buffer: vec![],
            restarts: vec![0], // first restart point is at offset 0
            counter: 0,
            finished: false,
            last_key: vec![],
        }
    }

    /// Resets the contents as if the builder was just constructed.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// Appends an entry. REQUIRES: `finish` has not been called since the
    /// last `reset`, and `key` is larger than any previously added key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        assert!(!self.finished, "[block builder] add after finish");
        assert!(self.counter <= self.block_restart_interval);
        assert!(
            self.buffer.is_empty()
                || self.c.compare(key, &self.last_key) == Ordering::Greater,
            "[block builder] keys must be added in strictly ascending order"
        );

        let mut shared = 0;
        if self.counter < self.block_restart_interval {
            // See how much sharing to do with the previous key.
            let min_length = min(self.last_key.len(), key.len());
            while shared < min_length && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Restart compression.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        // Entry header: <shared><non_shared><value_size>.
        VarintU32::put_varint(&mut self.buffer, shared as u32);
        VarintU32::put_varint(&mut self.buffer, non_shared as u32);
        VarintU32::put_varint(&mut self.buffer, value.len() as u32);

        // Key delta followed by the value.
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Appends the restart-point trailer and returns the block contents.
    /// The returned slice remains valid until `reset` is called.
    pub fn finish(&mut self) -> &[u8] {
        for &restart in &self.restarts {
            put_fixed_32(&mut self.buffer, restart);
        }
        put_fixed_32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    /// An estimate of the current (uncompressed) size of the block being
    /// built.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * U32_LEN + U32_LEN
    }

    /// True iff no entries have been added since the last `reset`.
    pub fn empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// An immutable, decoded view over one encoded block. The buffer is shared
/// (`Bytes`), so a block and its iterators can outlive the reader that
/// produced the buffer without copying it.
pub struct Block {
    data: Bytes,
    // Offset in `data` of the restart array.
    restart_offset: u32,
    num_restarts: u32,
}

impl Block {
    /// Validates the trailer and takes ownership of the contents. An
    /// inconsistent trailer is a corruption error, never a panic.
    pub fn new(data: Bytes) -> IResult<Block> {
        let size = data.len();
        if size < U32_LEN {
            return Err(Error::Corruption("block too small for restart count"));
        }
        let num_restarts = decode_fixed_32(&data[size - U32_LEN..]);
        let max_restarts_allowed = ((size - U32_LEN) / U32_LEN) as u32;
        if num_restarts == 0 || num_restarts > max_restarts_allowed {
            return Err(Error::Corruption("bad restart count in block"));
        }
        let restart_offset = (size - (1 + num_restarts as usize) * U32_LEN) as u32;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Total encoded byte length.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter<C: Comparator>(&self, c: C) -> BlockIterator<C> {
        BlockIterator::new(c, self.data.clone(), self.restart_offset, self.num_restarts)
    }
}

/// Decodes the entry header at `offset`, bounded by `limit`. Returns
/// `(shared, non_shared, value_len, key_delta_offset)`, or `None` if the
/// header or the entry body would run past `limit`.
fn decode_entry(data: &[u8], offset: u32, limit: u32) -> Option<(u32, u32, u32, u32)> {
    let mut src = &data[offset as usize..limit as usize];
    let before = src.len();
    let (shared, n0) = VarintU32::read(src)?;
    src = &src[n0..];
    let (non_shared, n1) = VarintU32::read(src)?;
    src = &src[n1..];
    let (value_len, n2) = VarintU32::read(src)?;
    let header = (n0 + n1 + n2) as u32;
    // usize arithmetic: corrupt varints near u32::MAX must not wrap.
    if non_shared as usize + value_len as usize > before - header as usize {
        return None;
    }
    Some((shared, non_shared, value_len, offset + header))
}

pub struct BlockIterator<C: Comparator> {
    cmp: C,
    data: Bytes,
    // Offset of the restart array; entries end here.
    restarts: u32,
    num_restarts: u32,
    // Offset of the current entry; == `restarts` when not positioned.
    current: u32,
    // Index of the restart interval containing `current`.
    restart_index: u32,
    key: Vec<u8>,
    value_offset: u32,
    value_len: u32,
    err: Option<Error>,
}

impl<C: Comparator> BlockIterator<C> {
    fn new(cmp: C, data: Bytes, restarts: u32, num_restarts: u32) -> Self {
        BlockIterator {
            cmp,
            data,
            restarts,
            num_restarts,
            current: restarts,
            restart_index: num_restarts,
            key: vec![],
            value_offset: 0,
            value_len: 0,
            err: None,
        }
    }

    #[inline]
    fn next_entry_offset(&self) -> u32 {
        self.value_offset + self.value_len
    }

    fn get_restart_point(&self, index: u32) -> u32 {
        debug_assert!(index < self.num_restarts);
        decode_fixed_32(&self.data[self.restarts as usize + U32_LEN * index as usize..])
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        // `parse_next_key` starts at `next_entry_offset`; point it at the
        // restart point with an empty current value.
        self.value_offset = self.get_restart_point(index);
        self.value_len = 0;
    }

    fn corruption_error(&mut self, reason: &'static str) {
        self.current = self.restarts;
        self.restart_index = self.num_restarts;
        self.key.clear();
        self.value_offset = 0;
        self.value_len = 0;
        self.err = Some(Error::Corruption(reason));
    }

    /// Decodes the entry starting at `next_entry_offset`, reconstructing
    /// the full key from the shared prefix. Returns false at the end of
    /// the entry region or on corruption.
    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.restarts {
            // No more entries; mark invalid.
            self.current = self.restarts;
            self.restart_index = self.num_restarts;
            return false;
        }
        match decode_entry(&self.data, self.current, self.restarts) {
            Some((shared, non_shared, value_len, key_offset)) => {
                if self.key.len() < shared as usize {
                    self.corruption_error("bad entry in block");
                    return false;
                }
                self.key.truncate(shared as usize);
                self.key.extend_from_slice(
                    &self.data[key_offset as usize..(key_offset + non_shared) as usize],
                );
                self.value_offset = key_offset + non_shared;
                self.value_len = value_len;
                while self.restart_index + 1 < self.num_restarts
                    && self.get_restart_point(self.restart_index + 1) < self.current
                {
                    self.restart_index += 1;
                }
                true
            }
            None => {
                self.corruption_error("bad entry in block");
                false
            }
        }
    }
}

impl<C: Comparator> Iter for BlockIterator<C> {
    fn valid(&self) -> bool {
        self.err.is_none() && self.current < self.restarts
    }

    fn seek_to_first(&mut self) {
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        self.seek_to_restart_point(self.num_restarts - 1);
        // Scan to the last entry of the last restart interval.
        while self.parse_next_key() && self.next_entry_offset() < self.restarts {}
    }

    /// Positions at the first entry with key >= `target`: binary search
    /// over the restart points (full keys), then a linear scan within the
    /// chosen restart interval.
    fn seek(&mut self, target: &[u8]) {
        let mut left = 0u32;
        let mut right = self.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.get_restart_point(mid);
            match decode_entry(&self.data, region_offset, self.restarts) {
                Some((shared, non_shared, _, key_offset)) if shared == 0 => {
                    let mid_key =
                        &self.data[key_offset as usize..(key_offset + non_shared) as usize];
                    if self.cmp.compare(mid_key, target) == Ordering::Less {
                        // Everything at or before `mid` is < target.
                        left = mid;
                    } else {
                        right = mid - 1;
                    }
                }
                // A restart point must hold a full key.
                _ => {
                    self.corruption_error("bad entry in block");
                    return;
                }
            }
        }

        // Linear scan within the restart interval.
        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.seek(target);
        if self.err.is_some() {
            return;
        }
        if !self.valid() {
            self.seek_to_last();
        } else if self.cmp.compare(&self.key, target) == Ordering::Greater {
            self.prev();
        }
    }

    fn next(&mut self) {
        assert!(self.valid());
        self.parse_next_key();
    }

    /// Backward decode from an arbitrary position is impossible under
    /// prefix compression; re-seek to the restart point at or before the
    /// current entry and re-scan forward.
    fn prev(&mut self) {
        assert!(self.valid());
        let original = self.current;
        while self.get_restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // No more entries.
                self.current = self.restarts;
                self.restart_index = self.num_restarts;
                return;
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> &[u8] {
        assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        assert!(self.valid());
        &self.data[self.value_offset as usize..(self.value_offset + self.value_len) as usize]
    }

    fn status(&mut self) -> IResult<()> {
        match self.err.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::comparator::BytewiseComparator;

    fn build_block(entries: &[(&[u8], &[u8])], restart_interval: u32) -> Block {
        let mut builder = BlockBuilder::new(restart_interval, BytewiseComparator::default());
        for (k, v) in entries {
            builder.add(k, v);
        }
        let data = Bytes::copy_from_slice(builder.finish());
        Block::new(data).unwrap()
    }

    fn sample_entries() -> Vec<(&'static [u8], &'static [u8])> {
        vec![
            (b"apple", b"1"),
            (b"applesauce", b"2"),
            (b"apply", b"3"),
            (b"banana", b"4"),
            (b"bandana", b"5"),
            (b"cherry", b"6"),
            (b"citrus", b"7"),
        ]
    }

    #[test]
    fn test_builder_empty_block() {
        let mut builder = BlockBuilder::new(16, BytewiseComparator::default());
        assert!(builder.empty());
        let data = Bytes::copy_from_slice(builder.finish());
        // One restart point plus the count.
        assert_eq!(data.len(), 2 * U32_LEN);
        let block = Block::new(data).unwrap();
        let mut iter = block.iter(BytewiseComparator::default());
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
    }

    #[test]
    fn test_prefix_compression_layout() {
        let mut builder = BlockBuilder::new(16, BytewiseComparator::default());
        builder.add(b"abcd", b"v1");
        builder.add(b"abce", b"v2");
        let data = builder.finish();
        // Second entry shares "abc": header 3|1|2, delta "e", value "v2".
        let second = &data[3 + 4 + 2..];
        assert_eq!(&second[..3], &[3, 1, 2]);
        assert_eq!(&second[3..4], b"e");
        assert_eq!(&second[4..6], b"v2");
    }

    #[test]
    fn test_round_trip() {
        for restart_interval in [1u32, 2, 3, 16] {
            let entries = sample_entries();
            let block = build_block(&entries, restart_interval);
            let mut iter = block.iter(BytewiseComparator::default());
            iter.seek_to_first();
            for (k, v) in &entries {
                assert!(iter.valid(), "interval {}", restart_interval);
                assert_eq!(iter.key(), *k);
                assert_eq!(iter.value(), *v);
                iter.next();
            }
            assert!(!iter.valid());
            iter.status().unwrap();
        }
    }

    #[test]
    fn test_seek() {
        let entries = sample_entries();
        let block = build_block(&entries, 2);
        let mut iter = block.iter(BytewiseComparator::default());

        // Exact keys, including ones in the middle of a restart interval.
        for (k, v) in &entries {
            iter.seek(k);
            assert!(iter.valid());
            assert_eq!(iter.key(), *k);
            assert_eq!(iter.value(), *v);
        }
        // A key between entries lands on the next greater entry.
        iter.seek(b"applet");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"apply");
        iter.seek(b"bb");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"cherry");
        // Before the first entry.
        iter.seek(b"a");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"apple");
        // Past the last entry: invalid, but not an error.
        iter.seek(b"zzz");
        assert!(!iter.valid());
        iter.status().unwrap();
    }

    #[test]
    fn test_prev_and_seek_to_last() {
        let entries = sample_entries();
        let block = build_block(&entries, 3);
        let mut iter = block.iter(BytewiseComparator::default());

        iter.seek_to_last();
        for (k, v) in entries.iter().rev() {
            assert!(iter.valid());
            assert_eq!(iter.key(), *k);
            assert_eq!(iter.value(), *v);
            iter.prev();
        }
        assert!(!iter.valid());

        let mut iter = block.iter(BytewiseComparator::default());
        iter.seek_for_prev(b"bb");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"bandana");
        iter.seek_for_prev(b"zzz");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"citrus");
    }

    #[test]
    fn test_bad_restart_count() {
        // Shorter than the restart count itself.
        assert!(matches!(
            Block::new(Bytes::from_static(&[0, 0])),
            Err(Error::Corruption(_))
        ));
        // Restart count larger than the buffer can hold.
        let mut data = vec![];
        put_fixed_32(&mut data, 0);
        put_fixed_32(&mut data, 1000);
        assert!(matches!(
            Block::new(Bytes::from(data)),
            Err(Error::Corruption(_))
        ));
        // Zero restart points.
        let mut data = vec![];
        put_fixed_32(&mut data, 0);
        assert!(matches!(
            Block::new(Bytes::from(data)),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_overflowing_value_length_is_corruption() {
        // Hand-built entry whose value-length varint is u32::MAX; the
        // entry-fits-in-block check must not wrap around.
        let mut data = vec![0x00, 0x01, 0xff, 0xff, 0xff, 0xff, 0x0f, b'k'];
        put_fixed_32(&mut data, 0); // one restart point at offset 0
        put_fixed_32(&mut data, 1);
        let block = Block::new(Bytes::from(data)).unwrap();
        let mut iter = block.iter(BytewiseComparator::default());
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(matches!(iter.status(), Err(Error::Corruption(_))));

        let mut iter = block.iter(BytewiseComparator::default());
        iter.seek(b"k");
        assert!(!iter.valid());
        assert!(matches!(iter.status(), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_corrupt_entry_surfaces_status() {
        let mut builder = BlockBuilder::new(16, BytewiseComparator::default());
        builder.add(b"key", b"value");
        let mut data = builder.finish().to_vec();
        // Inflate the value length varint so the entry runs past the
        // restart array.
        data[2] = 250;
        let block = Block::new(Bytes::from(data)).unwrap();
        let mut iter = block.iter(BytewiseComparator::default());
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(matches!(iter.status(), Err(Error::Corruption(_))));
    }
}
