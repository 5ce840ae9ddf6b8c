use std::cmp::Ordering;

/// A total order over byte strings used as keys. Implementations must be
/// thread-safe: the engine invokes comparators concurrently from readers
/// and the writer.
pub trait Comparator: Clone + Sync + Send {
    /// Three-way comparison of `a` and `b`.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// The comparator name, persisted alongside data files to detect a
    /// database being reopened with a different ordering.
    fn name(&self) -> &str;

    /// Returns a key `k` with `start <= k < limit` that is no longer than
    /// `start`. Returning `start` unchanged is always correct; shorter
    /// separators shrink index entries.
    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8>;

    /// Returns a short key >= `key`.
    fn find_short_successor(&self, key: &[u8]) -> Vec<u8>;
}

/// Lexicographic byte-wise ordering.
#[derive(Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let min_length = std::cmp::min(start.len(), limit.len());
        let mut diff_index = 0;
        while diff_index < min_length && start[diff_index] == limit[diff_index] {
            diff_index += 1;
        }
        if diff_index < min_length {
            // One string is not a prefix of the other; try to bump the
            // first differing byte.
            let diff_byte = start[diff_index];
            if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
                let mut res = start[..=diff_index].to_vec();
                *res.last_mut().unwrap() += 1;
                return res;
            }
        }
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        for (i, &byte) in key.iter().enumerate() {
            if byte != 0xff {
                let mut res = key[..=i].to_vec();
                *res.last_mut().unwrap() += 1;
                return res;
            }
        }
        // Run of 0xff bytes; leave the key as-is.
        key.to_vec()
    }
}
