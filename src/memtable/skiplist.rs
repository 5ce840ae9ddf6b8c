use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::iterator::Iter;
use crate::memtable::arena::Arena;
use crate::memtable::key::KeyComparator;
use crate::IResult;

const MAX_HEIGHT: usize = 12;
const HEIGHT_INCREASE: u32 = u32::MAX / 4;

/// A skiplist node. Both the node itself and its key bytes live in the
/// arena; the tower is over-declared at `MAX_HEIGHT` and allocated
/// truncated to the node's actual height.
#[repr(C)]
struct Node {
    key: *const u8,
    key_len: u32,
    height: usize,
    next_nodes: [AtomicPtr<Node>; MAX_HEIGHT],
}

impl Node {
    fn alloc(arena: &Arena, key: &[u8], height: usize) -> *mut Node {
        let not_used =
            (MAX_HEIGHT - height - 1) * std::mem::size_of::<AtomicPtr<Node>>();
        let node =
            arena.allocate_aligned(std::mem::size_of::<Node>() - not_used) as *mut Node;
        let key_ptr = if key.is_empty() {
            ptr::null()
        } else {
            let p = arena.allocate(key.len());
            unsafe {
                ptr::copy_nonoverlapping(key.as_ptr(), p, key.len());
            }
            p as *const u8
        };
        unsafe {
            ptr::addr_of_mut!((*node).key).write(key_ptr);
            ptr::addr_of_mut!((*node).key_len).write(key.len() as u32);
            ptr::addr_of_mut!((*node).height).write(height);
            // Null links for every level this node participates in.
            ptr::write_bytes(
                ptr::addr_of_mut!((*node).next_nodes) as *mut AtomicPtr<Node>,
                0,
                height + 1,
            );
        }
        node
    }

    /// Successor at `level`, with the acquire load that pairs with the
    /// writer's release store so a reader never sees a half-built node.
    #[inline]
    fn next(&self, level: usize) -> *mut Node {
        self.next_nodes[level].load(Ordering::Acquire)
    }

    #[inline]
    unsafe fn key(&self) -> &[u8] {
        if self.key.is_null() {
            &[]
        } else {
            std::slice::from_raw_parts(self.key, self.key_len as usize)
        }
    }
}

struct SkiplistCore {
    height: AtomicUsize,
    head: NonNull<Node>,
    arena: Arena,
}

/// An insert-only sorted list of byte-string entries. Cloning is cheap and
/// shares the underlying list; the list (and its arena) is destroyed when
/// the last clone drops.
///
/// Concurrency contract: at most one thread calls `put` at a time (the
/// engine's write path is serialized upstream), while any number of
/// threads may read through `get` or iterators with no locking.
#[derive(Clone)]
pub struct Skiplist<C> {
    core: Arc<SkiplistCore>,
    pub c: C,
}

impl<C> Skiplist<C> {
    pub fn new(c: C) -> Skiplist<C> {
        let arena = Arena::new();
        let head = NonNull::new(Node::alloc(&arena, &[], MAX_HEIGHT - 1)).unwrap();
        Skiplist {
            core: Arc::new(SkiplistCore {
                height: AtomicUsize::new(0),
                head,
                arena,
            }),
            c,
        }
    }

    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        for h in 0..(MAX_HEIGHT - 1) {
            if !rng.gen_ratio(HEIGHT_INCREASE, u32::MAX) {
                return h;
            }
        }
        MAX_HEIGHT - 1
    }

    #[inline]
    fn height(&self) -> usize {
        // A stale height only costs the reader a few extra comparisons
        // against the head's null links.
        self.core.height.load(Ordering::Relaxed)
    }

    /// Bytes requested from the system by this list's arena. Safe to call
    /// while the writer is inserting.
    #[inline]
    pub fn memory_usage(&self) -> usize {
        self.core.arena.memory_usage()
    }
}

impl<C: KeyComparator> Skiplist<C> {
    /// Inserts `key` (a full encoded entry). Returns false if an equal
    /// entry is already present; the list is insert-only, so nothing is
    /// updated in that case.
    ///
    /// REQUIRES: no concurrent `put` (single writer).
    pub fn put(&self, key: &[u8]) -> bool {
        let list_height = self.height();
        let mut prev = [ptr::null_mut(); MAX_HEIGHT + 1];
        let mut next = [ptr::null_mut(); MAX_HEIGHT + 1];
        prev[list_height + 1] = self.core.head.as_ptr();
        for i in (0..=list_height).rev() {
            let (p, n) = unsafe { self.find_splice_for_level(key, prev[i + 1], i) };
            prev[i] = p;
            next[i] = n;
            if p == n {
                return false;
            }
        }

        let height = self.random_height();
        let node = Node::alloc(&self.core.arena, key, height);
        if height > list_height {
            for i in (list_height + 1)..=height {
                prev[i] = self.core.head.as_ptr();
                next[i] = ptr::null_mut();
            }
            // Readers tolerate observing the old height.
            self.core.height.store(height, Ordering::Relaxed);
        }

        let x = unsafe { &*node };
        // Link bottom-up so that as soon as the node is visible at any
        // level it is reachable through the base level. The node's own
        // forward pointer is filled before the release store publishes it.
        for i in 0..=height {
            x.next_nodes[i].store(next[i], Ordering::Relaxed);
            unsafe { &*prev[i] }.next_nodes[i].store(node, Ordering::Release);
        }
        true
    }

    /// Returns the stored entry equal to `key`, if present.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let node = unsafe { self.find_near(key, false, true) };
        if node.is_null() {
            return None;
        }
        let node_key = unsafe { (*node).key() };
        if self.c.compare(node_key, key) == std::cmp::Ordering::Equal {
            Some(node_key)
        } else {
            None
        }
    }

    pub fn iter(&self) -> SkiplistIterator<C> {
        SkiplistIterator::new(self.clone())
    }

    /// Returns true if the list holds no entries.
    pub fn is_empty(&self) -> bool {
        unsafe { (*self.core.head.as_ptr()).next(0).is_null() }
    }

    /// Number of entries, by walking the base level.
    pub fn len(&self) -> usize {
        let mut node = unsafe { (*self.core.head.as_ptr()).next(0) };
        let mut count = 0;
        while !node.is_null() {
            count += 1;
            node = unsafe { (*node).next(0) };
        }
        count
    }

    /// Finds the node nearest to `key`.
    /// If `less` is true: the rightmost node with node.key < key
    /// (or <= key when `allow_equal`).
    /// If `less` is false: the leftmost node with node.key > key
    /// (or >= key when `allow_equal`).
    unsafe fn find_near(&self, key: &[u8], less: bool, allow_equal: bool) -> *const Node {
        let head = self.core.head.as_ptr() as *const Node;
        let mut cursor = head;
        let mut level = self.height();
        loop {
            // Invariant: cursor.key < key.
            let next = (*cursor).next(level);
            if next.is_null() {
                // cursor.key < key <= end of this level.
                if level > 0 {
                    level -= 1;
                    continue;
                }
                if !less || cursor == head {
                    return ptr::null();
                }
                return cursor;
            }
            match self.c.compare(key, (*next).key()) {
                std::cmp::Ordering::Greater => {
                    // cursor.key < next.key < key: keep moving right.
                    cursor = next;
                }
                std::cmp::Ordering::Equal => {
                    if allow_equal {
                        return next;
                    }
                    if !less {
                        // The first node after the run of equal keys.
                        return (*next).next(0);
                    }
                    if level > 0 {
                        level -= 1;
                        continue;
                    }
                    if cursor == head {
                        return ptr::null();
                    }
                    return cursor;
                }
                std::cmp::Ordering::Less => {
                    // cursor.key < key < next.key.
                    if level > 0 {
                        level -= 1;
                        continue;
                    }
                    if !less {
                        return next;
                    }
                    if cursor == head {
                        return ptr::null();
                    }
                    return cursor;
                }
            }
        }
    }

    /// Walks level `level` from `before`, returning the pair of nodes the
    /// key splices between: `(prev, next)` with prev.key < key <= next.key.
    /// Returns `(node, node)` when an equal key is found.
    unsafe fn find_splice_for_level(
        &self,
        key: &[u8],
        mut before: *mut Node,
        level: usize,
    ) -> (*mut Node, *mut Node) {
        loop {
            let next = (*before).next(level);
            if next.is_null() {
                return (before, ptr::null_mut());
            }
            match self.c.compare(key, (*next).key()) {
                std::cmp::Ordering::Equal => return (next, next),
                std::cmp::Ordering::Less => return (before, next),
                std::cmp::Ordering::Greater => before = next,
            }
        }
    }

    fn find_last(&self) -> *const Node {
        let head = self.core.head.as_ptr() as *const Node;
        let mut node = head;
        let mut level = self.height();
        loop {
            let next = unsafe { (*node).next(level) };
            if !next.is_null() {
                node = next;
                continue;
            }
            if level == 0 {
                if node == head {
                    return ptr::null();
                }
                return node;
            }
            level -= 1;
        }
    }
}

// Nodes hold raw pointers into the arena, which lives exactly as long as
// the core. Mutation is confined to the single writer.
unsafe impl<C: Send> Send for Skiplist<C> {}
unsafe impl<C: Sync> Sync for Skiplist<C> {}

pub struct SkiplistIterator<C: KeyComparator> {
    list: Skiplist<C>,
    cursor: *const Node,
}

impl<C: KeyComparator> SkiplistIterator<C> {
    pub fn new(list: Skiplist<C>) -> Self {
        Self {
            list,
            cursor: ptr::null(),
        }
    }
}

impl<C: KeyComparator> Iter for SkiplistIterator<C> {
    fn valid(&self) -> bool {
        !self.cursor.is_null()
    }

    fn seek_to_first(&mut self) {
        self.cursor = unsafe { (*self.list.core.head.as_ptr()).next(0) };
    }

    fn seek_to_last(&mut self) {
        self.cursor = self.list.find_last();
    }

    fn seek(&mut self, target: &[u8]) {
        self.cursor = unsafe { self.list.find_near(target, false, true) };
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.cursor = unsafe { self.list.find_near(target, true, true) };
    }

    fn next(&mut self) {
        assert!(self.valid());
        self.cursor = unsafe { (*self.cursor).next(0) };
    }

    fn prev(&mut self) {
        // Prefix-free backward links are not stored; search instead.
        assert!(self.valid());
        self.cursor = unsafe { self.list.find_near(self.key(), true, false) };
    }

    fn key(&self) -> &[u8] {
        assert!(self.valid());
        unsafe { (*self.cursor).key() }
    }

    fn value(&self) -> &[u8] {
        // Entries are key-only; any value is embedded in the entry bytes.
        &[]
    }

    fn status(&mut self) -> IResult<()> {
        Ok(())
    }
}

unsafe impl<C: KeyComparator + Send> Send for SkiplistIterator<C> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::comparator::BytewiseComparator;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn key_with_suffix(key: &str, n: u64) -> Vec<u8> {
        format!("{}{:08}", key, n).into_bytes()
    }

    #[test]
    fn test_find_near() {
        let list = Skiplist::new(BytewiseComparator::default());
        for i in 0..1000 {
            list.put(format!("{:05}{:08}", i * 10 + 5, 0).as_bytes());
        }
        let mut cases = vec![
            ("00001", false, false, Some("00005")),
            ("00001", false, true, Some("00005")),
            ("00001", true, false, None),
            ("00001", true, true, None),
            ("00005", false, false, Some("00015")),
            ("00005", false, true, Some("00005")),
            ("00005", true, false, None),
            ("00005", true, true, Some("00005")),
            ("05555", false, false, Some("05565")),
            ("05555", false, true, Some("05555")),
            ("05555", true, false, Some("05545")),
            ("05555", true, true, Some("05555")),
            ("05558", false, false, Some("05565")),
            ("05558", false, true, Some("05565")),
            ("05558", true, false, Some("05555")),
            ("05558", true, true, Some("05555")),
            ("09995", false, false, None),
            ("09995", false, true, Some("09995")),
            ("09995", true, false, Some("09985")),
            ("09995", true, true, Some("09995")),
            ("59995", false, false, None),
            ("59995", false, true, None),
            ("59995", true, false, Some("09995")),
            ("59995", true, true, Some("09995")),
        ];
        for (i, (key, less, allow_equal, exp)) in cases.drain(..).enumerate() {
            let seek_key = key_with_suffix(key, 0);
            let res = unsafe { list.find_near(&seek_key, less, allow_equal) };
            if exp.is_none() {
                assert!(res.is_null(), "case {}", i);
                continue;
            }
            let e = key_with_suffix(exp.unwrap(), 0);
            assert_eq!(unsafe { (*res).key() }, e.as_slice(), "case {}", i);
        }
    }

    #[test]
    fn test_empty() {
        let list = Skiplist::new(BytewiseComparator::default());
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        let key = b"aaa";
        for &less in &[false, true] {
            for &allow_equal in &[false, true] {
                assert!(unsafe { list.find_near(key, less, allow_equal) }.is_null());
            }
        }

        let mut iter = list.iter();
        assert!(!iter.valid());
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        iter.seek(key);
        assert!(!iter.valid());
    }

    #[test]
    fn test_basic() {
        let list = Skiplist::new(BytewiseComparator::default());
        let table = vec!["key1", "key2", "key3", "key5", "key4"];
        for key in &table {
            list.put(&key_with_suffix(key, 0));
        }

        assert_eq!(list.get(&key_with_suffix("key", 0)), None);
        assert_eq!(list.len(), 5);
        assert!(!list.is_empty());
        for key in &table {
            let k = key_with_suffix(key, 0);
            assert_eq!(list.get(&k), Some(k.as_slice()), "{}", key);
        }
    }

    #[test]
    fn test_duplicate_put_is_noop() {
        let list = Skiplist::new(BytewiseComparator::default());
        assert!(list.put(b"dup"));
        assert!(!list.put(b"dup"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_single_writer_concurrent_readers() {
        let n = 1000usize;
        let list = Skiplist::new(BytewiseComparator::default());
        let (tx, rx) = mpsc::channel();

        let writer_list = list.clone();
        let writer_tx = tx.clone();
        let writer = thread::spawn(move || {
            for i in 0..n {
                writer_list.put(&key_with_suffix("k", i as u64));
                writer_tx.send(i).unwrap();
            }
        });

        let mut readers = vec![];
        for _ in 0..4 {
            let list = list.clone();
            let rx_key = key_with_suffix("k", 0);
            readers.push(thread::spawn(move || {
                // Every entry visible to this reader must be well-formed.
                for _ in 0..200 {
                    let mut iter = list.iter();
                    iter.seek(&rx_key);
                    let mut count = 0;
                    let mut last: Option<Vec<u8>> = None;
                    while iter.valid() {
                        let key = iter.key().to_vec();
                        if let Some(prev) = &last {
                            assert!(prev < &key);
                        }
                        last = Some(key);
                        count += 1;
                        iter.next();
                    }
                    assert!(count <= n);
                }
            }));
        }

        for _ in 0..n {
            rx.recv_timeout(Duration::from_secs(3)).unwrap();
        }
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(list.len(), n);
        for i in 0..n {
            let k = key_with_suffix("k", i as u64);
            assert_eq!(list.get(&k), Some(k.as_slice()));
        }
    }

    #[test]
    fn test_iterator_next() {
        let n = 100u64;
        let list = Skiplist::new(BytewiseComparator::default());
        let mut iter = list.iter();
        assert!(!iter.valid());
        iter.seek_to_first();
        assert!(!iter.valid());
        for i in (0..n).rev() {
            list.put(&key_with_suffix("", i));
        }
        iter.seek_to_first();
        for i in 0..n {
            assert!(iter.valid());
            assert_eq!(iter.key(), key_with_suffix("", i).as_slice());
            iter.next();
        }
        assert!(!iter.valid());
    }

    #[test]
    fn test_iterator_prev() {
        let n = 100u64;
        let list = Skiplist::new(BytewiseComparator::default());
        let mut iter = list.iter();
        iter.seek_to_last();
        assert!(!iter.valid());
        for i in (0..n).rev() {
            list.put(&key_with_suffix("", i));
        }
        iter.seek_to_last();
        for i in (0..n).rev() {
            assert!(iter.valid());
            assert_eq!(iter.key(), key_with_suffix("", i).as_slice());
            iter.prev();
        }
        assert!(!iter.valid());
    }

    #[test]
    fn test_iterator_seek() {
        let list = Skiplist::new(BytewiseComparator::default());
        let mut iter = list.iter();
        for i in (0..100u64).rev() {
            list.put(&key_with_suffix("", i * 10 + 1000));
        }
        iter.seek_to_first();
        assert!(iter.valid());
        assert_eq!(iter.key(), key_with_suffix("", 1000).as_slice());

        let cases: Vec<(u64, Option<u64>, Option<u64>)> = vec![
            (0, Some(1000), None),
            (1000, Some(1000), Some(1000)),
            (1005, Some(1010), Some(1000)),
            (1010, Some(1010), Some(1010)),
            (99999, None, Some(1990)),
        ];
        for (key, seek_expect, for_prev_expect) in cases {
            let key = key_with_suffix("", key);
            iter.seek(&key);
            assert_eq!(iter.valid(), seek_expect.is_some());
            if let Some(v) = seek_expect {
                assert_eq!(iter.key(), key_with_suffix("", v).as_slice());
            }
            iter.seek_for_prev(&key);
            assert_eq!(iter.valid(), for_prev_expect.is_some());
            if let Some(v) = for_prev_expect {
                assert_eq!(iter.key(), key_with_suffix("", v).as_slice());
            }
        }
    }
}
