use std::cell::{Cell, RefCell};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

static BLOCK_SIZE: usize = 4096;

/// A bump allocator backing one skiplist. Allocations are served from the
/// tail of the current block; nothing is freed individually and every
/// pointer ever handed out stays valid until the arena is dropped, which
/// releases all blocks at once.
///
/// Allocation is single-writer: the one thread inserting into the owning
/// skiplist. Only `memory_usage` may be called concurrently with it.
pub struct Arena {
    // Allocation state of the current block.
    alloc_ptr: Cell<*mut u8>,
    alloc_bytes_remaining: Cell<usize>,
    // Backing blocks, u64-aligned so fresh blocks satisfy `allocate_aligned`.
    blocks: RefCell<Vec<Box<[u64]>>>,
    // Total bytes requested from the system, including per-block
    // bookkeeping. Readable concurrently with allocation.
    memory_usage: AtomicUsize,
}

impl Arena {
    pub fn new() -> Arena {
        Arena {
            alloc_ptr: Cell::new(std::ptr::null_mut()),
            alloc_bytes_remaining: Cell::new(0),
            blocks: RefCell::new(vec![]),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Returns a pointer to `bytes` contiguous bytes with no alignment
    /// guarantee. `bytes` must be non-zero.
    pub fn allocate(&self, bytes: usize) -> *mut u8 {
        // The semantics of what to return are a bit messy with 0-byte
        // requests, so they are disallowed.
        assert!(bytes > 0, "[arena] zero-byte allocation");
        if bytes <= self.alloc_bytes_remaining.get() {
            let result = self.alloc_ptr.get();
            self.alloc_ptr.set(unsafe { result.add(bytes) });
            self.alloc_bytes_remaining
                .set(self.alloc_bytes_remaining.get() - bytes);
            return result;
        }
        self.allocate_fallback(bytes)
    }

    /// As `allocate`, but the returned pointer is aligned to
    /// `max(size_of::<usize>(), 8)`. Used for nodes holding atomic links.
    pub fn allocate_aligned(&self, bytes: usize) -> *mut u8 {
        let align = if mem::size_of::<usize>() > 8 {
            mem::size_of::<usize>()
        } else {
            8
        };
        debug_assert_eq!(align & (align - 1), 0);
        let current_mod = self.alloc_ptr.get() as usize & (align - 1);
        let slop = if current_mod == 0 {
            0
        } else {
            align - current_mod
        };
        let needed = bytes + slop;
        let result = if needed <= self.alloc_bytes_remaining.get() {
            let ptr = unsafe { self.alloc_ptr.get().add(slop) };
            self.alloc_ptr.set(unsafe { ptr.add(bytes) });
            self.alloc_bytes_remaining
                .set(self.alloc_bytes_remaining.get() - needed);
            ptr
        } else {
            // Fallback blocks are u64-backed and therefore always aligned.
            self.allocate_fallback(bytes)
        };
        assert_eq!(result as usize & (align - 1), 0);
        result
    }

    /// Total memory the arena has requested from the system. Safe to call
    /// while another thread is allocating.
    #[inline]
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    fn allocate_fallback(&self, bytes: usize) -> *mut u8 {
        if bytes > BLOCK_SIZE / 4 {
            // Large object: give it its own block so no more than a
            // quarter of a standard block is ever wasted. The current
            // block keeps serving small requests.
            return self.allocate_new_block(bytes);
        }

        // The remaining space of the current block is abandoned.
        let ptr = self.allocate_new_block(BLOCK_SIZE);
        self.alloc_ptr.set(unsafe { ptr.add(bytes) });
        self.alloc_bytes_remaining.set(BLOCK_SIZE - bytes);
        ptr
    }

    fn allocate_new_block(&self, block_bytes: usize) -> *mut u8 {
        let words = (block_bytes + 7) / 8;
        let mut block = vec![0u64; words].into_boxed_slice();
        let ptr = block.as_mut_ptr() as *mut u8;
        self.blocks.borrow_mut().push(block);
        self.memory_usage
            .fetch_add(block_bytes + mem::size_of::<usize>(), Ordering::Relaxed);
        ptr
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}
