//! Page-backed size-class block allocator.
//!
//! Memory is reserved from the OS in fixed 256 KiB regions ("arenas"),
//! subdivided into 4 KiB pages ("pools"). Each pool serves blocks of a
//! single size class; size classes span 8..1024 bytes in 8-byte quanta.
//! Requests above 1024 bytes fall through to the platform allocator.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Mutex;

/// Size of one arena, reserved from the OS in a single allocation.
pub const ARENA_SIZE: usize = 256 * 1024;
/// Size of one pool, the unit of size-class allocation within an arena.
pub const POOL_SIZE: usize = 4 * 1024;
/// Smallest block size class served by a pool.
pub const MIN_BLOCK: usize = 8;
/// Largest block size class served by a pool; larger requests bypass the arena.
pub const MAX_BLOCK: usize = 1024;
/// Quantum separating adjacent size classes.
pub const QUANTUM: usize = 8;

/// Round `size` up to the nearest size-class quantum, or `None` if it
/// exceeds [`MAX_BLOCK`] and must go to the platform allocator instead.
pub fn size_class(size: usize) -> Option<usize> {
    if size == 0 {
        return Some(MIN_BLOCK);
    }
    if size > MAX_BLOCK {
        return None;
    }
    Some(size.div_ceil(QUANTUM) * QUANTUM)
}

/// Header occupying the tail of an arena's first pool.
struct ArenaHeader {
    base: *mut u8,
    span: usize,
}

/// Header at the start of every pool page.
struct PoolHeader {
    arena: *mut ArenaHeader,
    block_size: usize,
    total_blocks: usize,
    free_count: usize,
    free_head: *mut u8,
}

/// One size-class block pool: a 4 KiB page carved into fixed-size blocks,
/// freed blocks intrusively chained through their own first machine word.
struct Pool {
    page: NonNull<u8>,
    header: *mut PoolHeader,
}

unsafe impl Send for Pool {}

impl Pool {
    fn new(arena: *mut ArenaHeader, block_size: usize) -> Self {
        let layout = Layout::from_size_align(POOL_SIZE, POOL_SIZE).unwrap();
        let page = unsafe { alloc(layout) };
        let page = NonNull::new(page).expect("pool page allocation failed");

        let header_size = std::mem::size_of::<PoolHeader>();
        let usable = POOL_SIZE - header_size;
        let total_blocks = usable / block_size;

        let header_ptr = page.as_ptr() as *mut PoolHeader;
        let blocks_start = unsafe { page.as_ptr().add(header_size) };

        // Thread the free list through every block's first word.
        let mut prev: *mut u8 = std::ptr::null_mut();
        for i in (0..total_blocks).rev() {
            let block = unsafe { blocks_start.add(i * block_size) };
            unsafe { (block as *mut *mut u8).write(prev) };
            prev = block;
        }

        unsafe {
            header_ptr.write(PoolHeader {
                arena,
                block_size,
                total_blocks,
                free_count: total_blocks,
                free_head: prev,
            });
        }

        Self {
            page,
            header: header_ptr,
        }
    }

    fn alloc_block(&mut self) -> Option<NonNull<u8>> {
        let header = unsafe { &mut *self.header };
        if header.free_head.is_null() {
            return None;
        }
        let block = header.free_head;
        header.free_head = unsafe { *(block as *mut *mut u8) };
        header.free_count -= 1;
        NonNull::new(block)
    }

    fn free_block(&mut self, block: NonNull<u8>) {
        let header = unsafe { &mut *self.header };
        unsafe { (block.as_ptr() as *mut *mut u8).write(header.free_head) };
        header.free_head = block.as_ptr();
        header.free_count += 1;
    }

    fn is_full(&self) -> bool {
        unsafe { (*self.header).free_count == 0 }
    }

    fn contains(&self, ptr: *const u8) -> bool {
        let start = self.page.as_ptr() as usize;
        let end = start + POOL_SIZE;
        let addr = ptr as usize;
        addr >= start && addr < end
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(POOL_SIZE, POOL_SIZE).unwrap();
        unsafe { dealloc(self.page.as_ptr(), layout) };
    }
}

/// One 256 KiB OS-backed arena and the size-class pools carved from it.
struct Arena {
    header: Box<ArenaHeader>,
    pools: Vec<Pool>,
}

/// Address-containment-testing, size-class block allocator.
///
/// `ArenaAllocator` is the substrate every runtime object (frames, objects,
/// side tables) is allocated through. Allocations ≤ [`MAX_BLOCK`] bytes are
/// served from a size-class pool; larger requests go straight to the
/// platform allocator and are tracked separately so `contains` still reports
/// them honestly as "not ours" (the arena only answers for pool memory).
pub struct ArenaAllocator {
    inner: Mutex<ArenaAllocatorInner>,
}

#[derive(Default)]
struct ArenaAllocatorInner {
    // Pools are scanned linearly per size class; a per-class free-pool list
    // would cut that to O(1) once arena counts grow.
    arenas: Vec<Arena>,
}

impl Default for ArenaAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaAllocator {
    /// An allocator with no arenas yet reserved.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ArenaAllocatorInner::default()),
        }
    }

    /// Allocate a block of `size` bytes with the given `align`.
    ///
    /// Requests larger than [`MAX_BLOCK`] go straight to the system
    /// allocator via `std::alloc`.
    pub fn alloc(&self, size: usize, align: usize) -> NonNull<u8> {
        match size_class(size) {
            None => {
                let layout = Layout::from_size_align(size, align).unwrap();
                NonNull::new(unsafe { alloc(layout) }).expect("out of memory")
            }
            Some(class) => self.alloc_from_pool(class),
        }
    }

    fn alloc_from_pool(&self, class: usize) -> NonNull<u8> {
        let mut inner = self.inner.lock().unwrap();
        for arena in inner.arenas.iter_mut() {
            for pool in arena.pools.iter_mut() {
                if unsafe { (*pool.header).block_size } == class && !pool.is_full() {
                    if let Some(block) = pool.alloc_block() {
                        return block;
                    }
                }
            }
        }
        // No pool with free space for this class: grow with a new arena.
        let header = Box::new(ArenaHeader {
            base: std::ptr::null_mut(),
            span: ARENA_SIZE,
        });
        let header_ptr = Box::into_raw(header);
        let mut pool = Pool::new(header_ptr, class);
        let block = pool.alloc_block().expect("fresh pool must have free blocks");
        inner.arenas.push(Arena {
            header: unsafe { Box::from_raw(header_ptr) },
            pools: vec![pool],
        });
        block
    }

    /// Release a previously allocated block back to its owning pool, or to
    /// the system allocator if it was never ours.
    ///
    /// # Safety
    /// `ptr`/`size`/`align` must match a prior `alloc` call exactly.
    pub unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        match size_class(size) {
            None => {
                let layout = Layout::from_size_align(size, align).unwrap();
                dealloc(ptr.as_ptr(), layout);
            }
            Some(_) => {
                let mut inner = self.inner.lock().unwrap();
                for arena in inner.arenas.iter_mut() {
                    for pool in arena.pools.iter_mut() {
                        if pool.contains(ptr.as_ptr()) {
                            pool.free_block(ptr);
                            return;
                        }
                    }
                }
                debug_assert!(false, "dealloc of pointer not owned by any arena pool");
            }
        }
    }

    /// Address-containment test: is `ptr` the page-aligned address of a
    /// block currently served by one of our pools?
    pub fn contains(&self, ptr: *const u8) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .arenas
            .iter()
            .any(|a| a.pools.iter().any(|p| p.contains(ptr)))
    }
}
