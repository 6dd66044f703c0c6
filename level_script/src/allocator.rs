//! Bridge between the host's tagged allocator and the allocator contract the
//! embedded Lua runtime expects (`lua_Alloc`: one entry point covering
//! allocate, resize and free).
//!
//! The host only offers allocate/free, so resizing is allocate, copy, free.
//! Allocation failure is the host's problem: it aborts rather than returning
//! null, so nothing here checks for it.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::Cell;
use std::mem::size_of;
use std::ptr::{self, NonNull};

/// Lifetime class of a host allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTag {
    /// Lives until the scripting engine shuts down.
    Game,
    /// Released in bulk when the level unloads.
    Level,
}

impl MemoryTag {
    fn to_byte(self) -> u8 {
        match self {
            MemoryTag::Game => 0,
            MemoryTag::Level => 1,
        }
    }

    fn from_byte(byte: u8) -> Self {
        if byte == 0 {
            MemoryTag::Game
        } else {
            MemoryTag::Level
        }
    }
}

/// Host allocation primitives.
pub trait TagAllocator {
    /// Never returns on exhaustion.
    fn allocate(&self, size: usize, tag: MemoryTag) -> NonNull<u8>;

    /// # Safety
    ///
    /// `block` must have been returned by `allocate` on this allocator and not
    /// freed since.
    unsafe fn free(&self, block: NonNull<u8>);
}

const HEADER_LEN: usize = 16;
const BLOCK_ALIGN: usize = 16;

/// Heap-backed host allocator that tracks live bytes per tag.
#[derive(Debug, Default)]
pub struct HeapTagAllocator {
    game_bytes: Cell<usize>,
    level_bytes: Cell<usize>,
    live_blocks: Cell<usize>,
}

impl HeapTagAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_in_use(&self, tag: MemoryTag) -> usize {
        self.counter(tag).get()
    }

    pub fn live_blocks(&self) -> usize {
        self.live_blocks.get()
    }

    fn counter(&self, tag: MemoryTag) -> &Cell<usize> {
        match tag {
            MemoryTag::Game => &self.game_bytes,
            MemoryTag::Level => &self.level_bytes,
        }
    }
}

fn block_layout(size: usize) -> Layout {
    let Some(total) = size.checked_add(HEADER_LEN) else {
        panic!("script allocation of {size} bytes overflows");
    };
    match Layout::from_size_align(total, BLOCK_ALIGN) {
        Ok(layout) => layout,
        Err(_) => panic!("script allocation of {size} bytes overflows"),
    }
}

impl TagAllocator for HeapTagAllocator {
    fn allocate(&self, size: usize, tag: MemoryTag) -> NonNull<u8> {
        let layout = block_layout(size);
        // SAFETY: the layout always includes the header, so it is never zero-sized.
        let base = unsafe { alloc(layout) };
        let Some(base) = NonNull::new(base) else {
            handle_alloc_error(layout);
        };
        // SAFETY: the header lives inside the block we just allocated and the
        // base is aligned for usize.
        let payload = unsafe {
            base.as_ptr().cast::<usize>().write(size);
            base.as_ptr().add(size_of::<usize>()).write(tag.to_byte());
            NonNull::new_unchecked(base.as_ptr().add(HEADER_LEN))
        };
        let counter = self.counter(tag);
        counter.set(counter.get() + size);
        self.live_blocks.set(self.live_blocks.get() + 1);
        payload
    }

    unsafe fn free(&self, block: NonNull<u8>) {
        let base = block.as_ptr().sub(HEADER_LEN);
        let size = base.cast::<usize>().read();
        let tag = MemoryTag::from_byte(base.add(size_of::<usize>()).read());
        let counter = self.counter(tag);
        counter.set(counter.get().saturating_sub(size));
        self.live_blocks.set(self.live_blocks.get().saturating_sub(1));
        dealloc(base, block_layout(size));
    }
}

/// Adapts a [`TagAllocator`] to the scripting runtime's single-entry
/// allocator contract. Runtime memory is tagged [`MemoryTag::Game`].
pub struct ScriptAllocator<'a, A: TagAllocator> {
    host: &'a A,
}

impl<'a, A: TagAllocator> ScriptAllocator<'a, A> {
    pub fn new(host: &'a A) -> Self {
        Self { host }
    }

    /// `new_size == 0` frees `block` and returns null; a null `block`
    /// allocates; anything else resizes.
    ///
    /// # Safety
    ///
    /// `block` must be null or a live block from this bridge holding at
    /// least `old_size` bytes.
    pub unsafe fn reallocate(&self, block: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        if new_size == 0 {
            if let Some(block) = NonNull::new(block) {
                self.host.free(block);
            }
            return ptr::null_mut();
        }
        match NonNull::new(block) {
            None => self.host.allocate(new_size, MemoryTag::Game).as_ptr(),
            Some(old) => self.resize(old, old_size, new_size).as_ptr(),
        }
    }

    unsafe fn resize(&self, old: NonNull<u8>, old_size: usize, new_size: usize) -> NonNull<u8> {
        let fresh = self.host.allocate(new_size, MemoryTag::Game);
        ptr::copy_nonoverlapping(old.as_ptr(), fresh.as_ptr(), old_size.min(new_size));
        self.host.free(old);
        fresh
    }
}
