//! Aligned, fallible byte buffers backing archetype columns.
//!
//! This is the only module in the crate that touches the allocator directly.
//! Allocation failure is reported as a value ([`AllocError`]) rather than
//! aborting, which is what lets `set_component`/`remove_component` stay
//! transactional when memory runs out.
//!
//! Buffers are zero-initialized on (re)allocation, so every byte of a
//! [`RawBuffer`] is always initialized and safe to view as a slice. Growth
//! never shrinks and always copies the old contents.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

// ---------------------------------------------------------------------------
// AllocError
// ---------------------------------------------------------------------------

/// A failed buffer allocation. Converted to
/// [`EcsError::OutOfMemory`](crate::EcsError::OutOfMemory) at the store
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    /// The number of bytes that could not be allocated.
    pub bytes: usize,
}

// ---------------------------------------------------------------------------
// RawBuffer
// ---------------------------------------------------------------------------

/// An owned, aligned heap buffer of raw bytes.
///
/// The pointer is dangling while the capacity is zero; no allocation happens
/// until the first [`grow_to`](Self::grow_to).
pub(crate) struct RawBuffer {
    /// Dangling (aligned) when `cap_bytes == 0`.
    ptr: NonNull<u8>,
    cap_bytes: usize,
    align: usize,
}

// A RawBuffer is plain owned bytes; nothing in it is tied to a thread.
unsafe impl Send for RawBuffer {}
unsafe impl Sync for RawBuffer {}

impl RawBuffer {
    /// Create an empty buffer for elements aligned to `align`.
    ///
    /// # Panics
    ///
    /// Panics if `align` is zero or not a power of two.
    pub(crate) fn new(align: usize) -> Self {
        assert!(
            align.is_power_of_two(),
            "column alignment must be a nonzero power of two, got {align}"
        );
        Self {
            // Aligned dangling pointer, never dereferenced at capacity 0.
            ptr: NonNull::new(align as *mut u8).expect("alignment is nonzero"),
            cap_bytes: 0,
            align,
        }
    }

    /// Grow the buffer to hold at least `new_bytes` bytes, copying existing
    /// contents and zero-filling the tail. Never shrinks; growing to a size
    /// within the current capacity is a no-op.
    pub(crate) fn grow_to(&mut self, new_bytes: usize) -> Result<(), AllocError> {
        if new_bytes <= self.cap_bytes {
            return Ok(());
        }
        #[cfg(test)]
        if fail::trip() {
            return Err(AllocError { bytes: new_bytes });
        }
        let layout = Layout::from_size_align(new_bytes, self.align)
            .map_err(|_| AllocError { bytes: new_bytes })?;
        // Fresh zeroed allocation + copy. Zeroing keeps the whole buffer
        // initialized so slice views of never-written rows are defined.
        let new_ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(new_ptr) = NonNull::new(new_ptr) else {
            return Err(AllocError { bytes: new_bytes });
        };
        if self.cap_bytes > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), self.cap_bytes);
                let old_layout = Layout::from_size_align_unchecked(self.cap_bytes, self.align);
                alloc::dealloc(self.ptr.as_ptr(), old_layout);
            }
        }
        self.ptr = new_ptr;
        self.cap_bytes = new_bytes;
        Ok(())
    }

    /// View the whole buffer. Every byte is initialized (zeroed on growth).
    /// The returned slice keeps the buffer's alignment even when empty, so
    /// it stays castable to the element type.
    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        // Sound at capacity 0: the pointer is dangling but non-null and
        // aligned, which is all an empty slice requires.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.cap_bytes) }
    }

    /// Mutable view of the whole buffer.
    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.cap_bytes) }
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if self.cap_bytes > 0 {
            unsafe {
                let layout = Layout::from_size_align_unchecked(self.cap_bytes, self.align);
                alloc::dealloc(self.ptr.as_ptr(), layout);
            }
        }
    }
}

impl fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBuffer")
            .field("cap_bytes", &self.cap_bytes)
            .field("align", &self.align)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Allocation-failure injection (tests only)
// ---------------------------------------------------------------------------

/// Test hook: make the n-th subsequent buffer allocation on this thread fail.
#[cfg(test)]
pub(crate) mod fail {
    use std::cell::Cell;

    thread_local! {
        static COUNTDOWN: Cell<Option<u64>> = const { Cell::new(None) };
    }

    /// Arrange for the `n`-th allocation from now (1-based) to fail.
    /// Later allocations succeed again.
    pub(crate) fn fail_on(n: u64) {
        assert!(n > 0, "fail_on is 1-based");
        COUNTDOWN.with(|c| c.set(Some(n)));
    }

    /// Cancel any pending injected failure.
    pub(crate) fn reset() {
        COUNTDOWN.with(|c| c.set(None));
    }

    /// Called once per allocation attempt; returns true when this attempt
    /// should fail.
    pub(crate) fn trip() -> bool {
        COUNTDOWN.with(|c| match c.get() {
            Some(1) => {
                c.set(None);
                true
            }
            Some(n) => {
                c.set(Some(n - 1));
                false
            }
            None => false,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
