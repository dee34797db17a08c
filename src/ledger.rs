use core::ptr::NonNull;

use crate::diagnostic::log_debug;
use crate::platform::{AllocFlags, HostAllocator};
use crate::sync::{AtomicI64, Ordering};

/// Behaviour switches for a [`Ledger`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Zero the block when `resize` is asked for the size it already has
    /// and `flags` carries [`AllocFlags::ZERO`].
    pub zero_on_noop_resize: bool,
}

impl LedgerConfig {
    pub const DEFAULT: Self = Self {
        zero_on_noop_resize: cfg!(feature = "noop-resize-zero"),
    };
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Allocation accounting layered over a host allocator.
///
/// One signed counter of blocks handed out and not yet released, updated
/// without a lock after the host call returns. It must never go negative
/// and must read zero at unload; either violation panics.
pub struct Ledger<H> {
    host: H,
    outstanding: AtomicI64,
    config: LedgerConfig,
}

impl<H> Ledger<H> {
    #[cfg(not(feature = "loom"))]
    pub const fn new(host: H) -> Self {
        Self::with_config(host, LedgerConfig::DEFAULT)
    }

    #[cfg(not(feature = "loom"))]
    pub const fn with_config(host: H, config: LedgerConfig) -> Self {
        Self {
            host,
            outstanding: AtomicI64::new(0),
            config,
        }
    }

    #[cfg(feature = "loom")]
    pub fn new(host: H) -> Self {
        Self::with_config(host, LedgerConfig::DEFAULT)
    }

    #[cfg(feature = "loom")]
    pub fn with_config(host: H, config: LedgerConfig) -> Self {
        Self {
            host,
            outstanding: AtomicI64::new(0),
            config,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> LedgerConfig {
        self.config
    }

    /// Blocks handed out and not yet released.
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Panic unless every block handed out has been released.
    ///
    /// Meant for unload, after every other thread has stopped touching the
    /// ledger.
    pub fn assert_balanced(&self) {
        let cnt = self.outstanding.load(Ordering::Acquire);
        if cnt != 0 {
            panic!("assert_balanced: potential memory leak (cnt: {})", cnt);
        }
    }

    fn charge(&self) {
        let prev = self.outstanding.fetch_add(1, Ordering::AcqRel);
        if prev < 0 {
            panic!("allocate: ledger corrupted (cnt: {})", prev);
        }
    }

    fn credit(&self) {
        let prev = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if prev <= 0 {
            panic!("release: more blocks freed than allocated (cnt: {})", prev);
        }
    }
}

impl<H: HostAllocator> Ledger<H> {
    /// Allocate `size` bytes from the host and record it.
    ///
    /// Returns `None` when the host is exhausted; the ledger is untouched.
    pub fn allocate(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>> {
        let addr = NonNull::new(self.host.raw_allocate(size, flags));
        match addr {
            Some(_) => self.charge(),
            None => log_debug!("allocate: host refused {} bytes (flags {:#x})", size, flags.bits()),
        }
        addr
    }

    /// Allocate a zero-filled block owned by the returned guard.
    pub fn allocate_zeroed(&self, size: usize, flags: AllocFlags) -> Option<Allocation<'_, H>> {
        let ptr = self.allocate(size, flags | AllocFlags::ZERO)?;
        Some(Allocation {
            ledger: self,
            ptr,
            len: size,
        })
    }

    /// Grow or shrink a block.
    ///
    /// - `addr` null: `old_size` must be 0; same as [`allocate`](Self::allocate).
    /// - same size: `addr` comes back unchanged, zeroed first if configured
    ///   and `flags` has [`AllocFlags::ZERO`].
    /// - otherwise a new block receives the first `min(old_size, new_size)`
    ///   bytes and the old one goes straight back to the host.
    ///
    /// On `None` the old block is still valid and still owned by the caller.
    /// The outstanding count only moves when a null `addr` turns into a block.
    ///
    /// # Safety
    /// A non-null `addr` must be a live block from this ledger of exactly
    /// `old_size` bytes. On success it must not be used again.
    pub unsafe fn resize(
        &self,
        addr: *mut u8,
        old_size: usize,
        new_size: usize,
        flags: AllocFlags,
    ) -> Option<NonNull<u8>> {
        let Some(old) = NonNull::new(addr) else {
            assert!(
                old_size == 0,
                "resize: null block with nonzero size {}",
                old_size
            );
            return self.allocate(new_size, flags);
        };

        if new_size == old_size {
            if self.config.zero_on_noop_resize && flags.contains(AllocFlags::ZERO) {
                // SAFETY: caller guarantees old spans old_size == new_size bytes.
                unsafe { core::ptr::write_bytes(old.as_ptr(), 0, new_size) };
            }
            return Some(old);
        }

        let new = NonNull::new(self.host.raw_allocate(new_size, flags))?;
        // SAFETY: both blocks are live for at least min(old_size, new_size)
        // bytes and the host never hands out overlapping blocks.
        unsafe {
            core::ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), old_size.min(new_size));
            self.host.raw_free(old.as_ptr());
        }
        Some(new)
    }

    /// Give a block back to the host. Null is ignored.
    ///
    /// # Safety
    /// A non-null `addr` must be a live block from this ledger and must not
    /// be used afterwards.
    pub unsafe fn release(&self, addr: *mut u8) {
        if addr.is_null() {
            return;
        }
        self.credit();
        // SAFETY: caller guarantees addr came from this ledger's host.
        unsafe { self.host.raw_free(addr) };
    }
}

/// A zero-filled block that goes back through its ledger when dropped.
pub struct Allocation<'l, H: HostAllocator> {
    ledger: &'l Ledger<H>,
    ptr: NonNull<u8>,
    len: usize,
}

impl<'l, H: HostAllocator> Allocation<'l, H> {
    /// Re-adopt a block previously given up with [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    /// `ptr` must be a live, initialized block of `len` bytes from `ledger`.
    pub unsafe fn from_raw(ledger: &'l Ledger<H>, ptr: NonNull<u8>, len: usize) -> Self {
        Self { ledger, ptr, len }
    }

    /// Hand ownership to the caller, who must later release it through the
    /// ledger.
    pub fn into_raw(self) -> NonNull<u8> {
        let ptr = self.ptr;
        core::mem::forget(self);
        ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the block is initialized and exclusively ours.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self rules out other borrows.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<H: HostAllocator> Drop for Allocation<'_, H> {
    fn drop(&mut self) {
        // SAFETY: the block came from this ledger and is dropped only once.
        unsafe { self.ledger.release(self.ptr.as_ptr()) };
    }
}
