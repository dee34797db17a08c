use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::platform::{AllocFlags, HostAllocator};

/// Forwards to libc and counts every call. Allocation can be switched off
/// to simulate exhaustion.
#[derive(Default)]
pub struct CountingHost {
    allocs: AtomicUsize,
    frees: AtomicUsize,
    exhausted: AtomicBool,
}

// The loom models only allocate and release.
#[cfg_attr(feature = "loom", allow(dead_code))]
impl CountingHost {
    pub const fn new() -> Self {
        Self {
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            exhausted: AtomicBool::new(false),
        }
    }

    pub fn exhaust(&self, on: bool) {
        self.exhausted.store(on, Ordering::SeqCst);
    }

    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

// SAFETY: libc malloc/calloc/free uphold the contract; ZERO maps to calloc.
unsafe impl HostAllocator for CountingHost {
    fn raw_allocate(&self, size: usize, flags: AllocFlags) -> *mut u8 {
        if self.exhausted.load(Ordering::SeqCst) {
            return core::ptr::null_mut();
        }
        // Never hand out null for a zero-sized request.
        let size = size.max(1);
        let p = unsafe {
            if flags.contains(AllocFlags::ZERO) {
                libc::calloc(1, size)
            } else {
                libc::malloc(size)
            }
        };
        if !p.is_null() {
            self.allocs.fetch_add(1, Ordering::SeqCst);
        }
        p.cast()
    }

    unsafe fn raw_free(&self, addr: *mut u8) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        unsafe { libc::free(addr.cast()) }
    }
}
