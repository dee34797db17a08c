#[cfg(feature = "xnu")]
pub mod xnu;

use core::ffi::CStr;
use core::ops::{BitOr, BitOrAssign};

/// Flags forwarded untouched to the host allocator.
///
/// Values match `<sys/malloc.h>`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct AllocFlags(i32);

impl AllocFlags {
    /// May block until memory is available.
    pub const WAITOK: Self = Self(0x0000);
    /// Fail instead of blocking.
    pub const NOWAIT: Self = Self(0x0001);
    /// Zero-fill the returned block.
    pub const ZERO: Self = Self(0x0004);

    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AllocFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AllocFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The host's raw, unaccounted allocator.
///
/// # Safety
/// Implementations must return either null or a block of at least `size`
/// writable bytes, zero-filled when `flags` contains [`AllocFlags::ZERO`],
/// and must accept every non-null pointer they returned in `raw_free`.
pub unsafe trait HostAllocator {
    /// Allocate `size` bytes. Returns null on exhaustion.
    fn raw_allocate(&self, size: usize, flags: AllocFlags) -> *mut u8;

    /// Return a block to the host.
    ///
    /// # Safety
    /// `addr` must have come from `raw_allocate` on the same host and must
    /// not be used afterwards.
    unsafe fn raw_free(&self, addr: *mut u8);
}

/// Hand one finished log line to the host console.
#[cfg(feature = "xnu")]
pub fn log_line(line: &CStr) {
    xnu::console_write(line);
}

/// Hand one finished log line to the host console.
#[cfg(all(feature = "std", not(feature = "xnu")))]
pub fn log_line(line: &CStr) {
    std::eprintln!("{}", line.to_string_lossy());
}
