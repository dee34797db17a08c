use core::ffi::{CStr, c_char, c_int, c_void};
use core::ptr;

use crate::macho::{self, UUID_STRING_LEN, Uuid};
use crate::platform::AllocFlags;
use crate::platform::xnu::{KERN_FAILURE, KERN_SUCCESS, XnuVfs};
use crate::support::support;
use crate::vfs;

/// Allocate `size` bytes; release with [`kextkit_mfree`].
#[unsafe(no_mangle)]
pub extern "C" fn kextkit_malloc(size: usize, flags: c_int) -> *mut c_void {
    support()
        .ledger
        .allocate(size, AllocFlags::from_bits(flags))
        .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

/// # Safety
/// See [`Ledger::resize`](crate::ledger::Ledger::resize).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kextkit_realloc(
    addr: *mut c_void,
    old_size: usize,
    new_size: usize,
    flags: c_int,
) -> *mut c_void {
    // SAFETY: forwarded from the caller.
    unsafe {
        support()
            .ledger
            .resize(addr.cast(), old_size, new_size, AllocFlags::from_bits(flags))
    }
    .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

/// # Safety
/// `addr` must be null or a live block from [`kextkit_malloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kextkit_mfree(addr: *mut c_void) {
    // SAFETY: forwarded from the caller.
    unsafe { support().ledger.release(addr.cast()) }
}

/// Panic unless every block has been freed.
#[unsafe(no_mangle)]
pub extern "C" fn kextkit_massert() {
    support().ledger.assert_balanced();
}

/// Enter a callback. Returns the previous holder count, or -1 once the
/// kext is going away.
#[unsafe(no_mangle)]
pub extern "C" fn kextkit_get_kcb() -> c_int {
    support().gate.acquire().unwrap_or(-1)
}

/// Leave a callback. Returns the holder count before leaving.
#[unsafe(no_mangle)]
pub extern "C" fn kextkit_put_kcb() -> c_int {
    support().gate.release()
}

#[unsafe(no_mangle)]
pub extern "C" fn kextkit_read_kcb() -> c_int {
    support().gate.peek()
}

/// Refuse further callbacks. Returns the holders still inside.
#[unsafe(no_mangle)]
pub extern "C" fn kextkit_invalidate_kcb() -> c_int {
    support().gate.close()
}

/// Write the UUID string of the Mach-O image at `addr` into `out`.
///
/// # Safety
/// `addr` must satisfy [`macho::image_at`]; `out` must hold 37 bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kextkit_vma_uuid(addr: *const c_void, out: *mut c_char) -> c_int {
    assert!(!out.is_null(), "kextkit_vma_uuid: null output buffer");
    // SAFETY: caller guarantees out spans UUID_STRING_LEN bytes.
    let out = unsafe { &mut *out.cast::<[u8; UUID_STRING_LEN]>() };
    // SAFETY: forwarded from the caller.
    match unsafe { macho::image_uuid_string(addr.cast(), out) } {
        Ok(()) => 0,
        Err(e) => e.errno(),
    }
}

/// Ledger-allocated UUID string of the image at `addr`, or null. Free with
/// [`kextkit_mfree`].
///
/// # Safety
/// `addr` must satisfy [`macho::image_at`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kextkit_uuid(addr: *const c_void) -> *mut c_char {
    // SAFETY: forwarded from the caller.
    unsafe { macho::find_identifier(&support().ledger, addr.cast()) }
        .map_or(ptr::null_mut(), |s| s.into_raw().as_ptr().cast())
}

/// # Safety
/// `uuid` must point at 16 bytes and `out` at 37 writable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kextkit_format_uuid_string(uuid: *const u8, out: *mut c_char) {
    assert!(!uuid.is_null() && !out.is_null(), "kextkit_format_uuid_string: null argument");
    // SAFETY: sizes guaranteed by the caller.
    let (uuid, out) = unsafe {
        (
            uuid.cast::<[u8; 16]>().read_unaligned(),
            &mut *out.cast::<[u8; UUID_STRING_LEN]>(),
        )
    };
    Uuid(uuid).format_into(out);
}

/// Read from a file on the local volume. On success returns 0 and stores
/// the byte count in `read` when it is not null.
///
/// # Safety
/// `path` must be NUL-terminated and `buf` writable for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kextkit_file_read(
    path: *const c_char,
    buf: *mut u8,
    len: usize,
    off: i64,
    read: *mut usize,
) -> c_int {
    assert!(!path.is_null(), "kextkit_file_read: null path");
    assert!(!buf.is_null(), "kextkit_file_read: null buffer");
    // SAFETY: guaranteed by the caller.
    let (path, buf) = unsafe { (CStr::from_ptr(path), core::slice::from_raw_parts_mut(buf, len)) };
    match vfs::read_file(&XnuVfs, path, buf, off) {
        Ok(n) => {
            if !read.is_null() {
                // SAFETY: non-null out-parameter supplied by the caller.
                unsafe { *read = n };
            }
            0
        }
        Err(e) => e.errno(),
    }
}

/// kmod start routine.
#[unsafe(no_mangle)]
pub extern "C" fn kextkit_start(_info: *mut c_void, _data: *mut c_void) -> c_int {
    support().start();
    KERN_SUCCESS
}

/// kmod stop routine. Fails while callbacks are still running.
#[unsafe(no_mangle)]
pub extern "C" fn kextkit_stop(_info: *mut c_void, _data: *mut c_void) -> c_int {
    match support().stop() {
        Ok(()) => KERN_SUCCESS,
        Err(_) => KERN_FAILURE,
    }
}
