use core::ffi::{CStr, c_char, c_int, c_void};

use crate::error::{Error, Result};
use crate::platform::{AllocFlags, HostAllocator};
use crate::vfs::VfsHost;

/// `M_TEMP` malloc type; the type tag is only used for kernel zone stats.
const M_TEMP: c_int = 80;

const VNODE_LOOKUP_NOFOLLOW: c_int = 0x01;
const VNODE_LOOKUP_NOCROSSMOUNT: c_int = 0x02;
const UIO_SYSSPACE: c_int = 2;
const UIO_READ: c_int = 0;
const IO_NOAUTH: c_int = 0x0020_0000;

pub const KERN_SUCCESS: c_int = 0;
pub const KERN_FAILURE: c_int = 5;

pub type VfsContext = *mut c_void;
pub type Uio = *mut c_void;
pub type Vnode = *mut c_void;

unsafe extern "C" {
    fn _MALLOC(size: usize, kind: c_int, flags: c_int) -> *mut c_void;
    fn _FREE(addr: *mut c_void, kind: c_int);

    fn printf(fmt: *const c_char, ...) -> c_int;
    fn panic(fmt: *const c_char, ...) -> !;

    fn vfs_context_create(ctx: VfsContext) -> VfsContext;
    fn vfs_context_rele(ctx: VfsContext) -> c_int;

    fn uio_create(iovcount: c_int, offset: i64, spacetype: c_int, direction: c_int) -> Uio;
    fn uio_addiov(uio: Uio, base: u64, len: u64) -> c_int;
    fn uio_resid(uio: Uio) -> i64;
    fn uio_free(uio: Uio);

    fn vnode_lookup(path: *const c_char, flags: c_int, vpp: *mut Vnode, ctx: VfsContext) -> c_int;
    fn vnode_put(vp: Vnode) -> c_int;
    fn VNOP_READ(vp: Vnode, uio: Uio, ioflag: c_int, ctx: VfsContext) -> c_int;
}

/// The kernel's general-purpose `_MALLOC` / `_FREE` pair.
pub struct XnuAllocator;

// SAFETY: _MALLOC returns null or a block of `size` bytes honouring M_ZERO,
// and _FREE accepts anything _MALLOC returned.
unsafe impl HostAllocator for XnuAllocator {
    fn raw_allocate(&self, size: usize, flags: AllocFlags) -> *mut u8 {
        // SAFETY: _MALLOC has no preconditions beyond valid flag bits.
        unsafe { _MALLOC(size, M_TEMP, flags.bits()) }.cast()
    }

    unsafe fn raw_free(&self, addr: *mut u8) {
        // SAFETY: caller guarantees addr came from _MALLOC.
        unsafe { _FREE(addr.cast(), M_TEMP) }
    }
}

/// Vnode-level file access through the BSD KPI.
pub struct XnuVfs;

fn errno(e: c_int) -> Result<()> {
    if e == 0 { Ok(()) } else { Err(Error::Errno(e)) }
}

// SAFETY: every handle returned is released exactly once by the matching
// release call below.
unsafe impl VfsHost for XnuVfs {
    type Context = VfsContext;
    type Uio = Uio;
    type Vnode = Vnode;

    fn context_create(&self) -> Option<VfsContext> {
        // SAFETY: a null parent context asks for one bound to the current thread.
        let ctx = unsafe { vfs_context_create(core::ptr::null_mut()) };
        (!ctx.is_null()).then_some(ctx)
    }

    unsafe fn context_release(&self, ctx: VfsContext) {
        // SAFETY: ctx came from vfs_context_create.
        unsafe { vfs_context_rele(ctx) };
    }

    fn uio_create_read(&self, offset: i64) -> Option<Uio> {
        // SAFETY: one iovec, kernel address space.
        let uio = unsafe { uio_create(1, offset, UIO_SYSSPACE, UIO_READ) };
        (!uio.is_null()).then_some(uio)
    }

    unsafe fn uio_add_buffer(&self, uio: Uio, buf: *mut u8, len: usize) -> Result<()> {
        // SAFETY: caller keeps buf alive and writable for len bytes until
        // the uio is freed.
        errno(unsafe { uio_addiov(uio, buf as u64, len as u64) })
    }

    unsafe fn uio_residual(&self, uio: Uio) -> usize {
        // SAFETY: uio is live.
        unsafe { uio_resid(uio) }.max(0) as usize
    }

    unsafe fn uio_release(&self, uio: Uio) {
        // SAFETY: uio came from uio_create.
        unsafe { uio_free(uio) }
    }

    unsafe fn lookup(&self, path: &CStr, ctx: VfsContext) -> Result<Vnode> {
        let mut vp: Vnode = core::ptr::null_mut();
        let flags = VNODE_LOOKUP_NOFOLLOW | VNODE_LOOKUP_NOCROSSMOUNT;
        // SAFETY: path is NUL-terminated and ctx is live.
        errno(unsafe { vnode_lookup(path.as_ptr(), flags, &mut vp, ctx) })?;
        Ok(vp)
    }

    unsafe fn vnode_release(&self, vp: Vnode) {
        // SAFETY: vp holds an iocount from vnode_lookup.
        unsafe { vnode_put(vp) };
    }

    unsafe fn read(&self, vp: Vnode, uio: Uio, ctx: VfsContext) -> Result<()> {
        // SAFETY: all three handles are live.
        errno(unsafe { VNOP_READ(vp, uio, IO_NOAUTH, ctx) })
    }
}

/// Print one NUL-terminated line on the kernel console.
///
/// The kernel printf rejects several specifiers, so the line goes through
/// a plain `%s`.
pub fn console_write(line: &CStr) {
    // SAFETY: both strings are NUL-terminated.
    unsafe { printf(c"%s\n".as_ptr(), line.as_ptr()) };
}

/// Halt the kernel with a message.
pub fn halt(msg: &CStr) -> ! {
    // SAFETY: both strings are NUL-terminated; panic never returns.
    unsafe { panic(c"\n%s\n".as_ptr(), msg.as_ptr()) }
}
