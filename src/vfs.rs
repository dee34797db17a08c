use core::ffi::CStr;

use crate::error::{Error, Result};

/// Vnode I/O primitives of the host.
///
/// # Safety
/// Implementations must return live handles from the create/lookup calls
/// and accept each of them exactly once in the matching release call.
pub unsafe trait VfsHost {
    type Context: Copy;
    type Uio: Copy;
    type Vnode: Copy;

    fn context_create(&self) -> Option<Self::Context>;

    /// # Safety
    /// `ctx` must be live and not used afterwards.
    unsafe fn context_release(&self, ctx: Self::Context);

    /// A single-iovec kernel-space read descriptor at `offset`.
    fn uio_create_read(&self, offset: i64) -> Option<Self::Uio>;

    /// # Safety
    /// `buf` must stay writable for `len` bytes until the uio is released.
    unsafe fn uio_add_buffer(&self, uio: Self::Uio, buf: *mut u8, len: usize) -> Result<()>;

    /// # Safety
    /// `uio` must be live.
    unsafe fn uio_residual(&self, uio: Self::Uio) -> usize;

    /// # Safety
    /// `uio` must be live and not used afterwards.
    unsafe fn uio_release(&self, uio: Self::Uio);

    /// # Safety
    /// `ctx` must be live.
    unsafe fn lookup(&self, path: &CStr, ctx: Self::Context) -> Result<Self::Vnode>;

    /// # Safety
    /// `vp` must hold a reference from `lookup` and not be used afterwards.
    unsafe fn vnode_release(&self, vp: Self::Vnode);

    /// # Safety
    /// All handles must be live.
    unsafe fn read(&self, vp: Self::Vnode, uio: Self::Uio, ctx: Self::Context) -> Result<()>;
}

struct ContextGuard<'h, V: VfsHost>(&'h V, V::Context);

impl<V: VfsHost> Drop for ContextGuard<'_, V> {
    fn drop(&mut self) {
        // SAFETY: created by context_create, released once here.
        unsafe { self.0.context_release(self.1) }
    }
}

struct UioGuard<'h, V: VfsHost>(&'h V, V::Uio);

impl<V: VfsHost> Drop for UioGuard<'_, V> {
    fn drop(&mut self) {
        // SAFETY: created by uio_create_read, released once here.
        unsafe { self.0.uio_release(self.1) }
    }
}

struct VnodeGuard<'h, V: VfsHost>(&'h V, V::Vnode);

impl<V: VfsHost> Drop for VnodeGuard<'_, V> {
    fn drop(&mut self) {
        // SAFETY: referenced by lookup, released once here.
        unsafe { self.0.vnode_release(self.1) }
    }
}

/// Read up to `buf.len()` bytes of `path` starting at `offset`.
///
/// Returns the number of bytes read.
pub fn read_file<V: VfsHost>(host: &V, path: &CStr, buf: &mut [u8], offset: i64) -> Result<usize> {
    let ctx = ContextGuard(host, host.context_create().ok_or(Error::OutOfMemory)?);
    let uio = UioGuard(host, host.uio_create_read(offset).ok_or(Error::OutOfMemory)?);

    // SAFETY: buf outlives the uio guard, which is dropped before return.
    unsafe { host.uio_add_buffer(uio.1, buf.as_mut_ptr(), buf.len())? };

    // SAFETY: ctx is live for the rest of the function.
    let vp = VnodeGuard(host, unsafe { host.lookup(path, ctx.1)? });

    // SAFETY: all three handles are live.
    unsafe { host.read(vp.1, uio.1, ctx.1)? };

    // SAFETY: uio is live.
    let resid = unsafe { host.uio_residual(uio.1) };
    Ok(buf.len().saturating_sub(resid))
}
