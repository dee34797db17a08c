use core::fmt;

pub const ENOENT: i32 = 2;
pub const ENOMEM: i32 = 12;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;

/// Recoverable failures. Broken invariants are never reported through
/// this type; they panic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The host allocator had nothing to give.
    OutOfMemory,
    /// The activation gate is closed.
    GateClosed,
    /// Callbacks are still in flight; unload must be retried later.
    Busy,
    /// The image does not start with a Mach-O magic.
    BadImage,
    /// The image carries no `LC_UUID` command.
    NoUuid,
    /// Raw errno from a host call.
    Errno(i32),
}

impl Error {
    /// BSD errno for the C surface.
    pub const fn errno(self) -> i32 {
        match self {
            Error::OutOfMemory => ENOMEM,
            Error::GateClosed | Error::Busy => EBUSY,
            Error::BadImage => EINVAL,
            Error::NoUuid => ENOENT,
            Error::Errno(e) => e,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => f.write_str("out of memory"),
            Error::GateClosed => f.write_str("activation gate closed"),
            Error::Busy => f.write_str("callbacks still active"),
            Error::BadImage => f.write_str("not a Mach-O image"),
            Error::NoUuid => f.write_str("no LC_UUID command"),
            Error::Errno(e) => write!(f, "errno {}", e),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
