#[cfg(not(feature = "loom"))]
pub(crate) use core::sync::atomic::{AtomicI32, AtomicI64, Ordering};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{AtomicI32, AtomicI64, Ordering};
