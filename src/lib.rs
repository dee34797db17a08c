#![no_std]

#[cfg(all(feature = "xnu", any(feature = "std", feature = "loom")))]
compile_error!("the `xnu` feature cannot be combined with `std` or `loom`");

#[cfg(not(any(feature = "std", feature = "xnu")))]
compile_error!("enable either the `std` or the `xnu` feature");

#[cfg(feature = "std")]
extern crate std;

mod diagnostic;
mod sync;

pub mod error;
pub mod gate;
pub mod ledger;
pub mod macho;
pub mod platform;
pub mod support;
pub mod vfs;

#[cfg(feature = "xnu")]
pub mod ffi;

#[cfg(test)]
mod testing;


pub use diagnostic::NAME;
pub use error::{Error, Result};
pub use gate::{Gate, GateClosed, GateGuard};
pub use ledger::{Allocation, Ledger, LedgerConfig};
pub use macho::Uuid;
pub use platform::{AllocFlags, HostAllocator};
pub use support::Support;

// The test harness brings its own panic handler.
#[cfg(all(feature = "xnu", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use core::fmt::Write;

    let mut msg = diagnostic::LineBuf::new();
    let _ = write!(msg, "{}: {}", NAME, info);
    platform::xnu::halt(msg.as_cstr())
}
