use core::fmt;

use crate::diagnostic::log_info;
use crate::sync::{AtomicI32, Ordering};

const CLOSED: i32 = i32::MIN;
const HOLDERS: i32 = i32::MAX;

/// Returned by [`Gate::acquire`] once the gate has been closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateClosed;

impl fmt::Display for GateClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("activation gate closed")
    }
}

impl From<GateClosed> for crate::error::Error {
    fn from(_: GateClosed) -> Self {
        crate::error::Error::GateClosed
    }
}

/// Activation gate held by every callback while it runs.
///
/// While open the state is the number of holders. Closing sets the sign bit
/// and keeps the holder count in the low 31 bits, so a closed gate always
/// reads negative and a closed, drained gate reads exactly `i32::MIN`.
pub struct Gate {
    state: AtomicI32,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    #[cfg(not(feature = "loom"))]
    pub const fn new() -> Self {
        Self {
            state: AtomicI32::new(0),
        }
    }

    #[cfg(feature = "loom")]
    pub fn new() -> Self {
        Self {
            state: AtomicI32::new(0),
        }
    }

    /// Take a hold on the gate.
    ///
    /// Returns the number of holders before this one, or [`GateClosed`].
    /// Lost races are retried; a closed gate is never waited on.
    pub fn acquire(&self) -> Result<i32, GateClosed> {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if cur < 0 {
                return Err(GateClosed);
            }
            if cur == HOLDERS {
                panic!("acquire: holder count overflow (cnt: {})", cur);
            }
            match self
                .state
                .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(prev) => return Ok(prev),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Drop a hold taken with [`acquire`](Self::acquire).
    ///
    /// Returns the number of holders before the release. Releasing with no
    /// holders is a caller bug and panics without touching the state.
    pub fn release(&self) -> i32 {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            let holders = cur & HOLDERS;
            if holders == 0 {
                panic!("release: gate released without acquire (cnt: {})", cur);
            }
            // The sign bit is preserved; only the holder bits drop by one.
            match self
                .state
                .compare_exchange_weak(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return holders,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Raw counter, negative once closed.
    pub fn peek(&self) -> i32 {
        self.state.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> i32 {
        self.peek() & HOLDERS
    }

    pub fn is_closed(&self) -> bool {
        self.peek() < 0
    }

    /// Refuse every future [`acquire`](Self::acquire).
    ///
    /// Returns the holders still inside at the moment of closing. Closing
    /// twice is harmless; there is no way to reopen.
    pub fn close(&self) -> i32 {
        let prev = self.state.fetch_or(CLOSED, Ordering::AcqRel);
        if prev >= 0 {
            log_info!("activation gate closed with {} callbacks in flight", prev);
        }
        prev & HOLDERS
    }

    /// Acquire a hold released when the guard drops.
    pub fn enter(&self) -> Result<GateGuard<'_>, GateClosed> {
        self.acquire()?;
        Ok(GateGuard { gate: self })
    }
}

/// A hold on a [`Gate`], released on drop.
pub struct GateGuard<'a> {
    gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
