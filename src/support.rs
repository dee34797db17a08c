use crate::diagnostic::{log_error, log_info};
use crate::error::{Error, Result};
use crate::gate::Gate;
use crate::ledger::{Ledger, LedgerConfig};
use crate::platform::HostAllocator;

pub struct Support<H> {
    pub ledger: Ledger<H>,
    pub gate: Gate,
}

impl<H> Support<H> {
    #[cfg(not(feature = "loom"))]
    pub const fn new(host: H, config: LedgerConfig) -> Self {
        Self {
            ledger: Ledger::with_config(host, config),
            gate: Gate::new(),
        }
    }

    #[cfg(feature = "loom")]
    pub fn new(host: H, config: LedgerConfig) -> Self {
        Self {
            ledger: Ledger::with_config(host, config),
            gate: Gate::new(),
        }
    }
}

impl<H: HostAllocator> Support<H> {
    /// Load-time hook.
    pub fn start(&self) {
        log_info!(
            "loaded (zero on no-op resize: {})",
            self.ledger.config().zero_on_noop_resize
        );
    }

    /// Unload-time hook.
    ///
    /// Closes the gate, then refuses to finish while callbacks are still
    /// inside it so the host can retry later. Once drained, every ledger
    /// allocation must be back; anything else panics.
    pub fn stop(&self) -> Result<()> {
        self.gate.close();
        let busy = self.gate.in_flight();
        if busy > 0 {
            log_error!("unload refused: {} callbacks still in flight", busy);
            return Err(Error::Busy);
        }
        self.ledger.assert_balanced();
        log_info!("unloaded");
        Ok(())
    }
}

#[cfg(feature = "xnu")]
static SUPPORT: Support<crate::platform::xnu::XnuAllocator> =
    Support::new(crate::platform::xnu::XnuAllocator, LedgerConfig::DEFAULT);

/// The process-wide instance.
#[cfg(feature = "xnu")]
pub fn support() -> &'static Support<crate::platform::xnu::XnuAllocator> {
    &SUPPORT
}
