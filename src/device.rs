//! Accelerator device registry (SPEC_FULL §6 AMBIENT): the process-
//! global collaborator the pager and stabilizer-hybrid layers would
//! call into to pick a backend for a given `device_id`.
//!
//! The spec treats the actual accelerator backends (GPU kernels, SIMD
//! dispatch) as out of scope; this module owns only the *shape* of the
//! registry — a lazily-initialized, read-after-init lock-free handle
//! table vending a [`DeviceContext`] per device, with device selection
//! behind a one-shot init lock (design note 9, "Global process state").
//! The only shipped context runs on the host CPU via the parallel-for
//! runtime, which is also the §7 "falls back to the CPU backend if one
//! is available" failure policy in its entirety: there is currently
//! nothing else to fall back *from*.

use std::sync::OnceLock;

use crate::error::{Error, Result};

/// A handle to one accelerator (or the host CPU). Selection happens
/// once, lazily, behind [`DeviceRegistry::context`]; after that the
/// handle is a plain, immutable value any number of callers can read
/// concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceContext {
    id: i64,
}

impl DeviceContext {
    /// The identifier this context was selected for (`-1` is the
    /// default/host context).
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Whether this context executes on the host CPU (always true
    /// until a real accelerator backend is shipped).
    pub fn is_host(&self) -> bool {
        true
    }
}

/// Process-global table of selected device contexts, keyed by
/// `device_id`. Populated lazily and never mutated after a given id's
/// first lookup, so reads after initialization take no lock.
pub struct DeviceRegistry {
    default_ctx: OnceLock<DeviceContext>,
}

static REGISTRY: DeviceRegistry = DeviceRegistry {
    default_ctx: OnceLock::new(),
};

impl DeviceRegistry {
    /// Returns the process-wide registry handle.
    pub fn global() -> &'static DeviceRegistry {
        &REGISTRY
    }

    /// Selects (on first call) or returns the cached context for
    /// `device_id`. `-1` requests the default context.
    ///
    /// Every concrete accelerator backend is an external collaborator
    /// per spec §1; selection failure for a named device therefore
    /// always falls back to the host context rather than returning
    /// `BackendFailure`, matching the propagation policy in §7.
    pub fn context(&self, device_id: i64) -> Result<DeviceContext> {
        if device_id != -1 {
            log::debug!("device {device_id} requested but no accelerator backend is compiled in; falling back to host");
        }
        let ctx = self.default_ctx.get_or_init(|| DeviceContext { id: -1 });
        Ok(*ctx)
    }
}

/// Convenience wrapper equivalent to `DeviceRegistry::global().context(device_id)`,
/// returning `BackendFailure` only if the global registry is somehow
/// unreachable (never, in the CPU-only build this crate ships).
pub fn select_device(device_id: i64) -> Result<DeviceContext> {
    DeviceRegistry::global()
        .context(device_id)
        .map_err(|_| Error::backend_failure("device registry unavailable"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_is_host() {
        let ctx = select_device(-1).unwrap();
        assert!(ctx.is_host());
        assert_eq!(ctx.id(), -1);
    }

    #[test]
    fn unknown_device_falls_back_to_host() {
        let ctx = select_device(7).unwrap();
        assert!(ctx.is_host());
    }
}
