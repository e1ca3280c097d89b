//! Exclusive ownership of the single radio
//!
//! The state machine's topology already keeps listening and sending apart. The guard
//! makes the invariant explicit: a connect may only start while holding the one
//! [`RadioLease`], and the lease is released when the session is dropped.

use std::sync::Arc;

use blegate_core::{ConnectError, PeripheralAddress, PeripheralRole};
use parking_lot::Mutex;
use tracing::trace;

/// Who currently owns the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioHolder {
    pub address: PeripheralAddress,
    pub role: PeripheralRole,
}

/// Mutex over the currently connected address
#[derive(Debug, Clone, Default)]
pub struct RadioGuard {
    holder: Arc<Mutex<Option<RadioHolder>>>,
}

impl RadioGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the radio for `address`, failing if anyone else holds it
    pub fn claim(
        &self,
        address: PeripheralAddress,
        role: PeripheralRole,
    ) -> Result<RadioLease, ConnectError> {
        let mut holder = self.holder.lock();
        if let Some(current) = *holder {
            return Err(ConnectError::RadioBusy {
                holder: format!("{} {}", current.role, current.address),
            });
        }

        let claimed = RadioHolder { address, role };
        *holder = Some(claimed);
        trace!("Radio claimed by {} {}", role, address);
        Ok(RadioLease {
            holder: self.holder.clone(),
            claimed,
        })
    }

    /// Current owner, if any
    pub fn holder(&self) -> Option<RadioHolder> {
        *self.holder.lock()
    }

    pub fn is_free(&self) -> bool {
        self.holder.lock().is_none()
    }
}

/// Proof of radio ownership, released on drop
#[derive(Debug)]
pub struct RadioLease {
    holder: Arc<Mutex<Option<RadioHolder>>>,
    claimed: RadioHolder,
}

impl RadioLease {
    pub fn holder(&self) -> RadioHolder {
        self.claimed
    }
}

impl Drop for RadioLease {
    fn drop(&mut self) {
        let mut holder = self.holder.lock();
        if *holder == Some(self.claimed) {
            *holder = None;
            trace!(
                "Radio released by {} {}",
                self.claimed.role,
                self.claimed.address
            );
        }
    }
}
