//! blegate runtime
//!
//! The connection-arbitration core of the gateway:
//! - [`Arbiter`]: the state machine that owns the single radio
//! - [`RadioGuard`]: explicit mutual exclusion over the connected address
//! - [`GatewayHandle`]: non-blocking request intake and mode observation
//! - [`GatewayBuilder`]: configuration validation and wiring

pub mod arbiter;
pub mod builder;
pub mod intake;
pub mod monitor;
pub mod radio;

pub use arbiter::Arbiter;
pub use builder::GatewayBuilder;
pub use intake::GatewayHandle;
pub use monitor::{GatewayStats, Monitor};
pub use radio::{RadioGuard, RadioHolder, RadioLease};

// Re-export core types for convenience
pub use blegate_core::{
    GatewayConfig, GatewayError, GatewayEvent, GatewayMode, GatewayResult, PeripheralAddress,
    PeripheralLink, PeripheralRole, SendReceipt, SendTicket,
};
