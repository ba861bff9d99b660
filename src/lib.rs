//! gcs_link: ground-station link to a MAVLink-style vehicle controller
//!
//! This library maintains a live link to a vehicle endpoint, keeps it alive
//! with periodic heartbeats, recovers from transient link loss, and pairs
//! each sent command with its asynchronous acknowledgment under a timeout.
//! High-level operations (arm, disarm, takeoff, mode change, status and
//! position reads) are composed on top of those two pieces.

pub mod command;
pub mod core;
pub mod link;
pub mod ops;
pub mod protocol;

// Re-export commonly used items
pub use self::command::{CommandCorrelator, TelemetryReader};
pub use self::core::{ConnectionState, Endpoint, Error, Result, SessionConfig, TransportKind};
pub use self::link::{ConnectionManager, LinkEvent, TransportPool};
pub use self::ops::VehicleOps;
pub use self::protocol::{AckResult, FlightMode, Frame, MavCommand};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
