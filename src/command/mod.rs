//! Command-acknowledgment correlation and telemetry reads
//!
//! Turns the connection manager's fire-and-forget frame send into
//! request/response calls: commands are paired with their acks, and status
//! and position reads wait on frame kinds under a timeout.

mod correlator;
mod telemetry;

pub use self::correlator::{CommandCorrelator, DEFAULT_COMMAND_TIMEOUT, TAKEOFF_TIMEOUT};
pub use self::telemetry::{
    TelemetryReader, VehiclePosition, VehicleStatus, Velocity, SECONDARY_TIMEOUT,
};
