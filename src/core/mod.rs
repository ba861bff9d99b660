//! Core types and constants for the vehicle link
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    ConnectionState,
    Endpoint,
    HeartbeatSnapshot,
    SessionConfig,
    TransportKind,
};

/// Default vehicle host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default vehicle port (SITL secondary telemetry stream)
pub const DEFAULT_PORT: u16 = 14552;

/// Source system id the ground station identifies itself with
pub const SOURCE_SYSTEM_ID: u8 = 1;

/// Source component id the ground station identifies itself with
pub const SOURCE_COMPONENT_ID: u8 = 90;

/// System id of the vehicle commands are addressed to
pub const TARGET_SYSTEM_ID: u8 = 1;

/// Component id of the vehicle autopilot
pub const TARGET_COMPONENT_ID: u8 = 1;

/// Default transport-open and send timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default interval between outbound heartbeats in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
