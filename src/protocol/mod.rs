//! Protocol frame model and codec seam
//!
//! This module defines the decoded frame types exchanged with the vehicle and
//! the codec that turns them into wire bytes.

pub mod codec;
pub mod message;

pub use self::codec::FrameCodec;
pub use self::message::{msg_id, AckResult, FlightMode, Frame, MavCommand};

/// Maximum encoded frame size in bytes (maximum UDP payload)
pub const MAX_FRAME_SIZE: usize = 65507;

/// Protocol version the ground station advertises
pub const PROTOCOL_VERSION: u8 = 3;
