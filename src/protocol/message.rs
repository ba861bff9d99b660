use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::{Error, Result};

/// Numeric message ids, matching the common telemetry dialect
pub mod msg_id {
    pub const HEARTBEAT: u32 = 0;
    pub const SYS_STATUS: u32 = 1;
    pub const GPS_RAW_INT: u32 = 24;
    pub const GLOBAL_POSITION_INT: u32 = 33;
    pub const COMMAND_LONG: u32 = 76;
    pub const COMMAND_ACK: u32 = 77;
}

/// Decoded protocol messages exchanged with the vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Periodic liveness frame reporting vehicle mode and arm state
    Heartbeat {
        /// Airframe type
        vehicle_type: u8,
        /// Autopilot flavour
        autopilot_type: u8,
        /// Base mode bit field; bit 0x80 is the armed flag
        base_mode: u8,
        /// Autopilot-specific mode number
        custom_mode: u32,
        /// Overall system status
        system_status: u8,
        /// Protocol version
        protocol_version: u8,
    },

    /// Onboard health summary, carries battery state
    SysStatus {
        /// Battery voltage in millivolts
        voltage_battery_mv: u16,
        /// Remaining battery percentage, -1 when unknown
        battery_remaining_pct: i8,
    },

    /// Raw GNSS receiver output
    GpsRawInt {
        /// GNSS fix type (0/1 = no fix, 2 = 2D, 3 = 3D)
        fix_type: u8,
        /// Number of satellites in view
        satellites_visible: u8,
    },

    /// Fused global position estimate
    GlobalPositionInt {
        /// Milliseconds since vehicle boot
        time_boot_ms: u32,
        /// Latitude in degrees * 1e7
        lat: i32,
        /// Longitude in degrees * 1e7
        lon: i32,
        /// Altitude above mean sea level in millimetres
        alt: i32,
        /// Altitude above home in millimetres
        relative_alt: i32,
        /// Ground speed north in cm/s
        vx: i16,
        /// Ground speed east in cm/s
        vy: i16,
        /// Ground speed down in cm/s
        vz: i16,
        /// Heading in centidegrees, u16::MAX when unknown
        hdg: u16,
    },

    /// Command sent to the vehicle
    CommandLong {
        /// Target system id
        target_system: u8,
        /// Target component id
        target_component: u8,
        /// Numeric command id
        command: u16,
        /// Retransmission counter, 0 on first send
        confirmation: u8,
        param1: f32,
        param2: f32,
        param3: f32,
        param4: f32,
        param5: f32,
        param6: f32,
        param7: f32,
    },

    /// Acknowledgment of a previously sent command, correlated by command id
    CommandAck {
        /// Command id being acknowledged
        command: u16,
        /// Result code
        result: AckResult,
    },
}

impl Frame {
    /// Numeric id of this message kind
    pub fn message_id(&self) -> u32 {
        match self {
            Frame::Heartbeat { .. } => msg_id::HEARTBEAT,
            Frame::SysStatus { .. } => msg_id::SYS_STATUS,
            Frame::GpsRawInt { .. } => msg_id::GPS_RAW_INT,
            Frame::GlobalPositionInt { .. } => msg_id::GLOBAL_POSITION_INT,
            Frame::CommandLong { .. } => msg_id::COMMAND_LONG,
            Frame::CommandAck { .. } => msg_id::COMMAND_ACK,
        }
    }

    /// The fixed self-identifying heartbeat the ground station emits:
    /// GCS type, generic-invalid autopilot, unarmed, custom_mode 0, active.
    pub fn gcs_heartbeat() -> Self {
        Frame::Heartbeat {
            vehicle_type: 6,    // MAV_TYPE_GCS
            autopilot_type: 8,  // MAV_AUTOPILOT_INVALID
            base_mode: 0,
            custom_mode: 0,
            system_status: 4,   // MAV_STATE_ACTIVE
            protocol_version: super::PROTOCOL_VERSION,
        }
    }

    /// Builds a command frame addressed to the vehicle
    pub fn command(
        target_system: u8,
        target_component: u8,
        command: MavCommand,
        params: [f32; 7],
    ) -> Self {
        Frame::CommandLong {
            target_system,
            target_component,
            command: command.id(),
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        }
    }
}

/// Result code carried by a command acknowledgment.
///
/// Only `Accepted` is success; every other code surfaces as a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckResult {
    Accepted,
    TemporarilyRejected,
    Denied,
    Unsupported,
    Failed,
    InProgress,
    Cancelled,
}

impl AckResult {
    /// Decodes the wire result code
    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(AckResult::Accepted),
            1 => Ok(AckResult::TemporarilyRejected),
            2 => Ok(AckResult::Denied),
            3 => Ok(AckResult::Unsupported),
            4 => Ok(AckResult::Failed),
            5 => Ok(AckResult::InProgress),
            6 => Ok(AckResult::Cancelled),
            other => Err(Error::protocol(format!("unknown ack result code {}", other))),
        }
    }

    /// Wire encoding of this result code
    pub fn as_u8(&self) -> u8 {
        match self {
            AckResult::Accepted => 0,
            AckResult::TemporarilyRejected => 1,
            AckResult::Denied => 2,
            AckResult::Unsupported => 3,
            AckResult::Failed => 4,
            AckResult::InProgress => 5,
            AckResult::Cancelled => 6,
        }
    }

    /// Whether this code means the command was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, AckResult::Accepted)
    }
}

impl fmt::Display for AckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AckResult::Accepted => "accepted",
            AckResult::TemporarilyRejected => "temporarily rejected",
            AckResult::Denied => "denied",
            AckResult::Unsupported => "unsupported",
            AckResult::Failed => "failed",
            AckResult::InProgress => "in progress",
            AckResult::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Commands the ground station issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MavCommand {
    /// Climb to the altitude given in param7
    NavTakeoff = 22,
    /// Switch flight mode; mode number in param2
    DoSetMode = 176,
    /// Arm (param1 = 1) or disarm (param1 = 0) the motors
    ComponentArmDisarm = 400,
}

impl MavCommand {
    /// Numeric command id
    pub fn id(&self) -> u16 {
        *self as u16
    }
}

/// Named operating modes of the flight controller (copter numbering).
///
/// Gaps in the numbering (8, 10, 12) are modes retired upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum FlightMode {
    Stabilize = 0,
    Acro = 1,
    AltHold = 2,
    Auto = 3,
    Guided = 4,
    Loiter = 5,
    Rtl = 6,
    Circle = 7,
    Land = 9,
    Drift = 11,
    Sport = 13,
    Flip = 14,
    Autotune = 15,
    PosHold = 16,
    Brake = 17,
    Throw = 18,
    AvoidAdsb = 19,
    GuidedNoGps = 20,
    SmartRtl = 21,
    FlowHold = 22,
    Follow = 23,
    ZigZag = 24,
    SystemId = 25,
    Autorotate = 26,
    AutoRtl = 27,
}

impl FlightMode {
    /// All known modes, in mode-number order
    pub const ALL: [FlightMode; 25] = [
        FlightMode::Stabilize,
        FlightMode::Acro,
        FlightMode::AltHold,
        FlightMode::Auto,
        FlightMode::Guided,
        FlightMode::Loiter,
        FlightMode::Rtl,
        FlightMode::Circle,
        FlightMode::Land,
        FlightMode::Drift,
        FlightMode::Sport,
        FlightMode::Flip,
        FlightMode::Autotune,
        FlightMode::PosHold,
        FlightMode::Brake,
        FlightMode::Throw,
        FlightMode::AvoidAdsb,
        FlightMode::GuidedNoGps,
        FlightMode::SmartRtl,
        FlightMode::FlowHold,
        FlightMode::Follow,
        FlightMode::ZigZag,
        FlightMode::SystemId,
        FlightMode::Autorotate,
        FlightMode::AutoRtl,
    ];

    /// The autopilot-specific mode number sent in a mode-change command
    pub fn custom_mode(&self) -> u32 {
        *self as u32
    }

    /// Looks up a mode by its autopilot-specific number
    pub fn from_custom_mode(raw: u32) -> Option<Self> {
        FlightMode::ALL.iter().copied().find(|m| m.custom_mode() == raw)
    }

    /// Canonical upper-case name, as ground stations display it
    pub fn name(&self) -> &'static str {
        match self {
            FlightMode::Stabilize => "STABILIZE",
            FlightMode::Acro => "ACRO",
            FlightMode::AltHold => "ALT_HOLD",
            FlightMode::Auto => "AUTO",
            FlightMode::Guided => "GUIDED",
            FlightMode::Loiter => "LOITER",
            FlightMode::Rtl => "RTL",
            FlightMode::Circle => "CIRCLE",
            FlightMode::Land => "LAND",
            FlightMode::Drift => "DRIFT",
            FlightMode::Sport => "SPORT",
            FlightMode::Flip => "FLIP",
            FlightMode::Autotune => "AUTOTUNE",
            FlightMode::PosHold => "POSHOLD",
            FlightMode::Brake => "BRAKE",
            FlightMode::Throw => "THROW",
            FlightMode::AvoidAdsb => "AVOID_ADSB",
            FlightMode::GuidedNoGps => "GUIDED_NOGPS",
            FlightMode::SmartRtl => "SMART_RTL",
            FlightMode::FlowHold => "FLOWHOLD",
            FlightMode::Follow => "FOLLOW",
            FlightMode::ZigZag => "ZIGZAG",
            FlightMode::SystemId => "SYSTEMID",
            FlightMode::Autorotate => "AUTOROTATE",
            FlightMode::AutoRtl => "AUTO_RTL",
        }
    }
}

impl FromStr for FlightMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase();
        FlightMode::ALL
            .iter()
            .copied()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| Error::invalid_parameter(format!("unknown flight mode '{}'", s)))
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
