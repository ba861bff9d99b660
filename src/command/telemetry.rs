use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::core::{Error, Result};
use crate::link::{ConnectionManager, FrameSubscription};
use crate::protocol::{FlightMode, Frame};

/// How long a read waits for its secondary frame kind before defaulting
pub const SECONDARY_TIMEOUT: Duration = Duration::from_secs(1);

/// Arm state, mode, and health assembled from recent inbound frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleStatus {
    /// Whether the motors are armed
    pub armed: bool,
    /// Named flight mode, None when the mode number is unknown
    pub mode: Option<String>,
    /// Raw system status code from the heartbeat
    pub system_status: u8,
    /// Battery voltage in millivolts, None when no health frame arrived
    pub battery_voltage_mv: Option<u16>,
    /// Remaining battery percentage, None when no health frame arrived
    pub battery_remaining_pct: Option<i8>,
}

/// Ground velocity in cm/s, NED frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// Global position assembled from recent inbound frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehiclePosition {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude above mean sea level in metres
    pub altitude_m: f64,
    /// Altitude above home in metres
    pub relative_altitude_m: f64,
    /// Heading in degrees, None when the vehicle reports it unknown
    pub heading_deg: Option<f64>,
    /// Ground velocity
    pub velocity: Velocity,
    /// GNSS fix type; 0 when no receiver frame arrived
    pub fix_type: u8,
    /// Satellites in view; 0 when no receiver frame arrived
    pub satellites_visible: u8,
}

/// Assembles status and position reads from the inbound frame stream.
///
/// Reads follow the subscribe/wait/timeout pattern: the primary frame kind is
/// required within the caller's timeout, the secondary kind gets its own
/// shorter window and is defaulted on a miss rather than failing the read.
pub struct TelemetryReader {
    manager: Arc<ConnectionManager>,
    secondary_timeout: Duration,
}

impl TelemetryReader {
    /// Creates a reader over the manager's frame stream
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        TelemetryReader {
            manager,
            secondary_timeout: SECONDARY_TIMEOUT,
        }
    }

    /// Overrides the secondary-frame window
    pub fn with_secondary_timeout(mut self, timeout: Duration) -> Self {
        self.secondary_timeout = timeout;
        self
    }

    /// Reads arm state, mode, and battery health.
    ///
    /// The heartbeat is the required frame: the held snapshot serves if one
    /// was already observed, otherwise the next heartbeat within `timeout`.
    /// Battery fields come from a SysStatus frame and default to unknown.
    pub async fn read_status(&self, timeout: Duration) -> Result<VehicleStatus> {
        let mut subscription = self.manager.subscribe_frames();

        let snapshot = match self.manager.last_heartbeat() {
            Some(snapshot) => snapshot,
            None => {
                let frame = wait_for(&mut subscription, timeout, |frame| {
                    matches!(frame, Frame::Heartbeat { .. })
                })
                .await;
                match frame {
                    Some(_) => self.manager.last_heartbeat().ok_or_else(|| {
                        Error::data_unavailable("heartbeat observed but snapshot empty")
                    })?,
                    None => {
                        self.finish(subscription);
                        return Err(Error::data_unavailable(format!(
                            "no heartbeat within {:?}",
                            timeout
                        )));
                    }
                }
            }
        };

        let health = wait_for(&mut subscription, self.secondary_timeout, |frame| {
            matches!(frame, Frame::SysStatus { .. })
        })
        .await;
        self.finish(subscription);

        let (battery_voltage_mv, battery_remaining_pct) = match health {
            Some(Frame::SysStatus {
                voltage_battery_mv,
                battery_remaining_pct,
            }) => (Some(voltage_battery_mv), Some(battery_remaining_pct)),
            _ => {
                debug!("no health frame, battery fields defaulted");
                (None, None)
            }
        };

        Ok(VehicleStatus {
            armed: snapshot.armed(),
            mode: FlightMode::from_custom_mode(snapshot.custom_mode).map(|m| m.name().to_string()),
            system_status: snapshot.system_status,
            battery_voltage_mv,
            battery_remaining_pct,
        })
    }

    /// Reads the fused global position.
    ///
    /// The position frame is required within `timeout`; the raw receiver
    /// frame is secondary and defaults to no fix / zero satellites.
    pub async fn read_position(&self, timeout: Duration) -> Result<VehiclePosition> {
        let mut subscription = self.manager.subscribe_frames();

        let position = wait_for(&mut subscription, timeout, |frame| {
            matches!(frame, Frame::GlobalPositionInt { .. })
        })
        .await;

        let position = match position {
            Some(frame) => frame,
            None => {
                self.finish(subscription);
                return Err(Error::data_unavailable(format!(
                    "no position frame within {:?}",
                    timeout
                )));
            }
        };

        let gps = wait_for(&mut subscription, self.secondary_timeout, |frame| {
            matches!(frame, Frame::GpsRawInt { .. })
        })
        .await;
        self.finish(subscription);

        let (fix_type, satellites_visible) = match gps {
            Some(Frame::GpsRawInt {
                fix_type,
                satellites_visible,
            }) => (fix_type, satellites_visible),
            _ => {
                debug!("no receiver frame, fix fields defaulted");
                (0, 0)
            }
        };

        if let Frame::GlobalPositionInt {
            lat,
            lon,
            alt,
            relative_alt,
            vx,
            vy,
            vz,
            hdg,
            ..
        } = position
        {
            Ok(VehiclePosition {
                latitude: lat as f64 / 1e7,
                longitude: lon as f64 / 1e7,
                altitude_m: alt as f64 / 1000.0,
                relative_altitude_m: relative_alt as f64 / 1000.0,
                heading_deg: (hdg != u16::MAX).then(|| hdg as f64 / 100.0),
                velocity: Velocity { x: vx, y: vy, z: vz },
                fix_type,
                satellites_visible,
            })
        } else {
            Err(Error::protocol("position wait yielded a non-position frame"))
        }
    }

    fn finish(&self, subscription: FrameSubscription) {
        self.manager.unsubscribe(subscription.id);
    }
}

/// Waits up to `timeout` for the next frame matching `pred`
async fn wait_for(
    subscription: &mut FrameSubscription,
    timeout: Duration,
    pred: impl Fn(&Frame) -> bool,
) -> Option<Frame> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match tokio::time::timeout(remaining, subscription.rx.recv()).await {
            Ok(Some(frame)) if pred(&frame) => return Some(frame),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}
