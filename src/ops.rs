//! High-level vehicle operations
//!
//! Thin translation layer over the correlator and telemetry reader: the six
//! operations a tool-invocation boundary exposes. Internal errors never
//! escape; every operation answers with a `ToolResponse` carrying
//! success/failure and a human-readable message.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::command::{
    CommandCorrelator, TelemetryReader, VehiclePosition, VehicleStatus,
    DEFAULT_COMMAND_TIMEOUT, TAKEOFF_TIMEOUT,
};
use crate::core::{Error, Result};
use crate::link::ConnectionManager;
use crate::protocol::{AckResult, FlightMode, MavCommand};

/// Default takeoff altitude in metres
pub const DEFAULT_TAKEOFF_ALTITUDE: f64 = 10.0;

/// Allowed takeoff altitude range in metres
pub const TAKEOFF_ALTITUDE_RANGE: (f64, f64) = (1.0, 100.0);

/// Timeout for status/position reads
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for takeoff
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TakeoffParams {
    /// Target altitude in metres, defaults to 10
    pub altitude: Option<f64>,
}

/// Parameters for a mode change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeParams {
    /// Mode name, matched case-insensitively against the known set
    pub mode: String,
}

/// Uniform operation answer for the tool boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse<T> {
    /// Whether the operation succeeded
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// Acknowledgment result code, for command operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AckResult>,
    /// Operation-specific payload, flattened into the top level
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T> ToolResponse<T> {
    fn ok(message: impl Into<String>) -> Self {
        ToolResponse {
            success: true,
            message: message.into(),
            result: None,
            data: None,
        }
    }

    fn failure(err: &Error) -> Self {
        ToolResponse {
            success: false,
            message: err.to_string(),
            result: None,
            data: None,
        }
    }

    fn with_result(mut self, result: AckResult) -> Self {
        self.result = Some(result);
        self
    }

    fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }
}

/// The six operations composed from the connection manager, correlator, and
/// telemetry reader
pub struct VehicleOps {
    manager: Arc<ConnectionManager>,
    correlator: CommandCorrelator,
    telemetry: TelemetryReader,
}

impl VehicleOps {
    /// Builds the operation layer on an already-constructed manager
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        let correlator = CommandCorrelator::new(Arc::clone(&manager));
        let telemetry = TelemetryReader::new(Arc::clone(&manager));
        VehicleOps {
            manager,
            correlator,
            telemetry,
        }
    }

    /// Arms the motors
    pub async fn arm(&self) -> ToolResponse<()> {
        match self.arm_disarm(true).await {
            Ok(result) => {
                info!("vehicle armed");
                ToolResponse::ok("vehicle armed").with_result(result)
            }
            Err(e) => ToolResponse::failure(&e),
        }
    }

    /// Disarms the motors
    pub async fn disarm(&self) -> ToolResponse<()> {
        match self.arm_disarm(false).await {
            Ok(result) => {
                info!("vehicle disarmed");
                ToolResponse::ok("vehicle disarmed").with_result(result)
            }
            Err(e) => ToolResponse::failure(&e),
        }
    }

    /// Climbs to the requested altitude, switching to guided mode and
    /// arming first when the last heartbeat shows either is needed
    pub async fn takeoff(&self, params: TakeoffParams) -> ToolResponse<()> {
        let altitude = params.altitude.unwrap_or(DEFAULT_TAKEOFF_ALTITUDE);
        let (min, max) = TAKEOFF_ALTITUDE_RANGE;
        // Validate before any frame goes out
        if !(min..=max).contains(&altitude) || !altitude.is_finite() {
            return ToolResponse::failure(&Error::invalid_parameter(format!(
                "takeoff altitude {} outside [{}, {}] metres",
                altitude, min, max
            )));
        }

        match self.takeoff_inner(altitude).await {
            Ok(result) => {
                info!(altitude, "takeoff started");
                ToolResponse::ok(format!("takeoff to {} m started", altitude)).with_result(result)
            }
            Err(e) => ToolResponse::failure(&e),
        }
    }

    /// Switches the flight mode
    pub async fn change_mode(&self, params: ModeParams) -> ToolResponse<()> {
        let mode: FlightMode = match params.mode.parse() {
            Ok(mode) => mode,
            Err(e) => return ToolResponse::failure(&e),
        };

        match self.set_mode(mode).await {
            Ok(result) => {
                info!(mode = %mode, "mode changed");
                ToolResponse::ok(format!("mode changed to {}", mode)).with_result(result)
            }
            Err(e) => ToolResponse::failure(&e),
        }
    }

    /// Reads arm state, mode, and battery health
    pub async fn get_status(&self) -> ToolResponse<VehicleStatus> {
        match self.telemetry.read_status(READ_TIMEOUT).await {
            Ok(status) => ToolResponse::ok("status read").with_data(status),
            Err(e) => ToolResponse::failure(&e),
        }
    }

    /// Reads the fused global position
    pub async fn get_position(&self) -> ToolResponse<VehiclePosition> {
        match self.telemetry.read_position(READ_TIMEOUT).await {
            Ok(position) => ToolResponse::ok("position read").with_data(position),
            Err(e) => ToolResponse::failure(&e),
        }
    }

    /// The connection manager underlying every operation
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    async fn arm_disarm(&self, arm: bool) -> Result<AckResult> {
        let param1 = if arm { 1.0 } else { 0.0 };
        self.correlator
            .send_command(
                MavCommand::ComponentArmDisarm,
                [param1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await
    }

    async fn set_mode(&self, mode: FlightMode) -> Result<AckResult> {
        // param1 = custom-mode-enabled base flag, param2 = mode number
        self.correlator
            .send_command(
                MavCommand::DoSetMode,
                [1.0, mode.custom_mode() as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await
    }

    async fn takeoff_inner(&self, altitude: f64) -> Result<AckResult> {
        let snapshot = self.manager.last_heartbeat();
        let current_mode = snapshot
            .as_ref()
            .and_then(|hb| FlightMode::from_custom_mode(hb.custom_mode));
        if current_mode != Some(FlightMode::Guided) {
            self.set_mode(FlightMode::Guided).await?;
        }

        // The autopilot denies NAV_TAKEOFF while disarmed
        if !snapshot.is_some_and(|hb| hb.armed()) {
            self.arm_disarm(true).await?;
        }

        self.correlator
            .send_command(
                MavCommand::NavTakeoff,
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude as f32],
                TAKEOFF_TIMEOUT,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Endpoint, SessionConfig, TransportKind};
    use crate::protocol::{Frame, FrameCodec};
    use bytes::BytesMut;
    use tokio::net::UdpSocket;
    use tokio::task::JoinHandle;
    use tokio_util::codec::{Decoder, Encoder};

    fn test_config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_millis(100),
            ..SessionConfig::default()
        }
    }

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    async fn connected_ops() -> (UdpSocket, VehicleOps) {
        let vehicle = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = vehicle.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port, TransportKind::Udp);
        let manager = Arc::new(ConnectionManager::new(endpoint, test_config()));
        manager.connect().await.unwrap();
        (vehicle, VehicleOps::new(manager))
    }

    /// Acks every command it sees; stops after `count` acks
    fn spawn_agreeable_vehicle(vehicle: UdpSocket, count: usize) -> JoinHandle<Vec<u16>> {
        tokio::spawn(async move {
            let mut codec = FrameCodec::new();
            let mut raw = [0u8; 2048];
            let mut seen = Vec::new();
            while seen.len() < count {
                let (n, from) = vehicle.recv_from(&mut raw).await.unwrap();
                let mut buf = BytesMut::from(&raw[..n]);
                while let Ok(Some(frame)) = codec.decode(&mut buf) {
                    if let Frame::CommandLong { command, .. } = frame {
                        seen.push(command);
                        let ack = Frame::CommandAck {
                            command,
                            result: AckResult::Accepted,
                        };
                        vehicle.send_to(&encode(ack), from).await.unwrap();
                    }
                }
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_arm_succeeds_on_accepted_ack() {
        let (vehicle, ops) = connected_ops().await;
        let responder = spawn_agreeable_vehicle(vehicle, 1);

        let response = ops.arm().await;
        assert!(response.success);
        assert_eq!(response.result, Some(AckResult::Accepted));

        let seen = responder.await.unwrap();
        assert_eq!(seen, vec![400]);
        ops.manager().disconnect().await;
    }

    #[tokio::test]
    async fn test_takeoff_issues_mode_change_arm_then_takeoff() {
        let (vehicle, ops) = connected_ops().await;
        let responder = spawn_agreeable_vehicle(vehicle, 3);

        let response = ops.takeoff(TakeoffParams { altitude: Some(25.0) }).await;
        assert!(response.success, "takeoff failed: {}", response.message);

        // DO_SET_MODE, COMPONENT_ARM_DISARM, NAV_TAKEOFF in that order
        let seen = responder.await.unwrap();
        assert_eq!(seen, vec![176, 400, 22]);
        ops.manager().disconnect().await;
    }

    #[tokio::test]
    async fn test_takeoff_skips_mode_and_arm_when_already_armed_guided() {
        let (vehicle, ops) = connected_ops().await;

        // Learn the ground-station address from its first heartbeat, then
        // report an armed guided vehicle so the snapshot reflects it
        let mut raw = [0u8; 2048];
        let (_, gcs) = vehicle.recv_from(&mut raw).await.unwrap();
        let heartbeat = Frame::Heartbeat {
            vehicle_type: 2,
            autopilot_type: 3,
            base_mode: crate::core::types::BASE_MODE_ARMED,
            custom_mode: FlightMode::Guided.custom_mode(),
            system_status: 4,
            protocol_version: 3,
        };
        vehicle.send_to(&encode(heartbeat), gcs).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while ops.manager().last_heartbeat().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let responder = spawn_agreeable_vehicle(vehicle, 1);
        let response = ops.takeoff(TakeoffParams { altitude: Some(15.0) }).await;
        assert!(response.success, "takeoff failed: {}", response.message);

        let seen = responder.await.unwrap();
        assert_eq!(seen, vec![22]);
        ops.manager().disconnect().await;
    }

    #[tokio::test]
    async fn test_takeoff_altitude_bounds_send_nothing() {
        let (vehicle, ops) = connected_ops().await;

        for altitude in [0.0, 101.0] {
            let response = ops
                .takeoff(TakeoffParams {
                    altitude: Some(altitude),
                })
                .await;
            assert!(!response.success);
            assert!(response.message.contains("Invalid parameter"));
        }

        // Only heartbeats on the wire, no command frames
        let mut codec = FrameCodec::new();
        let mut raw = [0u8; 2048];
        let deadline = tokio::time::Instant::now() + Duration::from_millis(250);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, vehicle.recv_from(&mut raw)).await {
                Ok(Ok((n, _))) => {
                    let mut buf = BytesMut::from(&raw[..n]);
                    while let Ok(Some(frame)) = codec.decode(&mut buf) {
                        assert!(
                            !matches!(frame, Frame::CommandLong { .. }),
                            "rejected takeoff still sent a command"
                        );
                    }
                }
                _ => break,
            }
        }
        ops.manager().disconnect().await;
    }

    #[tokio::test]
    async fn test_takeoff_default_altitude() {
        let (vehicle, ops) = connected_ops().await;
        let _responder = spawn_agreeable_vehicle(vehicle, 3);

        let response = ops.takeoff(TakeoffParams::default()).await;
        assert!(response.success);
        assert!(response.message.contains("10"));
        ops.manager().disconnect().await;
    }

    #[tokio::test]
    async fn test_change_mode_rejects_unknown_mode() {
        let (_vehicle, ops) = connected_ops().await;

        let response = ops
            .change_mode(ModeParams {
                mode: "WARP".to_string(),
            })
            .await;
        assert!(!response.success);
        assert!(response.message.contains("unknown flight mode"));
        ops.manager().disconnect().await;
    }

    #[tokio::test]
    async fn test_change_mode_sends_set_mode() {
        let (vehicle, ops) = connected_ops().await;
        let responder = spawn_agreeable_vehicle(vehicle, 1);

        let response = ops
            .change_mode(ModeParams {
                mode: "land".to_string(),
            })
            .await;
        assert!(response.success);
        assert!(response.message.contains("LAND"));

        let seen = responder.await.unwrap();
        assert_eq!(seen, vec![176]);
        ops.manager().disconnect().await;
    }

    #[tokio::test]
    async fn test_operations_translate_errors_to_failure() {
        // Manager never connected: every operation must answer, not raise
        let vehicle = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = vehicle.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port, TransportKind::Udp);
        let manager = Arc::new(ConnectionManager::new(endpoint, test_config()));
        let ops = VehicleOps::new(manager);

        let response = ops.arm().await;
        assert!(!response.success);
        assert!(response.message.contains("Connection lost"));
    }

    #[tokio::test]
    async fn test_tool_response_serialization() {
        let response: ToolResponse<()> = ToolResponse::ok("vehicle armed")
            .with_result(AckResult::Accepted);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["result"], "Accepted");
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn test_tool_response_flattens_payload_fields() {
        let response = ToolResponse::ok("status read").with_data(VehicleStatus {
            armed: true,
            mode: Some("GUIDED".to_string()),
            system_status: 4,
            battery_voltage_mv: Some(12_600),
            battery_remaining_pct: Some(88),
        });
        let json = serde_json::to_value(&response).unwrap();
        // Payload fields sit beside success/message, never under "data"
        assert_eq!(json["success"], true);
        assert_eq!(json["armed"], true);
        assert_eq!(json["mode"], "GUIDED");
        assert_eq!(json["battery_voltage_mv"], 12_600);
        assert!(json.get("data").is_none());
    }
}
