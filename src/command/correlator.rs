use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{Error, Result, TARGET_COMPONENT_ID, TARGET_SYSTEM_ID};
use crate::link::ConnectionManager;
use crate::protocol::{AckResult, Frame, MavCommand};

/// Default acknowledgment timeout for arm/disarm/mode-change commands
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Acknowledgment timeout for takeoff, which the autopilot acks late
pub const TAKEOFF_TIMEOUT: Duration = Duration::from_secs(15);

/// How a pending wait was resolved
enum Outcome {
    /// Matching acknowledgment arrived
    Ack(AckResult),
    /// Caller gave up via cancel()
    Cancelled,
}

/// One in-flight command wait; at most one per command id
struct PendingCommand {
    created_at: Instant,
    resolver: oneshot::Sender<Outcome>,
}

/// Pairs each sent command with its asynchronous acknowledgment.
///
/// Layered on the connection manager's frame stream: one dispatch task
/// watches for acknowledgment frames and resolves the matching entry in an
/// explicit pending table. Each wait ends in exactly one of ack-match,
/// timeout, or cancel; whichever fires first removes the table entry and the
/// others find nothing to resolve. The correlator never retries; retry policy
/// belongs to the caller.
pub struct CommandCorrelator {
    manager: Arc<ConnectionManager>,
    pending: Arc<StdMutex<HashMap<u16, PendingCommand>>>,
    subscription_id: u64,
    dispatch: JoinHandle<()>,
}

impl CommandCorrelator {
    /// Creates a correlator and starts its ack dispatch task
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        let pending: Arc<StdMutex<HashMap<u16, PendingCommand>>> =
            Arc::new(StdMutex::new(HashMap::new()));

        let mut subscription = manager.subscribe_frames();
        let subscription_id = subscription.id;
        let table = Arc::clone(&pending);
        let dispatch = tokio::spawn(async move {
            while let Some(frame) = subscription.rx.recv().await {
                if let Frame::CommandAck { command, result } = frame {
                    let entry = table.lock().unwrap().remove(&command);
                    match entry {
                        Some(pending) => {
                            debug!(command, result = %result, "acknowledgment matched");
                            // The waiter may have timed out already; nothing
                            // left to do then
                            let _ = pending.resolver.send(Outcome::Ack(result));
                        }
                        None => {
                            debug!(command, "unsolicited acknowledgment, ignoring");
                        }
                    }
                }
            }
        });

        CommandCorrelator {
            manager,
            pending,
            subscription_id,
            dispatch,
        }
    }

    /// Sends a command and waits for its acknowledgment under `timeout`.
    ///
    /// Send failures (ConnectionLost, socket errors) propagate unchanged and
    /// leave the table clean. A non-Accepted result code is a CommandRejected
    /// error; no acknowledgment within the timeout is a CommandTimeout.
    pub async fn send_command(
        &self,
        command: MavCommand,
        params: [f32; 7],
        timeout: Duration,
    ) -> Result<AckResult> {
        let command_id = command.id();
        let rx = self.register(command_id)?;

        let frame = Frame::command(TARGET_SYSTEM_ID, TARGET_COMPONENT_ID, command, params);
        if let Err(e) = self.manager.send_frame(frame).await {
            self.pending.lock().unwrap().remove(&command_id);
            return Err(e);
        }

        let started = Instant::now();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Outcome::Ack(result))) => {
                if result.is_accepted() {
                    Ok(result)
                } else {
                    Err(Error::command_rejected(command_id, result.to_string()))
                }
            }
            Ok(Ok(Outcome::Cancelled)) => Err(Error::CommandCancelled {
                command: command_id,
            }),
            Ok(Err(_)) => {
                // Dispatch task gone; should not happen while the manager lives
                self.pending.lock().unwrap().remove(&command_id);
                Err(Error::protocol("acknowledgment dispatch stopped"))
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(&command_id);
                let elapsed = started.elapsed();
                warn!(command = command_id, ?elapsed, "no acknowledgment");
                Err(Error::command_timeout(command_id, elapsed))
            }
        }
    }

    /// Cancels the pending wait for `command`, resolving the waiter with
    /// CommandCancelled. Clears the table entry; true when a wait existed.
    pub fn cancel(&self, command: MavCommand) -> bool {
        match self.pending.lock().unwrap().remove(&command.id()) {
            Some(pending) => {
                let _ = pending.resolver.send(Outcome::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Number of commands currently awaiting acknowledgment
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Age of the oldest pending wait, if any
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .map(|p| p.created_at.elapsed())
            .max()
    }

    /// The connection manager this correlator is layered on
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    fn register(&self, command_id: u16) -> Result<oneshot::Receiver<Outcome>> {
        let mut table = self.pending.lock().unwrap();
        if table.contains_key(&command_id) {
            return Err(Error::invalid_parameter(format!(
                "command {} already in flight",
                command_id
            )));
        }
        let (tx, rx) = oneshot::channel();
        table.insert(
            command_id,
            PendingCommand {
                created_at: Instant::now(),
                resolver: tx,
            },
        );
        Ok(rx)
    }
}

impl Drop for CommandCorrelator {
    fn drop(&mut self) {
        self.dispatch.abort();
        self.manager.unsubscribe(self.subscription_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Endpoint, SessionConfig, TransportKind};
    use crate::protocol::FrameCodec;
    use bytes::BytesMut;
    use tokio::net::UdpSocket;
    use tokio_util::codec::{Decoder, Encoder};

    fn test_config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_millis(500),
            ..SessionConfig::default()
        }
    }

    async fn connected_pair() -> (UdpSocket, Arc<ConnectionManager>) {
        let vehicle = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = vehicle.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port, TransportKind::Udp);
        let manager = Arc::new(ConnectionManager::new(endpoint, test_config()));
        manager.connect().await.unwrap();
        (vehicle, manager)
    }

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    /// Answers the first matching command with the given result after a delay
    fn spawn_acking_vehicle(
        vehicle: UdpSocket,
        result: AckResult,
        delay: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut codec = FrameCodec::new();
            let mut raw = [0u8; 2048];
            loop {
                let (n, from) = vehicle.recv_from(&mut raw).await.unwrap();
                let mut buf = BytesMut::from(&raw[..n]);
                while let Ok(Some(frame)) = codec.decode(&mut buf) {
                    if let Frame::CommandLong { command, .. } = frame {
                        tokio::time::sleep(delay).await;
                        let ack = Frame::CommandAck { command, result };
                        vehicle.send_to(&encode(ack), from).await.unwrap();
                        return;
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_ack_resolves_command() {
        // Scenario A: accepted ack arrives 50 ms after the send
        let (vehicle, manager) = connected_pair().await;
        let responder =
            spawn_acking_vehicle(vehicle, AckResult::Accepted, Duration::from_millis(50));

        let correlator = CommandCorrelator::new(Arc::clone(&manager));
        let result = correlator
            .send_command(
                MavCommand::ComponentArmDisarm,
                [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await
            .unwrap();

        assert_eq!(result, AckResult::Accepted);
        assert_eq!(correlator.pending_len(), 0);
        responder.await.unwrap();
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_missing_ack_times_out() {
        // Scenario B: no ack ever arrives
        let (_vehicle, manager) = connected_pair().await;
        let correlator = CommandCorrelator::new(Arc::clone(&manager));

        let started = Instant::now();
        let err = correlator
            .send_command(MavCommand::NavTakeoff, [0.0; 7], Duration::from_millis(200))
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert!(matches!(err, Error::CommandTimeout { command: 22, .. }));
        assert!(elapsed >= Duration::from_millis(180), "returned too early");
        assert!(elapsed < Duration::from_millis(800), "returned too late");
        assert_eq!(correlator.pending_len(), 0);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_rejected_ack_is_an_error() {
        let (vehicle, manager) = connected_pair().await;
        let responder =
            spawn_acking_vehicle(vehicle, AckResult::Denied, Duration::from_millis(10));

        let correlator = CommandCorrelator::new(Arc::clone(&manager));
        let err = correlator
            .send_command(
                MavCommand::ComponentArmDisarm,
                [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CommandRejected { command: 400, .. }));
        assert_eq!(correlator.pending_len(), 0);
        responder.await.unwrap();
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_cancel_resolves_the_wait() {
        let (_vehicle, manager) = connected_pair().await;
        let correlator = Arc::new(CommandCorrelator::new(Arc::clone(&manager)));

        let waiter = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator
                    .send_command(MavCommand::DoSetMode, [0.0; 7], Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(correlator.cancel(MavCommand::DoSetMode));

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::CommandCancelled { command: 176 }));
        assert_eq!(correlator.pending_len(), 0);
        assert!(!correlator.cancel(MavCommand::DoSetMode));
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_command_is_rejected() {
        let (_vehicle, manager) = connected_pair().await;
        let correlator = Arc::new(CommandCorrelator::new(Arc::clone(&manager)));

        let waiter = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator
                    .send_command(MavCommand::NavTakeoff, [0.0; 7], Duration::from_secs(2))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let err = correlator
            .send_command(MavCommand::NavTakeoff, [0.0; 7], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        correlator.cancel(MavCommand::NavTakeoff);
        let _ = waiter.await.unwrap();
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_failure_leaves_table_clean() {
        let vehicle = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = vehicle.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port, TransportKind::Udp);
        let manager = Arc::new(ConnectionManager::new(endpoint, test_config()));
        // Never connected
        let correlator = CommandCorrelator::new(Arc::clone(&manager));

        let err = correlator
            .send_command(MavCommand::ComponentArmDisarm, [0.0; 7], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert_eq!(correlator.pending_len(), 0);
    }
}
