use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use bytes::BytesMut;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

use super::pool::TransportPool;
use super::transport::LinkTransport;
use crate::core::{
    ConnectionState, Endpoint, Error, HeartbeatSnapshot, Result, SessionConfig,
};
use crate::protocol::{Frame, FrameCodec};

/// Capacity of each observer channel
const OBSERVER_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notifications published to event observers
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Link established
    Connected,
    /// Link torn down
    Disconnected,
    /// Vehicle heartbeat received
    Heartbeat(HeartbeatSnapshot),
    /// Classified error surfaced outside a caller's await
    Error(String),
}

/// Handle for one registered frame observer
pub struct FrameSubscription {
    /// Registration id, used to unsubscribe
    pub id: u64,
    /// Stream of every inbound frame, heartbeats included
    pub rx: mpsc::Receiver<Frame>,
}

/// Handle for one registered event observer
pub struct EventSubscription {
    /// Registration id, used to unsubscribe
    pub id: u64,
    /// Stream of lifecycle events
    pub rx: mpsc::Receiver<LinkEvent>,
}

/// Explicit observer registry; register/unregister instead of closures
#[derive(Default)]
struct ObserverTable {
    next_id: u64,
    frames: HashMap<u64, mpsc::Sender<Frame>>,
    events: HashMap<u64, mpsc::Sender<LinkEvent>>,
}

impl ObserverTable {
    fn publish_frame(&mut self, frame: &Frame) {
        self.frames.retain(|id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(observer = id, "frame observer falling behind, dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn publish_event(&mut self, event: &LinkEvent) {
        self.events.retain(|_, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Background tasks owned by one connected session
#[derive(Default)]
struct SessionTasks {
    heartbeat: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl SessionTasks {
    fn abort(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        if let Some(handle) = self.receiver.take() {
            handle.abort();
        }
    }
}

/// Owns one logical link to one vehicle endpoint.
///
/// Manages the connect/reconnect/disconnect lifecycle, emits the periodic
/// ground-station heartbeat while connected, and fans inbound frames out to
/// registered observers. Endpoint and session parameters are fixed at
/// construction; state transitions are serialized through the lifecycle lock
/// so no two transitions are ever in flight for the same instance.
pub struct ConnectionManager {
    endpoint: Endpoint,
    config: SessionConfig,
    /// Transport registry, possibly shared with other managers
    pool: Arc<TransportPool>,
    /// Serializes connect/disconnect/reconnect
    lifecycle: Mutex<SessionTasks>,
    state: Arc<StdMutex<ConnectionState>>,
    transport: Arc<StdMutex<Option<Arc<LinkTransport>>>>,
    /// Reconnect attempts so far; reset to 0 on success and on reconnect()
    attempts: Arc<AtomicU32>,
    snapshot: Arc<RwLock<Option<HeartbeatSnapshot>>>,
    observers: Arc<StdMutex<ObserverTable>>,
    /// Pool keys this manager acquired, released again by cleanup()
    acquired: StdMutex<HashSet<String>>,
}

impl ConnectionManager {
    /// Creates a manager with a private transport pool
    pub fn new(endpoint: Endpoint, config: SessionConfig) -> Self {
        Self::with_pool(endpoint, config, Arc::new(TransportPool::new()))
    }

    /// Creates a manager sharing an explicit transport pool
    pub fn with_pool(endpoint: Endpoint, config: SessionConfig, pool: Arc<TransportPool>) -> Self {
        ConnectionManager {
            endpoint,
            config,
            pool,
            lifecycle: Mutex::new(SessionTasks::default()),
            state: Arc::new(StdMutex::new(ConnectionState::Disconnected)),
            transport: Arc::new(StdMutex::new(None)),
            attempts: Arc::new(AtomicU32::new(0)),
            snapshot: Arc::new(RwLock::new(None)),
            observers: Arc::new(StdMutex::new(ObserverTable::default())),
            acquired: StdMutex::new(HashSet::new()),
        }
    }

    /// Establishes the link, driving the bounded retry loop itself.
    ///
    /// No-op when already connected. The attempt counter increments before
    /// each try; retries wait exactly the configured reconnect interval
    /// between attempts (linear, no jitter). Resolves once the link is up or
    /// with the terminal classified error after retries exhaust.
    pub async fn connect(&self) -> Result<()> {
        let mut tasks = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        // A fresh connect() after terminal failure restarts the budget
        if self.state() == ConnectionState::Failed {
            self.attempts.store(0, Ordering::SeqCst);
        }

        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.set_state(ConnectionState::Connecting);
            debug!(endpoint = %self.endpoint, attempt, "opening transport");

            match self.pool.acquire(&self.endpoint, self.config.timeout).await {
                Ok(transport) => {
                    self.acquired
                        .lock()
                        .unwrap()
                        .insert(self.endpoint.pool_key());
                    *self.transport.lock().unwrap() = Some(Arc::clone(&transport));
                    self.attempts.store(0, Ordering::SeqCst);
                    tasks.heartbeat = Some(self.spawn_heartbeat_task(Arc::clone(&transport)));
                    tasks.receiver = Some(self.spawn_receive_task(Arc::clone(&transport)));
                    self.set_state(ConnectionState::Connected);
                    self.publish_event(LinkEvent::Connected);
                    info!(endpoint = %self.endpoint, "connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, attempt, error = %e, "transport open failed");
                    self.publish_event(LinkEvent::Error(e.to_string()));

                    if !self.config.auto_reconnect {
                        self.set_state(ConnectionState::Failed);
                        return Err(e);
                    }
                    if attempt >= self.config.max_reconnect_attempts {
                        self.set_state(ConnectionState::Failed);
                        return Err(Error::connection_failed(format!(
                            "giving up on {} after {} attempts: {}",
                            self.endpoint, attempt, e
                        )));
                    }
                    self.set_state(ConnectionState::Reconnecting);
                    tokio::time::sleep(self.config.reconnect_interval).await;
                }
            }
        }
    }

    /// Resets the attempt counter and retries from scratch, unconditionally
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await;
        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        self.connect().await
    }

    /// Tears the session down. Idempotent; close errors are logged, never
    /// surfaced.
    ///
    /// Pool entries stay registered so a later `connect()` or `reconnect()`
    /// reuses the pooled transport; `cleanup()` is the call that releases
    /// them (shared-refcounted policy, see TransportPool).
    pub async fn disconnect(&self) {
        let mut tasks = self.lifecycle.lock().await;
        tasks.abort();

        let transport = self.transport.lock().unwrap().take();
        if let Some(transport) = transport {
            // Shared-refcounted policy: drop our reference, the socket closes
            // when the last holder does
            debug!(endpoint = %transport.endpoint(), "releasing transport reference");
        }

        let previous = {
            let mut state = self.state.lock().unwrap();
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        if previous != ConnectionState::Disconnected {
            self.publish_event(LinkEvent::Disconnected);
            info!(endpoint = %self.endpoint, "disconnected");
        }
    }

    /// Disconnects and releases every pool entry this manager acquired.
    /// Never fails; a second manager sharing a pooled transport keeps using
    /// it (shared-refcounted policy, see TransportPool).
    pub async fn cleanup(&self) {
        self.disconnect().await;
        let keys: Vec<String> = self.acquired.lock().unwrap().drain().collect();
        for key in keys {
            self.pool.release(&key).await;
        }
    }

    /// Encodes and sends one frame with the configured send timeout.
    ///
    /// Fails with ConnectionLost when not connected; a send that exceeds the
    /// timeout is a command-timeout-class error, a socket failure a
    /// connection-failed-class error.
    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(Error::connection_lost(format!(
                "cannot send while {}",
                self.state()
            )));
        }
        let transport = self
            .transport
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::connection_lost("no transport held"))?;

        let message_id = frame.message_id();
        let bytes = encode_frame(frame)?;
        match tokio::time::timeout(self.config.timeout, transport.send(&bytes)).await {
            Ok(result) => result,
            Err(_) => Err(Error::command_timeout(
                message_id as u16,
                self.config.timeout,
            )),
        }
    }

    /// Registers a frame observer; every inbound frame is delivered to it
    pub fn subscribe_frames(&self) -> FrameSubscription {
        let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        let mut observers = self.observers.lock().unwrap();
        let id = observers.next_id;
        observers.next_id += 1;
        observers.frames.insert(id, tx);
        FrameSubscription { id, rx }
    }

    /// Registers a lifecycle event observer
    pub fn subscribe_events(&self) -> EventSubscription {
        let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        let mut observers = self.observers.lock().unwrap();
        let id = observers.next_id;
        observers.next_id += 1;
        observers.events.insert(id, tx);
        EventSubscription { id, rx }
    }

    /// Unregisters an observer by id; true when a registration was removed
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut observers = self.observers.lock().unwrap();
        observers.frames.remove(&id).is_some() || observers.events.remove(&id).is_some()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Connected with a live transport and retry budget remaining
    pub fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Connected
            && self.transport.lock().unwrap().is_some()
            && self.attempts.load(Ordering::SeqCst) < self.config.max_reconnect_attempts
    }

    /// Last heartbeat observed from the vehicle, if any
    pub fn last_heartbeat(&self) -> Option<HeartbeatSnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Endpoint this manager targets
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Session parameters this manager was built with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock().unwrap() = next;
    }

    fn publish_event(&self, event: LinkEvent) {
        self.observers.lock().unwrap().publish_event(&event);
    }

    fn spawn_heartbeat_task(&self, transport: Arc<LinkTransport>) -> JoinHandle<()> {
        let interval = self.config.heartbeat_interval;
        let observers = Arc::clone(&self.observers);
        tokio::spawn(async move {
            // The outbound heartbeat is a fixed frame; encode it once
            let bytes = match encode_frame(Frame::gcs_heartbeat()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "failed to encode heartbeat");
                    return;
                }
            };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = transport.send(&bytes).await {
                    // A failed heartbeat is reported but does not tear the
                    // link down
                    let err = Error::heartbeat_timeout(e.to_string());
                    warn!(error = %err, "heartbeat send failed");
                    observers.lock().unwrap().publish_event(&LinkEvent::Error(err.to_string()));
                }
            }
        })
    }

    fn spawn_receive_task(&self, transport: Arc<LinkTransport>) -> JoinHandle<()> {
        let observers = Arc::clone(&self.observers);
        let snapshot = Arc::clone(&self.snapshot);
        tokio::spawn(async move {
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::with_capacity(8192);
            loop {
                match transport.recv(&mut buf).await {
                    Ok(_) => loop {
                        match codec.decode(&mut buf) {
                            Ok(Some(frame)) => {
                                dispatch_frame(&frame, &observers, &snapshot);
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(error = %e, "dropping undecodable input");
                                buf.clear();
                                break;
                            }
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "receive loop stopped");
                        observers
                            .lock()
                            .unwrap()
                            .publish_event(&LinkEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
        })
    }
}

/// Updates the heartbeat snapshot and fans the frame out to observers
fn dispatch_frame(
    frame: &Frame,
    observers: &Arc<StdMutex<ObserverTable>>,
    snapshot: &Arc<RwLock<Option<HeartbeatSnapshot>>>,
) {
    if let Frame::Heartbeat {
        vehicle_type,
        autopilot_type,
        base_mode,
        custom_mode,
        system_status,
        protocol_version,
    } = frame
    {
        let beat = HeartbeatSnapshot {
            vehicle_type: *vehicle_type,
            autopilot_type: *autopilot_type,
            base_mode: *base_mode,
            custom_mode: *custom_mode,
            system_status: *system_status,
            protocol_version: *protocol_version,
            received_at: Utc::now(),
        };
        *snapshot.write().unwrap() = Some(beat.clone());
        observers
            .lock()
            .unwrap()
            .publish_event(&LinkEvent::Heartbeat(beat));
    }

    // Every frame, heartbeats included, reaches the generic frame stream
    observers.lock().unwrap().publish_frame(frame);
}

fn encode_frame(frame: Frame) -> Result<BytesMut> {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf)?;
    Ok(buf)
}
