//! Link management: transports, the shared pool, and the connection manager
//!
//! This module owns the physical side of the vehicle link: opening sockets,
//! sustaining a session with heartbeats, and fanning inbound frames out.

mod connection;
mod pool;
mod transport;

pub use self::connection::{
    ConnectionManager, EventSubscription, FrameSubscription, LinkEvent,
};
pub use self::pool::TransportPool;
pub use self::transport::LinkTransport;
