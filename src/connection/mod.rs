//! Device connection
//!
//! A persistent WebSocket link to the spool station with heartbeat
//! liveness detection, fixed-delay reconnect and `type`-keyed message
//! dispatch.

mod backoff;
mod handlers;
mod manager;
mod state;
mod transport;

pub use backoff::ReconnectPolicy;
pub use handlers::{Dispatch, HandlerRegistry};
pub use manager::{ConnectionManager, LinkEvent, ManagerConfig};
pub use state::ConnectionState;
