//! Device protocol
//!
//! JSON text frames over a single WebSocket, one object per frame,
//! discriminated by a string `type` field. No versioning, no framing
//! beyond the WebSocket message itself.

mod messages;

pub use messages::*;
