//! Handler registry
//!
//! Maps a message `type` to the callbacks interested in it. Types with no
//! callback are ignored, which keeps the client forward-compatible with
//! newer device firmware.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::protocol::{InboundFrame, InboundMessage};

/// Callback for one message type
pub type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Result of routing one frame
#[derive(Debug)]
pub enum Dispatch {
    /// Delivered to this many callbacks
    Handled(usize),
    /// No callback for the type
    Unhandled,
    /// Registered type whose payload did not decode
    Rejected(Error),
}

/// `type` → callbacks, invoked in registration order
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for a message type
    pub fn on<F>(&mut self, kind: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.handlers
            .entry(kind.into())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    pub fn handles(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Decode the frame and invoke its callbacks.
    ///
    /// The payload is only decoded when someone listens for the type.
    pub fn dispatch(&self, frame: &InboundFrame) -> Dispatch {
        let Some(handlers) = self.handlers.get(&frame.kind) else {
            return Dispatch::Unhandled;
        };

        let message = match InboundMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => return Dispatch::Rejected(e),
        };

        for handler in handlers {
            handler(&message);
        }
        Dispatch::Handled(handlers.len())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{kinds, NfcTagStatus};
    use parking_lot::Mutex;

    fn frame(raw: &str) -> InboundFrame {
        InboundFrame::parse(raw).unwrap()
    }

    #[test]
    fn test_unknown_type_is_unhandled() {
        let mut registry = HandlerRegistry::new();
        registry.on(kinds::HEARTBEAT, |_| panic!("wrong handler"));

        let result = registry.dispatch(&frame(r#"{"type":"firmwareUpdate","payload":{}}"#));
        assert!(matches!(result, Dispatch::Unhandled));
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();

        let first = seen.clone();
        let second = seen.clone();
        registry
            .on(kinds::NFC_TAG, move |msg| {
                if let InboundMessage::NfcTag(status) = msg {
                    first.lock().push(("first", *status));
                }
            })
            .on(kinds::NFC_TAG, move |msg| {
                if let InboundMessage::NfcTag(status) = msg {
                    second.lock().push(("second", *status));
                }
            });

        let result = registry.dispatch(&frame(r#"{"type":"nfcTag","payload":{"found":1}}"#));
        assert!(matches!(result, Dispatch::Handled(2)));
        assert_eq!(
            *seen.lock(),
            vec![("first", NfcTagStatus::Present), ("second", NfcTagStatus::Present)]
        );
    }

    #[test]
    fn test_bad_payload_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.on(kinds::NFC_TAG, |_| panic!("must not run"));

        let result = registry.dispatch(&frame(r#"{"type":"nfcTag","payload":"nope"}"#));
        assert!(matches!(result, Dispatch::Rejected(_)));
    }

    #[test]
    fn test_custom_kind_receives_raw_frame() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let mut registry = HandlerRegistry::new();
        registry.on("spoolWeight", move |msg| {
            if let InboundMessage::Other(frame) = msg {
                *sink.lock() = frame.body.get("grams").cloned();
            }
        });

        registry.dispatch(&frame(r#"{"type":"spoolWeight","grams":812}"#));
        assert_eq!(*seen.lock(), Some(serde_json::json!(812)));
    }

    #[test]
    fn test_kinds_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.on("b", |_| {}).on("a", |_| {});
        assert_eq!(registry.kinds(), vec!["a", "b"]);
        assert!(registry.handles("a"));
        assert!(!registry.handles("c"));
    }
}
