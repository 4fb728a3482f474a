/*!
 * Session event types, published on a broadcast channel so any number
 * of observers can follow connection progress and live value changes.
 */
use serde::Serialize;

use spalink_core::types::Value;

use crate::session::SessionState;

/// Events published by a [`crate::session::SpaSession`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    /// The connection state machine moved to a new state
    StateChanged {
        /// The state being left
        old: SessionState,
        /// The state entered
        new: SessionState,
    },
    /// The device stopped answering keepalive pings
    LivenessLost,
    /// The device resumed answering keepalive pings
    LivenessRestored,
    /// A device-initiated update changed a decoded field value
    ValueChanged {
        /// The field that changed
        name: String,
        /// Decoded value before the update
        old: Value,
        /// Decoded value after the update
        new: Value,
    },
}
