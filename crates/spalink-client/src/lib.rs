/*!
 * spalink client
 *
 * Session layer for in.touch spa controllers: the connection state
 * machine, the retry-request engine, the keepalive monitor and the
 * typed structure store, all over a pluggable datagram transport.
 */

#![warn(missing_docs)]

pub mod accessor;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod exchange;
pub mod keepalive;
pub mod message;
pub mod session;
pub mod structure;
pub mod transport;
pub mod udp;

pub use descriptor::SpaDescriptor;
pub use error::{Error, Result};
pub use event::SessionEvent;
pub use session::{SessionConfig, SessionState, SpaSession};
pub use transport::{ChannelTransport, DeviceEndpoint, Transport};

/// spalink client crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
