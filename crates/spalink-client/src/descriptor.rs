/*!
 * Spa descriptor.
 *
 * A descriptor is the immutable identity of a spa discovered on the
 * network: its identifier, a display name, the datagram destination, and
 * the client identifier this session will present to it.
 */
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use uuid::Uuid;

/// Identity of a discovered spa
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaDescriptor {
    /// Client identifier presented to the device (assigned per session)
    pub client_identifier: Bytes,
    /// Spa identifier as reported by the device
    pub identifier: Bytes,
    /// Display name of the spa
    pub name: String,
    /// Datagram destination for every exchange in this session
    pub destination: SocketAddr,
}

impl SpaDescriptor {
    /// Create a new descriptor
    pub fn new<S: Into<String>>(
        client_identifier: Bytes,
        identifier: Bytes,
        name: S,
        destination: SocketAddr,
    ) -> Self {
        Self {
            client_identifier,
            identifier,
            name: name.into(),
            destination,
        }
    }

    /// Generate a fresh client identifier for a new session
    pub fn generate_client_identifier() -> Bytes {
        Bytes::from(format!("IOS{}", Uuid::new_v4().simple()))
    }

    /// The spa identifier in textual form, for display and deduplication
    pub fn identifier_as_string(&self) -> String {
        String::from_utf8_lossy(&self.identifier).into_owned()
    }
}

impl fmt::Display for SpaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.identifier_as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_as_string() {
        let descriptor = SpaDescriptor::new(
            Bytes::from_static(b"CLIENT01"),
            Bytes::from_static(b"SPA0001"),
            "My Spa",
            "10.0.0.5:10022".parse().unwrap(),
        );
        assert_eq!(descriptor.identifier_as_string(), "SPA0001");
        assert_eq!(format!("{}", descriptor), "My Spa(SPA0001)");
    }

    #[test]
    fn test_generated_client_identifiers_are_unique() {
        let a = SpaDescriptor::generate_client_identifier();
        let b = SpaDescriptor::generate_client_identifier();
        assert_ne!(a, b);
        assert!(a.starts_with(b"IOS"));
    }
}
