/*!
 * Datagram transport abstraction.
 *
 * The connection engine only needs fire-and-forget sends, an inbound
 * message stream, and the shared per-session sequence counter; everything
 * socket-shaped hides behind the [`Transport`] trait. Two implementations
 * ship with the crate: [`crate::udp::UdpTransport`] for real devices and
 * [`ChannelTransport`] for tests and simulations.
 */
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::Message;

/// Datagram transport used by a spa session
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Open the transport
    async fn open(&self) -> Result<()>;

    /// Close the transport; pending and later `recv` calls resolve to `None`
    async fn close(&self) -> Result<()>;

    /// Whether the transport is open
    fn is_open(&self) -> bool;

    /// Queue a fire-and-forget datagram to the destination
    async fn send(&self, message: Message, destination: SocketAddr) -> Result<()>;

    /// Receive the next inbound message with its sender address;
    /// `None` once the transport is closed
    async fn recv(&self) -> Option<(Message, SocketAddr)>;

    /// Get and increment the sequence counter shared by every exchange
    /// in the session (wraps at the u8 bound)
    fn next_sequence(&self) -> u8;
}

/// In-memory transport connected to a [`DeviceEndpoint`].
///
/// Messages sent through the transport arrive at the endpoint and vice
/// versa. Used by the integration tests and the simulated-spa example.
#[derive(Debug)]
pub struct ChannelTransport {
    open: AtomicBool,
    sequence: AtomicU8,
    to_device: mpsc::UnboundedSender<(Message, SocketAddr)>,
    from_device: Mutex<mpsc::UnboundedReceiver<(Message, SocketAddr)>>,
    closed: watch::Sender<bool>,
}

/// The device side of a [`ChannelTransport`] pair
#[derive(Debug)]
pub struct DeviceEndpoint {
    address: SocketAddr,
    incoming: mpsc::UnboundedReceiver<(Message, SocketAddr)>,
    outgoing: mpsc::UnboundedSender<(Message, SocketAddr)>,
}

impl ChannelTransport {
    /// Create a connected transport/endpoint pair; `device_address` is
    /// the sender address the endpoint stamps on its messages
    pub fn pair(device_address: SocketAddr) -> (Self, DeviceEndpoint) {
        let (to_device, device_incoming) = mpsc::unbounded_channel();
        let (device_outgoing, from_device) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        (
            Self {
                open: AtomicBool::new(false),
                sequence: AtomicU8::new(1),
                to_device,
                from_device: Mutex::new(from_device),
                closed,
            },
            DeviceEndpoint {
                address: device_address,
                incoming: device_incoming,
                outgoing: device_outgoing,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.closed.send(true);
        debug!("Channel transport closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if !self.is_open() {
            return Err(Error::transport("transport is closed"));
        }
        self.to_device
            .send((message, destination))
            .map_err(|_| Error::transport("device endpoint dropped"))
    }

    async fn recv(&self) -> Option<(Message, SocketAddr)> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return None;
        }
        let mut from_device = self.from_device.lock().await;
        tokio::select! {
            received = from_device.recv() => received,
            _ = closed.changed() => None,
        }
    }

    fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

impl DeviceEndpoint {
    /// The address this endpoint stamps on outgoing messages
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Receive the next message the client sent; `None` when the
    /// transport has been dropped
    pub async fn recv(&mut self) -> Option<(Message, SocketAddr)> {
        self.incoming.recv().await
    }

    /// Send a message to the client as if it came from the device
    pub fn send(&self, message: Message) -> bool {
        self.outgoing.send((message, self.address)).is_ok()
    }

    /// Clone the device-to-client sender, e.g. to push unsolicited
    /// partial updates from another task
    pub fn sender(&self) -> mpsc::UnboundedSender<(Message, SocketAddr)> {
        self.outgoing.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn address() -> SocketAddr {
        "10.0.0.5:10022".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let (transport, _endpoint) = ChannelTransport::pair(address());
        let result = transport
            .send(Message::Ping { seq: 1 }, address())
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));

        transport.open().await.unwrap();
        transport
            .send(Message::Ping { seq: 1 }, address())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (transport, mut endpoint) = ChannelTransport::pair(address());
        transport.open().await.unwrap();

        transport
            .send(
                Message::Hello {
                    client_identifier: Bytes::from_static(b"CLIENT01"),
                },
                address(),
            )
            .await
            .unwrap();
        let (received, _) = endpoint.recv().await.unwrap();
        assert!(matches!(received, Message::Hello { .. }));

        assert!(endpoint.send(Message::PingResponse { seq: 1 }));
        let (received, sender) = transport.recv().await.unwrap();
        assert_eq!(received, Message::PingResponse { seq: 1 });
        assert_eq!(sender, address());
    }

    #[tokio::test]
    async fn test_recv_resolves_none_on_close() {
        let (transport, _endpoint) = ChannelTransport::pair(address());
        transport.open().await.unwrap();

        let pending = {
            let transport = &transport;
            tokio::time::timeout(std::time::Duration::from_millis(200), async move {
                tokio::join!(transport.recv(), async {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    transport.close().await.unwrap();
                })
            })
            .await
        };
        let (received, _) = pending.expect("recv should resolve once closed");
        assert!(received.is_none());
        assert!(!transport.is_open());

        // A recv issued after close resolves immediately
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sequence_counter_wraps() {
        let (transport, _endpoint) = ChannelTransport::pair(address());
        assert_eq!(transport.next_sequence(), 1);
        assert_eq!(transport.next_sequence(), 2);
        for _ in 0..253 {
            transport.next_sequence();
        }
        assert_eq!(transport.next_sequence(), 0);
        assert_eq!(transport.next_sequence(), 1);
    }
}
