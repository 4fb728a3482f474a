/*!
 * UDP implementation of the [`Transport`] trait.
 *
 * Owns a bound socket and a background receive loop that decodes
 * datagrams through the session's [`MessageCodec`]. Datagrams that fail
 * to decode are logged and dropped; they never stall the session.
 */
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{Message, MessageCodec};
use crate::transport::Transport;

const MAX_DATAGRAM_SIZE: usize = 1500;

/// UDP transport for talking to a real spa controller
#[derive(Debug)]
pub struct UdpTransport {
    codec: Arc<dyn MessageCodec>,
    bind_address: SocketAddr,
    open: AtomicBool,
    sequence: AtomicU8,
    socket: StdRwLock<Option<Arc<UdpSocket>>>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<(Message, SocketAddr)>>>,
    receive_task: StdRwLock<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Create a transport that will bind to `bind_address` when opened.
    /// Use `0.0.0.0:0` to let the OS pick an ephemeral port.
    pub fn new(codec: Arc<dyn MessageCodec>, bind_address: SocketAddr) -> Self {
        Self {
            codec,
            bind_address,
            open: AtomicBool::new(false),
            sequence: AtomicU8::new(1),
            socket: StdRwLock::new(None),
            incoming: Mutex::new(None),
            receive_task: StdRwLock::new(None),
        }
    }

    /// The locally bound address, once open
    pub fn local_address(&self) -> Result<SocketAddr> {
        let guard = self.socket.read().unwrap();
        let socket = guard
            .as_ref()
            .ok_or_else(|| Error::transport("transport is closed"))?;
        socket.local_addr().map_err(Error::from)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn open(&self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let socket = Arc::new(UdpSocket::bind(self.bind_address).await?);
        debug!("UDP transport bound to {}", socket.local_addr()?);

        let (tx, rx) = mpsc::unbounded_channel();
        let receive_socket = Arc::clone(&socket);
        let codec = Arc::clone(&self.codec);
        let task = tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                match receive_socket.recv_from(&mut buffer).await {
                    Ok((length, sender)) => match codec.decode(&buffer[..length]) {
                        Ok(message) => {
                            if tx.send((message, sender)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("Dropped undecodable datagram from {}: {}", sender, e);
                        }
                    },
                    Err(e) => {
                        debug!("UDP receive loop ending: {}", e);
                        break;
                    }
                }
            }
        });

        *self.socket.write().unwrap() = Some(socket);
        *self.incoming.lock().await = Some(rx);
        *self.receive_task.write().unwrap() = Some(task);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        if let Some(task) = self.receive_task.write().unwrap().take() {
            task.abort();
        }
        self.socket.write().unwrap().take();
        debug!("UDP transport closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, message: Message, destination: SocketAddr) -> Result<()> {
        let socket = {
            let guard = self.socket.read().unwrap();
            guard
                .as_ref()
                .cloned()
                .ok_or_else(|| Error::transport("transport is closed"))?
        };
        let datagram = self.codec.encode(&message)?;
        socket.send_to(&datagram, destination).await?;
        Ok(())
    }

    async fn recv(&self) -> Option<(Message, SocketAddr)> {
        let mut guard = self.incoming.lock().await;
        match guard.as_mut() {
            // Receiver resolves to None once the receive task is gone
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}
