/*!
 * Keepalive monitor.
 *
 * Pings the device on a fixed interval and watches the gap since the
 * last ping response. Once the gap passes the configured threshold the
 * device is reported unresponsive through the session event channel;
 * the monitor keeps pinging and reports recovery the same way. It never
 * tears down or re-establishes the connection.
 */
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use spalink_core::config::ProtocolConfig;

use crate::event::SessionEvent;
use crate::transport::Transport;

/// Tunables for the keepalive monitor
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Interval between pings
    pub ping_interval: Duration,
    /// Gap since the last ping response after which the device is
    /// reported unresponsive
    pub not_responding_after: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(2),
            not_responding_after: Duration::from_secs(10),
        }
    }
}

impl From<&ProtocolConfig> for KeepaliveConfig {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            not_responding_after: Duration::from_secs(config.not_responding_secs),
        }
    }
}

/// Periodic ping task reporting liveness transitions
#[derive(Debug)]
pub struct KeepaliveMonitor {
    transport: Arc<dyn Transport>,
    destination: SocketAddr,
    last_response: Arc<RwLock<Instant>>,
    responding: Arc<AtomicBool>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: watch::Receiver<bool>,
    config: KeepaliveConfig,
}

impl KeepaliveMonitor {
    /// Create a monitor. `last_response` is stamped by the session's
    /// dispatch loop whenever a ping response arrives.
    pub fn new(
        transport: Arc<dyn Transport>,
        destination: SocketAddr,
        last_response: Arc<RwLock<Instant>>,
        responding: Arc<AtomicBool>,
        events: broadcast::Sender<SessionEvent>,
        shutdown: watch::Receiver<bool>,
        config: KeepaliveConfig,
    ) -> Self {
        Self {
            transport,
            destination,
            last_response,
            responding,
            events,
            shutdown,
            config,
        }
    }

    /// Spawn the ping loop
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        debug!("Ping task started");
        while self.transport.is_open() {
            let seq = self.transport.next_sequence();
            if let Err(e) = self
                .transport
                .send(crate::message::Message::Ping { seq }, self.destination)
                .await
            {
                debug!("Ping send failed: {}", e);
            }

            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = sleep(self.config.ping_interval) => {}
            }

            let gap = self.last_response.read().unwrap().elapsed();
            if gap > self.config.not_responding_after {
                if self.responding.swap(false, Ordering::SeqCst) {
                    warn!("Spa has not answered pings for {:?}", gap);
                    let _ = self.events.send(SessionEvent::LivenessLost);
                }
            } else if !self.responding.swap(true, Ordering::SeqCst) {
                info!("Spa is answering pings again");
                let _ = self.events.send(SessionEvent::LivenessRestored);
            }
        }
        debug!("Ping task finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::transport::{ChannelTransport, DeviceEndpoint};

    fn address() -> SocketAddr {
        "10.0.0.5:10022".parse().unwrap()
    }

    struct Harness {
        endpoint: DeviceEndpoint,
        transport: Arc<ChannelTransport>,
        last_response: Arc<RwLock<Instant>>,
        events: broadcast::Receiver<SessionEvent>,
        _shutdown: watch::Sender<bool>,
    }

    async fn start(config: KeepaliveConfig) -> Harness {
        let (transport, endpoint) = ChannelTransport::pair(address());
        let transport = Arc::new(transport);
        transport.open().await.unwrap();
        let last_response = Arc::new(RwLock::new(Instant::now()));
        let (events_tx, events) = broadcast::channel(16);
        let (shutdown_tx, shutdown) = watch::channel(false);
        KeepaliveMonitor::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            address(),
            Arc::clone(&last_response),
            Arc::new(AtomicBool::new(true)),
            events_tx,
            shutdown,
            config,
        )
        .spawn();
        Harness {
            endpoint,
            transport,
            last_response,
            events,
            _shutdown: shutdown_tx,
        }
    }

    #[tokio::test]
    async fn test_reports_liveness_lost_then_restored() {
        let mut harness = start(KeepaliveConfig {
            ping_interval: Duration::from_millis(10),
            not_responding_after: Duration::from_millis(40),
        })
        .await;

        // Drain pings without answering until liveness is reported lost
        let event = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                tokio::select! {
                    received = harness.endpoint.recv() => {
                        assert!(matches!(received, Some((Message::Ping { .. }, _))));
                    }
                    event = harness.events.recv() => break event.unwrap(),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, SessionEvent::LivenessLost);

        // A fresh response stamp brings it back
        *harness.last_response.write().unwrap() = Instant::now();
        let event = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                tokio::select! {
                    received = harness.endpoint.recv() => {
                        assert!(received.is_some());
                    }
                    event = harness.events.recv() => break event.unwrap(),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, SessionEvent::LivenessRestored);

        harness.transport.close().await.unwrap();
    }
}
