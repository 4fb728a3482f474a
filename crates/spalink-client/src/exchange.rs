/*!
 * Retry-request engine.
 *
 * Fire-and-forget transports lose datagrams, so every request/response
 * pair goes through [`ExchangeEngine::retry_request`]: the expected
 * response is registered in a pending table keyed by message kind and
 * sequence number, the request is re-sent on a fixed interval, and the
 * first matching inbound message completes the exchange. Completion is
 * exactly-once; a late duplicate finds no pending entry and is dropped.
 */
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, Instrument};

use spalink_core::config::ProtocolConfig;

use crate::error::{Error, Result};
use crate::message::{Message, MessageKind};
use crate::transport::Transport;

/// Matching key for a pending exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matcher {
    /// The message kind that completes the exchange
    pub kind: MessageKind,
    /// The sequence number that must match, if the kind carries one
    pub seq: Option<u8>,
}

impl Matcher {
    /// Build the matcher for the response to `request`, or `None` if the
    /// message has no request/response pairing
    pub fn response_to(request: &Message) -> Option<Self> {
        request.kind().response_kind().map(|kind| Self {
            kind,
            seq: request.sequence(),
        })
    }

    /// Whether an inbound message completes this exchange
    pub fn matches(&self, message: &Message) -> bool {
        message.kind() == self.kind && (self.seq.is_none() || message.sequence() == self.seq)
    }
}

/// Tunables for retry-governed exchanges
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Number of send attempts before the exchange fails
    pub attempts: u32,
    /// Wait between attempts
    pub interval: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_millis(1000),
        }
    }
}

impl From<&ProtocolConfig> for ExchangeConfig {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            interval: Duration::from_millis(config.retry_interval_ms),
        }
    }
}

#[derive(Debug)]
struct PendingExchange {
    id: u64,
    matcher: Matcher,
    completion: oneshot::Sender<Message>,
}

/// Pending-exchange table plus the retry loop driving it
#[derive(Debug)]
pub struct ExchangeEngine {
    transport: Arc<dyn Transport>,
    pending: Mutex<Vec<PendingExchange>>,
    next_id: AtomicU64,
    config: ExchangeConfig,
}

impl ExchangeEngine {
    /// Create an engine sending through `transport`
    pub fn new(transport: Arc<dyn Transport>, config: ExchangeConfig) -> Self {
        Self {
            transport,
            pending: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Register a pending exchange; the receiver resolves when a message
    /// matching `matcher` is dispatched
    pub fn register(&self, matcher: Matcher) -> (u64, oneshot::Receiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (completion, receiver) = oneshot::channel();
        self.pending.lock().unwrap().push(PendingExchange {
            id,
            matcher,
            completion,
        });
        (id, receiver)
    }

    /// Drop a pending exchange that will no longer be awaited
    pub fn deregister(&self, id: u64) {
        self.pending.lock().unwrap().retain(|p| p.id != id);
    }

    /// Number of registered exchanges still awaiting a response
    pub fn pending_exchanges(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Drop every pending exchange; their waiters fail immediately.
    /// Used when the session shuts down mid-exchange.
    pub fn cancel_all(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// Register the response matcher for `request` and transmit it once.
    /// The caller owns the wait; drop the receiver and deregister the id
    /// to abandon the exchange.
    pub async fn send(
        &self,
        request: Message,
        destination: SocketAddr,
    ) -> Result<(u64, oneshot::Receiver<Message>)> {
        let matcher = Matcher::response_to(&request)
            .ok_or_else(|| Error::other(format!("{:?} has no response", request.kind())))?;
        let (id, receiver) = self.register(matcher);
        if let Err(e) = self.transport.send(request, destination).await {
            self.deregister(id);
            return Err(e);
        }
        Ok((id, receiver))
    }

    /// Send `request` and await its response, re-sending on the
    /// configured interval until the attempt budget is exhausted.
    ///
    /// The exchange is registered once before the first send, so a
    /// response to any attempt completes it; a response that arrives
    /// after the final failure finds no pending entry and is dropped.
    pub async fn retry_request(
        &self,
        request: Message,
        destination: SocketAddr,
    ) -> Result<Message> {
        let matcher = Matcher::response_to(&request)
            .ok_or_else(|| Error::other(format!("{:?} has no response", request.kind())))?;
        let span = spalink_core::logging::exchange_span(
            &format!("{:?}", request.kind()),
            request.sequence().unwrap_or(0),
        );
        self.run_retries(request, destination, matcher)
            .instrument(span)
            .await
    }

    async fn run_retries(
        &self,
        request: Message,
        destination: SocketAddr,
        matcher: Matcher,
    ) -> Result<Message> {
        let (id, mut receiver) = self.register(matcher);

        for attempt in 1..=self.config.attempts {
            if let Err(e) = self.transport.send(request.clone(), destination).await {
                self.deregister(id);
                return Err(e);
            }
            match timeout(self.config.interval, &mut receiver).await {
                Ok(Ok(response)) => {
                    trace!(
                        "{:?} exchange completed on attempt {}/{}",
                        matcher.kind,
                        attempt,
                        self.config.attempts
                    );
                    return Ok(response);
                }
                Ok(Err(_)) => {
                    // Pending table was torn down underneath us
                    self.deregister(id);
                    return Err(Error::transport("exchange cancelled"));
                }
                Err(_) => {
                    debug!(
                        "No response to {:?} on attempt {}/{}",
                        matcher.kind, attempt, self.config.attempts
                    );
                }
            }
        }

        self.deregister(id);
        Err(Error::delivery_timeout(format!(
            "{:?} after {} attempts",
            matcher.kind, self.config.attempts
        )))
    }

    /// Offer an inbound message to the pending table. Returns true if it
    /// completed an exchange; the entry is removed before the waiter is
    /// woken, so each exchange completes at most once.
    pub fn dispatch(&self, message: &Message) -> bool {
        let completion = {
            let mut pending = self.pending.lock().unwrap();
            match pending.iter().position(|p| p.matcher.matches(message)) {
                Some(index) => pending.remove(index).completion,
                None => return false,
            }
        };
        // The waiter may have given up between removal and send
        let _ = completion.send(message.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;

    fn address() -> SocketAddr {
        "10.0.0.5:10022".parse().unwrap()
    }

    fn fast_config(attempts: u32) -> ExchangeConfig {
        ExchangeConfig {
            attempts,
            interval: Duration::from_millis(25),
        }
    }

    #[tokio::test]
    async fn test_completes_on_first_attempt() {
        let (transport, mut endpoint) = ChannelTransport::pair(address());
        transport.open().await.unwrap();
        let engine = Arc::new(ExchangeEngine::new(Arc::new(transport), fast_config(3)));

        let responder = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let (request, _) = endpoint.recv().await.unwrap();
                let seq = request.sequence().unwrap();
                engine.dispatch(&Message::ChannelResponse {
                    seq,
                    channel: 5,
                    signal_strength: 80,
                });
            })
        };

        let response = engine
            .retry_request(Message::ChannelRequest { seq: 7 }, address())
            .await
            .unwrap();
        assert!(matches!(response, Message::ChannelResponse { seq: 7, .. }));
        assert_eq!(engine.pending_exchanges(), 0);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_completes_on_later_attempt() {
        let (transport, mut endpoint) = ChannelTransport::pair(address());
        transport.open().await.unwrap();
        let engine = Arc::new(ExchangeEngine::new(Arc::new(transport), fast_config(5)));

        // Drop the first two attempts, answer the third
        let responder = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for attempt in 1..=3 {
                    let (request, _) = endpoint.recv().await.unwrap();
                    if attempt == 3 {
                        let seq = request.sequence().unwrap();
                        engine.dispatch(&Message::PingResponse { seq });
                    }
                }
            })
        };

        let response = engine
            .retry_request(Message::Ping { seq: 1 }, address())
            .await
            .unwrap();
        assert_eq!(response, Message::PingResponse { seq: 1 });
        assert_eq!(engine.pending_exchanges(), 0);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausts_attempt_budget() {
        let (transport, mut endpoint) = ChannelTransport::pair(address());
        transport.open().await.unwrap();
        let engine = ExchangeEngine::new(Arc::new(transport), fast_config(3));

        let sink = tokio::spawn(async move { while endpoint.recv().await.is_some() {} });

        let result = engine
            .retry_request(Message::VersionRequest { seq: 2 }, address())
            .await;
        assert!(matches!(result, Err(Error::DeliveryTimeout(_))));
        assert_eq!(engine.pending_exchanges(), 0);
        sink.abort();
    }

    #[tokio::test]
    async fn test_duplicate_response_completes_once() {
        let (transport, _endpoint) = ChannelTransport::pair(address());
        let engine = ExchangeEngine::new(Arc::new(transport), fast_config(3));

        let (_, mut receiver) = engine.register(Matcher {
            kind: MessageKind::PingResponse,
            seq: Some(9),
        });
        let response = Message::PingResponse { seq: 9 };
        assert!(engine.dispatch(&response));
        assert!(!engine.dispatch(&response));
        assert_eq!(receiver.try_recv().unwrap(), response);
    }

    #[tokio::test]
    async fn test_send_transmits_once_and_registers() {
        let (transport, mut endpoint) = ChannelTransport::pair(address());
        transport.open().await.unwrap();
        let engine = ExchangeEngine::new(Arc::new(transport), fast_config(3));

        let (_, mut receiver) = engine
            .send(Message::VersionRequest { seq: 3 }, address())
            .await
            .unwrap();
        assert_eq!(engine.pending_exchanges(), 1);
        let (request, _) = endpoint.recv().await.unwrap();
        assert_eq!(request, Message::VersionRequest { seq: 3 });

        let response = Message::VersionResponse {
            seq: 3,
            display: crate::message::FirmwareVersion::new("SPAPACK", 1, 2),
            controller: crate::message::FirmwareVersion::new("SPACTRL", 1, 0),
        };
        assert!(engine.dispatch(&response));
        assert_eq!(receiver.try_recv().unwrap(), response);
        assert_eq!(engine.pending_exchanges(), 0);
    }

    #[tokio::test]
    async fn test_sequence_mismatch_does_not_match() {
        let (transport, _endpoint) = ChannelTransport::pair(address());
        let engine = ExchangeEngine::new(Arc::new(transport), fast_config(3));

        let (_, _receiver) = engine.register(Matcher {
            kind: MessageKind::PingResponse,
            seq: Some(4),
        });
        assert!(!engine.dispatch(&Message::PingResponse { seq: 5 }));
        assert_eq!(engine.pending_exchanges(), 1);
    }
}
