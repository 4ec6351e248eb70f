//! Danmaku socket client.
//!
//! One `ProtocolClient` owns at most one WebSocket at a time and cycles
//! `Disconnected → Connecting → Authenticated → Streaming → Disconnected`
//! until its cancellation token fires. Every attempt starts from a freshly
//! fetched endpoint, because auth tokens rotate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::codec::{auth_frame, decode_frames, heartbeat_frame, AuthBody};
use super::hub::{EventHub, Subscription, SubscriptionId};
use crate::config::ClientTimings;
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where to connect and the key to authenticate with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEndpoint {
    pub host: String,
    pub port: u16,
    pub auth_token: String,
    /// `wss` when true, plain `ws` otherwise
    pub secure: bool,
}

impl ConnectionEndpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, auth_token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            auth_token: auth_token.into(),
            secure: true,
        }
    }

    /// Plain-text endpoint, for local relays
    #[must_use]
    pub fn insecure(host: impl Into<String>, port: u16, auth_token: impl Into<String>) -> Self {
        Self {
            secure: false,
            ..Self::new(host, port, auth_token)
        }
    }

    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/sub", self.host, self.port)
    }
}

/// Source of fresh connection endpoints
#[async_trait]
pub trait EndpointSource: Send + Sync {
    /// `None` when the lookup failed; the caller retries on its own schedule.
    async fn fetch_endpoint(&self, room_id: u64) -> Option<ConnectionEndpoint>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
    Streaming,
}

/// Danmaku socket client with heartbeat and reconnect
pub struct ProtocolClient {
    room_id: u64,
    endpoints: Arc<dyn EndpointSource>,
    timings: ClientTimings,
    hub: EventHub,
    state: watch::Sender<ConnectionState>,
    connections: AtomicU64,
    cancel_token: CancellationToken,
}

impl ProtocolClient {
    /// `cancel_token` bounds the client's lifetime; pass a child of the
    /// owner's token so cancelling the owner stops the client too.
    pub fn new(
        room_id: u64,
        endpoints: Arc<dyn EndpointSource>,
        timings: ClientTimings,
        cancel_token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            room_id,
            endpoints,
            timings,
            hub: EventHub::new(),
            state,
            connections: AtomicU64::new(0),
            cancel_token,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.hub.unsubscribe(id);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Number of connections that completed the auth handshake
    #[must_use]
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Stop the client; `run` returns after closing the current connection.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Connect, stream and reconnect until cancelled.
    ///
    /// Disconnects and failed lookups are never fatal: the client waits
    /// `reconnect_delay` and starts over with a fresh endpoint.
    pub async fn run(&self) {
        info!(room_id = self.room_id, "Danmaku client started");

        while !self.cancel_token.is_cancelled() {
            self.set_state(ConnectionState::Connecting);

            let endpoint = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                endpoint = self.endpoints.fetch_endpoint(self.room_id) => endpoint,
            };

            match endpoint {
                Some(endpoint) => match self.run_connection(&endpoint).await {
                    Ok(()) => debug!(room_id = self.room_id, "Danmaku connection closed"),
                    Err(e) => warn!(room_id = self.room_id, error = %e, "Danmaku connection failed"),
                },
                None => warn!(room_id = self.room_id, "No danmaku endpoint available"),
            }

            self.set_state(ConnectionState::Disconnected);
            if self.cancel_token.is_cancelled() {
                break;
            }

            warn!(
                room_id = self.room_id,
                delay_ms = self.timings.reconnect_delay.as_millis() as u64,
                "Reconnecting to danmaku server"
            );
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.timings.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(room_id = self.room_id, "Danmaku client stopped");
    }

    async fn run_connection(&self, endpoint: &ConnectionEndpoint) -> Result<()> {
        let url = endpoint.url();
        let connect = timeout(self.timings.connect_timeout, connect_async(url.as_str()));
        let ws = tokio::select! {
            () = self.cancel_token.cancelled() => return Ok(()),
            connected = connect => {
                let (ws, _) = connected.map_err(|_| Error::Timeout(format!("connecting to {url}")))??;
                ws
            }
        };
        let (mut sink, mut stream) = ws.split();

        // The auth reply (operation 8) is not awaited; it arrives as a
        // control packet and decodes to nothing.
        let auth = auth_frame(&AuthBody::web(self.room_id, &endpoint.auth_token))?;
        sink.send(Message::binary(auth)).await?;
        self.set_state(ConnectionState::Authenticated);
        self.connections.fetch_add(1, Ordering::Relaxed);
        info!(room_id = self.room_id, host = %endpoint.host, "Connected to danmaku server");

        let connection_token = self.cancel_token.child_token();
        let heartbeat = tokio::spawn(heartbeat_loop(
            sink,
            self.timings.heartbeat_interval,
            connection_token.clone(),
        ));
        self.set_state(ConnectionState::Streaming);

        let result = loop {
            let message = tokio::select! {
                () = self.cancel_token.cancelled() => break Ok(()),
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) if data.is_empty() => break Ok(()),
                Some(Ok(Message::Binary(data))) => self.dispatch(&data),
                Some(Ok(Message::Close(frame))) => {
                    debug!(room_id = self.room_id, ?frame, "Danmaku server closed the connection");
                    break Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            }
        };

        connection_token.cancel();
        if let Err(e) = heartbeat.await {
            warn!(room_id = self.room_id, error = %e, "Heartbeat task ended abnormally");
        }

        result
    }

    fn dispatch(&self, data: &[u8]) {
        let events = decode_frames(data);
        trace!(room_id = self.room_id, bytes = data.len(), events = events.len(), "Danmaku message");
        for event in &events {
            self.hub.publish(event);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// Send a heartbeat immediately and then every `interval` until the
/// connection token fires or a send fails. A failed send only ends this
/// task; the receive loop notices the broken socket on its own.
async fn heartbeat_loop(
    mut sink: SplitSink<WsStream, Message>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => {
                let _ = sink.close().await;
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::binary(heartbeat_frame())).await {
                    debug!(error = %e, "Heartbeat send failed, stopping heartbeat");
                    return;
                }
                trace!("Heartbeat sent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoEndpoints;

    #[async_trait]
    impl EndpointSource for NoEndpoints {
        async fn fetch_endpoint(&self, _room_id: u64) -> Option<ConnectionEndpoint> {
            None
        }
    }

    #[test]
    fn test_endpoint_url() {
        let endpoint = ConnectionEndpoint::new("broadcastlv.chat.bilibili.com", 443, "tok");
        assert_eq!(endpoint.url(), "wss://broadcastlv.chat.bilibili.com:443/sub");

        let endpoint = ConnectionEndpoint::insecure("127.0.0.1", 9000, "tok");
        assert_eq!(endpoint.url(), "ws://127.0.0.1:9000/sub");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_lookups_fail() {
        let client = Arc::new(ProtocolClient::new(
            1,
            Arc::new(NoEndpoints),
            ClientTimings::default(),
            CancellationToken::new(),
        ));
        let runner = tokio::spawn({
            let client = client.clone();
            async move { client.run().await }
        });

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(client.connection_count(), 0);

        client.stop();
        runner.await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
