//! Offline → live detection.
//!
//! Two paths race: a danmaku client waiting for the `LIVE` command, and a
//! status poll that starts one interval later (immediately when the
//! protocol path is disabled). The first to fire wins and the other is
//! torn down.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientTimings;
use crate::danmaku::event::CMD_LIVE;
use crate::danmaku::{DanmuMessage, EndpointSource, ProtocolClient};
use crate::lookup::RoomStatusSource;

/// Which path saw the broadcast start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveTrigger {
    Protocol,
    Polling,
}

pub struct LiveWaiter {
    room_id: u64,
    status: Arc<dyn RoomStatusSource>,
    poll_interval: Duration,
    protocol: Option<(Arc<dyn EndpointSource>, ClientTimings)>,
}

impl LiveWaiter {
    /// Polling-only waiter
    pub fn new(room_id: u64, status: Arc<dyn RoomStatusSource>, poll_interval: Duration) -> Self {
        Self {
            room_id,
            status,
            poll_interval,
            protocol: None,
        }
    }

    /// Also listen for the `LIVE` command on a danmaku connection
    #[must_use]
    pub fn with_protocol(mut self, endpoints: Arc<dyn EndpointSource>, timings: ClientTimings) -> Self {
        self.protocol = Some((endpoints, timings));
        self
    }

    /// Block until the room goes live. `None` if `cancel` fired first.
    pub async fn wait_for_live(&self, cancel: &CancellationToken) -> Option<LiveTrigger> {
        info!(room_id = self.room_id, "Waiting for broadcast to start");
        let token = cancel.child_token();

        let trigger = match &self.protocol {
            Some((endpoints, timings)) => tokio::select! {
                () = token.cancelled() => None,
                true = self.watch_protocol(endpoints.clone(), *timings, token.child_token()) => {
                    Some(LiveTrigger::Protocol)
                }
                () = self.poll_status(self.poll_interval) => Some(LiveTrigger::Polling),
            },
            None => tokio::select! {
                () = token.cancelled() => None,
                () = self.poll_status(Duration::ZERO) => Some(LiveTrigger::Polling),
            },
        };

        // tears down whichever path lost, including its heartbeat task
        token.cancel();

        if let Some(trigger) = trigger {
            info!(room_id = self.room_id, ?trigger, "Broadcast started");
        }
        trigger
    }

    /// `true` once `LIVE` arrives; `false` if cancelled first.
    async fn watch_protocol(
        &self,
        endpoints: Arc<dyn EndpointSource>,
        timings: ClientTimings,
        token: CancellationToken,
    ) -> bool {
        let client = ProtocolClient::new(self.room_id, endpoints, timings, token.clone());
        let mut subscription = client.subscribe();

        let watch = async {
            loop {
                let event = tokio::select! {
                    () = token.cancelled() => return false,
                    event = subscription.receiver.recv() => event,
                };
                let Some(event) = event else { return false };

                if event.is(CMD_LIVE) {
                    client.stop();
                    return true;
                }
                if let Some(message) = DanmuMessage::from_event(&event) {
                    info!(room_id = self.room_id, user = %message.user_name, text = %message.text, "Danmaku");
                }
            }
        };

        let ((), live) = tokio::join!(client.run(), watch);
        live
    }

    async fn poll_status(&self, initial_delay: Duration) {
        tokio::time::sleep(initial_delay).await;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.status.is_live(self.room_id).await {
                return;
            }
            debug!(room_id = self.room_id, "Room not live yet");
        }
    }
}
