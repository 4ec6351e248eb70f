//! HTTP metadata lookups behind the recorder's traits.
//!
//! Every lookup here degrades to a sentinel (`None`, `false`, the input id)
//! instead of failing: callers poll again on their own schedule.

use async_trait::async_trait;
use liverec_providers::bilibili::BilibiliClient;
use tracing::{debug, warn};

use crate::credentials::Credential;
use crate::danmaku::{ConnectionEndpoint, EndpointSource};
use crate::error::Result;

/// Room numbers, resolved once per process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomIdentity {
    /// What the user configured (may be a short alias)
    pub short_id: u64,
    pub canonical_id: u64,
}

/// Live status and metadata of a room
#[async_trait]
pub trait RoomStatusSource: Send + Sync {
    /// `true` for any non-zero live status; `false` on lookup failure.
    async fn is_live(&self, room_id: u64) -> bool;

    /// Room title, if it could be fetched
    async fn title(&self, room_id: u64) -> Option<String>;
}

/// Bilibili-backed lookups
#[derive(Clone)]
pub struct BilibiliLookup {
    client: BilibiliClient,
}

impl BilibiliLookup {
    pub fn new(credential: Option<&Credential>) -> Result<Self> {
        let client = match credential {
            Some(credential) => BilibiliClient::with_cookies(credential.cookies())?,
            None => BilibiliClient::new()?,
        };
        Ok(Self { client })
    }

    #[must_use]
    pub fn from_client(client: BilibiliClient) -> Self {
        Self { client }
    }

    /// Resolve a short id; on failure the given id is used verbatim.
    pub async fn resolve(&self, short_id: u64) -> RoomIdentity {
        let canonical_id = match self.client.resolve_room_id(short_id).await {
            Ok(id) => id,
            Err(e) => {
                warn!(short_id, error = %e, "Failed to resolve room id, using it as-is");
                short_id
            }
        };
        debug!(short_id, canonical_id, "Room resolved");
        RoomIdentity {
            short_id,
            canonical_id,
        }
    }
}

#[async_trait]
impl RoomStatusSource for BilibiliLookup {
    async fn is_live(&self, room_id: u64) -> bool {
        match self.client.room_info(room_id).await {
            Ok(info) => info.is_live(),
            Err(e) => {
                debug!(room_id, error = %e, "Live status lookup failed");
                false
            }
        }
    }

    async fn title(&self, room_id: u64) -> Option<String> {
        match self.client.room_info(room_id).await {
            Ok(info) => {
                let title = BilibiliClient::sanitize_title(&info.title);
                (!title.is_empty()).then_some(title)
            }
            Err(e) => {
                warn!(room_id, error = %e, "Failed to fetch room title");
                None
            }
        }
    }
}

#[async_trait]
impl EndpointSource for BilibiliLookup {
    async fn fetch_endpoint(&self, room_id: u64) -> Option<ConnectionEndpoint> {
        match self.client.get_live_danmu_info(room_id).await {
            Ok(info) => {
                let host = info.primary_host()?;
                Some(ConnectionEndpoint::new(
                    host.host.clone(),
                    host.wss_port,
                    info.token.clone(),
                ))
            }
            Err(e) => {
                warn!(room_id, error = %e, "Failed to fetch danmaku server info");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn lookup_for(server: &MockServer) -> BilibiliLookup {
        BilibiliLookup::from_client(BilibiliClient::new().unwrap().with_api_base(server.uri()))
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_input() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let room = lookup_for(&server).await.resolve(299).await;
        assert_eq!(room, RoomIdentity { short_id: 299, canonical_id: 299 });
    }

    #[tokio::test]
    async fn test_status_and_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/room/v1/Room/get_info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": {"room_id": 7_734_200, "title": "歌回: 点歌/聊天", "live_status": 1}
            })))
            .mount(&server)
            .await;

        let lookup = lookup_for(&server).await;
        assert!(lookup.is_live(7_734_200).await);
        assert_eq!(lookup.title(7_734_200).await.as_deref(), Some("歌回_ 点歌_聊天"));
    }

    #[tokio::test]
    async fn test_status_lookup_failure_is_not_live() {
        let server = MockServer::start().await;
        let lookup = lookup_for(&server).await;
        // nothing mounted: wiremock answers 404
        assert!(!lookup.is_live(1).await);
        assert!(lookup.title(1).await.is_none());
        assert!(lookup.fetch_endpoint(1).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xlive/web-room/v1/index/getDanmuInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": {"token": "tok", "host_list": [{"host": "zj-cn-live-comet.chat.bilibili.com", "wss_port": 2245}]}
            })))
            .mount(&server)
            .await;

        let endpoint = lookup_for(&server).await.fetch_endpoint(7_734_200).await.unwrap();
        assert_eq!(endpoint.url(), "wss://zj-cn-live-comet.chat.bilibili.com:2245/sub");
        assert_eq!(endpoint.auth_token, "tok");
    }
}
