//! Bilibili Live HTTP Client

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;

use super::error::{check_response, json_with_limit, BilibiliError};
use super::types::{
    ApiEnvelope, DanmuHost, DanmuInfoData, LiveDanmuInfo, RoomInfo, RoomInfoData, RoomInitData,
};

// Characters that are not allowed in file names on at least one platform.
static RE_UNSAFE_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/\\:*?"<>|]"#).expect("invalid filename regex"));

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const REFERER: &str = "https://live.bilibili.com";

/// Default base URL of the live API
pub const LIVE_API_BASE: &str = "https://api.live.bilibili.com";

/// Base URL of live room pages (what the capture tool is pointed at)
pub const LIVE_ROOM_BASE: &str = "https://live.bilibili.com";

/// Port used when the danmaku host list does not advertise a `wss_port`
pub const DEFAULT_WSS_PORT: u16 = 443;

/// Bilibili Live HTTP Client
#[derive(Clone)]
pub struct BilibiliClient {
    client: Client,
    cookies: Option<HashMap<String, String>>,
    api_base: String,
}

impl BilibiliClient {
    /// Create a new Bilibili client
    pub fn new() -> Result<Self, BilibiliError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BilibiliError::Network(e.to_string()))?;

        Ok(Self {
            client,
            cookies: None,
            api_base: LIVE_API_BASE.to_string(),
        })
    }

    /// Create a new Bilibili client with cookies
    pub fn with_cookies(cookies: HashMap<String, String>) -> Result<Self, BilibiliError> {
        let mut client = Self::new()?;
        if !cookies.is_empty() {
            client.cookies = Some(cookies);
        }
        Ok(client)
    }

    /// Point the client at a different API host (used by tests and mirrors)
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Add cookies to request
    fn add_cookies(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(cookies) = &self.cookies {
            let cookie_str = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            req.header("Cookie", cookie_str)
        } else {
            req
        }
    }

    /// GET `{api_base}{path}` and unwrap the `{code, message, data}` envelope.
    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BilibiliError> {
        let url = format!("{}{path}", self.api_base);
        let req = self.add_cookies(
            self.client
                .get(&url)
                .query(query)
                .header("Referer", REFERER),
        );
        let resp = check_response(req.send().await?)?;
        let envelope: ApiEnvelope = json_with_limit(resp).await?;

        if envelope.code != 0 {
            return Err(BilibiliError::Api {
                code: envelope.code,
                message: envelope.message,
            });
        }

        serde_json::from_value(envelope.data).map_err(Into::into)
    }

    /// Extract a room number from a room URL (`https://live.bilibili.com/299`,
    /// with or without query/trailing slash) or a bare number.
    pub fn parse_room_id(input: &str) -> Result<u64, BilibiliError> {
        let trimmed = input.trim();
        let candidate = if trimmed.contains("://") {
            let url = url::Url::parse(trimmed)?;
            url.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
                .unwrap_or_default()
        } else {
            trimmed.trim_end_matches('/').rsplit('/').next().unwrap_or_default().to_string()
        };

        candidate
            .parse::<u64>()
            .map_err(|_| BilibiliError::InvalidConfig(format!("not a live room: {input}")))
    }

    /// Page URL of a live room
    #[must_use]
    pub fn live_room_url(room_id: u64) -> String {
        format!("{LIVE_ROOM_BASE}/{room_id}")
    }

    /// Replace characters that cannot appear in file names with `_`.
    #[must_use]
    pub fn sanitize_title(raw: &str) -> String {
        RE_UNSAFE_FILENAME.replace_all(raw.trim(), "_").into_owned()
    }

    /// Resolve a short/alias room number to the canonical room id
    pub async fn resolve_room_id(&self, room_id: u64) -> Result<u64, BilibiliError> {
        let data: RoomInitData = self
            .get_data("/room/v1/Room/room_init", &[("id", room_id.to_string())])
            .await?;
        Ok(data.room_id)
    }

    /// Get room info (title, live status)
    pub async fn room_info(&self, room_id: u64) -> Result<RoomInfo, BilibiliError> {
        let data: RoomInfoData = self
            .get_data("/room/v1/Room/get_info", &[("room_id", room_id.to_string())])
            .await?;

        Ok(RoomInfo {
            room_id: data.room_id,
            title: data.title,
            live_status: data.live_status,
        })
    }

    /// Get live danmaku server info
    pub async fn get_live_danmu_info(&self, room_id: u64) -> Result<LiveDanmuInfo, BilibiliError> {
        let data: DanmuInfoData = self
            .get_data(
                "/xlive/web-room/v1/index/getDanmuInfo",
                &[("id", room_id.to_string())],
            )
            .await?;

        let host_list: Vec<DanmuHost> = data
            .host_list
            .into_iter()
            .map(|h| DanmuHost {
                host: h.host,
                wss_port: h.wss_port.unwrap_or(DEFAULT_WSS_PORT),
            })
            .collect();

        Ok(LiveDanmuInfo {
            token: data.token,
            host_list,
        })
    }
}
