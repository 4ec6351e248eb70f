//! Bilibili Live API Data Structures

use serde::Deserialize;

/// Common response envelope: `{code, message, data}`.
///
/// `data` is kept as raw JSON until `code` has been checked, because the
/// API returns `{}` or `[]` in place of the payload on errors.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `room_init` payload
#[derive(Debug, Clone, Deserialize)]
pub struct RoomInitData {
    pub room_id: u64,
    #[serde(default)]
    pub short_id: u64,
}

/// `get_info` payload
#[derive(Debug, Clone, Deserialize)]
pub struct RoomInfoData {
    pub room_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub live_status: u64,
}

/// Room information exposed to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: u64,
    pub title: String,
    /// 0 = offline, 1 = live, 2 = round-robin replay
    pub live_status: u64,
}

impl RoomInfo {
    /// Any non-zero status counts as broadcasting, replays included.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.live_status != 0
    }
}

/// `getDanmuInfo` payload
#[derive(Debug, Clone, Deserialize)]
pub struct DanmuInfoData {
    pub token: String,
    #[serde(default)]
    pub host_list: Vec<DanmuHostData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DanmuHostData {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub ws_port: Option<u16>,
    #[serde(default)]
    pub wss_port: Option<u16>,
}

/// Danmaku server host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanmuHost {
    pub host: String,
    pub wss_port: u16,
}

/// Danmaku server info: where to connect and the key to authenticate with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDanmuInfo {
    pub token: String,
    pub host_list: Vec<DanmuHost>,
}

impl LiveDanmuInfo {
    /// First advertised host, the one the web player connects to.
    #[must_use]
    pub fn primary_host(&self) -> Option<&DanmuHost> {
        self.host_list.first()
    }
}
