use serde_json::Value;

/// Broadcast started
pub const CMD_LIVE: &str = "LIVE";
/// Broadcast ended / room went back to preparing
pub const CMD_PREPARING: &str = "PREPARING";
/// Chat message
pub const CMD_DANMU_MSG: &str = "DANMU_MSG";

/// One JSON command carried by a message frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    /// Command name with any `:`-separated protocol suffix removed
    pub command: String,
    pub payload: Value,
}

impl DecodedEvent {
    /// Build from a decoded JSON body, reading its `cmd` field.
    #[must_use]
    pub fn from_payload(payload: Value) -> Self {
        let command = payload
            .get("cmd")
            .and_then(Value::as_str)
            .map(|cmd| cmd.split(':').next().unwrap_or(cmd).to_string())
            .unwrap_or_default();
        Self { command, payload }
    }

    #[must_use]
    pub fn is(&self, command: &str) -> bool {
        self.command == command
    }
}

/// Chat message view over a `DANMU_MSG` event.
///
/// The payload's `info` array carries the text at `[1]` (some relays wrap
/// it as `[1][1]`) and `[uid, name, ...]` at `[2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanmuMessage {
    pub user_name: String,
    pub text: String,
}

impl DanmuMessage {
    #[must_use]
    pub fn from_event(event: &DecodedEvent) -> Option<Self> {
        if !event.is(CMD_DANMU_MSG) {
            return None;
        }
        let info = event.payload.get("info")?;
        let text = match info.get(1)? {
            Value::Array(parts) => parts.get(1)?.as_str()?,
            other => other.as_str()?,
        }
        .to_string();
        let user_name = info
            .get(2)
            .and_then(|user| user.get(1))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self { user_name, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_suffix_stripped() {
        let event = DecodedEvent::from_payload(json!({"cmd": "DANMU_MSG:4:0:2:2:2:0", "info": []}));
        assert_eq!(event.command, CMD_DANMU_MSG);

        let event = DecodedEvent::from_payload(json!({"cmd": "LIVE", "roomid": 7_734_200}));
        assert!(event.is(CMD_LIVE));

        let event = DecodedEvent::from_payload(json!({"code": 0}));
        assert_eq!(event.command, "");
    }

    #[test]
    fn test_danmu_message_fields() {
        let event = DecodedEvent::from_payload(json!({
            "cmd": "DANMU_MSG",
            "info": [[0, 1, 25, 16_777_215], "晚上好", [10_086, "观众A", 0], [], []]
        }));
        let msg = DanmuMessage::from_event(&event).unwrap();
        assert_eq!(msg.text, "晚上好");
        assert_eq!(msg.user_name, "观众A");
    }

    #[test]
    fn test_danmu_message_malformed() {
        let event = DecodedEvent::from_payload(json!({"cmd": "DANMU_MSG", "info": [[0]]}));
        assert!(DanmuMessage::from_event(&event).is_none());

        let event = DecodedEvent::from_payload(json!({"cmd": "SEND_GIFT", "data": {}}));
        assert!(DanmuMessage::from_event(&event).is_none());

        let event = DecodedEvent::from_payload(json!({"cmd": "DANMU_MSG", "info": [[0], [0, "wrapped"], [1, "B"]]}));
        assert_eq!(DanmuMessage::from_event(&event).unwrap().text, "wrapped");

        // missing user block still yields the text
        let event = DecodedEvent::from_payload(json!({"cmd": "DANMU_MSG", "info": [[0], "hi"]}));
        assert_eq!(DanmuMessage::from_event(&event).unwrap().user_name, "");
    }
}
