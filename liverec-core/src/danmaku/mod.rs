//! Danmaku (live chat) socket protocol
//!
//! - `codec`: binary frame encoding/decoding, nested compressed packets
//! - `event`: decoded command events and the chat message view over them
//! - `hub`: fan-out of decoded events to subscribers
//! - `client`: one WebSocket connection with auth, heartbeat and reconnect

pub mod client;
pub mod codec;
pub mod event;
pub mod hub;

pub use client::{ConnectionEndpoint, ConnectionState, EndpointSource, ProtocolClient};
pub use codec::{decode_frames, encode_frame, FrameHeader};
pub use event::{DanmuMessage, DecodedEvent};
pub use hub::{EventHub, Subscription, SubscriptionId};
