// liverec Provider Clients
//
// Pure HTTP clients for the services the recorder talks to over plain
// request/response calls. Nothing in here knows about sessions, captions
// or the danmaku socket; liverec-core adapts these clients to its own traits.
//
// - bilibili: room resolution, room info / live status, danmaku endpoint lookup
// - telegram: bot notifications

// Shared error types
pub mod error;

pub mod bilibili;
pub mod telegram;

// Re-export client types for convenience
pub use bilibili::BilibiliClient;
pub use bilibili::error::BilibiliError;
pub use error::ProviderClientError;
pub use telegram::TelegramClient;
