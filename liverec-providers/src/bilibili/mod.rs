//! Bilibili Live Client
//!
//! Pure HTTP client for the Bilibili live-room API, independent of the recorder.
//!
//! # Features
//! - Room id parsing (room URL or bare number)
//! - Short id → canonical room id resolution
//! - Room info (title, live status)
//! - Danmaku server lookup (host list + auth token)

pub mod client;
pub mod error;
pub mod types;

pub use client::BilibiliClient;
pub use error::BilibiliError;
pub use types::*;
