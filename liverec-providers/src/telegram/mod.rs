//! Telegram Bot Client
//!
//! Minimal client for the Bot API `sendMessage` call.

pub mod client;

pub use client::TelegramClient;
