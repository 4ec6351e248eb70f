//! Bilibili client error types
//!
//! The Bilibili client shares the provider-wide error enum.

pub use crate::error::{check_response, json_with_limit, ProviderClientError as BilibiliError};
