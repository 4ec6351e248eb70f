//! Login credential extraction from an exported cookie file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

static RE_SESSDATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SESSDATA=([^;\s]+)").expect("invalid SESSDATA regex"));

/// The `SESSDATA` login cookie
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    sessdata: String,
}

// Keep the cookie value out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("sessdata", &"<redacted>").finish()
    }
}

impl Credential {
    #[must_use]
    pub fn new(sessdata: impl Into<String>) -> Self {
        Self {
            sessdata: sessdata.into(),
        }
    }

    /// Find `SESSDATA=<value>` anywhere in a cookie export
    #[must_use]
    pub fn parse(content: &str) -> Option<Self> {
        RE_SESSDATA
            .captures(content)
            .and_then(|caps| caps.get(1))
            .map(|m| Self::new(m.as_str()))
    }

    /// Read the cookie file; any failure means "no credential".
    #[must_use]
    pub fn from_file(path: &Path) -> Option<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let credential = Self::parse(&content);
                if credential.is_none() {
                    warn!(path = %path.display(), "Cookie file has no SESSDATA entry");
                }
                credential
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cookie file");
                None
            }
        }
    }

    /// `SESSDATA=<value>`, the form both the HTTP API and the capture tool take
    #[must_use]
    pub fn cookie_pair(&self) -> String {
        format!("SESSDATA={}", self.sessdata)
    }

    /// Cookie map for the provider HTTP clients
    #[must_use]
    pub fn cookies(&self) -> HashMap<String, String> {
        HashMap::from([("SESSDATA".to_string(), self.sessdata.clone())])
    }
}
