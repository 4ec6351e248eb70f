//! Segment capture through an external tool.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::ToolsConfig;
use crate::credentials::Credential;
use crate::error::{Error, Result};

/// One capture invocation
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest<'a> {
    pub stream_url: &'a str,
    pub credential: Option<&'a Credential>,
    pub output: &'a Path,
}

/// Writes one segment of the live stream to `request.output`.
///
/// `Ok` means the tool exited cleanly. The caller judges the output file
/// on its own; a clean exit may still leave nothing usable behind.
#[async_trait]
pub trait StreamCapture: Send + Sync {
    async fn capture(&self, request: &CaptureRequest<'_>) -> Result<()>;
}

/// `streamlink`-backed capture
#[derive(Debug, Clone)]
pub struct StreamlinkCapture {
    program: String,
    quality: String,
    retry_streams: u32,
    retry_max: u32,
}

impl StreamlinkCapture {
    #[must_use]
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            program: config.streamlink_path.clone(),
            quality: config.quality.clone(),
            retry_streams: config.retry_streams,
            retry_max: config.retry_max,
        }
    }

    fn args(&self, request: &CaptureRequest<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(credential) = request.credential {
            args.push("--http-cookie".into());
            args.push(credential.cookie_pair().into());
        }
        args.extend([
            "--retry-streams".into(),
            self.retry_streams.to_string().into(),
            "--retry-max".into(),
            self.retry_max.to_string().into(),
            request.stream_url.into(),
            self.quality.as_str().into(),
            // retries reuse the segment path
            "--force".into(),
            "-o".into(),
            request.output.as_os_str().to_owned(),
        ]);
        args
    }
}

#[async_trait]
impl StreamCapture for StreamlinkCapture {
    async fn capture(&self, request: &CaptureRequest<'_>) -> Result<()> {
        debug!(output = %request.output.display(), "Starting streamlink");
        run_tool(&self.program, self.args(request)).await
    }
}

/// Run a tool to completion; a non-zero exit becomes `Error::Tool` carrying
/// the tail of its stderr.
pub(crate) async fn run_tool(program: &str, args: Vec<OsString>) -> Result<()> {
    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::tool(program, format!("failed to start: {e}")))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    Err(Error::tool(
        program,
        format!("exited with {}: {}", output.status, tail.join(" | ")),
    ))
}
