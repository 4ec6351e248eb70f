//! Session state machine: `Capturing → Finalizing → {Done, Failed}`.
//!
//! The capture loop runs sequentially on the caller's task while the
//! caption collector runs on its own. They share nothing but the session
//! start instant and are joined when the session finalizes.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use liverec_providers::BilibiliClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::caption::{CaptionCollector, CaptionFile};
use super::capture::{CaptureRequest, StreamCapture};
use super::mux::{write_manifest, Muxer};
use super::notify::Notifier;
use super::session::{Segment, Session, SessionStatus, SESSION_ID_FORMAT};
use crate::config::{ClientTimings, SessionSettings};
use crate::credentials::Credential;
use crate::danmaku::EndpointSource;
use crate::error::Result;
use crate::lookup::RoomStatusSource;

pub const MERGED_SUFFIX: &str = "_ts.ts";
pub const CAPTIONLESS_SUFFIX: &str = "_nodm.mp4";
pub const CAPTIONED_SUFFIX: &str = "_withdm.mp4";

/// Why the capture loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The stop token fired (shutdown, or `PREPARING` when enabled)
    Stopped,
    /// No valid segment within `no_stream_timeout`
    SilenceTimeout,
}

/// Outcome of one finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub end_reason: EndReason,
    /// Merged segments, in capture order
    pub segments: Vec<PathBuf>,
    pub merged: Option<PathBuf>,
    pub captionless: Option<PathBuf>,
    pub captioned: Option<PathBuf>,
    pub captions: usize,
}

/// `{prefix}{title}_{MM-DD}_`. Without a title the prefix stands in,
/// minus its trailing `_` and any `【】`.
#[must_use]
pub fn session_label(prefix: &str, title: Option<&str>, date: DateTime<Local>) -> String {
    let title = match title {
        Some(title) => title.to_string(),
        None => prefix.trim_end_matches('_').trim_matches(['【', '】']).to_string(),
    };
    format!("{prefix}{title}_{}_", date.format("%m-%d"))
}

/// `H:MM:SS`
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct SessionOrchestrator {
    room_id: u64,
    settings: SessionSettings,
    capture: Arc<dyn StreamCapture>,
    muxer: Arc<dyn Muxer>,
    notifier: Arc<dyn Notifier>,
    status: Arc<dyn RoomStatusSource>,
    captions: Option<(Arc<dyn EndpointSource>, ClientTimings)>,
    credential: Option<Credential>,
    stream_url: String,
}

impl SessionOrchestrator {
    pub fn new(
        room_id: u64,
        settings: SessionSettings,
        capture: Arc<dyn StreamCapture>,
        muxer: Arc<dyn Muxer>,
        notifier: Arc<dyn Notifier>,
        status: Arc<dyn RoomStatusSource>,
    ) -> Self {
        Self {
            room_id,
            settings,
            capture,
            muxer,
            notifier,
            status,
            captions: None,
            credential: None,
            stream_url: BilibiliClient::live_room_url(room_id),
        }
    }

    /// Record chat into a caption track during each session
    #[must_use]
    pub fn with_captions(mut self, endpoints: Arc<dyn EndpointSource>, timings: ClientTimings) -> Self {
        self.captions = Some((endpoints, timings));
        self
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    /// Record one session from now until `stop` fires or the stream goes
    /// silent, then produce the deliverables.
    ///
    /// Only a failure to create the session directory is returned as an
    /// error; everything later is reported through the `SessionReport`.
    pub async fn run(&self, stop: &CancellationToken) -> Result<SessionReport> {
        let title = self.status.title(self.room_id).await;
        let mut session = Session::new(&self.settings.save_dir);
        let label = session_label(&self.settings.prefix, title.as_deref(), session.started_at);
        tokio::fs::create_dir_all(&session.dir).await?;

        info!(
            room_id = self.room_id,
            session_id = %session.id,
            dir = %session.dir.display(),
            "Session started"
        );
        self.notifier
            .notify(&format!("{label} recording started at {}", Local::now().format("%H:%M:%S")))
            .await;

        let session_stop = stop.child_token();
        let caption_stop = CancellationToken::new();
        let collector = self.captions.as_ref().map(|(endpoints, timings)| {
            let mut collector = CaptionCollector::new(
                self.room_id,
                session.caption_path(),
                session.started,
                endpoints.clone(),
                *timings,
                caption_stop.clone(),
            );
            if self.settings.end_on_preparing {
                collector = collector.with_offline_signal(session_stop.clone());
            }
            tokio::spawn(collector.run())
        });

        let end_reason = self.capture_loop(&mut session, &session_stop).await;

        session.status = SessionStatus::Finalizing;
        info!(
            session_id = %session.id,
            ?end_reason,
            segments = session.segments.len(),
            "Capture loop ended"
        );
        self.notifier
            .notify(&format!("{label} broadcast ended at {}", Local::now().format("%H:%M:%S")))
            .await;

        caption_stop.cancel();
        let captions = match collector {
            Some(handle) => match handle.await {
                Ok(Ok(written)) => written,
                Ok(Err(e)) => {
                    warn!(session_id = %session.id, error = %e, "Caption collector failed");
                    0
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Caption collector task ended abnormally");
                    0
                }
            },
            None => 0,
        };

        Ok(self.finalize(&mut session, &label, end_reason, captions).await)
    }

    async fn capture_loop(&self, session: &mut Session, stop: &CancellationToken) -> EndReason {
        loop {
            let output = session.next_segment_path();
            let request = CaptureRequest {
                stream_url: &self.stream_url,
                credential: self.credential.as_ref(),
                output: &output,
            };
            if let Err(e) = self
                .with_retry("capture", Some(stop), || self.capture.capture(&request))
                .await
            {
                warn!(session_id = %session.id, segment = %output.display(), error = %e, "Segment abandoned");
            }

            let valid = match tokio::fs::metadata(&output).await {
                Ok(meta) => {
                    let segment = Segment {
                        path: output.clone(),
                        size_bytes: meta.len(),
                        captured_at: Local::now(),
                    };
                    if segment.is_valid(self.settings.min_segment_bytes) {
                        info!(
                            session_id = %session.id,
                            segment = %output.display(),
                            size_bytes = segment.size_bytes,
                            "Segment captured"
                        );
                        session.record_segment(segment);
                        true
                    } else {
                        debug!(segment = %output.display(), size_bytes = segment.size_bytes, "Segment too small, ignored");
                        false
                    }
                }
                Err(_) => {
                    debug!(segment = %output.display(), "Capture produced no file");
                    false
                }
            };

            if stop.is_cancelled() {
                return EndReason::Stopped;
            }
            if session.silence() > self.settings.no_stream_timeout {
                info!(
                    session_id = %session.id,
                    timeout_secs = self.settings.no_stream_timeout.as_secs(),
                    "No stream data within timeout"
                );
                return EndReason::SilenceTimeout;
            }

            if !valid {
                tokio::select! {
                    () = stop.cancelled() => return EndReason::Stopped,
                    () = tokio::time::sleep(self.settings.retry_delay) => {}
                }
            }
        }
    }

    async fn finalize(
        &self,
        session: &mut Session,
        label: &str,
        end_reason: EndReason,
        captions: usize,
    ) -> SessionReport {
        let segments = session.deduplicated_paths();
        let mut report = SessionReport {
            session_id: session.id.clone(),
            status: SessionStatus::Failed,
            end_reason,
            segments: segments.clone(),
            merged: None,
            captionless: None,
            captioned: None,
            captions,
        };

        if segments.is_empty() {
            warn!(session_id = %session.id, "Nothing was recorded");
            self.notifier.notify(&format!("{label} nothing was recorded")).await;
            session.status = SessionStatus::Failed;
            return report;
        }

        let manifest = session.manifest_path();
        if let Err(e) = write_manifest(&manifest, &segments).await {
            error!(session_id = %session.id, error = %e, "Failed to write concat manifest");
            self.notifier.notify(&format!("{label} merge failed: {e}")).await;
            session.status = SessionStatus::Failed;
            return report;
        }

        let merged = self.deliverable(label, MERGED_SUFFIX);
        if let Err(e) = self
            .with_retry("merge", None, || self.muxer.concat(&manifest, &merged))
            .await
        {
            error!(session_id = %session.id, error = %e, "Failed to merge segments");
            self.notifier.notify(&format!("{label} merge failed: {e}")).await;
            session.status = SessionStatus::Failed;
            return report;
        }
        info!(session_id = %session.id, merged = %merged.display(), "Segments merged");
        self.notifier
            .notify(&format!(
                "{label} recording finished: {}\nDuration: {}",
                file_name(&merged),
                format_duration(session.started.elapsed())
            ))
            .await;
        report.merged = Some(merged.clone());

        let captionless = self.deliverable(label, CAPTIONLESS_SUFFIX);
        report.captionless = self.render(label, &merged, None, &captionless).await;

        let caption_path = session.caption_path();
        if CaptionFile::has_entries(&caption_path).await {
            let captioned = self.deliverable(label, CAPTIONED_SUFFIX);
            report.captioned = self.render(label, &merged, Some(&caption_path), &captioned).await;
        } else {
            info!(session_id = %session.id, "No captions recorded, skipping captioned rendition");
            self.notifier
                .notify(&format!("{label} no captions recorded, captioned rendition skipped"))
                .await;
        }

        session.status = SessionStatus::Done;
        report.status = SessionStatus::Done;
        info!(session_id = %session.id, "Session finalized");
        report
    }

    /// Produce one rendition; `None` when it could not be made.
    async fn render(&self, label: &str, input: &Path, captions: Option<&Path>, output: &Path) -> Option<PathBuf> {
        let kind = if captions.is_some() { "captioned" } else { "captionless" };
        match self
            .with_retry(kind, None, || self.muxer.render(input, captions, output))
            .await
        {
            Ok(()) => {
                info!(output = %output.display(), kind, "Rendition produced");
                self.notifier
                    .notify(&format!("{label} {kind} rendition ready: {}", file_name(output)))
                    .await;
                Some(output.to_path_buf())
            }
            Err(e) => {
                error!(output = %output.display(), kind, error = %e, "Rendition failed");
                self.notifier
                    .notify(&format!("{label} {kind} rendition failed: {e}"))
                    .await;
                None
            }
        }
    }

    fn deliverable(&self, label: &str, suffix: &str) -> PathBuf {
        let stamp = Local::now().format(SESSION_ID_FORMAT);
        self.settings.save_dir.join(format!("{label}{stamp}{suffix}"))
    }

    /// Up to `capture_attempts` tries with `retry_delay` between them. A
    /// fired `stop` abandons the remaining attempts but never interrupts
    /// one in flight.
    async fn with_retry<F, Fut>(&self, what: &str, stop: Option<&CancellationToken>, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let attempts = self.settings.capture_attempts;
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => e,
            };
            warn!(what, attempt, attempts, error = %err, "Attempt failed, retrying");

            match stop {
                Some(stop) => tokio::select! {
                    () = stop.cancelled() => return Err(err),
                    () = tokio::time::sleep(self.settings.retry_delay) => {}
                },
                None => tokio::time::sleep(self.settings.retry_delay).await,
            }
            attempt += 1;
        }
    }
}
