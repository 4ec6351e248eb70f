//! Chat capture into an ASS caption track.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientTimings;
use crate::danmaku::event::CMD_PREPARING;
use crate::danmaku::{DanmuMessage, EndpointSource, ProtocolClient};
use crate::error::Result;

/// On-screen time of one chat line
pub const CAPTION_DURATION: Duration = Duration::from_secs(5);

const ASS_HEADER: &str = "[Script Info]\n\
ScriptType: v4.00+\n\
\n\
[V4+ Styles]\n\
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, \
Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, \
Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
Style: default,Arial,36,&H00FFFFFF,&H0000FFFF,&H00000000,&H00000000,0,0,0,0,100,100,0,0,1,2,0,7,10,10,10,1\n\
\n\
[Events]\n\
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n";

const DIALOGUE_PREFIX: &str = "Dialogue:";

/// `H:MM:SS.cc`, truncated to centiseconds
#[must_use]
pub fn format_timestamp(offset: Duration) -> String {
    let centis = offset.as_millis() / 10;
    let hours = centis / 360_000;
    let minutes = (centis / 6_000) % 60;
    let seconds = (centis / 100) % 60;
    format!("{hours}:{minutes:02}:{seconds:02}.{:02}", centis % 100)
}

/// One timed chat line, offsets relative to the session start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionEntry {
    pub start_offset: Duration,
    pub end_offset: Duration,
    pub user_name: String,
    pub text: String,
}

impl CaptionEntry {
    #[must_use]
    pub fn new(start_offset: Duration, user_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            start_offset,
            end_offset: start_offset + CAPTION_DURATION,
            user_name: user_name.into(),
            text: text.into(),
        }
    }

    /// The entry as one `Dialogue:` line, newline-terminated
    #[must_use]
    pub fn to_dialogue(&self) -> String {
        // Commas delimit ASS fields; the text field is last so it may keep them.
        let name = self.user_name.replace(',', "");
        let text = self.text.replace("\r\n", "\\N").replace(['\r', '\n'], "\\N");
        format!(
            "{DIALOGUE_PREFIX} 0,{},{},default,{name},0,0,0,,{text}\n",
            format_timestamp(self.start_offset),
            format_timestamp(self.end_offset),
        )
    }
}

/// Append-only caption file
#[derive(Debug)]
pub struct CaptionFile {
    file: File,
}

impl CaptionFile {
    /// Open for appending, writing the header first if the file is new.
    pub async fn open(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path).await {
            Ok(mut file) => {
                file.write_all(ASS_HEADER.as_bytes()).await?;
                file.flush().await?;
                debug!(path = %path.display(), "Caption file created");
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new().append(true).open(path).await?;
        Ok(Self { file })
    }

    /// Write one record and flush it before returning
    pub async fn append(&mut self, entry: &CaptionEntry) -> Result<()> {
        self.file.write_all(entry.to_dialogue().as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }

    /// Whether the file at `path` holds at least one caption record.
    /// The header alone does not count.
    pub async fn has_entries(path: &Path) -> bool {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => content.lines().any(|line| line.starts_with(DIALOGUE_PREFIX)),
            Err(_) => false,
        }
    }
}

/// Session-scoped chat recorder.
///
/// Runs its own `ProtocolClient` and appends every chat message to the
/// caption file until `stop` fires.
pub struct CaptionCollector {
    room_id: u64,
    path: PathBuf,
    session_start: Instant,
    endpoints: Arc<dyn EndpointSource>,
    timings: ClientTimings,
    stop: CancellationToken,
    offline_signal: Option<CancellationToken>,
}

impl CaptionCollector {
    pub fn new(
        room_id: u64,
        path: PathBuf,
        session_start: Instant,
        endpoints: Arc<dyn EndpointSource>,
        timings: ClientTimings,
        stop: CancellationToken,
    ) -> Self {
        Self {
            room_id,
            path,
            session_start,
            endpoints,
            timings,
            stop,
            offline_signal: None,
        }
    }

    /// Cancel `signal` when the room announces `PREPARING`
    #[must_use]
    pub fn with_offline_signal(mut self, signal: CancellationToken) -> Self {
        self.offline_signal = Some(signal);
        self
    }

    /// Collect until stopped; returns the number of records written.
    pub async fn run(self) -> Result<usize> {
        let mut file = CaptionFile::open(&self.path).await?;
        let client = ProtocolClient::new(
            self.room_id,
            self.endpoints.clone(),
            self.timings,
            self.stop.child_token(),
        );
        let mut subscription = client.subscribe();
        info!(room_id = self.room_id, path = %self.path.display(), "Caption collector started");

        let collect = async {
            let mut written = 0usize;
            loop {
                // biased: a raised stop wins over queued events, checked between records
                let event = tokio::select! {
                    biased;
                    () = self.stop.cancelled() => break,
                    event = subscription.receiver.recv() => event,
                };
                let Some(event) = event else { break };

                if event.is(CMD_PREPARING) {
                    info!(room_id = self.room_id, "Room reported PREPARING");
                    if let Some(signal) = &self.offline_signal {
                        signal.cancel();
                    }
                    continue;
                }

                let Some(message) = DanmuMessage::from_event(&event) else {
                    continue;
                };
                // offset is taken at dequeue, not when the frame was decoded
                let entry = CaptionEntry::new(
                    self.session_start.elapsed(),
                    message.user_name,
                    message.text,
                );
                match file.append(&entry).await {
                    Ok(()) => written += 1,
                    Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to append caption"),
                }
            }
            client.stop();
            written
        };

        let ((), written) = tokio::join!(client.run(), collect);
        client.unsubscribe(subscription.id);

        info!(room_id = self.room_id, captions = written, "Caption collector stopped");
        Ok(written)
    }
}
