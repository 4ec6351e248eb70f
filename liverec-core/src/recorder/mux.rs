//! Merge and render through an external muxer.

use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::capture::run_tool;
use crate::config::ToolsConfig;
use crate::error::Result;

#[async_trait]
pub trait Muxer: Send + Sync {
    /// Join the segments listed in a concat manifest into one file
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<()>;

    /// Re-mux `input`, burning in `captions` when given
    async fn render(&self, input: &Path, captions: Option<&Path>, output: &Path) -> Result<()>;
}

/// Concat manifest: one `file '<path>'` line per segment, in order
#[must_use]
pub fn manifest_contents<P: AsRef<Path>>(segments: &[P]) -> String {
    segments
        .iter()
        .map(|segment| {
            let path = segment.as_ref().to_string_lossy().replace('\'', r"'\''");
            format!("file '{path}'\n")
        })
        .collect()
}

pub async fn write_manifest<P: AsRef<Path>>(manifest: &Path, segments: &[P]) -> Result<()> {
    tokio::fs::write(manifest, manifest_contents(segments)).await?;
    Ok(())
}

/// `ffmpeg`-backed muxer
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    program: String,
}

impl FfmpegMuxer {
    #[must_use]
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            program: config.ffmpeg_path.clone(),
        }
    }

    fn concat_args(manifest: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-f", "concat", "-safe", "0", "-i"].map(OsString::from).into();
        args.push(manifest.into());
        args.extend(["-c", "copy"].map(OsString::from));
        args.push(output.into());
        args
    }

    fn render_args(input: &Path, captions: Option<&Path>, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
        match captions {
            Some(captions) => {
                args.push("-vf".into());
                args.push(format!("subtitles={}", subtitle_filter_path(captions)).into());
                args.extend(["-c:a", "copy"].map(OsString::from));
            }
            None => args.extend(["-c:v", "copy", "-c:a", "copy"].map(OsString::from)),
        }
        args.push(output.into());
        args
    }
}

/// Escape a path for use inside an ffmpeg filter argument
fn subtitle_filter_path(path: &Path) -> String {
    let mut escaped = String::new();
    for c in path.to_string_lossy().replace('\\', "/").chars() {
        if matches!(c, ':' | '\'' | ',' | '[' | ']' | ';') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<()> {
        debug!(output = %output.display(), "Merging segments");
        run_tool(&self.program, Self::concat_args(manifest, output)).await
    }

    async fn render(&self, input: &Path, captions: Option<&Path>, output: &Path) -> Result<()> {
        debug!(output = %output.display(), captions = captions.is_some(), "Rendering");
        run_tool(&self.program, Self::render_args(input, captions, output)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_manifest_order_and_quoting() {
        let segments = [PathBuf::from("/rec/a.ts"), PathBuf::from("/rec/it's.ts")];
        assert_eq!(
            manifest_contents(&segments),
            "file '/rec/a.ts'\nfile '/rec/it'\\''s.ts'\n"
        );
    }

    #[tokio::test]
    async fn test_write_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("files.txt");
        write_manifest(&manifest, &[dir.path().join("1.ts")]).await.unwrap();

        let content = std::fs::read_to_string(&manifest).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("file '"));
    }

    #[test]
    fn test_concat_args() {
        let args = FfmpegMuxer::concat_args(Path::new("files.txt"), Path::new("out_ts.ts"));
        assert_eq!(
            args,
            ["-f", "concat", "-safe", "0", "-i", "files.txt", "-c", "copy", "out_ts.ts"].map(OsString::from)
        );
    }

    #[test]
    fn test_render_args() {
        let plain = FfmpegMuxer::render_args(Path::new("in.ts"), None, Path::new("out.mp4"));
        assert_eq!(
            plain,
            ["-y", "-i", "in.ts", "-c:v", "copy", "-c:a", "copy", "out.mp4"].map(OsString::from)
        );

        let captioned =
            FfmpegMuxer::render_args(Path::new("in.ts"), Some(Path::new("C:/rec/danmaku.ass")), Path::new("out.mp4"));
        assert_eq!(captioned[3], "-vf");
        assert_eq!(captioned[4], r"subtitles=C\:/rec/danmaku.ass");
        assert_eq!(captioned[5], "-c:a");
    }
}
