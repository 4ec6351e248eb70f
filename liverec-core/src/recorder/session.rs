use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::time::Instant;

pub const SESSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Capturing,
    Finalizing,
    Done,
    Failed,
}

/// One capture output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub captured_at: DateTime<Local>,
}

impl Segment {
    /// Only segments larger than `min_bytes` hold usable media
    #[must_use]
    pub const fn is_valid(&self, min_bytes: u64) -> bool {
        self.size_bytes > min_bytes
    }
}

/// One continuous capture-to-finalize cycle.
///
/// Owned by the orchestrator's loop; nothing else mutates it.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Local>,
    /// Monotonic start, the zero point of caption offsets
    pub started: Instant,
    /// Directory holding segments, captions and the concat manifest
    pub dir: PathBuf,
    pub segments: Vec<Segment>,
    pub last_data: Instant,
    pub status: SessionStatus,
}

impl Session {
    #[must_use]
    pub fn new(save_dir: &Path) -> Self {
        let started_at = Local::now();
        let id = started_at.format(SESSION_ID_FORMAT).to_string();
        let now = Instant::now();
        Self {
            dir: save_dir.join(&id),
            id,
            started_at,
            started: now,
            segments: Vec::new(),
            last_data: now,
            status: SessionStatus::Capturing,
        }
    }

    #[must_use]
    pub fn caption_path(&self) -> PathBuf {
        self.dir.join("danmaku.ass")
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join("files.txt")
    }

    /// Fresh timestamped segment path that no earlier segment uses
    #[must_use]
    pub fn next_segment_path(&self) -> PathBuf {
        let stamp = Local::now().format(SESSION_ID_FORMAT).to_string();
        let mut path = self.dir.join(format!("{stamp}.ts"));
        let mut n = 1;
        while path.exists() || self.contains(&path) {
            path = self.dir.join(format!("{stamp}_{n}.ts"));
            n += 1;
        }
        path
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.segments.iter().any(|s| s.path == path)
    }

    /// Record a valid segment and reset the silence clock.
    /// A path already present is not added twice; returns whether it was added.
    pub fn record_segment(&mut self, segment: Segment) -> bool {
        self.last_data = Instant::now();
        if self.contains(&segment.path) {
            return false;
        }
        self.segments.push(segment);
        true
    }

    /// Time since the last valid segment (or session start)
    #[must_use]
    pub fn silence(&self) -> std::time::Duration {
        Instant::now().saturating_duration_since(self.last_data)
    }

    /// Segment paths, first occurrence wins, capture order kept
    #[must_use]
    pub fn deduplicated_paths(&self) -> Vec<PathBuf> {
        let mut seen = std::collections::HashSet::new();
        self.segments
            .iter()
            .filter(|s| seen.insert(s.path.clone()))
            .map(|s| s.path.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn segment(path: &str, size_bytes: u64) -> Segment {
        Segment {
            path: PathBuf::from(path),
            size_bytes,
            captured_at: Local::now(),
        }
    }

    #[test]
    fn test_segment_validity_threshold() {
        let min = 1024 * 1024;
        assert!(!segment("a.ts", 500 * 1024).is_valid(min));
        assert!(!segment("b.ts", min).is_valid(min));
        assert!(segment("c.ts", 2 * min).is_valid(min));
    }

    #[test]
    fn test_record_segment_skips_duplicates() {
        let mut session = Session::new(Path::new("/rec"));
        assert!(session.record_segment(segment("/rec/1.ts", 10)));
        assert!(session.record_segment(segment("/rec/2.ts", 10)));
        assert!(!session.record_segment(segment("/rec/1.ts", 20)));

        assert_eq!(
            session.deduplicated_paths(),
            vec![PathBuf::from("/rec/1.ts"), PathBuf::from("/rec/2.ts")]
        );
    }

    #[test]
    fn test_paths_live_under_session_dir() {
        let session = Session::new(Path::new("/rec"));
        assert_eq!(session.dir, Path::new("/rec").join(&session.id));
        assert!(session.caption_path().starts_with(&session.dir));
        assert!(session.manifest_path().ends_with("files.txt"));
        assert_eq!(session.status, SessionStatus::Capturing);
    }

    #[test]
    fn test_next_segment_path_avoids_known_segments() {
        let mut session = Session::new(Path::new("/nonexistent-liverec"));
        let first = session.next_segment_path();
        session.record_segment(Segment {
            path: first.clone(),
            size_bytes: 1,
            captured_at: Local::now(),
        });
        let second = session.next_segment_path();
        assert_ne!(first, second);
        assert_eq!(second.extension().and_then(|e| e.to_str()), Some("ts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_resets_on_segment() {
        let mut session = Session::new(Path::new("/rec"));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(session.silence() >= Duration::from_secs(30));

        session.record_segment(segment("/rec/1.ts", 10));
        assert!(session.silence() < Duration::from_secs(1));
    }
}
