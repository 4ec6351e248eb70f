//! Recording session lifecycle
//!
//! `LiveWaiter` detects the offline → live transition, `SessionOrchestrator`
//! then drives one session: captions via `CaptionCollector` in the
//! background, sequential segment captures in the foreground, and the merge
//! into final deliverables once the broadcast is over.

pub mod caption;
pub mod capture;
pub mod live_waiter;
pub mod mux;
pub mod notify;
pub mod orchestrator;
pub mod session;

pub use caption::{CaptionCollector, CaptionEntry, CaptionFile};
pub use capture::{CaptureRequest, StreamCapture, StreamlinkCapture};
pub use live_waiter::{LiveTrigger, LiveWaiter};
pub use mux::{FfmpegMuxer, Muxer};
pub use notify::{LogNotifier, Notifier, TelegramNotifier};
pub use orchestrator::{EndReason, SessionOrchestrator, SessionReport};
pub use session::{Segment, Session, SessionStatus};
