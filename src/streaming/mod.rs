//! Live stream production
//!
//! # Architecture
//!
//! ```text
//!  ┌────────┐  bytes   ┌─────────┐  .ts + .m3u8  ┌──────────┐  put   ┌───────────────┐
//!  │ Engine │────────►│ encoder │──────────────►│ uploader │──────►│ stream bucket │
//!  └────────┘  stdin   └─────────┘  segment dir  └──────────┘        └───────────────┘
//!      │                                              │
//!      └──── now_playing.json ──► bucket              └──► StateManager::increment_sequence
//! ```
//!
//! # Modules
//!
//! - [`engine`] - Producer loop and run supervision
//! - [`encoder`] - Encoder subprocess command line and handle
//! - [`uploader`] - Segment directory poller
//! - [`beacon`] - Now-playing document

pub mod beacon;
pub mod encoder;
pub mod engine;
pub mod uploader;

pub use beacon::{NowPlayingBoard, NOW_PLAYING_KEY};
pub use encoder::{segment_pattern, EncoderCommand, EncoderProcess};
pub use engine::{Engine, Played, PlayoutCursor, Selection, TrackKind};
pub use uploader::{segment_sequence, ScanReport, SegmentUploader};
