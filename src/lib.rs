//! Per-guild music queue and playback for a Discord bot.
//!
//! Requests are resolved through yt-dlp (or taken from local files), checked
//! against the content policy, then queued on the guild's control task which
//! downloads, plays and cleans up one song at a time.

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod policy;
pub mod service;
pub mod sources;
pub mod storage;

pub use error::{MusicError, MusicResult};
pub use service::MusicService;
