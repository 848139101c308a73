//! # Audio Module
//!
//! Per-guild queueing and playback.
//!
//! ## Architecture
//!
//! ### [`tenant`] - Control Task
//! - One task per guild owns its queue and playback session
//! - Commands and background events are serialized through one channel
//!
//! ### [`queue`] - Queue Management
//! - Bounded FIFO of pending songs with a chat-sized listing
//!
//! ### [`session`] - Playback Session
//! - Idle / Loading / Playing state machine, volume and skip votes
//!
//! ### [`player`] - Seams
//! - Traits for the audio player and voice gateway
//! - Completion hook that is safe to fire from audio threads
//!
//! ### [`songbird_player`] - Discord Voice
//! - Songbird and serenity implementations of the seams
//!
//! ### [`registry`] - Guild Lookup
//! - Lazily spawns control tasks and shuts them all down on exit

pub mod player;
pub mod queue;
pub mod registry;
pub mod session;
pub mod songbird_player;
pub mod tenant;
