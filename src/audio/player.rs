//! Platform seams used by the playback session: the audio player, the voice
//! gateway, and the completion hook that carries "song finished" back onto the
//! guild's control task.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::{queue::EntryId, tenant::ControlMessage};

/// What the player needs to start a song.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableSource {
    pub path: PathBuf,
    pub volume: f32,
    pub title: String,
}

/// Fired by the player when the current song ends or fails.
///
/// `notify` is synchronous and safe to call from any thread (audio driver
/// threads included). It never touches guild state itself: it only posts a
/// [`ControlMessage::TrackEnded`] to the guild's control task. Only the first
/// call has an effect.
#[derive(Debug)]
pub struct CompletionNotifier {
    control: UnboundedSender<ControlMessage>,
    entry: EntryId,
    fired: AtomicBool,
}

impl CompletionNotifier {
    pub(crate) fn new(control: UnboundedSender<ControlMessage>, entry: EntryId) -> Self {
        Self {
            control,
            entry,
            fired: AtomicBool::new(false),
        }
    }

    pub fn notify(&self, error: Option<String>) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Track {:?} ended (error: {:?})", self.entry, error);
        // The control task may already be gone during shutdown.
        let _ = self.control.send(ControlMessage::TrackEnded {
            entry: self.entry,
            error,
        });
    }
}

/// Audio output for one song at a time per guild.
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    /// Starts `source`; `on_complete` must be notified exactly when playback
    /// ends, whether normally, by `stop`, or with an error.
    async fn play(
        &self,
        guild: GuildId,
        source: PlayableSource,
        on_complete: CompletionNotifier,
    ) -> Result<()>;

    fn pause(&self, guild: GuildId) -> Result<()>;

    fn resume(&self, guild: GuildId) -> Result<()>;

    /// Stops the current song, which fires its completion hook.
    fn stop(&self, guild: GuildId) -> Result<()>;

    /// Adjusts the active source's volume.
    fn set_volume(&self, guild: GuildId, volume: f32) -> Result<()>;

    async fn is_playing(&self, guild: GuildId) -> bool;
}

/// Voice connections, channel membership and chat output.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Joins `channel`, moving if already connected elsewhere in the guild.
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()>;

    async fn disconnect(&self, guild: GuildId) -> Result<()>;

    /// Users currently in `channel`, the bot included.
    fn channel_members(&self, guild: GuildId, channel: ChannelId) -> Vec<UserId>;

    async fn announce(&self, channel: ChannelId, content: String) -> Result<()>;

    /// Shows `title` as the bot's activity, or clears it.
    async fn set_presence(&self, title: Option<String>);
}
