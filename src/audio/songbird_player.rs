//! Songbird-backed implementations of the playback seams.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::{
    gateway::ActivityData,
    model::id::{ChannelId, GuildId, UserId},
    prelude::Context,
};
use songbird::{
    input::{File, Input},
    tracks::{PlayMode, Track, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::player::{CompletionNotifier, PlayableSource, PlayerBackend, VoiceGateway};

/// Plays cached files through the guild's songbird call.
pub struct SongbirdPlayer {
    manager: Arc<Songbird>,
    current_tracks: DashMap<GuildId, TrackHandle>,
}

impl SongbirdPlayer {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            current_tracks: DashMap::new(),
        }
    }

    fn track(&self, guild: GuildId) -> Result<TrackHandle> {
        self.current_tracks
            .get(&guild)
            .map(|track| track.clone())
            .context("No active track")
    }
}

#[async_trait]
impl PlayerBackend for SongbirdPlayer {
    async fn play(
        &self,
        guild: GuildId,
        source: PlayableSource,
        on_complete: CompletionNotifier,
    ) -> Result<()> {
        let call = self
            .manager
            .get(guild)
            .context("Not connected to a voice channel")?;

        // Queued paused so the completion handlers exist before any audio runs.
        let input: Input = File::new(source.path).into();
        let track_handle = {
            let mut handler = call.lock().await;
            handler.play(Track::new(input).volume(source.volume).pause())
        };

        arm_and_start(&track_handle, guild, Arc::new(on_complete))?;

        self.current_tracks.insert(guild, track_handle);
        info!("🎵 Playing {} in guild {}", source.title, guild);
        Ok(())
    }

    fn pause(&self, guild: GuildId) -> Result<()> {
        self.track(guild)?.pause()?;
        Ok(())
    }

    fn resume(&self, guild: GuildId) -> Result<()> {
        self.track(guild)?.play()?;
        Ok(())
    }

    fn stop(&self, guild: GuildId) -> Result<()> {
        if let Some((_, track)) = self.current_tracks.remove(&guild) {
            track.stop()?;
        }
        Ok(())
    }

    fn set_volume(&self, guild: GuildId, volume: f32) -> Result<()> {
        self.track(guild)?.set_volume(volume)?;
        Ok(())
    }

    async fn is_playing(&self, guild: GuildId) -> bool {
        let Ok(track) = self.track(guild) else {
            return false;
        };
        track
            .get_info()
            .await
            .map(|state| matches!(state.playing, PlayMode::Play))
            .unwrap_or(false)
    }
}

/// The parts of a track handle needed to start it safely.
trait TrackControl {
    fn on_event(&self, event: TrackEvent, handler: TrackCompletion) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn halt(&self);
}

impl TrackControl for TrackHandle {
    fn on_event(&self, event: TrackEvent, handler: TrackCompletion) -> Result<()> {
        self.add_event(Event::Track(event), handler)
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    fn start(&self) -> Result<()> {
        self.play()
            .map_err(|e| anyhow::anyhow!("Could not start track: {}", e))
    }

    fn halt(&self) {
        let _ = self.stop();
    }
}

/// Registers the completion handlers on a paused track, then starts it. A
/// track that cannot take the handlers is stopped and reported as an error.
fn arm_and_start(
    track: &impl TrackControl,
    guild: GuildId,
    notifier: Arc<CompletionNotifier>,
) -> Result<()> {
    for event in [TrackEvent::End, TrackEvent::Error] {
        let handler = TrackCompletion {
            guild,
            notifier: notifier.clone(),
        };
        if let Err(e) = track.on_event(event, handler) {
            track.halt();
            anyhow::bail!("Track ended before it started: {}", e);
        }
    }
    track.start()
}

/// Forwards songbird's end/error events to the guild's control task.
struct TrackCompletion {
    guild: GuildId,
    notifier: Arc<CompletionNotifier>,
}

#[async_trait]
impl VoiceEventHandler for TrackCompletion {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{:?}", e)),
                _ => None,
            }),
            _ => None,
        };

        if let Some(e) = &error {
            error!("❌ Track error in guild {}: {}", self.guild, e);
        }
        self.notifier.notify(error);
        None
    }
}

/// Voice connections and chat output through serenity's gateway.
///
/// The gateway context only exists once the shard is ready, so it is attached
/// from the `ready` event.
pub struct SerenityVoice {
    manager: Arc<Songbird>,
    ctx: RwLock<Option<Context>>,
}

impl SerenityVoice {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            ctx: RwLock::new(None),
        }
    }

    pub fn attach(&self, ctx: Context) {
        *self.ctx.write() = Some(ctx);
    }

    fn context(&self) -> Result<Context> {
        self.ctx.read().clone().context("Discord gateway is not ready")
    }
}

#[async_trait]
impl VoiceGateway for SerenityVoice {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
        self.manager
            .join(guild, channel)
            .await
            .map_err(|e| anyhow::anyhow!("Could not join voice channel: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self, guild: GuildId) -> Result<()> {
        if self.manager.get(guild).is_none() {
            return Ok(());
        }
        self.manager.remove(guild).await?;
        info!("👋 Left voice channel in guild {}", guild);
        Ok(())
    }

    fn channel_members(&self, guild: GuildId, channel: ChannelId) -> Vec<UserId> {
        let Ok(ctx) = self.context() else {
            return Vec::new();
        };

        ctx.cache
            .guild(guild)
            .map(|guild| {
                guild
                    .voice_states
                    .values()
                    .filter(|state| state.channel_id == Some(channel))
                    .map(|state| state.user_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn announce(&self, channel: ChannelId, content: String) -> Result<()> {
        let ctx = self.context()?;
        channel.say(&ctx.http, content).await?;
        Ok(())
    }

    async fn set_presence(&self, title: Option<String>) {
        match self.context() {
            Ok(ctx) => ctx.set_activity(title.map(ActivityData::playing)),
            Err(e) => debug!("Skipping presence update: {}", e),
        }
    }
}
