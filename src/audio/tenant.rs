//! Per-guild control task.
//!
//! Each guild gets one [`TenantState`] running on its own tokio task. It is the
//! only code that touches that guild's [`TenantQueue`] and [`PlaybackSession`].
//! Everything else talks to it through a [`TenantHandle`]:
//!
//! - commands are sent as [`ControlMessage`]s carrying a `oneshot` reply;
//! - background work (download readiness, player completion) comes back as
//!   `Downloaded` / `TrackEnded` messages on the same channel.
//!
//! Waiting for a download never blocks the task: the dequeued song sits in
//! the `Loading` state while a helper task waits on its ready signal.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};
use tracing::{debug, info, warn};

use super::{
    player::{CompletionNotifier, PlayableSource, PlayerBackend, VoiceGateway},
    queue::{EntryId, QueueEntry, TenantQueue, DEFAULT_CAPACITY},
    session::{PlaybackSession, SessionState, SkipDecision, DEFAULT_MIN_SKIPS, DEFAULT_VOLUME},
};
use crate::{
    cache::MediaCache,
    config::Config,
    error::{MusicError, MusicResult},
};

type Reply<T> = oneshot::Sender<MusicResult<T>>;

/// Per-guild defaults applied when a session is created.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub capacity: usize,
    pub default_volume: f32,
    pub min_skips: usize,
    pub skip_percentage: f64,
    pub default_channels: HashMap<GuildId, ChannelId>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            default_volume: DEFAULT_VOLUME,
            min_skips: DEFAULT_MIN_SKIPS,
            skip_percentage: 0.5,
            default_channels: HashMap::new(),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            capacity: config.max_queue_size,
            default_volume: config.default_volume,
            min_skips: config.min_skips,
            skip_percentage: config.skip_percentage,
            default_channels: config
                .voice_channels
                .iter()
                .filter(|(guild, channel)| **guild != 0 && **channel != 0)
                .map(|(guild, channel)| (GuildId::new(*guild), ChannelId::new(*channel)))
                .collect(),
        }
    }
}

/// Collaborators shared by every guild's control task.
pub struct Services {
    pub player: Arc<dyn PlayerBackend>,
    pub voice: Arc<dyn VoiceGateway>,
    pub cache: Arc<MediaCache>,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The session was idle; this song starts right away.
    PlayingNow,
    /// 1-based position in the pending queue.
    Queued { position: usize },
}

#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub entry: QueueEntry,
    pub volume: f32,
    pub channel: Option<ChannelId>,
    pub paused: bool,
    /// Dequeued, media still downloading.
    pub loading: bool,
}

impl fmt::Display for NowPlaying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.loading { "Loading" } else { "Playing" };
        write!(f, "{} {}. Volume at {}", verb, self.entry, self.volume * 100.0)?;
        if let Some(channel) = self.channel {
            write!(f, " in <#{}>", channel)?;
        }
        if self.paused {
            f.write_str(" (paused)")?;
        }
        Ok(())
    }
}

/// Messages processed by a guild's control task, in arrival order.
pub enum ControlMessage {
    Enqueue {
        entry: QueueEntry,
        /// Voice channel to join when the guild has no configured default.
        fallback_channel: Option<ChannelId>,
        reply: Reply<Enqueued>,
    },
    Remove {
        index: usize,
        reply: Reply<QueueEntry>,
    },
    Clear {
        reply: Reply<usize>,
    },
    VoteSkip {
        voter: UserId,
        reply: Reply<SkipDecision>,
    },
    ForceSkip {
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    SetVolume {
        volume: f32,
        reply: Reply<()>,
    },
    SetMinSkips {
        min_skips: usize,
        reply: Reply<()>,
    },
    Join {
        channel: ChannelId,
        reply: Reply<()>,
    },
    Status {
        reply: Reply<Option<NowPlaying>>,
    },
    Listing {
        reply: Reply<String>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    /// The current `Loading` song's media is ready (or failed).
    Downloaded {
        generation: u64,
        outcome: MusicResult<PathBuf>,
    },
    /// Posted by a [`CompletionNotifier`] when a song stops playing.
    TrackEnded {
        entry: EntryId,
        error: Option<String>,
    },
    /// A download finished for an entry that had already been released.
    Orphaned { entry: QueueEntry },
}

/// Queue + session for one guild, owned by its control task.
pub struct TenantState {
    guild: GuildId,
    queue: TenantQueue,
    session: PlaybackSession,
    services: Arc<Services>,
    control: UnboundedSender<ControlMessage>,
}

impl TenantState {
    /// Starts the guild's control task and returns a handle to it.
    pub fn spawn(guild: GuildId, services: Arc<Services>) -> TenantHandle {
        let (control, inbox) = mpsc::unbounded_channel();
        let settings = &services.settings;

        let state = Self {
            guild,
            queue: TenantQueue::new(settings.capacity),
            session: PlaybackSession::new(settings.default_volume, settings.min_skips),
            services: services.clone(),
            control: control.clone(),
        };
        tokio::spawn(state.run(inbox));

        TenantHandle { guild, control }
    }

    async fn run(mut self, mut inbox: UnboundedReceiver<ControlMessage>) {
        info!("🎛️ Control task started for guild {}", self.guild);

        while let Some(message) = inbox.recv().await {
            if !self.handle(message).await {
                break;
            }
        }

        info!("🔚 Control task finished for guild {}", self.guild);
    }

    /// Returns `false` once the task should exit.
    async fn handle(&mut self, message: ControlMessage) -> bool {
        match message {
            ControlMessage::Enqueue {
                entry,
                fallback_channel,
                reply,
            } => {
                let _ = reply.send(self.enqueue(entry, fallback_channel).await);
            }
            ControlMessage::Remove { index, reply } => {
                let _ = reply.send(self.remove(index).await);
            }
            ControlMessage::Clear { reply } => {
                let cleared = self.queue.clear(self.session.current()).await;
                let _ = reply.send(Ok(cleared));
            }
            ControlMessage::VoteSkip { voter, reply } => {
                let _ = reply.send(self.vote_skip(voter).await);
            }
            ControlMessage::ForceSkip { reply } => {
                let _ = reply.send(self.skip_current().await);
            }
            ControlMessage::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            ControlMessage::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            ControlMessage::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(Ok(()));
            }
            ControlMessage::SetVolume { volume, reply } => {
                let _ = reply.send(self.set_volume(volume));
            }
            ControlMessage::SetMinSkips { min_skips, reply } => {
                self.session.set_min_skips(min_skips);
                let _ = reply.send(Ok(()));
            }
            ControlMessage::Join { channel, reply } => {
                let _ = reply.send(self.connect(channel).await);
            }
            ControlMessage::Status { reply } => {
                let _ = reply.send(Ok(self.status().await));
            }
            ControlMessage::Listing { reply } => {
                let _ = reply.send(Ok(self.queue.to_display_string()));
            }
            ControlMessage::Shutdown { reply } => {
                self.stop().await;
                let _ = reply.send(());
                return false;
            }
            ControlMessage::Downloaded {
                generation,
                outcome,
            } => self.on_downloaded(generation, outcome).await,
            ControlMessage::TrackEnded { entry, error } => self.on_track_ended(entry, error).await,
            ControlMessage::Orphaned { entry } => {
                MediaCache::release(&entry, self.queue.iter().chain(self.session.current())).await;
            }
        }
        true
    }

    async fn enqueue(
        &mut self,
        entry: QueueEntry,
        fallback_channel: Option<ChannelId>,
    ) -> MusicResult<Enqueued> {
        if self.queue.is_full() {
            return Err(MusicError::QueueFull);
        }

        self.ensure_voice(fallback_channel).await?;

        let position = self.queue.enqueue(entry.clone())?;
        let control = self.control.clone();
        self.services.cache.spawn_ensure(entry, move |entry| {
            let _ = control.send(ControlMessage::Orphaned { entry });
        });

        if self.session.is_idle() {
            self.advance().await;
            Ok(Enqueued::PlayingNow)
        } else {
            Ok(Enqueued::Queued { position })
        }
    }

    async fn remove(&mut self, index: usize) -> MusicResult<QueueEntry> {
        let removed = self.queue.remove_at(index)?;
        MediaCache::release(&removed, self.queue.iter().chain(self.session.current())).await;
        Ok(removed)
    }

    async fn vote_skip(&mut self, voter: UserId) -> MusicResult<SkipDecision> {
        let members = self
            .session
            .voice_channel()
            .map(|channel| self.services.voice.channel_members(self.guild, channel))
            .unwrap_or_default();

        let decision =
            self.session
                .register_vote(voter, &members, self.services.settings.skip_percentage)?;

        if decision == SkipDecision::Skip {
            self.skip_current().await?;
        }
        Ok(decision)
    }

    /// Ends the current song now. A playing song is stopped at the player and
    /// the transition happens when its completion arrives; a song still
    /// loading is dropped directly.
    async fn skip_current(&mut self) -> MusicResult<()> {
        if self.session.is_playing() {
            self.session.clear_votes();
            info!("⏭️ Skipping in guild {}", self.guild);
            return self
                .services
                .player
                .stop(self.guild)
                .map_err(|e| MusicError::Playback(e.to_string()));
        }

        if self.session.current().is_some() {
            self.finish_current(None).await;
            return Ok(());
        }

        Err(MusicError::NotPlaying)
    }

    fn pause(&mut self) -> MusicResult<()> {
        if !self.session.is_playing() {
            return Err(MusicError::NotPlaying);
        }
        self.services
            .player
            .pause(self.guild)
            .map_err(|e| MusicError::Playback(e.to_string()))?;
        info!("⏸️ Paused in guild {}", self.guild);
        Ok(())
    }

    fn resume(&mut self) -> MusicResult<()> {
        if !self.session.is_playing() {
            return Err(MusicError::NotPlaying);
        }
        self.services
            .player
            .resume(self.guild)
            .map_err(|e| MusicError::Playback(e.to_string()))?;
        info!("▶️ Resumed in guild {}", self.guild);
        Ok(())
    }

    /// Clears the queue, drops the current song and leaves voice.
    async fn stop(&mut self) {
        self.queue.clear(None).await;

        let was_playing = self.session.is_playing();
        if let Some(current) = self.session.finish() {
            // The completion this triggers arrives for a retired entry and is
            // ignored.
            if was_playing {
                if let Err(e) = self.services.player.stop(self.guild) {
                    debug!("Player stop failed in guild {}: {}", self.guild, e);
                }
            }
            MediaCache::release(&current, std::iter::empty()).await;
        }

        self.disconnect().await;
        self.services.voice.set_presence(None).await;
        info!("⏹️ Stopped in guild {}", self.guild);
    }

    fn set_volume(&mut self, volume: f32) -> MusicResult<()> {
        self.session.set_volume(volume)?;
        if self.session.is_playing() {
            self.services
                .player
                .set_volume(self.guild, volume)
                .map_err(|e| MusicError::Playback(e.to_string()))?;
        }
        info!("🔊 Volume set to {}% in guild {}", (volume * 100.0) as u8, self.guild);
        Ok(())
    }

    /// The current song, including one still loading: skips act on it too.
    async fn status(&self) -> Option<NowPlaying> {
        let (entry, loading) = match self.session.state() {
            SessionState::Idle => return None,
            SessionState::Loading { entry, .. } => (entry.clone(), true),
            SessionState::Playing { entry, .. } => (entry.clone(), false),
        };
        let paused = !loading && !self.services.player.is_playing(self.guild).await;

        Some(NowPlaying {
            entry,
            volume: self.session.volume(),
            channel: self.session.voice_channel(),
            paused,
            loading,
        })
    }

    async fn ensure_voice(&mut self, fallback_channel: Option<ChannelId>) -> MusicResult<()> {
        if self.session.voice_channel().is_some() {
            return Ok(());
        }

        let channel = self
            .services
            .settings
            .default_channels
            .get(&self.guild)
            .copied()
            .or(fallback_channel)
            .ok_or(MusicError::NoVoiceChannel)?;

        self.connect(channel).await
    }

    async fn connect(&mut self, channel: ChannelId) -> MusicResult<()> {
        self.services
            .voice
            .connect(self.guild, channel)
            .await
            .map_err(|e| MusicError::Voice(e.to_string()))?;
        self.session.set_voice_channel(Some(channel));
        info!("🔊 Connected to voice channel {} in guild {}", channel, self.guild);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.services.voice.disconnect(self.guild).await {
            debug!("Voice disconnect in guild {}: {}", self.guild, e);
        }
        self.session.set_voice_channel(None);
    }

    /// Moves the queue head into the session, or goes idle when empty.
    async fn advance(&mut self) {
        self.session.clear_votes();

        if self.queue.is_empty() {
            self.disconnect().await;
            self.services.voice.set_presence(None).await;
            info!("📭 Queue exhausted in guild {}", self.guild);
            return;
        }

        let Ok(next) = self.queue.dequeue() else {
            return;
        };
        let generation = self.session.begin(next.clone());

        let control = self.control.clone();
        tokio::spawn(async move {
            let outcome = MediaCache::wait_ready(&next).await;
            let _ = control.send(ControlMessage::Downloaded {
                generation,
                outcome,
            });
        });
    }

    async fn on_downloaded(&mut self, generation: u64, outcome: MusicResult<PathBuf>) {
        let Some(entry) = self.session.loading(generation).cloned() else {
            debug!("Ignoring stale download (generation {})", generation);
            return;
        };

        let path = match outcome {
            Ok(path) => path,
            Err(e) => {
                self.finish_current(Some(e.to_string())).await;
                return;
            }
        };

        let source = PlayableSource {
            path,
            volume: self.session.volume(),
            title: entry.title().to_string(),
        };
        let notifier = CompletionNotifier::new(self.control.clone(), entry.id());

        if let Err(e) = self.services.player.play(self.guild, source, notifier).await {
            warn!("❌ Could not start {}: {}", entry.title(), e);
            self.finish_current(Some(e.to_string())).await;
            return;
        }

        self.session.mark_playing(generation);
        self.announce(entry.channel(), format!("Now playing {entry}")).await;
        self.services
            .voice
            .set_presence(Some(entry.title().to_string()))
            .await;
    }

    async fn on_track_ended(&mut self, entry: EntryId, error: Option<String>) {
        if self.session.current().map(QueueEntry::id) != Some(entry) {
            debug!("Ignoring completion of {:?}, no longer current", entry);
            return;
        }
        self.finish_current(error).await;
    }

    /// Retires the current song (reporting `error` to its channel) and moves
    /// on to the next one.
    async fn finish_current(&mut self, error: Option<String>) {
        let Some(finished) = self.session.finish() else {
            return;
        };

        if let Some(error) = error {
            self.announce(
                finished.channel(),
                format!("An error has occurred while playing {finished}: {error}"),
            )
            .await;
        }

        MediaCache::release(&finished, self.queue.iter()).await;
        self.advance().await;
    }

    async fn announce(&self, channel: ChannelId, content: String) {
        if let Err(e) = self.services.voice.announce(channel, content).await {
            warn!("Could not send message to channel {}: {}", channel, e);
        }
    }
}

/// Cheap, cloneable access to a guild's control task.
#[derive(Clone)]
pub struct TenantHandle {
    guild: GuildId,
    control: UnboundedSender<ControlMessage>,
}

impl TenantHandle {
    pub fn guild(&self) -> GuildId {
        self.guild
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    async fn request<T>(&self, message: impl FnOnce(Reply<T>) -> ControlMessage) -> MusicResult<T> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(message(reply))
            .map_err(|_| MusicError::TenantClosed)?;
        response.await.map_err(|_| MusicError::TenantClosed)?
    }

    pub async fn enqueue(
        &self,
        entry: QueueEntry,
        fallback_channel: Option<ChannelId>,
    ) -> MusicResult<Enqueued> {
        self.request(|reply| ControlMessage::Enqueue {
            entry,
            fallback_channel,
            reply,
        })
        .await
    }

    /// Removes the pending entry at 0-based `index`.
    pub async fn remove_at(&self, index: usize) -> MusicResult<QueueEntry> {
        self.request(|reply| ControlMessage::Remove { index, reply })
            .await
    }

    pub async fn clear(&self) -> MusicResult<usize> {
        self.request(|reply| ControlMessage::Clear { reply }).await
    }

    pub async fn vote_skip(&self, voter: UserId) -> MusicResult<SkipDecision> {
        self.request(|reply| ControlMessage::VoteSkip { voter, reply })
            .await
    }

    pub async fn force_skip(&self) -> MusicResult<()> {
        self.request(|reply| ControlMessage::ForceSkip { reply }).await
    }

    pub async fn pause(&self) -> MusicResult<()> {
        self.request(|reply| ControlMessage::Pause { reply }).await
    }

    pub async fn resume(&self) -> MusicResult<()> {
        self.request(|reply| ControlMessage::Resume { reply }).await
    }

    pub async fn stop(&self) -> MusicResult<()> {
        self.request(|reply| ControlMessage::Stop { reply }).await
    }

    /// `volume` in 0.0..=1.0.
    pub async fn set_volume(&self, volume: f32) -> MusicResult<()> {
        self.request(|reply| ControlMessage::SetVolume { volume, reply })
            .await
    }

    pub async fn set_min_skips(&self, min_skips: usize) -> MusicResult<()> {
        self.request(|reply| ControlMessage::SetMinSkips { min_skips, reply })
            .await
    }

    pub async fn join(&self, channel: ChannelId) -> MusicResult<()> {
        self.request(|reply| ControlMessage::Join { channel, reply })
            .await
    }

    pub async fn status(&self) -> MusicResult<Option<NowPlaying>> {
        self.request(|reply| ControlMessage::Status { reply }).await
    }

    pub async fn listing(&self) -> MusicResult<String> {
        self.request(|reply| ControlMessage::Listing { reply }).await
    }

    /// Stops the guild and ends its control task.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.control.send(ControlMessage::Shutdown { reply }).is_ok() {
            let _ = done.await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        audio::queue::Requester,
        sources::{MockResolverBackend, ResolvedMedia},
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    pub(crate) type Started = (String, f32, Arc<CompletionNotifier>);

    /// Player that reports every started song and fires the completion hook
    /// on `stop`, like a real audio driver would.
    pub(crate) struct FakePlayer {
        started: UnboundedSender<Started>,
        current: Mutex<Option<Arc<CompletionNotifier>>>,
        pub(crate) stops: AtomicUsize,
        pub(crate) volumes: Mutex<Vec<f32>>,
        pub(crate) paused: Mutex<bool>,
    }

    #[async_trait]
    impl PlayerBackend for FakePlayer {
        async fn play(
            &self,
            _guild: GuildId,
            source: PlayableSource,
            on_complete: CompletionNotifier,
        ) -> Result<()> {
            let notifier = Arc::new(on_complete);
            *self.current.lock() = Some(notifier.clone());
            *self.paused.lock() = false;
            let _ = self.started.send((source.title, source.volume, notifier));
            Ok(())
        }

        fn pause(&self, _guild: GuildId) -> Result<()> {
            *self.paused.lock() = true;
            Ok(())
        }

        fn resume(&self, _guild: GuildId) -> Result<()> {
            *self.paused.lock() = false;
            Ok(())
        }

        fn stop(&self, _guild: GuildId) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if let Some(notifier) = self.current.lock().take() {
                notifier.notify(None);
            }
            Ok(())
        }

        fn set_volume(&self, _guild: GuildId, volume: f32) -> Result<()> {
            self.volumes.lock().push(volume);
            Ok(())
        }

        async fn is_playing(&self, _guild: GuildId) -> bool {
            self.current.lock().is_some() && !*self.paused.lock()
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeVoice {
        pub(crate) members: Mutex<Vec<UserId>>,
        pub(crate) connects: Mutex<Vec<ChannelId>>,
        pub(crate) disconnects: AtomicUsize,
        pub(crate) announcements: Mutex<Vec<(ChannelId, String)>>,
        pub(crate) presence: Mutex<Option<String>>,
    }

    #[async_trait]
    impl VoiceGateway for FakeVoice {
        async fn connect(&self, _guild: GuildId, channel: ChannelId) -> Result<()> {
            self.connects.lock().push(channel);
            Ok(())
        }

        async fn disconnect(&self, _guild: GuildId) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn channel_members(&self, _guild: GuildId, _channel: ChannelId) -> Vec<UserId> {
            self.members.lock().clone()
        }

        async fn announce(&self, channel: ChannelId, content: String) -> Result<()> {
            self.announcements.lock().push((channel, content));
            Ok(())
        }

        async fn set_presence(&self, title: Option<String>) {
            *self.presence.lock() = title;
        }
    }

    pub(crate) struct Harness {
        pub(crate) handle: TenantHandle,
        pub(crate) services: Arc<Services>,
        pub(crate) player: Arc<FakePlayer>,
        pub(crate) voice: Arc<FakeVoice>,
        pub(crate) started: UnboundedReceiver<Started>,
        pub(crate) dir: tempfile::TempDir,
    }

    impl Harness {
        pub(crate) fn new(backend: MockResolverBackend, settings: SessionSettings) -> Self {
            let (started_tx, started) = mpsc::unbounded_channel();
            let player = Arc::new(FakePlayer {
                started: started_tx,
                current: Mutex::new(None),
                stops: AtomicUsize::new(0),
                volumes: Mutex::new(Vec::new()),
                paused: Mutex::new(false),
            });
            let voice = Arc::new(FakeVoice::default());
            let services = Arc::new(Services {
                player: player.clone(),
                voice: voice.clone(),
                cache: Arc::new(MediaCache::new(Arc::new(backend))),
                settings,
            });

            Self {
                handle: TenantState::spawn(GuildId::new(1), services.clone()),
                services,
                player,
                voice,
                started,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        pub(crate) fn local(&self, title: &str) -> QueueEntry {
            let path = self.dir.path().join(format!("{title}.mp3"));
            std::fs::write(&path, b"audio").unwrap();
            QueueEntry::new(
                ResolvedMedia::local(path),
                Requester::new(UserId::new(7), "bob"),
                ChannelId::new(100),
            )
        }

        pub(crate) async fn next_started(&mut self) -> Started {
            tokio::time::timeout(Duration::from_secs(2), self.started.recv())
                .await
                .expect("a song should start")
                .expect("player channel open")
        }

        /// Round-trips through the control task so every earlier message has
        /// been processed.
        pub(crate) async fn settle(&self) -> Option<NowPlaying> {
            self.handle.status().await.unwrap()
        }
    }

    fn harness() -> Harness {
        Harness::new(MockResolverBackend::new(), SessionSettings::default())
    }

    const VOICE: Option<ChannelId> = Some(ChannelId::new(10));

    /// Fires the notifier from a non-tokio thread, like an audio driver.
    fn finish_from_driver_thread(notifier: Arc<CompletionNotifier>, error: Option<&str>) {
        let error = error.map(str::to_string);
        std::thread::spawn(move || notifier.notify(error))
            .join()
            .unwrap();
    }

    #[tokio::test]
    async fn test_plays_queue_through_then_goes_idle() {
        let mut h = harness();

        assert_eq!(h.handle.enqueue(h.local("a"), VOICE).await, Ok(Enqueued::PlayingNow));
        assert_eq!(
            h.handle.enqueue(h.local("b"), VOICE).await,
            Ok(Enqueued::Queued { position: 1 })
        );

        let (title, volume, a_done) = h.next_started().await;
        assert_eq!(title, "a");
        assert_eq!(volume, DEFAULT_VOLUME);
        assert_eq!(h.settle().await.unwrap().entry.title(), "a");
        assert_eq!(h.voice.presence.lock().clone(), Some("a".to_string()));

        finish_from_driver_thread(a_done, None);

        let (title, _, b_done) = h.next_started().await;
        assert_eq!(title, "b");
        assert_eq!(h.voice.disconnects.load(Ordering::SeqCst), 0);

        finish_from_driver_thread(b_done, None);

        assert!(h.settle().await.is_none());
        assert_eq!(h.voice.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(h.voice.presence.lock().clone(), None);
        assert_eq!(h.voice.connects.lock().clone(), vec![ChannelId::new(10)]);

        let announced: Vec<String> = h
            .voice
            .announcements
            .lock()
            .iter()
            .map(|(_, text)| text.clone())
            .collect();
        assert_eq!(
            announced,
            vec![
                "Now playing `a` from `local file` added by `bob`".to_string(),
                "Now playing `b` from `local file` added by `bob`".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_playback_error_is_reported_and_queue_continues() {
        let mut h = harness();
        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.handle.enqueue(h.local("b"), VOICE).await.unwrap();

        let (_, _, a_done) = h.next_started().await;
        finish_from_driver_thread(a_done, Some("decoder exploded"));

        let (title, _, _) = h.next_started().await;
        assert_eq!(title, "b");
        assert!(h.voice.announcements.lock().contains(&(
            ChannelId::new(100),
            "An error has occurred while playing `a` from `local file` added by `bob`: decoder exploded"
                .to_string()
        )));
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_ignored() {
        let mut h = harness();
        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.handle.enqueue(h.local("b"), VOICE).await.unwrap();
        h.handle.enqueue(h.local("c"), VOICE).await.unwrap();

        let (_, _, a_done) = h.next_started().await;
        a_done.notify(None);
        a_done.notify(None);

        let (title, _, _) = h.next_started().await;
        assert_eq!(title, "b");
        assert_eq!(h.settle().await.unwrap().entry.title(), "b");
        assert_eq!(h.handle.listing().await.unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_skip_vote_threshold_stops_current_song() {
        let mut h = harness();
        *h.voice.members.lock() = [99, 1, 2, 3, 4].map(UserId::new).to_vec();

        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.handle.enqueue(h.local("b"), VOICE).await.unwrap();
        h.next_started().await;

        assert_eq!(
            h.handle.vote_skip(UserId::new(1)).await,
            Ok(SkipDecision::Counted { votes: 1, needed: 2 })
        );
        assert_eq!(
            h.handle.vote_skip(UserId::new(1)).await,
            Err(MusicError::AlreadyVoted)
        );
        assert_eq!(
            h.handle.vote_skip(UserId::new(42)).await,
            Err(MusicError::NotInVoiceChannel)
        );
        assert_eq!(h.handle.vote_skip(UserId::new(2)).await, Ok(SkipDecision::Skip));

        let (title, _, _) = h.next_started().await;
        assert_eq!(title, "b");
        assert_eq!(h.player.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_skip_and_nothing_to_skip() {
        let mut h = harness();
        assert_eq!(h.handle.force_skip().await, Err(MusicError::NotPlaying));

        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.next_started().await;
        h.handle.force_skip().await.unwrap();

        assert!(h.settle().await.is_none());
        assert_eq!(h.voice.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_clears_queue_and_ignores_late_completion() {
        let mut h = harness();
        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.handle.enqueue(h.local("b"), VOICE).await.unwrap();
        h.handle.enqueue(h.local("c"), VOICE).await.unwrap();
        h.next_started().await;

        h.handle.stop().await.unwrap();

        assert!(h.settle().await.is_none());
        assert_eq!(h.handle.listing().await.unwrap(), "Current playlist:\n");
        assert_eq!(h.voice.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(h.player.stops.load(Ordering::SeqCst), 1);
        assert!(h.started.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_queue_full_is_reported() {
        let mut h = Harness::new(
            MockResolverBackend::new(),
            SessionSettings {
                capacity: 2,
                ..SessionSettings::default()
            },
        );

        h.handle.enqueue(h.local("playing"), VOICE).await.unwrap();
        h.next_started().await;
        h.handle.enqueue(h.local("one"), VOICE).await.unwrap();
        h.handle.enqueue(h.local("two"), VOICE).await.unwrap();

        assert_eq!(
            h.handle.enqueue(h.local("three"), VOICE).await,
            Err(MusicError::QueueFull)
        );
        assert_eq!(h.handle.listing().await.unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn test_enqueue_needs_a_voice_channel() {
        let h = harness();
        assert_eq!(
            h.handle.enqueue(h.local("a"), None).await,
            Err(MusicError::NoVoiceChannel)
        );
        assert_eq!(h.handle.listing().await.unwrap(), "Current playlist:\n");
    }

    #[tokio::test]
    async fn test_configured_channel_wins_over_requester_channel() {
        let mut h = Harness::new(
            MockResolverBackend::new(),
            SessionSettings {
                default_channels: HashMap::from([(GuildId::new(1), ChannelId::new(55))]),
                ..SessionSettings::default()
            },
        );

        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.next_started().await;
        assert_eq!(h.voice.connects.lock().clone(), vec![ChannelId::new(55)]);
    }

    #[tokio::test]
    async fn test_volume_applies_now_and_to_next_song() {
        let mut h = harness();
        assert_eq!(h.handle.set_volume(1.5).await, Err(MusicError::InvalidVolume));
        h.handle.set_volume(0.2).await.unwrap();
        assert!(h.player.volumes.lock().is_empty());

        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.handle.enqueue(h.local("b"), VOICE).await.unwrap();
        let (_, volume, a_done) = h.next_started().await;
        assert_eq!(volume, 0.2);

        h.handle.set_volume(0.8).await.unwrap();
        assert_eq!(h.player.volumes.lock().clone(), vec![0.8]);

        a_done.notify(None);
        let (_, volume, _) = h.next_started().await;
        assert_eq!(volume, 0.8);
    }

    #[tokio::test]
    async fn test_pause_resume_reflected_in_status() {
        let mut h = harness();
        assert_eq!(h.handle.pause().await, Err(MusicError::NotPlaying));

        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.next_started().await;

        h.handle.pause().await.unwrap();
        let status = h.settle().await.unwrap();
        assert!(status.paused);
        assert_eq!(
            status.to_string(),
            "Playing `a` from `local file` added by `bob`. Volume at 50 in <#10> (paused)"
        );

        h.handle.resume().await.unwrap();
        assert!(!h.settle().await.unwrap().paused);
    }

    #[tokio::test]
    async fn test_failed_download_is_reported_and_skipped() {
        let mut backend = MockResolverBackend::new();
        backend
            .expect_download()
            .returning(|_| Err(anyhow::anyhow!("HTTP Error 403")));
        let mut h = Harness::new(backend, SessionSettings::default());

        let remote = QueueEntry::new(
            ResolvedMedia {
                webpage_url: Some("https://www.youtube.com/watch?v=gone".to_string()),
                ..crate::audio::queue::tests::media("gone")
            },
            Requester::new(UserId::new(7), "bob"),
            ChannelId::new(100),
        );

        h.handle.enqueue(remote, VOICE).await.unwrap();
        h.handle.enqueue(h.local("b"), VOICE).await.unwrap();

        let (title, _, _) = h.next_started().await;
        assert_eq!(title, "b");
        assert!(h
            .voice
            .announcements
            .lock()
            .iter()
            .any(|(_, text)| text.ends_with("Download failed: HTTP Error 403")));
    }

    #[tokio::test]
    async fn test_remove_and_min_skips() {
        let mut h = harness();
        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.next_started().await;
        h.handle.enqueue(h.local("b"), VOICE).await.unwrap();
        h.handle.enqueue(h.local("c"), VOICE).await.unwrap();

        assert_eq!(h.handle.remove_at(0).await.unwrap().title(), "b");
        assert!(matches!(
            h.handle.remove_at(5).await,
            Err(MusicError::IndexOutOfRange { index: 5, len: 1 })
        ));
        assert!(h.handle.listing().await.unwrap().contains("1. `c`"));

        // With min_skips 0 a single vote exceeds the raw threshold.
        *h.voice.members.lock() = (1..=20).map(UserId::new).collect();
        h.handle.set_min_skips(0).await.unwrap();
        assert_eq!(h.handle.vote_skip(UserId::new(3)).await, Ok(SkipDecision::Skip));
        let (title, _, _) = h.next_started().await;
        assert_eq!(title, "c");
    }

    fn remote_at(path: &std::path::Path, title: &str) -> QueueEntry {
        QueueEntry::new(
            ResolvedMedia {
                filename: path.to_path_buf(),
                webpage_url: Some(format!("https://www.youtube.com/watch?v={title}")),
                ..crate::audio::queue::tests::media(title)
            },
            Requester::new(UserId::new(7), "bob"),
            ChannelId::new(100),
        )
    }

    #[tokio::test]
    async fn test_clear_keeps_the_file_of_the_playing_song() {
        let mut h = harness();
        let path = h.dir.path().join("shared.webm");
        std::fs::write(&path, b"audio").unwrap();

        h.handle.enqueue(remote_at(&path, "shared"), VOICE).await.unwrap();
        h.next_started().await;
        h.handle.enqueue(remote_at(&path, "shared"), VOICE).await.unwrap();

        assert_eq!(h.handle.clear().await, Ok(1));
        assert_eq!(h.settle().await.unwrap().entry.title(), "shared");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_late_download_is_kept_while_still_queued() {
        let mut h = harness();
        let path = h.dir.path().join("late.webm");
        std::fs::write(&path, b"audio").unwrap();

        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.next_started().await;
        h.handle.enqueue(remote_at(&path, "late"), VOICE).await.unwrap();

        // A released duplicate whose download only now landed.
        let stale = remote_at(&path, "late");
        assert!(h
            .handle
            .control
            .send(ControlMessage::Orphaned { entry: stale })
            .is_ok());
        h.settle().await;
        assert!(path.exists());

        h.handle.clear().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_status_reports_a_song_still_loading() {
        let mut h = harness();
        let slow = h.local("slow");
        // Nothing fires the ready signal until the test does.
        assert!(slow.claim_download());

        h.handle.enqueue(slow.clone(), VOICE).await.unwrap();
        let status = h.settle().await.unwrap();
        assert!(status.loading);
        assert!(!status.paused);
        assert_eq!(
            status.to_string(),
            "Loading `slow` from `local file` added by `bob`. Volume at 50 in <#10>"
        );

        slow.downloaded().fire(Ok(slow.cached_path()));
        let (title, _, _) = h.next_started().await;
        assert_eq!(title, "slow");
        assert!(!h.settle().await.unwrap().loading);
    }

    #[tokio::test]
    async fn test_shutdown_closes_the_task() {
        let mut h = harness();
        h.handle.enqueue(h.local("a"), VOICE).await.unwrap();
        h.next_started().await;

        h.handle.shutdown().await;
        assert_eq!(h.voice.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(h.handle.status().await.unwrap_err(), MusicError::TenantClosed);
    }
}
