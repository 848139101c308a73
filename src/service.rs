//! Entry point for the command layer.
//!
//! [`MusicService`] runs the request pipeline (user blacklist, resolution,
//! content policy, enqueue) on the caller's task and forwards everything
//! else to the guild's control task.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    audio::{
        player::{PlayerBackend, VoiceGateway},
        queue::{QueueEntry, Requester},
        registry::TenantRegistry,
        session::SkipDecision,
        tenant::{Enqueued, Services, SessionSettings, TenantHandle},
    },
    cache::MediaCache,
    config::Config,
    error::{MusicError, MusicResult},
    policy::PolicyGate,
    sources::{ContentResolver, ResolverBackend},
    storage::BlacklistStore,
};

pub struct MusicService {
    resolver: ContentResolver,
    registry: TenantRegistry,
    blacklist: Arc<RwLock<BlacklistStore>>,
    max_duration: u64,
}

impl MusicService {
    pub fn new(
        resolver: ContentResolver,
        registry: TenantRegistry,
        blacklist: BlacklistStore,
        max_duration: u64,
    ) -> Self {
        Self {
            resolver,
            registry,
            blacklist: Arc::new(RwLock::new(blacklist)),
            max_duration,
        }
    }

    /// Wires the production collaborators together.
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn ResolverBackend>,
        player: Arc<dyn PlayerBackend>,
        voice: Arc<dyn VoiceGateway>,
        blacklist: BlacklistStore,
    ) -> Self {
        let services = Arc::new(Services {
            player,
            voice,
            cache: Arc::new(MediaCache::new(backend.clone())),
            settings: SessionSettings::from(config),
        });

        Self::new(
            ContentResolver::new(backend),
            TenantRegistry::new(services),
            blacklist,
            config.max_song_duration,
        )
    }

    /// Resolves `query`, applies the content policy and queues the result.
    ///
    /// `requester_voice` is the requester's current voice channel, joined
    /// when the guild has no configured default.
    pub async fn request(
        &self,
        guild: GuildId,
        query: &str,
        requester: Requester,
        channel: ChannelId,
        requester_voice: Option<ChannelId>,
    ) -> MusicResult<(QueueEntry, Enqueued)> {
        self.ensure_not_banned(&requester).await?;

        let entry = self.resolver.resolve_entry(query, requester, channel).await?;

        let policy = self.blacklist.read().await.policy(self.max_duration);
        PolicyGate::check(entry.media(), &policy).into_result()?;

        let enqueued = self
            .registry
            .get_or_create(guild)
            .enqueue(entry.clone(), requester_voice)
            .await?;

        info!("🎶 {} requested {} in guild {}", entry.requester(), entry.title(), guild);
        Ok((entry, enqueued))
    }

    pub async fn vote_skip(&self, guild: GuildId, voter: &Requester) -> MusicResult<SkipDecision> {
        self.ensure_not_banned(voter).await?;
        self.registry.get_or_create(guild).vote_skip(voter.id).await
    }

    /// Handle for the remaining per-guild operations.
    pub fn tenant(&self, guild: GuildId) -> TenantHandle {
        self.registry.get_or_create(guild)
    }

    pub fn blacklist(&self) -> &Arc<RwLock<BlacklistStore>> {
        &self.blacklist
    }

    pub async fn is_banned(&self, user: UserId) -> bool {
        self.blacklist.read().await.is_user_banned(user)
    }

    /// Stops every guild's playback.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    async fn ensure_not_banned(&self, requester: &Requester) -> MusicResult<()> {
        if self.is_banned(requester.id).await {
            return Err(MusicError::UserBlacklisted(requester.name.clone()));
        }
        Ok(())
    }
}
