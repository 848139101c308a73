//! # Bot Module
//!
//! Serenity event handler for the text command surface.
//!
//! Each message starting with the configured prefix is parsed into a
//! [`Command`], checked against the privileged roles, then forwarded to the
//! [`MusicService`] or the guild's session handle. Errors coming back from
//! the core are rendered as chat replies; none of them end the session.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Message, Ready},
    async_trait,
    builder::CreateMessage,
    model::channel::ReactionType,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;

use commands::{BlacklistAction, Command};
use jukebox::{
    audio::{queue::Requester, songbird_player::SerenityVoice, tenant::Enqueued},
    config::Config,
    MusicError, MusicResult, MusicService,
};

const HOURGLASS: char = '⏳';
const CHECK_MARK: char = '✅';
const CROSS_MARK: char = '❌';

pub struct JukeboxBot {
    config: Arc<Config>,
    service: Arc<MusicService>,
    voice: Arc<SerenityVoice>,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, service: Arc<MusicService>, voice: Arc<SerenityVoice>) -> Self {
        Self {
            config,
            service,
            voice,
        }
    }

    async fn is_privileged(&self, ctx: &Context, msg: &Message, guild_id: GuildId) -> bool {
        let Ok(member) = msg.member(ctx).await else {
            return false;
        };
        let Some(guild) = ctx.cache.guild(guild_id) else {
            return false;
        };

        member
            .roles
            .iter()
            .filter_map(|role_id| guild.roles.get(role_id))
            .any(|role| self.config.privileged_roles.contains(&role.name))
    }

    /// The author's current voice channel, from the gateway cache.
    fn author_voice_channel(&self, ctx: &Context, msg: &Message, guild_id: GuildId) -> Option<ChannelId> {
        ctx.cache
            .guild(guild_id)?
            .voice_states
            .get(&msg.author.id)?
            .channel_id
    }

    async fn dispatch(
        &self,
        ctx: &Context,
        msg: &Message,
        guild_id: GuildId,
        command: Command,
    ) -> MusicResult<()> {
        let requester = Requester::new(msg.author.id, msg.author.name.clone());

        match command {
            Command::Play(query) => self.play(ctx, msg, guild_id, &query, requester).await?,
            Command::Status => {
                let status = self.service.tenant(guild_id).status().await?;
                let text = status.map_or_else(|| "Not playing.".to_string(), |np| np.to_string());
                say(ctx, msg.channel_id, text).await;
            }
            Command::Playlist => {
                let tenant = self.service.tenant(guild_id);
                let status = tenant.status().await?;
                let text = status.map_or_else(|| "Not playing.".to_string(), |np| np.to_string());
                say(ctx, msg.channel_id, text).await;
                say(ctx, msg.channel_id, tenant.listing().await?).await;
            }
            Command::Join(channel) => {
                let channel = channel
                    .or_else(|| self.author_voice_channel(ctx, msg, guild_id))
                    .ok_or(MusicError::NoVoiceChannel)?;
                self.service.tenant(guild_id).join(channel).await?;
            }
            Command::Remove(position) => {
                let index = commands::queue_index(position)?;
                self.service.tenant(guild_id).remove_at(index).await?;
                say(ctx, msg.channel_id, "Song removed from playlist!").await;
            }
            Command::Pause => self.service.tenant(guild_id).pause().await?,
            Command::Resume => self.service.tenant(guild_id).resume().await?,
            Command::Stop => self.service.tenant(guild_id).stop().await?,
            Command::Volume(volume) => {
                let level = commands::volume_level(volume)?;
                self.service.tenant(guild_id).set_volume(level).await?;
            }
            Command::Clear => {
                self.service.tenant(guild_id).clear().await?;
            }
            Command::Skip => {
                self.service.vote_skip(guild_id, &requester).await?;
                react(ctx, msg, CHECK_MARK).await;
            }
            Command::ForceSkip => self.service.tenant(guild_id).force_skip().await?,
            Command::MinSkips(min_skips) => {
                self.service.tenant(guild_id).set_min_skips(min_skips).await?
            }
            Command::BlacklistUser(action) => self.blacklist_user(ctx, msg, action).await?,
            Command::BlacklistVideo(action) => self.blacklist_video(ctx, msg, action).await?,
            Command::Help => say(ctx, msg.channel_id, commands::HELP).await,
        }

        Ok(())
    }

    async fn play(
        &self,
        ctx: &Context,
        msg: &Message,
        guild_id: GuildId,
        query: &str,
        requester: Requester,
    ) -> MusicResult<()> {
        react(ctx, msg, HOURGLASS).await;
        let voice_channel = self.author_voice_channel(ctx, msg, guild_id);

        let outcome = self
            .service
            .request(guild_id, query, requester, msg.channel_id, voice_channel)
            .await;
        unreact(ctx, msg, HOURGLASS).await;

        match outcome {
            Ok((entry, Enqueued::Queued { position })) => {
                say(
                    ctx,
                    msg.channel_id,
                    format!("Queued {} in position **#{}**", entry, position),
                )
                .await;
                react(ctx, msg, CHECK_MARK).await;
                Ok(())
            }
            Ok((_, Enqueued::PlayingNow)) => {
                react(ctx, msg, CHECK_MARK).await;
                Ok(())
            }
            Err(e) => {
                react(ctx, msg, CROSS_MARK).await;
                Err(e)
            }
        }
    }

    async fn blacklist_user(
        &self,
        ctx: &Context,
        msg: &Message,
        action: BlacklistAction<serenity::all::UserId>,
    ) -> MusicResult<()> {
        let text = match action {
            BlacklistAction::Add(user) => {
                if self.service.blacklist().write().await.add_user(user).await? {
                    format!("Successfully blacklisted user <@{}>!", user)
                } else {
                    "User already blacklisted.".to_string()
                }
            }
            BlacklistAction::Remove(user) => {
                if self.service.blacklist().write().await.remove_user(user).await? {
                    format!("Successfully removed user <@{}> from blacklist!", user)
                } else {
                    "User not blacklisted.".to_string()
                }
            }
            BlacklistAction::Show => {
                let lines: Vec<String> = self
                    .service
                    .blacklist()
                    .read()
                    .await
                    .users()
                    .iter()
                    .map(|user| format!("<@{0}> (ID: {0})", user))
                    .collect();
                dm_pages(ctx, msg, commands::paginate("___Blacklisted users___", &lines)).await;
                return Ok(());
            }
        };

        say(ctx, msg.channel_id, text).await;
        Ok(())
    }

    async fn blacklist_video(
        &self,
        ctx: &Context,
        msg: &Message,
        action: BlacklistAction<String>,
    ) -> MusicResult<()> {
        let text = match action {
            BlacklistAction::Add(token) => {
                match self.service.blacklist().write().await.add_video(&token).await? {
                    Some(token) => format!("Successfully blacklisted video content `{}`!", token),
                    None => "Video content already on blacklist.".to_string(),
                }
            }
            BlacklistAction::Remove(token) => {
                match self.service.blacklist().write().await.remove_video(&token).await? {
                    Some(token) => {
                        format!("Successfully removed video content `{}` from blacklist!", token)
                    }
                    None => "Video content not blacklisted.".to_string(),
                }
            }
            BlacklistAction::Show => {
                let lines: Vec<String> = self
                    .service
                    .blacklist()
                    .read()
                    .await
                    .videos()
                    .iter()
                    .map(|token| format!("- `{}`", token))
                    .collect();
                dm_pages(
                    ctx,
                    msg,
                    commands::paginate("___Blacklisted video content___", &lines),
                )
                .await;
                return Ok(());
            }
        };

        say(ctx, msg.channel_id, text).await;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());
        self.voice.attach(ctx);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let Some(parsed) = Command::parse(&msg.content, &self.config.command_prefix) else {
            return;
        };

        let Some(guild_id) = msg.guild_id else {
            say(&ctx, msg.channel_id, "This command cannot be used in a private message.").await;
            return;
        };

        let command = match parsed {
            Ok(command) => command,
            Err(e) => {
                say(&ctx, msg.channel_id, e.to_string()).await;
                return;
            }
        };

        if command.is_privileged() && !self.is_privileged(&ctx, &msg, guild_id).await {
            debug!("{} lacks the role for {:?}", msg.author.name, command);
            say(&ctx, msg.channel_id, "You do not have permission to use this command.").await;
            return;
        }

        info!("📝 {:?} from {} in guild {}", command, msg.author.name, guild_id);

        if let Err(e) = self.dispatch(&ctx, &msg, guild_id, command).await {
            if e.is_user_facing() {
                say(&ctx, msg.channel_id, e.to_string()).await;
            } else {
                error!("❌ Command failed in guild {}: {}", guild_id, e);
                say(&ctx, msg.channel_id, format!("Something went wrong: {}", e)).await;
            }
        }
    }
}

async fn say(ctx: &Context, channel: ChannelId, content: impl Into<String>) {
    if let Err(e) = channel.say(&ctx.http, content).await {
        warn!("Could not send message to channel {}: {:?}", channel, e);
    }
}

async fn react(ctx: &Context, msg: &Message, emoji: char) {
    if let Err(e) = msg.react(ctx, emoji).await {
        debug!("Could not react to message: {:?}", e);
    }
}

async fn unreact(ctx: &Context, msg: &Message, emoji: char) {
    if let Err(e) = msg
        .delete_reaction(&ctx.http, None, ReactionType::from(emoji))
        .await
    {
        debug!("Could not remove reaction: {:?}", e);
    }
}

async fn dm_pages(ctx: &Context, msg: &Message, pages: Vec<String>) {
    for page in pages {
        if let Err(e) = send_dm(ctx, msg, page).await {
            warn!("Could not DM {}: {:?}", msg.author.name, e);
            return;
        }
    }
}

async fn send_dm(ctx: &Context, msg: &Message, page: String) -> Result<()> {
    msg.author
        .direct_message(ctx, CreateMessage::new().content(page))
        .await?;
    Ok(())
}
