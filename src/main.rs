use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

mod bot;

use crate::bot::JukeboxBot;
use jukebox::{
    audio::songbird_player::{SerenityVoice, SongbirdPlayer},
    config::Config,
    sources::YtDlpBackend,
    storage::BlacklistStore,
    MusicService,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting jukebox v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let backend = Arc::new(YtDlpBackend::new(config.cache_dir.clone()));
    if let Err(e) = backend.verify_dependencies().await {
        warn!("⚠️ yt-dlp check failed, remote requests will fail: {:?}", e);
    }

    let blacklist = BlacklistStore::load(config.blacklist_path()).await?;

    let manager = Songbird::serenity();
    let voice = Arc::new(SerenityVoice::new(manager.clone()));
    let player = Arc::new(SongbirdPlayer::new(manager.clone()));

    let service = Arc::new(MusicService::from_config(
        &config,
        backend,
        player,
        voice.clone(),
        blacklist,
    ));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = JukeboxBot::new(config.clone(), service.clone(), voice);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, stopping all sessions...");
        service.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
