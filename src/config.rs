use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,
    pub privileged_roles: Vec<String>,
    /// Default voice channel per guild, joined automatically on `play`.
    pub voice_channels: HashMap<u64, u64>,

    // Playback
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub min_skips: usize,
    pub skip_percentage: f64,

    // Limits
    pub max_song_duration: u64, // seconds

    // Paths
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Config {
    /// Reads the configuration from the environment (and `.env`, if present),
    /// creating the data and cache directories.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let roles: String = env_or("PRIVILEGED_ROLES", defaults.privileged_roles.join(","))?;
        let channels: String = env_or("VOICE_CHANNELS", String::new())?;

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            command_prefix: env_or("COMMAND_PREFIX", defaults.command_prefix)?,
            privileged_roles: roles
                .split(',')
                .map(|role| role.trim().to_string())
                .filter(|role| !role.is_empty())
                .collect(),
            voice_channels: parse_voice_channels(&channels)?,

            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            min_skips: env_or("MIN_SKIPS", defaults.min_skips)?,
            skip_percentage: env_or("SKIP_PERCENTAGE", defaults.skip_percentage)?,

            max_song_duration: env_or("MAX_SONG_DURATION", defaults.max_song_duration)?,

            data_dir: env_or("DATA_DIR", defaults.data_dir)?,
            cache_dir: env_or("CACHE_DIR", defaults.cache_dir)?,
        };

        config.validate()?;
        for dir in [&config.data_dir, &config.cache_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;
        }

        Ok(config)
    }

    /// Rejects values the playback core cannot work with: volume and skip
    /// percentage outside 0.0..=1.0, a zero queue capacity or duration limit,
    /// or an empty prefix.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 1.0, got: {}", self.default_volume);
        }

        if !(0.0..=1.0).contains(&self.skip_percentage) {
            anyhow::bail!("Skip percentage must be between 0.0 and 1.0, got: {}", self.skip_percentage);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_song_duration == 0 {
            anyhow::bail!("Max song duration must be greater than 0");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        Ok(())
    }

    /// Location of the persisted blacklist document.
    pub fn blacklist_path(&self) -> PathBuf {
        self.data_dir.join("blacklist.json")
    }

    /// One log-friendly block describing the settings, without the token.
    pub fn summary(&self) -> String {
        format!(
            "Configuration:\n  \
            Commands: prefix '{}', privileged roles [{}]\n  \
            Playback: {}% vol, {} queue slots, {} min skips, {}% vote threshold\n  \
            Limits: {}s max duration\n  \
            Voice: {} default channel(s)\n  \
            Paths: data={}, cache={}",
            self.command_prefix,
            self.privileged_roles.join(", "),
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            self.min_skips,
            (self.skip_percentage * 100.0) as u32,
            self.max_song_duration,
            self.voice_channels.len(),
            self.data_dir.display(),
            self.cache_dir.display(),
        )
    }
}

/// Parses `key` from the environment, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

/// Parses `guild:channel,guild:channel` into a lookup table.
pub fn parse_voice_channels(raw: &str) -> Result<HashMap<u64, u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (guild, channel) = pair
                .split_once(':')
                .with_context(|| format!("Invalid VOICE_CHANNELS entry: {pair}"))?;
            Ok((guild.trim().parse::<u64>()?, channel.trim().parse::<u64>()?))
        })
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),
            privileged_roles: vec!["Helpers".to_string(), "Staff".to_string()],
            voice_channels: HashMap::new(),

            default_volume: 0.5,
            max_queue_size: 50,
            min_skips: 5,
            skip_percentage: 0.5,

            max_song_duration: 600,

            data_dir: "./data".into(),
            cache_dir: "./cache".into(),
        }
    }
}
