use regex::Regex;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{
    collections::BTreeSet,
    path::PathBuf,
    sync::LazyLock,
};
use tokio::fs;
use tracing::{info, warn};
use url::Url;

use crate::{error::MusicResult, policy::PolicyConfig};

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.)?(youtube|youtu\.be)").expect("valid regex")
});

/// On-disk shape of `blacklist.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct BlacklistDocument {
    #[serde(default)]
    users: BTreeSet<u64>,
    #[serde(default)]
    videos: BTreeSet<String>,
}

/// Banned users and banned content tokens, persisted as one JSON document
/// that is rewritten in full after every change.
#[derive(Debug)]
pub struct BlacklistStore {
    path: PathBuf,
    document: BlacklistDocument,
}

impl BlacklistStore {
    /// Loads the store from `path`; a missing file yields an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> MusicResult<Self> {
        let path = path.into();

        let document = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("📁 No blacklist at {}, starting empty", path.display());
                BlacklistDocument::default()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "📂 Blacklist loaded: {} users, {} video tokens",
            document.users.len(),
            document.videos.len()
        );

        Ok(Self { path, document })
    }

    pub async fn save(&self) -> MusicResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&self.document)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }

    pub fn is_user_banned(&self, user: UserId) -> bool {
        self.document.users.contains(&user.get())
    }

    /// Returns `false` if the user was already banned.
    pub async fn add_user(&mut self, user: UserId) -> MusicResult<bool> {
        if !self.document.users.insert(user.get()) {
            return Ok(false);
        }
        self.save().await?;
        info!("🚫 User {} blacklisted", user);
        Ok(true)
    }

    /// Returns `false` if the user was not banned.
    pub async fn remove_user(&mut self, user: UserId) -> MusicResult<bool> {
        if !self.document.users.remove(&user.get()) {
            return Ok(false);
        }
        self.save().await?;
        info!("✅ User {} removed from blacklist", user);
        Ok(true)
    }

    /// Adds a content token; YouTube URLs are reduced to their video id.
    /// Returns the stored token, or `None` if it was already present.
    pub async fn add_video(&mut self, token: &str) -> MusicResult<Option<String>> {
        let token = normalize_token(token);
        if !self.document.videos.insert(token.clone()) {
            return Ok(None);
        }
        self.save().await?;
        info!("🚫 Content token '{}' blacklisted", token);
        Ok(Some(token))
    }

    /// Returns the removed token, or `None` if it was not present.
    pub async fn remove_video(&mut self, token: &str) -> MusicResult<Option<String>> {
        let token = normalize_token(token);
        if !self.document.videos.remove(&token) {
            return Ok(None);
        }
        self.save().await?;
        info!("✅ Content token '{}' removed from blacklist", token);
        Ok(Some(token))
    }

    pub fn users(&self) -> Vec<UserId> {
        self.document
            .users
            .iter()
            .filter(|id| **id != 0)
            .map(|id| UserId::new(*id))
            .collect()
    }

    pub fn videos(&self) -> Vec<String> {
        self.document.videos.iter().cloned().collect()
    }

    /// Policy view for a request, using the current banned tokens.
    pub fn policy(&self, max_duration: u64) -> PolicyConfig {
        PolicyConfig {
            max_duration,
            banned_terms: self.videos(),
        }
    }
}

/// `https://youtu.be/<id>` and `https://www.youtube.com/watch?v=<id>` become
/// `<id>`; anything else is kept verbatim.
pub fn normalize_token(token: &str) -> String {
    let token = token.trim();
    if !YOUTUBE_URL.is_match(token) {
        return token.to_string();
    }

    let Ok(url) = Url::parse(token) else {
        return token.to_string();
    };

    if url.host_str() == Some("youtu.be") {
        return url.path().trim_start_matches('/').to_string();
    }

    url.query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| token.to_string())
}
