//! # Sources Module
//!
//! Turns user requests (search queries, URLs or local file paths) into
//! [`ResolvedMedia`] descriptors.
//!
//! Remote resolution is delegated to a [`ResolverBackend`]; the production
//! backend is [`ytdlp::YtDlpBackend`]. Resolution is two-phase:
//!
//! 1. a cheap, non-downloading probe decides whether the query is a single
//!    item or a collection (playlist, search results) and picks the first
//!    usable item;
//! 2. a full metadata fetch on that item's canonical locator.
//!
//! Resolution runs on the caller's task, never on a guild's control task, so
//! a slow backend cannot hold up playback or other commands.

pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serenity::model::id::ChannelId;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};

use crate::{
    audio::queue::{QueueEntry, Requester},
    error::{MusicError, MusicResult},
};

pub use ytdlp::YtDlpBackend;

/// Raw metadata for one item, as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MediaInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub creator: Option<String>,
    pub description: Option<String>,
    pub duration: Option<f64>,
    pub url: Option<String>,
    pub webpage_url: Option<String>,
    pub extractor: Option<String>,
    pub ext: Option<String>,
    #[serde(rename = "_filename")]
    pub filename: Option<String>,
}

impl MediaInfo {
    /// Locator used for the second resolution phase.
    pub fn canonical_locator(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.webpage_url.as_deref())
            .or(self.id.as_deref())
    }
}

/// Backend answer: either one item or an ordered collection with holes.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoNode {
    Item(MediaInfo),
    Collection(Vec<Option<MediaInfo>>),
}

impl InfoNode {
    /// The item itself, or the first non-null entry of a collection.
    pub fn first_item(self) -> Option<MediaInfo> {
        match self {
            InfoNode::Item(info) => Some(info),
            InfoNode::Collection(entries) => entries.into_iter().flatten().next(),
        }
    }
}

/// Immutable description of playable media.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub title: String,
    pub uploader: Option<String>,
    pub creator: Option<String>,
    /// Whole seconds, rounded up.
    pub duration: Option<u64>,
    pub description: Option<String>,
    pub id: Option<String>,
    pub webpage_url: Option<String>,
    /// Where the bytes live (local files) or will live once downloaded.
    pub filename: PathBuf,
    pub is_local_file: bool,
}

impl ResolvedMedia {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        let filename = path.into();
        let title = filename
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.display().to_string());

        Self {
            title,
            uploader: None,
            creator: Some("local file".to_string()),
            duration: None,
            description: None,
            id: None,
            webpage_url: None,
            filename,
            is_local_file: true,
        }
    }

    pub fn remote(info: MediaInfo, filename: PathBuf) -> Self {
        Self {
            title: info.title.unwrap_or_else(|| "Unknown".to_string()),
            uploader: info.uploader,
            creator: info.creator,
            duration: info
                .duration
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(|secs| secs.ceil() as u64),
            description: info.description,
            id: info.id,
            webpage_url: info.webpage_url.or(info.url),
            filename,
            is_local_file: false,
        }
    }

    /// Creator if known, uploader otherwise.
    pub fn creator_label(&self) -> &str {
        self.creator
            .as_deref()
            .or(self.uploader.as_deref())
            .unwrap_or("unknown")
    }

    /// Locator handed to the backend when the bytes must be downloaded.
    pub fn download_locator(&self) -> Option<&str> {
        self.webpage_url.as_deref().or(self.id.as_deref())
    }
}

/// Media extraction backend (yt-dlp in production).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResolverBackend: Send + Sync {
    /// Cheap metadata probe, no download, collections left unprocessed.
    async fn probe(&self, query: &str) -> Result<Option<InfoNode>>;

    /// Full metadata for a single locator.
    async fn fetch(&self, locator: &str) -> Result<Option<InfoNode>>;

    /// Downloads the media and returns the path of the written file.
    async fn download(&self, locator: &str) -> Result<PathBuf>;

    /// Path a download of `info` would be written to.
    fn cache_path(&self, info: &MediaInfo) -> PathBuf;
}

pub struct ContentResolver {
    backend: Arc<dyn ResolverBackend>,
}

impl ContentResolver {
    pub fn new(backend: Arc<dyn ResolverBackend>) -> Self {
        Self { backend }
    }

    /// Resolves a query, URL or local path into media metadata.
    pub async fn resolve(&self, query: &str) -> MusicResult<ResolvedMedia> {
        let query = query.trim();

        if let Some(path) = local_file(query).await? {
            info!("📁 Local file requested: {}", path.display());
            return Ok(ResolvedMedia::local(path));
        }

        self.resolve_remote(query).await
    }

    /// Resolves and wraps the result into a queue entry for `requester`.
    pub async fn resolve_entry(
        &self,
        query: &str,
        requester: Requester,
        channel: ChannelId,
    ) -> MusicResult<QueueEntry> {
        let media = self.resolve(query).await?;
        Ok(QueueEntry::new(media, requester, channel))
    }

    async fn resolve_remote(&self, query: &str) -> MusicResult<ResolvedMedia> {
        let unresolved = || MusicError::Resolution(query.to_string());

        let sparse = self
            .backend
            .probe(query)
            .await
            .map_err(|e| {
                warn!("Probe failed for '{}': {}", query, e);
                unresolved()
            })?
            .ok_or_else(unresolved)?;

        let selected = sparse.first_item().ok_or_else(unresolved)?;
        let locator = selected
            .canonical_locator()
            .ok_or_else(unresolved)?
            .to_string();
        debug!("🔎 Probe for '{}' selected {}", query, locator);

        let processed = self
            .backend
            .fetch(&locator)
            .await
            .map_err(|e| {
                warn!("Fetch failed for '{}': {}", locator, e);
                unresolved()
            })?
            .ok_or_else(unresolved)?;

        let info = processed
            .first_item()
            .ok_or_else(|| MusicError::Resolution(locator.clone()))?;

        let filename = self.backend.cache_path(&info);
        let media = ResolvedMedia::remote(info, filename);
        info!("🎯 Resolved '{}' to {}", query, media.title);
        Ok(media)
    }
}

/// `Some(path)` for an existing local file; `FileNotFound` for path-looking
/// queries that point nowhere; `None` for everything else.
async fn local_file(query: &str) -> MusicResult<Option<PathBuf>> {
    let path = Path::new(query);
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => return Ok(Some(path.to_path_buf())),
        _ => {}
    }

    if looks_like_path(query) {
        return Err(MusicError::FileNotFound(path.to_path_buf()));
    }

    Ok(None)
}

fn looks_like_path(query: &str) -> bool {
    !query.contains("://")
        && ["/", "./", "../", "~/"]
            .iter()
            .any(|prefix| query.starts_with(prefix))
}
