use serenity::model::id::{ChannelId, UserId};
use std::{
    collections::VecDeque,
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, info};

use crate::{
    cache::{MediaCache, ReadySignal},
    error::{MusicError, MusicResult},
    sources::ResolvedMedia,
};

pub const DEFAULT_CAPACITY: usize = 50;

/// Longest listing that still fits in one chat message.
const DISPLAY_BUDGET: usize = 1995;
const DISPLAY_HEADER: &str = "Current playlist:\n";
const TRUNCATION_MARKER: &str = "[...]";

/// Result of bringing an entry's bytes into the local cache.
pub type DownloadOutcome = Result<PathBuf, String>;

/// Who asked for a song.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

impl Requester {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

impl EntryId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct EntryState {
    downloaded: ReadySignal<DownloadOutcome>,
    download_claimed: AtomicBool,
    discarded: AtomicBool,
}

/// A song request waiting in (or dequeued from) a guild's queue.
///
/// Clones share the same download signal, so the cache task and the playback
/// session observe one readiness transition.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    id: EntryId,
    media: Arc<ResolvedMedia>,
    requester: Requester,
    channel: ChannelId,
    state: Arc<EntryState>,
}

impl QueueEntry {
    pub fn new(media: ResolvedMedia, requester: Requester, channel: ChannelId) -> Self {
        Self {
            id: EntryId::next(),
            media: Arc::new(media),
            requester,
            channel,
            state: Arc::new(EntryState {
                downloaded: ReadySignal::new(),
                download_claimed: AtomicBool::new(false),
                discarded: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn media(&self) -> &ResolvedMedia {
        &self.media
    }

    pub fn title(&self) -> &str {
        &self.media.title
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// Channel the request came from; announcements for this song go there.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn is_local_file(&self) -> bool {
        self.media.is_local_file
    }

    pub fn downloaded(&self) -> &ReadySignal<DownloadOutcome> {
        &self.state.downloaded
    }

    /// File holding the media: the downloaded path once known, the predicted
    /// cache path before that.
    pub fn cached_path(&self) -> PathBuf {
        match self.state.downloaded.peek() {
            Some(Ok(path)) => path,
            _ => self.media.filename.clone(),
        }
    }

    /// First caller wins the right to download.
    pub(crate) fn claim_download(&self) -> bool {
        !self.state.download_claimed.swap(true, Ordering::SeqCst)
    }

    /// Marks the entry as dropped from the queue so a late download gets
    /// deleted as soon as it lands.
    pub(crate) fn discard(&self) {
        self.state.discarded.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_discarded(&self) -> bool {
        self.state.discarded.load(Ordering::SeqCst)
    }
}

impl fmt::Display for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` from `{}`",
            self.media.title,
            self.media.creator_label()
        )?;
        if let Some(duration) = self.media.duration {
            write!(f, " (duration: {})", format_duration(duration))?;
        }
        write!(f, " added by `{}`", self.requester)
    }
}

/// `3725` → `"1 hours, 2 minutes, 5 seconds"`.
pub fn format_duration(total_seconds: u64) -> String {
    let (minutes, seconds) = (total_seconds / 60, total_seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    let (days, hours) = (hours / 24, hours % 24);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days} days"));
    }
    if hours > 0 {
        parts.push(format!("{hours} hours"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes} minutes"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds} seconds"));
    }

    parts.join(", ")
}

/// Bounded FIFO of pending songs for one guild.
#[derive(Debug)]
pub struct TenantQueue {
    items: VecDeque<QueueEntry>,
    capacity: usize,
}

impl TenantQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an entry and returns its 1-based position.
    pub fn enqueue(&mut self, entry: QueueEntry) -> MusicResult<usize> {
        if self.is_full() {
            return Err(MusicError::QueueFull);
        }

        info!("➕ Queued: {}", entry.title());
        self.items.push_back(entry);
        Ok(self.items.len())
    }

    pub fn dequeue(&mut self) -> MusicResult<QueueEntry> {
        let entry = self.items.pop_front().ok_or(MusicError::QueueEmpty)?;
        debug!("➡️ Dequeued: {}", entry.title());
        Ok(entry)
    }

    pub fn remove_at(&mut self, index: usize) -> MusicResult<QueueEntry> {
        let len = self.items.len();
        let entry = self
            .items
            .remove(index)
            .ok_or(MusicError::IndexOutOfRange { index, len })?;
        debug!("❌ Removed position {}: {}", index, entry.title());
        Ok(entry)
    }

    /// Empties the queue and deletes the cached downloads of the removed
    /// entries, except a file `playing` still reads from. Returns how many
    /// entries were dropped.
    pub async fn clear(&mut self, playing: Option<&QueueEntry>) -> usize {
        let removed: Vec<QueueEntry> = self.items.drain(..).collect();
        for entry in &removed {
            MediaCache::release(entry, playing).await;
        }
        info!("🗑️ Queue cleared ({} entries)", removed.len());
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.items.iter()
    }

    pub fn to_list(&self) -> Vec<QueueEntry> {
        self.items.iter().cloned().collect()
    }

    /// Numbered listing, cut with `[...]` once it would exceed the message
    /// budget.
    pub fn to_display_string(&self) -> String {
        let mut listing = String::from(DISPLAY_HEADER);
        let mut used = DISPLAY_HEADER.chars().count();

        for (idx, entry) in self.items.iter().enumerate() {
            let line = format!("{}. {}", idx + 1, entry);
            let cost = line.chars().count() + 1;
            if used + cost > DISPLAY_BUDGET {
                listing.push_str(TRUNCATION_MARKER);
                break;
            }
            listing.push_str(&line);
            listing.push('\n');
            used += cost;
        }

        listing
    }
}

impl Default for TenantQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
