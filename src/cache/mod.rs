//! # Cache Module
//!
//! Local media cache: makes sure a queued song's bytes are on disk before
//! playback starts, and removes downloaded files once nothing needs them.
//!
//! ## Lifecycle of a cached file
//!
//! - **Download**: started in the background as soon as an entry is queued
//!   ([`MediaCache::spawn_ensure`]). Idempotent per entry, and skipped when
//!   the file already exists (e.g. the same song queued twice).
//! - **Ready**: the entry's [`ReadySignal`] fires with the final path, or
//!   with the download error. Any number of tasks may wait on it.
//! - **Release**: when a song finishes or leaves the queue, its file is
//!   deleted unless another pending entry or the current song plays from the
//!   same file ([`MediaCache::release`]).
//! - **Late landing**: a download that completes after its entry was released
//!   is handed back to the owner, which releases it again against whatever is
//!   queued by then.
//!
//! Local files supplied by users are never deleted.

pub mod ready;

pub use ready::ReadySignal;

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

use crate::{
    audio::queue::QueueEntry,
    error::{MusicError, MusicResult},
    sources::ResolverBackend,
};

pub struct MediaCache {
    backend: Arc<dyn ResolverBackend>,
    downloads: AtomicUsize,
}

impl MediaCache {
    pub fn new(backend: Arc<dyn ResolverBackend>) -> Self {
        Self {
            backend,
            downloads: AtomicUsize::new(0),
        }
    }

    /// Runs [`ensure_local`](Self::ensure_local) on its own task.
    /// `orphaned` receives the entry if its download lands after it was
    /// released.
    pub fn spawn_ensure<F>(self: &Arc<Self>, entry: QueueEntry, orphaned: F)
    where
        F: FnOnce(QueueEntry) + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            if cache.ensure_local(&entry).await {
                orphaned(entry);
            }
        });
    }

    /// Brings the entry's media onto the local disk and fires its ready
    /// signal. A no-op for entries already claimed by an earlier call.
    ///
    /// Returns `true` when a file landed for an entry that was already
    /// released. The file is left in place; whoever owns the queue decides
    /// whether something else still plays from it.
    pub async fn ensure_local(&self, entry: &QueueEntry) -> bool {
        if !entry.claim_download() {
            debug!("Download already handled for {}", entry.title());
            return false;
        }

        let media = entry.media();
        let outcome = if media.is_local_file || file_exists(&media.filename).await {
            Ok(media.filename.clone())
        } else {
            match media.download_locator() {
                Some(locator) => {
                    self.downloads.fetch_add(1, Ordering::Relaxed);
                    self.backend
                        .download(locator)
                        .await
                        .map_err(|e| e.to_string())
                }
                None => Err(format!("no download locator for {}", media.title)),
            }
        };

        let orphaned = match &outcome {
            Ok(path) if entry.is_discarded() && !media.is_local_file => {
                debug!("{} landed after its entry was dropped", path.display());
                true
            }
            Ok(path) => {
                debug!("📦 {} ready at {}", entry.title(), path.display());
                false
            }
            Err(e) => {
                warn!("⚠️ Download failed for {}: {}", entry.title(), e);
                false
            }
        };

        entry.downloaded().fire(outcome);
        orphaned
    }

    /// Suspends until the entry's media is on disk.
    pub async fn wait_ready(entry: &QueueEntry) -> MusicResult<std::path::PathBuf> {
        entry.downloaded().wait().await.map_err(MusicError::Download)
    }

    /// Number of backend downloads started so far.
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::Relaxed)
    }

    /// Deletes a finished or removed entry's download unless one of
    /// `still_referenced` plays from the same file. Returns whether the file
    /// was deleted.
    pub async fn release<'a>(
        entry: &QueueEntry,
        still_referenced: impl IntoIterator<Item = &'a QueueEntry>,
    ) -> bool {
        if entry.is_local_file() {
            return false;
        }

        let path = entry.cached_path();
        if still_referenced
            .into_iter()
            .any(|other| other.id() != entry.id() && other.cached_path() == path)
        {
            debug!("Keeping {}, still in use", path.display());
            return false;
        }

        entry.discard();
        remove_quietly(&path).await;
        true
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Best-effort delete; a missing file is not an error worth reporting.
async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("🧹 Deleted cached file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not delete {}: {}", path.display(), e),
    }
}
