use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use super::{InfoNode, MediaInfo, ResolverBackend};

const FORMAT: &str = "bestaudio/best";

/// yt-dlp output as JSON: an item, or a playlist/search with `entries`.
#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(flatten)]
    info: MediaInfo,
    entries: Option<Vec<Option<MediaInfo>>>,
}

impl From<RawInfo> for InfoNode {
    fn from(raw: RawInfo) -> Self {
        match raw.entries {
            Some(entries) => InfoNode::Collection(entries),
            None => InfoNode::Item(raw.info),
        }
    }
}

/// Resolver backend driving the `yt-dlp` executable.
pub struct YtDlpBackend {
    cache_dir: PathBuf,
}

impl YtDlpBackend {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Checks that yt-dlp and ffmpeg are installed.
    pub async fn verify_dependencies(&self) -> Result<()> {
        for (tool, flag) in [("yt-dlp", "--version"), ("ffmpeg", "-version")] {
            let output = tokio::process::Command::new(tool).arg(flag).output().await;
            match output {
                Ok(output) if output.status.success() => {
                    let banner = String::from_utf8_lossy(&output.stdout);
                    let first = banner.lines().next().unwrap_or_default().trim();
                    info!("✅ {} found: {}", tool, first);
                }
                _ => {
                    error!("❌ {} is missing from PATH", tool);
                    anyhow::bail!("{} not available", tool);
                }
            }
        }
        Ok(())
    }

    fn output_template(&self) -> String {
        self.cache_dir
            .join("%(extractor)s-%(id)s-%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned()
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("yt-dlp");
        cmd.args([
            "--default-search",
            "auto",
            "--no-playlist",
            "--restrict-filenames",
            "--ignore-errors",
            "--no-warnings",
            "--quiet",
            "--force-ipv4",
            "--no-check-certificates",
            "--socket-timeout",
            "30",
            "--retries",
            "3",
            "-f",
            FORMAT,
            "-o",
        ]);
        cmd.arg(self.output_template());
        cmd
    }

    async fn dump_json(&self, target: &str, flat: bool) -> Result<Option<InfoNode>> {
        let mut cmd = self.command();
        cmd.arg("--dump-single-json");
        if flat {
            cmd.arg("--flat-playlist");
        }
        cmd.arg("--").arg(target);

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp returned no info for '{}': {}", target, stderr.trim());
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() || stdout == "null" {
            return Ok(None);
        }

        let raw: RawInfo = serde_json::from_str(stdout)?;
        Ok(Some(raw.into()))
    }
}

#[async_trait]
impl ResolverBackend for YtDlpBackend {
    async fn probe(&self, query: &str) -> Result<Option<InfoNode>> {
        debug!("🔍 yt-dlp probe: {}", query);
        self.dump_json(query, true).await
    }

    async fn fetch(&self, locator: &str) -> Result<Option<InfoNode>> {
        debug!("📋 yt-dlp fetch: {}", locator);
        self.dump_json(locator, false).await
    }

    async fn download(&self, locator: &str) -> Result<PathBuf> {
        info!("⬇️ Downloading {}", locator);

        let mut cmd = self.command();
        cmd.args(["--no-simulate", "--print", "after_move:filepath", "--"])
            .arg(locator);

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp download failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| anyhow::anyhow!("yt-dlp did not report a file for {}", locator))?;

        info!("✅ Downloaded {} to {}", locator, path);
        Ok(PathBuf::from(path))
    }

    fn cache_path(&self, info: &MediaInfo) -> PathBuf {
        if let Some(filename) = &info.filename {
            return PathBuf::from(filename);
        }

        let name = format!(
            "{}-{}-{}.{}",
            info.extractor.as_deref().unwrap_or("generic"),
            info.id.as_deref().unwrap_or("unknown"),
            info.title.as_deref().unwrap_or("unknown"),
            info.ext.as_deref().unwrap_or("webm"),
        );
        self.cache_dir.join(restrict_filename(&name))
    }
}

/// ASCII-only file name in the spirit of `--restrict-filenames`.
fn restrict_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_single_item() {
        let raw: RawInfo = serde_json::from_str(
            r#"{"id": "dQw4w9WgXcQ", "title": "Never Gonna Give You Up",
                "uploader": "RickAstleyVEVO", "duration": 212,
                "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "_filename": "/cache/youtube-dQw4w9WgXcQ-Never_Gonna_Give_You_Up.webm"}"#,
        )
        .unwrap();

        match InfoNode::from(raw) {
            InfoNode::Item(info) => {
                assert_eq!(info.id.as_deref(), Some("dQw4w9WgXcQ"));
                assert_eq!(info.duration, Some(212.0));
                assert_eq!(
                    info.filename.as_deref(),
                    Some("/cache/youtube-dQw4w9WgXcQ-Never_Gonna_Give_You_Up.webm")
                );
            }
            other => panic!("expected item, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_collection_with_holes() {
        let raw: RawInfo = serde_json::from_str(
            r#"{"_type": "playlist", "title": "mix",
                "entries": [null, {"id": "a", "url": "a"}]}"#,
        )
        .unwrap();

        match InfoNode::from(raw) {
            InfoNode::Collection(entries) => {
                assert_eq!(entries.len(), 2);
                assert!(entries[0].is_none());
                assert_eq!(entries[1].as_ref().unwrap().id.as_deref(), Some("a"));
            }
            other => panic!("expected collection, got {other:?}"),
        }
    }

    #[test]
    fn test_cache_path_fallback_is_restricted() {
        let backend = YtDlpBackend::new("/cache");
        let info = MediaInfo {
            id: Some("xyz".to_string()),
            title: Some("Café del Mar".to_string()),
            extractor: Some("youtube".to_string()),
            ext: Some("m4a".to_string()),
            ..MediaInfo::default()
        };

        assert_eq!(
            backend.cache_path(&info),
            PathBuf::from("/cache/youtube-xyz-Caf__del_Mar.m4a")
        );
    }
}
