use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the queue and playback core.
///
/// Every variant is recoverable: the command layer renders the `Display`
/// text back to the requester and the guild's session keeps running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MusicError {
    /// The query could not be turned into playable media.
    #[error("Could not retrieve info from input : {0}")]
    Resolution(String),

    /// The query looked like a local path but nothing exists there.
    #[error("File {} not found.", .0.display())]
    FileNotFound(PathBuf),

    #[error("Video is too long (`{duration}` > `{max}`)")]
    DurationExceeded { duration: u64, max: u64 },

    /// Carries the blacklist term that matched.
    #[error("Video content has been blacklisted. If you believe this to be in error, contact staff.")]
    ContentBlacklisted(String),

    #[error("Cannot use this command, {0} has been blacklisted.")]
    UserBlacklisted(String),

    #[error("Playlist is full, try again later.")]
    QueueFull,

    #[error("Playlist is empty.")]
    QueueEmpty,

    #[error("Invalid song position.")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Not playing anything.")]
    NotPlaying,

    #[error("You already voted to skip that song")]
    AlreadyVoted,

    #[error("You are not in the voice channel.")]
    NotInVoiceChannel,

    #[error("You are not in a voice channel nor specified a voice channel for me to join.")]
    NoVoiceChannel,

    #[error("The volume level has to be between 0 and 100.")]
    InvalidVolume,

    /// The media bytes could not be fetched into the cache.
    #[error("Download failed: {0}")]
    Download(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Voice connection error: {0}")]
    Voice(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The guild's control task is gone (bot shutting down).
    #[error("The music session for this server has been shut down.")]
    TenantClosed,
}

impl MusicError {
    /// Whether the error stems from user input rather than infrastructure.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            MusicError::Download(_)
                | MusicError::Playback(_)
                | MusicError::Voice(_)
                | MusicError::Storage(_)
                | MusicError::TenantClosed
        )
    }
}

impl From<std::io::Error> for MusicError {
    fn from(err: std::io::Error) -> Self {
        MusicError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MusicError {
    fn from(err: serde_json::Error) -> Self {
        MusicError::Storage(err.to_string())
    }
}

pub type MusicResult<T> = Result<T, MusicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_split() {
        assert!(MusicError::QueueFull.is_user_facing());
        assert!(MusicError::DurationExceeded { duration: 301, max: 300 }.is_user_facing());
        assert!(!MusicError::Storage("disk".into()).is_user_facing());
        assert!(!MusicError::TenantClosed.is_user_facing());
    }

    #[test]
    fn test_messages_render_details() {
        let err = MusicError::DurationExceeded { duration: 301, max: 300 };
        assert_eq!(err.to_string(), "Video is too long (`301` > `300`)");

        let err = MusicError::FileNotFound(PathBuf::from("/tmp/missing.mp3"));
        assert_eq!(err.to_string(), "File /tmp/missing.mp3 not found.");
    }
}
