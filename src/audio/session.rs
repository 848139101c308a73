use serenity::model::id::{ChannelId, UserId};
use std::collections::HashSet;
use tracing::{debug, info};

use super::queue::QueueEntry;
use crate::error::{MusicError, MusicResult};

pub const DEFAULT_VOLUME: f32 = 0.5;
pub const DEFAULT_MIN_SKIPS: usize = 5;

/// Where the guild's playback stands.
///
/// `Loading` and `Playing` both have a current song; `Loading` means it has
/// been dequeued but its media is not on disk yet.
#[derive(Debug, Clone)]
pub enum SessionState {
    Idle,
    Loading { entry: QueueEntry, generation: u64 },
    Playing { entry: QueueEntry, generation: u64 },
}

/// Result of a skip vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    /// Vote counted, threshold not reached yet.
    Counted { votes: usize, needed: usize },
    /// Threshold reached (or the requester voted): the song must be skipped.
    Skip,
}

/// Per-guild "now playing" slot, volume and skip votes.
#[derive(Debug)]
pub struct PlaybackSession {
    state: SessionState,
    volume: f32,
    skip_votes: HashSet<UserId>,
    min_skips: usize,
    voice_channel: Option<ChannelId>,
    generation: u64,
}

impl PlaybackSession {
    pub fn new(volume: f32, min_skips: usize) -> Self {
        Self {
            state: SessionState::Idle,
            volume,
            skip_votes: HashSet::new(),
            min_skips,
            voice_channel: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Loading { entry, .. } | SessionState::Playing { entry, .. } => Some(entry),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, SessionState::Idle)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, SessionState::Playing { .. })
    }

    /// Makes `entry` current while its media loads. Returns the generation
    /// that later [`mark_playing`](Self::mark_playing) must present.
    pub fn begin(&mut self, entry: QueueEntry) -> u64 {
        self.generation += 1;
        self.skip_votes.clear();
        debug!("⏳ Loading {} (generation {})", entry.title(), self.generation);
        self.state = SessionState::Loading {
            entry,
            generation: self.generation,
        };
        self.generation
    }

    /// The entry still loading under `generation`, if nothing superseded it.
    pub fn loading(&self, generation: u64) -> Option<&QueueEntry> {
        match &self.state {
            SessionState::Loading {
                entry,
                generation: current,
            } if *current == generation => Some(entry),
            _ => None,
        }
    }

    /// Loading → Playing for a matching generation.
    pub fn mark_playing(&mut self, generation: u64) -> bool {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Loading {
                entry,
                generation: current,
            } if current == generation => {
                info!("▶️ Now playing: {}", entry.title());
                self.state = SessionState::Playing { entry, generation };
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    /// Takes the current song out and returns to `Idle`.
    pub fn finish(&mut self) -> Option<QueueEntry> {
        self.skip_votes.clear();
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Idle => None,
            SessionState::Loading { entry, .. } | SessionState::Playing { entry, .. } => Some(entry),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) -> MusicResult<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(MusicError::InvalidVolume);
        }
        self.volume = volume;
        Ok(())
    }

    pub fn set_min_skips(&mut self, min_skips: usize) {
        self.min_skips = min_skips;
    }

    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.voice_channel
    }

    pub fn set_voice_channel(&mut self, channel: Option<ChannelId>) {
        self.voice_channel = channel;
    }

    pub fn skip_votes(&self) -> usize {
        self.skip_votes.len()
    }

    pub fn clear_votes(&mut self) {
        self.skip_votes.clear();
    }

    /// Records a skip vote from `voter`.
    ///
    /// `members` is everyone in the bot's voice channel, the bot included.
    /// The song is skipped when any of these holds:
    /// - votes > `min_skips`
    /// - votes ≥ (members − 1) × `skip_percentage`, compared without rounding
    /// - `voter` requested the current song
    pub fn register_vote(
        &mut self,
        voter: UserId,
        members: &[UserId],
        skip_percentage: f64,
    ) -> MusicResult<SkipDecision> {
        let requester = self.current().ok_or(MusicError::NotPlaying)?.requester().id;

        if self.skip_votes.contains(&voter) {
            return Err(MusicError::AlreadyVoted);
        }
        if !members.contains(&voter) {
            return Err(MusicError::NotInVoiceChannel);
        }

        self.skip_votes.insert(voter);
        let votes = self.skip_votes.len();
        let listeners = members.len().saturating_sub(1);

        if votes > self.min_skips
            || meets_percentage(votes, listeners, skip_percentage)
            || voter == requester
        {
            info!("⏭️ Skip vote passed ({} votes, {} listeners)", votes, listeners);
            self.skip_votes.clear();
            return Ok(SkipDecision::Skip);
        }

        Ok(SkipDecision::Counted {
            votes,
            needed: votes_needed(listeners, skip_percentage).min(self.min_skips + 1),
        })
    }
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME, DEFAULT_MIN_SKIPS)
    }
}

fn meets_percentage(votes: usize, listeners: usize, skip_percentage: f64) -> bool {
    votes as f64 >= listeners as f64 * skip_percentage
}

/// Smallest vote count satisfying the percentage rule.
fn votes_needed(listeners: usize, skip_percentage: f64) -> usize {
    (listeners as f64 * skip_percentage).ceil().max(1.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::tests::entry;
    use pretty_assertions::assert_eq;

    fn users(ids: &[u64]) -> Vec<UserId> {
        ids.iter().map(|id| UserId::new(*id)).collect()
    }

    /// Bot (99) + listeners; the requester of `entry` is user 7.
    fn playing_session(min_skips: usize) -> PlaybackSession {
        let mut session = PlaybackSession::new(DEFAULT_VOLUME, min_skips);
        let generation = session.begin(entry("song"));
        assert!(session.mark_playing(generation));
        session
    }

    #[test]
    fn test_percentage_boundary_with_four_listeners() {
        let members = users(&[99, 1, 2, 3, 4]);
        let mut session = playing_session(5);

        assert_eq!(
            session.register_vote(UserId::new(1), &members, 0.5).unwrap(),
            SkipDecision::Counted { votes: 1, needed: 2 }
        );
        assert_eq!(
            session.register_vote(UserId::new(2), &members, 0.5).unwrap(),
            SkipDecision::Skip
        );
        assert_eq!(session.skip_votes(), 0);
    }

    #[test]
    fn test_percentage_boundary_with_three_listeners() {
        // 3 × 0.5 = 1.5: one vote is short, two votes pass.
        let members = users(&[99, 1, 2, 3]);
        let mut session = playing_session(5);

        assert!(matches!(
            session.register_vote(UserId::new(1), &members, 0.5).unwrap(),
            SkipDecision::Counted { votes: 1, .. }
        ));
        assert_eq!(
            session.register_vote(UserId::new(2), &members, 0.5).unwrap(),
            SkipDecision::Skip
        );
    }

    #[test]
    fn test_raw_count_must_strictly_exceed_min_skips() {
        let members = users(&[99, 1, 2, 3, 4, 5, 6, 8, 9, 10, 11]);
        let mut session = playing_session(2);

        for voter in [1, 2] {
            assert!(matches!(
                session.register_vote(UserId::new(voter), &members, 1.0).unwrap(),
                SkipDecision::Counted { .. }
            ));
        }
        assert_eq!(
            session.register_vote(UserId::new(3), &members, 1.0).unwrap(),
            SkipDecision::Skip
        );
    }

    #[test]
    fn test_requester_skips_instantly() {
        let members = users(&[99, 1, 2, 3, 4, 5, 7]);
        let mut session = playing_session(5);

        assert_eq!(
            session.register_vote(UserId::new(7), &members, 1.0).unwrap(),
            SkipDecision::Skip
        );
    }

    #[test]
    fn test_rejected_votes_leave_state_unchanged() {
        let members = users(&[99, 1, 2, 3, 4]);
        let mut session = playing_session(5);

        session.register_vote(UserId::new(1), &members, 1.0).unwrap();
        assert_eq!(
            session.register_vote(UserId::new(1), &members, 1.0),
            Err(MusicError::AlreadyVoted)
        );
        assert_eq!(
            session.register_vote(UserId::new(50), &members, 1.0),
            Err(MusicError::NotInVoiceChannel)
        );
        assert_eq!(session.skip_votes(), 1);
    }

    #[test]
    fn test_vote_requires_current_song() {
        let mut session = PlaybackSession::default();
        assert_eq!(
            session.register_vote(UserId::new(1), &users(&[99, 1]), 0.5),
            Err(MusicError::NotPlaying)
        );
    }

    #[test]
    fn test_transitions_clear_votes_and_ignore_stale_generations() {
        let members = users(&[99, 1, 2, 3, 4]);
        let mut session = playing_session(5);
        session.register_vote(UserId::new(1), &members, 1.0).unwrap();

        let stale = session.begin(entry("next"));
        assert_eq!(session.skip_votes(), 0);
        let fresh = session.begin(entry("after"));

        assert!(session.loading(stale).is_none());
        assert!(!session.mark_playing(stale));
        assert!(session.mark_playing(fresh));
        assert_eq!(session.current().unwrap().title(), "after");

        assert_eq!(session.finish().unwrap().title(), "after");
        assert!(session.is_idle());
        assert!(session.finish().is_none());
    }

    #[test]
    fn test_volume_bounds() {
        let mut session = PlaybackSession::default();
        assert_eq!(session.volume(), 0.5);
        assert_eq!(session.set_volume(1.1), Err(MusicError::InvalidVolume));
        session.set_volume(0.8).unwrap();
        assert_eq!(session.volume(), 0.8);
    }
}
