use serenity::{
    model::id::{ChannelId, UserId},
    utils::{parse_channel_mention, parse_user_mention},
};
use thiserror::Error;

use jukebox::error::{MusicError, MusicResult};

/// Discord message size minus some headroom.
const PAGE_BUDGET: usize = 1990;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistAction<T> {
    Add(T),
    Remove(T),
    Show,
}

/// A text command, without its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Status,
    Playlist,
    Join(Option<ChannelId>),
    /// 1-based position as typed by the user.
    Remove(i64),
    Pause,
    Resume,
    Stop,
    /// 0-100 as typed by the user.
    Volume(i64),
    Clear,
    Skip,
    ForceSkip,
    MinSkips(usize),
    BlacklistUser(BlacklistAction<UserId>),
    BlacklistVideo(BlacklistAction<String>),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Missing argument `{0}`. Try `help`.")]
    MissingArgument(&'static str),

    #[error("Invalid value for `{0}`.")]
    InvalidArgument(&'static str),
}

impl Command {
    /// `None` when the message is not addressed to the bot or names no known
    /// command.
    pub fn parse(content: &str, prefix: &str) -> Option<Result<Self, ParseError>> {
        let body = content.trim().strip_prefix(prefix)?;
        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };

        let command = match name.to_lowercase().as_str() {
            "play" => non_empty(rest, "request").map(|query| Command::Play(query.to_string())),
            "status" | "np" => Ok(Command::Status),
            "playlist" | "queue" => Ok(Command::Playlist),
            "join" => optional(rest, "channel", parse_channel).map(Command::Join),
            "remove" => number(rest, "position").map(Command::Remove),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "stop" => Ok(Command::Stop),
            "volume" => number(rest, "volume").map(Command::Volume),
            "clear" => Ok(Command::Clear),
            "skip" => Ok(Command::Skip),
            "force_skip" | "forceskip" => Ok(Command::ForceSkip),
            "minskips" => non_empty(rest, "number")
                .and_then(|n| n.parse().map_err(|_| ParseError::InvalidArgument("number")))
                .map(Command::MinSkips),
            "blacklist" => parse_blacklist(rest),
            "help" => Ok(Command::Help),
            _ => return None,
        };

        Some(command)
    }

    /// Commands reserved for the privileged roles.
    pub fn is_privileged(&self) -> bool {
        !matches!(
            self,
            Command::Play(_) | Command::Status | Command::Playlist | Command::Skip | Command::Help
        )
    }
}

fn parse_blacklist(rest: &str) -> Result<Command, ParseError> {
    let mut words = rest.split_whitespace();
    let kind = words.next().ok_or(ParseError::MissingArgument("user|video"))?;
    let action = words.next().ok_or(ParseError::MissingArgument("add|remove|show"))?;
    let target = words.next();

    match kind {
        "user" => blacklist_action(action, target, "user", parse_user).map(Command::BlacklistUser),
        "video" => blacklist_action(action, target, "content", |t| Some(t.to_string()))
            .map(Command::BlacklistVideo),
        _ => Err(ParseError::InvalidArgument("user|video")),
    }
}

fn blacklist_action<T>(
    action: &str,
    target: Option<&str>,
    name: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<BlacklistAction<T>, ParseError> {
    let parse_target = || -> Result<T, ParseError> {
        let raw = target.ok_or(ParseError::MissingArgument(name))?;
        parse(raw).ok_or(ParseError::InvalidArgument(name))
    };

    match action {
        "add" | "+" => parse_target().map(BlacklistAction::Add),
        "remove" | "-" => parse_target().map(BlacklistAction::Remove),
        "show" => Ok(BlacklistAction::Show),
        _ => Err(ParseError::InvalidArgument("add|remove|show")),
    }
}

fn non_empty<'a>(rest: &'a str, name: &'static str) -> Result<&'a str, ParseError> {
    if rest.is_empty() {
        Err(ParseError::MissingArgument(name))
    } else {
        Ok(rest)
    }
}

fn number(rest: &str, name: &'static str) -> Result<i64, ParseError> {
    non_empty(rest, name)?
        .parse()
        .map_err(|_| ParseError::InvalidArgument(name))
}

fn optional<T>(
    rest: &str,
    name: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ParseError> {
    if rest.is_empty() {
        return Ok(None);
    }
    parse(rest).map(Some).ok_or(ParseError::InvalidArgument(name))
}

fn parse_user(raw: &str) -> Option<UserId> {
    parse_user_mention(raw).or_else(|| raw.parse::<u64>().ok().filter(|id| *id != 0).map(UserId::new))
}

fn parse_channel(raw: &str) -> Option<ChannelId> {
    parse_channel_mention(raw)
        .or_else(|| raw.parse::<u64>().ok().filter(|id| *id != 0).map(ChannelId::new))
}

/// Converts a 1-based queue position into an index.
pub fn queue_index(position: i64) -> MusicResult<usize> {
    usize::try_from(position)
        .ok()
        .and_then(|position| position.checked_sub(1))
        .ok_or(MusicError::IndexOutOfRange {
            index: 0,
            len: 0,
        })
}

/// Converts a 0-100 volume into the session's 0.0-1.0 scale.
pub fn volume_level(volume: i64) -> MusicResult<f32> {
    if !(0..=100).contains(&volume) {
        return Err(MusicError::InvalidVolume);
    }
    Ok(volume as f32 / 100.0)
}

/// Splits `header` + `lines` into messages that fit the chat limit.
pub fn paginate(header: &str, lines: &[String]) -> Vec<String> {
    let mut pages = Vec::new();
    let mut page = header.to_string();

    for line in lines {
        if page.chars().count() + line.chars().count() + 1 > PAGE_BUDGET {
            pages.push(std::mem::take(&mut page));
        }
        if !page.is_empty() {
            page.push('\n');
        }
        page.push_str(line);
    }

    if !page.is_empty() {
        pages.push(page);
    }
    pages
}

pub const HELP: &str = "\
**Music commands**
`play <query|url|path>` queue a song
`status` / `np` show the current song
`playlist` / `queue` show the queue
`skip` vote to skip the current song
**Privileged roles only**
`join [channel]`, `remove <position>`, `pause`, `resume`, `stop`, `volume <0-100>`, \
`clear`, `force_skip`, `minskips <number>`, `blacklist user|video add|remove|show [target]`";
