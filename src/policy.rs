//! Content policy applied to resolved media before it is queued.

use crate::{
    error::{MusicError, MusicResult},
    sources::ResolvedMedia,
};

/// Limits in force for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyConfig {
    /// Longest allowed song, in seconds.
    pub max_duration: u64,
    /// Video ids or substrings that block a song, checked in order.
    pub banned_terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    DurationExceeded { duration: u64, max: u64 },
    ContentBlacklisted(String),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    pub fn into_result(self) -> MusicResult<()> {
        match self {
            Verdict::Allowed => Ok(()),
            Verdict::DurationExceeded { duration, max } => {
                Err(MusicError::DurationExceeded { duration, max })
            }
            Verdict::ContentBlacklisted(term) => Err(MusicError::ContentBlacklisted(term)),
        }
    }
}

pub struct PolicyGate;

impl PolicyGate {
    /// Duration first (unknown counts as zero), then the first banned term
    /// contained in title, description, id or uploader. Local files are only
    /// subject to the user blacklist, which is checked elsewhere.
    pub fn check(media: &ResolvedMedia, policy: &PolicyConfig) -> Verdict {
        if media.is_local_file {
            return Verdict::Allowed;
        }

        let duration = media.duration.unwrap_or(0);
        if duration > policy.max_duration {
            return Verdict::DurationExceeded {
                duration,
                max: policy.max_duration,
            };
        }

        let fields = [
            Some(media.title.as_str()),
            media.description.as_deref(),
            media.id.as_deref(),
            media.uploader.as_deref(),
        ];

        policy
            .banned_terms
            .iter()
            .find(|term| fields.iter().flatten().any(|field| field.contains(term.as_str())))
            .map(|term| Verdict::ContentBlacklisted(term.clone()))
            .unwrap_or(Verdict::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn media(duration: Option<u64>) -> ResolvedMedia {
        ResolvedMedia {
            title: "foobar".to_string(),
            uploader: Some("SomeChannel".to_string()),
            creator: None,
            duration,
            description: Some("official video".to_string()),
            id: Some("dQw4w9WgXcQ".to_string()),
            webpage_url: None,
            filename: PathBuf::from("/cache/x.webm"),
            is_local_file: false,
        }
    }

    fn policy(terms: &[&str]) -> PolicyConfig {
        PolicyConfig {
            max_duration: 300,
            banned_terms: terms.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_duration_boundary() {
        assert_eq!(
            PolicyGate::check(&media(Some(301)), &policy(&[])),
            Verdict::DurationExceeded { duration: 301, max: 300 }
        );
        assert_eq!(PolicyGate::check(&media(Some(300)), &policy(&[])), Verdict::Allowed);
    }

    #[test]
    fn test_absent_duration_never_exceeds() {
        let strict = PolicyConfig {
            max_duration: 0,
            banned_terms: Vec::new(),
        };
        assert_eq!(PolicyGate::check(&media(None), &strict), Verdict::Allowed);
    }

    #[test]
    fn test_blacklist_substring_match() {
        assert_eq!(
            PolicyGate::check(&media(Some(10)), &policy(&["foo"])),
            Verdict::ContentBlacklisted("foo".to_string())
        );
        assert_eq!(
            PolicyGate::check(&media(Some(10)), &policy(&["nothing", "absent"])),
            Verdict::Allowed
        );
    }

    #[test]
    fn test_blacklist_checks_every_field_case_sensitively() {
        assert!(!PolicyGate::check(&media(Some(10)), &policy(&["official"])).is_allowed());
        assert!(!PolicyGate::check(&media(Some(10)), &policy(&["dQw4w9WgXcQ"])).is_allowed());
        assert!(!PolicyGate::check(&media(Some(10)), &policy(&["Channel"])).is_allowed());
        assert!(PolicyGate::check(&media(Some(10)), &policy(&["FOOBAR"])).is_allowed());
    }

    #[test]
    fn test_duration_checked_before_blacklist() {
        assert_eq!(
            PolicyGate::check(&media(Some(999)), &policy(&["foo"])),
            Verdict::DurationExceeded { duration: 999, max: 300 }
        );
    }

    #[test]
    fn test_first_matching_term_reported() {
        assert_eq!(
            PolicyGate::check(&media(Some(10)), &policy(&["zzz", "bar", "foo"])),
            Verdict::ContentBlacklisted("bar".to_string())
        );
    }

    #[test]
    fn test_local_files_bypass_content_checks() {
        let local = ResolvedMedia::local("/music/foobar.mp3");
        assert_eq!(PolicyGate::check(&local, &policy(&["foo"])), Verdict::Allowed);
    }
}
