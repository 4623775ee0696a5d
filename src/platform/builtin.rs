//! Built-in platform profiles.
//!
//! Patterns here are compile-time constants; the unit tests build every
//! profile, so a bad pattern fails `cargo test` rather than a user request.

use regex::{Regex, RegexBuilder};

use super::{DirectKind, InterceptionFilter, PageRule, PlatformProfile, ResourceKind};
use crate::media::ContentKind;

/// Id of the fallback profile for URLs no platform claims.
pub const GENERIC_ID: &str = "generic";

/// Request kinds a page player uses to pull media.
const PLAYER_KINDS: &[ResourceKind] = &[
    ResourceKind::Media,
    ResourceKind::Xhr,
    ResourceKind::Fetch,
    ResourceKind::Other,
];

struct Builtin {
    id: &'static str,
    name: &'static str,
    domains: &'static [&'static str],
    direct: Option<DirectKind>,
    intercept: &'static [&'static str],
    media_hosts: &'static [&'static str],
    page_rules: &'static [&'static str],
    referer: Option<&'static str>,
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        id: "youtube",
        name: "YouTube",
        domains: &["youtube.com", "youtube-nocookie.com", "youtu.be"],
        direct: Some(DirectKind::YouTube),
        intercept: &[r"googlevideo\.com/videoplayback"],
        media_hosts: &["googlevideo.com"],
        page_rules: &[
            r#""url":"(https:[^"]+googlevideo\.com[^"]*videoplayback[^"]*)""#,
            r#""url":"([^"]*\.mp4[^"]*)""#,
        ],
        referer: Some("https://www.youtube.com/"),
    },
    Builtin {
        id: "vimeo",
        name: "Vimeo",
        domains: &["vimeo.com"],
        direct: None,
        intercept: &[r"vimeocdn\.com/.+\.(?:mp4|m3u8)", r"akamaized\.net/.+\.mp4"],
        media_hosts: &["vimeocdn.com", "akamaized.net"],
        page_rules: &[
            r#""progressive":\s*\[\s*\{[^\]]*?"url":\s*"([^"]+)""#,
            r#"<meta[^>]+property="og:video(?::url)?"[^>]+content="([^"]+)""#,
        ],
        referer: Some("https://vimeo.com/"),
    },
    Builtin {
        id: "dailymotion",
        name: "Dailymotion",
        domains: &["dailymotion.com", "dai.ly"],
        direct: None,
        intercept: &[r"dmcdn\.net/.+\.(?:mp4|m3u8)", r"\.m3u8(?:\?|$)"],
        media_hosts: &["dmcdn.net", "dailymotion.com"],
        page_rules: &[r#""url":"(https?:[^"]+\.(?:mp4|m3u8)[^"]*)""#],
        referer: Some("https://www.dailymotion.com/"),
    },
    Builtin {
        id: "twitter",
        name: "Twitter",
        domains: &["twitter.com", "x.com"],
        direct: None,
        intercept: &[r"video\.twimg\.com/.+\.(?:mp4|m3u8)"],
        media_hosts: &["video.twimg.com"],
        page_rules: &[r#"(https:(?:\\?/){2}video\.twimg\.com[^"'\s]+\.mp4[^"'\s]*)"#],
        referer: Some("https://x.com/"),
    },
    Builtin {
        id: "instagram",
        name: "Instagram",
        domains: &["instagram.com"],
        direct: None,
        intercept: &[r"(?:cdninstagram\.com|fbcdn\.net)/.+\.mp4"],
        media_hosts: &["cdninstagram.com", "fbcdn.net"],
        page_rules: &[
            r#""video_url":"([^"]+)""#,
            r#"<meta[^>]+property="og:video"[^>]+content="([^"]+)""#,
        ],
        referer: Some("https://www.instagram.com/"),
    },
    Builtin {
        id: "tiktok",
        name: "TikTok",
        domains: &["tiktok.com"],
        direct: None,
        intercept: &[r"(?:tiktokcdn|tiktokv|byteoversea)[\w.-]*\.com/.+(?:video|mime_type=video)"],
        media_hosts: &["tiktokcdn", "tiktokv.com", "byteoversea"],
        page_rules: &[r#""playAddr":"([^"]+)""#, r#""downloadAddr":"([^"]+)""#],
        referer: Some("https://www.tiktok.com/"),
    },
    Builtin {
        id: "facebook",
        name: "Facebook",
        domains: &["facebook.com", "fb.watch"],
        direct: None,
        intercept: &[r"fbcdn\.net/.+\.mp4"],
        media_hosts: &["fbcdn.net"],
        page_rules: &[
            r#""browser_native_hd_url":"([^"]+)""#,
            r#""browser_native_sd_url":"([^"]+)""#,
            r#""playable_url_quality_hd":"([^"]+)""#,
            r#""playable_url":"([^"]+)""#,
        ],
        referer: Some("https://www.facebook.com/"),
    },
    Builtin {
        id: "reddit",
        name: "Reddit",
        domains: &["reddit.com", "redd.it"],
        direct: None,
        intercept: &[r"v\.redd\.it/.+\.(?:mp4|m3u8|mpd)"],
        media_hosts: &["v.redd.it"],
        page_rules: &[r#""fallback_url":\s*"([^"]+)""#],
        referer: Some("https://www.reddit.com/"),
    },
];

/// Anchored, host-aware pattern for a set of domains and their subdomains.
fn domain_pattern(domains: &[&str]) -> String {
    let alternatives = domains
        .iter()
        .map(|d| regex::escape(d))
        .collect::<Vec<_>>()
        .join("|");
    format!(r"^https?://(?:[a-z0-9-]+\.)*(?:{alternatives})(?::\d+)?/")
}

fn compile(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("built-in platform pattern is valid")
}

fn build(entry: &Builtin) -> PlatformProfile {
    PlatformProfile {
        id: entry.id.to_string(),
        display_name: entry.name.to_string(),
        patterns: vec![compile(&domain_pattern(entry.domains))],
        direct: entry.direct,
        interception_filters: entry
            .intercept
            .iter()
            .map(|p| {
                InterceptionFilter::new(p)
                    .expect("built-in interception pattern is valid")
                    .with_kinds(PLAYER_KINDS)
            })
            .collect(),
        media_hosts: entry.media_hosts.iter().map(ToString::to_string).collect(),
        page_rules: entry
            .page_rules
            .iter()
            .map(|p| PageRule::new(p).expect("built-in page rule is valid"))
            .collect(),
        referer: entry.referer.map(ToString::to_string),
        default_title: format!("{}-Video", entry.name),
        content_kind: ContentKind::Video,
    }
}

pub(super) fn profiles() -> Vec<PlatformProfile> {
    BUILTINS.iter().map(build).collect()
}

/// Fallback profile: no URL patterns, no interception, one DOM-scan rule.
pub(super) fn generic() -> PlatformProfile {
    PlatformProfile {
        id: GENERIC_ID.to_string(),
        display_name: "Direct".to_string(),
        patterns: Vec::new(),
        direct: None,
        interception_filters: Vec::new(),
        media_hosts: Vec::new(),
        page_rules: vec![PageRule::new(r#"<(?:video|source)[^>]+src=["']([^"']+)["']"#)
            .expect("built-in page rule is valid")],
        referer: None,
        default_title: "Direct-File".to_string(),
        content_kind: ContentKind::Video,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_compiles() {
        let profiles = profiles();
        assert_eq!(profiles.len(), BUILTINS.len());
        for profile in &profiles {
            assert!(!profile.interception_filters.is_empty(), "{}", profile.id);
            assert!(!profile.page_rules.is_empty(), "{}", profile.id);
            assert!(!profile.media_hosts.is_empty(), "{}", profile.id);
        }
        let _ = generic();
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<_> = BUILTINS.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), BUILTINS.len());
        assert!(!ids.contains(&GENERIC_ID));
    }

    #[test]
    fn domain_pattern_escapes_dots() {
        let re = compile(&domain_pattern(&["dai.ly"]));
        assert!(re.is_match("https://dai.ly/x7tgad0"));
        assert!(!re.is_match("https://daiXly/x7tgad0"));
        assert!(re.is_match("https://www.dai.ly:443/x"));
    }

    #[test]
    fn facebook_rules_prefer_hd() {
        let profile = build(&BUILTINS[6]);
        assert_eq!(profile.id, "facebook");
        let page = r#"{"browser_native_sd_url":"https:\/\/video.fbcdn.net\/sd.mp4","browser_native_hd_url":"https:\/\/video.fbcdn.net\/hd.mp4"}"#;
        let found = profile.page_rules.iter().find_map(|r| r.apply(page));
        assert_eq!(found.as_deref(), Some("https://video.fbcdn.net/hd.mp4"));
    }

    #[test]
    fn generic_rule_scans_video_tags() {
        let profile = generic();
        let page = r#"<html><video controls src="/media/clip.mp4"></video></html>"#;
        assert_eq!(
            profile.page_rules[0].apply(page).as_deref(),
            Some("/media/clip.mp4")
        );
    }
}
