//! Browser Fingerprint
//!
//! Generates realistic browser request headers. Many media hosts reject
//! requests that do not look like they come from a real browser, and the
//! headers used to fetch a page have to stay consistent with the ones used
//! to fetch the media it references.

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT,
};

/// Recent stable Chrome releases as `(major, full)`.
const CHROME_VERSIONS: &[(&str, &str)] = &[
    ("131", "131.0.6778.139"),
    ("132", "132.0.6834.110"),
    ("133", "133.0.6943.98"),
    ("134", "134.0.6998.88"),
];

/// Recent Firefox releases.
const FIREFOX_VERSIONS: &[&str] = &["133.0", "134.0", "135.0"];

/// Recent Safari releases as `(version, webkit)`.
const SAFARI_VERSIONS: &[(&str, &str)] = &[("17.6", "605.1.15"), ("18.2", "605.1.15")];

/// Browser profile with realistic fingerprint
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub accept_encoding: String,
    pub sec_ch_ua: String,
    pub sec_ch_ua_mobile: String,
    pub sec_ch_ua_platform: String,
}

/// Operating system the fingerprint claims to run on.
#[derive(Debug, Clone, Copy)]
pub enum Platform {
    MacOS,
    Windows,
    Linux,
}

impl Platform {
    fn random() -> Self {
        let mut rng = rand::thread_rng();
        // Realistic distribution: Windows 65%, macOS 20%, Linux 15%
        let roll: f32 = rng.gen();
        if roll < 0.65 {
            Platform::Windows
        } else if roll < 0.85 {
            Platform::MacOS
        } else {
            Platform::Linux
        }
    }

    fn os_string(self) -> &'static str {
        match self {
            Platform::MacOS => "Macintosh; Intel Mac OS X 10_15_7",
            Platform::Windows => "Windows NT 10.0; Win64; x64",
            Platform::Linux => "X11; Linux x86_64",
        }
    }

    fn sec_ch_platform(self) -> &'static str {
        match self {
            Platform::MacOS => "\"macOS\"",
            Platform::Windows => "\"Windows\"",
            Platform::Linux => "\"Linux\"",
        }
    }
}

fn pick<'a, T>(items: &'a [T], fallback: &'a T) -> &'a T {
    items.choose(&mut rand::thread_rng()).unwrap_or(fallback)
}

/// Generate a realistic Chrome browser profile
#[must_use]
pub fn chrome_profile() -> BrowserProfile {
    let platform = Platform::random();
    let (major, full) = *pick(CHROME_VERSIONS, &("131", "131.0.6778.139"));

    let user_agent = format!(
        "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
        platform.os_string(),
        full
    );

    let brands = [
        format!("\"Google Chrome\";v=\"{major}\""),
        format!("\"Chromium\";v=\"{major}\""),
        "\"Not_A Brand\";v=\"24\"".to_string(),
    ];

    BrowserProfile {
        user_agent,
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8".to_string(),
        accept_language: random_accept_language(),
        accept_encoding: "gzip, deflate, br, zstd".to_string(),
        sec_ch_ua: brands.join(", "),
        sec_ch_ua_mobile: "?0".to_string(),
        sec_ch_ua_platform: platform.sec_ch_platform().to_string(),
    }
}

/// Generate a realistic Firefox browser profile
#[must_use]
pub fn firefox_profile() -> BrowserProfile {
    let platform = Platform::random();
    let version = *pick(FIREFOX_VERSIONS, &"133.0");

    let user_agent = format!(
        "Mozilla/5.0 ({}; rv:{version}) Gecko/20100101 Firefox/{version}",
        platform.os_string(),
    );

    BrowserProfile {
        user_agent,
        accept:
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                .to_string(),
        accept_language: random_accept_language(),
        accept_encoding: "gzip, deflate, br, zstd".to_string(),
        // Firefox doesn't send Sec-CH-UA headers
        sec_ch_ua: String::new(),
        sec_ch_ua_mobile: String::new(),
        sec_ch_ua_platform: String::new(),
    }
}

/// Generate a realistic Safari browser profile
#[must_use]
pub fn safari_profile() -> BrowserProfile {
    let (version, webkit) = *pick(SAFARI_VERSIONS, &("17.6", "605.1.15"));

    // Safari only runs on macOS/iOS - always use macOS for desktop
    let user_agent = format!(
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/{webkit} (KHTML, like Gecko) Version/{version} Safari/{webkit}"
    );

    BrowserProfile {
        user_agent,
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        accept_language: random_accept_language(),
        accept_encoding: "gzip, deflate, br".to_string(),
        sec_ch_ua: String::new(),
        sec_ch_ua_mobile: String::new(),
        sec_ch_ua_platform: String::new(),
    }
}

/// Generate a random browser profile (weighted by market share)
#[must_use]
pub fn random_profile() -> BrowserProfile {
    let mut rng = rand::thread_rng();
    let roll: f32 = rng.gen();
    if roll < 0.65 {
        chrome_profile()
    } else if roll < 0.85 {
        safari_profile()
    } else {
        firefox_profile()
    }
}

/// User agent for a headless Chromium session.
///
/// The session really is Chromium, so the claimed browser must be Chrome;
/// only the OS varies. Headless Chrome otherwise advertises `HeadlessChrome`,
/// which many sites block outright.
#[must_use]
pub fn chromium_user_agent() -> String {
    chrome_profile().user_agent
}

fn random_accept_language() -> String {
    let languages = [
        "en-US,en;q=0.9",
        "en-GB,en;q=0.9",
        "en-US,en;q=0.9,de;q=0.8",
        "en-US,en;q=0.9,fr;q=0.8",
        "en-US,en;q=0.9,es;q=0.8",
    ];
    (*pick(&languages, &"en-US,en;q=0.9")).to_string()
}

fn insert(headers: &mut HeaderMap, name: impl Into<HeaderName>, value: &str) {
    if value.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name.into(), value);
    }
}

impl BrowserProfile {
    fn identity_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, USER_AGENT, &self.user_agent);
        insert(&mut headers, ACCEPT_LANGUAGE, &self.accept_language);
        insert(&mut headers, HeaderName::from_static("sec-ch-ua"), &self.sec_ch_ua);
        insert(
            &mut headers,
            HeaderName::from_static("sec-ch-ua-mobile"),
            &self.sec_ch_ua_mobile,
        );
        insert(
            &mut headers,
            HeaderName::from_static("sec-ch-ua-platform"),
            &self.sec_ch_ua_platform,
        );
        headers
    }

    /// Headers for a top-level page navigation.
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = self.identity_headers();
        insert(&mut headers, ACCEPT, &self.accept);
        insert(&mut headers, ACCEPT_ENCODING, &self.accept_encoding);
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
        headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
        headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
        headers
    }

    /// Headers for fetching a media file referenced by a page.
    ///
    /// Media elements never ask for compressed bodies; `identity` keeps
    /// `Content-Length` meaningful for progress reporting.
    pub fn media_headers(&self) -> HeaderMap {
        let mut headers = self.identity_headers();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("video"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("no-cors"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("cross-site"));
        headers
    }
}
