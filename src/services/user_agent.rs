//! Lightweight user agent classification for access logs.
//!
//! Every table is ordered: the first entry with a matching token wins, so
//! more specific products come before the ones they imitate (Edge before
//! Chrome, Chrome before Safari, Android before Linux, iOS before macOS).

use crate::models::DeviceType;

const TABLET_TOKENS: &[&str] = &["iPad", "Tablet", "Kindle", "Silk/", "PlayBook"];

const MOBILE_TOKENS: &[&str] = &[
    "Mobi",
    "iPhone",
    "iPod",
    "Android",
    "Windows Phone",
    "BlackBerry",
    "Opera Mini",
];

const BROWSERS: &[(&str, &[&str])] = &[
    ("Edge", &["Edg/", "Edge/", "EdgA/", "EdgiOS/"]),
    ("Opera", &["OPR/", "Opera"]),
    ("Samsung Internet", &["SamsungBrowser/"]),
    ("Firefox", &["Firefox/", "FxiOS/"]),
    ("Chrome", &["Chrome/", "CriOS/"]),
    ("Safari", &["Safari/"]),
    ("Internet Explorer", &["MSIE ", "Trident/"]),
];

const OPERATING_SYSTEMS: &[(&str, &[&str])] = &[
    ("Windows", &["Windows"]),
    ("Android", &["Android"]),
    ("iOS", &["iPhone", "iPad", "iPod"]),
    ("macOS", &["Macintosh", "Mac OS X"]),
    ("Chrome OS", &["CrOS"]),
    ("Linux", &["Linux"]),
];

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUserAgent {
    pub device_type: DeviceType,
    pub browser: String,
    pub os: String,
}

pub fn parse(user_agent: &str) -> ParsedUserAgent {
    ParsedUserAgent {
        device_type: detect_device(user_agent),
        browser: first_match(BROWSERS, user_agent).to_string(),
        os: first_match(OPERATING_SYSTEMS, user_agent).to_string(),
    }
}

/// Tablets are checked first since their agents often carry mobile markers too.
/// Android without a "Mobile" token is a tablet by Google's convention.
pub fn detect_device(user_agent: &str) -> DeviceType {
    let is_android_tablet = user_agent.contains("Android") && !user_agent.contains("Mobile");

    if is_android_tablet || contains_any(user_agent, TABLET_TOKENS) {
        DeviceType::Tablet
    } else if contains_any(user_agent, MOBILE_TOKENS) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

fn first_match(table: &[(&'static str, &[&str])], user_agent: &str) -> &'static str {
    table
        .iter()
        .find(|(_, tokens)| contains_any(user_agent, tokens))
        .map(|(name, _)| *name)
        .unwrap_or(UNKNOWN)
}

fn contains_any(haystack: &str, tokens: &[&str]) -> bool {
    tokens.iter().any(|t| haystack.contains(t))
}
