// src/models/ioc_utils.rs

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::models::IocKind;

static DEFANGED_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^hxxp(s)?:/{0,2}").expect("invalid scheme pattern"));

static DOT_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\.\]|\(\.\)|\{\.\}|\[dot\]|\(dot\)|\{dot\}")
        .expect("invalid dot marker pattern")
});

static AT_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[at\]|\(at\)|\{at\}").expect("invalid at marker pattern"));

static STRAY_BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[\]\{\}\(\)]").expect("invalid bracket pattern"));

static REPEATED_DOTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{2,}").expect("invalid dot run pattern"));

static IP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").expect("invalid ip pattern"));

static SHA256_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-fA-F0-9]{64}$").expect("invalid hash pattern"));

static URL_CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:https?://|www\.)[^\s<>"']+"#).expect("invalid url pattern")
});

/// Reverse the defanging conventions threat reports apply to an indicator.
///
/// The steps run in a fixed order so that later steps see the output of
/// earlier ones: whitespace, protocol scheme, dot markers, at markers,
/// leftover bracket characters, collapsed dot runs, outer trim. Invalid
/// input never fails; it degrades to an empty string.
pub fn sanitize_ioc(raw: &str) -> String {
    let ioc = raw.replace(['\n', '\r'], "");
    let ioc = ioc.trim();

    let ioc = DEFANGED_SCHEME.replace(ioc, |caps: &regex::Captures| {
        if caps.get(1).is_some() {
            "https://"
        } else {
            "http://"
        }
    });
    let ioc = DOT_MARKERS.replace_all(&ioc, ".");
    let ioc = AT_MARKERS.replace_all(&ioc, "@");
    let ioc = STRAY_BRACKETS.replace_all(&ioc, "");
    let ioc = REPEATED_DOTS.replace_all(&ioc, ".");

    ioc.trim_matches('.').trim().to_string()
}

/// Classify a sanitized indicator. First match wins; the IP rule is
/// deliberately permissive (digit-group shape only, no octet validation).
pub fn classify_ioc(value: &str) -> IocKind {
    if IP_PATTERN.is_match(value) {
        return IocKind::Ip;
    }
    if SHA256_PATTERN.is_match(value) {
        return IocKind::Hash;
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return IocKind::Url;
    }
    IocKind::Unknown
}

/// Find every URL substring in a block of free text.
///
/// Candidates start with an http(s) scheme or `www.`; trailing punctuation
/// is trimmed and anything `url::Url` refuses to parse as a host is
/// discarded.
pub fn find_urls(text: &str) -> Vec<String> {
    URL_CANDIDATE
        .find_iter(text)
        .filter_map(|m| {
            let candidate = m
                .as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '}', '"', '\'']);
            if candidate.is_empty() {
                return None;
            }
            let parsed = if candidate.starts_with("www.") || candidate.starts_with("WWW.") {
                Url::parse(&format!("http://{candidate}"))
            } else {
                Url::parse(candidate)
            };
            match parsed {
                Ok(url) if url.host_str().is_some() => Some(candidate.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// True when the text carries at least one URL substring.
pub fn contains_url(text: &str) -> bool {
    !find_urls(text).is_empty()
}
