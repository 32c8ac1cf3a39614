//! Share link normalization.
//!
//! Rewrites Dropbox share links into URLs that serve the raw image bytes.
//! Structured parsing through [`url::Url`] is tried first; inputs that do not
//! parse as absolute URLs (missing scheme, stray characters) are patched with a
//! pattern-based rewrite instead.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;
use url::Url;

/// Host that serves share link content directly.
pub const DIRECT_CONTENT_HOST: &str = "dl.dropboxusercontent.com";

/// Query parameter toggling the "download" landing page.
const DOWNLOAD_PARAM: &str = "dl";

/// Query parameter forcing raw rendering on new-style share links.
const RAW_PARAM: &str = "raw";

static SHARE_LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<prefix>(?:[a-z][a-z0-9+.\-]*:)?//)?(?P<host>(?:www\.)?dropbox\.com|dl\.dropboxusercontent\.com)(?P<rest>[/?#].*)?$",
    )
    .expect("Invalid share link regex")
});

/// Shape of a URL as far as the normalizer is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareLinkKind {
    /// Already on the direct-content host.
    Direct,
    /// `www.dropbox.com/scl/...` links.
    NewShare,
    /// `www.dropbox.com/s/...` links.
    LegacyShare,
    /// Anything else; left untouched.
    Other,
}

fn classify(host: &str, path: &str) -> ShareLinkKind {
    let host = host.to_ascii_lowercase();
    if host == DIRECT_CONTENT_HOST {
        return ShareLinkKind::Direct;
    }
    if host != "www.dropbox.com" && host != "dropbox.com" {
        return ShareLinkKind::Other;
    }
    if path.starts_with("/scl/") {
        ShareLinkKind::NewShare
    } else if path.starts_with("/s/") {
        ShareLinkKind::LegacyShare
    } else {
        ShareLinkKind::Other
    }
}

/// Returns the canonical, directly fetchable form of `input`.
///
/// Never fails and is idempotent: `normalize_url(&normalize_url(u)) == normalize_url(u)`.
#[must_use]
pub fn normalize_url(input: &str) -> String {
    let decoded = decode_ampersands(input);

    match Url::parse(&decoded) {
        Ok(parsed) => normalize_structured(parsed, &decoded),
        Err(e) => {
            trace!(url = %decoded, error = %e, "Falling back to pattern-based normalization");
            normalize_pattern(&decoded)
        }
    }
}

/// Classifies `input` without rewriting it.
#[must_use]
pub fn share_link_kind(input: &str) -> ShareLinkKind {
    let decoded = decode_ampersands(input);
    if let Ok(parsed) = Url::parse(&decoded) {
        return parsed
            .host_str()
            .map_or(ShareLinkKind::Other, |host| classify(host, parsed.path()));
    }
    SHARE_LINK_PATTERN
        .captures(&decoded)
        .map_or(ShareLinkKind::Other, |caps| {
            let rest = caps.name("rest").map_or("", |m| m.as_str());
            classify(&caps["host"], split_rest(rest).0)
        })
}

fn decode_ampersands(input: &str) -> String {
    let mut decoded = input.to_string();
    while decoded.contains("&amp;") {
        decoded = decoded.replace("&amp;", "&");
    }
    decoded
}

fn normalize_structured(mut url: Url, original: &str) -> String {
    let Some(host) = url.host_str() else {
        return original.to_string();
    };

    match classify(host, url.path()) {
        ShareLinkKind::NewShare => {
            rewrite_query(&mut url, &[DOWNLOAD_PARAM, RAW_PARAM], Some((RAW_PARAM, "1")));
            url.into()
        }
        ShareLinkKind::LegacyShare => {
            if url.set_host(Some(DIRECT_CONTENT_HOST)).is_err() {
                return original.to_string();
            }
            rewrite_query(&mut url, &[DOWNLOAD_PARAM], None);
            url.into()
        }
        ShareLinkKind::Direct | ShareLinkKind::Other => original.to_string(),
    }
}

fn rewrite_query(url: &mut Url, remove: &[&str], append: Option<(&str, &str)>) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !remove.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() && append.is_none() {
        url.set_query(None);
        return;
    }

    let mut pairs = url.query_pairs_mut();
    pairs.clear().extend_pairs(kept);
    if let Some((key, value)) = append {
        pairs.append_pair(key, value);
    }
}

fn normalize_pattern(input: &str) -> String {
    let Some(caps) = SHARE_LINK_PATTERN.captures(input) else {
        return input.to_string();
    };

    let prefix = caps.name("prefix").map_or("", |m| m.as_str());
    let host = &caps["host"];
    let rest = caps.name("rest").map_or("", |m| m.as_str());
    let (path, query, fragment) = split_rest(rest);

    match classify(host, path) {
        ShareLinkKind::NewShare => {
            let query = patch_query(query, &[DOWNLOAD_PARAM, RAW_PARAM], Some("raw=1"));
            format!("{prefix}{host}{path}{query}{fragment}")
        }
        ShareLinkKind::LegacyShare => {
            let query = patch_query(query, &[DOWNLOAD_PARAM], None);
            format!("{prefix}{DIRECT_CONTENT_HOST}{path}{query}{fragment}")
        }
        ShareLinkKind::Direct | ShareLinkKind::Other => input.to_string(),
    }
}

/// Splits the part after the host into path, optional query, and fragment (with its `#`).
fn split_rest(rest: &str) -> (&str, Option<&str>, &str) {
    let (before_fragment, fragment) = match rest.find('#') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    match before_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query), fragment),
        None => (before_fragment, None, fragment),
    }
}

fn patch_query(query: Option<&str>, remove: &[&str], append: Option<&str>) -> String {
    let mut params: Vec<&str> = query
        .unwrap_or("")
        .split('&')
        .filter(|param| !param.is_empty())
        .filter(|param| {
            let key = param.split('=').next().unwrap_or("");
            !remove.contains(&key)
        })
        .collect();

    if let Some(extra) = append {
        params.push(extra);
    }

    if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    }
}
