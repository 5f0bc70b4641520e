//! Link normalization
//!
//! The corpus is an offline mirror of a documentation site. File names and
//! anchors carry mangled forms of the public URLs
//! (`https___developer_criticalmanufacturing_com_analytics_x.html`,
//! `/developer/criticalmanufacturing/com/analytics/x`). Everything here maps
//! them back to `https://developer.criticalmanufacturing.com/analytics/x/`.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::config::SiteConfig;

/// Href schemes that never point at a documentation page
const SKIPPED_SCHEMES: [&str; 4] = ["mailto:", "javascript:", "tel:", "data:"];

// ============================================================================
// SiteLinks
// ============================================================================

/// URL rewriting rules for one documentation site
#[derive(Debug, Clone)]
pub struct SiteLinks {
    base_url: String,
    host: Option<String>,
    mirror_prefix: String,
}

impl SiteLinks {
    pub fn new(base_url: &str, mirror_prefix: &str) -> Self {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let host = Url::parse(&base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));

        Self {
            base_url,
            host,
            mirror_prefix: mirror_prefix.to_string(),
        }
    }

    pub fn from_config(site: &SiteConfig) -> Self {
        Self::new(&site.base_url, &site.mirror_prefix)
    }

    /// Public page URL for a mirrored file name (always ends with `/`)
    pub fn url_from_filename(&self, filename: &str) -> String {
        let stem = filename.strip_suffix(".html").unwrap_or(filename);
        let stem = stem
            .strip_prefix("https___")
            .or_else(|| stem.strip_prefix("http___"))
            .unwrap_or(stem);

        let mut path = stem.replace('_', "/");
        if let Some(host) = &self.host {
            if let Some(rest) = path.strip_prefix(host.as_str()) {
                path = rest.to_string();
            }
        }

        self.finalize(&format!("{}/{}/", self.base_url, path.trim_start_matches('/')))
    }

    /// Normalize an anchor `href`
    ///
    /// Returns `None` for empty, fragment-only and non-page (`mailto:` ...) links.
    pub fn normalize_href(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            return None;
        }

        let lower = href.to_ascii_lowercase();
        if SKIPPED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
            return None;
        }

        let href = match href.strip_prefix(self.mirror_prefix.as_str()) {
            Some(rest) => format!("/{}", rest),
            None => href.to_string(),
        };

        let absolute = if href.starts_with("http://") || href.starts_with("https://") {
            href
        } else {
            self.resolve_relative(&href)
        };

        Some(self.finalize(&absolute))
    }

    /// Page URL for a `source` metadata value
    ///
    /// Accepts a mirrored file path, an absolute URL, or a site-relative path.
    pub fn source_url(&self, source: &str) -> String {
        let source = source.trim();

        if source.starts_with("http://") || source.starts_with("https://") {
            return self.finalize(source);
        }

        let file_name = Path::new(source)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(source);

        if file_name.ends_with(".html")
            || file_name.starts_with("https___")
            || file_name.starts_with("http___")
        {
            return self.url_from_filename(file_name);
        }

        let path = source.replace("___", "/").replace('_', "/");
        self.finalize(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))
    }

    /// Strip the mirror prefix and clean, as done for every outgoing link
    pub fn finalize(&self, url: &str) -> String {
        clean_url(&strip_mirror_prefix(&clean_url(url), &self.mirror_prefix))
    }

    fn resolve_relative(&self, href: &str) -> String {
        Url::parse(&format!("{}/", self.base_url))
            .and_then(|base| base.join(href))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}/{}", self.base_url, href.trim_start_matches('/')))
    }
}

// ============================================================================
// Free Functions
// ============================================================================

/// Replace every occurrence of the mirror prefix with `/`
pub fn strip_mirror_prefix(url: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return url.to_string();
    }
    url.replace(prefix, "/")
}

/// Fix common URL damage
///
/// - a site prefix glued in front of a full URL
///   (`https://hosthttps://host/x` becomes `https://host/x`)
/// - repeated slashes in the path
/// - a missing scheme (`https://` is assumed)
pub fn clean_url(url: &str) -> String {
    let url = url.trim();
    let url = match doubled_prefix_re().captures(url).and_then(|c| c.get(1)) {
        Some(inner) => &url[inner.start()..],
        None => url,
    };

    let (scheme, rest) = match url.find("://") {
        Some(idx) => (&url[..idx], &url[idx + 3..]),
        None => ("https", url),
    };

    let rest = rest.trim_start_matches('/');
    let (path, tail) = rest.split_at(rest.find(['?', '#']).unwrap_or(rest.len()));
    format!("{}://{}{}", scheme, slashes_re().replace_all(path, "/"), tail)
}

fn doubled_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://[^/?#]*?(https?://)").expect("valid regex"))
}

fn slashes_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/{2,}").expect("valid regex"))
}

// ============================================================================
// Tests
// ============================================================================
