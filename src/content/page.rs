//! In-memory representation of one content document.
//!
//! A [`Page`] is created by the parser, owned by a single parse worker,
//! and immutable once handed to the render stage — except for
//! `output_path`, which the one worker that renders the page writes
//! exactly once through a `OnceLock`.

use crate::content::front_matter::FrontMatter;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

/// Words-per-minute baseline for the reading time estimate.
const READING_WPM: usize = 200;

/// Accepted date layouts, tried in order after RFC 3339.
const DATETIME_LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// One parsed content document.
#[derive(Debug, Serialize)]
pub struct Page {
    // Identity
    /// Absolute source path
    pub source_path: PathBuf,
    /// Route slug: path relative to the content root, extension stripped,
    /// `/`-separated
    pub slug: String,
    /// First slug segment for nested documents, empty for root-level ones
    pub section: String,
    pub url: String,

    // Metadata
    pub title: String,
    pub description: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
    pub draft: bool,
    pub publish_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub weight: i64,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub layout: String,
    pub params: Map<String, Value>,

    // Derived
    /// Body converted to HTML
    pub content: String,
    /// Word count of the body before conversion
    pub word_count: usize,
    /// ceil(word_count / 200) minutes, minimum 1
    pub reading_time: usize,
    /// blake3 hex digest of the raw body, for change detection
    pub hash: String,

    /// Written exactly once by the render worker that produces the output file.
    #[serde(skip)]
    pub output_path: OnceLock<PathBuf>,
}

impl Page {
    /// Assemble a page from decoded front matter, the converted body, and
    /// routing derived from the source path.
    pub fn new(
        source_path: PathBuf,
        content_root: &Path,
        fm: FrontMatter,
        body: &str,
        html: String,
    ) -> Self {
        let slug = derive_slug(&source_path, content_root);
        let section = slug
            .split_once('/')
            .map(|(first, _)| first.to_string())
            .unwrap_or_default();
        let url = format!("/{slug}/");

        let word_count = count_words(body);
        let title = if fm.title.is_empty() {
            title_from_slug(&slug)
        } else {
            fm.title
        };

        Self {
            source_path,
            slug,
            section,
            url,
            title,
            description: fm.description,
            author: fm.author,
            date: parse_date(&fm.date),
            draft: fm.draft,
            publish_date: parse_date(&fm.publish_date),
            expiry_date: parse_date(&fm.expiry_date),
            weight: fm.weight,
            tags: fm.tags,
            categories: fm.categories,
            layout: fm.layout,
            params: fm.params,
            content: html,
            word_count,
            reading_time: reading_time(word_count),
            hash: blake3::hash(body.as_bytes()).to_hex().to_string(),
            output_path: OnceLock::new(),
        }
    }

    /// Whether this page survives the post-parse build filter.
    ///
    /// Drafts are excluded unless `drafts` is set; future-dated pages
    /// unless `future` is set; expired pages unless `expired` is set.
    pub fn should_build(&self, drafts: bool, future: bool, expired: bool) -> bool {
        if self.draft && !drafts {
            return false;
        }
        if !future && self.is_future() {
            return false;
        }
        if !expired && self.is_expired() {
            return false;
        }
        true
    }

    pub fn is_future(&self) -> bool {
        self.publish_date
            .or(self.date)
            .is_some_and(|d| d > Utc::now())
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_date.is_some_and(|d| d < Utc::now())
    }
}

/// Path relative to the content root, extension stripped, `/`-separated.
fn derive_slug(source_path: &Path, content_root: &Path) -> String {
    let rel = source_path.strip_prefix(content_root).unwrap_or(source_path);
    let no_ext = rel.with_extension("");
    no_ext
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Fallback title: last slug segment with dashes spaced out.
fn title_from_slug(slug: &str) -> String {
    let base = slug.rsplit('/').next().unwrap_or(slug);
    base.replace('-', " ")
}

/// Count words in the raw body. Pure-punctuation tokens (markdown
/// markers like `#`, `*`, `---`) are not words.
pub fn count_words(body: &str) -> usize {
    body.split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .count()
}

/// Reading-time estimate: ceil(words / 200) minutes, minimum 1.
pub fn reading_time(word_count: usize) -> usize {
    word_count.div_ceil(READING_WPM).max(1)
}

/// Parse a date string against the accepted layouts; empty or
/// unrecognized input yields `None`.
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for layout in DATETIME_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for layout in DATE_LAYOUTS {
        if let Ok(date) = NaiveDate::parse_from_str(input, layout) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::front_matter::FrontMatter;
    use chrono::Duration;

    fn page_with(fm: FrontMatter, body: &str) -> Page {
        Page::new(
            PathBuf::from("/site/content/posts/hello-world.md"),
            Path::new("/site/content"),
            fm,
            body,
            String::new(),
        )
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    #[test]
    fn test_slug_and_section() {
        let page = page_with(FrontMatter::default(), "");
        assert_eq!(page.slug, "posts/hello-world");
        assert_eq!(page.section, "posts");
        assert_eq!(page.url, "/posts/hello-world/");
    }

    #[test]
    fn test_root_level_page_has_no_section() {
        let page = Page::new(
            PathBuf::from("/site/content/about.md"),
            Path::new("/site/content"),
            FrontMatter::default(),
            "",
            String::new(),
        );
        assert_eq!(page.slug, "about");
        assert_eq!(page.section, "");
    }

    #[test]
    fn test_title_defaults_from_slug() {
        let page = page_with(FrontMatter::default(), "");
        assert_eq!(page.title, "hello world");
    }

    // ------------------------------------------------------------------------
    // Derived statistics
    // ------------------------------------------------------------------------

    #[test]
    fn test_word_count_ignores_markdown_markers() {
        let page = page_with(FrontMatter::default(), "# Hi");
        assert_eq!(page.word_count, 1);
        assert_eq!(count_words("## Two words *here* ---"), 3);
        assert_eq!(count_words(""), 0);
    }

    #[test]
    fn test_reading_time_minimum_one() {
        assert_eq!(reading_time(0), 1);
        assert_eq!(reading_time(1), 1);
        assert_eq!(reading_time(200), 1);
        assert_eq!(reading_time(201), 2);
        assert_eq!(reading_time(1000), 5);
    }

    #[test]
    fn test_hash_tracks_body_changes() {
        let a = page_with(FrontMatter::default(), "one body");
        let b = page_with(FrontMatter::default(), "another body");
        assert_ne!(a.hash, b.hash);
        let c = page_with(FrontMatter::default(), "one body");
        assert_eq!(a.hash, c.hash);
    }

    // ------------------------------------------------------------------------
    // Date parsing
    // ------------------------------------------------------------------------

    #[test]
    fn test_parse_date_layouts() {
        assert!(parse_date("2024-01-01").is_some());
        assert!(parse_date("2024-01-01T10:30:00").is_some());
        assert!(parse_date("2024-01-01 10:30:00").is_some());
        assert!(parse_date("2024-01-01T10:30:00Z").is_some());
        assert!(parse_date("01/02/2024").is_some());
        assert!(parse_date("2024/01/02").is_some());
        assert!(parse_date("").is_none());
        assert!(parse_date("not a date").is_none());
    }

    // ------------------------------------------------------------------------
    // Build filter
    // ------------------------------------------------------------------------

    #[test]
    fn test_draft_excluded_unless_enabled() {
        let fm = FrontMatter {
            draft: true,
            ..Default::default()
        };
        let page = page_with(fm, "");
        assert!(!page.should_build(false, false, false));
        assert!(page.should_build(true, false, false));
    }

    #[test]
    fn test_future_page_excluded_unless_enabled() {
        let future = (Utc::now() + Duration::days(30)).to_rfc3339();
        let fm = FrontMatter {
            date: future,
            ..Default::default()
        };
        let page = page_with(fm, "");
        assert!(page.is_future());
        assert!(!page.should_build(false, false, false));
        assert!(page.should_build(false, true, false));
    }

    #[test]
    fn test_expired_page_excluded_unless_enabled() {
        let past = (Utc::now() - Duration::days(30)).to_rfc3339();
        let fm = FrontMatter {
            expiry_date: past,
            ..Default::default()
        };
        let page = page_with(fm, "");
        assert!(page.is_expired());
        assert!(!page.should_build(false, false, false));
        assert!(page.should_build(false, false, true));
    }

    #[test]
    fn test_dated_past_page_builds() {
        let fm = FrontMatter {
            date: "2020-01-01".into(),
            ..Default::default()
        };
        let page = page_with(fm, "");
        assert!(page.should_build(false, false, false));
    }

    #[test]
    fn test_output_path_written_once() {
        let page = page_with(FrontMatter::default(), "");
        assert!(page.output_path.get().is_none());
        page.output_path.set(PathBuf::from("/out/a.html")).unwrap();
        assert!(page.output_path.set(PathBuf::from("/out/b.html")).is_err());
        assert_eq!(
            page.output_path.get(),
            Some(&PathBuf::from("/out/a.html"))
        );
    }
}
