//! Content ingestion: reading source files into [`Page`]s.
//!
//! # Pipeline position
//!
//! ```text
//! source file ──► front_matter::split() ──► markdown_to_html() ──► Page
//! ```
//!
//! Front matter decoding is delegated to `toml` / `serde_yaml`, markup
//! conversion to `pulldown-cmark`. Word count and reading time are
//! computed from the body *before* conversion so rendering artifacts do
//! not inflate them.

pub mod front_matter;
pub mod page;

pub use page::Page;

use crate::error::BuildError;
use pulldown_cmark::{Options, Parser as MarkdownParser, html};
use std::{fs, path::Path};

/// Markdown source file extension.
pub const CONTENT_EXT: &str = "md";

/// Parses source files into pages. Cheap to construct; holds only the
/// markdown option set so all documents convert identically.
#[derive(Debug, Clone)]
pub struct Parser {
    options: Options,
}

impl Default for Parser {
    fn default() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_SMART_PUNCTUATION);
        Self { options }
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse one content file into a [`Page`].
    ///
    /// Errors are per-file: a failure here never aborts sibling files in
    /// the same batch.
    pub fn parse_file(&self, path: &Path, content_root: &Path) -> Result<Page, BuildError> {
        let input = fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;

        let raw = front_matter::split(path, &input)?;
        let html = self.markdown_to_html(&raw.body);

        Ok(Page::new(
            path.to_path_buf(),
            content_root,
            raw.front_matter,
            &raw.body,
            html,
        ))
    }

    /// Convert a markdown body to HTML.
    fn markdown_to_html(&self, body: &str) -> String {
        let parser = MarkdownParser::new_ext(body, self.options);
        let mut out = String::with_capacity(body.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

/// Whether a path looks like a content source file.
pub fn is_content_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(CONTENT_EXT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_content(root: &Path, rel: &str, body: &str) -> std::path::PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_parse_file_full_document() {
        let tmp = TempDir::new().unwrap();
        let path = write_content(
            tmp.path(),
            "posts/welcome.md",
            "+++\ntitle = \"Welcome\"\ndate = \"2024-01-01\"\ndraft = false\n+++\n# Hi\n",
        );

        let page = Parser::new().parse_file(&path, tmp.path()).unwrap();
        assert_eq!(page.title, "Welcome");
        assert_eq!(page.slug, "posts/welcome");
        assert!(page.content.contains("<h1"));
        assert!(page.content.contains("Hi"));
        assert_eq!(page.word_count, 1);
        assert_eq!(page.reading_time, 1);
        assert!(!page.draft);
        assert!(page.date.is_some());
    }

    #[test]
    fn test_parse_file_missing_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = Parser::new()
            .parse_file(&tmp.path().join("nope.md"), tmp.path())
            .unwrap_err();
        assert!(matches!(err, BuildError::Io { .. }));
    }

    #[test]
    fn test_parse_file_bad_front_matter() {
        let tmp = TempDir::new().unwrap();
        let path = write_content(tmp.path(), "bad.md", "+++\nnot toml at all ===\n+++\nbody\n");
        let err = Parser::new().parse_file(&path, tmp.path()).unwrap_err();
        assert!(matches!(err, BuildError::MalformedFrontMatter { .. }));
    }

    #[test]
    fn test_markdown_tables_enabled() {
        let html = Parser::new().markdown_to_html("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
    }

    #[test]
    fn test_is_content_file() {
        assert!(is_content_file(Path::new("a/b.md")));
        assert!(is_content_file(Path::new("a/b.MD")));
        assert!(!is_content_file(Path::new("a/b.html")));
        assert!(!is_content_file(Path::new("a/b")));
    }
}
