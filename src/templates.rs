//! Template set resolution and rendering.
//!
//! A [`TemplateSet`] is built once per full build from up to two layout
//! directories and is read-only afterward, safe for concurrent use by all
//! render workers.
//!
//! # Override semantics
//!
//! ```text
//! load(theme_dir, default_dir)
//!     │
//!     ├── phase 1: theme layouts     ──► always win on name collision
//!     └── phase 2: default layouts   ──► added only if name is absent
//! ```
//!
//! Template names are paths relative to their layout root, extension
//! stripped, `/`-separated (`_default/single.html` → `_default/single`).
//! Any single template failing to parse aborts the whole load — template
//! loading is all-or-nothing, unlike content parsing.

use crate::{config::SiteConfig, content::Page, error::BuildError};
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tera::Tera;
use walkdir::WalkDir;

/// Inheritance root used when no more specific rule matches.
pub const BASE_TEMPLATE: &str = "_default/baseof";
/// Final fallback template.
pub const DEFAULT_SINGLE: &str = "_default/single";

/// Template file extension within layout trees.
const TEMPLATE_EXT: &str = "html";

/// An immutable, addressable collection of named templates.
pub struct TemplateSet {
    tera: Tera,
    names: FxHashSet<String>,
}

impl TemplateSet {
    /// Two-phase load: theme layouts override, default layouts fill gaps.
    ///
    /// `theme_dir` is skipped when absent or equal to `default_dir`. All
    /// collected sources are handed to tera in one batch so that
    /// inheritance chains resolve regardless of discovery order.
    pub fn load(theme_dir: Option<&Path>, default_dir: &Path) -> Result<Self, BuildError> {
        let mut sources: Vec<(String, String, PathBuf)> = Vec::new();
        let mut names = FxHashSet::default();

        if let Some(theme_dir) = theme_dir
            && theme_dir != default_dir
            && theme_dir.is_dir()
        {
            for (name, path) in discover(theme_dir) {
                let body = read_template(&path)?;
                // Theme has final say: drop any earlier entry with this name
                if !names.insert(name.clone()) {
                    sources.retain(|(n, _, _)| n != &name);
                }
                sources.push((name, body, path));
            }
        }

        for (name, path) in discover(default_dir) {
            // Defaults never clobber an existing name
            if names.insert(name.clone()) {
                let body = read_template(&path)?;
                sources.push((name, body, path));
            }
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(
            sources
                .iter()
                .map(|(name, body, _)| (name.as_str(), body.as_str())),
        )
        .map_err(|source| BuildError::TemplateParse {
            path: offending_path(&source, &sources),
            source,
        })?;

        Ok(Self { tera, names })
    }

    /// Whether a template of this name is in the set.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Pick the template for a page, in priority order:
    ///
    /// 1. explicit `layout` from the page's metadata, if present in the set
    /// 2. `<section>/single` derived from the slug's first segment
    /// 3. the base template `_default/baseof`
    /// 4. fallback `_default/single`
    ///
    /// No match at all is a hard error.
    pub fn select(&self, page: &Page) -> Result<&str, BuildError> {
        if !page.layout.is_empty()
            && let Some(name) = self.names.get(page.layout.as_str())
        {
            return Ok(name);
        }

        if !page.section.is_empty() {
            let section_single = format!("{}/single", page.section);
            if let Some(name) = self.names.get(section_single.as_str()) {
                return Ok(name);
            }
        }

        if self.contains(BASE_TEMPLATE) {
            return Ok(BASE_TEMPLATE);
        }

        if let Some(name) = self.names.get(DEFAULT_SINGLE) {
            return Ok(name);
        }

        Err(BuildError::TemplateNotFound {
            name: DEFAULT_SINGLE.to_string(),
        })
    }

    /// Render a page with the full document set in scope.
    ///
    /// When selection lands on the base template, the set's
    /// `_default/single` (which extends the base and supplies its blocks)
    /// is executed instead when present, so block content resolves the
    /// same way an execute-by-name engine would resolve it.
    pub fn render(
        &self,
        page: &Page,
        pages: &[&Page],
        config: &SiteConfig,
    ) -> Result<String, BuildError> {
        let mut name = self.select(page)?;
        if name == BASE_TEMPLATE && self.contains(DEFAULT_SINGLE) {
            name = DEFAULT_SINGLE;
        }
        self.render_named(name, page, pages, config)
    }

    /// Render an explicitly named template from the set.
    pub fn render_named(
        &self,
        name: &str,
        page: &Page,
        pages: &[&Page],
        config: &SiteConfig,
    ) -> Result<String, BuildError> {
        if !self.contains(name) {
            return Err(BuildError::TemplateNotFound {
                name: name.to_string(),
            });
        }

        let mut ctx = tera::Context::new();
        ctx.insert("site", &config.site);
        ctx.insert("page", page);
        ctx.insert("pages", pages);
        ctx.insert("params", &Map::<String, Value>::new());

        self.tera
            .render(name, &ctx)
            .map_err(|source| BuildError::TemplateRender {
                name: name.to_string(),
                source,
            })
    }
}

/// Walk a layout tree yielding (template name, file path) pairs.
fn discover(dir: &Path) -> Vec<(String, PathBuf)> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == TEMPLATE_EXT)
        })
        .filter_map(|e| {
            let name = template_name(e.path(), dir)?;
            Some((name, e.into_path()))
        })
        .collect()
}

/// Relative path, extension stripped, separators normalized to `/`.
fn template_name(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let no_ext = rel.with_extension("");
    let name = no_ext
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    (!name.is_empty()).then_some(name)
}

fn read_template(path: &Path) -> Result<String, BuildError> {
    std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))
}

/// Map a tera batch error back to the file path of the failing template.
fn offending_path(err: &tera::Error, sources: &[(String, String, PathBuf)]) -> PathBuf {
    let msg = err.to_string();
    sources
        .iter()
        .find(|(name, _, _)| msg.contains(name.as_str()))
        .map(|(_, _, path)| path.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::front_matter::FrontMatter;
    use std::fs;
    use tempfile::TempDir;

    fn write_template(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn make_page(slug_path: &str, fm: FrontMatter) -> Page {
        Page::new(
            PathBuf::from(format!("/site/content/{slug_path}.md")),
            Path::new("/site/content"),
            fm,
            "body",
            "<p>body</p>".into(),
        )
    }

    fn config() -> SiteConfig {
        SiteConfig::default()
    }

    // ------------------------------------------------------------------------
    // Loading and override policy
    // ------------------------------------------------------------------------

    #[test]
    fn test_names_are_relative_without_extension() {
        let tmp = TempDir::new().unwrap();
        write_template(tmp.path(), "_default/single.html", "<p>x</p>");
        write_template(tmp.path(), "posts/single.html", "<p>y</p>");
        write_template(tmp.path(), "ignore.txt", "nope");

        let set = TemplateSet::load(None, tmp.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("_default/single"));
        assert!(set.contains("posts/single"));
        assert!(!set.contains("ignore"));
    }

    #[test]
    fn test_theme_overrides_default() {
        let theme = TempDir::new().unwrap();
        let default = TempDir::new().unwrap();
        write_template(theme.path(), "_default/single.html", "<h1>THEME</h1>");
        write_template(default.path(), "_default/single.html", "<h1>DEFAULT</h1>");

        let set = TemplateSet::load(Some(theme.path()), default.path()).unwrap();
        assert_eq!(set.len(), 1);

        let page = make_page("a", FrontMatter::default());
        let out = set
            .render_named("_default/single", &page, &[&page], &config())
            .unwrap();
        assert!(out.contains("<h1>THEME</h1>"));
        assert!(!out.contains("DEFAULT"));
    }

    #[test]
    fn test_default_fills_gaps_in_theme() {
        let theme = TempDir::new().unwrap();
        let default = TempDir::new().unwrap();
        write_template(theme.path(), "_default/single.html", "theme-single");
        write_template(default.path(), "_default/list.html", "default-list");

        let set = TemplateSet::load(Some(theme.path()), default.path()).unwrap();
        assert!(set.contains("_default/single"));
        assert!(set.contains("_default/list"));
    }

    #[test]
    fn test_parse_failure_aborts_load() {
        let tmp = TempDir::new().unwrap();
        write_template(tmp.path(), "_default/single.html", "{{ page.title }}");
        write_template(tmp.path(), "_default/broken.html", "{% if %}");

        let err = TemplateSet::load(None, tmp.path()).err().unwrap();
        assert!(matches!(err, BuildError::TemplateParse { .. }));
    }

    // ------------------------------------------------------------------------
    // Selection priority
    // ------------------------------------------------------------------------

    #[test]
    fn test_select_explicit_layout_first() {
        let tmp = TempDir::new().unwrap();
        write_template(tmp.path(), "special.html", "s");
        write_template(tmp.path(), "posts/single.html", "p");
        write_template(tmp.path(), "_default/single.html", "d");
        let set = TemplateSet::load(None, tmp.path()).unwrap();

        let fm = FrontMatter {
            layout: "special".into(),
            ..Default::default()
        };
        let page = make_page("posts/a", fm);
        assert_eq!(set.select(&page).unwrap(), "special");
    }

    #[test]
    fn test_select_section_single_second() {
        let tmp = TempDir::new().unwrap();
        write_template(tmp.path(), "posts/single.html", "p");
        write_template(tmp.path(), "_default/single.html", "d");
        let set = TemplateSet::load(None, tmp.path()).unwrap();

        let page = make_page("posts/a", FrontMatter::default());
        assert_eq!(set.select(&page).unwrap(), "posts/single");
    }

    #[test]
    fn test_select_missing_explicit_layout_falls_through() {
        let tmp = TempDir::new().unwrap();
        write_template(tmp.path(), "_default/single.html", "d");
        let set = TemplateSet::load(None, tmp.path()).unwrap();

        let fm = FrontMatter {
            layout: "nope".into(),
            ..Default::default()
        };
        let page = make_page("a", fm);
        assert_eq!(set.select(&page).unwrap(), "_default/single");
    }

    #[test]
    fn test_select_baseof_before_single() {
        let tmp = TempDir::new().unwrap();
        write_template(tmp.path(), "_default/baseof.html", "{% block content %}{% endblock %}");
        write_template(tmp.path(), "_default/single.html", "s");
        let set = TemplateSet::load(None, tmp.path()).unwrap();

        let page = make_page("a", FrontMatter::default());
        assert_eq!(set.select(&page).unwrap(), BASE_TEMPLATE);
    }

    #[test]
    fn test_select_nothing_is_hard_error() {
        let tmp = TempDir::new().unwrap();
        write_template(tmp.path(), "other.html", "x");
        let set = TemplateSet::load(None, tmp.path()).unwrap();

        let page = make_page("a", FrontMatter::default());
        assert!(matches!(
            set.select(&page),
            Err(BuildError::TemplateNotFound { .. })
        ));
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    #[test]
    fn test_render_context_fields() {
        let tmp = TempDir::new().unwrap();
        write_template(
            tmp.path(),
            "_default/single.html",
            "<title>{{ page.title }}</title>{{ page.content | safe }} of {{ pages | length }}",
        );
        let set = TemplateSet::load(None, tmp.path()).unwrap();

        let fm = FrontMatter {
            title: "Welcome".into(),
            ..Default::default()
        };
        let page = make_page("welcome", fm);
        let out = set.render(&page, &[&page], &config()).unwrap();
        assert!(out.contains("<title>Welcome</title>"));
        assert!(out.contains("<p>body</p>"));
        assert!(out.contains("of 1"));
    }

    #[test]
    fn test_base_template_blocks_filled_by_single() {
        let tmp = TempDir::new().unwrap();
        write_template(
            tmp.path(),
            "_default/baseof.html",
            "<html><body>{% block content %}empty{% endblock %}</body></html>",
        );
        write_template(
            tmp.path(),
            "_default/single.html",
            "{% extends \"_default/baseof\" %}{% block content %}<h1>{{ page.title }}</h1>{% endblock %}",
        );
        let set = TemplateSet::load(None, tmp.path()).unwrap();

        let fm = FrontMatter {
            title: "Inherited".into(),
            ..Default::default()
        };
        let page = make_page("a", fm);
        let out = set.render(&page, &[&page], &config()).unwrap();
        assert!(out.contains("<html><body><h1>Inherited</h1></body></html>"));
    }
}
