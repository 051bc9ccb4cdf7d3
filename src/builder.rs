//! Site build pipeline.
//!
//! ```text
//!                 ┌──────────────┐
//!  content/*.md ─►│ parse workers│─┐
//!                 └──────────────┘ │   merged        ┌───────────────┐
//!                                  ├─► page set ────►│ render workers│─► <output>/<slug>/index.html
//!                 ┌──────────────┐ │                 └───────────────┘
//!  mtime cache ──►│ change filter│─┘
//!                 └──────────────┘
//! ```
//!
//! A full build parses only files the [`ModifiedCache`] reports as
//! changed, merges the results into the retained page set by source
//! path, then renders every retained page so cross-page context (the
//! `pages` collection handed to templates) stays consistent. Static
//! files and theme assets are copied alongside the render stage.
//!
//! Builds are serialized by a try-lock: a build requested while another
//! is running fails fast with [`BuildError::BuildInProgress`] instead of
//! queueing.

use crate::{
    cache::ModifiedCache,
    config::SiteConfig,
    content::{self, Page, Parser},
    error::BuildError,
    log,
    templates::TemplateSet,
    theme,
};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use walkdir::WalkDir;

/// Output subdirectory for the site's own static files.
pub const STATIC_OUTPUT_DIR: &str = "static";

/// Outcome of a successful build pass.
#[derive(Debug, Clone, Copy)]
pub struct BuildReport {
    /// Pages parsed from source this pass (changed files only).
    pub parsed: usize,
    /// Pages rendered to the output tree.
    pub rendered: usize,
    pub duration: Duration,
}

pub struct Builder {
    config: &'static SiteConfig,
    parser: Parser,
    cache: ModifiedCache,
    build_lock: Mutex<()>,
    templates: RwLock<Option<Arc<TemplateSet>>>,
    pages: RwLock<Vec<Arc<Page>>>,
}

impl Builder {
    pub fn new(config: &'static SiteConfig) -> Self {
        Self {
            config,
            parser: Parser::new(),
            cache: ModifiedCache::new(),
            build_lock: Mutex::new(()),
            templates: RwLock::new(None),
            pages: RwLock::new(Vec::new()),
        }
    }

    /// Run a full build pass.
    pub fn build(&self) -> Result<BuildReport, BuildError> {
        let Some(_guard) = self.build_lock.try_lock() else {
            return Err(BuildError::BuildInProgress);
        };
        let start = Instant::now();

        self.prepare_output()?;

        // Template changes are not mtime-tracked, so the set is rebuilt
        // from scratch each full pass
        let theme_layouts = theme::theme_layout_dir(self.config);
        let templates = Arc::new(TemplateSet::load(
            theme_layouts.as_deref(),
            &self.config.build.layouts,
        )?);
        log!("build"; "loaded {} template(s)", templates.len());

        let changed = self.changed_content_files();
        let parsed = self.parse_stage(&changed)?;
        let merged = self.merge_pages(parsed);

        let rendered = self.render_stage(&templates, &merged)?;

        let (statics, assets) = rayon::join(|| self.sync_static(), || theme::copy_theme_assets(self.config));
        statics?;
        assets?;

        *self.templates.write() = Some(templates);
        *self.pages.write() = merged;

        let report = BuildReport {
            parsed: changed.len(),
            rendered,
            duration: start.elapsed(),
        };
        log!(
            "build";
            "parsed {} file(s), rendered {} page(s) in {:.0?}",
            report.parsed,
            report.rendered,
            report.duration
        );
        Ok(report)
    }

    /// Rebuild only the given content files, rendering them against the
    /// templates and page set retained from the last full build.
    ///
    /// Falls back to a full build when no prior build exists.
    pub fn rebuild_content(&self, paths: &[PathBuf]) -> Result<BuildReport, BuildError> {
        let Some(templates) = self.templates.read().clone() else {
            return self.build();
        };
        let Some(_guard) = self.build_lock.try_lock() else {
            return Err(BuildError::BuildInProgress);
        };
        let start = Instant::now();

        let changed: Vec<PathBuf> = paths
            .iter()
            .filter(|p| p.is_file() && content::is_content_file(p))
            .cloned()
            .collect();
        // Keep the cache in step so the next full pass skips these too
        for path in &changed {
            if let Ok(meta) = std::fs::metadata(path)
                && let Ok(mtime) = meta.modified()
            {
                self.cache.is_modified(path, mtime);
            }
        }

        let parsed = self.parse_stage(&changed)?;
        let touched: Vec<PathBuf> = parsed.iter().map(|p| p.source_path.clone()).collect();
        let merged = self.merge_pages(parsed);

        let refs: Vec<&Page> = merged.iter().map(|p| p.as_ref()).collect();
        let mut rendered = 0;
        for page in merged.iter().filter(|p| touched.contains(&p.source_path)) {
            if page.should_build(
                self.config.build.drafts,
                self.config.build.future,
                self.config.build.expired,
            ) {
                self.render_page(&templates, page, &refs)?;
                rendered += 1;
            }
        }

        *self.pages.write() = merged;

        Ok(BuildReport {
            parsed: changed.len(),
            rendered,
            duration: start.elapsed(),
        })
    }

    /// Copy the site's static tree into `<output>/static/`.
    pub fn sync_static(&self) -> Result<usize, BuildError> {
        let src = &self.config.build.static_dir;
        if !src.is_dir() {
            return Ok(0);
        }
        let dest = self.config.build.output.join(STATIC_OUTPUT_DIR);
        theme::copy_dir(src, &dest)
    }

    /// Forget all modification times, forcing the next build to re-parse
    /// every source file.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    fn prepare_output(&self) -> Result<(), BuildError> {
        let output = &self.config.build.output;
        if self.config.build.clean {
            match std::fs::remove_dir_all(output) {
                Ok(()) => self.cache.clear(),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(BuildError::io(output, e)),
            }
        }
        std::fs::create_dir_all(output).map_err(|e| BuildError::io(output, e))
    }

    /// Content files whose mtime is newer than the cache remembers.
    fn changed_content_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.config.build.content)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| content::is_content_file(e.path()))
            .filter_map(|e| {
                let mtime = e.metadata().ok()?.modified().ok()?;
                let path = e.into_path();
                self.cache.is_modified(&path, mtime).then_some(path)
            })
            .collect()
    }

    /// Parse the changed files in parallel. Every file is attempted even
    /// when some fail; the first failure is reported once the stage is
    /// done.
    fn parse_stage(&self, changed: &[PathBuf]) -> Result<Vec<Arc<Page>>, BuildError> {
        let results: Vec<Result<Page, BuildError>> = self.pool()?.install(|| {
            changed
                .par_iter()
                .map(|path| self.parser.parse_file(path, &self.config.build.content))
                .collect()
        });

        let mut pages = Vec::with_capacity(results.len());
        let mut first_err = None;
        for result in results {
            match result {
                Ok(page) => pages.push(Arc::new(page)),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(pages),
        }
    }

    /// Merge freshly parsed pages into the retained set by source path,
    /// so pages untouched this pass stay in template scope.
    fn merge_pages(&self, parsed: Vec<Arc<Page>>) -> Vec<Arc<Page>> {
        let mut merged = self.pages.read().clone();
        for page in parsed {
            match merged.iter_mut().find(|p| p.source_path == page.source_path) {
                Some(slot) => *slot = page,
                None => merged.push(page),
            }
        }
        merged.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        merged
    }

    /// Render every buildable page in parallel against the full set.
    fn render_stage(
        &self,
        templates: &TemplateSet,
        pages: &[Arc<Page>],
    ) -> Result<usize, BuildError> {
        let buildable: Vec<&Page> = pages
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| {
                p.should_build(
                    self.config.build.drafts,
                    self.config.build.future,
                    self.config.build.expired,
                )
            })
            .collect();

        let results: Vec<Result<(), BuildError>> = self.pool()?.install(|| {
            buildable
                .par_iter()
                .map(|page| self.render_page(templates, page, &buildable))
                .collect()
        });

        for result in results {
            result?;
        }
        Ok(buildable.len())
    }

    fn render_page(
        &self,
        templates: &TemplateSet,
        page: &Page,
        pages: &[&Page],
    ) -> Result<(), BuildError> {
        let html = templates.render(page, pages, self.config)?;
        let target = self.output_path_for(page);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        std::fs::write(&target, html).map_err(|e| BuildError::io(&target, e))?;
        let _ = page.output_path.set(target);
        Ok(())
    }

    /// `<output>/<slug>/index.html`
    fn output_path_for(&self, page: &Page) -> PathBuf {
        let mut path = self.config.build.output.clone();
        for segment in page.slug.split('/') {
            path.push(segment);
        }
        path.join("index.html")
    }

    fn pool(&self) -> Result<rayon::ThreadPool, BuildError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers())
            .build()
            .map_err(|e| BuildError::Internal {
                message: format!("worker pool: {e}"),
            })
    }
}

/// Whether a path is a template file under any of the site's layout
/// trees (including the active theme's).
pub fn is_template_file(config: &SiteConfig, path: &Path) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some("html") {
        return false;
    }
    if path.starts_with(&config.build.layouts) {
        return true;
    }
    theme::theme_layout_dir(config).is_some_and(|dir| path.starts_with(dir))
}
