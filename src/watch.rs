//! File system watcher driving live rebuilds.
//!
//! Monitors the content, layout, theme layout and static directories plus
//! the config file, batching rapid events before deciding how much to
//! rebuild.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Event Loop                              │
//! │                                                              │
//! │  ┌──────────┐    ┌──────────┐    ┌────────────────────────┐  │
//! │  │ notify   │───▶│ Debouncer│───▶│    handle_changes()    │  │
//! │  │ events   │    │ (300ms)  │    │                        │  │
//! │  └──────────┘    └──────────┘    │  ┌──────────────────┐  │  │
//! │                                  │  │ Full Rebuild     │  │  │
//! │                                  │  │ (template/config)│  │  │
//! │                                  │  └──────────────────┘  │  │
//! │                                  │  ┌──────────────────┐  │  │
//! │                                  │  │ Incremental      │  │  │
//! │                                  │  │ (content/static) │  │  │
//! │                                  │  └──────────────────┘  │  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every rebuild outcome is pushed through the [`ReloadHub`] so connected
//! browsers refresh (or show the failure) immediately.

use crate::{
    builder::{self, Builder},
    config::SiteConfig,
    content, log,
    reload::ReloadHub,
    theme,
};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

// =============================================================================
// Constants
// =============================================================================

const DEBOUNCE_MS: u64 = 300;
const REBUILD_COOLDOWN_MS: u64 = 800;

// =============================================================================
// Path Utilities
// =============================================================================

/// Check if path is hidden or a temp/backup file (editor artifacts).
/// A dot-prefixed component anywhere marks the whole path hidden, so
/// files inside e.g. `.obsidian/` or `.git/` are ignored too.
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || path.components().any(|c| {
            let s = c.as_os_str().to_string_lossy();
            s.starts_with('.') && s != "." && s != ".."
        })
}

/// Format path as relative for log display.
fn rel_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

// =============================================================================
// Change Classification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    /// Config file or any template: everything must be rebuilt.
    Full,
    /// Content document: the page itself is re-parsed and re-rendered.
    Content,
    /// Static file: copied to the output, no render involved.
    Static,
    Ignored,
}

fn classify(path: &Path, config: &SiteConfig) -> ChangeKind {
    if path == config.config_path {
        return ChangeKind::Full;
    }
    if builder::is_template_file(config, path) {
        return ChangeKind::Full;
    }
    if content::is_content_file(path) && path.starts_with(&config.build.content) {
        return ChangeKind::Content;
    }
    if path.starts_with(&config.build.static_dir) {
        return ChangeKind::Static;
    }
    ChangeKind::Ignored
}

// =============================================================================
// Debounce State
// =============================================================================

/// Batches rapid file events with debouncing and rebuild cooldown.
struct Debouncer {
    pending: FxHashSet<PathBuf>,
    last_event: Option<Instant>,
    last_rebuild: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            pending: FxHashSet::default(),
            last_event: None,
            last_rebuild: None,
        }
    }

    fn in_cooldown(&self) -> bool {
        self.last_rebuild
            .is_some_and(|t| t.elapsed() < Duration::from_millis(REBUILD_COOLDOWN_MS))
    }

    fn add(&mut self, event: Event) {
        for path in event.paths {
            if !is_temp_file(&path) {
                self.pending.insert(path);
            }
        }
        self.last_event = Some(Instant::now());
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && self
                .last_event
                .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        self.pending.drain().collect()
    }

    fn mark_rebuild(&mut self) {
        self.last_rebuild = Some(Instant::now());
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(60)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

// =============================================================================
// Event Handler
// =============================================================================

/// Process a debounced batch. Returns true when a full rebuild ran (for
/// cooldown tracking).
fn handle_changes(
    paths: &[PathBuf],
    config: &'static SiteConfig,
    builder: &'static Builder,
    hub: &ReloadHub,
) -> bool {
    if paths.is_empty() {
        return false;
    }

    let rel = |p: &Path| rel_path(p, &config.root);

    let mut full_trigger: Option<&PathBuf> = None;
    let mut content_paths: Vec<PathBuf> = Vec::new();
    let mut static_changed = false;

    for path in paths {
        match classify(path, config) {
            ChangeKind::Full => full_trigger = full_trigger.or(Some(path)),
            ChangeKind::Content => content_paths.push(path.clone()),
            ChangeKind::Static => static_changed = true,
            ChangeKind::Ignored => {}
        }
    }

    if let Some(trigger) = full_trigger {
        log!("watch"; "{} changed, rebuilding site...", rel(trigger));
        let result = builder.build();
        hub.record_build(&result);
        return result.is_ok();
    }

    if static_changed {
        match builder.sync_static() {
            Ok(count) => {
                log!("watch"; "synced {count} static file(s)");
                hub.clients.broadcast(crate::reload::RELOAD_MSG);
            }
            Err(e) => log!("watch"; "static sync failed: {e}"),
        }
    }

    if !content_paths.is_empty() {
        let names = content_paths.iter().map(|p| rel(p)).collect::<Vec<_>>().join(", ");
        log!("watch"; "{names} changed, rebuilding...");
        let result = builder.rebuild_content(&content_paths);
        // A page-level failure falls back to a full pass so the output
        // never sits half-updated
        let result = match result {
            Ok(report) => Ok(report),
            Err(e) => {
                log!("watch"; "incremental rebuild failed ({e}), running full build");
                builder.build()
            }
        };
        hub.record_build(&result);
    }

    false
}

// =============================================================================
// Watcher Setup
// =============================================================================

fn setup_watchers(watcher: &mut impl Watcher, config: &SiteConfig) -> Result<()> {
    let mut dirs = vec![
        config.build.content.clone(),
        config.build.layouts.clone(),
        config.build.static_dir.clone(),
    ];
    if let Some(theme_layouts) = theme::theme_layout_dir(config) {
        dirs.push(theme_layouts);
    }

    let mut watched = Vec::new();
    for dir in dirs {
        if dir.is_dir() {
            watcher
                .watch(&dir, RecursiveMode::Recursive)
                .with_context(|| format!("failed to watch {}", dir.display()))?;
            watched.push(rel_path(&dir, &config.root));
        }
    }
    if config.config_path.is_file() {
        watcher
            .watch(&config.config_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", config.config_path.display()))?;
        watched.push(rel_path(&config.config_path, &config.root));
    }

    log!("watch"; "watching: {}", watched.join(", "));
    Ok(())
}

const fn is_relevant(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
}

// =============================================================================
// Public API
// =============================================================================

/// Start blocking file watcher with debouncing and live rebuild.
pub fn watch_for_changes_blocking(
    config: &'static SiteConfig,
    builder: &'static Builder,
    hub: Arc<ReloadHub>,
) -> Result<()> {
    if !config.serve.watch {
        return Ok(());
    }

    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).context("failed to create file watcher")?;
    setup_watchers(&mut watcher, config)?;

    let mut debouncer = Debouncer::new();

    loop {
        match rx.recv_timeout(debouncer.timeout()) {
            Ok(Ok(event)) if is_relevant(&event) => {
                // Buffered even inside the post-rebuild cooldown; the
                // batch is picked up on the next timeout after it expires
                debouncer.add(event);
            }
            Ok(Err(e)) => log!("watch"; "error: {e}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout)
                if debouncer.ready() && !debouncer.in_cooldown() =>
            {
                if handle_changes(&debouncer.take(), config, builder, &hub) {
                    debouncer.mark_rebuild();
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            // Other cases: irrelevant events, timeout without ready, etc.
            _ => {}
        }
    }

    Ok(())
}
