//! Site configuration management for `vellum.toml`.
//!
//! # Sections
//!
//! | Section   | Purpose                                       |
//! |-----------|-----------------------------------------------|
//! | `[site]`  | Site metadata (title, description, base url)  |
//! | `[build]` | Directory layout, theme, filters, workers     |
//! | `[serve]` | Development server (port, interface, watch)   |
//!
//! # Example
//!
//! ```toml
//! [site]
//! title = "My Blog"
//! base_url = "https://example.com"
//!
//! [build]
//! content = "content"
//! output = "public"
//! theme = "paper"
//!
//! [serve]
//! port = 1313
//! ```

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    thread,
};
use thiserror::Error;

/// Worker-pool ceiling when the count is auto-detected.
const MAX_AUTO_WORKERS: usize = 8;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config file parsing error")]
    Toml(#[from] toml::de::Error),
}

// ============================================================================
// Sections
// ============================================================================

/// Site metadata exposed to templates as `site`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteInfo {
    pub title: String,
    pub description: String,
    pub base_url: String,
    pub author: String,
}

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            title: "Vellum Site".into(),
            description: String::new(),
            base_url: String::new(),
            author: String::new(),
        }
    }
}

/// Build settings: directory layout, theme, content filters, parallelism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub content: PathBuf,
    pub layouts: PathBuf,
    #[serde(rename = "static")]
    pub static_dir: PathBuf,
    pub output: PathBuf,
    pub themes: PathBuf,

    /// Active theme name (empty = no theme)
    pub theme: String,

    /// Include draft documents
    pub drafts: bool,
    /// Include future-dated documents
    pub future: bool,
    /// Include expired documents
    pub expired: bool,
    /// Remove the output directory before a full build
    pub clean: bool,

    /// Parse/render worker count (0 = min(8, available parallelism))
    pub workers: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            content: "content".into(),
            layouts: "layouts".into(),
            static_dir: "static".into(),
            output: "public".into(),
            themes: "themes".into(),
            theme: String::new(),
            drafts: false,
            future: false,
            expired: false,
            clean: false,
            workers: 0,
        }
    }
}

/// Development server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    pub interface: String,
    pub port: u16,
    pub watch: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            interface: "127.0.0.1".into(),
            port: 1313,
            watch: true,
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing vellum.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Project root (set after loading)
    #[serde(skip)]
    pub root: PathBuf,

    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    pub site: SiteInfo,
    pub build: BuildConfig,
    pub serve: ServeConfig,
}

impl SiteConfig {
    /// Load configuration from a TOML file and anchor all directories at
    /// the file's parent directory.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let mut config: Self = toml::from_str(&content)?;

        config.config_path = path
            .canonicalize()
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        config.root = config
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.resolve_paths();

        Ok(config)
    }

    /// Make all configured directories absolute, relative to the project root.
    fn resolve_paths(&mut self) {
        let root = self.root.clone();
        for dir in [
            &mut self.build.content,
            &mut self.build.layouts,
            &mut self.build.static_dir,
            &mut self.build.output,
            &mut self.build.themes,
        ] {
            if dir.is_relative() {
                *dir = root.join(dir.as_path());
            }
        }
    }

    /// Apply CLI argument overrides on top of the loaded file.
    pub fn update_with_cli(&mut self, cli: &Cli) {
        let args = cli.build_args();
        self.build.clean |= args.clean;
        self.build.drafts |= args.drafts;
        self.build.future |= args.future;
        if let Some(theme) = &args.theme {
            self.build.theme = theme.clone();
        }
        if let Some(workers) = args.workers {
            self.build.workers = workers;
        }

        if let Commands::Serve {
            interface,
            port,
            watch,
            ..
        } = &cli.command
        {
            if let Some(interface) = interface {
                self.serve.interface = interface.clone();
            }
            if let Some(port) = port {
                self.serve.port = *port;
            }
            if let Some(watch) = watch {
                self.serve.watch = *watch;
            }
        }
    }

    /// Validate directory layout and server settings.
    pub fn validate(&self) -> Result<()> {
        for (name, dir) in [
            ("content", &self.build.content),
            ("layouts", &self.build.layouts),
        ] {
            if !dir.is_dir() {
                bail!("{name} directory not found: {}", dir.display());
            }
        }

        if self.serve.port == 0 {
            bail!("invalid port: 0");
        }

        if !self.build.theme.is_empty() && !self.theme_dir().is_dir() {
            bail!(
                "theme `{}` not found under {}",
                self.build.theme,
                self.build.themes.display()
            );
        }

        Ok(())
    }

    /// Directory of the active theme, meaningful only when a theme is set.
    pub fn theme_dir(&self) -> PathBuf {
        self.build.themes.join(&self.build.theme)
    }

    /// Effective worker-pool size for the parse and render stages.
    pub fn workers(&self) -> usize {
        if self.build.workers > 0 {
            return self.build.workers;
        }
        let cpus = thread::available_parallelism().map_or(1, usize::from);
        cpus.min(MAX_AUTO_WORKERS)
    }
}

/// Load and validate configuration from CLI arguments.
pub fn load_config(cli: &Cli) -> Result<SiteConfig> {
    let root = cli.root.as_deref().unwrap_or(Path::new("./"));
    let config_path = root.join(&cli.config);

    if !config_path.exists() {
        bail!("Config file not found: {}", config_path.display());
    }

    let mut config = SiteConfig::from_path(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.update_with_cli(cli);
    config.validate()?;

    Ok(config)
}
