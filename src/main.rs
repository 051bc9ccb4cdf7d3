//! Vellum - a markdown static site generator with a live-reloading
//! dev server.

mod builder;
mod cache;
mod cli;
mod config;
mod content;
mod error;
mod logger;
mod reload;
mod serve;
mod templates;
mod theme;
mod watch;

use anyhow::Result;
use builder::Builder;
use clap::Parser;
use cli::{Cli, Commands};
use config::{SiteConfig, load_config};
use serve::serve_site;

fn main() -> Result<()> {
    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));
    let config: &'static SiteConfig = Box::leak(Box::new(load_config(cli)?));
    let builder: &'static Builder = Box::leak(Box::new(Builder::new(config)));

    match &cli.command {
        Commands::Build { .. } => {
            builder.build()?;
            Ok(())
        }
        Commands::Serve { .. } => {
            // Serve whatever builds; a broken site still gets a server so
            // fixes picked up by the watcher can bring it back
            if let Err(e) = builder.build() {
                log!("error"; "initial build failed: {e}");
            }
            serve_site(config, builder)
        }
    }
}
