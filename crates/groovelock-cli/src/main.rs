//! GrooveLock CLI - The `groovelock` command.
//!
//! - `render`: deterministic offline render of a demo comping pattern
//! - `templates`: list the built-in groove vocabulary
//! - `init-config`: write the default configuration file
//! - `ports` / `live` (native builds): run the live input pipeline against
//!   real MIDI ports

#[cfg(feature = "native")]
mod live;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use groovelock_core::{Config, GrooveRegistry};
use std::path::PathBuf;

/// GrooveLock - humanized real-time MIDI scheduling
#[derive(Parser, Debug)]
#[command(name = "groovelock")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Humanized, groove-locked MIDI scheduling for virtual bands", long_about = None)]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a demo comping pattern offline and print events as JSON lines
    Render(RenderArgs),

    /// List feel templates, groove templates and style presets
    Templates,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List MIDI input and output ports
    #[cfg(feature = "native")]
    Ports,

    /// Run the live input pipeline until interrupted
    #[cfg(feature = "native")]
    Live,
}

/// Arguments for the render command
#[derive(clap::Args, Debug)]
pub struct RenderArgs {
    /// Number of bars to render
    #[arg(short, long, default_value_t = 4)]
    pub bars: u32,

    /// Tempo override (30-300)
    #[arg(long)]
    pub bpm: Option<i32>,

    /// Groove template or feel key override
    #[arg(short, long)]
    pub template: Option<String>,

    /// Style preset override
    #[arg(short, long)]
    pub preset: Option<String>,

    /// Also print explainability records
    #[arg(short, long)]
    pub explain: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();

    match args.command {
        Commands::Render(render_args) => {
            let config = load_config(args.config.as_ref())?;
            render::render(&config, render_args)
        }
        Commands::Templates => {
            list_templates();
            Ok(())
        }
        Commands::InitConfig { force } => init_config(args.config, force),
        #[cfg(feature = "native")]
        Commands::Ports => live::list_ports(),
        #[cfg(feature = "native")]
        Commands::Live => {
            let config = load_config(args.config.as_ref())?;
            live::run(&config)
        }
    }
}

/// Explicit path must load; the default location falls back to defaults.
fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load_from(path).with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => Ok(Config::load_or_default()),
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => Config::config_path().context("Failed to determine config path")?,
    };
    if path.exists() && !force {
        anyhow::bail!("Config file already exists: {} (use --force to overwrite)", path.display());
    }
    Config::create_default_config_file_at(&path)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn list_templates() {
    let registry = GrooveRegistry::builtins();

    println!("Feel templates:");
    for feel in registry.feels() {
        println!("  {:<28} {}", feel.key, feel.name);
    }

    println!();
    println!("Groove templates:");
    for template in registry.groove_templates() {
        println!(
            "  {:<28} {:<34} {:<14} amount {:.2}",
            template.key(),
            template.name(),
            template.category(),
            template.amount()
        );
    }

    println!();
    println!("Style presets:");
    for preset in registry.style_presets() {
        println!(
            "  {:<28} {:<34} {:>3} bpm  {}/{}  -> {}",
            preset.key,
            preset.name,
            preset.default_bpm,
            preset.default_time_signature.num,
            preset.default_time_signature.den,
            preset.groove_template_key
        );
    }
}
