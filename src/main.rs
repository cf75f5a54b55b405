use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use readaloud::app::{
    ReadOptions, format_summary, init_logging, run_check_command, run_read_command,
};
use readaloud::cli::{Cli, Commands, ConfigAction};
use readaloud::config::Config;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            let options = ReadOptions {
                frames: cli.frames,
                device: cli.device,
                language: cli.language,
                confidence: cli.confidence,
                interrupt: cli.interrupt,
                looping: cli.looping,
                echo: cli.echo,
                interval: cli.interval,
            };
            let summary = run_read_command(config, options, cli.quiet).await?;
            if !cli.quiet {
                eprintln!("{}", format_summary(&summary).dimmed());
            }
        }
        Some(Commands::Check) => {
            let config = load_config(cli.config.as_deref())?;
            if !run_check_command(&config) {
                std::process::exit(1);
            }
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "readaloud",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration from file and apply environment overrides.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        }
    };

    Ok(config.with_env_overrides())
}

fn config_path(custom_path: Option<&Path>) -> Result<PathBuf> {
    custom_path
        .map(Path::to_path_buf)
        .or_else(Config::default_path)
        .context("Cannot determine the configuration directory; pass --config")
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = config_path(custom_path)?;
            let marker = if path.exists() { "" } else { " (not created yet)" };
            println!("{}{}", path.display(), marker);
        }
        ConfigAction::Init { force } => {
            let path = config_path(custom_path)?;
            if path.exists() && !force {
                eprintln!(
                    "{} {} already exists (use --force to overwrite)",
                    "Error:".red(),
                    path.display()
                );
                std::process::exit(1);
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, Config::default().to_toml()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} {}", "Wrote".green(), path.display());
        }
    }
    Ok(())
}
