use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use talkback::app::{run_chat_command, run_say_command, run_voice_command};
use talkback::audio::capture::{DeviceKind, list_devices};
use talkback::cli::{Cli, Commands, ConfigAction};
use talkback::config::Config;
use talkback::conversation::ConversationOptions;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    talkback::logging::init(cli.verbose, cli.quiet);

    match &cli.command {
        None => {
            let config = load_config(&cli)?;
            let options = ConversationOptions {
                greeting: !cli.no_greeting,
                cancel_grace: cli.cancel_grace,
            };
            run_voice_command(config, options, cli.quiet).await?;
        }
        Some(Commands::Devices) => {
            print_devices("Input devices", DeviceKind::Input)?;
            println!();
            print_devices("Output devices", DeviceKind::Output)?;
        }
        Some(Commands::Chat) => {
            let config = load_config(&cli)?;
            run_chat_command(config, cli.quiet).await?;
        }
        Some(Commands::Say { text }) => {
            let config = load_config(&cli)?;
            run_say_command(config, text).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Show => {
                let config = load_config(&cli)?;
                let rendered =
                    toml::to_string_pretty(&config).context("Failed to render configuration")?;
                print!("{}", rendered);
            }
            ConfigAction::Path => {
                println!("{}", config_path(cli.config.as_deref()).display());
            }
        },
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "talkback",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

fn config_path(custom_path: Option<&Path>) -> PathBuf {
    custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path)
}

/// Load configuration, then apply environment and command-line overrides.
///
/// Priority order (highest first):
/// 1. Command-line flags
/// 2. TALKBACK_* environment variables
/// 3. Config file (--config, or ~/.config/talkback/config.toml)
/// 4. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let path = config_path(cli.config.as_deref());
    let mut config = if cli.config.is_some() {
        Config::load(&path)
    } else {
        Config::load_or_default(&path)
    }
    .with_context(|| format!("Failed to load {}", path.display()))?
    .with_env_overrides();

    if let Some(device) = &cli.input_device {
        config.audio.input_device = Some(device.clone());
    }
    if let Some(device) = &cli.output_device {
        config.audio.output_device = Some(device.clone());
    }
    if let Some(language) = &cli.language {
        config.stt.language = language.clone();
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }

    config.validate()?;
    Ok(config)
}

fn print_devices(title: &str, kind: DeviceKind) -> Result<()> {
    let devices = list_devices(kind)?;
    println!("{}", title.bold());
    if devices.is_empty() {
        println!("  {}", "(none found)".dimmed());
    }
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    Ok(())
}
