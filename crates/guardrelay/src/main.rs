//! `guardrelay` - CLI for the guardian alert relay
//!
//! This binary runs the relay server and provides administration commands for
//! the guardian directory and the stored tree.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{bail, Context};
use clap::Parser;

use guardrelay::cli::{Cli, Command, ConfigCommand, GuardianCommand, ServeCommand};
use guardrelay::{init_logging, server, Config, GuardianRecord, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Validation is deferred: only `serve` needs push credentials.
    let config = Config::load_unchecked(cli.config.clone())
        .context("failed to load configuration")?;

    match cli.command {
        Command::Serve(serve_cmd) => handle_serve(config, serve_cmd).await,
        Command::Guardian(guardian_cmd) => handle_guardian(&config, guardian_cmd),
        Command::Get(get_cmd) => {
            let storage = open_storage(&config)?;
            match storage.get(&get_cmd.path)? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("null"),
            }
            Ok(())
        }
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json),
        Command::Config(config_cmd) => handle_config(&config, cli.config, config_cmd),
    }
}

async fn handle_serve(mut config: Config, cmd: ServeCommand) -> anyhow::Result<()> {
    if let Some(bind) = cmd.bind {
        config.server.bind = bind;
    }
    config.validate().context("invalid configuration")?;
    server::serve(&config).await?;
    Ok(())
}

fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    let path = config.database_path();
    Storage::open(&path).with_context(|| format!("failed to open store at {}", path.display()))
}

fn handle_guardian(config: &Config, cmd: GuardianCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;

    match cmd {
        GuardianCommand::Add { id, device, token } => {
            storage.upsert_guardian(&GuardianRecord::new(id.clone(), device, token))?;
            println!("Saved guardian {id}");
        }
        GuardianCommand::List { device, json } => {
            let guardians = match device {
                Some(device_id) => storage.guardians_for_device(&device_id)?,
                None => storage.guardians()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&guardians)?);
            } else if guardians.is_empty() {
                println!("No guardians.");
            } else {
                println!("{:<24} {:<24} TOKEN", "ID", "DEVICE");
                for guardian in &guardians {
                    println!(
                        "{:<24} {:<24} {}",
                        guardian.id,
                        guardian.paired_device_id.as_deref().unwrap_or("-"),
                        if guardian.token().is_some() { "yes" } else { "no" }
                    );
                }
            }
        }
        GuardianCommand::Remove { id } => {
            if !storage.delete_guardian(&id)? {
                bail!("guardian not found: {id}");
            }
            println!("Removed guardian {id}");
        }
        GuardianCommand::ClearToken { id } => {
            storage.clear_token(&id)?;
            println!("Cleared push token of guardian {id}");
        }
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let stats = storage.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "nodes": stats.node_count,
            "guardians": stats.guardian_count,
            "guardians_without_token": stats.tokenless_guardians,
            "database_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("guardrelay status");
        println!("-----------------");
        println!("Database:      {}", config.database_path().display());
        println!("Stored values: {}", stats.node_count);
        println!(
            "Guardians:     {} ({} without token)",
            stats.guardian_count, stats.tokenless_guardians
        );
        println!("Size:          {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_config(
    config: &Config,
    config_path: Option<std::path::PathBuf>,
    cmd: ConfigCommand,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  Bind:               {}", config.server.bind);
                println!("  Proxy route:        {}", config.server.proxy_route);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Messaging]");
                println!("  Backend:            {}", config.messaging.backend);
                println!("  Endpoint:           {}", config.messaging.endpoint);
                println!(
                    "  Project id:         {}",
                    config.messaging.project_id.as_deref().unwrap_or("-")
                );
                println!(
                    "  Access token:       {}",
                    if config.messaging.access_token.is_some() { "set" } else { "unset" }
                );
                println!("  Timeout (secs):     {}", config.messaging.timeout_secs);
                println!();
                println!("[Trigger]");
                println!("  Queue capacity:     {}", config.trigger.queue_capacity);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
