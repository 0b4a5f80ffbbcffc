//! Pearl CLI - Command line interface for the notes vault.
//!
//! Works on the vault stored under the configured storage directory.
//! There is no network transport here; joining a vault switches this
//! device onto it, and sync happens once a peer-capable client runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use pearl_app::{CoreConfig, CoreFacade, NoteInput, VaultEvent};

const JOIN_WAIT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "pearl")]
#[command(about = "Pearl - Peer-synchronized notes")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Storage directory (overrides PEARL_STORAGE_PATH).
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// JSON config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show vault status.
    Status,

    /// List notes, newest first.
    List,

    /// Print one note.
    Show {
        /// Note id.
        id: String,
    },

    /// Create a note.
    New {
        /// Note title.
        #[arg(short, long, default_value = "")]
        title: String,

        /// Note body.
        #[arg(short, long, conflicts_with = "file")]
        body: Option<String>,

        /// Read the body from a file.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Replace the title and body of a note.
    Edit {
        /// Note id.
        id: String,

        /// New title (default: keep).
        #[arg(short, long)]
        title: Option<String>,

        /// New body (default: keep).
        #[arg(short, long, conflicts_with = "file")]
        body: Option<String>,

        /// Read the new body from a file.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Delete a note.
    Rm {
        /// Note id.
        id: String,
    },

    /// Print the link for sharing this vault.
    Link,

    /// Switch this device to the vault behind a link.
    Join {
        /// A pearl-vault:// link.
        link: String,
    },

    /// Show or record recently used vaults.
    Recent {
        /// Remember this drive key.
        #[arg(long)]
        add: Option<String>,

        /// Label for --add.
        #[arg(long, requires = "add")]
        label: Option<String>,
    },

    /// Mirror every note to the export folder.
    Export,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "pearl", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref(), cli.storage)?;
    debug!("Using storage at {}", config.storage_dir.display());

    let core = CoreFacade::open(config);
    core.initialize_core()
        .await
        .context("Failed to initialize vault")?;

    let result = run(&core, cli.command, cli.json).await;
    core.shutdown().await.context("Failed to close vault")?;
    result
}

fn load_config(path: Option<&Path>, storage: Option<PathBuf>) -> Result<CoreConfig> {
    let config = match path {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CoreConfig::from_env(),
    };
    Ok(match storage {
        Some(dir) => config.with_storage_dir(dir),
        None => config,
    })
}

async fn run(core: &CoreFacade, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Status => cmd_status(core, json).await,
        Commands::List => cmd_list(core, json).await,
        Commands::Show { id } => cmd_show(core, &id, json).await,
        Commands::New { title, body, file } => {
            let body = read_body(body, file.as_deref())?.unwrap_or_default();
            cmd_save(core, None, title, body, json).await
        }
        Commands::Edit {
            id,
            title,
            body,
            file,
        } => {
            let existing = core.get_note(&id).await.context("Failed to load note")?;
            let title = title.unwrap_or(existing.title);
            let body = read_body(body, file.as_deref())?.unwrap_or(existing.body);
            cmd_save(core, Some(id), title, body, json).await
        }
        Commands::Rm { id } => cmd_rm(core, &id).await,
        Commands::Link => cmd_link(core, json).await,
        Commands::Join { link } => cmd_join(core, &link).await,
        Commands::Recent { add, label } => cmd_recent(core, add, label, json).await,
        Commands::Export => cmd_export(core).await,
        Commands::Completions { .. } => Ok(()),
    }
}

fn read_body(body: Option<String>, file: Option<&Path>) -> Result<Option<String>> {
    match (body, file) {
        (Some(body), _) => Ok(Some(body)),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => Ok(None),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Show vault status.
async fn cmd_status(core: &CoreFacade, json: bool) -> Result<()> {
    let status = core.get_vault_status().await;
    if json {
        return print_json(&status);
    }

    println!("Vault Status");
    println!("============");
    match &status.drive_key {
        Some(key) => println!("Drive key:  {}", key),
        None => println!("Drive key:  (unavailable)"),
    }
    println!(
        "Sync:       {}",
        if status.connected {
            "connected"
        } else {
            "disconnected"
        }
    );
    println!("Peers:      {}", status.peers_count);
    println!("Last sync:  {}", format_time(status.last_sync_at));
    if let Some(dir) = &status.export_dir {
        println!("Export dir: {}", dir.display());
    }
    Ok(())
}

/// List notes.
async fn cmd_list(core: &CoreFacade, json: bool) -> Result<()> {
    let notes = core.list_notes().await.context("Failed to list notes")?;
    if json {
        return print_json(&notes);
    }

    if notes.is_empty() {
        println!("No notes.");
        return Ok(());
    }
    println!("{:<34} {:<17} TITLE", "ID", "UPDATED");
    println!("{}", "-".repeat(72));
    for note in notes {
        println!(
            "{:<34} {:<17} {}",
            note.id,
            format_time(note.updated_at),
            note.title
        );
    }
    Ok(())
}

/// Print one note.
async fn cmd_show(core: &CoreFacade, id: &str, json: bool) -> Result<()> {
    let note = core
        .get_note(id)
        .await
        .with_context(|| format!("Failed to read note {}", id))?;
    if json {
        return print_json(&note);
    }

    println!("# {}", note.title);
    println!("(created {}, updated {})", format_time(note.created_at), format_time(note.updated_at));
    println!();
    println!("{}", note.body);
    Ok(())
}

/// Create or update a note.
async fn cmd_save(
    core: &CoreFacade,
    id: Option<String>,
    title: String,
    body: String,
    json: bool,
) -> Result<()> {
    let creating = id.is_none();
    let note = core
        .save_note(NoteInput { id, title, body })
        .await
        .context("Failed to save note")?;
    if json {
        return print_json(&note);
    }
    println!("{} note {}", if creating { "Created" } else { "Updated" }, note.id);
    Ok(())
}

/// Delete a note.
async fn cmd_rm(core: &CoreFacade, id: &str) -> Result<()> {
    core.delete_note(id)
        .await
        .with_context(|| format!("Failed to delete note {}", id))?;
    println!("Deleted note {}", id);
    Ok(())
}

/// Print the vault link.
async fn cmd_link(core: &CoreFacade, json: bool) -> Result<()> {
    let link = core
        .create_vault_link()
        .await
        .context("Failed to create vault link")?;
    if json {
        return print_json(&link);
    }
    println!("{}", link.link_string);
    Ok(())
}

/// Join a vault and wait for the outcome.
async fn cmd_join(core: &CoreFacade, link: &str) -> Result<()> {
    let mut events = core.events().subscribe();
    core.join_vault_link(link).context("Invalid vault link")?;
    info!("Join initiated");

    let event = tokio::time::timeout(JOIN_WAIT, events.recv())
        .await
        .context("Timed out waiting for the join to finish")?
        .context("Event stream closed")?;

    match event {
        VaultEvent::Joined {
            drive_key,
            previous_key,
        } => {
            println!("Joined vault {}", drive_key);
            if let Some(previous) = previous_key {
                println!("Previous vault {} kept in recents", previous);
            }
            Ok(())
        }
        VaultEvent::JoinError { error, .. } => {
            anyhow::bail!("Failed to join vault: {}", error)
        }
    }
}

/// List or record recent vaults.
async fn cmd_recent(
    core: &CoreFacade,
    add: Option<String>,
    label: Option<String>,
    json: bool,
) -> Result<()> {
    if let Some(key) = add {
        core.add_recent_vault(&key, label.as_deref());
    }

    let recents = core
        .recent_vaults()
        .await
        .context("Failed to read recent vaults")?;
    if json {
        return print_json(&recents);
    }

    for vault in &recents.recent_vaults {
        let marker = if Some(&vault.drive_key) == recents.current_key.as_ref() {
            "*"
        } else {
            " "
        };
        match &vault.label {
            Some(label) => println!("{} {}  {}", marker, vault.drive_key, label),
            None => println!("{} {}", marker, vault.drive_key),
        }
    }
    if recents.recent_vaults.is_empty() {
        println!("No recent vaults.");
    }
    Ok(())
}

/// Mirror notes to disk.
async fn cmd_export(core: &CoreFacade) -> Result<()> {
    core.export_all_notes().await;
    println!("Notes exported to {}", core.export_paths().notes_root.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_new_with_body() {
        let cli = Cli::parse_from(["pearl", "-v", "new", "--title", "Todo", "--body", "milk"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::New { title, body, file } => {
                assert_eq!(title, "Todo");
                assert_eq!(body.as_deref(), Some("milk"));
                assert!(file.is_none());
            }
            _ => panic!("expected new"),
        }
    }

    #[test]
    fn test_body_and_file_conflict() {
        let result = Cli::try_parse_from(["pearl", "new", "--body", "x", "--file", "y.md"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_storage_flag_overrides() {
        let config = load_config(None, Some(PathBuf::from("/tmp/pearl-test"))).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/pearl-test"));
    }
}
