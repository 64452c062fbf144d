use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use notes_sync::commands::open_local;
use notes_sync::config::{Config, DEFAULT_CONFIG_FILE};
use notes_sync::logging::init_tracing;
use notes_sync::{
    Commands, DriveStore, NoteEngine, NoteRequest, OAuthSession, Response, Session, StaticSession,
};

/// Bearer token that bypasses the token file when set.
const TOKEN_ENV: &str = "NOTES_SYNC_ACCESS_TOKEN";

#[derive(Parser)]
#[command(name = "notes-sync", version, about = "Notes synced to a private drive folder")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(clap::Args)]
struct NoteArgs {
    #[arg(long, default_value = "")]
    title: String,
    /// Note body; read from this file when prefixed with `@`
    #[arg(long, default_value = "")]
    content: String,
    /// Local files to attach
    #[arg(long = "attach")]
    attach: Vec<PathBuf>,
    #[arg(long)]
    encoding: Option<String>,
    #[arg(long)]
    color: Option<String>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Resolve the notes folder and index
    Check,
    /// List every note
    List {
        /// Also report files that could not be read
        #[arg(long)]
        skipped: bool,
    },
    Create(NoteArgs),
    Update {
        #[arg(long)]
        id: Option<String>,
        #[command(flatten)]
        note: NoteArgs,
    },
    Delete {
        #[arg(long)]
        id: Option<String>,
    },
    /// Upload a local .txt or .knote file as a new note
    Import { path: PathBuf },
    /// Save a stored note to a local file
    Export {
        #[arg(long)]
        id: String,
        path: PathBuf,
    },
    /// Print the contents of a local .txt or .knote file
    Open { path: PathBuf },
}

impl NoteArgs {
    fn into_request(self, file_id: Option<String>) -> anyhow::Result<NoteRequest> {
        let content = match self.content.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read content from {}", path))?,
            None => self.content,
        };
        Ok(NoteRequest {
            file_id,
            title: self.title,
            content,
            attachments: Vec::new(),
            attachment_paths: self.attach,
            encoding: self.encoding,
            color: self.color,
        })
    }
}

fn open_session(config: &Config) -> anyhow::Result<Arc<dyn Session>> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Ok(Arc::new(StaticSession::new(token.trim())));
        }
    }
    let session = OAuthSession::from_files(&config.credentials_path, &config.token_path)
        .with_context(|| {
            format!(
                "failed to load credentials from {}",
                config.credentials_path.display()
            )
        })?;
    Ok(Arc::new(session))
}

fn emit<T: Serialize>(response: Response<T>) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.is_success())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_problem) = Config::load_checked(&cli.config);
    if let Err(e) = init_tracing(&config.log_filter, config.log_json) {
        eprintln!("failed to initialize logging: {}", e);
    }
    if let Some(err) = config_problem {
        warn!(path = %cli.config.display(), error = %err, "invalid config, using defaults");
    }

    // Local-only commands never touch credentials.
    let command = match cli.command {
        Cmd::Open { path } => return finish(emit(open_local(&path).await)?),
        remote => remote,
    };

    let session = open_session(&config)?;
    let engine = NoteEngine::new(DriveStore::new(), config.engine_config());
    let commands =
        Commands::new(engine, session).with_default_encoding(config.default_encoding.clone());

    let success = match command {
        Cmd::Check => emit(commands.check().await)?,
        Cmd::List { skipped: true } => emit(commands.fetch_all().await)?,
        Cmd::List { skipped: false } => emit(commands.list_notes().await)?,
        Cmd::Create(note) => emit(commands.create_note(note.into_request(None)?).await)?,
        Cmd::Update { id, note } => emit(commands.update_note(note.into_request(id)?).await)?,
        Cmd::Delete { id } => emit(commands.delete_note(id.as_deref()).await)?,
        Cmd::Import { path } => emit(commands.import_local(&path).await)?,
        Cmd::Export { id, path } => emit(commands.export_note(&id, &path).await)?,
        Cmd::Open { path } => emit(commands.open_local(&path).await)?,
    };
    finish(success)
}

fn finish(success: bool) -> anyhow::Result<()> {
    if !success {
        std::process::exit(1);
    }
    Ok(())
}
