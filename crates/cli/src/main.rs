//! Command-line client for depot.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot_core::config::AppConfig;
use depot_core::{CallerIdentity, Role};
use depot_router::{BlobRouter, RouterError, UploadRequest};
use depot_storage::{ByteStream, StorageError};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use futures::StreamExt;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Exit code for a blob that no visible bucket holds.
const EXIT_NOT_FOUND: u8 = 2;

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Role-aware blob storage across working and stable buckets")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "DEPOT_CONFIG",
        default_value = "config/depot.toml"
    )]
    config: PathBuf,

    /// Username recorded as the blob author
    #[arg(long, global = true, env = "DEPOT_USER", default_value = "anonymous")]
    user: String,

    /// User id recorded as the blob author (default: nil UUID)
    #[arg(long, global = true, env = "DEPOT_USER_ID")]
    user_id: Option<Uuid>,

    /// Caller role: viewer, contributor or admin (or level 1-3)
    #[arg(long, global = true, env = "DEPOT_ROLE", default_value = "viewer")]
    role: Role,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the working and stable buckets
    Init,
    /// Upload a file (or `-` for stdin) as a blob
    Upload {
        /// Blob name
        name: String,
        /// Source file, or `-` to read stdin
        path: PathBuf,
        /// Content type (default: application/octet-stream)
        #[arg(long)]
        content_type: Option<String>,
        /// Tag to attach (repeatable, order is kept)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Extra metadata field as KEY=VALUE (repeatable)
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },
    /// Download a blob to a file or stdout
    Download {
        /// Blob name
        name: String,
        /// Specific version id
        #[arg(long)]
        version: Option<String>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check whether a blob is visible
    Exists {
        /// Blob name
        name: String,
    },
    /// Delete a blob from both buckets
    Rm {
        /// Blob name
        name: String,
    },
    /// List visible blobs
    Ls {
        /// Include size, timestamps and metadata
        #[arg(short, long, default_value_t = false)]
        long: bool,
    },
    /// Tag management commands
    Tags {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// List the versions of a blob, newest first
    Versions {
        /// Blob name
        name: String,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Show a blob's tags
    Get {
        /// Blob name
        name: String,
    },
    /// Replace a blob's tags
    Set {
        /// Blob name
        name: String,
        /// New tags, in order
        #[arg(num_args = 0..)]
        tags: Vec<String>,
    },
    /// Remove every tag from a blob
    Clear {
        /// Blob name
        name: String,
    },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let not_found = err
                .downcast_ref::<RouterError>()
                .is_some_and(RouterError::is_not_found);
            if not_found {
                ExitCode::from(EXIT_NOT_FOUND)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path.display());
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let router = BlobRouter::from_config(&config)
        .await
        .context("failed to initialize storage")?;
    let caller = CallerIdentity::new(cli.user_id.unwrap_or_else(Uuid::nil), cli.user, cli.role);

    if let Commands::Init = cli.command {
        return handle_init(&router, config.buckets.versioning).await;
    }

    if config.buckets.auto_create {
        router
            .ensure_buckets(config.buckets.versioning)
            .await
            .context("failed to provision buckets")?;
    }

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Upload {
            name,
            path,
            content_type,
            tags,
            meta,
        } => handle_upload(&router, &caller, &name, &path, content_type, tags, meta).await,
        Commands::Download {
            name,
            version,
            output,
        } => handle_download(&router, &caller, &name, version.as_deref(), output.as_deref()).await,
        Commands::Exists { name } => {
            let exists = router.exists(&caller, &name).await;
            print_json(&json!({ "name": name, "exists": exists }))
        }
        Commands::Rm { name } => {
            router.delete(&caller, &name).await?;
            print_json(&json!({ "name": name, "deleted": true }))
        }
        Commands::Ls { long } => {
            if long {
                print_json(&router.list_with_metadata(&caller).await)
            } else {
                print_json(&router.list(&caller).await)
            }
        }
        Commands::Tags { command } => handle_tags_command(&router, &caller, command).await,
        Commands::Versions { name } => print_json(&router.list_versions(&caller, &name).await),
    }
}

async fn handle_init(router: &BlobRouter, versioning: bool) -> Result<()> {
    router
        .ensure_buckets(versioning)
        .await
        .context("failed to provision buckets")?;

    let buckets = router.buckets();
    print_json(&json!({
        "backend": router.store().backend_name(),
        "working": buckets.name(depot_core::Bucket::Working),
        "stable": buckets.name(depot_core::Bucket::Stable),
        "versioning": versioning,
    }))
}

async fn handle_upload(
    router: &BlobRouter,
    caller: &CallerIdentity,
    name: &str,
    path: &Path,
    content_type: Option<String>,
    tags: Vec<String>,
    meta: Vec<(String, String)>,
) -> Result<()> {
    let body = open_body(path).await?;

    let mut request = UploadRequest::new(body);
    if let Some(content_type) = content_type {
        request = request.content_type(content_type);
    }
    if !tags.is_empty() {
        request = request.tags(tags);
    }
    for (key, value) in meta {
        request = request.field(key, value);
    }

    let stored = router.upload(caller, name, request).await?;
    print_json(&stored)
}

async fn open_body(path: &Path) -> Result<ByteStream> {
    if path == Path::new("-") {
        return Ok(reader_body(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(reader_body(file))
}

fn reader_body<R: AsyncRead + Send + 'static>(reader: R) -> ByteStream {
    Box::pin(ReaderStream::new(reader).map(|chunk| chunk.map_err(StorageError::from)))
}

async fn handle_download(
    router: &BlobRouter,
    caller: &CallerIdentity,
    name: &str,
    version: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let download = match version {
        Some(version_id) => router.download_version(caller, name, version_id).await?,
        None => router.download(caller, name).await?,
    };
    tracing::info!(bucket = %download.bucket, size = download.meta.size, "Downloading blob");

    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut body = download.body;
    while let Some(chunk) = body.next().await {
        sink.write_all(&chunk?).await?;
    }
    sink.flush().await?;
    Ok(())
}

async fn handle_tags_command(
    router: &BlobRouter,
    caller: &CallerIdentity,
    command: TagCommands,
) -> Result<()> {
    match command {
        TagCommands::Get { name } => print_json(&router.get_tags(caller, &name).await),
        TagCommands::Set { name, tags } => {
            router.set_tags(caller, &name, &tags).await?;
            print_json(&json!({ "name": name, "tags": tags }))
        }
        TagCommands::Clear { name } => {
            router.delete_tags(caller, &name).await?;
            print_json(&json!({ "name": name, "tags": [] }))
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
