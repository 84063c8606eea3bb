//! Cabinet CLI: operate a content store directly from the command line.
//!
//! Backends and limits come from the environment (see `Config::from_env`).

use std::path::PathBuf;

use anyhow::Context;
use cabinet_cli::{guess_content_type, human_size, init_tracing, parse_id, QueryArgs};
use cabinet_core::validation::split_tags;
use cabinet_core::{Config, TenantContext};
use cabinet_services::{build_registry, MetadataChanges, UploadRequest};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "cabinet", about = "Multi-tenant content store")]
struct Cli {
    /// Tenant to act as (defaults to DEFAULT_TENANT_ID)
    #[arg(long, global = true)]
    tenant: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Upload {
        /// Path to the file to upload
        file: PathBuf,
        /// Content type (guessed from the extension when omitted)
        #[arg(long)]
        content_type: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Path to an XML metadata document
        #[arg(long)]
        metadata: Option<PathBuf>,
    },
    /// Download a file to a path, or to stdout
    Fetch {
        /// File UUID
        id: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Show a file's metadata
    Info {
        /// File UUID
        id: String,
    },
    /// List files matching filters
    Query(QueryArgs),
    /// Replace a file's tags
    Tag {
        /// File UUID
        id: String,
        /// Comma-separated tags
        tags: String,
    },
    /// Change a file's display name or XML metadata
    Update {
        /// File UUID
        id: String,
        #[arg(long)]
        filename: Option<String>,
        /// Path to a replacement XML metadata document
        #[arg(long, conflicts_with = "clear_metadata")]
        metadata: Option<PathBuf>,
        /// Remove the stored XML metadata
        #[arg(long)]
        clear_metadata: bool,
    },
    /// Delete a file
    Delete {
        /// File UUID
        id: String,
    },
    /// Run one purge pass over deleted files
    Purge,
    /// Run the purge worker until interrupted
    RunPurger,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

async fn read_metadata(path: &PathBuf) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read metadata file {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let tenant = cli
        .tenant
        .clone()
        .unwrap_or_else(|| config.default_tenant_id.clone());
    let ctx = TenantContext::from_raw(&tenant)?.with_principal("cli");

    let registry = build_registry(&config)
        .await
        .context("Failed to initialize content registry")?;

    match cli.command {
        Commands::Upload {
            file,
            content_type,
            tags,
            metadata,
        } => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("File path has no usable file name")?
                .to_string();
            let content_type = match content_type {
                Some(ct) => ct,
                None => guess_content_type(&file)
                    .context("Cannot guess content type, pass --content-type")?
                    .to_string(),
            };
            let metadata_xml = match metadata {
                Some(path) => Some(read_metadata(&path).await?),
                None => None,
            };

            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let size = handle.metadata().await?.len();

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let info = registry
                .upload_with_cancel(
                    &ctx,
                    UploadRequest {
                        filename,
                        content_type,
                        body: ReaderStream::new(handle).boxed(),
                        metadata_xml,
                        tags: tags.as_deref().map(split_tags).unwrap_or_default(),
                        expected_size: Some(size),
                    },
                    &cancel,
                )
                .await?;
            tracing::info!(file_id = %info.id, size = %human_size(info.size_bytes), "Uploaded");
            print_json(&info)?;
        }
        Commands::Fetch { id, output } => {
            let (info, mut stream) = registry.fetch(&ctx, parse_id(&id)?).await?;
            match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let mut written = Ok(());
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(chunk) => file.write_all(&chunk).await?,
                            Err(e) => {
                                written = Err(e);
                                break;
                            }
                        }
                    }
                    if let Err(e) = written {
                        drop(file);
                        let _ = tokio::fs::remove_file(&path).await;
                        return Err(e.into());
                    }
                    file.flush().await?;
                    tracing::info!(
                        file_id = %info.id,
                        path = %path.display(),
                        size = %human_size(info.size_bytes),
                        "Downloaded"
                    );
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    while let Some(chunk) = stream.next().await {
                        stdout.write_all(&chunk?).await?;
                    }
                    stdout.flush().await?;
                }
            }
        }
        Commands::Info { id } => {
            let info = registry.get_info(&ctx, parse_id(&id)?).await?;
            print_json(&info)?;
        }
        Commands::Query(args) => {
            let (query, page) = args.to_query()?;
            let result = registry.query(&ctx, &query, &page).await?;
            print_json(&result)?;
        }
        Commands::Tag { id, tags } => {
            let info = registry
                .set_tags(&ctx, parse_id(&id)?, &split_tags(&tags))
                .await?;
            print_json(&info)?;
        }
        Commands::Update {
            id,
            filename,
            metadata,
            clear_metadata,
        } => {
            let metadata_xml = match (metadata, clear_metadata) {
                (Some(path), _) => Some(Some(read_metadata(&path).await?)),
                (None, true) => Some(None),
                (None, false) => None,
            };
            let info = registry
                .update_metadata(
                    &ctx,
                    parse_id(&id)?,
                    MetadataChanges {
                        filename,
                        tags: None,
                        metadata_xml,
                    },
                )
                .await?;
            print_json(&info)?;
        }
        Commands::Delete { id } => {
            registry.delete(&ctx, parse_id(&id)?).await?;
            print_json(&serde_json::json!({ "success": true, "message": format!("File {} deleted", id) }))?;
        }
        Commands::Purge => {
            let report = registry.purge_tombstoned().await?;
            print_json(&serde_json::json!({
                "scanned": report.scanned,
                "purged": report.purged,
                "failed": report.failed,
            }))?;
        }
        Commands::RunPurger => {
            let service = registry.start_purge_service();
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            service.shutdown().await;
        }
    }

    registry.shutdown().await;
    Ok(())
}
