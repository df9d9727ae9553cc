use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vault_core::constants::{
    DEFAULT_ENCODER_PROGRAM, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MUX_TIMEOUT_SECS,
    DEFAULT_YT_DLP_PROGRAM,
};
use vault_core::{
    CancellationToken, CoreConfig, FetchRequest, FileLookup, FileRepository,
    InMemoryFileRepository, LogicalFileMetadata, LogicalFileReference, SearchFilters,
    SessionIdentity, SourceKind, StoreRequest, StoreSource, VaultService,
    duration_secs_from_env_value, program_from_env_value,
};
use vault_uuid::VaultId;

/// Index file kept in the storage root when `--index` is not given.
const DEFAULT_INDEX_FILE: &str = ".vault-index.json";

#[derive(Parser)]
#[command(name = "vault-run")]
#[command(about = "Operator CLI for the file vault")]
struct Cli {
    /// Acting user id
    #[arg(long)]
    user: VaultId,
    /// Access group the acting user belongs to (repeatable)
    #[arg(long = "member-of")]
    groups: Vec<VaultId>,
    /// Act as an administrator
    #[arg(long)]
    admin: bool,
    /// JSON file holding file records between runs
    #[arg(long)]
    index: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Youtube,
    GoogleDrive,
    Onedrive,
}

impl From<KindArg> for SourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Youtube => SourceKind::YouTube,
            KindArg::GoogleDrive => SourceKind::GoogleDrive,
            KindArg::Onedrive => SourceKind::OneDrive,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Store a local file, or download a plain URL with --url
    Store {
        /// Local file to upload
        #[arg(required_unless_present = "url")]
        file: Option<PathBuf>,
        /// Plain URL to download instead of a local file
        #[arg(long, conflicts_with = "file")]
        url: Option<String>,
        /// Display name (defaults to the local file stem)
        #[arg(long)]
        name: Option<String>,
        /// Extension (defaults to the local file extension)
        #[arg(long)]
        extension: Option<String>,
        /// Owning access group
        #[arg(long)]
        group: VaultId,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long = "category")]
        categories: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        public_viewing: bool,
        #[arg(long)]
        public_download: bool,
        /// Replace an existing blob instead of deduplicating
        #[arg(long)]
        overwrite: bool,
    },
    /// Fetch from YouTube, Google Drive or OneDrive
    Fetch {
        /// Share URL or identifier
        source: String,
        /// Source kind (guessed from the URL when omitted)
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Owning access group
        #[arg(long)]
        group: VaultId,
        #[arg(long)]
        no_video: bool,
        #[arg(long)]
        no_audio: bool,
        /// e.g. 1080p
        #[arg(long)]
        video_quality: Option<String>,
        /// e.g. 128kbps
        #[arg(long)]
        audio_quality: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        public_viewing: bool,
        #[arg(long)]
        public_download: bool,
    },
    /// Copy a stored file out, by id or by relative blob path
    Open {
        target: String,
        /// Destination file (defaults to the stored download name)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the on-disk location of a stored file
    Path { target: String },
    /// List files visible to the acting user
    List {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
struct IndexRecord {
    reference: LogicalFileReference,
    metadata: LogicalFileMetadata,
}

fn load_index(path: &Path, repo: &InMemoryFileRepository) -> anyhow::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<IndexRecord> =
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))?;
    let count = records.len();
    for record in records {
        repo.insert(record.reference, record.metadata)?;
    }
    tracing::debug!(count, index = %path.display(), "index loaded");
    Ok(())
}

fn save_index(path: &Path, repo: &InMemoryFileRepository) -> anyhow::Result<()> {
    let records: Vec<IndexRecord> = repo
        .search(&SearchFilters::default())?
        .into_iter()
        .map(|(reference, metadata)| IndexRecord {
            reference,
            metadata,
        })
        .collect();
    let json = serde_json::to_vec_pretty(&records)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn lookup(target: &str) -> FileLookup {
    match VaultId::parse(target.trim()) {
        Ok(id) => FileLookup::Id(id),
        Err(_) => FileLookup::Path(target.to_owned()),
    }
}

/// Local file name for `open` without `--output`.
///
/// Stored names come from uploaders and upstream services, so only the final component is
/// kept and the file always lands in the current directory.
fn default_output(file_name: &str) -> anyhow::Result<PathBuf> {
    match Path::new(file_name).file_name() {
        Some(name) if name != "." && name != ".." => Ok(PathBuf::from(name)),
        _ => anyhow::bail!("stored name {file_name:?} is not a usable file name; pass --output"),
    }
}

/// Reads core settings from the environment.
///
/// # Environment Variables
/// - `VAULT_STORAGE_ROOT`: storage root directory (default: "/vault_data")
/// - `VAULT_ENCODER`: encoder used to mux separate streams (default: "ffmpeg")
/// - `VAULT_MUX_TIMEOUT_SECS`: encoder time limit (default: 15)
/// - `VAULT_FETCH_TIMEOUT_SECS`: overall fetch deadline (default: 600)
/// - `VAULT_YT_DLP`: stream catalogue program (default: "yt-dlp")
fn config_from_env() -> anyhow::Result<CoreConfig> {
    let env = |key: &str| std::env::var(key).ok();
    let root = env("VAULT_STORAGE_ROOT").unwrap_or_else(|| "/vault_data".into());

    let config = CoreConfig::new(PathBuf::from(root))?
        .with_encoder_program(program_from_env_value(
            env("VAULT_ENCODER"),
            DEFAULT_ENCODER_PROGRAM,
        ))
        .with_yt_dlp_program(program_from_env_value(
            env("VAULT_YT_DLP"),
            DEFAULT_YT_DLP_PROGRAM,
        ))
        .with_mux_timeout(duration_secs_from_env_value(
            env("VAULT_MUX_TIMEOUT_SECS"),
            Duration::from_secs(DEFAULT_MUX_TIMEOUT_SECS),
        )?)?
        .with_fetch_timeout(duration_secs_from_env_value(
            env("VAULT_FETCH_TIMEOUT_SECS"),
            Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        )?)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("vault=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = config_from_env()?;
    let index = cli
        .index
        .clone()
        .unwrap_or_else(|| config.storage_root().join(DEFAULT_INDEX_FILE));

    let repo = Arc::new(InMemoryFileRepository::new());
    load_index(&index, &repo)?;
    let service = VaultService::new(config, repo.clone())?;

    let identity = if cli.admin {
        SessionIdentity::admin(cli.user)
    } else {
        SessionIdentity::user(cli.user, cli.groups)
    };

    match cli.command {
        Commands::Store {
            file,
            url,
            name,
            extension,
            group,
            tags,
            categories,
            description,
            public_viewing,
            public_download,
            overwrite,
        } => {
            let (source, default_name, default_extension) = match (file, url) {
                (_, Some(url)) => (StoreSource::Url(url), None, None),
                (Some(path), None) => {
                    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
                    let ext = path.extension().map(|s| s.to_string_lossy().into_owned());
                    let handle = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("opening {}", path.display()))?;
                    (StoreSource::Stream(Box::new(handle)), stem, ext)
                }
                (None, None) => anyhow::bail!("either a file or --url is required"),
            };

            let mut request = StoreRequest::new(
                name.or(default_name).unwrap_or_default(),
                extension.or(default_extension).unwrap_or_default(),
                group,
                source,
            );
            request.tags = tags;
            request.categories = categories;
            request.description = description;
            request.public_viewing = public_viewing;
            request.public_download = public_download;
            request.overwrite = overwrite;

            let id = service.store(&identity, request).await?;
            save_index(&index, &repo)?;
            println!("{id}");
        }
        Commands::Fetch {
            source,
            kind,
            group,
            no_video,
            no_audio,
            video_quality,
            audio_quality,
            tags,
            description,
            public_viewing,
            public_download,
        } => {
            let kind = match kind {
                Some(kind) => SourceKind::from(kind),
                None => SourceKind::detect(&source)
                    .context("cannot tell the source kind from the URL; pass --kind")?,
            };
            let mut request = FetchRequest::new(source, group);
            request.download_video = !no_video;
            request.download_audio = !no_audio;
            request.video_quality = video_quality;
            request.audio_quality = audio_quality;
            request.tags = tags;
            request.description = description;
            request.public_viewing = public_viewing;
            request.public_download = public_download;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling fetch");
                    on_interrupt.cancel();
                }
            });

            let id = service.fetch(&identity, kind, request, &cancel).await?;
            save_index(&index, &repo)?;
            println!("{id}");
        }
        Commands::Open { target, output } => {
            let mut opened = service.open_stream(&identity, &lookup(&target)).await?;
            let output = match output {
                Some(output) => output,
                None => default_output(&opened.file_name)?,
            };
            let mut destination = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("creating {}", output.display()))?;
            let copied = tokio::io::copy(&mut opened.stream, &mut destination).await?;
            save_index(&index, &repo)?;
            println!("{} ({} bytes)", output.display(), copied);
        }
        Commands::Path { target } => {
            let physical = service
                .resolve_physical_path(&identity, &lookup(&target))
                .await?;
            println!(
                "{}\t{}\t{}",
                physical.path.display(),
                physical.content_type,
                physical.file_name
            );
        }
        Commands::List {
            tag,
            category,
            name,
            description,
        } => {
            let filters = SearchFilters {
                tag,
                category,
                name,
                description,
            };
            let rows = service.list_accessible(&identity, &filters)?;
            if rows.is_empty() {
                println!("No files found.");
            } else {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_keeps_plain_names() {
        assert_eq!(
            default_output("Holiday Plan.docx").unwrap(),
            PathBuf::from("Holiday Plan.docx")
        );
    }

    #[test]
    fn test_default_output_strips_directories() {
        assert_eq!(
            default_output("../../.bashrc").unwrap(),
            PathBuf::from(".bashrc")
        );
        assert_eq!(default_output("a/b.mp4").unwrap(), PathBuf::from("b.mp4"));
        assert_eq!(
            default_output("/etc/passwd").unwrap(),
            PathBuf::from("passwd")
        );
    }

    #[test]
    fn test_default_output_rejects_names_without_a_file_component() {
        for name in ["", ".", "..", "../..", "/", "notes/.."] {
            assert!(default_output(name).is_err(), "{name:?} should be rejected");
        }
    }
}
