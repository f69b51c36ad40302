use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crash_triage::{
    bugs::format_bug_url,
    config::{Config, ObservabilityConfig},
    models::RawCrash,
    state::{create_store, StoreSnapshot},
    TriageService,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crash-triage")]
#[command(about = "Match crashes against signature buckets", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config/default.toml")]
    config: PathBuf,

    /// Seed the store from a JSON snapshot before running the command
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Write the store contents to this JSON file after the command
    #[arg(long)]
    save: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a snapshot into the configured store
    Import {
        #[arg(value_name = "SNAPSHOT")]
        file: PathBuf,
    },

    /// Print the store contents as a snapshot
    Export,

    /// Show the normalized form of a trace file
    Normalize {
        #[arg(value_name = "TRACE_FILE")]
        trace: PathBuf,
    },

    /// Submit a crash and show matching buckets
    Submit {
        #[arg(value_name = "TRACE_FILE")]
        trace: PathBuf,

        /// Crash address (hex with 0x prefix, or decimal)
        #[arg(short, long, value_parser = parse_address)]
        address: Option<u64>,

        /// Output line (repeatable)
        #[arg(short, long)]
        output: Vec<String>,
    },

    /// Show matching and similar buckets for a stored crash
    Find {
        #[arg(value_name = "CRASH_ID")]
        crash_id: u64,
    },

    /// Search and record the suggestion on the crash
    Triage {
        #[arg(value_name = "CRASH_ID")]
        crash_id: u64,
    },

    /// Explain the difference between a bucket's signature and a crash
    Diff {
        #[arg(value_name = "BUCKET_ID")]
        bucket_id: u64,

        #[arg(value_name = "CRASH_ID")]
        crash_id: u64,
    },

    /// Assign a crash to a bucket
    Assign {
        #[arg(value_name = "CRASH_ID")]
        crash_id: u64,

        #[arg(value_name = "BUCKET_ID")]
        bucket_id: u64,
    },

    /// Create a bucket from a crash and assign the crash to it
    NewBucket {
        #[arg(value_name = "CRASH_ID")]
        crash_id: u64,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Format a bug tracker link
    BugUrl {
        /// URL template with a single %s placeholder
        #[arg(short, long)]
        template: String,

        #[arg(value_name = "EXTERNAL_ID")]
        id: String,
    },
}

fn parse_address(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid crash address '{}': {}", value, e))
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    let json = config.json_logs;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_raw_crash(path: &Path) -> anyhow::Result<RawCrash> {
    let trace = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace file {}", path.display()))?;
    Ok(RawCrash::new(trace))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(&cli.config).context("Failed to load configuration")?;
    init_tracing(&config.observability);

    tracing::debug!("Starting crash-triage v{}", env!("CARGO_PKG_VERSION"));

    if config.observability.prometheus_enabled {
        if let Err(e) = crash_triage::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let store = create_store(&config.store)?;
    if let Some(path) = &cli.snapshot {
        StoreSnapshot::load(path)?.import_into(store.as_ref()).await?;
    }

    let service = TriageService::new(Arc::clone(&store), &config)?;

    match cli.command {
        Commands::Import { file } => {
            let summary = StoreSnapshot::load(&file)?.import_into(store.as_ref()).await?;
            print_json(&summary)?;
        }

        Commands::Export => {
            print_json(&StoreSnapshot::export_from(store.as_ref()).await?)?;
        }

        Commands::Normalize { trace } => {
            let raw = read_raw_crash(&trace)?;
            let crash = crash_triage::models::CrashEntry::new(0, raw);
            match service.normalize(&crash) {
                Ok(normalized) => print_json(&normalized)?,
                Err(e) => bail!("Crash is unbucketable: {}", e),
            }
        }

        Commands::Submit {
            trace,
            address,
            output,
        } => {
            let mut raw = read_raw_crash(&trace)?;
            raw.crash_address = address;
            raw.output = output;

            let crash = service.submit_crash(raw).await?;
            print_json(&service.find_signatures_view(crash.id).await?)?;
        }

        Commands::Find { crash_id } => {
            print_json(&service.find_signatures_view(crash_id).await?)?;
        }

        Commands::Triage { crash_id } => {
            print_json(&service.triage_crash(crash_id).await?)?;
        }

        Commands::Diff {
            bucket_id,
            crash_id,
        } => {
            print_json(&service.signature_diff(bucket_id, crash_id).await?)?;
        }

        Commands::Assign {
            crash_id,
            bucket_id,
        } => {
            print_json(&service.assign(crash_id, bucket_id).await?)?;
        }

        Commands::NewBucket {
            crash_id,
            description,
        } => {
            print_json(&service.create_bucket_from_crash(crash_id, description).await?)?;
        }

        Commands::BugUrl { template, id } => {
            println!("{}", format_bug_url(&template, &id)?);
        }
    }

    if let Some(path) = &cli.save {
        let snapshot = StoreSnapshot::export_from(store.as_ref()).await?;
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        tracing::info!(path = %path.display(), "Snapshot saved");
    }

    Ok(())
}
