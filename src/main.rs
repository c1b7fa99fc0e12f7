use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use story_capture::device::CaptureMode;
use story_capture::diagnostics::DiagnosticsRing;
use story_capture::events::{EventBus, EventFilter, PipelineEvent};
use story_capture::identifier::{
    derive_storage_path, extension_for_mime, extract_from_link, SessionIdentifier, ValidityWindow,
};
use story_capture::recorder::RecordedBlob;
use story_capture::session::{RecordBackedValidator, SessionValidator};
use story_capture::upload::{
    FsObjectStorage, FsRecordStore, RecordStatus, RemoteSessionRecord, UploadEngine, UploadOptions,
};
use story_capture::StoryCaptureConfig;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "storycapture")]
#[command(about = "Validate recording links and move recorded stories into durable storage")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "storycapture.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a recording link against the validity window and the record store
    Validate {
        link: String,
        /// Evaluate at this epoch-seconds time instead of now
        #[arg(long)]
        now: Option<i64>,
    },
    /// Decode a recording link without touching the record store
    Inspect { link: String },
    /// Create or replace a session record
    Seed {
        identifier: String,
        #[arg(long, default_value = "Active")]
        status: String,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        asker: Option<String>,
        #[arg(long)]
        storyteller: Option<String>,
        /// Full owner id used for storage paths
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Upload a recorded file for a session and finalize its record
    Upload {
        link: String,
        file: PathBuf,
        #[arg(long, default_value = "video/webm")]
        mime_type: String,
        #[arg(long)]
        duration: Option<u32>,
    },
    /// Show the persisted diagnostics ring
    Diagnostics {
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        session: Option<String>,
    },
    /// Check the configuration file and exit
    CheckConfig,
    /// Print default configuration in TOML format
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if matches!(args.command, Command::PrintConfig) {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    let config = StoryCaptureConfig::load_from_file(&args.config).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate()?;
    info!("Configuration loaded from: {}", args.config);

    match args.command {
        Command::Validate { link, now } => validate_link(&config, &link, now).await,
        Command::Inspect { link } => inspect_link(&config, &link),
        Command::Seed {
            identifier,
            status,
            prompt,
            asker,
            storyteller,
            user_id,
        } => {
            let mut record = RemoteSessionRecord::new(identifier, parse_status(&status)?);
            record.prompt_text = prompt;
            record.asker_name = asker;
            record.storyteller_name = storyteller;
            record.user_id = user_id;

            FsRecordStore::new(&config.storage.records_path)
                .put_record(&record)
                .await?;
            println!("✓ Seeded {} ({})", record.session_id, record.status);
            Ok(())
        }
        Command::Upload {
            link,
            file,
            mime_type,
            duration,
        } => upload_file(&config, &link, file, mime_type, duration).await,
        Command::Diagnostics { clear, session } => {
            let ring = DiagnosticsRing::persistent(&config.diagnostics.path, config.diagnostics.capacity).await;
            if clear {
                ring.clear();
                ring.flush().await;
                println!("✓ Cleared diagnostics");
                return Ok(());
            }
            let events = match session {
                Some(id) => ring.events_for_session(&id),
                None => ring.events(),
            };
            for event in events {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
        Command::CheckConfig => {
            println!("✓ Configuration is valid");
            Ok(())
        }
        Command::PrintConfig => Ok(()),
    }
}

async fn validate_link(config: &StoryCaptureConfig, link: &str, now: Option<i64>) -> Result<()> {
    let diagnostics = diagnostics_ring(config).await;
    let records = Arc::new(FsRecordStore::new(&config.storage.records_path));

    let mut validator = RecordBackedValidator::new(records, diagnostics.clone())
        .with_window(ValidityWindow::from(&config.identifier));
    if let Some(now) = now {
        validator = validator.at_time(now);
    }

    let raw = extract_from_link(link)?;
    let outcome = validator.validate(&raw).await;
    diagnostics.flush().await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_valid {
        std::process::exit(1);
    }
    Ok(())
}

fn inspect_link(config: &StoryCaptureConfig, link: &str) -> Result<()> {
    let identity = SessionIdentifier::parse(&extract_from_link(link)?)?;
    let window = ValidityWindow::from(&config.identifier);
    let now = Utc::now().timestamp();

    println!("session id:   {}", identity.session_id());
    println!("prompt:       {}", identity.prompt_id);
    println!("user:         {}", identity.user_id);
    println!("storyteller:  {}", identity.storyteller_id);
    if let Some(issued) = identity.issued_at_utc() {
        println!("issued:       {}", issued.to_rfc3339());
    }
    if let Some(expires) = identity.expires_at(&window) {
        println!("expires:      {}", expires.to_rfc3339());
    }
    println!("within window: {}", identity.is_within(now, &window));
    println!(
        "video path:   {}",
        derive_storage_path(&identity, None, extension_for_mime("video/webm"))
    );
    Ok(())
}

async fn upload_file(
    config: &StoryCaptureConfig,
    link: &str,
    file: PathBuf,
    mime_type: String,
    duration: Option<u32>,
) -> Result<()> {
    let identity = SessionIdentifier::parse(&extract_from_link(link)?)?;
    let data = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mode = if mime_type.starts_with("audio/") {
        CaptureMode::Audio
    } else {
        CaptureMode::Video
    };
    let blob = RecordedBlob {
        data: Bytes::from(data),
        mime_type,
        mode,
        duration_seconds: duration.unwrap_or(0),
    };

    let diagnostics = diagnostics_ring(config).await;
    let event_bus = EventBus::new(config.system.event_bus_capacity);
    let engine = UploadEngine::new(
        Arc::new(FsObjectStorage::new(&config.storage.objects_path)),
        Arc::new(FsRecordStore::new(&config.storage.records_path)),
        diagnostics.clone(),
    )
    .with_config(&config.upload)
    .with_event_bus(event_bus.clone());

    let mut progress = event_bus.subscribe_filtered(
        EventFilter::EventTypes(vec!["upload_progress", "upload_failed"]),
        "cli_progress",
    );
    let printer = tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            match &event {
                PipelineEvent::UploadProgress { .. } => {
                    let percent = event.progress_fraction().unwrap_or(0.0) * 100.0;
                    println!("  {:>5.1}%  {}", percent, event.description());
                }
                _ => println!("  {}", event.description()),
            }
        }
    });

    let mut options = UploadOptions::new();
    if let Some(duration) = duration {
        options = options.with_duration(duration);
    }
    let result = engine.upload(&blob, &identity, &options).await;
    printer.abort();
    diagnostics.flush().await;

    match result {
        Ok(result) => {
            println!(
                "✓ Uploaded {} bytes to {} in {} attempt(s)",
                result.bytes, result.storage_path, result.attempts
            );
            for soft in &result.soft_failures {
                println!("  note: {}", soft);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ {}", e.user_message());
            Err(anyhow!(e))
        }
    }
}

async fn diagnostics_ring(config: &StoryCaptureConfig) -> Arc<DiagnosticsRing> {
    Arc::new(DiagnosticsRing::persistent(&config.diagnostics.path, config.diagnostics.capacity).await)
}

fn parse_status(value: &str) -> Result<RecordStatus> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| anyhow!("Unknown record status '{}'", value))
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("story_capture={},storycapture={}", log_level, log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        None => fmt::layer().with_target(args.debug).boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(args.debug).boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "storycapture.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Story Capture Configuration File");
    println!("# This is the default configuration with all available options");
    println!();
    println!("{}", toml::to_string_pretty(&StoryCaptureConfig::default())?);
    Ok(())
}
