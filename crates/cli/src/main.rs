use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use docbridge_companion::config::{CompanionConfig, default_config_path, load_config_from_path};
use docbridge_companion::{
    AvailabilityCache, ChannelNotifier, HealthMonitor, HttpTransport, OpenRequestClient, SyncCallbacks, SyncStreamClient,
};
use docbridge_types::{DocumentRef, MonitoringConfigPatch, SyncProgress, SyncStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docbridge", version, about = "Talk to the docbridge companion service and sync API")]
struct Cli {
    /// Configuration file (defaults to $DOCBRIDGE_CONFIG_PATH or the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the companion service once, or keep watching it.
    Health(HealthArgs),
    /// Ask the companion service to open a document.
    Open(OpenArgs),
    /// Manage the folders the companion service searches.
    Roots {
        #[command(subcommand)]
        action: RootsAction,
    },
    /// Start a sync job (or attach to the running one) and follow it.
    Sync,
}

#[derive(Debug, Args)]
struct HealthArgs {
    /// Keep probing until interrupted.
    #[arg(long)]
    watch: bool,

    /// Override the probe interval in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[derive(Debug, Args)]
struct OpenArgs {
    #[arg(long)]
    title: String,

    #[arg(long, default_value = "")]
    revision: String,

    #[arg(long, default_value = "")]
    file_type: String,

    #[arg(long, default_value = "")]
    logical_path: String,

    /// Documents with a remote URL are never sent to the companion service.
    #[arg(long)]
    remote_url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum RootsAction {
    List,
    Add { path: String },
    Remove { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(default_config_path);
    debug!(path = %path.display(), "loading configuration");
    let config =
        load_config_from_path(&path).with_context(|| format!("failed to load configuration from {}", path.display()))?;

    match cli.command {
        Command::Health(args) => run_health(&config, args).await,
        Command::Open(args) => run_open(&config, args).await,
        Command::Roots { action } => run_roots(&config, action).await,
        Command::Sync => run_sync(&config).await,
    }
}

/// Filter from `RUST_LOG`, falling back to `info`.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_client(config: &CompanionConfig) -> Result<OpenRequestClient> {
    let transport = HttpTransport::new(config.companion_url.clone())?;
    Ok(OpenRequestClient::new(Arc::new(transport)))
}

async fn run_health(config: &CompanionConfig, args: HealthArgs) -> Result<()> {
    let opener = open_client(config)?;
    let probe = Arc::new(AvailabilityCache::new(opener.clone()).with_debug(config.monitoring.debug));
    let (notifier, mut notifications) = ChannelNotifier::new();
    let monitor = HealthMonitor::new(config.monitoring.clone(), probe, opener, Arc::new(notifier));
    if let Some(interval_ms) = args.interval_ms {
        if interval_ms == 0 {
            bail!("--interval-ms must be greater than zero");
        }
        monitor.update_options(MonitoringConfigPatch {
            check_interval_ms: Some(interval_ms),
            ..Default::default()
        });
    }

    if !args.watch {
        let status = monitor.force_health_check().await;
        println!("{}", serde_json::to_string_pretty(&status)?);
        if !status.is_available {
            std::process::exit(1);
        }
        return Ok(());
    }

    let _subscription = monitor.subscribe(|status| {
        let state = if status.is_available { "available" } else { "unavailable" };
        println!(
            "{state} (errors: {}, avg {:.0}ms)",
            status.consecutive_errors, status.average_response_time_ms
        );
    });
    monitor.start_monitoring();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(notification) = notifications.recv() => eprintln!("{}", notification.message()),
        }
    }
    monitor.stop_monitoring();
    Ok(())
}

async fn run_open(config: &CompanionConfig, args: OpenArgs) -> Result<()> {
    let client = open_client(config)?;
    let mut document = DocumentRef::new(args.title, args.revision, args.file_type, args.logical_path);
    if let Some(url) = args.remote_url {
        document = document.with_remote_url(url);
    }

    let result = client.open_local_document(&document, config.request_timeout()).await;
    if !result.ok {
        bail!(
            "could not open '{}': {}",
            document.title,
            result.message.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    println!("opened '{}'", document.title);
    Ok(())
}

async fn run_roots(config: &CompanionConfig, action: RootsAction) -> Result<()> {
    let client = open_client(config)?;
    let roots = match action {
        RootsAction::List => client.list_roots().await?,
        RootsAction::Add { path } => client.add_root(&path).await?,
        RootsAction::Remove { path } => client.remove_root(&path).await?,
    };
    println!("{}", serde_json::to_string_pretty(&roots)?);
    Ok(())
}

fn print_progress(progress: &SyncProgress) {
    match progress.percent() {
        Some(percent) => println!(
            "{}: {}/{} ({percent:.0}%), batch {}/{}",
            progress.status, progress.processed, progress.total, progress.current_batch, progress.total_batches
        ),
        None => println!("{}: {} processed", progress.status, progress.processed),
    }
}

async fn run_sync(config: &CompanionConfig) -> Result<()> {
    let transport = Arc::new(HttpTransport::new(config.server_url.clone())?);
    let callbacks = SyncCallbacks::new()
        .on_progress(print_progress)
        .on_error(|message| eprintln!("sync failed: {message}"));
    let client = SyncStreamClient::new(transport, callbacks);

    let outcome = client.start_sync().await;
    if !outcome.success {
        bail!(outcome.error.unwrap_or_else(|| "sync did not start".to_string()));
    }
    if outcome.resumed {
        println!("attached to running sync job");
    } else if let Some(sync_id) = &outcome.sync_id {
        println!("started sync job {sync_id}");
    }

    let mut updates = client.subscribe();
    let finished = loop {
        let status = updates.borrow_and_update().status;
        if status.is_terminal() {
            break status;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                client.disconnect();
                println!("detached; the job keeps running on the server");
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    bail!("sync client closed unexpectedly");
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(60)) => {
                if !client.is_syncing() && !client.has_stream() {
                    bail!("lost the sync stream");
                }
            }
        }
    };

    let progress = client.progress();
    client.disconnect();
    if finished == SyncStatus::Error {
        bail!(progress.error.unwrap_or_else(|| "sync failed".to_string()));
    }
    print_progress(&progress);
    Ok(())
}
