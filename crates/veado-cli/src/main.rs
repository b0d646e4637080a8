//! veado command-line client
//!
//! Discovers running veadotube instances, connects to them and logs what
//! they report. Also lists instances and switches avatar states.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use veado_core::config::{ClientConfig, default_config_path};
use veado_core::{CacheEvent, InstanceRegistry, SafeParser};
use veado_rpc::{ClientEvent, ConnectionEvent, ConnectionEventKind, ProtocolEvent, VeadoClient};

/// veado - client for veadotube instances
#[derive(Parser, Debug)]
#[command(name = "veado")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (defaults to `config.json` in the platform config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory veadotube writes instance files to
    #[arg(long, value_name = "DIR")]
    instances_dir: Option<PathBuf>,

    /// Discover instances without connecting to them
    #[arg(long)]
    no_auto_connect: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to every instance and log events until interrupted (default)
    Watch,
    /// Print the running instances and exit
    List,
    /// Switch the avatar state, then exit
    Set {
        /// State id
        state: String,

        /// Only this instance (defaults to every running instance)
        #[arg(long, value_name = "ID")]
        instance: Option<String>,

        /// Seconds to wait for connections
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

/// Set up logging with file output for debugging.
/// In debug builds, defaults to debug level and logs to timestamped file.
/// In release builds, defaults to info level and logs to stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("veado={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("veado-{timestamp}.log");
        let log_path = temp_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", log_path.display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = match &path {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(dir) = &args.instances_dir {
        config.instances_dir.clone_from(dir);
    }
    if args.no_auto_connect {
        config.auto_connect = false;
    }
    Ok(config)
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::InstanceStart(instance) => info!(
            "Instance started: {} ({} {}) at {}",
            instance.id, instance.name, instance.version, instance.server
        ),
        ClientEvent::InstanceUpdated(instance) => {
            info!("Instance moved: {} -> {}", instance.id, instance.server);
        }
        ClientEvent::InstanceEnd(id) => info!("Instance ended: {}", id),
        ClientEvent::Connection(ConnectionEvent {
            instance_id, kind, ..
        }) => match kind {
            ConnectionEventKind::Connected => info!("[{}] Connected", instance_id),
            ConnectionEventKind::Disconnected { code, reason } => {
                info!("[{}] Disconnected: {:?} {}", instance_id, code, reason);
            }
            ConnectionEventKind::Error(message) => warn!("[{}] {}", instance_id, message),
            ConnectionEventKind::ReconnectExhausted { attempts } => {
                warn!("[{}] Gave up after {} attempts", instance_id, attempts);
            }
            ConnectionEventKind::Protocol(ProtocolEvent::Unrecognized(value)) => {
                debug!("[{}] Unrecognized message: {}", instance_id, value);
            }
            other => debug!("[{}] {:?}", instance_id, other),
        },
        ClientEvent::Cache(cache) => match cache {
            CacheEvent::StateListUpdated {
                instance_id,
                states,
            } => {
                let ids: Vec<&str> = states.iter().map(|s| s.id.as_str()).collect();
                info!("[{}] States: {}", instance_id, ids.join(", "));
            }
            CacheEvent::StateChanged(change) => info!(
                "[{}] State: {} -> {}",
                change.instance_id,
                change.previous_state.as_deref().unwrap_or("-"),
                change.new_state
            ),
            CacheEvent::StatePeeked { instance_id, state } => {
                info!("[{}] Current state: {}", instance_id, state);
            }
            other => debug!("{:?}", other),
        },
    }
}

fn list(config: &ClientConfig) -> Result<()> {
    let mut registry =
        InstanceRegistry::new(&config.instances_dir, Arc::new(SafeParser::new()));
    registry
        .scan()
        .with_context(|| format!("Failed to read {}", config.instances_dir.display()))?;

    let mut instances: Vec<_> = registry.instances().collect();
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    for instance in instances {
        println!(
            "{}\t{}\t{} {}",
            instance.id, instance.server, instance.name, instance.version
        );
    }
    Ok(())
}

async fn watch(config: ClientConfig) -> Result<()> {
    let (mut client, mut events) =
        VeadoClient::start(config).context("Failed to start client")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted");
                break;
            }
        }
    }

    client.close().await;
    Ok(())
}

async fn set_state(
    mut config: ClientConfig,
    state: &str,
    only: Option<String>,
    timeout: Duration,
) -> Result<()> {
    config.auto_connect = true;
    let (mut client, mut events) =
        VeadoClient::start(config).context("Failed to start client")?;

    let mut pending: HashSet<String> = match only {
        Some(id) => HashSet::from([id]),
        None => client
            .instances()
            .await?
            .into_iter()
            .map(|instance| instance.id)
            .collect(),
    };
    if pending.is_empty() {
        client.close().await;
        bail!("No running instances");
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    while !pending.is_empty() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                log_event(&event);
                if let ClientEvent::Connection(ConnectionEvent {
                    instance_id,
                    kind: ConnectionEventKind::Connected,
                    ..
                }) = &event
                    && pending.contains(instance_id)
                    && client.set_avatar_state(instance_id, state).await?
                {
                    println!("{instance_id}: {state}");
                    pending.remove(instance_id);
                }
            }
            () = &mut deadline => break,
        }
    }

    client.close().await;
    if !pending.is_empty() {
        let mut missed: Vec<_> = pending.into_iter().collect();
        missed.sort();
        bail!("Could not reach: {}", missed.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging();

    let config = load_config(&args)?;
    info!("Instances directory: {}", config.instances_dir.display());

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(config).await,
        Command::List => list(&config),
        Command::Set {
            state,
            instance,
            timeout,
        } => set_state(config, &state, instance, Duration::from_secs(timeout)).await,
    }
}
