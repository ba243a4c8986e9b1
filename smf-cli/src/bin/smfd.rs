//! smfd - Simplified Multicast Forwarding daemon
//!
//! Loads a TOML configuration, builds the interface/group topology and
//! relays multicast frames between the configured interfaces.
//!
//! Examples:
//!   smfd --example > smf.toml
//!   smfd --config smf.toml --stats 5
//!   smfd --config smf.toml --duration 60 --save snapshot.toml

use clap::Parser;
use smf::io::UdpTransportFactory;
use smf::{Engine, LinkInfo};
use smf_cli::stats::{display_adapter_stats, format_engine_stats};
use smf_cli::Config;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Interval between link table rescans
const RESCAN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "smfd")]
#[command(about = "Simplified multicast forwarding daemon", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Multicast group and port the device transports join
    #[arg(long, default_value = "224.0.0.251:6698")]
    group: SocketAddrV4,

    /// Statistics interval in seconds (0 disables)
    #[arg(long, default_value = "10")]
    stats: u64,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Save the running configuration here on exit
    #[arg(long)]
    save: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    example: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.example {
        print!("{}", toml::to_string_pretty(&Config::example())?);
        return Ok(());
    }

    // Initialize logging; RUST_LOG takes precedence
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(path) = &args.config else {
        anyhow::bail!("A configuration file is required (use --config)");
    };
    let config = Config::from_file(path)?;
    tracing::info!(config = %path.display(), group = %args.group, "smfd starting");

    let factory = UdpTransportFactory::new(args.group);
    let mut engine = Engine::new(config.engine.engine_config(), Box::new(factory));
    let links = engine.refresh_links()?;
    tracing::info!(links, "link table loaded");

    config.apply(&mut engine, Instant::now())?;

    run(&mut engine, &args);

    if let Some(save) = &args.save {
        Config::capture(&engine).to_file(save)?;
        tracing::info!(path = %save.display(), "configuration saved");
    }
    Ok(())
}

/// Drive the engine, rescanning links and printing statistics
fn run(engine: &mut Engine, args: &Args) {
    let started = Instant::now();
    let deadline = args.duration.map(|secs| started + Duration::from_secs(secs));
    let stats_interval = Duration::from_secs(args.stats);
    let mut next_stats = started + stats_interval;
    let mut next_scan = started + RESCAN_INTERVAL;
    let shutdown = AtomicBool::new(false);

    engine.run(&shutdown, |engine, now| {
        if deadline.map_or(false, |d| now >= d) {
            shutdown.store(true, Ordering::Relaxed);
            return;
        }

        if now >= next_scan {
            rescan_links(engine);
            next_scan = now + RESCAN_INTERVAL;
        }

        if args.stats > 0 && now >= next_stats {
            display_adapter_stats(&engine.adapter_stats(), now - started);
            println!("{}", format_engine_stats(&engine.stats()));
            next_stats = now + stats_interval;
        }
    });
}

/// Report links that appeared or went down since the last scan
fn rescan_links(engine: &mut Engine) {
    let before: Vec<LinkInfo> = engine.links();
    let after = match smf::io::link::scan() {
        Ok(links) => links,
        Err(e) => {
            tracing::warn!(error = %e, "link scan failed");
            return;
        }
    };

    for link in &after {
        let was_up = before.iter().any(|b| b.name == link.name && b.up);
        if link.up && !was_up {
            engine.on_link_up(LinkInfo::new(link.name.clone(), link.index, true));
        }
    }
    for link in before.iter().filter(|b| b.up) {
        let still_up = after.iter().any(|a| a.name == link.name && a.up);
        if !still_up {
            engine.on_link_down(&link.name);
        }
    }
}
