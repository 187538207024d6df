//! nmea-plotter: CLI + live ingestion server for NMEA/AIS contacts.

use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use nmea_core::config::{self, Config};
use nmea_core::contact_db::ContactDb;
use nmea_core::dispatch::Dispatcher;
use nmea_core::framer::SentenceFramer;
use nmea_core::types::{now, Contact};

mod cache;
mod error;
mod listeners;
mod maintenance;
mod pipeline;
mod sinks;
mod transport;
mod web;

use cache::SqliteCache;
use listeners::ListenerRegistry;
use maintenance::{Maintenance, MaintenanceSettings, SharedCache};
use pipeline::SentencePipeline;
use sinks::{FileRawLog, UdpRetransmitSink};
use transport::{TransportManager, TransportSettings};

#[derive(Parser)]
#[command(name = "nmea-plotter", version, about = "NMEA/AIS contact tracker")]
struct Cli {
    /// Config file (default: ~/.nmea-plotter/config.yaml)
    #[arg(long, global = true, env = "NMEA_PLOTTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the enabled transports and serve the REST API
    Run {
        /// Listen for UDP sentences on this port (enables UDP)
        #[arg(long)]
        udp_port: Option<u16>,

        /// Connect to a TCP sentence server at host:port (enables TCP)
        #[arg(long)]
        tcp: Option<String>,

        /// Read sentences from this serial device (enables serial)
        #[arg(long)]
        serial: Option<String>,

        /// Serial baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// REST API bind address
        #[arg(long, env = "NMEA_PLOTTER_HOST")]
        host: Option<String>,

        /// REST API port
        #[arg(long, env = "NMEA_PLOTTER_PORT")]
        port: Option<u16>,

        /// Don't read or write the contact cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Parse a capture file offline and print the resulting contacts
    Parse {
        /// Capture file, or "-" for stdin
        file: PathBuf,

        /// Label for the own-ship contact
        #[arg(long)]
        own_ship: Option<String>,

        /// Include contacts without a position fix
        #[arg(short, long)]
        all: bool,

        /// Print every rejected sentence to stderr
        #[arg(long)]
        errors: bool,
    },

    /// Show contacts stored in the SQLite cache
    Contacts {
        /// Cache database path (default from config)
        #[arg(long)]
        cache: Option<String>,
    },

    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::config_file);

    match cli.command {
        Commands::Run {
            udp_port,
            tcp,
            serial,
            baud,
            host,
            port,
            no_cache,
        } => {
            let mut cfg = config::load_config_from(&config_path);
            if let Some(p) = udp_port {
                cfg.udp.enabled = true;
                cfg.udp.port = p;
            }
            if let Some(addr) = tcp {
                let Some((h, p)) = addr.rsplit_once(':').and_then(|(h, p)| Some((h, p.parse::<u16>().ok()?)))
                else {
                    eprintln!("Invalid --tcp address '{addr}', expected host:port");
                    std::process::exit(2);
                };
                cfg.tcp.enabled = true;
                cfg.tcp.host = h.to_string();
                cfg.tcp.port = p;
            }
            if let Some(device) = serial {
                cfg.serial.enabled = true;
                cfg.serial.device = device;
            }
            if let Some(b) = baud {
                cfg.serial.baud = b;
            }
            if let Some(h) = host {
                cfg.dashboard.host = h;
            }
            if let Some(p) = port {
                cfg.dashboard.port = p;
            }
            cmd_run(cfg, no_cache).await;
        }
        Commands::Parse {
            file,
            own_ship,
            all,
            errors,
        } => {
            let cfg = config::load_config_from(&config_path);
            let label = own_ship.unwrap_or(cfg.tracking.own_ship_label);
            cmd_parse(file, &label, all, errors);
        }
        Commands::Contacts { cache } => {
            let cfg = config::load_config_from(&config_path);
            cmd_contacts(&cache.unwrap_or(cfg.cache.path));
        }
        Commands::InitConfig { force } => {
            if config_path.exists() && !force {
                eprintln!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
                std::process::exit(1);
            }
            if let Err(e) = config::save_config_to(&Config::default(), &config_path) {
                eprintln!("Error writing {}: {e}", config_path.display());
                std::process::exit(1);
            }
            println!("Wrote {}", config_path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(cfg: Config, no_cache: bool) {
    let db = Arc::new(ContactDb::new(cfg.tracking.track_points));

    let cache: Option<SharedCache> = if no_cache {
        None
    } else {
        match SqliteCache::open(&cfg.cache.path) {
            Ok(c) => Some(Arc::new(c)),
            Err(e) => {
                warn!(path = %cfg.cache.path, error = %e, "contact cache unavailable");
                None
            }
        }
    };
    if let Some(store) = &cache {
        match db.load_cache(store.as_ref()) {
            Ok(n) => info!(restored = n, path = %cfg.cache.path, "contact cache restored"),
            Err(e) => warn!(error = %e, "contact cache restore failed"),
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&db),
        &cfg.tracking.own_ship_label,
    ));
    let listeners = Arc::new(ListenerRegistry::new());
    listeners.register(Arc::new(|s: &str| trace!(sentence = s, "rx")));

    let mut pipeline = SentencePipeline::new(dispatcher, listeners);
    if cfg.output.retransmit && !cfg.output.peers.is_empty() {
        match UdpRetransmitSink::new(&cfg.output.peers) {
            Ok(sink) => {
                info!(peers = cfg.output.peers.len(), "retransmitting to peers");
                pipeline = pipeline.with_retransmit(Arc::new(sink));
            }
            Err(e) => warn!(error = %e, "retransmission disabled"),
        }
    }
    if cfg.output.log_raw {
        match FileRawLog::open(&cfg.output.raw_log_path) {
            Ok(log) => pipeline = pipeline.with_raw_log(Arc::new(log)),
            Err(e) => warn!(path = %cfg.output.raw_log_path, error = %e, "raw log disabled"),
        }
    }
    let pipeline = Arc::new(pipeline);

    let manager = TransportManager::new(pipeline, TransportSettings::from_config(&cfg));
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let text = serde_json::to_string(&event).unwrap_or_default();
                    info!(event = %text, "transport");
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "transport events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let housekeeping = Maintenance::start(
        Arc::clone(&db),
        cache.clone(),
        MaintenanceSettings::from_config(&cfg.tracking),
    );

    for (kind, result) in manager.connect().await {
        if let Err(e) = result {
            error!(kind = %kind, error = %e, "transport failed to start");
        }
    }
    if !manager.is_connected() {
        warn!("no transport connected");
    }

    if cfg.dashboard.enabled {
        let state = Arc::new(web::AppState::new(manager.clone()));
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        if let Err(e) = web::serve(state, &cfg.dashboard.host, cfg.dashboard.port, shutdown).await {
            error!(error = %e, "REST API stopped");
        }
    } else {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutting down");
    manager.disconnect().await;
    housekeeping.shutdown().await;
    if let Some(store) = cache {
        maintenance::save_snapshot(Arc::clone(&db), store).await;
    }
    let stats = manager.pipeline().stats();
    info!(
        contacts = db.len(),
        framed = stats.framed,
        parsed = stats.parsed,
        parse_errors = stats.parse_errors,
        "stopped"
    );
}

// ---------------------------------------------------------------------------
// parse
// ---------------------------------------------------------------------------

fn cmd_parse(file: PathBuf, own_ship: &str, all: bool, show_errors: bool) {
    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(&file).unwrap_or_else(|e| {
            eprintln!("Error opening {}: {e}", file.display());
            std::process::exit(1);
        });
        Box::new(io::BufReader::new(f))
    };

    let db = Arc::new(ContactDb::default());
    let dispatcher = Dispatcher::new(Arc::clone(&db), own_ship);
    let mut framer = SentenceFramer::new();

    let mut total = 0u64;
    let mut parsed = 0u64;
    let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();

    let mut handle = |sentence: String| {
        total += 1;
        match dispatcher.dispatch(&sentence) {
            Ok(d) => {
                parsed += 1;
                *by_kind.entry(format!("{:?}", d.kind)).or_default() += 1;
                db.sample_tracks();
            }
            Err(e) => {
                if show_errors {
                    eprintln!("{e}: {sentence}");
                }
            }
        }
    };

    for line in reader.lines() {
        let Ok(mut line) = line else {
            continue;
        };
        line.push('\n');
        for sentence in framer.push(&line) {
            handle(sentence);
        }
    }
    if let Some(tail) = framer.finish() {
        handle(tail);
    }

    println!();
    println!("Parsed: {}", file.display());
    println!("  Sentences: {total} total, {parsed} accepted");
    for (kind, n) in &by_kind {
        println!("    {kind}: {n}");
    }
    println!("  Contacts: {}", db.len());
    println!();

    let contacts: Vec<Contact> = db
        .list()
        .into_iter()
        .filter(|c| all || c.has_fix())
        .collect();
    if !contacts.is_empty() {
        let table = contact_table(&contacts, "Track", |c| {
            db.track(&c.label).map_or(0, |t| t.len()).to_string()
        });
        println!("{table}");
    }
}

// ---------------------------------------------------------------------------
// contacts
// ---------------------------------------------------------------------------

fn cmd_contacts(path: &str) {
    let cache = SqliteCache::open(path).unwrap_or_else(|e| {
        eprintln!("Error opening cache {path}: {e}");
        std::process::exit(1);
    });
    let db = ContactDb::default();
    if let Err(e) = db.load_cache(&cache) {
        eprintln!("Error reading cache {path}: {e}");
        std::process::exit(1);
    }

    let contacts = db.list();
    println!();
    println!("Cache: {path}");
    println!("  {} contacts", contacts.len());
    if contacts.is_empty() {
        return;
    }
    println!();

    let now = now();
    let table = contact_table(&contacts, "Age", |c| format_age(c.age(now)));
    println!("{table}");
}

/// One row per contact, with a caller-chosen last column.
fn contact_table(contacts: &[Contact], last: &str, last_cell: impl Fn(&Contact) -> String) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Label", "Name", "MMSI", "Lat", "Lon", "Hdg", "SOG (kts)", "Source", last,
    ]);
    for c in contacts {
        let (lat, lon) = match c.position() {
            Some((lat, lon)) => (format!("{lat:.5}"), format!("{lon:.5}")),
            None => ("-".into(), "-".into()),
        };
        table.add_row(vec![
            Cell::new(&c.label),
            Cell::new(c.name.as_deref().unwrap_or("-")),
            Cell::new(c.mmsi.map_or("-".into(), |m| m.to_string())),
            Cell::new(lat),
            Cell::new(lon),
            Cell::new(c.display_heading().map_or("-".into(), |h| format!("{h:.0}"))),
            Cell::new(c.sog_kts.map_or("-".into(), |s| format!("{s:.1}"))),
            Cell::new(c.source.as_str()),
            Cell::new(last_cell(c)),
        ]);
    }
    table
}

fn format_age(secs: f64) -> String {
    let secs = secs.max(0.0) as u64;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    }
}
