//! Configuration file management for nmea-plotter.
//!
//! Reads/writes `~/.nmea-plotter/config.yaml` with transport settings,
//! tracking parameters, output sinks, cache path, and dashboard address.

use std::path::{Path, PathBuf};

use crate::types::NmeaError;

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub serial: SerialConfig,
    pub udp: UdpConfig,
    pub tcp: TcpConfig,
    pub tracking: TrackingConfig,
    pub output: OutputConfig,
    pub cache: CacheConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Parity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Some(Parity::None),
            "odd" | "o" => Some(Parity::Odd),
            "even" | "e" => Some(Parity::Even),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    pub enabled: bool,
    pub device: String,
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Seconds before reopening after a read failure; 0 = never.
    pub reconnect_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UdpConfig {
    pub enabled: bool,
    pub port: u16,
    pub recv_timeout_ms: u64,
    pub reconnect_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TcpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub reconnect_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub max_age_secs: u64,
    pub track_points: usize,
    pub own_ship_label: String,
    pub track_interval_secs: u64,
    pub purge_interval_secs: u64,
    pub cache_interval_secs: u64,
}

/// A control-station peer that receives retransmitted sentences.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub name: String,
    pub addr: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub retransmit: bool,
    pub log_raw: bool,
    pub raw_log_path: String,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            serial: SerialConfig {
                enabled: false,
                device: "/dev/ttyUSB0".into(),
                baud: 38400,
                data_bits: 8,
                stop_bits: 1,
                parity: Parity::None,
                reconnect_secs: 0,
            },
            udp: UdpConfig {
                enabled: true,
                port: 7878,
                recv_timeout_ms: 1000,
                reconnect_secs: 0,
            },
            tcp: TcpConfig {
                enabled: false,
                host: "127.0.0.1".into(),
                port: 13000,
                reconnect_secs: 5,
            },
            tracking: TrackingConfig {
                max_age_secs: 600,
                track_points: 100,
                own_ship_label: "own-ship".into(),
                track_interval_secs: 5,
                purge_interval_secs: 60,
                cache_interval_secs: 120,
            },
            output: OutputConfig {
                retransmit: true,
                log_raw: true,
                raw_log_path: "data/nmea-raw.log".into(),
                peers: Vec::new(),
            },
            cache: CacheConfig {
                path: "data/contacts.db".into(),
            },
            dashboard: DashboardConfig {
                enabled: true,
                host: "127.0.0.1".into(),
                port: 8080,
            },
        }
    }
}

/// Get the config directory path (`~/.nmea-plotter/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".nmea-plotter")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.nmea-plotter/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    load_config_from(&config_file())
}

pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(_) => Config::default(),
    }
}

/// Save config to `~/.nmea-plotter/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, NmeaError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), NmeaError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| NmeaError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| NmeaError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys and unparsable values
/// keep their defaults.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');
        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }
        let Some(section) = current_section.as_deref() else {
            continue;
        };

        match section {
            "serial" => {
                let s = &mut config.serial;
                match key {
                    "enabled" => set(&mut s.enabled, parse_bool_value(val)),
                    "device" => set(&mut s.device, parse_string_value(val)),
                    "baud" => set(&mut s.baud, val.parse().ok()),
                    "data_bits" => set(&mut s.data_bits, val.parse().ok()),
                    "stop_bits" => set(&mut s.stop_bits, val.parse().ok()),
                    "parity" => set(
                        &mut s.parity,
                        parse_string_value(val).and_then(|v| Parity::parse(&v)),
                    ),
                    "reconnect_secs" => set(&mut s.reconnect_secs, val.parse().ok()),
                    _ => {}
                }
            }
            "udp" => {
                let u = &mut config.udp;
                match key {
                    "enabled" => set(&mut u.enabled, parse_bool_value(val)),
                    "port" => set(&mut u.port, val.parse().ok()),
                    "recv_timeout_ms" => set(&mut u.recv_timeout_ms, val.parse().ok()),
                    "reconnect_secs" => set(&mut u.reconnect_secs, val.parse().ok()),
                    _ => {}
                }
            }
            "tcp" => {
                let t = &mut config.tcp;
                match key {
                    "enabled" => set(&mut t.enabled, parse_bool_value(val)),
                    "host" => set(&mut t.host, parse_string_value(val)),
                    "port" => set(&mut t.port, val.parse().ok()),
                    "reconnect_secs" => set(&mut t.reconnect_secs, val.parse().ok()),
                    _ => {}
                }
            }
            "tracking" => {
                let t = &mut config.tracking;
                match key {
                    "max_age_secs" => set(&mut t.max_age_secs, val.parse().ok()),
                    "track_points" => set(&mut t.track_points, val.parse().ok()),
                    "own_ship_label" => set(&mut t.own_ship_label, parse_string_value(val)),
                    "track_interval_secs" => set(&mut t.track_interval_secs, val.parse().ok()),
                    "purge_interval_secs" => set(&mut t.purge_interval_secs, val.parse().ok()),
                    "cache_interval_secs" => set(&mut t.cache_interval_secs, val.parse().ok()),
                    _ => {}
                }
            }
            "output" => {
                let o = &mut config.output;
                match key {
                    "retransmit" => set(&mut o.retransmit, parse_bool_value(val)),
                    "log_raw" => set(&mut o.log_raw, parse_bool_value(val)),
                    "raw_log_path" => set(&mut o.raw_log_path, parse_string_value(val)),
                    "peers" => o.peers = parse_peers(&parse_string_value(val).unwrap_or_default()),
                    _ => {}
                }
            }
            "cache" => {
                if key == "path" {
                    set(&mut config.cache.path, parse_string_value(val));
                }
            }
            "dashboard" => {
                let d = &mut config.dashboard;
                match key {
                    "enabled" => set(&mut d.enabled, parse_bool_value(val)),
                    "host" => set(&mut d.host, parse_string_value(val)),
                    "port" => set(&mut d.port, val.parse().ok()),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    config
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_bool_value(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `name=host:port, name=host:port`. Malformed entries are skipped.
pub fn parse_peers(text: &str) -> Vec<Peer> {
    text.split(',')
        .filter_map(|entry| {
            let (name, addr) = entry.trim().split_once('=')?;
            let (name, addr) = (name.trim(), addr.trim());
            if name.is_empty() || !addr.contains(':') {
                return None;
            }
            Some(Peer {
                name: name.to_string(),
                addr: addr.to_string(),
            })
        })
        .collect()
}

fn format_peers(peers: &[Peer]) -> String {
    peers
        .iter()
        .map(|p| format!("{}={}", p.name, p.addr))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# nmea-plotter configuration".to_string(), String::new()];

    let s = &config.serial;
    lines.push("serial:".into());
    lines.push(format!("  enabled: {}", s.enabled));
    lines.push(format!("  device: \"{}\"", s.device));
    lines.push(format!("  baud: {}", s.baud));
    lines.push(format!("  data_bits: {}", s.data_bits));
    lines.push(format!("  stop_bits: {}", s.stop_bits));
    lines.push(format!("  parity: {}", s.parity.as_str()));
    lines.push(format!("  reconnect_secs: {}", s.reconnect_secs));
    lines.push(String::new());

    let u = &config.udp;
    lines.push("udp:".into());
    lines.push(format!("  enabled: {}", u.enabled));
    lines.push(format!("  port: {}", u.port));
    lines.push(format!("  recv_timeout_ms: {}", u.recv_timeout_ms));
    lines.push(format!("  reconnect_secs: {}", u.reconnect_secs));
    lines.push(String::new());

    let t = &config.tcp;
    lines.push("tcp:".into());
    lines.push(format!("  enabled: {}", t.enabled));
    lines.push(format!("  host: \"{}\"", t.host));
    lines.push(format!("  port: {}", t.port));
    lines.push(format!("  reconnect_secs: {}", t.reconnect_secs));
    lines.push(String::new());

    let tr = &config.tracking;
    lines.push("tracking:".into());
    lines.push(format!("  max_age_secs: {}", tr.max_age_secs));
    lines.push(format!("  track_points: {}", tr.track_points));
    lines.push(format!("  own_ship_label: \"{}\"", tr.own_ship_label));
    lines.push(format!("  track_interval_secs: {}", tr.track_interval_secs));
    lines.push(format!("  purge_interval_secs: {}", tr.purge_interval_secs));
    lines.push(format!("  cache_interval_secs: {}", tr.cache_interval_secs));
    lines.push(String::new());

    let o = &config.output;
    lines.push("output:".into());
    lines.push(format!("  retransmit: {}", o.retransmit));
    lines.push(format!("  log_raw: {}", o.log_raw));
    lines.push(format!("  raw_log_path: \"{}\"", o.raw_log_path));
    lines.push(format!("  peers: \"{}\"", format_peers(&o.peers)));
    lines.push(String::new());

    lines.push("cache:".into());
    lines.push(format!("  path: \"{}\"", config.cache.path));
    lines.push(String::new());

    let d = &config.dashboard;
    lines.push("dashboard:".into());
    lines.push(format!("  enabled: {}", d.enabled));
    lines.push(format!("  host: \"{}\"", d.host));
    lines.push(format!("  port: {}", d.port));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
