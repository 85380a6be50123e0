//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `MIST_NODE_LOG_LEVEL`, `MIST_NODE_SIGNATURE` and
//! `MIST_NODE_MULTI_HOP` env overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::comms::AmAddr;
use crate::error::AppError;
use crate::logger;

/// Radio driver parameters (`[radio]`).
#[derive(Debug, Clone)]
pub struct RadioConfig {
    /// IEEE 802.15.4 channel (11–26).
    pub channel: u8,
    pub pan_id: u16,
}

/// Communication layer startup (`[comms]`).
#[derive(Debug, Clone)]
pub struct CommsConfig {
    /// Attach the mesh stack on top of the radio.
    pub multi_hop: bool,
    /// Status poll interval while waiting for the layer to start.
    pub start_poll: Duration,
    /// Upper bound on the start wait.
    pub start_timeout: Duration,
}

/// Reference loopback radio behaviour (`[loopback]`).
#[derive(Debug, Clone)]
pub struct LoopbackSettings {
    /// Simulated transceiver start latency.
    pub start_delay: Duration,
}

/// Fully-resolved node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub log_level: String,
    /// Append logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
    /// Device signature file read at boot (never written).
    pub signature_path: PathBuf,
    /// Address used when the signature is missing or invalid.
    pub default_address: AmAddr,
    pub radio: RadioConfig,
    pub comms: CommsConfig,
    pub announcement_period_s: u32,
    pub heartbeat_interval: Duration,
    pub address_cache_capacity: usize,
    pub loopback: LoopbackSettings,
}

/// Values taken from the environment that replace their TOML counterparts.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub signature_path: Option<String>,
    pub multi_hop: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("MIST_NODE_LOG_LEVEL").ok(),
            signature_path: env::var("MIST_NODE_SIGNATURE").ok(),
            multi_hop: env::var("MIST_NODE_MULTI_HOP").ok(),
        }
    }
}

/// Raw TOML shape, resolved into [`Config`].
#[derive(Deserialize)]
struct RawConfig {
    node: RawNode,
    #[serde(default)]
    radio: RawRadio,
    #[serde(default)]
    comms: RawComms,
    #[serde(default)]
    announcement: RawAnnouncement,
    #[serde(default)]
    heartbeat: RawHeartbeat,
    #[serde(default)]
    addrdisco: RawAddrDisco,
    #[serde(default)]
    loopback: RawLoopback,
}

#[derive(Deserialize)]
struct RawNode {
    name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default = "default_signature_path")]
    signature: String,
    #[serde(default = "default_address")]
    default_address: AmAddr,
}

#[derive(Deserialize)]
struct RawRadio {
    #[serde(default = "default_channel")]
    channel: u8,
    #[serde(default = "default_pan_id")]
    pan_id: u16,
}

#[derive(Deserialize)]
struct RawComms {
    /// Defaults to `false`: the mesh stack must be explicitly enabled.
    #[serde(default)]
    multi_hop: bool,
    #[serde(default = "default_start_poll_ms")]
    start_poll_ms: u64,
    #[serde(default = "default_start_timeout_ms")]
    start_timeout_ms: u64,
}

#[derive(Deserialize)]
struct RawAnnouncement {
    #[serde(default = "default_announcement_period_s")]
    period_s: u32,
}

#[derive(Deserialize)]
struct RawHeartbeat {
    #[serde(default = "default_heartbeat_interval_s")]
    interval_s: u64,
}

#[derive(Deserialize)]
struct RawAddrDisco {
    #[serde(default = "default_cache_capacity")]
    cache_capacity: usize,
}

#[derive(Deserialize, Default)]
struct RawLoopback {
    #[serde(default)]
    start_delay_ms: u64,
}

impl Default for RawRadio {
    fn default() -> Self {
        Self { channel: default_channel(), pan_id: default_pan_id() }
    }
}

impl Default for RawComms {
    fn default() -> Self {
        Self {
            multi_hop: false,
            start_poll_ms: default_start_poll_ms(),
            start_timeout_ms: default_start_timeout_ms(),
        }
    }
}

impl Default for RawAnnouncement {
    fn default() -> Self {
        Self { period_s: default_announcement_period_s() }
    }
}

impl Default for RawHeartbeat {
    fn default() -> Self {
        Self { interval_s: default_heartbeat_interval_s() }
    }
}

impl Default for RawAddrDisco {
    fn default() -> Self {
        Self { cache_capacity: default_cache_capacity() }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_signature_path() -> String { "config/signature.toml".to_string() }
fn default_address() -> AmAddr { crate::identity::DEFAULT_AM_ADDR }
fn default_channel() -> u8 { 11 }
fn default_pan_id() -> u16 { 0x22 }
fn default_start_poll_ms() -> u64 { 1 }
fn default_start_timeout_ms() -> u64 { 10_000 }
fn default_announcement_period_s() -> u32 { crate::announcement::DEFAULT_ANNOUNCEMENT_PERIOD_S }
fn default_heartbeat_interval_s() -> u64 { 60 }
fn default_cache_capacity() -> usize { 32 }

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    load_from(Path::new("config/default.toml"), &Overrides::from_env())
}

/// Load from an explicit path with the given overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let n = parsed.node;

    let log_level = overrides.log_level.clone().unwrap_or(n.log_level);
    // Only plain levels are validated; full EnvFilter directives pass through.
    if !log_level.contains(['=', ',']) {
        logger::parse_level(&log_level).map_err(|e| AppError::Config(e.to_string()))?;
    }

    let signature_path = PathBuf::from(overrides.signature_path.as_deref().unwrap_or(&n.signature));

    let multi_hop = match overrides.multi_hop.as_deref() {
        Some(v) => parse_bool(v)
            .ok_or_else(|| AppError::Config(format!("MIST_NODE_MULTI_HOP: not a boolean: '{v}'")))?,
        None => parsed.comms.multi_hop,
    };

    if !(11..=26).contains(&parsed.radio.channel) {
        return Err(AppError::Config(format!(
            "radio channel {} out of range 11..=26",
            parsed.radio.channel
        )));
    }
    if parsed.comms.start_poll_ms == 0 {
        return Err(AppError::Config("comms.start_poll_ms must be > 0".into()));
    }
    if parsed.heartbeat.interval_s == 0 {
        return Err(AppError::Config("heartbeat.interval_s must be > 0".into()));
    }

    Ok(Config {
        node_name: n.name,
        log_level,
        log_file: n.log_file.map(PathBuf::from),
        signature_path,
        default_address: n.default_address,
        radio: RadioConfig {
            channel: parsed.radio.channel,
            pan_id: parsed.radio.pan_id,
        },
        comms: CommsConfig {
            multi_hop,
            start_poll: Duration::from_millis(parsed.comms.start_poll_ms),
            start_timeout: Duration::from_millis(parsed.comms.start_timeout_ms),
        },
        announcement_period_s: parsed.announcement.period_s,
        heartbeat_interval: Duration::from_secs(parsed.heartbeat.interval_s),
        address_cache_capacity: parsed.addrdisco.cache_capacity,
        loopback: LoopbackSettings {
            start_delay: Duration::from_millis(parsed.loopback.start_delay_ms),
        },
    })
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[node]
name = "test-node"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.node_name, "test-node");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.default_address, 0x0001);
        assert_eq!(cfg.radio.channel, 11);
        assert_eq!(cfg.radio.pan_id, 0x22);
        assert!(!cfg.comms.multi_hop);
        assert_eq!(cfg.comms.start_poll, Duration::from_millis(1));
        assert_eq!(cfg.announcement_period_s, 300);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(cfg.address_cache_capacity, 32);
    }

    #[test]
    fn full_config_parses() {
        let f = write_toml(
            r#"
[node]
name = "gw"
log_level = "debug"
signature = "/tmp/sig.toml"
default_address = 0x00AB

[radio]
channel = 26
pan_id = 0x1234

[comms]
multi_hop = true
start_poll_ms = 5
start_timeout_ms = 250

[announcement]
period_s = 30

[heartbeat]
interval_s = 10
"#,
        );
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.default_address, 0x00AB);
        assert_eq!(cfg.radio.channel, 26);
        assert_eq!(cfg.radio.pan_id, 0x1234);
        assert!(cfg.comms.multi_hop);
        assert_eq!(cfg.comms.start_timeout, Duration::from_millis(250));
        assert_eq!(cfg.announcement_period_s, 30);
        assert_eq!(cfg.signature_path, PathBuf::from("/tmp/sig.toml"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn out_of_range_channel_errors() {
        let f = write_toml("[node]\nname = \"n\"\n[radio]\nchannel = 5\n");
        let msg = load_from(f.path(), &Overrides::default()).unwrap_err().to_string();
        assert!(msg.contains("channel"));
    }

    #[test]
    fn unknown_log_level_errors() {
        let f = write_toml("[node]\nname = \"n\"\nlog_level = \"loud\"\n");
        assert!(load_from(f.path(), &Overrides::default()).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            log_level: Some("debug".into()),
            signature_path: Some("/data/sig.toml".into()),
            multi_hop: Some("yes".into()),
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.signature_path, PathBuf::from("/data/sig.toml"));
        assert!(cfg.comms.multi_hop);
    }

    #[test]
    fn bad_multi_hop_override_errors() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides { multi_hop: Some("maybe".into()), ..Default::default() };
        assert!(load_from(f.path(), &overrides).is_err());
    }
}
