use crate::cli::StartOptions;
use crate::config::{ConfigError, DnsConfigError, FileError};
use crate::dispatch::{Mode, Segmentation, Strategy, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DNS_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DnsTransportKind {
    #[default]
    Udp,
    Tcp,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields, default)]
pub struct RawRootCfg {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub connect_timeout: Option<f64>,
    pub idle_timeout: Option<f64>,
    pub max_connections: Option<usize>,
    pub log_level: Option<String>,
    pub access_log: Option<bool>,
    pub dns: RawDnsCfg,
    pub segmentation: RawSegmentationCfg,
    pub rules: Vec<String>,
    pub rules_files: Vec<PathBuf>,
    pub allow_domains: Vec<String>,
    pub deny_domains: Vec<String>,
    pub deny_private: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields, default)]
pub struct RawDnsCfg {
    pub cache_size: Option<usize>,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<DnsTransportKind>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields, default)]
pub struct RawSegmentationCfg {
    pub mode: Option<String>,
    pub strategy: Option<String>,
    pub chunk: Option<usize>,
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub delay_ms: Option<u64>,
}

impl RawRootCfg {
    pub fn from_file(path: &Path) -> Result<Self, FileError> {
        let name = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| FileError::Io(name.clone(), e))?;
        serde_yaml::from_str(&content).map_err(|e| FileError::Serde(name, e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsSettings {
    pub cache_size: usize,
    /// `None` selects the system resolver.
    pub server: Option<SocketAddr>,
    pub transport: DnsTransportKind,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub listen_host: String,
    pub listen_port: u16,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_connections: usize,
    pub log_level: String,
    pub access_log: bool,
    pub dns: DnsSettings,
    pub default_segmentation: Segmentation,
    pub rules_files: Vec<PathBuf>,
    pub inline_rules: Vec<String>,
    pub allow_domains: Vec<String>,
    pub deny_domains: Vec<String>,
    pub deny_private: bool,
}

impl ProxySettings {
    pub fn load(opts: &StartOptions) -> Result<Self, ConfigError> {
        let raw = match &opts.config {
            Some(path) => RawRootCfg::from_file(path)?,
            None => RawRootCfg::default(),
        };
        Self::merge(opts, raw)
    }

    /// Command line over file over defaults. List settings are concatenated, file entries first.
    pub fn merge(opts: &StartOptions, raw: RawRootCfg) -> Result<Self, ConfigError> {
        let connect_timeout = seconds(
            "connect timeout",
            opts.connect_timeout.or(raw.connect_timeout).unwrap_or(10.0),
        )?;
        let idle_timeout = seconds(
            "idle timeout",
            opts.idle_timeout.or(raw.idle_timeout).unwrap_or(60.0),
        )?;
        let max_connections = opts.max_connections.or(raw.max_connections).unwrap_or(200);
        if max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max connections must be positive".to_string(),
            ));
        }

        let dns = Self::dns_settings(opts, &raw.dns)?;
        let default_segmentation = Self::default_segmentation(opts, &raw.segmentation)?;

        let concat = |file: &[String], cli: &[String]| -> Vec<String> {
            file.iter().chain(cli.iter()).cloned().collect()
        };

        Ok(Self {
            listen_host: opts
                .listen_host
                .clone()
                .or(raw.listen_host)
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            listen_port: opts.listen_port.or(raw.listen_port).unwrap_or(8080),
            connect_timeout,
            idle_timeout,
            max_connections,
            log_level: opts
                .log_level
                .clone()
                .or(raw.log_level)
                .unwrap_or_else(|| "info".to_string())
                .to_ascii_lowercase(),
            access_log: opts.access_log || raw.access_log.unwrap_or(false),
            dns,
            default_segmentation,
            rules_files: raw
                .rules_files
                .iter()
                .chain(opts.rules_files.iter())
                .cloned()
                .collect(),
            inline_rules: concat(&raw.rules, &opts.segment_rules),
            allow_domains: concat(&raw.allow_domains, &opts.allow_domains),
            deny_domains: concat(&raw.deny_domains, &opts.deny_domains),
            deny_private: opts.deny_private || raw.deny_private.unwrap_or(false),
        })
    }

    fn dns_settings(opts: &StartOptions, raw: &RawDnsCfg) -> Result<DnsSettings, ConfigError> {
        let server = opts.dns_server.clone().or_else(|| raw.server.clone());
        let port = opts.dns_port.or(raw.port);
        let transport = opts.dns_transport.or(raw.transport);
        let server = match server {
            None => {
                if port.is_some() {
                    return Err(DnsConfigError::PortWithoutServer.into());
                }
                if transport.is_some() {
                    return Err(DnsConfigError::TransportWithoutServer.into());
                }
                None
            }
            Some(server) => {
                let port = port.unwrap_or(53);
                if port == 0 {
                    return Err(DnsConfigError::InvalidPort.into());
                }
                let literal = server.trim().trim_start_matches('[').trim_end_matches(']');
                let ip = IpAddr::from_str(literal)
                    .map_err(|_| DnsConfigError::InvalidServer(server.clone()))?;
                Some(SocketAddr::new(ip, port))
            }
        };
        Ok(DnsSettings {
            cache_size: opts.dns_cache_size.or(raw.cache_size).unwrap_or(0),
            server,
            transport: transport.unwrap_or_default(),
            timeout: DNS_TIMEOUT,
        })
    }

    fn default_segmentation(
        opts: &StartOptions,
        raw: &RawSegmentationCfg,
    ) -> Result<Segmentation, ConfigError> {
        let mode = match opts.segmentation.as_ref().or(raw.mode.as_ref()) {
            Some(m) => Mode::from_str(m.trim()).map_err(ConfigError::Invalid)?,
            None => Mode::Direct,
        };
        let chunk = opts.segment_chunk_size.or(raw.chunk);
        let min = opts.segment_min.or(raw.min);
        let max = opts.segment_max.or(raw.max);
        let invalid = |msg: &str| ConfigError::Invalid(msg.to_string());
        let strategy = match opts
            .segment_strategy
            .as_deref()
            .or(raw.strategy.as_deref())
            .unwrap_or("none")
        {
            "none" => Strategy::None,
            "fixed" => match chunk.unwrap_or(DEFAULT_CHUNK_SIZE) {
                0 => return Err(invalid("segment chunk size must be positive")),
                chunk => Strategy::Fixed { chunk },
            },
            "random" => match (min, max) {
                (Some(min), Some(max)) if min > 0 && max > 0 && min <= max => {
                    Strategy::Random { min, max }
                }
                _ => {
                    return Err(invalid(
                        "random segmentation requires positive --segment-min <= --segment-max",
                    ))
                }
            },
            other => return Err(ConfigError::Invalid(format!("unknown strategy '{}'", other))),
        };
        Ok(Segmentation {
            mode,
            strategy,
            delay: Duration::from_millis(opts.segment_delay_ms.or(raw.delay_ms).unwrap_or(0)),
        })
    }
}

/// Upper bound for timeouts given in seconds (one week).
const MAX_TIMEOUT_SECS: f64 = 7.0 * 24.0 * 3600.0;

fn seconds(name: &str, value: f64) -> Result<Duration, ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        Err(ConfigError::Invalid(format!("{} must be positive", name)))
    } else if value > MAX_TIMEOUT_SECS {
        Err(ConfigError::Invalid(format!(
            "{} must be at most {} seconds",
            name, MAX_TIMEOUT_SECS
        )))
    } else {
        Ok(Duration::from_secs_f64(value))
    }
}
