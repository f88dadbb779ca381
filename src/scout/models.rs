//! Config data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Share-link protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Shadowsocks,
    Trojan,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Vmess => write!(f, "vmess"),
            Protocol::Vless => write!(f, "vless"),
            Protocol::Shadowsocks => write!(f, "shadowsocks"),
            Protocol::Trojan => write!(f, "trojan"),
        }
    }
}

/// Health classification of a config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStatus {
    #[default]
    Untested,
    Active,
    Slow,
    Dead,
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigStatus::Untested => write!(f, "untested"),
            ConfigStatus::Active => write!(f, "active"),
            ConfigStatus::Slow => write!(f, "slow"),
            ConfigStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Protocol-specific connection parameters. One variant per family, so
/// consumers match exhaustively instead of probing a string map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProtocolParams {
    Vmess {
        uuid: String,
        alter_id: u32,
        security: String,
        network: String,
        header_type: String,
        host: String,
        path: String,
        tls: String,
        sni: String,
    },
    Vless {
        uuid: String,
        encryption: String,
        security: String,
        network: String,
        host: String,
        path: String,
        sni: String,
    },
    Shadowsocks {
        method: String,
        password: String,
    },
    Trojan {
        password: String,
        sni: String,
        network: String,
        security: String,
    },
}

impl ProtocolParams {
    pub fn protocol(&self) -> Protocol {
        match self {
            ProtocolParams::Vmess { .. } => Protocol::Vmess,
            ProtocolParams::Vless { .. } => Protocol::Vless,
            ProtocolParams::Shadowsocks { .. } => Protocol::Shadowsocks,
            ProtocolParams::Trojan { .. } => Protocol::Trojan,
        }
    }
}

/// Typed fields decoded from a single share link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub params: ProtocolParams,
}

impl ParsedLink {
    pub fn protocol(&self) -> Protocol {
        self.params.protocol()
    }
}

/// A harvested config as it lives in the catalog. Ids are dense per
/// catalog build and are not stable across builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub id: usize,
    pub name: String,
    pub server: String,
    pub port: u16,
    pub protocol: Protocol,
    pub config_url: String,
    #[serde(default)]
    pub status: ConfigStatus,
    #[serde(default)]
    pub ping: Option<f64>,
    #[serde(default)]
    pub download_speed: Option<f64>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub last_tested: Option<DateTime<Utc>>,
}

impl ProxyConfig {
    /// Build a catalog record from a decoded link and its raw URL
    pub fn from_link(id: usize, config_url: String, link: ParsedLink) -> Self {
        let protocol = link.protocol();
        Self {
            id,
            name: link.name,
            server: link.server,
            port: link.port,
            protocol,
            config_url,
            status: ConfigStatus::Untested,
            ping: None,
            download_speed: None,
            country: None,
            last_tested: None,
        }
    }

    /// Get the endpoint in HOST:PORT format
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.protocol, self.name, self.endpoint())
    }
}

/// Outcome of probing one config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub config_id: usize,
    pub status: ConfigStatus,
    pub ping: Option<f64>,
    pub response_time: Option<f64>,
    pub download_speed: Option<f64>,
    pub success_rate: f64,
    pub country: Option<String>,
    pub error_message: Option<String>,
    pub tested_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn new(config_id: usize) -> Self {
        Self {
            config_id,
            status: ConfigStatus::Untested,
            ping: None,
            response_time: None,
            download_speed: None,
            success_rate: 0.0,
            country: None,
            error_message: None,
            tested_at: Utc::now(),
        }
    }

    /// Result for a config that never answered or whose probe task died
    pub fn dead(config_id: usize, error: impl Into<String>) -> Self {
        Self {
            status: ConfigStatus::Dead,
            error_message: Some(error.into()),
            ..Self::new(config_id)
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.status, ConfigStatus::Active | ConfigStatus::Slow)
    }
}

/// Aggregate counts over a catalog generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConfigStats {
    pub total: usize,
    pub active: usize,
    pub slow: usize,
    pub dead: usize,
    pub untested: usize,
}

impl ConfigStats {
    pub fn tally(configs: &[ProxyConfig]) -> Self {
        let mut stats = Self {
            total: configs.len(),
            ..Self::default()
        };
        for config in configs {
            match config.status {
                ConfigStatus::Active => stats.active += 1,
                ConfigStatus::Slow => stats.slow += 1,
                ConfigStatus::Dead => stats.dead += 1,
                ConfigStatus::Untested => stats.untested += 1,
            }
        }
        stats
    }

    /// Share of tested configs that came back alive, as a percentage
    pub fn success_rate(&self) -> Option<f64> {
        let tested = self.active + self.slow + self.dead;
        if tested == 0 {
            return None;
        }
        Some((self.active + self.slow) as f64 / tested as f64 * 100.0)
    }
}
