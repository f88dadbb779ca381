//! Scout module for harvesting and probing share configs
//!
//! This module provides functionality for:
//! - Crawling subscription feeds to extract share links
//! - Parsing vmess, vless, shadowsocks and trojan links into typed configs
//! - Probing config health with bounded concurrency
//! - Fanning out live progress events to observers

pub mod checker;
pub mod crawler;
pub mod events;
pub mod geo;
pub mod models;
pub mod parser;
pub mod service;
pub mod store;

pub use checker::{CheckerConfig, ConfigChecker};
pub use crawler::{ConfigCrawler, CrawlResult, CrawlerConfig, Source, SourceFormat};
pub use events::{EventBus, ProgressEvent, ResultSummary, Subscription};
pub use geo::GeoResolver;
pub use models::{
    CheckResult, ConfigStats, ConfigStatus, ParsedLink, Protocol, ProtocolParams, ProxyConfig,
};
pub use parser::LinkParser;
pub use service::{ConfigScout, DEFAULT_TEST_LIMIT};
pub use store::{build_configs, ConfigStore};
