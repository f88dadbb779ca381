//! In-memory catalog of harvested configs
//!
//! One build and test cycle runs at a time. Ids are dense, zero based,
//! minted only while building a generation, and not stable across
//! generations.

use crate::scout::crawler::CrawlResult;
use crate::scout::models::{CheckResult, ConfigStats, ProxyConfig};
use crate::scout::parser::LinkParser;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Decode crawl output into catalog records, in source order. Links that
/// fail to decode are dropped without consuming an id.
pub fn build_configs(results: &[CrawlResult]) -> Vec<ProxyConfig> {
    let mut configs = Vec::new();
    for result in results {
        let before = configs.len();
        for link in &result.links {
            let link = link.trim();
            if link.is_empty() {
                continue;
            }
            if let Some(parsed) = LinkParser::parse(link) {
                configs.push(ProxyConfig::from_link(configs.len(), link.to_string(), parsed));
            }
        }
        debug!(
            source = %result.source,
            candidates = result.links.len(),
            decoded = configs.len() - before,
            "decoded source links"
        );
    }
    configs
}

/// Shared handle over the current catalog generation
#[derive(Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<Vec<ProxyConfig>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly built generation, discarding the old one
    pub async fn replace_all(&self, configs: Vec<ProxyConfig>) {
        *self.inner.write().await = configs;
    }

    /// Clone of the full catalog
    pub async fn snapshot(&self) -> Vec<ProxyConfig> {
        self.inner.read().await.clone()
    }

    /// Look up one config by id
    pub async fn get(&self, id: usize) -> Option<ProxyConfig> {
        self.inner
            .read()
            .await
            .iter()
            .find(|config| config.id == id)
            .cloned()
    }

    /// The first `limit` configs of the current generation
    pub async fn first(&self, limit: usize) -> Vec<ProxyConfig> {
        self.inner
            .read()
            .await
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Fold a probe outcome back into its config. Matching is by id, so a
    /// result raced against a rebuild quietly becomes a no-op.
    pub async fn apply_result(&self, result: &CheckResult) -> bool {
        let mut configs = self.inner.write().await;
        match configs
            .iter_mut()
            .find(|config| config.id == result.config_id)
        {
            Some(config) => {
                config.status = result.status;
                config.ping = result.ping;
                config.download_speed = result.download_speed;
                if result.country.is_some() {
                    config.country = result.country.clone();
                }
                config.last_tested = Some(result.tested_at);
                true
            }
            None => false,
        }
    }

    /// Aggregate counts over the current generation
    pub async fn stats(&self) -> ConfigStats {
        ConfigStats::tally(&self.inner.read().await)
    }
}
