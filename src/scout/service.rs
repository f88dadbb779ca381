//! Orchestration of fetch and test cycles
//!
//! `ConfigScout` owns the store, crawler, checker and event bus, and
//! drives the two lifecycles every frontend shares: rebuild the catalog
//! from the subscription sources, and probe part or all of it. Each
//! lifecycle step is broadcast on the bus.

use crate::scout::checker::ConfigChecker;
use crate::scout::crawler::{ConfigCrawler, Source};
use crate::scout::events::{EventBus, ProgressEvent, ResultSummary};
use crate::scout::models::{CheckResult, ConfigStats, ProxyConfig};
use crate::scout::store::{build_configs, ConfigStore};
use crate::Result;
use anyhow::{anyhow, bail};
use tracing::info;

/// Default cap on how many configs a full test run probes
pub const DEFAULT_TEST_LIMIT: usize = 20;

/// Shared application service for fetching and testing configs
pub struct ConfigScout {
    store: ConfigStore,
    crawler: ConfigCrawler,
    checker: ConfigChecker,
    bus: EventBus,
    sources: Vec<Source>,
}

impl ConfigScout {
    pub fn new(crawler: ConfigCrawler, checker: ConfigChecker, bus: EventBus) -> Self {
        Self {
            store: ConfigStore::new(),
            crawler,
            checker,
            bus,
            sources: ConfigCrawler::default_sources(),
        }
    }

    /// Replace the default subscription sources
    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Fetch every configured source (or just the named one), decode the
    /// links and swap in a fresh catalog generation
    pub async fn refresh(&self, source: Option<&str>) -> Result<Vec<ProxyConfig>> {
        let label = source.unwrap_or("all");
        self.bus.broadcast(&ProgressEvent::FetchStarted {
            source: label.to_string(),
        });

        let selected: Vec<Source> = match source {
            None => self.sources.clone(),
            Some(name) => {
                let found: Vec<Source> = self
                    .sources
                    .iter()
                    .filter(|candidate| candidate.name == name)
                    .cloned()
                    .collect();
                if found.is_empty() {
                    let error = format!("unknown source: {name}");
                    self.bus.broadcast(&ProgressEvent::FetchError {
                        error: error.clone(),
                    });
                    bail!(error);
                }
                found
            }
        };

        let results = self.crawler.fetch_all(&selected).await;
        let configs = build_configs(&results);
        info!(configs = configs.len(), source = label, "catalog rebuilt");

        self.store.replace_all(configs.clone()).await;
        self.bus.broadcast(&ProgressEvent::FetchCompleted {
            configs_count: configs.len(),
        });
        Ok(configs)
    }

    /// Probe the first `limit` configs of the current generation and fold
    /// the outcomes back into the catalog
    pub async fn test_all(&self, limit: Option<usize>) -> Result<(Vec<CheckResult>, ConfigStats)> {
        if self.store.is_empty().await {
            let error = "no configs available to test".to_string();
            self.bus.broadcast(&ProgressEvent::TestError {
                error: error.clone(),
            });
            bail!(error);
        }

        let batch = self.store.first(limit.unwrap_or(DEFAULT_TEST_LIMIT)).await;
        self.bus.broadcast(&ProgressEvent::TestStarted {
            configs_count: batch.len(),
        });

        let bus = self.bus.clone();
        let results = self
            .checker
            .check_batch(batch, move |config_id, message| {
                bus.broadcast(&ProgressEvent::TestProgress {
                    config_id,
                    message: message.to_string(),
                });
            })
            .await;

        for result in &results {
            self.store.apply_result(result).await;
        }
        let stats = self.store.stats().await;
        self.bus.broadcast(&ProgressEvent::TestCompleted { stats });
        info!(
            tested = results.len(),
            active = stats.active,
            slow = stats.slow,
            dead = stats.dead,
            "test cycle finished"
        );
        Ok((results, stats))
    }

    /// Probe a single config by id
    pub async fn test_one(&self, config_id: usize) -> Result<CheckResult> {
        let config = self
            .store
            .get(config_id)
            .await
            .ok_or_else(|| anyhow!("config {config_id} not found"))?;

        let bus = self.bus.clone();
        let progress = move |config_id: usize, message: &str| {
            bus.broadcast(&ProgressEvent::SingleTestProgress {
                config_id,
                message: message.to_string(),
            });
        };
        let result = self.checker.check_config(&config, &progress).await;

        self.store.apply_result(&result).await;
        self.bus.broadcast(&ProgressEvent::SingleTestCompleted {
            config_id,
            result: ResultSummary::from(&result),
        });
        Ok(result)
    }

    pub async fn stats(&self) -> ConfigStats {
        self.store.stats().await
    }

    pub async fn configs(&self) -> Vec<ProxyConfig> {
        self.store.snapshot().await
    }
}
