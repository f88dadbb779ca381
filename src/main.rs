use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use config_scout::{
    report::generate_report,
    scout::{
        CheckerConfig, ConfigChecker, ConfigCrawler, ConfigScout, CrawlerConfig, EventBus,
        ProxyConfig, DEFAULT_TEST_LIMIT,
    },
    snapshot::write_snapshot,
    tui::DashboardApp,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A share-config harvester and health checker with live progress
#[derive(Parser)]
#[command(name = "config-scout")]
#[command(about = "Harvest V2Ray share configs and probe their health")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch subscription sources and write the decoded catalog
    Fetch {
        /// Fetch only the named source instead of every configured one
        #[arg(short, long)]
        source: Option<String>,
        /// Output file for the catalog document
        #[arg(short, long, default_value = "data/configs.json")]
        output: PathBuf,
        /// Timeout in seconds for each source fetch
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Probe configs and write the test result document
    Test {
        /// Catalog document written by a previous fetch; fetched fresh when absent
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output file for the test result document
        #[arg(short, long, default_value = "data/test_results.json")]
        output: PathBuf,
        /// How many configs to probe
        #[arg(short, long, default_value_t = DEFAULT_TEST_LIMIT)]
        limit: usize,
        /// Probe a single config by id instead of a batch
        #[arg(long)]
        id: Option<usize>,
        /// Number of concurrent probes
        #[arg(short = 'n', long, default_value = "5")]
        concurrency: usize,
        /// Timeout in seconds for the reachability stages
        #[arg(long, default_value = "5")]
        timeout: u64,
        /// Path to a MaxMind MMDB file for country lookup
        #[arg(long)]
        mmdb: Option<String>,
        /// Also sample download speed for live configs
        #[arg(long)]
        speed: bool,
    },
    /// Render a Markdown report from fetch and test documents
    Report {
        /// Catalog document written by fetch
        #[arg(long, default_value = "data/configs.json")]
        configs: PathBuf,
        /// Test result document written by test, if one exists
        #[arg(long, default_value = "data/test_results.json")]
        tests: PathBuf,
        /// Output file for the report
        #[arg(short, long, default_value = "REPORT.md")]
        output: PathBuf,
    },
    /// Write the static JSON API snapshot from a fetch document
    Snapshot {
        /// Catalog document written by fetch
        #[arg(long, default_value = "data/configs.json")]
        configs: PathBuf,
        /// Directory the endpoint files are written to
        #[arg(short, long, default_value = "public/api")]
        output: PathBuf,
    },
    /// Run a fetch and test cycle inside the live dashboard
    Dashboard {
        /// How many configs to probe
        #[arg(short, long, default_value_t = DEFAULT_TEST_LIMIT)]
        limit: usize,
        /// Number of concurrent probes
        #[arg(short = 'n', long, default_value = "5")]
        concurrency: usize,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            source,
            output,
            timeout,
        } => {
            init_logging();
            let crawler =
                ConfigCrawler::with_config(CrawlerConfig::new().with_timeout(Duration::from_secs(timeout)))?;
            let scout = ConfigScout::new(crawler, ConfigChecker::new()?, EventBus::new());

            let configs = scout.refresh(source.as_deref()).await?;
            println!("Fetched {} configs", configs.len());
            for (protocol, count) in protocol_counts(&configs) {
                println!("  {protocol}: {count}");
            }

            let label = source.as_deref().unwrap_or("all");
            write_document(&output, &configs_document(label, &configs))?;
            println!("Saved catalog to {:?}", output);
        }
        Commands::Test {
            input,
            output,
            limit,
            id,
            concurrency,
            timeout,
            mmdb,
            speed,
        } => {
            init_logging();
            let mut checker_config = CheckerConfig::new()
                .with_concurrency(concurrency)
                .with_ping_timeout(Duration::from_secs(timeout))
                .with_speed_test(speed);
            if let Some(path) = mmdb {
                checker_config = checker_config.with_mmdb_path(path);
            }
            let scout = ConfigScout::new(
                ConfigCrawler::new()?,
                ConfigChecker::with_config(checker_config)?,
                EventBus::new(),
            );

            // Seed the catalog from the fetch document when one is given,
            // otherwise fetch a fresh generation
            match input {
                Some(path) => {
                    let configs = load_catalog(&path)?;
                    println!("Loaded {} configs from {:?}", configs.len(), path);
                    scout.store().replace_all(configs).await;
                }
                None => {
                    let configs = scout.refresh(None).await?;
                    println!("Fetched {} configs", configs.len());
                }
            }

            // Print probe progress live while the batch runs
            let mut subscription = scout.bus().subscribe();
            let subscription_id = subscription.id();
            let printer = tokio::spawn(async move {
                while let Some(envelope) = subscription.recv().await {
                    let Ok(event) = serde_json::from_str::<Value>(&envelope) else {
                        continue;
                    };
                    if let Some("test_progress" | "single_test_progress") =
                        event["type"].as_str()
                    {
                        println!(
                            "  config {}: {}",
                            event["config_id"],
                            event["message"].as_str().unwrap_or("")
                        );
                    }
                }
            });

            let results = if let Some(config_id) = id {
                let result = scout.test_one(config_id).await?;
                println!(
                    "Config {}: {} (ping: {}, error: {})",
                    config_id,
                    result.status,
                    result
                        .ping
                        .map_or("none".to_string(), |ms| format!("{ms:.0}ms")),
                    result.error_message.as_deref().unwrap_or("none"),
                );
                vec![result]
            } else {
                let (results, stats) = scout.test_all(Some(limit)).await?;
                println!(
                    "Tested {} configs: {} active, {} slow, {} dead",
                    results.len(),
                    stats.active,
                    stats.slow,
                    stats.dead
                );
                results
            };

            scout.bus().unsubscribe(subscription_id);
            let _ = printer.await;

            let configs = scout.configs().await;
            let stats = scout.stats().await;
            write_document(
                &output,
                &json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "test_params": {
                        "limit": limit,
                        "concurrency": concurrency,
                        "timeout": timeout,
                    },
                    "stats": stats,
                    "configs": configs,
                    "test_results": results,
                }),
            )?;
            println!("Saved test results to {:?}", output);
        }
        Commands::Report {
            configs,
            tests,
            output,
        } => {
            init_logging();
            let configs_doc = read_document(&configs)?;
            let tests_doc = if tests.exists() {
                Some(read_document(&tests)?)
            } else {
                None
            };

            let report = generate_report(&configs_doc, tests_doc.as_ref());
            std::fs::write(&output, report)
                .with_context(|| format!("could not write {output:?}"))?;
            println!("Saved report to {:?}", output);
        }
        Commands::Snapshot { configs, output } => {
            init_logging();
            let configs_doc = read_document(&configs)?;
            write_snapshot(&configs_doc, &output)?;
            println!("Saved snapshot to {:?}", output);
        }
        Commands::Dashboard { limit, concurrency } => {
            // No logging init: tracing output would fight the terminal UI
            let checker =
                ConfigChecker::with_config(CheckerConfig::new().with_concurrency(concurrency))?;
            let scout = Arc::new(ConfigScout::new(
                ConfigCrawler::new()?,
                checker,
                EventBus::new(),
            ));

            let mut app = DashboardApp::new(scout, Some(limit));
            app.run().await?;
        }
    }

    Ok(())
}

/// The fetch document consumed by report and snapshot generation
fn configs_document(source: &str, configs: &[ProxyConfig]) -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "source": source,
        "total_configs": configs.len(),
        "configs": configs,
    })
}

fn protocol_counts(configs: &[ProxyConfig]) -> std::collections::BTreeMap<String, usize> {
    let mut counts = std::collections::BTreeMap::new();
    for config in configs {
        *counts.entry(config.protocol.to_string()).or_insert(0) += 1;
    }
    counts
}

fn load_catalog(path: &Path) -> Result<Vec<ProxyConfig>> {
    let doc = read_document(path)?;
    let configs = doc
        .get("configs")
        .cloned()
        .with_context(|| format!("{path:?} has no configs field"))?;
    serde_json::from_value(configs).with_context(|| format!("invalid catalog in {path:?}"))
}

fn read_document(path: &Path) -> Result<Value> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("could not read {path:?}"))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {path:?}"))
}

fn write_document(path: &Path, doc: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(doc)?)
        .with_context(|| format!("could not write {path:?}"))?;
    Ok(())
}
