//! Config crawler module for fetching share links from subscription feeds
//!
//! This module provides functionality for:
//! - Fetching subscription sources over HTTP
//! - Extracting share links from line lists and HTML pages
//! - Reporting per-source success and failure

use crate::Result;
use anyhow::bail;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Link patterns scanned against HTML sources, one per protocol family.
/// Matches are concatenated in this order; the decoder discards any junk
/// the broad URI classes pick up.
static LINK_PATTERNS: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        Regex::new(r"vmess://[A-Za-z0-9+/=]+").expect("invalid vmess pattern"),
        Regex::new(r"vless://[A-Za-z0-9+/=@:?#&;.,-_]+").expect("invalid vless pattern"),
        Regex::new(r"ss://[A-Za-z0-9+/=@:?#&;.,-_]+").expect("invalid ss pattern"),
        Regex::new(r"trojan://[A-Za-z0-9+/=@:?#&;.,-_]+").expect("invalid trojan pattern"),
    ]
});

/// How a source publishes its links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Plain text, one link per line
    Lines,
    /// HTML or other markup with links embedded anywhere in the text
    Html,
}

/// A subscription feed that publishes share links
#[derive(Debug, Clone)]
pub struct Source {
    /// Name of the source
    pub name: String,
    /// URL to fetch links from
    pub url: String,
    /// How links are laid out in the response body
    pub format: SourceFormat,
}

impl Source {
    pub fn new(name: &str, url: &str, format: SourceFormat) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format,
        }
    }
}

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source that was crawled
    pub source: String,
    /// Raw share links extracted from the source
    pub links: Vec<String>,
    /// Error message if crawling failed
    pub error: Option<String>,
}

impl CrawlResult {
    /// Create a successful crawl result
    pub fn success(source: String, links: Vec<String>) -> Self {
        Self {
            source,
            links,
            error: None,
        }
    }

    /// Create a failed crawl result
    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            links: Vec::new(),
            error: Some(error),
        }
    }

    /// Check if the crawl was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for the config crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Config crawler for fetching share links from subscription feeds
pub struct ConfigCrawler {
    config: CrawlerConfig,
    client: Client,
}

impl ConfigCrawler {
    /// Create a new crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { config, client })
    }

    /// Fetch one source and extract its links
    pub async fn fetch_source(&self, source: &Source) -> Result<Vec<String>> {
        let response = self.client.get(&source.url).send().await?;
        if !response.status().is_success() {
            bail!("HTTP {}", response.status());
        }
        let content = response.text().await?;
        Ok(self.extract_links(&content, source.format))
    }

    /// Fetch every source concurrently, returning one result per source
    /// in the same order
    pub async fn fetch_all(&self, sources: &[Source]) -> Vec<CrawlResult> {
        let fetches = sources.iter().map(|source| async move {
            match self.fetch_source(source).await {
                Ok(links) => {
                    info!(source = %source.name, links = links.len(), "fetched source");
                    CrawlResult::success(source.name.clone(), links)
                }
                Err(e) => {
                    warn!(source = %source.name, error = %e, "source fetch failed");
                    CrawlResult::failure(source.name.clone(), e.to_string())
                }
            }
        });
        futures::future::join_all(fetches).await
    }

    /// Extract share links from raw response content
    pub fn extract_links(&self, content: &str, format: SourceFormat) -> Vec<String> {
        match format {
            SourceFormat::Lines => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            SourceFormat::Html => LINK_PATTERNS
                .iter()
                .flat_map(|pattern| {
                    pattern
                        .find_iter(content)
                        .map(|found| found.as_str().to_string())
                })
                .collect(),
        }
    }

    /// Get the default list of subscription sources
    pub fn default_sources() -> Vec<Source> {
        vec![
            Source::new(
                "vmess_iran",
                "https://raw.githubusercontent.com/Farid-Karimi/Config-Collector/main/vmess_iran.txt",
                SourceFormat::Lines,
            ),
            Source::new(
                "mixed_iran",
                "https://raw.githubusercontent.com/Farid-Karimi/Config-Collector/main/mixed_iran.txt",
                SourceFormat::Lines,
            ),
            Source::new(
                "arshia_mix",
                "https://raw.githubusercontent.com/arshiacomplus/v2rayExtractor/refs/heads/main/mix/sub.html",
                SourceFormat::Html,
            ),
            Source::new(
                "arshia_ss",
                "https://raw.githubusercontent.com/arshiacomplus/v2rayExtractor/refs/heads/main/ss.html",
                SourceFormat::Html,
            ),
            Source::new(
                "arshia_vless",
                "https://raw.githubusercontent.com/arshiacomplus/v2rayExtractor/refs/heads/main/vless.html",
                SourceFormat::Html,
            ),
        ]
    }
}

impl Default for ConfigCrawler {
    fn default() -> Self {
        Self::new().expect("Failed to create default ConfigCrawler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawler_config_default() {
        let config = CrawlerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_crawler_config_builder() {
        let config = CrawlerConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_user_agent("Custom Agent".to_string());

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.user_agent, "Custom Agent");
    }

    #[test]
    fn test_source_creation() {
        let source = Source::new(
            "test-source",
            "https://example.com/sub.txt",
            SourceFormat::Lines,
        );
        assert_eq!(source.name, "test-source");
        assert_eq!(source.url, "https://example.com/sub.txt");
        assert_eq!(source.format, SourceFormat::Lines);
    }

    #[test]
    fn test_crawl_result_success() {
        let links = vec!["vmess://abc".to_string(), "trojan://x@1.2.3.4:443".to_string()];
        let result = CrawlResult::success("test-source".to_string(), links);
        assert!(result.is_success());
        assert_eq!(result.source, "test-source");
        assert_eq!(result.links.len(), 2);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_crawl_result_failure() {
        let result = CrawlResult::failure("test-source".to_string(), "HTTP 404".to_string());
        assert!(!result.is_success());
        assert!(result.links.is_empty());
        assert_eq!(result.error, Some("HTTP 404".to_string()));
    }

    #[test]
    fn test_extract_links_from_lines() {
        let crawler = ConfigCrawler::new().unwrap();
        let content = "vmess://aaa\n\n  trojan://pw@1.2.3.4:443#x  \n\n";
        let links = crawler.extract_links(content, SourceFormat::Lines);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], "vmess://aaa");
        assert_eq!(links[1], "trojan://pw@1.2.3.4:443#x");
    }

    #[test]
    fn test_extract_links_skips_blank_lines_only() {
        let crawler = ConfigCrawler::new().unwrap();
        let content = "not a link\nvmess://bbb\n";
        // line sources keep every non-empty line; the decoder filters junk
        let links = crawler.extract_links(content, SourceFormat::Lines);
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_extract_links_from_html() {
        let crawler = ConfigCrawler::new().unwrap();
        // sources publish bare links between markup lines
        let content = "<html><body>\nvmess://eyJhZGQiOiI5LjkuOS45In0=\ntrojan://pw@1.2.3.4:443?security=tls#node\nss://YWVzLTI1Ni1nY206c2VjcmV0MTIz@5.6.7.8:8388#x\n</body></html>\n";
        let links = crawler.extract_links(content, SourceFormat::Html);
        assert!(links.contains(&"vmess://eyJhZGQiOiI5LjkuOS45In0=".to_string()));
        assert!(links.contains(&"trojan://pw@1.2.3.4:443?security=tls#node".to_string()));
        assert!(links.contains(&"ss://YWVzLTI1Ni1nY206c2VjcmV0MTIz@5.6.7.8:8388#x".to_string()));
        // vmess matches come first regardless of document order
        assert!(links[0].starts_with("vmess://"));
    }

    #[test]
    fn test_html_scan_keeps_scheme_substring_candidates() {
        let crawler = ConfigCrawler::new().unwrap();
        // the tail of a vmess link is itself an ss:// candidate; the broad
        // scan keeps it and the decoder rejects it downstream
        let links = crawler.extract_links("vmess://eyJhZGQiOiI5LjkuOS45In0=\n", SourceFormat::Html);
        assert_eq!(links.len(), 2);
        assert!(links[1].starts_with("ss://"));
        assert!(crate::scout::parser::LinkParser::parse(&links[1]).is_none());
    }

    #[test]
    fn test_extract_links_html_contains_vless() {
        let crawler = ConfigCrawler::new().unwrap();
        let content = "<a href=\"vless://uuid@7.7.7.7:8443?security=tls#de\">link</a>";
        let links = crawler.extract_links(content, SourceFormat::Html);
        assert!(links
            .iter()
            .any(|link| link.starts_with("vless://uuid@7.7.7.7")));
    }

    #[test]
    fn test_extract_links_html_without_links() {
        let crawler = ConfigCrawler::new().unwrap();
        let links = crawler.extract_links("<html><body>nothing here</body></html>", SourceFormat::Html);
        assert!(links.is_empty());
    }

    #[test]
    fn test_default_sources() {
        let sources = ConfigCrawler::default_sources();
        assert_eq!(sources.len(), 5);
        for source in &sources {
            assert!(!source.name.is_empty());
            assert!(source.url.starts_with("https://"));
        }
        assert!(sources
            .iter()
            .any(|source| source.format == SourceFormat::Html));
    }
}
