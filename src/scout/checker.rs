//! Health probing for harvested configs
//!
//! Each config goes through a staged probe: reachability first (system
//! ping with a TCP connect fallback), then timed HTTP requests against
//! reference endpoints, then classification into active, slow or dead.
//! A probe never fails outright; every error is absorbed into the
//! returned result.

use crate::scout::geo::GeoResolver;
use crate::scout::models::{CheckResult, ConfigStatus, ProxyConfig};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Default number of probes allowed in flight at once
const DEFAULT_CONCURRENCY: usize = 5;

/// Default timeout for the ping and TCP stages in seconds
const DEFAULT_PING_TIMEOUT_SECS: u64 = 5;

/// Default timeout for each reference HTTP request in seconds
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 5;

/// Default sampling window for download speed measurement in seconds
const DEFAULT_SPEED_TIMEOUT_SECS: u64 = 10;

/// Echo samples per ping run
const PING_SAMPLES: u32 = 4;

/// Reference endpoints for the response quality stage. These measure the
/// local network path rather than the config's own server; routing the
/// probe through the described endpoint would need a protocol client.
const DEFAULT_PROBE_URLS: [&str; 3] = [
    "https://www.google.com",
    "https://www.cloudflare.com",
    "https://8.8.8.8",
];

/// How many of the configured probe URLs each check samples
const PROBE_URL_SAMPLE: usize = 2;

/// Default file for download speed sampling
const DEFAULT_SPEED_URL: &str = "http://speedtest.ftp.otenet.gr/files/test1Mb.db";

/// Ping above this many milliseconds classifies a config as slow
const SLOW_PING_MS: f64 = 1000.0;

/// Mean response time above this many milliseconds classifies a config as slow
const SLOW_RESPONSE_MS: f64 = 3000.0;

/// Error recorded when neither ping nor TCP connect got an answer
const UNREACHABLE_ERROR: &str = "no response to reachability probe";

/// `rtt min/avg/max/mdev = a/b/c/d ms` on Linux, `round-trip
/// min/avg/max/stddev` on macOS and the BSDs
static RTT_SUMMARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"min/avg/max\S* = [^/]+/([0-9.]+)/").expect("invalid rtt pattern"));

/// `Average = 23ms` in the Windows summary line
static WIN_AVERAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Average = (\d+)ms").expect("invalid average pattern"));

/// `time=23ms` or `time<1ms` per-reply samples on Windows
static WIN_SAMPLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time[<=](\d+)ms").expect("invalid sample pattern"));

/// Configuration for the config checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Number of concurrent probes
    pub concurrency: usize,
    /// Timeout for the ping and TCP reachability stages
    pub ping_timeout: Duration,
    /// Timeout for each reference HTTP request
    pub http_timeout: Duration,
    /// Reference endpoints for the response quality stage
    pub probe_urls: Vec<String>,
    /// Path to MMDB file for country lookup (optional)
    pub mmdb_path: Option<String>,
    /// Whether to sample download speed for live configs
    pub measure_speed: bool,
    /// File fetched by the download speed sample
    pub speed_url: String,
    /// Sampling window for download speed measurement
    pub speed_timeout: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            ping_timeout: Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            probe_urls: DEFAULT_PROBE_URLS.iter().map(|url| url.to_string()).collect(),
            mmdb_path: None,
            measure_speed: false,
            speed_url: DEFAULT_SPEED_URL.to_string(),
            speed_timeout: Duration::from_secs(DEFAULT_SPEED_TIMEOUT_SECS),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_probe_urls(mut self, urls: Vec<String>) -> Self {
        self.probe_urls = urls;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }

    pub fn with_speed_test(mut self, enabled: bool) -> Self {
        self.measure_speed = enabled;
        self
    }

    pub fn with_speed_url(mut self, url: String) -> Self {
        self.speed_url = url;
        self
    }
}

/// Config checker running the staged probe pipeline
pub struct ConfigChecker {
    config: CheckerConfig,
    client: Client,
    geo: Option<GeoResolver>,
}

impl ConfigChecker {
    /// Create a new checker with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        let geo = config.mmdb_path.as_ref().and_then(|path| {
            match GeoResolver::from_path(path) {
                Ok(resolver) => Some(resolver),
                Err(e) => {
                    debug!(path = %path, error = %e, "could not open geo database");
                    None
                }
            }
        });

        Ok(Self { config, client, geo })
    }

    /// Run the full probe pipeline against one config
    pub async fn check_config<F>(&self, config: &ProxyConfig, on_progress: &F) -> CheckResult
    where
        F: Fn(usize, &str),
    {
        let mut result = CheckResult::new(config.id);
        on_progress(config.id, "starting test...");

        on_progress(config.id, "testing ping...");
        let mut ping = icmp_ping(&config.server, self.config.ping_timeout).await;
        if ping.is_none() {
            ping = tcp_ping(&config.server, config.port, self.config.ping_timeout).await;
        }
        result.ping = ping;

        let Some(ping_ms) = ping else {
            result.status = ConfigStatus::Dead;
            result.error_message = Some(UNREACHABLE_ERROR.to_string());
            on_progress(config.id, "test finished");
            return result;
        };

        on_progress(config.id, "testing connectivity...");
        let urls: Vec<&str> = self
            .config
            .probe_urls
            .iter()
            .take(PROBE_URL_SAMPLE)
            .map(String::as_str)
            .collect();
        let mut response_times = Vec::new();
        for url in &urls {
            if let Some(ms) = http_response_time(&self.client, url, self.config.http_timeout).await
            {
                response_times.push(ms);
            }
        }
        if !response_times.is_empty() {
            result.response_time =
                Some(response_times.iter().sum::<f64>() / response_times.len() as f64);
            result.success_rate = response_times.len() as f64 / urls.len() as f64;
        }

        result.status = classify(ping_ms, result.success_rate, result.response_time);

        if result.is_alive() {
            if let Some(geo) = &self.geo {
                result.country = geo.country(&config.server);
            }
            if self.config.measure_speed {
                on_progress(config.id, "testing download speed...");
                result.download_speed = download_speed(
                    &self.client,
                    &self.config.speed_url,
                    self.config.speed_timeout,
                )
                .await;
            }
        }

        on_progress(config.id, "test finished");
        result
    }

    /// Check a batch of configs under the concurrency ceiling. The output
    /// always contains exactly one result per input config.
    pub async fn check_batch<F>(&self, configs: Vec<ProxyConfig>, on_progress: F) -> Vec<CheckResult>
    where
        F: Fn(usize, &str) + Send + Sync + 'static,
    {
        let total = configs.len();
        let on_progress = Arc::new(on_progress);
        let results = gather_checks(configs, self.config.concurrency, |config| {
            let checker = self.clone();
            let on_progress = Arc::clone(&on_progress);
            async move { checker.check_config(&config, on_progress.as_ref()).await }
        })
        .await;
        debug!(total, "batch finished");
        results
    }
}

impl Clone for ConfigChecker {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            client: self.client.clone(),
            geo: self.geo.clone(),
        }
    }
}

/// Spawn one task per config, gated by a shared semaphore so at most
/// `limit` probes run at once. A task that dies outside the probe's own
/// error handling still yields a dead result for its config id.
async fn gather_checks<P, Fut>(
    configs: Vec<ProxyConfig>,
    limit: usize,
    probe: P,
) -> Vec<CheckResult>
where
    P: Fn(ProxyConfig) -> Fut,
    Fut: Future<Output = CheckResult> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut handles = Vec::with_capacity(configs.len());
    for config in configs {
        let semaphore = Arc::clone(&semaphore);
        let config_id = config.id;
        let fut = probe(config);
        let handle = tokio::spawn(async move {
            // Semaphore acquire only fails if the semaphore is closed,
            // which won't happen here since the Arc stays alive until
            // every task has finished.
            let _permit = semaphore
                .acquire()
                .await
                .expect("Semaphore closed unexpectedly");
            fut.await
        });
        handles.push((config_id, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (config_id, handle) in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => {
                error!(config_id, error = %e, "probe task died");
                results.push(CheckResult::dead(config_id, e.to_string()));
            }
        }
    }
    results
}

/// Classify a probe outcome. A zero success ratio is dead no matter the
/// ping; the threshold values themselves still count as active.
fn classify(ping_ms: f64, success_rate: f64, response_time: Option<f64>) -> ConfigStatus {
    if success_rate == 0.0 {
        ConfigStatus::Dead
    } else if ping_ms > SLOW_PING_MS
        || response_time.map_or(false, |ms| ms > SLOW_RESPONSE_MS)
    {
        ConfigStatus::Slow
    } else {
        ConfigStatus::Active
    }
}

/// Average round trip reported by the system ping tool, if it can be run
/// and its output parsed
async fn icmp_ping(host: &str, timeout: Duration) -> Option<f64> {
    let samples = PING_SAMPLES.to_string();
    let mut command = Command::new("ping");
    if cfg!(target_os = "windows") {
        let wait_ms = timeout.as_millis().to_string();
        command.args(["-n", samples.as_str(), "-w", wait_ms.as_str()]);
    } else {
        let wait_secs = timeout.as_secs().max(1).to_string();
        command.args(["-c", samples.as_str(), "-W", wait_secs.as_str()]);
    }
    let child = command
        .arg(host)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(e) => {
            debug!(error = %e, "ping tool unavailable");
            return None;
        }
    };

    // slack beyond the tool's own per-reply timeout
    let wait = timeout + Duration::from_secs(5);
    let output = match tokio::time::timeout(wait, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(%host, error = %e, "ping run failed");
            return None;
        }
        Err(_) => {
            debug!(%host, "ping timed out");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    parse_ping_output(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the average round trip in milliseconds from ping tool output
fn parse_ping_output(output: &str) -> Option<f64> {
    if let Some(caps) = RTT_SUMMARY.captures(output) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = WIN_AVERAGE.captures(output) {
        return caps[1].parse().ok();
    }
    let samples: Vec<f64> = WIN_SAMPLE
        .captures_iter(output)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Wall-clock duration of a successful TCP connect, in milliseconds
async fn tcp_ping(host: &str, port: u16, timeout: Duration) -> Option<f64> {
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Some(start.elapsed().as_secs_f64() * 1000.0),
        Ok(Err(e)) => {
            debug!(%host, port, error = %e, "tcp connect failed");
            None
        }
        Err(_) => None,
    }
}

/// Time until the first body bytes arrive from one reference endpoint.
/// Any response counts; only transport errors and timeouts are failures.
async fn http_response_time(client: &Client, url: &str, timeout: Duration) -> Option<f64> {
    let start = Instant::now();
    let mut response = match client.get(url).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(%url, error = %e, "reference request failed");
            return None;
        }
    };
    if response.chunk().await.is_err() {
        return None;
    }
    Some(start.elapsed().as_secs_f64() * 1000.0)
}

/// Sampled download throughput in KB/s, reading until the file ends or
/// the window elapses
async fn download_speed(client: &Client, url: &str, window: Duration) -> Option<f64> {
    let start = Instant::now();
    let mut response = match client.get(url).timeout(window + window).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(%url, error = %e, "speed test request failed");
            return None;
        }
    };
    if !response.status().is_success() {
        return None;
    }

    let mut downloaded: u64 = 0;
    loop {
        let Some(remaining) = window.checked_sub(start.elapsed()) else {
            break;
        };
        match tokio::time::timeout(remaining, response.chunk()).await {
            Ok(Ok(Some(chunk))) => downloaded += chunk.len() as u64,
            Ok(Ok(None)) => break,
            Ok(Err(_)) => return None,
            Err(_) => break,
        }
    }

    let secs = start.elapsed().as_secs_f64();
    if downloaded == 0 || secs <= 0.0 {
        return None;
    }
    Some(downloaded as f64 / 1024.0 / secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scout::models::Protocol;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const LINUX_PING: &str = "\
PING 1.2.3.4 (1.2.3.4) 56(84) bytes of data.
64 bytes from 1.2.3.4: icmp_seq=1 ttl=55 time=23.4 ms
64 bytes from 1.2.3.4: icmp_seq=2 ttl=55 time=24.1 ms

--- 1.2.3.4 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3004ms
rtt min/avg/max/mdev = 22.981/23.756/24.109/0.412 ms
";

    const MACOS_PING: &str = "\
PING 1.2.3.4 (1.2.3.4): 56 data bytes
64 bytes from 1.2.3.4: icmp_seq=0 ttl=55 time=19.421 ms

--- 1.2.3.4 ping statistics ---
4 packets transmitted, 4 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 18.112/19.356/20.221/0.774 ms
";

    const WINDOWS_PING: &str = "\
Pinging 1.2.3.4 with 32 bytes of data:
Reply from 1.2.3.4: bytes=32 time=31ms TTL=55
Reply from 1.2.3.4: bytes=32 time=29ms TTL=55

Ping statistics for 1.2.3.4:
    Packets: Sent = 4, Received = 4, Lost = 0 (0% loss),
Approximate round trip times in milli-seconds:
    Minimum = 29ms, Maximum = 31ms, Average = 30ms
";

    const WINDOWS_PING_NO_SUMMARY: &str = "\
Reply from 1.2.3.4: bytes=32 time=10ms TTL=55
Reply from 1.2.3.4: bytes=32 time<1ms TTL=55
Reply from 1.2.3.4: bytes=32 time=20ms TTL=55
";

    fn probe_target(id: usize) -> ProxyConfig {
        ProxyConfig {
            id,
            name: format!("cfg-{id}"),
            server: "127.0.0.1".to_string(),
            port: 443,
            protocol: Protocol::Vmess,
            config_url: String::new(),
            status: ConfigStatus::Untested,
            ping: None,
            download_speed: None,
            country: None,
            last_tested: None,
        }
    }

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.ping_timeout, Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS));
        assert_eq!(config.probe_urls.len(), 3);
        assert!(!config.measure_speed);
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_concurrency(8)
            .with_ping_timeout(Duration::from_secs(2))
            .with_http_timeout(Duration::from_secs(3))
            .with_probe_urls(vec!["https://example.com".to_string()])
            .with_speed_test(true);

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.ping_timeout, Duration::from_secs(2));
        assert_eq!(config.http_timeout, Duration::from_secs(3));
        assert_eq!(config.probe_urls.len(), 1);
        assert!(config.measure_speed);
    }

    #[test]
    fn test_classify_zero_success_rate_is_dead() {
        assert_eq!(classify(12.0, 0.0, None), ConfigStatus::Dead);
        // even a great ping cannot rescue a config nothing answered for
        assert_eq!(classify(1.0, 0.0, Some(100.0)), ConfigStatus::Dead);
    }

    #[test]
    fn test_classify_slow_thresholds() {
        assert_eq!(classify(1500.0, 1.0, Some(200.0)), ConfigStatus::Slow);
        assert_eq!(classify(50.0, 1.0, Some(3500.0)), ConfigStatus::Slow);
    }

    #[test]
    fn test_classify_boundary_values_are_active() {
        assert_eq!(classify(1000.0, 1.0, Some(3000.0)), ConfigStatus::Active);
        assert_eq!(classify(50.0, 0.5, Some(200.0)), ConfigStatus::Active);
    }

    #[test]
    fn test_parse_ping_output_linux() {
        assert_eq!(parse_ping_output(LINUX_PING), Some(23.756));
    }

    #[test]
    fn test_parse_ping_output_macos() {
        assert_eq!(parse_ping_output(MACOS_PING), Some(19.356));
    }

    #[test]
    fn test_parse_ping_output_windows_summary() {
        assert_eq!(parse_ping_output(WINDOWS_PING), Some(30.0));
    }

    #[test]
    fn test_parse_ping_output_windows_samples() {
        // mean of 10, 1 and 20
        assert_eq!(parse_ping_output(WINDOWS_PING_NO_SUMMARY), Some(31.0 / 3.0));
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert_eq!(parse_ping_output("ping: unknown host"), None);
        assert_eq!(parse_ping_output(""), None);
    }

    #[tokio::test]
    async fn test_tcp_ping_refused_port() {
        // port 1 on loopback is essentially never bound
        let ms = tcp_ping("127.0.0.1", 1, Duration::from_secs(2)).await;
        assert!(ms.is_none());
    }

    #[tokio::test]
    async fn test_tcp_ping_open_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let ms = tcp_ping("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(ms.is_some());
        assert!(ms.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_gather_checks_respects_limit() {
        let configs: Vec<ProxyConfig> = (0..8).map(probe_target).collect();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = gather_checks(configs, 3, |config| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                CheckResult::new(config.id)
            }
        })
        .await;

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_gather_checks_survives_panicking_probe() {
        let configs: Vec<ProxyConfig> = (0..3).map(probe_target).collect();

        let results = gather_checks(configs, 2, |config| async move {
            if config.id == 1 {
                panic!("probe blew up");
            }
            CheckResult::new(config.id)
        })
        .await;

        assert_eq!(results.len(), 3);
        let failed = results.iter().find(|r| r.config_id == 1).unwrap();
        assert_eq!(failed.status, ConfigStatus::Dead);
        assert!(failed.error_message.is_some());
        // the other probes are unaffected
        assert_eq!(results.iter().filter(|r| r.status == ConfigStatus::Untested).count(), 2);
    }

    #[tokio::test]
    async fn test_check_batch_empty_input() {
        let checker = ConfigChecker::new().unwrap();
        let results = checker.check_batch(Vec::new(), |_, _| {}).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_check_config_unreachable_host() {
        let config = CheckerConfig::new()
            .with_ping_timeout(Duration::from_secs(1))
            .with_http_timeout(Duration::from_secs(1));
        let checker = ConfigChecker::with_config(config).unwrap();

        let mut target = probe_target(5);
        // reserved TLD, guaranteed not to resolve
        target.server = "host.invalid".to_string();
        target.port = 9;

        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let result = checker
            .check_config(&target, &move |id, message: &str| {
                sink.lock().unwrap().push((id, message.to_string()));
            })
            .await;

        assert_eq!(result.config_id, 5);
        assert_eq!(result.status, ConfigStatus::Dead);
        assert!(result.ping.is_none());
        assert_eq!(result.error_message.as_deref(), Some(UNREACHABLE_ERROR));
        assert_eq!(result.success_rate, 0.0);

        let messages = messages.lock().unwrap();
        assert_eq!(messages[0], (5, "starting test...".to_string()));
        assert!(messages.iter().any(|(_, m)| m == "testing ping..."));
        assert_eq!(messages.last().unwrap().1, "test finished");
        // the quality stage never ran
        assert!(!messages.iter().any(|(_, m)| m == "testing connectivity..."));
    }
}
