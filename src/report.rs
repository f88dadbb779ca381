//! Markdown report generation from fetch and test result documents

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;

/// Render a Markdown report over a fetch document and, optionally, a
/// test result document. Both documents are taken as loose JSON so a
/// report can still be built from files written by older runs.
pub fn generate_report(configs_doc: &Value, tests_doc: Option<&Value>) -> String {
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let configs = config_list(configs_doc);
    let total = configs.len();

    let mut report = String::new();
    report.push_str("# Config Scout Report\n\n");
    report.push_str(&format!("**Generated:** {timestamp}\n\n"));

    report.push_str("## Summary\n\n");
    report.push_str("| Stat | Count |\n");
    report.push_str("|------|-------|\n");
    report.push_str(&format!("| Total configs | {total} |\n"));

    if let Some(stats) = tests_doc.and_then(|doc| doc.get("stats")) {
        let active = count_of(stats, "active");
        let slow = count_of(stats, "slow");
        let dead = count_of(stats, "dead");
        report.push_str(&format!("| Active | {active} |\n"));
        report.push_str(&format!("| Slow | {slow} |\n"));
        report.push_str(&format!("| Dead | {dead} |\n"));
        report.push_str(&format!("| Untested | {} |\n", count_of(stats, "untested")));
        report.push('\n');

        let tested = active + slow + dead;
        if tested > 0 {
            let success_rate = (active + slow) as f64 / tested as f64 * 100.0;
            report.push_str(&format!("**Success rate:** {success_rate:.1}%\n\n"));
        }
    } else {
        report.push('\n');
    }

    report.push_str("## Protocols\n\n");
    report.push_str("| Protocol | Count | Share |\n");
    report.push_str("|----------|-------|-------|\n");
    for (protocol, count) in sorted_counts(&configs, "protocol") {
        let percentage = if total > 0 {
            count as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        report.push_str(&format!("| {protocol} | {count} | {percentage:.1}% |\n"));
    }

    let countries = sorted_counts(&configs, "country");
    if !countries.is_empty() {
        report.push_str("\n## Countries\n\n");
        report.push_str("| Country | Count |\n");
        report.push_str("|---------|-------|\n");
        for (country, count) in countries.into_iter().take(10) {
            report.push_str(&format!("| {country} | {count} |\n"));
        }
    }

    if let Some(best) = tests_doc.map(best_configs) {
        if !best.is_empty() {
            report.push_str("\n## Best Configs (lowest ping)\n\n");
            report.push_str("| Rank | Name | Server | Ping | Protocol |\n");
            report.push_str("|------|------|--------|------|----------|\n");
            for (rank, config) in best.iter().enumerate() {
                let name = truncated(config, "name", 30);
                let server = truncated(config, "server", 20);
                let ping = config.get("ping").and_then(Value::as_f64).unwrap_or(0.0);
                let protocol = config
                    .get("protocol")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                report.push_str(&format!(
                    "| {} | {name} | {server} | {ping:.0}ms | {protocol} |\n",
                    rank + 1
                ));
            }
        }
    }

    report.push_str(&format!("\n---\n\n**Last updated:** {timestamp}\n"));
    report
}

fn config_list(doc: &Value) -> Vec<&Value> {
    doc.get("configs")
        .and_then(Value::as_array)
        .map(|configs| configs.iter().collect())
        .unwrap_or_default()
}

fn count_of(stats: &Value, key: &str) -> u64 {
    stats.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Occurrences of a string field across configs, most common first.
/// Configs where the field is null or missing are not counted.
fn sorted_counts(configs: &[&Value], field: &str) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for config in configs {
        if let Some(value) = config.get(field).and_then(Value::as_str) {
            *counts.entry(value).or_insert(0) += 1;
        }
    }
    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(value, count)| (value.to_string(), count))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Active configs with a nonzero ping, fastest first, at most ten
fn best_configs(tests_doc: &Value) -> Vec<&Value> {
    let mut active: Vec<&Value> = tests_doc
        .get("configs")
        .and_then(Value::as_array)
        .map(|configs| {
            configs
                .iter()
                .filter(|config| {
                    config.get("status").and_then(Value::as_str) == Some("active")
                        && config
                            .get("ping")
                            .and_then(Value::as_f64)
                            .map_or(false, |ping| ping != 0.0)
                })
                .collect()
        })
        .unwrap_or_default();
    active.sort_by(|a, b| {
        let ping_a = a.get("ping").and_then(Value::as_f64).unwrap_or(f64::MAX);
        let ping_b = b.get("ping").and_then(Value::as_f64).unwrap_or(f64::MAX);
        ping_a.total_cmp(&ping_b)
    });
    active.truncate(10);
    active
}

fn truncated(config: &Value, field: &str, limit: usize) -> String {
    config
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .chars()
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_configs_doc() -> Value {
        json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "source": "all",
            "total_configs": 3,
            "configs": [
                {"id": 0, "name": "A", "server": "1.1.1.1", "protocol": "vmess", "country": "DE"},
                {"id": 1, "name": "B", "server": "2.2.2.2", "protocol": "vmess", "country": null},
                {"id": 2, "name": "C", "server": "3.3.3.3", "protocol": "trojan", "country": "DE"},
            ]
        })
    }

    fn sample_tests_doc() -> Value {
        json!({
            "stats": {"total": 3, "active": 2, "slow": 0, "dead": 1, "untested": 0},
            "configs": [
                {"id": 0, "name": "A", "server": "1.1.1.1", "protocol": "vmess",
                 "status": "active", "ping": 120.0},
                {"id": 1, "name": "a-very-long-name-that-keeps-going-and-going", "server": "2.2.2.2",
                 "protocol": "vmess", "status": "active", "ping": 80.0},
                {"id": 2, "name": "C", "server": "3.3.3.3", "protocol": "trojan",
                 "status": "dead", "ping": null},
            ]
        })
    }

    #[test]
    fn test_report_without_tests() {
        let report = generate_report(&sample_configs_doc(), None);
        assert!(report.contains("# Config Scout Report"));
        assert!(report.contains("| Total configs | 3 |"));
        // protocols sorted by count, vmess first
        let vmess = report.find("| vmess | 2 |").unwrap();
        let trojan = report.find("| trojan | 1 |").unwrap();
        assert!(vmess < trojan);
        assert!(!report.contains("Success rate"));
        assert!(!report.contains("Best Configs"));
    }

    #[test]
    fn test_report_with_tests() {
        let report = generate_report(&sample_configs_doc(), Some(&sample_tests_doc()));
        assert!(report.contains("| Active | 2 |"));
        assert!(report.contains("| Dead | 1 |"));
        assert!(report.contains("**Success rate:** 66.7%"));
        assert!(report.contains("## Best Configs"));
        // fastest config ranks first
        let fast = report.find("| 1 | a-very-long-name-that-keeps-g").unwrap();
        let slower = report.find("| 2 | A |").unwrap();
        assert!(fast < slower);
        // dead configs never appear in the ranking
        assert!(!report.contains("| C | 3.3.3.3 |"));
    }

    #[test]
    fn test_report_truncates_long_names() {
        let report = generate_report(&sample_configs_doc(), Some(&sample_tests_doc()));
        assert!(report.contains("a-very-long-name-that-keeps-go |"));
        assert!(!report.contains("going-and-going"));
    }

    #[test]
    fn test_country_section_needs_known_countries() {
        let doc = json!({"configs": [{"protocol": "vmess", "country": null}]});
        let report = generate_report(&doc, None);
        assert!(!report.contains("## Countries"));

        let report = generate_report(&sample_configs_doc(), None);
        assert!(report.contains("## Countries"));
        assert!(report.contains("| DE | 2 |"));
    }

    #[test]
    fn test_report_handles_empty_documents() {
        let report = generate_report(&json!({}), Some(&json!({})));
        assert!(report.contains("| Total configs | 0 |"));
    }
}
