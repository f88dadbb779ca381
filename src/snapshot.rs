//! Static JSON API snapshot for serving a catalog from plain file hosting
//!
//! Writes the three endpoint files a static frontend expects:
//! `configs.json` with the full fetch document, `stats.json` with
//! protocol counts and `index.json` listing the endpoints.

use crate::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Envelope for the configs endpoint
pub fn configs_endpoint(configs_doc: &Value) -> Value {
    json!({
        "status": "success",
        "data": configs_doc,
        "timestamp": configs_doc.get("timestamp").cloned().unwrap_or_else(|| json!("")),
        "total": configs_doc.get("total_configs").cloned().unwrap_or_else(|| json!(0)),
    })
}

/// Envelope for the stats endpoint, with per-protocol counts
pub fn stats_endpoint(configs_doc: &Value) -> Value {
    let configs = configs_doc
        .get("configs")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut protocols: BTreeMap<&str, usize> = BTreeMap::new();
    for config in configs {
        let protocol = config
            .get("protocol")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        *protocols.entry(protocol).or_insert(0) += 1;
    }

    json!({
        "status": "success",
        "data": {
            "protocols": protocols,
            "total_configs": configs.len(),
            "timestamp": configs_doc.get("timestamp").cloned().unwrap_or_else(|| json!("")),
        }
    })
}

/// Envelope for the index endpoint
pub fn index_endpoint() -> Value {
    json!({
        "status": "success",
        "endpoints": ["/api/configs.json", "/api/stats.json"],
        "description": "config-scout static API",
        "version": "1.0.0",
    })
}

/// Write all three endpoint files under `output_dir`
pub fn write_snapshot(configs_doc: &Value, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)?;

    let endpoints = [
        ("configs.json", configs_endpoint(configs_doc)),
        ("stats.json", stats_endpoint(configs_doc)),
        ("index.json", index_endpoint()),
    ];
    for (file_name, payload) in endpoints {
        fs::write(
            output_dir.join(file_name),
            serde_json::to_string_pretty(&payload)?,
        )?;
    }

    info!(dir = %output_dir.display(), "static API snapshot written");
    Ok(())
}
