//! Share-link parsing for the supported proxy protocols
//!
//! Each parser takes one raw link and produces typed fields, or `None`
//! when the link is not a well-formed member of its family. Malformed
//! links are expected in the wild (feeds truncate lines mid-base64) and
//! are dropped silently by callers.

use crate::scout::models::{ParsedLink, ProtocolParams};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use url::Url;

/// Name used when a link carries no fragment
const DEFAULT_NAME: &str = "Unknown";
/// Port assumed for vmess, vless and trojan links that omit one
const DEFAULT_TLS_PORT: u16 = 443;
/// Port assumed for shadowsocks links that omit one
const DEFAULT_SS_PORT: u16 = 8388;

/// Share-link parser
pub struct LinkParser;

impl LinkParser {
    /// Parse a single share link, dispatching on its scheme
    pub fn parse(raw: &str) -> Option<ParsedLink> {
        let raw = raw.trim();
        if let Some(payload) = raw.strip_prefix("vmess://") {
            Self::parse_vmess(payload)
        } else if raw.starts_with("vless://") {
            Self::parse_vless(raw)
        } else if let Some(body) = raw.strip_prefix("ss://") {
            Self::parse_shadowsocks(body)
        } else if raw.starts_with("trojan://") {
            Self::parse_trojan(raw)
        } else {
            None
        }
    }

    /// vmess links carry a base64 JSON object after the scheme
    fn parse_vmess(payload: &str) -> Option<ParsedLink> {
        let decoded = BASE64.decode(payload).ok()?;
        let value: Value = serde_json::from_slice(&decoded).ok()?;
        let fields = value.as_object()?;

        let server = text(fields, "add", "");
        if server.is_empty() {
            return None;
        }
        let port = parse_port(fields.get("port"), DEFAULT_TLS_PORT)?;

        Some(ParsedLink {
            name: text(fields, "ps", DEFAULT_NAME),
            server,
            port,
            params: ProtocolParams::Vmess {
                uuid: text(fields, "id", ""),
                alter_id: parse_alter_id(fields.get("aid")),
                security: text(fields, "scy", "auto"),
                network: text(fields, "net", "tcp"),
                header_type: text(fields, "type", "none"),
                host: text(fields, "host", ""),
                path: text(fields, "path", ""),
                tls: text(fields, "tls", ""),
                sni: text(fields, "sni", ""),
            },
        })
    }

    /// vless links are URIs with the uuid in the userinfo slot and the
    /// transport options in the query string
    fn parse_vless(raw: &str) -> Option<ParsedLink> {
        let url = Url::parse(raw).ok()?;
        let server = host_of(&url)?;

        Some(ParsedLink {
            name: fragment_name(&url),
            server,
            port: url.port().unwrap_or(DEFAULT_TLS_PORT),
            params: ProtocolParams::Vless {
                uuid: url.username().to_string(),
                encryption: query_value(&url, "encryption")
                    .unwrap_or_else(|| "none".to_string()),
                security: query_value(&url, "security").unwrap_or_else(|| "none".to_string()),
                network: query_value(&url, "type").unwrap_or_else(|| "tcp".to_string()),
                host: query_value(&url, "host").unwrap_or_default(),
                path: query_value(&url, "path").unwrap_or_default(),
                sni: query_value(&url, "sni").unwrap_or_default(),
            },
        })
    }

    /// trojan links are URIs with the password in the userinfo slot.
    /// TLS is the family default, so a missing security parameter means
    /// "tls" rather than "none".
    fn parse_trojan(raw: &str) -> Option<ParsedLink> {
        let url = Url::parse(raw).ok()?;
        let server = host_of(&url)?;

        Some(ParsedLink {
            name: fragment_name(&url),
            server,
            port: url.port().unwrap_or(DEFAULT_TLS_PORT),
            params: ProtocolParams::Trojan {
                password: url.username().to_string(),
                sni: query_value(&url, "sni").unwrap_or_default(),
                network: query_value(&url, "type").unwrap_or_else(|| "tcp".to_string()),
                security: query_value(&url, "security").unwrap_or_else(|| "tls".to_string()),
            },
        })
    }

    /// shadowsocks links come in two shapes: `ss://BASE64(method:password)@host:port`
    /// and the older `ss://BASE64(method:password@host:port)`
    fn parse_shadowsocks(body: &str) -> Option<ParsedLink> {
        // a present-but-empty fragment still overrides the default name
        let (body, name) = match body.split_once('#') {
            Some((body, fragment)) => (body, percent_decode(fragment)),
            None => (body, DEFAULT_NAME.to_string()),
        };

        if let Some((userinfo, endpoint)) = body.split_once('@') {
            let decoded = decode_utf8(userinfo)?;
            let (method, password) = decoded.split_once(':')?;
            let (server, port) = match endpoint.rsplit_once(':') {
                Some((server, port)) => (server, port.parse().ok()?),
                None => (endpoint, DEFAULT_SS_PORT),
            };
            if server.is_empty() {
                return None;
            }
            Some(ParsedLink {
                name,
                server: server.to_string(),
                port,
                params: ProtocolParams::Shadowsocks {
                    method: method.to_string(),
                    password: password.to_string(),
                },
            })
        } else {
            let decoded = decode_utf8(body)?;
            let normalized = decoded.replace('@', ":");
            let fields: Vec<&str> = normalized.split(':').collect();
            if fields.len() != 4 || fields[2].is_empty() {
                return None;
            }
            Some(ParsedLink {
                name,
                server: fields[2].to_string(),
                port: fields[3].parse().ok()?,
                params: ProtocolParams::Shadowsocks {
                    method: fields[0].to_string(),
                    password: fields[1].to_string(),
                },
            })
        }
    }
}

fn text(fields: &Map<String, Value>, key: &str, default: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Ports appear both as JSON numbers and as numeric strings in the wild
fn parse_port(value: Option<&Value>, default: u16) -> Option<u16> {
    match value {
        None => Some(default),
        Some(Value::Number(number)) => number.as_u64().and_then(|port| u16::try_from(port).ok()),
        Some(Value::String(text)) => text.trim().parse().ok(),
        Some(_) => None,
    }
}

fn parse_alter_id(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(number)) => number
            .as_u64()
            .and_then(|aid| u32::try_from(aid).ok())
            .unwrap_or(0),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Host without IPv6 brackets, or None when the URI has no usable host
fn host_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']');
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

fn fragment_name(url: &Url) -> String {
    match url.fragment() {
        Some(fragment) if !fragment.is_empty() => percent_decode(fragment),
        _ => DEFAULT_NAME.to_string(),
    }
}

/// First non-empty value of a query key. Keys present with an empty
/// value are treated as absent, so family defaults apply.
fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(name, value)| name.as_ref() == key && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

fn decode_utf8(encoded: &str) -> Option<String> {
    let decoded = BASE64.decode(encoded).ok()?;
    String::from_utf8(decoded).ok()
}
