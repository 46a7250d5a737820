//! Per-request connection settings and target resolution
//!
//! Everything here is pure: settings are validated and turned into a target
//! URL plus an optional pinned socket address before any network I/O.

use std::net::{IpAddr, SocketAddr};

use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};

use meridian_common::{Error, Result};

/// Body of a predict call
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictRequest {
    /// Payload forwarded verbatim to the model server
    #[serde(default)]
    pub input_data: serde_json::Value,
    /// Optional transport overrides
    #[serde(default)]
    pub connection_settings: Option<ConnectionSettings>,
}

/// Transport overrides for one proxied request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    /// Build the URL from the fields below instead of the model status
    #[serde(default)]
    pub use_custom: bool,
    /// http or https (default http)
    #[serde(default)]
    pub protocol: Option<String>,
    /// Target host
    #[serde(default)]
    pub host: Option<String>,
    /// Target port (scheme default when absent)
    #[serde(default, deserialize_with = "optional_port")]
    pub port: Option<u16>,
    /// Request path (the predict path when empty)
    #[serde(default)]
    pub path: Option<String>,
    /// Extra request headers; `Host` sets the virtual host
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
    /// Name resolution overrides
    #[serde(default)]
    pub dns_resolve: Vec<DnsOverride>,
}

/// One request header
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeaderPair {
    /// Header name
    pub key: String,
    /// Header value
    pub value: String,
}

/// Connect to `address` whenever the target is `host:port`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DnsOverride {
    /// Host name as it appears in the target URL
    pub host: String,
    /// Port as it appears in the target URL (or the scheme default)
    #[serde(deserialize_with = "required_port")]
    pub port: u16,
    /// Literal IP address to dial instead
    pub address: String,
}

/// Ports arrive as numbers or strings from different clients
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Text(String),
}

fn optional_port<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawPort>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawPort::Number(n)) => Ok(Some(n)),
        Some(RawPort::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(RawPort::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", s))),
    }
}

fn required_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    optional_port(deserializer)?.ok_or_else(|| serde::de::Error::custom("port is required"))
}

/// Conventional KServe v1 predict path for a model
pub fn predict_path(model: &str) -> String {
    format!("/v1/models/{}:predict", model)
}

/// Target URL built from custom connection settings
pub fn custom_url(settings: &ConnectionSettings, model: &str) -> Result<Url> {
    let protocol = settings
        .protocol
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("http")
        .to_ascii_lowercase();
    if protocol != "http" && protocol != "https" {
        return Err(Error::validation(format!(
            "unsupported protocol '{}', expected http or https",
            protocol
        )));
    }

    let host = settings
        .host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            Error::validation("connectionSettings.host is required when useCustom is set")
        })?;

    let path = match settings.path.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() && p.starts_with('/') => p.to_string(),
        Some(p) if !p.is_empty() => format!("/{}", p),
        _ => predict_path(model),
    };

    let authority = match settings.port {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    Url::parse(&format!("{}://{}{}", protocol, authority, path))
        .map_err(|e| Error::validation(format!("invalid target URL: {}", e)))
}

/// Predict URL on a model's reported external URL
pub fn model_url(external_url: &str, model: &str) -> Result<Url> {
    let mut url = Url::parse(external_url).map_err(|e| {
        Error::ModelNotReady(format!(
            "model '{}' reports an unusable URL '{}': {}",
            model, external_url, e
        ))
    })?;
    url.set_path(&predict_path(model));
    url.set_query(None);
    Ok(url)
}

/// Find the socket to pin for `url`, if an override targets its host and port.
///
/// Every override address is validated even when it does not match, so a
/// malformed entry is reported instead of silently ignored.
pub fn pinned_address(overrides: &[DnsOverride], url: &Url) -> Result<Option<SocketAddr>> {
    let host = url.host_str().unwrap_or_default();
    let port = url.port_or_known_default();

    let mut pinned = None;
    for entry in overrides {
        let ip: IpAddr = entry.address.trim().parse().map_err(|_| {
            Error::validation(format!(
                "dnsResolve address '{}' for host '{}' is not an IP address",
                entry.address, entry.host
            ))
        })?;
        if pinned.is_none()
            && entry.host.trim().eq_ignore_ascii_case(host)
            && Some(entry.port) == port
        {
            pinned = Some(SocketAddr::new(ip, entry.port));
        }
    }
    Ok(pinned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dns(host: &str, port: u16, address: &str) -> DnsOverride {
        DnsOverride {
            host: host.into(),
            port,
            address: address.into(),
        }
    }

    #[test]
    fn custom_url_defaults_protocol_and_path() {
        let settings = ConnectionSettings {
            use_custom: true,
            host: Some("svc".into()),
            ..Default::default()
        };
        let url = custom_url(&settings, "iris").unwrap();
        assert_eq!(url.as_str(), "http://svc/v1/models/iris:predict");
    }

    #[test]
    fn custom_url_uses_given_parts() {
        let settings = ConnectionSettings {
            use_custom: true,
            protocol: Some("HTTPS".into()),
            host: Some("gateway.example.com".into()),
            port: Some(8443),
            path: Some("v2/models/iris/infer".into()),
            ..Default::default()
        };
        let url = custom_url(&settings, "iris").unwrap();
        assert_eq!(
            url.as_str(),
            "https://gateway.example.com:8443/v2/models/iris/infer"
        );
    }

    #[test]
    fn custom_url_requires_host_and_known_protocol() {
        let missing_host = ConnectionSettings {
            use_custom: true,
            ..Default::default()
        };
        assert_eq!(
            custom_url(&missing_host, "iris").unwrap_err().kind(),
            "ValidationError"
        );

        let ftp = ConnectionSettings {
            use_custom: true,
            protocol: Some("ftp".into()),
            host: Some("svc".into()),
            ..Default::default()
        };
        assert_eq!(custom_url(&ftp, "iris").unwrap_err().kind(), "ValidationError");
    }

    #[test]
    fn model_url_replaces_path() {
        let url = model_url("http://iris.tenant-a.example.com/some/where?x=1", "iris").unwrap();
        assert_eq!(
            url.as_str(),
            "http://iris.tenant-a.example.com/v1/models/iris:predict"
        );
    }

    #[test]
    fn override_matches_host_and_default_port() {
        let url = Url::parse("http://svc/v1/models/iris:predict").unwrap();
        let pinned = pinned_address(&[dns("svc", 80, "10.0.0.5")], &url).unwrap();
        assert_eq!(pinned, Some("10.0.0.5:80".parse().unwrap()));
    }

    #[test]
    fn override_ignored_for_other_host_or_port() {
        let url = Url::parse("http://svc:8080/").unwrap();
        let overrides = [dns("svc", 80, "10.0.0.5"), dns("other", 8080, "10.0.0.6")];
        assert_eq!(pinned_address(&overrides, &url).unwrap(), None);
    }

    #[test]
    fn malformed_override_address_is_rejected() {
        let url = Url::parse("http://svc/").unwrap();
        let err = pinned_address(&[dns("elsewhere", 80, "not-an-ip")], &url).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn ports_accept_strings_and_numbers() {
        let settings: ConnectionSettings = serde_json::from_value(json!({
            "useCustom": true,
            "host": "svc",
            "port": "8080",
            "headers": [{"key": "Host", "value": "iris.example.com"}],
            "dnsResolve": [
                {"host": "svc", "port": "80", "address": "10.0.0.5"},
                {"host": "svc", "port": 8080, "address": "10.0.0.6"}
            ]
        }))
        .unwrap();
        assert_eq!(settings.port, Some(8080));
        assert_eq!(settings.dns_resolve[0].port, 80);
        assert_eq!(settings.dns_resolve[1].port, 8080);
        assert_eq!(settings.headers[0].key, "Host");
    }
}
