//! Tunnel configuration documents
//!
//! Each tunnel owns one YAML document in the config directory:
//!
//! ```yaml
//! tunnel: 6ff42ae2-765d-4adf-8112-31c55c1551ef
//! credentials-file: /etc/cloudflared/web.json
//! ingress:
//!   - hostname: web.example.com
//!     service: http://localhost:8080
//!   - service: http_status:404
//! ```
//!
//! The last ingress rule is the catch-all and is the only one without a
//! hostname. Documents are rebuilt and replaced wholesale, never patched.

use std::fs;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TunnelError;
use crate::fsutil;
use crate::types::{is_valid_tunnel_name, TunnelName};

/// Catch-all service used when no fallback is supplied
pub const DEFAULT_FALLBACK: &str = "http_status:404";

/// URL schemes the tunnel binary can proxy to
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "tcp", "ssh", "rdp", "unix"];

/// One hostname → service mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    /// Public hostname; `None` only for the trailing catch-all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Origin service address
    pub service: String,
}

impl IngressRule {
    /// Rule routing `hostname` to `service`
    pub fn route(hostname: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            service: service.into(),
        }
    }

    /// Catch-all rule
    pub fn catch_all(service: impl Into<String>) -> Self {
        Self {
            hostname: None,
            service: service.into(),
        }
    }

    /// Whether this is the hostname-less catch-all
    pub fn is_catch_all(&self) -> bool {
        self.hostname.is_none()
    }
}

/// Per-tunnel configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Stable tunnel identifier assigned by the tunnel backend
    pub tunnel: String,

    /// Credentials artifact for the tunnel
    #[serde(rename = "credentials-file")]
    pub credentials_file: PathBuf,

    /// Ordered ingress rules, catch-all last
    pub ingress: Vec<IngressRule>,
}

impl TunnelConfig {
    /// Public hostname of the first routed rule
    pub fn hostname(&self) -> Option<&str> {
        self.ingress.iter().find_map(|r| r.hostname.as_deref())
    }

    /// Add a routed rule in front of the catch-all
    pub fn with_rule(mut self, hostname: &str, service: &str) -> Result<Self, TunnelError> {
        validate_hostname(hostname)?;
        let service = parse_service(service)?;
        let at = self.ingress.len().saturating_sub(1);
        self.ingress.insert(at, IngressRule::route(hostname, service));
        Ok(self)
    }

    /// Check the catch-all invariant: exactly one, placed last
    pub fn validate(&self) -> Result<(), TunnelError> {
        let catch_alls = self.ingress.iter().filter(|r| r.is_catch_all()).count();
        match self.ingress.last() {
            None => Err(TunnelError::InvalidIngress("no ingress rules".into())),
            Some(last) if !last.is_catch_all() => Err(TunnelError::InvalidIngress(
                "last rule must be a catch-all without hostname".into(),
            )),
            Some(_) if catch_alls > 1 => Err(TunnelError::InvalidIngress(
                "only the last rule may omit its hostname".into(),
            )),
            Some(_) => Ok(()),
        }
    }
}

/// User-supplied parameters for a new tunnel
#[derive(Debug, Clone, Default)]
pub struct TunnelSpec {
    /// Local tunnel name
    pub name: String,
    /// Backend identifier; defaults to the name
    pub tunnel_id: Option<String>,
    /// Public hostname
    pub hostname: String,
    /// Origin service: a port, `host:port` or a URL
    pub service: String,
    /// Catch-all service; defaults to `http_status:404`
    pub fallback: Option<String>,
    /// Credentials artifact; defaults to `<config_dir>/<name>.json`
    pub credentials_file: Option<PathBuf>,
    /// Further `(hostname, service)` routes, in order after the primary one
    pub routes: Vec<(String, String)>,
}

impl TunnelSpec {
    /// Parameters routing `hostname` to `service` for tunnel `name`
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            service: service.into(),
            ..Default::default()
        }
    }
}

/// Build a configuration document from user parameters
///
/// All input is validated before anything is produced.
pub fn generate_config(spec: &TunnelSpec, config_dir: &Path) -> Result<TunnelConfig, TunnelError> {
    let name = TunnelName::new(spec.name.clone())?;
    validate_hostname(&spec.hostname)?;
    let service = parse_service(&spec.service)?;
    let fallback = match spec.fallback.as_deref() {
        Some(f) if !f.trim().is_empty() => parse_service(f)?,
        _ => DEFAULT_FALLBACK.to_string(),
    };

    let tunnel = match spec.tunnel_id.as_deref() {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => name.to_string(),
    };
    let credentials_file = spec
        .credentials_file
        .clone()
        .unwrap_or_else(|| config_dir.join(format!("{}.json", name)));

    let config = TunnelConfig {
        tunnel,
        credentials_file,
        ingress: vec![
            IngressRule::route(spec.hostname.as_str(), service),
            IngressRule::catch_all(fallback),
        ],
    };
    spec.routes
        .iter()
        .try_fold(config, |config, (hostname, service)| config.with_rule(hostname, service))
}

/// Serialize and atomically install a configuration document
pub fn write_config(path: &Path, config: &TunnelConfig) -> Result<(), TunnelError> {
    config.validate()?;
    let yaml = serde_yaml::to_string(config).map_err(|e| TunnelError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })?;
    fsutil::write_atomic(path, yaml.as_bytes())?;
    tracing::debug!("Wrote tunnel config {:?}", path);
    Ok(())
}

/// Read a configuration document
pub fn read_config(path: &Path) -> Result<TunnelConfig, TunnelError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TunnelError::ConfigNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_yaml::from_str(&content).map_err(|e| TunnelError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn config_exists(path: &Path) -> bool {
    path.is_file()
}

/// Delete a configuration document; returns whether one existed
pub fn remove_config(path: &Path) -> io::Result<bool> {
    let removed = fsutil::remove_if_exists(path)?;
    if removed {
        tracing::debug!("Removed tunnel config {:?}", path);
    }
    Ok(removed)
}

/// Names of every tunnel with a configuration document in `dir`, sorted
pub fn list_configured(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yml") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if is_valid_tunnel_name(stem) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Validate DNS hostname syntax
pub fn validate_hostname(hostname: &str) -> Result<(), TunnelError> {
    if is_dns_name(hostname) {
        Ok(())
    } else {
        Err(TunnelError::InvalidHostname(hostname.to_string()))
    }
}

fn is_dns_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        let bytes = label.as_bytes();
        !bytes.is_empty()
            && bytes.len() <= 63
            && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
            && bytes[0] != b'-'
            && bytes[bytes.len() - 1] != b'-'
    })
}

/// Normalize a service address into the URL form the tunnel binary expects
///
/// - `8080` → `http://localhost:8080`
/// - `api.local:3000` → `http://api.local:3000`
/// - `https://host:8443`, `tcp://host:22`, `unix:/run/app.sock`, `http_status:404` kept
pub fn parse_service(input: &str) -> Result<String, TunnelError> {
    let service = input.trim();
    if service.is_empty() {
        return Err(TunnelError::InvalidService(input.to_string()));
    }

    if service.chars().all(|c| c.is_ascii_digit()) {
        let port = parse_port(service)?;
        return Ok(format!("http://localhost:{}", port));
    }

    if let Some(code) = service.strip_prefix("http_status:") {
        return match code.parse::<u16>() {
            Ok(c) if (100..=599).contains(&c) => Ok(service.to_string()),
            _ => Err(TunnelError::InvalidService(input.to_string())),
        };
    }

    if let Some(socket) = service.strip_prefix("unix:") {
        let socket = socket.trim_start_matches("//");
        if socket.is_empty() {
            return Err(TunnelError::InvalidService(input.to_string()));
        }
        return Ok(service.to_string());
    }

    if let Some((scheme, rest)) = service.split_once("://") {
        if !SUPPORTED_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
            return Err(TunnelError::InvalidService(input.to_string()));
        }
        let authority = rest.split('/').next().unwrap_or_default();
        validate_authority(authority, input, false)?;
        return Ok(service.to_string());
    }

    validate_authority(service, input, true)?;
    Ok(format!("http://{}", service))
}

/// Validate `host[:port]`; `port_required` for the scheme-less form
fn validate_authority(authority: &str, input: &str, port_required: bool) -> Result<(), TunnelError> {
    let invalid = || TunnelError::InvalidService(input.to_string());

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (v6, after) = rest.split_once(']').ok_or_else(invalid)?;
        v6.parse::<Ipv6Addr>().map_err(|_| invalid())?;
        match after {
            "" => (None, None),
            p => (None, Some(p.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((h, p)) => (Some(h), Some(p)),
            None => (Some(authority), None),
        }
    };

    if let Some(host) = host {
        if host.parse::<Ipv4Addr>().is_err() && !is_dns_name(host) {
            return Err(invalid());
        }
    }

    match port {
        Some(p) => parse_port(p).map(|_| ()),
        None if port_required => Err(invalid()),
        None => Ok(()),
    }
}

fn parse_port(port: &str) -> Result<u16, TunnelError> {
    match port.parse::<u32>() {
        Ok(p) if (1..=65535).contains(&p) => Ok(p as u16),
        _ => Err(TunnelError::InvalidPort(port.to_string())),
    }
}
