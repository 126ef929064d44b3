//! Home Assistant Supervisor API client.
//!
//! When pistat runs as a Home Assistant add-on the container only sees its
//! own network namespace, so host IP addresses are asked from the Supervisor
//! instead of read locally.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Base URL of the Supervisor as seen from inside an add-on container.
pub const DEFAULT_SUPERVISOR_URL: &str = "http://supervisor";

/// Environment variables through which the Supervisor hands its token to add-ons.
pub const TOKEN_VARS: &[&str] = &["SUPERVISOR_TOKEN", "HASSIO_TOKEN"];

/// Errors from Supervisor requests.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("not running as a Home Assistant add-on (no supervisor token)")]
    NotAnAddon,

    #[error("supervisor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed supervisor response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("supervisor returned result '{result}': {message}")]
    Api { result: String, message: String },
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    #[serde(default)]
    interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
struct NetworkInterface {
    interface: String,
    #[serde(default)]
    ipv4: Option<IpConfig>,
}

#[derive(Debug, Deserialize)]
struct IpConfig {
    #[serde(default)]
    address: Vec<String>,
}

/// Read the add-on token from the process environment.
pub fn token_from_env() -> Option<String> {
    TOKEN_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|token| !token.trim().is_empty())
}

/// Whether the process runs inside a Home Assistant add-on.
pub fn is_homeassistant_addon() -> bool {
    token_from_env().is_some()
}

/// Parse a `/network/info` response into the first IPv4 address per interface.
///
/// Addresses are given in CIDR form (`192.168.1.20/24`); the prefix is dropped.
/// Interfaces with no parseable IPv4 address are omitted.
pub fn parse_network_info(body: &str) -> Result<BTreeMap<String, IpAddr>, SupervisorError> {
    let envelope: Envelope<NetworkInfo> = serde_json::from_str(body)?;
    addresses_from(envelope)
}

fn addresses_from(
    envelope: Envelope<NetworkInfo>,
) -> Result<BTreeMap<String, IpAddr>, SupervisorError> {
    if envelope.result != "ok" {
        return Err(SupervisorError::Api {
            result: envelope.result,
            message: envelope.message.unwrap_or_default(),
        });
    }

    let interfaces = envelope.data.map(|d| d.interfaces).unwrap_or_default();
    Ok(interfaces
        .into_iter()
        .filter_map(|iface| {
            let addr = iface
                .ipv4?
                .address
                .iter()
                .find_map(|cidr| cidr.split('/').next()?.parse::<IpAddr>().ok())?;
            Some((iface.interface, addr))
        })
        .collect())
}

/// Blocking Supervisor client.
#[derive(Debug, Clone)]
pub struct SupervisorClient {
    base_url: String,
    token: String,
    http: reqwest::blocking::Client,
}

impl SupervisorClient {
    /// Build a client using the add-on token from the environment.
    pub fn from_env(base_url: &str, timeout: Duration) -> Result<Self, SupervisorError> {
        let token = token_from_env().ok_or(SupervisorError::NotAnAddon)?;
        Self::new(base_url, token, timeout)
    }

    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SupervisorError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            http,
        })
    }

    /// Host IPv4 addresses keyed by interface name.
    pub fn get_ips(&self) -> Result<BTreeMap<String, IpAddr>, SupervisorError> {
        let url = format!("{}/network/info", self.base_url);
        debug!(url = %url, "Requesting network info from supervisor");

        let body = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()?
            .error_for_status()?
            .text()?;

        let ips = parse_network_info(&body)?;
        info!(count = ips.len(), "Supervisor reported host addresses");
        Ok(ips)
    }
}

/// One-shot HTTP server standing in for the Supervisor in tests.
#[cfg(test)]
pub(crate) mod stub {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Answer a single request with `status` and a JSON `body`.
    ///
    /// Returns the base URL and a handle yielding the raw request head.
    pub(crate) fn serve_once(status: u16, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let body = body.to_string();

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });

        (base_url, handle)
    }
}
