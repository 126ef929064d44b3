//! Network interface enumeration from /sys/class/net.
//!
//! Provides interface names, MAC addresses, link state, and the name-based
//! Wired/Wireless classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Default sysfs directory listing network interfaces.
pub const SYS_CLASS_NET: &str = "/sys/class/net";

/// `IFF_UP` bit of the interface flags.
const IFF_UP: u32 = 0x1;

/// Errors that can occur while enumerating interfaces.
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("failed to list {}: {source}", path.display())]
    ListError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Kind of network connection inferred from an interface name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    Wired,
    Wireless,
}

impl ConnectionType {
    /// Classify an interface by the naming conventions of the kernel and udev.
    pub fn classify(name: &str) -> Option<Self> {
        const WIRED: &[&str] = &["eth", "enp", "ens"];
        const WIRELESS: &[&str] = &["wlan", "wlp", "wls"];

        if WIRED.iter().any(|p| name.contains(p)) {
            Some(Self::Wired)
        } else if WIRELESS.iter().any(|p| name.contains(p)) {
            Some(Self::Wireless)
        } else {
            None
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Wired => write!(f, "Wired"),
            ConnectionType::Wireless => write!(f, "Wireless"),
        }
    }
}

/// One network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    /// Administrative state (IFF_UP).
    pub is_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ConnectionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// Reader for a sysfs network class directory.
#[derive(Debug, Clone)]
pub struct SysNet {
    root: PathBuf,
}

impl Default for SysNet {
    fn default() -> Self {
        Self::new(SYS_CLASS_NET)
    }
}

impl SysNet {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Interface names, sorted, loopback excluded.
    pub fn interface_names(&self) -> Result<Vec<String>, InterfaceError> {
        let entries = fs::read_dir(&self.root).map_err(|source| InterfaceError::ListError {
            path: self.root.clone(),
            source,
        })?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name != "lo")
            .collect();
        names.sort();
        Ok(names)
    }

    /// MAC address of one interface, if readable.
    pub fn mac_address(&self, name: &str) -> Option<String> {
        let path = self.root.join(name).join("address");
        match fs::read_to_string(&path) {
            Ok(content) => content.lines().next().map(|l| l.trim().to_string()),
            Err(err) => {
                trace!(interface = %name, error = %err, "No MAC address");
                None
            }
        }
    }

    /// Whether the interface is administratively up.
    pub fn is_up(&self, name: &str) -> bool {
        let path = self.root.join(name).join("flags");
        fs::read_to_string(path)
            .ok()
            .and_then(|raw| parse_flags(&raw))
            .is_some_and(|flags| flags & IFF_UP != 0)
    }

    /// MAC addresses keyed by interface. Unreadable interfaces are skipped.
    pub fn macs(&self) -> Result<BTreeMap<String, String>, InterfaceError> {
        Ok(self
            .interface_names()?
            .into_iter()
            .filter_map(|name| self.mac_address(&name).map(|mac| (name, mac)))
            .collect())
    }

    /// Full description of every interface.
    pub fn interfaces(&self) -> Result<Vec<InterfaceInfo>, InterfaceError> {
        let infos: Vec<InterfaceInfo> = self
            .interface_names()?
            .into_iter()
            .map(|name| InterfaceInfo {
                is_up: self.is_up(&name),
                kind: ConnectionType::classify(&name),
                mac: self.mac_address(&name),
                name,
            })
            .collect();
        debug!(count = infos.len(), "Enumerated network interfaces");
        Ok(infos)
    }

    /// Distinct connection kinds of the interfaces that are up, in name order.
    pub fn connection_types(&self) -> Result<Vec<ConnectionType>, InterfaceError> {
        Ok(connection_types(&self.interfaces()?))
    }
}

/// Distinct connection kinds across up interfaces, keeping first-seen order.
pub fn connection_types(interfaces: &[InterfaceInfo]) -> Vec<ConnectionType> {
    let mut kinds = Vec::new();
    for kind in interfaces
        .iter()
        .filter(|i| i.is_up)
        .filter_map(|i| i.kind)
    {
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    kinds
}

fn parse_flags(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{Level, info};
    use tracing_subscriber::fmt;

    fn init_test_logging() {
        let _ = fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    fn add_interface(root: &Path, name: &str, mac: Option<&str>, flags: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        if let Some(mac) = mac {
            fs::write(dir.join("address"), format!("{}\n", mac)).unwrap();
        }
        fs::write(dir.join("flags"), format!("{}\n", flags)).unwrap();
    }

    fn fake_sys_net() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        add_interface(dir.path(), "lo", Some("00:00:00:00:00:00"), "0x9");
        add_interface(dir.path(), "eth0", Some("dc:a6:32:00:00:01"), "0x1003");
        add_interface(dir.path(), "wlan0", Some("dc:a6:32:00:00:02"), "0x1003");
        add_interface(dir.path(), "docker0", None, "0x1002");
        dir
    }

    #[test]
    fn test_classify() {
        init_test_logging();
        info!("TEST START: test_classify");

        assert_eq!(ConnectionType::classify("eth0"), Some(ConnectionType::Wired));
        assert_eq!(ConnectionType::classify("enp3s0"), Some(ConnectionType::Wired));
        assert_eq!(ConnectionType::classify("ens5"), Some(ConnectionType::Wired));
        assert_eq!(ConnectionType::classify("wlan0"), Some(ConnectionType::Wireless));
        assert_eq!(ConnectionType::classify("wlp2s0"), Some(ConnectionType::Wireless));
        assert_eq!(ConnectionType::classify("docker0"), None);
        assert_eq!(ConnectionType::classify("tailscale0"), None);

        info!("TEST PASS: test_classify");
    }

    #[test]
    fn test_interface_names_skip_loopback() {
        init_test_logging();
        let dir = fake_sys_net();
        let names = SysNet::new(dir.path()).interface_names().unwrap();
        assert_eq!(names, vec!["docker0", "eth0", "wlan0"]);
    }

    #[test]
    fn test_macs() {
        init_test_logging();
        info!("TEST START: test_macs");

        let dir = fake_sys_net();
        let macs = SysNet::new(dir.path()).macs().unwrap();

        info!(?macs, "RESULT: macs");
        assert_eq!(macs.len(), 2);
        assert_eq!(macs["eth0"], "dc:a6:32:00:00:01");
        assert_eq!(macs["wlan0"], "dc:a6:32:00:00:02");
        assert!(!macs.contains_key("docker0"));

        info!("TEST PASS: test_macs");
    }

    #[test]
    fn test_link_state_from_flags() {
        init_test_logging();
        let dir = fake_sys_net();
        let net = SysNet::new(dir.path());

        assert!(net.is_up("eth0"));
        assert!(!net.is_up("docker0"));
        assert!(!net.is_up("missing0"));
    }

    #[test]
    fn test_connection_types_only_up_and_distinct() {
        init_test_logging();
        info!("TEST START: test_connection_types_only_up_and_distinct");

        let dir = fake_sys_net();
        add_interface(dir.path(), "eth1", None, "0x1003");
        add_interface(dir.path(), "wlan1", None, "0x1002");
        let net = SysNet::new(dir.path());

        let kinds = net.connection_types().unwrap();
        assert_eq!(kinds, vec![ConnectionType::Wired, ConnectionType::Wireless]);

        info!("TEST PASS: test_connection_types_only_up_and_distinct");
    }

    #[test]
    fn test_wired_down_is_not_reported() {
        let interfaces = vec![InterfaceInfo {
            name: "eth0".into(),
            is_up: false,
            kind: Some(ConnectionType::Wired),
            mac: None,
        }];
        assert!(connection_types(&interfaces).is_empty());
    }

    #[test]
    fn test_missing_root_is_error() {
        init_test_logging();
        let net = SysNet::new("/nonexistent/sys/class/net");
        assert!(matches!(
            net.interface_names(),
            Err(InterfaceError::ListError { .. })
        ));
    }

    #[test]
    fn test_parse_flags() {
        assert_eq!(parse_flags("0x1003\n"), Some(0x1003));
        assert_eq!(parse_flags("1003"), Some(0x1003));
        assert_eq!(parse_flags("zz"), None);
    }
}
