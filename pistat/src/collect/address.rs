//! IP address discovery.
//!
//! Inside a Home Assistant add-on the Supervisor knows the host addresses;
//! everywhere else (or when the Supervisor has nothing to say) each interface
//! is queried with `ifconfig`.

use crate::collect::interfaces::{InterfaceError, SysNet};
use crate::supervisor::SupervisorClient;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::process::Command;
use tracing::{debug, trace, warn};

/// Looks up the address assigned to one interface.
pub trait AddressResolver {
    fn interface_address(&self, name: &str) -> Option<IpAddr>;
}

/// [`AddressResolver`] that runs `ifconfig <name>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ifconfig;

impl Ifconfig {
    /// First `inet` (IPv4) address in `ifconfig` output.
    ///
    /// Handles both the net-tools format (`inet 192.168.1.5  netmask ...`) and
    /// the older `inet addr:192.168.1.5` form.
    pub fn parse_inet(output: &str) -> Option<IpAddr> {
        output.lines().find_map(|line| {
            let mut fields = line.split_whitespace();
            if fields.next()? != "inet" {
                return None;
            }
            let raw = fields.next()?;
            raw.strip_prefix("addr:").unwrap_or(raw).parse().ok()
        })
    }
}

impl AddressResolver for Ifconfig {
    fn interface_address(&self, name: &str) -> Option<IpAddr> {
        let output = match Command::new("ifconfig").arg(name).output() {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                trace!(interface = %name, status = %output.status, "ifconfig failed");
                return None;
            }
            Err(err) => {
                debug!(interface = %name, error = %err, "Could not run ifconfig");
                return None;
            }
        };
        Self::parse_inet(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Addresses of every non-loopback interface known to `net`.
///
/// Interfaces without an address are left out.
pub fn local_ips<R: AddressResolver>(
    net: &SysNet,
    resolver: &R,
) -> Result<BTreeMap<String, IpAddr>, InterfaceError> {
    Ok(net
        .interface_names()?
        .into_iter()
        .filter_map(|name| resolver.interface_address(&name).map(|ip| (name, ip)))
        .collect())
}

/// Host IP addresses keyed by interface.
///
/// Asks the Supervisor first when a client is given. A Supervisor error is
/// logged and, like an empty answer, falls back to the local resolver.
pub fn get_ips<R: AddressResolver>(
    supervisor: Option<&SupervisorClient>,
    net: &SysNet,
    resolver: &R,
) -> Result<BTreeMap<String, IpAddr>, InterfaceError> {
    if let Some(client) = supervisor {
        match client.get_ips() {
            Ok(ips) if !ips.is_empty() => return Ok(ips),
            Ok(_) => debug!("Supervisor returned no addresses, falling back to ifconfig"),
            Err(err) => warn!(error = %err, "Supervisor lookup failed, falling back to ifconfig"),
        }
    }
    local_ips(net, resolver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::stub::serve_once;
    use std::collections::HashMap;
    use std::time::Duration;
    use tracing::{Level, info};
    use tracing_subscriber::fmt;

    fn init_test_logging() {
        let _ = fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    struct FixedResolver(HashMap<&'static str, &'static str>);

    impl AddressResolver for FixedResolver {
        fn interface_address(&self, name: &str) -> Option<IpAddr> {
            self.0.get(name).and_then(|ip| ip.parse().ok())
        }
    }

    fn fake_sys_net(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        dir
    }

    const NET_TOOLS_OUTPUT: &str = "eth0: flags=4163<UP,BROADCAST,RUNNING,MULTICAST>  mtu 1500
        inet 192.168.1.42  netmask 255.255.255.0  broadcast 192.168.1.255
        inet6 fe80::dea6:32ff:fe00:1  prefixlen 64  scopeid 0x20<link>
        ether dc:a6:32:00:00:01  txqueuelen 1000  (Ethernet)
";

    #[test]
    fn test_parse_inet_net_tools() {
        init_test_logging();
        info!("TEST START: test_parse_inet_net_tools");

        let ip = Ifconfig::parse_inet(NET_TOOLS_OUTPUT);
        assert_eq!(ip, Some("192.168.1.42".parse().unwrap()));

        info!("TEST PASS: test_parse_inet_net_tools");
    }

    #[test]
    fn test_parse_inet_busybox() {
        let output = "wlan0     Link encap:Ethernet  HWaddr DC:A6:32:00:00:02\n          inet addr:10.0.0.7  Bcast:10.0.0.255  Mask:255.255.255.0\n";
        assert_eq!(
            Ifconfig::parse_inet(output),
            Some("10.0.0.7".parse().unwrap())
        );
    }

    #[test]
    fn test_parse_inet_ignores_inet6_only() {
        let output = "eth0: flags=4163<UP>\n        inet6 fe80::1  prefixlen 64\n";
        assert_eq!(Ifconfig::parse_inet(output), None);
    }

    #[test]
    fn test_local_ips_drops_unaddressed() {
        init_test_logging();
        info!("TEST START: test_local_ips_drops_unaddressed");

        let dir = fake_sys_net(&["lo", "eth0", "wlan0", "docker0"]);
        let resolver = FixedResolver(HashMap::from([
            ("lo", "127.0.0.1"),
            ("eth0", "192.168.1.42"),
            ("wlan0", ""),
        ]));

        let ips = local_ips(&SysNet::new(dir.path()), &resolver).unwrap();

        info!(?ips, "RESULT: local ips");
        assert_eq!(ips.len(), 1);
        assert_eq!(ips["eth0"], "192.168.1.42".parse::<IpAddr>().unwrap());

        info!("TEST PASS: test_local_ips_drops_unaddressed");
    }

    #[test]
    fn test_get_ips_without_supervisor_uses_resolver() {
        init_test_logging();
        let dir = fake_sys_net(&["eth0"]);
        let resolver = FixedResolver(HashMap::from([("eth0", "10.1.2.3")]));

        let ips = get_ips(None, &SysNet::new(dir.path()), &resolver).unwrap();
        assert_eq!(ips["eth0"], "10.1.2.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_get_ips_falls_back_when_supervisor_unreachable() {
        init_test_logging();
        info!("TEST START: test_get_ips_falls_back_when_supervisor_unreachable");

        let dir = fake_sys_net(&["wlan0"]);
        let resolver = FixedResolver(HashMap::from([("wlan0", "10.0.0.9")]));
        // Port 9 on loopback: connection refused without waiting on the timeout.
        let client =
            SupervisorClient::new("http://127.0.0.1:9", "token", Duration::from_millis(500))
                .unwrap();

        let ips = get_ips(Some(&client), &SysNet::new(dir.path()), &resolver).unwrap();
        assert_eq!(ips["wlan0"], "10.0.0.9".parse::<IpAddr>().unwrap());

        info!("TEST PASS: test_get_ips_falls_back_when_supervisor_unreachable");
    }

    #[test]
    fn test_get_ips_prefers_supervisor_answer() {
        init_test_logging();
        info!("TEST START: test_get_ips_prefers_supervisor_answer");

        let body = r#"{"result": "ok", "data": {"interfaces": [
            {"interface": "end0", "ipv4": {"address": ["192.168.1.20/24"]}}
        ]}}"#;
        let (base_url, request) = serve_once(200, body);
        let client =
            SupervisorClient::new(&base_url, "addon-token", Duration::from_secs(5)).unwrap();
        let dir = fake_sys_net(&["eth0"]);
        let resolver = FixedResolver(HashMap::from([("eth0", "10.9.9.9")]));

        let ips = get_ips(Some(&client), &SysNet::new(dir.path()), &resolver).unwrap();
        let request = request.join().unwrap().to_lowercase();

        info!(?ips, "RESULT: ips");
        assert!(request.starts_with("get /network/info "));
        assert!(request.contains("authorization: bearer addon-token"));
        assert_eq!(ips.len(), 1);
        assert_eq!(ips["end0"], "192.168.1.20".parse::<IpAddr>().unwrap());
        assert!(!ips.contains_key("eth0"));

        info!("TEST PASS: test_get_ips_prefers_supervisor_answer");
    }

    #[test]
    fn test_get_ips_falls_back_on_empty_supervisor_answer() {
        init_test_logging();
        info!("TEST START: test_get_ips_falls_back_on_empty_supervisor_answer");

        let (base_url, request) =
            serve_once(200, r#"{"result": "ok", "data": {"interfaces": []}}"#);
        let client =
            SupervisorClient::new(&base_url, "addon-token", Duration::from_secs(5)).unwrap();
        let dir = fake_sys_net(&["eth0"]);
        let resolver = FixedResolver(HashMap::from([("eth0", "10.9.9.9")]));

        let ips = get_ips(Some(&client), &SysNet::new(dir.path()), &resolver).unwrap();
        request.join().unwrap();

        assert_eq!(ips.len(), 1);
        assert_eq!(ips["eth0"], "10.9.9.9".parse::<IpAddr>().unwrap());

        info!("TEST PASS: test_get_ips_falls_back_on_empty_supervisor_answer");
    }
}
