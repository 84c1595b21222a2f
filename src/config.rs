//! Configuration resolution: merge defaults, environment, and explicit
//! overrides into a sealed [`Config`] snapshot (spec §3, §4.7 step 1).

use std::net::SocketAddr;
use std::time::Duration;

use crate::address::Endpoint;

const DEFAULT_BEACON_PERIOD_SECS: f64 = 15.0;
const DEFAULT_SERVER_PORT: u16 = 5075;
const DEFAULT_BROADCAST_PORT: u16 = 5076;
const DEFAULT_MAX_ARRAY_BYTES: usize = 16_384;

/// Sealed configuration snapshot. Recognized fields mirror the environment
/// variables in spec §3; all are read once and frozen at construction time
/// — nothing in this crate re-reads the environment after `build()`.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr_list: Vec<SocketAddr>,
    pub auto_addr_list: bool,
    pub beacon_period: Duration,
    pub server_port: u16,
    pub broadcast_port: u16,
    pub max_array_bytes: usize,
    pub ignore_addr_list: Vec<SocketAddr>,
    pub provider_names: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            addr_list: Vec::new(),
            auto_addr_list: true,
            beacon_period: Duration::from_secs_f64(DEFAULT_BEACON_PERIOD_SECS),
            server_port: DEFAULT_SERVER_PORT,
            broadcast_port: DEFAULT_BROADCAST_PORT,
            max_array_bytes: DEFAULT_MAX_ARRAY_BYTES,
            ignore_addr_list: Vec::new(),
            provider_names: vec!["pva".to_string()],
        }
    }
}

impl Config {
    /// Resolves the list of endpoints search ignore rules apply to, against
    /// which inbound search datagrams are checked (spec §4.8 step 1).
    pub fn should_ignore(&self, from: SocketAddr) -> bool {
        self.ignore_addr_list.iter().any(|a| a.ip() == from.ip())
    }

    /// The beacon/search address list this server should advertise on,
    /// unioned with auto-discovered interface broadcast addresses when
    /// `auto_addr_list` is set (spec §4.7 step 8).
    pub fn beacon_addresses(&self) -> Vec<SocketAddr> {
        let mut addrs = self.addr_list.clone();
        if self.auto_addr_list {
            for discovered in discover_broadcast_addresses(self.broadcast_port) {
                if !addrs.contains(&discovered) {
                    addrs.push(discovered);
                }
            }
        }
        addrs
    }
}

/// `Config` assembly: defaults ⟶ environment ⟶ explicit overrides, in that
/// order, following the teacher's `SettingEngine`/`APIBuilder` split between
/// "values holder" and "thing that assembles the holder" (see
/// `ConfigBuilder::build`).
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Overlays values parsed from the recognized `EPICS_PVA_*` /
    /// `EPICS_PVAS_*` environment variables (spec §3). Unset variables leave
    /// the current value untouched.
    pub fn push_env(mut self) -> Self {
        if let Ok(v) = std::env::var("EPICS_PVA_ADDR_LIST") {
            self.config.addr_list = parse_addr_list(&v, self.config.broadcast_port);
        }
        if let Ok(v) = std::env::var("EPICS_PVA_AUTO_ADDR_LIST") {
            self.config.auto_addr_list = parse_bool(&v).unwrap_or(self.config.auto_addr_list);
        }
        if let Ok(v) = std::env::var("EPICS_PVA_BEACON_PERIOD") {
            if let Ok(secs) = v.trim().parse::<f64>() {
                self.config.beacon_period = Duration::from_secs_f64(secs);
            }
        }
        if let Ok(v) = std::env::var("EPICS_PVA_SERVER_PORT") {
            if let Ok(port) = v.trim().parse::<u16>() {
                self.config.server_port = port;
            }
        }
        if let Ok(v) = std::env::var("EPICS_PVA_BROADCAST_PORT") {
            if let Ok(port) = v.trim().parse::<u16>() {
                self.config.broadcast_port = port;
            }
        }
        if let Ok(v) = std::env::var("EPICS_PVA_MAX_ARRAY_BYTES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.config.max_array_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("EPICS_PVAS_IGNORE_ADDR_LIST") {
            self.config.ignore_addr_list = parse_addr_list(&v, self.config.broadcast_port)
                .into_iter()
                .collect();
        }
        if let Ok(v) = std::env::var("EPICS_PVA_PROVIDER_NAMES") {
            self.config.provider_names = v.split_whitespace().map(str::to_string).collect();
        }
        self
    }

    /// Applies an explicit override, taking precedence over both the
    /// default and the environment.
    pub fn with<F: FnOnce(&mut Config)>(mut self, f: F) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_addr_list(v: &str, default_port: u16) -> Vec<SocketAddr> {
    v.split_whitespace()
        .filter_map(|tok| parse_one_addr(tok, default_port))
        .collect()
}

fn parse_one_addr(tok: &str, default_port: u16) -> Option<SocketAddr> {
    if let Ok(addr) = tok.parse::<SocketAddr>() {
        return Some(addr);
    }
    // bare IP without a port: apply the default.
    if let Ok(ip) = tok.parse::<std::net::IpAddr>() {
        return Some(SocketAddr::new(ip, default_port));
    }
    log::warn!("ignoring unparsable address in env list: {tok}");
    None
}

/// Enumerates local interfaces and returns their IPv4 broadcast address at
/// `port`, for `EPICS_PVA_AUTO_ADDR_LIST`.
fn discover_broadcast_addresses(port: u16) -> Vec<SocketAddr> {
    let ifaces = match if_addrs::get_if_addrs() {
        Ok(v) => v,
        Err(e) => {
            log::warn!("failed to enumerate network interfaces: {e}");
            return Vec::new();
        }
    };
    ifaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => v4
                .broadcast
                .map(|b| SocketAddr::new(std::net::IpAddr::V4(b), port)),
            if_addrs::IfAddr::V6(_) => None,
        })
        .collect()
}

/// Convenience used by the transport-registry ignore check to turn a
/// configured ignore entry into the endpoint form used elsewhere.
pub fn as_udp_endpoint(addr: SocketAddr) -> Endpoint {
    Endpoint::udp(addr)
}
