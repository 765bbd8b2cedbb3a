//! Interpretation of raw router, switch and firewall command output
//!
//! Every function here is total: malformed or absent input yields `None`, never an error.
//! Control-flow redirections (fabric borders, TE tunnels, firewall-attached destinations)
//! come back as [`Resolution::Redirect`] values for the tracer to dispatch on.

use std::{fmt::Display, net::IpAddr};

use serde::{Deserialize, Serialize};

mod regex_parser;

pub use regex_parser::RegexParser;

/// Alternate lookup strategy a device's output points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// CEF resolves the destination to Null0: the device is an SDA fabric border, ask LISP.
    SdaBorder,
    /// The next hop's label is implicit-null: follow the traffic-engineering tunnel.
    TrafficEngineering,
    /// The device refused the router dialect; it is most likely a firewall.
    WrongDeviceType,
    /// The firewall owns the destination as a directly connected network.
    EightTwoHundred,
}

impl Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::SdaBorder => write!(f, "SDA border"),
            Signal::TrafficEngineering => write!(f, "traffic engineering tunnel"),
            Signal::WrongDeviceType => write!(f, "wrong device type"),
            Signal::EightTwoHundred => write!(f, "8200 appliance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelledHop {
    pub ip: IpAddr,
    pub label: Option<u32>,
}

impl LabelledHop {
    pub fn new(ip: IpAddr, label: Option<u32>) -> Self {
        Self { ip, label }
    }
}

/// Outcome of resolving a destination on one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    NextHop(LabelledHop),
    /// The device receives the traffic itself; the path ends here.
    Terminate,
    Redirect(Signal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchportMode {
    Access,
    Trunk,
}

/// Directly connected neighbour as reported by CDP or LLDP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub ip: IpAddr,
    pub device_id: String,
}

/// Text-extraction strategy used by the tracer.
///
/// [`RegexParser`] is the deterministic implementation; other strategies can be plugged in
/// per deployment without touching the trace algorithm.
pub trait OutputParser: Send + Sync {
    /// `show ip cef [vrf X] <destination>`
    fn cef(&self, output: &str) -> Option<Resolution>;
    /// `show route destination <destination>` in the firewall shell
    fn firewall_route(&self, output: &str) -> Option<Resolution>;
    /// `show mpls ldp forwarding local-label <label>`
    fn mpls_ldp_forwarding(&self, output: &str) -> Option<LabelledHop>;
    /// `show mpls forwarding labels <label>`
    fn mpls_forwarding(&self, output: &str) -> Option<LabelledHop>;
    /// `show mpls ldp bindings local-label <label>`, returns the LIB prefix address
    fn ldp_binding_prefix(&self, output: &str) -> Option<IpAddr>;
    /// `show mpls forwarding tunnels name <tunnel>`
    fn te_tunnel_next_hop(&self, output: &str) -> Option<LabelledHop>;
    /// `show cef vrf X exact-route <src> <dst>`, returns the tunnel name
    fn affinity_tag(&self, output: &str) -> Option<String>;
    /// `show lisp eid-table vrf X site | i <destination>`
    fn lisp_forwarder(&self, output: &str) -> Option<IpAddr>;
    /// `show arp vrf X | i <ip>`, returns (mac, interface)
    fn arp_mac_interface(&self, output: &str) -> Option<(String, String)>;
    /// `show mac address-table address <mac>`
    fn mac_table_interface(&self, output: &str) -> Option<String>;
    /// `show cdp neighbors <interface> detail`
    fn cdp_neighbor(&self, output: &str) -> Option<Neighbor>;
    /// `show lldp neighbors <interface> detail`
    fn lldp_neighbor(&self, output: &str) -> Option<Neighbor>;
    /// `show running-config interface <interface>`
    fn switchport_mode(&self, output: &str) -> Option<SwitchportMode>;
    /// `show interfaces <port-channel>`, returns the last listed member
    fn port_channel_member(&self, output: &str) -> Option<String>;
    /// `show ip interface brief | i <prefix>`, returns the first interface name
    fn interface_from_ip_brief(&self, output: &str) -> Option<String>;
    /// `show running-config interface <interface> | i vrf`
    fn interface_vrf(&self, output: &str) -> Option<String>;
}

/// Maps a routed sub-interface (`Gi0/0/1.100`) to its parent. VLAN interfaces and plain
/// interfaces have no physical parent to follow and yield `None`.
pub fn physical_from_subinterface(interface: &str) -> Option<String> {
    if interface.to_lowercase().starts_with("vl") {
        return None;
    }
    let (parent, _) = interface.split_once('.')?;
    let mut chars = parent.chars().peekable();
    let mut letters = 0;
    while chars.next_if(|c| c.is_ascii_alphabetic()).is_some() {
        letters += 1;
    }
    let rest: String = chars.collect();
    let numbered = rest
        .split('/')
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    if letters > 0 && numbered {
        Some(parent.to_string())
    } else {
        None
    }
}
