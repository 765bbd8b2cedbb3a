//! Records of traversed devices, in discovered-path order

use std::{fmt::Display, net::IpAddr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopRole {
    Switch,
    Router,
    Firewall,
}

impl Display for HopRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HopRole::Switch => write!(f, "switch"),
            HopRole::Router => write!(f, "router"),
            HopRole::Firewall => write!(f, "firewall"),
        }
    }
}

/// One switch crossed while following an endpoint MAC address through the LAN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacTraceHop {
    /// Management IP of the switch
    pub ip: IpAddr,
    pub device_id: String,
    /// MAC in the dotted Cisco notation (`aabb.ccdd.eeff`)
    pub destination_mac: String,
    /// Transit IP the previous switch reported for this one over CDP
    pub next_hop_interface_ip: Option<IpAddr>,
    /// Physical interface the MAC is learned on
    pub next_hop_interface: String,
    #[serde(rename = "type")]
    pub role: HopRole,
}

impl MacTraceHop {
    pub fn new(
        ip: IpAddr,
        device_id: impl Into<String>,
        destination_mac: impl Into<String>,
        next_hop_interface_ip: Option<IpAddr>,
        next_hop_interface: impl Into<String>,
    ) -> Self {
        Self {
            ip,
            device_id: device_id.into(),
            destination_mac: destination_mac.into(),
            next_hop_interface_ip,
            next_hop_interface: next_hop_interface.into(),
            role: HopRole::Switch,
        }
    }
}

/// One router or firewall crossed while following a destination network through the WAN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTraceHop {
    pub ip: IpAddr,
    pub destination_network: String,
    pub vrf: String,
    /// Gateway of the destination endpoint, or its /24 when the gateway is unknown
    pub destination_gateway: String,
    pub mpls_label: Option<u32>,
    /// Transit IP this device was reached on
    pub next_hop_interface_ip: Option<IpAddr>,
    pub passed_firewall: bool,
    #[serde(rename = "type")]
    pub role: HopRole,
    pub hostname: String,
}

impl RouteTraceHop {
    pub(crate) fn mark_firewall(&mut self) {
        self.role = HopRole::Firewall;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hop {
    Mac(MacTraceHop),
    Route(RouteTraceHop),
}

impl Hop {
    pub fn ip(&self) -> IpAddr {
        match self {
            Hop::Mac(hop) => hop.ip,
            Hop::Route(hop) => hop.ip,
        }
    }

    pub fn role(&self) -> HopRole {
        match self {
            Hop::Mac(hop) => hop.role,
            Hop::Route(hop) => hop.role,
        }
    }
}

impl From<MacTraceHop> for Hop {
    fn from(hop: MacTraceHop) -> Self {
        Hop::Mac(hop)
    }
}

impl From<RouteTraceHop> for Hop {
    fn from(hop: RouteTraceHop) -> Self {
        Hop::Route(hop)
    }
}

/// A hop together with its 1-based position, the way hops are handed to callers
#[derive(Debug, Serialize)]
pub struct IndexedHop<'a> {
    #[serde(flatten)]
    pub hop: &'a Hop,
    #[serde(rename = "hop")]
    pub position: usize,
}

pub fn indexed<'a, I>(hops: I) -> Vec<IndexedHop<'a>>
where
    I: IntoIterator<Item = &'a Hop>,
{
    hops.into_iter()
        .enumerate()
        .map(|(index, hop)| IndexedHop {
            hop,
            position: index + 1,
        })
        .collect()
}

/// Collapses runs of adjacent hops on the same device, keeping the last record of each run.
pub fn clean_route(route: Vec<Hop>) -> Vec<Hop> {
    let mut cleaned: Vec<Hop> = Vec::with_capacity(route.len());
    for hop in route {
        if cleaned.last().is_some_and(|last| last.ip() == hop.ip()) {
            cleaned.pop();
        }
        cleaned.push(hop);
    }
    cleaned
}

/// Same as [`clean_route`] but keeps the first record of each run.
pub fn clean_route_keep_first(route: Vec<Hop>) -> Vec<Hop> {
    let mut cleaned: Vec<Hop> = Vec::with_capacity(route.len());
    for hop in route {
        if cleaned.last().is_none_or(|last| last.ip() != hop.ip()) {
            cleaned.push(hop);
        }
    }
    cleaned
}
