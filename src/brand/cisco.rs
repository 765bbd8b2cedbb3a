//! Live lookups in the Cisco IOS / IOS-XE / IOS-XR dialect

use super::prelude::*;

/// Gateway-side view of an endpoint read from the device itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveGatewayStep {
    pub vrf: String,
    pub mac: String,
    pub vlan: String,
}

/// Rewrites any MAC notation to the dotted form Cisco CLIs expect (`0011.2233.4455`)
pub fn cisco_mac(mac: &str) -> String {
    let hex: String = mac
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if hex.len() != 12 {
        return mac.to_lowercase();
    }
    format!("{}.{}.{}", &hex[0..4], &hex[4..8], &hex[8..12])
}

fn first_three_octets(address: IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}")
        }
        IpAddr::V6(v6) => v6.to_string(),
    }
}

pub struct Cisco<'a> {
    session: &'a mut dyn CliSession,
    parser: &'a dyn OutputParser,
}

impl<'a> Cisco<'a> {
    pub fn new(session: &'a mut dyn CliSession, parser: &'a dyn OutputParser) -> Self {
        Self { session, parser }
    }

    async fn run(&mut self, command: &str) -> String {
        let output = self.session.execute_command(command).await;
        debug!("'{command}' returned {} bytes", output.len());
        trace!("{output}");
        output
    }

    pub async fn mac_table_interface(&mut self, mac: &str) -> Option<String> {
        let output = self
            .run(&format!("sh mac address-table address {}", cisco_mac(mac)))
            .await;
        self.parser.mac_table_interface(&output)
    }

    /// Last member of a port-channel, or the interface itself when it is not one
    pub async fn last_int_in_port_channel(&mut self, interface: &str) -> Option<String> {
        if !interface.to_lowercase().starts_with("po") {
            return Some(interface.to_string());
        }
        let output = self.run(&format!("sh int {interface}")).await;
        self.parser.port_channel_member(&output)
    }

    pub async fn is_access_port(&mut self, interface: &str) -> bool {
        let output = self.run(&format!("sh run int {interface}")).await;
        self.parser.switchport_mode(&output) == Some(SwitchportMode::Access)
    }

    /// CDP neighbour behind an interface, LLDP when CDP is silent
    pub async fn neighbor(&mut self, interface: &str) -> Option<Neighbor> {
        let output = self.run(&format!("sh cdp n {interface} d")).await;
        if let Some(neighbor) = self.parser.cdp_neighbor(&output) {
            return Some(neighbor);
        }
        debug!("No CDP neighbour on {interface}, trying LLDP");
        let output = self
            .run(&format!("sh lldp neighbors {interface} detail"))
            .await;
        self.parser.lldp_neighbor(&output)
    }

    /// CEF lookup; output that is not CEF at all means this is not a router.
    pub async fn cef(&mut self, vrf: &str, destination: IpAddr) -> Resolution {
        let command = if vrf == "default" {
            format!("sh ip cef {destination}")
        } else {
            format!("sh ip cef vrf {vrf} {destination}")
        };
        let output = self.run(&command).await;
        self.parser
            .cef(&output)
            .unwrap_or(Resolution::Redirect(Signal::WrongDeviceType))
    }

    /// Next hop of a label switched path: LDP forwarding (XR), MPLS forwarding, then the
    /// LDP binding prefix resolved through CEF (XE).
    pub async fn mpls_next_hop(&mut self, label: u32) -> Option<LabelledHop> {
        let output = self
            .run(&format!("sh mpls ldp forwarding local-label {label}"))
            .await;
        if let Some(hop) = self.parser.mpls_ldp_forwarding(&output) {
            return Some(hop);
        }

        let output = self.run(&format!("sh mpls forwarding labels {label}")).await;
        if let Some(hop) = self.parser.mpls_forwarding(&output) {
            return Some(hop);
        }

        let output = self
            .run(&format!("sh mpls ldp bindings local-label {label}"))
            .await;
        let prefix = self.parser.ldp_binding_prefix(&output)?;
        let output = self.run(&format!("sh ip cef {prefix}")).await;
        match self.parser.cef(&output) {
            Some(Resolution::NextHop(hop)) => Some(hop),
            _ => None,
        }
    }

    pub async fn lisp_forwarder(&mut self, vrf: &str, destination: IpAddr) -> Option<IpAddr> {
        let output = self
            .run(&format!("sh lisp eid-table vrf {vrf} site | i {destination}"))
            .await;
        self.parser.lisp_forwarder(&output)
    }

    pub async fn traffic_eng_next_hop(
        &mut self,
        vrf: &str,
        source: IpAddr,
        destination: IpAddr,
    ) -> Option<LabelledHop> {
        let output = self
            .run(&format!("sh cef vrf {vrf} exact-route {source} {destination}"))
            .await;
        let tunnel = self.parser.affinity_tag(&output)?;
        let output = self
            .run(&format!("sh mpls forwarding tunnels name {tunnel}"))
            .await;
        self.parser.te_tunnel_next_hop(&output)
    }

    /// VRF of the interface holding `interface_ip`, `default` when none is configured
    pub async fn interface_vrf(&mut self, interface_ip: IpAddr) -> String {
        let output = self.run(&format!("sh ip int br | i {interface_ip}")).await;
        let Some(interface) = self.parser.interface_from_ip_brief(&output) else {
            warn!("No interface holds {interface_ip}, assuming the default VRF");
            return "default".to_string();
        };
        let output = self.run(&format!("sh run int {interface} | i vrf")).await;
        self.parser
            .interface_vrf(&output)
            .unwrap_or_else(|| "default".to_string())
    }

    /// VRF, MAC and VLAN of an endpoint on its gateway, read from the gateway's own tables
    pub async fn default_gateway_step(&mut self, endpoint: IpAddr) -> Option<LiveGatewayStep> {
        let output = self
            .run(&format!("sh ip int br | i {}", first_three_octets(endpoint)))
            .await;
        let vlan = self.parser.interface_from_ip_brief(&output)?;
        let output = self.run(&format!("sh run int {vlan}")).await;
        let vrf = self
            .parser
            .interface_vrf(&output)
            .unwrap_or_else(|| "default".to_string());
        let command = if vrf == "default" {
            format!("show arp | i {endpoint}")
        } else {
            format!("show arp vrf {vrf} | i {endpoint}")
        };
        let output = self.run(&command).await;
        let (mac, _) = self.parser.arp_mac_interface(&output)?;
        Some(LiveGatewayStep { vrf, mac, vlan })
    }
}
