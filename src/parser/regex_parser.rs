use std::net::IpAddr;

use regex::Regex;
use tracing::trace;

use super::{LabelledHop, Neighbor, OutputParser, Resolution, Signal, SwitchportMode};

const IP: &str = r"\d{1,3}(?:\.\d{1,3}){3}";
const MAC: &str = r"[0-9a-f]{4}\.[0-9a-f]{4}\.[0-9a-f]{4}";
const INTERFACE: &str = r"[A-Za-z][A-Za-z\-]*\d+(?:/\d+){0,4}";

/// Deterministic Cisco IOS / IOS-XE / IOS-XR and Check Point Gaia output parser
pub struct RegexParser {
    ip: Regex,
    cef_next_hop: Regex,
    cef_label: Regex,
    firewall_via: Regex,
    ldp_forwarding: Regex,
    affinity: Regex,
    arp: Regex,
    mac_table: Regex,
    switchport: Regex,
    interface_before_ip: Regex,
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    value.parse().ok()
}

fn parse_label(value: &str) -> Option<u32> {
    value.parse().ok()
}

fn last_bare_ip<'a, I>(tokens: I) -> Option<IpAddr>
where
    I: DoubleEndedIterator<Item = &'a str>,
{
    tokens
        .rev()
        .filter(|token| !token.contains('/'))
        .find_map(|token| parse_ip(token.split(':').next().unwrap_or_default()))
}

impl RegexParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            ip: Regex::new(IP)?,
            cef_next_hop: Regex::new(&format!(r"(?:next hop|nexthop)\s+{IP}"))?,
            cef_label: Regex::new(&format!(
                r"{IP}.*(?:label \[(\d+)\|\d+\]|labels imposed \{{(\d+)|label (\d+)-)"
            ))?,
            firewall_via: Regex::new(&format!(r".\s+{IP}.*via ({IP})"))?,
            ldp_forwarding: Regex::new(&format!(r"{IP}/.*\s(\d+|ImpNull)\s.*\s({IP})(?:\s|$)"))?,
            affinity: Regex::new(r"via\s+([A-Za-z0-9-]+)")?,
            arp: Regex::new(&format!(r"(?i)({MAC}).*\s({INTERFACE}(?:\.\d+)?)"))?,
            mac_table: Regex::new(&format!(r"(?im)\s{MAC}.*\s({INTERFACE})(?:\s|$)"))?,
            switchport: Regex::new(r"switchport mode (trunk|access)")?,
            interface_before_ip: Regex::new(&format!(r"({INTERFACE}(?:\.\d+)?)\s+{IP}"))?,
        })
    }

    fn first_ip(&self, line: &str) -> Option<IpAddr> {
        self.ip.find(line).and_then(|m| parse_ip(m.as_str()))
    }
}

impl OutputParser for RegexParser {
    fn cef(&self, output: &str) -> Option<Resolution> {
        let lines: Vec<&str> = output.lines().collect();
        let mut on_backup_route = false;

        for (index, line) in lines.iter().enumerate() {
            if !on_backup_route && line.split_whitespace().any(|word| word == "backup") {
                on_backup_route = true;
            } else if on_backup_route && line.trim_start().starts_with("via") {
                on_backup_route = false;
            }
            if on_backup_route {
                continue;
            }

            if line.contains("Null0") {
                return Some(Resolution::Redirect(Signal::SdaBorder));
            }
            if line.trim_start().starts_with("receive") {
                return Some(Resolution::Terminate);
            }
            if !self.cef_next_hop.is_match(line) {
                continue;
            }

            if let Some(label_line) = lines.get(index + 1)
                && label_line.contains("label")
            {
                if label_line.contains("ImplNull") {
                    return Some(Resolution::Redirect(Signal::TrafficEngineering));
                }
                continue;
            }

            let Some(ip) = self.first_ip(line) else {
                continue;
            };
            let label = self.cef_label.captures(line).and_then(|caps| {
                caps.iter()
                    .skip(1)
                    .flatten()
                    .find_map(|m| parse_label(m.as_str()))
            });
            trace!("CEF next hop {ip} label {label:?}");
            return Some(Resolution::NextHop(LabelledHop::new(ip, label)));
        }
        None
    }

    fn firewall_route(&self, output: &str) -> Option<Resolution> {
        for line in output.lines() {
            if line.contains("is directly connected") {
                return Some(Resolution::Redirect(Signal::EightTwoHundred));
            }
            if let Some(ip) = self
                .firewall_via
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| parse_ip(m.as_str()))
            {
                return Some(Resolution::NextHop(LabelledHop::new(ip, None)));
            }
        }
        None
    }

    fn mpls_ldp_forwarding(&self, output: &str) -> Option<LabelledHop> {
        output.lines().find_map(|line| {
            let caps = self.ldp_forwarding.captures(line)?;
            let ip = parse_ip(caps.get(2)?.as_str())?;
            let label = caps.get(1).and_then(|m| parse_label(m.as_str()));
            Some(LabelledHop::new(ip, label))
        })
    }

    fn mpls_forwarding(&self, output: &str) -> Option<LabelledHop> {
        let line = output.lines().find(|line| self.ip.is_match(line))?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let label = words.get(1).and_then(|word| parse_label(word));
        let ip = last_bare_ip(words.iter().skip(2).copied())?;
        Some(LabelledHop::new(ip, label))
    }

    fn ldp_binding_prefix(&self, output: &str) -> Option<IpAddr> {
        output
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("lib entry:"))
            .and_then(|line| self.first_ip(line))
    }

    fn te_tunnel_next_hop(&self, output: &str) -> Option<LabelledHop> {
        let line = output.lines().find(|line| self.ip.is_match(line))?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let ip = words.get(3).and_then(|word| parse_ip(word))?;
        let label = words.get(1).and_then(|word| parse_label(word));
        Some(LabelledHop::new(ip, label))
    }

    fn affinity_tag(&self, output: &str) -> Option<String> {
        output.lines().find_map(|line| {
            self.affinity
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
    }

    fn lisp_forwarder(&self, output: &str) -> Option<IpAddr> {
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .find_map(|line| last_bare_ip(line.split_whitespace()))
    }

    fn arp_mac_interface(&self, output: &str) -> Option<(String, String)> {
        let caps = self.arp.captures(output)?;
        Some((
            caps.get(1)?.as_str().to_lowercase(),
            caps.get(2)?.as_str().to_string(),
        ))
    }

    fn mac_table_interface(&self, output: &str) -> Option<String> {
        self.mac_table
            .captures(output)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn cdp_neighbor(&self, output: &str) -> Option<Neighbor> {
        let mut device_id = None;
        let mut ip = None;

        for line in output.lines().map(str::trim) {
            if let Some(value) = line.strip_prefix("Device ID:") {
                device_id.get_or_insert_with(|| value.trim().to_string());
            } else if let Some(value) = line
                .strip_prefix("IPv4 address:")
                .or_else(|| line.strip_prefix("IP address:"))
            {
                // entry addresses come before management addresses
                if ip.is_none() {
                    ip = parse_ip(value.trim());
                }
            }
        }

        match (ip, device_id) {
            (Some(ip), Some(device_id)) if !device_id.is_empty() => {
                Some(Neighbor { ip, device_id })
            }
            _ => None,
        }
    }

    fn lldp_neighbor(&self, output: &str) -> Option<Neighbor> {
        let mut system_name = None;
        let mut chassis_id = None;
        let mut ip = None;
        let mut expect_management_ip = false;

        for line in output.lines().map(str::trim) {
            if let Some(value) = line.strip_prefix("System Name:") {
                let value = value.trim();
                if !value.is_empty() && value != "not advertised" {
                    system_name = Some(value.to_string());
                }
            } else if let Some(value) = line.strip_prefix("Chassis id:") {
                chassis_id = Some(value.trim().to_string());
            } else if line.contains("Management Addresses:") {
                expect_management_ip = true;
            } else if expect_management_ip && let Some(value) = line.strip_prefix("IP:") {
                ip = parse_ip(value.trim());
                expect_management_ip = false;
            }
        }

        Some(Neighbor {
            ip: ip?,
            device_id: system_name.or(chassis_id)?,
        })
    }

    fn switchport_mode(&self, output: &str) -> Option<SwitchportMode> {
        output
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("switchport mode "))
            .find_map(|line| {
                match self.switchport.captures(line)?.get(1)?.as_str() {
                    "access" => Some(SwitchportMode::Access),
                    _ => Some(SwitchportMode::Trunk),
                }
            })
    }

    fn port_channel_member(&self, output: &str) -> Option<String> {
        output
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("Members in this channel:"))
            .and_then(|line| line.split_whitespace().last())
            .filter(|member| !member.ends_with(':'))
            .map(str::to_string)
    }

    fn interface_from_ip_brief(&self, output: &str) -> Option<String> {
        output.lines().find_map(|line| {
            self.interface_before_ip
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
    }

    fn interface_vrf(&self, output: &str) -> Option<String> {
        output
            .lines()
            .filter(|line| {
                let line = line.to_lowercase();
                line.contains("vrf") && !line.contains("description")
            })
            .find_map(|line| line.split_whitespace().last())
            .map(str::to_string)
    }
}
