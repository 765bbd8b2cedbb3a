//! Firewall policy/topology service (Tufin SecureTrack REST API)

use std::{fmt::Display, net::IpAddr, time::Duration};

use async_trait::async_trait;
use cidr::IpInet;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, trace, warn};

use crate::config::TopologyConfig;

pub const DIRECTLY_CONNECTED: &str = "DIRECTLY_CONNECTED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    Http(String),
    Status(u16, String),
    Decode(String),
}

impl Display for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyError::Http(msg) => write!(f, "HTTP error: {msg}"),
            TopologyError::Status(code, body) => {
                write!(f, "Failed to retrieve data (HTTP {code}): {body}")
            }
            TopologyError::Decode(msg) => write!(f, "Unexpected response: {msg}"),
        }
    }
}

impl std::error::Error for TopologyError {}

impl From<reqwest::Error> for TopologyError {
    fn from(err: reqwest::Error) -> Self {
        TopologyError::Http(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallInterface {
    pub name: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firewall {
    pub id: serde_json::Value,
    pub name: String,
    pub ip: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<FirewallInterface>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRoute {
    pub route_destination: String,
    #[serde(default)]
    pub next_hop_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextDevice {
    pub name: String,
    #[serde(default)]
    pub routes: Vec<PathRoute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingInterface {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub incoming_vrf: Option<String>,
}

/// One device on a computed path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathDevice {
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub incoming_interfaces: Vec<IncomingInterface>,
    #[serde(default)]
    pub next_devices: Vec<NextDevice>,
    #[serde(default)]
    pub bindings: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResult {
    pub traffic_allowed: bool,
    #[serde(rename = "device_info", default)]
    pub devices: Vec<PathDevice>,
}

#[derive(Deserialize)]
struct PathEnvelope {
    path_calc_results: PathResult,
}

#[derive(Deserialize)]
struct DevicesEnvelope {
    devices: DeviceList,
}

#[derive(Deserialize)]
struct DeviceList {
    #[serde(default)]
    device: Vec<Firewall>,
}

#[derive(Deserialize)]
struct InterfacesEnvelope {
    interfaces: InterfaceList,
}

#[derive(Deserialize)]
struct InterfaceList {
    #[serde(default)]
    interface: Vec<FirewallInterface>,
}

#[derive(Deserialize)]
struct TopologyInterfaces {
    #[serde(default)]
    interface: Vec<FirewallInterface>,
}

#[async_trait]
pub trait FirewallTopology: Send + Sync {
    async fn compute_path(
        &self,
        source: IpAddr,
        destination: IpAddr,
        service: &str,
    ) -> Result<PathResult, TopologyError>;

    async fn list_firewalls(&self) -> Result<Vec<Firewall>, TopologyError>;

    async fn list_firewall_interfaces(
        &self,
        firewall_id: &str,
    ) -> Result<Vec<FirewallInterface>, TopologyError>;

    /// First firewall owning an interface with the given address, interfaces filled in
    async fn find_firewall_by_interface_ip(
        &self,
        interface_ip: IpAddr,
    ) -> Result<Option<Firewall>, TopologyError> {
        let wanted = interface_ip.to_string();
        for mut firewall in self.list_firewalls().await? {
            let id = match &firewall.id {
                serde_json::Value::String(id) => id.clone(),
                other => other.to_string(),
            };
            let interfaces = self.list_firewall_interfaces(&id).await?;
            if interfaces
                .iter()
                .any(|interface| interface.ip.as_deref() == Some(wanted.as_str()))
            {
                debug!("Interface {wanted} belongs to firewall {}", firewall.name);
                firewall.interfaces = interfaces;
                return Ok(Some(firewall));
            }
        }
        Ok(None)
    }
}

pub struct SecureTrackClient {
    client: Client,
    config: TopologyConfig,
}

impl SecureTrackClient {
    pub fn new(config: TopologyConfig) -> Result<Self, TopologyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.url.trim_end_matches('/'))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, TopologyError> {
        let url = self.endpoint(path);
        trace!("GET {url}");
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TopologyError::Status(status.as_u16(), body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| TopologyError::Decode(e.to_string()))
    }
}

#[async_trait]
impl FirewallTopology for SecureTrackClient {
    async fn compute_path(
        &self,
        source: IpAddr,
        destination: IpAddr,
        service: &str,
    ) -> Result<PathResult, TopologyError> {
        let envelope: PathEnvelope = self
            .get(
                "topology/path.json",
                &[
                    ("src", source.to_string()),
                    ("dst", destination.to_string()),
                    ("service", service.to_string()),
                ],
            )
            .await?;
        Ok(envelope.path_calc_results)
    }

    async fn list_firewalls(&self) -> Result<Vec<Firewall>, TopologyError> {
        let envelope: DevicesEnvelope = self.get("devices.json", &[]).await?;
        Ok(envelope
            .devices
            .device
            .into_iter()
            .filter(|device| device.name.to_lowercase().contains("fw"))
            .collect())
    }

    async fn list_firewall_interfaces(
        &self,
        firewall_id: &str,
    ) -> Result<Vec<FirewallInterface>, TopologyError> {
        match self
            .get::<InterfacesEnvelope>(&format!("devices/{firewall_id}/interfaces.json"), &[])
            .await
        {
            Ok(envelope) => Ok(envelope.interfaces.interface),
            Err(err) => {
                warn!("Interface list for {firewall_id} failed ({err}), trying topology interfaces");
                let fallback: TopologyInterfaces = self
                    .get(
                        "devices/topology_interfaces.json",
                        &[("mgmtId", firewall_id.to_string())],
                    )
                    .await?;
                Ok(fallback.interface)
            }
        }
    }
}

fn route_covers(route: &PathRoute, destination: IpAddr) -> bool {
    match route.route_destination.parse::<IpInet>() {
        Ok(inet) => inet.network().contains(&destination),
        Err(_) => route
            .route_destination
            .parse::<IpAddr>()
            .is_ok_and(|address| address == destination),
    }
}

/// Primary chain of devices through a computed path: the first device entered from
/// `source_vrf` (any VRF when `None`), then each next device whose route covers the
/// destination, until the destination is directly connected or the path leaves into a cloud.
pub fn main_route<'a>(
    path: &'a PathResult,
    destination: IpAddr,
    source_vrf: Option<&str>,
) -> Vec<&'a PathDevice> {
    let Some(first) = path.devices.iter().find(|device| {
        device.incoming_interfaces.iter().any(|interface| {
            interface
                .incoming_vrf
                .as_deref()
                .is_some_and(|vrf| source_vrf.is_none_or(|wanted| wanted == vrf))
        })
    }) else {
        return Vec::new();
    };

    let mut chain = vec![first];
    let mut current = first;
    // a device can appear at most once, which bounds the walk on cyclic answers
    while chain.len() <= path.devices.len() {
        if current
            .next_devices
            .iter()
            .any(|next| next.name == DIRECTLY_CONNECTED)
        {
            break;
        }
        let Some(next_name) = current
            .next_devices
            .iter()
            .filter(|next| next.routes.iter().any(|route| route_covers(route, destination)))
            .map(|next| next.name.as_str())
            .last()
        else {
            break;
        };
        if next_name.to_lowercase().contains("cloud") {
            break;
        }
        let Some(next) = path.devices.iter().find(|device| device.name == next_name) else {
            break;
        };
        if chain.iter().any(|seen| std::ptr::eq(*seen, next)) {
            break;
        }
        chain.push(next);
        current = next;
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> PathResult {
        let envelope: PathEnvelope = serde_json::from_str(
            r#"{"path_calc_results": {
                "traffic_allowed": true,
                "device_info": [
                    {"name": "edge-rtr", "type": "router", "vendor": "Cisco",
                     "incomingInterfaces": [{"name": "Gi0/1", "incomingVrf": "GUEST"}],
                     "nextDevices": [{"name": "dc-fw-01", "routes": [{"routeDestination": "10.60.0.0/16", "nextHopIp": "172.16.1.1"}]}],
                     "bindings": []},
                    {"name": "core-rtr", "type": "router", "vendor": "Cisco",
                     "incomingInterfaces": [{"name": "Gi0/2", "incomingVrf": "CORP"}],
                     "nextDevices": [{"name": "dc-fw-01", "routes": [{"routeDestination": "10.60.0.0/16"}]}]},
                    {"name": "dc-fw-01", "type": "mgmt", "vendor": "Checkpoint",
                     "incomingInterfaces": [{"name": "eth1"}],
                     "nextDevices": [
                        {"name": "wan-cloud", "routes": [{"routeDestination": "0.0.0.0/0"}]},
                        {"name": "dc-sw-01", "routes": [{"routeDestination": "10.60.1.0/24"}]}
                     ]},
                    {"name": "dc-sw-01", "type": "router", "vendor": "Cisco",
                     "nextDevices": [{"name": "DIRECTLY_CONNECTED", "routes": []}]}
                ]
            }}"#,
        )
        .expect("Failed to decode path");
        envelope.path_calc_results
    }

    fn names(chain: &[&PathDevice]) -> Vec<String> {
        chain.iter().map(|device| device.name.clone()).collect()
    }

    #[test]
    fn test_main_route_follows_covering_routes() {
        let path = path();
        let destination: IpAddr = "10.60.1.20".parse().expect("bad ip");

        assert_eq!(
            names(&main_route(&path, destination, Some("CORP"))),
            vec!["core-rtr", "dc-fw-01", "dc-sw-01"]
        );
        assert_eq!(
            names(&main_route(&path, destination, None)),
            vec!["edge-rtr", "dc-fw-01", "dc-sw-01"]
        );
    }

    #[test]
    fn test_main_route_stops_at_cloud() {
        let path = path();
        let destination: IpAddr = "8.8.8.8".parse().expect("bad ip");
        assert_eq!(
            names(&main_route(&path, destination, Some("CORP"))),
            vec!["core-rtr", "dc-fw-01"]
        );
    }

    #[test]
    fn test_main_route_unknown_vrf_is_empty() {
        let path = path();
        let destination: IpAddr = "10.60.1.20".parse().expect("bad ip");
        assert!(main_route(&path, destination, Some("NOPE")).is_empty());
    }

    #[test]
    fn test_device_list_decoding() {
        let envelope: DevicesEnvelope = serde_json::from_str(
            r#"{"devices": {"count": 2, "device": [
                {"id": 12, "name": "dc-fw-01", "ip": "10.255.9.1", "vendor": "Checkpoint"},
                {"id": 13, "name": "core-rtr", "ip": "10.255.9.2"}
            ]}}"#,
        )
        .expect("Failed to decode devices");
        assert_eq!(envelope.devices.device.len(), 2);
        assert_eq!(envelope.devices.device[0].id, serde_json::json!(12));
    }
}
