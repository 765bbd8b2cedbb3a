//! Lookups against the crawler telemetry warehouse
//!
//! Each lookup answers one question with one query against a crawler snapshot table, newest
//! snapshot first. An empty answer is [`WarehouseError::NotFound`], which callers use to walk
//! their fallback chains.

use std::{fmt::Display, net::IpAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::parser::{Neighbor, OutputParser, SwitchportMode};

mod trino;

pub use trino::TrinoWarehouse;

pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseError {
    /// The query ran but returned no rows
    NotFound,
    /// The warehouse or its HTTP front end failed in a way worth retrying
    TransientUpstream(String),
    Query(String),
    Decode(String),
}

impl Display for WarehouseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarehouseError::NotFound => {
                write!(f, "Couldn't find requested information in the warehouse")
            }
            WarehouseError::TransientUpstream(msg) => write!(f, "Upstream failure: {msg}"),
            WarehouseError::Query(msg) => write!(f, "Query failed: {msg}"),
            WarehouseError::Decode(msg) => write!(f, "Unexpected row shape: {msg}"),
        }
    }
}

impl std::error::Error for WarehouseError {}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn exec_query(&self, query: &str) -> Result<Vec<Row>, WarehouseError>;
}

/// A device as the warehouse knows it: management IP and device id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRef {
    pub ip: IpAddr,
    pub hostname: String,
}

/// ARP record of an endpoint on its gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayStep {
    pub device_id: String,
    pub vrf: String,
    pub mac: String,
    pub interface: String,
}

/// Escapes a literal for interpolation between single quotes
pub fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

/// Drops the `services` part of a multi-context device id and everything after it,
/// `fw-01.services.ctx1` becomes `fw-01`.
pub fn normalize_device_id(device_id: &str) -> String {
    device_id
        .split('.')
        .take_while(|part| !part.eq_ignore_ascii_case("services"))
        .collect::<Vec<_>>()
        .join(".")
}

fn text(row: &Row, index: usize) -> Result<String, WarehouseError> {
    match row.get(index) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(Value::Number(value)) => Ok(value.to_string()),
        Some(other) => Err(WarehouseError::Decode(format!(
            "column {index} is {other}, expected text"
        ))),
        None => Err(WarehouseError::Decode(format!("column {index} missing"))),
    }
}

fn ip(row: &Row, index: usize) -> Result<IpAddr, WarehouseError> {
    let value = text(row, index)?;
    value
        .trim()
        .parse()
        .map_err(|_| WarehouseError::Decode(format!("column {index} is not an IP: {value}")))
}

/// Replaces the last octet of an IPv4 address
fn with_last_octet(address: IpAddr, last: u8) -> Option<IpAddr> {
    match address {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            Some(IpAddr::from([a, b, c, last]))
        }
        IpAddr::V6(_) => None,
    }
}

/// Retrying front end for a [`Warehouse`], carrying the lookup vocabulary used by the tracer
pub struct WarehouseClient {
    warehouse: Arc<dyn Warehouse>,
    retry_delays: Vec<Duration>,
}

impl WarehouseClient {
    pub fn new(warehouse: Arc<dyn Warehouse>, retry_delays: Vec<Duration>) -> Self {
        Self {
            warehouse,
            retry_delays,
        }
    }

    /// Runs a query, sleeping through each configured delay on transient failures before
    /// giving up with [`WarehouseError::TransientUpstream`].
    pub async fn query(&self, query: &str) -> Result<Vec<Row>, WarehouseError> {
        let mut delays = self.retry_delays.iter();
        loop {
            match self.warehouse.exec_query(query).await {
                Err(WarehouseError::TransientUpstream(msg)) => match delays.next() {
                    Some(delay) => {
                        warn!("Warehouse unavailable ({msg}), retrying in {delay:?}");
                        tokio::time::sleep(*delay).await;
                    }
                    None => return Err(WarehouseError::TransientUpstream(msg)),
                },
                result => return result,
            }
        }
    }

    async fn first_row(&self, query: &str) -> Result<Row, WarehouseError> {
        self.query(query)
            .await?
            .into_iter()
            .next()
            .ok_or(WarehouseError::NotFound)
    }

    /// Gateway of an endpoint: ARP outside the default VRF, then any ARP entry, then the
    /// `.254`/`.1` convention on the endpoint's /24. `None` when every tier comes up empty.
    pub async fn default_gateway(
        &self,
        endpoint: IpAddr,
    ) -> Result<Option<DeviceRef>, WarehouseError> {
        match self.default_gateway_regular(endpoint).await {
            Err(WarehouseError::NotFound) => {}
            Err(WarehouseError::Decode(msg)) => {
                warn!("Unusable non-default VRF ARP row for {endpoint}: {msg}");
            }
            other => return other.map(Some),
        }
        debug!("No non-default VRF ARP entry for {endpoint}, trying every VRF");
        match self.default_gateway_extended(endpoint).await {
            Err(WarehouseError::NotFound) => {}
            Err(WarehouseError::Decode(msg)) => {
                warn!("Unusable ARP row for {endpoint}: {msg}");
            }
            other => return other.map(Some),
        }
        debug!("No ARP entry for {endpoint}, guessing gateway from its segment");
        match self.default_gateway_by_segment(endpoint).await {
            Err(WarehouseError::NotFound) => Ok(None),
            other => other.map(Some),
        }
    }

    pub async fn default_gateway_regular(
        &self,
        endpoint: IpAddr,
    ) -> Result<DeviceRef, WarehouseError> {
        let row = self
            .first_row(&format!(
                r#"select device_ip, device_id
                from network."crawler-arp-table"
                where ip='{endpoint}' and vrf != 'default'
                order by timestamp desc"#
            ))
            .await?;
        Ok(DeviceRef {
            ip: ip(&row, 0)?,
            hostname: text(&row, 1)?,
        })
    }

    pub async fn default_gateway_extended(
        &self,
        endpoint: IpAddr,
    ) -> Result<DeviceRef, WarehouseError> {
        let row = self
            .first_row(&format!(
                r#"select device_ip, device_id
                from network."crawler-arp-table"
                where ip='{endpoint}'
                order by timestamp desc"#
            ))
            .await?;
        Ok(DeviceRef {
            ip: ip(&row, 0)?,
            hostname: text(&row, 1)?,
        })
    }

    pub async fn default_gateway_by_segment(
        &self,
        endpoint: IpAddr,
    ) -> Result<DeviceRef, WarehouseError> {
        for last in [254, 1] {
            let Some(candidate) = with_last_octet(endpoint, last) else {
                break;
            };
            match self.canonical_ip(candidate).await {
                Err(WarehouseError::NotFound) => continue,
                Err(WarehouseError::Decode(msg)) => {
                    warn!("Unusable inventory row for {candidate}: {msg}");
                    continue;
                }
                other => return other,
            }
        }
        Err(WarehouseError::NotFound)
    }

    /// Device id, VRF, MAC and interface the gateway holds for the endpoint in its ARP table
    pub async fn default_gateway_step(
        &self,
        gateway: IpAddr,
        endpoint: IpAddr,
    ) -> Result<GatewayStep, WarehouseError> {
        let row = self
            .first_row(&format!(
                r#"select device_id, vrf, mac, interface
                from network."crawler-arp-table"
                where device_ip='{gateway}' and ip='{endpoint}'
                order by timestamp desc"#
            ))
            .await?;
        Ok(GatewayStep {
            device_id: text(&row, 0)?,
            vrf: text(&row, 1)?,
            mac: text(&row, 2)?,
            interface: text(&row, 3)?,
        })
    }

    /// Management IP and device id owning a transit interface address
    pub async fn canonical_ip(&self, interface_ip: IpAddr) -> Result<DeviceRef, WarehouseError> {
        let row = self
            .first_row(&format!(
                r#"select ipv4, device_id
                from network."crawler-device-interface-inventory"
                where int_ip='{interface_ip}'
                order by timestamp desc"#
            ))
            .await?;
        Ok(DeviceRef {
            ip: ip(&row, 0)?,
            hostname: text(&row, 1)?,
        })
    }

    /// A physical member of `interface` when it is a port-channel, otherwise `interface` itself
    pub async fn first_physical_interface_if_port_channel(
        &self,
        device_id: &str,
        interface: &str,
    ) -> Result<String, WarehouseError> {
        if !interface.to_lowercase().starts_with("po") {
            return Ok(interface.to_string());
        }
        let row = self
            .first_row(&format!(
                r#"select phyinterface
                from network."crawler-device-portchannels"
                where pointerface='{}' and device_id like '%{}%'
                order by timestamp desc"#,
                quote(interface),
                quote(&normalize_device_id(device_id))
            ))
            .await?;
        text(&row, 0)
    }

    /// Whether the crawled running config puts the interface in access mode
    pub async fn is_access_port(
        &self,
        parser: &dyn OutputParser,
        device_id: &str,
        interface: &str,
    ) -> Result<bool, WarehouseError> {
        // interface names are stored both long and short, match on the numbering only
        let numbering: String = interface
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '/' || *c == '.')
            .collect();
        let row = self
            .first_row(&format!(
                r#"select config_running
                from network."crawler-interface-config"
                where interface like '%{}%' and device_id like '%{}%'
                order by timestamp desc"#,
                quote(&numbering),
                quote(&normalize_device_id(device_id))
            ))
            .await?;
        Ok(parser.switchport_mode(&text(&row, 0)?) == Some(SwitchportMode::Access))
    }

    pub async fn device_name_by_ip(&self, device_ip: IpAddr) -> Result<String, WarehouseError> {
        let row = self
            .first_row(&format!(
                r#"select device_id
                from network."crawler-devices"
                where ipv4='{device_ip}'
                order by timestamp desc
                limit 1"#
            ))
            .await?;
        text(&row, 0)
    }

    pub async fn ip_by_device_name(&self, device_id: &str) -> Result<IpAddr, WarehouseError> {
        let row = self
            .first_row(&format!(
                r#"select ipv4
                from network."crawler-devices"
                where device_id='{}'
                order by timestamp desc"#,
                quote(device_id)
            ))
            .await?;
        ip(&row, 0)
    }

    /// Neighbour recorded by the CDP/LLDP crawler behind a local interface
    pub async fn cdp_neighbor(
        &self,
        device_id: &str,
        interface: &str,
    ) -> Result<Neighbor, WarehouseError> {
        let row = self
            .first_row(&format!(
                r#"select remote_ipv4, remote_device_id
                from network."crawler-cdp-lldp"
                where local_device_id='{}' and local_int like '%{}%'
                order by timestamp desc"#,
                quote(&normalize_device_id(device_id)),
                quote(interface)
            ))
            .await?;
        Ok(Neighbor {
            ip: ip(&row, 0)?,
            device_id: text(&row, 1)?,
        })
    }

    /// Interface a switch learned the MAC on, from the crawled MAC table
    pub async fn mac_table_interface(
        &self,
        device_ip: IpAddr,
        mac: &str,
    ) -> Result<String, WarehouseError> {
        let row = self
            .first_row(&format!(
                r#"select interface
                from network."crawler-mac-table"
                where device_ip='{device_ip}' and mac='{}'
                order by timestamp desc"#,
                quote(mac)
            ))
            .await?;
        text(&row, 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::parser::RegexParser;

    /// Replays canned answers in order and records every query it saw
    struct Replay {
        answers: Mutex<Vec<Result<Vec<Row>, WarehouseError>>>,
        seen: Mutex<Vec<String>>,
    }

    impl Replay {
        fn new(mut answers: Vec<Result<Vec<Row>, WarehouseError>>) -> Arc<Self> {
            answers.reverse();
            Arc::new(Self {
                answers: Mutex::new(answers),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().expect("poisoned").clone()
        }
    }

    #[async_trait]
    impl Warehouse for Replay {
        async fn exec_query(&self, query: &str) -> Result<Vec<Row>, WarehouseError> {
            self.seen.lock().expect("poisoned").push(query.to_string());
            self.answers
                .lock()
                .expect("poisoned")
                .pop()
                .unwrap_or(Err(WarehouseError::NotFound))
        }
    }

    fn client(replay: &Arc<Replay>) -> WarehouseClient {
        WarehouseClient::new(replay.clone(), vec![Duration::ZERO, Duration::ZERO])
    }

    fn addr(value: &str) -> IpAddr {
        value.parse().expect("bad ip")
    }

    #[test]
    fn test_normalize_device_id() {
        assert_eq!(normalize_device_id("fw-dc1.services.ctx2"), "fw-dc1");
        assert_eq!(normalize_device_id("core.dc1.Services.x"), "core.dc1");
        assert_eq!(normalize_device_id("acc-sw-01.campus"), "acc-sw-01.campus");
        assert_eq!(normalize_device_id(""), "");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("o'brien"), "o''brien");
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let replay = Replay::new(vec![
            Err(WarehouseError::TransientUpstream("503".to_string())),
            Err(WarehouseError::TransientUpstream("503".to_string())),
            Ok(vec![vec![json!("ok")]]),
        ]);
        let rows = client(&replay).query("select 1").await.expect("query failed");
        assert_eq!(rows, vec![vec![json!("ok")]]);
        assert_eq!(replay.seen().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_surfaces_after_retries() {
        let replay = Replay::new(vec![
            Err(WarehouseError::TransientUpstream("503".to_string())),
            Err(WarehouseError::TransientUpstream("503".to_string())),
            Err(WarehouseError::TransientUpstream("504".to_string())),
            Ok(vec![vec![json!("too late")]]),
        ]);
        let result = client(&replay).query("select 1").await;
        assert_eq!(
            result,
            Err(WarehouseError::TransientUpstream("504".to_string()))
        );
        assert_eq!(replay.seen().len(), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let replay = Replay::new(vec![Err(WarehouseError::NotFound)]);
        assert_eq!(
            client(&replay).query("select 1").await,
            Err(WarehouseError::NotFound)
        );
        assert_eq!(replay.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_default_gateway_uses_extended_before_segment() {
        let replay = Replay::new(vec![
            Err(WarehouseError::NotFound),
            Ok(vec![vec![json!("10.10.1.1"), json!("dist-sw-01")]]),
        ]);
        let gateway = client(&replay)
            .default_gateway(addr("10.10.1.50"))
            .await
            .expect("lookup failed");

        assert_eq!(
            gateway,
            Some(DeviceRef {
                ip: addr("10.10.1.1"),
                hostname: "dist-sw-01".to_string(),
            })
        );
        let seen = replay.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("vrf != 'default'"));
        assert!(!seen[1].contains("vrf != 'default'"));
        assert!(seen.iter().all(|q| !q.contains("interface-inventory")));
    }

    #[tokio::test]
    async fn test_default_gateway_skips_undecodable_arp_row() {
        let replay = Replay::new(vec![
            Ok(vec![vec![json!(null), json!("dist-sw-01")]]),
            Ok(vec![vec![json!("10.10.1.1"), json!("dist-sw-01")]]),
        ]);
        let gateway = client(&replay)
            .default_gateway(addr("10.10.1.50"))
            .await
            .expect("lookup failed")
            .expect("no gateway");

        assert_eq!(gateway.ip, addr("10.10.1.1"));
        let seen = replay.seen();
        assert_eq!(seen.len(), 2);
        assert!(!seen[1].contains("vrf != 'default'"));
    }

    #[tokio::test]
    async fn test_default_gateway_segment_heuristic() {
        let replay = Replay::new(vec![
            Err(WarehouseError::NotFound),
            Err(WarehouseError::NotFound),
            Err(WarehouseError::NotFound),
            Ok(vec![vec![json!("10.255.0.7"), json!("dist-sw-07")]]),
        ]);
        let gateway = client(&replay)
            .default_gateway(addr("10.20.30.40"))
            .await
            .expect("lookup failed")
            .expect("no gateway");

        assert_eq!(gateway.ip, addr("10.255.0.7"));
        let seen = replay.seen();
        assert!(seen[2].contains("int_ip='10.20.30.254'"));
        assert!(seen[3].contains("int_ip='10.20.30.1'"));
    }

    #[tokio::test]
    async fn test_default_gateway_none_when_all_tiers_fail() {
        let replay = Replay::new(Vec::new());
        let gateway = client(&replay)
            .default_gateway(addr("10.20.30.40"))
            .await
            .expect("lookup failed");
        assert_eq!(gateway, None);
        assert_eq!(replay.seen().len(), 4);
    }

    #[tokio::test]
    async fn test_port_channel_lookup_skips_physical_interfaces() {
        let replay = Replay::new(vec![Ok(vec![vec![json!("Te1/1/1")]])]);
        let client = client(&replay);

        let physical = client
            .first_physical_interface_if_port_channel("sw1.services.a", "Gi1/0/1")
            .await
            .expect("lookup failed");
        assert_eq!(physical, "Gi1/0/1");
        assert!(replay.seen().is_empty());

        let member = client
            .first_physical_interface_if_port_channel("sw1.services.a", "Po1")
            .await
            .expect("lookup failed");
        assert_eq!(member, "Te1/1/1");
        assert!(replay.seen()[0].contains("device_id like '%sw1%'"));
    }

    #[tokio::test]
    async fn test_is_access_port_matches_on_numbering() {
        let replay = Replay::new(vec![Ok(vec![vec![json!(
            "interface GigabitEthernet1/0/1\n switchport mode access\n"
        )]])]);
        let parser = RegexParser::new().expect("Failed to compile patterns");
        let access = client(&replay)
            .is_access_port(&parser, "acc-sw-01", "Gi1/0/1")
            .await
            .expect("lookup failed");
        assert!(access);
        assert!(replay.seen()[0].contains("interface like '%1/0/1%'"));
    }

    #[tokio::test]
    async fn test_bad_row_shape_is_decode_error() {
        let replay = Replay::new(vec![Ok(vec![vec![json!(null), json!("x")]])]);
        let result = client(&replay).canonical_ip(addr("10.0.0.1")).await;
        assert!(matches!(result, Err(WarehouseError::Decode(_))));
    }
}
