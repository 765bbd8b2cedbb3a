use std::{collections::HashMap, net::IpAddr, sync::Arc};

use async_trait::async_trait;
use pathtracer::{
    Credentials,
    brand::{CliSession, DeviceConnector},
    config::{AppConfig, TraceSettings},
    hop::{Hop, HopRole, MacTraceHop, RouteTraceHop, clean_route, indexed},
    parser::{LabelledHop, OutputParser, RegexParser, Resolution, Signal},
    ssh::SshError,
    topology::{Firewall, FirewallInterface, FirewallTopology, PathResult, TopologyError},
    tracer::{TraceServices, TraceStop, Tracer},
    warehouse::{Row, Warehouse, WarehouseClient, WarehouseError},
};
use serde_json::json;

fn ip(value: &str) -> IpAddr {
    value.parse().expect("bad ip")
}

/// Answers any query containing one of the fragments
struct TableWarehouse(HashMap<&'static str, Row>);

#[async_trait]
impl Warehouse for TableWarehouse {
    async fn exec_query(&self, query: &str) -> Result<Vec<Row>, WarehouseError> {
        self.0
            .iter()
            .find(|(fragment, _)| query.contains(*fragment))
            .map(|(_, row)| vec![row.clone()])
            .ok_or(WarehouseError::NotFound)
    }
}

struct NoFirewalls;

#[async_trait]
impl FirewallTopology for NoFirewalls {
    async fn compute_path(
        &self,
        _source: IpAddr,
        _destination: IpAddr,
        _service: &str,
    ) -> Result<PathResult, TopologyError> {
        Err(TopologyError::Status(503, "unavailable".to_string()))
    }

    async fn list_firewalls(&self) -> Result<Vec<Firewall>, TopologyError> {
        Ok(Vec::new())
    }

    async fn list_firewall_interfaces(
        &self,
        _firewall_id: &str,
    ) -> Result<Vec<FirewallInterface>, TopologyError> {
        Ok(Vec::new())
    }
}

#[derive(Clone)]
struct CannedSession(HashMap<String, String>);

#[async_trait]
impl CliSession for CannedSession {
    async fn execute_command(&mut self, command: &str) -> String {
        self.0.get(command).cloned().unwrap_or_default()
    }

    async fn disconnect(&mut self) {}
}

/// Every host is a firewall except the ones with a router script
struct CannedConnector {
    routers: HashMap<IpAddr, CannedSession>,
    firewall: CannedSession,
}

#[async_trait]
impl DeviceConnector for CannedConnector {
    async fn connect_router(
        &self,
        host: IpAddr,
        _credentials: &Credentials,
    ) -> Result<Box<dyn CliSession>, SshError> {
        self.routers
            .get(&host)
            .map(|session| Box::new(session.clone()) as Box<dyn CliSession>)
            .ok_or_else(|| SshError::Authentication(format!("{host} rejected the login")))
    }

    async fn connect_firewall(&self, _host: IpAddr) -> Result<Box<dyn CliSession>, SshError> {
        Ok(Box::new(self.firewall.clone()))
    }
}

fn session(pairs: &[(&str, &str)]) -> CannedSession {
    CannedSession(
        pairs
            .iter()
            .map(|(command, output)| (command.to_string(), output.to_string()))
            .collect(),
    )
}

#[tokio::test]
async fn wan_trace_through_firewall_into_connected_network() {
    // a named VRF is carried onto the firewall without a router login
    let warehouse = TableWarehouse(HashMap::from([(
        "int_ip='172.16.1.1'",
        vec![json!("10.255.9.1"), json!("dc-fw-01")],
    )]));
    let connector = CannedConnector {
        routers: HashMap::from([(
            ip("10.255.0.1"),
            session(&[(
                "sh ip cef vrf CORP 10.60.1.20",
                "10.60.0.0/16, epoch 0\n  nexthop 172.16.1.1 Gi0/0/3\n",
            )]),
        )]),
        firewall: session(&[(
            "show route destination 10.60.1.20",
            "C     10.60.1.0/24      is directly connected, eth3\n",
        )]),
    };
    let services = TraceServices {
        warehouse: Arc::new(WarehouseClient::new(Arc::new(warehouse), Vec::new())),
        topology: Arc::new(NoFirewalls),
        connector: Arc::new(connector),
        parser: Arc::new(RegexParser::new().expect("Failed to compile patterns")),
    };
    let tracer = Tracer::new(
        TraceSettings::default(),
        Credentials::new("netops", "hunter2"),
        services,
    );

    let report = tracer
        .trace_wan_to_lan(ip("10.255.0.1"), "CORP", ip("10.60.1.20"))
        .await;

    assert_eq!(report.trace_id, tracer.trace_id());
    assert_eq!(report.segments.len(), 1);
    assert_eq!(report.segments[0].stop, TraceStop::EndOfPath);
    let roles: Vec<_> = report.hops.iter().map(Hop::role).collect();
    assert_eq!(roles, vec![HopRole::Router, HopRole::Firewall]);

    let value = serde_json::to_value(&report).expect("serialize");
    assert_eq!(value["segments"][0]["stop"], json!({"reason": "end_of_path"}));
    assert_eq!(value["hops"][1]["hop"], json!(2));
    assert_eq!(value["hops"][1]["type"], json!("firewall"));
    assert_eq!(value["hops"][1]["hostname"], json!("dc-fw-01"));
    // no gateway for the destination, so the WAN hops face its /24
    assert_eq!(value["hops"][0]["destination_gateway"], json!("10.60.1.0/24"));
}

#[test]
fn cleaning_keeps_order_and_collapses_adjacent_duplicates() {
    let mac = |address: &str| -> Hop {
        MacTraceHop::new(ip(address), "sw", "0011.2233.4455", None, "Gi1/0/1").into()
    };
    let route = |address: &str| -> Hop {
        RouteTraceHop {
            ip: ip(address),
            destination_network: "10.60.1.20".to_string(),
            vrf: "default".to_string(),
            destination_gateway: "10.60.1.1".to_string(),
            mpls_label: None,
            next_hop_interface_ip: None,
            passed_firewall: false,
            role: HopRole::Router,
            hostname: String::new(),
        }
        .into()
    };

    let cleaned = clean_route(vec![
        mac("10.0.0.1"),
        route("10.0.0.1"),
        route("10.0.0.2"),
        route("10.0.0.1"),
    ]);
    let ips: Vec<_> = cleaned.iter().map(Hop::ip).collect();
    assert_eq!(ips, vec![ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.1")]);
    assert_eq!(cleaned[0].role(), HopRole::Router);

    let positions: Vec<_> = indexed(&cleaned).iter().map(|hop| hop.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
}

#[test]
fn parser_is_usable_through_the_trait_object() {
    let parser: Box<dyn OutputParser> =
        Box::new(RegexParser::new().expect("Failed to compile patterns"));
    assert_eq!(
        parser.cef("10.1.0.0/16\n  nexthop 10.0.0.9 Gi0/1\n"),
        Some(Resolution::NextHop(LabelledHop::new(ip("10.0.0.9"), None)))
    );
    assert_eq!(
        parser.firewall_route("C  10.1.0.0/16  is directly connected, eth2"),
        Some(Resolution::Redirect(Signal::EightTwoHundred))
    );
    assert_eq!(parser.cef("% Invalid input detected at '^' marker."), None);
}

#[test]
fn config_round_trips_through_a_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("pathtracer.json");
    let mut config = AppConfig::default();
    config.trace.max_hops = 12;
    config.trace.lisp_site_vrf = Some("FABRIC".to_string());
    config.save_to_file(&path).expect("Failed to save config");

    let loaded = AppConfig::load_from_file(&path).expect("Failed to load config");
    assert_eq!(loaded.trace.max_hops, 12);
    assert_eq!(loaded.trace.lisp_site_vrf.as_deref(), Some("FABRIC"));
    assert_eq!(loaded.devices.ssh_port, 22);
}
