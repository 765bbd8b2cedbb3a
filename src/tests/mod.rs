
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    Credentials,
    brand::{CliSession, DeviceConnector},
    config::TraceSettings,
    parser::RegexParser,
    ssh::SshError,
    topology::{Firewall, FirewallInterface, FirewallTopology, PathResult, TopologyError},
    tracer::{TraceServices, Tracer},
    warehouse::{Row, Warehouse, WarehouseClient, WarehouseError},
};

pub(crate) fn ip(value: &str) -> IpAddr {
    value.parse().expect("bad ip")
}

pub(crate) fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("src/tests/{name}")).expect("Failed to read fixture")
}

/// Device session answering from a command → output table, empty output otherwise
#[derive(Clone, Default)]
pub(crate) struct ScriptedSession {
    outputs: HashMap<String, String>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, command: &str, output: &str) -> Self {
        self.outputs.insert(command.to_string(), output.to_string());
        self
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl CliSession for ScriptedSession {
    async fn execute_command(&mut self, command: &str) -> String {
        self.commands
            .lock()
            .expect("poisoned")
            .push(command.to_string());
        self.outputs.get(command).cloned().unwrap_or_default()
    }

    async fn disconnect(&mut self) {}
}

/// Hands out scripted sessions per host; hosts without a router script refuse the login
#[derive(Default)]
pub(crate) struct FakeConnector {
    routers: HashMap<IpAddr, ScriptedSession>,
    firewalls: HashMap<IpAddr, ScriptedSession>,
    logins: Arc<Mutex<Vec<(IpAddr, String)>>>,
}

impl FakeConnector {
    pub(crate) fn router(mut self, host: &str, session: ScriptedSession) -> Self {
        self.routers.insert(ip(host), session);
        self
    }

    pub(crate) fn firewall(mut self, host: &str, session: ScriptedSession) -> Self {
        self.firewalls.insert(ip(host), session);
        self
    }

    /// Host and username of every router login attempt
    pub(crate) fn login_log(&self) -> Arc<Mutex<Vec<(IpAddr, String)>>> {
        self.logins.clone()
    }
}

#[async_trait]
impl DeviceConnector for FakeConnector {
    async fn connect_router(
        &self,
        host: IpAddr,
        credentials: &Credentials,
    ) -> Result<Box<dyn CliSession>, SshError> {
        self.logins
            .lock()
            .expect("poisoned")
            .push((host, credentials.username.clone()));
        match self.routers.get(&host) {
            Some(session) => Ok(Box::new(session.clone())),
            None => Err(SshError::Authentication(format!("{host} refused"))),
        }
    }

    async fn connect_firewall(&self, host: IpAddr) -> Result<Box<dyn CliSession>, SshError> {
        match self.firewalls.get(&host) {
            Some(session) => Ok(Box::new(session.clone())),
            None => Err(SshError::Connection(format!("{host} unreachable"))),
        }
    }
}

/// Answers a query with the rows of the first rule whose fragments all appear in it
#[derive(Default)]
pub(crate) struct FakeWarehouse {
    rules: Vec<(Vec<String>, Vec<Row>)>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl FakeWarehouse {
    pub(crate) fn answer(mut self, fragments: &[impl AsRef<str>], row: Row) -> Self {
        self.rules.push((
            fragments.iter().map(|f| f.as_ref().to_string()).collect(),
            vec![row],
        ));
        self
    }

    pub(crate) fn query_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.queries.clone()
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn exec_query(&self, query: &str) -> Result<Vec<Row>, WarehouseError> {
        self.queries
            .lock()
            .expect("poisoned")
            .push(query.to_string());
        self.rules
            .iter()
            .find(|(fragments, _)| fragments.iter().all(|f| query.contains(f.as_str())))
            .map(|(_, rows)| rows.clone())
            .ok_or(WarehouseError::NotFound)
    }
}

#[derive(Default)]
pub(crate) struct FakeTopology {
    firewalls: Vec<Firewall>,
}

impl FakeTopology {
    pub(crate) fn firewall(
        mut self,
        id: u32,
        name: &str,
        mgmt_ip: &str,
        interfaces: &[&str],
    ) -> Self {
        self.firewalls.push(Firewall {
            id: serde_json::json!(id),
            name: name.to_string(),
            ip: Some(mgmt_ip.to_string()),
            interfaces: interfaces
                .iter()
                .map(|address| FirewallInterface {
                    name: None,
                    ip: Some(address.to_string()),
                })
                .collect(),
        });
        self
    }
}

#[async_trait]
impl FirewallTopology for FakeTopology {
    async fn compute_path(
        &self,
        _source: IpAddr,
        _destination: IpAddr,
        _service: &str,
    ) -> Result<PathResult, TopologyError> {
        Err(TopologyError::Status(404, "no path".to_string()))
    }

    async fn list_firewalls(&self) -> Result<Vec<Firewall>, TopologyError> {
        Ok(self
            .firewalls
            .iter()
            .map(|firewall| Firewall {
                interfaces: Vec::new(),
                ..firewall.clone()
            })
            .collect())
    }

    async fn list_firewall_interfaces(
        &self,
        firewall_id: &str,
    ) -> Result<Vec<FirewallInterface>, TopologyError> {
        Ok(self
            .firewalls
            .iter()
            .find(|firewall| firewall.id.to_string() == firewall_id)
            .map(|firewall| firewall.interfaces.clone())
            .unwrap_or_default())
    }
}

pub(crate) fn tracer(
    warehouse: FakeWarehouse,
    connector: FakeConnector,
    topology: FakeTopology,
    settings: TraceSettings,
) -> Tracer {
    let services = TraceServices {
        warehouse: Arc::new(WarehouseClient::new(Arc::new(warehouse), Vec::new())),
        topology: Arc::new(topology),
        connector: Arc::new(connector),
        parser: Arc::new(RegexParser::new().expect("Failed to compile patterns")),
    };
    Tracer::new(settings, Credentials::new("netops", "hunter2"), services)
}
