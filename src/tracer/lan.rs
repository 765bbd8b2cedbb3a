//! Following an endpoint's MAC address from its gateway down to the access port

use std::{collections::HashSet, net::IpAddr};

use tracing::{debug, error, info, instrument, warn};

use super::{SegmentOutcome, TraceStop, Tracer};
use crate::{
    PathTracerError,
    brand::{
        CliSession,
        cisco::{Cisco, cisco_mac},
    },
    hop::{Hop, MacTraceHop},
    parser::physical_from_subinterface,
    warehouse::{WarehouseError, normalize_device_id},
};

#[derive(Debug, Clone)]
pub struct LanSegment {
    /// Gateway first, access switch last
    pub hops: Vec<Hop>,
    /// VRF the gateway holds the endpoint in, empty when the segment never started
    pub vrf: String,
    pub stop: TraceStop,
}

impl LanSegment {
    pub(crate) fn outcome(&self, segment: &str) -> SegmentOutcome {
        SegmentOutcome {
            segment: segment.to_string(),
            stop: self.stop.clone(),
            hop_count: self.hops.len(),
        }
    }
}

/// Where the walk goes after a switch
enum MacStep {
    AccessPort,
    Neighbor {
        ip: IpAddr,
        device_id: String,
        transit: IpAddr,
    },
}

struct SwitchVisit<'a> {
    ip: IpAddr,
    device_id: &'a str,
    mac: &'a str,
    interface: Option<String>,
    transit: Option<IpAddr>,
}

impl Tracer {
    /// MAC trace from `gateway` towards `endpoint`, returning the switches crossed and the
    /// endpoint's VRF on the gateway.
    #[instrument(skip(self), fields(trace_id = %self.trace_id), level = "info")]
    pub async fn trace_lan_segment(&self, endpoint: IpAddr, gateway: IpAddr) -> LanSegment {
        let (device_id, mac, interface, vrf) =
            match self.warehouse().default_gateway_step(gateway, endpoint).await {
                Ok(step) => (step.device_id, step.mac, step.interface, step.vrf),
                Err(err) => {
                    warn!("No ARP record of {endpoint} on {gateway} ({err}), asking the gateway");
                    match self.live_gateway_step(gateway, endpoint).await {
                        Ok(step) => step,
                        Err(err) => {
                            error!("Cannot start LAN trace from {gateway}: {err}");
                            return LanSegment {
                                hops: Vec::new(),
                                vrf: String::new(),
                                stop: TraceStop::Aborted(err.to_string()),
                            };
                        }
                    }
                }
            };
        let vrf = if vrf.is_empty() {
            "default".to_string()
        } else {
            vrf
        };

        let mut hops = Vec::new();
        let mut visited = HashSet::from([gateway]);
        let mut current = gateway;
        let mut current_id = device_id;
        let mut interface = physical_from_subinterface(&interface);
        let mut transit = None;

        let stop = loop {
            if let Some(stop) = self.budget_exhausted(hops.len()) {
                break stop;
            }
            let visit = SwitchVisit {
                ip: current,
                device_id: &current_id,
                mac: &mac,
                interface: interface.take(),
                transit,
            };
            let visited_switch =
                tokio::time::timeout_at(self.deadline, self.visit_switch(&mut hops, visit)).await;
            let step = match visited_switch {
                Ok(step) => step,
                Err(_) => break TraceStop::DeadlineExceeded,
            };
            match step {
                Ok(MacStep::AccessPort) => break TraceStop::Completed,
                Ok(MacStep::Neighbor {
                    ip,
                    device_id,
                    transit: neighbor_transit,
                }) => {
                    if !visited.insert(ip) {
                        warn!("MAC trace returned to {ip}, stopping");
                        break TraceStop::LoopDetected;
                    }
                    current = ip;
                    current_id = device_id;
                    transit = Some(neighbor_transit);
                }
                Err(err) => {
                    error!("MAC trace stopped at {current}: {err}");
                    break TraceStop::Aborted(err.to_string());
                }
            }
        };
        debug!("LAN segment from {gateway} stopped: {stop}");
        LanSegment { hops, vrf, stop }
    }

    /// Device id, MAC, interface and VRF read from the gateway itself
    async fn live_gateway_step(
        &self,
        gateway: IpAddr,
        endpoint: IpAddr,
    ) -> Result<(String, String, String, String), PathTracerError> {
        let mut session = self
            .services
            .connector
            .connect_router(gateway, &self.credentials)
            .await?;
        let step = Cisco::new(session.as_mut(), self.parser())
            .default_gateway_step(endpoint)
            .await;
        session.disconnect().await;
        let step = step.ok_or_else(|| {
            PathTracerError::Generic(format!("{gateway} has no ARP entry for {endpoint}"))
        })?;
        let device_id = self
            .warehouse()
            .device_name_by_ip(gateway)
            .await
            .unwrap_or_else(|_| gateway.to_string());
        Ok((device_id, step.mac, step.vlan, step.vrf))
    }

    async fn visit_switch(
        &self,
        hops: &mut Vec<Hop>,
        visit: SwitchVisit<'_>,
    ) -> Result<MacStep, PathTracerError> {
        let mut session = self
            .services
            .connector
            .connect_router(visit.ip, &self.credentials)
            .await?;
        let result = self.resolve_switch(session.as_mut(), hops, visit).await;
        session.disconnect().await;
        result
    }

    async fn resolve_switch(
        &self,
        session: &mut dyn CliSession,
        hops: &mut Vec<Hop>,
        visit: SwitchVisit<'_>,
    ) -> Result<MacStep, PathTracerError> {
        let mut cisco = Cisco::new(session, self.parser());

        let interface = match visit.interface {
            Some(interface) => interface,
            None => {
                let learned = match cisco.mac_table_interface(visit.mac).await {
                    Some(interface) => interface,
                    None => {
                        self.warehouse()
                            .mac_table_interface(visit.ip, &cisco_mac(visit.mac))
                            .await?
                    }
                };
                match self
                    .warehouse()
                    .first_physical_interface_if_port_channel(visit.device_id, &learned)
                    .await
                {
                    Ok(physical) => physical,
                    Err(err) => {
                        debug!("Port-channel lookup for {learned} failed ({err}), asking the switch");
                        cisco.last_int_in_port_channel(&learned).await.ok_or_else(|| {
                            PathTracerError::Generic(format!(
                                "no member found for {learned} on {}",
                                visit.ip
                            ))
                        })?
                    }
                }
            }
        };

        let hop = MacTraceHop::new(
            visit.ip,
            visit.device_id,
            cisco_mac(visit.mac),
            visit.transit,
            &interface,
        );
        info!("Mac: {} {} via {}", hop.ip, hop.device_id, hop.next_hop_interface);
        hops.push(hop.into());

        let access = match self
            .warehouse()
            .is_access_port(self.parser(), visit.device_id, &interface)
            .await
        {
            Ok(access) => access,
            Err(err) => {
                debug!("No crawled config for {interface} ({err}), reading it live");
                cisco.is_access_port(&interface).await
            }
        };
        if access {
            return Ok(MacStep::AccessPort);
        }

        let neighbor = match cisco.neighbor(&interface).await {
            Some(neighbor) => neighbor,
            None => {
                self.warehouse()
                    .cdp_neighbor(visit.device_id, &interface)
                    .await?
            }
        };
        let ip = match self.warehouse().canonical_ip(neighbor.ip).await {
            Ok(device) => device.ip,
            Err(WarehouseError::NotFound) => {
                self.warehouse()
                    .ip_by_device_name(&normalize_device_id(&neighbor.device_id))
                    .await?
            }
            Err(err) => return Err(err.into()),
        };
        Ok(MacStep::Neighbor {
            ip,
            device_id: neighbor.device_id,
            transit: neighbor.ip,
        })
    }
}
