//! Following a destination network router by router across the WAN

use std::net::IpAddr;

use tracing::{debug, error, info, instrument, warn};

use super::{SegmentOutcome, TraceStop, Tracer};
use crate::{
    PathTracerError,
    brand::{checkpoint::CheckPoint, cisco::Cisco},
    hop::{Hop, HopRole, RouteTraceHop},
    parser::{LabelledHop, Resolution, Signal},
    warehouse::WarehouseError,
};

#[derive(Debug, Clone)]
pub struct WanSegment {
    pub hops: Vec<Hop>,
    pub stop: TraceStop,
}

impl WanSegment {
    pub(crate) fn outcome(&self, segment: &str) -> SegmentOutcome {
        SegmentOutcome {
            segment: segment.to_string(),
            stop: self.stop.clone(),
            hop_count: self.hops.len(),
        }
    }
}

/// Mutable part of the traversal, rebuilt for every hop
#[derive(Debug, Clone)]
struct RouteContext {
    current: IpAddr,
    vrf: String,
    label: Option<u32>,
    transit: Option<IpAddr>,
    passed_firewall: bool,
    hostname: String,
}

/// What a hop says about the next one
enum RouteStep {
    Next { hop: LabelledHop, firewall: bool },
    End { firewall: bool },
}

/// Identity of a forwarding decision; seeing one twice means the route loops
type ForwardingState = (IpAddr, String, Option<u32>);

impl Tracer {
    /// Route trace from `source_gateway` until the destination network is reached.
    #[instrument(skip(self), fields(trace_id = %self.trace_id), level = "info")]
    pub async fn trace_wan_segment(
        &self,
        source: IpAddr,
        source_gateway: IpAddr,
        destination: IpAddr,
        vrf: &str,
        destination_gateway: &str,
        hostname: &str,
    ) -> WanSegment {
        let mut hops: Vec<Hop> = Vec::new();
        let mut history: Vec<ForwardingState> = Vec::new();
        let mut context = RouteContext {
            current: source_gateway,
            vrf: if vrf.is_empty() {
                "default".to_string()
            } else {
                vrf.to_string()
            },
            label: None,
            transit: None,
            passed_firewall: false,
            hostname: hostname.to_string(),
        };

        let stop = loop {
            if context.transit == Some(destination) {
                break TraceStop::Completed;
            }
            if let Some(stop) = self.budget_exhausted(hops.len()) {
                break stop;
            }

            if context.hostname.is_empty()
                && let Ok(name) = self.warehouse().device_name_by_ip(context.current).await
            {
                context.hostname = name;
            }
            let hop = RouteTraceHop {
                ip: context.current,
                destination_network: destination.to_string(),
                vrf: context.vrf.clone(),
                destination_gateway: destination_gateway.to_string(),
                mpls_label: context.label,
                next_hop_interface_ip: context.transit,
                passed_firewall: context.passed_firewall,
                role: HopRole::Router,
                hostname: context.hostname.clone(),
            };
            info!(
                "Route: {} ({}) vrf {} label {:?}",
                hop.ip, hop.hostname, hop.vrf, hop.mpls_label
            );
            hops.push(hop.into());

            let state = (context.current, context.vrf.clone(), context.label);
            let window = self.settings.loop_window;
            if history.iter().rev().take(window).any(|seen| *seen == state) {
                warn!("{} repeats within the last {window} hops", context.current);
                break TraceStop::LoopDetected;
            }
            history.push(state);

            let advanced = tokio::time::timeout_at(
                self.deadline,
                self.advance(&mut hops, &mut context, source, destination),
            )
            .await;
            match advanced {
                Ok(Ok(None)) => {}
                Ok(Ok(Some(stop))) => break stop,
                Ok(Err(err)) => {
                    error!("Route trace stopped at {}: {err}", context.current);
                    break TraceStop::Aborted(err.to_string());
                }
                Err(_) => break TraceStop::DeadlineExceeded,
            }
        };
        debug!("WAN segment from {source_gateway} stopped: {stop}");
        WanSegment { hops, stop }
    }

    /// Resolves the next hop and moves `context` onto it, or returns why the walk ends here.
    async fn advance(
        &self,
        hops: &mut [Hop],
        context: &mut RouteContext,
        source: IpAddr,
        destination: IpAddr,
    ) -> Result<Option<TraceStop>, PathTracerError> {
        let step = self.resolve_route(context, source, destination).await?;
        let firewall = match step {
            RouteStep::Next { firewall, .. } | RouteStep::End { firewall } => firewall,
        };
        if firewall && let Some(Hop::Route(last)) = hops.last_mut() {
            last.mark_firewall();
        }
        let next = match step {
            RouteStep::End { .. } => return Ok(Some(TraceStop::EndOfPath)),
            RouteStep::Next { hop, .. } => hop,
        };

        let (next_ip, hostname) = self.management_identity(next.ip).await?;

        let vrf = if firewall || context.vrf == "default" {
            match self.ingress_vrf(next_ip, next.ip).await {
                Ok(vrf) => vrf,
                Err(err) => {
                    error!("Cannot read the VRF of {} on {next_ip}: {err}", next.ip);
                    return Ok(Some(TraceStop::Aborted(err.to_string())));
                }
            }
        } else {
            context.vrf.clone()
        };

        *context = RouteContext {
            current: next_ip,
            vrf,
            label: next.label,
            transit: Some(next.ip),
            passed_firewall: firewall,
            hostname,
        };
        Ok(None)
    }

    /// VRF of the interface `transit` is configured on, read from the device itself
    async fn ingress_vrf(
        &self,
        device: IpAddr,
        transit: IpAddr,
    ) -> Result<String, PathTracerError> {
        let mut session = self
            .services
            .connector
            .connect_router(device, &self.credentials)
            .await?;
        let vrf = Cisco::new(session.as_mut(), self.parser())
            .interface_vrf(transit)
            .await;
        session.disconnect().await;
        Ok(vrf)
    }

    /// Management IP and name behind a transit address: warehouse inventory, then the
    /// firewall topology service, then the transit address itself.
    async fn management_identity(
        &self,
        transit: IpAddr,
    ) -> Result<(IpAddr, String), PathTracerError> {
        match self.warehouse().canonical_ip(transit).await {
            Ok(device) => return Ok((device.ip, device.hostname)),
            Err(WarehouseError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
        match self
            .services
            .topology
            .find_firewall_by_interface_ip(transit)
            .await
        {
            Ok(Some(firewall)) => {
                let ip = firewall
                    .ip
                    .as_deref()
                    .and_then(|ip| ip.parse().ok())
                    .unwrap_or(transit);
                debug!("{transit} belongs to firewall {} ({ip})", firewall.name);
                Ok((ip, firewall.name))
            }
            Ok(None) => Ok((transit, String::new())),
            Err(err) => {
                warn!("Firewall lookup for {transit} failed: {err}");
                Ok((transit, String::new()))
            }
        }
    }

    async fn resolve_route(
        &self,
        context: &RouteContext,
        source: IpAddr,
        destination: IpAddr,
    ) -> Result<RouteStep, PathTracerError> {
        let resolution = match self
            .services
            .connector
            .connect_router(context.current, &self.credentials)
            .await
        {
            Ok(mut session) => {
                let resolution = self
                    .router_resolution(
                        &mut Cisco::new(session.as_mut(), self.parser()),
                        context,
                        source,
                        destination,
                    )
                    .await;
                session.disconnect().await;
                resolution?
            }
            Err(err) => {
                debug!("Router login to {} failed ({err})", context.current);
                Resolution::Redirect(Signal::WrongDeviceType)
            }
        };

        match resolution {
            Resolution::NextHop(hop) => Ok(RouteStep::Next {
                hop,
                firewall: false,
            }),
            Resolution::Terminate => Ok(RouteStep::End { firewall: false }),
            Resolution::Redirect(Signal::WrongDeviceType) => {
                self.firewall_route(context.current, destination).await
            }
            Resolution::Redirect(signal) => Err(PathTracerError::Generic(format!(
                "unexpected {signal} redirect from {}",
                context.current
            ))),
        }
    }

    /// Label lookup when a label is pending, CEF otherwise, following fabric-border and
    /// traffic-engineering redirects on the same session.
    async fn router_resolution(
        &self,
        cisco: &mut Cisco<'_>,
        context: &RouteContext,
        source: IpAddr,
        destination: IpAddr,
    ) -> Result<Resolution, PathTracerError> {
        if let Some(label) = context.label {
            return cisco
                .mpls_next_hop(label)
                .await
                .map(Resolution::NextHop)
                .ok_or_else(|| {
                    PathTracerError::Generic(format!(
                        "no label switched path for label {label} on {}",
                        context.current
                    ))
                });
        }

        match cisco.cef(&context.vrf, destination).await {
            Resolution::Redirect(Signal::SdaBorder) => {
                let vrf = self
                    .settings
                    .lisp_site_vrf
                    .as_deref()
                    .unwrap_or(&context.vrf);
                info!("{} is a fabric border, asking LISP", context.current);
                cisco
                    .lisp_forwarder(vrf, destination)
                    .await
                    .map(|ip| Resolution::NextHop(LabelledHop::new(ip, None)))
                    .ok_or_else(|| {
                        PathTracerError::Generic(format!(
                            "no LISP forwarder for {destination} on {}",
                            context.current
                        ))
                    })
            }
            Resolution::Redirect(Signal::TrafficEngineering) => {
                info!("{} forwards over a TE tunnel", context.current);
                cisco
                    .traffic_eng_next_hop(&context.vrf, source, destination)
                    .await
                    .map(Resolution::NextHop)
                    .ok_or_else(|| {
                        PathTracerError::Generic(format!(
                            "no TE tunnel next hop for {destination} on {}",
                            context.current
                        ))
                    })
            }
            other => Ok(other),
        }
    }

    async fn firewall_route(
        &self,
        host: IpAddr,
        destination: IpAddr,
    ) -> Result<RouteStep, PathTracerError> {
        info!("{host} does not answer as a router, trying it as a firewall");
        let mut session = self.services.connector.connect_firewall(host).await?;
        let route = CheckPoint::new(session.as_mut(), self.parser())
            .route(destination)
            .await;
        session.disconnect().await;

        match route {
            Some(Resolution::NextHop(hop)) => Ok(RouteStep::Next {
                hop,
                firewall: true,
            }),
            Some(Resolution::Redirect(Signal::EightTwoHundred)) => {
                info!("{destination} is directly connected to firewall {host}");
                Ok(RouteStep::End { firewall: true })
            }
            Some(Resolution::Terminate) => Ok(RouteStep::End { firewall: true }),
            Some(Resolution::Redirect(signal)) => Err(PathTracerError::Generic(format!(
                "unexpected {signal} redirect from firewall {host}"
            ))),
            None => Err(PathTracerError::Generic(format!(
                "firewall {host} has no route to {destination}"
            ))),
        }
    }
}
