//! Hop-by-hop path discovery
//!
//! A [`Tracer`] serves exactly one request: it owns the requesting user's credentials, a
//! trace id and a deadline, and borrows the shared warehouse, topology and connector clients.
//! Traversals never fail outright. Whatever stops them is recorded as a [`TraceStop`] next
//! to the hops discovered so far.

use std::{fmt::Display, net::IpAddr, sync::Arc};

use chrono::{DateTime, Utc};
use cidr::IpInet;
use serde::{Serialize, Serializer};
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    Credentials,
    brand::DeviceConnector,
    config::TraceSettings,
    hop::{Hop, clean_route, clean_route_keep_first, indexed},
    parser::OutputParser,
    topology::FirewallTopology,
    warehouse::WarehouseClient,
};

mod lan;
mod wan;

pub use lan::LanSegment;
pub use wan::WanSegment;

/// Why a traversal stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum TraceStop {
    /// Reached an access port or the destination interface
    Completed,
    /// The last device receives the traffic itself or owns the destination network
    EndOfPath,
    LoopDetected,
    HopLimit,
    DeadlineExceeded,
    /// A hop could not be resolved; the route up to it is kept
    Aborted(String),
}

impl Display for TraceStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceStop::Completed => write!(f, "completed"),
            TraceStop::EndOfPath => write!(f, "end of path"),
            TraceStop::LoopDetected => write!(f, "loop detected"),
            TraceStop::HopLimit => write!(f, "hop limit reached"),
            TraceStop::DeadlineExceeded => write!(f, "deadline exceeded"),
            TraceStop::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Shared clients every request draws on
#[derive(Clone)]
pub struct TraceServices {
    pub warehouse: Arc<WarehouseClient>,
    pub topology: Arc<dyn FirewallTopology>,
    pub connector: Arc<dyn DeviceConnector>,
    pub parser: Arc<dyn OutputParser>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentOutcome {
    pub segment: String,
    pub stop: TraceStop,
    pub hop_count: usize,
}

fn serialize_indexed<S: Serializer>(hops: &[Hop], serializer: S) -> Result<S::Ok, S::Error> {
    indexed(hops).serialize(serializer)
}

/// End-to-end result handed back to callers
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub trace_id: Uuid,
    pub source: IpAddr,
    pub destination: IpAddr,
    pub started_at: DateTime<Utc>,
    pub segments: Vec<SegmentOutcome>,
    #[serde(serialize_with = "serialize_indexed")]
    pub hops: Vec<Hop>,
}

/// Network the destination's last WAN hop should face when its gateway is unknown
fn fallback_target(destination: IpAddr) -> String {
    let length = if destination.is_ipv4() { 24 } else { 64 };
    match IpInet::new(destination, length) {
        Ok(inet) => inet.network().to_string(),
        Err(_) => destination.to_string(),
    }
}

pub struct Tracer {
    settings: TraceSettings,
    credentials: Credentials,
    services: TraceServices,
    trace_id: Uuid,
    started_at: DateTime<Utc>,
    deadline: Instant,
}

impl Tracer {
    pub fn new(settings: TraceSettings, credentials: Credentials, services: TraceServices) -> Self {
        let now = Instant::now();
        let deadline = now.checked_add(settings.deadline()).unwrap_or(now);
        Self {
            settings,
            credentials,
            services,
            trace_id: Uuid::new_v4(),
            started_at: Utc::now(),
            deadline,
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    fn warehouse(&self) -> &WarehouseClient {
        &self.services.warehouse
    }

    fn parser(&self) -> &dyn OutputParser {
        self.services.parser.as_ref()
    }

    /// Stop reason when the traversal has used up its hop or time budget
    fn budget_exhausted(&self, hop_count: usize) -> Option<TraceStop> {
        if hop_count >= self.settings.max_hops {
            Some(TraceStop::HopLimit)
        } else if Instant::now() >= self.deadline {
            Some(TraceStop::DeadlineExceeded)
        } else {
            None
        }
    }

    fn report(
        &self,
        source: IpAddr,
        destination: IpAddr,
        segments: Vec<SegmentOutcome>,
        hops: Vec<Hop>,
    ) -> TraceReport {
        TraceReport {
            trace_id: self.trace_id,
            source,
            destination,
            started_at: self.started_at,
            segments,
            hops,
        }
    }

    /// Source endpoint to its gateway, gateway to gateway, then destination gateway to
    /// the destination endpoint. The result is empty only when the source has no gateway.
    #[instrument(skip(self), fields(trace_id = %self.trace_id), level = "info")]
    pub async fn trace_route(&self, source: IpAddr, destination: IpAddr) -> TraceReport {
        let source_gateway = match self.warehouse().default_gateway(source).await {
            Ok(Some(gateway)) => gateway,
            Ok(None) => {
                warn!("No default gateway known for {source}");
                let outcome = SegmentOutcome {
                    segment: "source gateway".to_string(),
                    stop: TraceStop::Aborted(format!("no default gateway for {source}")),
                    hop_count: 0,
                };
                return self.report(source, destination, vec![outcome], Vec::new());
            }
            Err(err) => {
                warn!("Default gateway lookup for {source} failed: {err}");
                let outcome = SegmentOutcome {
                    segment: "source gateway".to_string(),
                    stop: TraceStop::Aborted(err.to_string()),
                    hop_count: 0,
                };
                return self.report(source, destination, vec![outcome], Vec::new());
            }
        };
        let destination_gateway = match self.warehouse().default_gateway(destination).await {
            Ok(gateway) => gateway,
            Err(err) => {
                warn!("Default gateway lookup for {destination} failed: {err}");
                None
            }
        };
        let target = destination_gateway
            .as_ref()
            .map(|gateway| gateway.ip.to_string())
            .unwrap_or_else(|| fallback_target(destination));
        info!(
            "Tracing {source} via {} to {destination} via {target}",
            source_gateway.ip
        );

        let source_lan = self.trace_lan_segment(source, source_gateway.ip).await;
        let wan = self
            .trace_wan_segment(
                source,
                source_gateway.ip,
                destination,
                &source_lan.vrf,
                &target,
                &source_gateway.hostname,
            )
            .await;

        let mut segments = vec![
            source_lan.outcome("source lan"),
            wan.outcome("wan"),
        ];
        let mut route: Vec<Hop> = source_lan.hops.into_iter().rev().collect();
        route.extend(wan.hops);

        if let Some(gateway) = destination_gateway {
            let destination_lan = self.trace_lan_segment(destination, gateway.ip).await;
            segments.push(destination_lan.outcome("destination lan"));
            route.extend(destination_lan.hops);
        }

        let route = clean_route(route);
        info!("Trace finished with {} hops", route.len());
        self.report(source, destination, segments, route)
    }

    /// WAN trace from an arbitrary router into the destination's LAN
    #[instrument(skip(self), fields(trace_id = %self.trace_id), level = "info")]
    pub async fn trace_wan_to_lan(
        &self,
        source: IpAddr,
        source_vrf: &str,
        destination: IpAddr,
    ) -> TraceReport {
        let destination_gateway = match self.warehouse().default_gateway(destination).await {
            Ok(gateway) => gateway,
            Err(err) => {
                warn!("Default gateway lookup for {destination} failed: {err}");
                None
            }
        };
        let target = destination_gateway
            .as_ref()
            .map(|gateway| gateway.ip.to_string())
            .unwrap_or_else(|| fallback_target(destination));
        let hostname = self
            .warehouse()
            .device_name_by_ip(source)
            .await
            .unwrap_or_default();

        let wan = self
            .trace_wan_segment(source, source, destination, source_vrf, &target, &hostname)
            .await;
        let mut segments = vec![wan.outcome("wan")];
        let mut route = wan.hops;
        if let Some(gateway) = destination_gateway {
            let destination_lan = self.trace_lan_segment(destination, gateway.ip).await;
            segments.push(destination_lan.outcome("destination lan"));
            route.extend(destination_lan.hops);
        }
        // the router record of the gateway wins over its MAC record
        self.report(source, destination, segments, clean_route_keep_first(route))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_target_is_slash_24() {
        assert_eq!(
            fallback_target("10.20.30.40".parse().expect("bad ip")),
            "10.20.30.0/24"
        );
    }

    #[test]
    fn test_trace_stop_serialization() {
        assert_eq!(
            serde_json::to_value(TraceStop::LoopDetected).expect("serialize"),
            serde_json::json!({"reason": "loop_detected"})
        );
        assert_eq!(
            serde_json::to_value(TraceStop::Aborted("x".to_string())).expect("serialize"),
            serde_json::json!({"reason": "aborted", "detail": "x"})
        );
    }
}
