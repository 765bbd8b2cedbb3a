//! CLI Handling module

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    Credentials, PathTracerError,
    brand::SshConnector,
    config::AppConfig,
    parser::RegexParser,
    ssh::verify_credentials,
    topology::{FirewallTopology, SecureTrackClient, main_route},
    tracer::{TraceServices, Tracer},
    warehouse::{TrinoWarehouse, WarehouseClient},
};

/// Pathtracer - hop-by-hop network path discovery between two endpoints
#[derive(Parser)]
#[command(name = "pathtracer")]
#[command(about = "Trace the network path between two IP endpoints")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Enable debug logging (shows every command sent to devices and the warehouse)
    #[arg(short, long, global = true)]
    debug: bool,

    /// Path to the configuration file
    #[arg(
        short = 'c',
        long = "config",
        default_value = "pathtracer.json",
        global = true
    )]
    config_path: PathBuf,

    /// Username for device logins
    #[arg(short, long, env = "PATHTRACER_USERNAME", global = true)]
    username: Option<String>,

    /// Password for device logins
    #[arg(
        short,
        long,
        env = "PATHTRACER_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace from a source endpoint to a destination endpoint
    Trace {
        source_ip: IpAddr,
        destination_ip: IpAddr,
    },
    /// Follow an endpoint's MAC address from its gateway to the access port
    Lan {
        endpoint_ip: IpAddr,
        /// Gateway to start from, looked up in the warehouse when omitted
        #[arg(long)]
        gateway: Option<IpAddr>,
    },
    /// Trace from an arbitrary router into the destination's LAN
    Wan {
        /// Management IP of the router to start from
        router_ip: IpAddr,
        destination_ip: IpAddr,
        /// VRF the traffic is in on the starting router
        #[arg(long, default_value = "default")]
        vrf: String,
    },
    /// Show the default gateway the warehouse knows for an endpoint
    Gateway { endpoint_ip: IpAddr },
    /// Ask the firewall topology service which firewalls a flow crosses
    FirewallPath {
        source_ip: IpAddr,
        destination_ip: IpAddr,
        /// Service as the topology service names it, e.g. tcp:443
        #[arg(long, default_value = "any")]
        service: String,
        /// Only start from a device entered in this VRF
        #[arg(long)]
        source_vrf: Option<String>,
    },
    /// Check the given credentials against the verification host
    Verify,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), PathTracerError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(config_path: &Path) -> Result<AppConfig, PathTracerError> {
    match AppConfig::load_from_file(config_path) {
        Ok(config) => {
            info!("Loaded configuration from {}", config_path.display());
            Ok(config)
        }
        Err(err) if config_path.exists() => {
            error!(
                "Error loading existing config file '{}': {}",
                config_path.display(),
                err
            );
            Err(PathTracerError::Config(format!(
                "config file exists but cannot be loaded: {err}"
            )))
        }
        Err(_) => {
            info!(
                "Config file '{}' not found, creating default configuration",
                config_path.display()
            );
            let config = AppConfig::default();
            config.save_to_file(config_path)?;
            info!(
                "Created default config at '{}' - please edit it to point at your warehouse",
                config_path.display()
            );
            Ok(config)
        }
    }
}

fn credentials(cli: &Cli) -> Result<Credentials, PathTracerError> {
    match (&cli.username, &cli.password) {
        (Some(username), Some(password)) => Ok(Credentials::new(username, password)),
        _ => Err(PathTracerError::Config(
            "device credentials are required, pass --username/--password or set PATHTRACER_USERNAME/PATHTRACER_PASSWORD".to_string(),
        )),
    }
}

fn warehouse_client(config: &AppConfig) -> Result<WarehouseClient, PathTracerError> {
    let warehouse = TrinoWarehouse::new(config.warehouse.clone())?;
    Ok(WarehouseClient::new(
        Arc::new(warehouse),
        config.warehouse.retry_delays(),
    ))
}

fn services(config: &AppConfig) -> Result<TraceServices, PathTracerError> {
    Ok(TraceServices {
        warehouse: Arc::new(warehouse_client(config)?),
        topology: Arc::new(SecureTrackClient::new(config.topology.clone())?),
        connector: Arc::new(SshConnector::new(config.devices.clone())),
        parser: Arc::new(RegexParser::new()?),
    })
}

pub async fn main_func() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_filter_str = if cli.debug { "debug" } else { "info" };
    let env_filter = EnvFilter::new(format!(
        "{env_filter_str},russh::client=info,russh::sshbuffer=info"
    ));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(cli.debug)
                .with_thread_ids(false)
                .with_writer(std::io::stderr)
                .with_level(true),
        )
        .with(env_filter)
        .init();

    let app_config = load_config(&cli.config_path)?;

    match &cli.command {
        Commands::Trace {
            source_ip,
            destination_ip,
        } => {
            let tracer = Tracer::new(
                app_config.trace.clone(),
                credentials(&cli)?,
                services(&app_config)?,
            );
            let report = tracer.trace_route(*source_ip, *destination_ip).await;
            print_json(&report)?;
        }
        Commands::Lan {
            endpoint_ip,
            gateway,
        } => {
            let services = services(&app_config)?;
            let gateway = match gateway {
                Some(gateway) => *gateway,
                None => services
                    .warehouse
                    .default_gateway(*endpoint_ip)
                    .await?
                    .map(|gateway| gateway.ip)
                    .ok_or_else(|| {
                        PathTracerError::Generic(format!("no default gateway for {endpoint_ip}"))
                    })?,
            };
            let tracer = Tracer::new(app_config.trace.clone(), credentials(&cli)?, services);
            let segment = tracer.trace_lan_segment(*endpoint_ip, gateway).await;
            info!("LAN trace stopped: {}", segment.stop);
            print_json(&serde_json::json!({
                "trace_id": tracer.trace_id(),
                "vrf": segment.vrf,
                "stop": segment.stop,
                "hops": crate::hop::indexed(&segment.hops),
            }))?;
        }
        Commands::Wan {
            router_ip,
            destination_ip,
            vrf,
        } => {
            let tracer = Tracer::new(
                app_config.trace.clone(),
                credentials(&cli)?,
                services(&app_config)?,
            );
            let report = tracer
                .trace_wan_to_lan(*router_ip, vrf, *destination_ip)
                .await;
            print_json(&report)?;
        }
        Commands::Gateway { endpoint_ip } => {
            let gateway = warehouse_client(&app_config)?
                .default_gateway(*endpoint_ip)
                .await?;
            if gateway.is_none() {
                info!("No default gateway known for {endpoint_ip}");
            }
            print_json(&gateway)?;
        }
        Commands::FirewallPath {
            source_ip,
            destination_ip,
            service,
            source_vrf,
        } => {
            let topology = SecureTrackClient::new(app_config.topology.clone())?;
            let path = topology
                .compute_path(*source_ip, *destination_ip, service)
                .await?;
            let chain = main_route(&path, *destination_ip, source_vrf.as_deref());
            print_json(&serde_json::json!({
                "traffic_allowed": path.traffic_allowed,
                "main_route": chain,
            }))?;
        }
        Commands::Verify => {
            let credentials = credentials(&cli)?;
            let Some(host) = app_config.devices.verification_host.as_deref() else {
                return Err(PathTracerError::Config(
                    "devices.verification_host is not set".to_string(),
                )
                .into());
            };
            let address: SocketAddr = tokio::net::lookup_host((host, app_config.devices.ssh_port))
                .await?
                .next()
                .ok_or_else(|| PathTracerError::Config(format!("cannot resolve {host}")))?;
            let valid = verify_credentials(
                address,
                &credentials,
                app_config.devices.connect_timeout(),
            )
            .await;
            info!(
                "Credentials for {} are {}",
                credentials.username,
                if valid { "valid" } else { "rejected" }
            );
            print_json(&serde_json::json!({ "valid": valid }))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_trace() {
        let cli = Cli::try_parse_from([
            "pathtracer",
            "--debug",
            "-u",
            "netops",
            "-p",
            "hunter2",
            "trace",
            "10.10.1.50",
            "10.60.1.20",
        ])
        .expect("Failed to parse");
        assert!(cli.debug);
        assert_eq!(cli.config_path, PathBuf::from("pathtracer.json"));
        assert!(matches!(cli.command, Commands::Trace { .. }));
        assert_eq!(
            credentials(&cli).expect("credentials").username,
            "netops".to_string()
        );
    }

    #[test]
    fn test_cli_rejects_bad_ip() {
        assert!(Cli::try_parse_from(["pathtracer", "gateway", "not-an-ip"]).is_err());
    }

    #[test]
    fn test_load_config_writes_default() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("pathtracer.json");
        let config = load_config(&path).expect("Failed to load config");
        assert!(path.exists());
        assert_eq!(config.trace.max_hops, AppConfig::default().trace.max_hops);
    }
}
