use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Credentials, PathTracerError};

/// Connection details for the crawler telemetry warehouse (Trino HTTP endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub url: String,
    pub user: String,
    pub catalog: String,
    pub schema: String,
    /// Fixed delays between attempts when the warehouse reports a transient failure
    pub retry_delays_seconds: Vec<u64>,
    pub timeout_seconds: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            user: "pathtracer".to_string(),
            catalog: "hive".to_string(),
            schema: "network".to_string(),
            retry_delays_seconds: vec![8, 12],
            timeout_seconds: 60,
        }
    }
}

impl WarehouseConfig {
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_seconds
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }
}

/// Firewall policy/topology service (SecureTrack REST API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub accept_invalid_certs: bool,
    pub timeout_seconds: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost/securetrack/api/".to_string(),
            username: String::new(),
            password: String::new(),
            accept_invalid_certs: true,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceAccessConfig {
    pub ssh_port: u16,
    /// Tried when the requesting user's credentials are rejected by a router or switch
    pub fallback_username: Option<String>,
    pub fallback_password: Option<String>,
    pub firewall_username: Option<String>,
    pub firewall_password: Option<String>,
    pub secondary_firewall_username: Option<String>,
    pub secondary_firewall_password: Option<String>,
    pub connect_timeout_seconds: u64,
    pub command_timeout_seconds: u64,
    /// Device used to check a user's login without keeping a session open
    pub verification_host: Option<String>,
}

impl Default for DeviceAccessConfig {
    fn default() -> Self {
        Self {
            ssh_port: 22,
            fallback_username: None,
            fallback_password: None,
            firewall_username: None,
            firewall_password: None,
            secondary_firewall_username: None,
            secondary_firewall_password: None,
            connect_timeout_seconds: 10,
            command_timeout_seconds: 20,
            verification_host: None,
        }
    }
}

fn pair(username: &Option<String>, password: &Option<String>) -> Option<Credentials> {
    match (username, password) {
        (Some(username), Some(password)) => Some(Credentials::new(username, password)),
        _ => None,
    }
}

impl DeviceAccessConfig {
    pub fn fallback_credentials(&self) -> Option<Credentials> {
        pair(&self.fallback_username, &self.fallback_password)
    }

    pub fn firewall_credentials(&self) -> Option<Credentials> {
        pair(&self.firewall_username, &self.firewall_password)
    }

    pub fn secondary_firewall_credentials(&self) -> Option<Credentials> {
        pair(
            &self.secondary_firewall_username,
            &self.secondary_firewall_password,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }
}

/// Longest deadline a request may ask for, one day
pub const MAX_DEADLINE_SECONDS: u64 = 86_400;

/// Limits applied to every traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    pub max_hops: usize,
    pub deadline_seconds: u64,
    /// Number of most recent hops searched for a repeated (device, VRF, label) state
    pub loop_window: usize,
    /// VRF name used for the LISP EID-table lookup on fabric borders
    pub lisp_site_vrf: Option<String>,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            max_hops: 30,
            deadline_seconds: 300,
            loop_window: 6,
            lisp_site_vrf: None,
        }
    }
}

impl TraceSettings {
    /// Per-request deadline, capped at [`MAX_DEADLINE_SECONDS`]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_seconds.min(MAX_DEADLINE_SECONDS))
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub warehouse: WarehouseConfig,
    pub topology: TopologyConfig,
    pub devices: DeviceAccessConfig,
    pub trace: TraceSettings,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PathTracerError> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), PathTracerError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PathTracerError> {
        if self.trace.max_hops == 0 {
            return Err(PathTracerError::Config(
                "trace.max_hops must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_DEADLINE_SECONDS).contains(&self.trace.deadline_seconds) {
            return Err(PathTracerError::Config(format!(
                "trace.deadline_seconds must be between 1 and {MAX_DEADLINE_SECONDS}"
            )));
        }
        if self.trace.loop_window < 2 {
            return Err(PathTracerError::Config(
                "trace.loop_window must be at least 2".to_string(),
            ));
        }
        if self.warehouse.url.is_empty() {
            return Err(PathTracerError::Config(
                "warehouse.url is not set".to_string(),
            ));
        }
        Ok(())
    }
}
