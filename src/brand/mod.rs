pub mod checkpoint;
pub mod cisco;
pub(crate) mod prelude;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::config::DeviceAccessConfig;
use crate::ssh::{ShellSession, SshClient, SshError};
use prelude::*;

/// Live command line on one device
#[async_trait]
pub trait CliSession: Send {
    /// Raw output of `command`; failures are logged and come back as empty output.
    async fn execute_command(&mut self, command: &str) -> String;
    async fn disconnect(&mut self);
}

/// Opens sessions in the router/switch dialect or the firewall dialect
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect_router(
        &self,
        host: IpAddr,
        credentials: &Credentials,
    ) -> Result<Box<dyn CliSession>, SshError>;

    async fn connect_firewall(&self, host: IpAddr) -> Result<Box<dyn CliSession>, SshError>;
}

#[async_trait]
impl CliSession for SshClient {
    async fn execute_command(&mut self, command: &str) -> String {
        SshClient::execute_command(self, command).await
    }

    async fn disconnect(&mut self) {
        SshClient::disconnect(self).await
    }
}

#[async_trait]
impl CliSession for ShellSession {
    async fn execute_command(&mut self, command: &str) -> String {
        ShellSession::execute_command(self, command).await
    }

    async fn disconnect(&mut self) {
        ShellSession::disconnect(self).await
    }
}

/// SSH-backed connector: exec channels for routers, an interactive shell for firewalls
pub struct SshConnector {
    devices: DeviceAccessConfig,
}

impl SshConnector {
    pub fn new(devices: DeviceAccessConfig) -> Self {
        Self { devices }
    }

    fn address(&self, host: IpAddr) -> SocketAddr {
        SocketAddr::new(host, self.devices.ssh_port)
    }
}

#[async_trait]
impl DeviceConnector for SshConnector {
    async fn connect_router(
        &self,
        host: IpAddr,
        credentials: &Credentials,
    ) -> Result<Box<dyn CliSession>, SshError> {
        let fallback = self.devices.fallback_credentials();
        let client = SshClient::connect(
            self.address(host),
            credentials,
            fallback.as_ref(),
            self.devices.connect_timeout(),
            self.devices.command_timeout(),
        )
        .await?;
        trace!(
            "Router session to {} as {}",
            host,
            client.connection_info().credentials.username
        );
        Ok(Box::new(client))
    }

    async fn connect_firewall(&self, host: IpAddr) -> Result<Box<dyn CliSession>, SshError> {
        let primary = self.devices.firewall_credentials();
        let secondary = self.devices.secondary_firewall_credentials();
        let candidates: Vec<&Credentials> = primary.iter().chain(secondary.iter()).collect();
        if candidates.is_empty() {
            return Err(SshError::Authentication(
                "No firewall credentials configured".to_string(),
            ));
        }
        let shell = ShellSession::connect(
            self.address(host),
            &candidates,
            self.devices.connect_timeout(),
            self.devices.command_timeout(),
        )
        .await?;
        Ok(Box::new(shell))
    }
}
