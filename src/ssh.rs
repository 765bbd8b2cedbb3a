use std::{net::SocketAddr, sync::Arc, time::Duration};

use russh::{ChannelMsg, Disconnect, client, keys::ssh_key};
use tracing::{debug, error, trace, warn};

use crate::Credentials;

#[derive(Debug, Clone)]
pub struct SshConnectionInfo {
    pub address: SocketAddr,
    pub credentials: Credentials,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshError {
    Connection(String),
    Authentication(String),
    Command(String),
    Timeout,
}

impl std::fmt::Display for SshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshError::Connection(msg) => write!(f, "Connection error: {msg}"),
            SshError::Authentication(msg) => write!(f, "Authentication error: {msg}"),
            SshError::Command(msg) => write!(f, "Command error: {msg}"),
            SshError::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for SshError {}

// Handler for russh client
#[derive(Clone)]
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;
    #[allow(unused_variables)]
    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

async fn create_session(
    address: SocketAddr,
    timeout: Duration,
) -> Result<client::Handle<ClientHandler>, SshError> {
    let mut config = client::Config::default();

    // Legacy algorithms for older IOS and Gaia releases
    config.preferred.kex = vec![
        russh::kex::CURVE25519,
        russh::kex::DH_G14_SHA256,
        russh::kex::DH_G16_SHA512,
        russh::kex::ECDH_SHA2_NISTP256,
        russh::kex::ECDH_SHA2_NISTP384,
        russh::kex::ECDH_SHA2_NISTP521,
        russh::kex::DH_G14_SHA1,
    ]
    .into();

    match tokio::time::timeout(
        timeout,
        client::connect(Arc::new(config), address, ClientHandler),
    )
    .await
    {
        Ok(session) => session.map_err(|e| SshError::Connection(e.to_string())),
        Err(_) => Err(SshError::Timeout),
    }
}

async fn open_authenticated(
    address: SocketAddr,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<client::Handle<ClientHandler>, SshError> {
    let mut session = create_session(address, timeout).await?;
    let result = session
        .authenticate_password(&credentials.username, &credentials.password)
        .await
        .map_err(|e| SshError::Authentication(e.to_string()))?;
    if matches!(result, client::AuthResult::Success) {
        debug!("Authenticated to {address} as {}", credentials.username);
        Ok(session)
    } else {
        Err(SshError::Authentication(format!(
            "{address} rejected the password of {}",
            credentials.username
        )))
    }
}

/// Tries each credential pair in order, returning the first session that authenticates
async fn connect_with_fallback(
    address: SocketAddr,
    candidates: &[&Credentials],
    timeout: Duration,
) -> Result<(client::Handle<ClientHandler>, Credentials), SshError> {
    let mut last_error = SshError::Authentication("No credentials to try".to_string());
    for (attempt, credentials) in candidates.iter().enumerate() {
        match open_authenticated(address, credentials, timeout).await {
            Ok(session) => {
                if attempt > 0 {
                    warn!("Primary credentials failed. Connected using fallback credentials for {address}");
                }
                return Ok((session, (*credentials).clone()));
            }
            Err(err) => {
                debug!("Login to {address} as {} failed: {err}", credentials.username);
                last_error = err;
            }
        }
    }
    Err(last_error)
}

async fn close(session: &client::Handle<ClientHandler>) {
    if let Err(err) = session
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        trace!("Disconnect failed: {err}");
    }
}

/// Router/switch session running each command on its own exec channel
pub struct SshClient {
    connection_info: SshConnectionInfo,
    session: Option<client::Handle<ClientHandler>>,
}

impl SshClient {
    /// Connects with `primary`, then `fallback` when the first login is refused.
    pub async fn connect(
        address: SocketAddr,
        primary: &Credentials,
        fallback: Option<&Credentials>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, SshError> {
        let candidates: Vec<&Credentials> = std::iter::once(primary).chain(fallback).collect();
        let (session, credentials) =
            connect_with_fallback(address, &candidates, connect_timeout).await?;
        Ok(Self {
            connection_info: SshConnectionInfo {
                address,
                credentials,
                connect_timeout,
                command_timeout,
            },
            session: Some(session),
        })
    }

    pub fn connection_info(&self) -> &SshConnectionInfo {
        &self.connection_info
    }

    /// Reopens the transport with the credentials that worked last time if it dropped
    async fn live_session(&mut self) -> Result<&client::Handle<ClientHandler>, SshError> {
        let dropped = self
            .session
            .as_ref()
            .is_none_or(|session| session.is_closed());
        if dropped {
            debug!(
                "Transport to {} is inactive, reconnecting",
                self.connection_info.address
            );
            let session = open_authenticated(
                self.connection_info.address,
                &self.connection_info.credentials,
                self.connection_info.connect_timeout,
            )
            .await?;
            self.session = Some(session);
        }
        self.session
            .as_ref()
            .ok_or_else(|| SshError::Connection("No session available".to_string()))
    }

    pub async fn run_command(&mut self, command: &str) -> Result<String, SshError> {
        debug!("Executing command: {}", command);
        let timeout_duration = self.connection_info.command_timeout;
        let session = self.live_session().await?;

        trace!("Creating channel for command: {}", command);
        let mut channel = session.channel_open_session().await.map_err(|e| {
            debug!("Failed to create channel: {}", e);
            SshError::Command(format!("Failed to create channel: {e}"))
        })?;

        channel.exec(true, command).await.map_err(|e| {
            debug!("Failed to execute command '{}': {}", command, e);
            SshError::Command(format!("Failed to execute '{command}': {e}"))
        })?;

        let mut stdout_buffer = Vec::new();
        let mut stderr_buffer = Vec::new();

        let read = tokio::time::timeout(timeout_duration, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        stdout_buffer.extend_from_slice(&data);
                        trace!(
                            "Read {} bytes from stdout (total: {})",
                            data.len(),
                            stdout_buffer.len()
                        );
                    }
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        stderr_buffer.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!("Command exited with status: {}", exit_status);
                    }
                    Some(other) => {
                        trace!("Received other channel message: {:?}", other);
                    }
                }
            }
        })
        .await;

        if read.is_err() {
            error!("Command execution timed out after {:?}", timeout_duration);
            return Err(SshError::Timeout);
        }

        let mut output = String::from_utf8_lossy(&stdout_buffer).to_string();
        if output.trim().is_empty() && !stderr_buffer.is_empty() {
            output = String::from_utf8_lossy(&stderr_buffer).to_string();
        }
        debug!(
            "Command '{}' completed with {} bytes output",
            command,
            output.len()
        );
        Ok(output)
    }

    /// Runs a command, logging failures and handing back empty output instead
    pub async fn execute_command(&mut self, command: &str) -> String {
        match self.run_command(command).await {
            Ok(output) => output,
            Err(err) => {
                error!(
                    "Error executing command '{command}' on {}: {err}",
                    self.connection_info.address
                );
                String::new()
            }
        }
    }

    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            close(&session).await;
        }
    }
}

/// Interactive PTY shell, for appliances whose CLI dialect needs a mode switch first
pub struct ShellSession {
    address: SocketAddr,
    session: client::Handle<ClientHandler>,
    channel: russh::Channel<client::Msg>,
    quiet_period: Duration,
    command_timeout: Duration,
}

impl ShellSession {
    pub async fn connect(
        address: SocketAddr,
        candidates: &[&Credentials],
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, SshError> {
        let (session, _) = connect_with_fallback(address, candidates, connect_timeout).await?;
        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| SshError::Command(format!("Failed to create channel: {e}")))?;
        channel
            .request_pty(false, "vt100", 200, 1000, 0, 0, &[])
            .await
            .map_err(|e| SshError::Command(format!("Failed to request PTY: {e}")))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::Command(format!("Failed to start shell: {e}")))?;

        let mut shell = Self {
            address,
            session,
            channel,
            quiet_period: Duration::from_millis(1500),
            command_timeout,
        };
        // banner and first prompt
        let banner = shell.read_until_quiet().await;
        trace!("Shell banner from {address}: {banner}");
        Ok(shell)
    }

    /// Collects output until nothing arrives for the quiet period or the command timeout ends
    async fn read_until_quiet(&mut self) -> String {
        let mut buffer = Vec::new();
        let started = tokio::time::Instant::now();
        while started.elapsed() < self.command_timeout {
            match tokio::time::timeout(self.quiet_period, self.channel.wait()).await {
                Ok(Some(ChannelMsg::Data { data })) => buffer.extend_from_slice(&data),
                Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) | Ok(None) => break,
                Ok(Some(other)) => trace!("Received other channel message: {:?}", other),
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&buffer).to_string()
    }

    pub async fn execute_command(&mut self, command: &str) -> String {
        debug!("Executing shell command on {}: {}", self.address, command);
        let line = format!("{command}\n");
        if let Err(err) = self.channel.data(line.as_bytes()).await {
            error!("Error executing command '{command}' on {}: {err}", self.address);
            return String::new();
        }
        let output = self.read_until_quiet().await;
        // drop the echoed command line
        match output.split_once('\n') {
            Some((first, rest)) if first.contains(command) => rest.to_string(),
            _ => output,
        }
    }

    pub async fn disconnect(&mut self) {
        if let Err(err) = self.channel.eof().await {
            trace!("EOF on shell channel failed: {err}");
        }
        close(&self.session).await;
    }
}

/// Checks a login against a device without keeping the session
pub async fn verify_credentials(
    address: SocketAddr,
    credentials: &Credentials,
    timeout: Duration,
) -> bool {
    match open_authenticated(address, credentials, timeout).await {
        Ok(session) => {
            close(&session).await;
            true
        }
        Err(err) => {
            debug!("Credential check against {address} failed: {err}");
            false
        }
    }
}
