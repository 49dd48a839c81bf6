//! SSH local port forwarding.
//!
//! A [`TunnelProvider`] may replace the backend URL with a local endpoint.
//! [`SshTunnel`] runs the system `ssh` client as a child process for the
//! life of the run.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::backend::{normalize_url, DEFAULT_PORT};
use crate::{Error, Result};

/// Default SSH server port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// How long to wait for the forwarded port to accept connections.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

const READY_POLL: Duration = Duration::from_millis(100);

/// Supplies an optional replacement endpoint for the backend.
pub trait TunnelProvider {
    /// Set up the tunnel to `remote_url`. Returns the URL to connect to
    /// instead, or `None` when no tunnel is in use.
    fn establish(&mut self, remote_url: &str) -> Result<Option<String>>;
}

/// Connects directly.
#[derive(Debug, Default)]
pub struct NoTunnel;

impl TunnelProvider for NoTunnel {
    fn establish(&mut self, _remote_url: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Parsed `[localport:][user@]sshhost[:sshport]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTunnelParams {
    /// Local port to listen on; the remote port when not given.
    pub local_port: Option<u16>,
    pub user: Option<String>,
    pub host: String,
    pub port: u16,
}

fn parse_port(value: &str, input: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| Error::Tunnel(format!("invalid port '{}' in '{}'", value, input)))
}

impl FromStr for SshTunnelParams {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let mut rest = input.trim();
        if rest.is_empty() {
            return Err(Error::Tunnel("empty ssh tunnel spec".to_string()));
        }

        let mut local_port = None;
        if let Some((head, tail)) = rest.split_once(':') {
            if !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) {
                local_port = Some(parse_port(head, input)?);
                rest = tail;
            }
        }

        let (user, host_port) = match rest.split_once('@') {
            Some((user, host_port)) if !user.is_empty() => (Some(user.to_string()), host_port),
            Some(_) => return Err(Error::Tunnel(format!("empty user in '{}'", input))),
            None => (None, rest),
        };

        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => (host, parse_port(port, input)?),
            None => (host_port, DEFAULT_SSH_PORT),
        };
        if host.is_empty() {
            return Err(Error::Tunnel(format!("missing ssh host in '{}'", input)));
        }

        Ok(Self {
            local_port,
            user,
            host: host.to_string(),
            port,
        })
    }
}

impl SshTunnelParams {
    /// `ssh` destination argument.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Host and port the backend URL points at, as the client will see them.
/// IPv6 hosts are returned without brackets.
pub fn remote_address(url: &str) -> Result<(String, u16)> {
    let url = Url::parse(&normalize_url(url)?)?;
    let host = match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string(),
        None => return Err(Error::Tunnel(format!("no host in backend url '{}'", url))),
    };
    let port = url.port_or_known_default().unwrap_or(DEFAULT_PORT);
    Ok((host, port))
}

fn forward_spec(local_port: u16, host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("{}:[{}]:{}", local_port, host, port)
    } else {
        format!("{}:{}:{}", local_port, host, port)
    }
}

/// `ssh -N -L` child process; killed on drop.
#[derive(Debug)]
pub struct SshTunnel {
    params: SshTunnelParams,
    child: Option<Child>,
}

impl SshTunnel {
    pub fn new(params: SshTunnelParams) -> Self {
        Self { params, child: None }
    }

    fn wait_ready(&mut self, local: SocketAddr) -> Result<()> {
        let started = Instant::now();
        loop {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(Error::Tunnel(format!("ssh exited early with {}", status)));
                }
            }
            if TcpStream::connect_timeout(&local, READY_POLL).is_ok() {
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "tunnel ready");
                return Ok(());
            }
            if started.elapsed() >= READY_TIMEOUT {
                return Err(Error::Tunnel(format!(
                    "port {} not reachable after {}s",
                    local.port(),
                    READY_TIMEOUT.as_secs()
                )));
            }
            thread::sleep(READY_POLL);
        }
    }
}

impl TunnelProvider for SshTunnel {
    fn establish(&mut self, remote_url: &str) -> Result<Option<String>> {
        let (remote_host, remote_port) = remote_address(remote_url)?;
        let local_port = self.params.local_port.unwrap_or(remote_port);
        let forward = forward_spec(local_port, &remote_host, remote_port);

        info!(
            "Starting SSH tunnel {} via {}:{}",
            forward,
            self.params.destination(),
            self.params.port
        );
        let child = Command::new("ssh")
            .args(["-N", "-o", "ExitOnForwardFailure=yes", "-L", &forward, "-p"])
            .arg(self.params.port.to_string())
            .arg(self.params.destination())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| Error::Tunnel(format!("failed to start ssh: {}", e)))?;
        self.child = Some(child);

        let local = ("127.0.0.1", local_port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Tunnel("cannot resolve 127.0.0.1".to_string()))?;
        self.wait_ready(local)?;

        Ok(Some(format!("http://localhost:{}", local_port)))
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to stop ssh tunnel");
            }
            let _ = child.wait();
        }
    }
}
