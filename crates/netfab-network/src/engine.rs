//! Container engine collaborator.
//!
//! Everything the fabricator and the namespace operations need from the
//! engine goes through [`ContainerEngine`]: resolving a container to its
//! init pid and managing bridge networks by name. [`DockerCli`] drives the
//! `docker` command line.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use async_trait::async_trait;
use ipnet::{Ipv4Net, Ipv6Net};
use netfab_common::{NetfabError, NetfabResult};
use tokio::process::Command;

/// A container name or id, resolved on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef(String);

impl ContainerRef {
    /// Wrap a container name or id.
    pub fn new(name_or_id: impl Into<String>) -> Self {
        Self(name_or_id.into())
    }

    /// The name or id as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContainerRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Fully derived parameters of a bridge network, ready for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeNetwork {
    /// Network name.
    pub name: String,
    /// Host bridge interface name.
    pub bridge: String,
    /// Subnet, or `None` to let the engine pick one.
    pub subnet: Option<Ipv4Net>,
    /// Restricted dynamic allocation range inside `subnet`.
    pub ip_range: Option<Ipv4Net>,
    /// Masquerade traffic leaving the bridge.
    pub masquerade: bool,
    /// Interface MTU.
    pub mtu: Option<u32>,
    /// IPv6 subnet, enables dual stack when set.
    pub ipv6_subnet: Option<Ipv6Net>,
}

/// The container engine operations netfab consumes.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Resolve a running container to its init process id.
    async fn container_pid(&self, container: &ContainerRef) -> NetfabResult<u32>;

    /// Create a bridge network.
    async fn create_network(&self, network: &BridgeNetwork) -> NetfabResult<()>;

    /// Remove a network. Returns [`NetfabError::NotFound`] if it is absent.
    async fn delete_network(&self, name: &str) -> NetfabResult<()>;

    /// Names of all networks, in engine order.
    async fn list_networks(&self) -> NetfabResult<Vec<String>>;

    /// Attach a container to a network, optionally with a fixed address.
    async fn connect_network(
        &self,
        container: &ContainerRef,
        network: &str,
        ip: Option<Ipv4Addr>,
    ) -> NetfabResult<()>;
}

/// [`ContainerEngine`] backed by the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    /// Use the given engine binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for `docker network create`.
    #[must_use]
    pub fn create_args(network: &BridgeNetwork) -> Vec<String> {
        let mut args = vec![
            "network".to_string(),
            "create".to_string(),
            "-d=bridge".to_string(),
            "-o".to_string(),
            format!("com.docker.network.bridge.name={}", network.bridge),
            "-o".to_string(),
            format!(
                "com.docker.network.bridge.enable_ip_masquerade={}",
                network.masquerade
            ),
        ];
        if let Some(mtu) = network.mtu {
            args.push("-o".to_string());
            args.push(format!("com.docker.network.driver.mtu={mtu}"));
        }
        if let Some(subnet) = network.subnet {
            args.push("--subnet".to_string());
            args.push(subnet.to_string());
        }
        if let Some(range) = network.ip_range {
            args.push("--ip-range".to_string());
            args.push(range.to_string());
        }
        if let Some(v6) = network.ipv6_subnet {
            args.push("--ipv6".to_string());
            args.push("--subnet".to_string());
            args.push(v6.to_string());
        }
        args.push(network.name.clone());
        args
    }

    /// Arguments for `docker network connect`.
    #[must_use]
    pub fn connect_args(
        container: &ContainerRef,
        network: &str,
        ip: Option<Ipv4Addr>,
    ) -> Vec<String> {
        let mut args = vec!["network".to_string(), "connect".to_string()];
        if let Some(ip) = ip {
            args.push("--ip".to_string());
            args.push(ip.to_string());
        }
        args.push(network.to_string());
        args.push(container.to_string());
        args
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.binary.display(), args.join(" "))
    }

    /// Run the engine and return its stdout lines.
    async fn run(&self, args: &[String]) -> NetfabResult<Vec<String>> {
        tracing::debug!(engine = %self.binary.display(), ?args, "Running container engine");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| NetfabError::ExternalTool {
                command: self.command_line(args),
                detail: format!("failed to execute: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_missing_object(&stderr) {
                return Err(NetfabError::not_found(stderr));
            }
            return Err(NetfabError::ExternalTool {
                command: self.command_line(args),
                detail: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn is_missing_object(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such object")
        || lower.contains("no such container")
        || lower.contains("no such network")
        || (lower.contains("network") && lower.contains("not found"))
}

/// Parse `{{.State.Running}} {{.State.Pid}}` inspect output.
fn parse_state_pid(container: &ContainerRef, lines: &[String]) -> NetfabResult<u32> {
    let [line] = lines else {
        return Err(NetfabError::ExternalTool {
            command: format!("inspect {container}"),
            detail: format!("expected one line of output, got {}", lines.len()),
        });
    };
    let mut fields = line.split_whitespace();
    let running = fields.next() == Some("true");
    let pid = fields
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .ok_or_else(|| NetfabError::ExternalTool {
            command: format!("inspect {container}"),
            detail: format!("unexpected inspect output '{line}'"),
        })?;

    if !running || pid == 0 {
        return Err(NetfabError::not_found(format!(
            "container {container} is not running"
        )));
    }
    Ok(pid)
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn container_pid(&self, container: &ContainerRef) -> NetfabResult<u32> {
        let args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            "--format".to_string(),
            "{{.State.Running}} {{.State.Pid}}".to_string(),
            container.to_string(),
        ];
        let lines = self.run(&args).await.map_err(|e| match e {
            NetfabError::NotFound { .. } => {
                NetfabError::not_found(format!("container {container}"))
            }
            other => other,
        })?;
        parse_state_pid(container, &lines)
    }

    async fn create_network(&self, network: &BridgeNetwork) -> NetfabResult<()> {
        self.run(&Self::create_args(network)).await?;
        Ok(())
    }

    async fn delete_network(&self, name: &str) -> NetfabResult<()> {
        let args = vec!["network".to_string(), "rm".to_string(), name.to_string()];
        self.run(&args).await?;
        Ok(())
    }

    async fn list_networks(&self) -> NetfabResult<Vec<String>> {
        let args = vec![
            "network".to_string(),
            "ls".to_string(),
            "--format".to_string(),
            "{{ .Name }}".to_string(),
        ];
        self.run(&args).await
    }

    async fn connect_network(
        &self,
        container: &ContainerRef,
        network: &str,
        ip: Option<Ipv4Addr>,
    ) -> NetfabResult<()> {
        self.run(&Self::connect_args(container, network, ip)).await?;
        Ok(())
    }
}
