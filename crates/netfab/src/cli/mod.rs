//! CLI command definitions and handlers.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, eyre};
use netfab_common::FabricConfig;
use netfab_network::{
    ContainerRef, DockerCli, HostLinks, NamespaceProber, NetworkFabricator, NetworkSpec,
    ProviderBinding, RouteMutator, addr,
};

/// netfab - container network fabrication for emulated cluster topologies
#[derive(Parser)]
#[command(name = "netfab")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "NETFAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Container engine binary (overrides the configuration file)
    #[arg(long, global = true, env = "NETFAB_ENGINE")]
    pub engine: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Manage bridge networks
    Network {
        /// The network subcommand.
        #[command(subcommand)]
        command: NetworkCommand,
    },

    /// Inspect container network namespaces
    Netns {
        /// The namespace subcommand.
        #[command(subcommand)]
        command: NetnsCommand,
    },

    /// Rewrite container routes
    Route {
        /// The route subcommand.
        #[command(subcommand)]
        command: RouteCommand,
    },

    /// Compute reserved addresses of a subnet
    Addr {
        /// The address subcommand.
        #[command(subcommand)]
        command: AddrCommand,
    },

    /// Manage host-side bridges and veth pairs
    Link {
        /// The link subcommand.
        #[command(subcommand)]
        command: LinkCommand,
    },

    /// Run a cluster-provisioning command bound to a network
    Exec {
        /// Network the child must create its nodes on
        #[arg(long)]
        network: String,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

/// Network subcommands.
#[derive(Subcommand)]
pub enum NetworkCommand {
    /// Create a bridge network
    Create {
        /// Network name
        name: String,

        /// IPv4 subnet in CIDR notation (engine picks one when omitted)
        #[arg(long)]
        subnet: Option<String>,

        /// Enable IP masquerading on the bridge
        #[arg(long)]
        masquerade: bool,

        /// Bridge MTU
        #[arg(long)]
        mtu: Option<u32>,

        /// Additional IPv6 subnet in CIDR notation
        #[arg(long)]
        ipv6_subnet: Option<String>,
    },

    /// Delete a network (absent networks are ignored)
    Delete {
        /// Network name
        name: String,
    },

    /// List networks
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Attach a container to a network
    Connect {
        /// Container name or ID
        container: String,

        /// Network name
        network: String,

        /// Static IPv4 address (engine allocates one when omitted)
        #[arg(long)]
        ip: Option<Ipv4Addr>,
    },

    /// Delete every network whose name contains a prefix
    Prune {
        /// Name fragment to match
        #[arg(value_parser = NonEmptyStringValueParser::new())]
        prefix: String,
    },
}

/// Namespace subcommands.
#[derive(Subcommand)]
pub enum NetnsCommand {
    /// Host-side veth peers of a container
    Peers {
        /// Container name or ID
        container: String,

        /// Show both ends of every pair
        #[arg(long)]
        detail: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

/// Route subcommands.
#[derive(Subcommand)]
pub enum RouteCommand {
    /// Point a container's default route at a new gateway
    ReplaceGateway {
        /// Container name or ID
        container: String,

        /// IPv4 gateway address
        gateway: String,
    },
}

/// Address subcommands.
#[derive(Subcommand)]
pub enum AddrCommand {
    /// Highest address below the gateway anchor
    LastUsable {
        /// IPv4 subnet in CIDR notation
        cidr: String,
    },

    /// Gateway anchor (one below broadcast)
    Gateway {
        /// IPv4 subnet in CIDR notation
        cidr: String,
    },

    /// Restricted allocation range for dynamic addresses
    Range {
        /// IPv4 subnet in CIDR notation
        cidr: String,
    },
}

/// Host link subcommands.
#[derive(Subcommand)]
pub enum LinkCommand {
    /// Create a bridge and bring it up
    CreateBridge {
        /// Bridge name
        name: String,
    },

    /// Create a veth pair
    CreateVeth {
        /// Name of the first end
        name: String,

        /// Name of the peer end
        peer: String,
    },

    /// Enslave an interface to a bridge
    Attach {
        /// Interface name
        interface: String,

        /// Bridge name
        bridge: String,
    },

    /// Delete an interface
    Delete {
        /// Interface name
        name: String,
    },
}

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One entry per line
    Text,
    /// A JSON document
    Json,
}

impl Cli {
    /// Resolve configuration from the file and command line overrides.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or the result is invalid.
    pub fn fabric_config(&self) -> Result<FabricConfig> {
        let mut config = match &self.config {
            Some(path) => FabricConfig::load(path)?,
            None => FabricConfig::default(),
        };
        if let Some(engine) = &self.engine {
            config = config.with_engine(engine.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the selected operation.
    pub async fn execute(self) -> Result<()> {
        let config = self.fabric_config()?;

        match self.command {
            Commands::Network { command } => network(command, config).await,
            Commands::Netns { command } => netns(command, &config).await,
            Commands::Route { command } => route(command, &config).await,
            Commands::Addr { command } => address(&command, &config),
            Commands::Link { command } => link(command).await,
            Commands::Exec { network, command } => exec(&network, &command).await,
        }
    }
}

async fn network(command: NetworkCommand, config: FabricConfig) -> Result<()> {
    let fabricator = NetworkFabricator::system(config);

    match command {
        NetworkCommand::Create {
            name,
            subnet,
            masquerade,
            mtu,
            ipv6_subnet,
        } => {
            let mut spec = NetworkSpec::new(name).with_masquerade(masquerade);
            if let Some(subnet) = subnet {
                spec = spec.with_subnet(subnet);
            }
            if let Some(mtu) = mtu {
                spec = spec.with_mtu(mtu);
            }
            if let Some(v6) = ipv6_subnet {
                spec = spec.with_ipv6_subnet(v6);
            }

            let network = fabricator.create_network(&spec).await?;
            println!("Network {} created (bridge {})", network.name, network.bridge);
            Ok(())
        }

        NetworkCommand::Delete { name } => {
            fabricator.delete_network(&name).await?;
            println!("Network {name} deleted");
            Ok(())
        }

        NetworkCommand::List { format } => {
            let names = fabricator.list_networks().await?;
            match format {
                OutputFormat::Text => {
                    for name in &names {
                        println!("{name}");
                    }
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&names)?);
                }
            }
            Ok(())
        }

        NetworkCommand::Connect {
            container,
            network,
            ip,
        } => {
            let container = ContainerRef::new(container);
            fabricator.connect_network(&container, &network, ip).await?;
            println!("Container {container} connected to {network}");
            Ok(())
        }

        NetworkCommand::Prune { prefix } => {
            let names = fabricator.list_networks().await?;
            let mut failed = 0usize;
            for name in names.iter().filter(|name| name.contains(prefix.as_str())) {
                match fabricator.delete_network(name).await {
                    Ok(()) => println!("Network {name} deleted"),
                    Err(e) => {
                        tracing::warn!(network = %name, error = %e, "Failed to delete network");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                return Err(eyre!("{failed} network(s) matching '{prefix}' could not be deleted"));
            }
            Ok(())
        }
    }
}

async fn netns(command: NetnsCommand, config: &FabricConfig) -> Result<()> {
    let prober = NamespaceProber::system(DockerCli::new(config.engine.clone()));

    match command {
        NetnsCommand::Peers {
            container,
            detail,
            format,
        } => {
            let container = ContainerRef::new(container);
            let pairs = prober.veth_pairs(&container).await?;
            match (format, detail) {
                (OutputFormat::Text, false) => {
                    for pair in &pairs {
                        println!("{}", pair.host_name);
                    }
                }
                (OutputFormat::Text, true) => {
                    for pair in &pairs {
                        println!(
                            "{}:{} -> {}:{}",
                            pair.container_index,
                            pair.container_name,
                            pair.host_index,
                            pair.host_name
                        );
                    }
                }
                (OutputFormat::Json, false) => {
                    let names: Vec<&str> = pairs.iter().map(|p| p.host_name.as_str()).collect();
                    println!("{}", serde_json::to_string_pretty(&names)?);
                }
                (OutputFormat::Json, true) => {
                    let records: Vec<serde_json::Value> = pairs
                        .iter()
                        .map(|p| {
                            serde_json::json!({
                                "container_index": p.container_index,
                                "container_name": p.container_name,
                                "host_index": p.host_index,
                                "host_name": p.host_name,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&records)?);
                }
            }
            Ok(())
        }
    }
}

async fn route(command: RouteCommand, config: &FabricConfig) -> Result<()> {
    let mutator = RouteMutator::system(DockerCli::new(config.engine.clone()));

    match command {
        RouteCommand::ReplaceGateway { container, gateway } => {
            let container = ContainerRef::new(container);
            mutator.replace_gateway(&container, &gateway).await?;
            println!("Default route of {container} now via {gateway}");
            Ok(())
        }
    }
}

fn address(command: &AddrCommand, config: &FabricConfig) -> Result<()> {
    match command {
        AddrCommand::LastUsable { cidr } => println!("{}", addr::last_usable_address(cidr)?),
        AddrCommand::Gateway { cidr } => println!("{}", addr::gateway_address(cidr)?),
        AddrCommand::Range { cidr } => {
            let net = addr::parse_subnet(cidr)?;
            println!("{}", addr::allocation_range(&net, config.allocation_prefix)?);
        }
    }
    Ok(())
}

async fn link(command: LinkCommand) -> Result<()> {
    let links = HostLinks::connect()?;

    match command {
        LinkCommand::CreateBridge { name } => {
            links.create_bridge(&name).await?;
            println!("Bridge {name} created");
        }
        LinkCommand::CreateVeth { name, peer } => {
            links.create_veth(&name, &peer).await?;
            println!("Veth pair {name} <-> {peer} created");
        }
        LinkCommand::Attach { interface, bridge } => {
            links.attach_to_bridge(&interface, &bridge).await?;
            println!("Interface {interface} attached to {bridge}");
        }
        LinkCommand::Delete { name } => {
            links.delete(&name).await?;
            println!("Interface {name} deleted");
        }
    }
    Ok(())
}

async fn exec(network: &str, command: &[String]) -> Result<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| eyre!("no command given"))?;

    let binding = ProviderBinding::new(network);
    let mut child = std::process::Command::new(program);
    child.args(args);
    binding.apply(&mut child);
    tracing::debug!(network = binding.network(), program, ?args, "Running bound command");

    let status = tokio::process::Command::from(child)
        .status()
        .await
        .map_err(|e| eyre!("failed to run {program}: {e}"))?;
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => std::process::exit(code),
        None => Err(eyre!("{program} terminated by signal")),
    }
}
