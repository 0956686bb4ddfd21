//! # netfab-network
//!
//! Building blocks for multi-zone and multi-cluster container test
//! topologies:
//!
//! - [`fabric`]: bridge networks with a restricted dynamic allocation range
//! - [`probe`]: host-side veth peers of a container's interfaces
//! - [`route`]: default gateway replacement inside a container
//! - [`addr`]: the subnet arithmetic behind all of the above
//!
//! Namespace work never runs on the caller's thread. Each probe or route
//! change gets its own worker from [`pinned`], enters the container's
//! namespace through [`netns::NamespaceGuard`] and always returns to the
//! origin before the worker exits.
//!
//! ```no_run
//! use netfab_common::FabricConfig;
//! use netfab_network::{DockerCli, NetworkFabricator, NetworkSpec, RouteMutator, addr};
//!
//! # async fn example() -> netfab_common::NetfabResult<()> {
//! let fabric = NetworkFabricator::system(FabricConfig::default());
//! fabric
//!     .create_network(&NetworkSpec::new("multi-demo-0").with_subnet("10.10.0.0/24"))
//!     .await?;
//!
//! let gateway = addr::gateway_address("10.10.0.0/24")?;
//! fabric
//!     .connect_network(&"wan-demo".into(), "multi-demo-0", Some(gateway))
//!     .await?;
//!
//! RouteMutator::system(DockerCli::default())
//!     .replace_gateway(&"multi-demo-0-control-plane".into(), &gateway.to_string())
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod addr;
pub mod engine;
pub mod fabric;
pub mod link;
pub mod netlink;
pub mod netns;
pub mod pinned;
pub mod probe;
pub mod route;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{BridgeNetwork, ContainerEngine, ContainerRef, DockerCli};
pub use fabric::{NetworkFabricator, NetworkSpec, ProviderBinding};
pub use link::HostLinks;
pub use netlink::{LinkOps, RtNetlink, VethLink};
pub use netns::{NamespaceGuard, NamespaceSwitcher, ProcNamespaces};
pub use probe::{NamespaceProber, VethPair};
pub use route::RouteMutator;
