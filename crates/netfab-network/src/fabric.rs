//! Bridge network fabrication.
//!
//! The fabricator derives the host bridge name and the restricted
//! allocation range, then hands a [`BridgeNetwork`] to the engine.

use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::Arc;

use ipnet::Ipv6Net;
use netfab_common::{FabricConfig, NetfabError, NetfabResult};

use crate::addr;
use crate::engine::{BridgeNetwork, ContainerEngine, ContainerRef, DockerCli};
use crate::netlink::{LinkOps, RtNetlink};
use crate::pinned;

/// Request for a new bridge network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Network name.
    pub name: String,
    /// IPv4 CIDR; `None` lets the engine choose.
    pub subnet: Option<String>,
    /// Masquerade outbound traffic.
    pub masquerade: bool,
    /// Interface MTU.
    pub mtu: Option<u32>,
    /// IPv6 CIDR for dual-stack networks.
    pub ipv6_subnet: Option<String>,
}

impl NetworkSpec {
    /// A network with an engine-chosen subnet and no masquerading.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Use a fixed IPv4 subnet.
    #[must_use]
    pub fn with_subnet(mut self, cidr: impl Into<String>) -> Self {
        self.subnet = Some(cidr.into());
        self
    }

    /// Enable or disable masquerading.
    #[must_use]
    pub const fn with_masquerade(mut self, masquerade: bool) -> Self {
        self.masquerade = masquerade;
        self
    }

    /// Set the MTU.
    #[must_use]
    pub const fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Add an IPv6 subnet.
    #[must_use]
    pub fn with_ipv6_subnet(mut self, cidr: impl Into<String>) -> Self {
        self.ipv6_subnet = Some(cidr.into());
        self
    }
}

/// Creates, deletes, lists and connects bridge networks.
pub struct NetworkFabricator<E, L> {
    engine: Arc<E>,
    links: Arc<L>,
    config: FabricConfig,
}

impl NetworkFabricator<DockerCli, RtNetlink> {
    /// Fabricator driving the configured engine binary.
    #[must_use]
    pub fn system(config: FabricConfig) -> Self {
        let engine = DockerCli::new(config.engine.clone());
        Self::new(Arc::new(engine), Arc::new(RtNetlink), config)
    }
}

impl<E, L> NetworkFabricator<E, L>
where
    E: ContainerEngine,
    L: LinkOps,
{
    /// Build a fabricator from its collaborators.
    pub const fn new(engine: Arc<E>, links: Arc<L>, config: FabricConfig) -> Self {
        Self {
            engine,
            links,
            config,
        }
    }

    /// Derive the host bridge interface name of a network.
    ///
    /// # Errors
    ///
    /// Returns [`NetfabError::Validation`] for names the engine would refuse.
    pub fn bridge_name(&self, name: &str) -> NetfabResult<String> {
        validate_network_name(name)?;
        let truncated: String = name.chars().take(self.config.bridge_name_chars).collect();
        Ok(format!("{}{}", self.config.bridge_prefix, truncated))
    }

    /// Derive the full bridge definition without creating anything.
    ///
    /// # Errors
    ///
    /// Returns [`NetfabError::Validation`] for bad names or CIDRs.
    pub fn plan(&self, spec: &NetworkSpec) -> NetfabResult<BridgeNetwork> {
        let bridge = self.bridge_name(&spec.name)?;
        let subnet = spec.subnet.as_deref().map(addr::parse_subnet).transpose()?;
        let ip_range = subnet
            .as_ref()
            .map(|net| addr::allocation_range(net, self.config.allocation_prefix))
            .transpose()?;
        let ipv6_subnet = spec
            .ipv6_subnet
            .as_deref()
            .map(|cidr| {
                cidr.trim().parse::<Ipv6Net>().map_err(|e| {
                    NetfabError::validation(format!("invalid IPv6 CIDR '{cidr}': {e}"))
                })
            })
            .transpose()?;
        if spec.mtu == Some(0) {
            return Err(NetfabError::validation("MTU must be greater than zero"));
        }

        Ok(BridgeNetwork {
            name: spec.name.clone(),
            bridge,
            subnet,
            ip_range,
            masquerade: spec.masquerade,
            mtu: spec.mtu,
            ipv6_subnet,
        })
    }

    /// Create a bridge network.
    ///
    /// # Errors
    ///
    /// [`NetfabError::Validation`] for malformed input or when the derived
    /// bridge name is already taken on the host; the engine's error when it
    /// rejects the network (name collision, overlapping subnet).
    pub async fn create_network(&self, spec: &NetworkSpec) -> NetfabResult<BridgeNetwork> {
        let network = self.plan(spec)?;

        let links = Arc::clone(&self.links);
        let bridge = network.bridge.clone();
        if pinned::run("bridge", move || links.link_exists(&bridge)).await? {
            return Err(NetfabError::validation(format!(
                "bridge interface {} for network {} already exists",
                network.bridge, network.name
            )));
        }

        self.engine.create_network(&network).await?;
        tracing::info!(
            name = %network.name,
            bridge = %network.bridge,
            subnet = ?network.subnet,
            ip_range = ?network.ip_range,
            "Created network"
        );
        Ok(network)
    }

    /// Delete a network; an absent network counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for any failure other than absence.
    pub async fn delete_network(&self, name: &str) -> NetfabResult<()> {
        match self.engine.delete_network(name).await {
            Ok(()) => {
                tracing::info!(name, "Deleted network");
                Ok(())
            }
            Err(NetfabError::NotFound { .. }) => {
                tracing::debug!(name, "Network already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Attach a container, optionally pinning its address.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn connect_network(
        &self,
        container: &ContainerRef,
        network: &str,
        ip: Option<Ipv4Addr>,
    ) -> NetfabResult<()> {
        self.engine.connect_network(container, network, ip).await?;
        tracing::info!(%container, network, ip = ?ip, "Connected container to network");
        Ok(())
    }

    /// Current network names as reported by the engine.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn list_networks(&self) -> NetfabResult<Vec<String>> {
        self.engine.list_networks().await
    }
}

/// Engine network names: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
fn validate_network_name(name: &str) -> NetfabResult<()> {
    let mut chars = name.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    if !valid_first || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return Err(NetfabError::validation(format!(
            "network name '{name}' must match [a-zA-Z0-9][a-zA-Z0-9_.-]*"
        )));
    }
    Ok(())
}

/// Network selection handed to an external cluster-provisioning tool.
///
/// The binding is applied to the child's [`Command`] only; the calling
/// process environment is never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderBinding {
    network: String,
}

impl ProviderBinding {
    /// Variable the provisioning tool reads to pick its network.
    pub const NETWORK_ENV: &'static str = "KIND_EXPERIMENTAL_DOCKER_NETWORK";

    /// Bind provisioning to `network`.
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
        }
    }

    /// The bound network name.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Environment entries to pass to the child.
    #[must_use]
    pub fn env(&self) -> [(&'static str, &str); 1] {
        [(Self::NETWORK_ENV, self.network.as_str())]
    }

    /// Apply the binding to a child command.
    pub fn apply<'c>(&self, command: &'c mut Command) -> &'c mut Command {
        command.envs(self.env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, FakeHost, FakeLink};

    fn fabricator() -> (NetworkFabricator<FakeEngine, FakeHost>, Arc<FakeEngine>) {
        fabricator_with(FakeHost::new())
    }

    fn fabricator_with(
        host: FakeHost,
    ) -> (NetworkFabricator<FakeEngine, FakeHost>, Arc<FakeEngine>) {
        let engine = Arc::new(FakeEngine::new().with_container("wan-test", 10));
        (
            NetworkFabricator::new(Arc::clone(&engine), Arc::new(host), FabricConfig::default()),
            engine,
        )
    }

    #[test]
    fn bridge_name_truncates_to_twelve_chars() {
        let (fab, _) = fabricator();
        assert_eq!(fab.bridge_name("multi-test-0").unwrap(), "br-multi-test-0");
        assert_eq!(
            fab.bridge_name("multi-cluster-west-1").unwrap(),
            "br-multi-cluste"
        );
        assert_eq!(fab.bridge_name("bm").unwrap(), "br-bm");
    }

    #[test]
    fn bridge_name_rejects_invalid_names() {
        let (fab, _) = fabricator();
        for bad in ["", "-lead", "has space", "slash/name"] {
            assert!(
                matches!(fab.bridge_name(bad), Err(NetfabError::Validation { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn plan_restricts_allocation_range() {
        let (fab, _) = fabricator();
        let plan = fab
            .plan(&NetworkSpec::new("multi-test-1").with_subnet("10.10.1.0/24"))
            .unwrap();
        assert_eq!(plan.subnet.unwrap().to_string(), "10.10.1.0/24");
        assert_eq!(plan.ip_range.unwrap().to_string(), "10.10.1.0/27");
        assert!(!plan.masquerade);
    }

    #[test]
    fn plan_without_subnet_leaves_allocation_to_engine() {
        let (fab, _) = fabricator();
        let plan = fab
            .plan(&NetworkSpec::new("bm-test").with_masquerade(true))
            .unwrap();
        assert!(plan.subnet.is_none());
        assert!(plan.ip_range.is_none());
        assert!(plan.masquerade);
    }

    #[test]
    fn plan_rejects_bad_cidrs() {
        let (fab, _) = fabricator();
        assert!(matches!(
            fab.plan(&NetworkSpec::new("x").with_subnet("10.10.0.0/40")),
            Err(NetfabError::Validation { .. })
        ));
        assert!(matches!(
            fab.plan(
                &NetworkSpec::new("x")
                    .with_subnet("10.10.0.0/24")
                    .with_ipv6_subnet("10.0.0.0/8")
            ),
            Err(NetfabError::Validation { .. })
        ));
        assert!(matches!(
            fab.plan(&NetworkSpec::new("x").with_mtu(0)),
            Err(NetfabError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn create_then_list() {
        let (fab, engine) = fabricator();
        let spec = NetworkSpec::new("multi-test-0")
            .with_subnet("10.10.0.0/24")
            .with_mtu(1400)
            .with_ipv6_subnet("fd00:10::/64");

        let created = fab.create_network(&spec).await.unwrap();
        assert_eq!(created.bridge, "br-multi-test-0");
        assert_eq!(engine.networks(), vec![created]);
        assert_eq!(fab.list_networks().await.unwrap(), vec!["multi-test-0"]);
    }

    #[tokio::test]
    async fn existing_bridge_interface_is_a_naming_error() {
        let host = FakeHost::new().with_host_link(FakeLink::other(4, "br-multi-test-0"));
        let (fab, engine) = fabricator_with(host);

        let err = fab
            .create_network(&NetworkSpec::new("multi-test-0"))
            .await
            .unwrap_err();
        assert!(matches!(err, NetfabError::Validation { .. }));
        assert!(engine.networks().is_empty());
    }

    #[tokio::test]
    async fn engine_rejections_surface_as_external_tool_errors() {
        let (fab, _) = fabricator();
        fab.create_network(&NetworkSpec::new("multi-a").with_subnet("10.10.0.0/24"))
            .await
            .unwrap();

        let err = fab
            .create_network(&NetworkSpec::new("multi-b").with_subnet("10.10.0.0/16"))
            .await
            .unwrap_err();
        assert!(matches!(err, NetfabError::ExternalTool { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_from_list() {
        let (fab, _) = fabricator();
        fab.create_network(&NetworkSpec::new("multi-test-0"))
            .await
            .unwrap();

        fab.delete_network("multi-test-0").await.unwrap();
        assert!(!fab
            .list_networks()
            .await
            .unwrap()
            .contains(&"multi-test-0".to_string()));
        fab.delete_network("multi-test-0").await.unwrap();
    }

    #[tokio::test]
    async fn connect_with_static_address() {
        let (fab, engine) = fabricator();
        fab.create_network(&NetworkSpec::new("multi-test-0").with_subnet("10.10.0.0/24"))
            .await
            .unwrap();
        let gateway = addr::gateway_address("10.10.0.0/24").unwrap();

        fab.connect_network(&"wan-test".into(), "multi-test-0", Some(gateway))
            .await
            .unwrap();
        assert_eq!(
            engine.connections(),
            vec![(
                "wan-test".to_string(),
                "multi-test-0".to_string(),
                Some(Ipv4Addr::new(10, 10, 0, 254))
            )]
        );
    }

    #[tokio::test]
    async fn connect_to_missing_network_fails() {
        let (fab, _) = fabricator();
        let err = fab
            .connect_network(&"wan-test".into(), "nope", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn provider_binding_scopes_env_to_child() {
        let binding = ProviderBinding::new("multi-test-0");
        assert_eq!(binding.network(), "multi-test-0");
        let mut cmd = Command::new("kind");
        binding.apply(&mut cmd);

        let envs: Vec<_> = cmd.get_envs().collect();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].0, ProviderBinding::NETWORK_ENV);
        assert_eq!(envs[0].1.and_then(|v| v.to_str()), Some("multi-test-0"));
        assert!(std::env::var_os(ProviderBinding::NETWORK_ENV).is_none());
    }
}
