//! Default gateway replacement inside a container namespace.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use netfab_common::{NetfabError, NetfabResult};
use tracing::Instrument as _;

use crate::engine::{ContainerEngine, ContainerRef, DockerCli};
use crate::netlink::{LinkOps, RtNetlink};
use crate::netns::{self, NamespaceSwitcher, ProcNamespaces};
use crate::pinned;

/// Parse a gateway literal, accepting IPv4 only.
///
/// # Errors
///
/// Returns [`NetfabError::Validation`] for IPv6 or unparseable input.
pub fn parse_gateway(gateway: &str) -> NetfabResult<Ipv4Addr> {
    match gateway.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Ok(v4),
        Ok(IpAddr::V6(_)) => Err(NetfabError::validation(format!(
            "unsupported gateway {gateway}: only IPv4 gateways can be set"
        ))),
        Err(e) => Err(NetfabError::validation(format!(
            "invalid gateway address '{gateway}': {e}"
        ))),
    }
}

/// Rewrites the default route of container namespaces.
pub struct RouteMutator<E, S, L> {
    engine: Arc<E>,
    switcher: Arc<S>,
    links: Arc<L>,
}

impl RouteMutator<DockerCli, ProcNamespaces, RtNetlink> {
    /// Mutator over the real kernel interfaces.
    #[must_use]
    pub fn system(engine: DockerCli) -> Self {
        Self::new(Arc::new(engine), Arc::new(ProcNamespaces), Arc::new(RtNetlink))
    }
}

impl<E, S, L> RouteMutator<E, S, L>
where
    E: ContainerEngine,
    S: NamespaceSwitcher,
    L: LinkOps,
{
    /// Build a mutator from its collaborators.
    pub const fn new(engine: Arc<E>, switcher: Arc<S>, links: Arc<L>) -> Self {
        Self {
            engine,
            switcher,
            links,
        }
    }

    /// Make `gateway` the default route of `container`.
    ///
    /// An existing default route is overwritten in place, so repeating the
    /// call with the same gateway changes nothing. The gateway literal is
    /// validated before the engine or any namespace is touched.
    ///
    /// # Errors
    ///
    /// [`NetfabError::Validation`] for a non-IPv4 gateway,
    /// [`NetfabError::NotFound`] for a missing container,
    /// [`NetfabError::PermissionDenied`] without privileges and
    /// [`NetfabError::KernelRejected`] when the stack refuses the route.
    pub async fn replace_gateway(
        &self,
        container: &ContainerRef,
        gateway: &str,
    ) -> NetfabResult<()> {
        let gateway = parse_gateway(gateway)?;
        let span = tracing::debug_span!("replace_gateway", %container, %gateway);
        async {
            let pid = self.engine.container_pid(container).await?;
            tracing::debug!(pid, "Resolved container pid");

            let switcher = Arc::clone(&self.switcher);
            let links = Arc::clone(&self.links);
            pinned::run("route", move || {
                let origin = switcher.current()?;
                let target = switcher.of_pid(pid)?;
                netns::with_namespace(&*switcher, origin, &target, || {
                    links.replace_default_route(gateway)
                })
            })
            .await?;

            tracing::info!(%container, %gateway, "Replaced default gateway");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
