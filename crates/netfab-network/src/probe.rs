//! Veth peer discovery across the container namespace boundary.

use std::sync::Arc;

use netfab_common::NetfabResult;
use tracing::Instrument as _;

use crate::engine::{ContainerEngine, ContainerRef, DockerCli};
use crate::netlink::{LinkOps, RtNetlink};
use crate::netns::{self, NamespaceSwitcher, ProcNamespaces};
use crate::pinned;

/// A container-side veth and its host-side peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// Index inside the container namespace.
    pub container_index: u32,
    /// Name inside the container namespace.
    pub container_name: String,
    /// Index of the peer in the host namespace.
    pub host_index: u32,
    /// Name of the peer in the host namespace.
    pub host_name: String,
}

/// Maps a container's veth interfaces to their host-side peers.
pub struct NamespaceProber<E, S, L> {
    engine: Arc<E>,
    switcher: Arc<S>,
    links: Arc<L>,
}

impl NamespaceProber<DockerCli, ProcNamespaces, RtNetlink> {
    /// Prober over the real kernel interfaces.
    #[must_use]
    pub fn system(engine: DockerCli) -> Self {
        Self::new(Arc::new(engine), Arc::new(ProcNamespaces), Arc::new(RtNetlink))
    }
}

impl<E, S, L> NamespaceProber<E, S, L>
where
    E: ContainerEngine,
    S: NamespaceSwitcher,
    L: LinkOps,
{
    /// Build a prober from its collaborators.
    pub const fn new(engine: Arc<E>, switcher: Arc<S>, links: Arc<L>) -> Self {
        Self {
            engine,
            switcher,
            links,
        }
    }

    /// Veth pairs of `container`, in the container's link enumeration order.
    ///
    /// # Errors
    ///
    /// Fails with [`NotFound`] if the container is missing or stopped,
    /// [`PermissionDenied`] without the capability to switch namespaces,
    /// and with the kernel's error if a link cannot be read. No partial
    /// result is returned.
    ///
    /// [`NotFound`]: netfab_common::NetfabError::NotFound
    /// [`PermissionDenied`]: netfab_common::NetfabError::PermissionDenied
    pub async fn veth_pairs(&self, container: &ContainerRef) -> NetfabResult<Vec<VethPair>> {
        let span = tracing::debug_span!("probe", %container);
        async {
            let pid = self.engine.container_pid(container).await?;
            tracing::debug!(pid, "Resolved container pid");

            let switcher = Arc::clone(&self.switcher);
            let links = Arc::clone(&self.links);
            let pairs = pinned::run("probe", move || peers_of_pid(&*switcher, &*links, pid)).await?;

            tracing::debug!(count = pairs.len(), "Resolved veth peers");
            Ok(pairs)
        }
        .instrument(span)
        .await
    }

    /// Host-side interface names peered with `container`'s veths.
    ///
    /// The order follows the container's link enumeration and says nothing
    /// about which container interface a name belongs to; use
    /// [`veth_pairs`](Self::veth_pairs) to correlate.
    ///
    /// # Errors
    ///
    /// As [`veth_pairs`](Self::veth_pairs).
    pub async fn host_interfaces(&self, container: &ContainerRef) -> NetfabResult<Vec<String>> {
        Ok(self
            .veth_pairs(container)
            .await?
            .into_iter()
            .map(|pair| pair.host_name)
            .collect())
    }
}

/// Runs on the pinned worker.
fn peers_of_pid<S, L>(switcher: &S, links: &L, pid: u32) -> NetfabResult<Vec<VethPair>>
where
    S: NamespaceSwitcher,
    L: LinkOps,
{
    let origin = switcher.current()?;
    let target = switcher.of_pid(pid)?;

    let veths = netns::with_namespace(switcher, origin, &target, || links.veth_links())?;

    // Peer indices are only meaningful back in the origin namespace.
    veths
        .into_iter()
        .map(|veth| {
            Ok(VethPair {
                host_name: links.link_name(veth.peer_index)?,
                host_index: veth.peer_index,
                container_index: veth.index,
                container_name: veth.name,
            })
        })
        .collect()
}
