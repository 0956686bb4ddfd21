//! Link and route operations against the calling thread's namespace.
//!
//! A netlink socket belongs to the namespace its creating thread was in.
//! [`RtNetlink`] opens a fresh socket for every call, so each call observes
//! whatever namespace the thread has entered at that moment.

use std::future::Future;
use std::net::Ipv4Addr;

use futures::TryStreamExt;
use netfab_common::{NetfabError, NetfabResult};
use rtnetlink::packet_route::link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage};
use rtnetlink::{Handle, RouteMessageBuilder};

/// A veth interface as seen from inside its own namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethLink {
    /// Interface index in this namespace.
    pub index: u32,
    /// Interface name in this namespace.
    pub name: String,
    /// Index of the peer end, valid in the peer's namespace.
    pub peer_index: u32,
}

/// Kernel link and route operations.
///
/// Every method acts on the namespace of the calling OS thread.
pub trait LinkOps: Send + Sync + 'static {
    /// All veth links, in kernel enumeration order.
    fn veth_links(&self) -> NetfabResult<Vec<VethLink>>;

    /// Current name of the interface with this index.
    fn link_name(&self, index: u32) -> NetfabResult<String>;

    /// Whether an interface with this name exists.
    fn link_exists(&self, name: &str) -> NetfabResult<bool>;

    /// Point the default IPv4 route at `gateway`, replacing any existing one.
    fn replace_default_route(&self, gateway: Ipv4Addr) -> NetfabResult<()>;
}

/// Map a netlink failure onto the error taxonomy.
pub(crate) fn netlink_error(operation: &str, err: rtnetlink::Error) -> NetfabError {
    match err {
        rtnetlink::Error::NetlinkError(msg) => {
            let io = msg.to_io();
            let code = io.raw_os_error();
            if code == Some(rustix::io::Errno::NODEV.raw_os_error())
                || code == Some(rustix::io::Errno::NOENT.raw_os_error())
            {
                NetfabError::not_found(format!("{operation}: {io}"))
            } else {
                NetfabError::from_os(operation, &io)
            }
        }
        other => NetfabError::KernelRejected {
            operation: operation.to_string(),
            message: other.to_string(),
        },
    }
}

fn link_name_of(msg: &LinkMessage) -> Option<&str> {
    msg.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.as_str()),
        _ => None,
    })
}

fn is_veth(msg: &LinkMessage) -> bool {
    msg.attributes.iter().any(|attr| match attr {
        LinkAttribute::LinkInfo(infos) => infos
            .iter()
            .any(|info| matches!(info, LinkInfo::Kind(InfoKind::Veth))),
        _ => false,
    })
}

/// Extract the veth view of a link message, `None` for other link kinds.
fn veth_link(msg: &LinkMessage) -> Option<NetfabResult<VethLink>> {
    if !is_veth(msg) {
        return None;
    }
    let index = msg.header.index;
    let name = link_name_of(msg).unwrap_or_default().to_string();
    // IFLA_LINK on a veth is the peer ifindex, even across namespaces.
    let peer_index = msg.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::Link(peer) => Some(*peer),
        _ => None,
    });
    Some(match peer_index {
        Some(peer_index) => Ok(VethLink {
            index,
            name,
            peer_index,
        }),
        None => Err(NetfabError::KernelRejected {
            operation: "resolve veth peer".to_string(),
            message: format!("link {name} (index {index}) carries no peer index"),
        }),
    })
}

/// [`LinkOps`] over rtnetlink.
///
/// Each call drives its own single-threaded runtime, so it must run on a
/// thread without one, such as a worker from [`crate::pinned`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RtNetlink;

impl RtNetlink {
    fn block_on<T, F, Fut>(f: F) -> NetfabResult<T>
    where
        F: FnOnce(Handle) -> Fut,
        Fut: Future<Output = NetfabResult<T>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        runtime.block_on(async move {
            let (connection, handle, _) = rtnetlink::new_connection()?;
            let connection = tokio::spawn(connection);
            let result = f(handle).await;
            connection.abort();
            result
        })
    }
}

impl LinkOps for RtNetlink {
    fn veth_links(&self) -> NetfabResult<Vec<VethLink>> {
        Self::block_on(|handle| async move {
            let mut links = handle.link().get().execute();
            let mut veths = Vec::new();
            while let Some(msg) = links
                .try_next()
                .await
                .map_err(|e| netlink_error("list links", e))?
            {
                if let Some(veth) = veth_link(&msg) {
                    veths.push(veth?);
                }
            }
            tracing::debug!(count = veths.len(), "Enumerated veth links");
            Ok(veths)
        })
    }

    fn link_name(&self, index: u32) -> NetfabResult<String> {
        Self::block_on(|handle| async move {
            let operation = format!("get link {index}");
            let mut links = handle.link().get().match_index(index).execute();
            let msg = links
                .try_next()
                .await
                .map_err(|e| netlink_error(&operation, e))?
                .ok_or_else(|| NetfabError::not_found(format!("link with index {index}")))?;
            link_name_of(&msg).map(str::to_string).ok_or_else(|| {
                NetfabError::KernelRejected {
                    operation,
                    message: "link message has no name".to_string(),
                }
            })
        })
    }

    fn link_exists(&self, name: &str) -> NetfabResult<bool> {
        let name = name.to_string();
        Self::block_on(|handle| async move {
            let mut links = handle.link().get().match_name(name.clone()).execute();
            match links.try_next().await {
                Ok(found) => Ok(found.is_some()),
                Err(e) => match netlink_error(&format!("get link {name}"), e) {
                    NetfabError::NotFound { .. } => Ok(false),
                    other => Err(other),
                },
            }
        })
    }

    fn replace_default_route(&self, gateway: Ipv4Addr) -> NetfabResult<()> {
        Self::block_on(|handle| async move {
            let route = RouteMessageBuilder::<Ipv4Addr>::new()
                .gateway(gateway)
                .build();
            handle
                .route()
                .add(route)
                .replace()
                .execute()
                .await
                .map_err(|e| netlink_error(&format!("replace default route via {gateway}"), e))
        })
    }
}
