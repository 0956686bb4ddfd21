//! Host-side bridge and veth management.
//!
//! These run in the caller's namespace on the caller's tokio runtime and
//! back the extra zone bridges and point-to-point links of a topology.

use futures::TryStreamExt;
use netfab_common::config::MAX_IFNAME_LEN;
use netfab_common::{NetfabError, NetfabResult};
use rtnetlink::{Handle, LinkBridge, LinkUnspec, LinkVeth};
use tokio::task::JoinHandle;

use crate::netlink::netlink_error;

/// Manages links in the host namespace over one netlink connection.
#[derive(Debug)]
pub struct HostLinks {
    handle: Handle,
    connection: JoinHandle<()>,
}

fn check_ifname(name: &str) -> NetfabResult<()> {
    if name.is_empty() || name.len() > MAX_IFNAME_LEN || name.contains(['/', ' ', '\t', '\n']) {
        return Err(NetfabError::validation(format!(
            "invalid interface name '{name}': need 1-{MAX_IFNAME_LEN} chars, no '/' or spaces"
        )));
    }
    Ok(())
}

impl HostLinks {
    /// Open a netlink connection on the current runtime.
    ///
    /// # Errors
    ///
    /// Fails if the netlink socket cannot be created.
    pub fn connect() -> NetfabResult<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        Ok(Self {
            handle,
            connection: tokio::spawn(connection),
        })
    }

    /// Index of the named link.
    ///
    /// # Errors
    ///
    /// [`NetfabError::NotFound`] if no such link exists.
    pub async fn index_of(&self, name: &str) -> NetfabResult<u32> {
        let operation = format!("get link {name}");
        let mut links = self.handle.link().get().match_name(name.to_string()).execute();
        links
            .try_next()
            .await
            .map_err(|e| netlink_error(&operation, e))?
            .map(|msg| msg.header.index)
            .ok_or_else(|| NetfabError::not_found(format!("link {name}")))
    }

    /// Create a bridge and bring it up.
    ///
    /// # Errors
    ///
    /// Fails on invalid names or if the kernel refuses the link.
    pub async fn create_bridge(&self, name: &str) -> NetfabResult<()> {
        check_ifname(name)?;
        tracing::debug!(name, "Creating bridge");
        self.handle
            .link()
            .add(LinkBridge::new(name).up().build())
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("create bridge {name}"), e))?;
        tracing::info!(name, "Bridge created");
        Ok(())
    }

    /// Create a veth pair.
    ///
    /// # Errors
    ///
    /// Fails on invalid names or if the kernel refuses the link.
    pub async fn create_veth(&self, name: &str, peer: &str) -> NetfabResult<()> {
        check_ifname(name)?;
        check_ifname(peer)?;
        tracing::debug!(name, peer, "Creating veth pair");
        self.handle
            .link()
            .add(LinkVeth::new(name, peer).build())
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("create veth {name}/{peer}"), e))?;
        tracing::info!(name, peer, "Veth pair created");
        Ok(())
    }

    /// Enslave `interface` to `bridge`.
    ///
    /// # Errors
    ///
    /// [`NetfabError::NotFound`] if either link is missing.
    pub async fn attach_to_bridge(&self, interface: &str, bridge: &str) -> NetfabResult<()> {
        let interface_index = self.index_of(interface).await?;
        let bridge_index = self.index_of(bridge).await?;
        tracing::debug!(interface, bridge, "Adding interface to bridge");
        self.handle
            .link()
            .set(
                LinkUnspec::new_with_index(interface_index)
                    .controller(bridge_index)
                    .build(),
            )
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("attach {interface} to {bridge}"), e))?;
        Ok(())
    }

    /// Delete a link; deleting one end of a veth removes both.
    ///
    /// # Errors
    ///
    /// [`NetfabError::NotFound`] if the link is missing.
    pub async fn delete(&self, name: &str) -> NetfabResult<()> {
        let index = self.index_of(name).await?;
        tracing::debug!(name, index, "Deleting link");
        self.handle
            .link()
            .del(index)
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("delete link {name}"), e))?;
        tracing::info!(name, "Link deleted");
        Ok(())
    }
}

impl Drop for HostLinks {
    fn drop(&mut self) {
        self.connection.abort();
    }
}
