//! In-memory stand-ins for the kernel and the container engine.
//!
//! [`FakeHost`] tracks each thread's namespace in a thread-local, the same
//! way the kernel does, so a worker thread starts in [`HOST_NS`] and the
//! tests can observe exactly which namespaces were entered.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use async_trait::async_trait;
use netfab_common::{NetfabError, NetfabResult};
use parking_lot::Mutex;

use crate::engine::{BridgeNetwork, ContainerEngine, ContainerRef};
use crate::netlink::{LinkOps, VethLink};
use crate::netns::NamespaceSwitcher;

/// Namespace every fresh thread starts in.
pub const HOST_NS: u64 = 1;

thread_local! {
    static CURRENT: Cell<u64> = const { Cell::new(HOST_NS) };
}

#[derive(Debug, Clone)]
pub struct FakeLink {
    index: u32,
    name: String,
    peer: Option<u32>,
}

impl FakeLink {
    pub fn veth(index: u32, name: &str, peer: u32) -> Self {
        Self {
            index,
            name: name.to_string(),
            peer: Some(peer),
        }
    }

    pub fn other(index: u32, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            peer: None,
        }
    }
}

#[derive(Debug, Default)]
struct HostState {
    pids: HashMap<u32, u64>,
    links: HashMap<u64, Vec<FakeLink>>,
    routes: HashMap<u64, Vec<Ipv4Addr>>,
    unreachable: HashSet<Ipv4Addr>,
    entries: Vec<u64>,
    deny_setns: bool,
    fail_enumeration: bool,
}

#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self::default();
        host.state
            .lock()
            .links
            .insert(HOST_NS, vec![FakeLink::other(1, "lo")]);
        host
    }

    pub fn with_host_link(self, link: FakeLink) -> Self {
        self.state.lock().links.entry(HOST_NS).or_default().push(link);
        self
    }

    pub fn with_container(self, pid: u32, ns: u64, links: Vec<FakeLink>) -> Self {
        {
            let mut state = self.state.lock();
            state.pids.insert(pid, ns);
            let mut all = vec![FakeLink::other(1, "lo")];
            all.extend(links);
            state.links.insert(ns, all);
        }
        self
    }

    pub fn with_default_route(self, ns: u64, gateway: Ipv4Addr) -> Self {
        self.state.lock().routes.insert(ns, vec![gateway]);
        self
    }

    pub fn with_unreachable(self, gateway: Ipv4Addr) -> Self {
        self.state.lock().unreachable.insert(gateway);
        self
    }

    pub fn deny_setns(self) -> Self {
        self.state.lock().deny_setns = true;
        self
    }

    pub fn fail_enumeration(self) -> Self {
        self.state.lock().fail_enumeration = true;
        self
    }

    pub fn thread_namespace() -> u64 {
        CURRENT.get()
    }

    /// Every namespace entered so far, restores included.
    pub fn entries(&self) -> Vec<u64> {
        self.state.lock().entries.clone()
    }

    pub fn default_routes(&self, ns: u64) -> Vec<Ipv4Addr> {
        self.state.lock().routes.get(&ns).cloned().unwrap_or_default()
    }
}

impl NamespaceSwitcher for FakeHost {
    type Handle = u64;

    fn current(&self) -> NetfabResult<u64> {
        Ok(CURRENT.get())
    }

    fn of_pid(&self, pid: u32) -> NetfabResult<u64> {
        self.state
            .lock()
            .pids
            .get(&pid)
            .copied()
            .ok_or_else(|| NetfabError::not_found(format!("network namespace of pid {pid}")))
    }

    fn enter(&self, ns: &u64) -> NetfabResult<()> {
        let mut state = self.state.lock();
        if state.deny_setns {
            return Err(NetfabError::PermissionDenied {
                operation: format!("setns {ns}"),
            });
        }
        state.entries.push(*ns);
        CURRENT.set(*ns);
        Ok(())
    }
}

impl LinkOps for FakeHost {
    fn veth_links(&self) -> NetfabResult<Vec<VethLink>> {
        let state = self.state.lock();
        if state.fail_enumeration {
            return Err(NetfabError::KernelRejected {
                operation: "list links".to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(state
            .links
            .get(&CURRENT.get())
            .into_iter()
            .flatten()
            .filter_map(|l| {
                l.peer.map(|peer_index| VethLink {
                    index: l.index,
                    name: l.name.clone(),
                    peer_index,
                })
            })
            .collect())
    }

    fn link_name(&self, index: u32) -> NetfabResult<String> {
        self.state
            .lock()
            .links
            .get(&CURRENT.get())
            .into_iter()
            .flatten()
            .find(|l| l.index == index)
            .map(|l| l.name.clone())
            .ok_or_else(|| NetfabError::not_found(format!("link with index {index}")))
    }

    fn link_exists(&self, name: &str) -> NetfabResult<bool> {
        Ok(self
            .state
            .lock()
            .links
            .get(&CURRENT.get())
            .into_iter()
            .flatten()
            .any(|l| l.name == name))
    }

    fn replace_default_route(&self, gateway: Ipv4Addr) -> NetfabResult<()> {
        let mut state = self.state.lock();
        if state.unreachable.contains(&gateway) {
            return Err(NetfabError::KernelRejected {
                operation: format!("replace default route via {gateway}"),
                message: "Network is unreachable".to_string(),
            });
        }
        let ns = CURRENT.get();
        state.routes.insert(ns, vec![gateway]);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EngineState {
    containers: HashMap<String, u32>,
    networks: Vec<BridgeNetwork>,
    connections: Vec<(String, String, Option<Ipv4Addr>)>,
    pid_lookups: usize,
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, name: &str, pid: u32) -> Self {
        self.state.lock().containers.insert(name.to_string(), pid);
        self
    }

    pub fn networks(&self) -> Vec<BridgeNetwork> {
        self.state.lock().networks.clone()
    }

    pub fn connections(&self) -> Vec<(String, String, Option<Ipv4Addr>)> {
        self.state.lock().connections.clone()
    }

    pub fn pid_lookups(&self) -> usize {
        self.state.lock().pid_lookups
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn container_pid(&self, container: &ContainerRef) -> NetfabResult<u32> {
        let mut state = self.state.lock();
        state.pid_lookups += 1;
        state
            .containers
            .get(container.as_str())
            .copied()
            .ok_or_else(|| NetfabError::not_found(format!("container {container}")))
    }

    async fn create_network(&self, network: &BridgeNetwork) -> NetfabResult<()> {
        let mut state = self.state.lock();
        if state.networks.iter().any(|n| n.name == network.name) {
            return Err(NetfabError::ExternalTool {
                command: "docker network create".to_string(),
                detail: format!("network with name {} already exists", network.name),
            });
        }
        if let Some(subnet) = network.subnet {
            let overlaps = state.networks.iter().filter_map(|n| n.subnet).any(|other| {
                other.contains(&subnet.network()) || subnet.contains(&other.network())
            });
            if overlaps {
                return Err(NetfabError::ExternalTool {
                    command: "docker network create".to_string(),
                    detail: "Pool overlaps with other one on this address space".to_string(),
                });
            }
        }
        state.networks.push(network.clone());
        Ok(())
    }

    async fn delete_network(&self, name: &str) -> NetfabResult<()> {
        let mut state = self.state.lock();
        let before = state.networks.len();
        state.networks.retain(|n| n.name != name);
        if state.networks.len() == before {
            return Err(NetfabError::not_found(format!("network {name}")));
        }
        Ok(())
    }

    async fn list_networks(&self) -> NetfabResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .networks
            .iter()
            .map(|n| n.name.clone())
            .collect())
    }

    async fn connect_network(
        &self,
        container: &ContainerRef,
        network: &str,
        ip: Option<Ipv4Addr>,
    ) -> NetfabResult<()> {
        let mut state = self.state.lock();
        if !state.containers.contains_key(container.as_str()) {
            return Err(NetfabError::not_found(format!("container {container}")));
        }
        if !state.networks.iter().any(|n| n.name == network) {
            return Err(NetfabError::not_found(format!("network {network}")));
        }
        state
            .connections
            .push((container.to_string(), network.to_string(), ip));
        Ok(())
    }
}
