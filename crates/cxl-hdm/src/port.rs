//! The port tree.
//!
//! Ports form a rooted tree: the platform root (depth 0), host bridges
//! (depth 1), optional switches, and endpoints at the leaves. The tree is an
//! arena addressed by stable handles; a port owns its decoders and its
//! downstream-port ids, and holds a non-owning handle back to its parent.

use tracing::debug;

use crate::decoder::Decoder;
use crate::error::{HdmError, Result};
use crate::regs::RegisterBlock;

/// Stable handle for a port in a [`Topology`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Root,
    HostBridge,
    Switch,
    Endpoint,
}

/// A node in the port tree.
pub struct Port {
    pub kind: PortKind,
    /// Root is 0, host bridges 1, and so on down the tree.
    pub depth: u32,
    pub parent: Option<PortHandle>,
    /// The dport id on the parent through which this port hangs.
    pub parent_dport: Option<u8>,
    /// Ordered downstream-port ids, as used in hardware target lists.
    pub dports: Vec<u8>,
    /// Component register block; absent means no decoder capability
    /// (passthrough).
    pub regs: Option<Box<dyn RegisterBlock>>,
    pub decoders: Vec<Decoder>,
    /// Endpoint targets persistent memory.
    pub pmem: bool,
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("kind", &self.kind)
            .field("depth", &self.depth)
            .field("parent", &self.parent)
            .field("parent_dport", &self.parent_dport)
            .field("dports", &self.dports)
            .field("has_regs", &self.regs.is_some())
            .field("decoders", &self.decoders.len())
            .field("pmem", &self.pmem)
            .finish()
    }
}

/// Arena of ports. Topology is discovered top-down: the root first, then
/// children against their parent handle.
#[derive(Debug, Default)]
pub struct Topology {
    ports: Vec<Port>,
    root: Option<PortHandle>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, regs: Option<Box<dyn RegisterBlock>>) -> PortHandle {
        let handle = PortHandle(self.ports.len());
        self.ports.push(Port {
            kind: PortKind::Root,
            depth: 0,
            parent: None,
            parent_dport: None,
            dports: Vec::new(),
            regs,
            decoders: Vec::new(),
            pmem: false,
        });
        self.root = Some(handle);
        handle
    }

    /// Add a port below `parent`, hanging off the parent's dport
    /// `parent_dport`. The dport is recorded on the parent if not already
    /// declared.
    pub fn add_port(
        &mut self,
        parent: PortHandle,
        kind: PortKind,
        parent_dport: u8,
        regs: Option<Box<dyn RegisterBlock>>,
    ) -> PortHandle {
        let depth = self.ports[parent.0].depth + 1;
        {
            let p = &mut self.ports[parent.0];
            if !p.dports.contains(&parent_dport) {
                p.dports.push(parent_dport);
            }
        }
        let handle = PortHandle(self.ports.len());
        self.ports.push(Port {
            kind,
            depth,
            parent: Some(parent),
            parent_dport: Some(parent_dport),
            dports: Vec::new(),
            regs,
            decoders: Vec::new(),
            pmem: false,
        });
        handle
    }

    pub fn root(&self) -> Option<PortHandle> {
        self.root
    }

    pub fn port(&self, handle: PortHandle) -> &Port {
        &self.ports[handle.0]
    }

    pub fn port_mut(&mut self, handle: PortHandle) -> &mut Port {
        &mut self.ports[handle.0]
    }

    /// Ports hanging directly below `handle`, in creation order.
    pub fn children(&self, handle: PortHandle) -> impl Iterator<Item = PortHandle> + '_ {
        self.ports
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.parent == Some(handle))
            .map(|(i, _)| PortHandle(i))
    }

    /// The depth-1 ancestor aggregating this endpoint into the platform
    /// decode topology.
    pub fn host_bridge_of(&self, endpoint: PortHandle) -> Option<PortHandle> {
        let mut cur = endpoint;
        while self.ports[cur.0].depth > 1 {
            cur = self.ports[cur.0].parent?;
        }
        if self.ports[cur.0].depth == 1 {
            Some(cur)
        } else {
            None
        }
    }

    /// The dport id on the endpoint's host bridge through which its traffic
    /// routes (the root port).
    pub fn root_port_of(&self, endpoint: PortHandle) -> Option<u8> {
        let mut cur = endpoint;
        while self.ports[cur.0].depth > 2 {
            cur = self.ports[cur.0].parent?;
        }
        if self.ports[cur.0].depth == 2 {
            self.ports[cur.0].parent_dport
        } else {
            None
        }
    }

    /// Whether any switch sits between the endpoint and its host bridge.
    pub fn path_has_switch(&self, endpoint: PortHandle) -> bool {
        let mut cur = self.ports[endpoint.0].parent;
        while let Some(h) = cur {
            let port = &self.ports[h.0];
            if port.depth <= 1 {
                return false;
            }
            if port.kind == PortKind::Switch {
                return true;
            }
            cur = port.parent;
        }
        false
    }

    /// Single-dport ports without a decoder capability pass all traffic
    /// through to their one dport. Model that as a single ways=1 decoder,
    /// disabled until a region claims it.
    pub fn add_passthrough_decoder(&mut self, handle: PortHandle) -> Result<()> {
        let port = &mut self.ports[handle.0];
        if port.regs.is_some() {
            return Err(HdmError::InvalidState(
                "passthrough decode on a port with decoder registers",
            ));
        }
        let dport = *port
            .dports
            .first()
            .ok_or(HdmError::InvalidState("passthrough port has no dports"))?;
        let mut cxld = Decoder::switch(port.decoders.len(), 1);
        if let Some(sw) = cxld.as_switch_mut() {
            sw.targets.push(dport);
        }
        debug!(?handle, dport, "added passthrough decoder");
        port.decoders.push(cxld);
        Ok(())
    }
}
