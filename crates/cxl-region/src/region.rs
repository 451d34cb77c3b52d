//! Region objects and their configuration surface.

use cxl_hdm::{AddressRange, PortHandle, TeardownQueue, TeardownRequest, Topology};
use cxl_regs::MAX_INTERLEAVE_WAYS;
use tracing::debug;
use uuid::Uuid;

use crate::error::{RegionError, Result};

/// Region id, unique per root decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub u32);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "region{}", self.0)
    }
}

/// A staged or committed decoder: port handle plus instance index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderRef {
    pub port: PortHandle,
    pub index: usize,
}

/// A logical, user-requested address range spanning ordered target devices.
///
/// Configuration order is enforced at this boundary: granularity before
/// ways, ways before targets, all targets before size. The resolver itself
/// assumes a fully configured region.
#[derive(Debug)]
pub struct Region {
    id: RegionId,
    pub(crate) uuid: Uuid,
    pub(crate) granularity: Option<u64>,
    pub(crate) ways: Option<u16>,
    pub(crate) targets: Vec<Option<PortHandle>>,
    pub(crate) size: Option<u64>,
    /// Sub-range of the root decoder's platform resource, once allocated.
    pub(crate) res: Option<AddressRange>,
    pub(crate) active: bool,
    pub(crate) staged: Vec<DecoderRef>,
    pub(crate) committed: Vec<DecoderRef>,
}

/// Allocate a region id from `rootd`'s counter and create the region.
///
/// The id counter shares the root decoder's exclusive section with its
/// address pool, so id allocation is serialized against concurrent region
/// creation on the same root decoder.
pub fn create_region(topology: &Topology, root_port: PortHandle, rootd: usize) -> Result<Region> {
    let decoder = topology
        .port(root_port)
        .decoders
        .get(rootd)
        .ok_or(RegionError::NoCompatibleRootDecoder)?;
    let root = decoder
        .as_root()
        .ok_or(RegionError::NoCompatibleRootDecoder)?;

    let id = {
        let mut state = root.lock_state();
        let id = state.next_region_id;
        state.next_region_id += 1;
        id
    };

    debug!(%id, "created region");
    Ok(Region {
        id: RegionId(id),
        uuid: Uuid::nil(),
        granularity: None,
        ways: None,
        targets: Vec::new(),
        size: None,
        res: None,
        active: false,
        staged: Vec::new(),
        committed: Vec::new(),
    })
}

impl Region {
    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn resource(&self) -> Option<AddressRange> {
        self.res
    }

    pub fn interleave_ways(&self) -> Option<u16> {
        self.ways
    }

    pub fn interleave_granularity(&self) -> Option<u64> {
        self.granularity
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn targets(&self) -> &[Option<PortHandle>] {
        &self.targets
    }

    pub fn staged(&self) -> &[DecoderRef] {
        &self.staged
    }

    pub fn committed(&self) -> &[DecoderRef] {
        &self.committed
    }

    fn ensure_inactive(&self) -> Result<()> {
        if self.active {
            return Err(RegionError::Busy);
        }
        Ok(())
    }

    pub fn set_uuid(&mut self, uuid: Uuid) -> Result<()> {
        self.ensure_inactive()?;
        self.uuid = uuid;
        Ok(())
    }

    pub fn set_interleave_granularity(&mut self, granularity: u64) -> Result<()> {
        self.ensure_inactive()?;
        self.granularity = Some(granularity);
        Ok(())
    }

    /// Granularity must be set first. Shrinking ways drops targets that fall
    /// out of range.
    pub fn set_interleave_ways(&mut self, ways: u16) -> Result<()> {
        self.ensure_inactive()?;
        if self.granularity.is_none() {
            return Err(RegionError::ConfigOrder(
                "interleave granularity must be set before ways",
            ));
        }
        if ways == 0 || ways > MAX_INTERLEAVE_WAYS {
            return Err(RegionError::InvalidWays);
        }
        self.ways = Some(ways);
        self.targets.resize(usize::from(ways), None);
        Ok(())
    }

    /// Ways must be set first; `n` addresses one of the `ways` slots.
    pub fn set_target(&mut self, n: usize, target: PortHandle) -> Result<()> {
        self.ensure_inactive()?;
        let Some(ways) = self.ways else {
            return Err(RegionError::ConfigOrder(
                "interleave ways must be set before targets",
            ));
        };
        if n >= usize::from(ways) {
            return Err(RegionError::MissingTarget(n));
        }
        self.targets[n] = Some(target);
        Ok(())
    }

    pub fn clear_target(&mut self, n: usize) -> Result<()> {
        self.ensure_inactive()?;
        if let Some(slot) = self.targets.get_mut(n) {
            *slot = None;
        }
        Ok(())
    }

    /// Every target slot must be populated first.
    pub fn set_size(&mut self, size: u64) -> Result<()> {
        self.ensure_inactive()?;
        if self.targets.is_empty() || self.targets.iter().any(Option::is_none) {
            return Err(RegionError::ConfigOrder(
                "all targets must be set before size",
            ));
        }
        self.size = Some(size);
        Ok(())
    }

    /// The most basic check: zero-sized regions aren't a thing, and every
    /// region has at least one target.
    pub fn is_configured(&self) -> bool {
        self.size.unwrap_or(0) > 0 && matches!(self.targets.first(), Some(Some(_)))
    }
}

/// Request async teardown of a region. Destruction happens outside the
/// core's call stack; a false return means the consumer is gone and the
/// caller must tear down synchronously.
pub fn schedule_region_unregister(region: &Region, queue: &TeardownQueue) -> bool {
    queue.schedule(TeardownRequest::Region(region.id.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxl_hdm::{Decoder, DecoderFlags, PortKind};

    fn region_fixture() -> (Topology, Region) {
        let mut topo = Topology::new();
        let root = topo.add_root(None);
        topo.port_mut(root).decoders.push(Decoder::root(
            0,
            AddressRange::new(0x1_0000_0000, 0x8_0000_0000),
            vec![0],
            DecoderFlags::PMEM | DecoderFlags::TYPE3,
        ));
        let region = create_region(&topo, root, 0).unwrap();
        (topo, region)
    }

    #[test]
    fn region_ids_are_monotonic_per_root_decoder() {
        let (topo, r0) = region_fixture();
        let root = topo.root().unwrap();
        let r1 = create_region(&topo, root, 0).unwrap();
        assert_eq!(r0.id(), RegionId(0));
        assert_eq!(r1.id(), RegionId(1));
    }

    #[test]
    fn configuration_order_is_enforced() {
        let (mut topo, mut region) = region_fixture();
        let root = topo.root().unwrap();
        let ep = topo.add_port(root, PortKind::Endpoint, 0, None);

        assert_eq!(
            region.set_interleave_ways(2),
            Err(RegionError::ConfigOrder(
                "interleave granularity must be set before ways"
            ))
        );
        assert_eq!(
            region.set_target(0, ep),
            Err(RegionError::ConfigOrder(
                "interleave ways must be set before targets"
            ))
        );

        region.set_interleave_granularity(4096).unwrap();
        region.set_interleave_ways(2).unwrap();
        assert_eq!(
            region.set_size(1 << 30),
            Err(RegionError::ConfigOrder("all targets must be set before size"))
        );

        region.set_target(0, ep).unwrap();
        region.set_target(1, ep).unwrap();
        region.set_size(1 << 30).unwrap();
        assert!(region.is_configured());
    }

    #[test]
    fn shrinking_ways_drops_out_of_range_targets() {
        let (mut topo, mut region) = region_fixture();
        let root = topo.root().unwrap();
        let ep = topo.add_port(root, PortKind::Endpoint, 0, None);

        region.set_interleave_granularity(256).unwrap();
        region.set_interleave_ways(4).unwrap();
        for n in 0..4 {
            region.set_target(n, ep).unwrap();
        }
        region.set_interleave_ways(2).unwrap();
        assert_eq!(region.targets().len(), 2);
        assert_eq!(region.set_target(2, ep), Err(RegionError::MissingTarget(2)));
    }

    #[test]
    fn target_slot_out_of_range_is_rejected() {
        let (mut topo, mut region) = region_fixture();
        let root = topo.root().unwrap();
        let ep = topo.add_port(root, PortKind::Endpoint, 0, None);
        region.set_interleave_granularity(256).unwrap();
        region.set_interleave_ways(1).unwrap();
        assert_eq!(region.set_target(1, ep), Err(RegionError::MissingTarget(1)));
    }
}
