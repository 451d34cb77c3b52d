//! Topology resolution and region binding.
//!
//! Binding walks the port tree to find the host bridges and root ports the
//! region's targets route through, validates the configuration against the
//! chosen root decoder, stages one decoder per topology level and commits
//! them top-down. Any failure unwinds every piece of state the attempt
//! created: staged claims, committed decoders, allocated address space.

use cxl_hdm::{
    commit_decoder, disable_decoder, AddressRange, Decoder, DecoderFlags, DecoderKind, PortHandle,
    PortKind, Topology,
};
use cxl_regs::{
    eig_from_granularity, eniw_from_ways, interleave_granularity_valid, interleave_ways_valid,
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{RegionError, Result};
use crate::region::{DecoderRef, Region};

const SZ_256M: u64 = 256 << 20;

/// Where each target's traffic enters the decode topology.
#[derive(Debug)]
struct Routing {
    /// Distinct host bridges, ordered by first appearance in the target
    /// list.
    hbs: Vec<PortHandle>,
    per_target_hb: Vec<PortHandle>,
    /// Root port (host-bridge dport id) per target.
    per_target_rp: Vec<u8>,
}

/// Basic configuration checks, done before any allocation so a bad region
/// has no side effects.
fn sanitize(topology: &Topology, region: &Region) -> Result<Vec<PortHandle>> {
    if !region.is_configured() {
        return Err(RegionError::Unconfigured);
    }
    let ways = region.ways.ok_or(RegionError::Unconfigured)?;
    let granularity = region.granularity.ok_or(RegionError::Unconfigured)?;
    let size = region.size.ok_or(RegionError::Unconfigured)?;

    // Interleave parameters would be caught by later math; finding the
    // issues here keeps the error deterministic.
    if !interleave_ways_valid(ways) {
        debug!("invalid number of ways");
        return Err(RegionError::InvalidWays);
    }
    if !interleave_granularity_valid(granularity) {
        debug!("invalid interleave granularity");
        return Err(RegionError::InvalidGranularity);
    }
    if size % (SZ_256M * u64::from(ways)) != 0 {
        debug!(size, ways, "size is not a multiple of 256MiB x ways");
        return Err(RegionError::InvalidSize);
    }

    let mut targets = Vec::with_capacity(region.targets.len());
    for (i, slot) in region.targets.iter().enumerate() {
        let handle = slot.ok_or(RegionError::MissingTarget(i))?;
        let port = topology.port(handle);
        if port.kind != PortKind::Endpoint || port.decoders.is_empty() {
            debug!(target = i, "target is not CXL.mem capable");
            return Err(RegionError::TargetNotReady(i));
        }
        targets.push(handle);
    }
    Ok(targets)
}

fn resolve_routing(topology: &Topology, targets: &[PortHandle]) -> Result<Routing> {
    let mut hbs = Vec::new();
    let mut per_target_hb = Vec::with_capacity(targets.len());
    let mut per_target_rp = Vec::with_capacity(targets.len());
    for &target in targets {
        // Multi-hop interleave below the root is explicitly unsupported.
        if topology.path_has_switch(target) {
            return Err(RegionError::UnsupportedSwitchTopology);
        }
        let hb = topology
            .host_bridge_of(target)
            .ok_or(RegionError::NoCompatibleRootDecoder)?;
        let rp = topology
            .root_port_of(target)
            .ok_or(RegionError::NoCompatibleRootDecoder)?;
        if !hbs.contains(&hb) {
            hbs.push(hb);
        }
        per_target_hb.push(hb);
        per_target_rp.push(rp);
    }
    Ok(Routing {
        hbs,
        per_target_hb,
        per_target_rp,
    })
}

/// Does this root decoder have desirable platform-quality grouping for the
/// endpoints? Unresolved policy; treated as always compatible.
fn qtg_match(_rootd: &Decoder) -> bool {
    true
}

/// Can the region's range live inside the root decoder's decode window?
/// Placeholder pending the full range-containment arithmetic.
fn rootd_contains(_rootd: &Decoder, _res: AddressRange) -> bool {
    true
}

/// Cross-host-bridge validity: the root decoder's fan-out, scaled by the
/// granularity ratio, must not exceed the devices actually present, and each
/// root-level target entry must route to the host bridge its interleave
/// position selects.
fn xhb_config_valid(
    topology: &Topology,
    root_port: PortHandle,
    region: &Region,
    routing: &Routing,
    rootd: &Decoder,
) -> Result<()> {
    if routing.hbs.len() <= 1 {
        return Ok(());
    }

    let ways = region.ways.ok_or(RegionError::Unconfigured)?;
    let granularity = region.granularity.ok_or(RegionError::Unconfigured)?;
    let root_ig = eig_from_granularity(rootd.interleave_granularity)
        .map_err(|_| RegionError::NoCompatibleRootDecoder)?;
    let region_ig =
        eig_from_granularity(granularity).map_err(|_| RegionError::InvalidGranularity)?;
    let root_eniw =
        eniw_from_ways(rootd.interleave_ways).map_err(|_| RegionError::NoCompatibleRootDecoder)?;

    if root_ig < region_ig {
        debug!(root_ig, region_ig, "root granularity below region granularity");
        return Err(RegionError::NoCompatibleRootDecoder);
    }
    let fanout = (1u32 << (root_ig - region_ig)) * (1u32 << root_eniw);
    if fanout > u32::from(ways) {
        debug!(fanout, ways, "root fan-out exceeds region targets");
        return Err(RegionError::NoCompatibleRootDecoder);
    }

    // Each root target-list position routes to a host bridge; that wiring
    // must agree with the position the region's interleave assigns it.
    let root_targets = rootd.targets().unwrap_or(&[]);
    for (pos, &hb_id) in root_targets.iter().enumerate() {
        let Some(hb) = topology
            .children(root_port)
            .find(|&h| topology.port(h).parent_dport == Some(hb_id))
        else {
            continue;
        };
        if !routing.hbs.contains(&hb) {
            continue;
        }
        let expected = routing.hbs[pos % routing.hbs.len()];
        if hb != expected {
            debug!(pos, hb_id, "root target wiring disagrees with target order");
            return Err(RegionError::PortGroupingMismatch);
        }
    }
    Ok(())
}

/// Root ports used by the region under `hb`, ordered by first appearance.
fn root_ports_under(routing: &Routing, hb: PortHandle) -> Vec<u8> {
    let mut rps = Vec::new();
    for (t_hb, t_rp) in routing.per_target_hb.iter().zip(&routing.per_target_rp) {
        if *t_hb == hb && !rps.contains(t_rp) {
            rps.push(*t_rp);
        }
    }
    rps
}

/// Per host bridge: every region target routed through one root port must
/// occupy the same interleave position class. A mismatch means the physical
/// wiring does not match the requested interleave order.
fn hb_rp_grouping_valid(routing: &Routing) -> Result<()> {
    for &hb in &routing.hbs {
        let rps = root_ports_under(routing, hb);
        let position_mask = rps.len().next_power_of_two() as u64 - 1;
        for rp in rps {
            let mut class = None;
            for (i, (t_hb, t_rp)) in routing
                .per_target_hb
                .iter()
                .zip(&routing.per_target_rp)
                .enumerate()
            {
                if *t_hb != hb || *t_rp != rp {
                    continue;
                }
                let this = i as u64 & position_mask;
                match class {
                    None => class = Some(this),
                    Some(c) if c != this => {
                        debug!(rp, "root port position grouping mismatch");
                        return Err(RegionError::PortGroupingMismatch);
                    }
                    Some(_) => {}
                }
            }
        }
    }
    Ok(())
}

fn rootd_valid(
    topology: &Topology,
    root_port: PortHandle,
    region: &Region,
    routing: &Routing,
    rootd: &Decoder,
    res: AddressRange,
) -> Result<()> {
    if !qtg_match(rootd) {
        return Err(RegionError::NoCompatibleRootDecoder);
    }
    let region_pmem = region
        .targets
        .iter()
        .flatten()
        .any(|&t| topology.port(t).pmem);
    if region_pmem
        && !rootd
            .flags
            .contains(DecoderFlags::PMEM | DecoderFlags::TYPE3)
    {
        debug!("root decoder lacks pmem decode capability");
        return Err(RegionError::NoCompatibleRootDecoder);
    }
    xhb_config_valid(topology, root_port, region, routing, rootd)?;
    hb_rp_grouping_valid(routing)?;
    if !rootd_contains(rootd, res) {
        return Err(RegionError::NoCompatibleRootDecoder);
    }
    Ok(())
}

/// Find the first root decoder on the platform root port that accepts this
/// region (the "find decode window for region" sequence).
pub fn find_root_decoder(topology: &Topology, region: &Region) -> Result<(PortHandle, usize)> {
    let root_port = topology.root().ok_or(RegionError::NoCompatibleRootDecoder)?;
    let targets = sanitize(topology, region)?;
    let routing = resolve_routing(topology, &targets)?;
    let res = AddressRange::default();
    for (index, rootd) in topology.port(root_port).decoders.iter().enumerate() {
        if !rootd.is_root() {
            continue;
        }
        if rootd_valid(topology, root_port, region, &routing, rootd, res).is_ok() {
            return Ok((root_port, index));
        }
    }
    Err(RegionError::NoCompatibleRootDecoder)
}

fn allocate_address_space(
    topology: &Topology,
    region: &Region,
    root_port: PortHandle,
    rootd: usize,
) -> Result<AddressRange> {
    let size = region.size.ok_or(RegionError::Unconfigured)?;
    let root = topology
        .port(root_port)
        .decoders
        .get(rootd)
        .and_then(Decoder::as_root)
        .ok_or(RegionError::NoCompatibleRootDecoder)?;

    // Pool allocation and resource reservation succeed or fail together.
    let mut state = root.lock_state();
    let start = state.pool.alloc(size).ok_or_else(|| {
        debug!(size, "could not allocate address space");
        RegionError::OutOfAddressSpace
    })?;
    if !state.reservations.request(start, size) {
        state.pool.free(start, size);
        debug!(start, size, "platform resource reservation failed");
        return Err(RegionError::ReservationConflict);
    }
    debug!(start, size, "allocated region address space");
    Ok(AddressRange::new(start, size))
}

fn release_address_space(
    topology: &Topology,
    root_port: PortHandle,
    rootd: usize,
    res: AddressRange,
) {
    if let Some(root) = topology
        .port(root_port)
        .decoders
        .get(rootd)
        .and_then(Decoder::as_root)
    {
        let mut state = root.lock_state();
        state.reservations.release(res.start, res.len);
        state.pool.free(res.start, res.len);
    }
}

/// Claim an unused switch decoder on `port` for the region.
fn claim_switch_decoder(
    topology: &mut Topology,
    port: PortHandle,
    region_id: u32,
    res: AddressRange,
    ways: u16,
    granularity: u64,
    targets: Vec<u8>,
) -> Result<DecoderRef> {
    let p = topology.port_mut(port);
    let index = p
        .decoders
        .iter()
        .position(|d| {
            matches!(&d.kind, DecoderKind::Switch(sw) if sw.claimed_by.is_none())
                && !d.flags.contains(DecoderFlags::ENABLE)
        })
        .ok_or(RegionError::NoFreeDecoder)?;
    let cxld = &mut p.decoders[index];
    cxld.range = res;
    cxld.interleave_ways = ways;
    cxld.interleave_granularity = granularity;
    if let Some(sw) = cxld.as_switch_mut() {
        sw.targets = targets;
        sw.claimed_by = Some(region_id);
    }
    Ok(DecoderRef { port, index })
}

fn release_staged(topology: &mut Topology, staged: &[DecoderRef]) {
    for r in staged {
        topology.port_mut(r.port).decoders[r.index].release_claim();
    }
}

/// Stage one decoder per spanned host bridge.
///
/// The single-host-bridge, single-root-port case is a direct 1:1 "simple"
/// configuration; otherwise each host bridge decoder fans out across the
/// root ports the region uses beneath it.
fn stage_hb_decoders(
    topology: &mut Topology,
    region_id: u32,
    routing: &Routing,
    granularity: u64,
    res: AddressRange,
) -> Result<Vec<DecoderRef>> {
    let mut staged = Vec::new();

    let total_rps: usize = routing
        .hbs
        .iter()
        .map(|&hb| root_ports_under(routing, hb).len())
        .sum();
    if routing.hbs.len() == 1 && total_rps == 1 {
        let hb = routing.hbs[0];
        let rp = routing.per_target_rp[0];
        match claim_switch_decoder(topology, hb, region_id, res, 1, granularity, vec![rp]) {
            Ok(r) => staged.push(r),
            Err(err) => {
                release_staged(topology, &staged);
                return Err(err);
            }
        }
        return Ok(staged);
    }

    for &hb in &routing.hbs {
        let rps = root_ports_under(routing, hb);
        let ways = rps.len() as u16;
        match claim_switch_decoder(topology, hb, region_id, res, ways, granularity, rps) {
            Ok(r) => staged.push(r),
            Err(err) => {
                release_staged(topology, &staged);
                return Err(err);
            }
        }
    }
    Ok(staged)
}

/// Claim an endpoint decoder per target and point it at the region's
/// resource. Endpoint decoders decode the same fan-out as the region; each
/// endpoint applies its own stripe offset within the global pattern.
fn collect_ep_decoders(
    topology: &mut Topology,
    region_id: u32,
    targets: &[PortHandle],
    res: AddressRange,
    ways: u16,
    granularity: u64,
    staged: &mut Vec<DecoderRef>,
) -> Result<()> {
    for &target in targets {
        let p = topology.port_mut(target);
        let index = p
            .decoders
            .iter()
            .position(|d| {
                matches!(&d.kind, DecoderKind::Endpoint(ep) if ep.claimed_by.is_none())
                    && !d.flags.contains(DecoderFlags::ENABLE)
            })
            .ok_or(RegionError::NoFreeDecoder)?;
        let cxld = &mut p.decoders[index];
        cxld.range = res;
        cxld.interleave_ways = ways;
        cxld.interleave_granularity = granularity;
        if let Some(ep) = cxld.as_endpoint_mut() {
            ep.claimed_by = Some(region_id);
        }
        staged.push(DecoderRef {
            port: target,
            index,
        });
    }
    Ok(())
}

/// Commit every staged decoder, top-down. All-or-nothing: a failure
/// disables whatever this bind already committed, in reverse order.
fn commit_staged(topology: &mut Topology, staged: &[DecoderRef]) -> Result<()> {
    for (i, r) in staged.iter().enumerate() {
        // Passthrough ports have no registers and nothing to program.
        if topology.port(r.port).regs.is_none() {
            continue;
        }
        if let Err(err) = commit_decoder(topology.port_mut(r.port), r.index) {
            error!(%err, "decoder commit failed; rolling back");
            for prev in staged[..i].iter().rev() {
                if topology.port(prev.port).regs.is_none() {
                    continue;
                }
                // Rollback of a decoder this same operation committed.
                let _ = disable_decoder(topology.port_mut(prev.port), prev.index);
            }
            return Err(err.into());
        }
    }
    Ok(())
}

/// Resolve and bind a configured region against the given root decoder.
///
/// On success every staged decoder is committed and the region is active.
/// On failure no staged decoder, claim, or address-space allocation
/// survives.
pub fn bind_region(
    topology: &mut Topology,
    region: &mut Region,
    root_port: PortHandle,
    rootd: usize,
) -> Result<()> {
    if region.active {
        return Ok(());
    }
    if region.uuid.is_nil() {
        region.uuid = Uuid::new_v4();
    }

    let targets = sanitize(topology, region)?;
    let res = allocate_address_space(topology, region, root_port, rootd)?;
    region.res = Some(res);

    region.staged = match resolve_and_stage(topology, region, root_port, rootd, &targets, res) {
        Ok(staged) => staged,
        Err(err) => {
            region.res = None;
            release_address_space(topology, root_port, rootd, res);
            return Err(err);
        }
    };

    if let Err(err) = commit_staged(topology, &region.staged) {
        let staged = std::mem::take(&mut region.staged);
        release_staged(topology, &staged);
        region.res = None;
        release_address_space(topology, root_port, rootd, res);
        return Err(err);
    }

    region.committed = std::mem::take(&mut region.staged);
    region.active = true;
    debug!(id = %region.id(), "bound region");
    Ok(())
}

fn resolve_and_stage(
    topology: &mut Topology,
    region: &Region,
    root_port: PortHandle,
    rootd: usize,
    targets: &[PortHandle],
    res: AddressRange,
) -> Result<Vec<DecoderRef>> {
    let ways = region.ways.ok_or(RegionError::Unconfigured)?;
    let granularity = region.granularity.ok_or(RegionError::Unconfigured)?;
    let routing = resolve_routing(topology, targets)?;

    {
        let rootd = topology
            .port(root_port)
            .decoders
            .get(rootd)
            .ok_or(RegionError::NoCompatibleRootDecoder)?;
        if !rootd.is_root() {
            return Err(RegionError::NoCompatibleRootDecoder);
        }
        rootd_valid(topology, root_port, region, &routing, rootd, res)?;
    }

    let mut staged = stage_hb_decoders(topology, region.id().0, &routing, granularity, res)?;
    if let Err(err) = collect_ep_decoders(
        topology,
        region.id().0,
        targets,
        res,
        ways,
        granularity,
        &mut staged,
    ) {
        release_staged(topology, &staged);
        return Err(err);
    }
    Ok(staged)
}

/// Destroy a region, unbinding it first when still active.
pub fn delete_region(
    topology: &mut Topology,
    mut region: Region,
    root_port: PortHandle,
    rootd: usize,
) -> Result<()> {
    if region.active {
        unbind_region(topology, &mut region, root_port, rootd)?;
    }
    debug!(id = %region.id(), "deleted region");
    Ok(())
}

/// Tear an active region back down: disable its decoders in reverse order,
/// release their claims, and return the address space.
pub fn unbind_region(
    topology: &mut Topology,
    region: &mut Region,
    root_port: PortHandle,
    rootd: usize,
) -> Result<()> {
    for r in region.committed.iter().rev() {
        if topology.port(r.port).regs.is_none() {
            continue;
        }
        disable_decoder(topology.port_mut(r.port), r.index)?;
    }
    let committed = std::mem::take(&mut region.committed);
    release_staged(topology, &committed);
    release_staged(topology, &std::mem::take(&mut region.staged));

    if let Some(res) = region.res.take() {
        release_address_space(topology, root_port, rootd, res);
    }
    region.active = false;
    debug!(id = %region.id(), "unbound region");
    Ok(())
}
