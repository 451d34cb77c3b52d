//! The in-memory decoder model.

use std::sync::{Mutex, MutexGuard};

use bitflags::bitflags;

use crate::pool::{AddressPool, Reservations};

/// A host-physical `[start, start + len)` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressRange {
    pub start: u64,
    pub len: u64,
}

impl AddressRange {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn contains(&self, other: &AddressRange) -> bool {
        self.start <= other.start && other.end() <= self.end()
    }
}

bitflags! {
    /// Software-side decoder capabilities and state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DecoderFlags: u32 {
        const RAM    = 1 << 0;
        const PMEM   = 1 << 1;
        const TYPE2  = 1 << 2;
        const TYPE3  = 1 << 3;
        const LOCK   = 1 << 4;
        const ENABLE = 1 << 5;
    }
}

/// What kind of downstream unit the decoder routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeUnit {
    Accelerator,
    MemoryExpander,
}

/// Commit state machine position, driven by the commit engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitState {
    #[default]
    Uncommitted,
    Committing,
    Committed,
    TimedOut,
    CommitError,
    /// Committed, then reprogrammed to the zero-size disabled state.
    Zeroed,
}

/// One HDM decode register instance bound to a port.
#[derive(Debug)]
pub struct Decoder {
    /// Position within the owning port's instance array.
    pub id: usize,
    pub range: AddressRange,
    pub interleave_ways: u16,
    pub interleave_granularity: u64,
    pub unit: DecodeUnit,
    pub flags: DecoderFlags,
    pub commit_state: CommitState,
    pub kind: DecoderKind,
}

/// Level-specific decoder state.
///
/// Algorithms branch on this tag explicitly; there is no downcasting.
#[derive(Debug)]
pub enum DecoderKind {
    Root(RootDecoder),
    Switch(SwitchDecoder),
    Endpoint(EndpointDecoder),
}

/// A platform-level decode window (the CFMWS analogue).
#[derive(Debug)]
pub struct RootDecoder {
    /// Host physical address space this decoder advertises.
    pub window: AddressRange,
    /// Ordered host-bridge target ids, one per interleave position.
    pub targets: Vec<u8>,
    state: Mutex<RootState>,
}

/// Pool, reservations and the region-id counter share one exclusive section:
/// address allocation must be serialized against concurrent region creation
/// on the same root decoder.
#[derive(Debug)]
pub struct RootState {
    pub pool: AddressPool,
    pub reservations: Reservations,
    pub next_region_id: u32,
}

impl RootDecoder {
    pub fn new(window: AddressRange, targets: Vec<u8>) -> Self {
        Self {
            window,
            targets,
            state: Mutex::new(RootState {
                pool: AddressPool::new(window),
                reservations: Reservations::new(),
                next_region_id: 0,
            }),
        }
    }

    pub fn lock_state(&self) -> MutexGuard<'_, RootState> {
        // A poisoned lock means a panic mid-allocation; the bookkeeping
        // itself is still consistent, so keep going.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A decoder in a switch or host bridge.
#[derive(Debug, Default)]
pub struct SwitchDecoder {
    /// Ordered dport ids, one per interleave position.
    pub targets: Vec<u8>,
    /// Hardware target slots available on this instance.
    pub nr_target_slots: u16,
    /// Region currently routing through this decoder, if any.
    pub claimed_by: Option<u32>,
}

/// A decoder residing in an endpoint. Endpoint decoders carry no target
/// list; ways/granularity define the global striping pattern and the
/// endpoint applies its own stripe offset.
#[derive(Debug, Default)]
pub struct EndpointDecoder {
    /// Region that owns this decoder's range, if any. Two regions must
    /// never both believe they own overlapping endpoint ranges.
    pub claimed_by: Option<u32>,
}

impl Decoder {
    pub fn root(id: usize, window: AddressRange, targets: Vec<u8>, flags: DecoderFlags) -> Self {
        let ways = targets.len().max(1) as u16;
        Self {
            id,
            range: window,
            interleave_ways: ways,
            interleave_granularity: 256,
            unit: DecodeUnit::MemoryExpander,
            flags,
            commit_state: CommitState::Uncommitted,
            kind: DecoderKind::Root(RootDecoder::new(window, targets)),
        }
    }

    pub fn switch(id: usize, nr_target_slots: u16) -> Self {
        Self {
            id,
            range: AddressRange::default(),
            interleave_ways: 1,
            interleave_granularity: 0,
            unit: DecodeUnit::MemoryExpander,
            flags: DecoderFlags::empty(),
            commit_state: CommitState::Uncommitted,
            kind: DecoderKind::Switch(SwitchDecoder {
                targets: Vec::new(),
                nr_target_slots,
                claimed_by: None,
            }),
        }
    }

    pub fn endpoint(id: usize) -> Self {
        Self {
            id,
            range: AddressRange::default(),
            interleave_ways: 1,
            interleave_granularity: 0,
            unit: DecodeUnit::MemoryExpander,
            flags: DecoderFlags::empty(),
            commit_state: CommitState::Uncommitted,
            kind: DecoderKind::Endpoint(EndpointDecoder::default()),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, DecoderKind::Root(_))
    }

    pub fn as_root(&self) -> Option<&RootDecoder> {
        match &self.kind {
            DecoderKind::Root(root) => Some(root),
            _ => None,
        }
    }

    pub fn as_switch_mut(&mut self) -> Option<&mut SwitchDecoder> {
        match &mut self.kind {
            DecoderKind::Switch(sw) => Some(sw),
            _ => None,
        }
    }

    pub fn as_endpoint_mut(&mut self) -> Option<&mut EndpointDecoder> {
        match &mut self.kind {
            DecoderKind::Endpoint(ep) => Some(ep),
            _ => None,
        }
    }

    /// Ordered target list, absent for endpoint decoders.
    pub fn targets(&self) -> Option<&[u8]> {
        match &self.kind {
            DecoderKind::Root(root) => Some(&root.targets),
            DecoderKind::Switch(sw) => Some(&sw.targets),
            DecoderKind::Endpoint(_) => None,
        }
    }

    /// The region id that claimed this decoder, for either switch or
    /// endpoint decoders.
    pub fn claimed_by(&self) -> Option<u32> {
        match &self.kind {
            DecoderKind::Root(_) => None,
            DecoderKind::Switch(sw) => sw.claimed_by,
            DecoderKind::Endpoint(ep) => ep.claimed_by,
        }
    }

    /// Drop a region's claim and reset the staged configuration.
    pub fn release_claim(&mut self) {
        self.range = AddressRange::default();
        self.interleave_ways = 1;
        self.interleave_granularity = 0;
        match &mut self.kind {
            DecoderKind::Root(_) => {}
            DecoderKind::Switch(sw) => {
                sw.targets.clear();
                sw.claimed_by = None;
            }
            DecoderKind::Endpoint(ep) => ep.claimed_by = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_decoder_owns_an_independent_pool() {
        let window = AddressRange::new(0x1_0000_0000, 0x4000_0000);
        let a = Decoder::root(0, window, vec![0], DecoderFlags::PMEM | DecoderFlags::TYPE3);
        let b = Decoder::root(1, window, vec![0], DecoderFlags::PMEM | DecoderFlags::TYPE3);

        let root_a = a.as_root().unwrap();
        let root_b = b.as_root().unwrap();
        assert_eq!(root_a.lock_state().pool.alloc(0x1000_0000), Some(0x1_0000_0000));
        // b's pool is untouched by a's allocation.
        assert_eq!(root_b.lock_state().pool.available(), 0x4000_0000);
    }

    #[test]
    fn release_claim_resets_staging() {
        let mut d = Decoder::endpoint(0);
        d.range = AddressRange::new(0x1000, 0x1000);
        d.interleave_ways = 4;
        d.as_endpoint_mut().unwrap().claimed_by = Some(7);

        d.release_claim();
        assert_eq!(d.range, AddressRange::default());
        assert_eq!(d.claimed_by(), None);
    }
}
