//! HDM capability parsing and decoder enumeration.

use std::thread;

use cxl_regs::layout;
use cxl_regs::{granularity_from_eig, ways_from_eniw};
use tracing::{debug, warn};

use crate::commit::COMMIT_TIMEOUT;
use crate::decoder::{AddressRange, CommitState, DecodeUnit, Decoder, DecoderFlags};
use crate::error::{HdmError, Result};
use crate::port::PortKind;
use crate::regs::RegisterBlock;

/// Parsed capability word for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdmCapabilities {
    pub decoder_count: usize,
    pub target_count: u16,
    pub interleave_11_8: bool,
    pub interleave_14_12: bool,
}

impl HdmCapabilities {
    /// Read and decode the capability word. A decoded count of zero is a
    /// specification violation, not an empty-but-valid state.
    pub fn read(regs: &mut dyn RegisterBlock) -> Result<Self> {
        let cap = regs.read32(layout::CAP_OFFSET);
        let decoder_count = layout::decoder_count(cap);
        if decoder_count == 0 {
            return Err(HdmError::NoDecoders);
        }
        Ok(Self {
            decoder_count,
            target_count: layout::target_count(cap),
            interleave_11_8: cap & layout::CAP_INTERLEAVE_11_8 != 0,
            interleave_14_12: cap & layout::CAP_INTERLEAVE_14_12 != 0,
        })
    }
}

/// Turn on HDM decode for the port. Read-modify-write so unrelated global
/// control bits survive.
pub fn enable_hdm(regs: &mut dyn RegisterBlock) {
    let ctrl = regs.read32(layout::GLOBAL_CTRL_OFFSET);
    regs.write32(layout::GLOBAL_CTRL_OFFSET, ctrl | layout::GLOBAL_CTRL_HDM_ENABLE);
}

/// Build the in-memory decoder for instance `which` from its registers.
fn init_decoder(
    kind: PortKind,
    caps: &HdmCapabilities,
    regs: &mut dyn RegisterBlock,
    which: usize,
) -> Result<Decoder> {
    let ctrl = regs.read32(layout::ctrl_offset(which));
    let base = regs.read64_hi_lo(layout::base_lo_offset(which));
    let mut size = regs.read64_hi_lo(layout::size_lo_offset(which));

    // An uncommitted decoder has no effective range regardless of the raw
    // size register.
    if ctrl & layout::CTRL_COMMITTED == 0 {
        size = 0;
    }
    if base == u64::MAX || size == u64::MAX {
        warn!(which, "invalid resource range");
        return Err(HdmError::InvalidRange { index: which });
    }

    let mut cxld = if kind == PortKind::Endpoint {
        Decoder::endpoint(which)
    } else {
        Decoder::switch(which, caps.target_count)
    };
    cxld.range = AddressRange::new(base, size);

    if ctrl & layout::CTRL_COMMITTED != 0 {
        cxld.flags |= DecoderFlags::ENABLE;
        cxld.commit_state = CommitState::Committed;
        if ctrl & layout::CTRL_LOCK != 0 {
            cxld.flags |= DecoderFlags::LOCK;
        }
    }

    cxld.interleave_ways = ways_from_eniw(layout::ctrl_iw(ctrl));
    if cxld.interleave_ways == 0 {
        warn!(which, ctrl, "invalid interleave ways");
        return Err(HdmError::InvalidWays { index: which, ctrl });
    }
    cxld.interleave_granularity = granularity_from_eig(layout::ctrl_ig(ctrl));

    cxld.unit = if ctrl & layout::CTRL_TYPE != 0 {
        DecodeUnit::MemoryExpander
    } else {
        DecodeUnit::Accelerator
    };

    // Endpoint decoders carry no target list. The packed register names at
    // most 8 dports; a 12- or 16-way decoder's remaining positions have no
    // register slot and stay unlisted.
    if kind != PortKind::Endpoint {
        let target_list = regs.read64_hi_lo(layout::target_list_lo_offset(which));
        let ways = usize::from(cxld.interleave_ways).min(8);
        if let Some(sw) = cxld.as_switch_mut() {
            for i in 0..ways {
                sw.targets.push((target_list >> (i * 8)) as u8);
            }
        }
    }

    Ok(cxld)
}

/// Construct one in-memory decoder per hardware instance.
///
/// Since the register block may have been claimed recently, the
/// "not-committed" status cannot be trusted until the commit timeout has
/// elapsed. If any instance looks uncommitted, sleep for twice the maximum
/// commit latency (tolerating host/device clock skew) before trusting reads.
///
/// Instances with invalid register content are excluded; the port fails only
/// when every instance is invalid.
pub fn enumerate_decoders(
    kind: PortKind,
    caps: &HdmCapabilities,
    regs: &mut dyn RegisterBlock,
) -> Result<Vec<Decoder>> {
    let committed = (0..caps.decoder_count)
        .filter(|&i| regs.read32(layout::ctrl_offset(i)) & layout::CTRL_COMMITTED != 0)
        .count();
    if committed != caps.decoder_count {
        thread::sleep(2 * COMMIT_TIMEOUT);
    }

    let mut decoders = Vec::with_capacity(caps.decoder_count);
    let mut failed = 0;
    for which in 0..caps.decoder_count {
        match init_decoder(kind, caps, regs, which) {
            Ok(cxld) => {
                debug!(
                    which,
                    start = cxld.range.start,
                    len = cxld.range.len,
                    ways = cxld.interleave_ways,
                    "enumerated decoder"
                );
                decoders.push(cxld);
            }
            Err(err) => {
                warn!(which, %err, "skipping decoder instance");
                failed += 1;
            }
        }
    }

    if failed == caps.decoder_count {
        return Err(HdmError::NoValidDecoders);
    }

    Ok(decoders)
}
