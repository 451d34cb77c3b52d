//! Programming and committing decoders.
//!
//! Commit drives one decoder through `UNCOMMITTED → COMMITTING →
//! {COMMITTED | TIMED_OUT | COMMIT_ERROR}`; disable takes a committed
//! decoder to `ZEROED`. There is no hardware uncommit primitive, only
//! reprogramming to a zero-size range.

use std::time::{Duration, Instant};

use cxl_regs::layout;
use cxl_regs::{eig_from_granularity, eniw_from_ways};
use tracing::{debug, error};

use crate::decoder::{CommitState, DecodeUnit, DecoderFlags};
use crate::error::{HdmError, Result};
use crate::port::Port;
use crate::regs::RegisterBlock;

/// Maximum commit latency the hardware is allowed. The poll budget doubles
/// this to tolerate clock skew between host and device.
pub const COMMIT_TIMEOUT: Duration = Duration::from_millis(10);

/// Low words of base and size carry only bits 31:28; decode ranges are
/// 256MiB-aligned.
const RANGE_LO_MASK: u32 = 0xf000_0000;

fn wait_for_commit(regs: &mut dyn RegisterBlock, which: usize) -> Result<()> {
    let deadline = Instant::now() + 2 * COMMIT_TIMEOUT;
    loop {
        let ctrl = regs.read32(layout::ctrl_offset(which));
        if ctrl & layout::CTRL_COMMITTED != 0 {
            return Ok(());
        }
        if Instant::now() > deadline {
            error!(which, ctrl, "decoder commit timeout");
            return Err(HdmError::CommitTimeout { ctrl });
        }
        if ctrl & layout::CTRL_COMMIT_ERROR != 0 {
            error!(which, ctrl, "decoder commit error");
            return Err(HdmError::CommitError { ctrl });
        }
        std::hint::spin_loop();
    }
}

/// Program decoder `index` of `port` and wait for hardware to latch it.
///
/// The decoder must have been configured (range, ways, granularity, targets)
/// but not yet enabled; the software enable flag acts as a soft reservation
/// and an already-set flag is a caller bug.
pub fn commit_decoder(port: &mut Port, index: usize) -> Result<()> {
    let Port { regs, decoders, .. } = port;
    let regs = regs.as_deref_mut().ok_or(HdmError::NoRegisters)?;
    let cxld = decoders
        .get_mut(index)
        .ok_or(HdmError::InvalidState("no such decoder instance"))?;

    if cxld.flags.contains(DecoderFlags::ENABLE) {
        error!(which = cxld.id, "commit of an already-enabled decoder");
        return Err(HdmError::InvalidState("decoder already enabled"));
    }

    let which = cxld.id;
    let mut ctrl = regs.read32(layout::ctrl_offset(which));

    // A decoder that is currently active cannot be changed without the
    // system being quiesced. The hardware may disagree with the software
    // flags here, so this is a plain error, not a splat.
    let size_hi = regs.read32(layout::size_hi_offset(which));
    let size_lo = regs.read32(layout::size_lo_offset(which));
    if ctrl & layout::CTRL_COMMITTED != 0 && (size_lo | size_hi) != 0 {
        error!(which, "tried to change an active decoder");
        return Err(HdmError::Busy);
    }

    ctrl &= !(layout::CTRL_IG_MASK | layout::CTRL_IW_MASK);
    ctrl |= u32::from(eig_from_granularity(cxld.interleave_granularity)?);
    ctrl |= u32::from(eniw_from_ways(cxld.interleave_ways)?) << layout::CTRL_IW_SHIFT;
    ctrl |= layout::CTRL_COMMIT;
    match cxld.unit {
        DecodeUnit::MemoryExpander => ctrl |= layout::CTRL_TYPE,
        DecodeUnit::Accelerator => ctrl &= !layout::CTRL_TYPE,
    }

    let base_lo = (cxld.range.start as u32) & RANGE_LO_MASK;
    let base_hi = (cxld.range.start >> 32) as u32;
    let size_lo = (cxld.range.len as u32) & RANGE_LO_MASK;
    let size_hi = (cxld.range.len >> 32) as u32;

    // Target list first, then size, base and finally control with the
    // commit bit, so hardware validates a consistent snapshot.
    match cxld.targets() {
        Some(targets) if !targets.is_empty() => {
            let mut tl: u64 = 0;
            for (i, id) in targets.iter().take(8).enumerate() {
                tl |= u64::from(*id) << (i * 8);
            }
            regs.write32(layout::target_list_hi_offset(which), (tl >> 32) as u32);
            regs.write32(layout::target_list_lo_offset(which), tl as u32);
        }
        _ => {
            // Endpoint decoders: zero out the skip list.
            regs.write32(layout::target_list_hi_offset(which), 0);
            regs.write32(layout::target_list_lo_offset(which), 0);
        }
    }

    regs.write32(layout::size_hi_offset(which), size_hi);
    regs.write32(layout::size_lo_offset(which), size_lo);
    regs.write32(layout::base_hi_offset(which), base_hi);
    regs.write32(layout::base_lo_offset(which), base_lo);

    cxld.commit_state = CommitState::Committing;
    regs.write32(layout::ctrl_offset(which), ctrl);

    match wait_for_commit(regs, which) {
        Ok(()) => {}
        Err(err) => {
            cxld.commit_state = match err {
                HdmError::CommitTimeout { .. } => CommitState::TimedOut,
                _ => CommitState::CommitError,
            };
            return Err(err);
        }
    }

    cxld.flags |= DecoderFlags::ENABLE;
    cxld.commit_state = CommitState::Committed;
    debug!(
        which,
        base = cxld.range.start,
        size = cxld.range.len,
        ways = cxld.interleave_ways,
        granularity = cxld.interleave_granularity,
        targets = ?cxld.targets(),
        "committed decoder"
    );
    Ok(())
}

/// Disable decoder `index` of `port`.
///
/// All data registers are zeroed unconditionally. If hardware had actually
/// committed the decoder, the commit bit is reissued against the zeroed
/// fields so a 0-size range is latched as a well-defined disabled state.
pub fn disable_decoder(port: &mut Port, index: usize) -> Result<()> {
    let Port { regs, decoders, .. } = port;
    let regs = regs.as_deref_mut().ok_or(HdmError::NoRegisters)?;
    let cxld = decoders
        .get_mut(index)
        .ok_or(HdmError::InvalidState("no such decoder instance"))?;

    if !cxld.flags.contains(DecoderFlags::ENABLE) {
        error!(which = cxld.id, "disable of a decoder that is not enabled");
        return Err(HdmError::InvalidState("decoder not enabled"));
    }

    let which = cxld.id;
    let ctrl = regs.read32(layout::ctrl_offset(which));

    cxld.flags.remove(DecoderFlags::ENABLE);

    regs.write32(layout::target_list_hi_offset(which), 0);
    regs.write32(layout::target_list_lo_offset(which), 0);
    regs.write32(layout::size_hi_offset(which), 0);
    regs.write32(layout::size_lo_offset(which), 0);
    regs.write32(layout::base_hi_offset(which), 0);
    regs.write32(layout::base_lo_offset(which), 0);

    if ctrl & layout::CTRL_COMMITTED != 0 {
        regs.write32(layout::ctrl_offset(which), layout::CTRL_COMMIT);
        cxld.commit_state = CommitState::Zeroed;
    } else {
        cxld.commit_state = CommitState::Uncommitted;
    }

    debug!(which, "disabled decoder");
    Ok(())
}
