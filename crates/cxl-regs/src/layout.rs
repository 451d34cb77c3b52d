//! Byte-exact layout of the HDM decoder capability block.
//!
//! Offsets are relative to the start of the block within a port's component
//! registers. Each decoder instance occupies a 0x20-byte stride starting at
//! 0x10.

/// Capability register (one per port).
pub const CAP_OFFSET: u64 = 0x00;
pub const CAP_DECODER_COUNT_MASK: u32 = 0xf; // bits 3:0
pub const CAP_TARGET_COUNT_SHIFT: u32 = 4; // bits 7:4
pub const CAP_TARGET_COUNT_MASK: u32 = 0xf0;
pub const CAP_INTERLEAVE_11_8: u32 = 1 << 8;
pub const CAP_INTERLEAVE_14_12: u32 = 1 << 9;

/// Global control register (one per port).
pub const GLOBAL_CTRL_OFFSET: u64 = 0x04;
pub const GLOBAL_CTRL_HDM_ENABLE: u32 = 1 << 1;

/// Per-instance control register fields.
pub const CTRL_IG_MASK: u32 = 0xf; // bits 3:0
pub const CTRL_IW_SHIFT: u32 = 4; // bits 7:4
pub const CTRL_IW_MASK: u32 = 0xf0;
pub const CTRL_LOCK: u32 = 1 << 8;
pub const CTRL_COMMIT: u32 = 1 << 9;
pub const CTRL_COMMITTED: u32 = 1 << 10;
pub const CTRL_COMMIT_ERROR: u32 = 1 << 11;
pub const CTRL_TYPE: u32 = 1 << 12;

const DECODER_STRIDE: u64 = 0x20;

pub fn base_lo_offset(which: usize) -> u64 {
    DECODER_STRIDE * which as u64 + 0x10
}

pub fn base_hi_offset(which: usize) -> u64 {
    DECODER_STRIDE * which as u64 + 0x14
}

pub fn size_lo_offset(which: usize) -> u64 {
    DECODER_STRIDE * which as u64 + 0x18
}

pub fn size_hi_offset(which: usize) -> u64 {
    DECODER_STRIDE * which as u64 + 0x1c
}

pub fn ctrl_offset(which: usize) -> u64 {
    DECODER_STRIDE * which as u64 + 0x20
}

pub fn target_list_lo_offset(which: usize) -> u64 {
    DECODER_STRIDE * which as u64 + 0x24
}

pub fn target_list_hi_offset(which: usize) -> u64 {
    DECODER_STRIDE * which as u64 + 0x28
}

/// Number of decoder instances encoded in the capability word.
///
/// The field's convention: a raw value of 0 means one decoder, a nonzero raw
/// value N means 2·N decoders.
pub fn decoder_count(cap: u32) -> usize {
    let raw = (cap & CAP_DECODER_COUNT_MASK) as usize;
    if raw == 0 {
        1
    } else {
        raw * 2
    }
}

/// Target-id slots per decoder instance.
pub fn target_count(cap: u32) -> u16 {
    ((cap & CAP_TARGET_COUNT_MASK) >> CAP_TARGET_COUNT_SHIFT) as u16
}

/// Raw interleave-granularity code from a decoder control word.
pub fn ctrl_ig(ctrl: u32) -> u8 {
    (ctrl & CTRL_IG_MASK) as u8
}

/// Raw interleave-ways code from a decoder control word.
pub fn ctrl_iw(ctrl: u32) -> u8 {
    ((ctrl & CTRL_IW_MASK) >> CTRL_IW_SHIFT) as u8
}
