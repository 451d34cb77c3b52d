//! In-memory HDM register block for tests.

use std::collections::BTreeMap;

use cxl_regs::layout;

use crate::regs::RegisterBlock;

/// A fake HDM decoder register block.
///
/// Registers are plain storage, with one piece of modelled behaviour: writing
/// a decoder control word with the commit bit set makes the "hardware"
/// respond, either by latching the committed bit (`auto_commit`, the default)
/// or by raising error-not-committed (`fail_commit`). With both knobs off the
/// commit request is simply ignored, which is how commit-timeout paths are
/// exercised.
#[derive(Debug, Default)]
pub struct MockHdmRegs {
    words: BTreeMap<u64, u32>,
    auto_commit: bool,
    fail_commit: bool,
}

impl MockHdmRegs {
    /// Register block whose capability word advertises `decoder_count_raw`
    /// (field-encoded) decoders with `target_count` target slots each.
    pub fn new(decoder_count_raw: u8, target_count: u8) -> Self {
        let cap = u32::from(decoder_count_raw & 0xf)
            | (u32::from(target_count & 0xf) << layout::CAP_TARGET_COUNT_SHIFT)
            | layout::CAP_INTERLEAVE_11_8
            | layout::CAP_INTERLEAVE_14_12;
        let mut regs = Self {
            words: BTreeMap::new(),
            auto_commit: true,
            fail_commit: false,
        };
        regs.words.insert(layout::CAP_OFFSET, cap);
        regs
    }

    /// Hardware never acknowledges commit requests.
    pub fn ignore_commits(mut self) -> Self {
        self.auto_commit = false;
        self.fail_commit = false;
        self
    }

    /// Hardware answers commit requests with error-not-committed.
    pub fn fail_commits(mut self) -> Self {
        self.auto_commit = false;
        self.fail_commit = true;
        self
    }

    /// Seed decoder instance `which` with raw register content.
    pub fn seed_decoder(&mut self, which: usize, base: u64, size: u64, ctrl: u32, targets: u64) {
        self.words.insert(layout::base_lo_offset(which), base as u32);
        self.words
            .insert(layout::base_hi_offset(which), (base >> 32) as u32);
        self.words.insert(layout::size_lo_offset(which), size as u32);
        self.words
            .insert(layout::size_hi_offset(which), (size >> 32) as u32);
        self.words.insert(layout::ctrl_offset(which), ctrl);
        self.words
            .insert(layout::target_list_lo_offset(which), targets as u32);
        self.words
            .insert(layout::target_list_hi_offset(which), (targets >> 32) as u32);
    }

    /// Raw register content, for assertions.
    pub fn peek(&self, offset: u64) -> u32 {
        self.words.get(&offset).copied().unwrap_or(0)
    }

    fn is_decoder_ctrl(offset: u64) -> bool {
        offset >= 0x20 && offset % 0x20 == 0
    }
}

impl RegisterBlock for MockHdmRegs {
    fn read32(&mut self, offset: u64) -> u32 {
        self.words.get(&offset).copied().unwrap_or(0)
    }

    fn write32(&mut self, offset: u64, val: u32) {
        let mut val = val;
        if Self::is_decoder_ctrl(offset) && val & layout::CTRL_COMMIT != 0 {
            if self.fail_commit {
                val = (val | layout::CTRL_COMMIT_ERROR) & !layout::CTRL_COMMITTED;
            } else if self.auto_commit {
                val = (val | layout::CTRL_COMMITTED) & !layout::CTRL_COMMIT_ERROR;
            }
        }
        self.words.insert(offset, val);
    }
}
