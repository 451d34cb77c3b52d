//! Enumeration against the mock register block.

use cxl_hdm::{
    enable_hdm, enumerate_decoders, CommitState, DecodeUnit, DecoderFlags, HdmCapabilities,
    HdmError, MockHdmRegs, PortKind, RegisterBlock,
};
use cxl_regs::layout;

fn committed_ctrl(ig: u32, iw: u32) -> u32 {
    ig | (iw << layout::CTRL_IW_SHIFT) | layout::CTRL_COMMITTED | layout::CTRL_TYPE
}

#[test]
fn capability_word_decodes() {
    let mut regs = MockHdmRegs::new(3, 8);
    let caps = HdmCapabilities::read(&mut regs).unwrap();
    assert_eq!(caps.decoder_count, 6);
    assert_eq!(caps.target_count, 8);
    assert!(caps.interleave_11_8);
    assert!(caps.interleave_14_12);
}

#[test]
fn raw_zero_means_one_decoder() {
    let mut regs = MockHdmRegs::new(0, 1);
    let caps = HdmCapabilities::read(&mut regs).unwrap();
    assert_eq!(caps.decoder_count, 1);
}

#[test]
fn enable_hdm_preserves_unrelated_bits() {
    let mut regs = MockHdmRegs::new(1, 1);
    regs.write32(layout::GLOBAL_CTRL_OFFSET, 1 << 0);
    enable_hdm(&mut regs);
    assert_eq!(
        regs.peek(layout::GLOBAL_CTRL_OFFSET),
        (1 << 0) | layout::GLOBAL_CTRL_HDM_ENABLE
    );
}

#[test]
fn committed_instances_enumerate_enabled() {
    let mut regs = MockHdmRegs::new(1, 4);
    let caps = HdmCapabilities::read(&mut regs).unwrap();
    // ways=2, granularity=512, targets 0x03 then 0x07.
    regs.seed_decoder(
        0,
        0x1_0000_0000,
        0x2000_0000,
        committed_ctrl(1, 1),
        0x0703,
    );
    regs.seed_decoder(
        1,
        0x3_0000_0000,
        0x1000_0000,
        committed_ctrl(0, 0) | layout::CTRL_LOCK,
        0x01,
    );

    let decoders = enumerate_decoders(PortKind::Switch, &caps, &mut regs).unwrap();
    assert_eq!(decoders.len(), 2);

    let d0 = &decoders[0];
    assert_eq!(d0.range.start, 0x1_0000_0000);
    assert_eq!(d0.range.len, 0x2000_0000);
    assert_eq!(d0.interleave_ways, 2);
    assert_eq!(d0.interleave_granularity, 512);
    assert_eq!(d0.unit, DecodeUnit::MemoryExpander);
    assert!(d0.flags.contains(DecoderFlags::ENABLE));
    assert!(!d0.flags.contains(DecoderFlags::LOCK));
    assert_eq!(d0.commit_state, CommitState::Committed);
    // The target list is truncated to exactly `ways` entries.
    assert_eq!(d0.targets(), Some(&[0x03u8, 0x07][..]));

    let d1 = &decoders[1];
    assert!(d1.flags.contains(DecoderFlags::LOCK));
    assert_eq!(d1.targets(), Some(&[0x01u8][..]));
}

#[test]
fn uncommitted_instance_has_no_effective_range() {
    let mut regs = MockHdmRegs::new(0, 4);
    let caps = HdmCapabilities::read(&mut regs).unwrap();
    // Stale size register without the committed bit.
    regs.seed_decoder(0, 0x1_0000_0000, 0x1000_0000, 0, 0);

    let decoders = enumerate_decoders(PortKind::Switch, &caps, &mut regs).unwrap();
    assert_eq!(decoders[0].range.len, 0);
    assert_eq!(decoders[0].commit_state, CommitState::Uncommitted);
    assert!(!decoders[0].flags.contains(DecoderFlags::ENABLE));
}

#[test]
fn endpoint_decoders_carry_no_target_list() {
    let mut regs = MockHdmRegs::new(0, 4);
    let caps = HdmCapabilities::read(&mut regs).unwrap();
    regs.seed_decoder(0, 0x1_0000_0000, 0x1000_0000, committed_ctrl(0, 0), 0x0403);

    let decoders = enumerate_decoders(PortKind::Endpoint, &caps, &mut regs).unwrap();
    assert_eq!(decoders[0].targets(), None);
}

#[test]
fn wide_interleave_target_list_stops_at_the_register_width() {
    let mut regs = MockHdmRegs::new(0, 8);
    let caps = HdmCapabilities::read(&mut regs).unwrap();
    // 12 ways (iw code 10), more positions than the 8 register slots.
    regs.seed_decoder(
        0,
        0x1_0000_0000,
        0x1000_0000,
        committed_ctrl(0, 10),
        0x0807_0605_0403_0201,
    );

    let decoders = enumerate_decoders(PortKind::Switch, &caps, &mut regs).unwrap();
    assert_eq!(decoders[0].interleave_ways, 12);
    assert_eq!(
        decoders[0].targets(),
        Some(&[1u8, 2, 3, 4, 5, 6, 7, 8][..])
    );
}

#[test]
fn invalid_instances_are_skipped_not_fatal() {
    let mut regs = MockHdmRegs::new(1, 4);
    let caps = HdmCapabilities::read(&mut regs).unwrap();
    // Instance 0: all-ones base. Instance 1: fine.
    regs.seed_decoder(0, u64::MAX, 0x1000_0000, committed_ctrl(0, 0), 0);
    regs.seed_decoder(1, 0x1_0000_0000, 0x1000_0000, committed_ctrl(0, 0), 0x02);

    let decoders = enumerate_decoders(PortKind::Switch, &caps, &mut regs).unwrap();
    assert_eq!(decoders.len(), 1);
    assert_eq!(decoders[0].id, 1);
}

#[test]
fn reserved_ways_code_is_skipped() {
    let mut regs = MockHdmRegs::new(1, 4);
    let caps = HdmCapabilities::read(&mut regs).unwrap();
    regs.seed_decoder(
        0,
        0x1_0000_0000,
        0x1000_0000,
        committed_ctrl(0, 5), // iw code 5 is reserved
        0,
    );
    regs.seed_decoder(1, 0x2_0000_0000, 0x1000_0000, committed_ctrl(0, 0), 0x01);

    let decoders = enumerate_decoders(PortKind::Switch, &caps, &mut regs).unwrap();
    assert_eq!(decoders.len(), 1);
    assert_eq!(decoders[0].id, 1);
}

#[test]
fn all_instances_invalid_is_fatal() {
    let mut regs = MockHdmRegs::new(0, 4);
    let caps = HdmCapabilities::read(&mut regs).unwrap();
    regs.seed_decoder(0, u64::MAX, u64::MAX, committed_ctrl(0, 0), 0);

    assert!(matches!(
        enumerate_decoders(PortKind::Switch, &caps, &mut regs),
        Err(HdmError::NoValidDecoders)
    ));
}
