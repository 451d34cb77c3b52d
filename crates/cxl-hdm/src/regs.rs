/// Access to a port's HDM decoder register block.
///
/// Offsets are byte offsets relative to the start of the block (see
/// `cxl_regs::layout`). Reads take `&mut self` because register reads on real
/// hardware may have side effects.
pub trait RegisterBlock {
    fn read32(&mut self, offset: u64) -> u32;
    fn write32(&mut self, offset: u64, val: u32);

    /// 64-bit read as two 32-bit accesses, high word first.
    fn read64_hi_lo(&mut self, lo_offset: u64) -> u64 {
        let hi = self.read32(lo_offset + 4);
        let lo = self.read32(lo_offset);
        (u64::from(hi) << 32) | u64::from(lo)
    }
}
