//! Address-space bookkeeping owned by root decoders.

use crate::decoder::AddressRange;

/// First-fit allocator over a root decoder's decode window.
///
/// Free space is a sorted list of disjoint `[start, end)` ranges. Allocations
/// and frees are always matched by the region layer; a free merges back into
/// its neighbours.
#[derive(Debug, Clone)]
pub struct AddressPool {
    free: Vec<(u64, u64)>,
}

impl AddressPool {
    pub fn new(window: AddressRange) -> Self {
        let free = if window.len == 0 {
            Vec::new()
        } else {
            vec![(window.start, window.end())]
        };
        Self { free }
    }

    /// Bytes currently available.
    pub fn available(&self) -> u64 {
        self.free.iter().map(|(s, e)| e - s).sum()
    }

    /// Carve `size` bytes out of the first free range that fits.
    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let idx = self.free.iter().position(|(s, e)| e - s >= size)?;
        let (start, end) = self.free[idx];
        if end - start == size {
            self.free.remove(idx);
        } else {
            self.free[idx].0 = start + size;
        }
        Some(start)
    }

    /// Return `[start, start + size)` to the pool, merging neighbours.
    pub fn free(&mut self, start: u64, size: u64) {
        if size == 0 {
            return;
        }
        let end = start + size;
        let idx = self
            .free
            .iter()
            .position(|&(s, _)| s >= start)
            .unwrap_or(self.free.len());
        self.free.insert(idx, (start, end));

        // Merge with the right neighbour, then the left.
        if idx + 1 < self.free.len() && self.free[idx].1 >= self.free[idx + 1].0 {
            self.free[idx].1 = self.free[idx + 1].1.max(self.free[idx].1);
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].1 >= self.free[idx].0 {
            self.free[idx - 1].1 = self.free[idx].1.max(self.free[idx - 1].1);
            self.free.remove(idx);
        }
    }
}

/// Claimed sub-ranges of a root decoder's platform resource.
///
/// The reservation is the second half of address allocation: pool allocation
/// hands out an offset, the reservation records exclusive ownership of that
/// sub-range. Overlapping requests fail.
#[derive(Debug, Clone, Default)]
pub struct Reservations {
    claimed: Vec<(u64, u64)>,
}

impl Reservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `[start, start + size)`. Fails on any overlap with an existing
    /// claim.
    pub fn request(&mut self, start: u64, size: u64) -> bool {
        if size == 0 {
            return false;
        }
        let end = start + size;
        if self.claimed.iter().any(|&(s, e)| start < e && s < end) {
            return false;
        }
        let idx = self
            .claimed
            .iter()
            .position(|&(s, _)| s >= start)
            .unwrap_or(self.claimed.len());
        self.claimed.insert(idx, (start, end));
        true
    }

    /// Drop the claim previously made with the same `start`/`size`.
    pub fn release(&mut self, start: u64, size: u64) {
        self.claimed.retain(|&(s, e)| !(s == start && e == start + size));
    }

    pub fn is_claimed(&self, start: u64, size: u64) -> bool {
        let end = start + size;
        self.claimed.iter().any(|&(s, e)| s <= start && end <= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> AddressPool {
        AddressPool::new(AddressRange {
            start: 0x1000,
            len: 0x4000,
        })
    }

    #[test]
    fn alloc_is_first_fit() {
        let mut p = pool();
        assert_eq!(p.alloc(0x1000), Some(0x1000));
        assert_eq!(p.alloc(0x1000), Some(0x2000));
        assert_eq!(p.available(), 0x2000);
    }

    #[test]
    fn alloc_fails_when_exhausted() {
        let mut p = pool();
        assert_eq!(p.alloc(0x4000), Some(0x1000));
        assert_eq!(p.alloc(1), None);
    }

    #[test]
    fn free_merges_neighbours() {
        let mut p = pool();
        let a = p.alloc(0x1000).unwrap();
        let b = p.alloc(0x1000).unwrap();
        p.free(a, 0x1000);
        p.free(b, 0x1000);
        assert_eq!(p.available(), 0x4000);
        // The whole window is one range again.
        assert_eq!(p.alloc(0x4000), Some(0x1000));
    }

    #[test]
    fn reservations_reject_overlap() {
        let mut r = Reservations::new();
        assert!(r.request(0x1000, 0x1000));
        assert!(!r.request(0x1800, 0x1000));
        assert!(r.request(0x2000, 0x1000));
        r.release(0x1000, 0x1000);
        assert!(r.request(0x1800, 0x200));
    }
}
