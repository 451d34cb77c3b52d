//! Regions: logical address ranges bound to a set of target devices.
//!
//! A region spans 1..16 ordered endpoint devices and maps onto a contiguous
//! host physical window carved out of a root decoder's address space.
//! Binding a region resolves the port topology (host bridges and root ports
//! involved), validates interleave constraints against the chosen root
//! decoder, stages one decoder per topology level and commits them atomically; any
//! failure unwinds everything staged or committed for the attempt.

mod bind;
mod error;
mod region;

pub use bind::{bind_region, delete_region, find_root_decoder, unbind_region};
pub use error::{RegionError, Result};
pub use region::{create_region, schedule_region_unregister, DecoderRef, Region, RegionId};
