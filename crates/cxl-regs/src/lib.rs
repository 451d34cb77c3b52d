//! HDM decoder register layout and interleave encodings.
//!
//! CXL.mem routing is programmed through an array of HDM (Host Managed Device
//! Memory) decoder register instances per port. This crate holds the bit-exact
//! layout of that register block plus the pure conversions between
//! human-facing interleave parameters (ways, granularity in bytes) and their
//! hardware-encoded forms. Nothing in here touches hardware; higher layers
//! (`cxl-hdm`) own register access.

mod interleave;
pub mod layout;

pub use interleave::{
    eig_from_granularity, eniw_from_ways, granularity_from_eig, interleave_granularity_valid,
    interleave_ways_valid, ways_from_eniw, InterleaveError, MAX_INTERLEAVE_WAYS,
};
