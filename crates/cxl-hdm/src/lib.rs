//! Port topology, HDM decoder enumeration and the decoder commit engine.
//!
//! A CXL.mem fabric is a rooted tree of ports (platform root, host bridges,
//! switches, endpoints). Ports that publish a component register block carry
//! an array of HDM decoder instances; this crate:
//!
//! - models the port tree as an arena with stable handles ([`Topology`],
//!   [`PortHandle`])
//! - enumerates decoder instances from the capability block
//!   ([`HdmCapabilities`], [`enumerate_decoders`])
//! - programs and commits/uncommits individual decoders
//!   ([`commit_decoder`], [`disable_decoder`])
//!
//! Register access goes through the [`RegisterBlock`] trait so tests can
//! drive everything against the in-memory [`MockHdmRegs`].

mod commit;
mod decoder;
mod error;
mod hdm;
mod mock;
mod pool;
mod port;
mod regs;
mod teardown;

pub use commit::{commit_decoder, disable_decoder, COMMIT_TIMEOUT};
pub use decoder::{
    AddressRange, CommitState, DecodeUnit, Decoder, DecoderFlags, DecoderKind, EndpointDecoder,
    RootDecoder, RootState, SwitchDecoder,
};
pub use error::{HdmError, Result};
pub use hdm::{enable_hdm, enumerate_decoders, HdmCapabilities};
pub use mock::MockHdmRegs;
pub use pool::{AddressPool, Reservations};
pub use regs::RegisterBlock;
pub use port::{Port, PortHandle, PortKind, Topology};
pub use teardown::{TeardownQueue, TeardownRequest};
