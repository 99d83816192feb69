//! Round-trip measurement over a VDES link. A send node repeatedly transmits a fragment
//!  sentence and paces itself by the link's acknowledgement sentences, while a receive node on
//!  the far side reassembles the fragments it receives and accumulates them over a measurement
//!  window aligned to UTC minute boundaries.

pub mod ais;
pub mod reassembly;
pub mod records;
pub mod sentence;
pub mod session;
pub mod timing;
pub mod udp;
pub mod util;
