//! Reassembly of fragmented TDB sentences into single sentences, with success / failure
//!  accounting per fragment group

pub mod group;
pub mod reassembler;

pub use reassembler::{Reassembler, ReassemblerConfig, SplitCounts};
