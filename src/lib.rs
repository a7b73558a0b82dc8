//! A cycle-accurate simulator for a four-core shared-memory system with
//! private write-back caches kept coherent by the MESI (Illinois) protocol
//! over a single central snooping bus.
//!
//! Each core consumes a pre-recorded memory reference trace. The simulator
//! drives all four cores against the shared bus cycle by cycle and reports
//! per-core and system-level statistics: instruction, read and write
//! counts, execution and idle cycles, misses, evictions, write-backs,
//! invalidations and data traffic.

pub mod bus;
pub mod cache;
pub mod coherence;
pub mod commons;
pub mod error;
pub mod report;
pub mod scheduler;
pub mod stats;
pub mod trace;

pub use bus::{Bus, BusTx};
pub use cache::{Cache, Line};
pub use commons::{Addr, AddrParts, MemRef, MesiState, RefQueue, SystemSpec, NUM_CORES};
pub use error::SimError;
pub use scheduler::Simulator;
pub use stats::CoreStats;
