//! The kernel - scratch memory, legacy layouts and diagnostics
//!
//! The pieces the invocation core builds on:
//! - A fixed-size, size-checked scratch arena
//! - Byte-exact legacy structures written into it
//! - Tracing and counters

pub mod abi;
pub mod memory;
pub mod trace;

pub use abi::{ExecRequest, FarPtr, ParamBlock};
pub use memory::{FreeOutcome, MemoryError, PoolStats, ScratchPool, ScratchPtr};
pub use trace::{Level, RuntimeStats, TraceCategory, TraceEvent, Tracer};
