//! Linear scan register allocation core.
//!
//! This crate provides the parts of a linear scan register allocator that are independent of the
//! allocation strategy:
//!
//! - the live interval model, with interval groups produced by splitting and register pairs;
//! - register masks describing which registers an interval occupies, including the registers
//!   clobbered at calls;
//! - splitting of intervals at a position, or between two positions at a block boundary chosen
//!   from the dominator tree and the loop nest;
//! - an interference validator checking an allocation for register and spill slot conflicts.
//!
//! A linear scan strategy built on top of those parts is instantiated with `regalloc::create`.
//! The allocator reads a liveness analysis through the `liveness::LivenessInfo` trait and the
//! target's registers through the `isa::TargetRegisters` trait.

#![deny(missing_docs)]

extern crate alloc;

pub use cranelift_entity as entity;

pub mod ir;
pub mod isa;
pub mod liveness;
pub mod regalloc;
pub mod settings;

mod result;

pub use crate::entity::packed_option;
pub use crate::result::{AllocError, AllocResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
