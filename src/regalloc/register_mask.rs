//! Register masks.
//!
//! A register mask is a set of registers of one register type, represented as a 32-bit set. Bit
//! *r* stands for register number *r*, so register files wider than 32 registers can't be
//! described.

use crate::isa::{RegUnit, TargetRegisters};
use cranelift_bitset::ScalarBitSet;

/// A set of registers of a single register type.
pub type RegMask = ScalarBitSet<u32>;

/// The mask containing only `reg`.
pub fn single(reg: RegUnit) -> RegMask {
    debug_assert!(u32::from(reg) < u32::BITS, "register {reg} doesn't fit in a mask");
    let mut mask = RegMask::new();
    mask.insert(reg);
    mask
}

/// The mask of all `num_registers` registers of a file.
pub fn all_registers(num_registers: usize) -> RegMask {
    blocked_registers_for_call(num_registers, |_| false)
}

/// The registers clobbered by a call: every register of the file that isn't callee-saved.
pub fn blocked_registers_for_call(
    num_registers: usize,
    is_callee_saved: impl Fn(RegUnit) -> bool,
) -> RegMask {
    debug_assert!(num_registers <= 32, "{num_registers} registers don't fit in a mask");
    let mut mask = RegMask::new();
    for reg in (0..num_registers).filter_map(|r| RegUnit::try_from(r).ok()) {
        if !is_callee_saved(reg) {
            mask.insert(reg);
        }
    }
    mask
}

/// Core registers clobbered by a call on `target`.
pub fn blocked_core_registers_for_call(target: &impl TargetRegisters) -> RegMask {
    blocked_registers_for_call(target.num_core_registers(), |r| {
        target.is_core_callee_saved(r)
    })
}

/// Floating point registers clobbered by a call on `target`.
pub fn blocked_fp_registers_for_call(target: &impl TargetRegisters) -> RegMask {
    blocked_registers_for_call(target.num_fp_registers(), |r| target.is_fp_callee_saved(r))
}
