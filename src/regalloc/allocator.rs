//! State and operations shared by all register allocation strategies.
//!
//! `RegisterAllocator` borrows the liveness analysis and the target's register description for
//! one allocation pass and caches the registers clobbered by calls. Strategies build on it to
//! split intervals and to compute which registers an interval occupies.

use crate::isa::{RegUnit, RegisterType, TargetRegisters};
use crate::liveness::LivenessInfo;
use crate::regalloc::liverange::{Interval, Intervals};
use crate::regalloc::register_mask::{self, RegMask};
use core::fmt;

/// Register allocation state shared by strategies.
pub struct RegisterAllocator<'a, L, T> {
    liveness: &'a L,
    target: &'a T,
    core_registers_blocked_for_call: RegMask,
    fp_registers_blocked_for_call: RegMask,
}

impl<'a, L, T> RegisterAllocator<'a, L, T>
where
    L: LivenessInfo,
    T: TargetRegisters,
{
    /// Create allocator state for one pass over the intervals described by `liveness`.
    pub fn new(liveness: &'a L, target: &'a T) -> Self {
        Self {
            liveness,
            target,
            core_registers_blocked_for_call: register_mask::blocked_core_registers_for_call(
                target,
            ),
            fp_registers_blocked_for_call: register_mask::blocked_fp_registers_for_call(target),
        }
    }

    /// The liveness analysis being allocated.
    pub fn liveness(&self) -> &'a L {
        self.liveness
    }

    /// The target's register description.
    pub fn target(&self) -> &'a T {
        self.target
    }

    /// Registers of `register_type` that are clobbered by calls.
    pub fn blocked_for_call(&self, register_type: RegisterType) -> RegMask {
        match register_type {
            RegisterType::Core => self.core_registers_blocked_for_call,
            RegisterType::Fp => self.fp_registers_blocked_for_call,
        }
    }

    /// The registers of `register_type` occupied by `iv` over its ranges.
    ///
    /// An interval with a register occupies that register. A fixed interval without one blocks
    /// the registers clobbered by a call when its first range starts at an instruction, and every
    /// register when it starts at a synthetic position. Anything else occupies no register.
    pub fn register_mask(
        &self,
        intervals: &Intervals,
        iv: Interval,
        register_type: RegisterType,
    ) -> RegMask {
        if let Some(reg) = intervals.register(iv) {
            debug_assert_eq!(
                register_type == RegisterType::Fp,
                intervals.ty(iv).is_floating_point(),
                "{iv} has a {register_type} register but type {}",
                intervals.ty(iv)
            );
            register_mask::single(reg)
        } else if intervals.is_fixed(iv) {
            let start = intervals.start(iv);
            if self.liveness.instruction_from_position(start / 2).is_some() {
                self.blocked_for_call(register_type)
            } else {
                register_mask::all_registers(self.target.num_registers(register_type))
            }
        } else {
            RegMask::new()
        }
    }

    /// Split `iv` at `position`, returning the interval which covers `position` afterwards.
    ///
    /// Splitting at the start of `iv` doesn't create a sibling. It only forgets the register of
    /// `iv` and of its pair, so that `iv` can be allocated again. Otherwise `iv` is truncated
    /// before `position` and the returned sibling takes over the rest. The other half of a
    /// register pair is split at the same position, and the two new siblings form a new pair.
    pub fn split(&self, intervals: &mut Intervals, iv: Interval, position: u32) -> Interval {
        debug_assert!(
            position >= intervals.start(iv),
            "{iv} split at {position} before its start"
        );
        debug_assert!(
            !intervals.is_dead_at(iv, position),
            "{iv} split at {position} after its end"
        );
        log::trace!("splitting {} at {position}", intervals.display(iv));

        if position == intervals.start(iv) {
            intervals.clear_register(iv);
            if let Some(high) = intervals.high(iv) {
                intervals.clear_register(high);
            } else if let Some(low) = intervals.low(iv) {
                intervals.clear_register(low);
            }
            return iv;
        }

        let new = intervals.split_at(iv, position);
        if let Some(high) = intervals.high(iv) {
            let new_high = intervals.split_at(high, position);
            intervals.set_pair(new, new_high);
        } else if let Some(low) = intervals.low(iv) {
            let new_low = intervals.split_at(low, position);
            intervals.set_pair(new_low, new);
        }
        new
    }

    /// Split `iv` somewhere in `(from, to]`, preferring a block boundary.
    ///
    /// Moves are inserted at block boundaries anyway when sibling locations are connected, so a
    /// split at the start of a block is cheaper than one in the middle. The position chosen is:
    ///
    /// - `to` itself, when `from` and `to` are in the same block;
    /// - otherwise the start of the earliest block after `from` that is dominated by the
    ///   dominator of `from`'s block and starts before `to`'s block, if any, else `to`'s block;
    /// - hoisted out to the header of the outermost loop around that block which doesn't also
    ///   contain `from`.
    pub fn split_between(
        &self,
        intervals: &mut Intervals,
        iv: Interval,
        from: u32,
        to: u32,
    ) -> Interval {
        let liveness = self.liveness;
        let (Some(block_from), Some(mut block_to)) = (
            liveness.block_from_position(from / 2),
            liveness.block_from_position(to / 2),
        ) else {
            debug_assert!(false, "split between positions {from} and {to} outside any block");
            return self.split(intervals, iv, to);
        };

        if block_from == block_to {
            return self.split(intervals, iv, to);
        }
        debug_assert!(
            from < liveness.lifetime_end(block_from),
            "{from} is past the end of {block_from}"
        );

        // Blocks dominated by the same block are not sorted in linear order.
        if let Some(dominator) = liveness.dominator(block_from) {
            for &dominated in liveness.dominated_blocks(dominator) {
                let start = liveness.lifetime_start(dominated);
                if start > from && liveness.lifetime_start(block_to) > start {
                    block_to = dominated;
                    debug_assert_ne!(block_to, block_from);
                }
            }
        }

        let from_start = liveness.lifetime_start(block_from);
        for header in liveness.loop_headers(block_to) {
            if from_start >= liveness.lifetime_start(header) {
                break;
            }
            block_to = header;
        }

        log::trace!("split {iv} between {from} and {to} at {block_to}");
        self.split(intervals, iv, liveness.lifetime_start(block_to))
    }

    /// Write the name of `reg` to `w`.
    pub fn dump_register(
        &self,
        w: &mut dyn fmt::Write,
        register_type: RegisterType,
        reg: RegUnit,
    ) -> fmt::Result {
        self.target.write_register(w, register_type, reg)
    }

    /// Get an object that displays the name of `reg`.
    pub fn display_register(
        &self,
        register_type: RegisterType,
        reg: RegUnit,
    ) -> DisplayRegister<'_, T> {
        DisplayRegister {
            target: self.target,
            register_type,
            reg,
        }
    }
}

/// Displaying a register requires the target it belongs to.
pub struct DisplayRegister<'a, T> {
    target: &'a T,
    register_type: RegisterType,
    reg: RegUnit,
}

impl<T: TargetRegisters> fmt::Display for DisplayRegister<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.target.write_register(f, self.register_type, self.reg)
    }
}
