//! Interference validator.
//!
//! After allocation, no two intervals may hold the same register or the same spill slot at the
//! same position. The validator checks this property directly from the allocated intervals,
//! independently of whatever bookkeeping the allocation strategy used. It recomputes register
//! masks from scratch and marks every position of every range in one bit vector per register and
//! one per spill slot.
//!
//! There is one exception: an interval which reuses the register of one of the inputs of its
//! defining instruction may overlap that input at the definition, provided the input dies there.

use crate::isa::{RegUnit, RegisterType, TargetRegisters};
use crate::liveness::LivenessInfo;
use crate::regalloc::allocator::RegisterAllocator;
use crate::regalloc::liverange::{Interval, Intervals};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use cranelift_bitset::CompoundBitSet;
use thiserror::Error;

/// Two intervals occupy the same location at the same position.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalConflict {
    /// A register is held by two intervals.
    #[error("Register conflict at {position} for {register_type} register {register} in {interval}")]
    Register {
        /// The first position where the register is held twice.
        position: u32,
        /// The register file of `register`.
        register_type: RegisterType,
        /// The register held twice.
        register: RegUnit,
        /// The interval found to conflict with an earlier one.
        interval: Interval,
    },

    /// A spill slot is held by two interval groups.
    #[error("Spill slot conflict at {position} for slot {slot} in {interval}")]
    SpillSlot {
        /// The first position where the slot is held twice.
        position: u32,
        /// The spill slot held twice.
        slot: u32,
        /// The interval found to conflict with an earlier one.
        interval: Interval,
    },
}

impl IntervalConflict {
    /// The position where the conflict was found.
    pub fn position(&self) -> u32 {
        match *self {
            Self::Register { position, .. } | Self::SpillSlot { position, .. } => position,
        }
    }

    /// The interval found to conflict with an earlier one.
    pub fn interval(&self) -> Interval {
        match *self {
            Self::Register { interval, .. } | Self::SpillSlot { interval, .. } => interval,
        }
    }
}

/// Check that the interval groups in `groups` don't interfere.
///
/// `groups` are the parents of the groups competing for registers of `register_type`, fixed
/// intervals included. Spill slots are numbered after the `number_of_out_slots` slots reserved
/// for outgoing arguments, and there are `number_of_spill_slots` of them.
pub fn check_intervals<L, T>(
    groups: &[Interval],
    intervals: &Intervals,
    number_of_spill_slots: usize,
    number_of_out_slots: usize,
    target: &T,
    liveness: &L,
    register_type: RegisterType,
) -> Result<(), IntervalConflict>
where
    L: LivenessInfo,
    T: TargetRegisters,
{
    let allocator = RegisterAllocator::new(liveness, target);
    check(
        &allocator,
        groups,
        intervals,
        number_of_spill_slots,
        number_of_out_slots,
        register_type,
        false,
    )
}

/// Validate the allocation of `groups`, returning `true` when no intervals interfere.
///
/// With `log_fatal_on_failure`, a conflict is a fatal error. It is logged and the process panics
/// with a diagnostic listing every interval holding the register at the conflicting position.
/// Debug builds also check that non-fixed intervals were only given allocatable registers.
pub fn validate_intervals<L, T>(
    groups: &[Interval],
    intervals: &Intervals,
    number_of_spill_slots: usize,
    number_of_out_slots: usize,
    target: &T,
    liveness: &L,
    register_type: RegisterType,
    log_fatal_on_failure: bool,
) -> bool
where
    L: LivenessInfo,
    T: TargetRegisters,
{
    let allocator = RegisterAllocator::new(liveness, target);
    match check(
        &allocator,
        groups,
        intervals,
        number_of_spill_slots,
        number_of_out_slots,
        register_type,
        log_fatal_on_failure,
    ) {
        Ok(()) => true,
        Err(conflict) if log_fatal_on_failure => {
            let message = describe(&allocator, groups, intervals, &conflict);
            log::error!("{message}");
            panic!("{message}");
        }
        Err(conflict) => {
            log::debug!("{conflict}");
            false
        }
    }
}

fn check<L, T>(
    allocator: &RegisterAllocator<'_, L, T>,
    groups: &[Interval],
    intervals: &Intervals,
    number_of_spill_slots: usize,
    number_of_out_slots: usize,
    register_type: RegisterType,
    check_allocatable: bool,
) -> Result<(), IntervalConflict>
where
    L: LivenessInfo,
    T: TargetRegisters,
{
    let target = allocator.target();
    let liveness = allocator.liveness();
    let number_of_registers = target.num_registers(register_type);

    let max_end = groups
        .iter()
        .flat_map(|&group| intervals.all_ranges(group))
        .map(|(_, range)| range.end)
        .max()
        .unwrap_or(0);

    let mut liveness_of_values: Vec<CompoundBitSet> = (0..number_of_registers
        + number_of_spill_slots)
        .map(|_| CompoundBitSet::with_capacity(max_end as usize))
        .collect();

    for &group in groups {
        for (iv, range) in intervals.all_ranges(group) {
            let has_dedicated_slot = intervals
                .defined_by(iv)
                .is_some_and(|inst| liveness.inst_kind(inst).has_dedicated_slot());

            if let Some(slot) = intervals.spill_slot(iv) {
                if !has_dedicated_slot {
                    debug_assert!(
                        slot as usize >= number_of_out_slots
                            && (slot as usize) < number_of_out_slots + number_of_spill_slots,
                        "{iv} has spill slot {slot} out of range"
                    );
                    let index = number_of_registers + slot as usize - number_of_out_slots;
                    let bits = &mut liveness_of_values[index];
                    for position in range.start..range.end {
                        if bits.contains(position as usize) {
                            return Err(IntervalConflict::SpillSlot {
                                position,
                                slot,
                                interval: iv,
                            });
                        }
                        bits.insert(position as usize);
                    }
                }
            }

            let mask = allocator.register_mask(intervals, iv, register_type);
            for reg in mask.iter() {
                debug_assert!(
                    usize::from(reg) < number_of_registers,
                    "{iv} holds {register_type} register {reg} outside the register file"
                );
                if cfg!(debug_assertions) && check_allocatable && !intervals.is_fixed(iv) {
                    assert!(
                        target.is_allocatable(register_type, reg),
                        "{iv} was given the unallocatable {register_type} register {reg}"
                    );
                }
                let bits = &mut liveness_of_values[usize::from(reg)];
                for position in range.start..range.end {
                    if bits.contains(position as usize) {
                        if intervals.is_using_input_register(iv)
                            && intervals.can_use_input_register(iv)
                        {
                            continue;
                        }
                        return Err(IntervalConflict::Register {
                            position,
                            register_type,
                            register: reg,
                            interval: iv,
                        });
                    }
                    bits.insert(position as usize);
                }
            }
        }
    }
    Ok(())
}

/// Build the fatal diagnostic for `conflict`.
fn describe<L, T>(
    allocator: &RegisterAllocator<'_, L, T>,
    groups: &[Interval],
    intervals: &Intervals,
    conflict: &IntervalConflict,
) -> String
where
    L: LivenessInfo,
    T: TargetRegisters,
{
    let mut message = String::new();
    if let Err(fmt::Error) = write_conflict(&mut message, allocator, groups, intervals, conflict) {
        log::error!("failed to describe {conflict}");
        return conflict.to_string();
    }
    message
}

/// Write the diagnostic for `conflict` to `w`, listing the intervals holding the register.
fn write_conflict<L, T>(
    w: &mut dyn fmt::Write,
    allocator: &RegisterAllocator<'_, L, T>,
    groups: &[Interval],
    intervals: &Intervals,
    conflict: &IntervalConflict,
) -> fmt::Result
where
    L: LivenessInfo,
    T: TargetRegisters,
{
    let liveness = allocator.liveness();
    match *conflict {
        IntervalConflict::SpillSlot { position, .. } => {
            write!(w, "Spill slot conflict at {position}")
        }
        IntervalConflict::Register {
            position,
            register_type,
            register,
            interval,
        } => {
            write!(w, "Register conflict at {position} ")?;
            if let Some(inst) = intervals.defined_by(interval) {
                write!(w, "({}) ", liveness.inst_kind(inst))?;
            }
            write!(w, "for ")?;
            allocator.dump_register(w, register_type, register)?;
            for &group in groups {
                for iv in intervals.siblings(group) {
                    let mask = allocator.register_mask(intervals, iv, register_type);
                    if !mask.contains(register) || !intervals.covers(iv, position) {
                        continue;
                    }
                    match intervals.defined_by(iv) {
                        Some(inst) => write!(w, "\n{}", liveness.inst_kind(inst))?,
                        None => write!(w, "\nphysical")?,
                    }
                    write!(w, " {}", intervals.display(iv))?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Inst, InstKind, ValueType};
    use crate::isa::TargetDescription;
    use crate::liveness::Liveness;

    /// One block of 20 instructions where instruction 5 (position 10) is a call.
    fn function() -> (Liveness, Block) {
        let mut lv = Liveness::new();
        let b = lv.make_block();
        for i in 0..20 {
            let kind = if i == 5 { InstKind::Call } else { InstKind::Other };
            lv.append_inst(b, kind);
        }
        (lv, b)
    }

    fn value(ivs: &mut Intervals, start: u32, end: u32, reg: Option<RegUnit>) -> Interval {
        let iv = ivs.make_interval(ValueType::I32, None);
        ivs.add_range(iv, start, end);
        if let Some(reg) = reg {
            ivs.set_register(iv, reg);
        }
        iv
    }

    fn core_check(
        lv: &Liveness,
        ivs: &Intervals,
        groups: &[Interval],
        spill_slots: usize,
        out_slots: usize,
    ) -> Result<(), IntervalConflict> {
        let target = TargetDescription::x64_system_v();
        check_intervals(
            groups,
            ivs,
            spill_slots,
            out_slots,
            &target,
            lv,
            RegisterType::Core,
        )
    }

    #[test]
    fn register_conflict() {
        let (lv, _) = function();
        let mut ivs = Intervals::new();
        let a = value(&mut ivs, 10, 20, Some(0));
        let b = value(&mut ivs, 15, 25, Some(0));
        assert_eq!(
            core_check(&lv, &ivs, &[a, b], 0, 0),
            Err(IntervalConflict::Register {
                position: 15,
                register_type: RegisterType::Core,
                register: 0,
                interval: b,
            })
        );
        let target = TargetDescription::x64_system_v();
        assert!(!validate_intervals(
            &[a, b],
            &ivs,
            0,
            0,
            &target,
            &lv,
            RegisterType::Core,
            false
        ));

        let c = value(&mut ivs, 20, 30, Some(0));
        let d = value(&mut ivs, 15, 25, Some(1));
        assert_eq!(core_check(&lv, &ivs, &[a, c, d], 0, 0), Ok(()));
        assert!(validate_intervals(
            &[a, c, d],
            &ivs,
            0,
            0,
            &target,
            &lv,
            RegisterType::Core,
            true
        ));
    }

    #[test]
    fn siblings_are_checked() {
        let (lv, _) = function();
        let mut ivs = Intervals::new();
        let a = value(&mut ivs, 2, 30, Some(0));
        let s = ivs.split_at(a, 16);
        ivs.set_register(s, 1);
        let b = value(&mut ivs, 20, 24, Some(2));
        assert_eq!(core_check(&lv, &ivs, &[a, b], 0, 0), Ok(()));

        ivs.set_register(s, 2);
        let conflict = core_check(&lv, &ivs, &[a, b], 0, 0).unwrap_err();
        assert_eq!(conflict.position(), 20);
        assert_eq!(conflict.interval(), b);
    }

    #[test]
    fn input_register_reuse() {
        let (lv, _) = function();
        let mut ivs = Intervals::new();
        let input = value(&mut ivs, 2, 9, Some(0));
        let output = value(&mut ivs, 8, 14, Some(0));
        ivs.set_input_register_reuse(output, true, false);
        assert!(core_check(&lv, &ivs, &[input, output], 0, 0).is_err());
        ivs.set_input_register_reuse(output, true, true);
        assert_eq!(core_check(&lv, &ivs, &[input, output], 0, 0), Ok(()));
    }

    #[test]
    fn spill_slots() {
        let (lv, _) = function();
        let mut ivs = Intervals::new();
        // Out slots 0 and 1 are reserved, spill slots are 2 and 3.
        let a = value(&mut ivs, 0, 12, None);
        let b = value(&mut ivs, 6, 18, None);
        ivs.set_spill_slot(a, 2);
        ivs.set_spill_slot(b, 3);
        assert_eq!(core_check(&lv, &ivs, &[a, b], 2, 2), Ok(()));

        ivs.set_spill_slot(b, 2);
        assert_eq!(
            core_check(&lv, &ivs, &[a, b], 2, 2),
            Err(IntervalConflict::SpillSlot {
                position: 6,
                slot: 2,
                interval: b,
            })
        );
    }

    #[test]
    fn parameter_slots_are_not_checked() {
        let mut lv = Liveness::new();
        let b = lv.make_block();
        let (p0, _) = lv.append_inst(b, InstKind::ParameterValue);
        let (p1, _) = lv.append_inst(b, InstKind::ParameterValue);
        let (cm, _) = lv.append_inst(b, InstKind::CurrentMethod);
        for _ in 0..10 {
            lv.append_inst(b, InstKind::Other);
        }

        let mut ivs = Intervals::new();
        let param = |ivs: &mut Intervals, inst: Inst| {
            let iv = ivs.make_interval(ValueType::I32, Some(inst));
            ivs.add_range(iv, 1, 20);
            // Parameters are passed in the caller's frame, past any slot of ours.
            ivs.set_spill_slot(iv, 40);
            iv
        };
        let a = param(&mut ivs, p0);
        let b = param(&mut ivs, p1);
        let c = param(&mut ivs, cm);
        assert_eq!(core_check(&lv, &ivs, &[a, b, c], 0, 0), Ok(()));
    }

    #[test]
    fn call_blocks_caller_saved_registers() {
        let (lv, _) = function();
        let mut ivs = Intervals::new();
        let call = ivs.make_fixed(None, ValueType::Void);
        ivs.add_range(call, 10, 11);

        // %rbx survives the call.
        let rbx = value(&mut ivs, 4, 16, Some(3));
        assert_eq!(core_check(&lv, &ivs, &[call, rbx], 0, 0), Ok(()));

        // %rax doesn't.
        let rax = value(&mut ivs, 4, 16, Some(0));
        assert_eq!(
            core_check(&lv, &ivs, &[call, rax], 0, 0),
            Err(IntervalConflict::Register {
                position: 10,
                register_type: RegisterType::Core,
                register: 0,
                interval: rax,
            })
        );
    }

    #[test]
    fn fixed_physical_register() {
        let (lv, _) = function();
        let mut ivs = Intervals::new();
        let rsp = ivs.make_fixed(Some(4), ValueType::I64);
        ivs.add_range(rsp, 0, 40);
        let a = value(&mut ivs, 4, 16, Some(4));
        assert!(core_check(&lv, &ivs, &[rsp, a], 0, 0).is_err());
        assert_eq!(core_check(&lv, &ivs, &[rsp], 0, 0), Ok(()));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside the register file")]
    fn register_outside_the_register_file() {
        let (lv, _) = function();
        let mut ivs = Intervals::new();
        // x64 has 16 core registers. With spill slots, register 20 would otherwise mark the
        // positions of a spill slot.
        let a = value(&mut ivs, 4, 8, Some(20));
        let _ = core_check(&lv, &ivs, &[a], 8, 0);
    }

    #[test]
    fn spill_slot_diagnostic() {
        let (lv, _) = function();
        let target = TargetDescription::x64_system_v();
        let allocator = RegisterAllocator::new(&lv, &target);
        let mut ivs = Intervals::new();
        let a = value(&mut ivs, 0, 12, None);
        let b = value(&mut ivs, 6, 18, None);
        ivs.set_spill_slot(a, 0);
        ivs.set_spill_slot(b, 0);

        let conflict = core_check(&lv, &ivs, &[a, b], 1, 0).unwrap_err();
        assert_eq!(
            describe(&allocator, &[a, b], &ivs, &conflict),
            "Spill slot conflict at 6"
        );
    }

    #[test]
    #[should_panic(expected = "Register conflict at 15 for %rax")]
    fn fatal_register_conflict() {
        let _ = env_logger::try_init();
        let (lv, _) = function();
        let mut ivs = Intervals::new();
        let a = value(&mut ivs, 10, 20, Some(0));
        let b = value(&mut ivs, 15, 25, Some(0));
        let target = TargetDescription::x64_system_v();
        validate_intervals(
            &[a, b],
            &ivs,
            0,
            0,
            &target,
            &lv,
            RegisterType::Core,
            true,
        );
    }

    #[test]
    fn fatal_diagnostic_lists_intervals() {
        let mut lv = Liveness::new();
        let blk = lv.make_block();
        let (def, _) = lv.append_inst(blk, InstKind::Other);
        for _ in 0..20 {
            lv.append_inst(blk, InstKind::Other);
        }
        let target = TargetDescription::x64_system_v();
        let allocator = RegisterAllocator::new(&lv, &target);
        let mut ivs = Intervals::new();
        let a = value(&mut ivs, 10, 20, Some(0));
        let b = ivs.make_interval(ValueType::I32, Some(def));
        ivs.add_range(b, 15, 25);
        ivs.set_register(b, 0);

        let conflict = core_check(&lv, &ivs, &[a, b], 0, 0).unwrap_err();
        let message = describe(&allocator, &[a, b], &ivs, &conflict);
        assert_eq!(
            message,
            "Register conflict at 15 (Other) for %rax\n\
             physical iv0: ranges: { [10,20) }, uses: { }, i32, reg: 0\n\
             Other iv1: ranges: { [15,25) }, uses: { }, i32, reg: 0"
        );
    }
}
