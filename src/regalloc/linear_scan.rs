//! Linear scan register allocation.
//!
//! Interval groups are allocated one register type at a time, in order of increasing start
//! position. At the start of the current interval, the intervals already holding registers are
//! either *active* (live at that position) or *inactive* (in a lifetime hole, or not started
//! yet, like most fixed intervals). Each register is free until the first position where the
//! current interval meets an interval holding it:
//!
//! - a register free for the whole interval is assigned to it;
//! - a register free for a prefix of the interval is assigned to that prefix, and the rest of the
//!   interval is split off and allocated later;
//! - otherwise the interval is spilled to a stack slot for the rest of its lifetime.
//!
//! This is the simplest form of the algorithm. It never evicts an interval which already holds a
//! register, and spilled intervals stay in memory until their end.

use crate::isa::{RegUnit, RegisterType, TargetRegisters};
use crate::liveness::LivenessInfo;
use crate::regalloc::allocator::RegisterAllocator;
use crate::regalloc::liverange::{Interval, Intervals};
use crate::regalloc::validate::{check_intervals, validate_intervals};
use crate::regalloc::AllocateRegisters;
use crate::result::AllocResult;
use crate::settings::Flags;
use alloc::vec::Vec;
use core::cmp::{self, Reverse};

/// The linear scan allocation strategy.
pub struct LinearScan<'a, L, T> {
    allocator: RegisterAllocator<'a, L, T>,
    flags: Flags,
    number_of_spill_slots: usize,
    number_of_out_slots: usize,
}

impl<'a, L, T> LinearScan<'a, L, T>
where
    L: LivenessInfo,
    T: TargetRegisters,
{
    /// Create a linear scan allocator for the function described by `liveness`.
    pub fn new(liveness: &'a L, target: &'a T, flags: Flags) -> Self {
        Self {
            allocator: RegisterAllocator::new(liveness, target),
            flags,
            number_of_spill_slots: 0,
            number_of_out_slots: 0,
        }
    }

    fn allocate_register_type(&mut self, intervals: &mut Intervals, register_type: RegisterType) {
        let target = self.allocator.target();
        let num_registers = target.num_registers(register_type);

        // Sorted by decreasing start so the next interval to allocate is popped from the end.
        let mut unhandled = Vec::new();
        // Intervals holding registers, fixed ones included.
        let mut allocated = Vec::new();
        for group in intervals.groups_of_type(register_type) {
            if intervals.is_fixed(group) || intervals.register(group).is_some() {
                allocated.push(group);
            } else if intervals.low(group).is_none() && !intervals.ranges(group).is_empty() {
                unhandled.push(group);
            }
        }
        unhandled.sort_by_key(|&iv| Reverse(intervals.start(iv)));

        let mut free_until = Vec::with_capacity(num_registers);
        while let Some(current) = unhandled.pop() {
            let position = intervals.start(current);
            allocated.retain(|&iv| !intervals.is_dead_at(iv, position));

            free_until.clear();
            free_until.resize(num_registers, u32::MAX);
            for &iv in &allocated {
                let until = if intervals.covers(iv, position) {
                    position
                } else {
                    match intervals.first_intersection(current, iv) {
                        Some(until) => until,
                        None => continue,
                    }
                };
                let mask = self.allocator.register_mask(intervals, iv, register_type);
                for reg in mask.iter() {
                    if let Some(free) = free_until.get_mut(usize::from(reg)) {
                        *free = cmp::min(*free, until);
                    }
                }
            }

            let high = intervals.high(current);
            let best = (0..num_registers)
                .filter_map(|r| RegUnit::try_from(r).ok())
                .filter(|&r| target.is_allocatable(register_type, r))
                .filter_map(|r| match high {
                    None => Some((r, free_until[usize::from(r)])),
                    Some(_) => {
                        let next = r.checked_add(1)?;
                        let free = free_until.get(usize::from(next))?;
                        target
                            .is_allocatable(register_type, next)
                            .then(|| (r, cmp::min(free_until[usize::from(r)], *free)))
                    }
                })
                .max_by_key(|&(r, free)| (free, Reverse(r)));

            match best {
                Some((reg, free)) if free >= intervals.end(current) => {
                    self.assign(intervals, &mut allocated, current, register_type, reg);
                }
                Some((reg, free)) if free > position => {
                    let rest = self
                        .allocator
                        .split_between(intervals, current, position, free);
                    self.assign(intervals, &mut allocated, current, register_type, reg);
                    let start = intervals.start(rest);
                    let at = unhandled.partition_point(|&iv| intervals.start(iv) > start);
                    unhandled.insert(at, rest);
                }
                _ => self.spill(intervals, current),
            }
        }
    }

    fn assign(
        &self,
        intervals: &mut Intervals,
        allocated: &mut Vec<Interval>,
        iv: Interval,
        register_type: RegisterType,
        reg: RegUnit,
    ) {
        log::debug!(
            "assigning {} to {}",
            self.allocator.display_register(register_type, reg),
            intervals.display(iv)
        );
        intervals.set_register(iv, reg);
        allocated.push(iv);
        if let Some(high) = intervals.high(iv) {
            intervals.set_register(high, reg + 1);
            allocated.push(high);
        }
    }

    fn spill(&mut self, intervals: &mut Intervals, iv: Interval) {
        for half in [Some(iv), intervals.high(iv)].into_iter().flatten() {
            if intervals.spill_slot(half).is_none() {
                let slot = self.number_of_out_slots + self.number_of_spill_slots;
                self.number_of_spill_slots += 1;
                intervals.set_spill_slot(half, slot as u32);
            }
            log::debug!("spilling {}", intervals.display(half));
        }
    }

    fn groups(intervals: &Intervals, register_type: RegisterType) -> Vec<Interval> {
        intervals.groups_of_type(register_type).collect()
    }
}

impl<L, T> AllocateRegisters for LinearScan<'_, L, T>
where
    L: LivenessInfo,
    T: TargetRegisters,
{
    fn allocate_registers(
        &mut self,
        intervals: &mut Intervals,
        number_of_out_slots: usize,
    ) -> AllocResult<()> {
        self.number_of_out_slots = number_of_out_slots;
        self.number_of_spill_slots = 0;
        for register_type in RegisterType::ALL {
            self.allocate_register_type(intervals, register_type);
        }
        log::debug!(
            "linear scan allocated {} intervals with {} spill slots",
            intervals.len(),
            self.number_of_spill_slots
        );

        if self.flags.enable_verifier() {
            for register_type in RegisterType::ALL {
                check_intervals(
                    &Self::groups(intervals, register_type),
                    intervals,
                    self.number_of_spill_slots,
                    self.number_of_out_slots,
                    self.allocator.target(),
                    self.allocator.liveness(),
                    register_type,
                )?;
            }
        }
        Ok(())
    }

    fn validate(&self, intervals: &Intervals, log_fatal_on_failure: bool) -> bool {
        RegisterType::ALL.into_iter().all(|register_type| {
            validate_intervals(
                &Self::groups(intervals, register_type),
                intervals,
                self.number_of_spill_slots,
                self.number_of_out_slots,
                self.allocator.target(),
                self.allocator.liveness(),
                register_type,
                log_fatal_on_failure,
            )
        })
    }

    fn number_of_spill_slots(&self) -> usize {
        self.number_of_spill_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstKind, ValueType};
    use crate::isa::TargetDescription;
    use crate::liveness::Liveness;
    use crate::settings;

    /// One block of `n` instructions, with calls at the given instruction indexes.
    fn function(n: u32, calls: &[u32]) -> Liveness {
        let mut lv = Liveness::new();
        let b = lv.make_block();
        for i in 0..n {
            let kind = if calls.contains(&i) {
                InstKind::Call
            } else {
                InstKind::Other
            };
            lv.append_inst(b, kind);
        }
        lv
    }

    fn value(ivs: &mut Intervals, ty: ValueType, start: u32, end: u32) -> Interval {
        let iv = ivs.make_interval(ty, None);
        ivs.add_range(iv, start, end);
        iv
    }

    #[test]
    fn disjoint_intervals_share_a_register() {
        let lv = function(20, &[]);
        let target = TargetDescription::x64_system_v();
        let mut ivs = Intervals::new();
        let a = value(&mut ivs, ValueType::I32, 0, 10);
        let b = value(&mut ivs, ValueType::I32, 10, 20);
        let c = value(&mut ivs, ValueType::I32, 4, 16);
        let mut ls = LinearScan::new(&lv, &target, Flags::default());
        ls.allocate_registers(&mut ivs, 0).unwrap();
        assert_eq!(ivs.register(a), Some(0));
        assert_eq!(ivs.register(b), Some(0));
        assert_eq!(ivs.register(c), Some(1));
        assert_eq!(ls.number_of_spill_slots(), 0);
        assert!(ls.validate(&ivs, true));
    }

    #[test]
    fn values_live_across_calls_use_callee_saved_registers() {
        let lv = function(20, &[5]);
        let target = TargetDescription::x64_system_v();
        let mut ivs = Intervals::new();
        let call = ivs.make_fixed(None, ValueType::Void);
        ivs.add_range(call, 10, 11);
        let across = value(&mut ivs, ValueType::I32, 2, 20);
        let fp = value(&mut ivs, ValueType::F64, 2, 20);
        let mut ls = LinearScan::new(&lv, &target, Flags::default());
        ls.allocate_registers(&mut ivs, 0).unwrap();

        // %rbx is the first allocatable callee-saved register.
        assert_eq!(ivs.register(across), Some(3));

        // No %xmm register survives the call: the value is split before it and then spilled.
        assert_eq!(ivs.register(fp), Some(0));
        let rest = ivs.next_sibling(fp).unwrap();
        assert_eq!(ivs.start(rest), 10);
        assert_eq!(ivs.register(rest), None);
        assert_eq!(ivs.spill_slot(fp), Some(0));
        assert_eq!(ls.number_of_spill_slots(), 1);
        assert!(ls.validate(&ivs, true));
    }

    #[test]
    fn synthetic_points_block_every_register() {
        let mut lv = Liveness::new();
        let b = lv.make_block();
        for _ in 0..4 {
            lv.append_inst(b, InstKind::Other);
        }
        let synthetic = lv.append_synthetic(b);
        for _ in 0..4 {
            lv.append_inst(b, InstKind::Other);
        }
        let target = TargetDescription::aarch64_aapcs();
        let mut ivs = Intervals::new();
        let block = ivs.make_fixed(None, ValueType::Void);
        ivs.add_range(block, synthetic, synthetic + 1);
        let v = value(&mut ivs, ValueType::I32, 0, 16);
        let mut ls = LinearScan::new(&lv, &target, Flags::default());
        ls.allocate_registers(&mut ivs, 3).unwrap();

        assert_eq!(ivs.register(v), Some(0));
        let rest = ivs.next_sibling(v).unwrap();
        assert_eq!(ivs.start(rest), synthetic);
        // Spill slots are numbered after the out slots.
        assert_eq!(ivs.spill_slot(rest), Some(3));
        assert!(ls.validate(&ivs, false));
    }

    #[test]
    fn register_pairs() {
        let lv = function(20, &[]);
        let target = TargetDescription::x64_system_v();
        let mut ivs = Intervals::new();
        let single = value(&mut ivs, ValueType::I32, 0, 20);
        let low = value(&mut ivs, ValueType::I64, 2, 20);
        let high = ivs.add_high_interval(low);
        let mut ls = LinearScan::new(&lv, &target, Flags::default());
        ls.allocate_registers(&mut ivs, 0).unwrap();
        assert_eq!(ivs.register(single), Some(0));
        assert_eq!(ivs.register(low), Some(1));
        assert_eq!(ivs.register(high), Some(2));
        assert!(ls.validate(&ivs, true));
    }

    #[test]
    fn running_out_of_registers() {
        let lv = function(20, &[]);
        let target = TargetDescription::x64_system_v();
        let mut ivs = Intervals::new();
        // 14 allocatable core registers on x64.
        let values: Vec<_> = (0..16)
            .map(|_| value(&mut ivs, ValueType::I32, 0, 30))
            .collect();
        let mut ls = LinearScan::new(&lv, &target, Flags::default());
        ls.allocate_registers(&mut ivs, 1).unwrap();
        let mut slots: Vec<_> = values
            .iter()
            .filter(|&&iv| ivs.register(iv).is_none())
            .map(|&iv| ivs.spill_slot(iv))
            .collect();
        slots.sort();
        assert_eq!(slots, [Some(1), Some(2)]);
        assert!(values
            .iter()
            .all(|&iv| ivs.register(iv).map_or(true, |r| r != 4 && r != 5)));
        assert!(ls.validate(&ivs, true));
    }

    #[test]
    fn verifier_reports_conflicts() {
        let lv = function(20, &[]);
        let target = TargetDescription::x64_system_v();
        let mut ivs = Intervals::new();
        let a = ivs.make_fixed(Some(0), ValueType::I32);
        ivs.add_range(a, 0, 10);
        let b = ivs.make_fixed(Some(0), ValueType::I32);
        ivs.add_range(b, 5, 15);

        let mut ls = LinearScan::new(&lv, &target, Flags::default());
        assert!(matches!(
            ls.allocate_registers(&mut ivs, 0),
            Err(crate::AllocError::Verifier(_))
        ));

        let mut b = settings::builder();
        settings::Configurable::set(&mut b, "enable_verifier", "false").unwrap();
        let mut ls = LinearScan::new(&lv, &target, Flags::new(b));
        assert_eq!(ls.allocate_registers(&mut ivs, 0), Ok(()));
        assert!(!ls.validate(&ivs, false));
    }
}
