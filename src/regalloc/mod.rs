//! Register allocation.
//!
//! This module contains data structures and algorithms used for register allocation: live
//! intervals and their splitting, register masks, an interference validator, and the linear
//! scan allocation strategy.
//!
//! Strategies are instantiated by `create` from the `regalloc` setting.

use crate::isa::TargetRegisters;
use crate::liveness::LivenessInfo;
use crate::result::{AllocError, AllocResult};
use crate::settings::{Flags, Strategy};
use alloc::boxed::Box;

mod allocator;
mod linear_scan;
mod liverange;
mod register_mask;
mod validate;

pub use self::allocator::{DisplayRegister, RegisterAllocator};
pub use self::linear_scan::LinearScan;
pub use self::liverange::{DisplayInterval, Interval, Intervals, LiveRange};
pub use self::register_mask::{
    RegMask, all_registers, blocked_core_registers_for_call, blocked_fp_registers_for_call,
    blocked_registers_for_call,
};
pub use self::validate::{IntervalConflict, check_intervals, validate_intervals};

/// A register allocation strategy.
pub trait AllocateRegisters {
    /// Assign registers and spill slots to all intervals in `intervals`.
    ///
    /// The first `number_of_out_slots` stack slots hold outgoing call arguments and are never
    /// used for spilling.
    fn allocate_registers(
        &mut self,
        intervals: &mut Intervals,
        number_of_out_slots: usize,
    ) -> AllocResult<()>;

    /// Check that the allocation of `intervals` has no conflicts.
    ///
    /// See `validate_intervals` for the meaning of `log_fatal_on_failure`.
    fn validate(&self, intervals: &Intervals, log_fatal_on_failure: bool) -> bool;

    /// Number of spill slots used by the last allocation.
    fn number_of_spill_slots(&self) -> usize;
}

/// Instantiate the register allocation `strategy` for the function described by `liveness`.
pub fn create<'a, L, T>(
    strategy: Strategy,
    target: &'a T,
    liveness: &'a L,
    flags: &Flags,
) -> AllocResult<Box<dyn AllocateRegisters + 'a>>
where
    L: LivenessInfo,
    T: TargetRegisters,
{
    log::debug!("creating {} register allocator", strategy.description());
    match strategy {
        Strategy::LinearScan => Ok(Box::new(LinearScan::new(liveness, target, flags.clone()))),
        Strategy::GraphColor => Err(AllocError::RemovedStrategy(strategy)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::TargetDescription;
    use crate::liveness::Liveness;
    use alloc::string::ToString;

    #[test]
    fn create_strategies() {
        let lv = Liveness::new();
        let target = TargetDescription::x64_system_v();
        let flags = Flags::default();

        let mut ls = create(flags.regalloc(), &target, &lv, &flags).unwrap();
        let mut ivs = Intervals::new();
        assert_eq!(ls.allocate_registers(&mut ivs, 0), Ok(()));
        assert_eq!(ls.number_of_spill_slots(), 0);
        assert!(ls.validate(&ivs, true));

        let err = create(Strategy::GraphColor, &target, &lv, &flags)
            .err()
            .unwrap();
        assert_eq!(err, AllocError::RemovedStrategy(Strategy::GraphColor));
        assert_eq!(
            err.to_string(),
            "Graph coloring register allocator has been removed"
        );
    }
}
