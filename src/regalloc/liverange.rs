//! Live intervals of values and synthetic register constraints.
//!
//! A *live interval* describes where a value needs to be kept during the execution of a function.
//! It is a sorted sequence of disjoint half-open *live ranges* `[start, end)` of lifetime
//! positions. The gaps between ranges are *lifetime holes*: the value is not needed there, for
//! example across a loop body that doesn't use it.
//!
//! # Interval groups
//!
//! When the register allocator decides that a value changes location at some position, it
//! *splits* the interval. The original interval keeps the part before the split position and a new
//! *sibling* covers the rest. All intervals produced from one original interval form a group:
//!
//! - they share the same *parent*, which is the original interval;
//! - they are linked in a sibling chain sorted by start position;
//! - they never overlap.
//!
//! The parent carries the state of the whole group: the defining instruction and the spill slot.
//! A spill slot belongs to the group, so every sibling occupies it for the duration of its ranges
//! once the group has one.
//!
//! # Register pairs
//!
//! Values which need two registers (a 64-bit integer on a 32-bit target, say) are represented by
//! two interval groups with identical ranges: the *low* half and the *high* half. Each half links
//! to the other one and splitting must keep the two in sync, see `RegisterAllocator::split`.
//!
//! # Fixed intervals
//!
//! Fixed intervals don't describe a value. They reserve registers at specific positions, either a
//! single physical register when it has one, or a set of registers determined by the position of
//! their first range (all caller-saved registers at a call, every register at a synthetic point).
//! Fixed intervals are never split.
//!
//! # Ownership
//!
//! All intervals of one allocation pass live in an `Intervals` arena and are referenced by the
//! `Interval` entity. The arena also records which interval describes the value defined by each
//! instruction. Nothing outside the arena refers to its intervals, so dropping the arena at the
//! end of the pass leaves no dangling links behind.

use crate::entity::{PrimaryMap, SecondaryMap, entity_impl};
use crate::ir::{Inst, ValueType};
use crate::isa::{RegUnit, RegisterType};
use crate::packed_option::PackedOption;
use core::cmp;
use core::fmt;
use smallvec::SmallVec;

/// A half-open interval `[start, end)` of lifetime positions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LiveRange {
    /// First position covered by the range.
    pub start: u32,
    /// First position after the range.
    pub end: u32,
}

impl LiveRange {
    /// Create the range `[start, end)`.
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start < end, "empty live range [{start},{end})");
        Self { start, end }
    }

    /// Is `position` inside this range?
    pub fn covers(self, position: u32) -> bool {
        self.start <= position && position < self.end
    }

    /// Do the two ranges share at least one position?
    pub fn intersects(self, other: Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for LiveRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// An opaque reference to a live interval in an `Intervals` arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval(u32);
entity_impl!(Interval, "iv");

type RangeList = SmallVec<[LiveRange; 4]>;
type UseList = SmallVec<[u32; 4]>;

/// The data of a single interval.
#[derive(Clone)]
struct IntervalData {
    /// Sorted, disjoint, non-adjacent ranges. Only the ranges of this interval, not of its
    /// later siblings.
    ranges: RangeList,

    /// Sorted positions where the value is used.
    uses: UseList,

    ty: ValueType,

    /// The first interval of the group. An interval that has not been split is its own parent.
    parent: Interval,

    next_sibling: PackedOption<Interval>,

    /// Set on the high half of a register pair.
    low: PackedOption<Interval>,

    /// Set on the low half of a register pair.
    high: PackedOption<Interval>,

    register: Option<RegUnit>,
    fixed: bool,

    /// Only meaningful on the parent.
    defined_by: PackedOption<Inst>,

    /// Only meaningful on the parent.
    spill_slot: Option<u32>,

    /// The interval is assigned the same register as one of the inputs of its definition.
    using_input_register: bool,

    /// That input dies at the definition, so sharing its register is allowed.
    can_use_input_register: bool,
}

impl IntervalData {
    fn new(parent: Interval, ty: ValueType) -> Self {
        Self {
            ranges: RangeList::new(),
            uses: UseList::new(),
            ty,
            parent,
            next_sibling: None.into(),
            low: None.into(),
            high: None.into(),
            register: None,
            fixed: false,
            defined_by: None.into(),
            spill_slot: None,
            using_input_register: false,
            can_use_input_register: false,
        }
    }
}

/// Arena of all live intervals of one allocation pass.
pub struct Intervals {
    data: PrimaryMap<Interval, IntervalData>,
    by_inst: SecondaryMap<Inst, PackedOption<Interval>>,
}

impl Intervals {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            data: PrimaryMap::new(),
            by_inst: SecondaryMap::new(),
        }
    }

    /// Total number of intervals, siblings included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Is the arena empty?
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over the parents of all interval groups in creation order.
    pub fn groups(&self) -> impl Iterator<Item = Interval> + '_ {
        self.data
            .iter()
            .filter(|&(iv, data)| data.parent == iv)
            .map(|(iv, _)| iv)
    }

    /// Iterate over the parents of the groups competing for registers of `register_type`.
    ///
    /// Fixed `Void` intervals block registers of both types and are included for both.
    pub fn groups_of_type(
        &self,
        register_type: RegisterType,
    ) -> impl Iterator<Item = Interval> + '_ {
        self.groups().filter(move |&iv| {
            (self.is_fixed(iv) && self.ty(iv) == ValueType::Void)
                || self.register_type(iv) == register_type
        })
    }

    fn push(&mut self, ty: ValueType) -> Interval {
        let iv = self.data.next_key();
        self.data.push(IntervalData::new(iv, ty))
    }

    /// Create an empty interval for a value of type `ty` defined by `defined_by`.
    ///
    /// The interval becomes the one returned by `defined_by(inst)`.
    pub fn make_interval(&mut self, ty: ValueType, defined_by: Option<Inst>) -> Interval {
        let iv = self.push(ty);
        if let Some(inst) = defined_by {
            self.data[iv].defined_by = inst.into();
            self.by_inst[inst] = iv.into();
        }
        iv
    }

    /// Create an empty fixed interval.
    ///
    /// With a register, the interval pins that physical register and `ty` must match the
    /// register's type. Without one, `ty` must be `Void` and the blocked registers are derived
    /// from the position of the interval's first range.
    pub fn make_fixed(&mut self, register: Option<RegUnit>, ty: ValueType) -> Interval {
        debug_assert_eq!(register.is_none(), ty == ValueType::Void);
        let iv = self.push(ty);
        let data = &mut self.data[iv];
        data.fixed = true;
        data.register = register;
        iv
    }

    /// Create the high half of the register pair whose low half is `low`.
    ///
    /// The high half starts as a copy of `low`'s ranges and uses and forms its own group.
    pub fn add_high_interval(&mut self, low: Interval) -> Interval {
        debug_assert!(self.data[low].high.is_none() && self.data[low].low.is_none());
        debug_assert!(!self.data[low].fixed);
        let high = self.push(self.data[low].ty);
        let (ranges, uses, defined_by) = {
            let l = &self.data[low];
            (l.ranges.clone(), l.uses.clone(), l.defined_by)
        };
        let h = &mut self.data[high];
        h.ranges = ranges;
        h.uses = uses;
        h.defined_by = defined_by;
        h.low = low.into();
        self.data[low].high = high.into();
        high
    }

    /// The interval describing the value defined by `inst`, if any.
    pub fn defined_by_inst(&self, inst: Inst) -> Option<Interval> {
        self.by_inst[inst].expand()
    }

    /// Add the positions `[start, end)` to `iv`, merging with overlapping or adjacent ranges.
    pub fn add_range(&mut self, iv: Interval, start: u32, end: u32) {
        let new = LiveRange::new(start, end);
        let ranges = &mut self.data[iv].ranges;
        let first = ranges.partition_point(|r| r.end < start);
        let last = ranges.partition_point(|r| r.start <= end);
        if first == last {
            ranges.insert(first, new);
        } else {
            let merged = LiveRange::new(
                cmp::min(start, ranges[first].start),
                cmp::max(end, ranges[last - 1].end),
            );
            ranges[first] = merged;
            ranges.drain(first + 1..last);
        }
    }

    /// Record a use of `iv`'s value at `position`.
    pub fn add_use(&mut self, iv: Interval, position: u32) {
        let uses = &mut self.data[iv].uses;
        let at = uses.partition_point(|&u| u < position);
        uses.insert(at, position);
    }

    /// The ranges of `iv`, excluding its later siblings.
    pub fn ranges(&self, iv: Interval) -> &[LiveRange] {
        &self.data[iv].ranges
    }

    /// The use positions of `iv`, excluding its later siblings.
    pub fn uses(&self, iv: Interval) -> &[u32] {
        &self.data[iv].uses
    }

    /// First position of `iv`.
    pub fn start(&self, iv: Interval) -> u32 {
        self.data[iv].ranges.first().map_or(0, |r| r.start)
    }

    /// First position after the last range of `iv`.
    pub fn end(&self, iv: Interval) -> u32 {
        self.data[iv].ranges.last().map_or(0, |r| r.end)
    }

    /// Is `iv` live at `position`?
    pub fn covers(&self, iv: Interval, position: u32) -> bool {
        let ranges = &self.data[iv].ranges;
        let i = ranges.partition_point(|r| r.end <= position);
        ranges.get(i).map_or(false, |r| r.covers(position))
    }

    /// Is `iv` dead at and after `position`?
    pub fn is_dead_at(&self, iv: Interval, position: u32) -> bool {
        position >= self.end(iv)
    }

    /// The first position where `a` and `b` are both live.
    pub fn first_intersection(&self, a: Interval, b: Interval) -> Option<u32> {
        let (ra, rb) = (&self.data[a].ranges, &self.data[b].ranges);
        let (mut i, mut j) = (0, 0);
        while i < ra.len() && j < rb.len() {
            let (x, y) = (ra[i], rb[j]);
            if x.intersects(y) {
                return Some(cmp::max(x.start, y.start));
            }
            if x.end <= y.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        None
    }

    /// The value type of `iv`.
    pub fn ty(&self, iv: Interval) -> ValueType {
        self.data[iv].ty
    }

    /// The register file values of `iv` are allocated from.
    ///
    /// Fixed `Void` intervals constrain both files; they report `Core`.
    pub fn register_type(&self, iv: Interval) -> RegisterType {
        if self.data[iv].ty.is_floating_point() {
            RegisterType::Fp
        } else {
            RegisterType::Core
        }
    }

    /// The parent of `iv`'s group.
    pub fn parent(&self, iv: Interval) -> Interval {
        self.data[iv].parent
    }

    /// The next sibling of `iv` in its group.
    pub fn next_sibling(&self, iv: Interval) -> Option<Interval> {
        self.data[iv].next_sibling.expand()
    }

    /// Iterate over `iv` and its later siblings.
    pub fn siblings(&self, iv: Interval) -> impl Iterator<Item = Interval> + '_ {
        let mut next = Some(iv);
        core::iter::from_fn(move || {
            let cur = next?;
            next = self.next_sibling(cur);
            Some(cur)
        })
    }

    /// Iterate over every range of `iv` and its later siblings, with the interval owning it.
    pub fn all_ranges(&self, iv: Interval) -> impl Iterator<Item = (Interval, LiveRange)> + '_ {
        self.siblings(iv)
            .flat_map(move |s| self.data[s].ranges.iter().map(move |&r| (s, r)))
    }

    /// The low half of the pair when `iv` is a high half.
    pub fn low(&self, iv: Interval) -> Option<Interval> {
        self.data[iv].low.expand()
    }

    /// The high half of the pair when `iv` is a low half.
    pub fn high(&self, iv: Interval) -> Option<Interval> {
        self.data[iv].high.expand()
    }

    /// Link `low` and `high` as the two halves of a register pair.
    pub fn set_pair(&mut self, low: Interval, high: Interval) {
        self.data[low].high = high.into();
        self.data[high].low = low.into();
    }

    /// The register assigned to `iv`, if any.
    pub fn register(&self, iv: Interval) -> Option<RegUnit> {
        self.data[iv].register
    }

    /// Assign `reg` to `iv`.
    pub fn set_register(&mut self, iv: Interval, reg: RegUnit) {
        debug_assert!(!self.data[iv].fixed, "can't reassign fixed {iv}");
        self.data[iv].register = Some(reg);
    }

    /// Forget the register assigned to `iv`.
    pub fn clear_register(&mut self, iv: Interval) {
        debug_assert!(!self.data[iv].fixed, "can't clear fixed {iv}");
        self.data[iv].register = None;
    }

    /// Is `iv` a fixed interval?
    pub fn is_fixed(&self, iv: Interval) -> bool {
        self.data[iv].fixed
    }

    /// The instruction defining the value of `iv`'s group.
    pub fn defined_by(&self, iv: Interval) -> Option<Inst> {
        self.data[self.parent(iv)].defined_by.expand()
    }

    /// The spill slot of `iv`'s group.
    pub fn spill_slot(&self, iv: Interval) -> Option<u32> {
        self.data[self.parent(iv)].spill_slot
    }

    /// Assign `slot` to `iv`'s group.
    pub fn set_spill_slot(&mut self, iv: Interval, slot: u32) {
        let parent = self.parent(iv);
        self.data[parent].spill_slot = Some(slot);
    }

    /// Is `iv` assigned the register of one of the inputs of its definition?
    pub fn is_using_input_register(&self, iv: Interval) -> bool {
        self.data[iv].using_input_register
    }

    /// May `iv` share the register of one of the inputs of its definition?
    pub fn can_use_input_register(&self, iv: Interval) -> bool {
        self.data[iv].can_use_input_register
    }

    /// Record whether `iv` reuses the register of an input (`using`) and whether that input dies
    /// at the definition so the reuse is legal (`allowed`).
    pub fn set_input_register_reuse(&mut self, iv: Interval, using: bool, allowed: bool) {
        let data = &mut self.data[iv];
        data.using_input_register = using;
        data.can_use_input_register = allowed;
    }

    /// Split `iv` at `position`, returning the new sibling covering `position` and later.
    ///
    /// The ranges and uses of `iv` at or after `position` move to the new sibling, which is
    /// linked into the chain right after `iv`. When `position` falls in a lifetime hole, the
    /// sibling starts at the next range. Register pairs are not handled here.
    pub fn split_at(&mut self, iv: Interval, position: u32) -> Interval {
        debug_assert!(!self.data[iv].fixed, "can't split fixed {iv}");
        debug_assert!(position > self.start(iv), "{iv} split at its start {position}");
        debug_assert!(!self.is_dead_at(iv, position), "{iv} is dead at {position}");

        let data = &mut self.data[iv];
        let idx = data.ranges.partition_point(|r| r.end <= position);
        let mut tail: RangeList = data.ranges.drain(idx..).collect();
        if let Some(first) = tail.first_mut() {
            if first.start < position {
                data.ranges.push(LiveRange::new(first.start, position));
                first.start = position;
            }
        }
        let at = data.uses.partition_point(|&u| u < position);
        let tail_uses: UseList = data.uses.drain(at..).collect();

        let (parent, ty, next) = (data.parent, data.ty, data.next_sibling);
        let sibling = self.push(ty);
        let s = &mut self.data[sibling];
        s.parent = parent;
        s.ranges = tail;
        s.uses = tail_uses;
        s.next_sibling = next;
        self.data[iv].next_sibling = sibling.into();
        log::trace!(
            "split {iv} at {position}: {} / {}",
            self.display(iv),
            self.display(sibling)
        );
        sibling
    }

    /// Return an object that can display `iv`.
    pub fn display(&self, iv: Interval) -> DisplayInterval<'_> {
        DisplayInterval(self, iv)
    }
}

impl Default for Intervals {
    fn default() -> Self {
        Self::new()
    }
}

/// Displaying an interval requires the arena it lives in.
pub struct DisplayInterval<'a>(&'a Intervals, Interval);

impl fmt::Display for DisplayInterval<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Self(intervals, iv) = *self;
        let data = &intervals.data[iv];
        write!(f, "{iv}: ranges: {{")?;
        for r in &data.ranges {
            write!(f, " {r}")?;
        }
        write!(f, " }}, uses: {{")?;
        for u in &data.uses {
            write!(f, " {u}")?;
        }
        write!(f, " }}, {}", data.ty)?;
        if data.fixed {
            write!(f, ", fixed")?;
        }
        if let Some(reg) = data.register {
            write!(f, ", reg: {reg}")?;
        }
        if let Some(slot) = intervals.spill_slot(iv) {
            write!(f, ", spill slot: {slot}")?;
        }
        if data.parent != iv {
            write!(f, ", parent: {}", data.parent)?;
        }
        if let Some(low) = data.low.expand() {
            write!(f, ", low: {low}")?;
        }
        if let Some(high) = data.high.expand() {
            write!(f, ", high: {high}")?;
        }
        Ok(())
    }
}
