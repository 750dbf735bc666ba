//! The liveness analysis as seen by the register allocator.
//!
//! The allocator consumes the result of liveness analysis read-only. It needs to map linear
//! positions back to instructions and blocks, and to walk the dominator tree and the loop nest of
//! the blocks in linear order. Those queries are described by the `LivenessInfo` trait.
//!
//! # Positions
//!
//! The liveness analysis numbers every instruction in linear order. Live ranges use *lifetime
//! positions* which are twice that number, so that every instruction has an even position for
//! reading its inputs and an odd position for writing its outputs. Queries on `LivenessInfo` take
//! the instruction index, i.e. a lifetime position divided by two.
//!
//! Not every index corresponds to an instruction. The analysis reserves indexes for synthetic
//! program points, such as the environment of a deoptimization point, which block registers
//! without being an instruction.
//!
//! `Liveness` is a concrete implementation which is built incrementally in linear order. It is
//! what the tests use, and it is good enough for embedders that compute dominators and loops with
//! their own analyses.

use crate::entity::{EntityRef, PrimaryMap};
use crate::ir::{Block, Inst, InstKind, Loop};
use crate::packed_option::PackedOption;
use alloc::vec::Vec;

/// Read-only queries the register allocator makes against the liveness analysis.
pub trait LivenessInfo {
    /// The instruction at instruction index `index`, or `None` for a synthetic position.
    fn instruction_from_position(&self, index: u32) -> Option<Inst>;

    /// The block containing instruction index `index`.
    fn block_from_position(&self, index: u32) -> Option<Block>;

    /// The first lifetime position of `block`.
    fn lifetime_start(&self, block: Block) -> u32;

    /// The lifetime position just past the end of `block`.
    fn lifetime_end(&self, block: Block) -> u32;

    /// The immediate dominator of `block`, or `None` for the entry block.
    fn dominator(&self, block: Block) -> Option<Block>;

    /// The blocks immediately dominated by `block`. The order is not the linear order.
    fn dominated_blocks(&self, block: Block) -> &[Block];

    /// Iterate over the headers of the loops containing `block`, innermost loop first.
    fn loop_headers(&self, block: Block) -> impl Iterator<Item = Block> + '_;

    /// What kind of instruction `inst` is.
    fn inst_kind(&self, inst: Inst) -> InstKind;
}

#[derive(Clone, Default)]
struct BlockData {
    lifetime_start: u32,
    lifetime_end: u32,
    dominator: PackedOption<Block>,
    dominated: Vec<Block>,
    innermost_loop: PackedOption<Loop>,
}

struct LoopData {
    header: Block,
    parent: PackedOption<Loop>,
}

#[derive(Clone, Copy)]
struct PositionData {
    block: Block,
    inst: PackedOption<Inst>,
}

/// Liveness information for one function, laid out in linear order.
pub struct Liveness {
    blocks: PrimaryMap<Block, BlockData>,
    loops: PrimaryMap<Loop, LoopData>,
    insts: PrimaryMap<Inst, InstKind>,
    positions: Vec<PositionData>,
}

impl Liveness {
    /// Create a new empty analysis.
    pub fn new() -> Self {
        Self {
            blocks: PrimaryMap::new(),
            loops: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            positions: Vec::new(),
        }
    }

    /// Append a new, empty block at the end of the linear order.
    pub fn make_block(&mut self) -> Block {
        let pos = self.next_lifetime_position();
        self.blocks.push(BlockData {
            lifetime_start: pos,
            lifetime_end: pos,
            ..BlockData::default()
        })
    }

    fn next_lifetime_position(&self) -> u32 {
        u32::try_from(self.positions.len() * 2).expect("too many positions")
    }

    fn push_position(&mut self, block: Block, inst: PackedOption<Inst>) -> u32 {
        debug_assert_eq!(
            block.index() + 1,
            self.blocks.len(),
            "{block} is not the last block in linear order"
        );
        let pos = self.next_lifetime_position();
        self.positions.push(PositionData { block, inst });
        self.blocks[block].lifetime_end = pos + 2;
        pos
    }

    /// Append an instruction of `kind` to `block`, which must be the last block.
    ///
    /// Returns the instruction and its lifetime position.
    pub fn append_inst(&mut self, block: Block, kind: InstKind) -> (Inst, u32) {
        let inst = self.insts.push(kind);
        let pos = self.push_position(block, inst.into());
        (inst, pos)
    }

    /// Append a synthetic program point with no instruction to `block`.
    ///
    /// Returns its lifetime position.
    pub fn append_synthetic(&mut self, block: Block) -> u32 {
        self.push_position(block, None.into())
    }

    /// Record that `idom` is the immediate dominator of `block`.
    pub fn set_dominator(&mut self, block: Block, idom: Block) {
        debug_assert!(self.blocks[block].dominator.is_none());
        self.blocks[block].dominator = idom.into();
        self.blocks[idom].dominated.push(block);
    }

    /// Create a loop with `header`, nested in `parent`.
    ///
    /// The header becomes a member of the new loop.
    pub fn make_loop(&mut self, header: Block, parent: Option<Loop>) -> Loop {
        let lp = self.loops.push(LoopData {
            header,
            parent: parent.into(),
        });
        self.blocks[header].innermost_loop = lp.into();
        lp
    }

    /// Make `lp` the innermost loop containing `block`.
    pub fn set_loop(&mut self, block: Block, lp: Loop) {
        self.blocks[block].innermost_loop = lp.into();
    }

    /// The header block of `lp`.
    pub fn loop_header(&self, lp: Loop) -> Block {
        self.loops[lp].header
    }

    /// Number of instruction indexes, synthetic ones included.
    pub fn num_positions(&self) -> usize {
        self.positions.len()
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessInfo for Liveness {
    fn instruction_from_position(&self, index: u32) -> Option<Inst> {
        self.positions
            .get(index as usize)
            .and_then(|p| p.inst.expand())
    }

    fn block_from_position(&self, index: u32) -> Option<Block> {
        self.positions.get(index as usize).map(|p| p.block)
    }

    fn lifetime_start(&self, block: Block) -> u32 {
        self.blocks[block].lifetime_start
    }

    fn lifetime_end(&self, block: Block) -> u32 {
        self.blocks[block].lifetime_end
    }

    fn dominator(&self, block: Block) -> Option<Block> {
        self.blocks[block].dominator.expand()
    }

    fn dominated_blocks(&self, block: Block) -> &[Block] {
        &self.blocks[block].dominated
    }

    fn loop_headers(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        let mut next = self.blocks[block].innermost_loop.expand();
        core::iter::from_fn(move || {
            let lp = next?;
            next = self.loops[lp].parent.expand();
            Some(self.loops[lp].header)
        })
    }

    fn inst_kind(&self, inst: Inst) -> InstKind {
        self.insts[inst]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn linear_positions() {
        let mut lv = Liveness::new();
        let b0 = lv.make_block();
        let (i0, p0) = lv.append_inst(b0, InstKind::ParameterValue);
        let p1 = lv.append_synthetic(b0);
        let b1 = lv.make_block();
        let (i1, p2) = lv.append_inst(b1, InstKind::Call);

        assert_eq!((p0, p1, p2), (0, 2, 4));
        assert_eq!(lv.num_positions(), 3);
        assert_eq!(lv.instruction_from_position(0), Some(i0));
        assert_eq!(lv.instruction_from_position(1), None);
        assert_eq!(lv.instruction_from_position(2), Some(i1));
        assert_eq!(lv.instruction_from_position(3), None);
        assert_eq!(lv.block_from_position(1), Some(b0));
        assert_eq!(lv.block_from_position(2), Some(b1));
        assert_eq!(lv.lifetime_start(b0), 0);
        assert_eq!(lv.lifetime_end(b0), 4);
        assert_eq!(lv.lifetime_start(b1), 4);
        assert_eq!(lv.lifetime_end(b1), 6);
        assert_eq!(lv.inst_kind(i1), InstKind::Call);
    }

    #[test]
    fn dominators_and_loops() {
        let mut lv = Liveness::new();
        let blocks: Vec<Block> = (0..4)
            .map(|_| {
                let b = lv.make_block();
                lv.append_inst(b, InstKind::Other);
                b
            })
            .collect();
        lv.set_dominator(blocks[1], blocks[0]);
        lv.set_dominator(blocks[2], blocks[1]);
        lv.set_dominator(blocks[3], blocks[1]);
        assert_eq!(lv.dominator(blocks[0]), None);
        assert_eq!(lv.dominated_blocks(blocks[1]), &[blocks[2], blocks[3]]);

        let outer = lv.make_loop(blocks[1], None);
        let inner = lv.make_loop(blocks[2], Some(outer));
        lv.set_loop(blocks[3], inner);
        assert_eq!(
            lv.loop_headers(blocks[3]).collect::<Vec<_>>(),
            vec![blocks[2], blocks[1]]
        );
        assert_eq!(lv.loop_headers(blocks[0]).count(), 0);
        assert_eq!(lv.loop_header(inner), blocks[2]);
    }
}
