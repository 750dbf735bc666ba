//! Entity references and small value descriptions shared by the liveness analysis and the
//! register allocator.
//!
//! The allocator never looks inside instructions. All it needs to know about the program is which
//! linear positions carry an instruction, what kind of instruction that is, and how positions are
//! grouped into blocks and loops.

use crate::entity::entity_impl;
use core::fmt;

/// An opaque reference to a basic block in the linear order.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to an instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to a loop in the loop nest.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loop(u32);
entity_impl!(Loop, "loop");

/// What an instruction is, as far as register allocation is concerned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InstKind {
    /// An incoming function parameter. Parameters own a dedicated stack slot in the caller's
    /// frame and are never checked against the general spill slots.
    ParameterValue,
    /// The current method pointer, which also lives in a dedicated stack slot.
    CurrentMethod,
    /// A call. Fixed intervals blocking registers at a call position use the call-clobber mask.
    Call,
    /// Anything else.
    Other,
}

impl InstKind {
    /// Does a value defined by this instruction live in a dedicated, pre-assigned stack slot?
    pub fn has_dedicated_slot(self) -> bool {
        matches!(self, Self::ParameterValue | Self::CurrentMethod)
    }
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Self::ParameterValue => "ParameterValue",
            Self::CurrentMethod => "CurrentMethod",
            Self::Call => "Call",
            Self::Other => "Other",
        })
    }
}

/// The type of the value described by a live interval.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// No value. Used by synthetic fixed intervals.
    Void,
    /// A boolean.
    Bool,
    /// A 32-bit integer.
    I32,
    /// A 64-bit integer. May be split into a low/high register pair on 32-bit targets.
    I64,
    /// A managed reference.
    Reference,
    /// A single precision float.
    F32,
    /// A double precision float. May occupy a register pair on some targets.
    F64,
}

impl ValueType {
    /// Is this a floating point type?
    pub fn is_floating_point(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Reference => "ref",
            Self::F32 => "f32",
            Self::F64 => "f64",
        })
    }
}
