//! Register descriptions of a target ISA.
//!
//! The allocator only needs a small slice of what a code generator knows about its target: how
//! many registers of each type there are, which of them survive a call, which of them may be
//! handed out at all, and how to print them. That slice is the `TargetRegisters` trait.
//!
//! `TargetDescription` is a table-driven implementation of the trait. Presets for the targets we
//! know about can be looked up from a `target_lexicon::Triple`.

use crate::result::{AllocError, AllocResult};
use core::fmt;
use cranelift_bitset::ScalarBitSet;
use target_lexicon::{Architecture, Triple};

/// Register numbers are indexes into a register file of one `RegisterType`.
pub type RegUnit = u8;

/// The two register files the allocator deals with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegisterType {
    /// General purpose integer registers.
    Core,
    /// Floating point and vector registers.
    Fp,
}

impl RegisterType {
    /// Both register types, core first.
    pub const ALL: [Self; 2] = [Self::Core, Self::Fp];
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Self::Core => "core",
            Self::Fp => "fp",
        })
    }
}

/// What the register allocator needs to know about the code generator's registers.
pub trait TargetRegisters {
    /// Number of core registers.
    fn num_core_registers(&self) -> usize;

    /// Number of floating point registers.
    fn num_fp_registers(&self) -> usize;

    /// Is the core register `reg` preserved across calls?
    fn is_core_callee_saved(&self, reg: RegUnit) -> bool;

    /// Is the floating point register `reg` preserved across calls?
    fn is_fp_callee_saved(&self, reg: RegUnit) -> bool;

    /// May the allocator hand out `reg`?
    ///
    /// Reserved registers like the stack pointer are never allocated, so an interval holding one
    /// must be a fixed interval.
    fn is_allocatable(&self, register_type: RegisterType, reg: RegUnit) -> bool;

    /// Write the name of `reg` to `w`.
    fn write_register(
        &self,
        w: &mut dyn fmt::Write,
        register_type: RegisterType,
        reg: RegUnit,
    ) -> fmt::Result;

    /// Number of registers of `register_type`.
    fn num_registers(&self, register_type: RegisterType) -> usize {
        match register_type {
            RegisterType::Core => self.num_core_registers(),
            RegisterType::Fp => self.num_fp_registers(),
        }
    }
}

/// A single register file described by tables.
#[derive(Clone, Debug)]
pub struct RegisterFile {
    /// Number of registers in the file.
    pub count: RegUnit,

    /// Specially named registers. This array can be shorter than `count`.
    pub names: &'static [&'static str],

    /// Name prefix to use for those registers not covered by the `names` array.
    /// The remaining registers will be named this prefix followed by their decimal number in
    /// the file. So with a prefix `x`, registers will be named `x8`, `x9`, ...
    pub prefix: &'static str,

    /// Registers preserved across calls.
    pub callee_saved: ScalarBitSet<u32>,

    /// Registers the allocator must never hand out.
    pub reserved: ScalarBitSet<u32>,
}

impl RegisterFile {
    /// A file of `count` registers named `{prefix}{n}`, all caller-saved and allocatable.
    pub fn new(count: RegUnit, prefix: &'static str) -> Self {
        debug_assert!(u32::from(count) <= u32::BITS);
        Self {
            count,
            names: &[],
            prefix,
            callee_saved: ScalarBitSet::new(),
            reserved: ScalarBitSet::new(),
        }
    }

    /// Mark `regs` as preserved across calls.
    pub fn with_callee_saved(mut self, regs: &[RegUnit]) -> Self {
        for &r in regs {
            debug_assert!(r < self.count);
            self.callee_saved.insert(r);
        }
        self
    }

    /// Mark `regs` as reserved.
    pub fn with_reserved(mut self, regs: &[RegUnit]) -> Self {
        for &r in regs {
            debug_assert!(r < self.count);
            self.reserved.insert(r);
        }
        self
    }

    /// Use `names` for the first registers of the file.
    pub fn with_names(mut self, names: &'static [&'static str]) -> Self {
        self.names = names;
        self
    }

    fn write_reg(&self, w: &mut dyn fmt::Write, reg: RegUnit) -> fmt::Result {
        match self.names.get(usize::from(reg)) {
            Some(name) => write!(w, "%{name}"),
            None => write!(w, "%{}{}", self.prefix, reg),
        }
    }
}

/// A table-driven register description.
#[derive(Clone, Debug)]
pub struct TargetDescription {
    /// Short name of the target, for diagnostics.
    pub name: &'static str,
    /// The core register file.
    pub core: RegisterFile,
    /// The floating point register file.
    pub fp: RegisterFile,
}

impl TargetDescription {
    fn file(&self, register_type: RegisterType) -> &RegisterFile {
        match register_type {
            RegisterType::Core => &self.core,
            RegisterType::Fp => &self.fp,
        }
    }

    /// x86-64 with the System V calling convention.
    ///
    /// `%rsp` and `%rbp` are reserved. No `%xmm` register survives a call.
    pub fn x64_system_v() -> Self {
        const GPRS: &[&str] = &[
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15",
        ];
        Self {
            name: "x64",
            core: RegisterFile::new(16, "r")
                .with_names(GPRS)
                .with_callee_saved(&[3, 4, 5, 12, 13, 14, 15])
                .with_reserved(&[4, 5]),
            fp: RegisterFile::new(16, "xmm"),
        }
    }

    /// AArch64 with the AAPCS64 calling convention.
    ///
    /// `x18` (platform register), `x29` (frame pointer) and `x30` (link register) are reserved.
    /// Only the low halves of `v8`-`v15` survive a call; we treat them as callee-saved.
    pub fn aarch64_aapcs() -> Self {
        Self {
            name: "aarch64",
            core: RegisterFile::new(31, "x")
                .with_callee_saved(&[19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30])
                .with_reserved(&[18, 29, 30]),
            fp: RegisterFile::new(32, "v").with_callee_saved(&[8, 9, 10, 11, 12, 13, 14, 15]),
        }
    }
}

impl TargetRegisters for TargetDescription {
    fn num_core_registers(&self) -> usize {
        usize::from(self.core.count)
    }

    fn num_fp_registers(&self) -> usize {
        usize::from(self.fp.count)
    }

    fn is_core_callee_saved(&self, reg: RegUnit) -> bool {
        self.core.callee_saved.contains(reg)
    }

    fn is_fp_callee_saved(&self, reg: RegUnit) -> bool {
        self.fp.callee_saved.contains(reg)
    }

    fn is_allocatable(&self, register_type: RegisterType, reg: RegUnit) -> bool {
        let file = self.file(register_type);
        reg < file.count && !file.reserved.contains(reg)
    }

    fn write_register(
        &self,
        w: &mut dyn fmt::Write,
        register_type: RegisterType,
        reg: RegUnit,
    ) -> fmt::Result {
        self.file(register_type).write_reg(w, reg)
    }
}

/// Look up the register description for `triple`.
pub fn lookup(triple: &Triple) -> AllocResult<TargetDescription> {
    match triple.architecture {
        Architecture::X86_64 => Ok(TargetDescription::x64_system_v()),
        Architecture::Aarch64(_) => Ok(TargetDescription::aarch64_aapcs()),
        _ => Err(AllocError::UnsupportedTarget(triple.architecture.to_string())),
    }
}
