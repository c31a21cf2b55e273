//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Target description layer
//
// Everything a backend pass may ask of a target: the register file with
// sub-register aliasing, the calling convention, instruction definitions
// with operand-class templates, and the per-target hooks (instruction
// selection, constant materialization, prologue/epilogue synthesis,
// spill code, late fix-ups).
//

pub mod aarch64;
pub mod riscv32;

use crate::lir::{GenericOpcode, Inst, Module, Operand, StackFrame};

// ============================================================================
// Register Classes
// ============================================================================

/// Target register class ids. Widths below the minimum register width map
/// onto the 32-bit classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Gpr32,
    Gpr64,
    Fpr32,
    Fpr64,
}

impl RegClass {
    pub fn id(&self) -> u32 {
        match self {
            RegClass::Gpr32 => 0,
            RegClass::Gpr64 => 1,
            RegClass::Fpr32 => 2,
            RegClass::Fpr64 => 3,
        }
    }

    pub fn from_id(id: u32) -> RegClass {
        match id {
            0 => RegClass::Gpr32,
            1 => RegClass::Gpr64,
            2 => RegClass::Fpr32,
            3 => RegClass::Fpr64,
            _ => crate::ice!("arch", "unknown register class id {}", id),
        }
    }

    pub fn is_fp(&self) -> bool {
        matches!(self, RegClass::Fpr32 | RegClass::Fpr64)
    }
}

// ============================================================================
// Register File
// ============================================================================

/// One physical register in the target description.
#[derive(Debug, Clone)]
pub struct TargetRegister {
    pub id: u32,
    pub name: &'static str,
    pub bits: u32,
    pub class: RegClass,
    /// Narrower aliases of this register (e.g. w5 under x5)
    pub sub_regs: Vec<u32>,
    pub callee_saved: bool,
}

/// Register table with id-indexed lookup.
pub struct RegisterInfo {
    regs: Vec<TargetRegister>,
}

impl RegisterInfo {
    pub fn new(regs: Vec<TargetRegister>) -> Self {
        RegisterInfo { regs }
    }

    pub fn register_by_id(&self, id: u32) -> &TargetRegister {
        self.regs
            .iter()
            .find(|r| r.id == id)
            .unwrap_or_else(|| crate::ice!("arch", "unknown register id {}", id))
    }

    /// Sub-register of `id` with the requested width, or `id` itself when
    /// it already has that width. Aborts when no alias exists.
    pub fn sub_register_for_width(&self, id: u32, bits: u32) -> u32 {
        let reg = self.register_by_id(id);
        if reg.bits == bits {
            return id;
        }
        for &sub in &reg.sub_regs {
            if self.register_by_id(sub).bits == bits {
                return sub;
            }
        }
        crate::ice!(
            "arch",
            "register {} has no {}-bit sub-register",
            reg.name,
            bits
        )
    }

    /// Widest alias of `id` (the allocation root).
    pub fn root_register(&self, id: u32) -> u32 {
        for r in &self.regs {
            if r.sub_regs.contains(&id) {
                return r.id;
            }
        }
        id
    }

    pub fn name(&self, id: u32) -> &'static str {
        self.register_by_id(id).name
    }
}

// ============================================================================
// ABI Description
// ============================================================================

/// Calling-convention facts. Argument and return register lists hold GPRs
/// first and FPRs from `first_fp_*` onward, matching how lowering indexes
/// them.
pub struct Abi {
    pub arg_regs: Vec<u32>,
    pub ret_regs: Vec<u32>,
    /// Index of the first FP register inside `arg_regs`
    pub first_fp_arg_idx: usize,
    /// Index of the first FP register inside `ret_regs`
    pub first_fp_ret_idx: usize,
    /// Register carrying the implicit struct-return pointer
    pub struct_ptr_reg: u32,
    pub stack_alignment: u32,
    /// Largest struct passed by value in registers, in bits
    pub max_struct_size_by_value: u32,
}

// ============================================================================
// Instruction Definitions
// ============================================================================

/// Operand classes used in instruction templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandClass {
    Gpr32,
    Gpr64,
    Fpr32,
    Fpr64,
    SImm12,
    UImm12,
    UImm16,
    SImm13Lsb0,
    SImm21Lsb0,
    /// Shift amount of a wide move
    UImm6,
    Mem,
    Label,
    Sym,
}

impl OperandClass {
    /// Immediate field width in bits, when this class is an immediate.
    pub fn imm_bits(&self) -> Option<u32> {
        match self {
            OperandClass::SImm12 | OperandClass::UImm12 => Some(12),
            OperandClass::UImm16 => Some(16),
            OperandClass::SImm13Lsb0 => Some(13),
            OperandClass::SImm21Lsb0 => Some(21),
            OperandClass::UImm6 => Some(6),
            _ => None,
        }
    }

    /// Register width demanded by this class, when it is a register class.
    pub fn reg_bits(&self) -> Option<u32> {
        match self {
            OperandClass::Gpr32 | OperandClass::Fpr32 => Some(32),
            OperandClass::Gpr64 | OperandClass::Fpr64 => Some(64),
            _ => None,
        }
    }
}

/// One target instruction: printable mnemonic plus operand template.
pub struct InstrDef {
    pub mnemonic: &'static str,
    pub operands: &'static [OperandClass],
    /// First operand is a definition
    pub has_def: bool,
}

// ============================================================================
// Selection / Materialization Context
// ============================================================================

/// Split borrow of the function state that selection hooks need: fresh
/// vreg allocation, stack-object sizes, and the compare/branch pairing
/// established by the legalizer.
pub struct SelCtx<'a> {
    pub next_vreg: &'a mut u32,
    pub frame: &'a StackFrame,
    /// (defined vreg, relation) of the immediately preceding CMP/CMPF
    pub prev_cmp: Option<(u32, crate::lir::Relation)>,
    /// The next instruction is a BRANCH consuming this CMP's result
    pub next_consumes_flags: bool,
}

impl SelCtx<'_> {
    pub fn new_vreg(&mut self) -> u32 {
        let v = *self.next_vreg;
        *self.next_vreg += 1;
        v
    }
}

// ============================================================================
// Frame Layout (computed by frame finalization, consumed by prologue hooks)
// ============================================================================

/// Final frame facts handed to the prologue/epilogue builders.
pub struct FrameLayout {
    /// Total frame size, padded to the target stack alignment
    pub total_size: u32,
    /// Callee-saved registers to save, with their frame-pointer offsets
    pub callee_saves: Vec<(u32, i32)>,
    /// Save the frame pointer / link register pair
    pub save_fp_lr: bool,
}

// ============================================================================
// Target Machine
// ============================================================================

/// Everything the pass pipeline asks of a concrete target.
pub trait TargetMachine {
    fn name(&self) -> &'static str;
    fn pointer_size(&self) -> u32;
    fn int_size(&self) -> u32 {
        32
    }
    fn long_size(&self) -> u32 {
        self.pointer_size()
    }

    fn reg_info(&self) -> &RegisterInfo;
    fn abi(&self) -> &Abi;
    fn instr_def(&self, opcode: u32) -> &InstrDef;

    /// Register class for a (width, is_fp) pair.
    fn register_class(&self, bits: u32, is_fp: bool) -> RegClass;

    /// Smallest width the register file can represent directly.
    fn min_reg_width(&self) -> u32 {
        32
    }

    fn is_memcpy_supported(&self) -> bool {
        true
    }

    /// Does `value` fit the immediate field of the opcode's rri form?
    /// `None` means the opcode has no immediate form at all and the
    /// legalizer must always materialize.
    fn imm_fits(&self, op: GenericOpcode, value: i64) -> Option<bool>;

    /// Physical registers the allocator may hand out for a class, ordered
    /// caller-saved first and callee-saved last (the allocator pops from
    /// the back). Reserved and scratch registers are excluded.
    fn allocatable_regs(&self, class: RegClass) -> &[u32];

    /// Does the target have a direct modulo instruction?
    fn has_modulo(&self) -> bool;

    /// Replace one generic instruction with its target-specific sequence.
    fn select_instruction(&self, inst: Inst, ctx: &mut SelCtx) -> Vec<Inst>;

    /// Build the instruction sequence loading `value` into `dst`
    /// (insert-before mode: the caller supplies the destination operand).
    fn materialize_constant(&self, value: i64, dst: &Operand) -> Vec<Inst>;

    /// Reserved scratch registers used when rewriting spilled operands.
    fn scratch_regs(&self) -> (u32, u32);
    fn fp_scratch_regs(&self) -> (u32, u32);

    fn frame_reg(&self) -> u32;
    fn stack_reg(&self) -> u32;
    fn link_reg(&self) -> u32;

    fn build_prologue(&self, layout: &FrameLayout) -> Vec<Inst>;
    fn build_epilogue(&self, layout: &FrameLayout) -> Vec<Inst>;

    /// Store `reg` to a stack slot (spill) / reload it back.
    fn build_spill_store(&self, slot: u32, reg: u32, bits: u32, is_fp: bool) -> Inst;
    fn build_spill_reload(&self, slot: u32, reg: u32, bits: u32, is_fp: bool) -> Inst;

    /// Physical register copy used when a value feeding a return could not
    /// be allocated to the return register.
    fn build_reg_copy(&self, dst: u32, src: &Operand, bits: u32, is_fp: bool) -> Inst;

    /// Does this target opcode read its definition operand (read-modify-
    /// write, like MOVK)? Spill rewriting reloads such definitions first.
    fn def_reads(&self, _opcode: u32) -> bool {
        false
    }

    /// Late target-specific rewrites after frame finalization (e.g. X→W
    /// sub-register renaming on AArch64).
    fn post_ra_fixups(&self, _module: &mut Module) {}

    /// Immediate prefix in assembly syntax ("#" on AArch64, "" on RISC-V).
    fn imm_prefix(&self) -> &'static str;

    /// Memory operand syntax.
    fn format_mem(&self, base: &str, offset: i32) -> String;

    /// Opcode-specific assembly overrides; `None` falls back to the generic
    /// mnemonic + operand formatting in the emitter.
    fn format_special(&self, _inst: &Inst) -> Option<String> {
        None
    }
}

/// Instantiate a target by name ("aarch64" or "riscv32").
pub fn create_target(name: &str) -> Option<Box<dyn TargetMachine>> {
    match name {
        "aarch64" => Some(Box::new(aarch64::Aarch64Target::new())),
        "riscv32" => Some(Box::new(riscv32::Riscv32Target::new())),
        _ => None,
    }
}

/// Does `value` fit a signed immediate field of `bits` width?
pub fn fits_signed(value: i64, bits: u32) -> bool {
    if bits >= 64 {
        return true;
    }
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    value >= min && value <= max
}

/// Does `value` fit an unsigned immediate field of `bits` width?
pub fn fits_unsigned(value: i64, bits: u32) -> bool {
    if bits >= 64 {
        return value >= 0;
    }
    value >= 0 && value < (1i64 << bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imm_range_checks() {
        assert!(fits_signed(2047, 12));
        assert!(fits_signed(-2048, 12));
        assert!(!fits_signed(2048, 12));
        assert!(fits_unsigned(4095, 12));
        assert!(!fits_unsigned(-1, 12));
        assert!(!fits_unsigned(4096, 12));
        assert!(fits_signed(i64::MIN, 64));
    }

    #[test]
    fn class_ids_round_trip() {
        for class in [
            RegClass::Gpr32,
            RegClass::Gpr64,
            RegClass::Fpr32,
            RegClass::Fpr64,
        ] {
            assert_eq!(RegClass::from_id(class.id()), class);
        }
    }

    #[test]
    fn create_known_targets() {
        assert!(create_target("aarch64").is_some());
        assert!(create_target("riscv32").is_some());
        assert!(create_target("x86_64").is_none());
    }
}
