//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// AArch64 target
//
// Register file with X/W and D/S sub-register aliasing, AAPCS64 calling
// convention facts, instruction definitions, instruction selection,
// constant materialization (MOV + MOVK slices), prologue/epilogue
// synthesis, and the late X-to-W sub-register renaming pass.
//

mod isel;

use crate::arch::{
    fits_signed, Abi, FrameLayout, InstrDef, OperandClass, RegClass, RegisterInfo, SelCtx,
    TargetMachine, TargetRegister,
};
use crate::lir::{
    GenericOpcode, Inst, LowLevelType, Module, Operand, OperandKind, Relation,
};

// ============================================================================
// Register Ids
// ============================================================================
//
// 0..=30  x0..x30 (x29 = fp, x30 = lr), 31 sp
// 32..=62 w0..w30
// 64..=95 d0..d31
// 96..=127 s0..s31

pub const X0: u32 = 0;
pub const X8: u32 = 8;
pub const X16: u32 = 16;
pub const X17: u32 = 17;
pub const FP: u32 = 29;
pub const LR: u32 = 30;
pub const SP: u32 = 31;
pub const W_BASE: u32 = 32;
pub const D_BASE: u32 = 64;
pub const S_BASE: u32 = 96;
pub const D16: u32 = D_BASE + 16;
pub const D17: u32 = D_BASE + 17;

#[rustfmt::skip]
const X_NAMES: [&str; 31] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11",
    "x12", "x13", "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21",
    "x22", "x23", "x24", "x25", "x26", "x27", "x28", "x29", "x30",
];

#[rustfmt::skip]
const W_NAMES: [&str; 31] = [
    "w0", "w1", "w2", "w3", "w4", "w5", "w6", "w7", "w8", "w9", "w10", "w11",
    "w12", "w13", "w14", "w15", "w16", "w17", "w18", "w19", "w20", "w21",
    "w22", "w23", "w24", "w25", "w26", "w27", "w28", "w29", "w30",
];

#[rustfmt::skip]
const D_NAMES: [&str; 32] = [
    "d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7", "d8", "d9", "d10", "d11",
    "d12", "d13", "d14", "d15", "d16", "d17", "d18", "d19", "d20", "d21",
    "d22", "d23", "d24", "d25", "d26", "d27", "d28", "d29", "d30", "d31",
];

#[rustfmt::skip]
const S_NAMES: [&str; 32] = [
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
    "s12", "s13", "s14", "s15", "s16", "s17", "s18", "s19", "s20", "s21",
    "s22", "s23", "s24", "s25", "s26", "s27", "s28", "s29", "s30", "s31",
];

fn build_register_info() -> RegisterInfo {
    let mut regs = Vec::new();

    // x0..x30 with their w aliases
    for i in 0..31u32 {
        regs.push(TargetRegister {
            id: i,
            name: X_NAMES[i as usize],
            bits: 64,
            class: RegClass::Gpr64,
            sub_regs: vec![W_BASE + i],
            callee_saved: (19..=28).contains(&i),
        });
    }
    regs.push(TargetRegister {
        id: SP,
        name: "sp",
        bits: 64,
        class: RegClass::Gpr64,
        sub_regs: vec![],
        callee_saved: false,
    });
    for i in 0..31u32 {
        regs.push(TargetRegister {
            id: W_BASE + i,
            name: W_NAMES[i as usize],
            bits: 32,
            class: RegClass::Gpr32,
            sub_regs: vec![],
            callee_saved: (19..=28).contains(&i),
        });
    }
    // d0..d31 with their s aliases; v8-v15 callee-saved per AAPCS64
    for i in 0..32u32 {
        regs.push(TargetRegister {
            id: D_BASE + i,
            name: D_NAMES[i as usize],
            bits: 64,
            class: RegClass::Fpr64,
            sub_regs: vec![S_BASE + i],
            callee_saved: (8..=15).contains(&i),
        });
        regs.push(TargetRegister {
            id: S_BASE + i,
            name: S_NAMES[i as usize],
            bits: 32,
            class: RegClass::Fpr32,
            sub_regs: vec![],
            callee_saved: (8..=15).contains(&i),
        });
    }

    RegisterInfo::new(regs)
}

fn build_abi() -> Abi {
    let mut arg_regs: Vec<u32> = (0..8).collect(); // x0..x7
    arg_regs.extend((0..8).map(|i| D_BASE + i)); // d0..d7
    let ret_regs = vec![X0, 1, D_BASE, D_BASE + 1];

    Abi {
        arg_regs,
        ret_regs,
        first_fp_arg_idx: 8,
        first_fp_ret_idx: 2,
        struct_ptr_reg: X8,
        stack_alignment: 16,
        max_struct_size_by_value: 128,
    }
}

/// Allocation order: caller-saved first, callee-saved last (the allocator
/// pops from the back). x8 (indirect result), x16/x17 (scratch), x18
/// (platform), x29/x30/sp are excluded.
fn build_alloc_order() -> (Vec<u32>, Vec<u32>) {
    let mut gpr: Vec<u32> = (0..8).collect();
    gpr.extend(9..16);
    gpr.extend(19..29);
    let mut fpr: Vec<u32> = (0..8).map(|i| D_BASE + i).collect();
    fpr.extend((18..32).map(|i| D_BASE + i)); // d16/d17 reserved for scratch
    fpr.extend((8..16).map(|i| D_BASE + i));
    (gpr, fpr)
}

// ============================================================================
// Opcodes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Op {
    AddRrr,
    AddRri,
    AndRrr,
    AndRri,
    OrrRrr,
    OrrRri,
    EorRrr,
    EorRri,
    LslRrr,
    LslRri,
    LsrRrr,
    LsrRri,
    SubRrr,
    SubRri,
    MulRrr,
    SdivRrr,
    UdivRrr,
    CmpRr,
    CmpRi,
    Cset,
    Sxtb,
    Sxth,
    Sxtw,
    Uxtb,
    Uxth,
    Uxtw,
    MovRc,
    MovRr,
    MovkRi,
    MvnRr,
    FaddRrr,
    FsubRrr,
    FmulRrr,
    FdivRrr,
    FmovRr,
    FmovRi,
    FcmpRr,
    FcmpRi,
    ScvtfRr,
    FcvtzsRr,
    Adrp,
    Ldr,
    Ldrb,
    Ldrh,
    Str,
    Strb,
    Strh,
    Beq,
    Bne,
    Bge,
    Bgt,
    Ble,
    Blt,
    Bhs,
    Bhi,
    Bls,
    Blo,
    B,
    Bl,
    Ret,
}

impl Op {
    pub fn code(self) -> u32 {
        self as u32
    }

    fn from_code(code: u32) -> Op {
        if code > Op::Ret as u32 {
            crate::ice!("aarch64", "unknown target opcode {}", code);
        }
        // Safety: repr(u32), contiguous discriminants, bound checked above
        unsafe { std::mem::transmute(code) }
    }
}

use OperandClass as OC;

fn instr_def(op: Op) -> &'static InstrDef {
    match op {
        Op::AddRrr => &InstrDef {
            mnemonic: "add",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::AddRri => &InstrDef {
            mnemonic: "add",
            operands: &[OC::Gpr64, OC::Gpr64, OC::UImm12],
            has_def: true,
        },
        Op::AndRrr => &InstrDef {
            mnemonic: "and",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::AndRri => &InstrDef {
            mnemonic: "and",
            operands: &[OC::Gpr64, OC::Gpr64, OC::SImm12],
            has_def: true,
        },
        Op::OrrRrr => &InstrDef {
            mnemonic: "orr",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::OrrRri => &InstrDef {
            mnemonic: "orr",
            operands: &[OC::Gpr64, OC::Gpr64, OC::SImm12],
            has_def: true,
        },
        Op::EorRrr => &InstrDef {
            mnemonic: "eor",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::EorRri => &InstrDef {
            mnemonic: "eor",
            operands: &[OC::Gpr64, OC::Gpr64, OC::SImm12],
            has_def: true,
        },
        Op::LslRrr => &InstrDef {
            mnemonic: "lsl",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::LslRri => &InstrDef {
            mnemonic: "lsl",
            operands: &[OC::Gpr64, OC::Gpr64, OC::UImm6],
            has_def: true,
        },
        Op::LsrRrr => &InstrDef {
            mnemonic: "lsr",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::LsrRri => &InstrDef {
            mnemonic: "lsr",
            operands: &[OC::Gpr64, OC::Gpr64, OC::UImm6],
            has_def: true,
        },
        Op::SubRrr => &InstrDef {
            mnemonic: "sub",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::SubRri => &InstrDef {
            mnemonic: "sub",
            operands: &[OC::Gpr64, OC::Gpr64, OC::UImm12],
            has_def: true,
        },
        Op::MulRrr => &InstrDef {
            mnemonic: "mul",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::SdivRrr => &InstrDef {
            mnemonic: "sdiv",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::UdivRrr => &InstrDef {
            mnemonic: "udiv",
            operands: &[OC::Gpr64, OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::CmpRr => &InstrDef {
            mnemonic: "cmp",
            operands: &[OC::Gpr64, OC::Gpr64],
            has_def: false,
        },
        Op::CmpRi => &InstrDef {
            mnemonic: "cmp",
            operands: &[OC::Gpr64, OC::SImm12],
            has_def: false,
        },
        Op::Cset => &InstrDef {
            mnemonic: "cset",
            operands: &[OC::Gpr32],
            has_def: true,
        },
        Op::Sxtb => &InstrDef {
            mnemonic: "sxtb",
            operands: &[OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Sxth => &InstrDef {
            mnemonic: "sxth",
            operands: &[OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Sxtw => &InstrDef {
            mnemonic: "sxtw",
            operands: &[OC::Gpr64, OC::Gpr32],
            has_def: true,
        },
        Op::Uxtb => &InstrDef {
            mnemonic: "uxtb",
            operands: &[OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Uxth => &InstrDef {
            mnemonic: "uxth",
            operands: &[OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Uxtw => &InstrDef {
            mnemonic: "uxtw",
            operands: &[OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::MovRc => &InstrDef {
            mnemonic: "mov",
            operands: &[OC::Gpr64, OC::UImm16],
            has_def: true,
        },
        Op::MovRr => &InstrDef {
            mnemonic: "mov",
            operands: &[OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::MovkRi => &InstrDef {
            mnemonic: "movk",
            operands: &[OC::Gpr64, OC::UImm16, OC::UImm6],
            has_def: true,
        },
        Op::MvnRr => &InstrDef {
            mnemonic: "mvn",
            operands: &[OC::Gpr64, OC::Gpr64],
            has_def: true,
        },
        Op::FaddRrr => &InstrDef {
            mnemonic: "fadd",
            operands: &[OC::Fpr64, OC::Fpr64, OC::Fpr64],
            has_def: true,
        },
        Op::FsubRrr => &InstrDef {
            mnemonic: "fsub",
            operands: &[OC::Fpr64, OC::Fpr64, OC::Fpr64],
            has_def: true,
        },
        Op::FmulRrr => &InstrDef {
            mnemonic: "fmul",
            operands: &[OC::Fpr64, OC::Fpr64, OC::Fpr64],
            has_def: true,
        },
        Op::FdivRrr => &InstrDef {
            mnemonic: "fdiv",
            operands: &[OC::Fpr64, OC::Fpr64, OC::Fpr64],
            has_def: true,
        },
        Op::FmovRr => &InstrDef {
            mnemonic: "fmov",
            operands: &[OC::Fpr64, OC::Fpr64],
            has_def: true,
        },
        Op::FmovRi => &InstrDef {
            mnemonic: "fmov",
            operands: &[OC::Fpr64, OC::UImm16],
            has_def: true,
        },
        Op::FcmpRr => &InstrDef {
            mnemonic: "fcmp",
            operands: &[OC::Fpr64, OC::Fpr64],
            has_def: false,
        },
        Op::FcmpRi => &InstrDef {
            mnemonic: "fcmp",
            operands: &[OC::Fpr64, OC::UImm16],
            has_def: false,
        },
        Op::ScvtfRr => &InstrDef {
            mnemonic: "scvtf",
            operands: &[OC::Fpr64, OC::Gpr64],
            has_def: true,
        },
        Op::FcvtzsRr => &InstrDef {
            mnemonic: "fcvtzs",
            operands: &[OC::Gpr64, OC::Fpr64],
            has_def: true,
        },
        Op::Adrp => &InstrDef {
            mnemonic: "adrp",
            operands: &[OC::Gpr64, OC::Sym],
            has_def: true,
        },
        Op::Ldr => &InstrDef {
            mnemonic: "ldr",
            operands: &[OC::Gpr64, OC::Mem],
            has_def: true,
        },
        Op::Ldrb => &InstrDef {
            mnemonic: "ldrb",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: true,
        },
        Op::Ldrh => &InstrDef {
            mnemonic: "ldrh",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: true,
        },
        Op::Str => &InstrDef {
            mnemonic: "str",
            operands: &[OC::Gpr64, OC::Mem],
            has_def: false,
        },
        Op::Strb => &InstrDef {
            mnemonic: "strb",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: false,
        },
        Op::Strh => &InstrDef {
            mnemonic: "strh",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: false,
        },
        Op::Beq => &InstrDef {
            mnemonic: "b.eq",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Bne => &InstrDef {
            mnemonic: "b.ne",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Bge => &InstrDef {
            mnemonic: "b.ge",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Bgt => &InstrDef {
            mnemonic: "b.gt",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Ble => &InstrDef {
            mnemonic: "b.le",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Blt => &InstrDef {
            mnemonic: "b.lt",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Bhs => &InstrDef {
            mnemonic: "b.hs",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Bhi => &InstrDef {
            mnemonic: "b.hi",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Bls => &InstrDef {
            mnemonic: "b.ls",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Blo => &InstrDef {
            mnemonic: "b.lo",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::B => &InstrDef {
            mnemonic: "b",
            operands: &[OC::Label],
            has_def: false,
        },
        Op::Bl => &InstrDef {
            mnemonic: "bl",
            operands: &[OC::Sym],
            has_def: false,
        },
        Op::Ret => &InstrDef {
            mnemonic: "ret",
            operands: &[],
            has_def: false,
        },
    }
}

/// AArch64 condition suffix for a compare relation.
pub fn cond_suffix(rel: Relation) -> &'static str {
    match rel {
        Relation::Eq => "eq",
        Relation::Ne => "ne",
        Relation::Lt => "lt",
        Relation::Le => "le",
        Relation::Gt => "gt",
        Relation::Ge => "ge",
        Relation::ULt => "lo",
        Relation::ULe => "ls",
        Relation::UGt => "hi",
        Relation::UGe => "hs",
        Relation::Invalid => crate::ice!("aarch64", "branch without compare relation"),
    }
}

fn branch_for(rel: Relation) -> Op {
    match rel {
        Relation::Eq => Op::Beq,
        Relation::Ne => Op::Bne,
        Relation::Lt => Op::Blt,
        Relation::Le => Op::Ble,
        Relation::Gt => Op::Bgt,
        Relation::Ge => Op::Bge,
        Relation::ULt => Op::Blo,
        Relation::ULe => Op::Bls,
        Relation::UGt => Op::Bhi,
        Relation::UGe => Op::Bhs,
        Relation::Invalid => Op::Beq,
    }
}

// ============================================================================
// Target Machine
// ============================================================================

pub struct Aarch64Target {
    reg_info: RegisterInfo,
    abi: Abi,
    alloc_gpr: Vec<u32>,
    alloc_fpr: Vec<u32>,
}

impl Aarch64Target {
    pub fn new() -> Self {
        let (alloc_gpr, alloc_fpr) = build_alloc_order();
        Aarch64Target {
            reg_info: build_register_info(),
            abi: build_abi(),
            alloc_gpr,
            alloc_fpr,
        }
    }
}

impl Default for Aarch64Target {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetMachine for Aarch64Target {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn pointer_size(&self) -> u32 {
        64
    }

    fn reg_info(&self) -> &RegisterInfo {
        &self.reg_info
    }

    fn abi(&self) -> &Abi {
        &self.abi
    }

    fn instr_def(&self, opcode: u32) -> &InstrDef {
        instr_def(Op::from_code(opcode))
    }

    fn register_class(&self, bits: u32, is_fp: bool) -> RegClass {
        match (bits, is_fp) {
            (0..=32, false) => RegClass::Gpr32,
            (_, false) => RegClass::Gpr64,
            (0..=32, true) => RegClass::Fpr32,
            (_, true) => RegClass::Fpr64,
        }
    }

    fn imm_fits(&self, op: GenericOpcode, value: i64) -> Option<bool> {
        match op {
            GenericOpcode::And
            | GenericOpcode::Or
            | GenericOpcode::Xor
            | GenericOpcode::Add
            | GenericOpcode::Sub
            | GenericOpcode::Cmp => Some(fits_signed(value, 12)),
            GenericOpcode::Lsl | GenericOpcode::Lsr => Some((0..64).contains(&value)),
            GenericOpcode::Mov => Some(fits_signed(value, 16)),
            // LOAD_IMM materializes its own constant during selection
            GenericOpcode::LoadImm => Some(true),
            GenericOpcode::MovF | GenericOpcode::CmpF => Some(true),
            _ => None,
        }
    }

    fn has_modulo(&self) -> bool {
        false
    }

    fn allocatable_regs(&self, class: RegClass) -> &[u32] {
        match class {
            RegClass::Gpr32 | RegClass::Gpr64 => &self.alloc_gpr,
            RegClass::Fpr32 | RegClass::Fpr64 => &self.alloc_fpr,
        }
    }

    fn select_instruction(&self, inst: Inst, ctx: &mut SelCtx) -> Vec<Inst> {
        isel::select(self, inst, ctx)
    }

    fn materialize_constant(&self, value: i64, dst: &Operand) -> Vec<Inst> {
        let mut seq = Vec::new();
        let raw = value as u64;

        let mut mov = Inst::target(Op::MovRc.code());
        mov.add_operand(dst.clone());
        if fits_signed(value, 16) {
            mov.add_operand(Operand::imm(value, 16));
            seq.push(mov);
            return seq;
        }
        mov.add_operand(Operand::imm((raw & 0xffff) as i64, 16));
        seq.push(mov);

        for shift in [16u32, 32, 48] {
            if shift >= dst.bits() {
                break;
            }
            let slice = (raw >> shift) & 0xffff;
            if slice == 0 {
                continue;
            }
            let mut movk = Inst::target(Op::MovkRi.code());
            movk.add_operand(dst.clone());
            movk.add_operand(Operand::imm(slice as i64, 16));
            movk.add_operand(Operand::imm(shift as i64, 6));
            seq.push(movk);
        }
        seq
    }

    fn scratch_regs(&self) -> (u32, u32) {
        (X16, X17)
    }

    fn fp_scratch_regs(&self) -> (u32, u32) {
        (D16, D17)
    }

    fn frame_reg(&self) -> u32 {
        FP
    }

    fn stack_reg(&self) -> u32 {
        SP
    }

    fn link_reg(&self) -> u32 {
        LR
    }

    fn build_prologue(&self, layout: &FrameLayout) -> Vec<Inst> {
        let mut seq = Vec::new();
        let total = layout.total_size as i64;
        if total == 0 {
            return seq;
        }
        if !fits_signed(total, 12) {
            crate::ice!("frame", "frame size {} exceeds the adjustment range", total);
        }

        let mut adjust = Inst::target(Op::SubRri.code());
        adjust.add_operand(Operand::phys_reg(SP, 64).with_llt(LowLevelType::ptr(64)));
        adjust.add_operand(Operand::phys_reg(SP, 64).with_llt(LowLevelType::ptr(64)));
        adjust.add_operand(Operand::imm(total, 12));
        seq.push(adjust);

        if layout.save_fp_lr {
            seq.push(store_reg(FP, SP, layout.total_size as i32 - 16, 64));
            seq.push(store_reg(LR, SP, layout.total_size as i32 - 8, 64));
        }
        for &(reg, offset) in &layout.callee_saves {
            let bits = self.reg_info.register_by_id(reg).bits;
            seq.push(store_reg(reg, SP, offset, bits));
        }
        if layout.save_fp_lr {
            let mut set_fp = Inst::target(Op::MovRr.code());
            set_fp.add_operand(Operand::phys_reg(FP, 64).with_llt(LowLevelType::ptr(64)));
            set_fp.add_operand(Operand::phys_reg(SP, 64).with_llt(LowLevelType::ptr(64)));
            seq.push(set_fp);
        }
        seq
    }

    fn build_epilogue(&self, layout: &FrameLayout) -> Vec<Inst> {
        let mut seq = Vec::new();
        let total = layout.total_size as i64;
        if total == 0 {
            return seq;
        }

        for &(reg, offset) in &layout.callee_saves {
            let bits = self.reg_info.register_by_id(reg).bits;
            seq.push(load_reg(reg, SP, offset, bits));
        }
        if layout.save_fp_lr {
            seq.push(load_reg(FP, SP, layout.total_size as i32 - 16, 64));
            seq.push(load_reg(LR, SP, layout.total_size as i32 - 8, 64));
        }

        let mut adjust = Inst::target(Op::AddRri.code());
        adjust.add_operand(Operand::phys_reg(SP, 64).with_llt(LowLevelType::ptr(64)));
        adjust.add_operand(Operand::phys_reg(SP, 64).with_llt(LowLevelType::ptr(64)));
        adjust.add_operand(Operand::imm(total, 12));
        seq.push(adjust);
        seq
    }

    fn build_spill_store(&self, slot: u32, reg: u32, bits: u32, _is_fp: bool) -> Inst {
        let mut inst = Inst::target(Op::Str.code());
        inst.add_flag(crate::lir::IS_STORE);
        inst.add_operand(Operand::phys_reg(reg, bits));
        inst.add_operand(Operand::stack(slot, 0));
        inst
    }

    fn build_spill_reload(&self, slot: u32, reg: u32, bits: u32, _is_fp: bool) -> Inst {
        let mut inst = Inst::target(Op::Ldr.code());
        inst.add_flag(crate::lir::IS_LOAD);
        inst.add_operand(Operand::phys_reg(reg, bits));
        inst.add_operand(Operand::stack(slot, 0));
        inst
    }

    fn build_reg_copy(&self, dst: u32, src: &Operand, bits: u32, is_fp: bool) -> Inst {
        let op = match (is_fp, src.is_int_imm()) {
            (true, _) => Op::FmovRr,
            (false, true) => Op::MovRc,
            (false, false) => Op::MovRr,
        };
        let mut inst = Inst::target(op.code());
        inst.add_operand(Operand::phys_reg(dst, bits));
        inst.add_operand(src.clone());
        inst
    }

    fn def_reads(&self, opcode: u32) -> bool {
        Op::from_code(opcode) == Op::MovkRi
    }

    /// Rename 64-bit registers used at narrow widths to their W/S aliases.
    fn post_ra_fixups(&self, module: &mut Module) {
        for func in &mut module.functions {
            for block in &mut func.blocks {
                for inst in &mut block.insts {
                    // a truncating register move narrows its source too
                    if inst.opcode.target() == Some(Op::MovRr.code())
                        && inst.operands.len() == 2
                        && !inst.operands[0].llt.is_pointer()
                        && inst.operands[0].bits() <= 32
                    {
                        inst.operands[1].llt = LowLevelType::scalar(32);
                    }
                    for opnd in &mut inst.operands {
                        if opnd.llt.is_pointer() || !opnd.llt.is_valid() {
                            continue;
                        }
                        if opnd.bits() > 32 {
                            continue;
                        }
                        if let OperandKind::PhysReg(id) = opnd.kind {
                            let reg = self.reg_info.register_by_id(id);
                            if reg.bits == 64 && !reg.sub_regs.is_empty() {
                                let sub = self.reg_info.sub_register_for_width(id, 32);
                                opnd.kind = OperandKind::PhysReg(sub);
                            }
                        }
                    }
                }
            }
        }
    }

    fn imm_prefix(&self) -> &'static str {
        "#"
    }

    fn format_mem(&self, base: &str, offset: i32) -> String {
        if offset == 0 {
            format!("[{}]", base)
        } else {
            format!("[{}, #{}]", base, offset)
        }
    }

    fn format_special(&self, inst: &Inst) -> Option<String> {
        let op = inst.opcode.target().map(Op::from_code)?;
        match op {
            Op::Cset => {
                let dst = self.operand_name(inst.operand(0)?);
                Some(format!("cset {}, {}", dst, cond_suffix(inst.relation)))
            }
            Op::MovkRi => {
                let dst = self.operand_name(inst.operand(0)?);
                let imm = inst.operand(1)?.imm_value()?;
                let shift = inst.operand(2)?.imm_value()?;
                Some(format!("movk {}, #{}, lsl #{}", dst, imm, shift))
            }
            Op::AddRri => {
                // global low-part addressing pairs with a preceding adrp
                if let Some(OperandKind::Global(sym)) = inst.operand(2).map(|o| &o.kind) {
                    let dst = self.operand_name(inst.operand(0)?);
                    let src = self.operand_name(inst.operand(1)?);
                    return Some(format!("add {}, {}, :lo12:{}", dst, src, sym));
                }
                None
            }
            Op::Ret => Some("ret".to_string()),
            _ => None,
        }
    }
}

impl Aarch64Target {
    fn operand_name(&self, op: &Operand) -> &'static str {
        match op.kind {
            OperandKind::PhysReg(id) => self.reg_info.name(id),
            _ => crate::ice!("aarch64", "expected a register operand"),
        }
    }
}

fn store_reg(reg: u32, base: u32, offset: i32, bits: u32) -> Inst {
    let mut inst = Inst::target(Op::Str.code());
    inst.add_flag(crate::lir::IS_STORE);
    inst.add_operand(Operand::phys_reg(reg, bits).with_llt(if bits == 64 {
        LowLevelType::ptr(64)
    } else {
        LowLevelType::scalar(bits)
    }));
    inst.add_operand(Operand::mem(base, offset, 64));
    inst
}

fn load_reg(reg: u32, base: u32, offset: i32, bits: u32) -> Inst {
    let mut inst = Inst::target(Op::Ldr.code());
    inst.add_flag(crate::lir::IS_LOAD);
    inst.add_operand(Operand::phys_reg(reg, bits).with_llt(if bits == 64 {
        LowLevelType::ptr(64)
    } else {
        LowLevelType::scalar(bits)
    }));
    inst.add_operand(Operand::mem(base, offset, 64));
    inst
}

// ============================================================================
// Tests
// ============================================================================
