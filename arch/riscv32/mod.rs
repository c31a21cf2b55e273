//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// RISC-V 32-bit target (RV32IM + F)
//
// Flat 32-bit register file without sub-registers, ILP32 calling
// convention, boolean compare networks (slt/sltu/seqz/snez) instead of a
// flag register, and assembler pseudo-instructions (li/la/mv/call) for
// constants, globals and calls.
//

mod isel;

use crate::arch::{
    fits_signed, Abi, FrameLayout, InstrDef, OperandClass, RegClass, RegisterInfo, SelCtx,
    TargetMachine, TargetRegister,
};
use crate::lir::{GenericOpcode, Inst, LowLevelType, Operand};

// ============================================================================
// Register Ids (0..=31 x-registers by ABI name, 32..=63 f-registers)
// ============================================================================

pub const ZERO: u32 = 0;
pub const RA: u32 = 1;
pub const SP: u32 = 2;
pub const S0: u32 = 8; // frame pointer
pub const A0: u32 = 10;
pub const T5: u32 = 30;
pub const T6: u32 = 31;
pub const F_BASE: u32 = 32;
pub const FA0: u32 = F_BASE + 10;
pub const FT10: u32 = F_BASE + 30;
pub const FT11: u32 = F_BASE + 31;

#[rustfmt::skip]
const X_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1",
    "a2", "a3", "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
    "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

#[rustfmt::skip]
const F_NAMES: [&str; 32] = [
    "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "fs0", "fs1",
    "fa0", "fa1", "fa2", "fa3", "fa4", "fa5", "fa6", "fa7", "fs2", "fs3",
    "fs4", "fs5", "fs6", "fs7", "fs8", "fs9", "fs10", "fs11", "ft8", "ft9",
    "ft10", "ft11",
];

fn build_register_info() -> RegisterInfo {
    let mut regs = Vec::new();
    for i in 0..32u32 {
        regs.push(TargetRegister {
            id: i,
            name: X_NAMES[i as usize],
            bits: 32,
            class: RegClass::Gpr32,
            sub_regs: vec![],
            // s0..s11: x8, x9, x18..x27
            callee_saved: i == 8 || i == 9 || (18..=27).contains(&i),
        });
    }
    for i in 0..32u32 {
        regs.push(TargetRegister {
            id: F_BASE + i,
            name: F_NAMES[i as usize],
            bits: 32,
            class: RegClass::Fpr32,
            sub_regs: vec![],
            // fs0..fs11: f8, f9, f18..f27
            callee_saved: i == 8 || i == 9 || (18..=27).contains(&i),
        });
    }
    RegisterInfo::new(regs)
}

fn build_abi() -> Abi {
    let mut arg_regs: Vec<u32> = (10..18).collect(); // a0..a7
    arg_regs.extend((10..18).map(|i| F_BASE + i)); // fa0..fa7
    let ret_regs = vec![A0, A0 + 1, FA0, FA0 + 1];

    Abi {
        arg_regs,
        ret_regs,
        first_fp_arg_idx: 8,
        first_fp_ret_idx: 2,
        struct_ptr_reg: A0,
        stack_alignment: 16,
        max_struct_size_by_value: 64,
    }
}

/// Caller-saved first, callee-saved last; t5/t6 are reserved as spill
/// scratch, s0 is the frame pointer. FP allocation stays within the
/// caller-saved file so the word-sized prologue never saves an FPR.
fn build_alloc_order() -> (Vec<u32>, Vec<u32>) {
    let mut gpr: Vec<u32> = vec![5, 6, 7, 28, 29]; // t0..t4
    gpr.extend(10..18); // a0..a7
    gpr.push(9); // s1
    gpr.extend(18..28); // s2..s11
    let mut fpr: Vec<u32> = (0..8).map(|i| F_BASE + i).collect(); // ft0..ft7
    fpr.extend([F_BASE + 28, F_BASE + 29]); // ft8, ft9
    fpr.extend((10..18).map(|i| F_BASE + i)); // fa0..fa7
    (gpr, fpr)
}

// ============================================================================
// Opcodes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Op {
    Add,
    Addi,
    Sub,
    And,
    Andi,
    Or,
    Ori,
    Xor,
    Xori,
    Sll,
    Slli,
    Srl,
    Srli,
    Srai,
    Mul,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    Slt,
    Slti,
    Sltu,
    Sltiu,
    Seqz,
    Snez,
    Li,
    La,
    Mv,
    Lui,
    Lw,
    Lh,
    Lhu,
    Lb,
    Lbu,
    Sw,
    Sh,
    Sb,
    FaddS,
    FsubS,
    FmulS,
    FdivS,
    FmvS,
    FcvtSW,
    FcvtWS,
    Flw,
    Fsw,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    J,
    Call,
    Ret,
}

impl Op {
    pub fn code(self) -> u32 {
        self as u32
    }

    fn from_code(code: u32) -> Op {
        if code > Op::Ret as u32 {
            crate::ice!("riscv32", "unknown target opcode {}", code);
        }
        unsafe { std::mem::transmute(code) }
    }
}

use OperandClass as OC;

fn instr_def(op: Op) -> &'static InstrDef {
    match op {
        Op::Add => &InstrDef {
            mnemonic: "add",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Addi => &InstrDef {
            mnemonic: "addi",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm12],
            has_def: true,
        },
        Op::Sub => &InstrDef {
            mnemonic: "sub",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::And => &InstrDef {
            mnemonic: "and",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Andi => &InstrDef {
            mnemonic: "andi",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm12],
            has_def: true,
        },
        Op::Or => &InstrDef {
            mnemonic: "or",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Ori => &InstrDef {
            mnemonic: "ori",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm12],
            has_def: true,
        },
        Op::Xor => &InstrDef {
            mnemonic: "xor",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Xori => &InstrDef {
            mnemonic: "xori",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm12],
            has_def: true,
        },
        Op::Sll => &InstrDef {
            mnemonic: "sll",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Slli => &InstrDef {
            mnemonic: "slli",
            operands: &[OC::Gpr32, OC::Gpr32, OC::UImm6],
            has_def: true,
        },
        Op::Srl => &InstrDef {
            mnemonic: "srl",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Srli => &InstrDef {
            mnemonic: "srli",
            operands: &[OC::Gpr32, OC::Gpr32, OC::UImm6],
            has_def: true,
        },
        Op::Srai => &InstrDef {
            mnemonic: "srai",
            operands: &[OC::Gpr32, OC::Gpr32, OC::UImm6],
            has_def: true,
        },
        Op::Mul => &InstrDef {
            mnemonic: "mul",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Mulhu => &InstrDef {
            mnemonic: "mulhu",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Div => &InstrDef {
            mnemonic: "div",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Divu => &InstrDef {
            mnemonic: "divu",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Rem => &InstrDef {
            mnemonic: "rem",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Remu => &InstrDef {
            mnemonic: "remu",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Slt => &InstrDef {
            mnemonic: "slt",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Slti => &InstrDef {
            mnemonic: "slti",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm12],
            has_def: true,
        },
        Op::Sltu => &InstrDef {
            mnemonic: "sltu",
            operands: &[OC::Gpr32, OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Sltiu => &InstrDef {
            mnemonic: "sltiu",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm12],
            has_def: true,
        },
        Op::Seqz => &InstrDef {
            mnemonic: "seqz",
            operands: &[OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Snez => &InstrDef {
            mnemonic: "snez",
            operands: &[OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Li => &InstrDef {
            mnemonic: "li",
            operands: &[OC::Gpr32, OC::SImm21Lsb0],
            has_def: true,
        },
        Op::La => &InstrDef {
            mnemonic: "la",
            operands: &[OC::Gpr32, OC::Sym],
            has_def: true,
        },
        Op::Mv => &InstrDef {
            mnemonic: "mv",
            operands: &[OC::Gpr32, OC::Gpr32],
            has_def: true,
        },
        Op::Lui => &InstrDef {
            mnemonic: "lui",
            operands: &[OC::Gpr32, OC::SImm21Lsb0],
            has_def: true,
        },
        Op::Lw => &InstrDef {
            mnemonic: "lw",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: true,
        },
        Op::Lh => &InstrDef {
            mnemonic: "lh",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: true,
        },
        Op::Lhu => &InstrDef {
            mnemonic: "lhu",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: true,
        },
        Op::Lb => &InstrDef {
            mnemonic: "lb",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: true,
        },
        Op::Lbu => &InstrDef {
            mnemonic: "lbu",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: true,
        },
        Op::Sw => &InstrDef {
            mnemonic: "sw",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: false,
        },
        Op::Sh => &InstrDef {
            mnemonic: "sh",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: false,
        },
        Op::Sb => &InstrDef {
            mnemonic: "sb",
            operands: &[OC::Gpr32, OC::Mem],
            has_def: false,
        },
        Op::FaddS => &InstrDef {
            mnemonic: "fadd.s",
            operands: &[OC::Fpr32, OC::Fpr32, OC::Fpr32],
            has_def: true,
        },
        Op::FsubS => &InstrDef {
            mnemonic: "fsub.s",
            operands: &[OC::Fpr32, OC::Fpr32, OC::Fpr32],
            has_def: true,
        },
        Op::FmulS => &InstrDef {
            mnemonic: "fmul.s",
            operands: &[OC::Fpr32, OC::Fpr32, OC::Fpr32],
            has_def: true,
        },
        Op::FdivS => &InstrDef {
            mnemonic: "fdiv.s",
            operands: &[OC::Fpr32, OC::Fpr32, OC::Fpr32],
            has_def: true,
        },
        Op::FmvS => &InstrDef {
            mnemonic: "fmv.s",
            operands: &[OC::Fpr32, OC::Fpr32],
            has_def: true,
        },
        Op::FcvtSW => &InstrDef {
            mnemonic: "fcvt.s.w",
            operands: &[OC::Fpr32, OC::Gpr32],
            has_def: true,
        },
        Op::FcvtWS => &InstrDef {
            mnemonic: "fcvt.w.s",
            operands: &[OC::Gpr32, OC::Fpr32],
            has_def: true,
        },
        Op::Flw => &InstrDef {
            mnemonic: "flw",
            operands: &[OC::Fpr32, OC::Mem],
            has_def: true,
        },
        Op::Fsw => &InstrDef {
            mnemonic: "fsw",
            operands: &[OC::Fpr32, OC::Mem],
            has_def: false,
        },
        Op::Beq => &InstrDef {
            mnemonic: "beq",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm13Lsb0],
            has_def: false,
        },
        Op::Bne => &InstrDef {
            mnemonic: "bne",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm13Lsb0],
            has_def: false,
        },
        Op::Blt => &InstrDef {
            mnemonic: "blt",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm13Lsb0],
            has_def: false,
        },
        Op::Bge => &InstrDef {
            mnemonic: "bge",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm13Lsb0],
            has_def: false,
        },
        Op::Bltu => &InstrDef {
            mnemonic: "bltu",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm13Lsb0],
            has_def: false,
        },
        Op::Bgeu => &InstrDef {
            mnemonic: "bgeu",
            operands: &[OC::Gpr32, OC::Gpr32, OC::SImm13Lsb0],
            has_def: false,
        },
        Op::J => &InstrDef {
            mnemonic: "j",
            operands: &[OC::SImm21Lsb0],
            has_def: false,
        },
        Op::Call => &InstrDef {
            mnemonic: "call",
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

// ============================================================================
// Target Machine
// ============================================================================

pub struct Riscv32Target {
    reg_info: RegisterInfo,
    abi: Abi,
    alloc_gpr: Vec<u32>,
    alloc_fpr: Vec<u32>,
}

impl Riscv32Target {
    pub fn new() -> Self {
        let (alloc_gpr, alloc_fpr) = build_alloc_order();
        Riscv32Target {
            reg_info: build_register_info(),
            abi: build_abi(),
            alloc_gpr,
            alloc_fpr,
        }
    }
}

impl Default for Riscv32Target {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetMachine for Riscv32Target {
    fn name(&self) -> &'static str {
        "riscv32"
    }

    fn pointer_size(&self) -> u32 {
        32
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
            (_, false) => RegClass::Gpr32, // 64-bit values live as split pairs
            (0..=32, true) => RegClass::Fpr32,
            (_, true) => crate::ice!("riscv32", "double-precision FP is unsupported"),
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
            GenericOpcode::Lsl | GenericOpcode::Lsr => Some((0..32).contains(&value)),
            // li expands to lui+addi as needed
            GenericOpcode::Mov | GenericOpcode::LoadImm => Some(fits_signed(value, 32)),
            _ => None,
        }
    }

    fn has_modulo(&self) -> bool {
        true
    }

    fn is_memcpy_supported(&self) -> bool {
        true
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
        let mut li = Inst::target(Op::Li.code());
        li.add_operand(dst.clone());
        li.add_operand(Operand::imm(value, 32));
        vec![li]
    }

    fn scratch_regs(&self) -> (u32, u32) {
        (T5, T6)
    }

    fn fp_scratch_regs(&self) -> (u32, u32) {
        (FT10, FT11)
    }

    fn frame_reg(&self) -> u32 {
        S0
    }

    fn stack_reg(&self) -> u32 {
        SP
    }

    fn link_reg(&self) -> u32 {
        RA
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

        let mut adjust = Inst::target(Op::Addi.code());
        adjust.add_operand(Operand::phys_reg(SP, 32).with_llt(LowLevelType::ptr(32)));
        adjust.add_operand(Operand::phys_reg(SP, 32).with_llt(LowLevelType::ptr(32)));
        adjust.add_operand(Operand::imm(-total, 12));
        seq.push(adjust);

        if layout.save_fp_lr {
            seq.push(store_word(RA, SP, layout.total_size as i32 - 4));
            seq.push(store_word(S0, SP, layout.total_size as i32 - 8));
        }
        for &(reg, offset) in &layout.callee_saves {
            seq.push(store_word(reg, SP, offset));
        }
        if layout.save_fp_lr {
            let mut set_fp = Inst::target(Op::Mv.code());
            set_fp.add_operand(Operand::phys_reg(S0, 32).with_llt(LowLevelType::ptr(32)));
            set_fp.add_operand(Operand::phys_reg(SP, 32).with_llt(LowLevelType::ptr(32)));
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
            seq.push(load_word(reg, SP, offset));
        }
        if layout.save_fp_lr {
            seq.push(load_word(RA, SP, layout.total_size as i32 - 4));
            seq.push(load_word(S0, SP, layout.total_size as i32 - 8));
        }

        let mut adjust = Inst::target(Op::Addi.code());
        adjust.add_operand(Operand::phys_reg(SP, 32).with_llt(LowLevelType::ptr(32)));
        adjust.add_operand(Operand::phys_reg(SP, 32).with_llt(LowLevelType::ptr(32)));
        adjust.add_operand(Operand::imm(total, 12));
        seq.push(adjust);
        seq
    }

    fn build_spill_store(&self, slot: u32, reg: u32, bits: u32, is_fp: bool) -> Inst {
        let op = if is_fp { Op::Fsw } else { Op::Sw };
        let mut inst = Inst::target(op.code());
        inst.add_flag(crate::lir::IS_STORE);
        inst.add_operand(Operand::phys_reg(reg, bits));
        inst.add_operand(Operand::stack(slot, 0));
        inst
    }

    fn build_spill_reload(&self, slot: u32, reg: u32, bits: u32, is_fp: bool) -> Inst {
        let op = if is_fp { Op::Flw } else { Op::Lw };
        let mut inst = Inst::target(op.code());
        inst.add_flag(crate::lir::IS_LOAD);
        inst.add_operand(Operand::phys_reg(reg, bits));
        inst.add_operand(Operand::stack(slot, 0));
        inst
    }

    fn build_reg_copy(&self, dst: u32, src: &Operand, bits: u32, is_fp: bool) -> Inst {
        let op = match (is_fp, src.is_int_imm()) {
            (true, _) => Op::FmvS,
            (false, true) => Op::Li,
            (false, false) => Op::Mv,
        };
        let mut inst = Inst::target(op.code());
        inst.add_operand(Operand::phys_reg(dst, bits));
        inst.add_operand(src.clone());
        inst
    }

    fn imm_prefix(&self) -> &'static str {
        ""
    }

    fn format_mem(&self, base: &str, offset: i32) -> String {
        format!("{}({})", offset, base)
    }

    fn format_special(&self, inst: &Inst) -> Option<String> {
        let op = inst.opcode.target().map(Op::from_code)?;
        match op {
            Op::Ret => Some("ret".to_string()),
            _ => None,
        }
    }
}

fn store_word(reg: u32, base: u32, offset: i32) -> Inst {
    let mut inst = Inst::target(Op::Sw.code());
    inst.add_flag(crate::lir::IS_STORE);
    inst.add_operand(Operand::phys_reg(reg, 32).with_llt(LowLevelType::ptr(32)));
    inst.add_operand(Operand::mem(base, offset, 32));
    inst
}

fn load_word(reg: u32, base: u32, offset: i32) -> Inst {
    let mut inst = Inst::target(Op::Lw.code());
    inst.add_flag(crate::lir::IS_LOAD);
    inst.add_operand(Operand::phys_reg(reg, 32).with_llt(LowLevelType::ptr(32)));
    inst.add_operand(Operand::mem(base, offset, 32));
    inst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names() {
        let tm = Riscv32Target::new();
        assert_eq!(tm.reg_info().name(ZERO), "zero");
        assert_eq!(tm.reg_info().name(A0), "a0");
        assert_eq!(tm.reg_info().name(S0), "s0");
        assert_eq!(tm.reg_info().name(FA0), "fa0");
    }

    #[test]
    fn callee_saved_set() {
        let tm = Riscv32Target::new();
        assert!(tm.reg_info().register_by_id(8).callee_saved); // s0
        assert!(tm.reg_info().register_by_id(18).callee_saved); // s2
        assert!(!tm.reg_info().register_by_id(A0).callee_saved);
        assert!(!tm.reg_info().register_by_id(5).callee_saved); // t0
    }

    #[test]
    fn materialize_uses_li() {
        let tm = Riscv32Target::new();
        let dst = Operand::phys_reg(A0, 32);
        let seq = tm.materialize_constant(0x12345678, &dst);
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].opcode.target(), Some(Op::Li.code()));
    }

    #[test]
    fn prologue_saves_ra_and_fp() {
        let tm = Riscv32Target::new();
        let layout = FrameLayout {
            total_size: 32,
            callee_saves: vec![],
            save_fp_lr: true,
        };
        let seq = tm.build_prologue(&layout);
        assert_eq!(seq.len(), 4);
        assert_eq!(seq[0].opcode.target(), Some(Op::Addi.code()));
        assert_eq!(seq[0].operand(2).unwrap().imm_value(), Some(-32));
        assert_eq!(seq[1].operand(1).unwrap().offset(), 28);
        assert_eq!(seq[2].operand(1).unwrap().offset(), 24);
        assert_eq!(seq[3].opcode.target(), Some(Op::Mv.code()));
    }

    #[test]
    fn mem_operand_syntax() {
        let tm = Riscv32Target::new();
        assert_eq!(tm.format_mem("s0", 8), "8(s0)");
        assert_eq!(tm.format_mem("sp", 0), "0(sp)");
    }
}
