//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// RISC-V 32-bit instruction selection
//
// No flag register: comparisons become slt/sltu networks producing a
// boolean register, and conditional branches test that register against
// zero. Modulo maps directly onto rem/remu.
//

use super::{Op, Riscv32Target, ZERO};
use crate::arch::{fits_signed, RegClass, SelCtx, TargetMachine};
use crate::lir::{GenericOpcode, Inst, LowLevelType, Operand, Relation};

fn new_vreg(tm: &Riscv32Target, ctx: &mut SelCtx, bits: u32) -> Operand {
    let mut op = Operand::virt_reg(ctx.new_vreg(), bits);
    op.reg_class = Some(tm.register_class(bits, false).id());
    op
}

/// rri when the immediate fits simm12, otherwise materialize via li.
fn three_address(
    tm: &Riscv32Target,
    mut inst: Inst,
    rrr: Op,
    rri: Op,
    ctx: &mut SelCtx,
) -> Vec<Inst> {
    if let Some(value) = inst.operand(2).and_then(|o| o.imm_value()) {
        if fits_signed(value, 12) {
            inst.set_target_opcode(rri.code());
            return vec![inst];
        }
        let tmp = new_vreg(tm, ctx, 32);
        let mut seq = tm.materialize_constant(value, &tmp);
        inst.set_target_opcode(rrr.code());
        inst.operands[2] = tmp;
        seq.push(inst);
        return seq;
    }
    inst.set_target_opcode(rrr.code());
    vec![inst]
}

/// rrr only; immediates are materialized first.
fn three_address_reg(
    tm: &Riscv32Target,
    mut inst: Inst,
    rrr: Op,
    ctx: &mut SelCtx,
) -> Vec<Inst> {
    if let Some(value) = inst.operand(2).and_then(|o| o.imm_value()) {
        let tmp = new_vreg(tm, ctx, 32);
        let mut seq = tm.materialize_constant(value, &tmp);
        inst.set_target_opcode(rrr.code());
        inst.operands[2] = tmp;
        seq.push(inst);
        return seq;
    }
    inst.set_target_opcode(rrr.code());
    vec![inst]
}

pub fn select(tm: &Riscv32Target, mut inst: Inst, ctx: &mut SelCtx) -> Vec<Inst> {
    let opcode = match inst.opcode.generic() {
        Some(g) => g,
        None => return vec![inst],
    };

    match opcode {
        GenericOpcode::And => three_address(tm, inst, Op::And, Op::Andi, ctx),
        GenericOpcode::Or => three_address(tm, inst, Op::Or, Op::Ori, ctx),
        GenericOpcode::Xor => three_address(tm, inst, Op::Xor, Op::Xori, ctx),
        GenericOpcode::Lsl => three_address(tm, inst, Op::Sll, Op::Slli, ctx),
        GenericOpcode::Lsr => three_address(tm, inst, Op::Srl, Op::Srli, ctx),
        GenericOpcode::Add => three_address(tm, inst, Op::Add, Op::Addi, ctx),
        GenericOpcode::Sub => {
            // no subi: negate the immediate into addi when possible
            if let Some(value) = inst.operand(2).and_then(|o| o.imm_value()) {
                if fits_signed(-value, 12) {
                    inst.operands[2] = Operand::imm(-value, 12);
                    inst.set_target_opcode(Op::Addi.code());
                    return vec![inst];
                }
            }
            three_address_reg(tm, inst, Op::Sub, ctx)
        }
        GenericOpcode::Mul => three_address_reg(tm, inst, Op::Mul, ctx),
        GenericOpcode::MulHU => three_address_reg(tm, inst, Op::Mulhu, ctx),
        GenericOpcode::Div => three_address_reg(tm, inst, Op::Div, ctx),
        GenericOpcode::DivU => three_address_reg(tm, inst, Op::Divu, ctx),
        GenericOpcode::Mod => three_address_reg(tm, inst, Op::Rem, ctx),
        GenericOpcode::ModU => three_address_reg(tm, inst, Op::Remu, ctx),
        GenericOpcode::Cmp => select_cmp(tm, inst, ctx),
        GenericOpcode::AddF => {
            inst.set_target_opcode(Op::FaddS.code());
            vec![inst]
        }
        GenericOpcode::SubF => {
            inst.set_target_opcode(Op::FsubS.code());
            vec![inst]
        }
        GenericOpcode::MulF => {
            inst.set_target_opcode(Op::FmulS.code());
            vec![inst]
        }
        GenericOpcode::DivF => {
            inst.set_target_opcode(Op::FdivS.code());
            vec![inst]
        }
        GenericOpcode::CmpF => {
            crate::ice!("isel", "FP comparison unsupported on this target")
        }
        GenericOpcode::IToF => {
            inst.set_target_opcode(Op::FcvtSW.code());
            vec![inst]
        }
        GenericOpcode::FToI => {
            inst.set_target_opcode(Op::FcvtWS.code());
            vec![inst]
        }
        GenericOpcode::SExt => select_sext(tm, inst, ctx),
        GenericOpcode::ZExt => select_zext(tm, inst, ctx),
        GenericOpcode::Trunc => select_trunc(inst),
        GenericOpcode::ZExtLoad => {
            let src_bits = inst.operand(1).map(|o| o.bits()).unwrap_or(32);
            inst.remove_operand(1);
            let op = match src_bits {
                8 => Op::Lbu,
                16 => Op::Lhu,
                _ => Op::Lw,
            };
            inst.set_target_opcode(op.code());
            vec![inst]
        }
        GenericOpcode::LoadImm | GenericOpcode::Mov => {
            if inst.operand(1).map(|o| o.is_int_imm()).unwrap_or(false) {
                inst.set_target_opcode(Op::Li.code());
            } else {
                inst.set_target_opcode(Op::Mv.code());
            }
            vec![inst]
        }
        GenericOpcode::MovF => {
            if inst.operand(1).map(|o| o.is_imm()).unwrap_or(false) {
                crate::ice!("isel", "FP immediates unsupported on this target")
            }
            inst.set_target_opcode(Op::FmvS.code());
            vec![inst]
        }
        GenericOpcode::Load => {
            let bits = inst.operand(0).map(|o| o.bits()).unwrap_or(32);
            let slot_size = inst
                .operand(1)
                .and_then(|o| o.slot_id())
                .and_then(|slot| ctx.frame.size_of(slot));
            let op = if bits == 8 || slot_size == Some(1) {
                Op::Lb
            } else if bits == 16 || slot_size == Some(2) {
                Op::Lh
            } else {
                Op::Lw
            };
            inst.set_target_opcode(op.code());
            if let Some(dst) = inst.operands.first_mut() {
                if dst.llt.is_valid() && !dst.llt.is_pointer() && dst.bits() < 32 {
                    dst.set_bits(32);
                }
            }
            vec![inst]
        }
        GenericOpcode::Store => {
            // operands arrive as (address, value); asm order is (value, address)
            let value_bits = inst.operands.last().map(|o| o.bits()).unwrap_or(32);
            let slot_size = inst
                .operand(0)
                .and_then(|o| o.slot_id())
                .and_then(|slot| ctx.frame.size_of(slot));
            let op = if value_bits == 8 || slot_size == Some(1) {
                Op::Sb
            } else if value_bits == 16 || slot_size == Some(2) {
                Op::Sh
            } else {
                Op::Sw
            };
            inst.set_target_opcode(op.code());
            inst.operands.reverse();
            vec![inst]
        }
        GenericOpcode::StackAddress => {
            inst.set_target_opcode(Op::Addi.code());
            vec![inst]
        }
        GenericOpcode::GlobalAddress => {
            inst.set_target_opcode(Op::La.code());
            vec![inst]
        }
        GenericOpcode::Branch => select_branch(inst),
        GenericOpcode::Jump => {
            inst.set_target_opcode(Op::J.code());
            vec![inst]
        }
        GenericOpcode::Call => {
            inst.set_target_opcode(Op::Call.code());
            vec![inst]
        }
        GenericOpcode::Ret => {
            inst.set_target_opcode(Op::Ret.code());
            vec![inst]
        }
        GenericOpcode::BitCast => {
            inst.set_target_opcode(Op::Mv.code());
            vec![inst]
        }
        GenericOpcode::Split => {
            // constants were split into per-register loads during lowering
            if let Some(value) = inst.operands.last().and_then(|o| o.imm_value()) {
                let lo = inst.operands[0].clone();
                let hi = inst.operands[1].clone();
                let mut seq = tm.materialize_constant(value & 0xffff_ffff, &lo);
                seq.extend(tm.materialize_constant((value >> 32) & 0xffff_ffff, &hi));
                return seq;
            }
            crate::ice!("isel", "SPLIT of a register value unsupported on this target")
        }
        GenericOpcode::AddS | GenericOpcode::AddC | GenericOpcode::Merge => {
            crate::ice!("isel", "{} unsupported on this target", opcode.name())
        }
    }
}

/// Lower CMP into a boolean register via slt/sltu networks.
fn select_cmp(tm: &Riscv32Target, inst: Inst, ctx: &mut SelCtx) -> Vec<Inst> {
    let relation = inst.relation;
    let mut dst = inst.operands[0].clone();
    dst.set_bits(32);
    dst.reg_class = Some(RegClass::Gpr32.id());
    let lhs = inst.operands[1].clone();
    let rhs = inst.operands[2].clone();

    let mut seq = Vec::new();

    // operand in register form, materializing immediates when a swapped
    // compare needs them on the right-hand slot of slt
    fn reg_of(
        tm: &Riscv32Target,
        ctx: &mut SelCtx,
        op: &Operand,
        seq: &mut Vec<Inst>,
    ) -> Operand {
        if let Some(value) = op.imm_value() {
            let tmp = new_vreg(tm, ctx, 32);
            seq.extend(tm.materialize_constant(value, &tmp));
            tmp
        } else {
            op.clone()
        }
    }

    match relation {
        Relation::Eq | Relation::Ne => {
            // xor then seqz/snez
            let tmp = new_vreg(tm, ctx, 32);
            let mut x = Inst::target(if rhs.is_int_imm() { Op::Xori } else { Op::Xor }.code());
            x.add_operand(tmp.clone());
            x.add_operand(lhs);
            x.add_operand(rhs);
            seq.push(x);
            let op = if relation == Relation::Eq {
                Op::Seqz
            } else {
                Op::Snez
            };
            let mut set = Inst::target(op.code());
            set.add_operand(dst);
            set.add_operand(tmp);
            seq.push(set);
        }
        Relation::Lt | Relation::ULt => {
            let op = if rhs.is_int_imm() {
                if relation == Relation::Lt {
                    Op::Slti
                } else {
                    Op::Sltiu
                }
            } else if relation == Relation::Lt {
                Op::Slt
            } else {
                Op::Sltu
            };
            let mut slt = Inst::target(op.code());
            slt.add_operand(dst);
            slt.add_operand(lhs);
            slt.add_operand(rhs);
            seq.push(slt);
        }
        Relation::Gt | Relation::UGt => {
            // swap the operands of slt
            let rhs_reg = reg_of(tm, ctx, &rhs, &mut seq);
            let op = if relation == Relation::Gt {
                Op::Slt
            } else {
                Op::Sltu
            };
            let mut slt = Inst::target(op.code());
            slt.add_operand(dst);
            slt.add_operand(rhs_reg);
            slt.add_operand(lhs);
            seq.push(slt);
        }
        Relation::Ge | Relation::UGe => {
            // !(lhs < rhs)
            let op = if rhs.is_int_imm() {
                if relation == Relation::Ge {
                    Op::Slti
                } else {
                    Op::Sltiu
                }
            } else if relation == Relation::Ge {
                Op::Slt
            } else {
                Op::Sltu
            };
            let mut slt = Inst::target(op.code());
            slt.add_operand(dst.clone());
            slt.add_operand(lhs);
            slt.add_operand(rhs);
            seq.push(slt);
            let mut invert = Inst::target(Op::Xori.code());
            invert.add_operand(dst.clone());
            invert.add_operand(dst);
            invert.add_operand(Operand::imm(1, 12));
            seq.push(invert);
        }
        Relation::Le | Relation::ULe => {
            // !(rhs < lhs)
            let rhs_reg = reg_of(tm, ctx, &rhs, &mut seq);
            let op = if relation == Relation::Le {
                Op::Slt
            } else {
                Op::Sltu
            };
            let mut slt = Inst::target(op.code());
            slt.add_operand(dst.clone());
            slt.add_operand(rhs_reg);
            slt.add_operand(lhs);
            seq.push(slt);
            let mut invert = Inst::target(Op::Xori.code());
            invert.add_operand(dst.clone());
            invert.add_operand(dst);
            invert.add_operand(Operand::imm(1, 12));
            seq.push(invert);
        }
        Relation::Invalid => crate::ice!("isel", "CMP without a relation"),
    }
    seq
}

/// Branch on the boolean produced by the preceding compare.
fn select_branch(mut inst: Inst) -> Vec<Inst> {
    let cond = inst.operands[0].clone();
    inst.remove_operand(0);
    let false_label = if inst.operands.len() > 1 {
        Some(inst.operands.pop().unwrap())
    } else {
        None
    };
    let true_label = inst.operands.pop().unwrap();

    let mut branch = Inst::target(Op::Bne.code());
    branch.add_operand(cond);
    branch.add_operand(Operand::phys_reg(ZERO, 32));
    branch.add_operand(true_label);

    let mut seq = vec![branch];
    if let Some(label) = false_label {
        let mut j = Inst::target(Op::J.code());
        j.add_operand(label);
        seq.push(j);
    }
    seq
}

fn select_sext(tm: &Riscv32Target, mut inst: Inst, ctx: &mut SelCtx) -> Vec<Inst> {
    if inst.operand(1).map(|o| o.is_int_imm()).unwrap_or(false) {
        inst.set_target_opcode(Op::Li.code());
        return vec![inst];
    }
    let src_bits = inst.operand(1).map(|o| o.bits()).unwrap_or(32);
    let shamt = match src_bits {
        8 => 24,
        16 => 16,
        32 => {
            inst.set_target_opcode(Op::Mv.code());
            return vec![inst];
        }
        other => crate::ice!("isel", "SEXT from unsupported width {}", other),
    };
    let dst = inst.operands[0].clone();
    let src = inst.operands[1].clone();
    let tmp = new_vreg(tm, ctx, 32);

    let mut shl = Inst::target(Op::Slli.code());
    shl.add_operand(tmp.clone());
    shl.add_operand(src.with_llt(LowLevelType::scalar(32)));
    shl.add_operand(Operand::imm(shamt, 6));
    let mut shr = Inst::target(Op::Srai.code());
    shr.add_operand(dst);
    shr.add_operand(tmp);
    shr.add_operand(Operand::imm(shamt, 6));
    vec![shl, shr]
}

fn select_zext(tm: &Riscv32Target, mut inst: Inst, ctx: &mut SelCtx) -> Vec<Inst> {
    if inst.operand(1).map(|o| o.is_int_imm()).unwrap_or(false) {
        inst.set_target_opcode(Op::Li.code());
        return vec![inst];
    }
    let src_bits = inst.operand(1).map(|o| o.bits()).unwrap_or(32);
    match src_bits {
        8 => {
            inst.set_target_opcode(Op::Andi.code());
            if let Some(src) = inst.operands.get_mut(1) {
                src.set_bits(32);
            }
            inst.add_operand(Operand::imm(0xff, 12));
            vec![inst]
        }
        16 => {
            // mask via shift pair: 0xffff does not fit simm12
            let dst = inst.operands[0].clone();
            let src = inst.operands[1].clone();
            let tmp = new_vreg(tm, ctx, 32);
            let mut shl = Inst::target(Op::Slli.code());
            shl.add_operand(tmp.clone());
            shl.add_operand(src.with_llt(LowLevelType::scalar(32)));
            shl.add_operand(Operand::imm(16, 6));
            let mut shr = Inst::target(Op::Srli.code());
            shr.add_operand(dst);
            shr.add_operand(tmp);
            shr.add_operand(Operand::imm(16, 6));
            vec![shl, shr]
        }
        32 => {
            inst.set_target_opcode(Op::Mv.code());
            vec![inst]
        }
        other => crate::ice!("isel", "ZEXT from unsupported width {}", other),
    }
}

fn select_trunc(mut inst: Inst) -> Vec<Inst> {
    let dst_bits = inst.operand(0).map(|o| o.bits()).unwrap_or(0);
    match dst_bits {
        8 => {
            if let Some(value) = inst.operand(1).and_then(|o| o.imm_value()) {
                inst.operands[1] = Operand::imm(value & 0xff, 12);
                inst.set_target_opcode(Op::Li.code());
            } else {
                inst.set_target_opcode(Op::Andi.code());
                inst.add_operand(Operand::imm(0xff, 12));
            }
            if let Some(dst) = inst.operands.first_mut() {
                dst.set_bits(32);
            }
            vec![inst]
        }
        16 | 32 => {
            if let Some(value) = inst.operand(1).and_then(|o| o.imm_value()) {
                let mask = if dst_bits == 16 { 0xffff } else { 0xffff_ffff };
                inst.operands[1] = Operand::imm(value & mask, 32);
                inst.set_target_opcode(Op::Li.code());
            } else {
                inst.set_target_opcode(Op::Mv.code());
            }
            if let Some(dst) = inst.operands.first_mut() {
                dst.set_bits(32);
            }
            vec![inst]
        }
        other => crate::ice!("isel", "TRUNC to unsupported width {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::StackFrame;

    fn ctx<'a>(next_vreg: &'a mut u32, frame: &'a StackFrame) -> SelCtx<'a> {
        SelCtx {
            next_vreg,
            frame,
            prev_cmp: None,
            next_consumes_flags: false,
        }
    }

    #[test]
    fn add_imm_selects_addi() {
        let tm = Riscv32Target::new();
        let mut nv = 10;
        let frame = StackFrame::default();
        let inst = Inst::new(GenericOpcode::Add)
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::imm(12, 32));
        let seq = tm.select_instruction(inst, &mut ctx(&mut nv, &frame));
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].opcode.target(), Some(Op::Addi.code()));
    }

    #[test]
    fn sub_imm_negates_into_addi() {
        let tm = Riscv32Target::new();
        let mut nv = 10;
        let frame = StackFrame::default();
        let inst = Inst::new(GenericOpcode::Sub)
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::imm(8, 32));
        let seq = tm.select_instruction(inst, &mut ctx(&mut nv, &frame));
        assert_eq!(seq[0].opcode.target(), Some(Op::Addi.code()));
        assert_eq!(seq[0].operand(2).unwrap().imm_value(), Some(-8));
    }

    #[test]
    fn mod_maps_to_rem() {
        let tm = Riscv32Target::new();
        let mut nv = 10;
        let frame = StackFrame::default();
        let inst = Inst::new(GenericOpcode::Mod)
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::virt_reg(2, 32));
        let seq = tm.select_instruction(inst, &mut ctx(&mut nv, &frame));
        assert_eq!(seq[0].opcode.target(), Some(Op::Rem.code()));
    }

    #[test]
    fn cmp_lt_uses_slt() {
        let tm = Riscv32Target::new();
        let mut nv = 10;
        let frame = StackFrame::default();
        let inst = Inst::new(GenericOpcode::Cmp)
            .with_operand(Operand::virt_reg(3, 32))
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_relation(Relation::Lt);
        let seq = tm.select_instruction(inst, &mut ctx(&mut nv, &frame));
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].opcode.target(), Some(Op::Slt.code()));
    }

    #[test]
    fn cmp_eq_uses_xor_seqz() {
        let tm = Riscv32Target::new();
        let mut nv = 10;
        let frame = StackFrame::default();
        let inst = Inst::new(GenericOpcode::Cmp)
            .with_operand(Operand::virt_reg(3, 32))
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::imm(4, 32))
            .with_relation(Relation::Eq);
        let seq = tm.select_instruction(inst, &mut ctx(&mut nv, &frame));
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0].opcode.target(), Some(Op::Xori.code()));
        assert_eq!(seq[1].opcode.target(), Some(Op::Seqz.code()));
    }

    #[test]
    fn cmp_ge_inverts_slt() {
        let tm = Riscv32Target::new();
        let mut nv = 10;
        let frame = StackFrame::default();
        let inst = Inst::new(GenericOpcode::Cmp)
            .with_operand(Operand::virt_reg(3, 32))
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_relation(Relation::Ge);
        let seq = tm.select_instruction(inst, &mut ctx(&mut nv, &frame));
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0].opcode.target(), Some(Op::Slt.code()));
        assert_eq!(seq[1].opcode.target(), Some(Op::Xori.code()));
    }

    #[test]
    fn branch_tests_against_zero() {
        let tm = Riscv32Target::new();
        let mut nv = 10;
        let frame = StackFrame::default();
        let inst = Inst::new(GenericOpcode::Branch)
            .with_operand(Operand::virt_reg(3, 32))
            .with_operand(Operand::label("loop"));
        let seq = tm.select_instruction(inst, &mut ctx(&mut nv, &frame));
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].opcode.target(), Some(Op::Bne.code()));
        assert_eq!(seq[0].operand(1).unwrap().reg_id(), Some(ZERO));
    }

    #[test]
    fn sext_from_byte_is_shift_pair() {
        let tm = Riscv32Target::new();
        let mut nv = 10;
        let frame = StackFrame::default();
        let inst = Inst::new(GenericOpcode::SExt)
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 8));
        let seq = tm.select_instruction(inst, &mut ctx(&mut nv, &frame));
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0].opcode.target(), Some(Op::Slli.code()));
        assert_eq!(seq[1].opcode.target(), Some(Op::Srai.code()));
        assert_eq!(seq[0].operand(2).unwrap().imm_value(), Some(24));
    }

    #[test]
    fn global_address_is_la() {
        let tm = Riscv32Target::new();
        let mut nv = 10;
        let frame = StackFrame::default();
        let inst = Inst::new(GenericOpcode::GlobalAddress)
            .with_operand(Operand::virt_reg_ptr(5, 32))
            .with_operand(Operand::global("head", 32));
        let seq = tm.select_instruction(inst, &mut ctx(&mut nv, &frame));
        assert_eq!(seq[0].opcode.target(), Some(Op::La.code()));
    }
}
