//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// AArch64 instruction selection
//
// Replaces generic opcodes with concrete AArch64 opcodes: rri vs rrr ALU
// forms, wide-constant materialization, flag-setting compares with
// conditional sets and branches, extension/truncation idioms, and
// size-directed load/store opcodes.
//

use super::{branch_for, Aarch64Target, Op};
use crate::arch::{fits_signed, RegClass, SelCtx, TargetMachine};
use crate::lir::{GenericOpcode, Inst, Operand, OperandKind, Relation};

/// Widen a sub-32-bit scalar operand to the minimum register width.
fn widen(op: &mut Operand) {
    if op.llt.is_valid() && !op.llt.is_pointer() && op.bits() < 32 {
        op.set_bits(32);
    }
}

fn widen_at(inst: &mut Inst, idx: usize) {
    if let Some(op) = inst.operands.get_mut(idx) {
        widen(op);
    }
}

/// Fresh virtual register operand with its class already assigned.
fn new_vreg(tm: &Aarch64Target, ctx: &mut SelCtx, bits: u32) -> Operand {
    let mut op = Operand::virt_reg(ctx.new_vreg(), bits);
    op.reg_class = Some(tm.register_class(bits, false).id());
    op
}

/// rri when the immediate fits `imm_bits` signed, otherwise materialize
/// the constant and use the rrr form.
fn three_address(
    tm: &Aarch64Target,
    mut inst: Inst,
    rrr: Op,
    rri: Op,
    imm_bits: u32,
    ctx: &mut SelCtx,
) -> Vec<Inst> {
    if let Some(value) = inst.operand(2).and_then(|o| o.imm_value()) {
        if fits_signed(value, imm_bits) {
            inst.set_target_opcode(rri.code());
            return vec![inst];
        }
        let tmp = new_vreg(tm, ctx, inst.operand(0).map(|o| o.bits()).unwrap_or(32));
        let mut seq = tm.materialize_constant(value, &tmp);
        inst.set_target_opcode(rrr.code());
        inst.operands[2] = tmp;
        seq.push(inst);
        return seq;
    }
    inst.set_target_opcode(rrr.code());
    vec![inst]
}

fn three_address_fp(mut inst: Inst, rrr: Op) -> Vec<Inst> {
    if inst.operand(2).map(|o| o.is_imm()).unwrap_or(false) {
        crate::ice!("isel", "immediate operand on an FP instruction");
    }
    inst.set_target_opcode(rrr.code());
    vec![inst]
}

pub fn select(tm: &Aarch64Target, mut inst: Inst, ctx: &mut SelCtx) -> Vec<Inst> {
    let opcode = match inst.opcode.generic() {
        Some(g) => g,
        // Already selected (spill code, prologue pieces); leave untouched.
        None => return vec![inst],
    };

    match opcode {
        GenericOpcode::And => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            three_address(tm, inst, Op::AndRrr, Op::AndRri, 12, ctx)
        }
        GenericOpcode::Or => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            three_address(tm, inst, Op::OrrRrr, Op::OrrRri, 12, ctx)
        }
        GenericOpcode::Xor => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            // bitwise not
            if inst.operand(2).and_then(|o| o.imm_value()) == Some(-1) {
                inst.remove_operand(2);
                inst.set_target_opcode(Op::MvnRr.code());
                return vec![inst];
            }
            three_address(tm, inst, Op::EorRrr, Op::EorRri, 12, ctx)
        }
        GenericOpcode::Lsl => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            three_address(tm, inst, Op::LslRrr, Op::LslRri, 6, ctx)
        }
        GenericOpcode::Lsr => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            three_address(tm, inst, Op::LsrRrr, Op::LsrRri, 6, ctx)
        }
        GenericOpcode::Add => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            if let Some(value) = inst.operand(2).and_then(|o| o.imm_value()) {
                if value < 0 {
                    inst.operands[2] = Operand::imm(-value, inst.operands[2].bits());
                    inst.set_target_opcode(Op::SubRri.code());
                    return vec![inst];
                }
            }
            three_address(tm, inst, Op::AddRrr, Op::AddRri, 12, ctx)
        }
        GenericOpcode::Sub => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            three_address(tm, inst, Op::SubRrr, Op::SubRri, 12, ctx)
        }
        GenericOpcode::Mul => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            // no immediate-multiply on AArch64; the legalizer materialized
            if let Some(value) = inst.operand(2).and_then(|o| o.imm_value()) {
                let tmp = new_vreg(tm, ctx, inst.operand(0).map(|o| o.bits()).unwrap_or(32));
                let mut seq = tm.materialize_constant(value, &tmp);
                inst.set_target_opcode(Op::MulRrr.code());
                inst.operands[2] = tmp;
                seq.push(inst);
                return seq;
            }
            inst.set_target_opcode(Op::MulRrr.code());
            vec![inst]
        }
        GenericOpcode::Div => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            if let Some(value) = inst.operand(2).and_then(|o| o.imm_value()) {
                let tmp = new_vreg(tm, ctx, inst.operand(0).map(|o| o.bits()).unwrap_or(32));
                let mut seq = tm.materialize_constant(value, &tmp);
                inst.set_target_opcode(Op::SdivRrr.code());
                inst.operands[2] = tmp;
                seq.push(inst);
                return seq;
            }
            inst.set_target_opcode(Op::SdivRrr.code());
            vec![inst]
        }
        GenericOpcode::DivU => {
            widen_at(&mut inst, 0);
            widen_at(&mut inst, 1);
            inst.set_target_opcode(Op::UdivRrr.code());
            vec![inst]
        }
        GenericOpcode::Mod | GenericOpcode::ModU => {
            crate::ice!("isel", "MOD unsupported on this target (legalizer must rewrite)")
        }
        GenericOpcode::Cmp => select_cmp(tm, inst, ctx, false),
        GenericOpcode::CmpF => select_cmp(tm, inst, ctx, true),
        GenericOpcode::AddF => three_address_fp(inst, Op::FaddRrr),
        GenericOpcode::SubF => three_address_fp(inst, Op::FsubRrr),
        GenericOpcode::MulF => three_address_fp(inst, Op::FmulRrr),
        GenericOpcode::DivF => three_address_fp(inst, Op::FdivRrr),
        GenericOpcode::IToF => {
            inst.set_target_opcode(Op::ScvtfRr.code());
            vec![inst]
        }
        GenericOpcode::FToI => {
            widen_at(&mut inst, 0);
            inst.set_target_opcode(Op::FcvtzsRr.code());
            vec![inst]
        }
        GenericOpcode::SExt => {
            widen_at(&mut inst, 0);
            let src_bits = inst.operand(1).map(|o| o.bits()).unwrap_or(0);
            if inst.operand(1).map(|o| o.is_imm()).unwrap_or(false) {
                inst.set_target_opcode(Op::MovRc.code());
                return vec![inst];
            }
            let op = match src_bits {
                8 => Op::Sxtb,
                16 => Op::Sxth,
                32 => Op::Sxtw,
                other => crate::ice!("isel", "SEXT from unsupported width {}", other),
            };
            inst.set_target_opcode(op.code());
            vec![inst]
        }
        GenericOpcode::ZExt => {
            widen_at(&mut inst, 0);
            let src_bits = inst.operand(1).map(|o| o.bits()).unwrap_or(0);
            if inst.operand(1).map(|o| o.is_imm()).unwrap_or(false) {
                inst.set_target_opcode(Op::MovRc.code());
                return vec![inst];
            }
            let op = match src_bits {
                8 => Op::Uxtb,
                16 => Op::Uxth,
                32 => Op::Uxtw,
                64 => Op::MovRr,
                other => crate::ice!("isel", "ZEXT from unsupported width {}", other),
            };
            inst.set_target_opcode(op.code());
            vec![inst]
        }
        GenericOpcode::Trunc => select_trunc(inst),
        GenericOpcode::ZExtLoad => {
            // operand 1 carries the source width
            let src_bits = inst.operand(1).map(|o| o.bits()).unwrap_or(32);
            inst.remove_operand(1);
            let op = if src_bits == 8 { Op::Ldrb } else { Op::Ldr };
            inst.set_target_opcode(op.code());
            widen_at(&mut inst, 0);
            vec![inst]
        }
        GenericOpcode::LoadImm => {
            widen_at(&mut inst, 0);
            let value = match inst.operand(1).and_then(|o| o.imm_value()) {
                Some(v) => v,
                None => crate::ice!("isel", "LOAD_IMM without an immediate"),
            };
            let dst = inst.operands[0].clone();
            tm.materialize_constant(value, &dst)
        }
        GenericOpcode::Mov => {
            if let Some(value) = inst.operand(1).and_then(|o| o.imm_value()) {
                if fits_signed(value, 16) {
                    inst.set_target_opcode(Op::MovRc.code());
                    return vec![inst];
                }
                let dst = inst.operands[0].clone();
                return tm.materialize_constant(value, &dst);
            }
            inst.set_target_opcode(Op::MovRr.code());
            vec![inst]
        }
        GenericOpcode::MovF => {
            if inst.operand(1).map(|o| o.is_imm()).unwrap_or(false) {
                inst.set_target_opcode(Op::FmovRi.code());
            } else {
                inst.set_target_opcode(Op::FmovRr.code());
            }
            vec![inst]
        }
        GenericOpcode::Load => {
            let dst_bits = inst.operand(0).map(|o| o.bits()).unwrap_or(32);
            let dst_is_ptr = inst.operand(0).map(|o| o.llt.is_pointer()).unwrap_or(false);
            if dst_bits == 8 && !dst_is_ptr {
                inst.set_target_opcode(Op::Ldrb.code());
                widen_at(&mut inst, 0);
                return vec![inst];
            }
            if let Some(slot) = inst.operand(1).and_then(|o| o.slot_id()) {
                match ctx.frame.size_of(slot) {
                    Some(1) => {
                        inst.set_target_opcode(Op::Ldrb.code());
                        widen_at(&mut inst, 0);
                        return vec![inst];
                    }
                    Some(2) => {
                        inst.set_target_opcode(Op::Ldrh.code());
                        widen_at(&mut inst, 0);
                        return vec![inst];
                    }
                    Some(4) => {
                        inst.set_target_opcode(Op::Ldr.code());
                        return vec![inst];
                    }
                    _ => {}
                }
            }
            inst.set_target_opcode(Op::Ldr.code());
            vec![inst]
        }
        GenericOpcode::Store => select_store(inst, ctx),
        GenericOpcode::StackAddress => {
            inst.set_target_opcode(Op::AddRri.code());
            vec![inst]
        }
        GenericOpcode::GlobalAddress => {
            let dst = inst.operands[0].clone();
            let sym = inst.operands[1].clone();
            let mut adrp = Inst::target(Op::Adrp.code());
            adrp.add_operand(dst.clone());
            adrp.add_operand(sym.clone());
            let mut add = Inst::target(Op::AddRri.code());
            add.add_operand(dst.clone());
            add.add_operand(dst);
            add.add_operand(sym);
            vec![adrp, add]
        }
        GenericOpcode::Branch => select_branch(inst, ctx),
        GenericOpcode::Jump => {
            inst.set_target_opcode(Op::B.code());
            vec![inst]
        }
        GenericOpcode::Call => {
            inst.set_target_opcode(Op::Bl.code());
            vec![inst]
        }
        GenericOpcode::Ret => {
            inst.set_target_opcode(Op::Ret.code());
            vec![inst]
        }
        GenericOpcode::BitCast => {
            inst.set_target_opcode(Op::MovRr.code());
            vec![inst]
        }
        GenericOpcode::AddS
        | GenericOpcode::AddC
        | GenericOpcode::MulHU
        | GenericOpcode::Merge
        | GenericOpcode::Split => {
            crate::ice!("isel", "{} unsupported on this target", opcode.name())
        }
    }
}

/// CMP writes the NZCV flags. When the next instruction is the consuming
/// branch, the boolean destination is dropped; otherwise a CSET follows.
fn select_cmp(tm: &Aarch64Target, mut inst: Inst, ctx: &mut SelCtx, is_fp: bool) -> Vec<Inst> {
    widen_at(&mut inst, 1);
    widen_at(&mut inst, 2);
    let relation = inst.relation;
    let mut dst = inst.operands[0].clone();
    inst.remove_operand(0);

    let mut seq = Vec::new();
    if is_fp {
        let op = if inst.operand(1).map(|o| o.is_imm()).unwrap_or(false) {
            Op::FcmpRi
        } else {
            Op::FcmpRr
        };
        inst.set_target_opcode(op.code());
        seq.push(inst);
    } else if let Some(value) = inst.operand(1).and_then(|o| o.imm_value()) {
        if fits_signed(value, 12) {
            inst.set_target_opcode(Op::CmpRi.code());
            seq.push(inst);
        } else {
            let tmp = new_vreg(tm, ctx, inst.operand(0).map(|o| o.bits()).unwrap_or(32));
            seq = tm.materialize_constant(value, &tmp);
            inst.set_target_opcode(Op::CmpRr.code());
            inst.operands[1] = tmp;
            seq.push(inst);
        }
    } else {
        inst.set_target_opcode(Op::CmpRr.code());
        seq.push(inst);
    }

    if !ctx.next_consumes_flags {
        dst.set_bits(32);
        dst.reg_class = Some(RegClass::Gpr32.id());
        let mut cset = Inst::target(Op::Cset.code());
        cset.add_operand(dst);
        cset.relation = relation;
        seq.push(cset);
    }
    seq
}

fn select_branch(mut inst: Inst, ctx: &mut SelCtx) -> Vec<Inst> {
    let cond_vreg = inst.operand(0).and_then(|o| match o.kind {
        OperandKind::VirtReg(id) => Some(id),
        _ => None,
    });

    let matches_prev_cmp = match (cond_vreg, ctx.prev_cmp) {
        (Some(cond), Some((def, _))) => cond == def,
        _ => false,
    };

    let mut seq = Vec::new();
    if matches_prev_cmp {
        let (_, relation) = ctx.prev_cmp.unwrap();
        inst.remove_operand(0);
        let false_label = if inst.operands.len() > 1 {
            Some(inst.operands.pop().unwrap())
        } else {
            None
        };
        inst.set_target_opcode(branch_for(relation).code());
        seq.push(inst);
        if let Some(label) = false_label {
            let mut b = Inst::target(Op::B.code());
            b.add_operand(label);
            seq.push(b);
        }
    } else {
        // condition is a plain boolean register: test it against zero
        let cond = inst.operands[0].clone();
        inst.remove_operand(0);
        let false_label = if inst.operands.len() > 1 {
            Some(inst.operands.pop().unwrap())
        } else {
            None
        };
        let mut cmp = Inst::target(Op::CmpRi.code());
        cmp.add_operand(cond);
        cmp.add_operand(Operand::imm(0, 12));
        seq.push(cmp);
        inst.set_target_opcode(Op::Bne.code());
        seq.push(inst);
        if let Some(label) = false_label {
            let mut b = Inst::target(Op::B.code());
            b.add_operand(label);
            seq.push(b);
        }
    }
    seq
}

fn select_trunc(mut inst: Inst) -> Vec<Inst> {
    let dst_bits = inst.operand(0).map(|o| o.bits()).unwrap_or(0);
    let src_bits = inst.operand(1).map(|o| o.bits()).unwrap_or(0);

    match dst_bits {
        8 | 16 => {
            let mask = if dst_bits == 8 { 0xff } else { 0xffff };
            if let Some(value) = inst.operand(1).and_then(|o| o.imm_value()) {
                inst.operands[1] = Operand::imm(value & mask, 16);
                inst.set_target_opcode(Op::MovRc.code());
            } else {
                inst.set_target_opcode(Op::AndRri.code());
                inst.add_operand(Operand::imm(mask, 16));
            }
            widen_at(&mut inst, 0);
            vec![inst]
        }
        32 if src_bits == 64 => {
            // sub-register renaming finalizes the narrowing
            if inst.operand(1).map(|o| !o.is_imm()).unwrap_or(false) {
                inst.set_target_opcode(Op::MovRr.code());
                return vec![inst];
            }
            crate::ice!("isel", "TRUNC of an immediate to 32 bits")
        }
        other => crate::ice!("isel", "TRUNC to unsupported width {}", other),
    }
}

fn select_store(mut inst: Inst, ctx: &mut SelCtx) -> Vec<Inst> {
    // operands arrive as (address, value); asm order is (value, address)
    let value_bits = inst
        .operands
        .last()
        .map(|o| o.bits())
        .unwrap_or(32);
    let slot_size = inst
        .operand(0)
        .and_then(|o| o.slot_id())
        .and_then(|slot| ctx.frame.size_of(slot));

    let op = if value_bits == 8 || slot_size == Some(1) {
        Op::Strb
    } else if value_bits == 16 || slot_size == Some(2) {
        Op::Strh
    } else {
        Op::Str
    };
    inst.set_target_opcode(op.code());
    if let Some(value) = inst.operands.last_mut() {
        widen(value);
    }
    inst.operands.reverse();
    vec![inst]
}
