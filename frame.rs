//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Prologue/epilogue insertion
//
// Computes the final frame layout after register allocation: saved frame
// pointer and return address on top, used callee-saved registers below,
// then local stack slots ordered by slot id and spill slots, padded to
// the target stack alignment. Rewrites every abstract stack access into
// a frame-relative memory operand and freezes the frame.
//

use crate::arch::{FrameLayout, TargetMachine};
use crate::lir::{Function, LowLevelType, Module, Operand, OperandKind};

pub fn run(module: &mut Module, tm: &dyn TargetMachine) {
    for func in &mut module.functions {
        finalize_function(func, tm);
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    (value + align - 1) & !(align - 1)
}

fn finalize_function(func: &mut Function, tm: &dyn TargetMachine) {
    let reg_bytes = tm.pointer_size() / 8;
    // a function that calls must save the link register (and the frame
    // pointer alongside it)
    let save_fp_lr = func.has_call;
    let fp_lr_bytes = if save_fp_lr { 2 * reg_bytes } else { 0 };

    let callee_saves: Vec<u32> = func.used_callee_saved.clone();
    let callee_bytes: u32 = callee_saves
        .iter()
        .map(|&r| tm.reg_info().register_by_id(r).bits / 8)
        .sum();

    // locals walked downward from the top of their region, aligned per
    // slot; offsets are relative to the region top until the total is
    // known
    let mut rel_offsets: Vec<(u32, i32)> = Vec::new();
    let mut cursor: i32 = 0;
    for (&id, obj) in func.frame.iter() {
        cursor -= obj.size as i32;
        cursor -= cursor.rem_euclid(obj.align as i32);
        rel_offsets.push((id, cursor));
    }
    let locals_bytes = (-cursor) as u32;

    let total_size = align_up(fp_lr_bytes + callee_bytes + locals_bytes, tm.abi().stack_alignment);
    let has_frame = total_size > 0;

    // absolute offsets from the stack pointer after adjustment
    let locals_top = (total_size - fp_lr_bytes - callee_bytes) as i32;
    for (id, rel) in &rel_offsets {
        func.frame.set_offset(*id, locals_top + rel);
    }
    let mut cs_cursor = (total_size - fp_lr_bytes) as i32;
    let mut cs_offsets: Vec<(u32, i32)> = Vec::new();
    for &reg in &callee_saves {
        cs_cursor -= (tm.reg_info().register_by_id(reg).bits / 8) as i32;
        cs_offsets.push((reg, cs_cursor));
    }

    func.frame.total_size = total_size;

    let layout = FrameLayout {
        total_size,
        callee_saves: cs_offsets,
        save_fp_lr,
    };

    // rewrite stack accesses against the frame base
    let base = if save_fp_lr {
        tm.frame_reg()
    } else {
        tm.stack_reg()
    };
    let ptr = tm.pointer_size();
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            let is_mem_access = inst.is_load() || inst.is_store();
            let mut i = 0;
            while i < inst.operands.len() {
                if let OperandKind::StackAccess { slot, offset } = inst.operands[i].kind {
                    let frame_off = func
                        .frame
                        .offset_of(slot)
                        .unwrap_or_else(|| {
                            crate::ice!("frame", "stack slot {} has no frame offset", slot)
                        })
                        + offset;
                    if is_mem_access {
                        let llt = inst.operands[i].llt;
                        inst.operands[i] = Operand::mem(base, frame_off, ptr);
                        if llt.is_valid() {
                            inst.operands[i].llt = llt;
                        }
                    } else {
                        // address computations take the base register and
                        // the offset as separate operands
                        inst.operands[i] =
                            Operand::phys_reg(base, ptr).with_llt(LowLevelType::ptr(ptr));
                        inst.operands
                            .insert(i + 1, Operand::imm(frame_off as i64, 12));
                        i += 1;
                    }
                }
                i += 1;
            }
        }
    }

    if !has_frame {
        return;
    }

    // prologue at function entry
    let prologue = tm.build_prologue(&layout);
    if let Some(entry) = func.blocks.first_mut() {
        entry.insts.splice(0..0, prologue);
    }

    // epilogue before every return
    for block in &mut func.blocks {
        let mut i = 0;
        while i < block.insts.len() {
            if block.insts[i].is_return() {
                let epilogue = tm.build_epilogue(&layout);
                let count = epilogue.len();
                block.insts.splice(i..i, epilogue);
                i += count;
            }
            i += 1;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::create_target;
    use crate::lir::{BasicBlock, Inst, IS_RETURN};

    #[test]
    fn leaf_without_frame_gets_no_prologue() {
        let tm = create_target("aarch64").unwrap();
        let mut f = Function::new("add");
        let mut bb = BasicBlock::new("entry");
        let mut ret = Inst::target(crate::arch::aarch64::Op::Ret.code());
        ret.add_flag(IS_RETURN);
        bb.push(ret);
        f.blocks.push(bb);
        let mut module = Module {
            functions: vec![f],
            globals: vec![],
        };
        run(&mut module, tm.as_ref());
        let f = &module.functions[0];
        assert_eq!(f.frame.total_size, 0);
        assert_eq!(f.blocks[0].insts.len(), 1);
    }

    #[test]
    fn frame_size_is_stack_aligned() {
        let tm = create_target("aarch64").unwrap();
        let mut f = Function::new("f");
        f.insert_stack_slot(0, 4, 4);
        f.insert_stack_slot(1, 1, 1);
        f.has_call = true;
        let mut bb = BasicBlock::new("entry");
        let mut ret = Inst::target(crate::arch::aarch64::Op::Ret.code());
        ret.add_flag(IS_RETURN);
        bb.push(ret);
        f.blocks.push(bb);
        let mut module = Module {
            functions: vec![f],
            globals: vec![],
        };
        run(&mut module, tm.as_ref());
        let f = &module.functions[0];
        assert_eq!(f.frame.total_size % 16, 0);
        assert!(f.frame.total_size >= 16 + 5);
        // prologue landed in front, epilogue before the ret
        assert!(f.blocks[0].insts.len() > 1);
        assert!(f.blocks[0].insts.last().unwrap().is_return());
    }

    #[test]
    fn stack_accesses_become_memory_operands() {
        let tm = create_target("aarch64").unwrap();
        let mut f = Function::new("f");
        f.insert_stack_slot(0, 8, 8);
        f.has_call = true;
        let mut bb = BasicBlock::new("entry");
        let mut store = Inst::target(crate::arch::aarch64::Op::Str.code());
        store.add_flag(crate::lir::IS_STORE);
        store.add_operand(Operand::phys_reg(3, 64));
        store.add_operand(Operand::stack(0, 0));
        bb.push(store);
        let mut addr = Inst::target(crate::arch::aarch64::Op::AddRri.code());
        addr.add_operand(Operand::phys_reg(4, 64).with_llt(LowLevelType::ptr(64)));
        addr.add_operand(Operand::stack(0, 0));
        bb.push(addr);
        let mut ret = Inst::target(crate::arch::aarch64::Op::Ret.code());
        ret.add_flag(IS_RETURN);
        bb.push(ret);
        f.blocks.push(bb);
        let mut module = Module {
            functions: vec![f],
            globals: vec![],
        };
        run(&mut module, tm.as_ref());
        for block in &module.functions[0].blocks {
            for inst in &block.insts {
                for op in &inst.operands {
                    assert!(!op.is_stack_access(), "stack access survived: {:?}", op);
                }
            }
        }
        // the address add was split into base + immediate
        let f = &module.functions[0];
        let add = f
            .blocks[0]
            .insts
            .iter()
            .find(|i| i.opcode.target() == Some(crate::arch::aarch64::Op::AddRri.code()))
            .unwrap();
        assert_eq!(add.operands.len(), 3);
        assert_eq!(add.operand(1).unwrap().reg_id(), Some(tm.frame_reg()));
        assert!(add.operand(2).unwrap().is_int_imm());
    }

    #[test]
    fn riscv_frame_uses_word_saves() {
        let tm = create_target("riscv32").unwrap();
        let mut f = Function::new("f");
        f.insert_stack_slot(0, 4, 4);
        f.has_call = true;
        let mut bb = BasicBlock::new("entry");
        let mut ret = Inst::target(crate::arch::riscv32::Op::Ret.code());
        ret.add_flag(IS_RETURN);
        bb.push(ret);
        f.blocks.push(bb);
        let mut module = Module {
            functions: vec![f],
            globals: vec![],
        };
        run(&mut module, tm.as_ref());
        let f = &module.functions[0];
        assert_eq!(f.frame.total_size % 16, 0);
        // ra saved at total-4
        let first = &f.blocks[0].insts[0];
        assert_eq!(
            first.opcode.target(),
            Some(crate::arch::riscv32::Op::Addi.code())
        );
    }
}
