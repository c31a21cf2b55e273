//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Register allocator
//
// Linear scan over per-virtual-register live intervals. Parameters
// prefer their argument registers and values feeding returns prefer the
// return registers; intervals crossing a call are restricted to
// callee-saved registers; spills rewrite through reserved scratch
// registers. Sub-register aliasing is honored by allocating root
// registers only. Instruction positions are doubled so a definition can
// reuse a register whose last use is the same instruction.
//

use crate::arch::{RegClass, TargetMachine};
use crate::lir::{Function, Inst, Module, Operand, OperandKind};
use std::collections::{HashMap, HashSet};

pub fn run(module: &mut Module, tm: &dyn TargetMachine) {
    for func in &mut module.functions {
        allocate_function(func, tm);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Loc {
    Reg(u32),
    Slot(u32),
}

#[derive(Debug, Clone)]
struct Interval {
    vreg: u32,
    start: usize,
    end: usize,
}

struct ParamBinding {
    vreg: u32,
    arg_reg: u32,
    bits: u32,
    is_fp: bool,
    is_pointer: bool,
}

fn has_def(inst: &Inst, tm: &dyn TargetMachine) -> bool {
    match inst.opcode {
        crate::lir::Opcode::Generic(g) => g.has_def(),
        crate::lir::Opcode::Target(t) => tm.instr_def(t).has_def,
    }
}

fn allocate_function(func: &mut Function, tm: &dyn TargetMachine) {
    let abi = tm.abi();
    let reg_info = tm.reg_info();

    // ------------------------------------------------------------------
    // Bind parameters to argument registers and retire Param operands
    // ------------------------------------------------------------------
    let mut bindings: Vec<ParamBinding> = Vec::new();
    let mut gpr_idx = 0usize;
    let mut fp_idx = 0usize;
    for p in &func.params {
        let arg_reg = if p.is_struct_ptr {
            abi.struct_ptr_reg
        } else if p.is_fp {
            let reg = abi.arg_regs[abi.first_fp_arg_idx + fp_idx];
            fp_idx += 1;
            reg
        } else {
            let reg = abi.arg_regs[gpr_idx];
            gpr_idx += 1;
            reg
        };
        bindings.push(ParamBinding {
            vreg: p.id,
            arg_reg,
            bits: p.llt.bits(),
            is_fp: p.is_fp,
            is_pointer: p.llt.is_pointer(),
        });
    }

    for block in &mut func.blocks {
        for inst in &mut block.insts {
            for op in &mut inst.operands {
                if let OperandKind::Param(id) = op.kind {
                    op.kind = OperandKind::VirtReg(id);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Per-vreg class information
    // ------------------------------------------------------------------
    let mut classes: HashMap<u32, RegClass> = HashMap::new();
    for b in &bindings {
        classes.insert(b.vreg, tm.register_class(b.bits.max(32), b.is_fp));
    }
    for block in &func.blocks {
        for inst in &block.insts {
            for op in &inst.operands {
                if let OperandKind::VirtReg(id) = op.kind {
                    if let Some(class) = op.reg_class {
                        classes.entry(id).or_insert_with(|| RegClass::from_id(class));
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Live intervals (positions doubled: use at 2i, def at 2i+1)
    // ------------------------------------------------------------------
    struct Info {
        first_def: usize,
        last_def: usize,
        last_use: usize,
    }
    let mut infos: HashMap<u32, Info> = HashMap::new();
    for b in &bindings {
        infos.insert(
            b.vreg,
            Info {
                first_def: 0,
                last_def: 0,
                last_use: 0,
            },
        );
    }

    let mut block_bounds: Vec<(usize, usize)> = Vec::new();
    let mut call_positions: Vec<usize> = Vec::new();
    // (position, clobbered root, vregs involved in the instruction)
    let mut constraints: Vec<(usize, u32, Vec<u32>)> = Vec::new();

    let mut idx = 0usize;
    for block in &func.blocks {
        let start = idx * 2;
        for inst in &block.insts {
            let use_pos = idx * 2;
            let def_pos = idx * 2 + 1;
            let defines = has_def(inst, tm);

            if inst.is_call() {
                call_positions.push(use_pos);
            }

            let mut involved: Vec<u32> = Vec::new();
            for (oi, op) in inst.operands.iter().enumerate() {
                match &op.kind {
                    OperandKind::VirtReg(id) => {
                        involved.push(*id);
                        if oi == 0 && defines {
                            let info = infos.entry(*id).or_insert(Info {
                                first_def: def_pos,
                                last_def: def_pos,
                                last_use: def_pos,
                            });
                            info.first_def = info.first_def.min(def_pos);
                            info.last_def = info.last_def.max(def_pos);
                        } else {
                            let info = infos.entry(*id).or_insert(Info {
                                first_def: use_pos,
                                last_def: use_pos,
                                last_use: use_pos,
                            });
                            info.last_use = info.last_use.max(use_pos);
                        }
                    }
                    OperandKind::Mem { base, .. } => {
                        involved.push(*base);
                        let info = infos.entry(*base).or_insert(Info {
                            first_def: use_pos,
                            last_def: use_pos,
                            last_use: use_pos,
                        });
                        info.last_use = info.last_use.max(use_pos);
                    }
                    _ => {}
                }
            }

            // instructions writing a physical register constrain every
            // unrelated interval live at this point
            if defines {
                if let Some(OperandKind::PhysReg(id)) =
                    inst.operands.first().map(|o| &o.kind)
                {
                    constraints.push((def_pos, reg_info.root_register(*id), involved));
                }
            }

            idx += 1;
        }
        block_bounds.push((start, idx.saturating_mul(2).saturating_sub(1)));
    }
    let max_pos = idx * 2 + 1;

    // loop back edges extend intervals across the loop body
    let block_index: HashMap<&str, usize> = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.name.as_str(), i))
        .collect();
    for (bi, block) in func.blocks.iter().enumerate() {
        for inst in &block.insts {
            for op in &inst.operands {
                if let OperandKind::Label(target) = &op.kind {
                    if let Some(&ti) = block_index.get(target.as_str()) {
                        if ti <= bi {
                            let loop_start = block_bounds[ti].0;
                            let back_edge = block_bounds[bi].1;
                            for info in infos.values_mut() {
                                if info.first_def < loop_start
                                    && info.last_use >= loop_start
                                    && info.last_use <= back_edge
                                {
                                    info.last_use = back_edge;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    let mut intervals: Vec<Interval> = infos
        .into_iter()
        .map(|(vreg, info)| {
            let end = if info.last_def > info.last_use {
                max_pos
            } else {
                info.last_def.max(info.last_use)
            };
            Interval {
                vreg,
                start: info.first_def,
                end,
            }
        })
        .collect();
    intervals.sort_by_key(|i| (i.start, i.vreg));

    // ------------------------------------------------------------------
    // Preferences: argument registers for parameters, return registers
    // for values feeding returns
    // ------------------------------------------------------------------
    let mut prefs: HashMap<u32, u32> = HashMap::new();
    for b in &bindings {
        prefs.insert(b.vreg, reg_info.root_register(b.arg_reg));
    }
    for block in &func.blocks {
        for inst in &block.insts {
            if inst.is_return() {
                if let Some(OperandKind::VirtReg(id)) =
                    inst.operands.first().map(|o| &o.kind)
                {
                    let is_fp = classes
                        .get(id)
                        .map(|c| c.is_fp())
                        .unwrap_or(false);
                    let ret = if is_fp {
                        abi.ret_regs[abi.first_fp_ret_idx]
                    } else {
                        abi.ret_regs[0]
                    };
                    prefs.entry(*id).or_insert(reg_info.root_register(ret));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Linear scan
    // ------------------------------------------------------------------
    let mut free_gpr: Vec<u32> = tm.allocatable_regs(RegClass::Gpr64).to_vec();
    let mut free_fpr: Vec<u32> = tm.allocatable_regs(RegClass::Fpr64).to_vec();
    let mut active: Vec<(Interval, u32, bool)> = Vec::new();
    let mut locations: HashMap<u32, Loc> = HashMap::new();

    let crosses_call = |iv: &Interval| {
        call_positions
            .iter()
            .any(|&cp| iv.start <= cp && cp <= iv.end)
    };
    let conflicting = |iv: &Interval, constraints: &[(usize, u32, Vec<u32>)]| {
        let mut set = HashSet::new();
        for (pos, clobber, involved) in constraints {
            if iv.start <= *pos && *pos <= iv.end && !involved.contains(&iv.vreg) {
                set.insert(*clobber);
            }
        }
        set
    };

    for interval in intervals {
        // expire finished intervals back into the free pools
        let mut i = 0;
        while i < active.len() {
            if active[i].0.end < interval.start {
                let (_, reg, fp) = active.remove(i);
                if fp {
                    free_fpr.push(reg);
                } else {
                    free_gpr.push(reg);
                }
            } else {
                i += 1;
            }
        }

        if locations.contains_key(&interval.vreg) {
            continue;
        }
        let class = classes
            .get(&interval.vreg)
            .copied()
            .unwrap_or(tm.register_class(tm.pointer_size(), false));
        let is_fp = class.is_fp();
        let crosses = crosses_call(&interval);
        let conflicts = conflicting(&interval, &constraints);
        let pool = if is_fp { &mut free_fpr } else { &mut free_gpr };

        let allowed = |reg: u32| -> bool {
            let callee = reg_info.register_by_id(reg).callee_saved;
            (!crosses || callee) && !conflicts.contains(&reg)
        };

        // preferred register first, then the free pool from the back
        // (callee-saved end)
        let mut chosen: Option<u32> = None;
        if let Some(&pref) = prefs.get(&interval.vreg) {
            if let Some(pos) = pool.iter().position(|&r| r == pref) {
                if allowed(pref) {
                    pool.remove(pos);
                    chosen = Some(pref);
                }
            }
        }
        if chosen.is_none() {
            if let Some(pos) = pool.iter().rposition(|&r| allowed(r)) {
                chosen = Some(pool.remove(pos));
            }
        }

        match chosen {
            Some(reg) => {
                if reg_info.register_by_id(reg).callee_saved {
                    func.mark_used_callee_saved(reg);
                }
                locations.insert(interval.vreg, Loc::Reg(reg));
                active.push((interval, reg, is_fp));
                active.sort_by_key(|(iv, _, _)| iv.end);
            }
            None => {
                // spill the farthest-ending active interval of this pool,
                // or the current one if it reaches further
                let victim: Option<(usize, usize, u32)> = active
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, _, fp))| *fp == is_fp)
                    .max_by_key(|(_, (iv, _, _))| iv.end)
                    .map(|(i, (iv, reg, _))| (i, iv.end, *reg));

                let steal = match victim {
                    Some((_, victim_end, victim_reg)) => {
                        victim_end > interval.end && allowed(victim_reg)
                    }
                    None => false,
                };

                if !steal {
                    let slot = new_spill_slot(func, class);
                    locations.insert(interval.vreg, Loc::Slot(slot));
                } else {
                    let (vi, _, _) = victim.unwrap();
                    let (victim_iv, reg, _) = active.remove(vi);
                    let victim_class = classes
                        .get(&victim_iv.vreg)
                        .copied()
                        .unwrap_or(tm.register_class(tm.pointer_size(), false));
                    let slot = new_spill_slot(func, victim_class);
                    locations.insert(victim_iv.vreg, Loc::Slot(slot));
                    locations.insert(interval.vreg, Loc::Reg(reg));
                    if reg_info.register_by_id(reg).callee_saved {
                        func.mark_used_callee_saved(reg);
                    }
                    active.push((interval, reg, is_fp));
                    active.sort_by_key(|(iv, _, _)| iv.end);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Entry fixups: parameters not living in their argument register
    // ------------------------------------------------------------------
    let mut entry_fixups: Vec<Inst> = Vec::new();
    for b in &bindings {
        let arg_root = reg_info.root_register(b.arg_reg);
        match locations.get(&b.vreg) {
            Some(Loc::Reg(r)) if *r != arg_root => {
                let mut src = Operand::phys_reg(arg_root, b.bits);
                if b.is_pointer {
                    src.llt = crate::lir::LowLevelType::ptr(b.bits);
                }
                entry_fixups.push(tm.build_reg_copy(*r, &src, b.bits, b.is_fp));
            }
            Some(Loc::Slot(slot)) => {
                entry_fixups.push(tm.build_spill_store(*slot, arg_root, b.bits, b.is_fp));
            }
            _ => {}
        }
    }
    if !entry_fixups.is_empty() {
        if let Some(entry) = func.blocks.first_mut() {
            entry.insts.splice(0..0, entry_fixups);
        }
    }

    // ------------------------------------------------------------------
    // Rewrite pass: retire virtual registers, spill through scratch regs
    // ------------------------------------------------------------------
    let (s0, s1) = tm.scratch_regs();
    let (fs0, fs1) = tm.fp_scratch_regs();
    let ret_gpr = reg_info.root_register(abi.ret_regs[0]);
    let ret_fpr = reg_info.root_register(abi.ret_regs[abi.first_fp_ret_idx]);

    let mut blocks = std::mem::take(&mut func.blocks);
    for block in &mut blocks {
        let insts = std::mem::take(&mut block.insts);
        let mut out = Vec::with_capacity(insts.len());

        for mut inst in insts {
            // returns: make sure the value sits in the return register,
            // then drop the operand
            if inst.is_return() {
                if let Some(op) = inst.operands.first().cloned() {
                    if let OperandKind::VirtReg(id) = op.kind {
                        let is_fp = classes.get(&id).map(|c| c.is_fp()).unwrap_or(false);
                        let expected = if is_fp { ret_fpr } else { ret_gpr };
                        match locations.get(&id) {
                            Some(Loc::Reg(r)) if *r != expected => {
                                let src = Operand::phys_reg(*r, op.bits());
                                out.push(tm.build_reg_copy(expected, &src, op.bits(), is_fp));
                            }
                            Some(Loc::Slot(slot)) => {
                                out.push(tm.build_spill_reload(
                                    *slot,
                                    expected,
                                    op.bits(),
                                    is_fp,
                                ));
                            }
                            _ => {}
                        }
                    }
                }
                inst.operands.clear();
                out.push(inst);
                continue;
            }

            let defines = has_def(&inst, tm);
            let def_reads = inst
                .opcode
                .target()
                .map(|t| tm.def_reads(t))
                .unwrap_or(false);
            let mut pre: Vec<Inst> = Vec::new();
            let mut post: Vec<Inst> = Vec::new();
            let mut gpr_scratch = 0usize;
            let mut fpr_scratch = 0usize;

            for (oi, op) in inst.operands.iter_mut().enumerate() {
                match &mut op.kind {
                    OperandKind::VirtReg(id) => {
                        let vreg = *id;
                        let is_fp = classes.get(&vreg).map(|c| c.is_fp()).unwrap_or(false);
                        match locations.get(&vreg) {
                            Some(Loc::Reg(r)) => {
                                op.kind = OperandKind::PhysReg(*r);
                            }
                            Some(Loc::Slot(slot)) => {
                                let slot = *slot;
                                let bits = func_slot_bits(&func.frame, slot);
                                let is_def = oi == 0 && defines;
                                let scratch = if is_def {
                                    if is_fp {
                                        fs0
                                    } else {
                                        s0
                                    }
                                } else if is_fp {
                                    let r = [fs0, fs1][fpr_scratch.min(1)];
                                    fpr_scratch += 1;
                                    r
                                } else {
                                    let r = [s0, s1][gpr_scratch.min(1)];
                                    gpr_scratch += 1;
                                    r
                                };
                                if !is_def || def_reads {
                                    pre.push(tm.build_spill_reload(slot, scratch, bits, is_fp));
                                }
                                if is_def {
                                    post.push(tm.build_spill_store(slot, scratch, bits, is_fp));
                                }
                                op.kind = OperandKind::PhysReg(scratch);
                            }
                            None => {
                                crate::ice!(
                                    "regalloc",
                                    "virtual register {} has no location",
                                    vreg
                                )
                            }
                        }
                    }
                    OperandKind::Mem { base, .. } => {
                        if let Some(loc) = locations.get(base) {
                            match loc {
                                Loc::Reg(r) => *base = *r,
                                Loc::Slot(slot) => {
                                    let slot = *slot;
                                    let bits = func_slot_bits(&func.frame, slot);
                                    let scratch = [s0, s1][gpr_scratch.min(1)];
                                    gpr_scratch += 1;
                                    pre.push(tm.build_spill_reload(slot, scratch, bits, false));
                                    *base = scratch;
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }

            out.extend(pre);
            out.push(inst);
            out.extend(post);
        }

        block.insts = out;
    }
    func.blocks = blocks;
}

fn new_spill_slot(func: &mut Function, class: RegClass) -> u32 {
    let bytes = match class {
        RegClass::Gpr32 | RegClass::Fpr32 => 4,
        RegClass::Gpr64 | RegClass::Fpr64 => 8,
    };
    let slot = func.new_vreg();
    func.insert_stack_slot(slot, bytes, bytes);
    slot
}

fn func_slot_bits(frame: &crate::lir::StackFrame, slot: u32) -> u32 {
    frame.size_of(slot).map(|s| s * 8).unwrap_or(32)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::create_target;
    use crate::lir::{BasicBlock, GenericOpcode, LowLevelType};

    /// int add(int a, int b) { return a + b; } after selection
    fn add_func() -> Function {
        let mut f = Function::new("add");
        f.add_param(0, LowLevelType::scalar(32), false, false);
        f.add_param(1, LowLevelType::scalar(32), false, false);
        let mut bb = BasicBlock::new("entry");
        let mut add = Inst::target(crate::arch::aarch64::Op::AddRrr.code());
        let mut d = Operand::virt_reg(2, 32);
        d.reg_class = Some(RegClass::Gpr32.id());
        let mut a = Operand::param(0, LowLevelType::scalar(32));
        a.reg_class = Some(RegClass::Gpr32.id());
        let mut b = Operand::param(1, LowLevelType::scalar(32));
        b.reg_class = Some(RegClass::Gpr32.id());
        add.add_operand(d);
        add.add_operand(a);
        add.add_operand(b);
        bb.push(add);
        let mut ret = Inst::target(crate::arch::aarch64::Op::Ret.code());
        ret.add_flag(crate::lir::IS_RETURN);
        let mut rv = Operand::virt_reg(2, 32);
        rv.reg_class = Some(RegClass::Gpr32.id());
        ret.add_operand(rv);
        bb.push(ret);
        f.blocks.push(bb);
        f
    }

    #[test]
    fn params_and_result_land_in_abi_registers() {
        let tm = create_target("aarch64").unwrap();
        let mut module = Module {
            functions: vec![add_func()],
            globals: vec![],
        };
        run(&mut module, tm.as_ref());
        let insts = &module.functions[0].blocks[0].insts;
        // add x0, x0, x1 (w-naming happens in the late fix-up pass)
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].operand(0).unwrap().reg_id(), Some(0));
        assert_eq!(insts[0].operand(1).unwrap().reg_id(), Some(0));
        assert_eq!(insts[0].operand(2).unwrap().reg_id(), Some(1));
        // the return operand is retired
        assert!(insts[1].operands.is_empty());
        // leaf function: nothing callee-saved
        assert!(module.functions[0].used_callee_saved.is_empty());
    }

    #[test]
    fn no_virtual_registers_remain() {
        let tm = create_target("aarch64").unwrap();
        let mut module = Module {
            functions: vec![add_func()],
            globals: vec![],
        };
        run(&mut module, tm.as_ref());
        for f in &module.functions {
            for b in &f.blocks {
                for inst in &b.insts {
                    for op in &inst.operands {
                        assert!(
                            !op.is_virt_reg() && !op.is_param(),
                            "unallocated operand {:?}",
                            op
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn call_crossing_values_avoid_caller_saved() {
        let tm = create_target("aarch64").unwrap();
        let mut f = Function::new("f");
        let mut bb = BasicBlock::new("entry");
        // %5 = mov 7 ; call g ; %6 = add %5, 1 ; ret %6
        let mut mov = Inst::target(crate::arch::aarch64::Op::MovRc.code());
        let mut d5 = Operand::virt_reg(5, 32);
        d5.reg_class = Some(RegClass::Gpr32.id());
        mov.add_operand(d5.clone());
        mov.add_operand(Operand::imm(7, 16));
        bb.push(mov);
        let mut call = Inst::target(crate::arch::aarch64::Op::Bl.code());
        call.add_flag(crate::lir::IS_CALL);
        call.add_operand(Operand::func_name("g"));
        bb.push(call);
        let mut add = Inst::target(crate::arch::aarch64::Op::AddRri.code());
        let mut d6 = Operand::virt_reg(6, 32);
        d6.reg_class = Some(RegClass::Gpr32.id());
        add.add_operand(d6.clone());
        add.add_operand(d5);
        add.add_operand(Operand::imm(1, 12));
        bb.push(add);
        let mut ret = Inst::target(crate::arch::aarch64::Op::Ret.code());
        ret.add_flag(crate::lir::IS_RETURN);
        bb.push(ret);
        f.blocks.push(bb);
        // ids 5/6 already used above
        while f.next_vreg() < 7 {
            f.new_vreg();
        }
        f.has_call = true;
        let mut module = Module {
            functions: vec![f],
            globals: vec![],
        };
        run(&mut module, tm.as_ref());
        let f = &module.functions[0];
        let mov = &f.blocks[0].insts[0];
        let reg = mov.operand(0).unwrap().reg_id().unwrap();
        assert!(
            tm.reg_info().register_by_id(reg).callee_saved,
            "value live across the call must sit in a callee-saved register"
        );
        assert!(f.used_callee_saved.contains(&reg));
    }
}
