//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// LLIR optimizer
//
// Peephole cleanup on the still-SSA LLIR: propagate register-to-register
// and parameter copies, then drop the dead moves left behind. Runs
// before the legalizer when enabled by the driver.
//

use crate::lir::{GenericOpcode, Inst, Module, OperandKind};
use std::collections::HashMap;

pub fn run(module: &mut Module) {
    for func in &mut module.functions {
        // collect copies whose source is another vreg or a parameter;
        // SSA makes substitution safe
        let mut copies: HashMap<u32, OperandKind> = HashMap::new();
        for block in &func.blocks {
            for inst in &block.insts {
                if !is_copy(inst) {
                    continue;
                }
                if let (OperandKind::VirtReg(dst), src) =
                    (&inst.operands[0].kind, &inst.operands[1].kind)
                {
                    copies.insert(*dst, src.clone());
                }
            }
        }
        if copies.is_empty() {
            continue;
        }

        // resolve copy chains to their origin
        let resolve = |start: &OperandKind| -> OperandKind {
            let mut current = start.clone();
            let mut hops = 0;
            loop {
                let id = match current {
                    OperandKind::VirtReg(id) => id,
                    _ => break,
                };
                match copies.get(&id) {
                    Some(next) => current = next.clone(),
                    None => break,
                }
                hops += 1;
                if hops > copies.len() {
                    crate::ice!("opt", "copy chain cycle through vreg {}", id);
                }
            }
            current
        };

        for block in &mut func.blocks {
            // rewrite uses, then drop the now-dead copies
            for inst in &mut block.insts {
                let skip_def = if is_copy(inst) { 1 } else { 0 };
                for op in inst.operands.iter_mut().skip(skip_def) {
                    match &mut op.kind {
                        OperandKind::VirtReg(id) => {
                            if copies.contains_key(id) {
                                op.kind = resolve(&OperandKind::VirtReg(*id));
                            }
                        }
                        OperandKind::Mem { base, .. } => {
                            if copies.contains_key(base) {
                                match resolve(&OperandKind::VirtReg(*base)) {
                                    OperandKind::VirtReg(id) | OperandKind::Param(id) => {
                                        *base = id
                                    }
                                    _ => {}
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            block.insts.retain(|inst| {
                !(is_copy(inst)
                    && matches!(inst.operands[0].kind, OperandKind::VirtReg(d) if copies.contains_key(&d)))
            });
        }
    }
}

/// A propagatable copy: mov of a vreg or parameter into a vreg.
fn is_copy(inst: &Inst) -> bool {
    matches!(
        inst.opcode.generic(),
        Some(GenericOpcode::Mov) | Some(GenericOpcode::MovF)
    ) && inst.operands.len() == 2
        && matches!(inst.operands[0].kind, OperandKind::VirtReg(_))
        && matches!(
            inst.operands[1].kind,
            OperandKind::VirtReg(_) | OperandKind::Param(_)
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{BasicBlock, Function, LowLevelType, Operand};

    fn func_with(insts: Vec<Inst>) -> Module {
        let mut f = Function::new("f");
        let mut bb = BasicBlock::new("entry");
        bb.insts = insts;
        f.blocks.push(bb);
        Module {
            functions: vec![f],
            globals: vec![],
        }
    }

    #[test]
    fn propagates_and_removes_copies() {
        let mut module = func_with(vec![
            Inst::new(GenericOpcode::Mov)
                .with_operand(Operand::virt_reg(1, 32))
                .with_operand(Operand::virt_reg(0, 32)),
            Inst::new(GenericOpcode::Add)
                .with_operand(Operand::virt_reg(2, 32))
                .with_operand(Operand::virt_reg(1, 32))
                .with_operand(Operand::imm(3, 32)),
        ]);
        run(&mut module);
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].operand(1).unwrap().reg_id(), Some(0));
    }

    #[test]
    fn resolves_copy_chains() {
        let mut module = func_with(vec![
            Inst::new(GenericOpcode::Mov)
                .with_operand(Operand::virt_reg(1, 32))
                .with_operand(Operand::virt_reg(0, 32)),
            Inst::new(GenericOpcode::Mov)
                .with_operand(Operand::virt_reg(2, 32))
                .with_operand(Operand::virt_reg(1, 32)),
            Inst::new(GenericOpcode::Add)
                .with_operand(Operand::virt_reg(3, 32))
                .with_operand(Operand::virt_reg(2, 32))
                .with_operand(Operand::imm(1, 32)),
        ]);
        run(&mut module);
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].operand(1).unwrap().reg_id(), Some(0));
    }

    #[test]
    fn propagates_parameter_copies() {
        let mut module = func_with(vec![
            Inst::new(GenericOpcode::Mov)
                .with_operand(Operand::virt_reg(5, 64))
                .with_operand(Operand::param(0, LowLevelType::ptr(64))),
            Inst::new(GenericOpcode::Load)
                .with_operand(Operand::virt_reg(6, 64))
                .with_operand(Operand::mem(5, 0, 64)),
        ]);
        run(&mut module);
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(insts.len(), 1);
        match insts[0].operand(1).unwrap().kind {
            OperandKind::Mem { base, .. } => assert_eq!(base, 0),
            ref other => panic!("expected a memory operand, got {:?}", other),
        }
    }

    #[test]
    fn leaves_physical_copies_alone() {
        let mut module = func_with(vec![Inst::new(GenericOpcode::Mov)
            .with_operand(Operand::phys_reg(0, 64))
            .with_operand(Operand::virt_reg(4, 64))]);
        run(&mut module);
        assert_eq!(module.functions[0].blocks[0].insts.len(), 1);
    }

    #[test]
    fn leaves_immediate_moves_alone() {
        let mut module = func_with(vec![Inst::new(GenericOpcode::Mov)
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::imm(7, 32))]);
        run(&mut module);
        assert_eq!(module.functions[0].blocks[0].insts.len(), 1);
    }
}
