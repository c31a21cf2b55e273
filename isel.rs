//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Instruction selection driver
//
// Walks every block and hands each generic instruction to the target's
// selector, threading the compare/branch pairing so flag-based targets
// can fold the comparison into the branch.
//

use crate::arch::{SelCtx, TargetMachine};
use crate::lir::{GenericOpcode, Module, OperandKind, Relation};

pub fn run(module: &mut Module, tm: &dyn TargetMachine) {
    for func in &mut module.functions {
        let mut blocks = std::mem::take(&mut func.blocks);

        for block in &mut blocks {
            let insts = std::mem::take(&mut block.insts);

            // pairing info per original instruction index
            let mut pairings = Vec::with_capacity(insts.len());
            for (i, inst) in insts.iter().enumerate() {
                let prev_cmp = if i > 0 {
                    cmp_def(&insts[i - 1])
                } else {
                    None
                };
                let next_consumes = match cmp_def(inst) {
                    Some((def, _)) => insts
                        .get(i + 1)
                        .map(|next| branch_consumes(next, def))
                        .unwrap_or(false),
                    None => false,
                };
                pairings.push((prev_cmp, next_consumes));
            }

            let mut out = Vec::with_capacity(insts.len());
            for (inst, (prev_cmp, next_consumes_flags)) in
                insts.into_iter().zip(pairings)
            {
                let (next_vreg, frame) = func.sel_parts();
                let mut ctx = SelCtx {
                    next_vreg,
                    frame,
                    prev_cmp,
                    next_consumes_flags,
                };
                out.extend(tm.select_instruction(inst, &mut ctx));
            }
            block.insts = out;
        }

        func.blocks = blocks;
    }
}

/// (defined vreg, relation) of a CMP/CMPF instruction.
fn cmp_def(inst: &crate::lir::Inst) -> Option<(u32, Relation)> {
    match inst.opcode.generic() {
        Some(GenericOpcode::Cmp) | Some(GenericOpcode::CmpF) => {
            match inst.operands.first().map(|o| &o.kind) {
                Some(OperandKind::VirtReg(id)) => Some((*id, inst.relation)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn branch_consumes(inst: &crate::lir::Inst, def: u32) -> bool {
    inst.opcode.generic() == Some(GenericOpcode::Branch)
        && matches!(
            inst.operands.first().map(|o| &o.kind),
            Some(OperandKind::VirtReg(id)) if *id == def
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::create_target;
    use crate::lir::{BasicBlock, Function, Inst, Operand};

    #[test]
    fn selects_whole_blocks_to_target_opcodes() {
        let tm = create_target("aarch64").unwrap();
        let mut f = Function::new("f");
        for _ in 0..8 {
            f.new_vreg();
        }
        let mut bb = BasicBlock::new("entry");
        bb.insts = vec![
            Inst::new(GenericOpcode::Cmp)
                .with_operand(Operand::virt_reg(2, 32))
                .with_operand(Operand::virt_reg(0, 32))
                .with_operand(Operand::imm(0, 32))
                .with_relation(Relation::Ne),
            Inst::new(GenericOpcode::Branch)
                .with_operand(Operand::virt_reg(2, 32))
                .with_operand(Operand::label("body")),
            Inst::new(GenericOpcode::Ret),
        ];
        f.blocks.push(bb);
        let mut module = Module {
            functions: vec![f],
            globals: vec![],
        };
        run(&mut module, tm.as_ref());
        let insts = &module.functions[0].blocks[0].insts;
        // cmp (flags), b.ne, ret: the paired compare drops its destination
        assert_eq!(insts.len(), 3);
        assert!(insts.iter().all(|i| i.opcode.target().is_some()));
        assert_eq!(insts[0].operands.len(), 2);
        assert_eq!(insts[1].operands.len(), 1);
    }
}
