//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Register-class selection
//
// Derives a target register class for every virtual register from its
// defining width and FP-ness, and stamps it on all operands referencing
// the register. FP-ness comes from FP opcodes, FP immediates flowing
// through moves, and use positions in FP instructions.
//

use crate::arch::TargetMachine;
use crate::lir::{GenericOpcode, Module, OperandKind};
use std::collections::{HashMap, HashSet};

pub fn run(module: &mut Module, tm: &dyn TargetMachine) {
    for func in &mut module.functions {
        let mut widths: HashMap<u32, u32> = HashMap::new();
        let mut pointers: HashSet<u32> = HashSet::new();
        let mut fp: HashSet<u32> = HashSet::new();

        // defining widths and directly FP-producing opcodes
        for block in &func.blocks {
            for inst in &block.insts {
                let has_def = match inst.opcode {
                    crate::lir::Opcode::Generic(g) => g.has_def(),
                    crate::lir::Opcode::Target(t) => tm.instr_def(t).has_def,
                };
                if has_def {
                    if let Some(OperandKind::VirtReg(id)) =
                        inst.operands.first().map(|o| &o.kind)
                    {
                        let op = &inst.operands[0];
                        widths.insert(*id, op.bits().max(tm.min_reg_width()));
                        if op.llt.is_pointer() {
                            pointers.insert(*id);
                        }
                        if is_fp_def(inst) {
                            fp.insert(*id);
                        }
                    }
                }
                // FP use positions mark their registers too
                if is_fp_consumer(inst) {
                    for op in inst.operands.iter().skip(1) {
                        if let OperandKind::VirtReg(id) = op.kind {
                            fp.insert(id);
                        }
                    }
                }
            }
        }

        // propagate FP-ness through plain moves (both directions converge
        // after one extra sweep)
        for _ in 0..2 {
            for block in &func.blocks {
                for inst in &block.insts {
                    if inst.opcode.generic() != Some(GenericOpcode::Mov) {
                        continue;
                    }
                    if let (
                        Some(OperandKind::VirtReg(dst)),
                        Some(OperandKind::VirtReg(src)),
                    ) = (
                        inst.operands.first().map(|o| &o.kind),
                        inst.operands.get(1).map(|o| &o.kind),
                    ) {
                        if fp.contains(src) {
                            fp.insert(*dst);
                        }
                    }
                }
            }
        }

        // stamp the class on every operand of each register
        for block in &mut func.blocks {
            for inst in &mut block.insts {
                for op in &mut inst.operands {
                    if let OperandKind::VirtReg(id) = op.kind {
                        if op.reg_class.is_some() {
                            continue;
                        }
                        let bits = if pointers.contains(&id) {
                            tm.pointer_size()
                        } else {
                            widths
                                .get(&id)
                                .copied()
                                .unwrap_or_else(|| op.bits().max(tm.min_reg_width()))
                        };
                        let class = tm.register_class(bits, fp.contains(&id));
                        op.reg_class = Some(class.id());
                    }
                }
            }
        }
    }
}

fn is_fp_def(inst: &crate::lir::Inst) -> bool {
    match inst.opcode.generic() {
        Some(
            GenericOpcode::AddF
            | GenericOpcode::SubF
            | GenericOpcode::MulF
            | GenericOpcode::DivF
            | GenericOpcode::MovF
            | GenericOpcode::IToF,
        ) => true,
        Some(GenericOpcode::Mov) => matches!(
            inst.operands.get(1).map(|o| &o.kind),
            Some(OperandKind::FpImm(_))
        ),
        _ => false,
    }
}

fn is_fp_consumer(inst: &crate::lir::Inst) -> bool {
    matches!(
        inst.opcode.generic(),
        Some(
            GenericOpcode::AddF
                | GenericOpcode::SubF
                | GenericOpcode::MulF
                | GenericOpcode::DivF
                | GenericOpcode::CmpF
                | GenericOpcode::FToI
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{create_target, RegClass};
    use crate::lir::{BasicBlock, Function, Inst, Operand};

    fn module_with(insts: Vec<Inst>) -> Module {
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
    fn integer_widths_pick_gpr_classes() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![
            Inst::new(GenericOpcode::Add)
                .with_operand(Operand::virt_reg(0, 32))
                .with_operand(Operand::virt_reg(1, 32))
                .with_operand(Operand::virt_reg(2, 32)),
            Inst::new(GenericOpcode::Add)
                .with_operand(Operand::virt_reg(3, 64))
                .with_operand(Operand::virt_reg(0, 32))
                .with_operand(Operand::virt_reg(1, 32)),
        ]);
        run(&mut module, tm.as_ref());
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(
            insts[0].operand(0).unwrap().reg_class,
            Some(RegClass::Gpr32.id())
        );
        assert_eq!(
            insts[1].operand(0).unwrap().reg_class,
            Some(RegClass::Gpr64.id())
        );
    }

    #[test]
    fn fp_ops_pick_fpr_classes() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![Inst::new(GenericOpcode::AddF)
            .with_operand(Operand::virt_reg(0, 64))
            .with_operand(Operand::virt_reg(1, 64))
            .with_operand(Operand::virt_reg(2, 64))]);
        run(&mut module, tm.as_ref());
        let inst = &module.functions[0].blocks[0].insts[0];
        assert_eq!(
            inst.operand(0).unwrap().reg_class,
            Some(RegClass::Fpr64.id())
        );
        // sources used by an FP op are FP registers as well
        assert_eq!(
            inst.operand(1).unwrap().reg_class,
            Some(RegClass::Fpr64.id())
        );
    }

    #[test]
    fn fpness_propagates_through_moves() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![
            Inst::new(GenericOpcode::Mov)
                .with_operand(Operand::virt_reg(1, 64))
                .with_operand(Operand::fp_imm(1.5, 64)),
            Inst::new(GenericOpcode::Mov)
                .with_operand(Operand::virt_reg(2, 64))
                .with_operand(Operand::virt_reg(1, 64)),
        ]);
        run(&mut module, tm.as_ref());
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(
            insts[1].operand(0).unwrap().reg_class,
            Some(RegClass::Fpr64.id())
        );
    }

    #[test]
    fn pointer_defs_use_pointer_width() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![Inst::new(GenericOpcode::StackAddress)
            .with_operand(Operand::virt_reg_ptr(0, 64))
            .with_operand(Operand::stack(3, 0))]);
        run(&mut module, tm.as_ref());
        let inst = &module.functions[0].blocks[0].insts[0];
        assert_eq!(
            inst.operand(0).unwrap().reg_class,
            Some(RegClass::Gpr64.id())
        );
    }
}
