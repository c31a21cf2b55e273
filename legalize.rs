//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Machine instruction legalizer
//
// Rewrites operations the target cannot express: widens sub-minimum
// definitions, materializes immediates that overflow an opcode's
// immediate field, expands MOD/MODU on targets without a modulo
// instruction, and normalizes compare-then-branch adjacency for the
// selector. Running the pass twice leaves the module unchanged.
//

use crate::arch::TargetMachine;
use crate::lir::{Function, GenericOpcode, Inst, Module, Operand, OperandKind};

pub fn run(module: &mut Module, tm: &dyn TargetMachine) {
    for func in &mut module.functions {
        legalize_function(func, tm);
    }
}

fn legalize_function(func: &mut Function, tm: &dyn TargetMachine) {
    let mut blocks = std::mem::take(&mut func.blocks);

    for block in &mut blocks {
        let insts = std::mem::take(&mut block.insts);
        let mut out = Vec::with_capacity(insts.len());

        for mut inst in insts {
            let opcode = match inst.opcode.generic() {
                Some(g) => g,
                None => {
                    out.push(inst);
                    continue;
                }
            };

            widen_def(&mut inst, opcode, tm);

            if matches!(opcode, GenericOpcode::Mod | GenericOpcode::ModU) && !tm.has_modulo() {
                expand_modulo(inst, opcode, func, tm, &mut out);
                continue;
            }

            legalize_immediates(&mut inst, opcode, func, tm, &mut out);
            out.push(inst);
        }

        block.insts = out;
        normalize_cmp_branch(block);
    }

    func.blocks = blocks;
}

/// Widen sub-minimum scalar definitions. Loads and truncations keep their
/// narrow widths: the selector reads them to pick sized opcodes, and the
/// late sub-register pass finalizes the naming.
fn widen_def(inst: &mut Inst, opcode: GenericOpcode, tm: &dyn TargetMachine) {
    let widens = matches!(
        opcode,
        GenericOpcode::And
            | GenericOpcode::Or
            | GenericOpcode::Xor
            | GenericOpcode::Lsl
            | GenericOpcode::Lsr
            | GenericOpcode::Add
            | GenericOpcode::Sub
            | GenericOpcode::Mul
            | GenericOpcode::Div
            | GenericOpcode::DivU
            | GenericOpcode::Mod
            | GenericOpcode::ModU
            | GenericOpcode::Cmp
            | GenericOpcode::CmpF
            | GenericOpcode::Mov
    );
    if !widens {
        return;
    }
    let min = tm.min_reg_width();
    if let Some(def) = inst.def_mut() {
        if def.llt.is_valid() && !def.llt.is_pointer() && def.bits() < min {
            def.set_bits(min);
        }
    }
}

/// MOD/MODU on a target without a modulo instruction becomes
/// DIV + MUL + SUB (the MSUB-equivalent sequence).
fn expand_modulo(
    inst: Inst,
    opcode: GenericOpcode,
    func: &mut Function,
    tm: &dyn TargetMachine,
    out: &mut Vec<Inst>,
) {
    let dst = inst.operands[0].clone();
    let lhs = inst.operands[1].clone();
    let rhs = inst.operands[2].clone();
    let bits = dst.bits();

    let div_op = if opcode == GenericOpcode::Mod {
        GenericOpcode::Div
    } else {
        GenericOpcode::DivU
    };

    let quot = Operand::virt_reg(func.new_vreg(), bits);
    let mut div = Inst::new(div_op);
    div.add_operand(quot.clone());
    div.add_operand(lhs.clone());
    div.add_operand(rhs.clone());
    legalize_immediates(&mut div, div_op, func, tm, out);
    out.push(div);

    let prod = Operand::virt_reg(func.new_vreg(), bits);
    let mut mul = Inst::new(GenericOpcode::Mul);
    mul.add_operand(prod.clone());
    mul.add_operand(quot);
    mul.add_operand(rhs);
    legalize_immediates(&mut mul, GenericOpcode::Mul, func, tm, out);
    out.push(mul);

    let mut sub = Inst::new(GenericOpcode::Sub);
    sub.add_operand(dst);
    sub.add_operand(lhs);
    sub.add_operand(prod);
    out.push(sub);
}

/// Materialize immediates that do not fit the opcode's immediate field,
/// rewriting the instruction to its register form.
fn legalize_immediates(
    inst: &mut Inst,
    opcode: GenericOpcode,
    func: &mut Function,
    tm: &dyn TargetMachine,
    out: &mut Vec<Inst>,
) {
    // which operand slot can be an immediate for this opcode
    let imm_idx = match opcode {
        GenericOpcode::And
        | GenericOpcode::Or
        | GenericOpcode::Xor
        | GenericOpcode::Lsl
        | GenericOpcode::Lsr
        | GenericOpcode::Add
        | GenericOpcode::Sub
        | GenericOpcode::Mul
        | GenericOpcode::Div
        | GenericOpcode::DivU
        | GenericOpcode::Mod
        | GenericOpcode::ModU
        | GenericOpcode::Cmp => 2,
        GenericOpcode::Mov => 1,
        GenericOpcode::Store => inst.operands.len().saturating_sub(1),
        _ => return,
    };

    // FP constants being stored move through an FP register first
    if opcode == GenericOpcode::Store {
        if let Some(Operand {
            kind: OperandKind::FpImm(_),
            ..
        }) = inst.operands.get(imm_idx)
        {
            let src = inst.operands[imm_idx].clone();
            let bits = src.bits().max(32);
            let mut tmp = Operand::virt_reg(func.new_vreg(), bits);
            tmp.reg_class = Some(tm.register_class(bits, true).id());
            let mut movf = Inst::new(GenericOpcode::MovF);
            movf.add_operand(tmp.clone());
            movf.add_operand(src);
            out.push(movf);
            inst.operands[imm_idx] = tmp;
            return;
        }
    }

    let value = match inst.operands.get(imm_idx).and_then(|o| o.imm_value()) {
        Some(v) => v,
        None => return,
    };

    let fits = match opcode {
        // stores have no immediate form at all
        GenericOpcode::Store => Some(false),
        _ => tm.imm_fits(opcode, value),
    };
    if fits == Some(true) {
        return;
    }

    let bits = inst.operands[0].bits().max(tm.min_reg_width());
    let mut tmp = Operand::virt_reg(func.new_vreg(), bits);
    tmp.reg_class = Some(tm.register_class(bits, false).id());
    out.extend(tm.materialize_constant(value, &tmp));
    inst.operands[imm_idx] = tmp;
}

/// Move each CMP directly in front of its consuming BRANCH so the
/// selector can pair them.
fn normalize_cmp_branch(block: &mut crate::lir::BasicBlock) {
    let branch_pos = block.insts.iter().position(|i| {
        matches!(i.opcode.generic(), Some(GenericOpcode::Branch))
    });
    let branch_pos = match branch_pos {
        Some(p) => p,
        None => return,
    };

    let cond = match block.insts[branch_pos].operands.first() {
        Some(Operand {
            kind: OperandKind::VirtReg(id),
            ..
        }) => *id,
        _ => return,
    };

    let cmp_pos = block.insts.iter().position(|i| {
        matches!(
            i.opcode.generic(),
            Some(GenericOpcode::Cmp) | Some(GenericOpcode::CmpF)
        ) && matches!(i.operands.first(), Some(Operand { kind: OperandKind::VirtReg(d), .. }) if *d == cond)
    });

    if let Some(cmp_pos) = cmp_pos {
        if cmp_pos + 1 != branch_pos {
            let cmp = block.insts.remove(cmp_pos);
            block.insts.insert(branch_pos - 1, cmp);
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
    use crate::lir::{BasicBlock, Relation};

    fn module_with(insts: Vec<Inst>) -> Module {
        let mut f = Function::new("f");
        // keep fresh vregs clear of the ones used in tests
        for _ in 0..16 {
            f.new_vreg();
        }
        let mut bb = BasicBlock::new("entry");
        bb.insts = insts;
        f.blocks.push(bb);
        Module {
            functions: vec![f],
            globals: vec![],
        }
    }

    #[test]
    fn widens_narrow_definitions() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![Inst::new(GenericOpcode::Add)
            .with_operand(Operand::virt_reg(0, 8))
            .with_operand(Operand::virt_reg(1, 8))
            .with_operand(Operand::virt_reg(2, 8))]);
        run(&mut module, tm.as_ref());
        let inst = &module.functions[0].blocks[0].insts[0];
        assert_eq!(inst.operand(0).unwrap().bits(), 32);
        // use operands keep their recorded width
        assert_eq!(inst.operand(1).unwrap().bits(), 8);
    }

    #[test]
    fn load_definitions_stay_narrow() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![Inst::new(GenericOpcode::Load)
            .with_operand(Operand::virt_reg(0, 8))
            .with_operand(Operand::stack(5, 0))]);
        run(&mut module, tm.as_ref());
        let inst = &module.functions[0].blocks[0].insts[0];
        assert_eq!(inst.operand(0).unwrap().bits(), 8);
    }

    #[test]
    fn materializes_wide_immediates() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![Inst::new(GenericOpcode::Add)
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::imm(0x12345678, 32))]);
        run(&mut module, tm.as_ref());
        let insts = &module.functions[0].blocks[0].insts;
        // mov + movk + add
        assert_eq!(insts.len(), 3);
        assert!(insts[2].operand(2).unwrap().is_virt_reg());
    }

    #[test]
    fn small_immediates_left_alone() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![Inst::new(GenericOpcode::Add)
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::imm(100, 32))]);
        run(&mut module, tm.as_ref());
        assert_eq!(module.functions[0].blocks[0].insts.len(), 1);
    }

    #[test]
    fn mul_immediates_always_materialize() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![Inst::new(GenericOpcode::Mul)
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::imm(4, 32))]);
        run(&mut module, tm.as_ref());
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(insts.len(), 2);
        assert!(insts[1].operand(2).unwrap().is_virt_reg());
    }

    #[test]
    fn expands_modulo_without_target_support() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![Inst::new(GenericOpcode::Mod)
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::virt_reg(2, 32))]);
        run(&mut module, tm.as_ref());
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(insts.len(), 3);
        assert_eq!(insts[0].opcode.generic(), Some(GenericOpcode::Div));
        assert_eq!(insts[1].opcode.generic(), Some(GenericOpcode::Mul));
        assert_eq!(insts[2].opcode.generic(), Some(GenericOpcode::Sub));
    }

    #[test]
    fn modulo_kept_with_target_support() {
        let tm = create_target("riscv32").unwrap();
        let mut module = module_with(vec![Inst::new(GenericOpcode::Mod)
            .with_operand(Operand::virt_reg(0, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::virt_reg(2, 32))]);
        run(&mut module, tm.as_ref());
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].opcode.generic(), Some(GenericOpcode::Mod));
    }

    #[test]
    fn moves_cmp_next_to_branch() {
        let tm = create_target("aarch64").unwrap();
        let cmp = Inst::new(GenericOpcode::Cmp)
            .with_operand(Operand::virt_reg(5, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::virt_reg(2, 32))
            .with_relation(Relation::Lt);
        let filler = Inst::new(GenericOpcode::Add)
            .with_operand(Operand::virt_reg(6, 32))
            .with_operand(Operand::virt_reg(1, 32))
            .with_operand(Operand::virt_reg(2, 32));
        let branch = Inst::new(GenericOpcode::Branch)
            .with_operand(Operand::virt_reg(5, 32))
            .with_operand(Operand::label("then"));
        let mut module = module_with(vec![cmp, filler, branch]);
        run(&mut module, tm.as_ref());
        let insts = &module.functions[0].blocks[0].insts;
        assert_eq!(insts[0].opcode.generic(), Some(GenericOpcode::Add));
        assert_eq!(insts[1].opcode.generic(), Some(GenericOpcode::Cmp));
        assert_eq!(insts[2].opcode.generic(), Some(GenericOpcode::Branch));
    }

    #[test]
    fn legalization_is_idempotent() {
        let tm = create_target("aarch64").unwrap();
        let mut module = module_with(vec![
            Inst::new(GenericOpcode::Mod)
                .with_operand(Operand::virt_reg(0, 8))
                .with_operand(Operand::virt_reg(1, 8))
                .with_operand(Operand::imm(0x54321, 32)),
            Inst::new(GenericOpcode::Ret),
        ]);
        run(&mut module, tm.as_ref());
        let once = format!("{:?}", module.functions[0].blocks[0].insts);
        let vregs_once = module.functions[0].next_vreg();
        run(&mut module, tm.as_ref());
        let twice = format!("{:?}", module.functions[0].blocks[0].insts);
        assert_eq!(once, twice);
        assert_eq!(vregs_once, module.functions[0].next_vreg());
    }
}
