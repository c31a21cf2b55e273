//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// MIR to LLIR lowering
//
// Converts SSA MIR instructions into target-generic low-level
// instructions over virtual registers and abstract stack slots:
// materializes stack and global addresses, implements the struct-by-value
// call and return conventions, explodes pointer arithmetic into
// base + index*stride + offset, and spills call return values to stack
// slots. Side tables are per-function and reset between functions.
//

use crate::arch::TargetMachine;
use crate::ir::{self, next_aligned, BinOp, GlobalInitValue, Instruction, UnOp, Value, ValueKind};
use crate::lir::{
    BasicBlock, GenericOpcode, GlobalData, GlobalInit, Inst, LowLevelType, Operand, SymbolRefWidth,
    FALLTHROUGH_BRANCH,
};

pub struct IrToLlir<'a> {
    tm: &'a dyn TargetMachine,
    /// MIR value id -> LLIR vreg
    vreg_map: std::collections::HashMap<u32, u32>,
    /// by-value struct parameter id -> registers holding its chunks
    struct_param_regs: std::collections::HashMap<u32, Vec<u32>>,
    /// over-width scalar parameter id -> registers holding its halves
    param_multi_regs: std::collections::HashMap<u32, Vec<u32>>,
    /// loaded struct value id -> registers holding its chunks
    struct_value_regs: std::collections::HashMap<u32, Vec<u32>>,
    /// call result id -> stack slot holding the spilled return value
    spilled_ret_slots: std::collections::HashMap<u32, u32>,
}

pub fn run(ir_module: &ir::Module, tm: &dyn TargetMachine) -> crate::lir::Module {
    IrToLlir::new(tm).lower_module(ir_module)
}

/// Highest MIR value id appearing in a function.
fn max_value_id(func: &ir::Function) -> u32 {
    let mut max = 0u32;
    for p in &func.params {
        max = max.max(p.id);
    }
    for block in &func.blocks {
        for inst in &block.insts {
            let dst = match inst {
                Instruction::Binary { dst, .. }
                | Instruction::Unary { dst, .. }
                | Instruction::Load { dst, .. }
                | Instruction::Gep { dst, .. }
                | Instruction::Cmp { dst, .. }
                | Instruction::StackAlloc { dst } => Some(dst),
                Instruction::Call { dst, .. } => dst.as_ref(),
                _ => None,
            };
            if let Some(dst) = dst {
                max = max.max(dst.id);
            }
        }
    }
    max
}

impl<'a> IrToLlir<'a> {
    pub fn new(tm: &'a dyn TargetMachine) -> Self {
        IrToLlir {
            tm,
            vreg_map: Default::default(),
            struct_param_regs: Default::default(),
            param_multi_regs: Default::default(),
            struct_value_regs: Default::default(),
            spilled_ret_slots: Default::default(),
        }
    }

    fn reset(&mut self) {
        self.vreg_map.clear();
        self.struct_param_regs.clear();
        self.param_multi_regs.clear();
        self.struct_value_regs.clear();
        self.spilled_ret_slots.clear();
    }

    fn ptr_bits(&self) -> u32 {
        self.tm.pointer_size()
    }

    fn ptr_bytes(&self) -> u32 {
        self.tm.pointer_size() / 8
    }

    pub fn lower_module(&mut self, ir_module: &ir::Module) -> crate::lir::Module {
        let mut module = crate::lir::Module::new();

        for func in &ir_module.functions {
            if func.is_declaration {
                continue;
            }
            self.reset();
            module.functions.push(self.lower_function(func));
        }
        for global in &ir_module.globals {
            module.globals.push(self.lower_global(global));
        }
        module
    }

    fn lower_function(&mut self, func: &ir::Function) -> crate::lir::Function {
        let mut f = crate::lir::Function::new(&func.name);
        // fresh vregs and spill slots must not collide with MIR value ids
        f.reserve_ids(max_value_id(func) + 1);
        self.lower_params(func, &mut f);

        // create all blocks up front so branches can refer to them
        let mut blocks: Vec<BasicBlock> = func
            .blocks
            .iter()
            .map(|b| BasicBlock::new(&b.name))
            .collect();

        for (bi, block) in func.blocks.iter().enumerate() {
            for inst in &block.insts {
                if let Instruction::StackAlloc { dst } = inst {
                    self.handle_stack_allocation(dst, &mut f);
                    continue;
                }
                self.convert(inst, &mut f, &mut blocks[bi].insts);
                // everything after a return in a block is dead code
                if blocks[bi]
                    .insts
                    .last()
                    .map(|i| i.is_return())
                    .unwrap_or(false)
                {
                    break;
                }
            }
        }

        f.blocks = blocks;
        f
    }

    fn lower_params(&mut self, func: &ir::Function, f: &mut crate::lir::Function) {
        let ptr = self.ptr_bits();
        for param in &func.params {
            let bits = if param.ty.is_ptr() {
                ptr
            } else {
                param.ty.bits
            };

            if param.ty.is_struct() && !param.ty.is_ptr() {
                // by-value structs arrive in consecutive registers
                let max_struct = self.tm.abi().max_struct_size_by_value;
                for _ in 0..(max_struct / ptr) {
                    let vreg = f.new_vreg();
                    self.struct_param_regs
                        .entry(param.id)
                        .or_default()
                        .push(vreg);
                    f.add_param(vreg, LowLevelType::scalar(ptr), false, false);
                }
                continue;
            }

            if param.ty.is_ptr() {
                f.add_param(
                    param.id,
                    LowLevelType::ptr(ptr),
                    param.is_implicit_struct_ptr,
                    false,
                );
            } else if bits <= ptr {
                f.add_param(
                    param.id,
                    LowLevelType::scalar(bits),
                    param.is_implicit_struct_ptr,
                    param.ty.is_fp(),
                );
            } else {
                // an over-width scalar is passed in multiple registers
                for _ in 0..(bits / ptr) {
                    let vreg = f.new_vreg();
                    self.param_multi_regs.entry(param.id).or_default().push(vreg);
                    f.add_param(
                        vreg,
                        LowLevelType::scalar(ptr),
                        param.is_implicit_struct_ptr,
                        param.ty.is_fp(),
                    );
                }
            }
        }
    }

    /// Insert a frame entry for a stack allocation; emits no LLIR.
    fn handle_stack_allocation(&mut self, dst: &Value, f: &mut crate::lir::Function) {
        let referred = dst.ty.pointee();
        let size = referred.byte_size(self.ptr_bytes());
        let align = referred.align(self.ptr_bytes());
        f.insert_stack_slot(dst.id, size, align);
    }

    fn get_id(&self, v: &Value) -> u32 {
        self.vreg_map.get(&v.id).copied().unwrap_or(v.id)
    }

    /// LLIR operand for an MIR value, creating the mapping (and any
    /// address/load helper instructions) on first encounter.
    fn operand_from_value(
        &mut self,
        v: &Value,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
        is_def: bool,
    ) -> Operand {
        let ptr = self.ptr_bits();
        match &v.kind {
            ValueKind::Register | ValueKind::StackAlloc => {
                let bits = if v.is_stack_alloc() {
                    let pointee = v.ty.pointee();
                    if pointee.is_ptr() {
                        ptr
                    } else {
                        pointee.bits.max(8)
                    }
                } else {
                    v.bits(ptr)
                };

                // stack slots used as values (not spilled returns) load first
                let vreg = if !is_def
                    && !self.vreg_map.contains_key(&v.id)
                    && f.is_stack_slot(v.id)
                    && !self.spilled_ret_slots.contains_key(&v.id)
                {
                    let vreg = f.new_vreg();
                    let mut load = Inst::new(GenericOpcode::Load);
                    load.add_operand(Operand::virt_reg(vreg, bits));
                    load.add_operand(Operand::stack(v.id, 0));
                    out.push(load);
                    vreg
                } else if let Some(&mapped) = self.vreg_map.get(&v.id) {
                    if !is_def
                        && f.is_stack_slot(mapped)
                        && !self.spilled_ret_slots.contains_key(&mapped)
                    {
                        let vreg = f.new_vreg();
                        let mut load = Inst::new(GenericOpcode::Load);
                        load.add_operand(Operand::virt_reg(vreg, bits));
                        load.add_operand(Operand::stack(mapped, 0));
                        out.push(load);
                        vreg
                    } else {
                        mapped
                    }
                } else if let Some(&slot) = self.spilled_ret_slots.get(&v.id) {
                    let vreg = f.new_vreg();
                    let mut load = Inst::new(GenericOpcode::Load);
                    load.add_operand(Operand::virt_reg(vreg, bits));
                    load.add_operand(Operand::stack(slot, 0));
                    out.push(load);
                    vreg
                } else {
                    let vreg = f.new_vreg();
                    self.vreg_map.insert(v.id, vreg);
                    vreg
                };

                let llt = if v.ty.is_ptr() && !v.is_stack_alloc() {
                    LowLevelType::ptr(ptr)
                } else if v.is_stack_alloc() && v.ty.pointee().is_ptr() {
                    LowLevelType::ptr(ptr)
                } else {
                    LowLevelType::scalar(bits)
                };
                Operand {
                    kind: crate::lir::OperandKind::VirtReg(vreg),
                    llt,
                    reg_class: None,
                }
            }
            ValueKind::Param => {
                let llt = if v.ty.is_ptr() {
                    LowLevelType::ptr(ptr)
                } else {
                    LowLevelType::scalar(v.ty.bits)
                };
                Operand::param(v.id, llt)
            }
            ValueKind::IntConst(c) => Operand::imm(*c, v.ty.bits),
            ValueKind::FpConst(c) => Operand::fp_imm(*c, v.ty.bits),
            ValueKind::Global(name) => {
                let vreg = f.new_vreg();
                let mut ga = Inst::new(GenericOpcode::GlobalAddress);
                ga.add_operand(Operand::virt_reg_ptr(vreg, ptr));
                ga.add_operand(Operand::global(name, ptr));
                out.push(ga);
                Operand::virt_reg_ptr(vreg, ptr)
            }
        }
    }

    /// Materialize the address of a value into a register operand.
    fn materialize_address(
        &mut self,
        v: &Value,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
    ) -> Operand {
        let ptr = self.ptr_bits();
        let id = self.get_id(v);
        let is_global = v.is_global();
        let is_stack = f.is_stack_slot(id);

        if is_global || is_stack {
            let vreg = f.new_vreg();
            let dst = Operand::virt_reg_ptr(vreg, ptr);
            let addr = if is_global {
                let mut inst = Inst::new(GenericOpcode::GlobalAddress);
                if let ValueKind::Global(name) = &v.kind {
                    inst.add_operand(dst.clone());
                    inst.add_operand(Operand::global(name, ptr));
                }
                inst
            } else {
                let mut inst = Inst::new(GenericOpcode::StackAddress);
                inst.add_operand(dst.clone());
                inst.add_operand(Operand::stack(id, 0));
                inst
            };
            out.push(addr);
            dst
        } else {
            self.operand_from_value(v, f, out, false)
        }
    }

    fn convert(&mut self, inst: &Instruction, f: &mut crate::lir::Function, out: &mut Vec<Inst>) {
        match inst {
            Instruction::Binary { op, dst, lhs, rhs } => {
                let opcode = match op {
                    BinOp::Add => GenericOpcode::Add,
                    BinOp::Sub => GenericOpcode::Sub,
                    BinOp::Mul => GenericOpcode::Mul,
                    BinOp::Div => GenericOpcode::Div,
                    BinOp::DivU => GenericOpcode::DivU,
                    BinOp::Mod => GenericOpcode::Mod,
                    BinOp::ModU => GenericOpcode::ModU,
                    BinOp::And => GenericOpcode::And,
                    BinOp::Or => GenericOpcode::Or,
                    BinOp::Xor => GenericOpcode::Xor,
                    BinOp::Shl => GenericOpcode::Lsl,
                    BinOp::LShr => GenericOpcode::Lsr,
                    BinOp::FAdd => GenericOpcode::AddF,
                    BinOp::FSub => GenericOpcode::SubF,
                    BinOp::FMul => GenericOpcode::MulF,
                    BinOp::FDiv => GenericOpcode::DivF,
                };
                let dst_op = self.operand_from_value(dst, f, out, true);
                let lhs_op = self.operand_from_value(lhs, f, out, false);
                let rhs_op = self.operand_from_value(rhs, f, out, false);
                let mut mi = Inst::new(opcode);
                mi.add_operand(dst_op);
                mi.add_operand(lhs_op);
                mi.add_operand(rhs_op);
                out.push(mi);
            }
            Instruction::Unary { op, dst, src } => self.convert_unary(*op, dst, src, f, out),
            Instruction::Store { src, addr } => self.convert_store(src, addr, f, out),
            Instruction::Load { dst, addr } => self.convert_load(dst, addr, f, out),
            Instruction::Gep { dst, base, index } => self.convert_gep(dst, base, index, f, out),
            Instruction::Jump { target } => {
                let mut mi = Inst::new(GenericOpcode::Jump);
                mi.add_operand(Operand::label(target));
                out.push(mi);
            }
            Instruction::Branch {
                cond,
                true_label,
                false_label,
            } => {
                let cond_op = self.operand_from_value(cond, f, out, false);
                let mut mi = Inst::new(GenericOpcode::Branch);
                mi.add_operand(cond_op);
                mi.add_operand(Operand::label(true_label));
                match false_label {
                    Some(fl) => mi.add_operand(Operand::label(fl)),
                    None => mi.add_flag(FALLTHROUGH_BRANCH),
                }
                out.push(mi);
            }
            Instruction::Cmp { rel, dst, lhs, rhs } => {
                let opcode = if lhs.ty.is_fp() {
                    GenericOpcode::CmpF
                } else {
                    GenericOpcode::Cmp
                };
                let dst_op = self.operand_from_value(dst, f, out, true);
                let lhs_op = self.operand_from_value(lhs, f, out, false);
                let rhs_op = self.operand_from_value(rhs, f, out, false);
                let mut mi = Inst::new(opcode);
                mi.add_operand(dst_op);
                mi.add_operand(lhs_op);
                mi.add_operand(rhs_op);
                mi.relation = *rel;
                out.push(mi);
            }
            Instruction::Call {
                dst,
                callee,
                args,
                implicit_struct_arg,
            } => self.convert_call(dst.as_ref(), callee, args, *implicit_struct_arg, f, out),
            Instruction::Ret { value } => self.convert_ret(value.as_ref(), f, out),
            Instruction::Memcpy { dst, src, bytes } => {
                self.convert_memcpy(dst, src, *bytes, f, out)
            }
            Instruction::StackAlloc { .. } => {
                crate::ice!("lower", "stack allocation reached instruction conversion")
            }
        }
    }

    fn convert_unary(
        &mut self,
        op: UnOp,
        dst: &Value,
        src: &Value,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
    ) {
        if op == UnOp::BitCast {
            // pointer-to-pointer casts of locals become address takes;
            // spilled returns load instead
            if dst.ty.is_ptr()
                && src.ty.is_ptr()
                && dst.ty.ptr_level == src.ty.ptr_level
                && f.is_stack_slot(src.id)
            {
                let dst_op = self.operand_from_value(dst, f, out, true);
                if !self.spilled_ret_slots.contains_key(&src.id) {
                    let mut mi = Inst::new(GenericOpcode::StackAddress);
                    mi.add_operand(dst_op);
                    mi.add_operand(Operand::stack(src.id, 0));
                    out.push(mi);
                } else {
                    let mut mi = Inst::new(GenericOpcode::Load);
                    mi.add_operand(dst_op);
                    mi.add_operand(Operand::stack(self.get_id(src), 0));
                    out.push(mi);
                }
                return;
            }
            let dst_op = self.operand_from_value(dst, f, out, true);
            let src_op = self.operand_from_value(src, f, out, false);
            let mut mi = Inst::new(GenericOpcode::Mov);
            mi.add_operand(dst_op);
            mi.add_operand(src_op);
            out.push(mi);
            return;
        }

        let opcode = match op {
            UnOp::SExt => GenericOpcode::SExt,
            UnOp::ZExt => GenericOpcode::ZExt,
            UnOp::Trunc => GenericOpcode::Trunc,
            UnOp::FToI => GenericOpcode::FToI,
            UnOp::IToF => GenericOpcode::IToF,
            UnOp::BitCast => unreachable!(),
        };
        let dst_op = self.operand_from_value(dst, f, out, true);
        let src_op = self.operand_from_value(src, f, out, false);
        let mut mi = Inst::new(opcode);
        mi.add_operand(dst_op);
        mi.add_operand(src_op);
        out.push(mi);
    }

    /// Address operand for a load/store destination: registers are used
    /// directly, globals are materialized first.
    fn address_reg(
        &mut self,
        addr: &Value,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
    ) -> u32 {
        if let ValueKind::Global(name) = &addr.kind {
            let ptr = self.ptr_bits();
            let vreg = f.new_vreg();
            let mut ga = Inst::new(GenericOpcode::GlobalAddress);
            ga.add_operand(Operand::virt_reg_ptr(vreg, ptr));
            ga.add_operand(Operand::global(name, ptr));
            out.push(ga);
            vreg
        } else {
            self.get_id(addr)
        }
    }

    fn addr_operand(&self, f: &crate::lir::Function, addr_id: u32, offset: i32) -> Operand {
        if f.is_stack_slot(addr_id) {
            Operand::stack(addr_id, offset)
        } else {
            let mut op = Operand::mem(addr_id, offset, self.ptr_bits());
            op.set_offset(offset);
            op
        }
    }

    fn convert_store(
        &mut self,
        src: &Value,
        addr: &Value,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
    ) {
        let ptr = self.ptr_bits();
        let ptr_bytes = self.ptr_bytes();
        let addr_id = self.address_reg(addr, f, out);

        // by-value structs held in registers store one chunk per register
        if src.ty.is_struct() && !src.ty.is_ptr() {
            if let Some(regs) = self.struct_param_regs.get(&src.id).cloned() {
                for (i, vreg) in regs.iter().enumerate() {
                    let mut store = Inst::new(GenericOpcode::Store);
                    store.add_operand(self.addr_operand(f, addr_id, (i as u32 * ptr_bytes) as i32));
                    store.add_operand(Operand::virt_reg(*vreg, ptr));
                    out.push(store);
                }
                return;
            }
            // struct arriving directly in the return registers
            let struct_bits = src.ty.byte_size(ptr_bytes) * 8;
            let regs_count = next_aligned(struct_bits, ptr) / ptr;
            let ret_regs = self.tm.abi().ret_regs.clone();
            if regs_count as usize > ret_regs.len() {
                crate::ice!("lower", "struct return exceeds the return registers");
            }
            for i in 0..regs_count {
                let mut store = Inst::new(GenericOpcode::Store);
                store.add_operand(self.addr_operand(f, addr_id, (i * ptr_bytes) as i32));
                store.add_operand(Operand::phys_reg(ret_regs[i as usize], ptr));
                out.push(store);
            }
            return;
        }

        // over-width scalar parameters store one chunk per register
        if let Some(regs) = self.param_multi_regs.get(&src.id).cloned() {
            for (i, vreg) in regs.iter().enumerate() {
                let mut store = Inst::new(GenericOpcode::Store);
                store.add_operand(self.addr_operand(f, addr_id, (i as u32 * ptr_bytes) as i32));
                store.add_operand(Operand::virt_reg(*vreg, ptr));
                out.push(store);
            }
            return;
        }

        let mut store = Inst::new(GenericOpcode::Store);
        store.add_operand(self.addr_operand(f, addr_id, 0));

        if let ValueKind::Global(name) = &src.kind {
            // storing the address of a global
            let vreg = f.new_vreg();
            let mut ga = Inst::new(GenericOpcode::GlobalAddress);
            ga.add_operand(Operand::virt_reg_ptr(vreg, ptr));
            ga.add_operand(Operand::global(name, ptr));
            out.push(ga);
            store.add_operand(Operand::virt_reg_ptr(vreg, ptr));
        } else if src.is_stack_alloc() && f.is_stack_slot(src.id) {
            // storing the address of a local
            let vreg = f.new_vreg();
            let mut sa = Inst::new(GenericOpcode::StackAddress);
            sa.add_operand(Operand::virt_reg_ptr(vreg, ptr));
            sa.add_operand(Operand::stack(src.id, 0));
            out.push(sa);
            store.add_operand(Operand::virt_reg_ptr(vreg, ptr));
        } else {
            let value = self.operand_from_value(src, f, out, false);
            store.add_operand(value);
        }
        out.push(store);
    }

    fn convert_load(
        &mut self,
        dst: &Value,
        addr: &Value,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
    ) {
        let ptr = self.ptr_bits();
        let ptr_bytes = self.ptr_bytes();
        let addr_id = self.address_reg(addr, f, out);

        // struct loads fill one register per chunk
        if dst.ty.is_struct() && !dst.ty.is_ptr() {
            let struct_bits = dst.ty.byte_size(ptr_bytes) * 8;
            let regs_count = next_aligned(struct_bits, ptr) / ptr;
            for i in 0..regs_count {
                let vreg = f.new_vreg();
                self.struct_value_regs.entry(dst.id).or_default().push(vreg);
                let mut load = Inst::new(GenericOpcode::Load);
                load.add_operand(Operand::virt_reg(vreg, ptr));
                load.add_operand(self.addr_operand(f, addr_id, (i * ptr_bytes) as i32));
                out.push(load);
            }
            return;
        }

        let dst_op = self.operand_from_value(dst, f, out, true);
        let mut load = Inst::new(GenericOpcode::Load);
        load.add_operand(dst_op);
        load.add_operand(self.addr_operand(f, addr_id, 0));
        out.push(load);
    }

    fn convert_gep(
        &mut self,
        dst: &Value,
        base: &Value,
        index: &Value,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
    ) {
        let ptr = self.ptr_bits();
        let ptr_bytes = self.ptr_bytes();
        let source_id = self.get_id(base);
        let is_global = base.is_global();
        let is_stack = f.is_stack_slot(source_id);
        let is_reg = !is_global && !is_stack;

        // struct member access resolves to a constant byte offset
        let is_struct_access =
            base.ty.kind == crate::ir::TypeKind::Struct && base.ty.ptr_level <= 1;

        let dst_op = self.operand_from_value(dst, f, out, true);

        let mut goal: Option<Inst> = if is_global {
            let mut g = Inst::new(GenericOpcode::GlobalAddress);
            g.add_operand(dst_op.clone());
            if let ValueKind::Global(name) = &base.kind {
                g.add_operand(Operand::global(name, ptr));
            }
            Some(g)
        } else if is_stack {
            let mut g = Inst::new(GenericOpcode::StackAddress);
            g.add_operand(dst_op.clone());
            g.add_operand(Operand::stack(source_id, 0));
            Some(g)
        } else {
            None
        };

        if let ValueKind::IntConst(idx) = index.kind {
            let offset = if is_struct_access {
                let strct = if base.ty.ptr_level > 0 {
                    base.ty.pointee()
                } else {
                    base.ty.clone()
                };
                strct.member_offset(idx as usize, ptr_bytes)
            } else {
                base.ty.elem_size(ptr_bytes) * idx as u32
            };

            if offset == 0 && goal.is_some() {
                out.push(goal.take().unwrap());
                return;
            }
            // fold the constant into the stack operand's offset
            if is_stack {
                let mut g = goal.take().unwrap();
                g.operands[1].set_offset(offset as i32);
                out.push(g);
                return;
            }

            let base_op = if let Some(mut g) = goal.take() {
                // keep SSA form: the address def must differ from the gep's
                let renamed = Operand::virt_reg_ptr(f.new_vreg(), ptr);
                g.operands[0] = renamed.clone();
                out.push(g);
                renamed
            } else {
                self.operand_from_value(base, f, out, false)
            };

            let mut add = Inst::new(GenericOpcode::Add);
            add.add_operand(dst_op.clone());
            add.add_operand(base_op);
            add.add_operand(Operand::imm(offset as i64, dst_op.bits()));
            out.push(add);
            return;
        }

        // index in a register
        if is_struct_access {
            crate::ice!("lower", "non-constant struct index in address computation");
        }

        let base_op = if let Some(mut g) = goal.take() {
            let renamed = Operand::virt_reg_ptr(f.new_vreg(), ptr);
            g.operands[0] = renamed.clone();
            out.push(g);
            renamed
        } else {
            self.operand_from_value(base, f, out, false)
        };

        let index_op = self.operand_from_value(index, f, out, false);
        let stride = base.ty.elem_size(ptr_bytes);

        let scaled = if stride == 1 {
            // identity scale: a move (or sign extension) suffices
            let vreg = f.new_vreg();
            let mut mov = Inst::new(if index_op.bits() < ptr {
                GenericOpcode::SExt
            } else {
                GenericOpcode::Mov
            });
            mov.add_operand(Operand::virt_reg(vreg, ptr));
            mov.add_operand(index_op);
            out.push(mov);
            Operand::virt_reg(vreg, ptr)
        } else {
            // multiply needs the stride in a register
            let stride_vreg = f.new_vreg();
            let mut mov = Inst::new(GenericOpcode::Mov);
            mov.add_operand(Operand::virt_reg(stride_vreg, ptr));
            mov.add_operand(Operand::imm(stride as i64, ptr));
            out.push(mov);

            let idx_op = if index_op.bits() < ptr {
                let sext_vreg = f.new_vreg();
                let mut sext = Inst::new(GenericOpcode::SExt);
                sext.add_operand(Operand::virt_reg(sext_vreg, ptr));
                sext.add_operand(index_op);
                out.push(sext);
                Operand::virt_reg(sext_vreg, ptr)
            } else {
                index_op
            };

            let mul_vreg = f.new_vreg();
            let mut mul = Inst::new(GenericOpcode::Mul);
            mul.add_operand(Operand::virt_reg(mul_vreg, ptr));
            mul.add_operand(idx_op);
            mul.add_operand(Operand::virt_reg(stride_vreg, ptr));
            out.push(mul);
            Operand::virt_reg(mul_vreg, ptr)
        };

        let mut add = Inst::new(GenericOpcode::Add);
        add.add_operand(dst_op);
        add.add_operand(base_op);
        add.add_operand(scaled);
        out.push(add);
    }

    fn convert_call(
        &mut self,
        dst: Option<&Value>,
        callee: &str,
        args: &[Value],
        implicit_struct_arg: Option<usize>,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
    ) {
        let ptr = self.ptr_bits();
        let ptr_bytes = self.ptr_bytes();
        f.has_call = true;

        let abi = self.tm.abi();
        let arg_regs = abi.arg_regs.clone();
        let first_fp_arg = abi.first_fp_arg_idx;
        let struct_ptr_reg = abi.struct_ptr_reg;

        let mut param_counter = 0usize;
        for (i, arg) in args.iter().enumerate() {
            // by-value structs were pre-loaded into registers
            if arg.ty.is_struct() && !arg.ty.is_ptr() && !arg.is_global() {
                let regs = self.struct_value_regs.get(&arg.id).cloned().unwrap_or_else(|| {
                    crate::ice!("lower", "struct argument %{} not loaded into registers", arg.id)
                });
                for vreg in regs {
                    let reg = arg_regs[param_counter];
                    let bits = self.tm.reg_info().register_by_id(reg).bits;
                    let mut mov = Inst::new(GenericOpcode::Mov);
                    mov.add_operand(Operand::phys_reg(reg, bits));
                    mov.add_operand(Operand::virt_reg(vreg, ptr));
                    out.push(mov);
                    param_counter += 1;
                }
                continue;
            }

            // pointers to globals and stack locals materialize the address
            // straight into the argument register
            if arg.ty.is_ptr() && (arg.is_global() || f.is_stack_slot(self.get_id(arg))) {
                let dest_reg = if Some(i) == implicit_struct_arg {
                    struct_ptr_reg
                } else {
                    arg_regs[param_counter]
                };
                let bits = self.tm.reg_info().register_by_id(dest_reg).bits;

                if let ValueKind::Global(name) = &arg.kind {
                    let mut ga = Inst::new(GenericOpcode::GlobalAddress);
                    ga.add_operand(Operand::phys_reg(dest_reg, bits).with_llt(LowLevelType::ptr(bits)));
                    ga.add_operand(Operand::global(name, ptr));
                    out.push(ga);
                } else {
                    let mut sa = Inst::new(GenericOpcode::StackAddress);
                    sa.add_operand(Operand::phys_reg(dest_reg, bits).with_llt(LowLevelType::ptr(bits)));
                    sa.add_operand(Operand::stack(self.get_id(arg), 0));
                    out.push(sa);
                }
                param_counter += 1;
                continue;
            }

            // scalar arguments move into the proper register, taking a
            // sub-register when the value is narrower
            let is_fp = arg.ty.is_fp();
            let idx = param_counter + if is_fp { first_fp_arg } else { 0 };
            if idx >= arg_regs.len() {
                crate::ice!("lower", "call to {} exceeds the argument registers", callee);
            }
            let src = self.operand_from_value(arg, f, out, false);
            let mut reg = arg_regs[idx];
            let mut bits = self.tm.reg_info().register_by_id(reg).bits;
            if src.bits() < bits
                && !self.tm.reg_info().register_by_id(reg).sub_regs.is_empty()
            {
                reg = self.tm.reg_info().sub_register_for_width(reg, 32);
                bits = self.tm.reg_info().register_by_id(reg).bits;
            }
            let mut mov = Inst::new(if is_fp {
                GenericOpcode::MovF
            } else {
                GenericOpcode::Mov
            });
            mov.add_operand(Operand::phys_reg(reg, bits));
            mov.add_operand(src);
            out.push(mov);
            param_counter += 1;
        }

        let mut call = Inst::new(GenericOpcode::Call);
        call.add_operand(Operand::func_name(callee));
        out.push(call);

        let dst = match dst {
            Some(d) => d,
            None => return,
        };
        if dst.ty.is_void() {
            return;
        }

        // spill the returned value to a fresh stack slot
        let ret_bits = dst.ty.byte_size(ptr_bytes) * 8;
        let regs_count = next_aligned(ret_bits, ptr) / ptr;
        if regs_count == 0 || regs_count > 2 {
            crate::ice!("lower", "call return spans {} registers", regs_count);
        }
        let ret_regs = abi.ret_regs.clone();
        let first_fp_ret = abi.first_fp_ret_idx;

        let slot = f.new_vreg();
        self.spilled_ret_slots.insert(dst.id, slot);
        f.insert_stack_slot(slot, ret_bits / 8, ret_bits / 8);

        let mut remaining = ret_bits;
        for i in 0..regs_count {
            let mut store = Inst::new(GenericOpcode::Store);
            store.add_operand(Operand::stack(slot, (i * ptr_bytes) as i32));

            let idx = i as usize + if dst.ty.is_fp() { first_fp_ret } else { 0 };
            let chunk = remaining.min(ptr);
            let mut reg = ret_regs[idx];
            if chunk < ptr
                && !self.tm.reg_info().register_by_id(reg).sub_regs.is_empty()
            {
                reg = self.tm.reg_info().sub_register_for_width(reg, 32);
            }
            store.add_operand(Operand::phys_reg(reg, chunk));
            out.push(store);
            remaining -= chunk;
        }
    }

    fn convert_ret(
        &mut self,
        value: Option<&Value>,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
    ) {
        let ptr = self.ptr_bits();
        let ptr_bytes = self.ptr_bytes();
        let abi = self.tm.abi();
        let ret_regs = abi.ret_regs.clone();
        let first_fp_ret = abi.first_fp_ret_idx;

        let mut ret = Inst::new(GenericOpcode::Ret);
        let value = match value {
            Some(v) => v,
            None => {
                out.push(ret);
                return;
            }
        };
        let is_fp = value.ty.is_fp();

        // structs held across multiple registers
        if value.ty.is_struct() && !value.ty.is_ptr() {
            let regs = self
                .struct_value_regs
                .get(&value.id)
                .cloned()
                .unwrap_or_default();
            if regs.len() > 2 {
                crate::ice!("lower", "struct return spans {} registers", regs.len());
            }
            for (i, vreg) in regs.iter().enumerate() {
                let reg = ret_regs[i];
                let bits = self.tm.reg_info().register_by_id(reg).bits;
                let mut mov = Inst::new(GenericOpcode::Mov);
                mov.add_operand(Operand::phys_reg(reg, bits));
                mov.add_operand(Operand::virt_reg(*vreg, ptr));
                out.push(mov);
            }
            out.push(ret);
            return;
        }

        if value.is_constant() {
            let bits = value.bits(ptr);
            if bits <= ptr {
                let mut load = Inst::new(if is_fp {
                    GenericOpcode::MovF
                } else {
                    GenericOpcode::LoadImm
                });
                let idx = if is_fp { first_fp_ret } else { 0 };
                let mut reg = ret_regs[idx];
                let mut reg_bits = self.tm.reg_info().register_by_id(reg).bits;
                if reg_bits != bits
                    && !self.tm.reg_info().register_by_id(reg).sub_regs.is_empty()
                {
                    reg = self.tm.reg_info().sub_register_for_width(reg, 32);
                    reg_bits = self.tm.reg_info().register_by_id(reg).bits;
                }
                let dst = Operand::phys_reg(reg, reg_bits);
                load.add_operand(dst.clone());
                load.add_operand(self.operand_from_value(value, f, out, false));
                out.push(load);
                ret.add_operand(dst);
                out.push(ret);
            } else {
                // over-width constants load one register-sized slice each
                let regs_count = next_aligned(value.ty.byte_size(ptr_bytes) * 8, ptr) / ptr;
                if regs_count != 2 {
                    crate::ice!("lower", "constant return spans {} registers", regs_count);
                }
                if is_fp {
                    crate::ice!("lower", "FP constants cannot span registers");
                }
                let c = match value.kind {
                    ValueKind::IntConst(c) => c,
                    _ => crate::ice!("lower", "expected an integer constant"),
                };
                for i in 0..regs_count {
                    let reg = ret_regs[i as usize];
                    let bits = self.tm.reg_info().register_by_id(reg).bits;
                    let mut load = Inst::new(GenericOpcode::LoadImm);
                    load.add_operand(Operand::phys_reg(reg, bits));
                    load.add_operand(Operand::imm((c >> (i * 32)) & 0xffff_ffff, 32));
                    out.push(load);
                }
                out.push(ret);
            }
            return;
        }

        // values wider than a register split into two halves
        if value.bits(ptr) > ptr {
            if value.bits(ptr) > 64 {
                crate::ice!("lower", "return value wider than 64 bits");
            }
            let lo = Operand::virt_reg(f.new_vreg(), ptr);
            let hi = Operand::virt_reg(f.new_vreg(), ptr);
            let src = self.operand_from_value(value, f, out, false);
            let mut split = Inst::new(GenericOpcode::Split);
            split.add_operand(lo.clone());
            split.add_operand(hi.clone());
            split.add_operand(src);
            out.push(split);

            for (i, half) in [lo, hi].into_iter().enumerate() {
                let reg = ret_regs[i];
                let bits = self.tm.reg_info().register_by_id(reg).bits;
                let mut mov = Inst::new(GenericOpcode::Mov);
                mov.add_operand(Operand::phys_reg(reg, bits));
                mov.add_operand(half);
                out.push(mov);
            }
            out.push(ret);
            return;
        }

        let result = self.operand_from_value(value, f, out, false);
        ret.add_operand(result);
        out.push(ret);
    }

    fn convert_memcpy(
        &mut self,
        dst: &Value,
        src: &Value,
        bytes: u32,
        f: &mut crate::lir::Function,
        out: &mut Vec<Inst>,
    ) {
        let ptr = self.ptr_bits();

        if bytes >= 32 && self.tm.is_memcpy_supported() {
            f.has_call = true;
            let abi = self.tm.abi();
            let arg_regs = abi.arg_regs.clone();

            let dest = self.materialize_address(dst, f, out);
            let reg0_bits = self.tm.reg_info().register_by_id(arg_regs[0]).bits;
            let mut mov0 = Inst::new(GenericOpcode::Mov);
            mov0.add_operand(Operand::phys_reg(arg_regs[0], reg0_bits));
            mov0.add_operand(dest);
            out.push(mov0);

            let source = self.materialize_address(src, f, out);
            let reg1_bits = self.tm.reg_info().register_by_id(arg_regs[1]).bits;
            let mut mov1 = Inst::new(GenericOpcode::Mov);
            mov1.add_operand(Operand::phys_reg(arg_regs[1], reg1_bits));
            mov1.add_operand(source);
            out.push(mov1);

            // byte count is a 32-bit quantity
            let len_reg = self.tm.reg_info().sub_register_for_width(arg_regs[2], 32);
            let mut mov2 = Inst::new(GenericOpcode::Mov);
            mov2.add_operand(Operand::phys_reg(len_reg, 32));
            mov2.add_operand(Operand::imm(bytes as i64, 32));
            out.push(mov2);

            let mut call = Inst::new(GenericOpcode::Call);
            call.add_operand(Operand::func_name("memcpy"));
            out.push(call);
            return;
        }

        // expand into load/store pairs of word-sized units
        // NOTE: assumes 4-byte alignment of both operands
        fn addr_id(op: &Operand) -> u32 {
            match op.kind {
                crate::lir::OperandKind::PhysReg(id)
                | crate::lir::OperandKind::VirtReg(id)
                | crate::lir::OperandKind::Param(id) => id,
                _ => crate::ice!("lower", "memcpy operand has no register"),
            }
        }
        let src_id = if self.vreg_map.contains_key(&src.id) {
            self.get_id(src)
        } else {
            let op = self.materialize_address(src, f, out);
            addr_id(&op)
        };
        let dst_id = if self.vreg_map.contains_key(&dst.id) {
            self.get_id(dst)
        } else {
            let op = self.materialize_address(dst, f, out);
            addr_id(&op)
        };

        for i in 0..(bytes / 4) {
            let vreg = f.new_vreg();
            let mut load = Inst::new(GenericOpcode::Load);
            load.add_operand(Operand::virt_reg(vreg, 32));
            load.add_operand(if f.is_stack_slot(src_id) {
                Operand::stack(src_id, (i * 4) as i32)
            } else {
                Operand::mem(src_id, (i * 4) as i32, ptr)
            });
            out.push(load);

            let mut store = Inst::new(GenericOpcode::Store);
            store.add_operand(if f.is_stack_slot(dst_id) {
                Operand::stack(dst_id, (i * 4) as i32)
            } else {
                Operand::mem(dst_id, (i * 4) as i32, ptr)
            });
            store.add_operand(Operand::virt_reg(vreg, 32));
            out.push(store);
        }
    }

    fn lower_global(&mut self, global: &ir::GlobalVar) -> GlobalData {
        let ptr_bytes = self.ptr_bytes();
        let size = global.ty.byte_size(ptr_bytes);
        let mut gd = GlobalData::new(&global.name, size);

        let is_aggregate = global.ty.is_struct() || global.ty.array_len.is_some();
        if is_aggregate {
            match &global.init {
                GlobalInitValue::None => gd.items.push(GlobalInit::Zero(size)),
                GlobalInitValue::Str(s) => gd.items.push(GlobalInit::Bytes(s.clone())),
                GlobalInitValue::GlobalRef(name) => gd.items.push(GlobalInit::SymbolRef(
                    name.clone(),
                    self.symbol_ref_width(),
                )),
                GlobalInitValue::Scalars(values) => {
                    if global.ty.is_struct() {
                        for (member, value) in global.ty.members.iter().zip(values) {
                            gd.items
                                .push(GlobalInit::scalar(member.byte_size(ptr_bytes), *value));
                        }
                    } else {
                        let mut elem = global.ty.clone();
                        elem.array_len = None;
                        let elem_size = elem.byte_size(ptr_bytes);
                        for value in values {
                            gd.items.push(GlobalInit::scalar(elem_size, *value));
                        }
                    }
                }
            }
        } else {
            match &global.init {
                GlobalInitValue::None => gd.items.push(GlobalInit::scalar(size, 0)),
                GlobalInitValue::GlobalRef(name) => gd.items.push(GlobalInit::SymbolRef(
                    name.clone(),
                    self.symbol_ref_width(),
                )),
                GlobalInitValue::Scalars(values) => {
                    gd.items
                        .push(GlobalInit::scalar(size, values.first().copied().unwrap_or(0)));
                }
                GlobalInitValue::Str(s) => gd.items.push(GlobalInit::Bytes(s.clone())),
            }
        }
        gd
    }

    fn symbol_ref_width(&self) -> SymbolRefWidth {
        match self.tm.pointer_size() {
            32 => SymbolRefWidth::Word,
            64 => SymbolRefWidth::DoubleWord,
            other => crate::ice!("lower", "unhandled pointer size {}", other),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
