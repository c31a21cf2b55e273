//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Assembly emitter
//
// Walks the module in declaration order and prints GAS-compatible text.
// Non-instruction output goes through the Directive enum (sections,
// labels, alignment, data emission); instructions print their mnemonic
// from the target's instruction definitions with registers by name,
// immediates in decimal, and memory operands in the target's syntax.
//

use crate::arch::TargetMachine;
use crate::lir::{GlobalInit, Inst, Module, Operand, OperandKind, SymbolRefWidth};
use std::fmt::Write;

// ============================================================================
// Assembler Directives (Architecture-Independent)
// ============================================================================

/// Assembler directives shared by both targets: section switches, labels,
/// symbol visibility, alignment, and data emission.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Switch to the text section
    Text,
    /// Switch to the data section
    Data,
    /// .globl symbol - mark symbol as globally visible
    Globl(String),
    /// .balign bytes
    Balign(u32),
    /// Function, block, or data label (emits "name:")
    Label(String),
    /// .zero N - emit N zero bytes
    Zero(u32),
    /// .byte value - emit 8-bit value
    Byte(i64),
    /// .short value - emit 16-bit value
    Short(i64),
    /// .word value - emit 32-bit value
    Word(i64),
    /// .quad value - emit 64-bit value
    Quad(i64),
    /// .word symbol - 32-bit address of another symbol
    WordSym(String),
    /// .quad symbol - 64-bit address of another symbol
    QuadSym(String),
    /// .asciz "string" - emit null-terminated string
    Asciz(String),
    /// Blank line for readability
    Blank,
}

impl Directive {
    /// Emit assembly text for this directive.
    pub fn emit(&self, out: &mut String) {
        match self {
            Directive::Text => {
                let _ = writeln!(out, "\t.text");
            }
            Directive::Data => {
                let _ = writeln!(out, "\t.data");
            }
            Directive::Globl(sym) => {
                let _ = writeln!(out, "\t.globl {}", sym);
            }
            Directive::Balign(bytes) => {
                let _ = writeln!(out, "\t.balign {}", bytes);
            }
            Directive::Label(name) => {
                let _ = writeln!(out, "{}:", name);
            }
            Directive::Zero(n) => {
                let _ = writeln!(out, "\t.zero {}", n);
            }
            Directive::Byte(v) => {
                let _ = writeln!(out, "\t.byte {}", v);
            }
            Directive::Short(v) => {
                let _ = writeln!(out, "\t.short {}", v);
            }
            Directive::Word(v) => {
                let _ = writeln!(out, "\t.word {}", v);
            }
            Directive::Quad(v) => {
                let _ = writeln!(out, "\t.quad {}", v);
            }
            Directive::WordSym(sym) => {
                let _ = writeln!(out, "\t.word {}", sym);
            }
            Directive::QuadSym(sym) => {
                let _ = writeln!(out, "\t.quad {}", sym);
            }
            Directive::Asciz(s) => {
                let _ = writeln!(out, "\t.asciz \"{}\"", escape(s));
            }
            Directive::Blank => {
                let _ = writeln!(out);
            }
        }
    }
}

/// Directive carrying one global-data initializer step.
fn init_directive(item: &GlobalInit) -> Directive {
    match item {
        GlobalInit::Zero(n) => Directive::Zero(*n),
        GlobalInit::Bytes(s) => Directive::Asciz(s.clone()),
        GlobalInit::Byte(v) => Directive::Byte(*v),
        GlobalInit::Half(v) => Directive::Short(*v),
        GlobalInit::Word(v) => Directive::Word(*v),
        GlobalInit::DoubleWord(v) => Directive::Quad(*v),
        GlobalInit::SymbolRef(name, SymbolRefWidth::Word) => Directive::WordSym(name.clone()),
        GlobalInit::SymbolRef(name, SymbolRefWidth::DoubleWord) => {
            Directive::QuadSym(name.clone())
        }
    }
}

// ============================================================================
// Module Emission
// ============================================================================

pub fn emit(module: &Module, tm: &dyn TargetMachine) -> String {
    let mut out = String::new();

    Directive::Text.emit(&mut out);
    for func in &module.functions {
        Directive::Globl(func.name.clone()).emit(&mut out);
        Directive::Label(func.name.clone()).emit(&mut out);
        for block in &func.blocks {
            Directive::Label(format!("{}.{}", func.name, block.name)).emit(&mut out);
            for inst in &block.insts {
                let _ = writeln!(out, "\t{}", format_inst(inst, tm, &func.name));
            }
        }
        Directive::Blank.emit(&mut out);
    }

    if !module.globals.is_empty() {
        Directive::Data.emit(&mut out);
        for global in &module.globals {
            Directive::Balign(8).emit(&mut out);
            Directive::Globl(global.name.clone()).emit(&mut out);
            Directive::Label(global.name.clone()).emit(&mut out);
            for item in &global.items {
                init_directive(item).emit(&mut out);
            }
        }
    }

    out
}

fn format_inst(inst: &Inst, tm: &dyn TargetMachine, func_name: &str) -> String {
    if let Some(text) = tm.format_special(inst) {
        return text;
    }
    let opcode = match inst.opcode.target() {
        Some(t) => t,
        None => crate::ice!(
            "emit",
            "generic instruction reached emission: {}",
            inst.dump(tm)
        ),
    };
    let def = tm.instr_def(opcode);

    let mut text = def.mnemonic.to_string();
    for (i, op) in inst.operands.iter().enumerate() {
        text.push_str(if i == 0 { " " } else { ", " });
        text.push_str(&format_operand(op, tm, func_name));
    }
    text
}

fn format_operand(op: &Operand, tm: &dyn TargetMachine, func_name: &str) -> String {
    match &op.kind {
        OperandKind::PhysReg(id) => tm.reg_info().name(*id).to_string(),
        OperandKind::Imm(v) => format!("{}{}", tm.imm_prefix(), v),
        OperandKind::FpImm(v) => format!("{}{:?}", tm.imm_prefix(), v),
        OperandKind::Mem { base, offset } => tm.format_mem(tm.reg_info().name(*base), *offset),
        OperandKind::Label(l) => format!("{}.{}", func_name, l),
        OperandKind::FuncName(n) => n.clone(),
        OperandKind::Global(g) => g.clone(),
        OperandKind::VirtReg(_) | OperandKind::Param(_) | OperandKind::StackAccess { .. } => {
            crate::ice!("emit", "unallocated operand reached emission")
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::create_target;
    use crate::lir::{BasicBlock, Function, GlobalData, LowLevelType};

    #[test]
    fn directive_emission() {
        let mut out = String::new();
        Directive::Text.emit(&mut out);
        assert_eq!(out, "\t.text\n");

        let mut out = String::new();
        Directive::Globl("main".into()).emit(&mut out);
        assert_eq!(out, "\t.globl main\n");

        let mut out = String::new();
        Directive::Label("main".into()).emit(&mut out);
        assert_eq!(out, "main:\n");

        let mut out = String::new();
        Directive::Zero(16).emit(&mut out);
        assert_eq!(out, "\t.zero 16\n");

        let mut out = String::new();
        Directive::Quad(9).emit(&mut out);
        assert_eq!(out, "\t.quad 9\n");

        let mut out = String::new();
        Directive::Asciz("a\"b\n".into()).emit(&mut out);
        assert_eq!(out, "\t.asciz \"a\\\"b\\n\"\n");
    }

    #[test]
    fn emits_function_and_block_labels() {
        let tm = create_target("aarch64").unwrap();
        let mut f = Function::new("main");
        f.blocks.push(BasicBlock::new("entry"));
        let mut body = BasicBlock::new("loop_body");
        let mut b = Inst::target(crate::arch::aarch64::Op::B.code());
        b.add_operand(Operand::label("loop_body"));
        body.push(b);
        f.blocks.push(body);
        let module = Module {
            functions: vec![f],
            globals: vec![],
        };
        let asm = emit(&module, tm.as_ref());
        assert!(asm.contains("\t.text\n"));
        assert!(asm.contains("\t.globl main\n"));
        assert!(asm.contains("main:\n"));
        assert!(asm.contains("main.loop_body:\n"));
        assert!(asm.contains("\tb main.loop_body\n"));
    }

    #[test]
    fn formats_aarch64_operands() {
        let tm = create_target("aarch64").unwrap();
        let mut f = Function::new("f");
        let mut bb = BasicBlock::new("entry");
        let mut add = Inst::target(crate::arch::aarch64::Op::AddRri.code());
        add.add_operand(Operand::phys_reg(32, 32)); // w0
        add.add_operand(Operand::phys_reg(33, 32)); // w1
        add.add_operand(Operand::imm(100, 12));
        bb.push(add);
        let mut ldr = Inst::target(crate::arch::aarch64::Op::Ldr.code());
        ldr.add_operand(Operand::phys_reg(0, 64).with_llt(LowLevelType::ptr(64)));
        ldr.add_operand(Operand::mem(29, 16, 64));
        bb.push(ldr);
        f.blocks.push(bb);
        let module = Module {
            functions: vec![f],
            globals: vec![],
        };
        let asm = emit(&module, tm.as_ref());
        assert!(asm.contains("\tadd w0, w1, #100\n"));
        assert!(asm.contains("\tldr x0, [x29, #16]\n"));
    }

    #[test]
    fn formats_riscv_operands() {
        let tm = create_target("riscv32").unwrap();
        let mut f = Function::new("f");
        let mut bb = BasicBlock::new("entry");
        let mut lw = Inst::target(crate::arch::riscv32::Op::Lw.code());
        lw.add_operand(Operand::phys_reg(10, 32)); // a0
        lw.add_operand(Operand::mem(8, 8, 32)); // 8(s0)
        bb.push(lw);
        let mut li = Inst::target(crate::arch::riscv32::Op::Li.code());
        li.add_operand(Operand::phys_reg(10, 32));
        li.add_operand(Operand::imm(42, 32));
        bb.push(li);
        f.blocks.push(bb);
        let module = Module {
            functions: vec![f],
            globals: vec![],
        };
        let asm = emit(&module, tm.as_ref());
        assert!(asm.contains("\tlw a0, 8(s0)\n"));
        assert!(asm.contains("\tli a0, 42\n"));
    }

    #[test]
    fn emits_global_data() {
        let tm = create_target("aarch64").unwrap();
        let mut msg = GlobalData::new("msg", 7);
        msg.items.push(GlobalInit::Bytes("hi: %d\n".into()));
        let mut head = GlobalData::new("head", 8);
        head.items.push(GlobalInit::DoubleWord(0));
        let mut ptr = GlobalData::new("p", 8);
        ptr.items
            .push(GlobalInit::SymbolRef("msg".into(), SymbolRefWidth::DoubleWord));
        let module = Module {
            functions: vec![],
            globals: vec![msg, head, ptr],
        };
        let asm = emit(&module, tm.as_ref());
        assert!(asm.contains("\t.data\n"));
        assert!(asm.contains("msg:\n\t.asciz \"hi: %d\\n\"\n"));
        assert!(asm.contains("head:\n\t.quad 0\n"));
        assert!(asm.contains("p:\n\t.quad msg\n"));
    }

    #[test]
    fn cset_prints_condition() {
        let tm = create_target("aarch64").unwrap();
        let mut f = Function::new("f");
        let mut bb = BasicBlock::new("entry");
        let mut cset = Inst::target(crate::arch::aarch64::Op::Cset.code());
        cset.add_operand(Operand::phys_reg(32, 32));
        cset.relation = crate::lir::Relation::Lt;
        bb.push(cset);
        f.blocks.push(bb);
        let module = Module {
            functions: vec![f],
            globals: vec![],
        };
        let asm = emit(&module, tm.as_ref());
        assert!(asm.contains("\tcset w0, lt\n"));
    }
}
