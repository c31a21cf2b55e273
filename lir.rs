//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Low-level Intermediate Representation (LLIR)
//
// Target-generic machine IR used by every backend pass. Instructions
// carry generic opcodes after lowering and concrete target opcodes after
// instruction selection; operands are virtual registers and abstract
// stack slots until register allocation and frame finalization retire
// them.
//

use crate::arch::TargetMachine;
use std::collections::BTreeMap;
use std::fmt::{self, Write};

// ============================================================================
// Low-Level Type
// ============================================================================

/// Bit width plus scalar/pointer tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LowLevelType {
    Invalid,
    Scalar(u32),
    Pointer(u32),
}

impl LowLevelType {
    pub fn scalar(bits: u32) -> Self {
        LowLevelType::Scalar(bits)
    }

    pub fn ptr(bits: u32) -> Self {
        LowLevelType::Pointer(bits)
    }

    pub fn bits(&self) -> u32 {
        match self {
            LowLevelType::Invalid => 0,
            LowLevelType::Scalar(b) | LowLevelType::Pointer(b) => *b,
        }
    }

    pub fn set_bits(&mut self, bits: u32) {
        match self {
            LowLevelType::Invalid => *self = LowLevelType::Scalar(bits),
            LowLevelType::Scalar(b) | LowLevelType::Pointer(b) => *b = bits,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, LowLevelType::Pointer(_))
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, LowLevelType::Invalid)
    }
}

impl fmt::Display for LowLevelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowLevelType::Invalid => write!(f, "invalid"),
            LowLevelType::Scalar(b) => write!(f, "s{}", b),
            LowLevelType::Pointer(b) => write!(f, "p{}", b),
        }
    }
}

// ============================================================================
// Operands
// ============================================================================

/// Operand payload. Structural equality within a variant.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandKind {
    /// Physical register by target register id
    PhysReg(u32),
    /// Virtual register
    VirtReg(u32),
    /// Signed integer immediate
    Imm(i64),
    /// Floating-point immediate
    FpImm(f64),
    /// Memory address: base register id + byte offset
    Mem { base: u32, offset: i32 },
    /// Abstract stack slot + byte offset (retired by frame finalization)
    StackAccess { slot: u32, offset: i32 },
    /// Function parameter by MIR value id (retired by register allocation)
    Param(u32),
    /// Basic-block label
    Label(String),
    /// Callee name of a CALL
    FuncName(String),
    /// Global data symbol
    Global(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub kind: OperandKind,
    pub llt: LowLevelType,
    /// Target register class, filled in by register-class selection
    pub reg_class: Option<u32>,
}

impl Operand {
    pub fn phys_reg(id: u32, bits: u32) -> Self {
        Operand {
            kind: OperandKind::PhysReg(id),
            llt: LowLevelType::scalar(bits),
            reg_class: None,
        }
    }

    pub fn virt_reg(id: u32, bits: u32) -> Self {
        Operand {
            kind: OperandKind::VirtReg(id),
            llt: LowLevelType::scalar(bits),
            reg_class: None,
        }
    }

    pub fn virt_reg_ptr(id: u32, bits: u32) -> Self {
        Operand {
            kind: OperandKind::VirtReg(id),
            llt: LowLevelType::ptr(bits),
            reg_class: None,
        }
    }

    pub fn imm(value: i64, bits: u32) -> Self {
        Operand {
            kind: OperandKind::Imm(value),
            llt: LowLevelType::scalar(bits),
            reg_class: None,
        }
    }

    pub fn fp_imm(value: f64, bits: u32) -> Self {
        Operand {
            kind: OperandKind::FpImm(value),
            llt: LowLevelType::scalar(bits),
            reg_class: None,
        }
    }

    pub fn mem(base: u32, offset: i32, ptr_bits: u32) -> Self {
        Operand {
            kind: OperandKind::Mem { base, offset },
            llt: LowLevelType::ptr(ptr_bits),
            reg_class: None,
        }
    }

    pub fn stack(slot: u32, offset: i32) -> Self {
        Operand {
            kind: OperandKind::StackAccess { slot, offset },
            llt: LowLevelType::Invalid,
            reg_class: None,
        }
    }

    pub fn param(id: u32, llt: LowLevelType) -> Self {
        Operand {
            kind: OperandKind::Param(id),
            llt,
            reg_class: None,
        }
    }

    pub fn label(name: &str) -> Self {
        Operand {
            kind: OperandKind::Label(name.to_string()),
            llt: LowLevelType::Invalid,
            reg_class: None,
        }
    }

    pub fn func_name(name: &str) -> Self {
        Operand {
            kind: OperandKind::FuncName(name.to_string()),
            llt: LowLevelType::Invalid,
            reg_class: None,
        }
    }

    pub fn global(name: &str, ptr_bits: u32) -> Self {
        Operand {
            kind: OperandKind::Global(name.to_string()),
            llt: LowLevelType::ptr(ptr_bits),
            reg_class: None,
        }
    }

    pub fn with_llt(mut self, llt: LowLevelType) -> Self {
        self.llt = llt;
        self
    }

    pub fn bits(&self) -> u32 {
        self.llt.bits()
    }

    pub fn set_bits(&mut self, bits: u32) {
        self.llt.set_bits(bits);
    }

    pub fn is_phys_reg(&self) -> bool {
        matches!(self.kind, OperandKind::PhysReg(_))
    }

    pub fn is_virt_reg(&self) -> bool {
        matches!(self.kind, OperandKind::VirtReg(_))
    }

    pub fn is_register(&self) -> bool {
        self.is_phys_reg() || self.is_virt_reg()
    }

    pub fn is_imm(&self) -> bool {
        matches!(self.kind, OperandKind::Imm(_) | OperandKind::FpImm(_))
    }

    pub fn is_int_imm(&self) -> bool {
        matches!(self.kind, OperandKind::Imm(_))
    }

    pub fn is_stack_access(&self) -> bool {
        matches!(self.kind, OperandKind::StackAccess { .. })
    }

    pub fn is_mem(&self) -> bool {
        matches!(self.kind, OperandKind::Mem { .. })
    }

    pub fn is_global(&self) -> bool {
        matches!(self.kind, OperandKind::Global(_))
    }

    pub fn is_param(&self) -> bool {
        matches!(self.kind, OperandKind::Param(_))
    }

    /// Register id regardless of virtual/physical flavor
    pub fn reg_id(&self) -> Option<u32> {
        match self.kind {
            OperandKind::PhysReg(id) | OperandKind::VirtReg(id) => Some(id),
            _ => None,
        }
    }

    pub fn imm_value(&self) -> Option<i64> {
        match self.kind {
            OperandKind::Imm(v) => Some(v),
            _ => None,
        }
    }

    pub fn slot_id(&self) -> Option<u32> {
        match self.kind {
            OperandKind::StackAccess { slot, .. } => Some(slot),
            _ => None,
        }
    }

    pub fn offset(&self) -> i32 {
        match self.kind {
            OperandKind::Mem { offset, .. } | OperandKind::StackAccess { offset, .. } => offset,
            _ => 0,
        }
    }

    pub fn set_offset(&mut self, off: i32) {
        match &mut self.kind {
            OperandKind::Mem { offset, .. } | OperandKind::StackAccess { offset, .. } => {
                *offset = off
            }
            _ => {}
        }
    }
}

// ============================================================================
// Compare Relations
// ============================================================================

/// Relation attached to CMP/CMPF instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Relation {
    #[default]
    Invalid,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    ULt,
    ULe,
    UGt,
    UGe,
}

impl Relation {
    pub fn name(&self) -> &'static str {
        match self {
            Relation::Invalid => "invalid",
            Relation::Eq => "eq",
            Relation::Ne => "ne",
            Relation::Lt => "lt",
            Relation::Le => "le",
            Relation::Gt => "gt",
            Relation::Ge => "ge",
            Relation::ULt => "ult",
            Relation::ULe => "ule",
            Relation::UGt => "ugt",
            Relation::UGe => "uge",
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            Relation::ULt | Relation::ULe | Relation::UGt | Relation::UGe
        )
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Opcodes
// ============================================================================

/// Target-generic opcodes produced by MIR lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericOpcode {
    And,
    Or,
    Xor,
    Lsl,
    Lsr,
    Add,
    Sub,
    Mul,
    Div,
    DivU,
    Mod,
    ModU,
    Cmp,
    AddF,
    SubF,
    MulF,
    DivF,
    CmpF,
    SExt,
    ZExt,
    Trunc,
    FToI,
    IToF,
    BitCast,
    ZExtLoad,
    StackAddress,
    GlobalAddress,
    LoadImm,
    Mov,
    MovF,
    Store,
    Load,
    Jump,
    Branch,
    Call,
    Ret,
    AddS,
    AddC,
    MulHU,
    Merge,
    Split,
}

impl GenericOpcode {
    pub fn name(&self) -> &'static str {
        match self {
            GenericOpcode::And => "AND",
            GenericOpcode::Or => "OR",
            GenericOpcode::Xor => "XOR",
            GenericOpcode::Lsl => "LSL",
            GenericOpcode::Lsr => "LSR",
            GenericOpcode::Add => "ADD",
            GenericOpcode::Sub => "SUB",
            GenericOpcode::Mul => "MUL",
            GenericOpcode::Div => "DIV",
            GenericOpcode::DivU => "DIVU",
            GenericOpcode::Mod => "MOD",
            GenericOpcode::ModU => "MODU",
            GenericOpcode::Cmp => "CMP",
            GenericOpcode::AddF => "ADDF",
            GenericOpcode::SubF => "SUBF",
            GenericOpcode::MulF => "MULF",
            GenericOpcode::DivF => "DIVF",
            GenericOpcode::CmpF => "CMPF",
            GenericOpcode::SExt => "SEXT",
            GenericOpcode::ZExt => "ZEXT",
            GenericOpcode::Trunc => "TRUNC",
            GenericOpcode::FToI => "FTOI",
            GenericOpcode::IToF => "ITOF",
            GenericOpcode::BitCast => "BITCAST",
            GenericOpcode::ZExtLoad => "ZEXT_LOAD",
            GenericOpcode::StackAddress => "STACK_ADDRESS",
            GenericOpcode::GlobalAddress => "GLOBAL_ADDRESS",
            GenericOpcode::LoadImm => "LOAD_IMM",
            GenericOpcode::Mov => "MOV",
            GenericOpcode::MovF => "MOVF",
            GenericOpcode::Store => "STORE",
            GenericOpcode::Load => "LOAD",
            GenericOpcode::Jump => "JUMP",
            GenericOpcode::Branch => "BRANCH",
            GenericOpcode::Call => "CALL",
            GenericOpcode::Ret => "RET",
            GenericOpcode::AddS => "ADDS",
            GenericOpcode::AddC => "ADDC",
            GenericOpcode::MulHU => "MULHU",
            GenericOpcode::Merge => "MERGE",
            GenericOpcode::Split => "SPLIT",
        }
    }

    /// Does the first operand name a definition?
    pub fn has_def(&self) -> bool {
        !matches!(
            self,
            GenericOpcode::Store
                | GenericOpcode::Jump
                | GenericOpcode::Branch
                | GenericOpcode::Ret
                | GenericOpcode::Call
        )
    }
}

/// Opcode namespace: generic until selection, target-specific after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Generic(GenericOpcode),
    Target(u32),
}

impl Opcode {
    pub fn generic(&self) -> Option<GenericOpcode> {
        match self {
            Opcode::Generic(g) => Some(*g),
            Opcode::Target(_) => None,
        }
    }

    pub fn target(&self) -> Option<u32> {
        match self {
            Opcode::Target(t) => Some(*t),
            Opcode::Generic(_) => None,
        }
    }
}

// ============================================================================
// Instructions
// ============================================================================

/// Attribute bits on an instruction.
pub const IS_LOAD: u8 = 1 << 0;
pub const IS_STORE: u8 = 1 << 1;
pub const IS_CALL: u8 = 1 << 2;
pub const IS_JUMP: u8 = 1 << 3;
pub const IS_RETURN: u8 = 1 << 4;
pub const FALLTHROUGH_BRANCH: u8 = 1 << 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub flags: u8,
    pub relation: Relation,
}

impl Inst {
    pub fn new(op: GenericOpcode) -> Self {
        let mut inst = Inst {
            opcode: Opcode::Generic(op),
            operands: Vec::new(),
            flags: 0,
            relation: Relation::Invalid,
        };
        inst.update_flags();
        inst
    }

    pub fn target(op: u32) -> Self {
        Inst {
            opcode: Opcode::Target(op),
            operands: Vec::new(),
            flags: 0,
            relation: Relation::Invalid,
        }
    }

    /// Derive attribute bits from a generic opcode.
    fn update_flags(&mut self) {
        if let Opcode::Generic(g) = self.opcode {
            match g {
                GenericOpcode::Load | GenericOpcode::ZExtLoad => self.flags |= IS_LOAD,
                GenericOpcode::Store => self.flags |= IS_STORE,
                GenericOpcode::Ret => self.flags |= IS_RETURN,
                GenericOpcode::Jump => self.flags |= IS_JUMP,
                GenericOpcode::Call => self.flags |= IS_CALL,
                _ => {}
            }
        }
    }

    pub fn set_opcode(&mut self, op: GenericOpcode) {
        self.opcode = Opcode::Generic(op);
        self.update_flags();
    }

    pub fn set_target_opcode(&mut self, op: u32) {
        self.opcode = Opcode::Target(op);
    }

    pub fn with_operand(mut self, op: Operand) -> Self {
        self.operands.push(op);
        self
    }

    pub fn with_relation(mut self, rel: Relation) -> Self {
        self.relation = rel;
        self
    }

    pub fn with_flag(mut self, flag: u8) -> Self {
        self.flags |= flag;
        self
    }

    pub fn add_operand(&mut self, op: Operand) {
        self.operands.push(op);
    }

    pub fn add_flag(&mut self, flag: u8) {
        self.flags |= flag;
    }

    pub fn is_load(&self) -> bool {
        self.flags & IS_LOAD != 0
    }

    pub fn is_store(&self) -> bool {
        self.flags & IS_STORE != 0
    }

    pub fn is_call(&self) -> bool {
        self.flags & IS_CALL != 0
    }

    pub fn is_jump(&self) -> bool {
        self.flags & IS_JUMP != 0
    }

    pub fn is_return(&self) -> bool {
        self.flags & IS_RETURN != 0
    }

    pub fn is_fallthrough_branch(&self) -> bool {
        self.flags & FALLTHROUGH_BRANCH != 0
    }

    /// Definition operand, when the opcode has one. Only meaningful for
    /// generic opcodes; target instructions consult their InstrDef.
    pub fn def(&self) -> Option<&Operand> {
        match self.opcode {
            Opcode::Generic(g) if g.has_def() => self.operands.first(),
            _ => None,
        }
    }

    pub fn def_mut(&mut self) -> Option<&mut Operand> {
        match self.opcode {
            Opcode::Generic(g) if g.has_def() => self.operands.first_mut(),
            _ => None,
        }
    }

    pub fn operand(&self, idx: usize) -> Option<&Operand> {
        self.operands.get(idx)
    }

    pub fn remove_operand(&mut self, idx: usize) {
        self.operands.remove(idx);
    }

    /// Render for pass-dump output. Target opcodes resolve their mnemonic
    /// through the target's instruction definitions.
    pub fn dump(&self, tm: &dyn TargetMachine) -> String {
        let name = match self.opcode {
            Opcode::Generic(g) => match g {
                GenericOpcode::Cmp | GenericOpcode::CmpF => {
                    format!("{}.{}", g.name(), self.relation)
                }
                _ => g.name().to_string(),
            },
            Opcode::Target(t) => tm.instr_def(t).mnemonic.to_uppercase(),
        };
        let mut out = format!("{:<16}", name);
        for (i, op) in self.operands.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}", op);
        }
        out
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperandKind::PhysReg(id) => write!(f, "${}({})", id, self.llt),
            OperandKind::VirtReg(id) => write!(f, "%{}({})", id, self.llt),
            OperandKind::Imm(v) => write!(f, "#{}", v),
            OperandKind::FpImm(v) => write!(f, "#{}", v),
            OperandKind::Mem { base, offset } => {
                if *offset != 0 {
                    write!(f, "[${}+{}]", base, offset)
                } else {
                    write!(f, "[${}]", base)
                }
            }
            OperandKind::StackAccess { slot, offset } => {
                if *offset != 0 {
                    write!(f, "stack{}+{}", slot, offset)
                } else {
                    write!(f, "stack{}", slot)
                }
            }
            OperandKind::Param(id) => write!(f, "param{}", id),
            OperandKind::Label(l) => write!(f, "<{}>", l),
            OperandKind::FuncName(n) => write!(f, "@{}", n),
            OperandKind::Global(g) => write!(f, "@{}", g),
        }
    }
}

// ============================================================================
// Basic Blocks and Functions
// ============================================================================

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub name: String,
    pub insts: Vec<Inst>,
}

impl BasicBlock {
    pub fn new(name: &str) -> Self {
        BasicBlock {
            name: name.to_string(),
            insts: Vec::new(),
        }
    }

    pub fn push(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    /// Insert before `idx`, returning the index of the inserted instruction.
    pub fn insert_before(&mut self, idx: usize, inst: Inst) -> usize {
        self.insts.insert(idx, inst);
        idx
    }

    /// Insert after `idx`, returning the index of the inserted instruction.
    pub fn insert_after(&mut self, idx: usize, inst: Inst) -> usize {
        self.insts.insert(idx + 1, inst);
        idx + 1
    }

    pub fn erase(&mut self, idx: usize) {
        self.insts.remove(idx);
    }
}

/// One abstract stack object in a function's frame.
#[derive(Debug, Clone)]
pub struct StackObject {
    pub size: u32,
    pub align: u32,
    /// Byte offset from the frame pointer, assigned by frame finalization
    pub offset: Option<i32>,
}

/// Ordered map of slot id to stack object. Iteration order (ascending slot
/// id) is the frame layout order.
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    objects: BTreeMap<u32, StackObject>,
    pub total_size: u32,
}

impl StackFrame {
    pub fn insert(&mut self, id: u32, size: u32, align: u32) {
        self.objects.insert(
            id,
            StackObject {
                size,
                align,
                offset: None,
            },
        );
    }

    pub fn contains(&self, id: u32) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn object(&self, id: u32) -> Option<&StackObject> {
        self.objects.get(&id)
    }

    pub fn size_of(&self, id: u32) -> Option<u32> {
        self.objects.get(&id).map(|o| o.size)
    }

    pub fn set_offset(&mut self, id: u32, offset: i32) {
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.offset = Some(offset);
        }
    }

    pub fn offset_of(&self, id: u32) -> Option<i32> {
        self.objects.get(&id).and_then(|o| o.offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &StackObject)> {
        self.objects.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Parameter descriptor carried over from the MIR function signature.
#[derive(Debug, Clone)]
pub struct Param {
    pub id: u32,
    pub llt: LowLevelType,
    pub is_struct_ptr: bool,
    pub is_fp: bool,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub blocks: Vec<BasicBlock>,
    pub frame: StackFrame,
    pub used_callee_saved: Vec<u32>,
    pub has_call: bool,
    next_vreg: u32,
}

impl Function {
    pub fn new(name: &str) -> Self {
        Function {
            name: name.to_string(),
            params: Vec::new(),
            blocks: Vec::new(),
            frame: StackFrame::default(),
            used_callee_saved: Vec::new(),
            has_call: false,
            next_vreg: 0,
        }
    }

    pub fn new_vreg(&mut self) -> u32 {
        let v = self.next_vreg;
        self.next_vreg += 1;
        v
    }

    pub fn next_vreg(&self) -> u32 {
        self.next_vreg
    }

    /// Raise the vreg counter so fresh ids stay clear of a caller-managed
    /// id range (MIR value ids share the space with vregs and slots).
    pub fn reserve_ids(&mut self, floor: u32) {
        if self.next_vreg < floor {
            self.next_vreg = floor;
        }
    }

    /// Slot ids share the virtual-register id space: inserting a slot bumps
    /// the counter past the slot's id so later vregs cannot collide.
    pub fn insert_stack_slot(&mut self, id: u32, size: u32, align: u32) {
        if self.next_vreg <= id {
            self.next_vreg = id + 1;
        }
        self.frame.insert(id, size, align);
    }

    pub fn is_stack_slot(&self, id: u32) -> bool {
        self.frame.contains(id)
    }

    pub fn add_param(&mut self, id: u32, llt: LowLevelType, is_struct_ptr: bool, is_fp: bool) {
        if self.next_vreg <= id {
            self.next_vreg = id + 1;
        }
        self.params.push(Param {
            id,
            llt,
            is_struct_ptr,
            is_fp,
        });
    }

    pub fn mark_used_callee_saved(&mut self, reg: u32) {
        if !self.used_callee_saved.contains(&reg) {
            self.used_callee_saved.push(reg);
        }
    }

    /// Split borrow for selection hooks: the vreg counter and the frame
    /// are disjoint, so both can be handed out at once.
    pub fn sel_parts(&mut self) -> (&mut u32, &StackFrame) {
        (&mut self.next_vreg, &self.frame)
    }
}

// ============================================================================
// Global Data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRefWidth {
    Word,
    DoubleWord,
}

/// One initializer step of a global data entry.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    /// Zero fill of N bytes
    Zero(u32),
    /// String literal payload, emitted as .asciz
    Bytes(String),
    /// 8-bit value
    Byte(i64),
    /// 16-bit value
    Half(i64),
    /// 32-bit value
    Word(i64),
    /// 64-bit value
    DoubleWord(i64),
    /// Address of another symbol, pointer-width sized
    SymbolRef(String, SymbolRefWidth),
}

impl GlobalInit {
    /// Scalar initializer of the given byte size.
    pub fn scalar(size: u32, value: i64) -> Self {
        match size {
            1 => GlobalInit::Byte(value),
            2 => GlobalInit::Half(value),
            4 => GlobalInit::Word(value),
            _ => GlobalInit::DoubleWord(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalData {
    pub name: String,
    pub size: u32,
    pub items: Vec<GlobalInit>,
}

impl GlobalData {
    pub fn new(name: &str, size: u32) -> Self {
        GlobalData {
            name: name.to_string(),
            size,
            items: Vec::new(),
        }
    }
}

// ============================================================================
// Module
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub globals: Vec<GlobalData>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    /// Render the whole module for pass-dump output.
    pub fn dump(&self, tm: &dyn TargetMachine) -> String {
        let mut out = String::new();
        for func in &self.functions {
            let _ = writeln!(out, "func {}:", func.name);
            for block in &func.blocks {
                let _ = writeln!(out, "{}:", block.name);
                for inst in &block.insts {
                    let _ = writeln!(out, "    {}", inst.dump(tm));
                }
            }
            let _ = writeln!(out);
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llt_widths() {
        let mut t = LowLevelType::scalar(8);
        assert_eq!(t.bits(), 8);
        assert!(!t.is_pointer());
        t.set_bits(32);
        assert_eq!(t.bits(), 32);

        let p = LowLevelType::ptr(64);
        assert!(p.is_pointer());
        assert_eq!(p.bits(), 64);
        assert!(!LowLevelType::Invalid.is_valid());
    }

    #[test]
    fn operand_predicates() {
        let v = Operand::virt_reg(3, 32);
        assert!(v.is_virt_reg());
        assert!(v.is_register());
        assert_eq!(v.reg_id(), Some(3));

        let imm = Operand::imm(42, 32);
        assert!(imm.is_imm());
        assert_eq!(imm.imm_value(), Some(42));

        let mut st = Operand::stack(7, 0);
        assert!(st.is_stack_access());
        st.set_offset(8);
        assert_eq!(st.offset(), 8);
        assert_eq!(st.slot_id(), Some(7));
    }

    #[test]
    fn instruction_flags() {
        let store = Inst::new(GenericOpcode::Store);
        assert!(store.is_store());
        assert!(store.def().is_none());

        let load = Inst::new(GenericOpcode::Load).with_operand(Operand::virt_reg(0, 32));
        assert!(load.is_load());
        assert!(load.def().is_some());

        let ret = Inst::new(GenericOpcode::Ret);
        assert!(ret.is_return());

        let call = Inst::new(GenericOpcode::Call);
        assert!(call.is_call());
        assert!(call.def().is_none());
    }

    #[test]
    fn slot_ids_bump_vreg_counter() {
        let mut f = Function::new("f");
        assert_eq!(f.new_vreg(), 0);
        f.insert_stack_slot(5, 4, 4);
        // counter must be above the slot id now
        assert_eq!(f.new_vreg(), 6);
        assert!(f.is_stack_slot(5));
        assert!(!f.is_stack_slot(6));
    }

    #[test]
    fn frame_iteration_is_slot_ordered() {
        let mut frame = StackFrame::default();
        frame.insert(9, 8, 8);
        frame.insert(2, 4, 4);
        frame.insert(5, 1, 1);
        let ids: Vec<u32> = frame.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn scalar_init_directive_sizes() {
        assert_eq!(GlobalInit::scalar(1, 7), GlobalInit::Byte(7));
        assert_eq!(GlobalInit::scalar(2, 7), GlobalInit::Half(7));
        assert_eq!(GlobalInit::scalar(4, 7), GlobalInit::Word(7));
        assert_eq!(GlobalInit::scalar(8, 7), GlobalInit::DoubleWord(7));
    }
}
