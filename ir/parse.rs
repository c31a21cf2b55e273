//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Textual MIR reader
//
// The standalone driver consumes the backend's MIR contract in a small
// line-oriented text form. Semantic checking is out of scope: the
// backend trusts its producer, so the reader validates shape only.
//
//   type %pair = { i32, i64 }
//   global @msg : [7 x i8] = str "hi: %d\n"
//   global @head : i64
//
//   func @add(i32 %0, i32 %1) -> i32 {
//   entry:
//     %2 = add i32 %0, %1
//     ret i32 %2
//   }
//
// Instructions: add sub mul div divu mod modu and or xor shl lshr
// fadd fsub fmul fdiv, cmp <rel>, sext zext trunc ftoi itof bitcast,
// load store gep stackalloc, jump branch call ret memcpy.
//

use super::{
    BinOp, Function, GlobalInitValue, GlobalVar, Instruction, IrBlock, IrParam, IrType, Module,
    UnOp, Value, ValueKind,
};
use crate::lir::Relation;
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct ParseError {
    pub line: usize,
    pub msg: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.msg)
    }
}

impl std::error::Error for ParseError {}

type Result<T> = std::result::Result<T, ParseError>;

// ============================================================================
// Line tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// identifier, %name, @name, or number
    Word(String),
    /// string literal (unescaped)
    Str(String),
    Sym(char),
    Arrow,
}

fn tokenize(line: &str, lineno: usize) -> Result<Vec<Tok>> {
    let mut toks = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ';' | '#' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('0') => s.push('\0'),
                            Some('\\') => s.push('\\'),
                            Some('"') => s.push('"'),
                            other => {
                                return Err(ParseError {
                                    line: lineno,
                                    msg: format!("bad escape {:?}", other),
                                })
                            }
                        },
                        Some(c) => s.push(c),
                        None => {
                            return Err(ParseError {
                                line: lineno,
                                msg: "unterminated string".into(),
                            })
                        }
                    }
                }
                toks.push(Tok::Str(s));
            }
            '-' => {
                chars.next();
                if chars.peek() == Some(&'>') {
                    chars.next();
                    toks.push(Tok::Arrow);
                } else {
                    // negative number literal
                    let mut w = String::from("-");
                    while let Some(&c) = chars.peek() {
                        if c.is_ascii_alphanumeric() || c == '.' {
                            w.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    toks.push(Tok::Word(w));
                }
            }
            '(' | ')' | '{' | '}' | '[' | ']' | ',' | '=' | ':' | '*' => {
                chars.next();
                toks.push(Tok::Sym(c));
            }
            _ => {
                let mut w = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || matches!(c, '%' | '@' | '_' | '.') {
                        w.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if w.is_empty() {
                    return Err(ParseError {
                        line: lineno,
                        msg: format!("unexpected character {:?}", c),
                    });
                }
                toks.push(Tok::Word(w));
            }
        }
    }
    Ok(toks)
}

// ============================================================================
// Token cursor
// ============================================================================

struct Cursor {
    toks: Vec<Tok>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn new(toks: Vec<Tok>, line: usize) -> Self {
        Cursor { toks, pos: 0, line }
    }

    fn err<T>(&self, msg: impl Into<String>) -> Result<T> {
        Err(ParseError {
            line: self.line,
            msg: msg.into(),
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_sym(&mut self, sym: char) -> Result<()> {
        match self.next() {
            Some(Tok::Sym(c)) if c == sym => Ok(()),
            other => self.err(format!("expected '{}', found {:?}", sym, other)),
        }
    }

    fn accept_sym(&mut self, sym: char) -> bool {
        if self.peek() == Some(&Tok::Sym(sym)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn word(&mut self) -> Result<String> {
        match self.next() {
            Some(Tok::Word(w)) => Ok(w),
            other => self.err(format!("expected a word, found {:?}", other)),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }
}

fn parse_int(w: &str, c: &Cursor) -> Result<i64> {
    let (digits, neg) = match w.strip_prefix('-') {
        Some(d) => (d, true),
        None => (w, false),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse::<i64>()
    };
    match value {
        Ok(v) => Ok(if neg { -v } else { v }),
        Err(_) => c.err(format!("bad integer literal {:?}", w)),
    }
}

// ============================================================================
// Reader
// ============================================================================

pub fn parse(source: &str) -> Result<Module> {
    Reader::new().parse(source)
}

struct Reader {
    types: HashMap<String, IrType>,
    module: Module,
}

impl Reader {
    fn new() -> Self {
        Reader {
            types: HashMap::new(),
            module: Module::default(),
        }
    }

    fn parse(mut self, source: &str) -> Result<Module> {
        let mut lines = source.lines().enumerate().peekable();

        while let Some((lineno, line)) = lines.next() {
            let lineno = lineno + 1;
            let toks = tokenize(line, lineno)?;
            if toks.is_empty() {
                continue;
            }
            let mut c = Cursor::new(toks, lineno);
            let head = c.word()?;
            match head.as_str() {
                "type" => self.parse_type_def(&mut c)?,
                "global" => self.parse_global(&mut c)?,
                "declare" => self.parse_declare(&mut c)?,
                "func" => {
                    let mut body = Vec::new();
                    for (ln, l) in lines.by_ref() {
                        if l.trim() == "}" {
                            break;
                        }
                        body.push((ln + 1, l.to_string()));
                    }
                    self.parse_func(&mut c, &body)?;
                }
                other => {
                    return c.err(format!("unexpected directive {:?}", other));
                }
            }
        }
        Ok(self.module)
    }

    // type %pair = { i32, i64 }
    fn parse_type_def(&mut self, c: &mut Cursor) -> Result<()> {
        let name = c.word()?;
        let name = name
            .strip_prefix('%')
            .ok_or_else(|| ParseError {
                line: c.line,
                msg: "type names start with %".into(),
            })?
            .to_string();
        c.expect_sym('=')?;
        c.expect_sym('{')?;
        let mut members = Vec::new();
        loop {
            members.push(self.parse_type(c)?);
            if !c.accept_sym(',') {
                break;
            }
        }
        c.expect_sym('}')?;
        self.types.insert(name, IrType::strct(members));
        Ok(())
    }

    // void | iN | uN | fN | %name | [N x ty], then trailing '*'s
    fn parse_type(&mut self, c: &mut Cursor) -> Result<IrType> {
        let mut ty = if c.accept_sym('[') {
            let len = parse_int(&c.word()?, c)? as u32;
            let x = c.word()?;
            if x != "x" {
                return c.err("expected 'x' in array type");
            }
            let elem = self.parse_type(c)?;
            c.expect_sym(']')?;
            elem.array_of(len)
        } else {
            let w = c.word()?;
            if let Some(name) = w.strip_prefix('%') {
                match self.types.get(name) {
                    Some(t) => t.clone(),
                    None => return c.err(format!("unknown type %{}", name)),
                }
            } else if w == "void" {
                IrType::void()
            } else if let Some(bits) = w.strip_prefix('i') {
                IrType::sint(bits.parse().map_err(|_| ParseError {
                    line: c.line,
                    msg: format!("bad type {:?}", w),
                })?)
            } else if let Some(bits) = w.strip_prefix('u') {
                IrType::uint(bits.parse().map_err(|_| ParseError {
                    line: c.line,
                    msg: format!("bad type {:?}", w),
                })?)
            } else if let Some(bits) = w.strip_prefix('f') {
                IrType::fp(bits.parse().map_err(|_| ParseError {
                    line: c.line,
                    msg: format!("bad type {:?}", w),
                })?)
            } else {
                return c.err(format!("bad type {:?}", w));
            }
        };
        while c.accept_sym('*') {
            ty = ty.ptr_to();
        }
        Ok(ty)
    }

    // global @name : ty [= zero | str "..." | values 1, 2 | ref @g]
    fn parse_global(&mut self, c: &mut Cursor) -> Result<()> {
        let name = self.symbol_name(c)?;
        c.expect_sym(':')?;
        let ty = self.parse_type(c)?;
        let init = if c.accept_sym('=') {
            match c.word()?.as_str() {
                "zero" => GlobalInitValue::None,
                "str" => match c.next() {
                    Some(Tok::Str(s)) => GlobalInitValue::Str(s),
                    other => return c.err(format!("expected a string, found {:?}", other)),
                },
                "ref" => GlobalInitValue::GlobalRef(self.symbol_name(c)?),
                "values" => {
                    let mut values = Vec::new();
                    loop {
                        values.push(parse_int(&c.word()?, c)?);
                        if !c.accept_sym(',') {
                            break;
                        }
                    }
                    GlobalInitValue::Scalars(values)
                }
                other => return c.err(format!("bad initializer {:?}", other)),
            }
        } else {
            GlobalInitValue::None
        };
        self.module.globals.push(GlobalVar { name, ty, init });
        Ok(())
    }

    // declare @name
    fn parse_declare(&mut self, c: &mut Cursor) -> Result<()> {
        let name = self.symbol_name(c)?;
        self.module.functions.push(Function {
            name,
            ret_ty: IrType::void(),
            params: Vec::new(),
            blocks: Vec::new(),
            is_declaration: true,
        });
        Ok(())
    }

    fn symbol_name(&self, c: &mut Cursor) -> Result<String> {
        let w = c.word()?;
        match w.strip_prefix('@') {
            Some(n) => Ok(n.to_string()),
            None => c.err("symbol names start with @"),
        }
    }

    fn value_id(&self, c: &mut Cursor) -> Result<u32> {
        let w = c.word()?;
        let digits = w
            .strip_prefix('%')
            .ok_or_else(|| ParseError {
                line: c.line,
                msg: format!("expected a value id, found {:?}", w),
            })?;
        digits.parse().map_err(|_| ParseError {
            line: c.line,
            msg: format!("bad value id {:?}", w),
        })
    }

    // func @name(i32 %0, %pair* sret %1) -> ty { ... }
    fn parse_func(&mut self, c: &mut Cursor, body: &[(usize, String)]) -> Result<()> {
        let name = self.symbol_name(c)?;
        c.expect_sym('(')?;
        let mut params = Vec::new();
        if !c.accept_sym(')') {
            loop {
                let ty = self.parse_type(c)?;
                let mut sret = false;
                if c.peek() == Some(&Tok::Word("sret".into())) {
                    c.next();
                    sret = true;
                }
                let id = self.value_id(c)?;
                params.push(IrParam {
                    id,
                    name: format!("p{}", id),
                    ty,
                    is_implicit_struct_ptr: sret,
                });
                if !c.accept_sym(',') {
                    break;
                }
            }
            c.expect_sym(')')?;
        }
        match c.next() {
            Some(Tok::Arrow) => {}
            other => return c.err(format!("expected '->', found {:?}", other)),
        }
        let ret_ty = self.parse_type(c)?;
        c.expect_sym('{')?;

        // per-function value table: id -> prototype value
        let mut values: HashMap<u32, Value> = HashMap::new();
        for p in &params {
            values.insert(p.id, Value::param(p.id, p.ty.clone()));
        }

        let mut blocks: Vec<IrBlock> = Vec::new();
        for (lineno, line) in body {
            let toks = tokenize(line, *lineno)?;
            if toks.is_empty() {
                continue;
            }
            // block label: single word followed by ':'
            if toks.len() == 2 {
                if let (Tok::Word(label), Tok::Sym(':')) = (&toks[0], &toks[1]) {
                    blocks.push(IrBlock {
                        name: label.clone(),
                        insts: Vec::new(),
                    });
                    continue;
                }
            }
            let mut c = Cursor::new(toks, *lineno);
            let inst = self.parse_inst(&mut c, &mut values)?;
            match blocks.last_mut() {
                Some(b) => b.insts.push(inst),
                None => return c.err("instruction before the first block label"),
            }
        }

        self.module.functions.push(Function {
            name,
            ret_ty,
            params,
            blocks,
            is_declaration: false,
        });
        Ok(())
    }

    /// A value reference of the given type: %N, @global, or a literal.
    fn parse_value(
        &mut self,
        c: &mut Cursor,
        ty: &IrType,
        values: &HashMap<u32, Value>,
    ) -> Result<Value> {
        match c.peek() {
            Some(Tok::Word(w)) if w.starts_with('%') => {
                let id = self.value_id(c)?;
                match values.get(&id) {
                    Some(v) => Ok(v.clone()),
                    None => c.err(format!("use of undefined value %{}", id)),
                }
            }
            Some(Tok::Word(w)) if w.starts_with('@') => {
                let name = self.symbol_name(c)?;
                Ok(Value::global(&name, ty.clone()))
            }
            Some(Tok::Word(w)) if w.contains('.') => {
                let w = c.word()?;
                let v: f64 = w.parse().map_err(|_| ParseError {
                    line: c.line,
                    msg: format!("bad float literal {:?}", w),
                })?;
                Ok(Value::fp_const(v, ty.clone()))
            }
            _ => {
                let w = c.word()?;
                Ok(Value::int_const(parse_int(&w, c)?, ty.clone()))
            }
        }
    }

    fn parse_inst(
        &mut self,
        c: &mut Cursor,
        values: &mut HashMap<u32, Value>,
    ) -> Result<Instruction> {
        // instructions with a result start with "%N ="
        if matches!(c.peek(), Some(Tok::Word(w)) if w.starts_with('%')) {
            let dst_id = self.value_id(c)?;
            c.expect_sym('=')?;
            let op = c.word()?;
            return self.parse_defining_inst(c, values, dst_id, &op);
        }

        let op = c.word()?;
        match op.as_str() {
            "store" => {
                let ty = self.parse_type(c)?;
                let src = self.parse_value(c, &ty, values)?;
                c.expect_sym(',')?;
                let addr = self.parse_value(c, &ty.clone().ptr_to(), values)?;
                Ok(Instruction::Store { src, addr })
            }
            "jump" => Ok(Instruction::Jump { target: c.word()? }),
            "branch" => {
                let cond = self.parse_value(c, &IrType::sint(8), values)?;
                c.expect_sym(',')?;
                let true_label = c.word()?;
                let false_label = if c.accept_sym(',') {
                    Some(c.word()?)
                } else {
                    None
                };
                Ok(Instruction::Branch {
                    cond,
                    true_label,
                    false_label,
                })
            }
            "ret" => {
                if c.at_end() {
                    return Ok(Instruction::Ret { value: None });
                }
                let ty = self.parse_type(c)?;
                let value = self.parse_value(c, &ty, values)?;
                Ok(Instruction::Ret { value: Some(value) })
            }
            "call" => {
                // void call
                let (callee, args, implicit) = self.parse_call_tail(c, values)?;
                Ok(Instruction::Call {
                    dst: None,
                    callee,
                    args,
                    implicit_struct_arg: implicit,
                })
            }
            "memcpy" => {
                let ptr_ty = IrType::sint(8).ptr_to();
                let dst = self.parse_value(c, &ptr_ty, values)?;
                c.expect_sym(',')?;
                let src = self.parse_value(c, &ptr_ty, values)?;
                c.expect_sym(',')?;
                let bytes = parse_int(&c.word()?, c)? as u32;
                Ok(Instruction::Memcpy { dst, src, bytes })
            }
            other => c.err(format!("unknown instruction {:?}", other)),
        }
    }

    fn parse_defining_inst(
        &mut self,
        c: &mut Cursor,
        values: &mut HashMap<u32, Value>,
        dst_id: u32,
        op: &str,
    ) -> Result<Instruction> {
        let binop = match op {
            "add" => Some(BinOp::Add),
            "sub" => Some(BinOp::Sub),
            "mul" => Some(BinOp::Mul),
            "div" => Some(BinOp::Div),
            "divu" => Some(BinOp::DivU),
            "mod" => Some(BinOp::Mod),
            "modu" => Some(BinOp::ModU),
            "and" => Some(BinOp::And),
            "or" => Some(BinOp::Or),
            "xor" => Some(BinOp::Xor),
            "shl" => Some(BinOp::Shl),
            "lshr" => Some(BinOp::LShr),
            "fadd" => Some(BinOp::FAdd),
            "fsub" => Some(BinOp::FSub),
            "fmul" => Some(BinOp::FMul),
            "fdiv" => Some(BinOp::FDiv),
            _ => None,
        };
        if let Some(binop) = binop {
            let ty = self.parse_type(c)?;
            let lhs = self.parse_value(c, &ty, values)?;
            c.expect_sym(',')?;
            let rhs = self.parse_value(c, &ty, values)?;
            let dst = Value::reg(dst_id, ty);
            values.insert(dst_id, dst.clone());
            return Ok(Instruction::Binary {
                op: binop,
                dst,
                lhs,
                rhs,
            });
        }

        let unop = match op {
            "sext" => Some(UnOp::SExt),
            "zext" => Some(UnOp::ZExt),
            "trunc" => Some(UnOp::Trunc),
            "ftoi" => Some(UnOp::FToI),
            "itof" => Some(UnOp::IToF),
            "bitcast" => Some(UnOp::BitCast),
            _ => None,
        };
        if let Some(unop) = unop {
            let dst_ty = self.parse_type(c)?;
            let src = self.parse_value(c, &dst_ty, values)?;
            let dst = Value::reg(dst_id, dst_ty);
            values.insert(dst_id, dst.clone());
            return Ok(Instruction::Unary { op: unop, dst, src });
        }

        match op {
            "cmp" => {
                let rel = match c.word()?.as_str() {
                    "eq" => Relation::Eq,
                    "ne" => Relation::Ne,
                    "lt" => Relation::Lt,
                    "le" => Relation::Le,
                    "gt" => Relation::Gt,
                    "ge" => Relation::Ge,
                    "ult" => Relation::ULt,
                    "ule" => Relation::ULe,
                    "ugt" => Relation::UGt,
                    "uge" => Relation::UGe,
                    other => return c.err(format!("unknown relation {:?}", other)),
                };
                let ty = self.parse_type(c)?;
                let lhs = self.parse_value(c, &ty, values)?;
                c.expect_sym(',')?;
                let rhs = self.parse_value(c, &ty, values)?;
                let dst = Value::reg(dst_id, IrType::sint(8));
                values.insert(dst_id, dst.clone());
                Ok(Instruction::Cmp { rel, dst, lhs, rhs })
            }
            "load" => {
                let ty = self.parse_type(c)?;
                let addr = self.parse_value(c, &ty.clone().ptr_to(), values)?;
                let dst = Value::reg(dst_id, ty);
                values.insert(dst_id, dst.clone());
                Ok(Instruction::Load { dst, addr })
            }
            "gep" => {
                let dst_ty = self.parse_type(c)?;
                let base = self.parse_value(c, &dst_ty, values)?;
                c.expect_sym(',')?;
                let index = self.parse_value(c, &IrType::sint(32), values)?;
                let dst = Value::reg(dst_id, dst_ty);
                values.insert(dst_id, dst.clone());
                Ok(Instruction::Gep { dst, base, index })
            }
            "stackalloc" => {
                let ty = self.parse_type(c)?;
                let dst = Value::stack_alloc(dst_id, ty.ptr_to());
                values.insert(dst_id, dst.clone());
                Ok(Instruction::StackAlloc { dst })
            }
            "call" => {
                let ret_ty = self.parse_type(c)?;
                let (callee, args, implicit) = self.parse_call_tail_named(c, values)?;
                let dst = Value::reg(dst_id, ret_ty);
                values.insert(dst_id, dst.clone());
                Ok(Instruction::Call {
                    dst: Some(dst),
                    callee,
                    args,
                    implicit_struct_arg: implicit,
                })
            }
            other => c.err(format!("unknown instruction {:?}", other)),
        }
    }

    // void call: "call @f(...)"
    fn parse_call_tail(
        &mut self,
        c: &mut Cursor,
        values: &HashMap<u32, Value>,
    ) -> Result<(String, Vec<Value>, Option<usize>)> {
        // optional "void" return annotation
        if c.peek() == Some(&Tok::Word("void".into())) {
            c.next();
        }
        self.parse_call_tail_named(c, values)
    }

    // "@f(ty [sret] val, ...)"
    fn parse_call_tail_named(
        &mut self,
        c: &mut Cursor,
        values: &HashMap<u32, Value>,
    ) -> Result<(String, Vec<Value>, Option<usize>)> {
        let callee = self.symbol_name(c)?;
        c.expect_sym('(')?;
        let mut args = Vec::new();
        let mut implicit = None;
        if !c.accept_sym(')') {
            loop {
                let ty = self.parse_type(c)?;
                if c.peek() == Some(&Tok::Word("sret".into())) {
                    c.next();
                    implicit = Some(args.len());
                }
                args.push(self.parse_value(c, &ty, values)?);
                if !c.accept_sym(',') {
                    break;
                }
            }
            c.expect_sym(')')?;
        }
        Ok((callee, args, implicit))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_function() {
        let src = r#"
func @add(i32 %0, i32 %1) -> i32 {
entry:
  %2 = add i32 %0, %1
  ret i32 %2
}
"#;
        let module = parse(src).unwrap();
        assert_eq!(module.functions.len(), 1);
        let f = &module.functions[0];
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].insts.len(), 2);
        match &f.blocks[0].insts[0] {
            Instruction::Binary { op, lhs, rhs, .. } => {
                assert_eq!(*op, BinOp::Add);
                assert_eq!(lhs.kind, ValueKind::Param);
                assert_eq!(rhs.kind, ValueKind::Param);
            }
            other => panic!("expected a binary instruction, got {:?}", other),
        }
    }

    #[test]
    fn parses_globals_and_types() {
        let src = r#"
type %pair = { i32, i64 }
global @msg : [7 x i8] = str "hi: %d\n"
global @head : i64
global @arr : [3 x i32] = values 1, 2, 3
global @p : i8* = ref @msg
"#;
        let module = parse(src).unwrap();
        assert_eq!(module.globals.len(), 4);
        assert_eq!(module.globals[0].init, GlobalInitValue::Str("hi: %d\n".into()));
        assert_eq!(module.globals[1].init, GlobalInitValue::None);
        assert_eq!(
            module.globals[2].init,
            GlobalInitValue::Scalars(vec![1, 2, 3])
        );
        assert_eq!(
            module.globals[3].init,
            GlobalInitValue::GlobalRef("msg".into())
        );
    }

    #[test]
    fn parses_control_flow() {
        let src = r#"
func @f(i32 %0) -> void {
entry:
  %1 = cmp eq i32 %0, 0
  branch %1, then, else
then:
  jump end
else:
  jump end
end:
  ret
}
"#;
        let module = parse(src).unwrap();
        let f = &module.functions[0];
        assert_eq!(f.blocks.len(), 4);
        match &f.blocks[0].insts[1] {
            Instruction::Branch {
                true_label,
                false_label,
                ..
            } => {
                assert_eq!(true_label, "then");
                assert_eq!(false_label.as_deref(), Some("else"));
            }
            other => panic!("expected a branch, got {:?}", other),
        }
    }

    #[test]
    fn parses_memory_and_calls() {
        let src = r#"
func @f() -> i32 {
entry:
  %0 = stackalloc i32
  store i32 41, %0
  %1 = load i32 %0
  %2 = call i32 @bump(i32 %1)
  ret i32 %2
}
"#;
        let module = parse(src).unwrap();
        let f = &module.functions[0];
        assert_eq!(f.blocks[0].insts.len(), 5);
        match &f.blocks[0].insts[0] {
            Instruction::StackAlloc { dst } => {
                assert!(dst.ty.is_ptr());
                assert_eq!(dst.ty.pointee(), IrType::sint(32));
            }
            other => panic!("expected stackalloc, got {:?}", other),
        }
        match &f.blocks[0].insts[3] {
            Instruction::Call { callee, args, .. } => {
                assert_eq!(callee, "bump");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn parses_gep_and_hex() {
        let src = r#"
func @f(i32* %0) -> i32 {
entry:
  %1 = gep i32* %0, 3
  %2 = load i32 %1
  %3 = and i32 %2, 0xff
  ret i32 %3
}
"#;
        let module = parse(src).unwrap();
        let f = &module.functions[0];
        match &f.blocks[0].insts[2] {
            Instruction::Binary { rhs, .. } => {
                assert_eq!(rhs.kind, ValueKind::IntConst(0xff));
            }
            other => panic!("expected and, got {:?}", other),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("bogus line").is_err());
        assert!(parse("global x : i32").is_err());
        let src = "func @f() -> void {\nentry:\n  %0 = frobnicate i32 %1\n}\n";
        assert!(parse(src).is_err());
    }
}
