//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// End-to-end codegen tests: textual MIR in, assembly text out.
//

use pcc_codegen::{compile_module, create_target, ir, lir, Options};

fn compile(src: &str, arch: &str) -> String {
    let module = ir::parse::parse(src).expect("MIR parse failed");
    let tm = create_target(arch).expect("unknown target");
    compile_module(&module, tm.as_ref(), &Options::default())
}

fn compile_opt(src: &str, arch: &str) -> String {
    let module = ir::parse::parse(src).expect("MIR parse failed");
    let tm = create_target(arch).expect("unknown target");
    let opts = Options {
        llir_opt: true,
        ..Options::default()
    };
    compile_module(&module, tm.as_ref(), &opts)
}

// ============================================================================
// Scenario: int add(int a, int b) { return a + b; }
// ============================================================================

const ADD_SRC: &str = r#"
func @add(i32 %0, i32 %1) -> i32 {
entry:
  %2 = add i32 %0, %1
  ret i32 %2
}
"#;

#[test]
fn add_compiles_to_two_instructions_on_aarch64() {
    let asm = compile(ADD_SRC, "aarch64");
    assert!(asm.contains("add:\n"), "missing function label:\n{}", asm);
    assert!(
        asm.contains("\tadd w0, w0, w1\n"),
        "expected add w0, w0, w1 in:\n{}",
        asm
    );
    assert!(asm.contains("\tret\n"));
    // leaf function: no stack adjustment at all
    assert!(!asm.contains("sub sp"), "unexpected prologue:\n{}", asm);
}

#[test]
fn add_compiles_on_riscv32() {
    let asm = compile(ADD_SRC, "riscv32");
    assert!(
        asm.contains("\tadd a0, a0, a1\n"),
        "expected add a0, a0, a1 in:\n{}",
        asm
    );
    assert!(asm.contains("\tret\n"));
    assert!(!asm.contains("addi sp"), "unexpected prologue:\n{}", asm);
}

// ============================================================================
// Scenario: int f() { return 0x12345678; }
// ============================================================================

#[test]
fn wide_constant_returns_as_mov_movk_pair() {
    let asm = compile(
        r#"
func @f() -> i32 {
entry:
  ret i32 0x12345678
}
"#,
        "aarch64",
    );
    assert!(
        asm.contains("\tmov w0, #22136\n"),
        "expected the low half first in:\n{}",
        asm
    );
    assert!(
        asm.contains("\tmovk w0, #4660, lsl #16\n"),
        "expected the movk slice in:\n{}",
        asm
    );
    assert!(asm.contains("\tret\n"));
}

#[test]
fn small_constant_returns_as_single_mov() {
    let asm = compile(
        r#"
func @f() -> i32 {
entry:
  ret i32 7
}
"#,
        "aarch64",
    );
    assert!(asm.contains("\tmov w0, #7\n"), "{}", asm);
    assert!(!asm.contains("movk"));
}

// ============================================================================
// Scenario: for (;;) {} - unconditional backward branch
// ============================================================================

#[test]
fn endless_loop_branches_backward() {
    let asm = compile(
        r#"
func @spin() -> void {
entry:
  jump body
body:
  jump body
}
"#,
        "aarch64",
    );
    assert!(asm.contains("spin.body:\n"));
    assert!(
        asm.contains("\tb spin.body\n"),
        "expected a backward branch in:\n{}",
        asm
    );
}

// ============================================================================
// Scenario: char c = 0xFF; int i = c; - signed widening via sxtb
// ============================================================================

#[test]
fn signed_char_widens_with_sxtb() {
    let asm = compile(
        r#"
func @f() -> i32 {
entry:
  %0 = stackalloc i8
  store i8 -1, %0
  %1 = load i8 %0
  %2 = sext i32 %1
  ret i32 %2
}
"#,
        "aarch64",
    );
    assert!(asm.contains("strb"), "byte store missing:\n{}", asm);
    assert!(asm.contains("ldrb"), "byte load missing:\n{}", asm);
    assert!(asm.contains("sxtb"), "sign extension missing:\n{}", asm);
}

// ============================================================================
// Conditionals: compare feeds the branch condition
// ============================================================================

#[test]
fn compare_branch_pairs_into_conditional_branch() {
    let asm = compile(
        r#"
func @sign(i32 %0) -> i32 {
entry:
  %1 = cmp lt i32 %0, 0
  branch %1, negative, positive
negative:
  ret i32 -1
positive:
  ret i32 1
}
"#,
        "aarch64",
    );
    assert!(asm.contains("\tcmp w0, #0\n"), "{}", asm);
    assert!(asm.contains("\tb.lt sign.negative\n"), "{}", asm);
    assert!(asm.contains("\tb sign.positive\n"), "{}", asm);
}

#[test]
fn compare_without_branch_materializes_boolean() {
    let asm = compile(
        r#"
func @isneg(i32 %0) -> i32 {
entry:
  %1 = cmp lt i32 %0, 0
  %2 = zext i32 %1
  ret i32 %2
}
"#,
        "aarch64",
    );
    assert!(asm.contains("\tcmp w0, #0\n"), "{}", asm);
    assert!(asm.contains("cset"), "boolean set missing:\n{}", asm);
}

#[test]
fn riscv_compare_uses_slt_network() {
    let asm = compile(
        r#"
func @less(i32 %0, i32 %1) -> i32 {
entry:
  %2 = cmp lt i32 %0, %1
  %3 = zext i32 %2
  ret i32 %3
}
"#,
        "riscv32",
    );
    assert!(asm.contains("\tslt"), "slt missing:\n{}", asm);
}

#[test]
fn riscv_branch_tests_boolean_against_zero() {
    let asm = compile(
        r#"
func @f(i32 %0) -> i32 {
entry:
  %1 = cmp eq i32 %0, 0
  branch %1, yes, no
yes:
  ret i32 1
no:
  ret i32 0
}
"#,
        "riscv32",
    );
    assert!(asm.contains("seqz"), "{}", asm);
    assert!(asm.contains("bne"), "{}", asm);
    assert!(asm.contains("f.yes"), "{}", asm);
}

// ============================================================================
// Calls: argument and return register convention
// ============================================================================

#[test]
fn call_places_arguments_and_reads_return_register() {
    let asm = compile(
        r#"
func @caller(i32 %0) -> i32 {
entry:
  %1 = call i32 @bump(i32 %0)
  ret i32 %1
}
"#,
        "aarch64",
    );
    let bl = asm.find("\tbl bump\n").expect("missing call");
    // the argument move precedes the call
    let mov = asm.find("mov w0").expect("missing argument move");
    assert!(mov < bl, "argument set up after the call:\n{}", asm);
    // the return value is stored from w0 right after the call
    let store = asm[bl..].find("str w0").expect("missing return spill");
    assert!(store > 0);
    // calling functions save fp/lr
    assert!(asm.contains("sub sp, sp"), "{}", asm);
    assert!(asm.contains("str x30"), "missing link register save:\n{}", asm);
    assert!(asm.contains("mov x29, sp"), "{}", asm);
}

#[test]
fn stack_heavy_program_calls_the_runtime() {
    // distilled shape of the linked-list stack driver: allocate, push,
    // print, free, exit
    let asm = compile(
        r#"
global @fmt : [4 x i8] = str "%d\n"
global @head : i64

func @main() -> i32 {
entry:
  %0 = call i8* @malloc(i64 16)
  %1 = bitcast i64* %0
  store i64 6, %1
  %2 = load i64 %1
  %3 = trunc i32 %2
  call void @printf(i8* @fmt, i32 %3)
  call void @free(i8* %0)
  call void @exit(i32 1)
  ret i32 1
}
"#,
        "aarch64",
    );
    for callee in ["malloc", "printf", "free", "exit"] {
        assert!(
            asm.contains(&format!("\tbl {}\n", callee)),
            "missing call to {} in:\n{}",
            callee,
            asm
        );
    }
    // the format string address pairs adrp with its low part
    assert!(asm.contains("adrp"), "{}", asm);
    assert!(asm.contains(":lo12:fmt"), "{}", asm);
    assert!(asm.contains("fmt:\n\t.asciz \"%d\\n\"\n"), "{}", asm);
    assert!(asm.contains("head:\n\t.quad 0\n"), "{}", asm);
}

// ============================================================================
// Scenario: oversized struct return uses the implicit pointer register
// ============================================================================

#[test]
fn large_struct_return_passes_hidden_pointer_in_x8() {
    let asm = compile(
        r#"
type %big = { i64, i64, i64 }

func @make(%big* sret %0) -> void {
entry:
  ret
}

func @caller() -> void {
entry:
  %1 = stackalloc %big
  call void @make(%big* sret %1)
  ret
}
"#,
        "aarch64",
    );
    // caller materializes the temporary's address into x8
    assert!(
        asm.contains("add x8, "),
        "hidden struct pointer not in x8:\n{}",
        asm
    );
    assert!(asm.contains("\tbl make\n"), "{}", asm);
}

// ============================================================================
// Address arithmetic
// ============================================================================

#[test]
fn gep_with_register_index_scales_by_stride() {
    let asm = compile(
        r#"
func @idx(i32* %0, i32 %1) -> i32 {
entry:
  %2 = gep i32* %0, %1
  %3 = load i32 %2
  ret i32 %3
}
"#,
        "aarch64",
    );
    // index * 4 then base + offset
    assert!(asm.contains("mul"), "stride multiply missing:\n{}", asm);
    assert!(asm.contains("sxtw"), "index widening missing:\n{}", asm);
    assert!(asm.contains("ldr"), "{}", asm);
}

#[test]
fn gep_with_constant_index_folds_into_offset() {
    let asm = compile(
        r#"
func @third(i32* %0) -> i32 {
entry:
  %1 = gep i32* %0, 2
  %2 = load i32 %1
  ret i32 %2
}
"#,
        "aarch64",
    );
    // base + 8 as an immediate add, no multiply
    assert!(asm.contains("add"), "{}", asm);
    assert!(asm.contains("#8"), "folded offset missing:\n{}", asm);
    assert!(!asm.contains("mul"), "unexpected multiply:\n{}", asm);
}

// ============================================================================
// Modulo legalization on AArch64
// ============================================================================

#[test]
fn modulo_expands_to_div_mul_sub() {
    let asm = compile(
        r#"
func @rem(i32 %0, i32 %1) -> i32 {
entry:
  %2 = mod i32 %0, %1
  ret i32 %2
}
"#,
        "aarch64",
    );
    assert!(asm.contains("sdiv"), "{}", asm);
    assert!(asm.contains("mul"), "{}", asm);
    assert!(asm.contains("sub"), "{}", asm);
}

#[test]
fn modulo_stays_native_on_riscv() {
    let asm = compile(
        r#"
func @rem(i32 %0, i32 %1) -> i32 {
entry:
  %2 = mod i32 %0, %1
  ret i32 %2
}
"#,
        "riscv32",
    );
    assert!(asm.contains("\trem a0, a0, a1\n"), "{}", asm);
}

// ============================================================================
// Frame alignment and locals
// ============================================================================

#[test]
fn frames_are_sixteen_byte_aligned() {
    let module = ir::parse::parse(
        r#"
func @f() -> i32 {
entry:
  %0 = stackalloc i32
  %1 = stackalloc i64
  %2 = stackalloc i8
  store i32 1, %0
  %3 = load i32 %0
  %4 = call i32 @g(i32 %3)
  ret i32 %4
}
"#,
    )
    .unwrap();
    let tm = create_target("aarch64").unwrap();
    let mut llir = pcc_codegen::lower::run(&module, tm.as_ref());
    pcc_codegen::legalize::run(&mut llir, tm.as_ref());
    pcc_codegen::regclass::run(&mut llir, tm.as_ref());
    pcc_codegen::isel::run(&mut llir, tm.as_ref());
    pcc_codegen::regalloc::run(&mut llir, tm.as_ref());
    pcc_codegen::frame::run(&mut llir, tm.as_ref());
    let f = &llir.functions[0];
    assert!(f.frame.total_size > 0);
    assert_eq!(f.frame.total_size % 16, 0);
}

// ============================================================================
// Pipeline invariants
// ============================================================================

const INVARIANT_SRC: &str = r#"
global @counter : i32

func @work(i32 %0, i32 %1) -> i32 {
entry:
  %2 = stackalloc i32
  store i32 %0, %2
  %3 = load i32 %2
  %4 = mul i32 %3, 24
  %5 = add i32 %4, %1
  %6 = cmp gt i32 %5, 100
  branch %6, big, small
big:
  %7 = call i32 @clamp(i32 %5)
  ret i32 %7
small:
  ret i32 %5
}
"#;

fn run_until_regalloc(arch: &str) -> lir::Module {
    let module = ir::parse::parse(INVARIANT_SRC).unwrap();
    let tm = create_target(arch).unwrap();
    let mut llir = pcc_codegen::lower::run(&module, tm.as_ref());
    pcc_codegen::legalize::run(&mut llir, tm.as_ref());
    pcc_codegen::regclass::run(&mut llir, tm.as_ref());
    pcc_codegen::isel::run(&mut llir, tm.as_ref());
    pcc_codegen::regalloc::run(&mut llir, tm.as_ref());
    llir
}

#[test]
fn no_virtual_registers_after_allocation() {
    for arch in ["aarch64", "riscv32"] {
        let llir = run_until_regalloc(arch);
        for f in &llir.functions {
            for b in &f.blocks {
                for inst in &b.insts {
                    for op in &inst.operands {
                        assert!(
                            !op.is_virt_reg() && !op.is_param(),
                            "{}: unallocated operand {:?}",
                            arch,
                            op
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn no_stack_accesses_after_frame_finalization() {
    for arch in ["aarch64", "riscv32"] {
        let mut llir = run_until_regalloc(arch);
        let tm = create_target(arch).unwrap();
        pcc_codegen::frame::run(&mut llir, tm.as_ref());
        for f in &llir.functions {
            for b in &f.blocks {
                for inst in &b.insts {
                    for op in &inst.operands {
                        assert!(
                            !op.is_stack_access(),
                            "{}: stack access survived {:?}",
                            arch,
                            op
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn ssa_holds_after_lowering() {
    let module = ir::parse::parse(INVARIANT_SRC).unwrap();
    let tm = create_target("aarch64").unwrap();
    let llir = pcc_codegen::lower::run(&module, tm.as_ref());
    for f in &llir.functions {
        let mut defs = std::collections::HashSet::new();
        for b in &f.blocks {
            for inst in &b.insts {
                if let Some(op) = inst.def() {
                    if let lir::OperandKind::VirtReg(id) = op.kind {
                        assert!(defs.insert(id), "vreg {} defined twice", id);
                    }
                }
            }
        }
    }
}

#[test]
fn legalization_is_idempotent_end_to_end() {
    let module = ir::parse::parse(INVARIANT_SRC).unwrap();
    let tm = create_target("aarch64").unwrap();
    let mut llir = pcc_codegen::lower::run(&module, tm.as_ref());
    pcc_codegen::legalize::run(&mut llir, tm.as_ref());
    let once = llir.dump(tm.as_ref());
    pcc_codegen::legalize::run(&mut llir, tm.as_ref());
    let twice = llir.dump(tm.as_ref());
    assert_eq!(once, twice);
}

// ============================================================================
// LLIR optimizer
// ============================================================================

#[test]
fn copy_propagation_shrinks_pointer_chains() {
    let src = r#"
func @f(i64* %0) -> i64 {
entry:
  %1 = bitcast i64* %0
  %2 = load i64 %1
  ret i64 %2
}
"#;
    let plain = compile(src, "aarch64");
    let optimized = compile_opt(src, "aarch64");
    assert!(optimized.lines().count() <= plain.lines().count());
    assert!(optimized.contains("ldr"));
}

// ============================================================================
// Global data layout
// ============================================================================

#[test]
fn global_initializers_emit_proper_directives() {
    let asm = compile(
        r#"
type %node = { i32, i64 }
global @zeroed : %node
global @inited : %node = values 7, 9
global @table : [3 x i32] = values 1, 2, 3
global @name : [3 x i8] = str "ok"
global @link : i8* = ref @name
"#,
        "aarch64",
    );
    assert!(asm.contains("zeroed:\n\t.zero 16\n"), "{}", asm);
    assert!(asm.contains("inited:\n\t.word 7\n\t.quad 9\n"), "{}", asm);
    assert!(
        asm.contains("table:\n\t.word 1\n\t.word 2\n\t.word 3\n"),
        "{}",
        asm
    );
    assert!(asm.contains("name:\n\t.asciz \"ok\"\n"), "{}", asm);
    assert!(asm.contains("link:\n\t.quad name\n"), "{}", asm);
}

// ============================================================================
// memcpy lowering
// ============================================================================

#[test]
fn large_memcpy_calls_the_library() {
    let asm = compile(
        r#"
func @blit(i8* %0, i8* %1) -> void {
entry:
  memcpy %0, %1, 64
  ret
}
"#,
        "aarch64",
    );
    assert!(asm.contains("\tbl memcpy\n"), "{}", asm);
    assert!(asm.contains("mov w2, #64"), "byte count missing:\n{}", asm);
}

#[test]
fn small_memcpy_expands_to_word_pairs() {
    let asm = compile(
        r#"
func @blit(i8* %0, i8* %1) -> void {
entry:
  memcpy %0, %1, 8
  ret
}
"#,
        "aarch64",
    );
    assert!(!asm.contains("bl memcpy"), "{}", asm);
    // two word-sized load/store pairs
    assert!(asm.matches("ldr").count() >= 2, "{}", asm);
    assert!(asm.matches("str").count() >= 2, "{}", asm);
}

// ============================================================================
// Struct-by-value parameters arrive in consecutive registers
// ============================================================================

#[test]
fn struct_param_chunks_store_from_argument_registers() {
    let asm = compile(
        r#"
type %pair = { i64, i64 }

func @sum(%pair %0) -> i64 {
entry:
  %1 = stackalloc %pair
  store %pair %0, %1
  %2 = gep %pair* %1, 0
  %3 = load i64 %2
  %4 = gep %pair* %1, 1
  %5 = load i64 %4
  %6 = add i64 %3, %5
  ret i64 %6
}
"#,
        "aarch64",
    );
    // both halves spill from x0/x1 into the local
    assert!(asm.contains("str x0"), "first chunk store missing:\n{}", asm);
    assert!(asm.contains("str x1"), "second chunk store missing:\n{}", asm);
    assert!(asm.contains("\tadd x0, "), "64-bit add missing:\n{}", asm);
}
