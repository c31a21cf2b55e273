//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Library interface for pcc-codegen
//
// The machine-code-generation backend of the pcc C99 compiler: a
// pipeline from SSA-form mid-level IR (MIR) to GAS-compatible assembly
// for AArch64 and a RISC-V-like 32-bit target.
//

pub mod arch;
pub mod diag;
pub mod emit;
pub mod frame;
pub mod ir;
pub mod isel;
pub mod legalize;
pub mod lir;
pub mod lower;
pub mod opt;
pub mod regalloc;
pub mod regclass;

pub use arch::create_target;

/// Pipeline knobs exposed to the driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Run the LLIR optimizer (copy propagation) before legalization
    pub llir_opt: bool,
    /// Print the LLIR module to stderr after every pass
    pub print_after_all: bool,
}

/// Run the whole backend pipeline over an MIR module, returning the
/// emitted assembly text.
pub fn compile_module(
    ir_module: &ir::Module,
    tm: &dyn arch::TargetMachine,
    opts: &Options,
) -> String {
    let mut llir = lower::run(ir_module, tm);
    dump_after("lowering", &llir, tm, opts);

    if opts.llir_opt {
        opt::run(&mut llir);
        dump_after("llir-opt", &llir, tm, opts);
    }

    legalize::run(&mut llir, tm);
    dump_after("legalizer", &llir, tm, opts);

    regclass::run(&mut llir, tm);
    dump_after("register-class selection", &llir, tm, opts);

    isel::run(&mut llir, tm);
    dump_after("instruction selection", &llir, tm, opts);

    regalloc::run(&mut llir, tm);
    dump_after("register allocation", &llir, tm, opts);

    frame::run(&mut llir, tm);
    dump_after("prologue/epilogue insertion", &llir, tm, opts);

    tm.post_ra_fixups(&mut llir);
    dump_after("target fix-ups", &llir, tm, opts);

    emit::emit(&llir, tm)
}

fn dump_after(pass: &str, module: &lir::Module, tm: &dyn arch::TargetMachine, opts: &Options) {
    if opts.print_after_all {
        eprintln!("<<<<< After {} >>>>>", pass);
        eprintln!("{}", module.dump(tm));
    }
}
