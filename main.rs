//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// pccgen - machine code generation backend of the pcc C99 compiler
//
// Reads a textual MIR module (the backend's input contract), runs the
// codegen pipeline for the selected target, and writes assembly to
// standard output or a file.
//

use clap::Parser;
use gettextrs::{bind_textdomain_codeset, gettext, setlocale, textdomain, LocaleCategory};
use pcc_codegen::{compile_module, create_target, ir, Options};
use std::fs::File;
use std::io::{self, Read, Write};

#[derive(Parser)]
#[command(version, about = gettext("pccgen - generate assembly from pcc MIR"))]
struct Args {
    /// Input file ("-" for stdin) containing a textual MIR module
    #[arg(default_value = "-")]
    file: String,

    /// Target architecture
    #[arg(
        long = "arch",
        value_name = "target",
        default_value = "aarch64",
        help = gettext("Target architecture (aarch64, riscv32)")
    )]
    arch: String,

    /// Run the LLIR optimizer
    #[arg(long = "llir-opt", help = gettext("Enable the LLIR optimizer pass"))]
    llir_opt: bool,

    /// Print the LLIR after each pass
    #[arg(
        long = "print-after-all",
        help = gettext("Print the machine IR after every pass")
    )]
    print_after_all: bool,

    /// Parse and dump the MIR module, then exit
    #[arg(long = "dump-ir", help = gettext("Dump the parsed MIR to stdout"))]
    dump_ir: bool,

    /// Place output in file
    #[arg(short = 'o', value_name = "file", help = gettext("Place output in file"))]
    output: Option<String>,
}

fn read_input(path: &str) -> io::Result<String> {
    let mut buffer = String::new();
    if path == "-" {
        io::stdin().read_to_string(&mut buffer)?;
    } else {
        File::open(path)?.read_to_string(&mut buffer)?;
    }
    Ok(buffer)
}

fn main() {
    setlocale(LocaleCategory::LcAll, "");
    let _ = textdomain("posixutils-rs");
    let _ = bind_textdomain_codeset("posixutils-rs", "UTF-8");

    let args = Args::parse();

    let source = match read_input(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("pccgen: {}: {}", args.file, e);
            std::process::exit(1);
        }
    };

    let module = match ir::parse::parse(&source) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("pccgen: {}: {}", args.file, e);
            std::process::exit(1);
        }
    };

    if args.dump_ir {
        print!("{}", module);
        return;
    }

    let tm = match create_target(&args.arch) {
        Some(tm) => tm,
        None => {
            eprintln!("pccgen: unknown target '{}'", args.arch);
            std::process::exit(1);
        }
    };

    let opts = Options {
        llir_opt: args.llir_opt,
        print_after_all: args.print_after_all,
    };
    let asm = compile_module(&module, tm.as_ref(), &opts);

    let result = match &args.output {
        Some(path) => File::create(path).and_then(|mut f| f.write_all(asm.as_bytes())),
        None => io::stdout().write_all(asm.as_bytes()),
    };
    if let Err(e) = result {
        eprintln!("pccgen: {}", e);
        std::process::exit(1);
    }
}
