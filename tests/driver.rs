//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Driver-level tests: MIR module files on disk through the library API.
//

use pcc_codegen::{compile_module, create_target, ir, Options};
use std::io::Write;

#[test]
fn compiles_a_module_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"
global @greeting : [4 x i8] = str "hi\n"

func @main() -> i32 {{
entry:
  call void @printf(i8* @greeting)
  ret i32 0
}}
"#
    )
    .expect("write");

    let source = std::fs::read_to_string(file.path()).expect("read back");
    let module = ir::parse::parse(&source).expect("parse");
    let tm = create_target("aarch64").unwrap();
    let asm = compile_module(&module, tm.as_ref(), &Options::default());

    assert!(asm.contains("\t.globl main\n"));
    assert!(asm.contains("\tbl printf\n"));
    assert!(asm.contains("greeting:\n\t.asciz \"hi\\n\"\n"));
}

#[test]
fn parse_errors_carry_line_numbers() {
    let err = ir::parse::parse("func @f() -> i32 {\nentry:\n  %0 = nonsense i32 %1\n}\n")
        .unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.to_string().contains("line 3"));
}
