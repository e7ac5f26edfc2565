//! Program disassembler
//!
//! Human-readable dump of a compiled `Program`: functions in declaration
//! order, one instruction per line with pc, mnemonic, raw operands, and
//! the resolved literal for constant-pool references. The dump is complete
//! enough to reassemble the byte buffer.

use crate::compiler::program::Program;
use crate::vm::opcode::{read_i32, read_u16, read_u8, Op, OP_INFO};
use std::fmt::Write;

/// Render the whole program.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    for (id, func) in program.funcs.iter().enumerate() {
        let name = if func.name.is_empty() {
            if id == 0 {
                "<main>"
            } else {
                "<lambda>"
            }
        } else {
            &func.name
        };
        let _ = writeln!(
            out,
            "fn #{} {} (params={}, locals={})",
            id, name, func.arity, func.local_slots
        );
        disassemble_code(program, &func.code, &mut out);
    }
    out
}

fn disassemble_code(program: &Program, code: &[u8], out: &mut String) {
    let mut pc = 0;
    while pc < code.len() {
        let Some(op) = Op::from_byte(code[pc]) else {
            let _ = writeln!(out, "  {:04}  ??            {:#04x}", pc, code[pc]);
            pc += 1;
            continue;
        };
        let info = OP_INFO[op as usize];
        let _ = write!(out, "  {:04}  {:<16}", pc, info.mnemonic);

        match op {
            Op::PushBool => {
                let b = read_u8(code, pc + 1);
                let _ = write!(out, "{}", b);
            }
            Op::PushInt => {
                let n = read_i32(code, pc + 1);
                let _ = write!(out, "{}", n);
            }
            Op::PushConstNum => {
                let i = read_u16(code, pc + 1);
                let _ = write!(out, "{} ; {}", i, program.consts.num(i));
            }
            Op::PushConstStr | Op::GetProp | Op::SetProp => {
                let i = read_u16(code, pc + 1);
                let _ = write!(out, "{} ; {:?}", i, program.consts.str(i));
            }
            Op::LoadLocal
            | Op::StoreLocal
            | Op::LoadGlobal
            | Op::StoreGlobal
            | Op::LoadUpvalue
            | Op::StoreUpvalue
            | Op::NewObject
            | Op::NewArray
            | Op::MakeLambda => {
                let i = read_u16(code, pc + 1);
                let _ = write!(out, "{}", i);
            }
            Op::Call | Op::CallMethod | Op::Construct | Op::TailCall => {
                let argc = read_u8(code, pc + 1);
                let _ = write!(out, "{}", argc);
            }
            Op::Jump | Op::JumpIfFalse | Op::JumpIfTrue => {
                let d = read_i32(code, pc + 1);
                let target = pc as i64 + info.size as i64 + d as i64;
                let _ = write!(out, "{} ; -> {:04}", d, target);
            }
            _ => {}
        }
        let _ = writeln!(out);
        pc += info.size as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{emit_program, EmitterTables};
    use crate::gc::HeapConfig;
    use crate::parser::lexer::{default_lexicals, LexTable};
    use crate::parser::parser::Parser;
    use crate::parser::resolver::Resolver;
    use crate::runtime::Realm;

    fn compile(src: &str) -> Program {
        let mut table = LexTable::new();
        default_lexicals(&mut table);
        let (ast, diags) = Parser::new("test.js", src, &table).parse();
        assert!(diags.is_empty(), "parse failed: {}", diags);
        let mut ast = ast.unwrap();
        let mut realm = Realm::new(HeapConfig::default());
        let resolved = Resolver::new("test.js", src, &mut realm)
            .resolve(&mut ast)
            .unwrap();
        let mut tables = EmitterTables::new();
        tables.install_defaults();
        let mut program = Program::default();
        emit_program(&tables, &ast, &resolved, &mut program).unwrap();
        program
    }

    #[test]
    fn test_mentions_every_function() {
        let prog = compile("function f() { return 1; } var g = function() { return 2; };");
        let dump = disassemble(&prog);
        assert!(dump.contains("fn #0 <main>"));
        assert!(dump.contains("fn #1 f"));
        assert!(dump.contains("fn #2 <lambda>"));
    }

    #[test]
    fn test_mentions_reachable_constants() {
        let prog = compile("var s = \"greeting\"; var n = 3.25;");
        let dump = disassemble(&prog);
        assert!(dump.contains("\"greeting\""));
        assert!(dump.contains("3.25"));
    }

    #[test]
    fn test_reassembly_reproduces_bytes() {
        // The dump carries pc, mnemonic, and raw operands; re-encoding each
        // line must reproduce the original buffer exactly.
        let prog = compile("var i = 0; while (i < 10) { if (i % 2 === 0) { i += 3; } else { i += 1; } }");
        let code = &prog.funcs[0].code;
        let dump = disassemble(&prog);

        let mut rebuilt = Vec::new();
        for line in dump.lines().filter(|l| l.starts_with("  ")) {
            let rest = line.trim_start();
            let (_pc, rest) = rest.split_once("  ").unwrap();
            let mut parts = rest.split_whitespace();
            let mnemonic = parts.next().unwrap();
            let operand = parts.next();

            let op = (1..Op::COUNT as u8)
                .find(|&b| OP_INFO[b as usize].mnemonic == mnemonic)
                .unwrap();
            rebuilt.push(op);
            let op = Op::from_byte(op).unwrap();
            match OP_INFO[op as usize].size {
                1 => {}
                2 => rebuilt.push(operand.unwrap().parse::<i16>().unwrap() as u8),
                3 => rebuilt
                    .extend((operand.unwrap().parse::<i32>().unwrap() as u16).to_le_bytes()),
                5 => rebuilt.extend(operand.unwrap().parse::<i32>().unwrap().to_le_bytes()),
                _ => unreachable!(),
            }
        }
        assert_eq!(&rebuilt, code);
    }
}
