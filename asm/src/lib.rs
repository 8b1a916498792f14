//! Assembler front end: turns APEX assembly text into a flat
//! `Vec<apex_core::Instruction>` code image ready to hand to
//! `apex_core::Machine::new`.
//!
//! Grounded in the teacher's `src/asm.rs` / `src/grammer.pest` two-pass shape
//! (parse once for the symbol table, parse again to emit), adapted from y86's
//! byte-addressed object format to APEX's fixed 4-byte instruction slots.

mod parser;

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use apex_core::{Instruction, Opcode, CODE_BASE, INSN_WIDTH};
use pest::iterators::Pair;
use pest::Parser;

use parser::{ApexAsmParser, Rule};

/// Parse and assemble APEX assembly source into a flat code image.
///
/// Two passes over the same parse tree: the first walks every line, tracking
/// the address counter (honouring `.pos`), to build the label symbol table;
/// the second resolves operands — label references become pc-relative
/// offsets for branches/jumps and absolute addresses everywhere else — and
/// emits one `Instruction` per line.
pub fn assemble(src: &str) -> Result<Vec<Instruction>> {
    let pairs = ApexAsmParser::parse(Rule::main, src)
        .context("failed to parse APEX assembly source")?
        .next()
        .expect("main rule always produces one pair")
        .into_inner();

    let lines: Vec<_> = pairs.filter(|p| p.as_rule() == Rule::line).collect();
    let symbols = collect_symbols(&lines)?;

    let mut code = Vec::new();
    let mut addr = CODE_BASE;
    for line in &lines {
        let Some(form) = statement_form(line.clone()) else {
            continue;
        };
        if form.as_rule() == Rule::d_pos {
            addr = parse_integer(inner_text(form))? as u32;
            continue;
        }
        code.push(build_instruction(form, addr, &symbols)?);
        addr += INSN_WIDTH;
    }

    Ok(code)
}

fn collect_symbols(lines: &[Pair<'_, Rule>]) -> Result<HashMap<String, u32>> {
    let mut symbols = HashMap::new();
    let mut addr = CODE_BASE;
    for line in lines {
        let mut inner = line.clone().into_inner();
        let mut next = inner.next();
        if let Some(pair) = &next {
            if pair.as_rule() == Rule::label {
                let name = pair.as_str().trim_end_matches(':').to_string();
                symbols.insert(name, addr);
                next = inner.next();
            }
        }
        let Some(stmt) = next else { continue };
        if stmt.as_rule() != Rule::statement {
            continue;
        }
        let form = stmt.into_inner().next().expect("statement has one form");
        if form.as_rule() == Rule::d_pos {
            addr = parse_integer(inner_text(form))? as u32;
        } else {
            addr += INSN_WIDTH;
        }
    }
    Ok(symbols)
}

/// The instruction/directive form of a line, skipping a leading label.
fn statement_form(line: Pair<'_, Rule>) -> Option<Pair<'_, Rule>> {
    let mut inner = line.into_inner();
    let mut next = inner.next()?;
    if next.as_rule() == Rule::label {
        next = inner.next()?;
    }
    if next.as_rule() != Rule::statement {
        return None;
    }
    next.into_inner().next()
}

fn inner_text(pair: Pair<'_, Rule>) -> &str {
    pair.into_inner().next().expect("directive has one operand").as_str()
}

fn parse_integer(text: &str) -> Result<i64> {
    text.parse::<i64>()
        .with_context(|| format!("invalid integer literal `{text}`"))
}

fn parse_register(pair: Pair<'_, Rule>) -> Result<u8> {
    let text = pair.as_str();
    text[1..]
        .parse::<u8>()
        .with_context(|| format!("invalid register `{text}`"))
}

/// Resolve an `imm_or_label` operand. `pc_relative` selects whether a label
/// reference is turned into `target - addr` (branches/jumps) or left as the
/// label's absolute address (everything else).
fn resolve_imm(
    pair: Pair<'_, Rule>,
    addr: u32,
    symbols: &HashMap<String, u32>,
    pc_relative: bool,
) -> Result<i64> {
    let operand = pair.into_inner().next().expect("imm_or_label has one child");
    match operand.as_rule() {
        Rule::immediate => parse_integer(operand.as_str().trim_start_matches('#')),
        Rule::ident => {
            let name = operand.as_str();
            let target = *symbols
                .get(name)
                .ok_or_else(|| anyhow!("undefined label `{name}`"))?;
            Ok(if pc_relative {
                target as i64 - addr as i64
            } else {
                target as i64
            })
        }
        other => unreachable!("imm_or_label child unexpected: {other:?}"),
    }
}

fn build_instruction(
    form: Pair<'_, Rule>,
    addr: u32,
    symbols: &HashMap<String, u32>,
) -> Result<Instruction> {
    let text = form.as_str();
    let mnemonic = text
        .split(',')
        .next()
        .expect("non-empty form")
        .trim()
        .to_ascii_uppercase();
    let mut operands = form.into_inner();

    let opcode = opcode_from_mnemonic(&mnemonic)?;
    let mut insn = Instruction::new(opcode).with_address(addr);

    use Opcode::*;
    insn = match opcode {
        Add | Sub | Mul | Div | And | Or | Xor => {
            let rd = parse_register(operands.next().unwrap())?;
            let rs1 = parse_register(operands.next().unwrap())?;
            let rs2 = parse_register(operands.next().unwrap())?;
            insn.with_rd(rd).with_rs1(rs1).with_rs2(rs2)
        }
        Addl | Subl | Load | Loadp | Jalr => {
            let rd = parse_register(operands.next().unwrap())?;
            let rs1 = parse_register(operands.next().unwrap())?;
            let imm = resolve_imm(operands.next().unwrap(), addr, symbols, false)?;
            insn.with_rd(rd).with_rs1(rs1).with_imm(imm)
        }
        Movc => {
            let rd = parse_register(operands.next().unwrap())?;
            let imm = resolve_imm(operands.next().unwrap(), addr, symbols, false)?;
            insn.with_rd(rd).with_imm(imm)
        }
        Store | Storep => {
            let rs1 = parse_register(operands.next().unwrap())?;
            let rs2 = parse_register(operands.next().unwrap())?;
            let imm = resolve_imm(operands.next().unwrap(), addr, symbols, false)?;
            insn.with_rs1(rs1).with_rs2(rs2).with_imm(imm)
        }
        Cmp => {
            let rs1 = parse_register(operands.next().unwrap())?;
            let rs2 = parse_register(operands.next().unwrap())?;
            insn.with_rs1(rs1).with_rs2(rs2)
        }
        Cml => {
            let rs1 = parse_register(operands.next().unwrap())?;
            let imm = resolve_imm(operands.next().unwrap(), addr, symbols, false)?;
            insn.with_rs1(rs1).with_imm(imm)
        }
        Jump => {
            let rs1 = parse_register(operands.next().unwrap())?;
            let imm = resolve_imm(operands.next().unwrap(), addr, symbols, true)?;
            insn.with_rs1(rs1).with_imm(imm)
        }
        Bz | Bnz | Bp | Bnp | Bn | Bnn => {
            let imm = resolve_imm(operands.next().unwrap(), addr, symbols, true)?;
            insn.with_imm(imm)
        }
        Halt | Nop => insn,
    };

    Ok(insn)
}

fn opcode_from_mnemonic(mnemonic: &str) -> Result<Opcode> {
    use Opcode::*;
    Ok(match mnemonic {
        "ADD" => Add,
        "SUB" => Sub,
        "MUL" => Mul,
        "DIV" => Div,
        "AND" => And,
        "OR" => Or,
        "XOR" => Xor,
        "ADDL" => Addl,
        "SUBL" => Subl,
        "MOVC" => Movc,
        "LOAD" => Load,
        "LOADP" => Loadp,
        "STORE" => Store,
        "STOREP" => Storep,
        "CMP" => Cmp,
        "CML" => Cml,
        "BZ" => Bz,
        "BNZ" => Bnz,
        "BP" => Bp,
        "BNP" => Bnp,
        "BN" => Bn,
        "BNN" => Bnn,
        "JUMP" => Jump,
        "JALR" => Jalr,
        "HALT" => Halt,
        "NOP" => Nop,
        other => anyhow::bail!("unknown mnemonic `{other}`"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_straight_line_add() {
        let code = assemble(
            "MOVC,R1,#5\nMOVC,R2,#7\nADD,R3,R1,R2\nHALT\n",
        )
        .unwrap();
        assert_eq!(code.len(), 4);
        assert_eq!(code[0].opcode, Opcode::Movc);
        assert_eq!(code[0].imm, 5);
        assert_eq!(code[2].opcode, Opcode::Add);
        assert_eq!(code[2].rd, Some(3));
        assert_eq!(code[3].opcode, Opcode::Halt);
    }

    #[test]
    fn labels_resolve_to_pc_relative_branch_offsets() {
        let code = assemble(
            "MOVC,R1,#0\nCML,R1,#0\nBZ,#loop_end\nMOVC,R4,#1\nloop_end:\nHALT\n",
        )
        .unwrap();
        // BZ is the third instruction, at CODE_BASE + 8; loop_end is the
        // fifth line's instruction (HALT) at CODE_BASE + 16.
        assert_eq!(code[2].opcode, Opcode::Bz);
        assert_eq!(code[2].imm, 16 - 8);
    }

    #[test]
    fn pos_directive_overrides_address_counter() {
        let code = assemble(".pos 4008\nHALT\n").unwrap();
        assert_eq!(code[0].address, 4008);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let code = assemble("# a program\nMOVC,R1,#1 # load one\n\nHALT\n").unwrap();
        assert_eq!(code.len(), 2);
    }

    #[test]
    fn undefined_label_is_an_error() {
        let err = assemble("BZ,#missing\nHALT\n").unwrap_err();
        assert!(err.to_string().contains("undefined label"));
    }
}
