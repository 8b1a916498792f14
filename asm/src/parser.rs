//! Pest-generated parser for the APEX assembly grammar.

use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct ApexAsmParser;
