use anyhow::{Result, bail};

use crate::fragment::{Fixup, FragmentKind, Program};
use crate::lexer::{Token, lex_line};

const DEFAULT_SECTION: &str = ".text";

/// Parse assembly source into a program. One fragment per statement; labels
/// bind to the start of the next emitted fragment.
pub fn parse_source(text: &str) -> Result<Program> {
    let mut parser = Parser {
        program: Program::default(),
        section: DEFAULT_SECTION.to_string(),
        pending_labels: Vec::new(),
    };

    for (index, line) in text.lines().enumerate() {
        let number = index + 1;
        let tokens = match lex_line(line) {
            Ok(tokens) => tokens,
            Err(column) => bail!("line {number}: unrecognized token at column {}", column + 1),
        };
        parser
            .statement(&tokens)
            .map_err(|err| err.context(format!("line {number}")))?;
    }

    parser.flush_labels()?;
    Ok(parser.program)
}

struct Parser {
    program: Program,
    section: String,
    pending_labels: Vec<String>,
}

impl Parser {
    fn statement(&mut self, tokens: &[Token]) -> Result<()> {
        let Some(first) = tokens.first() else {
            return Ok(());
        };

        // Leading label, optionally followed by a statement on the same line.
        if let [Token::Ident(name), Token::Colon, rest @ ..] = tokens {
            self.pending_labels.push(name.clone());
            return self.statement(rest);
        }

        match first {
            Token::Directive(directive) => self.directive(directive, &tokens[1..]),
            Token::Ident(mnemonic) => self.instruction(mnemonic, &tokens[1..]),
            _ => bail!("expected a label, directive, or instruction"),
        }
    }

    fn directive(&mut self, directive: &str, rest: &[Token]) -> Result<()> {
        match directive {
            ".section" => {
                let name = match rest {
                    [Token::Directive(name)] | [Token::Ident(name)] => name.clone(),
                    _ => bail!(".section expects a single section name"),
                };
                self.section = name;
                Ok(())
            }
            ".byte" => {
                let mut bytes = Vec::new();
                for value in number_list(rest)? {
                    let Ok(byte) = u8::try_from(value) else {
                        bail!(".byte value {value:#x} does not fit in one byte");
                    };
                    bytes.push(byte);
                }
                if bytes.is_empty() {
                    bail!(".byte expects at least one value");
                }
                self.emit(FragmentKind::Data {
                    bytes,
                    fixups: Vec::new(),
                })
            }
            ".fill" => {
                let [Token::Number(size), Token::Comma, Token::Number(value)] = rest else {
                    bail!(".fill expects a size and a fill byte");
                };
                let Ok(value) = u8::try_from(*value) else {
                    bail!(".fill value {value:#x} does not fit in one byte");
                };
                self.emit(FragmentKind::Fill { value, size: *size })
            }
            ".align" => {
                let [Token::Number(alignment)] = rest else {
                    bail!(".align expects a single alignment");
                };
                if !alignment.is_power_of_two() {
                    bail!(".align value {alignment} must be a power of two");
                }
                self.emit(FragmentKind::Align {
                    alignment: *alignment,
                })
            }
            other => bail!("unknown directive '{other}'"),
        }
    }

    fn instruction(&mut self, mnemonic: &str, rest: &[Token]) -> Result<()> {
        match mnemonic {
            "nop" | "ret" | "int3" => {
                if !rest.is_empty() {
                    bail!("'{mnemonic}' takes no operands");
                }
                let opcode = match mnemonic {
                    "nop" => 0x90,
                    "ret" => 0xC3,
                    _ => 0xCC,
                };
                self.emit(FragmentKind::Data {
                    bytes: vec![opcode],
                    fixups: Vec::new(),
                })
            }
            "jmp" | "call" => {
                let [Token::Ident(symbol)] = rest else {
                    bail!("'{mnemonic}' expects a label operand");
                };
                let opcode = if mnemonic == "jmp" { 0xE9 } else { 0xE8 };
                self.emit(FragmentKind::Data {
                    bytes: vec![opcode, 0, 0, 0, 0],
                    fixups: vec![Fixup {
                        offset: 1,
                        symbol: symbol.clone(),
                    }],
                })
            }
            other => bail!("unknown instruction '{other}'"),
        }
    }

    fn emit(&mut self, kind: FragmentKind) -> Result<()> {
        let id = self.program.push_fragment(&self.section, kind);
        for label in self.pending_labels.drain(..) {
            self.program.define_symbol(label, &self.section, id, 0)?;
        }
        Ok(())
    }

    /// Labels at the end of the input anchor to an empty fragment.
    fn flush_labels(&mut self) -> Result<()> {
        if self.pending_labels.is_empty() {
            return Ok(());
        }
        self.emit(FragmentKind::Data {
            bytes: Vec::new(),
            fixups: Vec::new(),
        })
    }
}

fn number_list(tokens: &[Token]) -> Result<Vec<u64>> {
    let mut values = Vec::new();
    let mut expect_number = true;
    for token in tokens {
        match (expect_number, token) {
            (true, Token::Number(value)) => {
                values.push(*value);
                expect_number = false;
            }
            (false, Token::Comma) => expect_number = true,
            _ => bail!("malformed number list"),
        }
    }
    if expect_number && !values.is_empty() {
        bail!("trailing comma in number list");
    }
    Ok(values)
}
