use logos::Logos;

/// Tokens of the assembly dialect. Lexing is done per line; comments run
/// to the end of the line and are skipped.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"[;#][^\n]*")]
pub enum Token {
    #[regex(r"\.[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Directive(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_.$]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"0[xX][0-9A-Fa-f]+", |lex| u64::from_str_radix(&lex.slice()[2..], 16).ok())]
    #[regex(r"[0-9]+", |lex| lex.slice().parse().ok())]
    Number(u64),

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,
}

/// Lex one source line; `Err` carries the byte column of the bad token.
pub fn lex_line(line: &str) -> Result<Vec<Token>, usize> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(line);
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push(token),
            Err(()) => return Err(lexer.span().start),
        }
    }
    Ok(tokens)
}
