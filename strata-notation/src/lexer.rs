//! Line tokenizer for the notation format.

use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t]+")]
pub enum Token {
    #[token("def")]
    Def,
    #[token("use")]
    Use,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    #[regex(r"#[^\r\n]*")]
    Comment,
}

/// Tokenize a single line. Returns the tokens with their column spans, or
/// the column where lexing failed.
pub fn tokenize_line(line: &str) -> Result<Vec<(Token, std::ops::Range<usize>)>, usize> {
    let mut lexer = Token::lexer(line);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => return Err(lexer.span().start),
        }
    }
    Ok(tokens)
}
