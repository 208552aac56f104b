//! Line-oriented parser assembling the statement list.

use strata_engine::{Diagnostic, ParseResult, Severity, SYNTAX_CATEGORY};

use crate::ast::{Keyword, NotationTree, Statement};
use crate::lexer::{tokenize_line, Token};

/// Parse a whole document. Lines that fail to parse become syntax
/// diagnostics; the surviving statements still form a usable tree, so a
/// single bad line does not take the document out of the workspace.
pub fn parse_text(text: &str) -> ParseResult<NotationTree> {
    let mut statements = Vec::new();
    let mut syntax_errors = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line_no = line_no as u32;
        match parse_line(line_no, line) {
            Ok(Some(statement)) => statements.push(statement),
            Ok(None) => {}
            Err(diagnostic) => syntax_errors.push(diagnostic),
        }
    }
    ParseResult {
        tree: NotationTree { statements },
        syntax_errors,
    }
}

fn parse_line(line_no: u32, line: &str) -> Result<Option<Statement>, Diagnostic> {
    let tokens = match tokenize_line(line) {
        Ok(tokens) => tokens,
        Err(column) => {
            return Err(syntax_error(
                line_no,
                column as u32,
                line.len() as u32,
                "unexpected character".to_string(),
            ))
        }
    };
    let significant: Vec<_> = tokens
        .into_iter()
        .filter(|(token, _)| *token != Token::Comment)
        .collect();
    match significant.as_slice() {
        [] => Ok(None),
        [(keyword @ (Token::Def | Token::Use), _), (Token::Ident, name_span)] => {
            let keyword = match keyword {
                Token::Def => Keyword::Def,
                _ => Keyword::Use,
            };
            Ok(Some(Statement {
                keyword,
                name: line[name_span.clone()].to_string(),
                line: line_no,
                name_start: name_span.start as u32,
                name_end: name_span.end as u32,
            }))
        }
        _ => Err(syntax_error(
            line_no,
            0,
            line.len() as u32,
            "expected `def <name>` or `use <name>`".to_string(),
        )),
    }
}

fn syntax_error(line: u32, col_start: u32, col_end: u32, message: String) -> Diagnostic {
    Diagnostic {
        severity: Severity::Error,
        category: SYNTAX_CATEGORY.to_string(),
        message,
        line,
        col_start,
        col_end,
    }
}
