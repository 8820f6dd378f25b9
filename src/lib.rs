//! Interpreter for Mython, a small indentation-based scripting language.
//!
//! Pipeline: [`lexer`] turns source text into an indent-bracketed token
//! stream, [`parser`] builds the evaluable [`ast`] nodes, and the nodes
//! execute against the [`runtime`] object model, printing through a
//! [`runtime::Context`].

pub mod ast;
pub mod fixtures;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod token;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Runtime(#[from] runtime::RuntimeError),
}

/// Runs a Mython program against a fresh global scope and returns
/// everything it printed.
pub fn run(source: &str) -> Result<String, Error> {
    let lexer = lexer::Lexer::new(source)?;
    let program = parser::Parser::new(lexer).parse_program()?;

    let mut output = String::new();
    let mut globals = runtime::Closure::new();
    let mut context = runtime::Context::new(&mut output);
    program
        .execute(&mut globals, &mut context)
        .map_err(|interrupt| Error::Runtime(interrupt.into_runtime_error()))?;
    drop(context);
    Ok(output)
}
