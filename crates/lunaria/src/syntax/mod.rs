// Source front end: lexer, token stream, AST, recursive-descent parser.
//
// The compiler consumes only the AST produced here; nothing downstream
// depends on parser internals.

pub mod ast;
mod lexer;
mod parser;
mod token;

pub use lexer::Lexer;
pub use parser::parse;
pub use token::Token;

/// A front-end or code-generation failure. The message already carries the
/// `chunkname:line:` prefix.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(chunk_name: &str, line: u32, message: impl AsRef<str>) -> CompileError {
        CompileError {
            message: format!("{}:{}: {}", chunk_name, line, message.as_ref()),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CompileError {}
