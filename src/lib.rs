pub mod assembler;
pub mod bits;
pub mod compiler;
pub mod config;
pub mod error;
pub mod expr;
pub mod instructions;
pub mod parser;
pub mod preprocessor;
pub mod token;

pub use assembler::{assemble, AssembledOutput};
pub use compiler::{CompiledUnit, Compiler};
pub use config::AssemblerConfig;
pub use error::{AsmError, LexerError, MathError, ParserError, PreprocessorError};
pub use parser::{AstParser, AstTree};
pub use preprocessor::PreprocessorInterpreter;
pub use token::{tokenize, Lexer, Token, Tokenizer};
