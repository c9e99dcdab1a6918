use std::fmt;

use crate::token::TokenLocation;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LexerError {
    #[error("{loc}: unterminated string")]
    UnterminatedString { loc: TokenLocation },
    #[error("{loc}: invalid number `{text}`")]
    InvalidNumber { text: String, loc: TokenLocation },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("unknown keyword `{name}`")]
    UnknownKeyword { name: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("incorrect expression `{expression}`")]
    IncorrectExpression { expression: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PreprocessorError {
    #[error("{loc}: macro `{name}` already exists")]
    MacroAlreadyExists { name: String, loc: TokenLocation },
    #[error("{loc}: variable `{name}` already exists in current scope")]
    VariableAlreadyExistsInCurrentScope { name: String, loc: TokenLocation },
    #[error("{loc}: incorrect math expression `{expression}`: {source}")]
    IncorrectMathExpression {
        expression: String,
        #[source]
        source: MathError,
        loc: TokenLocation,
    },
    #[error("{loc}: unterminated `{directive}` block")]
    UnterminatedBlock { directive: String, loc: TokenLocation },
    #[error("{loc}: unexpected `{directive}`")]
    UnexpectedDirective { directive: String, loc: TokenLocation },
    #[error("{loc}: missing argument for `{directive}`")]
    MissingDirectiveArgument { directive: String, loc: TokenLocation },
    #[error("{loc}: unknown directive `{directive}`")]
    UnknownDirective { directive: String, loc: TokenLocation },
    #[error("{loc}: {message}")]
    UserError { message: String, loc: TokenLocation },
    #[error("{loc}: macro expansion did not settle after {limit} iterations")]
    ExpansionLimitExceeded { limit: usize, loc: TokenLocation },
    #[error("{loc}: macro call depth exceeded {limit}")]
    RecursionLimitExceeded { limit: usize, loc: TokenLocation },
    #[error("{loc}: %rep iteration limit {limit} exceeded")]
    RepLimitExceeded { limit: usize, loc: TokenLocation },
    #[error(transparent)]
    Lexer(#[from] LexerError),
}

/// Placeholder that no resolution pass managed to fill.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedSymbol {
    pub expression: String,
    pub loc: TokenLocation,
    /// Why the last pass failed, usually the unknown name.
    pub source: MathError,
}

impl fmt::Display for UnresolvedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: `{}` ({})", self.loc, self.expression, self.source)
    }
}

fn join_unresolved(symbols: &[UnresolvedSymbol]) -> String {
    symbols.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("{loc}: missing times count expression")]
    IncorrectTimesArgsCount { loc: TokenLocation },
    #[error("{loc}: missing times repeated instruction")]
    MissingTimesRepeatedInstruction { loc: TokenLocation },
    #[error("{loc}: unable to parse repeated instruction `{expression}`")]
    UnableParseRepeatedInstruction { expression: String, loc: TokenLocation },
    #[error("{loc}: incorrect times value {value}")]
    IncorrectTimesValue { value: i64, loc: TokenLocation },
    #[error("{loc}: times repetition limit {limit} exceeded")]
    TimesLimitExceeded { limit: usize, loc: TokenLocation },
    #[error("{loc}: unsupported define token `{token}`")]
    UnsupportedDefineToken { token: String, loc: TokenLocation },
    #[error("{loc}: incorrect float size for `{number}`")]
    IncorrectFloatSize { number: String, loc: TokenLocation },
    #[error("{loc}: missing definition arguments")]
    MissingDefineArgs { loc: TokenLocation },
    #[error("{loc}: missing equ expression")]
    IncorrectEquArgsCount { loc: TokenLocation },
    #[error("{loc}: equ `{name}` already defined")]
    EquAlreadyDefined { name: String, loc: TokenLocation },
    #[error("{loc}: label `{name}` already defined")]
    LabelAlreadyDefined { name: String, loc: TokenLocation },
    #[error("{loc}: `{name}` is a reserved name")]
    UsedReservedName { name: String, loc: TokenLocation },
    #[error("{loc}: unknown instruction `{mnemonic}`")]
    UnknownInstruction { mnemonic: String, loc: TokenLocation },
    #[error("{loc}: `{mnemonic}` expects {expected} argument(s), got {found}")]
    IncorrectInstructionArgs {
        mnemonic: String,
        expected: usize,
        found: usize,
        loc: TokenLocation,
    },
    #[error("{loc}: unexpected token `{token}`")]
    UnexpectedToken { token: String, loc: TokenLocation },
    #[error("{loc}: {source}")]
    Math {
        #[source]
        source: MathError,
        loc: TokenLocation,
    },
    #[error("unresolved symbols: {}", join_unresolved(.symbols))]
    UnresolvedSymbols { symbols: Vec<UnresolvedSymbol> },
    #[error(transparent)]
    Lexer(#[from] LexerError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AsmError {
    #[error("preprocessor: {0}")]
    Preprocessor(#[from] PreprocessorError),
    #[error("parser: {0}")]
    Parser(#[from] ParserError),
    #[error("lexer: {0}")]
    Lexer(#[from] LexerError),
}
