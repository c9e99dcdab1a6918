//! `%`-directive preprocessor: block grammar, scoped definitions and the
//! two-phase interpreter.

pub mod grammar;
pub mod interpreter;
pub mod scope;

pub use grammar::{NodeLocation, PreprocessorGrammar, PreprocessorNode};
pub use interpreter::PreprocessorInterpreter;
pub use scope::{Callable, CallableBody, InterpreterValue, PreprocessorScope, ScopeId};
